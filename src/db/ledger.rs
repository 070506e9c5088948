//! Request ledger: submit, atomic claim, terminal transitions.
//!
//! The ledger is append-only — requests are never deleted, so failed rows
//! stay visible with their error message for operator inspection.

use crate::error::{Error, Result};
use crate::model::{NewRequest, Request, RequestId, RequestKind, RequestReady, State};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;

impl super::Db {
    /// Submit a new request: insert a `pending` row and publish a wake-up
    /// on the kind's channel, in one transaction. NOTIFY is transactional —
    /// it only fires on commit, so a listener can never observe a wake-up
    /// for a row that was rolled back.
    pub async fn submit(&self, new: NewRequest) -> Result<Request> {
        let mut tx = self.pool.begin().await?;
        let now = chrono::Utc::now();

        let (id,): (i64,) = sqlx::query_as(
            "INSERT INTO requests (content_ref, kind, model, state, created_at)
             VALUES ($1, $2, $3, 'pending', $4)
             RETURNING id",
        )
        .bind(&new.content_ref)
        .bind(new.kind.to_string())
        .bind(&new.model)
        .bind(now)
        .fetch_one(&mut *tx)
        .await?;

        let payload = serde_json::to_string(&RequestReady {
            request_id: RequestId(id),
            content_ref: new.content_ref.clone(),
            kind: new.kind,
        })
        .map_err(|e| Error::Other(format!("encode notification: {e}")))?;

        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(new.kind.channel())
            .bind(payload)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        metrics::requests_submitted().add(
            1,
            &[KeyValue::new("kind", new.kind.to_string())],
        );

        self.get_request(RequestId(id)).await
    }

    /// Submit only if no artifact already exists for this content hash and
    /// kind. Returns `None` (and creates no ledger row) when the artifact
    /// store already holds a result — re-deriving would be a no-op anyway.
    pub async fn submit_if_missing(
        &self,
        new: NewRequest,
        content_hash: &crate::model::ContentHash,
    ) -> Result<Option<Request>> {
        if self.artifact_exists(content_hash, new.kind).await? {
            return Ok(None);
        }
        self.submit(new).await.map(Some)
    }

    /// Atomically claim the oldest unclaimed pending request.
    ///
    /// `FOR UPDATE SKIP LOCKED` makes racing workers skip rows another
    /// transaction holds, so two callers never receive the same request.
    /// The claim is recorded in `claimed_at`; state stays `pending` until
    /// the worker reaches a terminal transition. A worker crash mid-claim
    /// leaves the row claimed forever (baseline design, no lease).
    pub async fn claim_next(&self) -> Result<Option<Request>> {
        let row: Option<RequestRow> = sqlx::query_as(
            "UPDATE requests SET claimed_at = now()
             WHERE id = (
                 SELECT id FROM requests
                 WHERE state = 'pending' AND claimed_at IS NULL
                 ORDER BY id
                 LIMIT 1
                 FOR UPDATE SKIP LOCKED
             )
             RETURNING id, content_ref, kind, model, state, error_message,
                       created_at, claimed_at, completed_at",
        )
        .fetch_optional(&self.pool)
        .await?;

        metrics::claims().add(
            1,
            &[KeyValue::new(
                "result",
                if row.is_some() { "claimed" } else { "empty" },
            )],
        );

        row.map(RequestRow::try_into_request).transpose()
    }

    /// Transition `pending -> fulfilled`. Idempotent: calling again on an
    /// already-terminal request is a no-op, tolerating at-least-once
    /// delivery of completion signals.
    pub async fn mark_fulfilled(&self, id: RequestId) -> Result<()> {
        self.mark_terminal(id, State::Fulfilled, None).await
    }

    /// Transition `pending -> failed`, recording the error. Idempotent on
    /// already-terminal rows; the first recorded error wins.
    pub async fn mark_failed(&self, id: RequestId, message: &str) -> Result<()> {
        self.mark_terminal(id, State::Failed, Some(message)).await
    }

    async fn mark_terminal(&self, id: RequestId, to: State, error: Option<&str>) -> Result<()> {
        let rows_affected = sqlx::query(
            "UPDATE requests
             SET state = $1, error_message = $2, completed_at = now()
             WHERE id = $3 AND state = 'pending'",
        )
        .bind(to.to_string())
        .bind(error)
        .bind(id.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if rows_affected == 0 {
            // Either already terminal (fine) or the id doesn't exist (error).
            let existing = self.get_request(id).await?;
            if !existing.state.is_terminal() {
                return Err(Error::InvalidTransition {
                    from: existing.state.to_string(),
                    to: to.to_string(),
                });
            }
            return Ok(());
        }

        metrics::state_transitions().add(
            1,
            &[
                KeyValue::new("from", "pending"),
                KeyValue::new("to", to.to_string()),
            ],
        );
        Ok(())
    }

    /// Get a request by ID.
    pub async fn get_request(&self, id: RequestId) -> Result<Request> {
        let row: Option<RequestRow> = sqlx::query_as(
            "SELECT id, content_ref, kind, model, state, error_message,
                    created_at, claimed_at, completed_at
             FROM requests WHERE id = $1",
        )
        .bind(id.0)
        .fetch_optional(&self.pool)
        .await?;

        row.ok_or_else(|| Error::NotFound(format!("request {id}")))?
            .try_into_request()
    }

    /// List requests, newest first, with optional state and kind filters.
    pub async fn list_requests(
        &self,
        state: Option<State>,
        kind: Option<RequestKind>,
        limit: i64,
    ) -> Result<Vec<Request>> {
        let rows: Vec<RequestRow> = sqlx::query_as(
            "SELECT id, content_ref, kind, model, state, error_message,
                    created_at, claimed_at, completed_at
             FROM requests
             WHERE ($1::text IS NULL OR state = $1)
             AND ($2::text IS NULL OR kind = $2)
             ORDER BY id DESC
             LIMIT $3",
        )
        .bind(state.map(|s| s.to_string()))
        .bind(kind.map(|k| k.to_string()))
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(RequestRow::try_into_request)
            .collect()
    }

    /// Publish a standalone notification outside any ledger transaction.
    /// Best-effort: used for the secondary `artifact_inserted` channel.
    pub async fn publish(&self, channel: &str, payload: &str) -> Result<()> {
        sqlx::query("SELECT pg_notify($1, $2)")
            .bind(channel)
            .bind(payload)
            .execute(&self.pool)
            .await?;
        metrics::notifications_published().add(1, &[KeyValue::new("channel", channel.to_string())]);
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct RequestRow {
    id: i64,
    content_ref: String,
    kind: String,
    model: String,
    state: String,
    error_message: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    claimed_at: Option<chrono::DateTime<chrono::Utc>>,
    completed_at: Option<chrono::DateTime<chrono::Utc>>,
}

impl RequestRow {
    fn try_into_request(self) -> Result<Request> {
        Ok(Request {
            id: RequestId(self.id),
            content_ref: self.content_ref,
            kind: self.kind.parse()?,
            model: self.model,
            state: self.state.parse()?,
            error_message: self.error_message,
            created_at: self.created_at,
            claimed_at: self.claimed_at,
            completed_at: self.completed_at,
        })
    }
}
