//! Fulfillment worker: hybrid push+poll consumer of the request ledger.
//!
//! Push (LISTEN on the kind channels) is a latency optimization; the poll
//! tick is the correctness backstop. A missed or malformed notification
//! never strands a request longer than one poll interval. Each worker is
//! single-flight: it owns one claimed request at a time, and all
//! coordination with other workers goes through the ledger's atomic claim
//! and the artifact store's first-writer-wins upsert.

use crate::collab::{ArtifactGenerator, ContentFetcher};
use crate::db::Db;
use crate::error::{Error, Result};
use crate::identity;
use crate::model::{
    ARTIFACT_INSERTED_CHANNEL, ArtifactInserted, EMBEDDING_DIM, GeneratedPayload, Request,
    RequestKind, RequestReady,
};
use crate::telemetry::metrics;
use crate::telemetry::request::{record_outcome, start_fulfill_span};
use opentelemetry::KeyValue;
use sqlx::postgres::PgListener;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{Instrument, error, info, warn};

/// Configuration for a fulfillment worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Pull-fallback interval. Bounded, single-digit seconds by default.
    pub poll_interval: Duration,
    /// When false, the worker never connects a listener and relies on
    /// polling alone. Correctness is identical; latency is worse.
    pub push_enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            push_enabled: true,
        }
    }
}

/// A single fulfillment worker. Spawn several for concurrency; the
/// ledger's claim guarantees no two ever process the same request.
pub struct Worker {
    db: Arc<Db>,
    fetcher: Arc<dyn ContentFetcher>,
    generator: Arc<dyn ArtifactGenerator>,
    config: WorkerConfig,
    shutdown: Arc<Notify>,
}

impl Clone for Worker {
    fn clone(&self) -> Self {
        Self {
            db: Arc::clone(&self.db),
            fetcher: Arc::clone(&self.fetcher),
            generator: Arc::clone(&self.generator),
            config: self.config.clone(),
            shutdown: Arc::clone(&self.shutdown),
        }
    }
}

impl Worker {
    pub fn new(
        db: Arc<Db>,
        fetcher: Arc<dyn ContentFetcher>,
        generator: Arc<dyn ArtifactGenerator>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            db,
            fetcher,
            generator,
            config,
            shutdown: Arc::new(Notify::new()),
        }
    }

    /// Signal the worker to stop after its current iteration. In-flight
    /// work finishes; an unstarted claim stays claimed (no mid-flight
    /// cancellation in the baseline design).
    pub fn shutdown(&self) {
        self.shutdown.notify_one();
    }

    /// Run the worker loop until shutdown.
    pub async fn run(&self) -> Result<()> {
        let mut listener = if self.config.push_enabled {
            let mut l = PgListener::connect_with(self.db.pool()).await?;
            for kind in RequestKind::ALL {
                l.listen(kind.channel()).await?;
            }
            Some(l)
        } else {
            None
        };

        info!(
            push = self.config.push_enabled,
            poll_secs = self.config.poll_interval.as_secs(),
            "worker started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.notified() => {
                    info!("worker shutting down");
                    return Ok(());
                }
                notification = recv_or_never(&mut listener) => {
                    match notification {
                        Ok(n) => self.note_wakeup(n.channel(), n.payload()),
                        Err(e) => {
                            // Listener trouble is survivable: the poll tick
                            // below still drives progress.
                            warn!("listener error: {e}, relying on poll fallback");
                        }
                    }
                }
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }

            // Whether woken by push or by the poll tick, drain the ledger.
            if let Err(e) = self.drain().await {
                error!("drain error: {e}");
            }
        }
    }

    /// Log the wake-up; a payload that fails to parse is dropped, never
    /// fatal, since claiming does not depend on it.
    fn note_wakeup(&self, channel: &str, payload: &str) {
        match parse_ready(payload) {
            Ok(event) => {
                info!(channel, request_id = %event.request_id, "notified of new work");
            }
            Err(e) => {
                metrics::malformed_notifications().add(1, &[KeyValue::new("channel", channel.to_string())]);
                warn!(channel, "{e}");
            }
        }
    }

    /// Claim and process requests until the ledger has no more work.
    async fn drain(&self) -> Result<()> {
        while let Some(request) = self.db.claim_next().await? {
            self.process(request).await?;
        }
        Ok(())
    }

    /// Process one claimed request through to a terminal state.
    ///
    /// Fetch and generation failures are terminal per request: recorded via
    /// `mark_failed`, never retried here. Only storage errors propagate.
    async fn process(&self, request: Request) -> Result<()> {
        let span = start_fulfill_span(&request);
        let started = std::time::Instant::now();

        let outcome = async {
            let bytes = match self.fetcher.fetch(&request.content_ref).await {
                Ok(bytes) => bytes,
                Err(e @ Error::Fetch(_)) => {
                    self.db.mark_failed(request.id, &e.to_string()).await?;
                    return Ok::<&'static str, Error>("fetch_failed");
                }
                Err(e) => return Err(e),
            };

            let content_hash = identity::hash_reader(&bytes[..])?;

            // Content may already be processed under a different request
            // (duplicate refs, or a crash between upsert and mark_fulfilled).
            // Finding an existing artifact just means: mark and move on.
            if self.db.artifact_exists(&content_hash, request.kind).await? {
                info!(id = %request.id, hash = %content_hash, "artifact already stored, skipping generation");
                self.db.mark_fulfilled(request.id).await?;
                return Ok("deduplicated");
            }

            let generated = match self
                .generator
                .generate(request.kind, &bytes, &request.model)
                .await
            {
                Ok(generated) => generated,
                Err(e @ Error::Generation(_)) => {
                    self.db.mark_failed(request.id, &e.to_string()).await?;
                    return Ok("generation_failed");
                }
                Err(e) => return Err(e),
            };

            // A vector of the wrong width would be rejected by the store's
            // fixed-dimension column. That is the generator misbehaving, not
            // storage being unavailable: fail the request, keep the worker.
            if let GeneratedPayload::Embedding(vector) = &generated.payload {
                if vector.len() != EMBEDDING_DIM {
                    let e = Error::Generation(format!(
                        "model {} produced a {}-dimensional embedding, store holds {EMBEDDING_DIM}",
                        generated.model,
                        vector.len()
                    ));
                    self.db.mark_failed(request.id, &e.to_string()).await?;
                    return Ok("generation_failed");
                }
            }

            let artifact = generated.into_artifact(content_hash.clone());
            let inserted = self.db.upsert_artifact(&artifact).await?;
            if !inserted {
                // A racing worker on duplicate content won; theirs stands.
                info!(id = %request.id, hash = %content_hash, "artifact existed, first writer wins");
            }

            self.db.mark_fulfilled(request.id).await?;

            // Secondary notification for downstream consumers. Best-effort:
            // ledger state is already committed, so failure is only logged.
            let event = ArtifactInserted {
                content_ref: request.content_ref.clone(),
                content_hash,
                kind: request.kind,
            };
            match serde_json::to_string(&event) {
                Ok(payload) => {
                    if let Err(e) = self.db.publish(ARTIFACT_INSERTED_CHANNEL, &payload).await {
                        warn!(id = %request.id, "artifact_inserted publish failed: {e}");
                    }
                }
                Err(e) => warn!(id = %request.id, "artifact_inserted encode failed: {e}"),
            }

            Ok("fulfilled")
        }
        .instrument(span.clone())
        .await?;

        let elapsed_ms = started.elapsed().as_millis() as f64;
        record_outcome(&span, outcome);
        metrics::fulfillments().add(
            1,
            &[
                KeyValue::new("kind", request.kind.to_string()),
                KeyValue::new("result", outcome),
            ],
        );
        metrics::fulfillment_duration_ms().record(
            elapsed_ms,
            &[KeyValue::new("kind", request.kind.to_string())],
        );

        info!(id = %request.id, outcome, elapsed_ms, "request retired");
        Ok(())
    }
}

/// Await the next notification, or never resolve when push is disabled so
/// the poll arm of the select drives the loop alone.
async fn recv_or_never(
    listener: &mut Option<PgListener>,
) -> sqlx::Result<sqlx::postgres::PgNotification> {
    match listener {
        Some(l) => l.recv().await,
        None => std::future::pending().await,
    }
}

fn parse_ready(payload: &str) -> Result<RequestReady> {
    serde_json::from_str(payload)
        .map_err(|e| Error::MalformedNotification(format!("{payload:?}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::RequestId;

    #[test]
    fn well_formed_payload_parses() {
        let payload = r#"{"request_id":7,"content_ref":"img1.png","kind":"caption"}"#;
        let event = parse_ready(payload).unwrap();
        assert_eq!(event.request_id, RequestId(7));
        assert_eq!(event.kind, RequestKind::Caption);
    }

    #[test]
    fn garbage_payloads_are_malformed_not_fatal() {
        for payload in ["", "not json", "{}", r#"{"request_id":"seven"}"#] {
            match parse_ready(payload) {
                Err(Error::MalformedNotification(msg)) => {
                    assert!(msg.contains(&format!("{payload:?}")));
                }
                other => panic!("expected malformed-notification error, got {other:?}"),
            }
        }
    }
}
