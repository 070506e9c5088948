//! Artifact store and vector query engine.
//!
//! Captions and embeddings live in separate tables so the embedding column
//! can be a native pgvector type. Both are keyed by content hash with a
//! first-writer-wins upsert: re-deriving byte-identical input never
//! overwrites a previously good result, and two workers racing on
//! duplicate-content requests cannot produce duplicate rows.

use crate::error::Result;
use crate::model::{Artifact, ContentHash, RequestKind};
use crate::telemetry::metrics;
use opentelemetry::KeyValue;
use pgvector::Vector;

/// One nearest-neighbor hit: the content hash and its cosine distance
/// from the query vector.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub content_hash: ContentHash,
    pub model: String,
    pub distance: f64,
}

impl super::Db {
    /// Insert an artifact unless one already exists for its content hash
    /// and kind. Returns `true` if this call inserted the row, `false` if
    /// an earlier writer won.
    pub async fn upsert_artifact(&self, artifact: &Artifact) -> Result<bool> {
        let inserted = match artifact {
            Artifact::Caption {
                content_hash,
                model,
                text,
            } => {
                sqlx::query(
                    "INSERT INTO captions (content_hash, model, caption)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (content_hash) DO NOTHING",
                )
                .bind(content_hash.as_str())
                .bind(model)
                .bind(text)
                .execute(&self.pool)
                .await?
                .rows_affected()
                    > 0
            }
            Artifact::Embedding {
                content_hash,
                model,
                vector,
            } => {
                sqlx::query(
                    "INSERT INTO embeddings (content_hash, model, embedding)
                     VALUES ($1, $2, $3)
                     ON CONFLICT (content_hash) DO NOTHING",
                )
                .bind(content_hash.as_str())
                .bind(model)
                .bind(Vector::from(vector.clone()))
                .execute(&self.pool)
                .await?
                .rows_affected()
                    > 0
            }
        };

        metrics::artifact_upserts().add(
            1,
            &[
                KeyValue::new("kind", artifact.kind().to_string()),
                KeyValue::new("result", if inserted { "inserted" } else { "existing" }),
            ],
        );
        Ok(inserted)
    }

    /// Point lookup by content hash and kind. Used by workers to skip
    /// regeneration when the content has already been processed under a
    /// different request.
    pub async fn get_artifact(
        &self,
        content_hash: &ContentHash,
        kind: RequestKind,
    ) -> Result<Option<Artifact>> {
        match kind {
            RequestKind::Caption => {
                let row: Option<(String, String)> = sqlx::query_as(
                    "SELECT model, caption FROM captions WHERE content_hash = $1",
                )
                .bind(content_hash.as_str())
                .fetch_optional(&self.pool)
                .await?;
                Ok(row.map(|(model, text)| Artifact::Caption {
                    content_hash: content_hash.clone(),
                    model,
                    text,
                }))
            }
            RequestKind::Embedding => {
                let row: Option<(String, Vector)> = sqlx::query_as(
                    "SELECT model, embedding FROM embeddings WHERE content_hash = $1",
                )
                .bind(content_hash.as_str())
                .fetch_optional(&self.pool)
                .await?;
                Ok(row.map(|(model, embedding)| Artifact::Embedding {
                    content_hash: content_hash.clone(),
                    model,
                    vector: embedding.to_vec(),
                }))
            }
        }
    }

    /// Existence check without pulling the payload.
    pub async fn artifact_exists(
        &self,
        content_hash: &ContentHash,
        kind: RequestKind,
    ) -> Result<bool> {
        let table = match kind {
            RequestKind::Caption => "captions",
            RequestKind::Embedding => "embeddings",
        };
        let (exists,): (bool,) = sqlx::query_as(&format!(
            "SELECT EXISTS (SELECT 1 FROM {table} WHERE content_hash = $1)"
        ))
        .bind(content_hash.as_str())
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    /// Rank stored embeddings by cosine distance to the query vector,
    /// ascending, at most `k` hits. Stateless per call; an empty store
    /// yields an empty vec.
    ///
    /// The query vector is bound as a typed pgvector parameter — vector
    /// values are never built via string interpolation.
    pub async fn search_embeddings(&self, query: &[f32], k: i64) -> Result<Vec<SearchHit>> {
        let rows: Vec<(String, String, f64)> = sqlx::query_as(
            "SELECT content_hash, model, (embedding <=> $1)::float8 AS distance
             FROM embeddings
             ORDER BY embedding <=> $1
             LIMIT $2",
        )
        .bind(Vector::from(query.to_vec()))
        .bind(k)
        .fetch_all(&self.pool)
        .await?;

        metrics::searches().add(1, &[KeyValue::new("hits", rows.len() as i64)]);

        Ok(rows
            .into_iter()
            .map(|(content_hash, model, distance)| SearchHit {
                content_hash: ContentHash(content_hash),
                model,
                distance,
            })
            .collect())
    }
}
