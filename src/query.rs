//! Text-query front for the vector query engine.
//!
//! Converts a free-text query into a comparable vector through the same
//! generator the workers use, then ranks stored embeddings by distance.
//! Stored vectors were normalized at generation time, so no normalization
//! happens here.

use crate::collab::ArtifactGenerator;
use crate::db::Db;
use crate::db::artifacts::SearchHit;
use crate::error::{Error, Result};
use crate::model::{GeneratedPayload, RequestKind};

/// Embed `text` and return the `k` nearest stored embeddings, ascending
/// by cosine distance. `model_hint` empty means the generator's default
/// embedding model, which must match the model the store was built with
/// for distances to be meaningful.
pub async fn search_text(
    db: &Db,
    generator: &dyn ArtifactGenerator,
    text: &str,
    model_hint: &str,
    k: i64,
) -> Result<Vec<SearchHit>> {
    let generated = generator
        .generate(RequestKind::Embedding, text.as_bytes(), model_hint)
        .await?;

    let vector = match generated.payload {
        GeneratedPayload::Embedding(v) => v,
        GeneratedPayload::Caption(_) => {
            return Err(Error::Generation(
                "generator returned a caption for an embedding request".to_string(),
            ));
        }
    };

    db.search_embeddings(&vector, k).await
}
