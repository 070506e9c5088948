//! External collaborator seams: content fetch and artifact generation.
//!
//! The core treats both as stateless capability calls. Model handles,
//! devices, and HTTP clients live behind these traits; the worker has no
//! visibility into their lifecycle.

pub mod ollama;

use crate::error::{Error, Result};
use crate::model::{Generated, RequestKind};
use async_trait::async_trait;

/// Resolves a logical content ref (path or URL) to raw bytes.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Failures surface as [`Error::Fetch`]: terminal for the request,
    /// recorded in the ledger, not retried.
    async fn fetch(&self, content_ref: &str) -> Result<Vec<u8>>;
}

/// Turns raw bytes into a caption string or a fixed-length float vector.
#[async_trait]
pub trait ArtifactGenerator: Send + Sync {
    /// `model_hint` empty means "use the default model for this kind";
    /// the returned [`Generated`] names the model that actually ran.
    /// Failures surface as [`Error::Generation`]: terminal for the request.
    async fn generate(
        &self,
        kind: RequestKind,
        bytes: &[u8],
        model_hint: &str,
    ) -> Result<Generated>;
}

/// Filesystem fetcher: the content ref is a local path.
pub struct FsFetcher;

#[async_trait]
impl ContentFetcher for FsFetcher {
    async fn fetch(&self, content_ref: &str) -> Result<Vec<u8>> {
        tokio::fs::read(content_ref)
            .await
            .map_err(|e| Error::Fetch(format!("{content_ref}: {e}")))
    }
}

/// Scale a vector to unit L2 norm, in place. Normalization happens once,
/// at generation time, so stored vectors are directly comparable at query
/// time. Zero vectors are left untouched.
pub fn l2_normalize(v: &mut [f32]) {
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_norm() {
        let mut v = vec![3.0, 4.0];
        l2_normalize(&mut v);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
        assert!((v[0] - 0.6).abs() < 1e-6);
        assert!((v[1] - 0.8).abs() < 1e-6);
    }

    #[test]
    fn normalize_leaves_zero_vector_alone() {
        let mut v = vec![0.0, 0.0, 0.0];
        l2_normalize(&mut v);
        assert_eq!(v, vec![0.0, 0.0, 0.0]);
    }

    #[tokio::test]
    async fn fs_fetcher_reports_missing_file_as_fetch_error() {
        let err = FsFetcher
            .fetch("/nonexistent/path/img1.png")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Fetch(_)));
    }
}
