//! # Embedding Service
//!
//! Turns text into fixed-dimension vectors and compares them.
//!
//! | Embedder | Module | Description |
//! |----------|--------|-------------|
//! | `HashingEmbedder` | `hashing` | Local feature hashing, no network |
//! | `GeminiEmbedder` | `http` | Gemini `embedContent` endpoint |
//!
//! `EmbeddingService` wraps whichever embedder is configured: it applies the
//! outbound limiter and timeout, and refuses vectors of the wrong dimension.

pub mod hashing;
#[cfg(feature = "http")]
pub mod http;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::limits::OutboundLimiter;
use crate::{Error, Result};

pub use hashing::HashingEmbedder;
#[cfg(feature = "http")]
pub use http::GeminiEmbedder;

/// Default dimension, matching Gemini `embedding-001`.
pub const DEFAULT_DIMENSION: usize = 768;

// ============================================================================
// EmbeddingVector
// ============================================================================

/// A vector tagged with the identity of the text it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmbeddingVector {
    /// e.g. `node:42` or `question:<key>`
    pub source: String,
    pub values: Vec<f32>,
}

impl EmbeddingVector {
    pub fn new(source: impl Into<String>, values: Vec<f32>) -> Self {
        Self { source: source.into(), values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    pub fn norm(&self) -> f64 {
        self.values.iter().map(|v| f64::from(*v) * f64::from(*v)).sum::<f64>().sqrt()
    }
}

/// Cosine similarity in `[-1, 1]`. A zero vector is similar to nothing.
pub fn cosine_similarity(a: &EmbeddingVector, b: &EmbeddingVector) -> Result<f64> {
    if a.dimension() != b.dimension() {
        return Err(Error::DimensionMismatch { expected: a.dimension(), got: b.dimension() });
    }
    let dot: f64 = a.values.iter().zip(&b.values).map(|(x, y)| f64::from(*x) * f64::from(*y)).sum();
    let norms = a.norm() * b.norm();
    if norms == 0.0 || !norms.is_finite() {
        return Ok(0.0);
    }
    Ok((dot / norms).clamp(-1.0, 1.0))
}

// ============================================================================
// Embedder trait
// ============================================================================

/// An embedding backend.
#[async_trait]
pub trait Embedder: Send + Sync + 'static {
    /// Name for logs and health reports.
    fn name(&self) -> &str;

    fn dimension(&self) -> usize;

    /// Raw vector for `text`.
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>>;

    /// Reachability check.
    async fn ping(&self) -> Result<()> {
        self.embed_text("ping").await.map(|_| ())
    }
}

// ============================================================================
// EmbeddingService
// ============================================================================

#[derive(Clone)]
pub struct EmbeddingService {
    embedder: Arc<dyn Embedder>,
    limiter: OutboundLimiter,
    timeout: Duration,
}

impl EmbeddingService {
    pub fn new(embedder: Arc<dyn Embedder>, limiter: OutboundLimiter, timeout: Duration) -> Self {
        Self { embedder, limiter, timeout }
    }

    pub fn dimension(&self) -> usize {
        self.embedder.dimension()
    }

    pub fn backend_name(&self) -> &str {
        self.embedder.name()
    }

    /// Embed `text`, tagging the vector with `source`.
    ///
    /// Every failure (unreachable, timed out, wrong length, non-finite
    /// values) is reported as `EmbeddingUnavailable`.
    pub async fn embed(&self, source: impl Into<String>, text: &str) -> Result<EmbeddingVector> {
        let timeout_ms = self.timeout.as_millis() as u64;
        let values = self
            .limiter
            .call(self.timeout, || Error::RequestTimeout(timeout_ms), self.embedder.embed_text(text))
            .await
            .map_err(|err| match err {
                Error::EmbeddingUnavailable(_) => err,
                other => {
                    warn!(stage = "embed", backend = self.embedder.name(), code = other.code(), error = %other, "embedding failed");
                    Error::EmbeddingUnavailable(other.public_message())
                }
            })?;

        let expected = self.embedder.dimension();
        if values.len() != expected {
            return Err(Error::EmbeddingUnavailable(format!(
                "{} returned {} values, expected {expected}",
                self.embedder.name(),
                values.len()
            )));
        }
        if values.iter().any(|v| !v.is_finite()) {
            return Err(Error::EmbeddingUnavailable(format!("{} returned non-finite values", self.embedder.name())));
        }
        Ok(EmbeddingVector::new(source, values))
    }

    pub fn similarity(&self, a: &EmbeddingVector, b: &EmbeddingVector) -> Result<f64> {
        cosine_similarity(a, b)
    }

    pub async fn ping(&self) -> Result<()> {
        let timeout_ms = self.timeout.as_millis() as u64;
        self.limiter.call(self.timeout, || Error::RequestTimeout(timeout_ms), self.embedder.ping()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    struct Broken {
        len: usize,
        dim: usize,
    }

    #[async_trait]
    impl Embedder for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn dimension(&self) -> usize {
            self.dim
        }
        async fn embed_text(&self, _text: &str) -> Result<Vec<f32>> {
            if self.len == 0 {
                Err(Error::Unavailable("connection refused".into()))
            } else {
                Ok(vec![0.5; self.len])
            }
        }
    }

    fn service(e: impl Embedder) -> EmbeddingService {
        EmbeddingService::new(Arc::new(e), OutboundLimiter::new(2), Duration::from_secs(1))
    }

    fn v(values: &[f32]) -> EmbeddingVector {
        EmbeddingVector::new("t", values.to_vec())
    }

    #[test]
    fn test_cosine_basics() {
        assert!((cosine_similarity(&v(&[1.0, 0.0]), &v(&[1.0, 0.0])).unwrap() - 1.0).abs() < 1e-9);
        assert!(cosine_similarity(&v(&[1.0, 0.0]), &v(&[0.0, 1.0])).unwrap().abs() < 1e-9);
        assert!((cosine_similarity(&v(&[1.0, 2.0]), &v(&[-1.0, -2.0])).unwrap() + 1.0).abs() < 1e-9);
        assert_eq!(cosine_similarity(&v(&[0.0, 0.0]), &v(&[1.0, 0.0])).unwrap(), 0.0);
    }

    #[test]
    fn test_dimension_mismatch() {
        assert!(matches!(
            cosine_similarity(&v(&[1.0, 0.0]), &v(&[1.0, 0.0, 0.0])),
            Err(Error::DimensionMismatch { expected: 2, got: 3 })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_backend() {
        let s = service(Broken { len: 0, dim: 4 });
        assert!(matches!(s.embed("q", "hello").await, Err(Error::EmbeddingUnavailable(_))));
    }

    #[tokio::test]
    async fn test_wrong_length_is_malformed() {
        let s = service(Broken { len: 3, dim: 4 });
        assert!(matches!(s.embed("q", "hello").await, Err(Error::EmbeddingUnavailable(_))));
    }

    #[tokio::test]
    async fn test_vector_is_tagged() {
        let s = service(HashingEmbedder::new(16));
        let e = s.embed("question:abc", "MSI anakart").await.unwrap();
        assert_eq!(e.source, "question:abc");
        assert_eq!(e.dimension(), 16);
    }

    proptest! {
        #[test]
        fn prop_cosine_is_symmetric_and_reflexive(
            a in prop::collection::vec(-100.0f32..100.0, 8),
            b in prop::collection::vec(-100.0f32..100.0, 8),
        ) {
            let (a, b) = (v(&a), v(&b));
            let ab = cosine_similarity(&a, &b).unwrap();
            let ba = cosine_similarity(&b, &a).unwrap();
            prop_assert!((ab - ba).abs() < 1e-9);
            prop_assert!((-1.0..=1.0).contains(&ab));
            if a.norm() > 1e-3 {
                prop_assert!((cosine_similarity(&a, &a).unwrap() - 1.0).abs() < 1e-6);
            }
        }
    }
}
