//! Feature-hashing embedder.
//!
//! Words and character trigrams are hashed (FNV-1a) into signed buckets and
//! the result is L2-normalized. Texts sharing vocabulary land close together,
//! which is enough for offline use and tests; it has no notion of meaning.

use async_trait::async_trait;

use crate::Result;
use super::Embedder;

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Self {
        Self { dim: dim.max(1) }
    }

    /// Synchronous form of `embed_text`.
    pub fn vector(&self, text: &str) -> Vec<f32> {
        let mut out = vec![0.0f32; self.dim];
        let lowered = text.to_lowercase();
        for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
            self.add(&mut out, word.as_bytes(), 1.0);
            let chars: Vec<char> = format!(" {word} ").chars().collect();
            for gram in chars.windows(3) {
                let gram: String = gram.iter().collect();
                self.add(&mut out, gram.as_bytes(), 0.5);
            }
        }
        let norm = out.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            out.iter_mut().for_each(|v| *v /= norm);
        }
        out
    }

    fn add(&self, out: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let idx = (h % self.dim as u64) as usize;
        let sign = if (h >> 63) == 0 { 1.0 } else { -1.0 };
        out[idx] += sign * weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |state, b| (state ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

#[async_trait]
impl Embedder for HashingEmbedder {
    fn name(&self) -> &str {
        "hashing"
    }

    fn dimension(&self) -> usize {
        self.dim
    }

    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        Ok(self.vector(text))
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{EmbeddingVector, cosine_similarity};

    fn sim(e: &HashingEmbedder, a: &str, b: &str) -> f64 {
        cosine_similarity(&EmbeddingVector::new("a", e.vector(a)), &EmbeddingVector::new("b", e.vector(b))).unwrap()
    }

    #[test]
    fn test_normalized_and_deterministic() {
        let e = HashingEmbedder::new(64);
        let v = e.vector("MSI B650 Tomahawk anakart");
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert_eq!(v, e.vector("MSI B650 Tomahawk anakart"));
    }

    #[test]
    fn test_case_insensitive() {
        let e = HashingEmbedder::new(128);
        assert_eq!(e.vector("MSI Anakart"), e.vector("msi anakart"));
    }

    #[test]
    fn test_shared_words_score_higher() {
        let e = HashingEmbedder::new(768);
        let close = sim(&e, "MSI anakart ürünleri", "name: B650 Tomahawk category: Anakart brand: MSI");
        let far = sim(&e, "MSI anakart ürünleri", "name: Logitech G502 category: Mouse");
        assert!(close > far, "{close} <= {far}");
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let e = HashingEmbedder::new(8);
        assert!(e.vector("  ").iter().all(|v| *v == 0.0));
    }
}
