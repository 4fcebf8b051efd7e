use async_trait::async_trait;
use std::hash::{Hash, Hasher};
use twox_hash::XxHash64;

use ragdb_core::error::{Error, Result};
use ragdb_core::traits::{EmbeddingProvider, TaskType};

use crate::l2_normalize;

/// Deterministic bag-of-words embedder: every lowercased token is hashed into
/// one of `dim` buckets. Texts sharing vocabulary land close together, which is
/// enough for offline runs and tests. Documents and queries embed identically.
#[derive(Debug, Clone)]
pub struct HashingEmbedder {
    dim: usize,
}

impl HashingEmbedder {
    pub fn new(dim: usize) -> Result<Self> {
        if dim == 0 {
            return Err(Error::invalid_argument("embedding dimension must be positive"));
        }
        Ok(Self { dim })
    }

    pub fn embed_one(&self, text: &str) -> Vec<f64> {
        let mut v = vec![0f64; self.dim];
        let tokens = text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| !t.is_empty())
            .map(str::to_lowercase);
        for token in tokens {
            let mut hasher = XxHash64::with_seed(0);
            token.hash(&mut hasher);
            let h = hasher.finish();
            let idx = (h % self.dim as u64) as usize;
            // High bits choose the sign so unrelated tokens partly cancel.
            let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
            v[idx] += sign;
        }
        l2_normalize(&mut v);
        v
    }
}

#[async_trait]
impl EmbeddingProvider for HashingEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    async fn embed(&self, texts: &[String], _task: TaskType) -> Result<Vec<Vec<f64>>> {
        Ok(texts.iter().map(|t| self.embed_one(t)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_dimension_is_rejected() {
        assert!(HashingEmbedder::new(0).is_err());
    }

    #[test]
    fn case_and_punctuation_do_not_matter() {
        let e = HashingEmbedder::new(64).expect("embedder");
        assert_eq!(e.embed_one("Hello, World!"), e.embed_one("hello world"));
    }

    #[test]
    fn empty_text_embeds_to_zero_vector() {
        let e = HashingEmbedder::new(8).expect("embedder");
        assert!(e.embed_one("  ").iter().all(|x| *x == 0.0));
    }
}
