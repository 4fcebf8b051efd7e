use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};

use ragdb_core::error::{Error, Result, SchemaError};
use ragdb_core::traits::{EmbeddingProvider, TaskType};
use ragdb_embed::{embed_in_batches, HashingEmbedder};

#[tokio::test]
async fn hashing_embedder_shapes_and_determinism() -> anyhow::Result<()> {
    let embedder = HashingEmbedder::new(256)?;
    let texts = vec!["hello world".to_string(), "hello world".to_string()];
    let embs = embedder.embed(&texts, TaskType::Document).await?;
    let v1 = &embs[0];
    let v2 = &embs[1];

    assert_eq!(v1.len(), 256);
    let norm: f64 = v1.iter().map(|x| x * x).sum::<f64>().sqrt();
    assert!((norm - 1.0).abs() <= 1e-9, "vector is L2-normalized (norm={norm})");
    assert_eq!(v1, v2);

    let query = embedder.embed(&["hello world".to_string()], TaskType::Query).await?;
    assert_eq!(&query[0], v1, "task type does not change hashing output");
    Ok(())
}

/// Tags every vector with the index of the text it was produced for.
struct IndexEcho {
    calls: AtomicUsize,
}

#[async_trait]
impl EmbeddingProvider for IndexEcho {
    fn dim(&self) -> usize {
        1
    }

    async fn embed(&self, texts: &[String], _task: TaskType) -> Result<Vec<Vec<f64>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        texts
            .iter()
            .map(|t| t.parse::<f64>().map(|n| vec![n]).map_err(|e| Error::Embedding(e.to_string())))
            .collect()
    }
}

#[tokio::test]
async fn batches_preserve_input_order() -> anyhow::Result<()> {
    let provider = IndexEcho {
        calls: AtomicUsize::new(0),
    };
    let texts: Vec<String> = (0..23).map(|i| i.to_string()).collect();
    let out = embed_in_batches(&provider, &texts, TaskType::Document, 5, 3).await?;

    assert_eq!(provider.calls.load(Ordering::SeqCst), 5);
    let flat: Vec<f64> = out.into_iter().map(|v| v[0]).collect();
    let expected: Vec<f64> = (0..23).map(f64::from).collect();
    assert_eq!(flat, expected);
    Ok(())
}

#[tokio::test]
async fn provider_errors_propagate() {
    let provider = IndexEcho {
        calls: AtomicUsize::new(0),
    };
    let texts = vec!["1".to_string(), "not-a-number".to_string()];
    let err = embed_in_batches(&provider, &texts, TaskType::Query, 1, 2).await.err();
    assert!(matches!(err, Some(Error::Embedding(_))));
}

struct WrongDim;

#[async_trait]
impl EmbeddingProvider for WrongDim {
    fn dim(&self) -> usize {
        4
    }

    async fn embed(&self, texts: &[String], _task: TaskType) -> Result<Vec<Vec<f64>>> {
        Ok(texts.iter().map(|_| vec![0.0; 3]).collect())
    }
}

#[tokio::test]
async fn dimension_mismatch_is_reported() {
    let texts = vec!["a".to_string()];
    let err = embed_in_batches(&WrongDim, &texts, TaskType::Document, 10, 1).await.err();
    assert!(matches!(
        err,
        Some(Error::Schema(SchemaError::DimensionMismatch { expected: 4, got: 3 }))
    ));
}

#[tokio::test]
async fn empty_input_skips_the_provider() -> anyhow::Result<()> {
    let provider = IndexEcho {
        calls: AtomicUsize::new(0),
    };
    let out = embed_in_batches(&provider, &[], TaskType::Document, 10, 1).await?;
    assert!(out.is_empty());
    assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    Ok(())
}
