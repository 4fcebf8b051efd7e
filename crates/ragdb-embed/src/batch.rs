use futures::stream::{self, StreamExt, TryStreamExt};
use tracing::debug;

use ragdb_core::error::{Error, Result, SchemaError};
use ragdb_core::traits::{EmbeddingProvider, TaskType};

/// Embeds `texts` in batches of `batch_size`, keeping at most `concurrency`
/// provider calls in flight. Output order matches input order.
pub async fn embed_in_batches(
    provider: &dyn EmbeddingProvider,
    texts: &[String],
    task: TaskType,
    batch_size: usize,
    concurrency: usize,
) -> Result<Vec<Vec<f64>>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }
    let batch_size = batch_size.max(1);
    debug!(texts = texts.len(), batch_size, concurrency, "embedding batches");

    let batches: Vec<Vec<Vec<f64>>> = stream::iter(texts.chunks(batch_size))
        .map(|batch| async move {
            let vectors = provider.embed(batch, task).await?;
            if vectors.len() != batch.len() {
                return Err(Error::Embedding(format!(
                    "provider returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            Ok(vectors)
        })
        .buffered(concurrency.max(1))
        .try_collect()
        .await?;

    let expected = provider.dim();
    let vectors: Vec<Vec<f64>> = batches.into_iter().flatten().collect();
    if let Some(bad) = vectors.iter().find(|v| v.len() != expected) {
        let got = bad.len();
        return Err(SchemaError::DimensionMismatch { expected, got }.into());
    }
    Ok(vectors)
}
