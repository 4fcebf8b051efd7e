use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Which side of the retrieval exchange a text is embedded for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskType {
    Document,
    Query,
}

/// Converts text into fixed-dimensionality vectors. Implementations may be
/// remote services that fail transiently; retry policy belongs to the caller.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn dim(&self) -> usize;

    /// Returns one vector per input text, in input order.
    async fn embed(&self, texts: &[String], task: TaskType) -> Result<Vec<Vec<f64>>>;
}
