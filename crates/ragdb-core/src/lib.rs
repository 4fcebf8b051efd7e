pub mod chunker;
pub mod config;
pub mod error;
pub mod telemetry;
pub mod traits;
pub mod types;

pub use chunker::{chunk_markdown, estimate_tokens, ChunkingConfig};
pub use error::{Error, Result, SchemaError};
pub use traits::{EmbeddingProvider, TaskType};
pub use types::{
    Chunk, ChunkId, Document, DocumentKind, DocumentType, SearchHit, SearchMode, StoreStats,
};
