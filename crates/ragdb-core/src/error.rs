use thiserror::Error;

/// Violations of the canonical chunk schema.
#[derive(Debug, Error)]
pub enum SchemaError {
    #[error(
        "{context} do not match the vector store schema \
         (missing columns: [{}]; unexpected columns: [{}])",
        missing.join(", "),
        unexpected.join(", ")
    )]
    ColumnMismatch {
        context: String,
        missing: Vec<String>,
        unexpected: Vec<String>,
    },

    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    #[error("duplicate chunk id: {0}")]
    DuplicateChunkId(String),

    #[error("invalid value in column '{column}': {reason}")]
    InvalidColumn { column: String, reason: String },
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to stage dataset rewrite: {0}")]
    Staging(String),

    #[error("Storage backend error: {0}")]
    Storage(#[source] Box<dyn std::error::Error + Send + Sync>),

    #[error("Embedding provider error: {0}")]
    Embedding(String),
}

impl Error {
    pub fn storage<E>(err: E) -> Self
    where
        E: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        Self::Storage(err.into())
    }

    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// Maps foreign errors from columnar/storage libraries into [`Error::Storage`].
pub trait StorageResultExt<T> {
    fn storage(self) -> Result<T>;
}

impl<T, E> StorageResultExt<T> for std::result::Result<T, E>
where
    E: std::error::Error + Send + Sync + 'static,
{
    fn storage(self) -> Result<T> {
        self.map_err(Error::storage)
    }
}
