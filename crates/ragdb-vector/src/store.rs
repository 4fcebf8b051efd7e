//! Canonical chunk dataset: a single Parquet file rewritten atomically.
//!
//! Every write materializes the complete new dataset in a temp file beside the
//! corpus and renames it over the old one, so readers observe either the old
//! or the new file, never a partial one.
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;
use std::collections::HashSet;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use ragdb_core::error::{Error, Result, SchemaError, StorageResultExt};
use ragdb_core::types::{Chunk, StoreStats};

use crate::freshness::FreshnessDescriptor;
use crate::schema::{batch_to_chunks, chunk_file_schema, chunks_to_file_batch, validate_columns};

const WRITE_BATCH_ROWS: usize = 1024;

#[derive(Debug, Clone)]
pub struct ChunkStore {
    path: PathBuf,
    embedding_dim: usize,
}

impl ChunkStore {
    pub fn new(path: impl Into<PathBuf>, embedding_dim: usize) -> Result<Self> {
        if embedding_dim == 0 {
            return Err(Error::invalid_argument("embedding dimension must be positive"));
        }
        Ok(Self {
            path: path.into(),
            embedding_dim,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn embedding_dim(&self) -> usize {
        self.embedding_dim
    }

    pub fn exists(&self) -> bool {
        self.path.is_file()
    }

    /// Every stored chunk in file order; empty when no dataset exists.
    pub fn read_all(&self) -> Result<Vec<Chunk>> {
        if !self.exists() {
            return Ok(Vec::new());
        }
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(&self.path)?).storage()?;
        validate_columns(builder.schema(), "existing vector store")?;
        let reader = builder.build().storage()?;

        let mut chunks = Vec::new();
        for batch in reader {
            chunks.extend(batch_to_chunks(&batch.storage()?)?);
        }
        debug!(path = %self.path.display(), rows = chunks.len(), "read chunk dataset");
        Ok(chunks)
    }

    /// Unions `chunks` with the existing dataset and rewrites it.
    pub fn append(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        let mut all = self.read_all()?;
        self.validate_incoming(chunks, &all)?;
        all.extend_from_slice(chunks);
        self.write_atomic(&all)?;
        info!(
            path = %self.path.display(),
            appended = chunks.len(),
            total = all.len(),
            "appended chunks"
        );
        Ok(())
    }

    /// Drops every chunk of `document_id` and appends `chunks` in one rewrite.
    /// Returns the number of chunks removed.
    pub fn replace_document(&self, document_id: &str, chunks: &[Chunk]) -> Result<usize> {
        if let Some(foreign) = chunks.iter().find(|c| c.document_id != document_id) {
            return Err(Error::invalid_argument(format!(
                "chunk '{}' belongs to '{}', not '{document_id}'",
                foreign.chunk_id, foreign.document_id
            )));
        }
        let existing = self.read_all()?;
        let before = existing.len();
        let mut kept: Vec<Chunk> =
            existing.into_iter().filter(|c| c.document_id != document_id).collect();
        let removed = before - kept.len();
        if removed == 0 && chunks.is_empty() {
            return Ok(0);
        }
        self.validate_incoming(chunks, &kept)?;
        kept.extend_from_slice(chunks);
        self.write_atomic(&kept)?;
        info!(
            path = %self.path.display(),
            document_id,
            removed,
            inserted = chunks.len(),
            "replaced document chunks"
        );
        Ok(removed)
    }

    pub fn stats(&self) -> Result<StoreStats> {
        Ok(StoreStats::from_chunks(&self.read_all()?))
    }

    pub fn descriptor(&self) -> Result<Option<FreshnessDescriptor>> {
        FreshnessDescriptor::of_file(&self.path)
    }

    fn validate_incoming(&self, incoming: &[Chunk], existing: &[Chunk]) -> Result<()> {
        let mut seen: HashSet<&str> = existing.iter().map(|c| c.chunk_id.as_str()).collect();
        for chunk in incoming {
            if chunk.embedding.len() != self.embedding_dim {
                return Err(SchemaError::DimensionMismatch {
                    expected: self.embedding_dim,
                    got: chunk.embedding.len(),
                }
                .into());
            }
            if chunk.embedding.iter().any(|x| !x.is_finite()) {
                return Err(SchemaError::InvalidColumn {
                    column: "embedding".to_string(),
                    reason: format!("chunk '{}' has a non-finite component", chunk.chunk_id),
                }
                .into());
            }
            if !seen.insert(chunk.chunk_id.as_str()) {
                return Err(SchemaError::DuplicateChunkId(chunk.chunk_id.clone()).into());
            }
        }
        if let Some(stale) = existing.iter().find(|c| c.embedding.len() != self.embedding_dim) {
            return Err(SchemaError::DimensionMismatch {
                expected: self.embedding_dim,
                got: stale.embedding.len(),
            }
            .into());
        }
        Ok(())
    }

    fn write_atomic(&self, chunks: &[Chunk]) -> Result<()> {
        let dir = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(dir)?;

        let mut staged = tempfile::Builder::new()
            .prefix(".chunks-")
            .suffix(".parquet.tmp")
            .tempfile_in(dir)
            .map_err(|e| {
                Error::Staging(format!("cannot create temp file in {}: {e}", dir.display()))
            })?;

        let schema = chunk_file_schema();
        let props = WriterProperties::builder().set_compression(Compression::SNAPPY).build();
        let mut writer =
            ArrowWriter::try_new(staged.as_file_mut(), schema, Some(props)).storage()?;
        for rows in chunks.chunks(WRITE_BATCH_ROWS) {
            writer.write(&chunks_to_file_batch(rows)?).storage()?;
        }
        writer.close().storage()?;
        staged.as_file().sync_all()?;

        staged.persist(&self.path).map_err(|e| {
            Error::Staging(format!("cannot replace {}: {}", self.path.display(), e.error))
        })?;
        Ok(())
    }
}
