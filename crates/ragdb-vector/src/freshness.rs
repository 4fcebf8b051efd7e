//! Freshness descriptors: the `(mtime, size, row_count)` fingerprint of the
//! dataset file that decides whether the materialized table is current.
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::Path;
use std::time::UNIX_EPOCH;

use ragdb_core::error::{Result, StorageResultExt};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FreshnessDescriptor {
    pub mtime_ns: i64,
    pub size: i64,
    pub row_count: i64,
}

impl FreshnessDescriptor {
    /// Reads the descriptor of a Parquet file; `None` when the file does not exist.
    /// The row count comes from the footer, no data pages are decoded.
    pub fn of_file(path: &Path) -> Result<Option<Self>> {
        let meta = match fs::metadata(path) {
            Ok(meta) => meta,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mtime_ns = meta
            .modified()?
            .duration_since(UNIX_EPOCH)
            .map(|d| i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
            .unwrap_or(0);
        let builder = ParquetRecordBatchReaderBuilder::try_new(File::open(path)?).storage()?;
        let row_count = builder.metadata().file_metadata().num_rows();
        Ok(Some(Self {
            mtime_ns,
            size: i64::try_from(meta.len()).unwrap_or(i64::MAX),
            row_count,
        }))
    }

    pub fn is_empty(&self) -> bool {
        self.row_count == 0
    }
}

/// Observable state of the materialized view of one corpus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FreshnessState {
    /// Nothing has been loaded in this process yet.
    Uninitialized,
    Synced,
    /// A write happened since the last sync; the next read re-materializes.
    Stale,
}

/// What a sync pass ended up doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Descriptor unchanged since the last sync.
    Unchanged,
    /// First load in this process reused a table persisted by an earlier run.
    Loaded { rows: usize },
    Rebuilt { rows: usize },
    /// The dataset is missing or empty; table, index and descriptor were cleared.
    Cleared,
}
