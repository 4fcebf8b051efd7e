//! The seam between the index manager and the engine that holds the
//! materialized table, its ANN index and the bookkeeping records.
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use ragdb_core::error::{Error, Result};
use ragdb_core::types::Chunk;

use crate::freshness::FreshnessDescriptor;

/// One ANN candidate: a chunk id and its cosine distance to the query.
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub chunk_id: String,
    pub distance: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvfFlatParams {
    pub nlist: usize,
}

/// How the materialized table is searched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IndexMode {
    Ann,
    Exact,
}

impl IndexMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ann => "ann",
            Self::Exact => "exact",
        }
    }
}

impl fmt::Display for IndexMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndexMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "ann" => Ok(Self::Ann),
            "exact" => Ok(Self::Exact),
            other => Err(Error::invalid_argument(format!("unknown index mode '{other}'"))),
        }
    }
}

/// Bookkeeping written whenever the index is rebuilt or cleared.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMeta {
    pub index_name: String,
    pub mode: IndexMode,
    pub row_count: i64,
    pub threshold: i64,
    pub nlist: Option<i64>,
    pub embedding_dim: Option<i64>,
    pub updated_at: DateTime<Utc>,
}

#[async_trait]
pub trait ChunkStoreBackend: Send + Sync {
    /// Replaces the materialized table with `chunks`. Returns the row count.
    async fn materialize(&self, chunks: &[Chunk], dim: usize) -> Result<usize>;

    /// Removes every materialized row.
    async fn clear(&self) -> Result<()>;

    /// Row count of the materialized table, `None` if it was never created.
    async fn materialized_rows(&self) -> Result<Option<usize>>;

    async fn create_ann_index(&self, name: &str, params: &IvfFlatParams) -> Result<()>;

    /// Drops the named index; a missing index is not an error.
    async fn drop_ann_index(&self, name: &str) -> Result<()>;

    /// Up to `limit` nearest rows by cosine distance, closest first.
    async fn nearest(
        &self,
        query: &[f64],
        limit: usize,
        nprobe: Option<usize>,
    ) -> Result<Vec<Candidate>>;

    async fn load_descriptor(&self, path: &str) -> Result<Option<FreshnessDescriptor>>;

    /// Upserts the descriptor for `path`, or deletes it when `None`.
    async fn store_descriptor(
        &self,
        path: &str,
        descriptor: Option<&FreshnessDescriptor>,
    ) -> Result<()>;

    async fn load_index_meta(&self, name: &str) -> Result<Option<IndexMeta>>;

    /// Upserts the metadata row for `name`, or deletes it when `None`.
    async fn store_index_meta(&self, name: &str, meta: Option<&IndexMeta>) -> Result<()>;
}
