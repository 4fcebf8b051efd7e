//! In-process [`ChunkStoreBackend`]: brute-force cosine search over a vector
//! copy of the materialized rows. Used for tests and ephemeral stores.
use async_trait::async_trait;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Mutex, MutexGuard, PoisonError};

use ragdb_core::error::{Error, Result, SchemaError};
use ragdb_core::types::Chunk;

use crate::backend::{Candidate, ChunkStoreBackend, IndexMeta, IvfFlatParams};
use crate::freshness::FreshnessDescriptor;
use crate::search::cosine_similarity;

#[derive(Default)]
struct MemoryState {
    rows: Option<Vec<(String, Vec<f64>)>>,
    dim: Option<usize>,
    indexes: BTreeSet<String>,
    descriptors: HashMap<String, FreshnessDescriptor>,
    index_meta: HashMap<String, IndexMeta>,
    materializations: usize,
    index_builds: usize,
}

#[derive(Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    reject_index_builds: bool,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend whose ANN index builds always fail, to exercise the exact-scan fallback.
    pub fn rejecting_index_builds() -> Self {
        Self {
            reject_index_builds: true,
            ..Self::default()
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// How many times the table was (re)materialized.
    pub fn materializations(&self) -> usize {
        self.lock().materializations
    }

    /// How many ANN index builds succeeded.
    pub fn index_builds(&self) -> usize {
        self.lock().index_builds
    }

    pub fn has_index(&self, name: &str) -> bool {
        self.lock().indexes.contains(name)
    }
}

#[async_trait]
impl ChunkStoreBackend for MemoryBackend {
    async fn materialize(&self, chunks: &[Chunk], dim: usize) -> Result<usize> {
        if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dim) {
            let got = bad.embedding.len();
            return Err(SchemaError::DimensionMismatch { expected: dim, got }.into());
        }
        let mut state = self.lock();
        if let Some(existing) = state.dim.filter(|d| *d != dim) {
            let (expected, got) = (existing, dim);
            return Err(SchemaError::DimensionMismatch { expected, got }.into());
        }
        state.rows =
            Some(chunks.iter().map(|c| (c.chunk_id.clone(), c.embedding.clone())).collect());
        state.dim = Some(dim);
        state.materializations += 1;
        Ok(chunks.len())
    }

    async fn clear(&self) -> Result<()> {
        let mut state = self.lock();
        if let Some(rows) = state.rows.as_mut() {
            rows.clear();
        }
        Ok(())
    }

    async fn materialized_rows(&self) -> Result<Option<usize>> {
        Ok(self.lock().rows.as_ref().map(Vec::len))
    }

    async fn create_ann_index(&self, name: &str, params: &IvfFlatParams) -> Result<()> {
        if self.reject_index_builds {
            return Err(Error::storage(format!("index build rejected (nlist={})", params.nlist)));
        }
        let mut state = self.lock();
        if state.rows.as_ref().map_or(true, Vec::is_empty) {
            return Err(Error::storage("cannot train an index on an empty table"));
        }
        state.indexes.insert(name.to_string());
        state.index_builds += 1;
        Ok(())
    }

    async fn drop_ann_index(&self, name: &str) -> Result<()> {
        self.lock().indexes.remove(name);
        Ok(())
    }

    async fn nearest(
        &self,
        query: &[f64],
        limit: usize,
        _nprobe: Option<usize>,
    ) -> Result<Vec<Candidate>> {
        let state = self.lock();
        let Some(rows) = state.rows.as_ref() else {
            return Ok(Vec::new());
        };
        let mut out: Vec<Candidate> = rows
            .iter()
            .map(|(id, v)| Candidate {
                chunk_id: id.clone(),
                distance: 1.0 - cosine_similarity(query, v),
            })
            .collect();
        out.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        out.truncate(limit);
        Ok(out)
    }

    async fn load_descriptor(&self, path: &str) -> Result<Option<FreshnessDescriptor>> {
        Ok(self.lock().descriptors.get(path).copied())
    }

    async fn store_descriptor(
        &self,
        path: &str,
        descriptor: Option<&FreshnessDescriptor>,
    ) -> Result<()> {
        let mut state = self.lock();
        match descriptor {
            Some(d) => state.descriptors.insert(path.to_string(), *d),
            None => state.descriptors.remove(path),
        };
        Ok(())
    }

    async fn load_index_meta(&self, name: &str) -> Result<Option<IndexMeta>> {
        Ok(self.lock().index_meta.get(name).cloned())
    }

    async fn store_index_meta(&self, name: &str, meta: Option<&IndexMeta>) -> Result<()> {
        let mut state = self.lock();
        match meta {
            Some(m) => state.index_meta.insert(name.to_string(), m.clone()),
            None => state.index_meta.remove(name),
        };
        Ok(())
    }
}
