//! Keeps the materialized table and its ANN index in step with the dataset.
//!
//! Typical flow on a read:
//! 1) Compare the dataset's freshness descriptor with the last synced one
//! 2) If it moved (or a local write marked the view stale), re-materialize the
//!    table and persist the new descriptor
//! 3) Rebuild the IVF_FLAT index when the row count reaches the threshold;
//!    otherwise record exact mode
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use ragdb_core::error::Result;
use ragdb_core::types::Chunk;

use crate::backend::{ChunkStoreBackend, IndexMeta, IndexMode, IvfFlatParams};
use crate::freshness::{FreshnessDescriptor, FreshnessState, SyncOutcome};
use crate::store::ChunkStore;

pub const INDEX_NAME: &str = "rag_chunks_embedding_idx";
pub const DEFAULT_EXACT_INDEX_THRESHOLD: usize = 1000;
const MAX_NLIST: usize = 4096;

/// Partition count for IVF_FLAT: `round(sqrt(rows))`, clamped to `[1, min(rows, 4096)]`.
pub fn compute_nlist(rows: usize) -> usize {
    if rows == 0 {
        return 1;
    }
    let sqrt = (rows as f64).sqrt().round() as usize;
    sqrt.clamp(1, rows.min(MAX_NLIST))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexPolicy {
    /// Below this many rows no ANN index is built.
    pub exact_index_threshold: usize,
    pub embedding_dim: usize,
}

/// Rows of one synced dataset version, with an id lookup for joining ANN candidates.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub descriptor: Option<FreshnessDescriptor>,
    pub chunks: Vec<Chunk>,
    positions: HashMap<String, usize>,
}

impl Snapshot {
    fn new(descriptor: Option<FreshnessDescriptor>, chunks: Vec<Chunk>) -> Self {
        let positions = chunks.iter().enumerate().map(|(i, c)| (c.chunk_id.clone(), i)).collect();
        Self {
            descriptor,
            chunks,
            positions,
        }
    }

    pub fn get(&self, chunk_id: &str) -> Option<&Chunk> {
        self.positions.get(chunk_id).map(|i| &self.chunks[*i])
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}

pub(crate) enum SyncState {
    Uninitialized,
    Synced(Arc<Snapshot>),
    Stale(Arc<Snapshot>),
}

impl SyncState {
    pub(crate) fn snapshot(&self) -> Option<&Arc<Snapshot>> {
        match self {
            Self::Uninitialized => None,
            Self::Synced(s) | Self::Stale(s) => Some(s),
        }
    }
}

pub struct IndexManager {
    backend: Arc<dyn ChunkStoreBackend>,
    policy: IndexPolicy,
    pub(crate) state: RwLock<SyncState>,
}

impl IndexManager {
    pub fn new(backend: Arc<dyn ChunkStoreBackend>, policy: IndexPolicy) -> Self {
        Self {
            backend,
            policy,
            state: RwLock::new(SyncState::Uninitialized),
        }
    }

    pub fn backend(&self) -> &Arc<dyn ChunkStoreBackend> {
        &self.backend
    }

    pub async fn state(&self) -> FreshnessState {
        match &*self.state.read().await {
            SyncState::Uninitialized => FreshnessState::Uninitialized,
            SyncState::Synced(_) => FreshnessState::Synced,
            SyncState::Stale(_) => FreshnessState::Stale,
        }
    }

    /// Marks the current view stale so the next sync re-materializes even if
    /// the file descriptor happens to compare equal.
    pub async fn invalidate(&self) {
        let mut state = self.state.write().await;
        *state = match std::mem::replace(&mut *state, SyncState::Uninitialized) {
            SyncState::Synced(s) | SyncState::Stale(s) => SyncState::Stale(s),
            SyncState::Uninitialized => SyncState::Uninitialized,
        };
    }

    /// Brings the materialized view up to date with `store`. Cheap when nothing changed.
    pub async fn ensure_synced(&self, store: &ChunkStore) -> Result<SyncOutcome> {
        let current = store.descriptor()?;
        if let SyncState::Synced(snap) = &*self.state.read().await {
            if snap.descriptor == current {
                return Ok(SyncOutcome::Unchanged);
            }
        }

        let mut state = self.state.write().await;
        // Another task may have synced while we waited for the write lock.
        let current = store.descriptor()?;
        if let SyncState::Synced(snap) = &*state {
            if snap.descriptor == current {
                return Ok(SyncOutcome::Unchanged);
            }
        }
        let first_load = matches!(*state, SyncState::Uninitialized);
        debug!(
            path = %store.path().display(),
            first_load,
            descriptor = ?current,
            "materialized view out of date"
        );

        let (snapshot, outcome) = self.resync(store, current, first_load).await?;
        *state = SyncState::Synced(Arc::new(snapshot));
        Ok(outcome)
    }

    async fn resync(
        &self,
        store: &ChunkStore,
        current: Option<FreshnessDescriptor>,
        first_load: bool,
    ) -> Result<(Snapshot, SyncOutcome)> {
        let key = store.path().to_string_lossy().into_owned();

        let Some(descriptor) = current.filter(|d| !d.is_empty()) else {
            self.backend.drop_ann_index(INDEX_NAME).await?;
            self.backend.clear().await?;
            self.backend.store_descriptor(&key, None).await?;
            self.backend.store_index_meta(INDEX_NAME, None).await?;
            info!(path = %key, "dataset missing or empty; cleared materialized table and index");
            return Ok((Snapshot::new(current, Vec::new()), SyncOutcome::Cleared));
        };

        let chunks = store.read_all()?;
        let rows = chunks.len();

        if first_load {
            let persisted = self.backend.load_descriptor(&key).await?;
            let materialized = self.backend.materialized_rows().await?;
            let persisted_dim = self.index_meta().await?.and_then(|m| m.embedding_dim);
            let expected_dim = Some(self.policy.embedding_dim as i64);
            if persisted == Some(descriptor) && materialized == Some(rows) {
                if persisted_dim == expected_dim {
                    info!(path = %key, rows, "reusing materialized table from a previous run");
                    let snapshot = Snapshot::new(Some(descriptor), chunks);
                    return Ok((snapshot, SyncOutcome::Loaded { rows }));
                }
                debug!(
                    path = %key,
                    persisted_dim = ?persisted_dim,
                    expected_dim = self.policy.embedding_dim,
                    "persisted table has another dimension; re-materializing"
                );
            }
        }

        self.backend.drop_ann_index(INDEX_NAME).await?;
        self.backend.materialize(&chunks, self.policy.embedding_dim).await?;
        self.backend.store_descriptor(&key, Some(&descriptor)).await?;
        self.rebuild_index(rows).await?;
        info!(path = %key, rows, "re-materialized chunk table");
        Ok((Snapshot::new(Some(descriptor), chunks), SyncOutcome::Rebuilt { rows }))
    }

    async fn rebuild_index(&self, rows: usize) -> Result<()> {
        let mut meta = IndexMeta {
            index_name: INDEX_NAME.to_string(),
            mode: IndexMode::Exact,
            row_count: rows as i64,
            threshold: self.policy.exact_index_threshold as i64,
            nlist: None,
            embedding_dim: Some(self.policy.embedding_dim as i64),
            updated_at: Utc::now(),
        };

        if rows == 0 {
            debug!("no rows; index build skipped");
            return self.backend.store_index_meta(INDEX_NAME, None).await;
        }
        if rows < self.policy.exact_index_threshold {
            debug!(
                rows,
                threshold = self.policy.exact_index_threshold,
                "below ANN threshold; using exact scans"
            );
            return self.backend.store_index_meta(INDEX_NAME, Some(&meta)).await;
        }

        let nlist = compute_nlist(rows);
        let params = IvfFlatParams { nlist };
        match self.backend.create_ann_index(INDEX_NAME, &params).await {
            Ok(()) => {
                meta.mode = IndexMode::Ann;
                meta.nlist = Some(params.nlist as i64);
                info!(rows, nlist = params.nlist, "built IVF_FLAT index");
                self.backend.store_index_meta(INDEX_NAME, Some(&meta)).await
            }
            Err(e) => {
                warn!(
                    error = %e,
                    rows,
                    nlist = params.nlist,
                    "ANN index build skipped; searches fall back to exact scans"
                );
                self.backend.store_index_meta(INDEX_NAME, None).await
            }
        }
    }

    pub async fn index_meta(&self) -> Result<Option<IndexMeta>> {
        self.backend.load_index_meta(INDEX_NAME).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nlist_tracks_sqrt_and_clamps() {
        assert_eq!(compute_nlist(0), 1);
        assert_eq!(compute_nlist(1), 1);
        assert_eq!(compute_nlist(2), 1);
        assert_eq!(compute_nlist(1000), 32);
        assert_eq!(compute_nlist(10_000), 100);
        assert_eq!(compute_nlist(100_000_000), MAX_NLIST);
    }
}
