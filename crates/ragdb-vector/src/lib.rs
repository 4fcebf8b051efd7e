//! Persistent chunk storage with a lazily synced LanceDB view for similarity search.
//!
//! [`VectorStore`] composes the Parquet [`ChunkStore`], an [`IndexManager`]
//! over any [`ChunkStoreBackend`] and the search path. Writes are serialized
//! and mark the view stale; reads re-sync on demand.
pub mod backend;
pub mod dedup;
pub mod freshness;
pub mod index_build;
pub mod memory;
pub mod schema;
pub mod search;
pub mod store;
pub mod table;

pub use backend::{Candidate, ChunkStoreBackend, IndexMeta, IndexMode, IvfFlatParams};
pub use dedup::dedupe_by_document;
pub use freshness::{FreshnessDescriptor, FreshnessState, SyncOutcome};
pub use index_build::{IndexManager, IndexPolicy, DEFAULT_EXACT_INDEX_THRESHOLD, INDEX_NAME};
pub use memory::MemoryBackend;
pub use search::{cosine_similarity, DateBound, SearchRequest};
pub use store::ChunkStore;
pub use table::StorageHandle;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{error, info};

use ragdb_core::config::RagSettings;
use ragdb_core::error::Result;
use ragdb_core::types::{Chunk, SearchHit, StoreStats};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    pub embedding_dim: usize,
    pub exact_index_threshold: usize,
}

impl StoreOptions {
    pub fn new(embedding_dim: usize) -> Self {
        Self {
            embedding_dim,
            exact_index_threshold: DEFAULT_EXACT_INDEX_THRESHOLD,
        }
    }

    pub fn with_exact_index_threshold(mut self, threshold: usize) -> Self {
        self.exact_index_threshold = threshold;
        self
    }
}

impl From<&RagSettings> for StoreOptions {
    fn from(settings: &RagSettings) -> Self {
        Self {
            embedding_dim: settings.store.embedding_dim,
            exact_index_threshold: settings.store.exact_index_threshold,
        }
    }
}

pub struct VectorStore {
    store: ChunkStore,
    index: IndexManager,
    write_lock: Mutex<()>,
    options: StoreOptions,
}

impl VectorStore {
    /// Builds a store over an explicit backend.
    pub fn new(
        corpus_path: impl Into<PathBuf>,
        backend: Arc<dyn ChunkStoreBackend>,
        options: StoreOptions,
    ) -> Result<Self> {
        let store = ChunkStore::new(corpus_path, options.embedding_dim)?;
        let policy = IndexPolicy {
            exact_index_threshold: options.exact_index_threshold,
            embedding_dim: options.embedding_dim,
        };
        Ok(Self {
            store,
            index: IndexManager::new(backend, policy),
            write_lock: Mutex::new(()),
            options,
        })
    }

    /// Opens the corpus with a LanceDB database beside it.
    pub async fn open(corpus_path: impl Into<PathBuf>, options: StoreOptions) -> Result<Self> {
        let corpus_path = corpus_path.into();
        let handle = StorageHandle::open_beside(&corpus_path).await?;
        Self::new(corpus_path, Arc::new(handle), options)
    }

    pub fn corpus_path(&self) -> &Path {
        self.store.path()
    }

    pub fn options(&self) -> StoreOptions {
        self.options
    }

    pub async fn append(&self, chunks: &[Chunk]) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        self.store.append(chunks)?;
        self.index.invalidate().await;
        Ok(())
    }

    /// Replaces every chunk of `document_id`; returns how many old chunks were removed.
    pub async fn replace_document(&self, document_id: &str, chunks: &[Chunk]) -> Result<usize> {
        let _guard = self.write_lock.lock().await;
        let removed = self.store.replace_document(document_id, chunks)?;
        self.index.invalidate().await;
        Ok(removed)
    }

    pub fn read_all(&self) -> Result<Vec<Chunk>> {
        self.store.read_all()
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    /// Re-materializes the query table if the dataset changed.
    pub async fn sync(&self) -> Result<SyncOutcome> {
        self.index.ensure_synced(&self.store).await
    }

    pub async fn freshness(&self) -> FreshnessState {
        self.index.state().await
    }

    pub async fn index_status(&self) -> Result<Option<IndexMeta>> {
        self.index.index_meta().await
    }

    /// Similarity search. Argument errors are returned; any failure while
    /// syncing or querying is logged and yields an empty result.
    pub async fn search(&self, query: &[f64], request: &SearchRequest) -> Result<Vec<SearchHit>> {
        request.validate(query, self.options.embedding_dim)?;
        match self.search_synced(query, request).await {
            Ok(hits) => {
                info!(
                    mode = %request.mode,
                    top_k = request.top_k,
                    hits = hits.len(),
                    "search completed"
                );
                Ok(hits)
            }
            Err(e) => {
                error!(error = %e, mode = %request.mode, "search failed; returning no results");
                Ok(Vec::new())
            }
        }
    }

    async fn search_synced(
        &self,
        query: &[f64],
        request: &SearchRequest,
    ) -> Result<Vec<SearchHit>> {
        self.index.ensure_synced(&self.store).await?;
        search::run(&self.index, query, request).await
    }
}
