//! Text-level entry points: chunk and embed documents into the store, embed
//! queries and post-process hits.
use indicatif::{ProgressBar, ProgressStyle};
use tracing::{info, warn};

use ragdb_core::chunker::ChunkingConfig;
use ragdb_core::config::{EmbeddingSettings, RagSettings, RetrievalSettings};
use ragdb_core::error::{Error, Result, SchemaError};
use ragdb_core::traits::{EmbeddingProvider, TaskType};
use ragdb_core::types::{Chunk, Document, DocumentType, SearchHit, StoreStats};
use ragdb_embed::embed_in_batches;
use ragdb_vector::{dedupe_by_document, SearchRequest, StoreOptions, VectorStore};

const PROGRESS_TEMPLATE: &str = concat!(
    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] ",
    "{pos}/{len} documents ({percent}%) {msg}",
);

/// How many candidates a deduplicating query asks for, per requested hit.
const DEDUPE_CANDIDATE_FACTOR: usize = 3;

#[derive(Debug, Clone, PartialEq)]
pub struct SimilarityQuery {
    pub request: SearchRequest,
    pub dedupe: bool,
    pub keep_per_document: usize,
}

impl Default for SimilarityQuery {
    fn default() -> Self {
        Self {
            request: SearchRequest::default(),
            dedupe: true,
            keep_per_document: 1,
        }
    }
}

impl SimilarityQuery {
    pub fn new(request: SearchRequest) -> Self {
        Self {
            request,
            ..Self::default()
        }
    }

    pub fn dedupe(mut self, dedupe: bool) -> Self {
        self.dedupe = dedupe;
        self
    }

    pub fn keep_per_document(mut self, keep: usize) -> Self {
        self.keep_per_document = keep;
        self
    }
}

impl From<&RetrievalSettings> for SimilarityQuery {
    fn from(s: &RetrievalSettings) -> Self {
        let mut request =
            SearchRequest::new().top_k(s.top_k).min_similarity(s.min_similarity).mode(s.mode);
        request.nprobe = s.nprobe;
        request.overfetch = s.overfetch;
        Self {
            request,
            dedupe: s.dedupe,
            keep_per_document: s.keep_per_document,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RetrievalOptions {
    pub chunking: ChunkingConfig,
    pub embedding: EmbeddingSettings,
    pub retrieval: RetrievalSettings,
    pub show_progress: bool,
}

impl Default for RetrievalOptions {
    fn default() -> Self {
        Self::from(&RagSettings::default())
    }
}

impl From<&RagSettings> for RetrievalOptions {
    fn from(s: &RagSettings) -> Self {
        Self {
            chunking: s.chunking,
            embedding: s.embedding.clone(),
            retrieval: s.retrieval.clone(),
            show_progress: false,
        }
    }
}

/// Outcome of a batch indexing run. Documents before the failing one stay committed.
#[derive(Debug, Default)]
pub struct IndexReport {
    pub documents: usize,
    pub chunks: usize,
    pub failure: Option<(String, Error)>,
}

impl IndexReport {
    pub fn is_complete(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct RetrievalFacade {
    store: VectorStore,
    embedder: Box<dyn EmbeddingProvider>,
    options: RetrievalOptions,
}

impl RetrievalFacade {
    pub fn new(
        store: VectorStore,
        embedder: Box<dyn EmbeddingProvider>,
        options: RetrievalOptions,
    ) -> Result<Self> {
        let expected = store.options().embedding_dim;
        let got = embedder.dim();
        if got != expected {
            return Err(SchemaError::DimensionMismatch { expected, got }.into());
        }
        Ok(Self {
            store,
            embedder,
            options,
        })
    }

    /// Opens the configured corpus with its LanceDB view.
    pub async fn open(
        settings: &RagSettings,
        embedder: Box<dyn EmbeddingProvider>,
    ) -> Result<Self> {
        settings.validate()?;
        let store = VectorStore::open(settings.corpus_path(), StoreOptions::from(settings)).await?;
        Self::new(store, embedder, RetrievalOptions::from(settings))
    }

    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    pub fn options(&self) -> &RetrievalOptions {
        &self.options
    }

    /// Query defaults taken from the retrieval settings.
    pub fn default_query(&self) -> SimilarityQuery {
        SimilarityQuery::from(&self.options.retrieval)
    }

    /// Chunks, embeds and stores `doc`, replacing any chunks it had before.
    /// Returns the number of chunks written.
    pub async fn index_document(&self, doc: &Document) -> Result<usize> {
        let pieces = self.options.chunking.chunk(&doc.content);
        let vectors = embed_in_batches(
            self.embedder.as_ref(),
            &pieces,
            TaskType::Document,
            self.options.embedding.batch_size,
            self.options.embedding.concurrency,
        )
        .await?;

        let chunks: Vec<Chunk> = pieces
            .into_iter()
            .zip(vectors)
            .enumerate()
            .map(|(i, (content, embedding))| Chunk {
                chunk_id: Chunk::make_id(&doc.document_id, i),
                document_id: doc.document_id.clone(),
                kind: doc.kind.clone(),
                chunk_index: i as i64,
                content,
                embedding,
                tags: doc.tags.clone(),
                authors: doc.authors.clone(),
                category: doc.category.clone(),
            })
            .collect();

        let removed = self.store.replace_document(&doc.document_id, &chunks).await?;
        info!(
            document_id = %doc.document_id,
            chunks = chunks.len(),
            replaced = removed,
            "indexed document"
        );
        Ok(chunks.len())
    }

    /// Indexes `docs` one after another and stops at the first failure.
    pub async fn index_documents(&self, docs: &[Document]) -> IndexReport {
        let pb = if self.options.show_progress {
            ProgressBar::new(docs.len() as u64)
        } else {
            ProgressBar::hidden()
        };
        if let Ok(style) = ProgressStyle::with_template(PROGRESS_TEMPLATE) {
            pb.set_style(style.progress_chars("#>-"));
        }

        let mut report = IndexReport::default();
        for doc in docs {
            pb.set_message(doc.document_id.clone());
            match self.index_document(doc).await {
                Ok(n) => {
                    report.documents += 1;
                    report.chunks += n;
                    pb.inc(1);
                }
                Err(e) => {
                    warn!(document_id = %doc.document_id, error = %e, "indexing stopped");
                    report.failure = Some((doc.document_id.clone(), e));
                    break;
                }
            }
        }
        pb.finish_and_clear();
        info!(
            documents = report.documents,
            chunks = report.chunks,
            complete = report.is_complete(),
            "batch indexing finished"
        );
        report
    }

    /// Embeds `text` as a query and searches. With `dedupe`, three times the
    /// requested hits are fetched, collapsed per document, then re-ranked and truncated.
    pub async fn query_similar(
        &self,
        text: &str,
        query: &SimilarityQuery,
    ) -> Result<Vec<SearchHit>> {
        let vector = self.embed_query(text).await?;
        let top_k = query.request.top_k;
        if !query.dedupe {
            return self.store.search(&vector, &query.request).await;
        }

        let widened = query.request.clone().top_k(top_k.saturating_mul(DEDUPE_CANDIDATE_FACTOR));
        let hits = self.store.search(&vector, &widened).await?;
        let mut hits = dedupe_by_document(hits, query.keep_per_document);
        hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
        hits.truncate(top_k);
        Ok(hits)
    }

    /// [`Self::query_similar`] restricted to media chunks, optionally of the given types.
    pub async fn query_media<I, S>(
        &self,
        text: &str,
        media_types: I,
        query: &SimilarityQuery,
    ) -> Result<Vec<SearchHit>>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut query = query.clone();
        query.request = query.request.document_type(DocumentType::Media).media_types(media_types);
        self.query_similar(text, &query).await
    }

    pub fn stats(&self) -> Result<StoreStats> {
        self.store.stats()
    }

    async fn embed_query(&self, text: &str) -> Result<Vec<f64>> {
        self.embedder
            .embed(&[text.to_string()], TaskType::Query)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| {
                Error::Embedding("provider returned no vector for the query".to_string())
            })
    }
}
