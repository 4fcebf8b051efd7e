use std::sync::Arc;

use async_trait::async_trait;
use chrono::NaiveDate;
use ragdb_core::chunker::ChunkingConfig;
use ragdb_core::config::RagSettings;
use ragdb_core::error::{Error, Result};
use ragdb_core::traits::{EmbeddingProvider, TaskType};
use ragdb_core::types::{Document, DocumentType};
use ragdb_embed::HashingEmbedder;
use ragdb_retrieval::{RetrievalFacade, RetrievalOptions, SimilarityQuery};
use ragdb_vector::{MemoryBackend, SearchRequest, StoreOptions, VectorStore};
use tempfile::TempDir;

const AXES: [&str; 3] = ["garden", "bread", "cat"];

/// One axis per keyword, weighted by occurrences. Fails on texts containing "boom".
struct KeywordEmbedder;

#[async_trait]
impl EmbeddingProvider for KeywordEmbedder {
    fn dim(&self) -> usize {
        AXES.len()
    }

    async fn embed(&self, texts: &[String], _task: TaskType) -> Result<Vec<Vec<f64>>> {
        if texts.iter().any(|t| t.contains("boom")) {
            return Err(Error::Embedding("upstream rejected the batch".to_string()));
        }
        Ok(texts
            .iter()
            .map(|t| {
                let lower = t.to_lowercase();
                AXES.iter().map(|w| lower.matches(w).count() as f64).collect()
            })
            .collect())
    }
}

fn facade(tmp: &TempDir, chunking: ChunkingConfig) -> anyhow::Result<RetrievalFacade> {
    let path = tmp.path().join("chunks.parquet");
    let store = VectorStore::new(path, Arc::new(MemoryBackend::new()), StoreOptions::new(3))?;
    let options = RetrievalOptions {
        chunking,
        ..RetrievalOptions::default()
    };
    Ok(RetrievalFacade::new(store, Box::new(KeywordEmbedder), options)?)
}

fn small_chunks() -> ChunkingConfig {
    ChunkingConfig {
        max_tokens: 5,
        overlap_tokens: 0,
    }
}

fn sample_documents() -> anyhow::Result<Vec<Document>> {
    let spring = NaiveDate::from_ymd_opt(2024, 3, 1).ok_or_else(|| anyhow::anyhow!("bad date"))?;
    Ok(vec![
        Document::post("garden-tips", "The garden needs water.\n\nGarden beds love compost.")
            .with_date(spring)
            .with_tags(["outdoors"]),
        Document::post("bread-notes", "Bread rises slowly."),
        Document::media("m-cat", "A cat sleeping in the garden.").with_media_type("image"),
    ])
}

fn ids(hits: &[ragdb_core::types::SearchHit]) -> Vec<&str> {
    hits.iter().map(|h| h.document_id.as_str()).collect()
}

#[tokio::test]
async fn indexes_and_queries_by_meaning() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let rag = facade(&tmp, ChunkingConfig::default())?;
    let report = rag.index_documents(&sample_documents()?).await;
    assert!(report.is_complete());
    assert_eq!(report.documents, 3);
    assert_eq!(report.chunks, 3);

    let query = SimilarityQuery::new(SearchRequest::new().top_k(5).min_similarity(0.5));
    let hits = rag.query_similar("garden", &query).await?;
    assert_eq!(ids(&hits), ["garden-tips", "m-cat"]);
    assert!((hits[0].similarity - 1.0).abs() < 1e-9);
    assert_eq!(hits[0].tags, ["outdoors"]);

    let after = NaiveDate::from_ymd_opt(2024, 1, 1).ok_or_else(|| anyhow::anyhow!("bad date"))?;
    let dated = SimilarityQuery::new(SearchRequest::new().min_similarity(0.5).date_after(after));
    assert_eq!(ids(&rag.query_similar("garden", &dated).await?), ["garden-tips"]);

    let stats = rag.stats()?;
    assert_eq!((stats.total_posts, stats.total_media), (2, 1));
    assert_eq!(stats.media_by_type.get("image"), Some(&1));
    Ok(())
}

#[tokio::test]
async fn dedupe_collapses_chunks_of_one_document() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let rag = facade(&tmp, small_chunks())?;
    let long = Document::post("garden-a", "garden row one\n\ngarden row two\n\ngarden row three");
    assert_eq!(rag.index_document(&long).await?, 3);
    assert_eq!(rag.index_document(&Document::post("garden-b", "garden")).await?, 1);

    let base = SimilarityQuery::new(SearchRequest::new().top_k(5).min_similarity(0.5));
    let deduped = rag.query_similar("garden", &base).await?;
    assert_eq!(deduped.len(), 2);
    assert_ne!(deduped[0].document_id, deduped[1].document_id);

    assert_eq!(rag.query_similar("garden", &base.clone().keep_per_document(2)).await?.len(), 3);
    assert_eq!(rag.query_similar("garden", &base.dedupe(false)).await?.len(), 4);
    Ok(())
}

#[tokio::test]
async fn reindexing_replaces_previous_chunks() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let rag = facade(&tmp, small_chunks())?;
    let doc = Document::post("garden-a", "garden row one\n\ngarden row two\n\ngarden row three");
    assert_eq!(rag.index_document(&doc).await?, 3);
    assert_eq!(rag.index_document(&doc).await?, 3, "re-indexing is idempotent");
    assert_eq!(rag.stats()?.total_chunks, 3);

    let shorter = Document::post("garden-a", "bread only now");
    assert_eq!(rag.index_document(&shorter).await?, 1);
    let chunks = rag.store().read_all()?;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].chunk_id, "garden-a_0");
    assert_eq!(chunks[0].content, "bread only now");
    Ok(())
}

#[tokio::test]
async fn media_queries_only_see_media() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let rag = facade(&tmp, ChunkingConfig::default())?;
    rag.index_documents(&sample_documents()?).await;

    let query = SimilarityQuery::new(SearchRequest::new().min_similarity(0.1));
    let hits = rag.query_media("garden", Vec::<String>::new(), &query).await?;
    assert_eq!(ids(&hits), ["m-cat"]);
    assert!(hits.iter().all(|h| h.document_type() == DocumentType::Media));
    assert!(rag.query_media("garden", ["video"], &query).await?.is_empty());
    assert_eq!(rag.query_media("garden", ["image"], &query).await?.len(), 1);
    Ok(())
}

#[tokio::test]
async fn batch_indexing_stops_at_first_failure() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let rag = facade(&tmp, ChunkingConfig::default())?;
    let docs = vec![
        Document::post("first", "garden"),
        Document::post("broken", "boom"),
        Document::post("never", "bread"),
    ];
    let report = rag.index_documents(&docs).await;
    assert_eq!(report.documents, 1);
    assert_eq!(report.chunks, 1);
    let (failed_id, error) = report.failure.ok_or_else(|| anyhow::anyhow!("expected a failure"))?;
    assert_eq!(failed_id, "broken");
    assert!(matches!(error, Error::Embedding(_)));

    let chunks = rag.store().read_all()?;
    assert_eq!(chunks.len(), 1);
    assert_eq!(chunks[0].document_id, "first");
    Ok(())
}

#[tokio::test]
async fn embedder_dimension_must_match_store() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = tmp.path().join("chunks.parquet");
    let store = VectorStore::new(path, Arc::new(MemoryBackend::new()), StoreOptions::new(8))?;
    let result =
        RetrievalFacade::new(store, Box::new(KeywordEmbedder), RetrievalOptions::default());
    assert!(matches!(result, Err(Error::Schema(_))));
    Ok(())
}

#[tokio::test]
async fn configured_store_round_trips_through_lance() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let mut settings = RagSettings::default();
    let corpus = tmp.path().join("rag/chunks.parquet");
    settings.store.corpus_path = corpus.to_string_lossy().into_owned();
    settings.store.embedding_dim = 64;

    let rag = RetrievalFacade::open(&settings, Box::new(HashingEmbedder::new(64)?)).await?;
    let text = "Raised beds warm up early in spring";
    let docs = [
        Document::post("raised-beds", text),
        Document::post("sourdough", "Feed the starter twice a day"),
    ];
    rag.index_documents(&docs).await;

    let query = SimilarityQuery::new(SearchRequest::new().min_similarity(0.0));
    let hits = rag.query_similar(text, &query).await?;
    assert_eq!(hits.first().map(|h| h.document_id.as_str()), Some("raised-beds"));
    assert!((hits[0].similarity - 1.0).abs() < 1e-4);
    Ok(())
}
