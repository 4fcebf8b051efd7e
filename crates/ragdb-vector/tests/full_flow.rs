use std::path::PathBuf;

use ragdb_core::types::{Chunk, DocumentKind, SearchMode};
use ragdb_embed::HashingEmbedder;
use ragdb_vector::{
    ChunkStoreBackend, IndexMode, SearchRequest, StorageHandle, StoreOptions, SyncOutcome,
    VectorStore,
};
use tempfile::TempDir;

fn corpus_path(tmp: &TempDir) -> PathBuf {
    tmp.path().join("rag/chunks.parquet")
}

fn post_chunk(doc: &str, idx: usize, content: &str, embedding: Vec<f64>) -> Chunk {
    Chunk {
        chunk_id: Chunk::make_id(doc, idx),
        document_id: doc.to_string(),
        kind: DocumentKind::Post {
            slug: doc.to_string(),
            title: doc.to_string(),
            date: None,
        },
        chunk_index: idx as i64,
        content: content.to_string(),
        embedding,
        tags: vec!["test".to_string()],
        authors: vec![],
        category: None,
    }
}

#[tokio::test]
async fn lancedb_full_flow() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = corpus_path(&tmp);
    let store = VectorStore::open(&path, StoreOptions::new(2)).await?;
    store
        .append(&[
            post_chunk("post-a", 0, "east", vec![1.0, 0.0]),
            post_chunk("post-a", 1, "north", vec![0.0, 1.0]),
            post_chunk("post-a", 2, "north-east", vec![1.0, 1.0]),
        ])
        .await?;

    // f32 storage can push the orthogonal chunk a hair below zero.
    let req = SearchRequest::new().top_k(3).min_similarity(-1.0);
    let hits = store.search(&[1.0, 0.0], &req).await?;
    eprintln!("Lance: {} hits", hits.len());
    let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(ids, ["post-a_0", "post-a_2", "post-a_1"]);
    assert!((hits[0].similarity - 1.0).abs() < 1e-5);
    assert!((hits[1].similarity - std::f64::consts::FRAC_1_SQRT_2).abs() < 1e-5);
    assert_eq!(hits[0].content, "east");
    assert_eq!(hits[0].tags, ["test"]);

    let exact = store.search(&[1.0, 0.0], &req.clone().mode(SearchMode::Exact)).await?;
    let exact_ids: Vec<&str> = exact.iter().map(|h| h.chunk_id.as_str()).collect();
    assert_eq!(exact_ids, ids);

    let meta = store.index_status().await?.ok_or_else(|| anyhow::anyhow!("index meta missing"))?;
    assert_eq!(meta.mode, IndexMode::Exact);
    assert_eq!(meta.row_count, 3);
    assert_eq!(meta.embedding_dim, Some(2));

    // A fresh process finds the materialized table and its descriptor intact.
    drop(store);
    let reopened = VectorStore::open(&path, StoreOptions::new(2)).await?;
    assert_eq!(reopened.sync().await?, SyncOutcome::Loaded { rows: 3 });
    assert_eq!(reopened.search(&[1.0, 0.0], &req).await?.len(), 3);
    Ok(())
}

#[tokio::test]
async fn emptied_corpus_clears_materialized_table() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = corpus_path(&tmp);
    let store = VectorStore::open(&path, StoreOptions::new(2)).await?;
    store.append(&[post_chunk("post-a", 0, "only", vec![1.0, 0.0])]).await?;
    assert_eq!(store.sync().await?, SyncOutcome::Rebuilt { rows: 1 });

    assert_eq!(store.replace_document("post-a", &[]).await?, 1);
    assert_eq!(store.sync().await?, SyncOutcome::Cleared);
    let req = SearchRequest::new().min_similarity(-1.0);
    assert!(store.search(&[1.0, 0.0], &req).await?.is_empty());
    assert!(store.index_status().await?.is_none());

    let handle = StorageHandle::open_beside(&path).await?;
    assert_eq!(handle.materialized_rows().await?, Some(0));
    Ok(())
}

#[tokio::test]
async fn dimension_change_is_rejected() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = corpus_path(&tmp);
    let handle = StorageHandle::open_beside(&path).await?;
    handle.materialize(&[post_chunk("post-a", 0, "x", vec![1.0, 0.0])], 2).await?;

    let err = handle.materialize(&[post_chunk("post-a", 0, "x", vec![1.0, 0.0, 0.0])], 3).await;
    assert!(err.is_err());
    Ok(())
}

#[tokio::test]
#[ignore]
async fn ivf_index_over_thousands_of_rows() -> anyhow::Result<()> {
    let tmp = tempfile::tempdir()?;
    let path = corpus_path(&tmp);
    let embedder = HashingEmbedder::new(16)?;
    let chunks: Vec<Chunk> = (0..2000)
        .map(|i| {
            let text = format!("note {i} about topic {} and item {}", i % 37, i * 7919);
            post_chunk(&format!("post-{i}"), 0, &text, embedder.embed_one(&text))
        })
        .collect();

    let store = VectorStore::open(&path, StoreOptions::new(16)).await?;
    store.append(&chunks).await?;
    store.sync().await?;

    let meta = store.index_status().await?.ok_or_else(|| anyhow::anyhow!("index meta missing"))?;
    assert_eq!(meta.mode, IndexMode::Ann);
    assert_eq!(meta.nlist, Some(45));

    // Probing every partition makes the IVF scan exhaustive.
    let target = &chunks[1234];
    let req = SearchRequest::new().top_k(5).min_similarity(0.0).nprobe(45);
    let hits = store.search(&target.embedding, &req).await?;
    assert_eq!(hits.first().map(|h| h.chunk_id.as_str()), Some(target.chunk_id.as_str()));
    assert!(hits.windows(2).all(|w| w[0].similarity >= w[1].similarity));
    Ok(())
}
