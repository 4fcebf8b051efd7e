use std::env;

use ragdb_core::config::Config;
use ragdb_core::types::Document;
use ragdb_embed::HashingEmbedder;
use ragdb_retrieval::RetrievalFacade;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ragdb_core::telemetry::init();
    let settings = Config::load()?.settings()?;
    let embedder = HashingEmbedder::new(settings.store.embedding_dim)?;
    let rag = RetrievalFacade::open(&settings, Box::new(embedder)).await?;

    let args: Vec<String> = env::args().skip(1).collect();
    if args.first().map(String::as_str) == Some("--index") {
        // --index <slug> <markdown file>...
        let docs = args[1..]
            .chunks(2)
            .filter(|pair| pair.len() == 2)
            .map(|pair| -> anyhow::Result<Document> {
                Ok(Document::post(pair[0].clone(), std::fs::read_to_string(&pair[1])?))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;
        let report = rag.index_documents(&docs).await;
        println!("indexed {} documents into {} chunks", report.documents, report.chunks);
        if let Some((id, err)) = report.failure {
            anyhow::bail!("indexing '{id}' failed: {err}");
        }
        return Ok(());
    }

    let question = args.join(" ");
    if question.trim().is_empty() {
        anyhow::bail!("usage: ask <question> | ask --index <slug> <file> [<slug> <file>...]");
    }
    let hits = rag.query_similar(&question, &rag.default_query()).await?;
    println!("{} hits for '{question}'", hits.len());
    for (i, hit) in hits.iter().enumerate() {
        let preview: String = hit.content.chars().take(120).collect();
        println!(
            "{:>2}. [{:.3}] {} #{}: {}",
            i + 1,
            hit.similarity,
            hit.document_id,
            hit.chunk_index,
            preview.replace('\n', " ")
        );
    }
    Ok(())
}
