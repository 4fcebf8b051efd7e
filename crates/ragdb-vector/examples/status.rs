use ragdb_core::config::Config;
use ragdb_vector::{StoreOptions, VectorStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    ragdb_core::telemetry::init();
    let settings = Config::load()?.settings()?;
    let path = settings.corpus_path();
    let store = VectorStore::open(&path, StoreOptions::from(&settings)).await?;

    let stats = store.stats()?;
    println!("corpus: {}", path.display());
    println!(
        "chunks: total={} posts={} media={}",
        stats.total_chunks, stats.total_posts, stats.total_media
    );
    for (media_type, count) in &stats.media_by_type {
        println!("  media[{media_type}]={count}");
    }
    if let Some((first, last)) = stats.post_date_range {
        println!("post dates: {first} .. {last}");
    }
    if let Some((first, last)) = stats.media_date_range {
        println!("media dates: {first} .. {last}");
    }

    let outcome = store.sync().await?;
    println!("sync: {outcome:?}");
    match store.index_status().await? {
        Some(meta) => println!(
            "index {}: mode={} rows={} threshold={} nlist={:?}",
            meta.index_name, meta.mode, meta.row_count, meta.threshold, meta.nlist
        ),
        None => println!("index: none"),
    }
    Ok(())
}
