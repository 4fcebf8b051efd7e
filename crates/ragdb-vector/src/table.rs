//! LanceDB connection and the tables the index manager keeps in it.
//!
//! `rag_chunks` holds the materialized dataset, `rag_chunks_metadata` the
//! freshness descriptor keyed by corpus path, and `index_meta` one
//! bookkeeping row per ANN index.
use arrow_array::{
    Array, Float32Array, Int64Array, RecordBatch, RecordBatchIterator, StringArray,
    TimestampMillisecondArray,
};
use arrow_schema::{ArrowError, DataType, SchemaRef};
use async_trait::async_trait;
use chrono::DateTime;
use futures::TryStreamExt;
use lancedb::index::vector::IvfFlatIndexBuilder;
use lancedb::index::Index;
use lancedb::query::{ExecutableQuery, QueryBase, Select};
use lancedb::table::Table;
use lancedb::{connect, Connection, DistanceType};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info};

use ragdb_core::error::{Result, SchemaError, StorageResultExt};
use ragdb_core::types::Chunk;

use crate::backend::{Candidate, ChunkStoreBackend, IndexMeta, IvfFlatParams};
use crate::freshness::FreshnessDescriptor;
use crate::schema::{chunks_to_table_batch, freshness_schema, index_meta_schema};

pub const CHUNKS_TABLE: &str = "rag_chunks";
pub const FRESHNESS_TABLE: &str = "rag_chunks_metadata";
pub const INDEX_META_TABLE: &str = "index_meta";

fn quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

type BatchReader =
    RecordBatchIterator<std::vec::IntoIter<std::result::Result<RecordBatch, ArrowError>>>;

fn reader(batch: RecordBatch) -> Box<BatchReader> {
    let schema = batch.schema();
    Box::new(RecordBatchIterator::new(vec![Ok(batch)].into_iter(), schema))
}

/// Handle to the LanceDB database that backs one corpus.
#[derive(Clone)]
pub struct StorageHandle {
    conn: Connection,
}

impl StorageHandle {
    pub async fn open(uri: &str) -> Result<Self> {
        let conn = connect(uri).execute().await.storage()?;
        debug!(uri, "opened LanceDB database");
        Ok(Self { conn })
    }

    /// Opens the database directory next to the corpus file
    /// (`chunks.parquet` -> `chunks.lance`).
    pub async fn open_beside(corpus_path: &Path) -> Result<Self> {
        let db_path = corpus_path.with_extension("lance");
        Self::open(&db_path.to_string_lossy()).await
    }

    async fn table_exists(&self, name: &str) -> Result<bool> {
        let names = self.conn.table_names().execute().await.storage()?;
        Ok(names.iter().any(|n| n == name))
    }

    async fn open_if_exists(&self, name: &str) -> Result<Option<Table>> {
        if !self.table_exists(name).await? {
            return Ok(None);
        }
        Ok(Some(self.conn.open_table(name).execute().await.storage()?))
    }

    async fn ensure_table(&self, name: &str, schema: SchemaRef) -> Result<Table> {
        if let Some(table) = self.open_if_exists(name).await? {
            return Ok(table);
        }
        // create empty table with 0 rows
        let iter = RecordBatchIterator::new(vec![].into_iter(), schema);
        self.conn.create_table(name, Box::new(iter)).execute().await.storage()
    }

    /// Upserts one row keyed by `key`, the same way for every bookkeeping table.
    async fn upsert(&self, table: &str, key: &str, batch: RecordBatch) -> Result<()> {
        let t = self.ensure_table(table, batch.schema()).await?;
        let mut mi = t.merge_insert(&[key]);
        mi.when_matched_update_all(None).when_not_matched_insert_all();
        mi.execute(reader(batch)).await.storage()?;
        Ok(())
    }

    async fn delete_where(&self, table: &str, predicate: &str) -> Result<()> {
        if let Some(t) = self.open_if_exists(table).await? {
            t.delete(predicate).await.storage()?;
        }
        Ok(())
    }

    async fn first_row(&self, table: &str, predicate: &str) -> Result<Option<RecordBatch>> {
        let Some(t) = self.open_if_exists(table).await? else {
            return Ok(None);
        };
        let mut stream = t.query().only_if(predicate).limit(1).execute().await.storage()?;
        while let Some(batch) = stream.try_next().await.storage()? {
            if batch.num_rows() > 0 {
                return Ok(Some(batch));
            }
        }
        Ok(None)
    }
}

fn col<'a, T: Array + 'static>(batch: &'a RecordBatch, table: &str, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| {
            SchemaError::InvalidColumn {
                column: format!("{table}.{name}"),
                reason: "column missing or of unexpected type".to_string(),
            }
            .into()
        })
}

#[async_trait]
impl ChunkStoreBackend for StorageHandle {
    async fn materialize(&self, chunks: &[Chunk], dim: usize) -> Result<usize> {
        let batch = chunks_to_table_batch(chunks, dim)?;
        match self.open_if_exists(CHUNKS_TABLE).await? {
            Some(table) => {
                let schema = table.schema().await.storage()?;
                if let Ok(field) = schema.field_with_name("embedding") {
                    if let DataType::FixedSizeList(_, existing) = field.data_type() {
                        let (expected, got) = (*existing as usize, dim);
                        if expected != got {
                            return Err(SchemaError::DimensionMismatch { expected, got }.into());
                        }
                    }
                }
                table.delete("true").await.storage()?;
                if batch.num_rows() > 0 {
                    table.add(reader(batch)).execute().await.storage()?;
                }
            }
            None => {
                self.conn.create_table(CHUNKS_TABLE, reader(batch)).execute().await.storage()?;
            }
        }
        info!(table = CHUNKS_TABLE, rows = chunks.len(), "materialized chunk table");
        Ok(chunks.len())
    }

    async fn clear(&self) -> Result<()> {
        self.delete_where(CHUNKS_TABLE, "true").await
    }

    async fn materialized_rows(&self) -> Result<Option<usize>> {
        match self.open_if_exists(CHUNKS_TABLE).await? {
            Some(table) => Ok(Some(table.count_rows(None).await.storage()?)),
            None => Ok(None),
        }
    }

    async fn create_ann_index(&self, name: &str, params: &IvfFlatParams) -> Result<()> {
        let table = self.conn.open_table(CHUNKS_TABLE).execute().await.storage()?;
        table
            .create_index(
                &["embedding"],
                Index::IvfFlat(
                    IvfFlatIndexBuilder::default()
                        .distance_type(DistanceType::Cosine)
                        .num_partitions(params.nlist as u32),
                ),
            )
            .name(name.to_string())
            .replace(true)
            .execute()
            .await
            .storage()?;
        Ok(())
    }

    async fn drop_ann_index(&self, name: &str) -> Result<()> {
        let Some(table) = self.open_if_exists(CHUNKS_TABLE).await? else {
            return Ok(());
        };
        let indices = table.list_indices().await.storage()?;
        if indices.iter().any(|idx| idx.name == name) {
            table.drop_index(name).await.storage()?;
            debug!(index = name, "dropped ANN index");
        }
        Ok(())
    }

    async fn nearest(
        &self,
        query: &[f64],
        limit: usize,
        nprobe: Option<usize>,
    ) -> Result<Vec<Candidate>> {
        let Some(table) = self.open_if_exists(CHUNKS_TABLE).await? else {
            return Ok(Vec::new());
        };
        let q: Vec<f32> = query.iter().map(|x| *x as f32).collect();
        let mut search = table
            .vector_search(q)
            .storage()?
            .column("embedding")
            .distance_type(DistanceType::Cosine)
            .limit(limit)
            .select(Select::columns(&["chunk_id"]));
        if let Some(n) = nprobe {
            search = search.nprobes(n);
        }

        let mut stream = search.execute().await.storage()?;
        let mut out = Vec::with_capacity(limit);
        while let Some(batch) = stream.try_next().await.storage()? {
            let ids = col::<StringArray>(&batch, CHUNKS_TABLE, "chunk_id")?;
            let distances = col::<Float32Array>(&batch, CHUNKS_TABLE, "_distance")?;
            for i in 0..batch.num_rows() {
                out.push(Candidate {
                    chunk_id: ids.value(i).to_string(),
                    distance: f64::from(distances.value(i)),
                });
            }
        }
        Ok(out)
    }

    async fn load_descriptor(&self, path: &str) -> Result<Option<FreshnessDescriptor>> {
        let filter = format!("path = {}", quote(path));
        let Some(batch) = self.first_row(FRESHNESS_TABLE, &filter).await? else {
            return Ok(None);
        };
        Ok(Some(FreshnessDescriptor {
            mtime_ns: col::<Int64Array>(&batch, FRESHNESS_TABLE, "mtime_ns")?.value(0),
            size: col::<Int64Array>(&batch, FRESHNESS_TABLE, "size")?.value(0),
            row_count: col::<Int64Array>(&batch, FRESHNESS_TABLE, "row_count")?.value(0),
        }))
    }

    async fn store_descriptor(
        &self,
        path: &str,
        descriptor: Option<&FreshnessDescriptor>,
    ) -> Result<()> {
        let Some(d) = descriptor else {
            return self.delete_where(FRESHNESS_TABLE, &format!("path = {}", quote(path))).await;
        };
        let rb = RecordBatch::try_new(
            freshness_schema(),
            vec![
                Arc::new(StringArray::from(vec![path.to_string()])),
                Arc::new(Int64Array::from(vec![d.mtime_ns])),
                Arc::new(Int64Array::from(vec![d.size])),
                Arc::new(Int64Array::from(vec![d.row_count])),
            ],
        )
        .storage()?;
        self.upsert(FRESHNESS_TABLE, "path", rb).await
    }

    async fn load_index_meta(&self, name: &str) -> Result<Option<IndexMeta>> {
        let filter = format!("index_name = {}", quote(name));
        let Some(batch) = self.first_row(INDEX_META_TABLE, &filter).await? else {
            return Ok(None);
        };
        let optional = |column: &str| -> Result<Option<i64>> {
            let arr = col::<Int64Array>(&batch, INDEX_META_TABLE, column)?;
            Ok(arr.is_valid(0).then(|| arr.value(0)))
        };
        let updated_ms =
            col::<TimestampMillisecondArray>(&batch, INDEX_META_TABLE, "updated_at")?.value(0);
        let index_name = col::<StringArray>(&batch, INDEX_META_TABLE, "index_name")?.value(0);
        Ok(Some(IndexMeta {
            index_name: index_name.to_string(),
            mode: col::<StringArray>(&batch, INDEX_META_TABLE, "mode")?.value(0).parse()?,
            row_count: col::<Int64Array>(&batch, INDEX_META_TABLE, "row_count")?.value(0),
            threshold: col::<Int64Array>(&batch, INDEX_META_TABLE, "threshold")?.value(0),
            nlist: optional("nlist")?,
            embedding_dim: optional("embedding_dim")?,
            updated_at: DateTime::from_timestamp_millis(updated_ms).unwrap_or_default(),
        }))
    }

    async fn store_index_meta(&self, name: &str, meta: Option<&IndexMeta>) -> Result<()> {
        let Some(m) = meta else {
            let filter = format!("index_name = {}", quote(name));
            return self.delete_where(INDEX_META_TABLE, &filter).await;
        };
        let rb = RecordBatch::try_new(
            index_meta_schema(),
            vec![
                Arc::new(StringArray::from(vec![name.to_string()])),
                Arc::new(StringArray::from(vec![m.mode.as_str()])),
                Arc::new(Int64Array::from(vec![m.row_count])),
                Arc::new(Int64Array::from(vec![m.threshold])),
                Arc::new(Int64Array::from(vec![m.nlist])),
                Arc::new(Int64Array::from(vec![m.embedding_dim])),
                Arc::new(TimestampMillisecondArray::from(vec![m.updated_at.timestamp_millis()])),
            ],
        )
        .storage()?;
        self.upsert(INDEX_META_TABLE, "index_name", rb).await
    }
}

#[cfg(test)]
mod tests {
    use super::quote;

    #[test]
    fn quote_escapes_single_quotes() {
        assert_eq!(quote("rag/chunks.parquet"), "'rag/chunks.parquet'");
        assert_eq!(quote("o'brien"), "'o''brien'");
    }
}
