//! Arrow schemas for the chunk dataset, the materialized query table and the
//! bookkeeping tables, plus row codecs between [`Chunk`] and `RecordBatch`.
use arrow_array::builder::{ListBuilder, StringBuilder};
use arrow_array::cast::AsArray;
use arrow_array::types::{Float32Type, Float64Type};
use arrow_array::{
    Array, ArrayRef, Date32Array, FixedSizeListArray, Int64Array, ListArray, RecordBatch,
    StringArray, TimestampMicrosecondArray,
};
use arrow_schema::{DataType, Field, Schema, SchemaRef, TimeUnit};
use chrono::{DateTime, Datelike, NaiveDate};
use std::collections::BTreeSet;
use std::sync::Arc;

use ragdb_core::error::{Result, SchemaError, StorageResultExt};
use ragdb_core::types::{Chunk, DocumentKind, DocumentType};

/// Canonical column order of the chunk dataset.
pub const CHUNK_COLUMNS: [&str; 18] = [
    "chunk_id",
    "document_type",
    "document_id",
    "post_slug",
    "post_title",
    "post_date",
    "media_uuid",
    "media_type",
    "media_path",
    "original_filename",
    "message_date",
    "author_uuid",
    "chunk_index",
    "content",
    "embedding",
    "tags",
    "authors",
    "category",
];

/// Days between 0001-01-01 (CE day 1) and the Unix epoch.
const UNIX_EPOCH_DAYS_FROM_CE: i32 = 719_163;

fn list_of(item: DataType) -> DataType {
    DataType::List(Arc::new(Field::new("item", item, true)))
}

fn chunk_fields(embedding: DataType) -> Vec<Field> {
    vec![
        Field::new("chunk_id", DataType::Utf8, false),
        Field::new("document_type", DataType::Utf8, false),
        Field::new("document_id", DataType::Utf8, false),
        Field::new("post_slug", DataType::Utf8, true),
        Field::new("post_title", DataType::Utf8, true),
        Field::new("post_date", DataType::Date32, true),
        Field::new("media_uuid", DataType::Utf8, true),
        Field::new("media_type", DataType::Utf8, true),
        Field::new("media_path", DataType::Utf8, true),
        Field::new("original_filename", DataType::Utf8, true),
        Field::new(
            "message_date",
            DataType::Timestamp(TimeUnit::Microsecond, Some("UTC".into())),
            true,
        ),
        Field::new("author_uuid", DataType::Utf8, true),
        Field::new("chunk_index", DataType::Int64, false),
        Field::new("content", DataType::Utf8, false),
        Field::new("embedding", embedding, false),
        Field::new("tags", list_of(DataType::Utf8), false),
        Field::new("authors", list_of(DataType::Utf8), false),
        Field::new("category", DataType::Utf8, true),
    ]
}

/// Schema of the on-disk Parquet dataset: embeddings as variable-length f64 lists.
pub fn chunk_file_schema() -> SchemaRef {
    Arc::new(Schema::new(chunk_fields(list_of(DataType::Float64))))
}

/// Schema of the materialized query table: embeddings as fixed-size f32 vectors
/// so an ANN index can be trained on them.
pub fn chunk_table_schema(dim: usize) -> SchemaRef {
    let item = Arc::new(Field::new("item", DataType::Float32, true));
    let embedding = DataType::FixedSizeList(item, dim as i32);
    Arc::new(Schema::new(chunk_fields(embedding)))
}

pub fn freshness_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("path", DataType::Utf8, false),
        Field::new("mtime_ns", DataType::Int64, false),
        Field::new("size", DataType::Int64, false),
        Field::new("row_count", DataType::Int64, false),
    ]))
}

pub fn index_meta_schema() -> SchemaRef {
    Arc::new(Schema::new(vec![
        Field::new("index_name", DataType::Utf8, false),
        Field::new("mode", DataType::Utf8, false),
        Field::new("row_count", DataType::Int64, false),
        Field::new("threshold", DataType::Int64, false),
        Field::new("nlist", DataType::Int64, true),
        Field::new("embedding_dim", DataType::Int64, true),
        Field::new("updated_at", DataType::Timestamp(TimeUnit::Millisecond, None), false),
    ]))
}

/// Fails with [`SchemaError::ColumnMismatch`] unless `schema` carries exactly the
/// canonical columns.
pub fn validate_columns(schema: &Schema, context: &str) -> Result<()> {
    let actual: BTreeSet<&str> = schema.fields().iter().map(|f| f.name().as_str()).collect();
    let missing: Vec<String> = CHUNK_COLUMNS
        .iter()
        .filter(|c| !actual.contains(*c))
        .map(|c| (*c).to_string())
        .collect();
    let unexpected: Vec<String> = schema
        .fields()
        .iter()
        .map(|f| f.name().as_str())
        .filter(|name| !CHUNK_COLUMNS.contains(name))
        .map(str::to_string)
        .collect();
    if missing.is_empty() && unexpected.is_empty() {
        return Ok(());
    }
    Err(SchemaError::ColumnMismatch {
        context: context.to_string(),
        missing,
        unexpected,
    }
    .into())
}

fn string_list<'a>(values: impl Iterator<Item = &'a Vec<String>>) -> ListArray {
    let mut builder = ListBuilder::new(StringBuilder::new());
    for list in values {
        for s in list {
            builder.values().append_value(s);
        }
        builder.append(true);
    }
    builder.finish()
}

fn build_batch(schema: SchemaRef, chunks: &[Chunk], embedding: ArrayRef) -> Result<RecordBatch> {
    let mut post_slug = Vec::with_capacity(chunks.len());
    let mut post_title = Vec::with_capacity(chunks.len());
    let mut post_date = Vec::with_capacity(chunks.len());
    let mut media_uuid = Vec::with_capacity(chunks.len());
    let mut media_type = Vec::with_capacity(chunks.len());
    let mut media_path = Vec::with_capacity(chunks.len());
    let mut original_filename = Vec::with_capacity(chunks.len());
    let mut message_date = Vec::with_capacity(chunks.len());
    let mut author_uuid = Vec::with_capacity(chunks.len());

    for c in chunks {
        match &c.kind {
            DocumentKind::Post { slug, title, date } => {
                post_slug.push(Some(slug.as_str()));
                post_title.push(Some(title.as_str()));
                post_date.push(date.map(|d| d.num_days_from_ce() - UNIX_EPOCH_DAYS_FROM_CE));
                media_uuid.push(None);
                media_type.push(None);
                media_path.push(None);
                original_filename.push(None);
                message_date.push(None);
                author_uuid.push(None);
            }
            DocumentKind::Media {
                uuid,
                media_type: mt,
                path,
                original_filename: name,
                message_date: ts,
                author_uuid: author,
            } => {
                post_slug.push(None);
                post_title.push(None);
                post_date.push(None);
                media_uuid.push(Some(uuid.as_str()));
                media_type.push(mt.as_deref());
                media_path.push(path.as_deref());
                original_filename.push(name.as_deref());
                message_date.push(ts.map(|t| t.timestamp_micros()));
                author_uuid.push(author.as_deref());
            }
        }
    }

    let columns: Vec<ArrayRef> = vec![
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.chunk_id.as_str()))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.document_type().as_str()))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.document_id.as_str()))),
        Arc::new(StringArray::from(post_slug)),
        Arc::new(StringArray::from(post_title)),
        Arc::new(Date32Array::from(post_date)),
        Arc::new(StringArray::from(media_uuid)),
        Arc::new(StringArray::from(media_type)),
        Arc::new(StringArray::from(media_path)),
        Arc::new(StringArray::from(original_filename)),
        Arc::new(TimestampMicrosecondArray::from(message_date).with_timezone("UTC")),
        Arc::new(StringArray::from(author_uuid)),
        Arc::new(Int64Array::from_iter_values(chunks.iter().map(|c| c.chunk_index))),
        Arc::new(StringArray::from_iter_values(chunks.iter().map(|c| c.content.as_str()))),
        embedding,
        Arc::new(string_list(chunks.iter().map(|c| &c.tags))),
        Arc::new(string_list(chunks.iter().map(|c| &c.authors))),
        Arc::new(StringArray::from_iter(chunks.iter().map(|c| c.category.as_deref()))),
    ];
    RecordBatch::try_new(schema, columns).storage()
}

/// Encodes chunks for the Parquet dataset.
pub fn chunks_to_file_batch(chunks: &[Chunk]) -> Result<RecordBatch> {
    let embedding = ListArray::from_iter_primitive::<Float64Type, _, _>(
        chunks.iter().map(|c| Some(c.embedding.iter().copied().map(Some))),
    );
    build_batch(chunk_file_schema(), chunks, Arc::new(embedding))
}

/// Encodes chunks for the materialized query table. Every embedding must have `dim` values.
pub fn chunks_to_table_batch(chunks: &[Chunk], dim: usize) -> Result<RecordBatch> {
    if let Some(bad) = chunks.iter().find(|c| c.embedding.len() != dim) {
        let got = bad.embedding.len();
        return Err(SchemaError::DimensionMismatch { expected: dim, got }.into());
    }
    let embedding = FixedSizeListArray::from_iter_primitive::<Float32Type, _, _>(
        chunks.iter().map(|c| Some(c.embedding.iter().map(|x| Some(*x as f32)))),
        dim as i32,
    );
    build_batch(chunk_table_schema(dim), chunks, Arc::new(embedding))
}

fn column<'a, T: Array + 'static>(batch: &'a RecordBatch, name: &str) -> Result<&'a T> {
    batch
        .column_by_name(name)
        .and_then(|c| c.as_any().downcast_ref::<T>())
        .ok_or_else(|| {
            SchemaError::InvalidColumn {
                column: name.to_string(),
                reason: format!("missing or not of type {}", std::any::type_name::<T>()),
            }
            .into()
        })
}

fn opt_string(col: &StringArray, i: usize) -> Option<String> {
    col.is_valid(i).then(|| col.value(i).to_string())
}

fn invalid(column: &str, reason: impl Into<String>) -> SchemaError {
    SchemaError::InvalidColumn {
        column: column.to_string(),
        reason: reason.into(),
    }
}

fn strings_at(col: &ListArray, i: usize, name: &str) -> Result<Vec<String>> {
    if col.is_null(i) {
        return Ok(Vec::new());
    }
    let values = col.value(i);
    let strings = values
        .as_string_opt::<i32>()
        .ok_or_else(|| invalid(name, "expected a list of strings"))?;
    Ok(strings.iter().flatten().map(str::to_string).collect())
}

/// Decodes a dataset batch (Parquet layout) back into chunks.
pub fn batch_to_chunks(batch: &RecordBatch) -> Result<Vec<Chunk>> {
    let chunk_id = column::<StringArray>(batch, "chunk_id")?;
    let document_type = column::<StringArray>(batch, "document_type")?;
    let document_id = column::<StringArray>(batch, "document_id")?;
    let post_slug = column::<StringArray>(batch, "post_slug")?;
    let post_title = column::<StringArray>(batch, "post_title")?;
    let post_date = column::<Date32Array>(batch, "post_date")?;
    let media_uuid = column::<StringArray>(batch, "media_uuid")?;
    let media_type = column::<StringArray>(batch, "media_type")?;
    let media_path = column::<StringArray>(batch, "media_path")?;
    let original_filename = column::<StringArray>(batch, "original_filename")?;
    let message_date = column::<TimestampMicrosecondArray>(batch, "message_date")?;
    let author_uuid = column::<StringArray>(batch, "author_uuid")?;
    let chunk_index = column::<Int64Array>(batch, "chunk_index")?;
    let content = column::<StringArray>(batch, "content")?;
    let embedding = column::<ListArray>(batch, "embedding")?;
    let tags = column::<ListArray>(batch, "tags")?;
    let authors = column::<ListArray>(batch, "authors")?;
    let category = column::<StringArray>(batch, "category")?;

    let mut out = Vec::with_capacity(batch.num_rows());
    for i in 0..batch.num_rows() {
        let doc_id = document_id.value(i).to_string();
        let doc_type: DocumentType = document_type
            .value(i)
            .parse()
            .map_err(|_| {
                invalid("document_type", format!("unknown value '{}'", document_type.value(i)))
            })?;
        let kind = match doc_type {
            DocumentType::Post => DocumentKind::Post {
                slug: opt_string(post_slug, i).unwrap_or_else(|| doc_id.clone()),
                title: opt_string(post_title, i).unwrap_or_default(),
                date: if post_date.is_valid(i) {
                    let days = post_date.value(i) + UNIX_EPOCH_DAYS_FROM_CE;
                    let date = NaiveDate::from_num_days_from_ce_opt(days)
                        .ok_or_else(|| invalid("post_date", "out of range"))?;
                    Some(date)
                } else {
                    None
                },
            },
            DocumentType::Media => DocumentKind::Media {
                uuid: opt_string(media_uuid, i).unwrap_or_else(|| doc_id.clone()),
                media_type: opt_string(media_type, i),
                path: opt_string(media_path, i),
                original_filename: opt_string(original_filename, i),
                message_date: if message_date.is_valid(i) {
                    Some(
                        DateTime::from_timestamp_micros(message_date.value(i))
                            .ok_or_else(|| invalid("message_date", "out of range"))?,
                    )
                } else {
                    None
                },
                author_uuid: opt_string(author_uuid, i),
            },
        };

        let vector = if embedding.is_null(i) {
            Vec::new()
        } else {
            let values = embedding.value(i);
            values
                .as_primitive_opt::<Float64Type>()
                .ok_or_else(|| invalid("embedding", "expected a list of float64"))?
                .values()
                .to_vec()
        };

        out.push(Chunk {
            chunk_id: chunk_id.value(i).to_string(),
            document_id: doc_id,
            kind,
            chunk_index: chunk_index.value(i),
            content: content.value(i).to_string(),
            embedding: vector,
            tags: strings_at(tags, i, "tags")?,
            authors: strings_at(authors, i, "authors")?,
            category: opt_string(category, i),
        });
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn sample() -> Vec<Chunk> {
        vec![
            Chunk {
                chunk_id: "post-a_0".into(),
                document_id: "post-a".into(),
                kind: DocumentKind::Post {
                    slug: "post-a".into(),
                    title: "Post A".into(),
                    date: NaiveDate::from_ymd_opt(2024, 2, 29),
                },
                chunk_index: 0,
                content: "first".into(),
                embedding: vec![0.25, -1.5],
                tags: vec!["rust".into(), "db".into()],
                authors: vec![],
                category: Some("notes".into()),
            },
            Chunk {
                chunk_id: "m-1_0".into(),
                document_id: "m-1".into(),
                kind: DocumentKind::Media {
                    uuid: "m-1".into(),
                    media_type: Some("image".into()),
                    path: Some("media/cat.jpg".into()),
                    original_filename: None,
                    message_date: Utc.with_ymd_and_hms(2023, 12, 31, 23, 59, 59).single(),
                    author_uuid: Some("author-9".into()),
                },
                chunk_index: 0,
                content: "a cat".into(),
                embedding: vec![1.0, 0.0],
                tags: vec![],
                authors: vec!["author-9".into()],
                category: None,
            },
        ]
    }

    #[test]
    fn file_batch_decodes_to_the_same_chunks() {
        let chunks = sample();
        let batch = chunks_to_file_batch(&chunks).expect("encode");
        assert_eq!(batch.num_rows(), 2);
        assert_eq!(batch.schema(), chunk_file_schema());
        assert_eq!(batch_to_chunks(&batch).expect("decode"), chunks);
    }

    #[test]
    fn table_batch_uses_fixed_size_vectors() {
        let batch = chunks_to_table_batch(&sample(), 2).expect("encode");
        let field = batch.schema().field_with_name("embedding").cloned().expect("embedding field");
        assert!(matches!(field.data_type(), DataType::FixedSizeList(_, 2)));
        assert!(matches!(
            chunks_to_table_batch(&sample(), 3),
            Err(ragdb_core::Error::Schema(SchemaError::DimensionMismatch { expected: 3, got: 2 }))
        ));
    }

    #[test]
    fn column_validation_reports_both_directions() {
        let schema = Schema::new(vec![
            Field::new("chunk_id", DataType::Utf8, false),
            Field::new("vector", DataType::Utf8, false),
        ]);
        let err = validate_columns(&schema, "existing vector store").err();
        match err {
            Some(ragdb_core::Error::Schema(SchemaError::ColumnMismatch {
                context,
                missing,
                unexpected,
            })) => {
                assert_eq!(context, "existing vector store");
                assert_eq!(missing.len(), CHUNK_COLUMNS.len() - 1);
                assert_eq!(unexpected, vec!["vector".to_string()]);
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert!(validate_columns(&chunk_file_schema(), "x").is_ok());
    }
}
