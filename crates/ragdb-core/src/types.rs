//! Domain types shared by the chunk store, the search engine and the
//! retrieval façade.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

pub type ChunkId = String;

/// Discriminator persisted in the `document_type` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Post,
    Media,
}

impl DocumentType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Media => "media",
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DocumentType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "post" => Ok(Self::Post),
            "media" => Ok(Self::Media),
            other => Err(Error::invalid_argument(format!(
                "document_type must be 'post' or 'media', got '{other}'"
            ))),
        }
    }
}

/// Retrieval strategy: index-backed approximate search or a full cosine scan.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchMode {
    #[default]
    Ann,
    Exact,
}

impl SearchMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ann => "ann",
            Self::Exact => "exact",
        }
    }
}

impl fmt::Display for SearchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ann" => Ok(Self::Ann),
            "exact" => Ok(Self::Exact),
            other => Err(Error::invalid_argument(format!(
                "mode must be 'ann' or 'exact', got '{other}'"
            ))),
        }
    }
}

/// Owner-specific metadata of a chunk. Exactly one field group exists per row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "document_type", rename_all = "lowercase")]
pub enum DocumentKind {
    Post {
        slug: String,
        title: String,
        date: Option<NaiveDate>,
    },
    Media {
        uuid: String,
        media_type: Option<String>,
        path: Option<String>,
        original_filename: Option<String>,
        message_date: Option<DateTime<Utc>>,
        author_uuid: Option<String>,
    },
}

impl DocumentKind {
    pub fn document_type(&self) -> DocumentType {
        match self {
            Self::Post { .. } => DocumentType::Post,
            Self::Media { .. } => DocumentType::Media,
        }
    }

    pub fn media_type(&self) -> Option<&str> {
        match self {
            Self::Media { media_type, .. } => media_type.as_deref(),
            Self::Post { .. } => None,
        }
    }

    /// `coalesce(post_date, message_date)`; post dates are taken at midnight UTC.
    pub fn effective_timestamp(&self) -> Option<DateTime<Utc>> {
        match self {
            Self::Post { date, .. } => date.map(|d| d.and_time(NaiveTime::MIN).and_utc()),
            Self::Media { message_date, .. } => *message_date,
        }
    }
}

/// The atomic indexed unit: one bounded slice of a document plus its vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub kind: DocumentKind,
    pub chunk_index: i64,
    pub content: String,
    pub embedding: Vec<f64>,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    pub category: Option<String>,
}

impl Chunk {
    pub fn make_id(document_id: &str, chunk_index: usize) -> ChunkId {
        format!("{document_id}_{chunk_index}")
    }

    pub fn document_type(&self) -> DocumentType {
        self.kind.document_type()
    }

    pub fn to_hit(&self, similarity: f64) -> SearchHit {
        SearchHit {
            chunk_id: self.chunk_id.clone(),
            document_id: self.document_id.clone(),
            kind: self.kind.clone(),
            chunk_index: self.chunk_index,
            content: self.content.clone(),
            tags: self.tags.clone(),
            authors: self.authors.clone(),
            category: self.category.clone(),
            similarity,
        }
    }
}

/// A chunk projected with its cosine similarity to a query; the raw vector is omitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchHit {
    pub chunk_id: ChunkId,
    pub document_id: String,
    pub kind: DocumentKind,
    pub chunk_index: i64,
    pub content: String,
    pub tags: Vec<String>,
    pub authors: Vec<String>,
    pub category: Option<String>,
    pub similarity: f64,
}

impl SearchHit {
    pub fn document_type(&self) -> DocumentType {
        self.kind.document_type()
    }
}

/// A logical document handed to the retrieval façade for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub document_id: String,
    pub kind: DocumentKind,
    pub content: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub category: Option<String>,
}

impl Document {
    /// A blog post keyed by its slug. The title defaults to the title-cased slug.
    pub fn post(slug: impl Into<String>, content: impl Into<String>) -> Self {
        let slug = slug.into();
        let title = title_from_slug(&slug);
        Self {
            document_id: slug.clone(),
            kind: DocumentKind::Post {
                slug,
                title,
                date: None,
            },
            content: content.into(),
            tags: Vec::new(),
            authors: Vec::new(),
            category: None,
        }
    }

    /// A media description keyed by the media UUID.
    pub fn media(uuid: impl Into<String>, content: impl Into<String>) -> Self {
        let uuid = uuid.into();
        Self {
            document_id: uuid.clone(),
            kind: DocumentKind::Media {
                uuid,
                media_type: None,
                path: None,
                original_filename: None,
                message_date: None,
                author_uuid: None,
            },
            content: content.into(),
            tags: Vec::new(),
            authors: Vec::new(),
            category: None,
        }
    }

    pub fn with_title(mut self, value: impl Into<String>) -> Self {
        if let DocumentKind::Post { title, .. } = &mut self.kind {
            *title = value.into();
        }
        self
    }

    pub fn with_date(mut self, value: NaiveDate) -> Self {
        if let DocumentKind::Post { date, .. } = &mut self.kind {
            *date = Some(value);
        }
        self
    }

    pub fn with_media_type(mut self, value: impl Into<String>) -> Self {
        if let DocumentKind::Media { media_type, .. } = &mut self.kind {
            *media_type = Some(value.into());
        }
        self
    }

    pub fn with_message_date(mut self, value: DateTime<Utc>) -> Self {
        if let DocumentKind::Media { message_date, .. } = &mut self.kind {
            *message_date = Some(value);
        }
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_authors<I, S>(mut self, authors: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.authors = authors.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }
}

fn title_from_slug(slug: &str) -> String {
    slug.split('-')
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Aggregate counts over the whole corpus.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreStats {
    pub total_chunks: usize,
    pub total_posts: usize,
    pub total_media: usize,
    pub media_by_type: BTreeMap<String, usize>,
    pub post_date_range: Option<(NaiveDate, NaiveDate)>,
    pub media_date_range: Option<(DateTime<Utc>, DateTime<Utc>)>,
}

impl StoreStats {
    pub fn from_chunks(chunks: &[Chunk]) -> Self {
        let mut posts = BTreeSet::new();
        let mut media = BTreeSet::new();
        let mut media_by_type: BTreeMap<String, BTreeSet<&str>> = BTreeMap::new();
        let mut post_range: Option<(NaiveDate, NaiveDate)> = None;
        let mut media_range: Option<(DateTime<Utc>, DateTime<Utc>)> = None;

        for chunk in chunks {
            match &chunk.kind {
                DocumentKind::Post { slug, date, .. } => {
                    posts.insert(slug.as_str());
                    if let Some(d) = *date {
                        post_range = Some(widen(post_range, d));
                    }
                }
                DocumentKind::Media { uuid, media_type, message_date, .. } => {
                    media.insert(uuid.as_str());
                    if let Some(t) = media_type {
                        media_by_type.entry(t.clone()).or_default().insert(uuid.as_str());
                    }
                    if let Some(ts) = *message_date {
                        media_range = Some(widen(media_range, ts));
                    }
                }
            }
        }

        Self {
            total_chunks: chunks.len(),
            total_posts: posts.len(),
            total_media: media.len(),
            media_by_type: media_by_type.into_iter().map(|(k, v)| (k, v.len())).collect(),
            post_date_range: post_range,
            media_date_range: media_range,
        }
    }
}

fn widen<T: Ord + Copy>(range: Option<(T, T)>, value: T) -> (T, T) {
    match range {
        Some((lo, hi)) => (lo.min(value), hi.max(value)),
        None => (value, value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(document_id: &str, kind: DocumentKind, idx: i64) -> Chunk {
        Chunk {
            chunk_id: Chunk::make_id(document_id, idx as usize),
            document_id: document_id.to_string(),
            kind,
            chunk_index: idx,
            content: "x".into(),
            embedding: vec![1.0, 0.0],
            tags: vec![],
            authors: vec![],
            category: None,
        }
    }

    #[test]
    fn document_type_parses_case_insensitively() {
        assert_eq!("POST".parse::<DocumentType>().ok(), Some(DocumentType::Post));
        assert_eq!(" media ".parse::<DocumentType>().ok(), Some(DocumentType::Media));
        assert!("video".parse::<DocumentType>().is_err());
    }

    #[test]
    fn search_mode_rejects_unknown_strings() {
        assert_eq!("EXACT".parse::<SearchMode>().ok(), Some(SearchMode::Exact));
        assert_eq!(SearchMode::default(), SearchMode::Ann);
        let err = "fuzzy".parse::<SearchMode>().err();
        assert!(matches!(err, Some(Error::InvalidArgument(_))));
    }

    #[test]
    fn post_title_defaults_from_slug() {
        let doc = Document::post("hello-rust-world", "body");
        match doc.kind {
            DocumentKind::Post { title, .. } => assert_eq!(title, "Hello Rust World"),
            DocumentKind::Media { .. } => panic!("expected post"),
        }
    }

    #[test]
    fn effective_timestamp_coalesces_post_and_message_dates() {
        let date = NaiveDate::from_ymd_opt(2024, 3, 1).expect("date");
        let post = Document::post("a", "b").with_date(date);
        assert_eq!(
            post.kind.effective_timestamp().map(|t| t.date_naive()),
            Some(date)
        );
        let media = Document::media("u1", "b");
        assert_eq!(media.kind.effective_timestamp(), None);
    }

    #[test]
    fn stats_count_distinct_documents_and_ranges() {
        let d1 = NaiveDate::from_ymd_opt(2024, 1, 1).expect("date");
        let d2 = NaiveDate::from_ymd_opt(2024, 6, 1).expect("date");
        let post = |slug: &str, date| DocumentKind::Post {
            slug: slug.into(),
            title: slug.into(),
            date: Some(date),
        };
        let image = |uuid: &str| DocumentKind::Media {
            uuid: uuid.into(),
            media_type: Some("image".into()),
            path: None,
            original_filename: None,
            message_date: None,
            author_uuid: None,
        };
        let chunks = vec![
            chunk("a", post("a", d1), 0),
            chunk("a", post("a", d1), 1),
            chunk("b", post("b", d2), 0),
            chunk("m1", image("m1"), 0),
            chunk("m1", image("m1"), 1),
            chunk("m2", image("m2"), 0),
        ];
        let stats = StoreStats::from_chunks(&chunks);
        assert_eq!(stats.total_chunks, 6);
        assert_eq!(stats.total_posts, 2);
        assert_eq!(stats.total_media, 2);
        assert_eq!(stats.media_by_type.get("image"), Some(&2));
        assert_eq!(stats.post_date_range, Some((d1, d2)));
        assert_eq!(stats.media_date_range, None);
    }
}
