//! Similarity search over the synced snapshot.
//!
//! Exact mode scores every row with f64 cosine similarity. ANN mode asks the
//! backend for an over-fetched candidate set and derives similarity as
//! `1 - cosine distance`. Both modes share the same post-filters, ordering and
//! truncation.
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use std::str::FromStr;
use tracing::warn;

use ragdb_core::error::{Error, Result};
use ragdb_core::types::{Chunk, DocumentType, SearchHit, SearchMode};

use crate::index_build::{IndexManager, Snapshot};

pub const DEFAULT_TOP_K: usize = 5;
pub const DEFAULT_MIN_SIMILARITY: f64 = 0.7;
pub const DEFAULT_ANN_OVERFETCH: usize = 5;

/// Cosine similarity; zero when either vector has zero norm.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    let (mut dot, mut na, mut nb) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    if na == 0.0 || nb == 0.0 {
        return 0.0;
    }
    dot / (na.sqrt() * nb.sqrt())
}

/// Exclusive lower bound on a chunk's effective date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct DateBound(DateTime<Utc>);

impl DateBound {
    pub fn instant(&self) -> DateTime<Utc> {
        self.0
    }
}

impl From<DateTime<Utc>> for DateBound {
    fn from(value: DateTime<Utc>) -> Self {
        Self(value)
    }
}

impl From<NaiveDate> for DateBound {
    fn from(value: NaiveDate) -> Self {
        Self(value.and_time(NaiveTime::MIN).and_utc())
    }
}

impl FromStr for DateBound {
    type Err = Error;

    /// Accepts RFC 3339, a naive `YYYY-MM-DDTHH:MM:SS` (taken as UTC) or a plain date.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self(dt.with_timezone(&Utc)));
        }
        for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
            if let Ok(naive) = NaiveDateTime::parse_from_str(s, fmt) {
                return Ok(Self(naive.and_utc()));
            }
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .map(Self::from)
            .map_err(|_| {
                Error::invalid_argument(format!(
                    "date_after must be an ISO-8601 date or timestamp, got '{s}'"
                ))
            })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SearchRequest {
    pub top_k: usize,
    pub min_similarity: f64,
    pub tag_filter: Option<Vec<String>>,
    pub date_after: Option<DateBound>,
    pub document_type: Option<DocumentType>,
    pub media_types: Option<Vec<String>>,
    pub mode: SearchMode,
    pub nprobe: Option<usize>,
    pub overfetch: Option<usize>,
}

impl Default for SearchRequest {
    fn default() -> Self {
        Self {
            top_k: DEFAULT_TOP_K,
            min_similarity: DEFAULT_MIN_SIMILARITY,
            tag_filter: None,
            date_after: None,
            document_type: None,
            media_types: None,
            mode: SearchMode::Ann,
            nprobe: None,
            overfetch: None,
        }
    }
}

impl SearchRequest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn min_similarity(mut self, min: f64) -> Self {
        self.min_similarity = min;
        self
    }

    pub fn tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tag_filter = Some(tags.into_iter().map(Into::into).collect());
        self
    }

    pub fn date_after(mut self, bound: impl Into<DateBound>) -> Self {
        self.date_after = Some(bound.into());
        self
    }

    pub fn document_type(mut self, document_type: DocumentType) -> Self {
        self.document_type = Some(document_type);
        self
    }

    pub fn media_types<I, S>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.media_types = Some(types.into_iter().map(Into::into).collect());
        self
    }

    pub fn mode(mut self, mode: SearchMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn nprobe(mut self, nprobe: usize) -> Self {
        self.nprobe = Some(nprobe);
        self
    }

    pub fn overfetch(mut self, factor: usize) -> Self {
        self.overfetch = Some(factor);
        self
    }

    /// ANN candidate pool: `max(top_k * factor, top_k + 10)`. Only factors
    /// above 1 override the default.
    pub fn candidate_count(&self) -> usize {
        let factor = self.overfetch.filter(|f| *f > 1).unwrap_or(DEFAULT_ANN_OVERFETCH);
        (self.top_k.saturating_mul(factor)).max(self.top_k.saturating_add(10))
    }

    /// Argument checks that must surface to the caller instead of degrading.
    pub fn validate(&self, query: &[f64], embedding_dim: usize) -> Result<()> {
        if query.is_empty() {
            return Err(Error::invalid_argument("query vector must not be empty"));
        }
        if query.len() != embedding_dim {
            return Err(Error::invalid_argument(format!(
                "query vector has {} dimensions, store expects {embedding_dim}",
                query.len()
            )));
        }
        if let Some(i) = query.iter().position(|x| !x.is_finite()) {
            return Err(Error::invalid_argument(format!(
                "query vector component {i} is not a finite number"
            )));
        }
        if self.nprobe == Some(0) {
            return Err(Error::invalid_argument("nprobe must be a positive integer"));
        }
        if !self.min_similarity.is_finite() {
            return Err(Error::invalid_argument("min_similarity must be a finite number"));
        }
        Ok(())
    }

    /// Metadata filters plus the similarity threshold. A NaN similarity never passes.
    pub fn accepts(&self, chunk: &Chunk, similarity: f64) -> bool {
        if similarity.is_nan() || similarity < self.min_similarity {
            return false;
        }
        if let Some(t) = self.document_type {
            if chunk.document_type() != t {
                return false;
            }
        }
        if let Some(types) = self.media_types.as_ref().filter(|t| !t.is_empty()) {
            match chunk.kind.media_type() {
                Some(mt) if types.iter().any(|t| t == mt) => {}
                _ => return false,
            }
        }
        if let Some(tags) = self.tag_filter.as_ref().filter(|t| !t.is_empty()) {
            if !chunk.tags.iter().any(|t| tags.contains(t)) {
                return false;
            }
        }
        if let Some(bound) = self.date_after {
            match chunk.kind.effective_timestamp() {
                Some(ts) if ts > bound.instant() => {}
                _ => return false,
            }
        }
        true
    }
}

fn score_exact<'a>(snapshot: &'a Snapshot, query: &[f64]) -> Vec<(&'a Chunk, f64)> {
    snapshot.chunks.iter().map(|c| (c, cosine_similarity(query, &c.embedding))).collect()
}

/// Runs a validated request against the current snapshot. The snapshot read
/// lock is held for the whole query so a concurrent re-materialization cannot
/// interleave with it. When the backend rejects an ANN query the snapshot is
/// scanned exactly instead.
pub(crate) async fn run(
    manager: &IndexManager,
    query: &[f64],
    request: &SearchRequest,
) -> Result<Vec<SearchHit>> {
    let state = manager.state.read().await;
    let Some(snapshot) = state.snapshot().filter(|s| !s.is_empty()) else {
        return Ok(Vec::new());
    };
    if request.top_k == 0 {
        return Ok(Vec::new());
    }

    let scored: Vec<(&Chunk, f64)> = match request.mode {
        SearchMode::Exact => score_exact(snapshot, query),
        SearchMode::Ann => {
            let limit = request.candidate_count();
            match manager.backend().nearest(query, limit, request.nprobe).await {
                Ok(candidates) => candidates
                    .into_iter()
                    .filter_map(|c| {
                        snapshot.get(&c.chunk_id).map(|chunk| (chunk, 1.0 - c.distance))
                    })
                    .collect(),
                Err(e) => {
                    warn!(error = %e, limit, "ANN query failed; falling back to exact scan");
                    score_exact(snapshot, query)
                }
            }
        }
    };

    let mut hits: Vec<SearchHit> = scored
        .into_iter()
        .filter(|(chunk, sim)| request.accepts(chunk, *sim))
        .map(|(chunk, sim)| chunk.to_hit(sim))
        .collect();
    hits.sort_by(|a, b| b.similarity.total_cmp(&a.similarity));
    hits.truncate(request.top_k);
    Ok(hits)
}
