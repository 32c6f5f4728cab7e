//! Vector store adapter: the abstraction over the external vector database.
//!
//! Two backends implement [`VectorStore`]:
//!
//! - [`QdrantStore`] — Qdrant's REST API over `ureq`, with per-operation
//!   deadlines and retried transient failures
//! - [`MemoryStore`] — an in-process implementation of the same contract for
//!   tests and offline runs
//!
//! Callers never see vendor types; filters, points, and stats are the plain
//! structures defined here. Point ids are UUIDs chosen by the caller, which
//! makes upserts idempotent under at-least-once delivery.

pub mod memory;
pub mod qdrant;

pub use memory::MemoryStore;
pub use qdrant::QdrantStore;

use serde_json::{Map, Value};
use uuid::Uuid;

use crate::error::StoreResult;

/// A point to upsert: id + vector + payload.
#[derive(Debug, Clone)]
pub struct PointRecord {
    pub id: Uuid,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

/// A search hit, ordered by descending score.
#[derive(Debug, Clone)]
pub struct ScoredPoint {
    pub id: Uuid,
    pub score: f32,
    pub payload: Map<String, Value>,
}

/// Payload index kinds the adapter can declare.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldIndexKind {
    Keyword,
    Integer,
}

/// A single filter condition. All conditions in a [`Filter`] must hold.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    /// Exact string match on a payload field.
    MatchStr(String, String),
    /// Exact integer match on a payload field.
    MatchInt(String, i64),
    /// Inclusive integer range on a payload field.
    Range {
        field: String,
        gte: Option<i64>,
        lte: Option<i64>,
    },
}

/// Conjunctive payload filter.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    pub must: Vec<Condition>,
}

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn match_str(mut self, field: &str, value: impl Into<String>) -> Self {
        self.must
            .push(Condition::MatchStr(field.to_string(), value.into()));
        self
    }

    pub fn match_int(mut self, field: &str, value: i64) -> Self {
        self.must.push(Condition::MatchInt(field.to_string(), value));
        self
    }

    pub fn range(mut self, field: &str, gte: Option<i64>, lte: Option<i64>) -> Self {
        self.must.push(Condition::Range {
            field: field.to_string(),
            gte,
            lte,
        });
        self
    }

    /// Whether a payload satisfies every condition. Used by the in-memory
    /// backend; the Qdrant backend evaluates server-side.
    pub fn matches(&self, payload: &Map<String, Value>) -> bool {
        self.must.iter().all(|condition| match condition {
            Condition::MatchStr(field, expected) => payload
                .get(field)
                .and_then(Value::as_str)
                .is_some_and(|v| v == expected),
            Condition::MatchInt(field, expected) => payload
                .get(field)
                .and_then(Value::as_i64)
                .is_some_and(|v| v == *expected),
            Condition::Range { field, gte, lte } => {
                payload.get(field).and_then(Value::as_i64).is_some_and(|v| {
                    gte.map(|g| v >= g).unwrap_or(true) && lte.map(|l| v <= l).unwrap_or(true)
                })
            }
        })
    }
}

/// Collection-level counters and invariants.
#[derive(Debug, Clone)]
pub struct CollectionStats {
    pub points: u64,
    pub dimension: usize,
}

/// The payload fields every chunk collection indexes, with their kinds.
pub fn chunk_payload_indexes() -> Vec<(&'static str, FieldIndexKind)> {
    use crate::chunk::keys;
    vec![
        (keys::CHUNK_LEVEL, FieldIndexKind::Keyword),
        (keys::PARENT_ID, FieldIndexKind::Keyword),
        (keys::BOOK_TITLE, FieldIndexKind::Keyword),
        (keys::DOMAIN, FieldIndexKind::Keyword),
        (keys::SEQUENCE_INDEX, FieldIndexKind::Integer),
        (keys::SOURCE, FieldIndexKind::Keyword),
        (keys::SOURCE_ID, FieldIndexKind::Keyword),
    ]
}

/// Abstract vector store. Distance metric is cosine for every collection.
pub trait VectorStore: Send + Sync {
    /// Create the collection if missing; verify the dimension if present.
    fn ensure_collection(&self, name: &str, dimension: usize) -> StoreResult<()>;

    /// Declare payload indexes. Idempotent.
    fn ensure_payload_indexes(
        &self,
        name: &str,
        fields: &[(&str, FieldIndexKind)],
    ) -> StoreResult<()>;

    /// Upsert points in batches. At-least-once on partial failure: batches
    /// are retried with backoff, and identical point ids make retries safe.
    fn upsert(&self, name: &str, points: &[PointRecord]) -> StoreResult<()>;

    /// Delete every point matching the filter.
    fn delete_by_filter(&self, name: &str, filter: &Filter) -> StoreResult<()>;

    /// Vector search with payload filter; results sorted by score descending.
    fn search(
        &self,
        name: &str,
        vector: &[f32],
        filter: &Filter,
        limit: usize,
    ) -> StoreResult<Vec<ScoredPoint>>;

    /// Bulk fetch by id, preserving request order. Missing ids are omitted.
    fn retrieve(&self, name: &str, ids: &[Uuid]) -> StoreResult<Vec<PointRecord>>;

    /// Payload-only traversal of points matching the filter.
    fn scroll(&self, name: &str, filter: &Filter, limit: usize) -> StoreResult<Vec<PointRecord>>;

    /// Whether the collection exists.
    fn collection_exists(&self, name: &str) -> StoreResult<bool>;

    /// Point count and declared dimension.
    fn stats(&self, name: &str) -> StoreResult<CollectionStats>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filter_matches_conjunction() {
        let mut payload = Map::new();
        payload.insert("chunk_level".into(), json!("child"));
        payload.insert("sequence_index".into(), json!(4));

        let filter = Filter::new()
            .match_str("chunk_level", "child")
            .range("sequence_index", Some(2), Some(6));
        assert!(filter.matches(&payload));

        let filter = Filter::new()
            .match_str("chunk_level", "child")
            .range("sequence_index", Some(5), None);
        assert!(!filter.matches(&payload));
    }

    #[test]
    fn filter_missing_field_never_matches() {
        let payload = Map::new();
        assert!(!Filter::new().match_str("domain", "history").matches(&payload));
        assert!(Filter::new().matches(&payload), "empty filter matches all");
    }

    #[test]
    fn match_int_distinguishes_types() {
        let mut payload = Map::new();
        payload.insert("n".into(), json!("5"));
        assert!(!Filter::new().match_int("n", 5).matches(&payload));
        payload.insert("n".into(), json!(5));
        assert!(Filter::new().match_int("n", 5).matches(&payload));
    }
}
