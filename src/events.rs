//! Append-only ingest event log.
//!
//! Events live in a dedicated single-dimension collection in the same vector
//! store (`alexandria_events`, zero vectors), which makes them visible to
//! every host sharing the store. Writes are best-effort: a failed event write
//! logs a warning and never fails the ingest or query that produced it.
//! Events are never mutated in place; each carries its own wall-clock
//! timestamp and unique id, so concurrent writers cannot collide.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::chunk::BookIdentity;
use crate::error::StoreResult;
use crate::store::{Filter, PointRecord, VectorStore};

/// Name of the shared events collection.
pub const EVENTS_COLLECTION: &str = "alexandria_events";

/// Events carry no semantic vector; the collection is dimension 1.
const EVENTS_DIMENSION: usize = 1;

/// Page size when reading events back.
const READ_PAGE: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    IngestStart,
    IngestComplete,
    IngestError,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::IngestStart => "ingest_start",
            Self::IngestComplete => "ingest_complete",
            Self::IngestError => "ingest_error",
        }
    }
}

/// Per-stage wall-clock durations for one book.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StageTimings {
    pub extraction_ms: u64,
    pub chunking_ms: u64,
    pub embedding_ms: u64,
    pub upload_ms: u64,
}

/// One ingest lifecycle event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub hostname: String,
    pub event_type: EventType,
    pub collection: String,
    pub source: String,
    pub source_id: i64,
    pub title: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub child_count: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timings: Option<StageTimings>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub device: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl IngestEvent {
    fn base(event_type: EventType, collection: &str, book: &BookIdentity) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            hostname: hostname(),
            event_type,
            collection: collection.to_string(),
            source: book.source.clone(),
            source_id: book.source_id,
            title: book.title.clone(),
            parent_count: None,
            child_count: None,
            timings: None,
            model: None,
            device: None,
            error_kind: None,
            error_message: None,
        }
    }

    pub fn started(collection: &str, book: &BookIdentity) -> Self {
        Self::base(EventType::IngestStart, collection, book)
    }

    pub fn completed(
        collection: &str,
        book: &BookIdentity,
        parent_count: usize,
        child_count: usize,
        timings: StageTimings,
        model: &str,
        device: &str,
    ) -> Self {
        let mut event = Self::base(EventType::IngestComplete, collection, book);
        event.parent_count = Some(parent_count);
        event.child_count = Some(child_count);
        event.timings = Some(timings);
        event.model = Some(model.to_string());
        event.device = Some(device.to_string());
        event
    }

    pub fn failed(collection: &str, book: &BookIdentity, kind: &str, message: &str) -> Self {
        let mut event = Self::base(EventType::IngestError, collection, book);
        event.error_kind = Some(kind.to_string());
        event.error_message = Some(message.to_string());
        event
    }
}

fn hostname() -> String {
    std::env::var("HOSTNAME")
        .or_else(|_| std::env::var("COMPUTERNAME"))
        .unwrap_or_else(|_| "unknown".to_string())
}

/// Aggregates over `ingest_complete` events.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct EventStats {
    pub books_completed: u64,
    pub books_failed: u64,
    pub total_parents: u64,
    pub total_children: u64,
    pub total_embedding_ms: u64,
    pub total_upload_ms: u64,
}

/// Handle to the shared events collection.
pub struct EventLog {
    store: Arc<dyn VectorStore>,
    ensured: AtomicBool,
}

impl std::fmt::Debug for EventLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventLog").finish_non_exhaustive()
    }
}

impl EventLog {
    pub fn new(store: Arc<dyn VectorStore>) -> Self {
        Self {
            store,
            ensured: AtomicBool::new(false),
        }
    }

    fn ensure(&self) -> StoreResult<()> {
        if self.ensured.load(Ordering::Relaxed) {
            return Ok(());
        }
        self.store
            .ensure_collection(EVENTS_COLLECTION, EVENTS_DIMENSION)?;
        self.ensured.store(true, Ordering::Relaxed);
        Ok(())
    }

    /// Append an event. Best-effort: failures are logged and swallowed.
    pub fn record(&self, event: &IngestEvent) {
        let result = self.ensure().and_then(|()| {
            let payload = match serde_json::to_value(event) {
                Ok(Value::Object(map)) => map,
                _ => return Ok(()),
            };
            self.store.upsert(
                EVENTS_COLLECTION,
                &[PointRecord {
                    id: event.id,
                    vector: vec![0.0],
                    payload,
                }],
            )
        });
        if let Err(err) = result {
            tracing::warn!(
                event_type = event.event_type.as_str(),
                source_id = event.source_id,
                error = %err,
                "event write failed; continuing"
            );
        }
    }

    fn read(&self, filter: &Filter) -> StoreResult<Vec<IngestEvent>> {
        if !self.store.collection_exists(EVENTS_COLLECTION)? {
            return Ok(Vec::new());
        }
        let points = self.store.scroll(EVENTS_COLLECTION, filter, READ_PAGE)?;
        Ok(points
            .into_iter()
            .filter_map(|p| serde_json::from_value(Value::Object(p.payload)).ok())
            .collect())
    }

    /// Most recent events, newest first, optionally restricted to one type.
    pub fn recent(
        &self,
        limit: usize,
        event_type: Option<EventType>,
    ) -> StoreResult<Vec<IngestEvent>> {
        let mut filter = Filter::new();
        if let Some(ty) = event_type {
            filter = filter.match_str("event_type", ty.as_str());
        }
        let mut events = self.read(&filter)?;
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| b.id.cmp(&a.id)));
        events.truncate(limit);
        Ok(events)
    }

    /// Full lifecycle history of one book, oldest first.
    pub fn history(&self, source: &str, source_id: i64) -> StoreResult<Vec<IngestEvent>> {
        let filter = Filter::new().match_str("source", source);
        let mut events: Vec<IngestEvent> = self
            .read(&filter)?
            .into_iter()
            .filter(|e| e.source_id == source_id)
            .collect();
        events.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        Ok(events)
    }

    /// Aggregate counters over completed and failed ingests.
    pub fn stats(&self) -> StoreResult<EventStats> {
        let mut stats = EventStats::default();
        for event in self.read(&Filter::new())? {
            match event.event_type {
                EventType::IngestComplete => {
                    stats.books_completed += 1;
                    stats.total_parents += event.parent_count.unwrap_or(0) as u64;
                    stats.total_children += event.child_count.unwrap_or(0) as u64;
                    if let Some(t) = event.timings {
                        stats.total_embedding_ms += t.embedding_ms;
                        stats.total_upload_ms += t.upload_ms;
                    }
                }
                EventType::IngestError => stats.books_failed += 1,
                EventType::IngestStart => {}
            }
        }
        Ok(stats)
    }
}
