//! Chunk data model: the parent/child payload schema stored in the vector store.
//!
//! Parents represent top-level sections (chapters); children are the
//! semantically-bounded sub-chunks retrieval actually searches. Both share a
//! common envelope of book identity and provenance fields. Payloads are plain
//! JSON maps in the store: unknown keys written by other tools are ignored by
//! alexandria but survive round-trips untouched.
//!
//! `source_id` is serialized as a string in payloads so it can live under a
//! keyword index alongside `source`; the typed model keeps it numeric.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use uuid::Uuid;

/// Payload key names. Shared by ingestion, filters, indexes, and retrieval
/// so a renamed field cannot silently split the schema.
pub mod keys {
    pub const CHUNK_LEVEL: &str = "chunk_level";
    pub const SOURCE: &str = "source";
    pub const SOURCE_ID: &str = "source_id";
    pub const BOOK_TITLE: &str = "book_title";
    pub const AUTHORS: &str = "authors";
    pub const LANGUAGE: &str = "language";
    pub const DOMAIN: &str = "domain";
    pub const INGESTED_AT: &str = "ingested_at";
    pub const INGEST_VERSION: &str = "ingest_version";
    pub const CHUNKING_STRATEGY: &str = "chunking_strategy";
    pub const EMBEDDING_MODEL: &str = "embedding_model";
    pub const SECTION_NAME: &str = "section_name";
    pub const SECTION_INDEX: &str = "section_index";
    pub const CHILD_COUNT: &str = "child_count";
    pub const TEXT: &str = "text";
    pub const FULL_TEXT: &str = "full_text";
    pub const PARENT_ID: &str = "parent_id";
    pub const SEQUENCE_INDEX: &str = "sequence_index";
    pub const SIBLING_COUNT: &str = "sibling_count";
    pub const SENTENCE_RANGE: &str = "sentence_range";
    pub const WORD_COUNT: &str = "word_count";
}

/// Chunk level discriminator values.
pub const LEVEL_PARENT: &str = "parent";
pub const LEVEL_CHILD: &str = "child";

/// Book identity carried on every chunk. Read from the external catalog,
/// never owned or mutated by the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BookIdentity {
    /// Catalog name, e.g. `calibre`.
    pub source: String,
    /// Stable integer id within the catalog.
    pub source_id: i64,
    pub title: String,
    /// Ordered author list.
    pub authors: Vec<String>,
    /// BCP-47-ish language tag as the catalog records it.
    pub language: String,
    /// Free-form domain tag used for retrieval filtering and threshold tuning.
    pub domain: String,
}

/// Provenance fields stamped identically on every chunk of one ingest run.
#[derive(Debug, Clone)]
pub struct ChunkProvenance {
    pub ingested_at: DateTime<Utc>,
    pub ingest_version: String,
    pub chunking_strategy: String,
    pub embedding_model: String,
}

/// A top-level section chunk.
#[derive(Debug, Clone)]
pub struct ParentChunk {
    pub id: Uuid,
    pub book: BookIdentity,
    pub provenance: ChunkProvenance,
    pub section_name: String,
    /// 0-based position within the book; contiguous.
    pub section_index: usize,
    /// Number of children referencing this parent. Set after child creation.
    pub child_count: usize,
    /// Text actually embedded (may be truncated to the model's input cap).
    pub embedding_text: String,
    /// Untruncated section text, used at retrieval time. `None` when
    /// `parent_store_full_text` is off.
    pub full_text: Option<String>,
    /// Consumer-compatibility metadata, forwarded verbatim.
    pub extra: Map<String, Value>,
}

/// A semantically-bounded sub-chunk of one parent.
#[derive(Debug, Clone)]
pub struct ChildChunk {
    pub id: Uuid,
    pub book: BookIdentity,
    pub provenance: ChunkProvenance,
    /// Owning parent; resolvable in the same collection (invariant).
    pub parent_id: Uuid,
    /// Copied from the parent.
    pub section_name: String,
    /// 0-based position within the parent; contiguous 0..sibling_count.
    pub sequence_index: usize,
    /// Equals the parent's `child_count`.
    pub sibling_count: usize,
    /// Inclusive sentence index span within the parent text, when known.
    pub sentence_range: Option<(usize, usize)>,
    pub word_count: usize,
    pub text: String,
    pub extra: Map<String, Value>,
}

fn envelope(
    payload: &mut Map<String, Value>,
    level: &str,
    book: &BookIdentity,
    provenance: &ChunkProvenance,
    extra: &Map<String, Value>,
) {
    // Consumer metadata first, so schema fields win on key collisions.
    for (k, v) in extra {
        payload.insert(k.clone(), v.clone());
    }
    payload.insert(keys::CHUNK_LEVEL.into(), json!(level));
    payload.insert(keys::SOURCE.into(), json!(book.source));
    payload.insert(keys::SOURCE_ID.into(), json!(book.source_id.to_string()));
    payload.insert(keys::BOOK_TITLE.into(), json!(book.title));
    payload.insert(keys::AUTHORS.into(), json!(book.authors));
    payload.insert(keys::LANGUAGE.into(), json!(book.language));
    payload.insert(keys::DOMAIN.into(), json!(book.domain));
    payload.insert(
        keys::INGESTED_AT.into(),
        json!(provenance.ingested_at.to_rfc3339()),
    );
    payload.insert(keys::INGEST_VERSION.into(), json!(provenance.ingest_version));
    payload.insert(
        keys::CHUNKING_STRATEGY.into(),
        json!(provenance.chunking_strategy),
    );
    payload.insert(
        keys::EMBEDDING_MODEL.into(),
        json!(provenance.embedding_model),
    );
}

impl ParentChunk {
    /// Serialize into the stored payload map.
    pub fn payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        envelope(
            &mut payload,
            LEVEL_PARENT,
            &self.book,
            &self.provenance,
            &self.extra,
        );
        payload.insert(keys::SECTION_NAME.into(), json!(self.section_name));
        payload.insert(keys::SECTION_INDEX.into(), json!(self.section_index));
        payload.insert(keys::CHILD_COUNT.into(), json!(self.child_count));
        payload.insert(keys::TEXT.into(), json!(self.embedding_text));
        if let Some(full) = &self.full_text {
            payload.insert(keys::FULL_TEXT.into(), json!(full));
        }
        payload
    }
}

impl ChildChunk {
    /// Serialize into the stored payload map.
    pub fn payload(&self) -> Map<String, Value> {
        let mut payload = Map::new();
        envelope(
            &mut payload,
            LEVEL_CHILD,
            &self.book,
            &self.provenance,
            &self.extra,
        );
        payload.insert(keys::PARENT_ID.into(), json!(self.parent_id.to_string()));
        payload.insert(keys::SECTION_NAME.into(), json!(self.section_name));
        payload.insert(keys::SEQUENCE_INDEX.into(), json!(self.sequence_index));
        payload.insert(keys::SIBLING_COUNT.into(), json!(self.sibling_count));
        if let Some((start, end)) = self.sentence_range {
            payload.insert(keys::SENTENCE_RANGE.into(), json!([start, end]));
        }
        payload.insert(keys::WORD_COUNT.into(), json!(self.word_count));
        payload.insert(keys::TEXT.into(), json!(self.text));
        payload
    }
}

// ---------------------------------------------------------------------------
// Lenient payload accessors
//
// Retrieval reads stored payloads through these instead of strict structs:
// legacy collections may lack hierarchy fields, and that must degrade, not
// error.
// ---------------------------------------------------------------------------

pub fn str_field<'a>(payload: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    payload.get(key).and_then(Value::as_str)
}

pub fn u64_field(payload: &Map<String, Value>, key: &str) -> Option<u64> {
    payload.get(key).and_then(Value::as_u64)
}

pub fn uuid_field(payload: &Map<String, Value>, key: &str) -> Option<Uuid> {
    str_field(payload, key).and_then(|s| Uuid::parse_str(s).ok())
}

/// `source_id` tolerates both the string encoding alexandria writes and the
/// numeric encoding older tools may have used.
pub fn source_id_field(payload: &Map<String, Value>) -> Option<i64> {
    match payload.get(keys::SOURCE_ID) {
        Some(Value::String(s)) => s.parse().ok(),
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    }
}
