//! Hierarchical retrieval: child search, parent/sibling expansion, and
//! budgeted context assembly.
//!
//! Children are what the vector search actually matches; parents contribute
//! the surrounding chapter text and siblings the adjacent passages. The
//! assembled context never exceeds its token budget: matched children get up
//! to 40% (dropped lowest-score-first only if they alone overflow it),
//! parents 40% (truncated with a visible marker rather than dropped), and
//! siblings the remaining 20% (whole neighborhoods dropped lowest-score
//! first). Missing parents are never an error: affected children degrade to
//! precise behavior and the result is flagged `fallback_used`.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::chunk::{keys, source_id_field, str_field, u64_field, uuid_field};
use crate::embed::Embedder;
use crate::error::{RetrievalError, RetrieveResult, StoreError};
use crate::sentences::estimate_tokens;
use crate::store::{Filter, ScoredPoint, VectorStore};

/// How much surrounding context to attach to matched children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ContextMode {
    /// Matched children only.
    Precise,
    /// Children plus their parent chapters.
    #[default]
    Contextual,
    /// Children, parents, and sibling passages.
    Comprehensive,
}

/// Sibling neighborhoods are fetched for at most this many top children.
const SIBLING_NEIGHBORHOODS: usize = 3;

/// Budget shares, in percent.
const CHILD_SHARE: usize = 40;
const PARENT_SHARE: usize = 40;
const SIBLING_SHARE: usize = 20;

/// Retrieval request. `new` fills the documented defaults.
#[derive(Debug, Clone)]
pub struct RetrievalRequest {
    pub query: String,
    pub collection: String,
    pub limit: usize,
    pub domain_filter: Option<String>,
    /// Minimum retained similarity score.
    pub threshold: f32,
    pub context_mode: ContextMode,
    pub sibling_window: usize,
    pub max_context_tokens: usize,
    /// Oversampling factor on child search to allow post-filtering.
    pub fetch_multiplier: usize,
    pub language_filter: Option<String>,
}

impl RetrievalRequest {
    pub fn new(query: impl Into<String>, collection: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            collection: collection.into(),
            limit: 5,
            domain_filter: None,
            threshold: 0.3,
            context_mode: ContextMode::default(),
            sibling_window: 2,
            max_context_tokens: 12_000,
            fetch_multiplier: 3,
            language_filter: None,
        }
    }
}

/// Timing and degradation counters.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct RetrievalStats {
    pub parents_fetched: usize,
    pub siblings_fetched: usize,
    pub fallback_used: bool,
    pub child_search_ms: u64,
    pub parent_fetch_ms: u64,
    pub sibling_fetch_ms: u64,
    pub total_ms: u64,
}

/// Retrieval output.
#[derive(Debug, Clone, Default)]
pub struct RetrievalResult {
    pub query: String,
    /// Matched children, best first.
    pub children: Vec<ScoredPoint>,
    /// Parent payloads keyed by parent id.
    pub parents: BTreeMap<Uuid, Map<String, Value>>,
    /// Sibling payloads keyed by the matched child they neighbor, ordered by
    /// `sequence_index`.
    pub siblings: BTreeMap<Uuid, Vec<Map<String, Value>>>,
    pub assembled_context: String,
    pub total_context_tokens: usize,
    pub stats: RetrievalStats,
}

/// The retrieval engine: a store plus an embedder.
pub struct RetrievalEngine {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
}

impl std::fmt::Debug for RetrievalEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalEngine").finish_non_exhaustive()
    }
}

impl RetrievalEngine {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn Embedder>) -> Self {
        Self { store, embedder }
    }

    /// Run one retrieval. An empty query is an empty result, not an error.
    pub fn retrieve(&self, request: &RetrievalRequest) -> RetrieveResult<RetrievalResult> {
        let started = Instant::now();

        if request.query.trim().is_empty() {
            return Ok(RetrievalResult {
                query: request.query.clone(),
                ..Default::default()
            });
        }

        if !self.store.collection_exists(&request.collection)? {
            return Err(RetrievalError::UnknownCollection {
                collection: request.collection.clone(),
            });
        }

        let query_vector = self
            .embedder
            .embed_batch(std::slice::from_ref(&request.query))
            .map_err(|e| RetrievalError::EmbeddingUnavailable {
                message: e.to_string(),
            })?
            .into_iter()
            .next()
            .ok_or_else(|| RetrievalError::EmbeddingUnavailable {
                message: "embedder returned no vector for the query".into(),
            })?;

        let mut stats = RetrievalStats::default();

        // Child search with oversampling, then threshold + tie-break + cut.
        let search_started = Instant::now();
        let mut filter = Filter::new().match_str(keys::CHUNK_LEVEL, crate::chunk::LEVEL_CHILD);
        if let Some(domain) = &request.domain_filter {
            filter = filter.match_str(keys::DOMAIN, domain.clone());
        }
        if let Some(language) = &request.language_filter {
            filter = filter.match_str(keys::LANGUAGE, language.clone());
        }
        let oversampled = self.store.search(
            &request.collection,
            &query_vector,
            &filter,
            request.limit * request.fetch_multiplier.max(1),
        )?;
        stats.child_search_ms = search_started.elapsed().as_millis() as u64;

        let mut children: Vec<ScoredPoint> = oversampled
            .into_iter()
            .filter(|hit| hit.score >= request.threshold)
            .collect();
        children.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| tie_key(&a.payload).cmp(&tie_key(&b.payload)))
        });
        children.truncate(request.limit);

        let mut result = RetrievalResult {
            query: request.query.clone(),
            children,
            ..Default::default()
        };

        if request.context_mode != ContextMode::Precise && !result.children.is_empty() {
            self.fetch_parents(request, &mut result, &mut stats);
        }
        if request.context_mode == ContextMode::Comprehensive && !result.children.is_empty() {
            self.fetch_siblings(request, &mut result, &mut stats);
        }

        result.assembled_context = assemble_context(&result, request.max_context_tokens);
        result.total_context_tokens = estimate_tokens(&result.assembled_context);
        stats.total_ms = started.elapsed().as_millis() as u64;
        result.stats = stats;
        Ok(result)
    }

    /// Fetch distinct parents of the matched children. Children without a
    /// resolvable parent degrade silently; the result is flagged instead.
    fn fetch_parents(
        &self,
        request: &RetrievalRequest,
        result: &mut RetrievalResult,
        stats: &mut RetrievalStats,
    ) {
        let fetch_started = Instant::now();

        let mut parent_ids: Vec<Uuid> = Vec::new();
        for child in &result.children {
            match uuid_field(&child.payload, keys::PARENT_ID) {
                Some(pid) if !parent_ids.contains(&pid) => parent_ids.push(pid),
                Some(_) => {}
                // Legacy chunk without hierarchy fields.
                None => stats.fallback_used = true,
            }
        }
        if parent_ids.is_empty() {
            stats.parent_fetch_ms = fetch_started.elapsed().as_millis() as u64;
            return;
        }

        match self.store.retrieve(&request.collection, &parent_ids) {
            Ok(points) => {
                for point in points {
                    result.parents.insert(point.id, point.payload);
                }
                if result.parents.len() < parent_ids.len() {
                    stats.fallback_used = true;
                }
            }
            Err(err) => {
                tracing::warn!(
                    collection = %request.collection,
                    error = %err,
                    "parent fetch failed; degrading to precise results"
                );
                stats.fallback_used = true;
            }
        }
        stats.parents_fetched = result.parents.len();
        stats.parent_fetch_ms = fetch_started.elapsed().as_millis() as u64;
    }

    /// Fetch sibling neighborhoods for the top children. A store timeout here
    /// produces a partial result, never an error.
    fn fetch_siblings(
        &self,
        request: &RetrievalRequest,
        result: &mut RetrievalResult,
        stats: &mut RetrievalStats,
    ) {
        let fetch_started = Instant::now();
        let top_k = result.children.len().min(SIBLING_NEIGHBORHOODS);

        for child in result.children.iter().take(top_k) {
            let Some(parent_id) = uuid_field(&child.payload, keys::PARENT_ID) else {
                continue;
            };
            let Some(seq) = u64_field(&child.payload, keys::SEQUENCE_INDEX) else {
                continue;
            };
            let sibling_count = u64_field(&child.payload, keys::SIBLING_COUNT).unwrap_or(0);
            if sibling_count == 0 {
                continue;
            }

            let window = request.sibling_window as u64;
            let low = seq.saturating_sub(window) as i64;
            let high = (seq + window).min(sibling_count - 1) as i64;

            let filter = Filter::new()
                .match_str(keys::PARENT_ID, parent_id.to_string())
                .range(keys::SEQUENCE_INDEX, Some(low), Some(high));

            match self.store.scroll(
                &request.collection,
                &filter,
                (2 * request.sibling_window + 1).max(2),
            ) {
                Ok(points) => {
                    let mut neighborhood: Vec<Map<String, Value>> = points
                        .into_iter()
                        .filter(|p| p.id != child.id)
                        .map(|p| p.payload)
                        .collect();
                    neighborhood.sort_by_key(|payload| {
                        (
                            u64_field(payload, keys::SEQUENCE_INDEX).unwrap_or(u64::MAX),
                            str_field(payload, keys::TEXT).map(str::to_string),
                        )
                    });
                    stats.siblings_fetched += neighborhood.len();
                    if !neighborhood.is_empty() {
                        result.siblings.insert(child.id, neighborhood);
                    }
                }
                Err(StoreError::Timeout { .. }) | Err(StoreError::Unreachable { .. }) => {
                    tracing::warn!(
                        collection = %request.collection,
                        "sibling fetch timed out; returning partial result"
                    );
                    stats.fallback_used = true;
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "sibling fetch failed");
                    stats.fallback_used = true;
                }
            }
        }
        stats.sibling_fetch_ms = fetch_started.elapsed().as_millis() as u64;
    }
}

/// Sort key for equal-score children: `(source, source_id, sequence_index)`.
fn tie_key(payload: &Map<String, Value>) -> (String, i64, u64) {
    (
        str_field(payload, keys::SOURCE).unwrap_or_default().to_string(),
        source_id_field(payload).unwrap_or(i64::MAX),
        u64_field(payload, keys::SEQUENCE_INDEX).unwrap_or(u64::MAX),
    )
}

// ---------------------------------------------------------------------------
// Context assembly
// ---------------------------------------------------------------------------

fn label(payload: &Map<String, Value>) -> String {
    let title = str_field(payload, keys::BOOK_TITLE).unwrap_or("unknown book");
    let section = str_field(payload, keys::SECTION_NAME).unwrap_or("");
    if section.is_empty() {
        title.to_string()
    } else {
        format!("{title} — {section}")
    }
}

/// Truncate to roughly `max_tokens`, appending a visible marker.
fn truncate_to_tokens(text: &str, max_tokens: usize) -> String {
    let max_words = max_tokens * 3 / 4;
    let words: Vec<&str> = text.split_whitespace().collect();
    if words.len() <= max_words {
        return text.to_string();
    }
    let mut out = words[..max_words].join(" ");
    out.push_str(" [truncated]");
    out
}

/// Build the prioritized context string under the token budget.
fn assemble_context(result: &RetrievalResult, max_context_tokens: usize) -> String {
    if result.children.is_empty() {
        return String::new();
    }

    let child_budget = max_context_tokens * CHILD_SHARE / 100;
    let parent_budget = max_context_tokens * PARENT_SHARE / 100;
    let sibling_budget = max_context_tokens * SIBLING_SHARE / 100;

    let mut out = String::new();

    // Matched children, verbatim. Only if they alone overflow their share do
    // the lowest-scored drop.
    let mut child_blocks: Vec<(usize, String)> = result
        .children
        .iter()
        .enumerate()
        .map(|(rank, child)| {
            let text = str_field(&child.payload, keys::TEXT).unwrap_or("");
            let block = format!(
                "[{}] {} (score {:.2})\n{}\n\n",
                rank + 1,
                label(&child.payload),
                child.score,
                text
            );
            (rank, block)
        })
        .collect();
    let child_header = "=== MATCHED PASSAGES ===\n\n";
    loop {
        let used: usize = estimate_tokens(child_header)
            + child_blocks
                .iter()
                .map(|(_, b)| estimate_tokens(b))
                .sum::<usize>();
        if used <= child_budget || child_blocks.len() <= 1 {
            break;
        }
        // children are rank-ordered best first; the last block is lowest-scored
        child_blocks.pop();
    }
    out.push_str(child_header);
    for (_, block) in &child_blocks {
        out.push_str(block);
    }

    // Parents, ordered by their best child's rank, truncated to fit.
    if !result.parents.is_empty() {
        let mut ordered: Vec<Uuid> = Vec::new();
        for child in &result.children {
            if let Some(pid) = uuid_field(&child.payload, keys::PARENT_ID) {
                if result.parents.contains_key(&pid) && !ordered.contains(&pid) {
                    ordered.push(pid);
                }
            }
        }

        let mut section = String::from("=== PARENT CONTEXT ===\n\n");
        let mut used = estimate_tokens(&section);
        let mut wrote_any = false;
        for pid in ordered {
            let payload = &result.parents[&pid];
            let text = str_field(payload, keys::FULL_TEXT)
                .or_else(|| str_field(payload, keys::TEXT))
                .unwrap_or("");
            if text.is_empty() {
                continue;
            }
            let remaining = parent_budget.saturating_sub(used);
            // A sliver of budget is not worth a fragment of a chapter.
            if remaining < 30 {
                break;
            }
            let header = format!("{}\n", label(payload));
            let header_tokens = estimate_tokens(&header);
            let body = truncate_to_tokens(text, remaining.saturating_sub(header_tokens));
            used += header_tokens + estimate_tokens(&body) + 1;
            section.push_str(&header);
            section.push_str(&body);
            section.push_str("\n\n");
            wrote_any = true;
        }
        if wrote_any {
            out.push_str(&section);
        }
    }

    // Siblings, whole neighborhoods, best-scored child's neighborhood first.
    if !result.siblings.is_empty() {
        let mut section = String::from("=== NEIGHBORING PASSAGES ===\n\n");
        let mut used = estimate_tokens(&section);
        let mut wrote_any = false;
        'neighborhoods: for child in &result.children {
            let Some(neighborhood) = result.siblings.get(&child.id) else {
                continue;
            };
            for sibling in neighborhood {
                let text = str_field(sibling, keys::TEXT).unwrap_or("");
                if text.is_empty() {
                    continue;
                }
                let block = format!("{}\n{}\n\n", label(sibling), text);
                let block_tokens = estimate_tokens(&block);
                if used + block_tokens > sibling_budget {
                    break 'neighborhoods;
                }
                used += block_tokens;
                section.push_str(&block);
                wrote_any = true;
            }
        }
        if wrote_any {
            out.push_str(&section);
        }
    }

    out.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunk::{
        BookIdentity, ChildChunk, ChunkProvenance, LEVEL_CHILD, ParentChunk,
    };
    use crate::embed::{Embedder, HashEmbedder};
    use crate::store::{MemoryStore, PointRecord, VectorStore};
    use chrono::Utc;

    fn book() -> BookIdentity {
        BookIdentity {
            source: "calibre".into(),
            source_id: 1,
            title: "Voyages".into(),
            authors: vec!["I. Marin".into()],
            language: "en".into(),
            domain: "travel".into(),
        }
    }

    fn provenance() -> ChunkProvenance {
        ChunkProvenance {
            ingested_at: Utc::now(),
            ingest_version: "0.2.1".into(),
            chunking_strategy: "universal-semantic".into(),
            embedding_model: "hash-embedder".into(),
        }
    }

    /// Store one parent with `texts.len()` children, returning the child ids.
    fn seed(
        store: &MemoryStore,
        embedder: &HashEmbedder,
        collection: &str,
        parent_text: &str,
        texts: &[&str],
    ) -> (Uuid, Vec<Uuid>) {
        store
            .ensure_collection(collection, embedder.dimension())
            .unwrap();
        let parent_id = Uuid::new_v4();
        let parent = ParentChunk {
            id: parent_id,
            book: book(),
            provenance: provenance(),
            section_name: "Chapter 1".into(),
            section_index: 0,
            child_count: texts.len(),
            embedding_text: parent_text.into(),
            full_text: Some(parent_text.to_string()),
            extra: Map::new(),
        };
        let vectors = embedder
            .embed_batch(&[parent_text.to_string()])
            .unwrap();
        store
            .upsert(
                collection,
                &[PointRecord {
                    id: parent_id,
                    vector: vectors[0].clone(),
                    payload: parent.payload(),
                }],
            )
            .unwrap();

        let mut child_ids = Vec::new();
        let texts_owned: Vec<String> = texts.iter().map(|t| t.to_string()).collect();
        let child_vectors = embedder.embed_batch(&texts_owned).unwrap();
        let points: Vec<PointRecord> = texts
            .iter()
            .enumerate()
            .map(|(i, text)| {
                let child = ChildChunk {
                    id: Uuid::new_v4(),
                    book: book(),
                    provenance: provenance(),
                    parent_id,
                    section_name: "Chapter 1".into(),
                    sequence_index: i,
                    sibling_count: texts.len(),
                    sentence_range: None,
                    word_count: text.split_whitespace().count(),
                    text: text.to_string(),
                    extra: Map::new(),
                };
                child_ids.push(child.id);
                PointRecord {
                    id: child.id,
                    vector: child_vectors[i].clone(),
                    payload: child.payload(),
                }
            })
            .collect();
        store.upsert(collection, &points).unwrap();
        (parent_id, child_ids)
    }

    fn engine(store: MemoryStore) -> RetrievalEngine {
        RetrievalEngine::new(Arc::new(store), Arc::new(HashEmbedder::default()))
    }

    #[test]
    fn empty_query_is_empty_result() {
        let engine = engine(MemoryStore::new());
        let result = engine
            .retrieve(&RetrievalRequest::new("   ", "books"))
            .unwrap();
        assert!(result.children.is_empty());
        assert!(result.assembled_context.is_empty());
    }

    #[test]
    fn unknown_collection_is_typed() {
        let engine = engine(MemoryStore::new());
        let err = engine
            .retrieve(&RetrievalRequest::new("ships", "missing"))
            .unwrap_err();
        assert!(matches!(err, RetrievalError::UnknownCollection { .. }));
    }

    #[test]
    fn no_match_above_threshold_is_empty_not_error() {
        let store = MemoryStore::new();
        let embedder = HashEmbedder::default();
        seed(
            &store,
            &embedder,
            "books",
            "chapter about cooking",
            &["simmer the broth gently", "season the stew with thyme"],
        );
        let mut request = RetrievalRequest::new("zzqy xkcd vvvv", "books");
        request.threshold = 0.99;
        let result = engine(store).retrieve(&request).unwrap();
        assert!(result.children.is_empty());
        assert!(result.assembled_context.is_empty());
        assert!(!result.stats.fallback_used);
    }

    #[test]
    fn precise_and_contextual_match_same_children() {
        let store = MemoryStore::new();
        let embedder = HashEmbedder::default();
        seed(
            &store,
            &embedder,
            "books",
            "sailing the northern ocean",
            &[
                "ships sail across the ocean",
                "storms batter the hull at night",
                "the harbor welcomes weary sailors",
            ],
        );
        let engine = engine(store);

        let mut precise = RetrievalRequest::new("ocean ships sail", "books");
        precise.context_mode = ContextMode::Precise;
        precise.threshold = 0.0;
        let mut contextual = precise.clone();
        contextual.context_mode = ContextMode::Contextual;

        let a = engine.retrieve(&precise).unwrap();
        let b = engine.retrieve(&contextual).unwrap();
        let ids = |r: &RetrievalResult| r.children.iter().map(|c| c.id).collect::<Vec<_>>();
        assert_eq!(ids(&a), ids(&b));
        assert!(a.parents.is_empty());
        assert!(!b.parents.is_empty());
    }

    #[test]
    fn contextual_fetches_each_distinct_parent_once() {
        let store = MemoryStore::new();
        let embedder = HashEmbedder::default();
        let (parent_id, _) = seed(
            &store,
            &embedder,
            "books",
            "voyage chapter text",
            &[
                "the voyage begins at dawn",
                "the voyage continues through fog",
            ],
        );
        let mut request = RetrievalRequest::new("voyage fog dawn", "books");
        request.threshold = 0.0;
        let result = engine(store).retrieve(&request).unwrap();
        assert_eq!(result.children.len(), 2);
        assert_eq!(result.parents.len(), 1);
        assert!(result.parents.contains_key(&parent_id));
        assert!(!result.stats.fallback_used);
        assert!(result.assembled_context.contains("PARENT CONTEXT"));
    }

    #[test]
    fn comprehensive_sibling_window_excludes_self_and_sorts() {
        let store = MemoryStore::new();
        let embedder = HashEmbedder::default();
        let texts: Vec<String> = (0..12)
            .map(|i| {
                if i == 5 {
                    "lighthouse keepers guard the coastline".to_string()
                } else {
                    format!("filler passage number {i} about weather patterns")
                }
            })
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let (_, child_ids) = seed(&store, &embedder, "books", "coastal chapter", &refs);

        let mut request = RetrievalRequest::new("lighthouse keepers coastline guard", "books");
        request.threshold = 0.0;
        request.limit = 1;
        request.context_mode = ContextMode::Comprehensive;
        request.sibling_window = 2;

        let result = engine(store).retrieve(&request).unwrap();
        assert_eq!(result.children.len(), 1);
        let matched = result.children[0].id;
        assert_eq!(matched, child_ids[5]);

        let neighborhood = &result.siblings[&matched];
        let seqs: Vec<u64> = neighborhood
            .iter()
            .map(|p| u64_field(p, keys::SEQUENCE_INDEX).unwrap())
            .collect();
        assert_eq!(seqs, vec![3, 4, 6, 7]);
        assert!(result.assembled_context.contains("NEIGHBORING PASSAGES"));
    }

    #[test]
    fn sibling_window_clips_at_sequence_bounds() {
        let store = MemoryStore::new();
        let embedder = HashEmbedder::default();
        let texts: Vec<String> = (0..4)
            .map(|i| {
                if i == 0 {
                    "glaciers carve the fjord slowly".to_string()
                } else {
                    format!("padding sentence number {i} about geology")
                }
            })
            .collect();
        let refs: Vec<&str> = texts.iter().map(String::as_str).collect();
        let (_, child_ids) = seed(&store, &embedder, "books", "fjord chapter", &refs);

        let mut request = RetrievalRequest::new("glaciers carve fjord", "books");
        request.threshold = 0.0;
        request.limit = 1;
        request.context_mode = ContextMode::Comprehensive;

        let result = engine(store).retrieve(&request).unwrap();
        let neighborhood = &result.siblings[&child_ids[0]];
        let seqs: Vec<u64> = neighborhood
            .iter()
            .map(|p| u64_field(p, keys::SEQUENCE_INDEX).unwrap())
            .collect();
        assert_eq!(seqs, vec![1, 2]);
    }

    #[test]
    fn legacy_children_without_parent_fall_back() {
        let store = MemoryStore::new();
        let embedder = HashEmbedder::default();
        store.ensure_collection("legacy", embedder.dimension()).unwrap();
        // A bare chunk, as an older tool might have written it.
        let mut payload = Map::new();
        payload.insert(keys::CHUNK_LEVEL.into(), serde_json::json!(LEVEL_CHILD));
        payload.insert(keys::TEXT.into(), serde_json::json!("orphan passage about comets"));
        let vector = embedder
            .embed_batch(&["orphan passage about comets".to_string()])
            .unwrap();
        store
            .upsert(
                "legacy",
                &[PointRecord {
                    id: Uuid::new_v4(),
                    vector: vector[0].clone(),
                    payload,
                }],
            )
            .unwrap();

        let mut request = RetrievalRequest::new("comets passage orphan", "legacy");
        request.threshold = 0.0;
        let result = engine(store).retrieve(&request).unwrap();
        assert_eq!(result.children.len(), 1);
        assert!(result.parents.is_empty());
        assert!(result.stats.fallback_used);
    }

    #[test]
    fn context_respects_token_budget() {
        let store = MemoryStore::new();
        let embedder = HashEmbedder::default();
        let long_parent = vec!["parent prose rambles on and on"; 400].join(" ");
        seed(
            &store,
            &embedder,
            "books",
            &long_parent,
            &[
                "whales breach near the shore",
                "whales sing beneath the waves",
            ],
        );
        let mut request = RetrievalRequest::new("whales waves shore", "books");
        request.threshold = 0.0;
        request.max_context_tokens = 400;
        let result = engine(store).retrieve(&request).unwrap();

        assert!(result.total_context_tokens <= 400);
        assert!(result.assembled_context.contains("[truncated]"));
        // Matched children stay verbatim.
        assert!(result.assembled_context.contains("whales breach near the shore"));
        assert!(result.assembled_context.contains("whales sing beneath the waves"));
    }

    #[test]
    fn equal_scores_break_ties_by_book_order() {
        let store = MemoryStore::new();
        let embedder = HashEmbedder::default();
        seed(
            &store,
            &embedder,
            "books",
            "identical chapter",
            &[
                "echo echo echo",
                "echo echo echo",
            ],
        );
        let mut request = RetrievalRequest::new("echo echo echo", "books");
        request.threshold = 0.0;
        let result = engine(store).retrieve(&request).unwrap();
        assert_eq!(result.children.len(), 2);
        let seq = |p: &Map<String, Value>| u64_field(p, keys::SEQUENCE_INDEX).unwrap();
        assert!(seq(&result.children[0].payload) < seq(&result.children[1].payload));
    }
}
