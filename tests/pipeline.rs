//! End-to-end pipeline tests: ingest real files from disk into the in-memory
//! store, then retrieve against them. These exercise the same code paths a
//! Qdrant deployment uses, minus the wire.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use alexandria::chunk::{BookIdentity, keys, str_field, uuid_field};
use alexandria::config::AlexandriaConfig;
use alexandria::embed::HashEmbedder;
use alexandria::events::{EventLog, EventType};
use alexandria::ingest::{BookDescriptor, Ingestor};
use alexandria::manifest::ManifestRegistry;
use alexandria::retrieval::{ContextMode, RetrievalEngine, RetrievalRequest};
use alexandria::store::{Filter, MemoryStore, VectorStore};

struct World {
    store: Arc<MemoryStore>,
    embedder: Arc<HashEmbedder>,
    ingestor: Ingestor,
    manifests: Arc<ManifestRegistry>,
    events: Arc<EventLog>,
    dir: tempfile::TempDir,
}

fn world() -> World {
    let dir = tempfile::TempDir::new().unwrap();
    let store = Arc::new(MemoryStore::new());
    let embedder = Arc::new(HashEmbedder::default());
    let mut config = AlexandriaConfig::default();
    config.state_dir = dir.path().to_path_buf();
    // Fixture-sized chunks: real defaults assume book-length chapters.
    config.chunker.min_chunk_size = 15;
    config.chunker.max_chunk_size = 50;
    config.chapter_fallback_token_count = 400;
    config.chapter_min_size_tokens = 40;

    let manifests = Arc::new(ManifestRegistry::new(dir.path()));
    let events = Arc::new(EventLog::new(store.clone() as Arc<dyn VectorStore>));
    let ingestor = Ingestor::new(
        store.clone() as Arc<dyn VectorStore>,
        embedder.clone(),
        config,
        manifests.clone(),
        events.clone(),
    );
    World {
        store,
        embedder,
        ingestor,
        manifests,
        events,
        dir,
    }
}

fn book(source_id: i64) -> BookIdentity {
    BookIdentity {
        source: "calibre".into(),
        source_id,
        title: format!("Fixture {source_id}"),
        authors: vec!["Fixture Author".into()],
        language: "en".into(),
        domain: "fiction".into(),
    }
}

/// A markdown book with `chapters` h1-marked chapters of distinct prose.
fn write_chaptered_book(dir: &Path, chapters: usize) -> PathBuf {
    let topics = [
        "harbors ships tides sailors voyages storms",
        "orchards apples harvest cider autumn frost",
        "mountains climbers ridges summits glaciers avalanches",
        "libraries scrolls scribes archives manuscripts bindings",
        "deserts caravans oases dunes nomads mirages",
        "forges anvils smiths embers bellows ingots",
        "rivers ferries bridges currents deltas floods",
        "comets orbits telescopes eclipses nebulae astronomers",
        "gardens beehives pollen blossoms trellises greenhouses",
        "railways engines stations signals timetables conductors",
    ];
    let mut text = String::new();
    for ch in 0..chapters {
        let topic = topics[ch % topics.len()];
        text.push_str(&format!("# Chapter {}\n\n", ch + 1));
        for s in 0..10 {
            text.push_str(&format!(
                "Sentence {s} dwells at length upon {topic} with measured patience. "
            ));
        }
        text.push_str("\n\n");
    }
    let path = dir.join("chaptered.md");
    std::fs::write(&path, text).unwrap();
    path
}

/// A flat text file with no structure at all, for fallback detection.
fn write_flat_book(dir: &Path) -> PathBuf {
    let mut text = String::new();
    for p in 0..30 {
        for s in 0..4 {
            text.push_str(&format!(
                "Paragraph {p} sentence {s} continues the unbroken flow of plain narration. "
            ));
        }
        text.push_str("\n\n");
    }
    let path = dir.join("flat.txt");
    std::fs::write(&path, text).unwrap();
    path
}

#[test]
fn chaptered_ingest_builds_resolvable_hierarchy() {
    let w = world();
    let path = write_chaptered_book(w.dir.path(), 10);
    let outcome = w
        .ingestor
        .ingest_book(&BookDescriptor::new(book(1), path, "books"))
        .unwrap();

    assert_eq!(outcome.parent_count, 10);
    assert!(outcome.child_count >= 10);

    // Every stored child resolves to a stored parent.
    let children = w
        .store
        .scroll(
            "books",
            &Filter::new().match_str(keys::CHUNK_LEVEL, "child"),
            100_000,
        )
        .unwrap();
    assert_eq!(children.len(), outcome.child_count);
    for child in &children {
        let parent_id = uuid_field(&child.payload, keys::PARENT_ID).unwrap();
        let fetched = w.store.retrieve("books", &[parent_id]).unwrap();
        assert_eq!(fetched.len(), 1, "dangling parent_id");
    }

    // Manifest recorded the one book with matching counts.
    let handle = w.manifests.for_collection("books").unwrap();
    let manifest = handle.lock().unwrap();
    assert_eq!(manifest.len(), 1);
    let entry = manifest.get("calibre", 1).unwrap();
    assert_eq!(entry.parent_count, 10);
    assert_eq!(entry.child_count, outcome.child_count);
}

#[test]
fn flat_book_falls_back_to_sized_sections() {
    let w = world();
    let path = write_flat_book(w.dir.path());
    let outcome = w
        .ingestor
        .ingest_book(&BookDescriptor::new(book(2), path, "books"))
        .unwrap();

    assert_eq!(outcome.chapter_strategy.id(), "fallback");
    assert!(outcome.parent_count >= 2, "threshold must cut the flat text");

    // Every parent has at least one child.
    let parents = w
        .store
        .scroll(
            "books",
            &Filter::new().match_str(keys::CHUNK_LEVEL, "parent"),
            100_000,
        )
        .unwrap();
    for parent in &parents {
        let children = w
            .store
            .scroll(
                "books",
                &Filter::new().match_str(keys::PARENT_ID, parent.id.to_string()),
                100,
            )
            .unwrap();
        assert!(!children.is_empty());
        assert!(
            str_field(&parent.payload, keys::SECTION_NAME)
                .unwrap()
                .starts_with("Section ")
        );
    }
}

#[test]
fn contextual_query_includes_children_and_parents_within_budget() {
    let w = world();
    let path = write_chaptered_book(w.dir.path(), 10);
    w.ingestor
        .ingest_book(&BookDescriptor::new(book(1), path, "books"))
        .unwrap();

    let engine = RetrievalEngine::new(
        w.store.clone() as Arc<dyn VectorStore>,
        w.embedder.clone(),
    );
    let mut request = RetrievalRequest::new(
        "why do the climbers cross the glaciers toward the summits?",
        "books",
    );
    request.threshold = 0.05;
    let result = engine.retrieve(&request).unwrap();

    assert!(!result.children.is_empty());
    assert!(result.children.iter().all(|c| c.score >= 0.05));
    assert!(!result.parents.is_empty());
    assert!(!result.stats.fallback_used);
    assert!(result.total_context_tokens <= request.max_context_tokens);

    // Matched child texts appear verbatim.
    for child in &result.children {
        let text = str_field(&child.payload, keys::TEXT).unwrap();
        assert!(result.assembled_context.contains(text));
    }
    // One parent payload per distinct parent_id of the matches.
    let distinct: std::collections::BTreeSet<_> = result
        .children
        .iter()
        .filter_map(|c| uuid_field(&c.payload, keys::PARENT_ID))
        .collect();
    assert_eq!(result.parents.len(), distinct.len());
}

#[test]
fn comprehensive_query_attaches_ordered_siblings() {
    let w = world();
    let path = write_chaptered_book(w.dir.path(), 6);
    w.ingestor
        .ingest_book(&BookDescriptor::new(book(1), path, "books"))
        .unwrap();

    let engine = RetrievalEngine::new(
        w.store.clone() as Arc<dyn VectorStore>,
        w.embedder.clone(),
    );
    let mut request = RetrievalRequest::new("forges anvils embers smiths ingots", "books");
    request.threshold = 0.05;
    request.context_mode = ContextMode::Comprehensive;
    let result = engine.retrieve(&request).unwrap();

    assert!(!result.children.is_empty());
    for (child_id, neighborhood) in &result.siblings {
        // The matched chunk never appears in its own sibling list.
        assert!(neighborhood.iter().all(|payload| {
            str_field(payload, keys::TEXT)
                != result
                    .children
                    .iter()
                    .find(|c| c.id == *child_id)
                    .and_then(|c| str_field(&c.payload, keys::TEXT))
        }));
    }
}

#[test]
fn reingest_is_idempotent_end_to_end() {
    let w = world();
    let path = write_chaptered_book(w.dir.path(), 4);
    let descriptor = BookDescriptor::new(book(1), path, "books");

    w.ingestor.ingest_book(&descriptor).unwrap();
    let before = w.store.stats("books").unwrap().points;

    w.ingestor.ingest_book(&descriptor).unwrap();
    let after = w.store.stats("books").unwrap().points;
    assert_eq!(before, after);

    // No orphans: every child still resolves.
    let children = w
        .store
        .scroll(
            "books",
            &Filter::new().match_str(keys::CHUNK_LEVEL, "child"),
            100_000,
        )
        .unwrap();
    for child in &children {
        let parent_id = uuid_field(&child.payload, keys::PARENT_ID).unwrap();
        assert_eq!(w.store.retrieve("books", &[parent_id]).unwrap().len(), 1);
    }

    let handle = w.manifests.for_collection("books").unwrap();
    assert_eq!(handle.lock().unwrap().len(), 1);
}

#[test]
fn batch_reports_failures_and_events() {
    let w = world();
    let good = write_chaptered_book(w.dir.path(), 3);
    let missing = w.dir.path().join("ghost.epub");

    let descriptors = vec![
        BookDescriptor::new(book(1), good, "books"),
        BookDescriptor::new(book(2), missing, "books"),
    ];
    let report = w.ingestor.ingest_batch(&descriptors, false);
    assert_eq!(report.processed, 1);
    assert_eq!(report.failed, 1);

    let errors = w.events.recent(10, Some(EventType::IngestError)).unwrap();
    assert_eq!(errors.len(), 1);
    assert_eq!(errors[0].source_id, 2);

    let completes = w
        .events
        .recent(10, Some(EventType::IngestComplete))
        .unwrap();
    assert_eq!(completes.len(), 1);
    assert!(completes[0].timings.is_some());
}
