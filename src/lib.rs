//! # alexandria
//!
//! Hierarchical retrieval-augmented generation core for book libraries:
//! ingest EPUB/PDF/TXT/MD/HTML books into a vector store as parent (chapter)
//! and child (semantic) chunks, then serve budgeted, context-enriched
//! retrieval over them.
//!
//! ## Architecture
//!
//! - **Extraction** (`extract`): format detection + per-format parsers
//! - **Chapter detection** (`chapters`): TOC → heading markers → fixed-size fallback
//! - **Semantic chunking** (`chunker`): cosine topic boundaries under size bounds
//! - **Embedding** (`embed`): fastembed ONNX models behind the `Embedder` trait
//! - **Vector store** (`store`): Qdrant REST adapter + in-memory twin
//! - **Ingestion** (`ingest`): per-book pipeline, batch worker pool, resume
//! - **Retrieval** (`retrieval`): child search → parent/sibling expansion →
//!   token-budgeted context assembly
//! - **Ledgers** (`manifest`, `events`): per-collection idempotency manifest
//!   and an append-only multi-host event log
//! - **Catalog** (`catalog`): read-only Calibre `metadata.db` adapter
//!
//! ## Library usage
//!
//! ```no_run
//! use std::sync::Arc;
//! use alexandria::chunk::BookIdentity;
//! use alexandria::config::AlexandriaConfig;
//! use alexandria::embed::HashEmbedder;
//! use alexandria::events::EventLog;
//! use alexandria::ingest::{BookDescriptor, Ingestor};
//! use alexandria::manifest::ManifestRegistry;
//! use alexandria::retrieval::{RetrievalEngine, RetrievalRequest};
//! use alexandria::store::{MemoryStore, VectorStore};
//!
//! let store: Arc<dyn VectorStore> = Arc::new(MemoryStore::new());
//! let embedder = Arc::new(HashEmbedder::default());
//! let config = AlexandriaConfig::default();
//! let manifests = Arc::new(ManifestRegistry::new(&config.state_dir));
//! let events = Arc::new(EventLog::new(store.clone()));
//!
//! let ingestor = Ingestor::new(store.clone(), embedder.clone(), config, manifests, events);
//! let book = BookIdentity {
//!     source: "calibre".into(),
//!     source_id: 7,
//!     title: "The Voyage Out".into(),
//!     authors: vec!["V. Woolf".into()],
//!     language: "en".into(),
//!     domain: "fiction".into(),
//! };
//! ingestor.ingest_book(&BookDescriptor::new(book, "/library/voyage.epub", "books")).unwrap();
//!
//! let engine = RetrievalEngine::new(store, embedder);
//! let result = engine.retrieve(&RetrievalRequest::new("why does Rachel leave?", "books")).unwrap();
//! println!("{}", result.assembled_context);
//! ```

pub mod catalog;
pub mod chapters;
pub mod chunk;
pub mod chunker;
pub mod config;
pub mod embed;
pub mod error;
pub mod events;
pub mod extract;
pub mod ingest;
pub mod manifest;
pub mod retrieval;
pub mod sentences;
pub mod store;
