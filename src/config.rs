//! Configuration for the alexandria core.
//!
//! Every recognized option is a typed field with the documented default.
//! Values load in three layers: built-in defaults, an optional TOML file,
//! then `ALEXANDRIA_*` environment overrides. A collection is bound to one
//! embedding model; changing `embedding_model` for an existing collection is
//! rejected at the store layer, not here.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::retrieval::ContextMode;

/// Chapter detection strategy selector (`auto` lets the ladder decide).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStrategyChoice {
    #[default]
    Auto,
    Toc,
    Headers,
    Fallback,
}

/// Semantic chunker parameters (see the chunker module for semantics).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkerParams {
    /// Cosine-similarity cutoff below which a chunk boundary becomes eligible.
    pub threshold: f32,
    /// Minimum buffer size in words before a semantic cut may fire.
    pub min_chunk_size: usize,
    /// Hard cap in words; forces a cut even when similarity stays high.
    pub max_chunk_size: usize,
}

impl Default for ChunkerParams {
    fn default() -> Self {
        Self {
            threshold: 0.55,
            min_chunk_size: 200,
            max_chunk_size: 1200,
        }
    }
}

/// Top-level configuration. All fields have serde defaults so a partial TOML
/// file only overrides what it names.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlexandriaConfig {
    /// Vector store endpoint.
    pub qdrant_host: String,
    pub qdrant_port: u16,
    /// Optional `api-key` header for the store.
    pub qdrant_api_key: Option<String>,

    /// Embedding model id; must stay constant for a collection.
    pub embedding_model: String,

    /// Master switch for parent/child hierarchy (flat child-only ingest when off).
    pub hierarchy_enabled: bool,
    /// Default retrieval mode when the caller does not specify one.
    pub hierarchy_default_mode: ContextMode,
    /// Sibling neighborhood distance in sequence_index for comprehensive mode.
    pub hierarchy_sibling_window: usize,
    /// Assembled-context token budget.
    pub hierarchy_max_context_tokens: usize,
    /// Cap on parent embedding input, in tokens.
    pub hierarchy_parent_max_tokens: usize,

    /// Chapter detection.
    pub chapter_detection_strategy: ChapterStrategyChoice,
    /// Fallback splitting: cut after roughly this many tokens.
    pub chapter_fallback_token_count: usize,
    /// Sections below this size merge into their predecessor.
    pub chapter_min_size_tokens: usize,

    /// Store the untruncated section text on parent payloads.
    pub parent_store_full_text: bool,

    /// Opaque version string stamped on every produced chunk.
    pub ingest_version: String,

    /// Semantic chunker defaults.
    pub chunker: ChunkerParams,
    /// Per-domain similarity-threshold overrides (single scalar per domain).
    pub domain_thresholds: BTreeMap<String, f32>,

    /// Batch ingest worker count; 0 means min(cpu_count, 4).
    pub batch_workers: usize,

    /// Directory for manifests and batch progress files.
    pub state_dir: PathBuf,

    /// Path to the library's metadata.db (read-only catalog), if any.
    pub catalog_db: Option<PathBuf>,
}

impl Default for AlexandriaConfig {
    fn default() -> Self {
        let mut domain_thresholds = BTreeMap::new();
        domain_thresholds.insert("philosophy".to_string(), 0.45);

        Self {
            qdrant_host: "127.0.0.1".into(),
            qdrant_port: 6333,
            qdrant_api_key: None,
            embedding_model: "sentence-transformers/all-MiniLM-L6-v2".into(),
            hierarchy_enabled: true,
            hierarchy_default_mode: ContextMode::Contextual,
            hierarchy_sibling_window: 2,
            hierarchy_max_context_tokens: 12_000,
            hierarchy_parent_max_tokens: 512,
            chapter_detection_strategy: ChapterStrategyChoice::Auto,
            chapter_fallback_token_count: 5_000,
            chapter_min_size_tokens: 500,
            parent_store_full_text: true,
            ingest_version: env!("CARGO_PKG_VERSION").into(),
            chunker: ChunkerParams::default(),
            domain_thresholds,
            batch_workers: 0,
            state_dir: PathBuf::from("."),
            catalog_db: None,
        }
    }
}

impl AlexandriaConfig {
    /// Load configuration: defaults ← optional TOML file ← environment.
    pub fn load(file: Option<&Path>) -> ConfigResult<Self> {
        let mut config = match file {
            Some(path) => {
                let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&raw).map_err(|e| ConfigError::Parse {
                    path: path.to_path_buf(),
                    message: e.to_string(),
                })?
            }
            None => Self::default(),
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Overlay `ALEXANDRIA_*` environment variables onto the current values.
    fn apply_env(&mut self) {
        if let Ok(host) = std::env::var("ALEXANDRIA_QDRANT_HOST") {
            self.qdrant_host = host;
        }
        if let Ok(port) = std::env::var("ALEXANDRIA_QDRANT_PORT") {
            if let Ok(port) = port.parse() {
                self.qdrant_port = port;
            }
        }
        if let Ok(key) = std::env::var("ALEXANDRIA_QDRANT_API_KEY") {
            self.qdrant_api_key = Some(key);
        }
        if let Ok(model) = std::env::var("ALEXANDRIA_EMBEDDING_MODEL") {
            self.embedding_model = model;
        }
        if let Ok(dir) = std::env::var("ALEXANDRIA_STATE_DIR") {
            self.state_dir = PathBuf::from(dir);
        }
        if let Ok(db) = std::env::var("ALEXANDRIA_CATALOG_DB") {
            self.catalog_db = Some(PathBuf::from(db));
        }
    }

    /// Reject out-of-range values before any subsystem sees them.
    pub fn validate(&self) -> ConfigResult<()> {
        if !(0.0..=1.0).contains(&self.chunker.threshold) {
            return Err(ConfigError::Invalid {
                message: format!(
                    "chunker.threshold must lie in [0.0, 1.0], got {}",
                    self.chunker.threshold
                ),
            });
        }
        for (domain, t) in &self.domain_thresholds {
            if !(0.0..=1.0).contains(t) {
                return Err(ConfigError::Invalid {
                    message: format!("domain_thresholds.{domain} must lie in [0.0, 1.0], got {t}"),
                });
            }
        }
        if self.chunker.min_chunk_size == 0 || self.chunker.max_chunk_size == 0 {
            return Err(ConfigError::Invalid {
                message: "chunk sizes must be >= 1 word".into(),
            });
        }
        if self.chunker.min_chunk_size > self.chunker.max_chunk_size {
            return Err(ConfigError::Invalid {
                message: format!(
                    "chunker.min_chunk_size ({}) exceeds max_chunk_size ({})",
                    self.chunker.min_chunk_size, self.chunker.max_chunk_size
                ),
            });
        }
        if self.hierarchy_sibling_window == 0 {
            return Err(ConfigError::Invalid {
                message: "hierarchy_sibling_window must be >= 1".into(),
            });
        }
        if self.chapter_min_size_tokens > self.chapter_fallback_token_count {
            return Err(ConfigError::Invalid {
                message: format!(
                    "chapter_min_size_tokens ({}) exceeds chapter_fallback_token_count ({})",
                    self.chapter_min_size_tokens, self.chapter_fallback_token_count
                ),
            });
        }
        Ok(())
    }

    /// Chunker parameters for a domain, with the domain's threshold override
    /// applied when one is configured.
    pub fn chunker_params_for(&self, domain: &str) -> ChunkerParams {
        let mut params = self.chunker.clone();
        if let Some(t) = self.domain_thresholds.get(domain) {
            params.threshold = *t;
        }
        params
    }

    /// Vector store base URL.
    pub fn qdrant_url(&self) -> String {
        format!("http://{}:{}", self.qdrant_host, self.qdrant_port)
    }

    /// Effective batch worker count.
    pub fn effective_workers(&self) -> usize {
        if self.batch_workers > 0 {
            self.batch_workers
        } else {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                .min(4)
        }
    }
}
