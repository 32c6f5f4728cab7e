//! Embedding service: batched text → fixed-dimension vectors.
//!
//! The production backend is fastembed's ONNX runtime, loaded once per
//! process and shared across ingest workers behind a mutex (inference is
//! serialized so batch memory stays bounded to the book currently being
//! processed). Everything downstream talks to the [`Embedder`] trait, which
//! also admits the deterministic [`HashEmbedder`] used by tests and offline
//! smoke runs.

use std::sync::{Arc, Mutex, OnceLock};

use fastembed::{InitOptions, TextEmbedding};

use crate::error::{EmbedResult, EmbeddingError};

/// Batch size handed to the backend per inference call.
const INFERENCE_BATCH: usize = 64;

/// Batched embedding of strings into vectors of a fixed dimension.
///
/// Implementations are deterministic for a fixed model: the same input
/// always produces the same vector. Inputs longer than the model's maximum
/// token window are truncated by the backend.
pub trait Embedder: Send + Sync {
    /// Embed a batch of texts, one vector per input, in input order.
    fn embed_batch(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>>;

    /// Advertised vector dimension.
    fn dimension(&self) -> usize;

    /// Stable model identifier, recorded in chunk metadata.
    fn model_id(&self) -> &str;

    /// Compute device, surfaced to the event log.
    fn device(&self) -> &str {
        "cpu"
    }
}

/// Cosine similarity between two vectors. Zero-norm inputs score 0.0.
pub fn cosine(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut na = 0.0f32;
    let mut nb = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        na += x * x;
        nb += y * y;
    }
    let denom = na.sqrt() * nb.sqrt();
    if denom == 0.0 { 0.0 } else { dot / denom }
}

// ---------------------------------------------------------------------------
// fastembed backend
// ---------------------------------------------------------------------------

/// ONNX-backed embedding service.
///
/// The model handle is process-wide: [`FastembedEmbedder::shared`] loads it
/// on first use and every later caller gets the same instance regardless of
/// the model id they pass (a collection is bound to one model anyway).
pub struct FastembedEmbedder {
    model: Mutex<TextEmbedding>,
    model_id: String,
    dimension: usize,
}

static SHARED: OnceLock<Arc<FastembedEmbedder>> = OnceLock::new();

impl FastembedEmbedder {
    /// Load the model named by `model_id` (a fastembed model code such as
    /// `sentence-transformers/all-MiniLM-L6-v2`). First use downloads the
    /// weights into the fastembed cache directory.
    pub fn new(model_id: &str) -> EmbedResult<Self> {
        let info = TextEmbedding::list_supported_models()
            .into_iter()
            .find(|m| m.model_code.eq_ignore_ascii_case(model_id))
            .ok_or_else(|| EmbeddingError::UnknownModel {
                model: model_id.to_string(),
            })?;

        tracing::info!(model = %info.model_code, dim = info.dim, "loading embedding model");

        let model = TextEmbedding::try_new(
            InitOptions::new(info.model.clone()).with_show_download_progress(false),
        )
        .map_err(|e| EmbeddingError::ModelLoad {
            model: model_id.to_string(),
            message: e.to_string(),
        })?;

        Ok(Self {
            model: Mutex::new(model),
            model_id: info.model_code,
            dimension: info.dim,
        })
    }

    /// Process-wide shared instance, loaded on first call.
    pub fn shared(model_id: &str) -> EmbedResult<Arc<Self>> {
        if let Some(existing) = SHARED.get() {
            if !existing.model_id.eq_ignore_ascii_case(model_id) {
                tracing::warn!(
                    loaded = %existing.model_id,
                    requested = %model_id,
                    "embedding model already loaded; ignoring requested model"
                );
            }
            return Ok(Arc::clone(existing));
        }
        let built = Arc::new(Self::new(model_id)?);
        Ok(Arc::clone(SHARED.get_or_init(|| built)))
    }
}

impl Embedder for FastembedEmbedder {
    fn embed_batch(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.model.lock().map_err(|_| EmbeddingError::Inference {
            message: "model lock poisoned".into(),
        })?;
        model
            .embed(texts.to_vec(), Some(INFERENCE_BATCH))
            .map_err(|e| EmbeddingError::Inference {
                message: e.to_string(),
            })
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }
}

// ---------------------------------------------------------------------------
// Deterministic hash backend (tests, offline smoke runs)
// ---------------------------------------------------------------------------

/// Embeds text as a normalized bag-of-words hash projection.
///
/// Sentences sharing vocabulary score high cosine similarity, disjoint
/// vocabulary scores near zero, and the output is bit-stable across runs and
/// platforms. Slot counts are non-negative, so cosine stays in [0, 1] the way
/// it does for real sentence encoders. Useful wherever downloading a model is
/// unwanted.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Self {
        Self { dimension }
    }
}

impl Default for HashEmbedder {
    fn default() -> Self {
        Self::new(32)
    }
}

/// FNV-1a: stable across platforms, unlike `DefaultHasher`.
fn fnv1a(word: &str) -> u64 {
    let mut hash = 0xcbf2_9ce4_8422_2325u64;
    for byte in word.bytes() {
        hash ^= u64::from(byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

impl Embedder for HashEmbedder {
    fn embed_batch(&self, texts: &[String]) -> EmbedResult<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut vector = vec![0.0f32; self.dimension];
                for word in text.split_whitespace() {
                    let word: String = word
                        .chars()
                        .filter(|c| c.is_alphanumeric())
                        .collect::<String>()
                        .to_lowercase();
                    if word.is_empty() {
                        continue;
                    }
                    let hash = fnv1a(&word);
                    let slot = (hash % self.dimension as u64) as usize;
                    vector[slot] += 1.0;
                }
                let norm: f32 = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
                if norm > 0.0 {
                    for v in &mut vector {
                        *v /= norm;
                    }
                }
                vector
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn model_id(&self) -> &str {
        "hash-embedder"
    }
}
