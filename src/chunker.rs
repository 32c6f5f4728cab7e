//! Universal semantic chunker.
//!
//! Splits text at topic boundaries: consecutive sentences are embedded in one
//! batch, and a chunk boundary fires where the cosine similarity between
//! neighbors drops below the threshold, but only once the buffer holds at
//! least `min_chunk_size` words, so topic jitter cannot produce fragments.
//! `max_chunk_size` is a hard cap that cuts even mid-topic. One strategy for
//! every domain; domains tune the threshold scalar, nothing else.

use serde_json::{Map, Value};

use crate::config::ChunkerParams;
use crate::embed::{Embedder, cosine};
use crate::error::{ChunkResult, ChunkingError};
use crate::sentences::{split_sentences, word_count};

/// Strategy name stamped on every chunk this module emits.
pub const STRATEGY: &str = "universal-semantic";

/// One semantically-bounded chunk.
#[derive(Debug, Clone)]
pub struct SemanticChunk {
    /// Sentences joined with single spaces.
    pub text: String,
    /// Sequential id within this chunking call.
    pub chunk_id: usize,
    pub word_count: usize,
    /// Inclusive `[start, end]` sentence indexes this chunk covers.
    pub sentence_range: (usize, usize),
    /// Always [`STRATEGY`].
    pub strategy: &'static str,
    /// Caller-supplied metadata, forwarded verbatim. The chunker never
    /// fabricates keys of its own here.
    pub metadata: Map<String, Value>,
}

/// Chunk `text` under `params`, forwarding `metadata` onto every chunk.
///
/// Deterministic for fixed text, parameters, and embedding model. Empty or
/// whitespace-only input returns an empty vec, not an error.
pub fn chunk(
    text: &str,
    metadata: &Map<String, Value>,
    params: &ChunkerParams,
    embedder: &dyn Embedder,
) -> ChunkResult<Vec<SemanticChunk>> {
    let sentences = split_sentences(text);
    if sentences.is_empty() {
        return Ok(Vec::new());
    }

    let embeddings = embedder.embed_batch(&sentences)?;
    if embeddings.len() != sentences.len() {
        return Err(ChunkingError::EmbeddingMismatch {
            sentences: sentences.len(),
            embeddings: embeddings.len(),
        });
    }

    let mut chunks = Vec::new();
    let mut buffer: Vec<&str> = vec![&sentences[0]];
    let mut buffer_words = word_count(&sentences[0]);
    let mut buffer_start = 0usize;

    for i in 1..sentences.len() {
        let words = word_count(&sentences[i]);
        let similarity = cosine(&embeddings[i - 1], &embeddings[i]);

        let should_break = similarity < params.threshold && buffer_words >= params.min_chunk_size;
        let must_break = buffer_words + words > params.max_chunk_size;

        if should_break || must_break {
            emit(&mut chunks, &buffer, buffer_words, (buffer_start, i - 1), metadata);
            buffer.clear();
            buffer.push(&sentences[i]);
            buffer_words = words;
            buffer_start = i;
        } else {
            buffer.push(&sentences[i]);
            buffer_words += words;
        }
    }

    emit(
        &mut chunks,
        &buffer,
        buffer_words,
        (buffer_start, sentences.len() - 1),
        metadata,
    );

    Ok(chunks)
}

fn emit(
    chunks: &mut Vec<SemanticChunk>,
    buffer: &[&str],
    words: usize,
    sentence_range: (usize, usize),
    metadata: &Map<String, Value>,
) {
    chunks.push(SemanticChunk {
        text: buffer.join(" "),
        chunk_id: chunks.len(),
        word_count: words,
        sentence_range,
        strategy: STRATEGY,
        metadata: metadata.clone(),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashEmbedder;

    fn params(threshold: f32, min: usize, max: usize) -> ChunkerParams {
        ChunkerParams {
            threshold,
            min_chunk_size: min,
            max_chunk_size: max,
        }
    }

    fn meta() -> Map<String, Value> {
        let mut m = Map::new();
        m.insert("book_title".into(), Value::String("Test Book".into()));
        m
    }

    /// Repeating one sentence keeps similarity at 1.0 between all neighbors.
    fn uniform_text(repeats: usize) -> String {
        vec!["The steady river flows onward through the valley today."; repeats].join(" ")
    }

    #[test]
    fn empty_input_yields_no_chunks() {
        let embedder = HashEmbedder::default();
        let chunks = chunk("", &meta(), &params(0.55, 200, 1200), &embedder).unwrap();
        assert!(chunks.is_empty());
    }

    #[test]
    fn single_sentence_yields_one_chunk() {
        let embedder = HashEmbedder::default();
        let chunks = chunk(
            "Just one lonely sentence sits here.",
            &meta(),
            &params(0.55, 200, 1200),
            &embedder,
        )
        .unwrap();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_id, 0);
        assert_eq!(chunks[0].sentence_range, (0, 0));
        assert_eq!(chunks[0].strategy, STRATEGY);
    }

    #[test]
    fn max_size_forces_split_on_uniform_text() {
        let embedder = HashEmbedder::default();
        // 40 sentences x 9 words = 360 words, cap at 100.
        let text = uniform_text(40);
        let chunks = chunk(&text, &meta(), &params(0.55, 10, 100), &embedder).unwrap();
        assert!(chunks.len() > 1, "cap must split even all-similar text");
        for c in &chunks {
            assert!(c.word_count <= 100);
        }
    }

    #[test]
    fn min_size_suppresses_semantic_cuts() {
        let embedder = HashEmbedder::default();
        // Wildly dissimilar sentences, but min_chunk_size larger than the
        // whole text: everything stays in one chunk.
        let text = "Apples ripen in autumn orchards. Submarines patrol arctic depths. \
                    Violins require rosined bows.";
        let chunks = chunk(&text, &meta(), &params(0.99, 500, 1200), &embedder).unwrap();
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn threshold_one_cuts_every_boundary_after_min() {
        let embedder = HashEmbedder::default();
        let text = "Apples ripen in autumn orchards slowly. Submarines patrol arctic depths quietly. \
                    Violins require rosined bows daily.";
        // min_chunk_size 1: every dissimilar boundary becomes a cut.
        let chunks = chunk(&text, &meta(), &params(1.0, 1, 1200), &embedder).unwrap();
        assert_eq!(chunks.len(), 3);
    }

    #[test]
    fn threshold_zero_cuts_only_by_cap() {
        let embedder = HashEmbedder::default();
        let text = "Apples ripen in autumn orchards slowly. Submarines patrol arctic depths quietly. \
                    Violins require rosined bows daily.";
        let chunks = chunk(&text, &meta(), &params(0.0, 1, 1200), &embedder).unwrap();
        assert_eq!(chunks.len(), 1, "similarity never falls below 0.0");
    }

    #[test]
    fn sentence_ranges_are_contiguous_and_exhaustive() {
        let embedder = HashEmbedder::default();
        let text = uniform_text(30);
        let chunks = chunk(&text, &meta(), &params(0.55, 10, 80), &embedder).unwrap();
        let mut next = 0usize;
        for c in &chunks {
            assert_eq!(c.sentence_range.0, next);
            assert!(c.sentence_range.1 >= c.sentence_range.0);
            next = c.sentence_range.1 + 1;
        }
        assert_eq!(next, 30);
    }

    #[test]
    fn metadata_forwarded_verbatim() {
        let embedder = HashEmbedder::default();
        let chunks = chunk(
            "A sentence about metadata handling today.",
            &meta(),
            &params(0.55, 200, 1200),
            &embedder,
        )
        .unwrap();
        assert_eq!(
            chunks[0].metadata.get("book_title"),
            Some(&Value::String("Test Book".into()))
        );
    }

    #[test]
    fn deterministic_across_runs() {
        let embedder = HashEmbedder::default();
        let text = uniform_text(25);
        let p = params(0.55, 10, 90);
        let a = chunk(&text, &meta(), &p, &embedder).unwrap();
        let b = chunk(&text, &meta(), &p, &embedder).unwrap();
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.text, y.text);
            assert_eq!(x.sentence_range, y.sentence_range);
        }
    }

    #[test]
    fn chunk_ids_are_sequential() {
        let embedder = HashEmbedder::default();
        let text = uniform_text(40);
        let chunks = chunk(&text, &meta(), &params(0.55, 10, 100), &embedder).unwrap();
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_id, i);
        }
    }
}
