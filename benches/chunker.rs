//! Chunker throughput benchmarks.
//!
//! Uses the deterministic hash embedder so the numbers isolate the chunking
//! pass itself rather than ONNX inference.

use criterion::{Criterion, black_box, criterion_group, criterion_main};
use serde_json::Map;

use alexandria::chunker::chunk;
use alexandria::config::ChunkerParams;
use alexandria::embed::HashEmbedder;

fn synthetic_text(sentences: usize) -> String {
    let topics = [
        "harbors and tides and patient sailors",
        "orchards heavy with autumn apples",
        "glaciers grinding down granite ridges",
        "archives of brittle vellum manuscripts",
    ];
    (0..sentences)
        .map(|i| {
            format!(
                "Sentence {i} turns its attention to {} once more.",
                topics[(i / 25) % topics.len()]
            )
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn bench_chunker(c: &mut Criterion) {
    let embedder = HashEmbedder::default();
    let metadata = Map::new();
    let params = ChunkerParams::default();

    let mut group = c.benchmark_group("semantic_chunker");
    for sentences in [100usize, 1_000, 5_000] {
        let text = synthetic_text(sentences);
        group.bench_function(format!("{sentences}_sentences"), |b| {
            b.iter(|| chunk(black_box(&text), &metadata, &params, &embedder).unwrap());
        });
    }
    group.finish();
}

criterion_group!(benches, bench_chunker);
criterion_main!(benches);
