//! Clustering Benchmarks
//!
//! - signature: MinHash of one article's shingles
//! - corpus load: parallel signatures for a bulk load
//! - lsh fit + query
//! - clustering fit over weighted points

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use neardup_core::{Config, Record, ShingleConfig};
use neardup_engine::{ClusterEngine, Corpus, CorpusSource, SimilarityIndex};
use std::collections::BTreeMap;
use std::sync::Arc;

const VOCABULARY: &[&str] = &[
    "market", "rates", "bank", "storm", "coast", "phone", "battery", "election", "vote", "court",
    "ruling", "team", "final", "match", "energy", "prices", "oil", "river", "flood", "city",
    "council", "tax", "school", "nurses", "strike", "airport", "flight", "delay", "museum",
    "exhibit",
];

fn config() -> Config {
    Config {
        threshold: 0.5,
        min_samples: 2,
        eps: 0.5,
        shingles: ShingleConfig::words_only(),
        ..Config::default()
    }
}

/// `n` articles in groups of four near-duplicates.
fn records(n: usize) -> BTreeMap<String, Record> {
    (0..n)
        .map(|i| {
            let story = i / 4;
            let words: Vec<&str> = (0..24)
                .map(|w| VOCABULARY[(story * 7 + w * 3 + (w == i % 24) as usize) % VOCABULARY.len()])
                .collect();
            (
                format!("https://bench.example/{}", i),
                Record::new(format!("story {}", story), words.join(" "), BTreeMap::new()),
            )
        })
        .collect()
}

fn bench_corpus_load(c: &mut Criterion) {
    let mut group = c.benchmark_group("corpus");
    for &n in &[1_000usize, 10_000] {
        let source = records(n);
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("load", n), &source, |b, source| {
            b.iter(|| {
                Corpus::from_source(&config(), CorpusSource::Records(source.clone())).unwrap()
            })
        });
    }
    group.finish();
}

fn bench_lsh(c: &mut Criterion) {
    let corpus = Corpus::from_source(&config(), CorpusSource::Records(records(10_000))).unwrap();
    let mut group = c.benchmark_group("lsh");
    group.bench_function("fit_10k", |b| {
        b.iter(|| SimilarityIndex::fit(&corpus, 0.5).unwrap())
    });

    let index = SimilarityIndex::fit(&corpus, 0.5).unwrap();
    let target = corpus.signature("https://bench.example/42").unwrap().clone();
    group.throughput(Throughput::Elements(1));
    group.bench_function("query", |b| b.iter(|| index.query(&target)));
    group.finish();
}

fn bench_clustering_fit(c: &mut Criterion) {
    let engine = ClusterEngine::new(&config(), None).unwrap();
    let mut group = c.benchmark_group("clustering");
    group.sample_size(10);
    for &n in &[500usize, 2_000] {
        let corpus =
            Arc::new(Corpus::from_source(&config(), CorpusSource::Records(records(n))).unwrap());
        group.throughput(Throughput::Elements(n as u64));
        group.bench_with_input(BenchmarkId::new("fit", n), &corpus, |b, corpus| {
            b.iter(|| engine.fit(Arc::clone(corpus), None).unwrap())
        });
    }
    group.finish();
}

criterion_group!(benches, bench_corpus_load, bench_lsh, bench_clustering_fit);
criterion_main!(benches);
