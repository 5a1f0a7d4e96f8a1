//! Shared test utilities for all integration test suites.
//!
//! Import via `mod common;` from any test's main.rs.

#![allow(dead_code)]

use neardup::{ClusterService, Config, CorpusSource, Record, ShingleConfig};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use tempfile::TempDir;

pub const KEY_A: &str = "https://wire.example/markets/rally";
pub const KEY_B: &str = "https://mirror.example/markets-rally";
pub const KEY_C: &str = "https://local.example/sports/cup-final";

const STORY: &str = "stocks rallied sharply on tuesday as investors cheered signs that the central \
    bank could cut interest rates before the end of the year sending the main index to a \
    record close while bond yields fell and the dollar weakened against major currencies";

/// Config used by the end-to-end fixture.
pub fn fixture_config() -> Config {
    Config {
        threshold: 0.5,
        min_samples: 2,
        eps: 0.5,
        shingles: ShingleConfig::words_only(),
        ..Config::default()
    }
}

/// Same config, persisting to `dir`.
pub fn persistent_config(dir: &TempDir) -> Config {
    Config {
        artifact_dir: Some(dir.path().join("artifacts")),
        ..fixture_config()
    }
}

pub fn record_a() -> Record {
    Record::new("Stocks rally on rate cut hopes", STORY, BTreeMap::new())
}

/// One word of A's body changed: well above 90% shared word shingles.
pub fn record_b() -> Record {
    Record::new(
        "Stocks rally on rate cut hopes",
        STORY.replace("tuesday", "wednesday"),
        BTreeMap::new(),
    )
}

pub fn record_c() -> Record {
    let mut urls = BTreeMap::new();
    urls.insert(
        "https://local.example/tickets".to_string(),
        "tickets".to_string(),
    );
    Record::new(
        "Local club lifts the cup",
        "the football club celebrated a dramatic cup final victory after a penalty shootout \
         in front of a sold out crowd",
        urls,
    )
}

fn record_json(record: &Record) -> Value {
    json!({
        "title": record.title,
        "content": record.content,
        "contained_urls": record.contained_urls,
    })
}

/// The fixture in the crawler's output format, split over two sources.
pub fn fixture_json() -> Value {
    json!({
        "wire": {"Cnt": 2, "results": {
            KEY_A: record_json(&record_a()),
            KEY_C: record_json(&record_c()),
        }},
        "mirror": {"Cnt": 1, "results": {
            KEY_B: record_json(&record_b()),
        }},
    })
}

/// Fixture written to `<dir>/results.json`.
pub fn fixture_file(dir: &TempDir) -> PathBuf {
    let path = dir.path().join("results.json");
    std::fs::write(&path, fixture_json().to_string()).unwrap();
    path
}

/// Fitted in-memory service over the fixture.
pub fn fitted_service(config: Config) -> ClusterService {
    let service = ClusterService::new(config).unwrap();
    service.fit(CorpusSource::Json(fixture_json())).unwrap();
    service
}

/// `n` generated articles in groups of `group` near-duplicates.
pub fn generated_records(n: usize, group: usize) -> BTreeMap<String, Record> {
    (0..n)
        .map(|i| {
            let story = i / group;
            let words: Vec<String> = (0..20)
                .map(|w| format!("s{}w{}", story, w))
                .chain(std::iter::once(format!("variant{}", i)))
                .collect();
            (
                format!("https://gen.example/{}/{}", story, i),
                Record::new(format!("story {}", story), words.join(" "), BTreeMap::new()),
            )
        })
        .collect()
}
