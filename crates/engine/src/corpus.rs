//! Document corpus
//!
//! Owns `key -> (record, signature)`. The shingle rules and the MinHash
//! family travel with the corpus, so a restored corpus computes query
//! signatures exactly the way its stored signatures were computed.
//!
//! Entries sit behind their own `Arc`, so cloning a corpus to publish an
//! edited copy shares every untouched record and signature.
//!
//! Input format:
//!
//! ```json
//! {"source": {"Cnt": 2, "results": {"https://...": {"title": "...", "content": "...", "contained_urls": {}}}}}
//! ```

use crate::shingle::ShingleExtractor;
use crate::signature::SignatureBuilder;
use neardup_core::{Config, DocKey, Error, Record, Result, Signature};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

// ============================================================================
// Sources
// ============================================================================

/// Where a corpus comes from.
#[derive(Debug, Clone)]
pub enum CorpusSource {
    /// A JSON file on disk
    Path(PathBuf),
    /// An already parsed JSON value
    Json(serde_json::Value),
    /// JSON text
    Str(String),
    /// Flat `key -> record` table (no source wrapper)
    Records(BTreeMap<DocKey, Record>),
}

#[derive(Deserialize)]
struct SourceResults {
    #[serde(rename = "Cnt", alias = "count", default)]
    count: Option<u64>,
    #[serde(default)]
    results: BTreeMap<DocKey, Record>,
}

impl CorpusSource {
    /// Flatten the source into one table.
    ///
    /// Sources are merged in ascending name order; a later source wins on a
    /// duplicate key.
    pub fn into_records(self) -> Result<BTreeMap<DocKey, Record>> {
        let sources: BTreeMap<String, SourceResults> = match self {
            CorpusSource::Records(records) => return Ok(records),
            CorpusSource::Path(path) => {
                let text = std::fs::read_to_string(&path)
                    .map_err(|e| Error::persistence(path.display().to_string(), e))?;
                serde_json::from_str(&text)?
            }
            CorpusSource::Json(value) => serde_json::from_value(value)?,
            CorpusSource::Str(text) => serde_json::from_str(&text)?,
        };

        let mut records = BTreeMap::new();
        for (source, results) in sources {
            let found = results.results.len() as u64;
            if let Some(count) = results.count {
                if count != found {
                    warn!(
                        target: "neardup::corpus",
                        source = %source,
                        declared = count,
                        found,
                        "Source count does not match its results"
                    );
                }
            }
            for (key, record) in results.results {
                if records.insert(key.clone(), record).is_some() {
                    debug!(target: "neardup::corpus", key = %key, source = %source, "Duplicate key replaced");
                }
            }
        }
        Ok(records)
    }
}

// ============================================================================
// Corpus
// ============================================================================

/// One stored document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusEntry {
    /// The article
    pub record: Record,
    /// Its MinHash signature
    pub signature: Signature,
}

/// Document table with per-document signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Corpus {
    extractor: ShingleExtractor,
    builder: SignatureBuilder,
    entries: BTreeMap<DocKey, Arc<CorpusEntry>>,
}

impl Corpus {
    /// Empty corpus using the shingle rules and `num_perm` from `config`.
    pub fn new(config: &Config) -> Result<Self> {
        Ok(Corpus {
            extractor: ShingleExtractor::new(&config.shingles)?,
            builder: SignatureBuilder::new(config.num_perm)?,
            entries: BTreeMap::new(),
        })
    }

    /// Build a corpus from a source in one step.
    pub fn from_source(config: &Config, source: CorpusSource) -> Result<Self> {
        let mut corpus = Corpus::new(config)?;
        corpus.load(source)?;
        Ok(corpus)
    }

    /// Check a restored corpus against the running configuration.
    pub fn check_compatible(&self, config: &Config) -> Result<()> {
        self.builder.check_compatible()?;
        if self.builder.num_perm() != config.num_perm {
            return Err(Error::configuration(
                "num_perm",
                format!(
                    "stored corpus uses num_perm = {}, config has {}",
                    self.builder.num_perm(),
                    config.num_perm
                ),
            ));
        }
        if self.extractor != ShingleExtractor::new(&config.shingles)? {
            return Err(Error::configuration(
                "shingles",
                "stored corpus was built with different shingle rules",
            ));
        }
        Ok(())
    }

    /// Load every document of `source`, computing signatures in parallel.
    ///
    /// Existing keys are overwritten. Returns the number of documents read.
    pub fn load(&mut self, source: CorpusSource) -> Result<usize> {
        let start = Instant::now();
        let records = source.into_records()?;
        let count = records.len();

        let entries: Vec<(DocKey, Arc<CorpusEntry>)> = records
            .into_par_iter()
            .map(|(key, record)| {
                let signature = self.signature_of(&record)?;
                Ok((key, Arc::new(CorpusEntry { record, signature })))
            })
            .collect::<Result<_>>()?;
        self.entries.extend(entries);

        info!(
            target: "neardup::corpus",
            documents = count,
            total = self.entries.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Corpus loaded"
        );
        Ok(count)
    }

    /// Insert or overwrite one document.
    pub fn add(&mut self, key: impl Into<DocKey>, record: Record) -> Result<()> {
        let signature = self.signature_of(&record)?;
        self.entries
            .insert(key.into(), Arc::new(CorpusEntry { record, signature }));
        Ok(())
    }

    /// Remove one document.
    ///
    /// # Errors
    ///
    /// [`Error::KeyNotFound`] if `key` is absent.
    pub fn remove(&mut self, key: &str) -> Result<Arc<CorpusEntry>> {
        self.entries
            .remove(key)
            .ok_or_else(|| Error::KeyNotFound(key.to_string()))
    }

    /// Remove every present key in `keys`, skipping absent ones.
    ///
    /// Returns how many documents were removed.
    pub fn prune<'a>(&mut self, keys: impl IntoIterator<Item = &'a DocKey>) -> usize {
        keys.into_iter()
            .filter(|key| self.entries.remove(key.as_str()).is_some())
            .count()
    }

    /// Signature a record would get in this corpus.
    pub fn signature_of(&self, record: &Record) -> Result<Signature> {
        let shingles = self.extractor.shingle_record(record)?;
        Ok(self.builder.signature(&shingles))
    }

    /// Stored document.
    pub fn get(&self, key: &str) -> Option<&CorpusEntry> {
        self.entries.get(key).map(|e| &**e)
    }

    /// Stored signature.
    pub fn signature(&self, key: &str) -> Option<&Signature> {
        self.entries.get(key).map(|e| &e.signature)
    }

    /// True if `key` is stored.
    pub fn contains(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// Number of documents.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if no documents are stored.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Keys in ascending order.
    pub fn keys(&self) -> impl Iterator<Item = &DocKey> {
        self.entries.keys()
    }

    /// `(key, signature)` pairs in ascending key order.
    pub fn signatures(&self) -> impl Iterator<Item = (&DocKey, &Signature)> {
        self.entries.iter().map(|(k, e)| (k, &e.signature))
    }

    /// Entries in ascending key order.
    pub fn iter(&self) -> impl Iterator<Item = (&DocKey, &CorpusEntry)> {
        self.entries.iter().map(|(k, e)| (k, &**e))
    }

    /// Signature length.
    pub fn num_perm(&self) -> usize {
        self.builder.num_perm()
    }

    /// Shingle rules of this corpus.
    pub fn extractor(&self) -> &ShingleExtractor {
        &self.extractor
    }
}
