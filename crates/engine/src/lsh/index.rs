//! Banded MinHash LSH index
//!
//! The signature is split into `bands` runs of `rows` values. Each band is
//! hashed (xxh3 of the little-endian values, seeded with the band number) to
//! a bucket id; a bucket holds a set of keys, so bulk insertion yields the
//! same state in any order. A per-key membership list makes removal touch
//! only the buckets the key occupies.

use super::params::{optimal_params, LshParams};
use crate::corpus::Corpus;
use neardup_core::{DocKey, Error, Result, Signature};
use rayon::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Instant;
use tracing::info;
use xxhash_rust::xxh3::xxh3_64_with_seed;

/// Approximate similarity index over signatures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimilarityIndex {
    threshold: f64,
    num_perm: usize,
    params: LshParams,
    /// One table per band: bucket id -> keys
    tables: Vec<FxHashMap<u64, BTreeSet<DocKey>>>,
    /// key -> bucket id per band
    members: FxHashMap<DocKey, Vec<u64>>,
}

impl SimilarityIndex {
    /// Empty index with optimized banding for `threshold`.
    pub fn new(threshold: f64, num_perm: usize) -> Result<Self> {
        let params = optimal_params(threshold, num_perm)?;
        Ok(SimilarityIndex {
            threshold,
            num_perm,
            params,
            tables: (0..params.bands).map(|_| FxHashMap::default()).collect(),
            members: FxHashMap::default(),
        })
    }

    /// Index every document of `corpus`.
    pub fn fit(corpus: &Corpus, threshold: f64) -> Result<Self> {
        let start = Instant::now();
        let mut index = SimilarityIndex::new(threshold, corpus.num_perm())?;

        let hashed: Vec<(&DocKey, Vec<u64>)> = corpus
            .signatures()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|(key, signature)| (key, index.band_hashes(signature)))
            .collect();
        for (key, hashes) in hashed {
            index.insert_hashes(key.clone(), hashes);
        }

        info!(
            target: "neardup::lsh",
            documents = index.len(),
            bands = index.params.bands,
            rows = index.params.rows,
            threshold,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Similarity index built"
        );
        Ok(index)
    }

    /// Insert `key`, replacing its previous buckets if already present.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the signature length is not `num_perm`.
    pub fn insert(&mut self, key: impl Into<DocKey>, signature: &Signature) -> Result<()> {
        if signature.len() != self.num_perm {
            return Err(Error::configuration(
                "num_perm",
                format!(
                    "signature has {} values, index expects {}",
                    signature.len(),
                    self.num_perm
                ),
            ));
        }
        let hashes = self.band_hashes(signature);
        self.insert_hashes(key.into(), hashes);
        Ok(())
    }

    fn insert_hashes(&mut self, key: DocKey, hashes: Vec<u64>) {
        self.remove(&key);
        for (table, &bucket) in self.tables.iter_mut().zip(hashes.iter()) {
            table.entry(bucket).or_default().insert(key.clone());
        }
        self.members.insert(key, hashes);
    }

    /// Keys sharing at least one band bucket with `signature`.
    ///
    /// A candidate set, not a threshold guarantee. A signature of the wrong
    /// length matches nothing.
    pub fn query(&self, signature: &Signature) -> BTreeSet<DocKey> {
        let mut candidates = BTreeSet::new();
        if signature.len() != self.num_perm {
            return candidates;
        }
        for (table, bucket) in self.tables.iter().zip(self.band_hashes(signature)) {
            if let Some(keys) = table.get(&bucket) {
                candidates.extend(keys.iter().cloned());
            }
        }
        candidates
    }

    /// Remove `key` from every bucket. Returns whether it was present.
    pub fn remove(&mut self, key: &str) -> bool {
        let Some(hashes) = self.members.remove(key) else {
            return false;
        };
        for (table, bucket) in self.tables.iter_mut().zip(hashes) {
            if let Some(keys) = table.get_mut(&bucket) {
                keys.remove(key);
                if keys.is_empty() {
                    table.remove(&bucket);
                }
            }
        }
        true
    }

    /// Remove every key in `keys`. Returns how many were present.
    pub fn prune<'a>(&mut self, keys: impl IntoIterator<Item = &'a DocKey>) -> usize {
        keys.into_iter().filter(|key| self.remove(key)).count()
    }

    fn band_hashes(&self, signature: &Signature) -> Vec<u64> {
        let rows = self.params.rows;
        signature
            .values()
            .chunks(rows)
            .take(self.params.bands)
            .enumerate()
            .map(|(band, chunk)| {
                let mut bytes = Vec::with_capacity(rows * 8);
                for value in chunk {
                    bytes.extend_from_slice(&value.to_le_bytes());
                }
                xxh3_64_with_seed(&bytes, band as u64)
            })
            .collect()
    }

    /// True if `key` is indexed.
    pub fn contains(&self, key: &str) -> bool {
        self.members.contains_key(key)
    }

    /// Number of indexed keys.
    pub fn len(&self) -> usize {
        self.members.len()
    }

    /// True if nothing is indexed.
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Banding parameters.
    pub fn params(&self) -> LshParams {
        self.params
    }

    /// Similarity threshold the banding was optimized for.
    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Signature length.
    pub fn num_perm(&self) -> usize {
        self.num_perm
    }
}
