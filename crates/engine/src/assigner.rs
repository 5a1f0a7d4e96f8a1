//! Online cluster assignment
//!
//! `get_similar` asks the LSH index for candidates and re-scores each one
//! with the signature estimate against the stored corpus signature.
//! `get_cluster` returns a known key's cluster directly; otherwise the
//! cluster most represented among the candidates wins if its share of all
//! candidates is strictly above the configured minimum.

use crate::cluster::ClusterModel;
use crate::corpus::Corpus;
use crate::lsh::SimilarityIndex;
use neardup_core::{ClusterIndex, Component, DocKey, Error, Record, Result, Signature};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// One similar document.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SimilarDoc {
    /// Stored document key
    pub key: DocKey,
    /// Estimated Jaccard similarity to the query
    pub similarity: f64,
}

/// Why no cluster was chosen.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum NoMatchReason {
    /// The index returned no candidates
    NoCandidates,
    /// Every candidate was noise
    NoClusteredCandidates,
    /// The best cluster did not reach the minimum share
    BelowMinimumShare {
        /// Best cluster
        index: ClusterIndex,
        /// Its share of all candidates
        share: f64,
    },
}

/// Outcome of `get_cluster`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Assignment {
    /// The key is already clustered
    Direct(ClusterIndex),
    /// Chosen by majority of similar documents
    Predominant {
        /// Chosen cluster
        index: ClusterIndex,
        /// Its share of all candidates
        share: f64,
    },
    /// No cluster
    NoMatch(NoMatchReason),
}

impl Assignment {
    /// Cluster index, `None` for no match.
    pub fn cluster_index(&self) -> Option<ClusterIndex> {
        match *self {
            Assignment::Direct(index) | Assignment::Predominant { index, .. } => Some(index),
            Assignment::NoMatch(_) => None,
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Assignment::Direct(index) => write!(f, "cluster {} (known key)", index),
            Assignment::Predominant { index, share } => {
                write!(f, "cluster {} ({:.0}% of similar documents)", index, share * 100.0)
            }
            Assignment::NoMatch(NoMatchReason::NoCandidates) => {
                f.write_str("no match (no similar documents)")
            }
            Assignment::NoMatch(NoMatchReason::NoClusteredCandidates) => {
                f.write_str("no match (similar documents are all unclustered)")
            }
            Assignment::NoMatch(NoMatchReason::BelowMinimumShare { index, share }) => write!(
                f,
                "no match (best cluster {} has only {:.0}% of similar documents)",
                index,
                share * 100.0
            ),
        }
    }
}

/// Pick the predominant cluster among candidates.
///
/// `candidates` yields each candidate's cluster, `None` for unclustered
/// ones; those still count toward the total. Ties go to the lowest index.
pub fn predominant(
    candidates: impl IntoIterator<Item = Option<ClusterIndex>>,
    min_share: f64,
) -> Assignment {
    let mut total = 0usize;
    let mut tally: BTreeMap<ClusterIndex, usize> = BTreeMap::new();
    for cluster in candidates {
        total += 1;
        if let Some(index) = cluster {
            *tally.entry(index).or_default() += 1;
        }
    }
    if total == 0 {
        return Assignment::NoMatch(NoMatchReason::NoCandidates);
    }

    let mut best: Option<(ClusterIndex, usize)> = None;
    for (&index, &count) in &tally {
        if best.map_or(true, |(_, best_count)| count > best_count) {
            best = Some((index, count));
        }
    }
    let Some((index, count)) = best else {
        return Assignment::NoMatch(NoMatchReason::NoClusteredCandidates);
    };

    let share = count as f64 / total as f64;
    if share > min_share {
        Assignment::Predominant { index, share }
    } else {
        Assignment::NoMatch(NoMatchReason::BelowMinimumShare { index, share })
    }
}

/// Read-only view answering similarity and cluster queries.
#[derive(Debug, Clone, Copy)]
pub struct ClusterAssigner<'a> {
    corpus: &'a Corpus,
    index: Option<&'a SimilarityIndex>,
    model: Option<&'a ClusterModel>,
    min_share: f64,
}

impl<'a> ClusterAssigner<'a> {
    /// Assigner over one consistent state.
    pub fn new(
        corpus: &'a Corpus,
        index: Option<&'a SimilarityIndex>,
        model: Option<&'a ClusterModel>,
        min_share: f64,
    ) -> Self {
        ClusterAssigner {
            corpus,
            index,
            model,
            min_share,
        }
    }

    fn require_index(&self) -> Result<&'a SimilarityIndex> {
        self.index
            .ok_or_else(|| Error::not_fitted(Component::SimilarityIndex))
    }

    fn require_model(&self) -> Result<&'a ClusterModel> {
        self.model.ok_or_else(|| Error::not_fitted(Component::Clustering))
    }

    /// Similar stored documents with their estimated Jaccard.
    ///
    /// # Errors
    ///
    /// [`Error::NotFitted`] without a similarity index.
    pub fn get_similar(&self, record: &Record) -> Result<BTreeMap<DocKey, f64>> {
        let index = self.require_index()?;
        let signature = self.corpus.signature_of(record)?;
        Ok(self.similar_to(index, &signature))
    }

    /// [`get_similar`](Self::get_similar) ranked by similarity, then key.
    pub fn ranked_similar(&self, record: &Record) -> Result<Vec<SimilarDoc>> {
        let mut ranked: Vec<SimilarDoc> = self
            .get_similar(record)?
            .into_iter()
            .map(|(key, similarity)| SimilarDoc { key, similarity })
            .collect();
        ranked.sort_by(|a, b| {
            b.similarity
                .total_cmp(&a.similarity)
                .then_with(|| a.key.cmp(&b.key))
        });
        Ok(ranked)
    }

    fn similar_to(&self, index: &SimilarityIndex, signature: &Signature) -> BTreeMap<DocKey, f64> {
        index
            .query(signature)
            .into_iter()
            .filter_map(|key| {
                let stored = self.corpus.signature(&key)?;
                let similarity = stored.jaccard(signature);
                Some((key, similarity))
            })
            .collect()
    }

    /// Cluster for `record`, stored under `key` if given.
    ///
    /// # Errors
    ///
    /// [`Error::NotFitted`] unless both the index and the clustering are fit.
    pub fn get_cluster(&self, record: &Record, key: Option<&str>) -> Result<Assignment> {
        let index = self.require_index()?;
        let model = self.require_model()?;

        if let Some(cluster) = key.and_then(|k| model.cluster_of(k)) {
            return Ok(Assignment::Direct(cluster));
        }

        let signature = self.corpus.signature_of(record)?;
        let similar = self.similar_to(index, &signature);
        let assignment = predominant(
            similar.keys().map(|k| model.cluster_of(k)),
            self.min_share,
        );
        debug!(
            target: "neardup::service",
            key = key.unwrap_or("<none>"),
            candidates = similar.len(),
            %assignment,
            "Cluster assignment"
        );
        Ok(assignment)
    }
}
