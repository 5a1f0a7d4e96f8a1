//! Batch clustering
//!
//! - `dbscan`: weighted density clustering over signatures
//! - `canonical`: label expansion and canonical ordering
//! - `engine`: the fit pipeline with retention and persistence

pub mod canonical;
pub mod dbscan;
pub mod engine;

pub use canonical::{canonicalize, expand_labels, key_to_cluster_index, SignatureTable};
pub use dbscan::{Labels, WeightedDbscan};
pub use engine::{ClusterEngine, FitOutcome};

use neardup_core::{Cluster, ClusterIndex, DocKey, Error};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;

/// Lifecycle of the clustering model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FitState {
    /// No clustering has succeeded yet
    Unfit,
    /// A fit is running; queries see the previous model, if any
    Fitting,
    /// A model is published
    Fit,
}

impl fmt::Display for FitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FitState::Unfit => f.write_str("unfit"),
            FitState::Fitting => f.write_str("fitting"),
            FitState::Fit => f.write_str("fit"),
        }
    }
}

/// Canonical clustering result.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ClusterModel {
    clusters: Vec<Cluster>,
    key_to_cluster_index: BTreeMap<DocKey, ClusterIndex>,
    noise: Option<Vec<DocKey>>,
}

impl ClusterModel {
    /// Build from canonical clusters; the mapping is derived.
    pub fn new(clusters: Vec<Cluster>, noise: Option<Vec<DocKey>>) -> Self {
        let key_to_cluster_index = key_to_cluster_index(&clusters);
        ClusterModel {
            clusters,
            key_to_cluster_index,
            noise,
        }
    }

    /// Rebuild from persisted parts, checking that the mapping agrees with
    /// the cluster list.
    pub fn restore(
        clusters: Vec<Cluster>,
        mapping: BTreeMap<DocKey, ClusterIndex>,
        noise: Option<Vec<DocKey>>,
    ) -> neardup_core::Result<Self> {
        let model = ClusterModel::new(clusters, noise);
        if model.key_to_cluster_index != mapping {
            return Err(Error::corruption(
                "key_to_cluster_index",
                "mapping does not match the cluster list",
            ));
        }
        Ok(model)
    }

    /// Cluster index of a known key.
    pub fn cluster_of(&self, key: &str) -> Option<ClusterIndex> {
        self.key_to_cluster_index.get(key).copied()
    }

    /// Members of a cluster.
    pub fn members(&self, index: ClusterIndex) -> Option<&Cluster> {
        self.clusters.get(index)
    }

    /// Canonical cluster list.
    pub fn clusters(&self) -> &[Cluster] {
        &self.clusters
    }

    /// Key -> cluster index.
    pub fn mapping(&self) -> &BTreeMap<DocKey, ClusterIndex> {
        &self.key_to_cluster_index
    }

    /// Noise keys, when retained.
    pub fn noise(&self) -> Option<&[DocKey]> {
        self.noise.as_deref()
    }

    /// Number of clusters.
    pub fn len(&self) -> usize {
        self.clusters.len()
    }

    /// True if every document was noise.
    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

/// Statistics of one clustering fit.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FitSummary {
    /// Number of clusters
    pub clusters: usize,
    /// Documents assigned to a cluster
    pub clustered_documents: usize,
    /// Documents labeled noise
    pub noise_documents: usize,
    /// Distinct signatures (weighted points)
    pub weighted_points: usize,
    /// Size of cluster 0
    pub largest_cluster: usize,
    /// Noise documents removed from the corpus
    pub pruned_documents: usize,
    /// Wall time of the fit
    pub elapsed_ms: u64,
}
