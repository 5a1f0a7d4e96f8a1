//! Canonical cluster ordering
//!
//! Raw DBSCAN label numbers carry no meaning. The canonical form sorts keys
//! inside each cluster, then orders clusters by size descending and, among
//! equal sizes, by the JSON text of the sorted key list descending. Cluster
//! indices are positions in that order.

use super::dbscan::Labels;
use neardup_core::{Cluster, ClusterIndex, DocKey, Signature};
use std::cmp::Reverse;
use std::collections::BTreeMap;

/// Exact signature -> keys sharing it.
pub type SignatureTable = BTreeMap<Signature, Vec<DocKey>>;

/// Expand per-point labels back to document keys.
///
/// `labels[i]` belongs to the `i`-th entry of `table` in iteration order.
/// Returns the raw clusters (in label order) and the noise keys.
pub fn expand_labels(table: &SignatureTable, labels: &Labels) -> (Vec<Vec<DocKey>>, Vec<DocKey>) {
    debug_assert_eq!(table.len(), labels.len());
    let mut clusters: BTreeMap<usize, Vec<DocKey>> = BTreeMap::new();
    let mut noise = Vec::new();
    for (keys, label) in table.values().zip(labels) {
        match label {
            Some(label) => clusters.entry(*label).or_default().extend(keys.iter().cloned()),
            None => noise.extend(keys.iter().cloned()),
        }
    }
    noise.sort();
    (clusters.into_values().collect(), noise)
}

/// Sort and order clusters canonically.
pub fn canonicalize(clusters: Vec<Vec<DocKey>>) -> Vec<Cluster> {
    let mut clusters: Vec<Cluster> = clusters
        .into_iter()
        .map(|mut keys| {
            keys.sort();
            keys.dedup();
            keys
        })
        .collect();
    clusters.sort_by_cached_key(|keys| (Reverse(keys.len()), Reverse(serialized(keys))));
    clusters
}

fn serialized(keys: &[DocKey]) -> String {
    serde_json::Value::from(keys).to_string()
}

/// Key -> index of its cluster in `clusters`.
pub fn key_to_cluster_index(clusters: &[Cluster]) -> BTreeMap<DocKey, ClusterIndex> {
    clusters
        .iter()
        .enumerate()
        .flat_map(|(index, keys)| keys.iter().map(move |key| (key.clone(), index)))
        .collect()
}
