//! Weighted DBSCAN over signatures
//!
//! Distance is the normalized Hamming distance between signatures. A point is
//! a core point when the summed weight of its `eps`-neighborhood (itself
//! included) reaches `min_samples`; weights enter the density test directly.
//!
//! Neighborhoods are computed by brute force, in parallel across points.
//! Expansion visits points in input order, so labels depend only on the
//! input order and never on thread scheduling.

use neardup_core::Signature;
use rayon::prelude::*;

/// Cluster label per point; `None` is noise.
pub type Labels = Vec<Option<usize>>;

/// Density clustering parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WeightedDbscan {
    eps: f64,
    min_samples: u64,
}

impl WeightedDbscan {
    /// `eps` is the maximum normalized Hamming distance between neighbors.
    pub fn new(eps: f64, min_samples: u64) -> Self {
        WeightedDbscan { eps, min_samples }
    }

    /// Largest number of differing positions still within `eps`.
    fn max_differences(&self, len: usize) -> usize {
        (self.eps * len as f64 + 1e-9).floor() as usize
    }

    /// Label `points` given per-point `weights`.
    ///
    /// All points must have the same length.
    pub fn fit(&self, points: &[Signature], weights: &[u64]) -> Labels {
        debug_assert_eq!(points.len(), weights.len());
        let n = points.len();
        if n == 0 {
            return Vec::new();
        }
        let max_diff = self.max_differences(points[0].len());

        let neighborhoods: Vec<Vec<usize>> = (0..n)
            .into_par_iter()
            .map(|i| {
                (0..n)
                    .filter(|&j| within(&points[i], &points[j], max_diff))
                    .collect()
            })
            .collect();

        let is_core: Vec<bool> = neighborhoods
            .par_iter()
            .map(|neighbors| neighbors.iter().map(|&j| weights[j]).sum::<u64>() >= self.min_samples)
            .collect();

        expand(&neighborhoods, &is_core)
    }
}

/// True if the signatures differ in at most `max_diff` positions.
fn within(a: &Signature, b: &Signature, max_diff: usize) -> bool {
    let mut diff = 0;
    for (x, y) in a.values().iter().zip(b.values()) {
        if x != y {
            diff += 1;
            if diff > max_diff {
                return false;
            }
        }
    }
    true
}

/// Grow clusters from core points in index order.
fn expand(neighborhoods: &[Vec<usize>], is_core: &[bool]) -> Labels {
    let mut labels: Labels = vec![None; neighborhoods.len()];
    let mut next_label = 0;
    let mut stack = Vec::new();

    for seed in 0..neighborhoods.len() {
        if labels[seed].is_some() || !is_core[seed] {
            continue;
        }
        stack.push(seed);
        while let Some(i) = stack.pop() {
            if labels[i].is_some() {
                continue;
            }
            labels[i] = Some(next_label);
            if is_core[i] {
                stack.extend(
                    neighborhoods[i]
                        .iter()
                        .copied()
                        .filter(|&v| labels[v].is_none()),
                );
            }
        }
        next_label += 1;
    }
    labels
}
