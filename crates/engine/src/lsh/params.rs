//! LSH banding parameters
//!
//! A pair of signatures with Jaccard `s` becomes a candidate with
//! probability `P(s) = 1 - (1 - s^r)^b`. For a threshold `t` the
//! false-positive mass is `∫₀ᵗ P(s) ds` and the false-negative mass is
//! `∫ₜ¹ 1 - P(s) ds`. The chosen `(b, r)` minimizes their equal-weighted sum
//! over all divisor pairs `b · r = num_perm`.

use neardup_core::{Error, Result};
use serde::{Deserialize, Serialize};

const FALSE_POSITIVE_WEIGHT: f64 = 0.5;
const FALSE_NEGATIVE_WEIGHT: f64 = 0.5;
const INTEGRATION_STEPS: usize = 1000;

/// Band count and rows per band.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LshParams {
    /// Number of bands
    pub bands: usize,
    /// Signature rows per band
    pub rows: usize,
}

impl LshParams {
    /// Probability that a pair with Jaccard `s` shares a bucket.
    pub fn candidate_probability(&self, s: f64) -> f64 {
        1.0 - (1.0 - s.powi(self.rows as i32)).powi(self.bands as i32)
    }

    /// Weighted false-positive + false-negative mass at `threshold`.
    pub fn error_mass(&self, threshold: f64) -> f64 {
        let false_positive = integrate(|s| self.candidate_probability(s), 0.0, threshold);
        let false_negative =
            integrate(|s| 1.0 - self.candidate_probability(s), threshold, 1.0);
        FALSE_POSITIVE_WEIGHT * false_positive + FALSE_NEGATIVE_WEIGHT * false_negative
    }
}

/// Pick `(bands, rows)` minimizing the error mass for `threshold`.
///
/// Ties keep the pair with fewer bands.
pub fn optimal_params(threshold: f64, num_perm: usize) -> Result<LshParams> {
    if threshold.is_nan() || threshold <= 0.0 || threshold > 1.0 {
        return Err(Error::configuration(
            "threshold",
            format!("must be in (0, 1], got {}", threshold),
        ));
    }
    if num_perm == 0 {
        return Err(Error::configuration("num_perm", "must be positive"));
    }

    let mut best = LshParams {
        bands: 1,
        rows: num_perm,
    };
    let mut best_mass = f64::INFINITY;
    for bands in (1..=num_perm).filter(|b| num_perm % b == 0) {
        let params = LshParams {
            bands,
            rows: num_perm / bands,
        };
        let mass = params.error_mass(threshold);
        if mass < best_mass {
            best_mass = mass;
            best = params;
        }
    }
    Ok(best)
}

/// Composite Simpson's rule over `[a, b]`.
fn integrate(f: impl Fn(f64) -> f64, a: f64, b: f64) -> f64 {
    if b <= a {
        return 0.0;
    }
    let h = (b - a) / INTEGRATION_STEPS as f64;
    let mut sum = f(a) + f(b);
    for i in 1..INTEGRATION_STEPS {
        let weight = if i % 2 == 1 { 4.0 } else { 2.0 };
        sum += weight * f(a + i as f64 * h);
    }
    sum * h / 3.0
}
