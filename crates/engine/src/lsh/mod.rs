//! Locality-sensitive hashing over MinHash signatures
//!
//! - `params`: banding optimizer
//! - `index`: the bucket tables

pub mod index;
pub mod params;

pub use index::SimilarityIndex;
pub use params::{optimal_params, LshParams};
