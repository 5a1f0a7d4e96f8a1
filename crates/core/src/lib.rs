//! Core types for neardup
//!
//! This crate defines the foundational types used throughout the system:
//! - DocKey / Record: document identity and the crawled article
//! - Signature: fixed-length MinHash signature with Jaccard/Hamming helpers
//! - ShingleRule: per-field shingling rule (`words` or `[min_n, max_n]`)
//! - Config: `neardup.toml` configuration with validation
//! - Error: error type hierarchy

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod types;

pub use config::{Config, Retention, RetentionPolicy, ShingleConfig, CONFIG_FILE_NAME};
pub use error::{Component, Error, Result};
pub use types::{Cluster, ClusterIndex, DocKey, Record, ShingleRule, Signature};
