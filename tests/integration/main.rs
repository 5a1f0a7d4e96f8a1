//! Integration Tests
//!
//! Cross-crate tests through the public service API:
//! - End to end: fixture corpus, fit, similar and cluster queries
//! - Concurrency: queries during a background fit, busy writers
//! - Persistence: artifacts on disk, restore, write modes

#[path = "../common/mod.rs"]
mod common;

mod concurrency;
mod end_to_end;
mod persistence;
