//! Similarity and clustering engine for neardup
//!
//! This crate builds on the core types and the artifact store:
//! - Shingling and MinHash signatures
//! - Corpus: key -> record + signature
//! - LSH similarity index with optimized banding
//! - Weighted DBSCAN, canonical cluster order and the fit pipeline
//! - Online cluster assignment
//! - `ClusterService`: snapshot publication, fit guard and the fit worker
//!
//! The service is the only component that knows about:
//! - Concurrency between queries, writers and fits
//! - Restoring state from the artifact directory

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod assigner;
pub mod background;
pub mod cluster;
pub mod corpus;
pub mod lsh;
pub mod service;
pub mod shingle;
pub mod signature;

pub use assigner::{predominant, Assignment, ClusterAssigner, NoMatchReason, SimilarDoc};
pub use background::{FitWorker, Ticket, WorkerStats};
pub use cluster::{ClusterEngine, ClusterModel, FitOutcome, FitState, FitSummary, WeightedDbscan};
pub use corpus::{Corpus, CorpusEntry, CorpusSource};
pub use lsh::{optimal_params, LshParams, SimilarityIndex};
pub use service::{ClusterService, FitTicket, Snapshot, FIT_WORKER_THREAD};
pub use shingle::{sort_shingles, ShingleExtractor};
pub use signature::{SignatureBuilder, SIGNATURE_SCHEME_VERSION};
