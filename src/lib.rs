//! neardup - near-duplicate news detection and clustering
//!
//! Articles are shingled, summarized as MinHash signatures and indexed with
//! banded LSH. A weighted DBSCAN pass groups near-identical articles into
//! canonical clusters; new articles are assigned to the cluster most of
//! their similar documents belong to.
//!
//! # Quick Start
//!
//! ```ignore
//! use neardup::{ClusterService, Config, CorpusSource, Record};
//!
//! let service = ClusterService::new(Config::default())?;
//! let summary = service.fit(CorpusSource::Path("results.json".into()))?;
//!
//! let query = Record::new("Markets rally", "stocks rally as ...", Default::default());
//! let similar = service.similar(&query)?;
//! let assignment = service.cluster(&query, None)?;
//! ```
//!
//! # Architecture
//!
//! - `neardup-core`: types, errors and configuration
//! - `neardup-durability`: the artifact store and retention
//! - `neardup-engine`: shingling, signatures, LSH, clustering and the service

pub use neardup_core::{
    Cluster, ClusterIndex, Component, Config, DocKey, Error, Record, Result, Retention,
    RetentionPolicy, ShingleConfig, ShingleRule, Signature, CONFIG_FILE_NAME,
};
pub use neardup_durability::{Artifact, ArtifactBatch, ArtifactStore, SaveOutcome, WriteMode};
pub use neardup_engine::{
    Assignment, ClusterAssigner, ClusterEngine, ClusterModel, ClusterService, Corpus,
    CorpusSource, FitState, FitSummary, FitTicket, NoMatchReason, ShingleExtractor,
    SignatureBuilder, SimilarDoc, SimilarityIndex, Snapshot,
};
