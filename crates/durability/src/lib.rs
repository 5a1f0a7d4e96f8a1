//! Durability layer for neardup
//!
//! This crate handles everything that touches disk:
//!
//! - Artifact store: named, checksummed, atomically written artifacts
//! - Write modes: create, skip-existing, overwrite, per artifact or per batch
//! - Retention: keep a working structure resident or spill and reload it

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod retention;
pub mod store;

pub use retention::Held;
pub use store::{
    decode_artifact, encode_artifact, Artifact, ArtifactBatch, ArtifactStore, SaveOutcome,
    WriteMode, ARTIFACT_FORMAT_VERSION, ARTIFACT_HEADER_SIZE, ARTIFACT_MAGIC,
};
