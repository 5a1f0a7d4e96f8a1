//! Error types for neardup
//!
//! This module defines all error types used throughout the system.
//! We use `thiserror` for automatic `Display` and `Error` trait implementations.
//!
//! | Category | Variants |
//! |----------|----------|
//! | Input | `Configuration`, `InvalidCorpus` |
//! | Lifecycle | `NotFitted`, `EmptyCorpus`, `Busy`, `Worker` |
//! | Lookup | `KeyNotFound` |
//! | Storage | `Persistence`, `ArtifactExists`, `Corruption`, `Serialization` |
//!
//! An artifact that is legitimately absent is not an error: loaders return
//! `Ok(None)` for it.

use std::fmt;
use std::io;
use thiserror::Error;

/// Result type alias for neardup operations
pub type Result<T> = std::result::Result<T, Error>;

/// Component whose fit state gates an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Component {
    /// The LSH similarity index
    SimilarityIndex,
    /// The clustering model (cluster list + key mapping)
    Clustering,
}

impl fmt::Display for Component {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Component::SimilarityIndex => f.write_str("similarity index"),
            Component::Clustering => f.write_str("clustering"),
        }
    }
}

/// Error types for neardup
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration rejected before any state was touched
    #[error("configuration error in `{field}`: {reason}")]
    Configuration {
        /// Offending configuration field
        field: String,
        /// What is wrong with it
        reason: String,
    },

    /// A query or operation needs a component that has not been fitted
    #[error("{component} is not fitted")]
    NotFitted {
        /// The component that must be fitted first
        component: Component,
    },

    /// Clustering requested on a corpus without documents
    #[error("cannot fit clustering on an empty corpus")]
    EmptyCorpus,

    /// Document key not present
    #[error("key not found: {0}")]
    KeyNotFound(String),

    /// I/O failure while reading or writing an artifact
    #[error("persistence error for artifact `{artifact}`: {source}")]
    Persistence {
        /// Logical artifact name
        artifact: String,
        /// Underlying I/O error
        #[source]
        source: io::Error,
    },

    /// Refused to replace an existing artifact
    #[error("artifact `{0}` already exists and overwrite is disabled")]
    ArtifactExists(String),

    /// Artifact bytes failed validation (magic, version, checksum)
    #[error("artifact `{artifact}` is corrupt: {reason}")]
    Corruption {
        /// Logical artifact name
        artifact: String,
        /// What failed
        reason: String,
    },

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Corpus input could not be parsed
    #[error("invalid corpus: {0}")]
    InvalidCorpus(String),

    /// A mutation was attempted while a clustering fit is running
    #[error("busy: {0} rejected while a clustering fit is in progress")]
    Busy(String),

    /// The background fit worker could not run or finish a job
    #[error("fit worker error: {0}")]
    Worker(String),
}

impl Error {
    /// Build a configuration error for `field`.
    pub fn configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Configuration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Build a not-fitted error.
    pub fn not_fitted(component: Component) -> Self {
        Error::NotFitted { component }
    }

    /// Build a persistence error for `artifact`.
    pub fn persistence(artifact: impl Into<String>, source: io::Error) -> Self {
        Error::Persistence {
            artifact: artifact.into(),
            source,
        }
    }

    /// Build a corruption error for `artifact`.
    pub fn corruption(artifact: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::Corruption {
            artifact: artifact.into(),
            reason: reason.into(),
        }
    }

    /// True for errors raised before any mutation happened.
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::Configuration { .. }
                | Error::NotFitted { .. }
                | Error::EmptyCorpus
                | Error::Busy(_)
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::InvalidCorpus(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for Error {
    fn from(e: rmp_serde::encode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for Error {
    fn from(e: rmp_serde::decode::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
