//! Retention of large working structures
//!
//! A clustering fit passes a few large structures between stages (the corpus,
//! the LSH tables, the signature table). [`Held`] wraps such a structure and,
//! depending on its [`Retention`], either keeps it resident or writes it to a
//! scratch [`ArtifactStore`] and drops it until the stage that needs it calls
//! [`Held::into_inner`].

use crate::store::{Artifact, ArtifactStore, WriteMode};
use neardup_core::{Error, Result, Retention};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::Arc;
use tracing::debug;

/// A value that is either resident or spilled to a scratch store.
#[derive(Debug)]
pub enum Held<T> {
    /// Kept in memory
    Resident(T),
    /// Written to the scratch store under this artifact name
    Spilled(Artifact),
}

impl<T: Serialize + DeserializeOwned> Held<T> {
    /// Apply `retention` to `value`.
    ///
    /// With [`Retention::ReloadOnDemand`] the value is written to `scratch`
    /// (always overwriting) and released.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if spilling is requested without a store.
    pub fn retain(
        value: T,
        artifact: Artifact,
        retention: Retention,
        scratch: Option<&ArtifactStore>,
    ) -> Result<Self> {
        match retention {
            Retention::KeepInMemory => Ok(Held::Resident(value)),
            Retention::ReloadOnDemand => {
                let store = require_store(artifact, scratch)?;
                store.save(artifact, &value, WriteMode::Overwrite)?;
                drop(value);
                debug!(
                    target: "neardup::store",
                    artifact = artifact.name(),
                    "Released from memory until reload"
                );
                Ok(Held::Spilled(artifact))
            }
        }
    }

    /// True if the value is in memory.
    pub fn is_resident(&self) -> bool {
        matches!(self, Held::Resident(_))
    }

    /// Take the value back, reloading it if it was spilled.
    pub fn into_inner(self, scratch: Option<&ArtifactStore>) -> Result<T> {
        match self {
            Held::Resident(value) => Ok(value),
            Held::Spilled(artifact) => {
                let store = require_store(artifact, scratch)?;
                let value = store.load(artifact)?.ok_or_else(|| {
                    Error::corruption(artifact.name(), "spilled artifact missing from scratch store")
                })?;
                debug!(
                    target: "neardup::store",
                    artifact = artifact.name(),
                    "Reloaded into memory"
                );
                Ok(value)
            }
        }
    }
}

impl<U> Held<Arc<U>>
where
    Arc<U>: Serialize + DeserializeOwned,
{
    /// Apply `retention` to a shared value.
    ///
    /// A value with other live handles stays resident: spilling it would
    /// free nothing.
    pub fn retain_shared(
        value: Arc<U>,
        artifact: Artifact,
        retention: Retention,
        scratch: Option<&ArtifactStore>,
    ) -> Result<Self> {
        if retention == Retention::ReloadOnDemand && Arc::strong_count(&value) > 1 {
            require_store(artifact, scratch)?;
            debug!(
                target: "neardup::store",
                artifact = artifact.name(),
                handles = Arc::strong_count(&value),
                "Shared elsewhere, kept resident"
            );
            return Ok(Held::Resident(value));
        }
        Held::retain(value, artifact, retention, scratch)
    }
}

fn require_store(artifact: Artifact, scratch: Option<&ArtifactStore>) -> Result<&ArtifactStore> {
    scratch.ok_or_else(|| {
        Error::configuration(
            format!("retention.{}", artifact.name()),
            "reload_on_demand requires artifact_dir to be set",
        )
    })
}
