//! Named artifact store
//!
//! Every artifact is one file `<dir>/<name>.bin`:
//!
//! ```text
//! +-------+---------+-------+---------------------+
//! | NDAF  | version | crc32 | MessagePack payload |
//! | 4 B   | u32 LE  | u32 LE| ...                 |
//! +-------+---------+-------+---------------------+
//! ```
//!
//! # Crash Safety
//!
//! Writes follow the write-fsync-rename pattern:
//! 1. Write to a temporary file (`.<name>.bin.tmp`)
//! 2. fsync the temporary file
//! 3. Atomic rename to the final path
//! 4. fsync the parent directory
//!
//! Readers therefore see either the previous artifact or the new one, never a
//! partial file. A missing artifact loads as `Ok(None)`.
//!
//! Artifacts that must agree with each other (a corpus and the clusters fit
//! on it) go through an [`ArtifactBatch`]. [`ArtifactStore::commit`] decides
//! the write mode once for the whole batch, stages every temporary file
//! before any final path changes, then applies removals and renames.

use neardup_core::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Magic bytes for artifact files
pub const ARTIFACT_MAGIC: &[u8; 4] = b"NDAF";
/// Current artifact format version
pub const ARTIFACT_FORMAT_VERSION: u32 = 1;
/// Header size: magic + version + crc
pub const ARTIFACT_HEADER_SIZE: usize = 12;

const ARTIFACT_EXTENSION: &str = "bin";
const SCRATCH_DIR: &str = ".scratch";

// ============================================================================
// Artifact names
// ============================================================================

/// Logical name of a persisted artifact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Artifact {
    /// Document table: key -> record + signature
    Corpus,
    /// LSH bucket tables
    SimilarityIndex,
    /// Canonical cluster list
    Clusters,
    /// Key -> cluster index mapping
    KeyToClusterIndex,
    /// Signature -> keys intermediate (weighted points)
    SignatureToKeys,
    /// Keys labeled noise by the last fit
    Noise,
}

impl Artifact {
    /// All artifacts, in persistence order.
    pub const ALL: [Artifact; 6] = [
        Artifact::Corpus,
        Artifact::SimilarityIndex,
        Artifact::Clusters,
        Artifact::KeyToClusterIndex,
        Artifact::SignatureToKeys,
        Artifact::Noise,
    ];

    /// Logical name used for the file stem.
    pub fn name(&self) -> &'static str {
        match self {
            Artifact::Corpus => "corpus",
            Artifact::SimilarityIndex => "similarity_index",
            Artifact::Clusters => "clusters",
            Artifact::KeyToClusterIndex => "key_to_cluster_index",
            Artifact::SignatureToKeys => "signature_to_keys",
            Artifact::Noise => "noise",
        }
    }

    /// File name inside the store directory.
    pub fn file_name(&self) -> String {
        format!("{}.{}", self.name(), ARTIFACT_EXTENSION)
    }

    fn temp_file_name(&self) -> String {
        format!(".{}.{}.tmp", self.name(), ARTIFACT_EXTENSION)
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Write modes
// ============================================================================

/// What to do when the target artifact already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with [`Error::ArtifactExists`]
    Create,
    /// Leave the existing artifact untouched and report [`SaveOutcome::Skipped`]
    SkipExisting,
    /// Atomically replace it
    Overwrite,
}

impl WriteMode {
    /// Mode for fit outputs given the `overwrite` config flag.
    pub fn from_overwrite(overwrite: bool) -> Self {
        if overwrite {
            WriteMode::Overwrite
        } else {
            WriteMode::SkipExisting
        }
    }
}

/// Result of a save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The artifact was written
    Written,
    /// An existing artifact was kept
    Skipped,
}

// ============================================================================
// Batches
// ============================================================================

/// Artifacts written and removed together.
///
/// Values are encoded when added, so a batch holds only framed bytes.
#[derive(Debug, Default)]
pub struct ArtifactBatch {
    writes: Vec<(Artifact, Vec<u8>)>,
    removals: Vec<Artifact>,
}

impl ArtifactBatch {
    /// Empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Write `value` as `artifact`. Replaces an earlier entry for it.
    pub fn put<T: Serialize>(&mut self, artifact: Artifact, value: &T) -> Result<()> {
        let buf = encode_artifact(value)?;
        self.forget(artifact);
        self.writes.push((artifact, buf));
        Ok(())
    }

    /// Remove `artifact` if it exists. Replaces an earlier entry for it.
    pub fn delete(&mut self, artifact: Artifact) {
        self.forget(artifact);
        self.removals.push(artifact);
    }

    /// Remove each of `artifacts`.
    pub fn delete_all(&mut self, artifacts: &[Artifact]) {
        for &artifact in artifacts {
            self.delete(artifact);
        }
    }

    /// True if the batch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.writes.is_empty() && self.removals.is_empty()
    }

    /// Artifacts written, in commit order.
    pub fn written(&self) -> impl Iterator<Item = Artifact> + '_ {
        self.writes.iter().map(|(artifact, _)| *artifact)
    }

    /// Artifacts removed.
    pub fn removed(&self) -> &[Artifact] {
        &self.removals
    }

    fn forget(&mut self, artifact: Artifact) {
        self.writes.retain(|(a, _)| *a != artifact);
        self.removals.retain(|a| *a != artifact);
    }
}

// ============================================================================
// Encoding
// ============================================================================

/// Encode a value into the framed artifact format.
pub fn encode_artifact<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let payload = rmp_serde::to_vec(value)?;
    let crc = crc32fast::hash(&payload);

    let mut buf = Vec::with_capacity(ARTIFACT_HEADER_SIZE + payload.len());
    buf.extend_from_slice(ARTIFACT_MAGIC);
    buf.extend_from_slice(&ARTIFACT_FORMAT_VERSION.to_le_bytes());
    buf.extend_from_slice(&crc.to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Validate the frame and decode the payload.
pub fn decode_artifact<T: DeserializeOwned>(artifact: Artifact, buf: &[u8]) -> Result<T> {
    if buf.len() < ARTIFACT_HEADER_SIZE {
        return Err(Error::corruption(
            artifact.name(),
            format!("file too small ({} bytes)", buf.len()),
        ));
    }
    if &buf[0..4] != ARTIFACT_MAGIC {
        return Err(Error::corruption(artifact.name(), "bad magic"));
    }
    let version = read_u32(&buf[4..8]);
    if version != ARTIFACT_FORMAT_VERSION {
        return Err(Error::corruption(
            artifact.name(),
            format!("unsupported format version {}", version),
        ));
    }
    let stored_crc = read_u32(&buf[8..12]);
    let payload = &buf[ARTIFACT_HEADER_SIZE..];
    let actual_crc = crc32fast::hash(payload);
    if stored_crc != actual_crc {
        return Err(Error::corruption(
            artifact.name(),
            format!(
                "checksum mismatch (stored {:08x}, computed {:08x})",
                stored_crc, actual_crc
            ),
        ));
    }
    rmp_serde::from_slice(payload)
        .map_err(|e| Error::corruption(artifact.name(), format!("decode error: {}", e)))
}

fn read_u32(bytes: &[u8]) -> u32 {
    let mut raw = [0u8; 4];
    raw.copy_from_slice(&bytes[..4]);
    u32::from_le_bytes(raw)
}

// ============================================================================
// ArtifactStore
// ============================================================================

/// Directory of named artifacts.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    dir: PathBuf,
}

impl ArtifactStore {
    /// Open a store, creating the directory if needed.
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| Error::persistence(dir.display().to_string(), e))?;
        Ok(ArtifactStore { dir })
    }

    /// Store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path of an artifact.
    pub fn path(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(artifact.file_name())
    }

    /// True if the artifact file exists.
    pub fn exists(&self, artifact: Artifact) -> bool {
        self.path(artifact).exists()
    }

    /// Sub-store for spilled working artifacts.
    pub fn scratch(&self) -> Result<ArtifactStore> {
        ArtifactStore::open(self.dir.join(SCRATCH_DIR))
    }

    /// Save an artifact.
    ///
    /// # Errors
    ///
    /// [`Error::ArtifactExists`] in [`WriteMode::Create`] when the artifact is
    /// present; [`Error::Persistence`] on I/O failure.
    pub fn save<T: Serialize>(
        &self,
        artifact: Artifact,
        value: &T,
        mode: WriteMode,
    ) -> Result<SaveOutcome> {
        if self.exists(artifact) {
            match mode {
                WriteMode::Create => return Err(Error::ArtifactExists(artifact.name().into())),
                WriteMode::SkipExisting => {
                    warn!(
                        target: "neardup::store",
                        artifact = artifact.name(),
                        dir = %self.dir.display(),
                        "Artifact exists and overwrite is disabled, skipping write"
                    );
                    return Ok(SaveOutcome::Skipped);
                }
                WriteMode::Overwrite => {}
            }
        }

        let buf = encode_artifact(value)?;
        self.write_atomic(artifact, &buf)
            .map_err(|e| Error::persistence(artifact.name(), e))?;
        debug!(
            target: "neardup::store",
            artifact = artifact.name(),
            bytes = buf.len(),
            "Artifact written"
        );
        Ok(SaveOutcome::Written)
    }

    /// Apply a batch.
    ///
    /// The write mode is decided once: if any artifact the batch writes or
    /// removes exists, [`WriteMode::Create`] fails and
    /// [`WriteMode::SkipExisting`] leaves the whole store untouched. Every
    /// write is staged and fsynced before the first final path changes, so
    /// a staging failure leaves the previous artifacts in place. Removals
    /// run before renames; renames follow the order of [`ArtifactBatch::put`].
    pub fn commit(&self, batch: ArtifactBatch, mode: WriteMode) -> Result<SaveOutcome> {
        let existing: Vec<&'static str> = batch
            .written()
            .chain(batch.removed().iter().copied())
            .filter(|&artifact| self.exists(artifact))
            .map(|artifact| artifact.name())
            .collect();
        if let Some(&first) = existing.first() {
            match mode {
                WriteMode::Create => return Err(Error::ArtifactExists(first.into())),
                WriteMode::SkipExisting => {
                    warn!(
                        target: "neardup::store",
                        artifacts = %existing.join(","),
                        dir = %self.dir.display(),
                        "Artifacts exist and overwrite is disabled, skipping batch"
                    );
                    return Ok(SaveOutcome::Skipped);
                }
                WriteMode::Overwrite => {}
            }
        }

        let mut staged = Vec::with_capacity(batch.writes.len());
        for (artifact, buf) in &batch.writes {
            if let Err(e) = self.write_temp(*artifact, buf) {
                self.discard_staged(&staged);
                self.discard_staged(&[*artifact]);
                return Err(Error::persistence(artifact.name(), e));
            }
            staged.push(*artifact);
        }

        for &artifact in &batch.removals {
            if let Err(e) = self.remove(artifact) {
                self.discard_staged(&staged);
                return Err(e);
            }
        }
        for &artifact in &staged {
            std::fs::rename(self.temp_path(artifact), self.path(artifact))
                .map_err(|e| Error::persistence(artifact.name(), e))?;
        }
        self.sync_dir()
            .map_err(|e| Error::persistence(self.dir.display().to_string(), e))?;

        debug!(
            target: "neardup::store",
            written = staged.len(),
            removed = batch.removals.len(),
            "Artifact batch committed"
        );
        Ok(SaveOutcome::Written)
    }

    fn temp_path(&self, artifact: Artifact) -> PathBuf {
        self.dir.join(artifact.temp_file_name())
    }

    fn write_atomic(&self, artifact: Artifact, buf: &[u8]) -> io::Result<()> {
        self.write_temp(artifact, buf)?;

        // Step 3: Atomic rename
        std::fs::rename(self.temp_path(artifact), self.path(artifact))?;

        // Step 4: fsync parent directory
        self.sync_dir()
    }

    fn write_temp(&self, artifact: Artifact, buf: &[u8]) -> io::Result<()> {
        // Step 1: Write to temporary file
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(self.temp_path(artifact))?;
        file.write_all(buf)?;

        // Step 2: fsync the file
        file.sync_all()
    }

    fn sync_dir(&self) -> io::Result<()> {
        File::open(&self.dir)?.sync_all()
    }

    fn discard_staged(&self, staged: &[Artifact]) {
        for &artifact in staged {
            if let Err(e) = std::fs::remove_file(self.temp_path(artifact)) {
                if e.kind() != io::ErrorKind::NotFound {
                    warn!(
                        target: "neardup::store",
                        artifact = artifact.name(),
                        error = %e,
                        "Failed to remove staged artifact"
                    );
                }
            }
        }
    }

    /// Load an artifact, `Ok(None)` if it was never written.
    pub fn load<T: DeserializeOwned>(&self, artifact: Artifact) -> Result<Option<T>> {
        let buf = match std::fs::read(self.path(artifact)) {
            Ok(buf) => buf,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::persistence(artifact.name(), e)),
        };
        decode_artifact(artifact, &buf).map(Some)
    }

    /// Remove an artifact. Returns whether it existed.
    pub fn remove(&self, artifact: Artifact) -> Result<bool> {
        match std::fs::remove_file(self.path(artifact)) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::persistence(artifact.name(), e)),
        }
    }

    /// Remove every artifact and leftover temporary file in this store.
    ///
    /// Returns the number of files removed.
    pub fn clear(&self) -> Result<usize> {
        let mut count = 0;
        for artifact in Artifact::ALL {
            if self.remove(artifact)? {
                count += 1;
            }
        }
        count += self.cleanup_temp_files()?;
        Ok(count)
    }

    /// Remove temporary files left behind by interrupted writes.
    pub fn cleanup_temp_files(&self) -> Result<usize> {
        let mut count = 0;
        for artifact in Artifact::ALL {
            match std::fs::remove_file(self.temp_path(artifact)) {
                Ok(()) => count += 1,
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(Error::persistence(artifact.name(), e)),
            }
        }
        Ok(count)
    }
}
