//! Configuration via `neardup.toml`
//!
//! Every option is a named, typed field with a default, so an empty file is
//! a valid configuration. Values are validated eagerly: a bad value is
//! reported with the offending field before any state is touched.

use crate::error::{Error, Result};
use crate::types::{Record, ShingleRule};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Config file name placed in the artifact directory.
pub const CONFIG_FILE_NAME: &str = "neardup.toml";

// ============================================================================
// Retention
// ============================================================================

/// Whether a large intermediate stays resident during a clustering fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Retention {
    /// Keep the structure in memory for the whole fit
    #[default]
    KeepInMemory,
    /// Write it to the artifact store, release it, and reload when needed
    ReloadOnDemand,
}

/// Per-artifact retention used by the clustering fit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Document table (records + signatures)
    pub corpus: Retention,
    /// LSH bucket tables
    pub similarity_index: Retention,
    /// Signature -> document keys table (the weighted points)
    pub signature_table: Retention,
}

impl RetentionPolicy {
    /// Everything reloaded on demand: lowest peak memory.
    pub fn reload_all() -> Self {
        RetentionPolicy {
            corpus: Retention::ReloadOnDemand,
            similarity_index: Retention::ReloadOnDemand,
            signature_table: Retention::ReloadOnDemand,
        }
    }

    /// True when at least one artifact spills to disk.
    pub fn spills(&self) -> bool {
        [self.corpus, self.similarity_index, self.signature_table]
            .contains(&Retention::ReloadOnDemand)
    }
}

// ============================================================================
// Shingles
// ============================================================================

/// Shingling configuration: per-field rules plus global flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShingleConfig {
    /// Deduplicate shingles (first-seen order kept before sorting)
    pub unique: bool,
    /// Keep letter case instead of lowercasing
    pub case_sensitive: bool,
    /// Field name -> ordered rules
    pub fields: BTreeMap<String, Vec<ShingleRule>>,
}

impl Default for ShingleConfig {
    fn default() -> Self {
        let mut fields = BTreeMap::new();
        fields.insert(
            Record::TITLE.to_string(),
            vec![ShingleRule::ngrams(2, 3), ShingleRule::Words],
        );
        fields.insert(
            Record::CONTENT.to_string(),
            vec![ShingleRule::ngrams(5, 7), ShingleRule::Words],
        );
        fields.insert(
            Record::CONTAINED_URLS.to_string(),
            vec![ShingleRule::ngrams(3, 4), ShingleRule::Words],
        );
        ShingleConfig {
            unique: true,
            case_sensitive: false,
            fields,
        }
    }
}

impl ShingleConfig {
    /// Word shingles only, on every record field.
    pub fn words_only() -> Self {
        let fields = Record::FIELDS
            .iter()
            .map(|f| (f.to_string(), vec![ShingleRule::Words]))
            .collect();
        ShingleConfig {
            fields,
            ..ShingleConfig::default()
        }
    }

    /// Check field names and rule ranges.
    pub fn validate(&self) -> Result<()> {
        if self.fields.is_empty() {
            return Err(Error::configuration(
                "shingles.fields",
                "at least one field must have shingle rules",
            ));
        }
        for (field, rules) in &self.fields {
            if !Record::FIELDS.contains(&field.as_str()) {
                return Err(Error::configuration(
                    format!("shingles.fields.{}", field),
                    format!(
                        "unknown field '{}', expected one of {:?}",
                        field,
                        Record::FIELDS
                    ),
                ));
            }
            if rules.is_empty() {
                return Err(Error::configuration(
                    format!("shingles.fields.{}", field),
                    "field has no rules",
                ));
            }
            for rule in rules {
                if let ShingleRule::NGrams { min_n, max_n } = *rule {
                    if min_n == 0 || min_n > max_n {
                        return Err(Error::configuration(
                            format!("shingles.fields.{}", field),
                            format!(
                                "invalid n-gram range {}: need 1 <= min_n <= max_n",
                                rule
                            ),
                        ));
                    }
                }
            }
        }
        Ok(())
    }
}

// ============================================================================
// Config
// ============================================================================

/// Full configuration loaded from `neardup.toml`.
///
/// # Example
///
/// ```toml
/// threshold = 0.6
/// num_perm = 128
/// min_samples = 3
/// eps = 0.6
/// artifact_dir = "OUT"
///
/// [shingles.fields]
/// title = [[2, 3], "words"]
///
/// [retention]
/// corpus = "reload_on_demand"
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LSH similarity threshold, in `(0, 1]`
    pub threshold: f64,
    /// MinHash signature length
    pub num_perm: usize,
    /// Minimum total neighborhood weight for a DBSCAN core point
    pub min_samples: u64,
    /// Maximum normalized Hamming distance between neighbors, in `(0, 1]`
    pub eps: f64,
    /// Minimum candidate share for accepting a predominant cluster, in `(0, 1]`
    pub predominant_cluster_min_percentage: f64,
    /// Remove noise documents from the corpus and index after a fit
    pub prune_noise: bool,
    /// Keep (and persist) the list of noise documents
    pub retain_noise: bool,
    /// Replace existing fit outputs in the artifact directory
    pub overwrite: bool,
    /// Where artifacts are persisted; `None` keeps everything in memory
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact_dir: Option<PathBuf>,
    /// Shingling rules
    pub shingles: ShingleConfig,
    /// Spill/reload policy for fit intermediates
    pub retention: RetentionPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            threshold: 0.6,
            num_perm: 128,
            min_samples: 3,
            eps: 0.6,
            predominant_cluster_min_percentage: 0.6,
            prune_noise: true,
            retain_noise: false,
            overwrite: true,
            artifact_dir: None,
            shingles: ShingleConfig::default(),
            retention: RetentionPolicy::default(),
        }
    }
}

fn check_unit_interval(field: &str, value: f64) -> Result<()> {
    if value.is_nan() || value <= 0.0 || value > 1.0 {
        return Err(Error::configuration(
            field,
            format!("must be in (0, 1], got {}", value),
        ));
    }
    Ok(())
}

impl Config {
    /// Validate every field.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Configuration`] naming the first offending field.
    pub fn validate(&self) -> Result<()> {
        check_unit_interval("threshold", self.threshold)?;
        check_unit_interval("eps", self.eps)?;
        check_unit_interval(
            "predominant_cluster_min_percentage",
            self.predominant_cluster_min_percentage,
        )?;
        if self.num_perm == 0 {
            return Err(Error::configuration("num_perm", "must be positive"));
        }
        if self.min_samples == 0 {
            return Err(Error::configuration("min_samples", "must be positive"));
        }
        self.shingles.validate()?;
        if self.retention.spills() && self.artifact_dir.is_none() {
            return Err(Error::configuration(
                "retention",
                "reload_on_demand requires artifact_dir to be set",
            ));
        }
        Ok(())
    }

    /// Returns the default config file content with comments.
    pub fn default_toml() -> &'static str {
        r#"# neardup configuration

# LSH similarity threshold in (0, 1]
threshold = 0.6

# MinHash signature length
num_perm = 128

# DBSCAN: minimum total neighborhood weight for a core point
min_samples = 3

# DBSCAN: maximum normalized Hamming distance between neighbors, in (0, 1]
eps = 0.6

# Minimum share of similar candidates that must agree on a cluster
predominant_cluster_min_percentage = 0.6

# Remove noise documents from the corpus and index after clustering
prune_noise = true

# Keep the list of noise documents (persisted as the `noise` artifact)
retain_noise = false

# Replace existing fit outputs in artifact_dir
overwrite = true

# Directory for persisted artifacts. Leave unset to keep everything in memory.
# artifact_dir = "OUT"

[shingles]
unique = true
case_sensitive = false

# Per-field rules: "words" or [min_n, max_n] character n-grams
[shingles.fields]
title = [[2, 3], "words"]
content = [[5, 7], "words"]
contained_urls = [[3, 4], "words"]

# "keep_in_memory" or "reload_on_demand" (requires artifact_dir)
[retention]
corpus = "keep_in_memory"
similarity_index = "keep_in_memory"
signature_table = "keep_in_memory"
"#
    }

    /// Parse and validate a config from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| Error::configuration("neardup.toml", e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Read and parse config from a file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::persistence(path.display().to_string(), e))?;
        Self::from_toml_str(&content).map_err(|e| match e {
            Error::Configuration { field, reason } if field == "neardup.toml" => {
                Error::configuration(path.display().to_string(), reason)
            }
            other => other,
        })
    }

    /// Write the default config file if it does not already exist.
    pub fn write_default_if_missing(path: &Path) -> Result<()> {
        if !path.exists() {
            std::fs::write(path, Self::default_toml())
                .map_err(|e| Error::persistence(path.display().to_string(), e))?;
        }
        Ok(())
    }

    /// Serialize this config to TOML and write it to the given path.
    pub fn write_to_file(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| Error::Serialization(format!("failed to serialize config: {}", e)))?;
        std::fs::write(path, content).map_err(|e| Error::persistence(path.display().to_string(), e))
    }
}
