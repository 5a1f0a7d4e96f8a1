//! Clustering fit pipeline
//!
//! 1. Reject an empty corpus
//! 2. Apply retention to the similarity index
//! 3. Group documents by exact signature into weighted points
//! 4. Apply retention to the signature table and the corpus
//! 5. Weighted DBSCAN
//! 6. Expand labels back to keys and canonicalize
//! 7. Optionally prune noise from the corpus and the index
//! 8. Persist outputs as one batch (mapping last)
//!
//! Spilled structures go to the `.scratch` sub-store, which is cleared when
//! the fit ends, successfully or not. The inputs are shared `Arc`s: the
//! caller's published copies are never mutated; pruning works on a private
//! copy when the input is still shared, and a shared input is never spilled.
//!
//! With `overwrite = false` the outputs are all written or all skipped, so
//! the store never mixes clusters of one fit with a mapping of another.

use super::canonical::{canonicalize, expand_labels, SignatureTable};
use super::dbscan::WeightedDbscan;
use super::{ClusterModel, FitSummary};
use crate::corpus::Corpus;
use crate::lsh::SimilarityIndex;
use neardup_core::{Config, Error, Result, RetentionPolicy, Signature};
use neardup_durability::{Artifact, ArtifactBatch, ArtifactStore, Held, SaveOutcome, WriteMode};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Everything a successful fit produces.
#[derive(Debug, Clone)]
pub struct FitOutcome {
    /// Canonical clusters and mapping
    pub model: ClusterModel,
    /// Corpus after optional noise pruning
    pub corpus: Arc<Corpus>,
    /// Index after optional noise pruning
    pub index: Option<Arc<SimilarityIndex>>,
    /// Fit statistics
    pub summary: FitSummary,
}

/// Runs clustering fits with a fixed configuration.
#[derive(Debug, Clone)]
pub struct ClusterEngine {
    dbscan: WeightedDbscan,
    prune_noise: bool,
    retain_noise: bool,
    write_mode: WriteMode,
    retention: RetentionPolicy,
    store: Option<ArtifactStore>,
}

/// Clears the scratch store when dropped.
struct ScratchGuard(Option<ArtifactStore>);

impl ScratchGuard {
    fn store(&self) -> Option<&ArtifactStore> {
        self.0.as_ref()
    }
}

impl Drop for ScratchGuard {
    fn drop(&mut self) {
        if let Some(scratch) = &self.0 {
            if let Err(e) = scratch.clear() {
                warn!(target: "neardup::fit", error = %e, "Failed to clear scratch artifacts");
            }
        }
    }
}

impl ClusterEngine {
    /// Engine for `config`, persisting to `store` when given.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if any retention is `reload_on_demand` and
    /// there is no store.
    pub fn new(config: &Config, store: Option<ArtifactStore>) -> Result<Self> {
        if config.retention.spills() && store.is_none() {
            return Err(Error::configuration(
                "retention",
                "reload_on_demand requires an artifact store",
            ));
        }
        Ok(ClusterEngine {
            dbscan: WeightedDbscan::new(config.eps, config.min_samples),
            prune_noise: config.prune_noise,
            retain_noise: config.retain_noise,
            write_mode: WriteMode::from_overwrite(config.overwrite),
            retention: config.retention,
            store,
        })
    }

    /// Artifact store used for outputs, if any.
    pub fn store(&self) -> Option<&ArtifactStore> {
        self.store.as_ref()
    }

    /// Cluster `corpus`.
    ///
    /// # Errors
    ///
    /// [`Error::EmptyCorpus`] for a corpus without documents; persistence
    /// errors from spilling or writing outputs.
    pub fn fit(
        &self,
        corpus: Arc<Corpus>,
        index: Option<Arc<SimilarityIndex>>,
    ) -> Result<FitOutcome> {
        let fit_start = Instant::now();
        if corpus.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let documents = corpus.len();
        info!(target: "neardup::fit", documents, "Clustering fit started");

        let scratch = ScratchGuard(match &self.store {
            Some(store) if self.retention.spills() => Some(store.scratch()?),
            _ => None,
        });

        let held_index = index
            .map(|index| {
                Held::retain_shared(
                    index,
                    Artifact::SimilarityIndex,
                    self.retention.similarity_index,
                    scratch.store(),
                )
            })
            .transpose()?;

        // Weighted points
        let stage = Instant::now();
        let table = signature_table(&corpus);
        let points: Vec<Signature> = table.keys().cloned().collect();
        let weights: Vec<u64> = table.values().map(|keys| keys.len() as u64).collect();
        let weighted_points = points.len();
        info!(
            target: "neardup::fit",
            documents,
            weighted_points,
            elapsed_ms = stage.elapsed().as_millis() as u64,
            "Signature table built"
        );

        let held_table = Held::retain(
            table,
            Artifact::SignatureToKeys,
            self.retention.signature_table,
            scratch.store(),
        )?;
        let held_corpus = Held::retain_shared(
            corpus,
            Artifact::Corpus,
            self.retention.corpus,
            scratch.store(),
        )?;

        // Density clustering
        let stage = Instant::now();
        let labels = self.dbscan.fit(&points, &weights);
        drop(points);
        drop(weights);
        info!(
            target: "neardup::fit",
            weighted_points,
            elapsed_ms = stage.elapsed().as_millis() as u64,
            "DBSCAN finished"
        );

        // Canonical clusters
        let stage = Instant::now();
        let table = held_table.into_inner(scratch.store())?;
        let (raw_clusters, noise) = expand_labels(&table, &labels);
        let held_table = Held::retain(
            table,
            Artifact::SignatureToKeys,
            self.retention.signature_table,
            scratch.store(),
        )?;
        let clusters = canonicalize(raw_clusters);
        info!(
            target: "neardup::fit",
            clusters = clusters.len(),
            noise = noise.len(),
            elapsed_ms = stage.elapsed().as_millis() as u64,
            "Clusters canonicalized"
        );

        // Noise pruning
        let mut corpus = held_corpus.into_inner(scratch.store())?;
        let mut index = held_index
            .map(|held| held.into_inner(scratch.store()))
            .transpose()?;
        let mut pruned_documents = 0;
        if self.prune_noise && !noise.is_empty() {
            let stage = Instant::now();
            let mut owned = Arc::try_unwrap(corpus).unwrap_or_else(|shared| (*shared).clone());
            pruned_documents = owned.prune(&noise);
            corpus = Arc::new(owned);

            if let Some(shared) = index.take() {
                let mut owned = Arc::try_unwrap(shared).unwrap_or_else(|shared| (*shared).clone());
                let removed = owned.prune(&noise);
                debug!(target: "neardup::fit", removed, "Noise removed from similarity index");
                index = Some(Arc::new(owned));
            }
            info!(
                target: "neardup::fit",
                pruned = pruned_documents,
                elapsed_ms = stage.elapsed().as_millis() as u64,
                "Noise pruned"
            );
        }

        let model = ClusterModel::new(clusters, self.retain_noise.then(|| noise.clone()));

        if let Some(store) = &self.store {
            let stage = Instant::now();
            let table = held_table.into_inner(scratch.store())?;
            let outcome = self.persist(store, &corpus, index.as_deref(), &table, &model)?;
            if outcome == SaveOutcome::Written {
                info!(
                    target: "neardup::fit",
                    dir = %store.dir().display(),
                    elapsed_ms = stage.elapsed().as_millis() as u64,
                    "Fit outputs persisted"
                );
            }
        }

        let summary = FitSummary {
            clusters: model.len(),
            clustered_documents: model.clusters().iter().map(Vec::len).sum(),
            noise_documents: noise.len(),
            weighted_points,
            largest_cluster: model.clusters().first().map_or(0, Vec::len),
            pruned_documents,
            elapsed_ms: fit_start.elapsed().as_millis() as u64,
        };
        info!(
            target: "neardup::fit",
            clusters = summary.clusters,
            clustered = summary.clustered_documents,
            noise = summary.noise_documents,
            elapsed_ms = summary.elapsed_ms,
            "Clustering fit finished"
        );

        Ok(FitOutcome {
            model,
            corpus,
            index,
            summary,
        })
    }

    fn persist(
        &self,
        store: &ArtifactStore,
        corpus: &Corpus,
        index: Option<&SimilarityIndex>,
        table: &SignatureTable,
        model: &ClusterModel,
    ) -> Result<SaveOutcome> {
        let mut batch = ArtifactBatch::new();
        batch.put(Artifact::Corpus, corpus)?;
        match index {
            Some(index) => batch.put(Artifact::SimilarityIndex, index)?,
            None => batch.delete(Artifact::SimilarityIndex),
        }
        batch.put(Artifact::SignatureToKeys, table)?;
        match model.noise() {
            Some(noise) => batch.put(Artifact::Noise, &noise)?,
            None => batch.delete(Artifact::Noise),
        }
        batch.put(Artifact::Clusters, &model.clusters())?;
        batch.put(Artifact::KeyToClusterIndex, model.mapping())?;
        store.commit(batch, self.write_mode)
    }
}

/// Group keys by exact signature.
fn signature_table(corpus: &Corpus) -> SignatureTable {
    let mut table = SignatureTable::new();
    for (key, signature) in corpus.signatures() {
        table.entry(signature.clone()).or_default().push(key.clone());
    }
    table
}

#[cfg(test)]
mod tests {
    use super::*;
    use neardup_core::{Record, Retention, ShingleConfig};
    use std::collections::BTreeMap;
    use tempfile::TempDir;

    fn config() -> Config {
        Config {
            threshold: 0.5,
            min_samples: 2,
            eps: 0.5,
            shingles: ShingleConfig::words_only(),
            ..Config::default()
        }
    }

    fn corpus(config: &Config) -> Arc<Corpus> {
        let mut corpus = Corpus::new(config).unwrap();
        let base = "stocks rally as markets cheer rate cut hopes across global exchanges today";
        corpus
            .add("a", Record::new("Markets rally", base, BTreeMap::new()))
            .unwrap();
        corpus
            .add("b", Record::new("Markets rally", base, BTreeMap::new()))
            .unwrap();
        corpus
            .add(
                "c",
                Record::new(
                    "Local team wins",
                    "football club celebrates cup victory after penalty shootout",
                    BTreeMap::new(),
                ),
            )
            .unwrap();
        Arc::new(corpus)
    }

    #[test]
    fn test_empty_corpus_rejected() {
        let config = config();
        let engine = ClusterEngine::new(&config, None).unwrap();
        let empty = Arc::new(Corpus::new(&config).unwrap());
        assert!(matches!(engine.fit(empty, None), Err(Error::EmptyCorpus)));
    }

    #[test]
    fn test_identical_documents_share_a_weighted_point() {
        let config = config();
        let engine = ClusterEngine::new(&config, None).unwrap();
        let outcome = engine.fit(corpus(&config), None).unwrap();

        assert_eq!(outcome.summary.weighted_points, 2);
        assert_eq!(outcome.model.clusters(), &[vec!["a".to_string(), "b".to_string()]]);
        assert_eq!(outcome.summary.noise_documents, 1);
        assert_eq!(outcome.summary.pruned_documents, 1);
        assert!(!outcome.corpus.contains("c"));
    }

    #[test]
    fn test_prune_does_not_touch_shared_input() {
        let config = config();
        let engine = ClusterEngine::new(&config, None).unwrap();
        let input = corpus(&config);
        let index = Arc::new(SimilarityIndex::fit(&input, config.threshold).unwrap());

        let outcome = engine
            .fit(Arc::clone(&input), Some(Arc::clone(&index)))
            .unwrap();
        assert!(input.contains("c"));
        assert!(index.contains("c"));
        assert!(!outcome.index.unwrap().contains("c"));
    }

    #[test]
    fn test_keep_noise_when_not_pruning() {
        let config = Config {
            prune_noise: false,
            retain_noise: true,
            ..config()
        };
        let engine = ClusterEngine::new(&config, None).unwrap();
        let outcome = engine.fit(corpus(&config), None).unwrap();
        assert!(outcome.corpus.contains("c"));
        assert_eq!(outcome.model.noise(), Some(&["c".to_string()][..]));
    }

    #[test]
    fn test_reload_on_demand_matches_in_memory() {
        let dir = TempDir::new().unwrap();
        let in_memory = config();
        let spilling = Config {
            artifact_dir: Some(dir.path().to_path_buf()),
            retention: RetentionPolicy::reload_all(),
            ..config()
        };
        let store = ArtifactStore::open(dir.path()).unwrap();

        let input = corpus(&in_memory);
        let index = Arc::new(SimilarityIndex::fit(&input, 0.5).unwrap());

        let a = ClusterEngine::new(&in_memory, None)
            .unwrap()
            .fit(Arc::clone(&input), Some(Arc::clone(&index)))
            .unwrap();
        let b = ClusterEngine::new(&spilling, Some(store.clone()))
            .unwrap()
            .fit(input, Some(index))
            .unwrap();

        assert_eq!(a.model, b.model);
        assert_eq!(a.corpus, b.corpus);
        assert_eq!(a.index, b.index);
        // scratch cleared
        let scratch = store.scratch().unwrap();
        assert!(Artifact::ALL.iter().all(|&art| !scratch.exists(art)));
    }

    #[test]
    fn test_spill_without_store_rejected() {
        let config = Config {
            retention: RetentionPolicy {
                corpus: Retention::ReloadOnDemand,
                ..RetentionPolicy::default()
            },
            ..config()
        };
        assert!(matches!(
            ClusterEngine::new(&config, None),
            Err(Error::Configuration { .. })
        ));
    }

    #[test]
    fn test_outputs_persisted() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let config = config();
        let engine = ClusterEngine::new(&config, Some(store.clone())).unwrap();
        let outcome = engine.fit(corpus(&config), None).unwrap();

        let clusters: Vec<Vec<String>> = store.load(Artifact::Clusters).unwrap().unwrap();
        assert_eq!(clusters, outcome.model.clusters());
        let mapping: BTreeMap<String, usize> =
            store.load(Artifact::KeyToClusterIndex).unwrap().unwrap();
        assert_eq!(&mapping, outcome.model.mapping());
        let stored: Corpus = store.load(Artifact::Corpus).unwrap().unwrap();
        assert_eq!(&stored, outcome.corpus.as_ref());
        assert!(store.exists(Artifact::SignatureToKeys));
        assert!(!store.exists(Artifact::Noise));
    }

    #[test]
    fn test_overwrite_disabled_keeps_previous_outputs() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let sentinel = vec![vec!["old".to_string()]];
        store
            .save(Artifact::Clusters, &sentinel, WriteMode::Create)
            .unwrap();

        let config = Config {
            overwrite: false,
            ..config()
        };
        let engine = ClusterEngine::new(&config, Some(store.clone())).unwrap();
        engine.fit(corpus(&config), None).unwrap();

        let kept: Vec<Vec<String>> = store.load(Artifact::Clusters).unwrap().unwrap();
        assert_eq!(kept, sentinel);
        // nothing else of the new fit lands next to the old clusters
        for artifact in [
            Artifact::Corpus,
            Artifact::KeyToClusterIndex,
            Artifact::SignatureToKeys,
        ] {
            assert!(!store.exists(artifact), "{} written", artifact);
        }
    }

    #[test]
    fn test_overwrite_disabled_writes_into_empty_store() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let config = Config {
            overwrite: false,
            ..config()
        };
        let engine = ClusterEngine::new(&config, Some(store.clone())).unwrap();
        let outcome = engine.fit(corpus(&config), None).unwrap();

        let mapping: BTreeMap<String, usize> =
            store.load(Artifact::KeyToClusterIndex).unwrap().unwrap();
        assert_eq!(&mapping, outcome.model.mapping());
    }

    #[test]
    fn test_refit_drops_stale_index_and_noise() {
        let dir = TempDir::new().unwrap();
        let store = ArtifactStore::open(dir.path()).unwrap();
        let keep_noise = Config {
            prune_noise: false,
            retain_noise: true,
            ..config()
        };
        let input = corpus(&keep_noise);
        let index = Arc::new(SimilarityIndex::fit(&input, 0.5).unwrap());
        ClusterEngine::new(&keep_noise, Some(store.clone()))
            .unwrap()
            .fit(Arc::clone(&input), Some(index))
            .unwrap();
        assert!(store.exists(Artifact::Noise));
        assert!(store.exists(Artifact::SimilarityIndex));

        ClusterEngine::new(&config(), Some(store.clone()))
            .unwrap()
            .fit(input, None)
            .unwrap();
        assert!(!store.exists(Artifact::Noise));
        assert!(!store.exists(Artifact::SimilarityIndex));
    }
}
