//! Cluster service handle
//!
//! `ClusterService` owns one corpus, its similarity index and the last
//! clustering, and is shared by handle (`Arc<ClusterService>`) across
//! request handlers.
//!
//! # Concurrency
//!
//! - Published state is an immutable [`Snapshot`]. Queries clone the current
//!   `Arc<Snapshot>` and never wait on a writer or a fit.
//! - Writers (`load_corpus`, `add`, `remove`, `fit_similarity`) serialize on
//!   a mutex, build the next snapshot off to the side and publish it with one
//!   pointer swap. A writer that fails publishes nothing.
//! - A clustering fit claims the fit guard under the writer mutex. While the
//!   guard is held every writer, and any second fit, fails with
//!   [`Error::Busy`]. The fit publishes its result only on success; on
//!   failure the previous snapshot stays current.
//! - [`ClusterService::spawn_fit_clustering`] runs the fit on the dedicated
//!   `neardup-fit` worker thread and returns a [`FitTicket`].
//! - [`ClusterService::fit`] loads, indexes and clusters under one fit guard
//!   and publishes all three with a single swap.
//!
//! # Persistence
//!
//! With an artifact directory every writer commits the state it is about to
//! publish as one [`ArtifactBatch`] before publishing it. Replacing the
//! corpus deletes every artifact derived from the old one; removing a key
//! deletes the similarity index, and the clustering too when the key was a
//! cluster member. The published clustering therefore never names a key
//! missing from the corpus, and [`ClusterService::open`] rejects a store in
//! which it does.

use crate::assigner::{Assignment, ClusterAssigner, SimilarDoc};
use crate::background::{FitWorker, Ticket};
use crate::cluster::{ClusterEngine, ClusterModel, FitState, FitSummary};
use crate::corpus::{Corpus, CorpusSource};
use crate::lsh::SimilarityIndex;
use neardup_core::{Cluster, ClusterIndex, Component, Config, Error, Record, Result};
use neardup_durability::{Artifact, ArtifactBatch, ArtifactStore, WriteMode};
use parking_lot::{Mutex, RwLock};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{error, info, warn};

/// Name of the fit worker thread.
pub const FIT_WORKER_THREAD: &str = "neardup-fit";

/// Result handle of a background clustering fit.
pub type FitTicket = Ticket<FitSummary>;

/// Artifacts computed from a corpus.
const DERIVED: [Artifact; 5] = [
    Artifact::SimilarityIndex,
    Artifact::SignatureToKeys,
    Artifact::Noise,
    Artifact::Clusters,
    Artifact::KeyToClusterIndex,
];

/// Artifacts written only by a clustering fit.
const CLUSTERING: [Artifact; 4] = [
    Artifact::SignatureToKeys,
    Artifact::Noise,
    Artifact::Clusters,
    Artifact::KeyToClusterIndex,
];

/// One consistent view of the service state.
#[derive(Debug, Clone)]
pub struct Snapshot {
    /// Current corpus
    pub corpus: Arc<Corpus>,
    /// Similarity index, if fit since the last key removal
    pub index: Option<Arc<SimilarityIndex>>,
    /// Last successful clustering
    pub clusters: Option<Arc<ClusterModel>>,
}

impl Snapshot {
    fn empty(config: &Config) -> Result<Self> {
        Ok(Snapshot {
            corpus: Arc::new(Corpus::new(config)?),
            index: None,
            clusters: None,
        })
    }

    fn assigner(&self, min_share: f64) -> ClusterAssigner<'_> {
        ClusterAssigner::new(
            &self.corpus,
            self.index.as_deref(),
            self.clusters.as_deref(),
            min_share,
        )
    }
}

struct ServiceInner {
    config: Config,
    engine: ClusterEngine,
    state: RwLock<Arc<Snapshot>>,
    writer: Mutex<()>,
    fitting: AtomicBool,
}

/// Holds the fit guard; releases it when dropped, including on panic.
struct FitGuard {
    inner: Arc<ServiceInner>,
}

impl Drop for FitGuard {
    fn drop(&mut self) {
        self.inner.fitting.store(false, Ordering::Release);
    }
}

impl ServiceInner {
    fn snapshot(&self) -> Arc<Snapshot> {
        self.state.read().clone()
    }

    fn publish(&self, next: Snapshot) {
        *self.state.write() = Arc::new(next);
    }

    fn store(&self) -> Option<&ArtifactStore> {
        self.engine.store()
    }

    /// Commit the batch built by `build`; a no-op without a store.
    fn persist(&self, build: impl FnOnce(&mut ArtifactBatch) -> Result<()>) -> Result<()> {
        let Some(store) = self.store() else {
            return Ok(());
        };
        let mut batch = ArtifactBatch::new();
        build(&mut batch)?;
        store.commit(batch, WriteMode::from_overwrite(self.config.overwrite))?;
        Ok(())
    }

    /// Run `f` on a copy of the current snapshot and publish the copy if
    /// `f` succeeds.
    fn mutate<R>(&self, operation: &str, f: impl FnOnce(&mut Snapshot) -> Result<R>) -> Result<R> {
        let _writer = self.writer.lock();
        if self.fitting.load(Ordering::Acquire) {
            return Err(Error::Busy(operation.to_string()));
        }
        let mut next = Snapshot::clone(&self.snapshot());
        let result = f(&mut next)?;
        self.publish(next);
        Ok(result)
    }

    /// Claim the fit guard. Writers are rejected until it drops, so the
    /// snapshot read after this call stays current for the whole fit.
    fn begin_fit(self: &Arc<Self>, operation: &str) -> Result<FitGuard> {
        let _writer = self.writer.lock();
        if self
            .fitting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(Error::Busy(operation.to_string()));
        }
        Ok(FitGuard {
            inner: Arc::clone(self),
        })
    }

    fn run_fit(
        &self,
        guard: FitGuard,
        corpus: Arc<Corpus>,
        index: Option<Arc<SimilarityIndex>>,
    ) -> Result<FitSummary> {
        match self.engine.fit(corpus, index) {
            Ok(outcome) => {
                self.publish(Snapshot {
                    corpus: outcome.corpus,
                    index: outcome.index,
                    clusters: Some(Arc::new(outcome.model)),
                });
                drop(guard);
                Ok(outcome.summary)
            }
            Err(e) => {
                error!(target: "neardup::service", error = %e, "Clustering fit failed; previous state kept");
                Err(e)
            }
        }
    }
}

/// Similarity and cluster service.
pub struct ClusterService {
    inner: Arc<ServiceInner>,
    worker: FitWorker,
}

impl ClusterService {
    /// Service with an empty corpus.
    ///
    /// Opens the artifact store when `config.artifact_dir` is set; nothing is
    /// read from it.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store = open_store(&config)?;
        let snapshot = Snapshot::empty(&config)?;
        Self::with_state(config, store, snapshot)
    }

    /// Service restored from the artifacts in `config.artifact_dir`.
    ///
    /// Missing artifacts are fine: a fresh directory yields an empty,
    /// unfit service.
    ///
    /// # Errors
    ///
    /// [`Error::Configuration`] if the stored corpus was built with other
    /// shingle rules or `num_perm`; [`Error::Corruption`] if the persisted
    /// clusters and mapping disagree or only one of them exists.
    pub fn open(config: Config) -> Result<Self> {
        config.validate()?;
        let Some(store) = open_store(&config)? else {
            return Err(Error::configuration(
                "artifact_dir",
                "restoring a service requires an artifact directory",
            ));
        };
        let snapshot = restore(&config, &store)?;
        info!(
            target: "neardup::service",
            dir = %store.dir().display(),
            documents = snapshot.corpus.len(),
            similarity_index = snapshot.index.is_some(),
            clusters = snapshot.clusters.as_ref().map_or(0, |m| m.len()),
            "Service restored"
        );
        Self::with_state(config, Some(store), snapshot)
    }

    fn with_state(config: Config, store: Option<ArtifactStore>, snapshot: Snapshot) -> Result<Self> {
        let engine = ClusterEngine::new(&config, store)?;
        let worker = FitWorker::new(FIT_WORKER_THREAD)?;
        Ok(ClusterService {
            inner: Arc::new(ServiceInner {
                config,
                engine,
                state: RwLock::new(Arc::new(snapshot)),
                writer: Mutex::new(()),
                fitting: AtomicBool::new(false),
            }),
            worker,
        })
    }

    /// Active configuration.
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    /// Current published state.
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.inner.snapshot()
    }

    // ------------------------------------------------------------------
    // Writers
    // ------------------------------------------------------------------

    /// Replace the corpus with the documents of `source`.
    ///
    /// The similarity index and the clustering are reset, in memory and in
    /// the store. Returns the number of documents loaded.
    pub fn load_corpus(&self, source: CorpusSource) -> Result<usize> {
        let config = &self.inner.config;
        self.inner.mutate("load_corpus", |next| {
            let corpus = Corpus::from_source(config, source)?;
            let count = corpus.len();
            self.inner.persist(|batch| {
                batch.put(Artifact::Corpus, &corpus)?;
                batch.delete_all(&DERIVED);
                Ok(())
            })?;
            next.corpus = Arc::new(corpus);
            next.index = None;
            next.clusters = None;
            Ok(count)
        })
    }

    /// Insert or overwrite one document.
    ///
    /// Neither the similarity index nor the clustering is refit.
    pub fn add(&self, key: &str, record: Record) -> Result<()> {
        self.inner.mutate("add", |next| {
            Arc::make_mut(&mut next.corpus).add(key, record)?;
            let corpus = &next.corpus;
            self.inner
                .persist(|batch| batch.put(Artifact::Corpus, &**corpus))
        })
    }

    /// Remove one document.
    ///
    /// The similarity index is dropped and must be refit. If `key` belongs
    /// to a cluster the clustering is dropped as well.
    ///
    /// # Errors
    ///
    /// [`Error::KeyNotFound`] if `key` is absent.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.inner.mutate("remove", |next| {
            Arc::make_mut(&mut next.corpus).remove(key)?;
            if next.index.take().is_some() {
                info!(target: "neardup::service", key, "Similarity index invalidated by removal");
            }
            let clustered = next
                .clusters
                .as_ref()
                .map_or(false, |model| model.cluster_of(key).is_some());
            if clustered {
                next.clusters = None;
                info!(target: "neardup::service", key, "Clustering invalidated by removal");
            }

            let corpus = &next.corpus;
            self.inner.persist(|batch| {
                batch.put(Artifact::Corpus, &**corpus)?;
                batch.delete(Artifact::SimilarityIndex);
                if clustered {
                    batch.delete_all(&CLUSTERING);
                }
                Ok(())
            })
        })
    }

    /// Build the similarity index from the current corpus.
    pub fn fit_similarity(&self) -> Result<()> {
        let config = &self.inner.config;
        self.inner.mutate("fit_similarity", |next| {
            let index = SimilarityIndex::fit(&next.corpus, config.threshold)?;
            self.inner
                .persist(|batch| batch.put(Artifact::SimilarityIndex, &index))?;
            next.index = Some(Arc::new(index));
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Clustering fits
    // ------------------------------------------------------------------

    /// Cluster the current corpus on the calling thread.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if a fit is already running; [`Error::EmptyCorpus`]
    /// for an empty corpus; persistence errors. On error nothing is
    /// published.
    pub fn fit_clustering(&self) -> Result<FitSummary> {
        let guard = self.inner.begin_fit("fit_clustering")?;
        let base = self.inner.snapshot();
        self.inner
            .run_fit(guard, Arc::clone(&base.corpus), base.index.clone())
    }

    /// Cluster the current corpus on the fit worker thread.
    ///
    /// Fails immediately with [`Error::Busy`] if a fit is already running.
    /// Queries keep serving the previous snapshot until the fit publishes.
    pub fn spawn_fit_clustering(&self) -> Result<FitTicket> {
        let guard = self.inner.begin_fit("fit_clustering")?;
        let base = self.inner.snapshot();
        let corpus = Arc::clone(&base.corpus);
        let index = base.index.clone();
        drop(base);
        let inner = Arc::clone(&self.inner);
        self.worker.submit(move || inner.run_fit(guard, corpus, index))
    }

    /// Load `source`, fit the similarity index, then cluster.
    ///
    /// All three are built off to the side under the fit guard and published
    /// together with their artifacts. On error the previous snapshot and
    /// the stored artifacts stay as they were.
    ///
    /// # Errors
    ///
    /// [`Error::Busy`] if a fit is already running; corpus load errors;
    /// [`Error::EmptyCorpus`]; persistence errors.
    pub fn fit(&self, source: CorpusSource) -> Result<FitSummary> {
        let guard = self.inner.begin_fit("fit")?;
        let config = &self.inner.config;
        let corpus = Corpus::from_source(config, source)?;
        if corpus.is_empty() {
            return Err(Error::EmptyCorpus);
        }
        let index = SimilarityIndex::fit(&corpus, config.threshold)?;
        self.inner
            .run_fit(guard, Arc::new(corpus), Some(Arc::new(index)))
    }

    /// Lifecycle state of the clustering.
    pub fn fit_state(&self) -> FitState {
        if self.inner.fitting.load(Ordering::Acquire) {
            FitState::Fitting
        } else if self.snapshot().clusters.is_some() {
            FitState::Fit
        } else {
            FitState::Unfit
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Similar stored documents, most similar first.
    pub fn similar(&self, record: &Record) -> Result<Vec<SimilarDoc>> {
        let snapshot = self.snapshot();
        snapshot
            .assigner(self.inner.config.predominant_cluster_min_percentage)
            .ranked_similar(record)
    }

    /// Cluster of `record`, optionally stored under `key`.
    pub fn cluster(&self, record: &Record, key: Option<&str>) -> Result<Assignment> {
        let snapshot = self.snapshot();
        snapshot
            .assigner(self.inner.config.predominant_cluster_min_percentage)
            .get_cluster(record, key)
    }

    /// Last published clustering.
    pub fn clusters(&self) -> Result<Arc<ClusterModel>> {
        self.snapshot()
            .clusters
            .clone()
            .ok_or_else(|| Error::not_fitted(Component::Clustering))
    }

    /// Members of cluster `index`, `None` if out of range.
    pub fn cluster_members(&self, index: ClusterIndex) -> Result<Option<Cluster>> {
        Ok(self.clusters()?.members(index).cloned())
    }

    /// Wait for queued fits and stop the worker thread. Idempotent.
    pub fn shutdown(&self) {
        self.worker.shutdown();
    }
}

impl Drop for ClusterService {
    fn drop(&mut self) {
        self.worker.shutdown();
    }
}

fn open_store(config: &Config) -> Result<Option<ArtifactStore>> {
    let Some(dir) = &config.artifact_dir else {
        return Ok(None);
    };
    let store = ArtifactStore::open(dir)?;
    let removed = store.cleanup_temp_files()?;
    if removed > 0 {
        warn!(target: "neardup::store", removed, "Removed incomplete artifact writes");
    }
    store.scratch()?.clear()?;
    Ok(Some(store))
}

fn restore(config: &Config, store: &ArtifactStore) -> Result<Snapshot> {
    let corpus = match store.load::<Corpus>(Artifact::Corpus)? {
        Some(corpus) => {
            corpus.check_compatible(config)?;
            corpus
        }
        None => Corpus::new(config)?,
    };

    let index = match store.load::<SimilarityIndex>(Artifact::SimilarityIndex)? {
        Some(index) if index.num_perm() != corpus.num_perm() => {
            return Err(Error::corruption(
                Artifact::SimilarityIndex.name(),
                format!(
                    "index uses num_perm = {}, corpus uses {}",
                    index.num_perm(),
                    corpus.num_perm()
                ),
            ));
        }
        Some(index) if index.threshold() != config.threshold => {
            warn!(
                target: "neardup::service",
                stored = index.threshold(),
                configured = config.threshold,
                "Stored similarity index uses another threshold; refit required"
            );
            None
        }
        other => other.map(Arc::new),
    };

    let clusters: Option<Vec<Cluster>> = store.load(Artifact::Clusters)?;
    let mapping: Option<BTreeMap<String, ClusterIndex>> = store.load(Artifact::KeyToClusterIndex)?;
    let model = match (clusters, mapping) {
        (Some(clusters), Some(mapping)) => {
            let noise = store.load(Artifact::Noise)?;
            Some(Arc::new(ClusterModel::restore(clusters, mapping, noise)?))
        }
        (None, None) => None,
        (Some(_), None) => {
            return Err(Error::corruption(
                Artifact::KeyToClusterIndex.name(),
                "clusters persisted without a mapping",
            ))
        }
        (None, Some(_)) => {
            return Err(Error::corruption(
                Artifact::Clusters.name(),
                "mapping persisted without a cluster list",
            ))
        }
    };

    if let Some(model) = &model {
        if let Some(missing) = model.mapping().keys().find(|key| !corpus.contains(key)) {
            return Err(Error::corruption(
                Artifact::KeyToClusterIndex.name(),
                format!("mapping names `{}`, which the stored corpus lacks", missing),
            ));
        }
    }

    Ok(Snapshot {
        corpus: Arc::new(corpus),
        index,
        clusters: model,
    })
}
