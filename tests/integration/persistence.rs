//! Artifacts on disk: restore, round trips and write modes.

use crate::common::*;
use neardup::{
    Artifact, ArtifactStore, ClusterService, Config, Corpus, CorpusSource, Error, FitState,
    Retention, RetentionPolicy, SimilarityIndex, WriteMode,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

#[test]
fn test_fit_writes_all_outputs() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(&dir);
    let artifacts = config.artifact_dir.clone().unwrap();
    let _service = fitted_service(config);

    let store = ArtifactStore::open(&artifacts).unwrap();
    for artifact in [
        Artifact::Corpus,
        Artifact::SimilarityIndex,
        Artifact::Clusters,
        Artifact::KeyToClusterIndex,
        Artifact::SignatureToKeys,
    ] {
        assert!(store.exists(artifact), "{} missing", artifact);
    }
    assert!(!store.exists(Artifact::Noise));
}

#[test]
fn test_restore_round_trip() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(&dir);

    let (clusters, corpus, index) = {
        let service = fitted_service(config.clone());
        let snapshot = service.snapshot();
        (
            service.clusters().unwrap(),
            snapshot.corpus.clone(),
            snapshot.index.clone().unwrap(),
        )
    };

    let restored = ClusterService::open(config).unwrap();
    let snapshot = restored.snapshot();
    assert_eq!(restored.fit_state(), FitState::Fit);
    assert_eq!(restored.clusters().unwrap(), clusters);
    assert_eq!(snapshot.corpus, corpus);
    assert_eq!(snapshot.index.as_ref().unwrap(), &index);

    let a = restored.cluster(&record_a(), None).unwrap();
    let b = restored.cluster(&record_b(), None).unwrap();
    assert_eq!(a.cluster_index(), Some(0));
    assert_eq!(a.cluster_index(), b.cluster_index());
}

#[test]
fn test_artifacts_load_standalone() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(&dir);
    let artifacts = config.artifact_dir.clone().unwrap();
    let service = fitted_service(config);

    let store = ArtifactStore::open(&artifacts).unwrap();
    let corpus: Corpus = store.load(Artifact::Corpus).unwrap().unwrap();
    assert_eq!(&corpus, service.snapshot().corpus.as_ref());
    let index: SimilarityIndex = store.load(Artifact::SimilarityIndex).unwrap().unwrap();
    assert!(index.contains(KEY_A));
    assert!(!index.contains(KEY_C));
    let mapping: BTreeMap<String, usize> =
        store.load(Artifact::KeyToClusterIndex).unwrap().unwrap();
    assert_eq!(&mapping, service.clusters().unwrap().mapping());
}

#[test]
fn test_open_empty_directory_is_unfit() {
    let dir = TempDir::new().unwrap();
    let service = ClusterService::open(persistent_config(&dir)).unwrap();
    assert_eq!(service.fit_state(), FitState::Unfit);
    assert!(service.snapshot().corpus.is_empty());
}

#[test]
fn test_open_rejects_changed_shingle_rules() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(&dir);
    drop(fitted_service(config.clone()));

    let changed = Config {
        shingles: Config::default().shingles,
        ..config
    };
    assert!(matches!(
        ClusterService::open(changed),
        Err(Error::Configuration { field, .. }) if field == "shingles"
    ));
}

#[test]
fn test_open_rejects_orphan_mapping() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(&dir);
    drop(fitted_service(config.clone()));

    let store = ArtifactStore::open(config.artifact_dir.clone().unwrap()).unwrap();
    store.remove(Artifact::Clusters).unwrap();
    assert!(matches!(
        ClusterService::open(config),
        Err(Error::Corruption { .. })
    ));
}

#[test]
fn test_overwrite_disabled_skips_existing_outputs() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        overwrite: false,
        ..persistent_config(&dir)
    };
    let store = ArtifactStore::open(config.artifact_dir.clone().unwrap()).unwrap();
    let sentinel: Vec<Vec<String>> = vec![vec!["kept".to_string()]];
    store
        .save(Artifact::Clusters, &sentinel, WriteMode::Create)
        .unwrap();

    let service = fitted_service(config);
    assert_eq!(service.clusters().unwrap().len(), 1);
    let on_disk: Vec<Vec<String>> = store.load(Artifact::Clusters).unwrap().unwrap();
    assert_eq!(on_disk, sentinel);
    // the fit's outputs are skipped as a group, none lands next to the sentinel
    for artifact in [
        Artifact::Corpus,
        Artifact::SimilarityIndex,
        Artifact::KeyToClusterIndex,
        Artifact::SignatureToKeys,
    ] {
        assert!(!store.exists(artifact), "{} written", artifact);
    }
}

#[test]
fn test_overwrite_disabled_refit_keeps_first_fit_restorable() {
    let dir = TempDir::new().unwrap();
    let config = Config {
        overwrite: false,
        ..persistent_config(&dir)
    };
    let first = {
        let service = fitted_service(config.clone());
        let summary = service
            .fit(CorpusSource::Records(generated_records(20, 5)))
            .unwrap();
        assert_eq!(summary.clusters, 4);
        // the second fit is published in memory but not written
        assert_eq!(service.clusters().unwrap().len(), 4);
        service.snapshot().corpus.len()
    };
    assert_eq!(first, 20);

    let restored = ClusterService::open(config).unwrap();
    assert_eq!(restored.fit_state(), FitState::Fit);
    assert_eq!(restored.clusters().unwrap().len(), 1);
    assert!(restored.snapshot().corpus.contains(KEY_A));
    let a = restored.cluster(&record_a(), None).unwrap();
    assert_eq!(a.cluster_index(), Some(0));
}

#[test]
fn test_failed_fit_leaves_store_untouched() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(&dir);
    let before = {
        let service = fitted_service(config.clone());
        let before = service.clusters().unwrap();
        assert!(matches!(
            service.fit(CorpusSource::Records(BTreeMap::new())),
            Err(Error::EmptyCorpus)
        ));
        before
    };

    let restored = ClusterService::open(config).unwrap();
    assert_eq!(restored.clusters().unwrap(), before);
    assert!(restored.snapshot().index.is_some());
}

#[test]
fn test_restart_after_load_corpus_is_unfit() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(&dir);
    {
        let service = fitted_service(config.clone());
        let mut records = BTreeMap::new();
        records.insert("https://x.example/1".to_string(), record_c());
        service.load_corpus(CorpusSource::Records(records)).unwrap();
    }

    let restored = ClusterService::open(config.clone()).unwrap();
    assert_eq!(restored.fit_state(), FitState::Unfit);
    assert_eq!(restored.snapshot().corpus.len(), 1);
    assert!(restored.snapshot().index.is_none());

    let store = ArtifactStore::open(config.artifact_dir.unwrap()).unwrap();
    for artifact in [
        Artifact::SimilarityIndex,
        Artifact::Clusters,
        Artifact::KeyToClusterIndex,
        Artifact::SignatureToKeys,
    ] {
        assert!(!store.exists(artifact), "{} left behind", artifact);
    }
}

#[test]
fn test_add_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(&dir);
    {
        let service = fitted_service(config.clone());
        service.add("https://new.example/1", record_c()).unwrap();
        assert_eq!(service.snapshot().corpus.len(), 3);
    }

    let restored = ClusterService::open(config).unwrap();
    assert_eq!(restored.snapshot().corpus.len(), 3);
    assert!(restored.snapshot().corpus.contains("https://new.example/1"));
    assert_eq!(restored.fit_state(), FitState::Fit);
}

#[test]
fn test_remove_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(&dir);
    {
        let service = fitted_service(config.clone());
        service.remove(KEY_A).unwrap();
    }

    let restored = ClusterService::open(config).unwrap();
    let snapshot = restored.snapshot();
    assert!(!snapshot.corpus.contains(KEY_A));
    assert!(snapshot.corpus.contains(KEY_B));
    // the removed key comes back neither through the index nor the clusters
    assert!(snapshot.index.is_none());
    assert_eq!(restored.fit_state(), FitState::Unfit);
}

#[test]
fn test_open_rejects_clusters_of_another_corpus() {
    let dir = TempDir::new().unwrap();
    let config = persistent_config(&dir);
    drop(fitted_service(config.clone()));

    let store = ArtifactStore::open(config.artifact_dir.clone().unwrap()).unwrap();
    let mut records = BTreeMap::new();
    records.insert("https://x.example/1".to_string(), record_c());
    let other = Corpus::from_source(&config, CorpusSource::Records(records)).unwrap();
    store
        .save(Artifact::Corpus, &other, WriteMode::Overwrite)
        .unwrap();

    assert!(matches!(
        ClusterService::open(config),
        Err(Error::Corruption { .. })
    ));
}

#[test]
fn test_reload_on_demand_fit_matches_and_cleans_scratch() {
    let dir = TempDir::new().unwrap();
    let spilling = Config {
        retention: RetentionPolicy {
            corpus: Retention::ReloadOnDemand,
            similarity_index: Retention::ReloadOnDemand,
            signature_table: Retention::ReloadOnDemand,
        },
        ..persistent_config(&dir)
    };
    let artifacts = spilling.artifact_dir.clone().unwrap();

    let resident = fitted_service(fixture_config());
    let spilled = fitted_service(spilling);
    assert_eq!(spilled.clusters().unwrap(), resident.clusters().unwrap());

    let scratch = ArtifactStore::open(&artifacts).unwrap().scratch().unwrap();
    for artifact in Artifact::ALL {
        assert!(!scratch.exists(artifact));
    }
}

#[test]
fn test_reload_on_demand_without_directory_rejected() {
    let config = Config {
        retention: RetentionPolicy::reload_all(),
        ..fixture_config()
    };
    assert!(matches!(
        ClusterService::new(config),
        Err(Error::Configuration { .. })
    ));
}

#[test]
fn test_fit_from_file_then_query_cli_style() {
    let dir = TempDir::new().unwrap();
    let path = fixture_file(&dir);
    let config = persistent_config(&dir);
    {
        let service = ClusterService::new(config.clone()).unwrap();
        service.fit(CorpusSource::Path(path)).unwrap();
    }
    let service = ClusterService::open(config).unwrap();
    let similar = service.similar(&record_b()).unwrap();
    assert_eq!(similar.len(), 2);
}
