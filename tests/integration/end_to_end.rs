//! End-to-end tests over the A/B/C fixture: A and B are near-duplicates,
//! C is unrelated.

use crate::common::*;
use neardup::{
    Assignment, ClusterService, Config, CorpusSource, Error, FitState, NoMatchReason,
};
use std::collections::BTreeMap;
use tempfile::TempDir;

#[test]
fn test_single_pair_cluster() {
    let service = fitted_service(fixture_config());
    let model = service.clusters().unwrap();

    assert_eq!(model.len(), 1);
    let mut expected = vec![KEY_A.to_string(), KEY_B.to_string()];
    expected.sort();
    assert_eq!(model.clusters()[0], expected);
    assert_eq!(model.cluster_of(KEY_A), model.cluster_of(KEY_B));
    assert_eq!(model.cluster_of(KEY_C), None);
}

#[test]
fn test_cluster_queries() {
    let service = fitted_service(fixture_config());

    let a = service.cluster(&record_a(), None).unwrap();
    let b = service.cluster(&record_b(), None).unwrap();
    let c = service.cluster(&record_c(), None).unwrap();

    assert_eq!(a.cluster_index(), Some(0));
    assert_eq!(a.cluster_index(), b.cluster_index());
    assert_ne!(c.cluster_index(), a.cluster_index());
    // C was noise and has been pruned from the index
    assert_eq!(c, Assignment::NoMatch(NoMatchReason::NoCandidates));
}

#[test]
fn test_known_key_uses_mapping() {
    let service = fitted_service(fixture_config());
    let result = service.cluster(&record_c(), Some(KEY_A)).unwrap();
    assert_eq!(result, Assignment::Direct(0));
}

#[test]
fn test_similar_ranked() {
    let service = fitted_service(fixture_config());
    let similar = service.similar(&record_a()).unwrap();

    assert_eq!(similar.len(), 2);
    let a = similar.iter().find(|d| d.key == KEY_A).unwrap();
    let b = similar.iter().find(|d| d.key == KEY_B).unwrap();
    assert_eq!(a.similarity, 1.0);
    assert!(b.similarity >= 0.8);
    assert!(similar[0].similarity >= similar[1].similarity);
}

#[test]
fn test_noise_kept_without_pruning() {
    let config = Config {
        prune_noise: false,
        retain_noise: true,
        ..fixture_config()
    };
    let service = fitted_service(config);
    let model = service.clusters().unwrap();
    assert_eq!(model.noise(), Some(&[KEY_C.to_string()][..]));

    // C is still indexed but belongs to no cluster
    let c = service.cluster(&record_c(), None).unwrap();
    assert_eq!(c, Assignment::NoMatch(NoMatchReason::NoClusteredCandidates));
}

#[test]
fn test_fit_from_file() {
    let dir = TempDir::new().unwrap();
    let path = fixture_file(&dir);
    let service = ClusterService::new(fixture_config()).unwrap();
    let summary = service.fit(CorpusSource::Path(path)).unwrap();

    assert_eq!(summary.clusters, 1);
    assert_eq!(summary.clustered_documents, 2);
    assert_eq!(summary.noise_documents, 1);
    assert_eq!(summary.pruned_documents, 1);
    assert_eq!(summary.largest_cluster, 2);
    assert_eq!(service.fit_state(), FitState::Fit);
}

#[test]
fn test_all_noise_is_valid() {
    let config = Config {
        min_samples: 10,
        ..fixture_config()
    };
    let service = fitted_service(config);
    let model = service.clusters().unwrap();
    assert!(model.is_empty());
    assert_eq!(service.fit_state(), FitState::Fit);
    assert_eq!(
        service.cluster(&record_a(), None).unwrap(),
        Assignment::NoMatch(NoMatchReason::NoCandidates)
    );
}

#[test]
fn test_query_before_fit() {
    let service = ClusterService::new(fixture_config()).unwrap();
    assert!(matches!(
        service.cluster(&record_a(), None),
        Err(Error::NotFitted { .. })
    ));
    service
        .load_corpus(CorpusSource::Json(fixture_json()))
        .unwrap();
    service.fit_similarity().unwrap();
    // similarity works, clustering still unfit
    assert_eq!(service.similar(&record_a()).unwrap().len(), 2);
    assert!(matches!(
        service.cluster(&record_a(), None),
        Err(Error::NotFitted { .. })
    ));
}

#[test]
fn test_failed_fit_keeps_previous_state() {
    let service = fitted_service(fixture_config());
    let before = service.clusters().unwrap();

    assert!(matches!(
        service.fit(CorpusSource::Records(BTreeMap::new())),
        Err(Error::EmptyCorpus)
    ));
    assert_eq!(service.fit_state(), FitState::Fit);
    assert_eq!(service.clusters().unwrap(), before);
    assert_eq!(service.snapshot().corpus.len(), 2);
    assert_eq!(service.similar(&record_a()).unwrap().len(), 2);

    // a later fit still goes through
    let summary = service.fit(CorpusSource::Json(fixture_json())).unwrap();
    assert_eq!(summary.clusters, 1);
}

#[test]
fn test_invalid_config_rejected_before_anything() {
    let config = Config {
        eps: 1.5,
        ..fixture_config()
    };
    assert!(matches!(
        ClusterService::new(config),
        Err(Error::Configuration { field, .. }) if field == "eps"
    ));
}
