//! Queries, writers and fits from several threads.

use crate::common::*;
use neardup::{ClusterService, CorpusSource, Error, FitState};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Duration;

/// Service over a larger generated corpus so fits take measurable time.
fn large_service() -> Arc<ClusterService> {
    let service = fitted_service(fixture_config());
    service
        .load_corpus(CorpusSource::Records(generated_records(1_500, 5)))
        .unwrap();
    service.fit_similarity().unwrap();
    Arc::new(service)
}

#[test]
fn test_concurrent_queries() {
    let service = Arc::new(fitted_service(fixture_config()));
    let barrier = Arc::new(Barrier::new(8));

    let handles: Vec<_> = (0..8)
        .map(|_| {
            let service = Arc::clone(&service);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..50 {
                    let a = service.cluster(&record_a(), None).unwrap();
                    assert_eq!(a.cluster_index(), Some(0));
                    assert_eq!(service.similar(&record_b()).unwrap().len(), 2);
                }
            })
        })
        .collect();

    for h in handles {
        h.join().unwrap();
    }
}

#[test]
fn test_queries_served_during_background_fit() {
    let service = large_service();
    service.fit_clustering().unwrap();
    let before = service.clusters().unwrap();

    let ticket = service.spawn_fit_clustering().unwrap();
    let stop = Arc::new(AtomicBool::new(false));
    let answered = Arc::new(AtomicUsize::new(0));

    let reader = {
        let service = Arc::clone(&service);
        let stop = Arc::clone(&stop);
        let answered = Arc::clone(&answered);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                // either the previous model or the new one, never an error
                let model = service.clusters().unwrap();
                assert!(!model.is_empty());
                answered.fetch_add(1, Ordering::Relaxed);
            }
        })
    };

    let summary = ticket.wait().unwrap();
    stop.store(true, Ordering::Release);
    reader.join().unwrap();

    assert!(answered.load(Ordering::Relaxed) > 0);
    assert_eq!(summary.clusters, 300);
    assert_eq!(service.clusters().unwrap(), before);
    assert_eq!(service.fit_state(), FitState::Fit);
}

#[test]
fn test_fit_from_source_never_exposes_unfit() {
    let service = Arc::new(fitted_service(fixture_config()));
    let stop = Arc::new(AtomicBool::new(false));

    let reader = {
        let service = Arc::clone(&service);
        let stop = Arc::clone(&stop);
        thread::spawn(move || {
            while !stop.load(Ordering::Acquire) {
                assert_ne!(service.fit_state(), FitState::Unfit);
                assert!(service.clusters().is_ok());
            }
        })
    };

    let summary = service
        .fit(CorpusSource::Records(generated_records(1_500, 5)))
        .unwrap();
    stop.store(true, Ordering::Release);
    reader.join().unwrap();

    assert_eq!(summary.clusters, 300);
    assert_eq!(service.clusters().unwrap().len(), 300);
}

#[test]
fn test_writers_rejected_while_fitting() {
    let service = large_service();
    let ticket = service.spawn_fit_clustering().unwrap();

    let mut wrote = false;
    while !ticket.is_finished() {
        match service.add("https://late.example/1", record_c()) {
            Err(Error::Busy(_)) => break,
            Ok(()) => {
                // the fit finished between the poll and the write
                wrote = true;
                break;
            }
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    ticket.wait().unwrap();

    assert_eq!(
        service.snapshot().corpus.contains("https://late.example/1"),
        wrote
    );
    // after the fit, writers succeed again
    service.add("https://late.example/2", record_c()).unwrap();
    assert!(service.snapshot().corpus.contains("https://late.example/2"));
}

#[test]
fn test_second_fit_is_busy() {
    let service = large_service();
    let first = service.spawn_fit_clustering().unwrap();
    let second = service.spawn_fit_clustering();
    let sync = service.fit_clustering();

    let finished_early = first.is_finished();
    first.wait().unwrap();
    if !finished_early {
        assert!(matches!(second, Err(Error::Busy(_))));
        assert!(matches!(sync, Err(Error::Busy(_))));
    }
}

#[test]
fn test_poll_without_blocking() {
    let service = large_service();
    let ticket = service.spawn_fit_clustering().unwrap();
    let mut result = None;
    for _ in 0..6_000 {
        if let Some(r) = ticket.wait_timeout(Duration::from_millis(10)) {
            result = Some(r);
            break;
        }
        // fit_state never blocks
        let _ = service.fit_state();
    }
    assert!(result.expect("fit finished within a minute").is_ok());
}
