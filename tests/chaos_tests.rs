// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Chaos tests: simulate failures and verify graceful degradation.
//!
//! These tests verify that upstream outages, job engine failures and
//! concurrent writers degrade a run the documented way, without panics,
//! hangs or duplicate entities.
//!
//! Run with: cargo test --test chaos_tests -- --nocapture

mod common;

use common::{file_record, rpm_record, MockJobEngine, MockUpstream, FILE_LISTING};
use futures::future::join_all;
use replica_engine::jobs::JobState;
use replica_engine::{
    EntityStore, ErrorClass, MemoryStore, ReplicaConfig, ReplicaEngine, ReplicaError, RunState,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

fn engine_over(store: &Arc<MemoryStore>, jobs: &Arc<MockJobEngine>) -> ReplicaEngine<MemoryStore, MockJobEngine> {
    common::init_tracing();
    ReplicaEngine::new(ReplicaConfig::for_testing(), Arc::clone(store), Arc::clone(jobs))
}

fn applying_jobs(store: &Arc<MemoryStore>) -> Arc<MockJobEngine> {
    Arc::new(MockJobEngine::new().applying_to(Arc::clone(store)))
}

// =============================================================================
// Upstream failures
// =============================================================================

/// Test: one failing lookup does not stop the other records
#[tokio::test]
async fn failed_lookup_isolated_to_record() {
    let store = Arc::new(MemoryStore::new());
    let jobs = applying_jobs(&store);
    let engine = engine_over(&store, &jobs);

    let upstream = MockUpstream::new()
        .with_file_distribution(file_record("alpha", "http://u/a/"), "PULP_MANIFEST")
        .with_file_distribution(file_record("beta", "http://u/b/"), "PULP_MANIFEST")
        .failing_lookup("/pulp/api/v3/repositories/file/file/alpha/");

    let (report, batch) = engine.replicate_with_and_wait(&upstream).await.unwrap();

    assert_eq!(report.records, 2);
    assert_eq!(report.reconciled, 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].name.as_deref(), Some("alpha"));
    assert_eq!(report.failures[0].class, ErrorClass::UpstreamRead);
    assert!(batch.is_clean());

    assert!(store.get_remote("file", "alpha").await.unwrap().is_none());
    assert!(store.get_remote("file", "beta").await.unwrap().is_some());
}

/// Test: an upstream repository without a manifest fails only that record
#[tokio::test]
async fn missing_manifest_isolated_to_record() {
    let store = Arc::new(MemoryStore::new());
    let jobs = applying_jobs(&store);
    let engine = engine_over(&store, &jobs);

    let upstream = MockUpstream::new()
        .with_listing(FILE_LISTING, vec![file_record("odd", "http://u/odd/")])
        .with_entity("/pulp/api/v3/repositories/file/file/odd/", json!({"name": "odd"}));

    let (report, _) = engine.replicate_with_and_wait(&upstream).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].message.contains("manifest"));
    assert_eq!(engine.state(), RunState::Finished);
}

/// Test: one backend's listing outage does not stop the next backend
#[tokio::test]
async fn failed_listing_isolated_to_backend() {
    let store = Arc::new(MemoryStore::new());
    let jobs = applying_jobs(&store);
    let engine = engine_over(&store, &jobs);

    let upstream = MockUpstream::new()
        .with_rpm_distribution(rpm_record("el9", "http://u/el9/"))
        .failing_listing(FILE_LISTING);

    let (report, batch) = engine.replicate_with_and_wait(&upstream).await.unwrap();
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].backend, "file");
    assert!(report.failures[0].name.is_none());
    assert_eq!(report.reconciled, 1);
    assert_eq!(batch.succeeded, 2);
}

// =============================================================================
// Job engine failures
// =============================================================================

/// Test: a rejected dispatch aborts the run and keeps earlier writes
#[tokio::test]
async fn rejected_dispatch_fails_run() {
    let store = Arc::new(MemoryStore::new());
    let jobs = Arc::new(
        MockJobEngine::new()
            .applying_to(Arc::clone(&store))
            .failing_dispatch_after(1),
    );
    let engine = engine_over(&store, &jobs);

    let upstream = MockUpstream::new().with_file_distribution(file_record("base", "http://u/"), "PULP_MANIFEST");
    let err = engine.replicate_with(&upstream).await.err().unwrap();

    assert!(matches!(err, ReplicaError::Dispatch(_)));
    assert_eq!(engine.state(), RunState::Failed);
    // Remote, repository and sync job landed before the rejection
    assert!(store.get_remote("file", "base").await.unwrap().is_some());
    assert!(store.get_repository("file", "base").await.unwrap().is_some());
    assert_eq!(jobs.dispatched().await.len(), 1);
}

/// Test: jobs accepted before a rejected dispatch are tracked and their group finished
#[tokio::test]
async fn rejected_dispatch_still_finishes_group() {
    let store = Arc::new(MemoryStore::new());
    let jobs = Arc::new(
        MockJobEngine::new()
            .applying_to(Arc::clone(&store))
            .with_initial_state(JobState::Running)
            .failing_dispatch_after(1),
    );
    let engine = engine_over(&store, &jobs);

    let upstream = MockUpstream::new().with_file_distribution(file_record("base", "http://u/"), "PULP_MANIFEST");
    assert!(engine.replicate_with(&upstream).await.is_err());
    assert_eq!(jobs.handles_for("pulp_file.app.tasks.synchronize").await.len(), 1);

    // Sync job still running: group stays open
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(jobs.finished_groups().await.is_empty());
    assert!(jobs.state_query_count() > 0);

    jobs.complete_all().await;
    timeout(Duration::from_secs(5), async {
        while jobs.finished_groups().await.is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    assert_eq!(jobs.finished_groups().await.len(), 1);
    assert_eq!(engine.state(), RunState::Failed);
}

/// Test: a run may start again after a failed one
#[tokio::test]
async fn run_restarts_after_failure() {
    let store = Arc::new(MemoryStore::new());
    let failing = Arc::new(MockJobEngine::new().failing_dispatch_after(0));
    let upstream = MockUpstream::new().with_file_distribution(file_record("base", "http://u/"), "PULP_MANIFEST");

    let engine = engine_over(&store, &failing);
    assert!(engine.replicate_with(&upstream).await.is_err());
    assert_eq!(engine.state(), RunState::Failed);
    assert!(engine.replicate_with(&upstream).await.is_err());

    // Fresh job engine, same store: converges without duplicates
    let jobs = applying_jobs(&store);
    let engine = engine_over(&store, &jobs);
    let (report, _) = engine.replicate_with_and_wait(&upstream).await.unwrap();
    assert!(!report.has_failures());
    assert_eq!(store.remotes().await.len(), 1);
    assert_eq!(store.distributions().await.len(), 1);
}

/// Test: persistent state query failures abandon the batch but still finish it
#[tokio::test]
async fn unreachable_job_engine_abandons_batch() {
    let store = Arc::new(MemoryStore::new());
    let jobs = Arc::new(
        MockJobEngine::new()
            .applying_to(Arc::clone(&store))
            .with_initial_state(JobState::Running),
    );
    jobs.fail_next_state_queries(u32::MAX);
    let engine = engine_over(&store, &jobs);

    let upstream = MockUpstream::new().with_file_distribution(file_record("base", "http://u/"), "PULP_MANIFEST");
    let handle = engine.replicate_with(&upstream).await.unwrap();
    let (report, batch) = timeout(Duration::from_secs(5), handle.wait()).await.unwrap().unwrap();

    assert_eq!(batch.abandoned, report.jobs_dispatched);
    assert_eq!(batch.succeeded, 0);
    assert_eq!(jobs.finished_groups().await, vec![report.task_group]);
    assert_eq!(engine.state(), RunState::Finished);
}

/// Test: a few failed state queries are ridden out
#[tokio::test]
async fn flaky_job_engine_recovers() {
    let store = Arc::new(MemoryStore::new());
    let jobs = applying_jobs(&store);
    jobs.fail_next_state_queries(2);
    let engine = engine_over(&store, &jobs);

    let upstream = MockUpstream::new().with_file_distribution(file_record("base", "http://u/"), "PULP_MANIFEST");
    let (_, batch) = engine.replicate_with_and_wait(&upstream).await.unwrap();
    assert_eq!(batch.abandoned, 0);
    assert_eq!(batch.succeeded, 2);
}

/// Test: canceled jobs count as failed, not as stuck
#[tokio::test]
async fn canceled_jobs_finish_batch() {
    let store = Arc::new(MemoryStore::new());
    let jobs = Arc::new(
        MockJobEngine::new()
            .applying_to(Arc::clone(&store))
            .with_initial_state(JobState::Canceled),
    );
    let engine = engine_over(&store, &jobs);

    let upstream = MockUpstream::new().with_rpm_distribution(rpm_record("el9", "http://u/el9/"));
    let (_, batch) = engine.replicate_with_and_wait(&upstream).await.unwrap();
    assert_eq!(batch.failed, 2);
    assert_eq!(batch.canceled, 2);
    assert!(!batch.is_clean());
}

/// Test: a distribution job that "succeeds" without touching the store is flagged
#[tokio::test]
async fn lying_job_engine_flagged_by_hook() {
    let store = Arc::new(MemoryStore::new());
    // Not applying distribution jobs to the store
    let jobs = Arc::new(MockJobEngine::new());
    let engine = engine_over(&store, &jobs);

    let upstream = MockUpstream::new().with_rpm_distribution(rpm_record("el9", "http://u/el9/"));
    let (_, batch) = engine.replicate_with_and_wait(&upstream).await.unwrap();
    assert_eq!(batch.succeeded, 2);
    assert_eq!(batch.hook_failures, 1);
}

// =============================================================================
// Concurrency
// =============================================================================

/// Test: a second run cannot start while the first is tracking
#[tokio::test]
async fn overlapping_run_rejected() {
    let store = Arc::new(MemoryStore::new());
    let jobs = Arc::new(
        MockJobEngine::new()
            .applying_to(Arc::clone(&store))
            .with_initial_state(JobState::Running),
    );
    let engine = engine_over(&store, &jobs);
    let upstream = MockUpstream::new().with_file_distribution(file_record("base", "http://u/"), "PULP_MANIFEST");

    let first = engine.replicate_with(&upstream).await.unwrap();
    let err = engine.replicate_with(&upstream).await.err().unwrap();
    assert!(matches!(err, ReplicaError::InvalidState { .. }));

    jobs.complete_all().await;
    first.wait().await.unwrap();
    assert!(engine.replicate_with(&upstream).await.is_ok());
}

/// Test: engines racing on one store converge to one entity per name
#[tokio::test]
async fn racing_engines_do_not_duplicate() {
    let store = Arc::new(MemoryStore::new());
    let upstream = Arc::new(
        MockUpstream::new()
            .with_file_distribution(file_record("alpha", "http://u/a/"), "PULP_MANIFEST")
            .with_file_distribution(file_record("beta", "http://u/b/"), "PULP_MANIFEST")
            .with_rpm_distribution(rpm_record("el9", "http://u/el9/")),
    );

    let runs = (0..4).map(|_| {
        let store = Arc::clone(&store);
        let upstream = Arc::clone(&upstream);
        tokio::spawn(async move {
            let jobs = applying_jobs(&store);
            let engine = engine_over(&store, &jobs);
            engine.replicate_with_and_wait(upstream.as_ref()).await
        })
    });

    for result in join_all(runs).await {
        let (report, _) = result.unwrap().unwrap();
        assert!(!report.has_failures(), "{:?}", report.failures);
    }

    assert_eq!(store.remotes().await.len(), 3);
    assert_eq!(store.repositories().await.len(), 3);
    assert_eq!(store.distributions().await.len(), 3);
}
