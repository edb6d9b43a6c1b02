// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Replication run orchestrator.
//!
//! The entry point that ties together:
//! - Upstream access via [`crate::upstream::HttpUpstream`]
//! - Backend strategies via [`crate::replicator::Replicator`]
//! - Per-record reconciliation via [`crate::reconcile::Reconciler`]
//! - Completion tracking via [`crate::tracker::CompletionTracker`]
//!
//! # Architecture
//!
//! A run is one logical task:
//! 1. Creates a task group for every job of the run
//! 2. For each enabled backend, lists the upstream catalog and reconciles
//!    each record in listing order
//! 3. Arms a tracker over every dispatched job and returns immediately
//!
//! Parallelism belongs to the job engine. The orchestrator never takes
//! locks; each job declares the resources it needs.

mod types;

pub use types::{RecordFailure, RunHandle, RunReport, RunState};

use crate::config::ReplicaConfig;
use crate::error::{ReplicaError, Result};
use crate::jobs::{JobDispatcher, TaskGroupId};
use crate::metrics;
use crate::model::Server;
use crate::reconcile::{Disposition, Reconciler, TrackedJob};
use crate::replicator::{supported_replicators, Replicator};
use crate::store::EntityStore;
use crate::tracker::{BatchReport, CompletionHook, CompletionTracker, VerifyDistribution};
use crate::upstream::{HttpUpstream, UpstreamApi};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, info_span, instrument, warn, Instrument};

/// The replication engine.
///
/// Pulls the distribution catalog of an upstream server and makes the local
/// store mirror it: one Remote, Repository and Distribution per upstream
/// distribution, kept in sync by jobs dispatched to `J`.
pub struct ReplicaEngine<S: EntityStore, J: JobDispatcher> {
    config: ReplicaConfig,

    /// Local entities
    store: Arc<S>,

    /// Job engine that runs sync and distribution jobs
    jobs: Arc<J>,

    /// Enabled strategies, in replication order
    replicators: Vec<Arc<dyn Replicator>>,

    /// Post-success action for tracked jobs
    hook: Arc<dyn CompletionHook>,

    /// Run state (shared with the tracking task)
    state_tx: Arc<watch::Sender<RunState>>,

    state_rx: watch::Receiver<RunState>,
}

impl<S: EntityStore, J: JobDispatcher> ReplicaEngine<S, J> {
    /// Create an engine over every supported backend enabled in `config`.
    pub fn new(config: ReplicaConfig, store: Arc<S>, jobs: Arc<J>) -> Self {
        let (state_tx, state_rx) = watch::channel(RunState::Created);
        let replicators = supported_replicators()
            .into_iter()
            .filter(|r| config.backend_enabled(r.backend_label()))
            .collect();
        let hook: Arc<dyn CompletionHook> = Arc::new(VerifyDistribution::new(Arc::clone(&store)));

        Self {
            config,
            store,
            jobs,
            replicators,
            hook,
            state_tx: Arc::new(state_tx),
            state_rx,
        }
    }

    /// Replace the strategy registry.
    pub fn with_replicators(mut self, replicators: Vec<Arc<dyn Replicator>>) -> Self {
        self.replicators = replicators;
        self
    }

    /// Replace the post-success hook.
    pub fn with_completion_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = hook;
        self
    }

    pub fn config(&self) -> &ReplicaConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn jobs(&self) -> &Arc<J> {
        &self.jobs
    }

    /// Labels of the enabled backends, in replication order.
    pub fn backends(&self) -> Vec<&'static str> {
        self.replicators.iter().map(|r| r.backend_label()).collect()
    }

    /// Get current run state.
    pub fn state(&self) -> RunState {
        *self.state_rx.borrow()
    }

    /// Get a receiver to watch state changes.
    pub fn state_receiver(&self) -> watch::Receiver<RunState> {
        self.state_rx.clone()
    }

    fn set_state(&self, state: RunState) {
        let _ = self.state_tx.send(state);
        metrics::set_run_state(&state.to_string());
    }

    /// Replicate from `server`.
    ///
    /// Builds an HTTP upstream from the server record and runs
    /// [`replicate_with`](Self::replicate_with).
    pub async fn replicate(&self, server: &Server) -> Result<RunHandle> {
        let upstream = HttpUpstream::new(server, &self.config.settings.upstream)?;
        info!(server = %server.name, base_url = %server.base_url, "Replicating from upstream server");
        self.replicate_with(&upstream).await
    }

    /// Replicate from `server` and wait for every job to finish.
    pub async fn replicate_and_wait(&self, server: &Server) -> Result<(RunReport, BatchReport)> {
        self.replicate(server).await?.wait().await
    }

    /// [`replicate_with`](Self::replicate_with), then wait for the batch.
    pub async fn replicate_with_and_wait(&self, upstream: &dyn UpstreamApi) -> Result<(RunReport, BatchReport)> {
        self.replicate_with(upstream).await?.wait().await
    }

    /// Run reconciliation against `upstream` and arm the tracker.
    ///
    /// Returns once every job is dispatched. Upstream and store failures are
    /// collected per record in the report. A rejected dispatch aborts the run
    /// and moves the engine to [`RunState::Failed`]; jobs accepted before the
    /// rejection are still tracked and their task group finished.
    #[instrument(skip_all, name = "replicate")]
    pub async fn replicate_with(&self, upstream: &dyn UpstreamApi) -> Result<RunHandle> {
        let accepted = self.state_tx.send_if_modified(|state| {
            if state.accepts_run() {
                *state = RunState::Reconciling;
                true
            } else {
                false
            }
        });
        if !accepted {
            return Err(ReplicaError::InvalidState {
                expected: "Created, Finished or Failed".to_string(),
                actual: format!("{:?}", self.state()),
            });
        }
        metrics::set_run_state(&RunState::Reconciling.to_string());

        let started = Instant::now();
        let task_group = TaskGroupId::new();
        info!(task_group = %task_group, backends = ?self.backends(), "Replication run started");

        let reconciler = Reconciler::new(self.store.as_ref(), self.jobs.as_ref(), upstream, task_group);
        let mut report = RunReport {
            task_group,
            ..Default::default()
        };

        for strategy in &self.replicators {
            let backend = strategy.backend_label();
            report.backends.push(backend.to_string());

            let result = self
                .replicate_backend(&reconciler, strategy.as_ref(), upstream, &mut report)
                .instrument(info_span!("backend", backend))
                .await;

            if let Err(e) = result {
                let accepted = reconciler.take_accepted().await;
                error!(
                    task_group = %task_group,
                    backend,
                    error = %e,
                    accepted_jobs = accepted.len(),
                    "Job dispatch rejected, aborting run"
                );
                metrics::record_error(backend, e.class().as_str());
                self.set_state(RunState::Failed);
                self.track_detached(task_group, accepted);
                return Err(e);
            }
        }

        let batch = reconciler.take_accepted().await;
        report.jobs_dispatched = batch.len();
        metrics::record_run_complete(report.records, report.failures.len(), batch.len(), started.elapsed());
        info!(
            task_group = %task_group,
            records = report.records,
            reconciled = report.reconciled,
            disarmed = report.disarmed,
            failed = report.failures.len(),
            jobs = batch.len(),
            "Reconciliation finished, tracking jobs"
        );

        self.set_state(RunState::Tracking);
        let tracker = CompletionTracker::new(
            Arc::clone(&self.jobs),
            task_group,
            self.config.settings.tracker.clone(),
            batch,
        )
        .with_hook(Arc::clone(&self.hook))
        .arm();

        let state_tx = Arc::clone(&self.state_tx);
        let join = tracker.join;
        let batch = tokio::spawn(async move {
            match join.await {
                Ok(batch_report) => {
                    let _ = state_tx.send(RunState::Finished);
                    metrics::set_run_state(&RunState::Finished.to_string());
                    Ok(batch_report)
                }
                Err(e) => {
                    error!(task_group = %task_group, error = %e, "Tracker task failed");
                    let _ = state_tx.send(RunState::Failed);
                    metrics::set_run_state(&RunState::Failed.to_string());
                    Err(ReplicaError::Tracking(format!("tracker task failed: {}", e)))
                }
            }
        });

        Ok(RunHandle {
            report,
            batch,
            batch_rx: tracker.report,
            state_rx: self.state_receiver(),
        })
    }

    /// Track the jobs of an aborted run so its task group still finishes.
    ///
    /// The run is already [`RunState::Failed`]; the batch report is only
    /// logged.
    fn track_detached(&self, task_group: TaskGroupId, accepted: Vec<TrackedJob>) {
        let tracker = CompletionTracker::new(
            Arc::clone(&self.jobs),
            task_group,
            self.config.settings.tracker.clone(),
            accepted,
        )
        .with_hook(Arc::clone(&self.hook))
        .arm();

        tokio::spawn(async move {
            match tracker.join.await {
                Ok(batch) => info!(
                    task_group = %task_group,
                    total = batch.total,
                    succeeded = batch.succeeded,
                    failed = batch.failed,
                    abandoned = batch.abandoned,
                    "Aborted run's jobs finished"
                ),
                Err(e) => error!(task_group = %task_group, error = %e, "Tracker task failed"),
            }
        });
    }

    /// Reconcile one backend. Only run-fatal errors are returned.
    async fn replicate_backend(
        &self,
        reconciler: &Reconciler<'_, S, J>,
        strategy: &dyn Replicator,
        upstream: &dyn UpstreamApi,
        report: &mut RunReport,
    ) -> Result<()> {
        let backend = strategy.backend_label();

        let records = match strategy
            .list_upstream(upstream, self.config.settings.upstream.page_size)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(error = %e, "Failed to list upstream distributions, skipping backend");
                metrics::record_error(backend, e.class().as_str());
                report.failures.push(RecordFailure {
                    backend: backend.to_string(),
                    name: None,
                    class: e.class(),
                    message: e.to_string(),
                });
                return Ok(());
            }
        };
        debug!(count = records.len(), "Reconciling upstream distributions");

        for record in &records {
            report.records += 1;
            match reconciler.reconcile(strategy, record).await {
                Ok(outcome) => {
                    match outcome.disposition {
                        Disposition::Reconciled => report.reconciled += 1,
                        Disposition::Disarmed => report.disarmed += 1,
                        Disposition::NoContent => report.no_content += 1,
                    }
                    metrics::record_record_outcome(backend, outcome.disposition.as_str());
                }
                Err(e) if e.is_run_fatal() => return Err(e),
                Err(e) => {
                    warn!(name = %record.name, error = %e, class = %e.class(), "Failed to reconcile record");
                    metrics::record_record_outcome(backend, "failed");
                    metrics::record_error(backend, e.class().as_str());
                    report.failures.push(RecordFailure {
                        backend: backend.to_string(),
                        name: Some(record.name.clone()),
                        class: e.class(),
                        message: e.to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}
