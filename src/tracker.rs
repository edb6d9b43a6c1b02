// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Job completion tracking.
//!
//! A [`CompletionTracker`] owns the handles dispatched during one run and
//! polls the job engine until every one of them is final. It runs as its own
//! tokio task and only ever sleeps between polls, so tracking a large batch
//! costs no worker thread.
//!
//! ```text
//!          ┌──────────── progress: delay resets ─────────────┐
//!          ▼                                                 │
//!  sleep(delay) ──→ poll_once() ──→ any handle final? ──yes──┘
//!          ▲              │               │ no
//!          │              │ error         ▼
//!          │              ▼          delay *= backoff (capped)
//!          │   consecutive errors ≥ max? ──yes──→ abandon rest ──┐
//!          └───────── no ─┘                                      │
//!                                                                ▼
//!   pending empty ─────────────────────────────────────→ finish_group + report
//! ```
//!
//! The batch always finishes: either every handle is final or the remainder
//! is abandoned after repeated state query failures.

use crate::config::TrackerConfig;
use crate::error::{ReplicaError, Result};
use crate::jobs::{BoxFuture, JobDispatcher, JobHandle, JobState, TaskGroupId};
use crate::metrics;
use crate::reconcile::{JobKind, TrackedJob};
use crate::store::EntityStore;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

/// Why a job did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    Failed,
    Canceled,
}

/// Tracker view of one handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Pending,
    Succeeded,
    Failed(FailureKind),
}

impl JobOutcome {
    fn from_state(state: JobState) -> Self {
        match state {
            JobState::Completed => Self::Succeeded,
            JobState::Failed => Self::Failed(FailureKind::Failed),
            JobState::Canceled => Self::Failed(FailureKind::Canceled),
            JobState::Pending | JobState::Running => Self::Pending,
        }
    }
}

/// Action run after a job succeeds.
pub trait CompletionHook: Send + Sync {
    fn on_success<'a>(&'a self, job: &'a TrackedJob) -> BoxFuture<'a, ()>;
}

/// Hook that does nothing.
pub struct NoOpHook;

impl CompletionHook for NoOpHook {
    fn on_success<'a>(&'a self, _job: &'a TrackedJob) -> BoxFuture<'a, ()> {
        Box::pin(async { Ok(()) })
    }
}

/// Confirms a finished distribution job left the store in the expected shape.
///
/// Created and updated distributions must exist and point at the repository
/// the reconciler chose; disarmed ones must no longer serve content. A
/// mismatch is returned as an error, which the tracker logs.
pub struct VerifyDistribution<S: EntityStore> {
    store: Arc<S>,
}

impl<S: EntityStore> VerifyDistribution<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }
}

impl<S: EntityStore> CompletionHook for VerifyDistribution<S> {
    fn on_success<'a>(&'a self, job: &'a TrackedJob) -> BoxFuture<'a, ()> {
        Box::pin(async move {
            if !job.kind.is_distribution() {
                return Ok(());
            }

            let distribution = self
                .store
                .get_distribution(&job.backend, &job.name)
                .await?
                .ok_or_else(|| ReplicaError::not_found("distribution", job.name.as_str()))?;

            match job.kind {
                JobKind::DisarmDistribution if distribution.is_armed() => Err(ReplicaError::Internal(format!(
                    "distribution '{}' still serves content after disarm",
                    job.name
                ))),
                JobKind::CreateDistribution | JobKind::UpdateDistribution
                    if distribution.repository != job.expected_repository =>
                {
                    Err(ReplicaError::Internal(format!(
                        "distribution '{}' references {:?}, expected {:?}",
                        job.name, distribution.repository, job.expected_repository
                    )))
                }
                _ => Ok(()),
            }
        })
    }
}

/// Summary of a finished batch.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchReport {
    pub task_group: TaskGroupId,
    pub total: usize,
    pub succeeded: usize,
    /// Failed or canceled.
    pub failed: usize,
    pub canceled: usize,
    /// Still pending when tracking gave up.
    pub abandoned: usize,
    pub hook_failures: usize,
    pub polls: u64,
    pub failed_jobs: Vec<TrackedJob>,
    pub duration: Duration,
}

impl BatchReport {
    /// Every job succeeded.
    pub fn is_clean(&self) -> bool {
        self.failed == 0 && self.abandoned == 0
    }
}

/// Join handle and report channel of an armed tracker.
pub struct TrackerHandle {
    pub join: JoinHandle<BatchReport>,
    pub report: watch::Receiver<Option<BatchReport>>,
}

/// Polls the job engine until every tracked job is final.
pub struct CompletionTracker<J: JobDispatcher> {
    jobs: Arc<J>,
    task_group: TaskGroupId,
    config: TrackerConfig,
    hook: Arc<dyn CompletionHook>,
    pending: Vec<TrackedJob>,
    outcomes: HashMap<JobHandle, JobOutcome>,
    total: usize,
    succeeded: usize,
    failed_jobs: Vec<TrackedJob>,
    canceled: usize,
    abandoned: usize,
    hook_failures: usize,
    polls: u64,
    consecutive_errors: u32,
    started: Instant,
}

impl<J: JobDispatcher> CompletionTracker<J> {
    pub fn new(jobs: Arc<J>, task_group: TaskGroupId, config: TrackerConfig, batch: Vec<TrackedJob>) -> Self {
        let outcomes = batch.iter().map(|j| (j.handle, JobOutcome::Pending)).collect();
        Self {
            jobs,
            task_group,
            config,
            hook: Arc::new(NoOpHook),
            total: batch.len(),
            pending: batch,
            outcomes,
            succeeded: 0,
            failed_jobs: Vec::new(),
            canceled: 0,
            abandoned: 0,
            hook_failures: 0,
            polls: 0,
            consecutive_errors: 0,
            started: Instant::now(),
        }
    }

    pub fn with_hook(mut self, hook: Arc<dyn CompletionHook>) -> Self {
        self.hook = hook;
        self
    }

    /// Batch state: finished once nothing is pending.
    pub fn is_finished(&self) -> bool {
        self.pending.is_empty()
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    pub fn outcome(&self, handle: JobHandle) -> Option<JobOutcome> {
        self.outcomes.get(&handle).copied()
    }

    /// Query the still-pending handles once. Returns how many became final.
    #[instrument(skip_all, fields(task_group = %self.task_group, pending = self.pending.len()))]
    pub async fn poll_once(&mut self) -> Result<usize> {
        if self.pending.is_empty() {
            return Ok(0);
        }

        let started = Instant::now();
        self.polls += 1;
        let handles: Vec<JobHandle> = self.pending.iter().map(|j| j.handle).collect();
        let states = match self.jobs.get_states(&handles).await {
            Ok(states) => states,
            Err(e) => {
                self.consecutive_errors += 1;
                metrics::record_poll_error();
                return Err(match e {
                    ReplicaError::Tracking(_) => e,
                    other => ReplicaError::Tracking(other.to_string()),
                });
            }
        };
        self.consecutive_errors = 0;

        let mut still_pending = Vec::with_capacity(self.pending.len());
        let mut resolved = Vec::new();
        for job in std::mem::take(&mut self.pending) {
            match states.get(&job.handle) {
                Some(state) if state.is_final() => resolved.push((job, *state)),
                _ => still_pending.push(job),
            }
        }
        self.pending = still_pending;

        let count = resolved.len();
        for (job, state) in resolved {
            self.resolve(job, state).await;
        }

        metrics::record_poll_cycle(self.pending.len(), count, started.elapsed());
        Ok(count)
    }

    async fn resolve(&mut self, job: TrackedJob, state: JobState) {
        let outcome = JobOutcome::from_state(state);
        self.outcomes.insert(job.handle, outcome);
        metrics::record_job_final(&job.function, state.as_str());

        match outcome {
            JobOutcome::Succeeded => {
                self.succeeded += 1;
                debug!(job = %job.handle, kind = job.kind.as_str(), name = %job.name, "Job succeeded");
                if let Err(e) = self.hook.on_success(&job).await {
                    self.hook_failures += 1;
                    warn!(job = %job.handle, name = %job.name, error = %e, "Post-success check failed");
                }
            }
            JobOutcome::Failed(kind) => {
                if kind == FailureKind::Canceled {
                    self.canceled += 1;
                }
                warn!(
                    job = %job.handle,
                    function = %job.function,
                    backend = %job.backend,
                    name = %job.name,
                    state = %state,
                    "Job did not succeed"
                );
                self.failed_jobs.push(job);
            }
            JobOutcome::Pending => {}
        }
    }

    fn abandon_pending(&mut self) {
        self.abandoned = self.pending.len();
        warn!(
            task_group = %self.task_group,
            abandoned = self.abandoned,
            consecutive_errors = self.consecutive_errors,
            "Giving up on job states, abandoning remaining jobs"
        );
        self.pending.clear();
    }

    async fn finish(self) -> BatchReport {
        if let Err(e) = self.jobs.finish_group(self.task_group).await {
            warn!(task_group = %self.task_group, error = %e, "Failed to finish task group");
        }

        let report = BatchReport {
            task_group: self.task_group,
            total: self.total,
            succeeded: self.succeeded,
            failed: self.failed_jobs.len(),
            canceled: self.canceled,
            abandoned: self.abandoned,
            hook_failures: self.hook_failures,
            polls: self.polls,
            failed_jobs: self.failed_jobs,
            duration: self.started.elapsed(),
        };

        metrics::record_batch_finished(report.total, report.failed, report.abandoned, report.duration);
        info!(
            task_group = %report.task_group,
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            abandoned = report.abandoned,
            polls = report.polls,
            "Batch finished"
        );
        report
    }

    /// Spawn the poll loop.
    pub fn arm(mut self) -> TrackerHandle {
        let (tx, rx) = watch::channel(None);

        let join = tokio::spawn(async move {
            let mut idle_cycles: u32 = 0;

            while !self.pending.is_empty() {
                tokio::time::sleep(self.config.delay_for_idle_cycles(idle_cycles)).await;

                match self.poll_once().await {
                    Ok(0) => idle_cycles = idle_cycles.saturating_add(1),
                    Ok(_) => idle_cycles = 0,
                    Err(e) => {
                        warn!(
                            task_group = %self.task_group,
                            error = %e,
                            consecutive = self.consecutive_errors,
                            "Job state query failed"
                        );
                        if self.consecutive_errors >= self.config.max_consecutive_errors {
                            self.abandon_pending();
                            break;
                        }
                        idle_cycles = idle_cycles.saturating_add(1);
                    }
                }
            }

            let report = self.finish().await;
            let _ = tx.send(Some(report.clone()));
            report
        });

        TrackerHandle { join, report: rx }
    }
}
