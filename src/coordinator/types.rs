// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Run state and run reports.
//!
//! # State Transitions
//!
//! ```text
//!             replicate()
//! Created ─────────────────→ Reconciling
//!    ↑                           │
//!    │                           │ (all backends processed)
//!    │                           ↓
//!    │                        Tracking ───────────────┐
//!    │                           │                    │ (tracker task lost)
//!    │                           │ (batch finished)   ↓
//!    │                           ↓                 Failed
//!    │                       Finished                 ↑
//!    │                                                │
//!    └──── next replicate() from Finished/Failed      │
//!                                                     │
//!          Reconciling ──(dispatch rejected)──────────┘
//! ```
//!
//! # State Descriptions
//!
//! - **Created**: Initial state after `ReplicaEngine::new()`. No run yet.
//! - **Reconciling**: Listing upstream catalogs and reconciling records.
//! - **Tracking**: Every job dispatched; waiting for them to reach a final state.
//! - **Finished**: The batch finished and the task group was closed.
//! - **Failed**: The job engine rejected a dispatch, or the tracker task died.
//!
//! A new run may start from `Created`, `Finished` or `Failed`.

use crate::error::{ErrorClass, Result};
use crate::jobs::TaskGroupId;
use crate::tracker::BatchReport;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// State of the most recent replication run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// No run started yet.
    Created,

    /// Reconciling upstream records and dispatching jobs.
    Reconciling,

    /// Waiting for dispatched jobs to finish.
    Tracking,

    /// Batch finished.
    Finished,

    /// Run aborted. Writes applied before the failure stay in place.
    Failed,
}

impl RunState {
    /// Whether a new run may start from this state.
    pub fn accepts_run(&self) -> bool {
        matches!(self, Self::Created | Self::Finished | Self::Failed)
    }
}

impl std::fmt::Display for RunState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunState::Created => write!(f, "Created"),
            RunState::Reconciling => write!(f, "Reconciling"),
            RunState::Tracking => write!(f, "Tracking"),
            RunState::Finished => write!(f, "Finished"),
            RunState::Failed => write!(f, "Failed"),
        }
    }
}

/// A record (or whole backend listing) that could not be reconciled.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordFailure {
    pub backend: String,
    /// `None` when the backend listing itself failed.
    pub name: Option<String>,
    pub class: ErrorClass,
    pub message: String,
}

/// What the reconciliation phase of a run did.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub task_group: TaskGroupId,
    /// Backends processed, in order.
    pub backends: Vec<String>,
    /// Upstream records seen across all backends.
    pub records: usize,
    pub reconciled: usize,
    pub disarmed: usize,
    pub no_content: usize,
    pub failures: Vec<RecordFailure>,
    pub jobs_dispatched: usize,
}

impl RunReport {
    pub fn has_failures(&self) -> bool {
        !self.failures.is_empty()
    }
}

/// A run whose jobs are still being tracked.
pub struct RunHandle {
    pub report: RunReport,
    /// Resolves once the batch finished.
    pub batch: JoinHandle<Result<BatchReport>>,
    /// Receives the batch report once published.
    pub batch_rx: watch::Receiver<Option<BatchReport>>,
    /// Run state updates.
    pub state_rx: watch::Receiver<RunState>,
}

impl RunHandle {
    /// Wait for the batch to finish.
    pub async fn wait(self) -> Result<(RunReport, BatchReport)> {
        let batch = self
            .batch
            .await
            .map_err(|e| crate::error::ReplicaError::Tracking(format!("tracker task failed: {}", e)))??;
        Ok((self.report, batch))
    }
}
