//! Mock JobDispatcher for testing.
//!
//! Records every dispatched request and lets the test decide what state
//! each job is in. Optionally applies distribution jobs to a store, the way
//! a real job engine would once the job runs.

use dashmap::DashMap;
use replica_engine::jobs::{BoxFuture, JobDispatcher, JobHandle, JobRequest, JobState, TaskGroupId};
use replica_engine::store::{apply_general_job, MemoryStore};
use replica_engine::ReplicaError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Mock implementation of JobDispatcher that records all calls.
///
/// # Example
/// ```rust,ignore
/// let jobs = MockJobEngine::new().with_initial_state(JobState::Running);
///
/// // Run the engine...
///
/// jobs.complete_all().await;
/// assert_eq!(jobs.dispatched().await.len(), 4);
/// ```
pub struct MockJobEngine {
    /// Recorded dispatch() calls, in order
    requests: RwLock<Vec<(JobHandle, JobRequest)>>,
    /// Current state per handle
    states: DashMap<JobHandle, JobState>,
    /// State given to newly dispatched jobs
    initial_state: JobState,
    /// Store distribution jobs are applied to, if any
    store: Option<Arc<MemoryStore>>,
    /// Reject dispatches once this many were accepted
    fail_dispatch_after: Option<usize>,
    /// Fail this many upcoming get_states() calls
    fail_state_queries: AtomicU32,
    /// Counter for get_states() calls
    state_queries: AtomicUsize,
    /// Groups passed to finish_group()
    finished_groups: RwLock<Vec<TaskGroupId>>,
}

impl MockJobEngine {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(Vec::new()),
            states: DashMap::new(),
            initial_state: JobState::Completed,
            store: None,
            fail_dispatch_after: None,
            fail_state_queries: AtomicU32::new(0),
            state_queries: AtomicUsize::new(0),
            finished_groups: RwLock::new(Vec::new()),
        }
    }

    /// Apply distribution jobs to `store` at dispatch time.
    pub fn applying_to(mut self, store: Arc<MemoryStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_initial_state(mut self, state: JobState) -> Self {
        self.initial_state = state;
        self
    }

    pub fn failing_dispatch_after(mut self, accepted: usize) -> Self {
        self.fail_dispatch_after = Some(accepted);
        self
    }

    pub fn fail_next_state_queries(&self, count: u32) {
        self.fail_state_queries.store(count, Ordering::SeqCst);
    }

    pub fn set_state(&self, handle: JobHandle, state: JobState) {
        self.states.insert(handle, state);
    }

    /// Move every non-final job to `Completed`.
    pub async fn complete_all(&self) {
        for mut entry in self.states.iter_mut() {
            if !entry.value().is_final() {
                *entry.value_mut() = JobState::Completed;
            }
        }
    }

    /// Dispatched requests, in order.
    pub async fn dispatched(&self) -> Vec<JobRequest> {
        self.requests.read().await.iter().map(|(_, r)| r.clone()).collect()
    }

    /// Handles of dispatched jobs whose function matches.
    pub async fn handles_for(&self, function: &str) -> Vec<JobHandle> {
        self.requests
            .read()
            .await
            .iter()
            .filter(|(_, r)| r.function == function)
            .map(|(h, _)| *h)
            .collect()
    }

    pub fn state_query_count(&self) -> usize {
        self.state_queries.load(Ordering::SeqCst)
    }

    pub async fn finished_groups(&self) -> Vec<TaskGroupId> {
        self.finished_groups.read().await.clone()
    }
}

impl Default for MockJobEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl JobDispatcher for MockJobEngine {
    fn dispatch(&self, request: JobRequest) -> BoxFuture<'_, JobHandle> {
        Box::pin(async move {
            let mut requests = self.requests.write().await;
            if let Some(limit) = self.fail_dispatch_after {
                if requests.len() >= limit {
                    return Err(ReplicaError::Dispatch("job queue unavailable".to_string()));
                }
            }

            let handle = JobHandle::new();
            let mut state = self.initial_state;
            if let (Some(store), true) = (&self.store, request.is_general()) {
                if apply_general_job(store.as_ref(), &request).await.is_err() {
                    state = JobState::Failed;
                }
            }

            self.states.insert(handle, state);
            requests.push((handle, request));
            Ok(handle)
        })
    }

    fn get_states<'a>(&'a self, handles: &'a [JobHandle]) -> BoxFuture<'a, HashMap<JobHandle, JobState>> {
        Box::pin(async move {
            self.state_queries.fetch_add(1, Ordering::SeqCst);
            let remaining = self.fail_state_queries.load(Ordering::SeqCst);
            if remaining > 0 {
                self.fail_state_queries.store(remaining - 1, Ordering::SeqCst);
                return Err(ReplicaError::Tracking("job engine unreachable".to_string()));
            }
            Ok(handles
                .iter()
                .filter_map(|h| self.states.get(h).map(|s| (*h, *s)))
                .collect())
        })
    }

    fn finish_group(&self, group: TaskGroupId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.finished_groups.write().await.push(group);
            Ok(())
        })
    }
}
