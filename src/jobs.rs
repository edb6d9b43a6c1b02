// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Job engine integration.
//!
//! The engine never executes sync or distribution writes itself: it hands them
//! to a job engine together with the resources each job locks, and later asks
//! for their states. [`JobDispatcher`] is that seam.
//!
//! Two kinds of jobs are dispatched:
//!
//! | Function | Args | Kwargs | Exclusive | Shared |
//! |----------|------|--------|-----------|--------|
//! | backend sync task | none | sync params | repository href | remote href |
//! | `general_create` | `[backend, serializer]` | `{data}` | distribution namespace | none |
//! | `general_update` | `[id, backend, serializer]` | `{data}` | distribution namespace | none |
//!
//! # Example
//!
//! ```rust,no_run
//! use replica_engine::jobs::{BoxFuture, JobDispatcher, JobHandle, JobRequest, JobState, TaskGroupId};
//! use std::collections::HashMap;
//!
//! struct Queue;
//!
//! impl JobDispatcher for Queue {
//!     fn dispatch(&self, _request: JobRequest) -> BoxFuture<'_, JobHandle> {
//!         Box::pin(async { Ok(JobHandle::new()) })
//!     }
//!
//!     fn get_states<'a>(&'a self, handles: &'a [JobHandle]) -> BoxFuture<'a, HashMap<JobHandle, JobState>> {
//!         Box::pin(async move { Ok(handles.iter().map(|h| (*h, JobState::Completed)).collect()) })
//!     }
//!
//!     fn finish_group(&self, _group: TaskGroupId) -> BoxFuture<'_, ()> {
//!         Box::pin(async { Ok(()) })
//!     }
//! }
//! ```

use crate::error::Result;
use crate::model::{Fields, DISTRIBUTION_NAMESPACE};
use crate::store::{self, EntityStore};
use dashmap::{DashMap, DashSet};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use uuid::Uuid;

/// Type alias for boxed async futures (reduces trait signature complexity).
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Generic distribution create job.
pub const GENERAL_CREATE: &str = "general_create";

/// Generic distribution update job.
pub const GENERAL_UPDATE: &str = "general_update";

/// Opaque identity of a dispatched job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobHandle(pub Uuid);

impl JobHandle {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for JobHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Groups every job dispatched by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskGroupId(pub Uuid);

impl TaskGroupId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskGroupId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskGroupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// State of a job as reported by the job engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Pending,
    Running,
    Completed,
    Failed,
    Canceled,
}

impl JobState {
    /// Completed, failed and canceled jobs never change state again.
    #[must_use]
    pub fn is_final(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        }
    }
}

impl std::fmt::Display for JobState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A job to hand to the job engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobRequest {
    /// Job function name.
    pub function: String,
    pub task_group: Option<TaskGroupId>,
    /// Resources the job reads; may be held by other jobs concurrently.
    pub shared_resources: Vec<String>,
    /// Resources the job writes; held by at most one job at a time.
    pub exclusive_resources: Vec<String>,
    pub args: Vec<Value>,
    pub kwargs: Fields,
}

impl JobRequest {
    /// A backend sync job: reads the remote, writes the repository.
    pub fn sync(
        function: impl Into<String>,
        task_group: TaskGroupId,
        remote_href: String,
        repository_href: String,
        kwargs: Fields,
    ) -> Self {
        Self {
            function: function.into(),
            task_group: Some(task_group),
            shared_resources: vec![remote_href],
            exclusive_resources: vec![repository_href],
            args: Vec::new(),
            kwargs,
        }
    }

    /// Create a distribution from `data`.
    pub fn general_create(task_group: TaskGroupId, backend: &str, serializer: &str, data: Fields) -> Self {
        Self::general(
            GENERAL_CREATE,
            task_group,
            vec![json!(backend), json!(serializer)],
            data,
        )
    }

    /// Update distribution `id` with `data`.
    pub fn general_update(
        task_group: TaskGroupId,
        id: Uuid,
        backend: &str,
        serializer: &str,
        data: Fields,
    ) -> Self {
        Self::general(
            GENERAL_UPDATE,
            task_group,
            vec![json!(id.to_string()), json!(backend), json!(serializer)],
            data,
        )
    }

    fn general(function: &str, task_group: TaskGroupId, args: Vec<Value>, data: Fields) -> Self {
        let mut kwargs = Fields::new();
        kwargs.insert("data".to_string(), Value::Object(data));
        Self {
            function: function.to_string(),
            task_group: Some(task_group),
            shared_resources: Vec::new(),
            exclusive_resources: vec![DISTRIBUTION_NAMESPACE.to_string()],
            args,
            kwargs,
        }
    }

    /// Whether this is a generic distribution create/update job.
    #[must_use]
    pub fn is_general(&self) -> bool {
        self.function == GENERAL_CREATE || self.function == GENERAL_UPDATE
    }

    /// The `data` payload of a generic job.
    pub fn data(&self) -> Option<&Fields> {
        self.kwargs.get("data").and_then(Value::as_object)
    }
}

/// What the engine needs from a job engine.
///
/// Queueing, worker assignment and resource locking all live behind this
/// trait; the engine only declares resources and never takes locks itself.
pub trait JobDispatcher: Send + Sync + 'static {
    /// Enqueue a job. Errors here are fatal to the run.
    fn dispatch(&self, request: JobRequest) -> BoxFuture<'_, JobHandle>;

    /// Current state of each known handle. Unknown handles may be omitted.
    fn get_states<'a>(&'a self, handles: &'a [JobHandle]) -> BoxFuture<'a, HashMap<JobHandle, JobState>>;

    /// Signal that every job of `group` has been dispatched and reached a final state.
    fn finish_group(&self, group: TaskGroupId) -> BoxFuture<'_, ()>;
}

impl<J: JobDispatcher> JobDispatcher for Arc<J> {
    fn dispatch(&self, request: JobRequest) -> BoxFuture<'_, JobHandle> {
        (**self).dispatch(request)
    }

    fn get_states<'a>(&'a self, handles: &'a [JobHandle]) -> BoxFuture<'a, HashMap<JobHandle, JobState>> {
        (**self).get_states(handles)
    }

    fn finish_group(&self, group: TaskGroupId) -> BoxFuture<'_, ()> {
        (**self).finish_group(group)
    }
}

/// In-process job engine.
///
/// Generic distribution jobs are applied to the entity store at dispatch time.
/// Sync jobs complete immediately without moving any payload. Every state is
/// therefore final as soon as `dispatch` returns.
pub struct InlineJobEngine<S: EntityStore> {
    store: Arc<S>,
    states: DashMap<JobHandle, JobState>,
    dispatched: RwLock<Vec<JobRequest>>,
    finished_groups: DashSet<TaskGroupId>,
}

impl<S: EntityStore> InlineJobEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            states: DashMap::new(),
            dispatched: RwLock::new(Vec::new()),
            finished_groups: DashSet::new(),
        }
    }

    /// Every request dispatched so far, in dispatch order.
    pub async fn dispatched(&self) -> Vec<JobRequest> {
        self.dispatched.read().await.clone()
    }

    #[must_use]
    pub fn is_group_finished(&self, group: TaskGroupId) -> bool {
        self.finished_groups.contains(&group)
    }
}

impl<S: EntityStore> JobDispatcher for InlineJobEngine<S> {
    fn dispatch(&self, request: JobRequest) -> BoxFuture<'_, JobHandle> {
        Box::pin(async move {
            let handle = JobHandle::new();
            let state = if request.is_general() {
                match store::apply_general_job(self.store.as_ref(), &request).await {
                    Ok(distribution) => {
                        debug!(
                            job = %handle,
                            function = %request.function,
                            name = %distribution.name,
                            "Applied distribution job"
                        );
                        JobState::Completed
                    }
                    Err(e) => {
                        warn!(job = %handle, function = %request.function, error = %e, "Distribution job failed");
                        JobState::Failed
                    }
                }
            } else {
                debug!(job = %handle, function = %request.function, "Sync job completed inline");
                JobState::Completed
            };

            self.states.insert(handle, state);
            self.dispatched.write().await.push(request);
            Ok(handle)
        })
    }

    fn get_states<'a>(&'a self, handles: &'a [JobHandle]) -> BoxFuture<'a, HashMap<JobHandle, JobState>> {
        Box::pin(async move {
            Ok(handles
                .iter()
                .filter_map(|h| self.states.get(h).map(|state| (*h, *state)))
                .collect())
        })
    }

    fn finish_group(&self, group: TaskGroupId) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            debug!(task_group = %group, "Task group finished");
            self.finished_groups.insert(group);
            Ok(())
        })
    }
}
