// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-record reconciliation.
//!
//! For one upstream distribution the reconciler brings the local Remote,
//! Repository and Distribution in line and dispatches the jobs that do the
//! actual work. Steps run in a fixed order:
//!
//! ```text
//! source_url ──None──→ disarm local distribution (if armed) ──→ done
//!     │
//!     ▼
//! Remote create-or-update ─→ Repository create-or-update ─→ sync job ─→ distribution job
//!  (shared lock)               (exclusive lock)                          (namespace lock)
//! ```
//!
//! Every step is idempotent: re-running a record against unchanged upstream
//! state writes nothing and dispatches only the sync job.
//!
//! # Failure Scope
//!
//! | Failure | Effect |
//! |---------|--------|
//! | upstream lookup, store error | this record fails, the run continues |
//! | create conflict | retried once as lookup + update, then record failure |
//! | distribution name owned by another backend | record failure, no job dispatched |
//! | dispatch rejected | whole run fails, nothing is rolled back, accepted jobs stay tracked |

use crate::error::{ReplicaError, Result};
use crate::jobs::{JobDispatcher, JobHandle, JobRequest, TaskGroupId};
use crate::metrics;
use crate::model::{drifted_fields, merge_fields, EntityId, Fields, Remote, Repository, UpstreamDistribution};
use crate::replicator::Replicator;
use crate::store::EntityStore;
use crate::upstream::UpstreamApi;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

/// What a dispatched job does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobKind {
    Sync,
    CreateDistribution,
    UpdateDistribution,
    /// Clears the repository and publication of a distribution whose
    /// upstream counterpart stopped serving content.
    DisarmDistribution,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sync => "sync",
            Self::CreateDistribution => "create_distribution",
            Self::UpdateDistribution => "update_distribution",
            Self::DisarmDistribution => "disarm_distribution",
        }
    }

    /// Whether the job writes a distribution.
    pub fn is_distribution(&self) -> bool {
        !matches!(self, Self::Sync)
    }
}

/// A dispatched job plus what the tracker needs to report on it.
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedJob {
    pub handle: JobHandle,
    pub kind: JobKind,
    pub function: String,
    pub backend: String,
    /// Join key of the record that produced the job.
    pub name: String,
    /// Repository the distribution must reference once the job completes.
    /// `None` for sync jobs and for disarm jobs.
    pub expected_repository: Option<EntityId>,
}

/// How a record was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Remote, repository and sync (and possibly a distribution job) handled.
    Reconciled,
    /// Upstream serves nothing; the local distribution was disarmed.
    Disarmed,
    /// Upstream serves nothing and nothing local needed changing.
    NoContent,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Reconciled => "reconciled",
            Self::Disarmed => "disarmed",
            Self::NoContent => "no_content",
        }
    }
}

/// Result of reconciling one record.
#[derive(Debug, Clone)]
pub struct ReconcileOutcome {
    pub disposition: Disposition,
    pub remote: Option<Remote>,
    pub repository: Option<Repository>,
    /// Whether a sync job was dispatched.
    pub dispatched: bool,
    pub jobs: Vec<TrackedJob>,
}

impl ReconcileOutcome {
    fn without_content(disposition: Disposition, jobs: Vec<TrackedJob>) -> Self {
        Self {
            disposition,
            remote: None,
            repository: None,
            dispatched: false,
            jobs,
        }
    }
}

/// Reconciles upstream records into the local store for one run.
pub struct Reconciler<'a, S: EntityStore, J: JobDispatcher> {
    store: &'a S,
    jobs: &'a J,
    upstream: &'a dyn UpstreamApi,
    task_group: TaskGroupId,
    /// Every job the job engine accepted, across records.
    accepted: Mutex<Vec<TrackedJob>>,
}

impl<'a, S: EntityStore, J: JobDispatcher> Reconciler<'a, S, J> {
    pub fn new(store: &'a S, jobs: &'a J, upstream: &'a dyn UpstreamApi, task_group: TaskGroupId) -> Self {
        Self {
            store,
            jobs,
            upstream,
            task_group,
            accepted: Mutex::new(Vec::new()),
        }
    }

    pub fn task_group(&self) -> TaskGroupId {
        self.task_group
    }

    /// Drain the jobs accepted so far.
    ///
    /// Includes jobs of a record whose later dispatch was rejected, so a
    /// failed run can still be tracked to completion.
    pub async fn take_accepted(&self) -> Vec<TrackedJob> {
        std::mem::take(&mut *self.accepted.lock().await)
    }

    /// Reconcile one upstream record.
    #[instrument(skip_all, fields(backend = strategy.backend_label(), name = %record.name))]
    pub async fn reconcile(
        &self,
        strategy: &dyn Replicator,
        record: &UpstreamDistribution,
    ) -> Result<ReconcileOutcome> {
        let url = match strategy.source_url(self.upstream, record).await? {
            Some(url) => url,
            None => return self.disarm(strategy, record).await,
        };

        let remote = self.ensure_remote(strategy, record, &url).await?;
        let repository = self.ensure_repository(strategy, &remote).await?;

        let mut jobs = Vec::with_capacity(2);
        jobs.push(self.dispatch_sync(strategy, &remote, &repository).await?);
        if let Some(job) = self.ensure_distribution(strategy, record, &repository).await? {
            jobs.push(job);
        }

        Ok(ReconcileOutcome {
            disposition: Disposition::Reconciled,
            remote: Some(remote),
            repository: Some(repository),
            dispatched: true,
            jobs,
        })
    }

    async fn disarm(&self, strategy: &dyn Replicator, record: &UpstreamDistribution) -> Result<ReconcileOutcome> {
        let backend = strategy.backend_label();
        let distribution = match self.store.get_distribution(backend, &record.name).await? {
            Some(d) if d.is_armed() => d,
            _ => {
                debug!("Upstream distribution serves no content, nothing to disarm");
                return Ok(ReconcileOutcome::without_content(Disposition::NoContent, Vec::new()));
            }
        };

        let mut data = Fields::new();
        data.insert("repository".to_string(), Value::Null);
        data.insert("publication".to_string(), Value::Null);
        let request = JobRequest::general_update(
            self.task_group,
            distribution.id,
            backend,
            strategy.distribution_serializer(),
            data,
        );

        info!(distribution = %distribution.id, "Upstream stopped serving content, disarming distribution");
        let job = self
            .dispatch(request, JobKind::DisarmDistribution, backend, &record.name, None)
            .await?;
        Ok(ReconcileOutcome::without_content(Disposition::Disarmed, vec![job]))
    }

    async fn ensure_remote(
        &self,
        strategy: &dyn Replicator,
        record: &UpstreamDistribution,
        url: &str,
    ) -> Result<Remote> {
        let backend = strategy.backend_label();
        let desired = strategy.remote_extra_fields(record);

        if let Some(existing) = self.store.get_remote(backend, &record.name).await? {
            return self.update_remote_if_drifted(existing, url, &desired).await;
        }

        let mut remote = Remote::new(backend, record.name.as_str(), url);
        remote.fields = desired.clone();
        match self.store.create_remote(remote).await {
            Ok(remote) => {
                info!(url, "Created remote");
                metrics::record_entity_write("remote", "create");
                Ok(remote)
            }
            Err(ReplicaError::Conflict { .. }) => {
                // Lost a race with a concurrent writer: take theirs and converge it.
                metrics::record_conflict_retry("remote");
                let existing = self
                    .store
                    .get_remote(backend, &record.name)
                    .await?
                    .ok_or_else(|| ReplicaError::conflict("remote", record.name.as_str()))?;
                self.update_remote_if_drifted(existing, url, &desired).await
            }
            Err(e) => Err(e),
        }
    }

    async fn update_remote_if_drifted(&self, mut remote: Remote, url: &str, desired: &Fields) -> Result<Remote> {
        let drift = drifted_fields(&remote.fields, desired);
        if remote.url == url && drift.is_empty() {
            debug!("Remote up to date");
            return Ok(remote);
        }

        remote.url = url.to_string();
        merge_fields(&mut remote.fields, &drift);
        let remote = self.store.update_remote(remote).await?;
        info!(url, drifted = drift.len(), "Updated remote");
        metrics::record_entity_write("remote", "update");
        Ok(remote)
    }

    async fn ensure_repository(&self, strategy: &dyn Replicator, remote: &Remote) -> Result<Repository> {
        let backend = strategy.backend_label();
        let desired = strategy.repository_extra_fields(remote);

        if let Some(existing) = self.store.get_repository(backend, &remote.name).await? {
            return self.update_repository_if_drifted(existing, remote.id, &desired).await;
        }

        let mut repository = Repository::new(backend, remote.name.as_str(), Some(remote.id));
        repository.fields = desired.clone();
        match self.store.create_repository(repository).await {
            Ok(repository) => {
                info!("Created repository");
                metrics::record_entity_write("repository", "create");
                Ok(repository)
            }
            Err(ReplicaError::Conflict { .. }) => {
                metrics::record_conflict_retry("repository");
                let existing = self
                    .store
                    .get_repository(backend, &remote.name)
                    .await?
                    .ok_or_else(|| ReplicaError::conflict("repository", remote.name.as_str()))?;
                self.update_repository_if_drifted(existing, remote.id, &desired).await
            }
            Err(e) => Err(e),
        }
    }

    async fn update_repository_if_drifted(
        &self,
        mut repository: Repository,
        remote_id: EntityId,
        desired: &Fields,
    ) -> Result<Repository> {
        let drift = drifted_fields(&repository.fields, desired);
        if repository.remote == Some(remote_id) && drift.is_empty() {
            debug!("Repository up to date");
            return Ok(repository);
        }

        repository.remote = Some(remote_id);
        merge_fields(&mut repository.fields, &drift);
        let repository = self.store.update_repository(repository).await?;
        info!(drifted = drift.len(), "Updated repository");
        metrics::record_entity_write("repository", "update");
        Ok(repository)
    }

    async fn dispatch_sync(
        &self,
        strategy: &dyn Replicator,
        remote: &Remote,
        repository: &Repository,
    ) -> Result<TrackedJob> {
        let request = JobRequest::sync(
            strategy.sync_task_name(),
            self.task_group,
            remote.href(),
            repository.href(),
            strategy.sync_job_params(repository),
        );
        self.dispatch(request, JobKind::Sync, strategy.backend_label(), &repository.name, None)
            .await
    }

    async fn ensure_distribution(
        &self,
        strategy: &dyn Replicator,
        record: &UpstreamDistribution,
        repository: &Repository,
    ) -> Result<Option<TrackedJob>> {
        let backend = strategy.backend_label();
        let serializer = strategy.distribution_serializer();

        let mut data = Fields::new();
        data.insert("name".to_string(), json!(record.name));
        data.insert("base_path".to_string(), json!(record.base_path));
        data.insert("repository".to_string(), json!(repository.href()));

        let (request, kind) = match self.store.get_distribution(backend, &record.name).await? {
            None => {
                if let Some(other) = self.store.find_distribution_named(&record.name).await? {
                    warn!(owner = %other.backend, "Distribution name taken by another backend");
                    return Err(ReplicaError::conflict("distribution", &record.name));
                }
                (
                    JobRequest::general_create(self.task_group, backend, serializer, data),
                    JobKind::CreateDistribution,
                )
            }
            Some(existing) => {
                let repository_moved = existing.repository != Some(repository.id);
                let path_moved = existing.base_path != record.base_path;
                let has_publication = existing.publication.is_some();
                if !(repository_moved || path_moved || has_publication) {
                    debug!("Distribution up to date");
                    return Ok(None);
                }

                debug!(repository_moved, path_moved, has_publication, "Distribution drifted");
                data.insert("publication".to_string(), Value::Null);
                (
                    JobRequest::general_update(self.task_group, existing.id, backend, serializer, data),
                    JobKind::UpdateDistribution,
                )
            }
        };

        let job = self
            .dispatch(request, kind, backend, &record.name, Some(repository.id))
            .await?;
        Ok(Some(job))
    }

    async fn dispatch(
        &self,
        request: JobRequest,
        kind: JobKind,
        backend: &str,
        name: &str,
        expected_repository: Option<EntityId>,
    ) -> Result<TrackedJob> {
        let function = request.function.clone();
        let handle = self.jobs.dispatch(request).await.map_err(|e| match e {
            ReplicaError::Dispatch(_) => e,
            other => ReplicaError::Dispatch(format!("{}: {}", function, other)),
        })?;

        debug!(job = %handle, function = %function, kind = kind.as_str(), "Dispatched job");
        metrics::record_job_dispatch(&function);
        let job = TrackedJob {
            handle,
            kind,
            function,
            backend: backend.to_string(),
            name: name.to_string(),
            expected_repository,
        };
        self.accepted.lock().await.push(job.clone());
        Ok(job)
    }
}
