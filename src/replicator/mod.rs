// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Backend replication strategies.
//!
//! Every content type (`file`, `rpm`, ...) shares one reconciliation
//! algorithm but differs in a handful of details: where a remote's URL comes
//! from, which extra fields its remote and repository carry, and what the
//! sync job is called and told. A [`Replicator`] captures exactly those
//! differences.
//!
//! Strategies hold no state across runs. The registry is static:
//!
//! ```rust
//! use replica_engine::replicator::supported_replicators;
//!
//! let labels: Vec<_> = supported_replicators().iter().map(|r| r.backend_label()).collect();
//! assert_eq!(labels, vec!["file", "rpm"]);
//! ```

pub mod file;
pub mod rpm;

pub use file::FileReplicator;
pub use rpm::RpmReplicator;

use crate::jobs::BoxFuture;
use crate::model::{Fields, Remote, Repository, UpstreamDistribution};
use crate::upstream::UpstreamApi;
use std::sync::Arc;

/// Backend-specific knowledge used by the reconciler.
pub trait Replicator: Send + Sync {
    /// App label of the backend (`"file"`, `"rpm"`).
    fn backend_label(&self) -> &'static str;

    /// Entity type within the backend, used in listing paths.
    fn entity_kind_name(&self) -> &'static str;

    /// Serializer the generic distribution jobs validate `data` with.
    fn distribution_serializer(&self) -> &'static str;

    /// Job function that syncs a repository from its remote.
    fn sync_task_name(&self) -> &'static str;

    /// Upstream listing path for this backend's distributions.
    fn list_path(&self) -> String {
        format!("distributions/{}/{}/", self.backend_label(), self.entity_kind_name())
    }

    /// One listing call, `limit = page_size`, `offset = 0`. Not retried.
    fn list_upstream<'a>(
        &'a self,
        api: &'a dyn UpstreamApi,
        page_size: usize,
    ) -> BoxFuture<'a, Vec<UpstreamDistribution>> {
        Box::pin(async move {
            let path = self.list_path();
            api.list(&path, page_size, 0, &[]).await
        })
    }

    /// URL the local remote should pull from; `None` when the upstream
    /// distribution serves no content.
    fn source_url<'a>(
        &'a self,
        api: &'a dyn UpstreamApi,
        record: &'a UpstreamDistribution,
    ) -> BoxFuture<'a, Option<String>>;

    /// Extra fields set on the remote.
    fn remote_extra_fields(&self, _record: &UpstreamDistribution) -> Fields {
        Fields::new()
    }

    /// Extra fields set on the repository, derived from its remote.
    fn repository_extra_fields(&self, remote: &Remote) -> Fields;

    /// Keyword arguments of the sync job.
    fn sync_job_params(&self, repository: &Repository) -> Fields;
}

/// Every strategy this crate ships, in replication order.
pub fn supported_replicators() -> Vec<Arc<dyn Replicator>> {
    vec![Arc::new(FileReplicator), Arc::new(RpmReplicator)]
}

/// `remote_pk` / `repository_pk` common to every sync job.
pub(crate) fn base_sync_params(repository: &Repository) -> Fields {
    let mut params = Fields::new();
    params.insert(
        "remote_pk".to_string(),
        serde_json::json!(repository.remote.map(|id| id.to_string())),
    );
    params.insert("repository_pk".to_string(), serde_json::json!(repository.id.to_string()));
    params
}
