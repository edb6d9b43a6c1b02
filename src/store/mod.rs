// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Local entity persistence.
//!
//! [`EntityStore`] holds the Remotes, Repositories and Distributions the
//! engine reconciles. Uniqueness is part of the contract:
//!
//! - Remote and Repository: one per `(backend, name)`
//! - Distribution: `name` and `base_path` unique across *all* backends
//!
//! A create that violates uniqueness fails with
//! [`ReplicaError::Conflict`], which the reconciler retries as an update.
//! Nothing is ever deleted.
//!
//! Implementations:
//! - [`memory::MemoryStore`]: in-process tables, for tests and embedding
//! - [`sqlite::SqliteStore`]: durable, WAL-mode SQLite

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::{ReplicaError, Result};
use crate::jobs::{BoxFuture, JobRequest, GENERAL_CREATE, GENERAL_UPDATE};
use crate::model::{parse_href_id, Distribution, EntityId, Fields, Remote, Repository};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Persistence for local entities.
pub trait EntityStore: Send + Sync + 'static {
    fn get_remote<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Remote>>;

    /// Insert a new remote. Fails with `Conflict` if `(backend, name)` is taken.
    fn create_remote(&self, remote: Remote) -> BoxFuture<'_, Remote>;

    /// Replace the remote with the same id. Fails with `NotFound` if absent.
    fn update_remote(&self, remote: Remote) -> BoxFuture<'_, Remote>;

    fn get_repository<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Repository>>;

    fn create_repository(&self, repository: Repository) -> BoxFuture<'_, Repository>;

    fn update_repository(&self, repository: Repository) -> BoxFuture<'_, Repository>;

    fn get_distribution<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Distribution>>;

    fn get_distribution_by_id(&self, id: EntityId) -> BoxFuture<'_, Option<Distribution>>;

    /// Distribution called `name` under any backend.
    fn find_distribution_named<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<Distribution>>;

    /// Insert a distribution. Fails with `Conflict` if its name or base path
    /// is used by any distribution of any backend.
    fn create_distribution(&self, distribution: Distribution) -> BoxFuture<'_, Distribution>;

    fn update_distribution(&self, distribution: Distribution) -> BoxFuture<'_, Distribution>;
}

impl<S: EntityStore> EntityStore for Arc<S> {
    fn get_remote<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Remote>> {
        (**self).get_remote(backend, name)
    }

    fn create_remote(&self, remote: Remote) -> BoxFuture<'_, Remote> {
        (**self).create_remote(remote)
    }

    fn update_remote(&self, remote: Remote) -> BoxFuture<'_, Remote> {
        (**self).update_remote(remote)
    }

    fn get_repository<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Repository>> {
        (**self).get_repository(backend, name)
    }

    fn create_repository(&self, repository: Repository) -> BoxFuture<'_, Repository> {
        (**self).create_repository(repository)
    }

    fn update_repository(&self, repository: Repository) -> BoxFuture<'_, Repository> {
        (**self).update_repository(repository)
    }

    fn get_distribution<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Distribution>> {
        (**self).get_distribution(backend, name)
    }

    fn get_distribution_by_id(&self, id: EntityId) -> BoxFuture<'_, Option<Distribution>> {
        (**self).get_distribution_by_id(id)
    }

    fn find_distribution_named<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<Distribution>> {
        (**self).find_distribution_named(name)
    }

    fn create_distribution(&self, distribution: Distribution) -> BoxFuture<'_, Distribution> {
        (**self).create_distribution(distribution)
    }

    fn update_distribution(&self, distribution: Distribution) -> BoxFuture<'_, Distribution> {
        (**self).update_distribution(distribution)
    }
}

/// Execute a generic distribution create/update job against a store.
///
/// This is the body of the `general_create` / `general_update` jobs the
/// reconciler dispatches. Only keys present in `data` are applied on update;
/// an explicit `null` clears a reference.
pub async fn apply_general_job<S: EntityStore + ?Sized>(store: &S, request: &JobRequest) -> Result<Distribution> {
    let data = request
        .data()
        .ok_or_else(|| ReplicaError::Internal(format!("{} job without data", request.function)))?;

    match request.function.as_str() {
        GENERAL_CREATE => {
            let backend = arg_str(request, 0)?;
            let mut distribution = Distribution::new(backend, data_str(data, "name")?, data_str(data, "base_path")?);
            distribution.repository = data_ref(data, "repository")?;
            distribution.publication = data_ref(data, "publication")?;
            store.create_distribution(distribution).await
        }
        GENERAL_UPDATE => {
            let raw_id = arg_str(request, 0)?;
            let id = Uuid::parse_str(raw_id)
                .map_err(|e| ReplicaError::Internal(format!("invalid distribution id '{}': {}", raw_id, e)))?;
            let mut distribution = store
                .get_distribution_by_id(id)
                .await?
                .ok_or_else(|| ReplicaError::not_found("distribution", raw_id))?;

            if data.contains_key("name") {
                distribution.name = data_str(data, "name")?.to_string();
            }
            if data.contains_key("base_path") {
                distribution.base_path = data_str(data, "base_path")?.to_string();
            }
            if data.contains_key("repository") {
                distribution.repository = data_ref(data, "repository")?;
            }
            if data.contains_key("publication") {
                distribution.publication = data_ref(data, "publication")?;
            }
            store.update_distribution(distribution).await
        }
        other => Err(ReplicaError::Internal(format!(
            "'{}' is not a distribution job",
            other
        ))),
    }
}

fn arg_str(request: &JobRequest, index: usize) -> Result<&str> {
    request
        .args
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| ReplicaError::Internal(format!("{} job missing argument {}", request.function, index)))
}

fn data_str<'a>(data: &'a Fields, key: &str) -> Result<&'a str> {
    data.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ReplicaError::Internal(format!("distribution data missing '{}'", key)))
}

fn data_ref(data: &Fields, key: &str) -> Result<Option<EntityId>> {
    match data.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(href)) => parse_href_id(href)
            .map(Some)
            .ok_or_else(|| ReplicaError::Internal(format!("invalid {} href '{}'", key, href))),
        Some(other) => Err(ReplicaError::Internal(format!("invalid {} reference {}", key, other))),
    }
}
