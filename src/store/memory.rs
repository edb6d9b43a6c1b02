// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! In-memory entity store.

use super::EntityStore;
use crate::error::{ReplicaError, Result};
use crate::jobs::BoxFuture;
use crate::model::{Distribution, EntityId, Remote, Repository};
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    remotes: HashMap<EntityId, Remote>,
    repositories: HashMap<EntityId, Repository>,
    distributions: HashMap<EntityId, Distribution>,
}

/// Entity store backed by in-process hash maps.
///
/// A single lock covers all tables so uniqueness checks and inserts are
/// atomic with respect to each other.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn remotes(&self) -> Vec<Remote> {
        self.tables.read().await.remotes.values().cloned().collect()
    }

    pub async fn repositories(&self) -> Vec<Repository> {
        self.tables.read().await.repositories.values().cloned().collect()
    }

    pub async fn distributions(&self) -> Vec<Distribution> {
        self.tables.read().await.distributions.values().cloned().collect()
    }
}

fn ensure_unique_remote(tables: &Tables, remote: &Remote) -> Result<()> {
    let taken = tables
        .remotes
        .values()
        .any(|r| r.id != remote.id && r.backend == remote.backend && r.name == remote.name);
    if taken {
        return Err(ReplicaError::conflict("remote", &remote.name));
    }
    Ok(())
}

fn ensure_unique_repository(tables: &Tables, repository: &Repository) -> Result<()> {
    let taken = tables
        .repositories
        .values()
        .any(|r| r.id != repository.id && r.backend == repository.backend && r.name == repository.name);
    if taken {
        return Err(ReplicaError::conflict("repository", &repository.name));
    }
    Ok(())
}

// Distribution names and base paths share one namespace across backends.
fn ensure_unique_distribution(tables: &Tables, distribution: &Distribution) -> Result<()> {
    let taken = tables.distributions.values().any(|d| {
        d.id != distribution.id && (d.name == distribution.name || d.base_path == distribution.base_path)
    });
    if taken {
        return Err(ReplicaError::conflict("distribution", &distribution.name));
    }
    Ok(())
}

impl EntityStore for MemoryStore {
    fn get_remote<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Remote>> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(tables
                .remotes
                .values()
                .find(|r| r.backend == backend && r.name == name)
                .cloned())
        })
    }

    fn create_remote(&self, remote: Remote) -> BoxFuture<'_, Remote> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            ensure_unique_remote(&tables, &remote)?;
            if tables.remotes.contains_key(&remote.id) {
                return Err(ReplicaError::conflict("remote", &remote.name));
            }
            tables.remotes.insert(remote.id, remote.clone());
            Ok(remote)
        })
    }

    fn update_remote(&self, remote: Remote) -> BoxFuture<'_, Remote> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            if !tables.remotes.contains_key(&remote.id) {
                return Err(ReplicaError::not_found("remote", &remote.name));
            }
            ensure_unique_remote(&tables, &remote)?;
            tables.remotes.insert(remote.id, remote.clone());
            Ok(remote)
        })
    }

    fn get_repository<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Repository>> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(tables
                .repositories
                .values()
                .find(|r| r.backend == backend && r.name == name)
                .cloned())
        })
    }

    fn create_repository(&self, repository: Repository) -> BoxFuture<'_, Repository> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            ensure_unique_repository(&tables, &repository)?;
            if tables.repositories.contains_key(&repository.id) {
                return Err(ReplicaError::conflict("repository", &repository.name));
            }
            tables.repositories.insert(repository.id, repository.clone());
            Ok(repository)
        })
    }

    fn update_repository(&self, repository: Repository) -> BoxFuture<'_, Repository> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            if !tables.repositories.contains_key(&repository.id) {
                return Err(ReplicaError::not_found("repository", &repository.name));
            }
            ensure_unique_repository(&tables, &repository)?;
            tables.repositories.insert(repository.id, repository.clone());
            Ok(repository)
        })
    }

    fn get_distribution<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Distribution>> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(tables
                .distributions
                .values()
                .find(|d| d.backend == backend && d.name == name)
                .cloned())
        })
    }

    fn get_distribution_by_id(&self, id: EntityId) -> BoxFuture<'_, Option<Distribution>> {
        Box::pin(async move { Ok(self.tables.read().await.distributions.get(&id).cloned()) })
    }

    fn find_distribution_named<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<Distribution>> {
        Box::pin(async move {
            let tables = self.tables.read().await;
            Ok(tables.distributions.values().find(|d| d.name == name).cloned())
        })
    }

    fn create_distribution(&self, distribution: Distribution) -> BoxFuture<'_, Distribution> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            ensure_unique_distribution(&tables, &distribution)?;
            if tables.distributions.contains_key(&distribution.id) {
                return Err(ReplicaError::conflict("distribution", &distribution.name));
            }
            tables.distributions.insert(distribution.id, distribution.clone());
            Ok(distribution)
        })
    }

    fn update_distribution(&self, distribution: Distribution) -> BoxFuture<'_, Distribution> {
        Box::pin(async move {
            let mut tables = self.tables.write().await;
            if !tables.distributions.contains_key(&distribution.id) {
                return Err(ReplicaError::not_found("distribution", &distribution.name));
            }
            ensure_unique_distribution(&tables, &distribution)?;
            tables.distributions.insert(distribution.id, distribution.clone());
            Ok(distribution)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_remote_create_get_update() {
        let store = MemoryStore::new();
        assert!(store.get_remote("file", "base").await.unwrap().is_none());

        let remote = store
            .create_remote(Remote::new("file", "base", "http://u/PULP_MANIFEST"))
            .await
            .unwrap();
        let mut fetched = store.get_remote("file", "base").await.unwrap().unwrap();
        assert_eq!(fetched, remote);

        fetched.url = "http://u/OTHER".to_string();
        fetched.fields.insert("policy".to_string(), json!("immediate"));
        store.update_remote(fetched).await.unwrap();

        let updated = store.get_remote("file", "base").await.unwrap().unwrap();
        assert_eq!(updated.url, "http://u/OTHER");
        assert_eq!(updated.id, remote.id);
    }

    #[tokio::test]
    async fn test_remote_unique_per_backend() {
        let store = MemoryStore::new();
        store.create_remote(Remote::new("file", "base", "http://a/")).await.unwrap();

        let err = store
            .create_remote(Remote::new("file", "base", "http://b/"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicaError::Conflict { .. }));

        // Same name in another backend is fine
        store.create_remote(Remote::new("rpm", "base", "http://b/")).await.unwrap();
        assert_eq!(store.remotes().await.len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .update_repository(Repository::new("file", "ghost", None))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicaError::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_distribution_namespace_is_global() {
        let store = MemoryStore::new();
        store.create_distribution(Distribution::new("file", "a", "path-a")).await.unwrap();

        // Name collision across backends
        let err = store
            .create_distribution(Distribution::new("rpm", "a", "path-b"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicaError::Conflict { .. }));

        // Base path collision
        let err = store
            .create_distribution(Distribution::new("rpm", "b", "path-a"))
            .await
            .unwrap_err();
        assert!(matches!(err, ReplicaError::Conflict { .. }));

        store.create_distribution(Distribution::new("rpm", "b", "path-b")).await.unwrap();
        assert_eq!(store.distributions().await.len(), 2);
    }

    #[tokio::test]
    async fn test_distribution_lookup_by_id_and_name() {
        let store = MemoryStore::new();
        let distro = store
            .create_distribution(Distribution::new("file", "base", "base"))
            .await
            .unwrap();

        assert_eq!(store.get_distribution_by_id(distro.id).await.unwrap(), Some(distro.clone()));
        assert_eq!(store.get_distribution("file", "base").await.unwrap(), Some(distro.clone()));
        assert!(store.get_distribution("rpm", "base").await.unwrap().is_none());
        assert_eq!(store.find_distribution_named("base").await.unwrap(), Some(distro));
        assert!(store.find_distribution_named("other").await.unwrap().is_none());
    }
}
