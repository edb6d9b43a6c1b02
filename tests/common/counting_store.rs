//! Write-counting EntityStore wrapper.
//!
//! Forwards every call to a `MemoryStore` and counts creates and updates,
//! so tests can assert that a converged run writes nothing.

use replica_engine::jobs::BoxFuture;
use replica_engine::model::{Distribution, EntityId, Remote, Repository};
use replica_engine::store::{EntityStore, MemoryStore};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub struct CountingStore {
    inner: Arc<MemoryStore>,
    creates: AtomicUsize,
    updates: AtomicUsize,
}

#[allow(dead_code)]
impl CountingStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            creates: AtomicUsize::new(0),
            updates: AtomicUsize::new(0),
        }
    }

    pub fn inner(&self) -> &Arc<MemoryStore> {
        &self.inner
    }

    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }

    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }

    pub fn writes(&self) -> usize {
        self.creates() + self.updates()
    }

    fn created(&self) {
        self.creates.fetch_add(1, Ordering::SeqCst);
    }

    fn updated(&self) {
        self.updates.fetch_add(1, Ordering::SeqCst);
    }
}

impl EntityStore for CountingStore {
    fn get_remote<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Remote>> {
        self.inner.get_remote(backend, name)
    }

    fn create_remote(&self, remote: Remote) -> BoxFuture<'_, Remote> {
        self.created();
        self.inner.create_remote(remote)
    }

    fn update_remote(&self, remote: Remote) -> BoxFuture<'_, Remote> {
        self.updated();
        self.inner.update_remote(remote)
    }

    fn get_repository<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Repository>> {
        self.inner.get_repository(backend, name)
    }

    fn create_repository(&self, repository: Repository) -> BoxFuture<'_, Repository> {
        self.created();
        self.inner.create_repository(repository)
    }

    fn update_repository(&self, repository: Repository) -> BoxFuture<'_, Repository> {
        self.updated();
        self.inner.update_repository(repository)
    }

    fn get_distribution<'a>(&'a self, backend: &'a str, name: &'a str) -> BoxFuture<'a, Option<Distribution>> {
        self.inner.get_distribution(backend, name)
    }

    fn get_distribution_by_id(&self, id: EntityId) -> BoxFuture<'_, Option<Distribution>> {
        self.inner.get_distribution_by_id(id)
    }

    fn find_distribution_named<'a>(&'a self, name: &'a str) -> BoxFuture<'a, Option<Distribution>> {
        self.inner.find_distribution_named(name)
    }

    fn create_distribution(&self, distribution: Distribution) -> BoxFuture<'_, Distribution> {
        self.created();
        self.inner.create_distribution(distribution)
    }

    fn update_distribution(&self, distribution: Distribution) -> BoxFuture<'_, Distribution> {
        self.updated();
        self.inner.update_distribution(distribution)
    }
}
