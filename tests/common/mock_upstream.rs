//! Mock UpstreamApi for testing.
//!
//! Serves canned listings and entities, records every call, and can be told
//! to fail specific listings or lookups.

use replica_engine::jobs::BoxFuture;
use replica_engine::model::UpstreamDistribution;
use replica_engine::ReplicaError;
use replica_engine::UpstreamApi;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

pub const FILE_LISTING: &str = "distributions/file/file/";
pub const RPM_LISTING: &str = "distributions/rpm/rpm/";

/// A recorded list() call.
#[derive(Debug, Clone, PartialEq)]
pub struct ListCall {
    pub path: String,
    pub limit: usize,
    pub offset: usize,
}

#[derive(Default)]
pub struct MockUpstream {
    listings: HashMap<String, Vec<UpstreamDistribution>>,
    entities: HashMap<String, Value>,
    failing_listings: HashSet<String>,
    failing_lookups: HashSet<String>,
    list_calls: Mutex<Vec<ListCall>>,
    lookups: Mutex<Vec<String>>,
}

impl MockUpstream {
    /// Empty catalogs for both backends.
    pub fn new() -> Self {
        Self::default()
            .with_listing(FILE_LISTING, Vec::new())
            .with_listing(RPM_LISTING, Vec::new())
    }

    pub fn with_listing(mut self, path: &str, records: Vec<UpstreamDistribution>) -> Self {
        self.listings.insert(path.to_string(), records);
        self
    }

    pub fn with_entity(mut self, href: &str, entity: Value) -> Self {
        self.entities.insert(href.to_string(), entity);
        self
    }

    /// A file distribution backed by a repository with `manifest`.
    pub fn with_file_distribution(mut self, record: UpstreamDistribution, manifest: &str) -> Self {
        if let Some(href) = record.repository.clone() {
            self.entities.insert(href, json!({ "pulp_href": record.repository, "manifest": manifest }));
        }
        self.listings.entry(FILE_LISTING.to_string()).or_default().push(record);
        self
    }

    pub fn with_rpm_distribution(mut self, record: UpstreamDistribution) -> Self {
        self.listings.entry(RPM_LISTING.to_string()).or_default().push(record);
        self
    }

    pub fn failing_listing(mut self, path: &str) -> Self {
        self.failing_listings.insert(path.to_string());
        self
    }

    pub fn failing_lookup(mut self, href: &str) -> Self {
        self.failing_lookups.insert(href.to_string());
        self
    }

    pub fn list_calls(&self) -> Vec<ListCall> {
        self.list_calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn lookups(&self) -> Vec<String> {
        self.lookups.lock().map(|c| c.clone()).unwrap_or_default()
    }
}

impl UpstreamApi for MockUpstream {
    fn list<'a>(
        &'a self,
        path: &'a str,
        limit: usize,
        offset: usize,
        _filters: &'a [(String, String)],
    ) -> BoxFuture<'a, Vec<UpstreamDistribution>> {
        Box::pin(async move {
            if let Ok(mut calls) = self.list_calls.lock() {
                calls.push(ListCall {
                    path: path.to_string(),
                    limit,
                    offset,
                });
            }
            if self.failing_listings.contains(path) {
                return Err(ReplicaError::upstream_status("list_distributions", 502));
            }
            let records = self.listings.get(path).cloned().unwrap_or_default();
            Ok(records.into_iter().skip(offset).take(limit).collect())
        })
    }

    fn get_entity<'a>(&'a self, href: &'a str) -> BoxFuture<'a, Value> {
        Box::pin(async move {
            if let Ok(mut lookups) = self.lookups.lock() {
                lookups.push(href.to_string());
            }
            if self.failing_lookups.contains(href) {
                return Err(ReplicaError::upstream_msg("get_entity", "connection reset"));
            }
            self.entities
                .get(href)
                .cloned()
                .ok_or_else(|| ReplicaError::upstream_status("get_entity", 404))
        })
    }
}

/// Upstream file distribution backed by a repository.
pub fn file_record(name: &str, base_url: &str) -> UpstreamDistribution {
    UpstreamDistribution::with_repository(name, base_url, name, format!("/pulp/api/v3/repositories/file/file/{}/", name))
}

/// Upstream rpm distribution backed by a repository.
pub fn rpm_record(name: &str, base_url: &str) -> UpstreamDistribution {
    UpstreamDistribution::with_repository(name, base_url, name, format!("/pulp/api/v3/repositories/rpm/rpm/{}/", name))
}

/// Upstream distribution that serves nothing.
pub fn empty_record(name: &str, base_url: &str) -> UpstreamDistribution {
    let mut record = file_record(name, base_url);
    record.repository = None;
    record.publication = None;
    record
}
