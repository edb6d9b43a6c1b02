// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Upstream catalog access.
//!
//! [`UpstreamApi`] is the read side of replication: list the distributions a
//! backend publishes, and resolve the repository or publication one of them
//! points at. [`HttpUpstream`] implements it over the upstream REST API.
//!
//! # Listing is a single page
//!
//! A listing is one request with `limit = page_size, offset = 0`. There is no
//! cursoring: catalogs larger than the page size are truncated, and the
//! truncation is logged and counted (`replica_upstream_listing_truncated_total`).
//!
//! # URL layout
//!
//! ```text
//! relative path:  distributions/file/file/   → {base_url}/{api_root}/api/v3/distributions/file/file/
//! absolute href:  /pulp/api/v3/repositories/ → {base_url}/pulp/api/v3/repositories/
//! ```

use crate::circuit_breaker::{CircuitError, UpstreamCircuit};
use crate::config::UpstreamConfig;
use crate::error::{ReplicaError, Result};
use crate::jobs::BoxFuture;
use crate::metrics;
use crate::model::{Server, UpstreamDistribution};
use crate::resilience::RateLimiter;
use reqwest::{Certificate, Client, Identity};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::Value;
use std::time::Instant;
use tracing::{debug, warn};

/// Query filters appended to a listing request.
pub type Filters = Vec<(String, String)>;

/// Read access to an upstream server.
pub trait UpstreamApi: Send + Sync {
    /// One page of distributions at `path` (relative to the API root).
    fn list<'a>(
        &'a self,
        path: &'a str,
        limit: usize,
        offset: usize,
        filters: &'a [(String, String)],
    ) -> BoxFuture<'a, Vec<UpstreamDistribution>>;

    /// Fetch an upstream entity by href.
    fn get_entity<'a>(&'a self, href: &'a str) -> BoxFuture<'a, Value>;
}

/// Paginated list response.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default)]
    pub count: Option<u64>,
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub previous: Option<String>,
    pub results: Vec<T>,
}

/// [`UpstreamApi`] over HTTP.
pub struct HttpUpstream {
    client: Client,
    base_url: String,
    api_root: String,
    credentials: Option<(String, Option<String>)>,
    limiter: Option<RateLimiter>,
    circuit: UpstreamCircuit,
}

impl HttpUpstream {
    /// Build a client for `server`: TLS material, credentials, user agent
    /// and timeout all come from the server record and `config`.
    pub fn new(server: &Server, config: &UpstreamConfig) -> Result<Self> {
        let mut builder = Client::builder()
            .timeout(config.request_timeout_duration())
            .user_agent(config.user_agent.clone())
            .danger_accept_invalid_certs(!server.tls_validation);

        if let Some(ca_cert) = &server.ca_cert {
            let cert = Certificate::from_pem(ca_cert.as_bytes())
                .map_err(|e| ReplicaError::Config(format!("invalid CA certificate for '{}': {}", server.name, e)))?;
            builder = builder.add_root_certificate(cert);
        }

        match (&server.client_cert, &server.client_key) {
            (Some(cert), Some(key)) => {
                let mut pem = cert.clone().into_bytes();
                pem.push(b'\n');
                pem.extend_from_slice(key.as_bytes());
                let identity = Identity::from_pem(&pem)
                    .map_err(|e| ReplicaError::Config(format!("invalid client identity for '{}': {}", server.name, e)))?;
                builder = builder.identity(identity);
            }
            (None, None) => {}
            _ => {
                return Err(ReplicaError::Config(format!(
                    "server '{}': client_cert and client_key must be set together",
                    server.name
                )))
            }
        }

        let client = builder
            .build()
            .map_err(|e| ReplicaError::Config(format!("failed to build HTTP client: {}", e)))?;

        let credentials = server
            .username
            .as_ref()
            .map(|user| (user.clone(), server.password.clone()));

        Ok(Self {
            client,
            base_url: server.base_url.trim_end_matches('/').to_string(),
            api_root: server.api_root.trim_matches('/').to_string(),
            credentials,
            limiter: config.rate_limit_config().map(RateLimiter::new),
            circuit: UpstreamCircuit::with_config(config.circuit_config()),
        })
    }

    /// Resolve a relative API path or an absolute href to a full URL.
    pub fn api_url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            return format!("{}{}", self.base_url, path);
        }
        if self.api_root.is_empty() {
            format!("{}/api/v3/{}", self.base_url, path)
        } else {
            format!("{}/{}/api/v3/{}", self.base_url, self.api_root, path)
        }
    }

    /// Circuit breakers guarding this upstream.
    pub fn circuit(&self) -> &UpstreamCircuit {
        &self.circuit
    }

    async fn throttle(&self) {
        if let Some(limiter) = &self.limiter {
            limiter.acquire().await;
        }
    }

    async fn get_json<T: DeserializeOwned>(&self, operation: &str, url: &str, query: &[(String, String)]) -> Result<T> {
        let mut request = self.client.get(url).query(query);
        if let Some((user, password)) = &self.credentials {
            request = request.basic_auth(user, password.as_ref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| ReplicaError::upstream(operation, e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(ReplicaError::upstream_status(operation, status.as_u16()));
        }
        response.json::<T>().await.map_err(|e| ReplicaError::upstream(operation, e))
    }
}

fn circuit_error(operation: &str, e: CircuitError<ReplicaError>) -> ReplicaError {
    match e {
        CircuitError::Rejected => ReplicaError::upstream_msg(operation, "circuit open, upstream presumed down"),
        CircuitError::Inner(e) => e,
    }
}

/// Backend label for metrics, taken from the segment after the collection
/// name (`distributions/file/file/` → `file`).
pub fn backend_label(path: &str) -> &str {
    const COLLECTIONS: [&str; 4] = ["distributions", "repositories", "publications", "remotes"];
    let mut segments = path.split('/').filter(|s| !s.is_empty());
    while let Some(segment) = segments.next() {
        if COLLECTIONS.contains(&segment) {
            return segments.next().unwrap_or("unknown");
        }
    }
    "unknown"
}

impl UpstreamApi for HttpUpstream {
    fn list<'a>(
        &'a self,
        path: &'a str,
        limit: usize,
        offset: usize,
        filters: &'a [(String, String)],
    ) -> BoxFuture<'a, Vec<UpstreamDistribution>> {
        Box::pin(async move {
            let backend = backend_label(path);
            let url = self.api_url(path);
            let mut query: Filters = vec![
                ("limit".to_string(), limit.to_string()),
                ("offset".to_string(), offset.to_string()),
            ];
            query.extend(filters.iter().cloned());

            self.throttle().await;
            let started = Instant::now();
            let result = self
                .circuit
                .listings
                .call(|| self.get_json::<Page<UpstreamDistribution>>("list_distributions", &url, &query))
                .await
                .map_err(|e| circuit_error("list_distributions", e));
            metrics::record_upstream_request(backend, "list_distributions", result.is_ok(), started.elapsed());

            let page = result?;
            if page.next.is_some() {
                warn!(
                    backend,
                    returned = page.results.len(),
                    total = ?page.count,
                    "Upstream listing truncated at page size"
                );
                metrics::record_listing_truncated(backend);
            }
            debug!(backend, count = page.results.len(), "Listed upstream distributions");
            metrics::record_upstream_listing(backend, page.results.len());
            Ok(page.results)
        })
    }

    fn get_entity<'a>(&'a self, href: &'a str) -> BoxFuture<'a, Value> {
        Box::pin(async move {
            let backend = backend_label(href);
            let url = self.api_url(href);

            self.throttle().await;
            let started = Instant::now();
            let result = self
                .circuit
                .lookups
                .call(|| self.get_json::<Value>("get_entity", &url, &[]))
                .await
                .map_err(|e| circuit_error("get_entity", e));
            metrics::record_upstream_request(backend, "get_entity", result.is_ok(), started.elapsed());
            result
        })
    }
}
