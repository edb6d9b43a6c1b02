// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Entities the engine reads and writes.
//!
//! The `name` of an upstream distribution is the join key for the whole
//! pipeline: the local Remote, Repository and Distribution all carry the same
//! name within one backend.
//!
//! ```text
//! UpstreamDistribution.name == Remote.name == Repository.name == Distribution.name
//!                               ▲                │                   │
//!                               └── remote ──────┘◄──── repository ──┘
//! ```

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Identity of a local entity.
pub type EntityId = Uuid;

/// Backend-specific extra fields (JSON object).
pub type Fields = serde_json::Map<String, Value>;

/// Root of the local API, used to build entity hrefs.
pub const API_PREFIX: &str = "/pulp/api/v3";

/// Resource name serializing every distribution create/update job.
///
/// Distribution names and base paths form one namespace shared by every
/// backend, so all distribution writes lock this path rather than an entity.
pub const DISTRIBUTION_NAMESPACE: &str = "/api/v3/distributions/";

// ═══════════════════════════════════════════════════════════════════════════════
// Server: the upstream being mirrored (read-only input)
// ═══════════════════════════════════════════════════════════════════════════════

/// An upstream content server.
///
/// Owned by the surrounding system; immutable for the duration of a run.
#[derive(Clone, Serialize, Deserialize)]
pub struct Server {
    /// Unique name of this server.
    pub name: String,

    /// Transport, hostname and optional port, e.g. `https://example.com`.
    pub base_url: String,

    /// API root on the upstream.
    #[serde(default = "default_api_root")]
    pub api_root: String,

    /// PEM encoded CA certificate used to validate the upstream.
    #[serde(default)]
    pub ca_cert: Option<String>,

    /// PEM encoded client certificate.
    #[serde(default)]
    pub client_cert: Option<String>,

    /// PEM encoded client private key.
    #[serde(default)]
    pub client_key: Option<String>,

    /// Whether TLS peer validation must be performed.
    #[serde(default = "default_true")]
    pub tls_validation: bool,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,
}

fn default_api_root() -> String {
    "pulp".to_string()
}

fn default_true() -> bool {
    true
}

impl Server {
    /// Create a server with defaults for everything but name and URL.
    pub fn new(name: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            api_root: default_api_root(),
            ca_cert: None,
            client_cert: None,
            client_key: None,
            tls_validation: true,
            username: None,
            password: None,
        }
    }

    /// Set basic auth credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

// Credentials and keys never reach logs.
impl std::fmt::Debug for Server {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Server")
            .field("name", &self.name)
            .field("base_url", &self.base_url)
            .field("api_root", &self.api_root)
            .field("ca_cert", &self.ca_cert.as_ref().map(|_| "<pem>"))
            .field("client_cert", &self.client_cert.as_ref().map(|_| "<pem>"))
            .field("client_key", &self.client_key.as_ref().map(|_| "<redacted>"))
            .field("tls_validation", &self.tls_validation)
            .field("username", &self.username.as_ref().map(|_| "<redacted>"))
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// UpstreamDistribution: transient snapshot fetched each run
// ═══════════════════════════════════════════════════════════════════════════════

/// One distribution published by the upstream.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpstreamDistribution {
    /// Unique within a backend; the join key.
    pub name: String,

    /// URL the upstream serves this distribution's content at.
    #[serde(default)]
    pub base_url: String,

    #[serde(default)]
    pub base_path: String,

    /// Upstream repository href, when repository-backed.
    #[serde(default)]
    pub repository: Option<String>,

    /// Upstream publication href, when publication-backed.
    #[serde(default)]
    pub publication: Option<String>,

    #[serde(default)]
    pub pulp_href: Option<String>,
}

/// Where an upstream distribution gets its content from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentSource<'a> {
    Repository(&'a str),
    Publication(&'a str),
    /// Serves no content.
    None,
}

impl UpstreamDistribution {
    /// Create a repository-backed record.
    pub fn with_repository(
        name: impl Into<String>,
        base_url: impl Into<String>,
        base_path: impl Into<String>,
        repository: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            base_url: base_url.into(),
            base_path: base_path.into(),
            repository: Some(repository.into()),
            publication: None,
            pulp_href: None,
        }
    }

    /// Classify the content reference. A repository wins over a publication.
    pub fn content_source(&self) -> ContentSource<'_> {
        match (self.repository.as_deref(), self.publication.as_deref()) {
            (Some(href), _) if !href.is_empty() => ContentSource::Repository(href),
            (_, Some(href)) if !href.is_empty() => ContentSource::Publication(href),
            _ => ContentSource::None,
        }
    }

    /// Whether this distribution serves any content.
    pub fn serves_content(&self) -> bool {
        self.content_source() != ContentSource::None
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Local entities
// ═══════════════════════════════════════════════════════════════════════════════

/// A configured pull source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Remote {
    pub id: EntityId,
    pub backend: String,
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub fields: Fields,
}

impl Remote {
    pub fn new(backend: impl Into<String>, name: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend: backend.into(),
            name: name.into(),
            url: url.into(),
            fields: Fields::new(),
        }
    }

    pub fn href(&self) -> String {
        entity_href("remotes", &self.backend, self.id)
    }
}

/// A local repository a Remote is synced into.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Repository {
    pub id: EntityId,
    pub backend: String,
    pub name: String,
    /// The Remote sharing this repository's name.
    pub remote: Option<EntityId>,
    #[serde(default)]
    pub fields: Fields,
}

impl Repository {
    pub fn new(backend: impl Into<String>, name: impl Into<String>, remote: Option<EntityId>) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend: backend.into(),
            name: name.into(),
            remote,
            fields: Fields::new(),
        }
    }

    pub fn href(&self) -> String {
        entity_href("repositories", &self.backend, self.id)
    }
}

/// An endpoint exposing a repository's (or publication's) content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Distribution {
    pub id: EntityId,
    pub backend: String,
    pub name: String,
    pub base_path: String,
    pub repository: Option<EntityId>,
    pub publication: Option<EntityId>,
}

impl Distribution {
    pub fn new(backend: impl Into<String>, name: impl Into<String>, base_path: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend: backend.into(),
            name: name.into(),
            base_path: base_path.into(),
            repository: None,
            publication: None,
        }
    }

    pub fn href(&self) -> String {
        entity_href("distributions", &self.backend, self.id)
    }

    /// Whether the distribution currently exposes anything.
    pub fn is_armed(&self) -> bool {
        self.repository.is_some() || self.publication.is_some()
    }
}

/// Build a local href. The type segment mirrors the backend label
/// (`/pulp/api/v3/remotes/file/file/<id>/`).
pub fn entity_href(collection: &str, backend: &str, id: EntityId) -> String {
    format!("{}/{}/{}/{}/{}/", API_PREFIX, collection, backend, backend, id)
}

/// Recover the entity id from the last path segment of an href.
pub fn parse_href_id(href: &str) -> Option<EntityId> {
    href.trim_end_matches('/')
        .rsplit('/')
        .next()
        .and_then(|segment| Uuid::parse_str(segment).ok())
}

/// Entries of `desired` whose value differs from (or is missing in) `current`.
///
/// Keys only present in `current` are never reported: they are not tracked.
pub fn drifted_fields(current: &Fields, desired: &Fields) -> Fields {
    desired
        .iter()
        .filter(|(key, value)| current.get(key.as_str()) != Some(value))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}

/// Merge `patch` into `target`, leaving unmentioned keys alone.
pub fn merge_fields(target: &mut Fields, patch: &Fields) {
    for (key, value) in patch {
        target.insert(key.clone(), value.clone());
    }
}
