// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Error types for the replica engine.
//!
//! Errors are categorized by where they happen in a replication run, because
//! the category decides how far a failure reaches:
//!
//! | Error Type | Class | Scope |
//! |------------|-------|-------|
//! | `Upstream` | `UpstreamRead` | One record (or one backend listing) |
//! | `Conflict` | `LocalConflict` | One record, after a single retry as update |
//! | `Store` / `NotFound` | `Local` | One record |
//! | `Dispatch` | `Dispatch` | Whole run |
//! | `Tracking` | `Tracking` | One poll cycle |
//! | `Config` / `InvalidState` / `Internal` | `Local` | Caller |
//!
//! Use [`ReplicaError::is_run_fatal()`] to decide whether the orchestrator
//! must stop the run, and [`ReplicaError::is_retryable()`] to decide whether
//! re-running the same step can succeed.

use thiserror::Error;

/// Result type alias for replica operations.
pub type Result<T> = std::result::Result<T, ReplicaError>;

/// Errors that can occur during a replication run.
#[derive(Error, Debug)]
pub enum ReplicaError {
    /// Upstream API failure (network, auth, unexpected status or payload).
    ///
    /// Aborts only the record (or backend listing) that triggered it.
    #[error("Upstream error ({operation}): {message}")]
    Upstream {
        operation: String,
        message: String,
        /// HTTP status, when the upstream answered at all.
        status: Option<u16>,
        #[source]
        source: Option<reqwest::Error>,
    },

    /// SQLite error in the local entity store.
    #[error("Entity store error: {0}")]
    Store(#[from] sqlx::Error),

    /// Uniqueness violation on create (another writer got there first).
    #[error("Conflict creating {kind} '{name}'")]
    Conflict { kind: String, name: String },

    /// Entity expected to exist was not found.
    #[error("{kind} '{name}' not found")]
    NotFound { kind: String, name: String },

    /// The job engine rejected a dispatch.
    ///
    /// Fatal to the run: nothing is rolled back, every prior step is
    /// idempotent and the run can be retried wholesale.
    #[error("Job dispatch error: {0}")]
    Dispatch(String),

    /// Querying job states failed.
    #[error("Job tracking error: {0}")]
    Tracking(String),

    /// Invalid or missing configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Run state machine violation.
    #[error("Invalid state: expected {expected}, got {actual}")]
    InvalidState { expected: String, actual: String },

    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Error taxonomy used for reporting and metrics labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Network/auth failures while listing or resolving upstream entities.
    UpstreamRead,
    /// Uniqueness races on local entity creation.
    LocalConflict,
    /// Job engine rejected a job.
    Dispatch,
    /// Job state polling failed.
    Tracking,
    /// Local store, config and internal errors.
    Local,
}

impl ErrorClass {
    /// Label used in metrics and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UpstreamRead => "upstream_read",
            Self::LocalConflict => "local_conflict",
            Self::Dispatch => "dispatch",
            Self::Tracking => "tracking",
            Self::Local => "local",
        }
    }
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl ReplicaError {
    /// Create an upstream error from a reqwest error.
    pub fn upstream(operation: impl Into<String>, source: reqwest::Error) -> Self {
        Self::Upstream {
            operation: operation.into(),
            message: source.to_string(),
            status: source.status().map(|s| s.as_u16()),
            source: Some(source),
        }
    }

    /// Create an upstream error without a source.
    pub fn upstream_msg(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Upstream {
            operation: operation.into(),
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Create an upstream error for a non-success HTTP status.
    pub fn upstream_status(operation: impl Into<String>, status: u16) -> Self {
        Self::Upstream {
            operation: operation.into(),
            message: format!("unexpected status {}", status),
            status: Some(status),
            source: None,
        }
    }

    /// Create a conflict error.
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create a not-found error.
    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Classify this error.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Upstream { .. } => ErrorClass::UpstreamRead,
            Self::Conflict { .. } => ErrorClass::LocalConflict,
            Self::Dispatch(_) => ErrorClass::Dispatch,
            Self::Tracking(_) => ErrorClass::Tracking,
            Self::Store(_)
            | Self::NotFound { .. }
            | Self::Config(_)
            | Self::InvalidState { .. }
            | Self::Internal(_) => ErrorClass::Local,
        }
    }

    /// Whether this error must stop the whole run.
    pub fn is_run_fatal(&self) -> bool {
        matches!(self, Self::Dispatch(_))
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Upstream { status, .. } => match status {
                // Auth and not-found answers will not change on retry
                Some(401) | Some(403) | Some(404) => false,
                _ => true,
            },
            Self::Conflict { .. } => true,
            Self::Tracking(_) => true,
            Self::Store(_) => false,
            Self::NotFound { .. } => false,
            Self::Dispatch(_) => false,
            Self::Config(_) => false,
            Self::InvalidState { .. } => false,
            Self::Internal(_) => false,
        }
    }
}

impl From<reqwest::Error> for ReplicaError {
    fn from(e: reqwest::Error) -> Self {
        Self::upstream("unknown", e)
    }
}

impl From<serde_json::Error> for ReplicaError {
    fn from(e: serde_json::Error) -> Self {
        Self::Internal(format!("JSON error: {}", e))
    }
}
