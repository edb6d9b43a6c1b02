//! Configuration for the replica engine.
//!
//! Configuration is passed to [`ReplicaEngine::new()`](crate::ReplicaEngine::new)
//! and can be constructed programmatically or deserialized from YAML/JSON.
//!
//! # Quick Start
//!
//! ```rust
//! use replica_engine::config::ReplicaConfig;
//!
//! let config = ReplicaConfig {
//!     backends: vec!["file".into()],
//!     ..Default::default()
//! };
//! assert!(config.backend_enabled("file"));
//! assert!(!config.backend_enabled("rpm"));
//! ```
//!
//! # Configuration Structure
//!
//! ```text
//! ReplicaConfig
//! ├── settings: ReplicaSettings
//! │   ├── upstream: UpstreamConfig  # listing, timeouts, rate limit, circuit
//! │   └── tracker: TrackerConfig    # job completion polling
//! ├── store: StoreConfig            # SQLite entity store
//! └── backends: Vec<String>         # enabled backends (empty = all)
//! ```
//!
//! # YAML Example
//!
//! ```yaml
//! settings:
//!   upstream:
//!     page_size: 1000
//!     request_timeout: "30s"
//!   tracker:
//!     poll_interval: "500ms"
//!     max_poll_interval: "10s"
//!
//! store:
//!   sqlite_path: "/var/lib/replica/entities.db"
//!
//! backends: ["file", "rpm"]
//! ```

use crate::circuit_breaker::CircuitConfig;
use crate::resilience::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

// ═══════════════════════════════════════════════════════════════════════════════
// Top-level config
// ═══════════════════════════════════════════════════════════════════════════════

/// The top-level config object passed to `ReplicaEngine::new()`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicaConfig {
    /// Tunable parameters for upstream access and job tracking.
    #[serde(default)]
    pub settings: ReplicaSettings,

    /// Local entity store settings.
    #[serde(default)]
    pub store: StoreConfig,

    /// Backend labels to replicate. Empty means every supported backend.
    #[serde(default)]
    pub backends: Vec<String>,
}

impl ReplicaConfig {
    /// Create a config for tests: fast polling, in-memory store.
    pub fn for_testing() -> Self {
        Self {
            settings: ReplicaSettings {
                upstream: UpstreamConfig::default(),
                tracker: TrackerConfig::for_testing(),
            },
            store: StoreConfig::in_memory(),
            backends: Vec::new(),
        }
    }

    /// Whether a backend takes part in replication.
    pub fn backend_enabled(&self, label: &str) -> bool {
        self.backends.is_empty() || self.backends.iter().any(|b| b == label)
    }
}

/// General settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReplicaSettings {
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub tracker: TrackerConfig,
}

// ═══════════════════════════════════════════════════════════════════════════════
// UpstreamConfig: catalog listing and entity lookups
// ═══════════════════════════════════════════════════════════════════════════════

/// Upstream API access configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    /// Page size for the single distribution listing call.
    /// Catalogs larger than this are truncated (no cursoring).
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Per-request timeout as a duration string (e.g., "30s").
    #[serde(default = "default_request_timeout")]
    pub request_timeout: String,

    /// User agent sent upstream.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Throttle upstream requests.
    #[serde(default = "default_false")]
    pub rate_limit_enabled: bool,

    /// Sustained upstream requests per second.
    #[serde(default = "default_rate_limit_per_sec")]
    pub rate_limit_per_sec: u32,

    #[serde(default = "default_rate_limit_burst")]
    pub rate_limit_burst: u32,

    /// Consecutive upstream failures before lookups fail fast.
    #[serde(default = "default_circuit_failure_threshold")]
    pub circuit_failure_threshold: u32,

    /// Seconds before a tripped upstream circuit lets a probe through.
    #[serde(default = "default_circuit_reset_timeout")]
    pub circuit_reset_timeout_sec: u64,
}

fn default_page_size() -> usize {
    1000
}

fn default_request_timeout() -> String {
    "30s".to_string()
}

fn default_user_agent() -> String {
    format!("replica-engine/{}", env!("CARGO_PKG_VERSION"))
}

fn default_false() -> bool {
    false
}

fn default_rate_limit_per_sec() -> u32 {
    50
}

fn default_rate_limit_burst() -> u32 {
    10
}

fn default_circuit_failure_threshold() -> u32 {
    5
}

fn default_circuit_reset_timeout() -> u64 {
    30
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            page_size: 1000,
            request_timeout: "30s".to_string(),
            user_agent: default_user_agent(),
            rate_limit_enabled: false,
            rate_limit_per_sec: 50,
            rate_limit_burst: 10,
            circuit_failure_threshold: 5,
            circuit_reset_timeout_sec: 30,
        }
    }
}

impl UpstreamConfig {
    /// Parse the request_timeout string to a Duration.
    pub fn request_timeout_duration(&self) -> Duration {
        humantime::parse_duration(&self.request_timeout).unwrap_or(Duration::from_secs(30))
    }

    /// Rate limit configuration, `None` when disabled.
    pub fn rate_limit_config(&self) -> Option<RateLimitConfig> {
        if self.rate_limit_enabled {
            Some(RateLimitConfig {
                burst_size: self.rate_limit_burst,
                refill_rate: self.rate_limit_per_sec,
            })
        } else {
            None
        }
    }

    /// Circuit breaker configuration for upstream calls.
    pub fn circuit_config(&self) -> CircuitConfig {
        CircuitConfig {
            failure_threshold: self.circuit_failure_threshold,
            success_threshold: 1,
            recovery_timeout: Duration::from_secs(self.circuit_reset_timeout_sec),
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// TrackerConfig: job completion polling
// ═══════════════════════════════════════════════════════════════════════════════

/// Completion tracker configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Delay before the first poll and after any cycle that made progress.
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,

    /// Ceiling for the delay between idle cycles.
    #[serde(default = "default_max_poll_interval")]
    pub max_poll_interval: String,

    /// Growth of the delay per idle cycle.
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,

    /// Consecutive failed state queries before the remaining jobs are abandoned.
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
}

fn default_poll_interval() -> String {
    "500ms".to_string()
}

fn default_max_poll_interval() -> String {
    "10s".to_string()
}

fn default_backoff_factor() -> f64 {
    2.0
}

fn default_max_consecutive_errors() -> u32 {
    10
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            poll_interval: "500ms".to_string(),
            max_poll_interval: "10s".to_string(),
            backoff_factor: 2.0,
            max_consecutive_errors: 10,
        }
    }
}

impl TrackerConfig {
    /// Fast polling for tests.
    pub fn for_testing() -> Self {
        Self {
            poll_interval: "1ms".to_string(),
            max_poll_interval: "5ms".to_string(),
            backoff_factor: 2.0,
            max_consecutive_errors: 3,
        }
    }

    pub fn poll_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.poll_interval).unwrap_or(Duration::from_millis(500))
    }

    pub fn max_poll_interval_duration(&self) -> Duration {
        humantime::parse_duration(&self.max_poll_interval).unwrap_or(Duration::from_secs(10))
    }

    /// Delay after `idle_cycles` consecutive cycles without progress.
    pub fn delay_for_idle_cycles(&self, idle_cycles: u32) -> Duration {
        let base = self.poll_interval_duration();
        let max = self.max_poll_interval_duration();
        if idle_cycles == 0 {
            return base.min(max);
        }

        let factor = self.backoff_factor.max(1.0);
        let multiplier = factor.powi(idle_cycles.min(64) as i32);
        let delay_secs = base.as_secs_f64() * multiplier;
        if !delay_secs.is_finite() || delay_secs >= max.as_secs_f64() {
            return max;
        }
        Duration::from_secs_f64(delay_secs)
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// StoreConfig: SQLite entity store
// ═══════════════════════════════════════════════════════════════════════════════

/// Entity store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Path to the SQLite database.
    pub sqlite_path: String,

    /// Whether to use WAL mode for SQLite (recommended).
    #[serde(default = "default_true")]
    pub wal_mode: bool,
}

fn default_true() -> bool {
    true
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            sqlite_path: "replica.db".to_string(),
            wal_mode: true,
        }
    }
}

impl StoreConfig {
    /// Create an in-memory config for testing.
    pub fn in_memory() -> Self {
        Self {
            sqlite_path: ":memory:".to_string(),
            wal_mode: false,
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════════════════════
