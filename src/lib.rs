//! # Replica Engine
//!
//! Mirrors the content catalog of an upstream server into a local instance.
//!
//! ## Architecture
//!
//! For every supported backend the engine lists the upstream distributions,
//! reconciles each one into a local Remote, Repository and Distribution, and
//! dispatches the jobs that sync content and publish it:
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────────────┐
//! │                             replica-engine                                │
//! │                                                                           │
//! │  ┌──────────────┐   ┌────────────┐   ┌────────────┐   ┌───────────────┐   │
//! │  │ HttpUpstream │──►│ Replicator │──►│ Reconciler │──►│ JobDispatcher │   │
//! │  │ (listing)    │   │ (file/rpm) │   │ (per rec.) │   │ (sync + dist) │   │
//! │  └──────────────┘   └────────────┘   └────────────┘   └───────────────┘   │
//! │                                            │                  │           │
//! │                                            ▼                  ▼           │
//! │                                     ┌─────────────┐  ┌──────────────────┐ │
//! │                                     │ EntityStore │  │ CompletionTracker│ │
//! │                                     │ (SQLite)    │  │ (poll to final)  │ │
//! │                                     └─────────────┘  └──────────────────┘ │
//! └───────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```rust,no_run
//! use replica_engine::{InlineJobEngine, ReplicaConfig, ReplicaEngine, Server, SqliteStore};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> replica_engine::Result<()> {
//!     let config = ReplicaConfig::default();
//!     let store = Arc::new(SqliteStore::new(&config.store).await?);
//!     let jobs = Arc::new(InlineJobEngine::new(Arc::clone(&store)));
//!     let engine = ReplicaEngine::new(config, store, jobs);
//!
//!     let server = Server::new("upstream", "https://pulp.example.com").with_credentials("admin", "secret");
//!     let (run, batch) = engine.replicate_and_wait(&server).await?;
//!     println!("{} records, {} jobs succeeded", run.records, batch.succeeded);
//!     Ok(())
//! }
//! ```

pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod model;
pub mod reconcile;
pub mod replicator;
pub mod resilience;
pub mod store;
pub mod tracker;
pub mod upstream;

// Re-exports for convenience
pub use circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError, UpstreamCircuit};
pub use config::{ReplicaConfig, ReplicaSettings, StoreConfig, TrackerConfig, UpstreamConfig};
pub use coordinator::{RecordFailure, ReplicaEngine, RunHandle, RunReport, RunState};
pub use error::{ErrorClass, ReplicaError, Result};
pub use jobs::{InlineJobEngine, JobDispatcher, JobHandle, JobRequest, JobState, TaskGroupId};
pub use model::{Distribution, Remote, Repository, Server, UpstreamDistribution};
pub use reconcile::{Disposition, JobKind, ReconcileOutcome, Reconciler, TrackedJob};
pub use replicator::{supported_replicators, FileReplicator, Replicator, RpmReplicator};
pub use store::{EntityStore, MemoryStore, SqliteStore};
pub use tracker::{BatchReport, CompletionHook, CompletionTracker, JobOutcome, VerifyDistribution};
pub use upstream::{HttpUpstream, UpstreamApi};
