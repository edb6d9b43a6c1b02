//! Shared test utilities for integration and chaos tests.
//!
//! This module provides:
//! - A recording `JobDispatcher` with scripted job states
//! - A scripted `UpstreamApi` with failure injection
//! - Upstream record helpers
//! - A write-counting `EntityStore`

pub mod counting_store;
pub mod mock_jobs;
pub mod mock_upstream;

pub use counting_store::*;
pub use mock_jobs::*;
pub use mock_upstream::*;

/// Install a test subscriber once; honours `RUST_LOG`.
#[allow(dead_code)]
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
