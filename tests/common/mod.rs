//! Common test utilities shared across integration and e2e tests

pub mod fake_engine;

pub use fake_engine::{FakeBrowser, FakeEngine};

use std::sync::Arc;
use std::time::Duration;

use playpen_sandbox::{LocalFileStore, ResourceLimits, SandboxService};

/// Setup logging for tests
pub fn setup_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}

/// Service over a fake engine with fast limits. The returned temp dir backs
/// the public file store and must outlive the service.
pub fn test_service(
    engine: Arc<FakeEngine>,
    limits: ResourceLimits,
) -> (Arc<SandboxService>, tempfile::TempDir) {
    let public = tempfile::tempdir().expect("could not create public dir");
    let store = Arc::new(LocalFileStore::new(public.path(), "/public").with_retention(None));
    let service = Arc::new(SandboxService::with_limits(engine, store, limits));
    (service, public)
}

/// Limits tight enough to keep failure-path tests fast.
pub fn fast_limits() -> ResourceLimits {
    ResourceLimits::strict().with_max_duration(Duration::from_secs(5))
}
