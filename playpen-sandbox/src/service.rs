//! Sandbox service - main entry point
//!
//! Orchestrates one run end to end: validation, concurrency admission,
//! per-run wiring (asset dir, capture channel, broker, log sink), isolate
//! execution under the deadline, forced browser cleanup on failure, file
//! collection, and response assembly.

use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::{info, warn};

use playpen_common::{ExecutionRequest, ExecutionResponse, Language, RunId, SuccessExecutionResponse};

use crate::assembler;
use crate::automation::{AutomationEngine, ProxyConfig};
use crate::broker::CapabilityBroker;
use crate::capture::{CaptureBridge, FileStore};
use crate::error::SandboxError;
use crate::limits::ResourceLimits;
use crate::runtime::{IsolateRunner, RunState};

/// Default bound on simultaneously executing runs.
const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Sandbox execution service. One instance serves many concurrent runs;
/// every run gets its own isolate, broker, capture channel and asset
/// directory.
pub struct SandboxService {
    engine: Arc<dyn AutomationEngine>,
    store: Arc<dyn FileStore>,
    limits: ResourceLimits,
    proxy: Option<ProxyConfig>,
    permits: Semaphore,
}

impl SandboxService {
    pub fn new(engine: Arc<dyn AutomationEngine>, store: Arc<dyn FileStore>) -> Self {
        Self::with_limits(engine, store, ResourceLimits::default())
    }

    pub fn with_limits(
        engine: Arc<dyn AutomationEngine>,
        store: Arc<dyn FileStore>,
        limits: ResourceLimits,
    ) -> Self {
        Self {
            engine,
            store,
            limits,
            proxy: None,
            permits: Semaphore::new(DEFAULT_MAX_CONCURRENT),
        }
    }

    /// Route all page traffic of launched browsers through a proxy.
    pub fn with_proxy(mut self, proxy: Option<ProxyConfig>) -> Self {
        self.proxy = proxy;
        self
    }

    /// Bound simultaneous runs.
    pub fn with_max_concurrent(mut self, max_concurrent: usize) -> Self {
        self.permits = Semaphore::new(max_concurrent.max(1));
        self
    }

    /// Version of the automation surface runs execute against.
    pub fn version(&self) -> String {
        self.engine.version()
    }

    /// Execute one request. User-attributable failures come back as
    /// `Ok(ExecutionResponse::Error)`; an `Err` is an infrastructure fault
    /// the dispatcher should surface as a transport-level error.
    pub async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResponse, SandboxError> {
        match self.try_execute(request).await {
            Ok(success) => Ok(ExecutionResponse::Success(success)),
            Err(err) if err.is_infrastructure() => Err(err),
            Err(err) => Ok(ExecutionResponse::Error(assembler::errored(&err))),
        }
    }

    async fn try_execute(
        &self,
        request: ExecutionRequest,
    ) -> Result<SuccessExecutionResponse, SandboxError> {
        validate(&request)?;

        let _permit = self
            .permits
            .acquire()
            .await
            .map_err(|e| SandboxError::Internal(e.into()))?;

        let run = RunId::new();
        let started = Instant::now();
        info!(run_id = %run, code_len = request.code.len(), "running sandboxed code");

        // Distinct asset dir per run; concurrent runs can never observe
        // each other's captured files.
        let asset_dir = tempfile::Builder::new()
            .prefix("playpen-run-")
            .tempdir()
            .map_err(|e| SandboxError::Internal(e.into()))?;

        let (bridge, listener) = CaptureBridge::channel(run, asset_dir.path());
        let listener = listener.with_settle(self.limits.capture_settle);
        let broker = Arc::new(CapabilityBroker::new(
            run,
            self.engine.clone(),
            bridge,
            self.proxy.clone(),
            self.limits.browser_liveness,
        ));
        let state = RunState::new(broker.clone());

        let outcome = IsolateRunner::new(self.limits.clone())
            .run(&request.code, state.clone())
            .await;

        // A capability violation fails the run even if the script swallowed
        // the thrown error.
        let outcome = match state.take_violation() {
            Some(violation) => Err(violation),
            None => outcome,
        };

        if let Err(err) = outcome {
            warn!(run_id = %run, error = %err, "run failed, closing its browsers");
            broker.close_all().await;
            return Err(err);
        }

        let files = listener.finalize(self.store.as_ref()).await?;
        let response = assembler::assemble(self.engine.version(), started, files, state.logs());
        info!(
            run_id = %run,
            duration_ms = response.duration,
            files = response.files.len(),
            logs = response.logs.len(),
            "run completed"
        );
        Ok(response)
    }
}

/// Reject a request before any execution state exists. The `file:` check is
/// a cheap deterrent against obvious local-file probing, not a boundary;
/// the closed global set inside the isolate is what actually stands between
/// the script and the host.
fn validate(request: &ExecutionRequest) -> Result<(), SandboxError> {
    if request.code.trim().is_empty() {
        return Err(SandboxError::EmptyCode);
    }
    if request.code.contains("file:") {
        return Err(SandboxError::LocalFileAccess);
    }
    match request.language {
        None | Some(Language::JavaScript) => Ok(()),
    }
}
