//! Playpen sandbox - untrusted browser-automation code execution
//!
//! Takes an arbitrary, attacker-supplied JavaScript snippet, runs it inside
//! an isolated V8 context with a closed set of globals, mediates every
//! browser launch and file-producing call it makes, and turns the side
//! effects into a bounded, structured response.

mod assembler;
mod automation;
mod broker;
mod capture;
mod error;
mod limits;
mod runtime;
mod service;

pub use automation::{
    AutomationEngine, BridgeEngine, BrowserHandle, BrowserKind, LaunchOptions, PageAction,
    ProxyConfig, ScreenshotOptions,
};
pub use broker::{CapabilityBroker, ModuleKind, ScriptLaunchOptions};
pub use capture::{CaptureBridge, CaptureListener, FileStore, HttpFileStore, LocalFileStore};
pub use error::{AutomationError, CaptureError, SandboxError};
pub use limits::ResourceLimits;
pub use runtime::{IsolateRunner, RunState};
pub use service::SandboxService;

/// Re-export common error types
pub type Result<T> = anyhow::Result<T>;
