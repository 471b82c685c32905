//! Error taxonomy for sandboxed execution
//!
//! Every failure a run can produce is folded into [`SandboxError`]. The
//! variants split into user-attributable failures (validation, script
//! errors, capability violations, timeout) and infrastructure faults; the
//! dispatcher uses [`SandboxError::is_infrastructure`] to decide between a
//! structured error body and a transport-level 5xx.

use std::time::Duration;

/// Failure of the browser-automation capability surface
#[derive(Debug, thiserror::Error)]
pub enum AutomationError {
    #[error("automation bridge request failed: {0}")]
    Bridge(String),

    #[error("automation bridge returned malformed payload: {0}")]
    Payload(String),

    #[error("unknown browser handle {0}")]
    UnknownBrowser(u32),

    #[error("browser is no longer connected")]
    Disconnected,
}

/// Failure of the file-capture bridge
#[derive(Debug, thiserror::Error)]
pub enum CaptureError {
    #[error("could not stage captured file: {0}")]
    Stage(#[source] std::io::Error),

    #[error("could not publish captured file: {0}")]
    Publish(String),

    #[error("capture listener already finalized")]
    AlreadyFinalized,
}

/// All errors a single run can surface
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    // Validation errors: rejected before any execution starts.
    #[error("no code specified")]
    EmptyCode,

    #[error("Its not allowed to access local files")]
    LocalFileAccess,

    #[error("language '{0}' is not supported")]
    UnsupportedLanguage(String),

    // Capability violation: rejected synchronously inside the run.
    #[error("Package {0} not recognized")]
    UnknownModule(String),

    // Script-originated failure (sync throw at top level or an unhandled
    // rejection), already reduced to a sanitized message.
    #[error("{0}")]
    Script(String),

    #[error("Execution timed out after {} seconds", .0.as_secs())]
    Timeout(Duration),

    // Infrastructure faults below; never attributed to user code.
    #[error(transparent)]
    Automation(#[from] AutomationError),

    #[error(transparent)]
    Capture(#[from] CaptureError),

    #[error("internal execution error")]
    Internal(#[source] anyhow::Error),
}

impl SandboxError {
    /// Whether this failure is an infrastructure fault (surfaced to the
    /// caller as a transport-level error) rather than something the
    /// submitted code caused.
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            SandboxError::Automation(_) | SandboxError::Capture(_) | SandboxError::Internal(_)
        )
    }

    /// Whether this failure was rejected before execution started.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            SandboxError::EmptyCode
                | SandboxError::LocalFileAccess
                | SandboxError::UnsupportedLanguage(_)
        )
    }
}
