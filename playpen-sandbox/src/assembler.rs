//! Response assembly
//!
//! Packages a finished run into the response contract and owns the one
//! place internal failures are turned into caller-visible strings. Host
//! paths, stack frames and environment details must not survive this
//! translation.

use std::time::Instant;

use playpen_common::{
    CapturedFile, ErroredExecutionResponse, LogEntry, SuccessExecutionResponse,
};

use crate::error::SandboxError;

/// Build the success response. `started` is the run start: duration spans
/// through file stabilization, not just script execution.
pub fn assemble(
    version: String,
    started: Instant,
    files: Vec<CapturedFile>,
    logs: Vec<LogEntry>,
) -> SuccessExecutionResponse {
    SuccessExecutionResponse {
        success: true,
        version,
        duration: started.elapsed().as_millis() as u64,
        files,
        logs,
    }
}

/// Build the failure response with a sanitized message.
pub fn errored(err: &SandboxError) -> ErroredExecutionResponse {
    let error = if err.is_infrastructure() {
        // Never echo infrastructure details to an anonymous caller.
        "internal execution error".to_string()
    } else {
        err.to_string()
    };
    ErroredExecutionResponse {
        success: false,
        error,
    }
}
