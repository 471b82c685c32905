//! Shared wire types for the playpen execution service.
//!
//! Everything that crosses a boundary between the gateway, the sandbox core
//! and external callers lives here, with serde field names matching the
//! public API contract.

mod types;

pub use types::{
    CapturedFile, ErroredExecutionResponse, ExecutionRequest, ExecutionResponse, Language,
    LogEntry, LogMode, RunId, SuccessExecutionResponse,
};
