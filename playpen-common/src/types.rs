//! Core types for sandboxed execution

use serde::{Deserialize, Serialize};

/// Request to execute a snippet of automation code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    /// The code to execute; attacker-controlled, no well-formedness assumed
    pub code: String,

    /// Optional language tag (multi-language deployments send it)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<Language>,
}

impl ExecutionRequest {
    /// Create a simple execution request
    pub fn new(code: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            language: None,
        }
    }

    /// Set the language tag
    pub fn with_language(mut self, language: Language) -> Self {
        self.language = Some(language);
        self
    }
}

/// Languages a deployment may accept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[serde(alias = "js")]
    JavaScript,
}

/// Console channel a log entry was emitted on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogMode {
    Log,
    Error,
}

/// One mediated console call, in emission order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub mode: LogMode,
    pub args: Vec<String>,
}

impl LogEntry {
    pub fn log(args: Vec<String>) -> Self {
        Self {
            mode: LogMode::Log,
            args,
        }
    }

    pub fn error(args: Vec<String>) -> Self {
        Self {
            mode: LogMode::Error,
            args,
        }
    }
}

/// A file produced by the sandboxed script and re-homed by the capture
/// bridge. `public_url` is always bridge-assigned, never the path the
/// script asked for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedFile {
    #[serde(rename = "fileName")]
    pub file_name: String,
    pub extension: String,
    #[serde(rename = "publicURL")]
    pub public_url: String,
}

/// Successful run: captured output plus timing/version metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessExecutionResponse {
    pub success: bool,
    /// Version of the automation surface the code ran against
    pub version: String,
    /// Wall-clock milliseconds from run start to file-collection completion
    pub duration: u64,
    pub files: Vec<CapturedFile>,
    pub logs: Vec<LogEntry>,
}

/// Failed run: a single sanitized message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErroredExecutionResponse {
    pub success: bool,
    pub error: String,
}

/// Tagged result of a run. Exactly one of the two shapes is ever returned.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExecutionResponse {
    Success(SuccessExecutionResponse),
    Error(ErroredExecutionResponse),
}

impl ExecutionResponse {
    pub fn success(version: String, duration: u64, files: Vec<CapturedFile>, logs: Vec<LogEntry>) -> Self {
        Self::Success(SuccessExecutionResponse {
            success: true,
            version,
            duration,
            files,
            logs,
        })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error(ErroredExecutionResponse {
            success: false,
            error: message.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }
}

/// Opaque per-run identity. Attributes launched browsers and captured files
/// back to their originating run; never exposed to the sandboxed script.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub uuid::Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
