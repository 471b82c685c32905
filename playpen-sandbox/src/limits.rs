//! Resource limits configuration for sandboxed execution

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Resource limits for a single run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Hard wall-clock deadline for the whole run
    pub max_duration: Duration,

    /// Maximum V8 heap size in bytes (None = V8 default)
    pub max_memory_bytes: Option<usize>,

    /// Window after which an unclosed browser is force-closed
    pub browser_liveness: Duration,

    /// Upper bound on the file-stabilization wait during collection
    pub capture_settle: Duration,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_duration: Duration::from_secs(30),
            max_memory_bytes: Some(128 * 1024 * 1024), // 128 MB
            browser_liveness: Duration::from_secs(30),
            capture_settle: Duration::from_secs(10),
        }
    }
}

impl ResourceLimits {
    /// Tight limits, used by tests to keep runs fast
    pub fn strict() -> Self {
        Self {
            max_duration: Duration::from_secs(3),
            max_memory_bytes: Some(64 * 1024 * 1024), // 64 MB
            browser_liveness: Duration::from_millis(500),
            capture_settle: Duration::from_secs(2),
        }
    }

    /// Set the wall-clock deadline
    pub fn with_max_duration(mut self, max_duration: Duration) -> Self {
        self.max_duration = max_duration;
        self
    }

    /// Set the browser liveness window
    pub fn with_browser_liveness(mut self, window: Duration) -> Self {
        self.browser_liveness = window;
        self
    }
}
