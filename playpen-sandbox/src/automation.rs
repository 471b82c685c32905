//! Browser-automation capability surface
//!
//! The sandbox treats the automation engine as a fixed, trusted capability:
//! the traits here are the seam, [`BridgeEngine`] is the production
//! implementation driving a browser sidecar over HTTP. Everything the
//! sandboxed script can do to a browser funnels through these two traits,
//! which is what lets the broker mediate launches and the capture bridge
//! own every file-producing call.

mod bridge;

pub use bridge::BridgeEngine;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::error::AutomationError;

/// Browser engines the automation surface can drive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BrowserKind {
    Chromium,
    Firefox,
    Webkit,
}

impl BrowserKind {
    pub fn as_str(self) -> &'static str {
        match self {
            BrowserKind::Chromium => "chromium",
            BrowserKind::Firefox => "firefox",
            BrowserKind::Webkit => "webkit",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "chromium" => Some(BrowserKind::Chromium),
            "firefox" => Some(BrowserKind::Firefox),
            "webkit" => Some(BrowserKind::Webkit),
            _ => None,
        }
    }
}

impl std::fmt::Display for BrowserKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outbound proxy all sandboxed page traffic is routed through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyConfig {
    pub server: String,
}

/// Launch configuration handed to the engine.
///
/// The broker owns construction of this type; scripts only ever supply the
/// subset the shim forwards (headless flag and extra args).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LaunchOptions {
    #[serde(default = "default_headless")]
    pub headless: bool,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub proxy: Option<ProxyConfig>,
}

fn default_headless() -> bool {
    true
}

/// Screenshot parameters that survive mediation (the script's `path` does
/// not reach the engine)
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct ScreenshotOptions {
    #[serde(default)]
    pub full_page: bool,
}

/// A single page-level operation, dispatched as one JSON message
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum PageAction {
    Goto {
        url: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        wait_until: Option<String>,
    },
    Click {
        selector: String,
    },
    Fill {
        selector: String,
        text: String,
    },
    Type {
        selector: String,
        text: String,
    },
    Press {
        selector: String,
        key: String,
    },
    Evaluate {
        expression: String,
    },
    Content,
    Title,
    WaitForSelector {
        selector: String,
    },
    WaitForLoadState {
        state: String,
    },
    SetViewport {
        width: u32,
        height: u32,
    },
    ClosePage,
}

/// Identifier of a page within one browser instance
pub type PageId = u32;

/// A launched browser instance.
///
/// Handles are per-run; dropping one does not close the browser (the
/// broker's watchdog or an explicit close does).
#[async_trait]
pub trait BrowserHandle: Send + Sync {
    /// Open a new page in a fresh context
    async fn new_page(&self) -> Result<PageId, AutomationError>;

    /// Perform a page-level action and return its JSON result
    async fn page_action(
        &self,
        page: PageId,
        action: PageAction,
    ) -> Result<serde_json::Value, AutomationError>;

    /// Render a full screenshot of the page, returning the image bytes
    async fn screenshot(
        &self,
        page: PageId,
        options: ScreenshotOptions,
    ) -> Result<Vec<u8>, AutomationError>;

    /// Render the page as a PDF, returning the document bytes
    async fn pdf(&self, page: PageId) -> Result<Vec<u8>, AutomationError>;

    /// Begin recording the page
    async fn start_video(&self, page: PageId) -> Result<(), AutomationError>;

    /// Stop recording and return the encoded video bytes
    async fn stop_video(&self, page: PageId) -> Result<Vec<u8>, AutomationError>;

    /// Whether the underlying browser process is still reachable
    async fn is_connected(&self) -> bool;

    /// Close the browser. Idempotent.
    async fn close(&self) -> Result<(), AutomationError>;
}

/// The automation engine the broker launches browsers through
#[async_trait]
pub trait AutomationEngine: Send + Sync {
    /// Version string of the automation surface, reported in responses
    fn version(&self) -> String;

    /// Launch a browser of the given kind
    async fn launch(
        &self,
        kind: BrowserKind,
        options: LaunchOptions,
    ) -> Result<Arc<dyn BrowserHandle>, AutomationError>;
}
