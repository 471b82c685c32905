//! Capability broker
//!
//! Builds the restricted view of the automation surface a sandboxed script
//! sees through its `require`. Module resolution is a closed table; browser
//! launches are mediated (run-identity tagging, sandbox-flag and proxy
//! injection, liveness watchdog) without changing the script-visible API;
//! and every file-producing call funnels into the capture bridge.

use serde::Deserialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{info, warn};

use playpen_common::RunId;

use crate::automation::{
    AutomationEngine, BrowserHandle, BrowserKind, LaunchOptions, PageAction, PageId, ProxyConfig,
    ScreenshotOptions,
};
use crate::capture::CaptureBridge;
use crate::error::{AutomationError, SandboxError};

/// Chromium has no usable OS sandbox inside the container; compensate at
/// the container boundary and disable it at launch.
const CHROMIUM_NO_SANDBOX: &str = "--no-sandbox";

/// Capabilities the mediated `require` can hand out
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleKind {
    /// The automation library itself (browser types, launch)
    Automation,
    /// The video-capture helper (`saveVideo`)
    Video,
}

impl ModuleKind {
    pub fn tag(self) -> &'static str {
        match self {
            ModuleKind::Automation => "automation",
            ModuleKind::Video => "video",
        }
    }
}

/// Launch options as a script is allowed to express them
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ScriptLaunchOptions {
    #[serde(default)]
    pub headless: Option<bool>,
    #[serde(default)]
    pub args: Vec<String>,
}

/// Per-run capability broker. One exists per execution; nothing here is
/// shared across runs.
pub struct CapabilityBroker {
    run: RunId,
    engine: Arc<dyn AutomationEngine>,
    bridge: CaptureBridge,
    proxy: Option<ProxyConfig>,
    liveness: Duration,
    /// Watchdogs run on the host runtime: they must outlive the isolate
    /// thread's own runtime, which ends with the run.
    host: tokio::runtime::Handle,
    browsers: Mutex<HashMap<u32, Arc<dyn BrowserHandle>>>,
    next_browser: AtomicU32,
}

impl CapabilityBroker {
    /// Must be called from within the host runtime.
    pub fn new(
        run: RunId,
        engine: Arc<dyn AutomationEngine>,
        bridge: CaptureBridge,
        proxy: Option<ProxyConfig>,
        liveness: Duration,
    ) -> Self {
        Self {
            run,
            engine,
            bridge,
            proxy,
            liveness,
            host: tokio::runtime::Handle::current(),
            browsers: Mutex::new(HashMap::new()),
            next_browser: AtomicU32::new(1),
        }
    }

    pub fn run_id(&self) -> RunId {
        self.run
    }

    /// Version of the automation surface, reported in responses
    pub fn version(&self) -> String {
        self.engine.version()
    }

    /// Resolve a module name against the closed capability table.
    pub fn require(&self, name: &str) -> Result<ModuleKind, SandboxError> {
        match name {
            "playwright" | "playwright-core" | "playwright-chromium" | "playwright-firefox"
            | "playwright-webkit" => Ok(ModuleKind::Automation),
            "playwright-video" => Ok(ModuleKind::Video),
            other => Err(SandboxError::UnknownModule(other.to_string())),
        }
    }

    /// Launch a browser on the script's behalf. The returned id is the only
    /// thing the script ever holds; the handle stays on this side.
    pub async fn launch(
        &self,
        kind: BrowserKind,
        options: ScriptLaunchOptions,
    ) -> Result<u32, AutomationError> {
        let mut args = options.args;
        if kind == BrowserKind::Chromium && !args.iter().any(|a| a == CHROMIUM_NO_SANDBOX) {
            args.push(CHROMIUM_NO_SANDBOX.to_string());
        }

        let launch = LaunchOptions {
            headless: options.headless.unwrap_or(true),
            args,
            proxy: self.proxy.clone(),
        };

        let handle = self.engine.launch(kind, launch).await?;
        let id = self.next_browser.fetch_add(1, Ordering::Relaxed);
        self.browsers.lock().await.insert(id, handle.clone());

        info!(run_id = %self.run, browser = %kind, id, "launched browser");
        self.spawn_watchdog(kind, handle);
        Ok(id)
    }

    /// Independent liveness timer per launch: a run can finish with the
    /// browser still open, so cleanup cannot hang off the engine deadline.
    fn spawn_watchdog(&self, kind: BrowserKind, handle: Arc<dyn BrowserHandle>) {
        let window = self.liveness;
        let run = self.run;
        self.host.spawn(async move {
            tokio::time::sleep(window).await;
            if handle.is_connected().await {
                warn!(run_id = %run, browser = %kind, "browser was not closed by the sandboxed code, force-closing");
                if let Err(e) = handle.close().await {
                    warn!(run_id = %run, error = %e, "watchdog could not close browser");
                }
            }
        });
    }

    async fn browser(&self, id: u32) -> Result<Arc<dyn BrowserHandle>, AutomationError> {
        self.browsers
            .lock()
            .await
            .get(&id)
            .cloned()
            .ok_or(AutomationError::UnknownBrowser(id))
    }

    pub async fn new_page(&self, browser: u32) -> Result<PageId, AutomationError> {
        self.browser(browser).await?.new_page().await
    }

    pub async fn page_action(
        &self,
        browser: u32,
        page: PageId,
        action: PageAction,
    ) -> Result<serde_json::Value, AutomationError> {
        self.browser(browser).await?.page_action(page, action).await
    }

    /// Screenshot with the reference semantics: without a target path the
    /// call is a no-op, with one the bytes land at a bridge-chosen location.
    pub async fn screenshot(
        &self,
        browser: u32,
        page: PageId,
        path: Option<String>,
        options: ScreenshotOptions,
    ) -> Result<(), SandboxError> {
        let Some(path) = path else {
            return Ok(());
        };
        let bytes = self.browser(browser).await?.screenshot(page, options).await?;
        self.bridge.capture(&path, &bytes).await?;
        Ok(())
    }

    pub async fn pdf(
        &self,
        browser: u32,
        page: PageId,
        path: Option<String>,
    ) -> Result<(), SandboxError> {
        let Some(path) = path else {
            return Ok(());
        };
        let bytes = self.browser(browser).await?.pdf(page).await?;
        self.bridge.capture(&path, &bytes).await?;
        Ok(())
    }

    pub async fn start_video(&self, browser: u32, page: PageId) -> Result<(), AutomationError> {
        self.browser(browser).await?.start_video(page).await
    }

    pub async fn stop_video(
        &self,
        browser: u32,
        page: PageId,
        path: &str,
    ) -> Result<(), SandboxError> {
        let bytes = self.browser(browser).await?.stop_video(page).await?;
        self.bridge.capture(path, &bytes).await?;
        Ok(())
    }

    pub async fn is_connected(&self, browser: u32) -> bool {
        match self.browser(browser).await {
            Ok(handle) => handle.is_connected().await,
            Err(_) => false,
        }
    }

    pub async fn close_browser(&self, browser: u32) -> Result<(), AutomationError> {
        self.browser(browser).await?.close().await
    }

    /// Force-close everything this run launched. Used on timeout and on
    /// failed runs; safe to call more than once.
    pub async fn close_all(&self) {
        let handles: Vec<_> = self.browsers.lock().await.values().cloned().collect();
        for handle in handles {
            if handle.is_connected().await {
                if let Err(e) = handle.close().await {
                    warn!(run_id = %self.run, error = %e, "could not force-close browser");
                }
            }
        }
    }
}
