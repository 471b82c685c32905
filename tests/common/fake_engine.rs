//! In-memory automation engine double.
//!
//! Behaves like the real surface from the broker's point of view: launches
//! are recorded, browsers stay "connected" until closed, file-producing
//! calls return recognizable magic bytes, and page actions answer with
//! canned values.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use playpen_sandbox::{
    AutomationEngine, AutomationError, BrowserHandle, BrowserKind, LaunchOptions, PageAction,
    ScreenshotOptions,
};

#[derive(Debug, Clone)]
pub struct RecordedLaunch {
    pub kind: BrowserKind,
    pub options: LaunchOptions,
}

pub struct FakeBrowser {
    connected: AtomicBool,
    next_page: AtomicU32,
    pub actions: Mutex<Vec<PageAction>>,
}

impl FakeBrowser {
    fn new() -> Self {
        Self {
            connected: AtomicBool::new(true),
            next_page: AtomicU32::new(1),
            actions: Mutex::new(Vec::new()),
        }
    }

    pub fn connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BrowserHandle for FakeBrowser {
    async fn new_page(&self) -> Result<u32, AutomationError> {
        Ok(self.next_page.fetch_add(1, Ordering::SeqCst))
    }

    async fn page_action(
        &self,
        _page: u32,
        action: PageAction,
    ) -> Result<serde_json::Value, AutomationError> {
        let result = match &action {
            PageAction::Title => serde_json::json!("Example Domain"),
            PageAction::Content => serde_json::json!("<html><body>Example</body></html>"),
            PageAction::Evaluate { expression } => serde_json::json!(format!("eval:{expression}")),
            PageAction::Goto { url, .. } => serde_json::json!({ "url": url }),
            _ => serde_json::Value::Null,
        };
        self.actions.lock().unwrap().push(action);
        Ok(result)
    }

    async fn screenshot(
        &self,
        _page: u32,
        _options: ScreenshotOptions,
    ) -> Result<Vec<u8>, AutomationError> {
        Ok(b"\x89PNG\r\n\x1a\nfake-image".to_vec())
    }

    async fn pdf(&self, _page: u32) -> Result<Vec<u8>, AutomationError> {
        Ok(b"%PDF-1.7 fake-document".to_vec())
    }

    async fn start_video(&self, _page: u32) -> Result<(), AutomationError> {
        Ok(())
    }

    async fn stop_video(&self, _page: u32) -> Result<Vec<u8>, AutomationError> {
        Ok(b"\x1aE\xdf\xa3fake-video".to_vec())
    }

    async fn is_connected(&self) -> bool {
        self.connected()
    }

    async fn close(&self) -> Result<(), AutomationError> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeEngine {
    pub launches: Mutex<Vec<RecordedLaunch>>,
    pub browsers: Mutex<Vec<Arc<FakeBrowser>>>,
}

impl FakeEngine {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn launch_count(&self) -> usize {
        self.launches.lock().unwrap().len()
    }

    pub fn browser(&self, index: usize) -> Arc<FakeBrowser> {
        self.browsers.lock().unwrap()[index].clone()
    }
}

#[async_trait]
impl AutomationEngine for FakeEngine {
    fn version(&self) -> String {
        "1.52.0".to_string()
    }

    async fn launch(
        &self,
        kind: BrowserKind,
        options: LaunchOptions,
    ) -> Result<Arc<dyn BrowserHandle>, AutomationError> {
        self.launches
            .lock()
            .unwrap()
            .push(RecordedLaunch { kind, options });
        let browser = Arc::new(FakeBrowser::new());
        self.browsers.lock().unwrap().push(browser.clone());
        Ok(browser)
    }
}
