//! HTTP bridge to the browser sidecar.
//!
//! The deployment runs real browsers behind a small bridge server inside the
//! sandbox container; this module drives it over localhost HTTP. File bytes
//! (screenshots, PDFs, video) travel base64-encoded in JSON.

use async_trait::async_trait;
use base64::Engine as _;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use url::Url;

use super::{
    AutomationEngine, BrowserHandle, BrowserKind, LaunchOptions, PageAction, PageId,
    ScreenshotOptions,
};
use crate::error::AutomationError;

/// Number of health-check retries before giving up.
const HEALTH_CHECK_RETRIES: u32 = 5;

/// Delay between health-check attempts.
const HEALTH_CHECK_DELAY: Duration = Duration::from_secs(2);

/// HTTP timeout for bridge requests. Generous: page navigation against slow
/// sites legitimately takes a while.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(45);

#[derive(Debug, Deserialize)]
struct VersionPayload {
    version: String,
}

#[derive(Debug, Deserialize)]
struct LaunchPayload {
    browser_id: u32,
}

#[derive(Debug, Deserialize)]
struct PagePayload {
    page_id: u32,
}

#[derive(Debug, Deserialize)]
struct ActionPayload {
    #[serde(default)]
    result: serde_json::Value,
}

#[derive(Debug, Deserialize)]
struct BytesPayload {
    data: String,
}

#[derive(Debug, Deserialize)]
struct ConnectedPayload {
    connected: bool,
}

/// Automation engine backed by the browser bridge sidecar
pub struct BridgeEngine {
    client: reqwest::Client,
    base_url: Url,
    version: String,
}

impl BridgeEngine {
    /// Connect to the bridge, verifying its health endpoint and probing the
    /// automation-library version it ships.
    pub async fn connect(base_url: Url) -> Result<Self, AutomationError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(|e| AutomationError::Bridge(format!("could not build client: {e}")))?;

        health_check(&client, &base_url).await?;

        let version: VersionPayload = get_json(&client, join(&base_url, "version")?).await?;
        info!(version = %version.version, "connected to automation bridge");

        Ok(Self {
            client,
            base_url,
            version: version.version,
        })
    }

    fn url(&self, path: &str) -> Result<Url, AutomationError> {
        join(&self.base_url, path)
    }
}

#[async_trait]
impl AutomationEngine for BridgeEngine {
    fn version(&self) -> String {
        self.version.clone()
    }

    async fn launch(
        &self,
        kind: BrowserKind,
        options: LaunchOptions,
    ) -> Result<Arc<dyn BrowserHandle>, AutomationError> {
        let payload: LaunchPayload = post_json(
            &self.client,
            self.url("launch")?,
            &serde_json::json!({
                "browser": kind.as_str(),
                "headless": options.headless,
                "args": options.args,
                "proxy": options.proxy,
            }),
        )
        .await?;

        Ok(Arc::new(BridgeBrowser {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            browser_id: payload.browser_id,
        }))
    }
}

/// One launched browser on the bridge side
struct BridgeBrowser {
    client: reqwest::Client,
    base_url: Url,
    browser_id: u32,
}

impl BridgeBrowser {
    fn url(&self, suffix: &str) -> Result<Url, AutomationError> {
        join(&self.base_url, &format!("browser/{}/{suffix}", self.browser_id))
    }

    async fn fetch_bytes(
        &self,
        suffix: &str,
        body: &serde_json::Value,
    ) -> Result<Vec<u8>, AutomationError> {
        let payload: BytesPayload = post_json(&self.client, self.url(suffix)?, body).await?;
        base64::engine::general_purpose::STANDARD
            .decode(payload.data)
            .map_err(|e| AutomationError::Payload(format!("invalid base64 file data: {e}")))
    }
}

#[async_trait]
impl BrowserHandle for BridgeBrowser {
    async fn new_page(&self) -> Result<PageId, AutomationError> {
        let payload: PagePayload =
            post_json(&self.client, self.url("page")?, &serde_json::json!({})).await?;
        Ok(payload.page_id)
    }

    async fn page_action(
        &self,
        page: PageId,
        action: PageAction,
    ) -> Result<serde_json::Value, AutomationError> {
        let payload: ActionPayload = post_json(
            &self.client,
            self.url(&format!("page/{page}/action"))?,
            &serde_json::to_value(&action)
                .map_err(|e| AutomationError::Payload(e.to_string()))?,
        )
        .await?;
        Ok(payload.result)
    }

    async fn screenshot(
        &self,
        page: PageId,
        options: ScreenshotOptions,
    ) -> Result<Vec<u8>, AutomationError> {
        self.fetch_bytes(
            &format!("page/{page}/screenshot"),
            &serde_json::json!({ "full_page": options.full_page }),
        )
        .await
    }

    async fn pdf(&self, page: PageId) -> Result<Vec<u8>, AutomationError> {
        self.fetch_bytes(&format!("page/{page}/pdf"), &serde_json::json!({}))
            .await
    }

    async fn start_video(&self, page: PageId) -> Result<(), AutomationError> {
        let _: ActionPayload = post_json(
            &self.client,
            self.url(&format!("page/{page}/video/start"))?,
            &serde_json::json!({}),
        )
        .await?;
        Ok(())
    }

    async fn stop_video(&self, page: PageId) -> Result<Vec<u8>, AutomationError> {
        self.fetch_bytes(&format!("page/{page}/video/stop"), &serde_json::json!({}))
            .await
    }

    async fn is_connected(&self) -> bool {
        let url = match self.url("connected") {
            Ok(url) => url,
            Err(_) => return false,
        };
        match get_json::<ConnectedPayload>(&self.client, url).await {
            Ok(payload) => payload.connected,
            Err(_) => false,
        }
    }

    async fn close(&self) -> Result<(), AutomationError> {
        let url = self.url("")?;
        let resp = self
            .client
            .delete(url)
            .send()
            .await
            .map_err(|e| AutomationError::Bridge(format!("close failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(AutomationError::Bridge(format!(
                "close returned status {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

fn join(base: &Url, path: &str) -> Result<Url, AutomationError> {
    base.join(path)
        .map_err(|e| AutomationError::Bridge(format!("invalid bridge url: {e}")))
}

async fn get_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: Url,
) -> Result<T, AutomationError> {
    let resp = client
        .get(url)
        .send()
        .await
        .map_err(|e| AutomationError::Bridge(e.to_string()))?;
    decode_response(resp).await
}

async fn post_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: Url,
    body: &serde_json::Value,
) -> Result<T, AutomationError> {
    let resp = client
        .post(url)
        .json(body)
        .send()
        .await
        .map_err(|e| AutomationError::Bridge(e.to_string()))?;
    decode_response(resp).await
}

async fn decode_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, AutomationError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(AutomationError::Bridge(format!(
            "bridge returned status {status}: {body}"
        )));
    }
    resp.json::<T>()
        .await
        .map_err(|e| AutomationError::Payload(e.to_string()))
}

/// Verify the bridge is responding by polling its health endpoint.
async fn health_check(client: &reqwest::Client, base_url: &Url) -> Result<(), AutomationError> {
    let url = join(base_url, "health")?;

    for attempt in 1..=HEALTH_CHECK_RETRIES {
        if attempt > 1 {
            tokio::time::sleep(HEALTH_CHECK_DELAY).await;
        }

        match client.get(url.clone()).send().await {
            Ok(resp) if resp.status().is_success() => {
                info!(attempt, "automation bridge health check passed");
                return Ok(());
            }
            Ok(resp) => {
                warn!(
                    attempt,
                    status = %resp.status(),
                    "automation bridge health check returned non-success"
                );
            }
            Err(e) => {
                warn!(attempt, error = %e, "automation bridge health check failed");
            }
        }
    }

    Err(AutomationError::Bridge(format!(
        "bridge health check failed after {HEALTH_CHECK_RETRIES} retries"
    )))
}
