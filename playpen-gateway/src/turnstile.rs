//! Cloudflare Turnstile verification for run requests

use serde::Deserialize;
use std::time::Duration;
use tracing::warn;
use url::Url;

const SITEVERIFY_URL: &str = "https://challenges.cloudflare.com/turnstile/v0/siteverify";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct TurnstileResponse {
    success: bool,
    #[serde(default, rename = "error-codes")]
    error_codes: Vec<String>,
}

pub struct TurnstileVerifier {
    client: reqwest::Client,
    endpoint: Url,
    secret: String,
}

impl TurnstileVerifier {
    pub fn new(secret: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(REQUEST_TIMEOUT)
                .build()
                .expect("reqwest client"),
            endpoint: Url::parse(SITEVERIFY_URL).expect("siteverify url"),
            secret,
        }
    }

    /// Point verification at a different endpoint (self-hosted mock or
    /// test double).
    pub fn with_endpoint(mut self, endpoint: Url) -> Self {
        self.endpoint = endpoint;
        self
    }

    /// Verify one request token. Fails closed: a missing token, a rejected
    /// token, or an unreachable verification endpoint all deny the request.
    pub async fn verify(&self, token: Option<&str>, remote_ip: Option<&str>) -> bool {
        let Some(token) = token.filter(|t| !t.is_empty()) else {
            return false;
        };

        let body = serde_json::json!({
            "secret": self.secret,
            "response": token,
            "remoteip": remote_ip.unwrap_or_default(),
        });

        let resp = match self
            .client
            .post(self.endpoint.clone())
            .json(&body)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(err) => {
                warn!(error = %err, "turnstile verification request failed");
                return false;
            }
        };

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "turnstile verification returned non-success");
            return false;
        }

        match resp.json::<TurnstileResponse>().await {
            Ok(parsed) => {
                if !parsed.success {
                    warn!(errors = ?parsed.error_codes, "turnstile token rejected");
                }
                parsed.success
            }
            Err(err) => {
                warn!(error = %err, "could not parse turnstile response");
                false
            }
        }
    }
}
