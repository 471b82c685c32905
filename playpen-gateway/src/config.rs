//! Environment-driven gateway configuration

use anyhow::{Context, Result};
use std::env;
use std::path::PathBuf;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    /// Directory captured files are served from; must stay disjoint from
    /// source and configuration since its contents are world-readable.
    pub public_dir: PathBuf,
    pub database_url: String,
    pub bridge_url: Url,
    /// When set, captured files are uploaded here instead of being moved
    /// into the local public directory.
    pub file_service_url: Option<Url>,
    /// Outbound proxy all sandboxed page traffic egresses through.
    pub http_proxy: Option<String>,
    /// Cloudflare Turnstile secret; verification is skipped when unset.
    pub turnstile_secret: Option<String>,
    pub workers: usize,
    pub queue_depth: usize,
    pub max_concurrent: usize,
    /// How long locally published files are kept before deletion.
    pub file_retention: Duration,
}

fn var_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.is_empty())
}

impl Config {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let bridge_url = var_or("PLAYPEN_BRIDGE_URL", "http://127.0.0.1:9222/");
        let file_service_url = optional_var("PLAYPEN_FILE_SERVICE_URL")
            .map(|raw| Url::parse(&raw).context("invalid PLAYPEN_FILE_SERVICE_URL"))
            .transpose()?;

        Ok(Self {
            http_port: var_or("PLAYPEN_HTTP_PORT", "8080")
                .parse()
                .context("invalid PLAYPEN_HTTP_PORT")?,
            public_dir: PathBuf::from(var_or("PLAYPEN_PUBLIC_DIR", "public")),
            database_url: var_or("PLAYPEN_DATABASE_URL", "data/shares.sqlite"),
            bridge_url: Url::parse(&bridge_url).context("invalid PLAYPEN_BRIDGE_URL")?,
            file_service_url,
            http_proxy: optional_var("PLAYPEN_HTTP_PROXY"),
            turnstile_secret: optional_var("PLAYPEN_TURNSTILE_SECRET"),
            workers: var_or("PLAYPEN_WORKERS", "2")
                .parse()
                .context("invalid PLAYPEN_WORKERS")?,
            queue_depth: var_or("PLAYPEN_QUEUE_DEPTH", "32")
                .parse()
                .context("invalid PLAYPEN_QUEUE_DEPTH")?,
            max_concurrent: var_or("PLAYPEN_MAX_CONCURRENT", "5")
                .parse()
                .context("invalid PLAYPEN_MAX_CONCURRENT")?,
            file_retention: Duration::from_secs(
                var_or("PLAYPEN_FILE_RETENTION_SECS", "60")
                    .parse()
                    .context("invalid PLAYPEN_FILE_RETENTION_SECS")?,
            ),
        })
    }
}
