//! Playpen gateway server

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;

use playpen_gateway::routes::AppState;
use playpen_gateway::{create_router, Config, ShareStore, TurnstileVerifier, WorkerPool};
use playpen_sandbox::{
    AutomationEngine as _, BridgeEngine, FileStore, HttpFileStore, LocalFileStore, ProxyConfig,
    ResourceLimits, SandboxService,
};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("Starting playpen gateway...");

    let config = Config::from_env()?;
    info!("Configuration loaded");

    let store = ShareStore::connect(&config.database_url)
        .await
        .context("could not open share store")?;
    info!("Share store ready");

    let engine = BridgeEngine::connect(config.bridge_url.clone())
        .await
        .context("could not connect to automation bridge")?;
    info!(version = %engine.version(), "Automation bridge connected");

    let file_store: Arc<dyn FileStore> = match &config.file_service_url {
        Some(url) => Arc::new(
            HttpFileStore::new(url.clone()).context("could not configure file service store")?,
        ),
        None => Arc::new(
            LocalFileStore::new(&config.public_dir, "/public")
                .with_retention(Some(config.file_retention)),
        ),
    };

    let proxy = config
        .http_proxy
        .clone()
        .map(|server| ProxyConfig { server });
    let service = Arc::new(
        SandboxService::with_limits(Arc::new(engine), file_store, ResourceLimits::default())
            .with_proxy(proxy)
            .with_max_concurrent(config.max_concurrent),
    );

    let dispatcher: Arc<dyn playpen_gateway::Dispatcher> = Arc::new(WorkerPool::start(
        service,
        config.workers,
        config.queue_depth,
    ));

    let state = AppState {
        dispatcher,
        store: Arc::new(store),
        turnstile: config
            .turnstile_secret
            .clone()
            .map(|secret| Arc::new(TurnstileVerifier::new(secret))),
    };

    tokio::fs::create_dir_all(&config.public_dir)
        .await
        .context("could not create public directory")?;
    let app = create_router(state, &config.public_dir);

    let bind_addr = format!("0.0.0.0:{}", config.http_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("could not bind {bind_addr}"))?;
    info!("Server started at http://{bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("could not install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("could not install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("received stop signal, shutting down gracefully");
}
