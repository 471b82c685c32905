//! Playpen gateway - front door for the sandboxed execution service
//!
//! Accepts run and share requests over HTTP, verifies rate-limit tokens,
//! dispatches code to the execution worker pool, serves captured artifacts,
//! and persists share links.

pub mod config;
pub mod dispatch;
pub mod routes;
pub mod store;
pub mod turnstile;

pub use config::Config;
pub use dispatch::{DispatchError, Dispatcher, WorkerPool};
pub use routes::{create_router, AppState};
pub use store::{ShareStore, StoreError};
pub use turnstile::TurnstileVerifier;
