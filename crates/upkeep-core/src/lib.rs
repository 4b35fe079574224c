//! Upkeep core - the resilience layer between the maintenance app and its
//! hosted backend.
//!
//! Token refresh with single-flight de-duplication, a retrying request
//! client, connectivity tracking, and an inactivity/background session
//! lifecycle. Platform concerns (credential storage, connectivity probing,
//! HTTP) sit behind traits so they can be swapped out in tests.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod listeners;
pub mod network;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
mod testing;

pub use auth::{AuthBackend, AuthService, RestAuthBackend, TokenManager, TokenSet};
pub use client::{ApiResponse, RequestClient, RequestOptions};
pub use config::ClientConfig;
pub use error::{AuthError, ConfigError, RequestError, StoreError};
pub use listeners::Subscription;
pub use network::{ConnectivitySource, HealthCheckSource, NetworkObserver, NetworkStatus};
pub use session::{
    AppState, ExpiryReason, SessionConfig, SessionConfigUpdate, SessionEvent,
    SessionLifecycleManager, SignOutHandler,
};
pub use store::{CredentialStore, FileStore, KeyringStore, MemoryStore};
pub use transport::{HttpTransport, ReqwestTransport};
