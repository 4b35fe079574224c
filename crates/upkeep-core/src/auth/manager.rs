//! Token lifecycle: expiry checks, de-duplicated refresh, and clearing.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use super::backend::AuthBackend;
use super::tokens::TokenSet;
use crate::store::{CredentialStore, LAST_REFRESH_KEY, TOKEN_KEYS};

/// Default lifetime margin; tokens closer than this to expiry are refreshed.
pub const DEFAULT_EXPIRY_BUFFER: Duration = Duration::from_secs(5 * 60);

type RefreshFuture = Shared<BoxFuture<'static, bool>>;

/// The single refresh allowed in flight at a time.
struct InFlightRefresh {
    id: u64,
    future: RefreshFuture,
}

type RefreshSlot = Arc<Mutex<Option<InFlightRefresh>>>;

/// Owns the token pair held by the auth backend.
///
/// None of the public methods fail: backend and store errors are logged and
/// surface as `None` / `false`.
pub struct TokenManager {
    backend: Arc<dyn AuthBackend>,
    store: Arc<dyn CredentialStore>,
    expiry_buffer: Duration,
    in_flight: RefreshSlot,
    next_refresh_id: AtomicU64,
}

impl TokenManager {
    pub fn new(backend: Arc<dyn AuthBackend>, store: Arc<dyn CredentialStore>) -> Self {
        Self::with_expiry_buffer(backend, store, DEFAULT_EXPIRY_BUFFER)
    }

    pub fn with_expiry_buffer(
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn CredentialStore>,
        expiry_buffer: Duration,
    ) -> Self {
        Self {
            backend,
            store,
            expiry_buffer,
            in_flight: Arc::new(Mutex::new(None)),
            next_refresh_id: AtomicU64::new(0),
        }
    }

    pub fn expiry_buffer(&self) -> Duration {
        self.expiry_buffer
    }

    pub async fn get_tokens(&self) -> Option<TokenSet> {
        match self.backend.get_session().await {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(err = %e, "Failed to read session");
                None
            }
        }
    }

    pub async fn is_token_expired(&self) -> bool {
        match self.get_tokens().await {
            Some(tokens) => tokens.expires_within(self.expiry_buffer),
            None => true,
        }
    }

    /// Seconds of lifetime left on the current access token, if any.
    pub async fn seconds_until_expiry(&self) -> Option<i64> {
        self.get_tokens()
            .await
            .map(|tokens| tokens.seconds_remaining_at(Utc::now().timestamp()))
    }

    /// Refresh the token pair, joining the in-flight refresh if there is one.
    ///
    /// Every caller attached to the same refresh observes the same outcome.
    /// A failed refresh leaves the existing tokens untouched.
    pub async fn refresh_token(&self) -> bool {
        let future = {
            let mut slot = self.in_flight.lock().unwrap_or_else(PoisonError::into_inner);
            let existing = slot
                .as_ref()
                .map(|in_flight| (in_flight.id, in_flight.future.clone()));
            match existing {
                Some((id, future)) => {
                    debug!(refresh_id = id, "Joining in-flight token refresh");
                    future
                }
                None => {
                    let id = self.next_refresh_id.fetch_add(1, Ordering::Relaxed);
                    let future = Self::refresh_once(
                        id,
                        Arc::clone(&self.backend),
                        Arc::clone(&self.store),
                        Arc::clone(&self.in_flight),
                    )
                    .boxed()
                    .shared();
                    *slot = Some(InFlightRefresh {
                        id,
                        future: future.clone(),
                    });
                    future
                }
            }
        };
        future.await
    }

    async fn refresh_once(
        id: u64,
        backend: Arc<dyn AuthBackend>,
        store: Arc<dyn CredentialStore>,
        slot: RefreshSlot,
    ) -> bool {
        debug!(refresh_id = id, "Refreshing token");
        let refreshed = match backend.refresh_session().await {
            Ok(tokens) => {
                info!(refresh_id = id, expires_at = tokens.expires_at, "Token refreshed");
                if let Err(e) = store.set(LAST_REFRESH_KEY, &Utc::now().to_rfc3339()) {
                    warn!(err = %e, "Failed to record refresh time");
                }
                true
            }
            Err(e) => {
                warn!(refresh_id = id, err = %e, "Token refresh failed");
                false
            }
        };

        // Callers arriving from here on start a fresh refresh.
        let mut slot = slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.as_ref().is_some_and(|in_flight| in_flight.id == id) {
            *slot = None;
        }
        refreshed
    }

    /// Primary entry point for request paths: refresh only when needed.
    pub async fn ensure_valid_token(&self) -> bool {
        if !self.is_token_expired().await {
            return true;
        }
        self.refresh_token().await
    }

    /// Revoke the remote session and wipe local token material.
    ///
    /// Local keys are deleted without waiting on the remote revocation, so
    /// a slow or unreachable backend never keeps tokens on disk. Every step
    /// runs regardless of earlier failures.
    pub async fn clear_tokens(&self) {
        let wipe_local = async {
            for key in TOKEN_KEYS {
                if let Err(e) = self.store.delete(key) {
                    warn!(key, err = %e, "Failed to delete stored token");
                }
            }
            debug!("Local tokens deleted");
        };
        let (remote, ()) = futures::join!(self.backend.sign_out(), wipe_local);
        if let Err(e) = remote {
            warn!(err = %e, "Remote sign-out failed, local tokens already cleared");
        }
        info!("Tokens cleared");
    }

    pub fn last_refresh(&self) -> Option<String> {
        self.store.get(LAST_REFRESH_KEY).unwrap_or_else(|e| {
            warn!(err = %e, "Failed to read last refresh time");
            None
        })
    }
}
