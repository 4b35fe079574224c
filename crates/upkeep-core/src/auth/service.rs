use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use super::backend::AuthBackend;
use super::manager::TokenManager;
use super::tokens::{Credentials, UserProfile};
use crate::error::AuthError;
use crate::session::{ExpiryReason, SignOutHandler};
use crate::store::{CredentialStore, SAVED_EMAIL_KEY, SAVED_PASSWORD_KEY};

/// Sign-in and sign-out on top of the token layer.
pub struct AuthService {
    backend: Arc<dyn AuthBackend>,
    tokens: Arc<TokenManager>,
    store: Arc<dyn CredentialStore>,
}

impl AuthService {
    pub fn new(
        backend: Arc<dyn AuthBackend>,
        tokens: Arc<TokenManager>,
        store: Arc<dyn CredentialStore>,
    ) -> Self {
        Self {
            backend,
            tokens,
            store,
        }
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Sign in, optionally remembering the credentials in the keychain.
    ///
    /// A failure to remember credentials does not fail the sign-in.
    pub async fn sign_in(
        &self,
        email: &str,
        password: &str,
        remember: bool,
    ) -> Result<UserProfile, AuthError> {
        let credentials = Credentials::new(email, password);
        let session = self.backend.sign_in(&credentials).await?;

        if remember {
            if let Err(e) = self.save_credentials(&credentials) {
                warn!(err = %e, "Failed to remember credentials");
            }
        }
        info!(user_id = %session.user.id, "Signed in");
        Ok(session.user)
    }

    /// Sign in with credentials remembered by a previous `sign_in`.
    pub async fn sign_in_with_saved(&self) -> Result<UserProfile, AuthError> {
        let email = self.store.get(SAVED_EMAIL_KEY)?;
        let password = self.store.get(SAVED_PASSWORD_KEY)?;
        match (email, password) {
            (Some(email), Some(password)) => self.sign_in(&email, &password, false).await,
            _ => Err(AuthError::NoSavedCredentials),
        }
    }

    pub fn saved_email(&self) -> Option<String> {
        self.store.get(SAVED_EMAIL_KEY).unwrap_or_else(|e| {
            warn!(err = %e, "Failed to read saved email");
            None
        })
    }

    pub fn has_saved_credentials(&self) -> bool {
        matches!(self.store.get(SAVED_PASSWORD_KEY), Ok(Some(_)))
    }

    pub fn forget_saved_credentials(&self) {
        for key in [SAVED_EMAIL_KEY, SAVED_PASSWORD_KEY] {
            if let Err(e) = self.store.delete(key) {
                warn!(key, err = %e, "Failed to delete saved credential");
            }
        }
    }

    /// Best-effort sign-out; never fails.
    pub async fn sign_out(&self) {
        self.tokens.clear_tokens().await;
        info!("Signed out");
    }

    fn save_credentials(&self, credentials: &Credentials) -> Result<(), AuthError> {
        self.store.set(SAVED_EMAIL_KEY, &credentials.email)?;
        self.store.set(SAVED_PASSWORD_KEY, &credentials.password)?;
        Ok(())
    }
}

#[async_trait]
impl SignOutHandler for AuthService {
    async fn sign_out(&self, reason: ExpiryReason) {
        info!(?reason, "Session expired, signing out");
        AuthService::sign_out(self).await;
    }
}
