//! Auth backend contract and its REST implementation.
//!
//! The hosted backend exposes a GoTrue-style auth API under `/auth/v1`:
//! password and refresh-token grants on `/token`, session revocation on
//! `/logout`. The current session is kept in memory and mirrored into the
//! credential store so it survives restarts.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{header, Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, warn};

use super::tokens::{AuthSession, Credentials, TokenSet, UserProfile};
use crate::config::ClientConfig;
use crate::error::AuthError;
use crate::store::{CredentialStore, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY, SESSION_KEY};

/// Path of the auth API below the backend base URL
const AUTH_PATH: &str = "/auth/v1";

/// Header carrying the project API key
const API_KEY_HEADER: &str = "apikey";

#[async_trait]
pub trait AuthBackend: Send + Sync {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, AuthError>;

    /// Exchange the current refresh token for a new pair. The stored session
    /// is only replaced on success.
    async fn refresh_session(&self) -> Result<TokenSet, AuthError>;

    /// Drop the local session and revoke it remotely. The local session is
    /// gone even when this returns `Err`.
    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn get_session(&self) -> Result<Option<TokenSet>, AuthError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    user: Option<UserProfile>,
}

impl TokenResponse {
    /// Normalize to absolute expiry; some responses only carry `expires_in`.
    fn into_parts(self, now: i64) -> Result<(TokenSet, Option<UserProfile>), AuthError> {
        let expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now + secs))
            .ok_or_else(|| AuthError::InvalidResponse("missing token expiry".to_string()))?;
        let tokens = TokenSet {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            token_type: self.token_type.unwrap_or_else(|| "bearer".to_string()),
        };
        Ok((tokens, self.user))
    }
}

#[derive(Debug)]
enum SessionSlot {
    Unloaded,
    Loaded(Option<TokenSet>),
}

/// The session slot plus a counter bumped on every sign-in and sign-out.
/// A refresh only commits if the epoch it started under is still current.
#[derive(Debug)]
struct SessionCell {
    slot: SessionSlot,
    epoch: u64,
}

pub struct RestAuthBackend {
    http: Client,
    auth_url: String,
    api_key: Option<String>,
    store: Arc<dyn CredentialStore>,
    session: Mutex<SessionCell>,
}

impl RestAuthBackend {
    pub fn new(config: &ClientConfig, store: Arc<dyn CredentialStore>) -> Result<Self, AuthError> {
        let http = Client::builder().timeout(config.request_timeout()).build()?;
        Ok(Self {
            http,
            auth_url: format!("{}{}", config.base_url(), AUTH_PATH),
            api_key: config.api_key.clone(),
            store,
            session: Mutex::new(SessionCell {
                slot: SessionSlot::Unloaded,
                epoch: 0,
            }),
        })
    }

    fn with_api_key(&self, request: RequestBuilder) -> RequestBuilder {
        match self.api_key {
            Some(ref key) => request.header(API_KEY_HEADER, key),
            None => request,
        }
    }

    fn cell(&self) -> MutexGuard<'_, SessionCell> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current session, restoring it from the store on first access.
    fn current(&self) -> Result<Option<TokenSet>, AuthError> {
        self.load(&mut self.cell())
    }

    fn load(&self, cell: &mut SessionCell) -> Result<Option<TokenSet>, AuthError> {
        if let SessionSlot::Loaded(ref tokens) = cell.slot {
            return Ok(tokens.clone());
        }
        let restored = match self.store.get(SESSION_KEY)? {
            Some(json) => match serde_json::from_str::<TokenSet>(&json) {
                Ok(tokens) => Some(tokens),
                Err(e) => {
                    warn!(err = %e, "Discarding unreadable stored session");
                    None
                }
            },
            None => None,
        };
        debug!(restored = restored.is_some(), "Session loaded from store");
        cell.slot = SessionSlot::Loaded(restored.clone());
        Ok(restored)
    }

    /// Install a brand-new session, invalidating any refresh in flight.
    fn replace_session(&self, tokens: &TokenSet) {
        let mut cell = self.cell();
        cell.epoch += 1;
        cell.slot = SessionSlot::Loaded(Some(tokens.clone()));
        self.persist(tokens);
    }

    /// Install refreshed tokens unless the session was signed out or
    /// replaced since `epoch` was read.
    fn commit_refresh(&self, epoch: u64, tokens: &TokenSet) -> Result<(), AuthError> {
        let mut cell = self.cell();
        if cell.epoch != epoch {
            debug!(
                started = epoch,
                current = cell.epoch,
                "Discarding refresh for a session that has since ended"
            );
            return Err(AuthError::NoSession);
        }
        cell.slot = SessionSlot::Loaded(Some(tokens.clone()));
        self.persist(tokens);
        Ok(())
    }

    /// Drop the in-memory session and return what it held.
    fn end_session(&self) -> Option<TokenSet> {
        let mut cell = self.cell();
        let previous = self.load(&mut cell).unwrap_or_else(|e| {
            warn!(err = %e, "Could not read session before sign-out");
            None
        });
        cell.epoch += 1;
        cell.slot = SessionSlot::Loaded(None);
        previous
    }

    /// Mirror the session into the store. Failures leave the in-memory
    /// session in place.
    fn persist(&self, tokens: &TokenSet) {
        let json = match serde_json::to_string(tokens) {
            Ok(json) => json,
            Err(e) => {
                warn!(err = %e, "Failed to serialize session");
                return;
            }
        };
        for (key, value) in [
            (SESSION_KEY, json.as_str()),
            (ACCESS_TOKEN_KEY, tokens.access_token.as_str()),
            (REFRESH_TOKEN_KEY, tokens.refresh_token.as_str()),
        ] {
            if let Err(e) = self.store.set(key, value) {
                warn!(key, err = %e, "Failed to persist session");
            }
        }
    }

    async fn token_grant(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<reqwest::Response, AuthError> {
        let url = format!("{}/token", self.auth_url);
        let response = self
            .with_api_key(self.http.post(&url))
            .query(&[("grant_type", grant_type)])
            .header(header::ACCEPT, "application/json")
            .json(&body)
            .send()
            .await?;
        Ok(response)
    }

    async fn rejection(response: reqwest::Response) -> AuthError {
        let status = response.status().as_u16();
        let message = response.text().await.unwrap_or_default();
        AuthError::Rejected { status, message }
    }
}

#[async_trait]
impl AuthBackend for RestAuthBackend {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, AuthError> {
        let body = serde_json::json!({
            "email": credentials.email,
            "password": credentials.password,
        });
        let response = self.token_grant("password", body).await?;
        match response.status().as_u16() {
            200..=299 => {}
            400 | 401 => return Err(AuthError::InvalidCredentials),
            _ => return Err(Self::rejection(response).await),
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let (tokens, user) = parsed.into_parts(Utc::now().timestamp())?;
        let user = user.ok_or_else(|| AuthError::InvalidResponse("missing user".to_string()))?;

        self.replace_session(&tokens);
        debug!(user_id = %user.id, "Signed in");
        Ok(AuthSession { tokens, user })
    }

    async fn refresh_session(&self) -> Result<TokenSet, AuthError> {
        let (current, epoch) = {
            let mut cell = self.cell();
            let current = self.load(&mut cell)?.ok_or(AuthError::NoSession)?;
            (current, cell.epoch)
        };
        let body = serde_json::json!({ "refresh_token": current.refresh_token });
        let response = self.token_grant("refresh_token", body).await?;
        if !response.status().is_success() {
            return Err(Self::rejection(response).await);
        }

        let parsed: TokenResponse = response
            .json()
            .await
            .map_err(|e| AuthError::InvalidResponse(e.to_string()))?;
        let (tokens, _) = parsed.into_parts(Utc::now().timestamp())?;
        self.commit_refresh(epoch, &tokens)?;
        Ok(tokens)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        let Some(tokens) = self.end_session() else {
            return Ok(());
        };
        let url = format!("{}/logout", self.auth_url);
        let response = self
            .with_api_key(self.http.post(&url))
            .bearer_auth(&tokens.access_token)
            .send()
            .await?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(Self::rejection(response).await)
        }
    }

    async fn get_session(&self) -> Result<Option<TokenSet>, AuthError> {
        self.current()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn backend_with(store: Arc<MemoryStore>) -> RestAuthBackend {
        RestAuthBackend::new(&ClientConfig::default(), store).expect("client should build")
    }

    #[test]
    fn test_token_response_expires_in_normalized() {
        let parsed: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","token_type":"bearer","expires_in":3600,
                "user":{"id":"u-1","email":"tech@example.com"}}"#,
        )
        .expect("token response should parse");
        let (tokens, user) = parsed.into_parts(1_000).expect("expiry present");
        assert_eq!(tokens.expires_at, 4_600);
        assert_eq!(user.map(|u| u.id).as_deref(), Some("u-1"));
    }

    #[test]
    fn test_token_response_prefers_absolute_expiry() {
        let parsed: TokenResponse = serde_json::from_str(
            r#"{"access_token":"a","refresh_token":"r","expires_in":3600,"expires_at":9999}"#,
        )
        .expect("token response should parse");
        let (tokens, _) = parsed.into_parts(1_000).expect("expiry present");
        assert_eq!(tokens.expires_at, 9_999);
    }

    #[test]
    fn test_token_response_without_expiry_rejected() {
        let parsed: TokenResponse =
            serde_json::from_str(r#"{"access_token":"a","refresh_token":"r"}"#)
                .expect("token response should parse");
        assert!(matches!(parsed.into_parts(0), Err(AuthError::InvalidResponse(_))));
    }

    #[tokio::test]
    async fn test_session_restored_from_store() {
        let store = Arc::new(MemoryStore::new());
        let tokens = TokenSet::new("access", "refresh", 42);
        store
            .set(SESSION_KEY, &serde_json::to_string(&tokens).unwrap())
            .unwrap();

        let backend = backend_with(store);
        assert_eq!(backend.get_session().await.unwrap(), Some(tokens));
    }

    #[tokio::test]
    async fn test_unreadable_stored_session_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        store.set(SESSION_KEY, "garbage").unwrap();
        let backend = backend_with(store);
        assert_eq!(backend.get_session().await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_sign_out_without_session_is_local_only() {
        let backend = backend_with(Arc::new(MemoryStore::new()));
        assert!(backend.sign_out().await.is_ok());
        assert_eq!(backend.get_session().await.unwrap(), None);
    }

    #[test]
    fn test_replace_session_mirrors_into_store() {
        let store = Arc::new(MemoryStore::new());
        let backend = backend_with(store.clone());
        backend.replace_session(&TokenSet::new("access", "refresh", 42));
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("access"));
        assert_eq!(store.get(REFRESH_TOKEN_KEY).unwrap().as_deref(), Some("refresh"));
        assert!(store.get(SESSION_KEY).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_refresh_after_sign_out_is_discarded() {
        let store = Arc::new(MemoryStore::new());
        let backend = backend_with(store.clone());
        backend.replace_session(&TokenSet::new("access", "refresh", 42));
        let started = backend.cell().epoch;

        assert!(backend.end_session().is_some());
        for key in [SESSION_KEY, ACCESS_TOKEN_KEY, REFRESH_TOKEN_KEY] {
            store.delete(key).unwrap();
        }

        let refreshed = TokenSet::new("access-2", "refresh-2", 99);
        assert!(matches!(
            backend.commit_refresh(started, &refreshed),
            Err(AuthError::NoSession)
        ));
        assert_eq!(backend.get_session().await.unwrap(), None);
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap(), None);
        assert_eq!(store.get(SESSION_KEY).unwrap(), None);
    }

    #[test]
    fn test_refresh_commits_under_same_session() {
        let store = Arc::new(MemoryStore::new());
        let backend = backend_with(store.clone());
        backend.replace_session(&TokenSet::new("access", "refresh", 42));
        let started = backend.cell().epoch;

        let refreshed = TokenSet::new("access-2", "refresh-2", 99);
        backend
            .commit_refresh(started, &refreshed)
            .expect("session unchanged");
        assert_eq!(store.get(ACCESS_TOKEN_KEY).unwrap().as_deref(), Some("access-2"));
    }

    #[test]
    fn test_sign_in_invalidates_older_refresh() {
        let backend = backend_with(Arc::new(MemoryStore::new()));
        backend.replace_session(&TokenSet::new("access", "refresh", 42));
        let started = backend.cell().epoch;
        backend.replace_session(&TokenSet::new("access-b", "refresh-b", 77));

        let stale = TokenSet::new("access-2", "refresh-2", 99);
        assert!(backend.commit_refresh(started, &stale).is_err());
        let current = backend.current().unwrap().map(|t| t.access_token);
        assert_eq!(current.as_deref(), Some("access-b"));
    }
}
