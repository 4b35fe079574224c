//! In-process fakes shared by the unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use crate::auth::{AuthBackend, AuthSession, Credentials, TokenSet, UserProfile};
use crate::error::{AuthError, StoreError};
use crate::network::{ConnectivitySource, NetworkStatus};
use crate::session::{Clock, ExpiryReason, SessionEvent, SignOutHandler};
use crate::store::CredentialStore;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport, TransportError};

/// Auth backend that counts calls and can be told to fail.
///
/// Like the REST backend, a refresh whose session was replaced or signed
/// out while it was in flight is discarded.
#[derive(Default)]
pub struct FakeAuthBackend {
    session: Mutex<Option<TokenSet>>,
    epoch: AtomicU64,
    refresh_delay: Mutex<Option<Duration>>,
    sign_out_delay: Mutex<Option<Duration>>,
    fail_refresh: AtomicBool,
    fail_sign_out: AtomicBool,
    fail_get_session: AtomicBool,
    refresh_calls: AtomicUsize,
    sign_in_calls: AtomicUsize,
    sign_out_calls: AtomicUsize,
}

impl FakeAuthBackend {
    pub const WRONG_PASSWORD: &'static str = "wrong-password";

    pub fn new(session: Option<TokenSet>) -> Self {
        Self {
            session: Mutex::new(session),
            ..Self::default()
        }
    }

    pub fn fresh_tokens() -> TokenSet {
        TokenSet::new("access-fresh", "refresh-fresh", Utc::now().timestamp() + 3600)
    }

    pub fn expired_tokens() -> TokenSet {
        TokenSet::new("access-expired", "refresh-expired", 1_000)
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        *self.refresh_delay.lock().unwrap() = Some(delay);
    }

    pub fn set_sign_out_delay(&self, delay: Duration) {
        *self.sign_out_delay.lock().unwrap() = Some(delay);
    }

    pub fn fail_refresh(&self, fail: bool) {
        self.fail_refresh.store(fail, Ordering::SeqCst);
    }

    pub fn fail_sign_out(&self, fail: bool) {
        self.fail_sign_out.store(fail, Ordering::SeqCst);
    }

    pub fn fail_get_session(&self, fail: bool) {
        self.fail_get_session.store(fail, Ordering::SeqCst);
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn sign_in_calls(&self) -> usize {
        self.sign_in_calls.load(Ordering::SeqCst)
    }

    pub fn sign_out_calls(&self) -> usize {
        self.sign_out_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthBackend for FakeAuthBackend {
    async fn sign_in(&self, credentials: &Credentials) -> Result<AuthSession, AuthError> {
        self.sign_in_calls.fetch_add(1, Ordering::SeqCst);
        if credentials.password == Self::WRONG_PASSWORD {
            return Err(AuthError::InvalidCredentials);
        }
        let tokens = Self::fresh_tokens();
        let mut session = self.session.lock().unwrap();
        self.epoch.fetch_add(1, Ordering::SeqCst);
        *session = Some(tokens.clone());
        Ok(AuthSession {
            tokens,
            user: UserProfile {
                id: "user-1".to_string(),
                email: Some(credentials.email.clone()),
            },
        })
    }

    async fn refresh_session(&self) -> Result<TokenSet, AuthError> {
        let n = self.refresh_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let epoch = {
            let session = self.session.lock().unwrap();
            if session.is_none() {
                return Err(AuthError::NoSession);
            }
            self.epoch.load(Ordering::SeqCst)
        };
        let delay = *self.refresh_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_refresh.load(Ordering::SeqCst) {
            return Err(AuthError::Rejected {
                status: 400,
                message: "refresh token revoked".to_string(),
            });
        }
        let tokens = TokenSet::new(
            format!("access-refreshed-{n}"),
            format!("refresh-refreshed-{n}"),
            Utc::now().timestamp() + 3600,
        );
        let mut session = self.session.lock().unwrap();
        if self.epoch.load(Ordering::SeqCst) != epoch {
            return Err(AuthError::NoSession);
        }
        *session = Some(tokens.clone());
        Ok(tokens)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_out_calls.fetch_add(1, Ordering::SeqCst);
        {
            let mut session = self.session.lock().unwrap();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            session.take();
        }
        let delay = *self.sign_out_delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_sign_out.load(Ordering::SeqCst) {
            return Err(AuthError::Rejected {
                status: 503,
                message: "unavailable".to_string(),
            });
        }
        Ok(())
    }

    async fn get_session(&self) -> Result<Option<TokenSet>, AuthError> {
        if self.fail_get_session.load(Ordering::SeqCst) {
            return Err(AuthError::InvalidResponse("corrupt session".to_string()));
        }
        Ok(self.session.lock().unwrap().clone())
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

impl CredentialStore for FailingStore {
    fn get(&self, _key: &str) -> Result<Option<String>, StoreError> {
        Err(StoreError::Unavailable("locked".to_string()))
    }

    fn set(&self, _key: &str, _value: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("locked".to_string()))
    }

    fn delete(&self, _key: &str) -> Result<(), StoreError> {
        Err(StoreError::Unavailable("locked".to_string()))
    }
}

enum Step {
    Respond(HttpResponse),
    Fail(String),
    Delayed(Duration, HttpResponse),
}

/// Transport that replays queued outcomes in order and records requests.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    fallback_error: Mutex<Option<String>>,
    requests: Mutex<Vec<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_response(&self, response: HttpResponse) {
        self.script.lock().unwrap().push_back(Step::Respond(response));
    }

    pub fn push_transport_error(&self, message: &str) {
        self.script
            .lock()
            .unwrap()
            .push_back(Step::Fail(message.to_string()));
    }

    pub fn push_delayed(&self, delay: Duration, response: HttpResponse) {
        self.script
            .lock()
            .unwrap()
            .push_back(Step::Delayed(delay, response));
    }

    /// Once the script runs out, fail with `"{message} #{call}"`.
    pub fn fail_every_call(&self, message: &str) {
        *self.fallback_error.lock().unwrap() = Some(message.to_string());
    }

    pub fn requests(&self) -> Vec<HttpRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }
}

#[async_trait]
impl HttpTransport for ScriptedTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        let call = {
            let mut requests = self.requests.lock().unwrap();
            requests.push(request);
            requests.len()
        };
        let step = self.script.lock().unwrap().pop_front();
        match step {
            Some(Step::Respond(response)) => Ok(response),
            Some(Step::Fail(message)) => Err(TransportError(message)),
            Some(Step::Delayed(delay, response)) => {
                tokio::time::sleep(delay).await;
                Ok(response)
            }
            None => {
                let fallback = self.fallback_error.lock().unwrap().clone();
                match fallback {
                    Some(message) => Err(TransportError(format!("{message} #{call}"))),
                    None => Err(TransportError("no scripted response".to_string())),
                }
            }
        }
    }
}

pub struct StaticConnectivity {
    status: Mutex<NetworkStatus>,
}

impl StaticConnectivity {
    pub fn new(status: NetworkStatus) -> Self {
        Self {
            status: Mutex::new(status),
        }
    }

    pub fn set(&self, status: NetworkStatus) {
        *self.status.lock().unwrap() = status;
    }
}

#[async_trait]
impl ConnectivitySource for StaticConnectivity {
    async fn check(&self) -> NetworkStatus {
        self.status.lock().unwrap().clone()
    }
}

/// Wall clock that only moves when told to.
pub struct ManualClock {
    now_ms: AtomicI64,
}

impl ManualClock {
    pub fn new(start_ms: i64) -> Self {
        Self {
            now_ms: AtomicI64::new(start_ms),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now_ms.fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

/// Collects session events for assertions.
#[derive(Clone, Default)]
pub struct EventLog {
    events: Arc<Mutex<Vec<SessionEvent>>>,
}

impl EventLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn recorder(&self) -> impl Fn(&SessionEvent) + Send + Sync + 'static {
        let events = self.events.clone();
        move |event| events.lock().unwrap().push(event.clone())
    }

    pub fn all(&self) -> Vec<SessionEvent> {
        self.events.lock().unwrap().clone()
    }

    pub fn count(&self, name: &str) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|event| event.name() == name)
            .count()
    }

    pub fn len(&self) -> usize {
        self.events.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Default)]
pub struct RecordingSignOut {
    reasons: Mutex<Vec<ExpiryReason>>,
}

impl RecordingSignOut {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.reasons.lock().unwrap().len()
    }

    pub fn reasons(&self) -> Vec<ExpiryReason> {
        self.reasons.lock().unwrap().clone()
    }
}

#[async_trait]
impl SignOutHandler for RecordingSignOut {
    async fn sign_out(&self, reason: ExpiryReason) {
        self.reasons.lock().unwrap().push(reason);
    }
}
