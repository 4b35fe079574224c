//! Inactivity and background session expiry.
//!
//! Phases:
//!
//! ```text
//! Active --warning timer--> Warned --expiry timer--> Expired
//!   ^  |                      |
//!   |  +------background------+--> Backgrounded --timer or late resume--> Expired
//!   +------activity / timely resume------+
//! ```
//!
//! Every transition cancels the outstanding timers before scheduling new
//! ones, under the same lock. Timer tasks re-check the timer generation under
//! that lock before acting, so a cancelled timer can never fire.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::clock::{Clock, SystemClock};
use super::config::{SessionConfig, SessionConfigUpdate};
use super::events::{AppState, ExpiryReason, SessionEvent};
use super::SignOutHandler;
use crate::error::ConfigError;
use crate::listeners::{ListenerSet, Subscription};
use crate::store::CredentialStore;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Active,
    Warned,
    Backgrounded,
    Paused,
    Expired,
    Destroyed,
}

impl SessionPhase {
    fn is_foreground_tracking(self) -> bool {
        matches!(self, SessionPhase::Active | SessionPhase::Warned)
    }
}

/// Point-in-time view of the session. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    pub last_activity_epoch_ms: i64,
    pub background_entered_epoch_ms: Option<i64>,
    pub is_active: bool,
    pub phase: SessionPhase,
}

struct Machine {
    config: SessionConfig,
    phase: SessionPhase,
    last_activity: Instant,
    last_activity_epoch_ms: i64,
    background_entered_epoch_ms: Option<i64>,
    /// Bumped on every cancellation; timers from older generations are stale.
    generation: u64,
    timers: Vec<JoinHandle<()>>,
}

impl Machine {
    fn cancel_timers(&mut self) {
        self.generation += 1;
        for timer in self.timers.drain(..) {
            timer.abort();
        }
    }

    fn touch(&mut self, now_ms: i64) {
        self.last_activity = Instant::now();
        self.last_activity_epoch_ms = now_ms;
    }

    fn expiry_deadline(&self) -> Instant {
        self.last_activity + self.config.inactivity_timeout()
    }
}

struct Inner {
    runtime: Handle,
    store: Arc<dyn CredentialStore>,
    sign_out: Arc<dyn SignOutHandler>,
    clock: Arc<dyn Clock>,
    listeners: ListenerSet<SessionEvent>,
    machine: Mutex<Machine>,
}

impl Inner {
    fn machine(&self) -> MutexGuard<'_, Machine> {
        self.machine.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Replace all timers with the warning and expiry timers measured from
    /// the last activity.
    fn schedule_foreground(self: &Arc<Self>, machine: &mut Machine) {
        machine.cancel_timers();
        let generation = machine.generation;
        let warn_at = machine.last_activity + machine.config.warning_timeout();
        let expire_at = machine.expiry_deadline();

        let weak = Arc::downgrade(self);
        let warning = self.runtime.spawn(async move {
            tokio::time::sleep_until(warn_at).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_warning_timer(generation, expire_at);
            }
        });

        let weak = Arc::downgrade(self);
        let expiry = self.runtime.spawn(async move {
            tokio::time::sleep_until(expire_at).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_expiry_timer(generation, ExpiryReason::Inactivity);
            }
        });

        machine.timers.push(warning);
        machine.timers.push(expiry);
    }

    fn schedule_background(self: &Arc<Self>, machine: &mut Machine, started: Instant) {
        machine.cancel_timers();
        let generation = machine.generation;
        let expire_at = started + machine.config.background_timeout();

        let weak: Weak<Self> = Arc::downgrade(self);
        let timer = self.runtime.spawn(async move {
            tokio::time::sleep_until(expire_at).await;
            if let Some(inner) = weak.upgrade() {
                inner.on_expiry_timer(generation, ExpiryReason::Background);
            }
        });
        machine.timers.push(timer);
    }

    fn on_warning_timer(&self, generation: u64, expire_at: Instant) {
        let time_remaining_ms = {
            let mut machine = self.machine();
            if machine.generation != generation || machine.phase != SessionPhase::Active {
                return;
            }
            machine.phase = SessionPhase::Warned;
            expire_at.saturating_duration_since(Instant::now()).as_millis() as u64
        };
        info!(time_remaining_ms, "Session about to expire");
        self.listeners
            .emit(&SessionEvent::Warning { time_remaining_ms });
    }

    fn on_expiry_timer(self: Arc<Self>, generation: u64, reason: ExpiryReason) {
        {
            let mut machine = self.machine();
            if machine.generation != generation {
                return;
            }
            let expected = match reason {
                ExpiryReason::Inactivity => machine.phase.is_foreground_tracking(),
                ExpiryReason::Background => machine.phase == SessionPhase::Backgrounded,
            };
            if !expected {
                return;
            }
            Self::enter_expired(&mut machine);
        }
        // Sign-out runs outside the timer task, which was just aborted.
        let runtime = self.runtime.clone();
        runtime.spawn(self.finish_expiry(reason));
    }

    fn enter_expired(machine: &mut Machine) {
        machine.cancel_timers();
        machine.phase = SessionPhase::Expired;
        machine.background_entered_epoch_ms = None;
    }

    async fn finish_expiry(self: Arc<Self>, reason: ExpiryReason) {
        info!(?reason, "Session expired");
        self.listeners.emit(&SessionEvent::Expired { reason });
        self.sign_out.sign_out(reason).await;
    }
}

/// Tracks user activity and app foreground/background transitions, and
/// signs the user out when the session times out.
pub struct SessionLifecycleManager {
    inner: Arc<Inner>,
}

impl SessionLifecycleManager {
    /// Load the persisted config and start tracking from now.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime; timers are spawned on the
    /// current one. Use [`with_runtime`](Self::with_runtime) from other threads.
    pub fn init(store: Arc<dyn CredentialStore>, sign_out: Arc<dyn SignOutHandler>) -> Self {
        Self::with_clock(store, sign_out, Arc::new(SystemClock))
    }

    /// Like [`init`](Self::init), measuring background time with `clock`.
    ///
    /// # Panics
    ///
    /// Panics when called outside a Tokio runtime.
    pub fn with_clock(
        store: Arc<dyn CredentialStore>,
        sign_out: Arc<dyn SignOutHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self::with_runtime(Handle::current(), store, sign_out, clock)
    }

    /// Start tracking with timers spawned on `runtime`. Safe to call from
    /// any thread.
    pub fn with_runtime(
        runtime: Handle,
        store: Arc<dyn CredentialStore>,
        sign_out: Arc<dyn SignOutHandler>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let config = SessionConfig::load(store.as_ref());
        let now_ms = clock.now_ms();
        let _context = runtime.enter();
        let inner = Arc::new(Inner {
            runtime: runtime.clone(),
            store,
            sign_out,
            clock,
            listeners: ListenerSet::new(),
            machine: Mutex::new(Machine {
                config,
                phase: SessionPhase::Active,
                last_activity: Instant::now(),
                last_activity_epoch_ms: now_ms,
                background_entered_epoch_ms: None,
                generation: 0,
                timers: Vec::new(),
            }),
        });
        {
            let mut machine = inner.machine();
            inner.schedule_foreground(&mut machine);
        }
        info!(?config, "Session tracking started");
        Self { inner }
    }

    /// Record user activity and restart the warning/expiry timers.
    pub fn update_activity(&self) {
        let now_ms = self.inner.clock.now_ms();
        let mut machine = self.inner.machine();
        match machine.phase {
            SessionPhase::Active | SessionPhase::Warned => {
                machine.touch(now_ms);
                machine.phase = SessionPhase::Active;
                self.inner.schedule_foreground(&mut machine);
            }
            // Remembered, but no timers until tracking resumes
            SessionPhase::Backgrounded | SessionPhase::Paused => machine.touch(now_ms),
            SessionPhase::Expired | SessionPhase::Destroyed => {}
        }
    }

    /// Merge `update` into the config, persist it, and restart timers.
    ///
    /// Persisting is best-effort; the new config applies either way.
    pub fn set_config(&self, update: SessionConfigUpdate) -> Result<SessionConfig, ConfigError> {
        let now_ms = self.inner.clock.now_ms();
        let mut machine = self.inner.machine();
        let config = machine.config.merged(update);
        config.validate()?;

        if let Err(e) = config.persist(self.inner.store.as_ref()) {
            warn!(err = %e, "Failed to persist session config");
        }
        machine.config = config;

        match machine.phase {
            SessionPhase::Active | SessionPhase::Warned => {
                machine.touch(now_ms);
                machine.phase = SessionPhase::Active;
                self.inner.schedule_foreground(&mut machine);
            }
            SessionPhase::Backgrounded => {
                // Re-arm against the original background start
                let elapsed_ms = machine
                    .background_entered_epoch_ms
                    .map(|entered| (now_ms - entered).max(0) as u64)
                    .unwrap_or(0);
                let now = Instant::now();
                let started = now
                    .checked_sub(std::time::Duration::from_millis(elapsed_ms))
                    .unwrap_or(now);
                self.inner.schedule_background(&mut machine, started);
            }
            SessionPhase::Paused | SessionPhase::Expired | SessionPhase::Destroyed => {}
        }
        debug!(?config, "Session config updated");
        Ok(config)
    }

    pub fn get_config(&self) -> SessionConfig {
        self.inner.machine().config
    }

    pub fn add_event_listener<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&SessionEvent) + Send + Sync + 'static,
    {
        self.inner.listeners.add(callback)
    }

    /// Acknowledge a warning: fresh activity plus a `session_extended`
    /// notification. Returns false if there is no live session to extend.
    pub fn extend_session(&self) -> bool {
        let now_ms = self.inner.clock.now_ms();
        {
            let mut machine = self.inner.machine();
            if !machine.phase.is_foreground_tracking() {
                return false;
            }
            machine.touch(now_ms);
            machine.phase = SessionPhase::Active;
            self.inner.schedule_foreground(&mut machine);
        }
        info!("Session extended");
        self.inner.listeners.emit(&SessionEvent::Extended);
        true
    }

    /// Suspend all timers until [`resume`](Self::resume).
    pub fn pause(&self) {
        let mut machine = self.inner.machine();
        if matches!(machine.phase, SessionPhase::Expired | SessionPhase::Destroyed) {
            return;
        }
        machine.cancel_timers();
        machine.background_entered_epoch_ms = None;
        machine.phase = SessionPhase::Paused;
        debug!("Session tracking paused");
    }

    /// Resume tracking from a fresh activity baseline.
    pub fn resume(&self) {
        let now_ms = self.inner.clock.now_ms();
        let mut machine = self.inner.machine();
        if machine.phase != SessionPhase::Paused {
            return;
        }
        machine.touch(now_ms);
        machine.phase = SessionPhase::Active;
        self.inner.schedule_foreground(&mut machine);
        debug!("Session tracking resumed");
    }

    /// Start a new session after an expiry, e.g. once the user signed in again.
    pub fn restart(&self) {
        let now_ms = self.inner.clock.now_ms();
        let mut machine = self.inner.machine();
        if machine.phase != SessionPhase::Expired {
            return;
        }
        machine.touch(now_ms);
        machine.phase = SessionPhase::Active;
        self.inner.schedule_foreground(&mut machine);
        info!("Session restarted");
    }

    /// Apply a platform foreground/background transition.
    ///
    /// Returning to the foreground once the background timeout has elapsed
    /// (the same instant the background timer would fire) expires the
    /// session immediately; the sign-out has completed when this returns.
    pub async fn handle_app_state(&self, state: AppState) {
        if state.is_foreground() {
            self.enter_foreground().await;
        } else {
            self.enter_background();
        }
    }

    fn enter_background(&self) {
        let now_ms = self.inner.clock.now_ms();
        let mut machine = self.inner.machine();
        if !machine.phase.is_foreground_tracking() {
            return;
        }
        machine.background_entered_epoch_ms = Some(now_ms);
        machine.phase = SessionPhase::Backgrounded;
        self.inner.schedule_background(&mut machine, Instant::now());
        debug!("App backgrounded");
    }

    async fn enter_foreground(&self) {
        let now_ms = self.inner.clock.now_ms();
        let expired = {
            let mut machine = self.inner.machine();
            if machine.phase != SessionPhase::Backgrounded {
                return;
            }
            machine.cancel_timers();
            let entered = machine.background_entered_epoch_ms.take().unwrap_or(now_ms);
            let elapsed_ms = (now_ms - entered).max(0) as u64;
            debug!(elapsed_ms, "App foregrounded");

            if elapsed_ms >= machine.config.background_timeout_ms {
                Inner::enter_expired(&mut machine);
                true
            } else {
                machine.touch(now_ms);
                machine.phase = SessionPhase::Active;
                self.inner.schedule_foreground(&mut machine);
                false
            }
        };
        if expired {
            Arc::clone(&self.inner)
                .finish_expiry(ExpiryReason::Background)
                .await;
        }
    }

    /// Time left before inactivity expiry, while tracking in the foreground.
    pub fn time_until_expiry(&self) -> Option<std::time::Duration> {
        let machine = self.inner.machine();
        if !machine.phase.is_foreground_tracking() {
            return None;
        }
        Some(machine.expiry_deadline().saturating_duration_since(Instant::now()))
    }

    pub fn state(&self) -> SessionState {
        let machine = self.inner.machine();
        SessionState {
            last_activity_epoch_ms: machine.last_activity_epoch_ms,
            background_entered_epoch_ms: machine.background_entered_epoch_ms,
            is_active: machine.phase.is_foreground_tracking(),
            phase: machine.phase,
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.inner.machine().phase
    }

    /// Cancel every timer and drop every listener. Further calls are no-ops.
    pub fn destroy(&self) {
        {
            let mut machine = self.inner.machine();
            machine.cancel_timers();
            machine.phase = SessionPhase::Destroyed;
        }
        self.inner.listeners.clear();
        debug!("Session manager destroyed");
    }
}

impl Drop for SessionLifecycleManager {
    fn drop(&mut self) {
        self.inner.machine().cancel_timers();
    }
}
