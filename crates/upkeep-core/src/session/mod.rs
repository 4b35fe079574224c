//! Session lifetime bounded by user inactivity and time spent backgrounded.
//!
//! This module provides:
//! - `SessionConfig`: the three thresholds, persisted on change
//! - `SessionEvent`: warning / expired / extended notifications
//! - `SessionLifecycleManager`: the timer-driven state machine
//! - `SignOutHandler`: what runs when a session expires

pub mod clock;
pub mod config;
pub mod events;
pub mod manager;

pub use clock::{Clock, SystemClock};
pub use config::{SessionConfig, SessionConfigUpdate};
pub use events::{AppState, ExpiryReason, SessionEvent};
pub use manager::{SessionLifecycleManager, SessionPhase, SessionState};

use async_trait::async_trait;

/// Invoked once per expiry, after `session_expired` has been emitted.
#[async_trait]
pub trait SignOutHandler: Send + Sync {
    async fn sign_out(&self, reason: ExpiryReason);
}
