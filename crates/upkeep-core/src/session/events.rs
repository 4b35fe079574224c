use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    Inactivity,
    Background,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type")]
pub enum SessionEvent {
    #[serde(rename = "session_warning")]
    Warning { time_remaining_ms: u64 },
    #[serde(rename = "session_expired")]
    Expired { reason: ExpiryReason },
    #[serde(rename = "session_extended")]
    Extended,
}

impl SessionEvent {
    pub fn name(&self) -> &'static str {
        match self {
            SessionEvent::Warning { .. } => "session_warning",
            SessionEvent::Expired { .. } => "session_expired",
            SessionEvent::Extended => "session_extended",
        }
    }
}

/// Platform foreground/background signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AppState {
    Active,
    /// Transitional (e.g. app switcher); handled like background.
    Inactive,
    Background,
}

impl AppState {
    pub fn is_foreground(self) -> bool {
        self == AppState::Active
    }
}
