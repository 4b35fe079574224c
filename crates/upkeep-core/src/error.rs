use thiserror::Error;

/// Terminal failure of a logical request, after retries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RequestError {
    #[error("Authentication expired - please log in again")]
    AuthExpired,

    #[error("Request timed out after {0} ms")]
    Timeout(u64),

    #[error("Network unreachable: {0}")]
    NetworkUnreachable(String),

    #[error("Response could not be parsed: {0}")]
    ParseFailure(String),

    #[error("Server error {status}: {message}")]
    ServerError { status: u16, message: String },
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

impl RequestError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            return body.to_string();
        }
        let mut end = MAX_ERROR_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
    }

    pub fn from_status(status: u16, body: &str) -> Self {
        match status {
            401 => RequestError::AuthExpired,
            _ => RequestError::ServerError {
                status,
                message: Self::truncate_body(body),
            },
        }
    }

    /// HTTP-equivalent status reported alongside this error.
    ///
    /// Timeouts map to 408, auth failures to 401, and failures that never
    /// produced a response to 0.
    pub fn status(&self) -> u16 {
        match self {
            RequestError::AuthExpired => 401,
            RequestError::Timeout(_) => 408,
            RequestError::NetworkUnreachable(_) | RequestError::ParseFailure(_) => 0,
            RequestError::ServerError { status, .. } => *status,
        }
    }
}

/// Failure of a single credential-store operation.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Keychain error: {0}")]
    Keyring(#[from] keyring::Error),

    #[error("Storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Stored value is malformed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

/// Failure reported by the auth backend.
#[derive(Error, Debug)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("No active session")]
    NoSession,

    #[error("No saved credentials")]
    NoSavedCredentials,

    #[error("Auth backend rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("Auth backend unreachable: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Auth response malformed: {0}")]
    InvalidResponse(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error(
        "Warning timeout ({warning_ms} ms) must be shorter than inactivity timeout \
         ({inactivity_ms} ms)"
    )]
    WarningNotBeforeExpiry { warning_ms: u64, inactivity_ms: u64 },
}
