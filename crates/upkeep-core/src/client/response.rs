use std::time::Duration;

use serde::de::DeserializeOwned;

use crate::error::RequestError;
use crate::transport::HttpResponse;

/// Per-call overrides. Unset fields fall back to the client's configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestOptions {
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub require_auth: bool,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            timeout: None,
            max_retries: None,
            require_auth: true,
        }
    }
}

impl RequestOptions {
    pub fn unauthenticated() -> Self {
        Self {
            require_auth: false,
            ..Self::default()
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Uniform outcome of a request: callers branch on `error`.
#[derive(Debug, Clone, PartialEq)]
pub struct ApiResponse<T> {
    pub data: Option<T>,
    pub error: Option<RequestError>,
    pub status: u16,
}

impl<T> ApiResponse<T> {
    pub fn success(data: Option<T>, status: u16) -> Self {
        Self {
            data,
            error: None,
            status,
        }
    }

    pub fn failure(error: RequestError) -> Self {
        Self {
            data: None,
            status: error.status(),
            error: Some(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<Option<T>, RequestError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.data),
        }
    }
}

impl<T: DeserializeOwned> ApiResponse<T> {
    /// Map a raw response: non-2xx becomes an error, an empty body is
    /// success without data, anything else must parse as `T`.
    pub fn from_http(response: HttpResponse) -> Self {
        if !response.is_success() {
            return Self::failure(RequestError::from_status(response.status, &response.body));
        }
        if response.body.trim().is_empty() {
            return Self::success(None, response.status);
        }
        match serde_json::from_str(&response.body) {
            Ok(data) => Self::success(Some(data), response.status),
            Err(e) => Self::failure(RequestError::ParseFailure(e.to_string())),
        }
    }
}
