use std::time::Duration;

use tracing::debug;

use super::{API_KEY_HEADER, HEALTH_ENDPOINT};
use crate::config::ClientConfig;
use crate::transport::{HttpRequest, HttpTransport};

/// The backend liveness endpoint.
///
/// Every health request goes through here: the request client's health check,
/// the observer's connectivity test and [`HealthCheckSource`](crate::network::HealthCheckSource)
/// all send the same unauthenticated request under the same deadline.
#[derive(Debug, Clone)]
pub struct HealthEndpoint {
    url: String,
    api_key: Option<String>,
    timeout: Duration,
}

impl HealthEndpoint {
    pub fn new(config: &ClientConfig) -> Self {
        Self {
            url: format!("{}{}", config.base_url(), HEALTH_ENDPOINT),
            api_key: config.api_key.clone(),
            timeout: config.health_timeout(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn request(&self) -> HttpRequest {
        let mut request = HttpRequest::get(self.url.clone());
        request
            .headers
            .push(("Accept".to_string(), "application/json".to_string()));
        if let Some(ref key) = self.api_key {
            request.headers.push((API_KEY_HEADER.to_string(), key.clone()));
        }
        request
    }

    /// One attempt. Returns the response status, or `None` when nothing
    /// answered before the deadline.
    pub async fn check(&self, transport: &dyn HttpTransport) -> Option<u16> {
        match tokio::time::timeout(self.timeout, transport.send(self.request())).await {
            Ok(Ok(response)) => {
                debug!(status = response.status, "Health endpoint answered");
                Some(response.status)
            }
            Ok(Err(e)) => {
                debug!(err = %e, "Health request failed");
                None
            }
            Err(_) => {
                debug!(timeout_ms = self.timeout.as_millis() as u64, "Health request timed out");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::testing::ScriptedTransport;
    use crate::transport::HttpResponse;

    fn endpoint() -> HealthEndpoint {
        HealthEndpoint::new(&ClientConfig {
            backend_url: "https://api.example.com/".to_string(),
            api_key: Some("anon-key".to_string()),
            ..ClientConfig::default()
        })
    }

    #[tokio::test]
    async fn test_check_sends_api_key_without_auth() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_response(HttpResponse::new(503, "maintenance"));

        assert_eq!(endpoint().check(transport.as_ref()).await, Some(503));
        let requests = transport.requests();
        assert_eq!(requests[0].url, "https://api.example.com/health");
        assert_eq!(requests[0].header("apikey"), Some("anon-key"));
        assert!(requests[0].header("authorization").is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_check_timeout_is_none() {
        let transport = Arc::new(ScriptedTransport::new());
        transport.push_delayed(Duration::from_secs(60), HttpResponse::new(200, ""));

        let started = tokio::time::Instant::now();
        assert_eq!(endpoint().check(transport.as_ref()).await, None);
        assert!(started.elapsed() >= Duration::from_millis(5000));
    }
}
