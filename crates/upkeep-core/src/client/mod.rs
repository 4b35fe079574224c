//! Resilient request client for the backend data API.
//!
//! This module provides the `RequestClient` used by business services.
//! Each logical request:
//! - makes sure a valid token exists before going to the network
//! - enforces a hard per-attempt timeout
//! - retries transport failures after a fixed backoff
//! - refreshes and retries once when the backend rejects the token
//!
//! Every outcome comes back as an [`ApiResponse`]; nothing here returns `Err`.

pub mod health;
pub mod response;

pub use health::HealthEndpoint;
pub use response::{ApiResponse, RequestOptions};

use std::sync::Arc;
use std::time::Duration;

use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, warn};

use crate::auth::TokenManager;
use crate::config::ClientConfig;
use crate::error::RequestError;
use crate::network::NetworkObserver;
use crate::transport::{
    HttpMethod, HttpRequest, HttpResponse, HttpTransport, RequestBody, UploadPart,
};

/// Liveness endpoint below the backend base URL
pub const HEALTH_ENDPOINT: &str = "/health";

/// Health checks retry at most once.
const HEALTH_CHECK_MAX_RETRIES: u32 = 1;

pub(crate) const API_KEY_HEADER: &str = "apikey";

pub struct RequestClient {
    transport: Arc<dyn HttpTransport>,
    tokens: Arc<TokenManager>,
    network: Option<Arc<NetworkObserver>>,
    base_url: String,
    api_key: Option<String>,
    request_timeout: Duration,
    upload_timeout: Duration,
    health: HealthEndpoint,
    max_retries: u32,
    retry_delay: Duration,
}

impl RequestClient {
    pub fn new(
        config: &ClientConfig,
        transport: Arc<dyn HttpTransport>,
        tokens: Arc<TokenManager>,
    ) -> Self {
        Self {
            transport,
            tokens,
            network: None,
            base_url: config.base_url().to_string(),
            api_key: config.api_key.clone(),
            request_timeout: config.request_timeout(),
            upload_timeout: config.upload_timeout(),
            health: HealthEndpoint::new(config),
            max_retries: config.max_retries,
            retry_delay: config.retry_delay(),
        }
    }

    /// Let retry backoff end early when connectivity returns.
    pub fn with_network(mut self, network: Arc<NetworkObserver>) -> Self {
        self.network = Some(network);
        self
    }

    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: RequestBody,
        options: RequestOptions,
    ) -> ApiResponse<T> {
        match self
            .send_with_retries(method, endpoint, body, options, self.request_timeout, true)
            .await
        {
            Ok(response) => ApiResponse::from_http(response),
            Err(e) => ApiResponse::failure(e),
        }
    }

    pub async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> ApiResponse<T> {
        self.request(HttpMethod::Get, endpoint, RequestBody::Empty, options)
            .await
    }

    pub async fn post<T: DeserializeOwned, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
        options: RequestOptions,
    ) -> ApiResponse<T> {
        self.request_with_json(HttpMethod::Post, endpoint, body, options)
            .await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
        options: RequestOptions,
    ) -> ApiResponse<T> {
        self.request_with_json(HttpMethod::Put, endpoint, body, options)
            .await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize>(
        &self,
        endpoint: &str,
        body: &B,
        options: RequestOptions,
    ) -> ApiResponse<T> {
        self.request_with_json(HttpMethod::Patch, endpoint, body, options)
            .await
    }

    pub async fn delete<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> ApiResponse<T> {
        self.request(HttpMethod::Delete, endpoint, RequestBody::Empty, options)
            .await
    }

    /// Multipart POST with the longer upload timeout. No content type is
    /// set here so the transport can frame the multipart boundary.
    pub async fn upload<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        parts: Vec<UploadPart>,
        options: RequestOptions,
    ) -> ApiResponse<T> {
        match self
            .send_with_retries(
                HttpMethod::Post,
                endpoint,
                RequestBody::Multipart(parts),
                options,
                self.upload_timeout,
                false,
            )
            .await
        {
            Ok(response) => ApiResponse::from_http(response),
            Err(e) => ApiResponse::failure(e),
        }
    }

    /// Unauthenticated liveness check; true only for a 2xx answer.
    ///
    /// A check that gets no answer is retried once after the usual backoff.
    pub async fn health_check(&self) -> bool {
        let mut retries = HEALTH_CHECK_MAX_RETRIES;
        loop {
            match self.health.check(self.transport.as_ref()).await {
                Some(status) => return (200..300).contains(&status),
                None if retries > 0 => {
                    retries -= 1;
                    self.backoff().await;
                }
                None => return false,
            }
        }
    }

    async fn request_with_json<T: DeserializeOwned, B: Serialize>(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: &B,
        options: RequestOptions,
    ) -> ApiResponse<T> {
        match serde_json::to_value(body) {
            Ok(value) => {
                self.request(method, endpoint, RequestBody::Json(value), options)
                    .await
            }
            Err(e) => ApiResponse::failure(RequestError::ParseFailure(format!(
                "request body could not be serialized: {e}"
            ))),
        }
    }

    fn url(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    fn base_headers(&self, json: bool) -> Vec<(String, String)> {
        let mut headers = vec![("Accept".to_string(), "application/json".to_string())];
        if json {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }
        if let Some(ref key) = self.api_key {
            headers.push((API_KEY_HEADER.to_string(), key.clone()));
        }
        headers
    }

    /// `Authorization` value for a valid token, refreshing first if needed.
    async fn authorization(&self) -> Option<String> {
        if !self.tokens.ensure_valid_token().await {
            return None;
        }
        self.tokens.get_tokens().await.map(|tokens| tokens.authorization())
    }

    /// Wait out the retry interval, ending early if we were offline and
    /// the connection comes back.
    async fn backoff(&self) {
        match self.network {
            Some(ref network) if network.is_offline() => {
                network.wait_for_connection(self.retry_delay).await;
            }
            _ => tokio::time::sleep(self.retry_delay).await,
        }
    }

    /// Run the attempt loop. Non-2xx responses come back as `Ok`; only
    /// failures without a usable response are `Err`.
    async fn send_with_retries(
        &self,
        method: HttpMethod,
        endpoint: &str,
        body: RequestBody,
        options: RequestOptions,
        default_timeout: Duration,
        json: bool,
    ) -> Result<HttpResponse, RequestError> {
        let timeout = options.timeout.unwrap_or(default_timeout);
        let mut retries = options.max_retries.unwrap_or(self.max_retries);
        let mut refreshed_after_reject = false;
        let url = self.url(endpoint);
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;
            let mut headers = self.base_headers(json);
            if options.require_auth {
                match self.authorization().await {
                    Some(value) => headers.push(("Authorization".to_string(), value)),
                    None => {
                        warn!(%method, endpoint, "No valid token, skipping request");
                        return Err(RequestError::AuthExpired);
                    }
                }
            }

            let request = HttpRequest {
                method,
                url: url.clone(),
                headers,
                body: body.clone(),
            };
            debug!(%method, endpoint, attempt, retries_left = retries, "Sending request");

            let response = match tokio::time::timeout(timeout, self.transport.send(request)).await {
                Err(_) => {
                    let timeout_ms = timeout.as_millis() as u64;
                    warn!(%method, endpoint, attempt, timeout_ms, "Request timed out");
                    return Err(RequestError::Timeout(timeout_ms));
                }
                Ok(Err(e)) => {
                    if retries == 0 {
                        warn!(
                            %method,
                            endpoint,
                            attempt,
                            err = %e,
                            "Request failed, retries exhausted"
                        );
                        return Err(RequestError::NetworkUnreachable(e.to_string()));
                    }
                    retries -= 1;
                    warn!(
                        %method,
                        endpoint,
                        attempt,
                        err = %e,
                        delay_ms = self.retry_delay.as_millis() as u64,
                        "Request failed, backing off"
                    );
                    self.backoff().await;
                    continue;
                }
                Ok(Ok(response)) => response,
            };

            if response.status == 401
                && options.require_auth
                && retries > 0
                && !refreshed_after_reject
            {
                refreshed_after_reject = true;
                debug!(%method, endpoint, "Token rejected, refreshing");
                if !self.tokens.refresh_token().await {
                    return Err(RequestError::AuthExpired);
                }
                retries -= 1;
                continue;
            }

            return Ok(response);
        }
    }
}
