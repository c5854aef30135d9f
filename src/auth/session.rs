//! Authenticated request session with transparent token refresh.
//!
//! Every request made through [`AuthSession`]:
//! 1. carries the current bearer token from the shared [`TokenManager`]
//! 2. is retried with exponential backoff on 429/500/502/503/504 and on
//!    connection errors, per the session's [`RetryPolicy`]
//! 3. on a 401, swaps in a refreshed token exactly once and is re-issued;
//!    a second 401 is handed back to the caller
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use sentinel_core::auth::{AuthSession, Credentials, SessionConfig, TokenManager};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SessionConfig::default();
//! let credentials = Credentials::from_env().resolve()?;
//! let tokens = Arc::new(TokenManager::new(config.token_endpoint.clone(), credentials)?);
//! let session = AuthSession::open(tokens, &config).await?;
//! # let _ = session;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::CONTENT_LENGTH;
use reqwest::{Client, Method, Response, StatusCode};
use serde::de::DeserializeOwned;
use tracing::{debug, info, instrument, warn};

use super::{AuthError, TokenEndpoint, TokenManager};
use crate::download::constants::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::download::{
    DownloadError, RetryDecision, RetryPolicy, classify_status, classify_transport_error,
};

/// Session construction settings.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Token endpoint and client id.
    pub token_endpoint: TokenEndpoint,
    /// TCP connect timeout.
    pub connect_timeout: Duration,
    /// Default whole-request timeout when a call does not pass its own.
    pub read_timeout: Duration,
    /// Retry policy for transient statuses and transport errors.
    pub retry_policy: RetryPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_endpoint: TokenEndpoint::default(),
            connect_timeout: Duration::from_secs(CONNECT_TIMEOUT_SECS),
            read_timeout: Duration::from_secs(READ_TIMEOUT_SECS),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// Request-issuing session carrying a shared, auto-refreshed bearer token.
#[derive(Debug, Clone)]
pub struct AuthSession {
    client: Client,
    tokens: Arc<TokenManager>,
    retry_policy: RetryPolicy,
}

impl AuthSession {
    /// Opens a session, acquiring a token before returning.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Auth`] if no token can be obtained, or
    /// [`DownloadError::Network`] if the HTTP client cannot be built.
    #[instrument(level = "debug", skip_all)]
    pub async fn open(
        tokens: Arc<TokenManager>,
        config: &SessionConfig,
    ) -> Result<Self, DownloadError> {
        tokens.access_token().await?;

        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.read_timeout)
            // Byte counts are checked against Content-Length.
            .gzip(false)
            .user_agent(crate::user_agent::default_user_agent())
            .build()
            .map_err(|e| DownloadError::Auth(AuthError::Client(e)))?;

        debug!(
            max_attempts = config.retry_policy.max_attempts(),
            "authenticated session opened"
        );

        Ok(Self {
            client,
            tokens,
            retry_policy: config.retry_policy.clone(),
        })
    }

    /// Shared token manager backing this session.
    #[must_use]
    pub fn tokens(&self) -> &Arc<TokenManager> {
        &self.tokens
    }

    /// Issues a request and returns the final response, whatever its status.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] on transport failure after retries, or when a
    /// token refresh is needed and fails.
    #[instrument(level = "debug", skip(self), fields(method = %method))]
    pub async fn execute(
        &self,
        method: Method,
        url: &str,
        timeout: Option<Duration>,
    ) -> Result<Response, DownloadError> {
        let token = self.tokens.access_token().await?;
        let response = self.send_with_retry(&method, url, &token, timeout).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        info!(url = %url, "token rejected; refreshing and retrying once");
        let token = self.tokens.force_refresh(&token).await?;
        self.send_with_retry(&method, url, &token, timeout).await
    }

    /// Issues a GET and fails on any non-success status.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::HttpStatus`] for non-success responses, plus
    /// everything [`AuthSession::execute`] can return.
    pub async fn get(&self, url: &str, timeout: Option<Duration>) -> Result<Response, DownloadError> {
        let response = self.execute(Method::GET, url, timeout).await?;
        if !response.status().is_success() {
            return Err(DownloadError::http_status(url, response.status().as_u16()));
        }
        Ok(response)
    }

    /// Issues a GET and decodes a JSON body.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError::Decode`] if the body is not the expected JSON,
    /// plus everything [`AuthSession::get`] can return.
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<T, DownloadError> {
        let response = self.get(url, Some(timeout)).await?;
        response
            .json::<T>()
            .await
            .map_err(|e| DownloadError::decode(url, e))
    }

    /// Probes a file with HEAD and returns its advertised byte length.
    ///
    /// # Errors
    ///
    /// Returns [`DownloadError`] if the probe fails or is answered with a
    /// non-success status. A missing or unparsable length is `Ok(None)`.
    pub async fn content_length(
        &self,
        url: &str,
        timeout: Duration,
    ) -> Result<Option<u64>, DownloadError> {
        let response = self.execute(Method::HEAD, url, Some(timeout)).await?;
        if !response.status().is_success() {
            return Err(DownloadError::http_status(url, response.status().as_u16()));
        }
        Ok(header_content_length(&response))
    }

    async fn send_with_retry(
        &self,
        method: &Method,
        url: &str,
        token: &str,
        timeout: Option<Duration>,
    ) -> Result<Response, DownloadError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            let mut request = self.client.request(method.clone(), url).bearer_auth(token);
            if let Some(timeout) = timeout {
                request = request.timeout(timeout);
            }

            let (failure_type, outcome) = match request.send().await {
                Ok(response) => {
                    let failure_type = classify_status(response.status().as_u16());
                    if response.status().is_success() || !failure_type.is_retryable() {
                        return Ok(response);
                    }
                    (failure_type, Ok(response))
                }
                Err(error) => (
                    classify_transport_error(&error),
                    Err(DownloadError::network(url, error)),
                ),
            };

            match self.retry_policy.should_retry(failure_type, attempt) {
                RetryDecision::Retry {
                    delay,
                    attempt: next_attempt,
                } => {
                    let reason = match &outcome {
                        Ok(response) => format!("HTTP {}", response.status().as_u16()),
                        Err(error) => error.to_string(),
                    };
                    warn!(
                        url = %url,
                        attempt = next_attempt,
                        max_attempts = self.retry_policy.max_attempts(),
                        delay_ms = delay.as_millis(),
                        reason = %reason,
                        "retrying request"
                    );
                    tokio::time::sleep(delay).await;
                }
                RetryDecision::DoNotRetry { reason } => {
                    debug!(url = %url, %reason, "not retrying request");
                    return outcome;
                }
            }
        }
    }
}

/// Reads `Content-Length` from the response headers.
#[must_use]
pub fn header_content_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<u64>().ok())
}
