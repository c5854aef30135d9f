//! Bearer token lifecycle.
//!
//! [`TokenManager`] owns the [`TokenCache`] behind a single async mutex. All
//! sessions holding the same `Arc<TokenManager>` therefore share one token
//! and at most one grant request is in flight at a time.
//!
//! ```text
//! no-token --password grant--> valid --time--> near-expiry (<60s)
//!    near-expiry --refresh grant ok--> valid
//!    near-expiry --refresh grant fails--> password grant --> valid
//! ```

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use reqwest::Client;
use serde::Deserialize;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

use super::{AuthError, ResolvedCredentials};
use crate::download::constants::{CONNECT_TIMEOUT_SECS, TOKEN_TIMEOUT_SECS};

/// Public token endpoint of the Copernicus Data Space Ecosystem identity service.
pub const DEFAULT_TOKEN_URL: &str =
    "https://identity.dataspace.copernicus.eu/auth/realms/CDSE/protocol/openid-connect/token";

/// Public OAuth client id.
pub const DEFAULT_CLIENT_ID: &str = "cdse-public";

/// Tokens are renewed once fewer than this many seconds remain.
pub const EXPIRY_MARGIN_SECS: i64 = 60;

const DEFAULT_EXPIRES_IN_SECS: i64 = 3600;

/// Where and as whom tokens are requested.
#[derive(Debug, Clone)]
pub struct TokenEndpoint {
    /// Token endpoint URL.
    pub url: String,
    /// OAuth client id sent with every grant.
    pub client_id: String,
}

impl Default for TokenEndpoint {
    fn default() -> Self {
        Self {
            url: DEFAULT_TOKEN_URL.to_string(),
            client_id: DEFAULT_CLIENT_ID.to_string(),
        }
    }
}

/// Cached grant state. Times are absolute epoch seconds.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct TokenCache {
    /// Current bearer token.
    pub access_token: Option<String>,
    /// When `access_token` expires.
    pub expires_at: i64,
    /// Refresh token from the last grant.
    pub refresh_token: Option<String>,
    /// When `refresh_token` expires.
    pub refresh_expires_at: i64,
}

impl fmt::Debug for TokenCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |token: &Option<String>| token.as_ref().map(|_| "<redacted>");
        f.debug_struct("TokenCache")
            .field("access_token", &redact(&self.access_token))
            .field("expires_at", &self.expires_at)
            .field("refresh_token", &redact(&self.refresh_token))
            .field("refresh_expires_at", &self.refresh_expires_at)
            .finish()
    }
}

impl TokenCache {
    /// Returns the access token if it stays valid past the expiry margin.
    #[must_use]
    pub fn valid_access_token(&self, now: i64) -> Option<&str> {
        self.access_token
            .as_deref()
            .filter(|_| self.expires_at > now + EXPIRY_MARGIN_SECS)
    }

    fn valid_refresh_token(&self, now: i64) -> Option<&str> {
        self.refresh_token
            .as_deref()
            .filter(|_| self.refresh_expires_at > now + EXPIRY_MARGIN_SECS)
    }

    fn apply(&mut self, grant: TokenResponse, now: i64, keep_refresh_when_absent: bool) {
        self.access_token = Some(grant.access_token);
        self.expires_at = now + grant.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        match grant.refresh_token {
            Some(refresh) => {
                self.refresh_token = Some(refresh);
                self.refresh_expires_at = now + grant.refresh_expires_in.unwrap_or(0);
            }
            None if keep_refresh_when_absent => {}
            None => {
                self.refresh_token = None;
                self.refresh_expires_at = now;
            }
        }
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
    #[serde(default)]
    refresh_expires_in: Option<i64>,
}

/// Owns the token cache and performs password and refresh grants.
pub struct TokenManager {
    client: Client,
    endpoint: TokenEndpoint,
    credentials: ResolvedCredentials,
    cache: Mutex<TokenCache>,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("endpoint", &self.endpoint)
            .field("credentials", &self.credentials)
            .finish_non_exhaustive()
    }
}

impl TokenManager {
    /// Creates a manager with an empty cache.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError::Client`] if the HTTP client cannot be built.
    pub fn new(endpoint: TokenEndpoint, credentials: ResolvedCredentials) -> Result<Self, AuthError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .timeout(Duration::from_secs(TOKEN_TIMEOUT_SECS))
            .user_agent(crate::user_agent::default_user_agent())
            .build()
            .map_err(AuthError::Client)?;
        Ok(Self {
            client,
            endpoint,
            credentials,
            cache: Mutex::new(TokenCache::default()),
        })
    }

    /// Seeds the cache, e.g. with state carried over from an earlier run.
    #[must_use]
    pub fn with_cache(self, cache: TokenCache) -> Self {
        Self {
            cache: Mutex::new(cache),
            ..self
        }
    }

    /// Returns a copy of the current cache state.
    pub async fn snapshot(&self) -> TokenCache {
        self.cache.lock().await.clone()
    }

    /// Returns a bearer token that stays valid past the expiry margin,
    /// running a grant first if needed.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if every grant attempt fails.
    pub async fn access_token(&self) -> Result<String, AuthError> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now().timestamp();
        if let Some(token) = cache.valid_access_token(now) {
            return Ok(token.to_string());
        }
        self.obtain(&mut cache, now).await
    }

    /// Replaces a token the server rejected.
    ///
    /// If another session already replaced `rejected` while this caller waited
    /// for the lock, the newer token is returned without a new grant.
    ///
    /// # Errors
    ///
    /// Returns [`AuthError`] if every grant attempt fails.
    pub async fn force_refresh(&self, rejected: &str) -> Result<String, AuthError> {
        let mut cache = self.cache.lock().await;
        let now = Utc::now().timestamp();
        if let Some(token) = cache.valid_access_token(now)
            && token != rejected
        {
            debug!("token already refreshed by another request");
            return Ok(token.to_string());
        }
        self.obtain(&mut cache, now).await
    }

    async fn obtain(&self, cache: &mut TokenCache, now: i64) -> Result<String, AuthError> {
        if let Some(refresh) = cache.valid_refresh_token(now).map(str::to_string) {
            match self.refresh_grant(&refresh).await {
                Ok(grant) => {
                    cache.apply(grant, now, true);
                    info!(expires_at = cache.expires_at, "access token refreshed");
                    return cache
                        .access_token
                        .clone()
                        .ok_or(AuthError::MissingCredentials);
                }
                Err(error) => {
                    warn!(error = %error, "refresh grant failed; falling back to password grant");
                }
            }
        }

        let grant = self.password_grant().await?;
        cache.apply(grant, now, false);
        info!(expires_at = cache.expires_at, "access token granted");
        cache
            .access_token
            .clone()
            .ok_or(AuthError::MissingCredentials)
    }

    #[instrument(level = "debug", skip(self), fields(username = %self.credentials.username()))]
    async fn password_grant(&self) -> Result<TokenResponse, AuthError> {
        let form = [
            ("client_id", self.endpoint.client_id.as_str()),
            ("grant_type", "password"),
            ("username", self.credentials.username()),
            ("password", self.credentials.password()),
        ];
        self.post_grant("password", &form).await
    }

    #[instrument(level = "debug", skip_all)]
    async fn refresh_grant(&self, refresh_token: &str) -> Result<TokenResponse, AuthError> {
        let form = [
            ("client_id", self.endpoint.client_id.as_str()),
            ("grant_type", "refresh_token"),
            ("refresh_token", refresh_token),
        ];
        self.post_grant("refresh_token", &form).await
    }

    async fn post_grant(
        &self,
        grant: &'static str,
        form: &[(&str, &str)],
    ) -> Result<TokenResponse, AuthError> {
        let url = &self.endpoint.url;
        let response = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| AuthError::token_request(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(AuthError::TokenRejected {
                url: url.clone(),
                grant,
                status: status.as_u16(),
            });
        }

        response
            .json::<TokenResponse>()
            .await
            .map_err(|e| AuthError::token_request(url, e))
    }
}
