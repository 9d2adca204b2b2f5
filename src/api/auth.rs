//! Access token providers.
//!
//! [`ClientCredentialsProvider`] mints two-legged tokens from the platform
//! token endpoint and caches them. [`StaticTokenProvider`] hands back a token
//! the caller manages itself.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, instrument};
use url::Url;

use super::{AuthProvider, Service, ServiceError};
use crate::http_client::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, build_http_client, send_json};

/// Default token endpoint base URL.
pub const DEFAULT_AUTH_BASE_URL: &str = super::DEFAULT_BASE_URL;

/// Tokens are treated as expired this long before their reported expiry.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Token endpoint response.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    /// The bearer token.
    pub access_token: String,
    /// Token type, normally `Bearer`.
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime in seconds.
    pub expires_in: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

impl CachedToken {
    fn is_fresh(&self) -> bool {
        Instant::now() + EXPIRY_MARGIN < self.expires_at
    }
}

/// Two-legged OAuth token provider using the client credentials grant.
///
/// The token cache sits behind a `tokio::sync::Mutex`, so concurrent
/// transfers refreshing at the same time are serialized and each receives a
/// valid token.
pub struct ClientCredentialsProvider {
    client: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    scopes: Vec<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl ClientCredentialsProvider {
    /// Creates a provider against [`DEFAULT_AUTH_BASE_URL`].
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidRequest`] if the HTTP client cannot be built.
    pub fn new(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scopes: Vec<String>,
    ) -> Result<Self, ServiceError> {
        Self::with_base_url(client_id, client_secret, scopes, DEFAULT_AUTH_BASE_URL)
    }

    /// Creates a provider against a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidRequest`] if the base URL is invalid or
    /// the HTTP client cannot be built.
    pub fn with_base_url(
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        scopes: Vec<String>,
        base_url: &str,
    ) -> Result<Self, ServiceError> {
        let token_url = format!(
            "{}/authentication/v2/token",
            base_url.trim_end_matches('/')
        );
        Url::parse(&token_url).map_err(|e| {
            ServiceError::invalid_request(
                Service::Authentication,
                format!("invalid token URL '{token_url}': {e}"),
            )
        })?;
        let client = build_http_client(
            Service::Authentication,
            CONNECT_TIMEOUT_SECS,
            READ_TIMEOUT_SECS,
        )?;

        Ok(Self {
            client,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            scopes,
            cached: Mutex::new(None),
        })
    }

    /// Returns the cached token, minting a new one if none is cached or it is about to expire.
    ///
    /// # Errors
    ///
    /// Returns the token endpoint's [`ServiceError`] if minting fails.
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    pub async fn access_token(&self) -> Result<String, ServiceError> {
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh()) {
            return Ok(token.access_token.clone());
        }
        let token = self.fetch().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        Ok(access_token)
    }

    async fn fetch(&self) -> Result<CachedToken, ServiceError> {
        let body = format!(
            "grant_type=client_credentials&scope={}",
            urlencoding::encode(&self.scopes.join(" "))
        );
        let request = self
            .client
            .post(&self.token_url)
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .header(CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(ACCEPT, "application/json")
            .body(body);

        let response: TokenResponse = send_json(Service::Authentication, request).await?;
        if response.access_token.is_empty() {
            return Err(ServiceError::invalid_response(
                Service::Authentication,
                "token endpoint returned an empty access token",
            ));
        }
        debug!(expires_in = response.expires_in, "minted access token");
        Ok(CachedToken {
            access_token: response.access_token,
            expires_at: Instant::now() + Duration::from_secs(response.expires_in),
        })
    }
}

impl fmt::Debug for ClientCredentialsProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientCredentialsProvider")
            .field("token_url", &self.token_url)
            .field("client_id", &self.client_id)
            .field("scopes", &self.scopes)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthProvider for ClientCredentialsProvider {
    #[instrument(skip(self), fields(client_id = %self.client_id))]
    async fn refresh_access_token(&self) -> Result<String, ServiceError> {
        let mut cached = self.cached.lock().await;
        let token = self.fetch().await?;
        let access_token = token.access_token.clone();
        *cached = Some(token);
        info!("access token refreshed");
        Ok(access_token)
    }
}

/// Provider that always returns the same token.
///
/// For callers that manage token lifetime themselves. Once the token expires,
/// transfers exhaust their refresh budget and fail with a typed error.
#[derive(Clone)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    /// Wraps a fixed access token.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

impl fmt::Debug for StaticTokenProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StaticTokenProvider").finish_non_exhaustive()
    }
}

#[async_trait]
impl AuthProvider for StaticTokenProvider {
    async fn refresh_access_token(&self) -> Result<String, ServiceError> {
        Ok(self.token.clone())
    }
}
