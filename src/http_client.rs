//! Shared HTTP client construction policy.
//!
//! The object storage client, the token endpoint client, and the signed-URL
//! transport all build their reqwest clients here so timeouts and User-Agent
//! stay consistent.

use std::time::Duration;

use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::api::{Service, ServiceError};
use crate::user_agent;

/// Default HTTP connect timeout (30 seconds).
pub const CONNECT_TIMEOUT_SECS: u64 = 30;

/// Default HTTP read timeout (5 minutes, one chunk at a time).
pub const READ_TIMEOUT_SECS: u64 = 300;

/// Builds a reqwest client with the crate's timeout and User-Agent policy.
///
/// Clients carry no default headers; every request sets its own.
///
/// # Errors
///
/// Returns a [`ServiceError::InvalidRequest`] tagged with `service` when the
/// client cannot be built.
pub(crate) fn build_http_client(
    service: Service,
    connect_timeout_secs: u64,
    read_timeout_secs: u64,
) -> Result<Client, ServiceError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(connect_timeout_secs))
        .timeout(Duration::from_secs(read_timeout_secs))
        .user_agent(user_agent::default_user_agent())
        .build()
        .map_err(|e| {
            ServiceError::invalid_request(service, format!("failed to build HTTP client: {e}"))
        })
}

/// Sends a request and decodes a JSON success body.
///
/// Non-success statuses become [`ServiceError::Status`] carrying the body text,
/// so callers can recognize token-expiry messages.
pub(crate) async fn send_json<T: DeserializeOwned>(
    service: Service,
    request: RequestBuilder,
) -> Result<T, ServiceError> {
    let response = request
        .send()
        .await
        .map_err(|e| ServiceError::transport(service, e))?;

    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| ServiceError::transport(service, e))?;

    if !status.is_success() {
        debug!(%service, status = status.as_u16(), "service returned error status");
        return Err(ServiceError::status(service, status.as_u16(), body));
    }

    serde_json::from_str(&body).map_err(|e| {
        ServiceError::invalid_response(service, format!("failed to decode response body: {e}"))
    })
}
