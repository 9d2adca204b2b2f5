//! Raw HTTP transport for pre-signed URLs.
//!
//! Signed URLs carry their own authorization, so requests go out without a
//! bearer token. Every request builds its own headers.

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest::Client;
use reqwest::header::RANGE;
use tracing::{debug, instrument};
use url::Url;

use super::{RawResponse, SignedUrlTransport};
use crate::api::{Service, ServiceError};
use crate::http_client::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, build_http_client};

/// reqwest-backed [`SignedUrlTransport`].
///
/// Created once and shared by every transfer, taking advantage of
/// connection pooling.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    /// Creates a transport with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidRequest`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, ServiceError> {
        Self::with_timeouts(CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS)
    }

    /// Creates a transport with custom connect and read timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidRequest`] if the HTTP client cannot be built.
    pub fn with_timeouts(
        connect_timeout_secs: u64,
        read_timeout_secs: u64,
    ) -> Result<Self, ServiceError> {
        let client =
            build_http_client(Service::SignedUrl, connect_timeout_secs, read_timeout_secs)?;
        Ok(Self { client })
    }

    /// Wraps an existing reqwest client.
    #[must_use]
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn parse_signed_url(url: &str) -> Result<Url, ServiceError> {
    let parsed = Url::parse(url).map_err(|e| {
        ServiceError::invalid_request(Service::SignedUrl, format!("invalid signed URL: {e}"))
    })?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ServiceError::invalid_request(
            Service::SignedUrl,
            format!("unsupported signed URL scheme '{}'", parsed.scheme()),
        ));
    }
    Ok(parsed)
}

/// Inclusive `Range` header value for the half-open range `[start, end)`.
pub(crate) fn range_header(start: u64, end: u64) -> String {
    format!("bytes={start}-{}", end - 1)
}

#[async_trait]
impl SignedUrlTransport for HttpTransport {
    #[instrument(skip(self, url, body), fields(bytes = body.len()))]
    async fn put(&self, url: &str, body: Vec<u8>) -> Result<RawResponse, ServiceError> {
        let url = parse_signed_url(url)?;
        let response = self
            .client
            .put(url)
            .body(body)
            .send()
            .await
            .map_err(|e| ServiceError::transport(Service::SignedUrl, e))?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ServiceError::transport(Service::SignedUrl, e))?;
        debug!(status, "chunk PUT answered");
        Ok(RawResponse::new(status, body.to_vec()))
    }

    #[instrument(skip(self, url))]
    async fn get_range(
        &self,
        url: &str,
        start: u64,
        end: u64,
    ) -> Result<RawResponse, ServiceError> {
        if end <= start {
            return Err(ServiceError::invalid_request(
                Service::SignedUrl,
                format!("empty byte range [{start}, {end})"),
            ));
        }
        let url = parse_signed_url(url)?;
        let response = self
            .client
            .get(url)
            .header(RANGE, range_header(start, end))
            .send()
            .await
            .map_err(|e| ServiceError::transport(Service::SignedUrl, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .bytes()
                .await
                .map_err(|e| ServiceError::transport(Service::SignedUrl, e))?;
            return Ok(RawResponse::new(status.as_u16(), body.to_vec()));
        }

        // A server that ignores Range sends the whole object; stop reading past the range.
        let expected = usize::try_from(end - start).unwrap_or(usize::MAX);
        let mut body = Vec::with_capacity(expected);
        let mut stream = response.bytes_stream();
        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| ServiceError::transport(Service::SignedUrl, e))?;
            if body.len() + chunk.len() > expected {
                return Err(ServiceError::invalid_response(
                    Service::SignedUrl,
                    format!("ranged GET returned more than the {expected} bytes requested"),
                ));
            }
            body.extend_from_slice(&chunk);
        }
        debug!(status = status.as_u16(), bytes = body.len(), "ranged GET answered");
        Ok(RawResponse::new(status.as_u16(), body))
    }
}
