//! Error type shared by every collaborator service.
//!
//! One error shape covers the authentication endpoint, the object storage
//! API, and raw signed-URL traffic. The [`Service`] tag says which one failed.

use std::fmt;

use thiserror::Error;

/// Boxed source error for transport failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Message fragment the platform returns when a bearer token is no longer valid.
///
/// Matched case-insensitively against response bodies.
pub const TOKEN_EXPIRED_MESSAGE: &str = "invalid or expired";

/// The remote service a [`ServiceError`] originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    /// Token minting / refresh endpoint.
    Authentication,
    /// Object storage REST API (signed URL issuance, upload completion).
    ObjectStorage,
    /// The storage backend behind a pre-signed URL.
    SignedUrl,
}

impl Service {
    /// Returns the stable label used in logs and error messages.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Authentication => "authentication",
            Self::ObjectStorage => "object-storage",
            Self::SignedUrl => "signed-url",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors returned by collaborator services.
#[derive(Debug, Error)]
pub enum ServiceError {
    /// The service answered with a non-success HTTP status.
    #[error("{service} service returned HTTP {status}: {body}")]
    Status {
        /// Which service answered.
        service: Service,
        /// The HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// The request never produced a response (DNS, connect, TLS, timeout, ...).
    #[error("{service} request failed: {source}")]
    Transport {
        /// Which service was being called.
        service: Service,
        /// The underlying transport error.
        #[source]
        source: BoxError,
    },

    /// The request could not be built (bad base URL, bad client settings).
    #[error("invalid {service} request: {message}")]
    InvalidRequest {
        /// Which service was being called.
        service: Service,
        /// What was wrong with the request.
        message: String,
    },

    /// The service answered with a body that could not be understood.
    #[error("{service} service returned an invalid response: {message}")]
    InvalidResponse {
        /// Which service answered.
        service: Service,
        /// What was wrong with the response.
        message: String,
    },
}

impl ServiceError {
    /// Creates an HTTP status error.
    pub fn status(service: Service, status: u16, body: impl Into<String>) -> Self {
        Self::Status {
            service,
            status,
            body: body.into(),
        }
    }

    /// Creates a transport error from any error source.
    pub fn transport(service: Service, source: impl Into<BoxError>) -> Self {
        Self::Transport {
            service,
            source: source.into(),
        }
    }

    /// Creates an invalid-request error.
    pub fn invalid_request(service: Service, message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            service,
            message: message.into(),
        }
    }

    /// Creates an invalid-response error.
    pub fn invalid_response(service: Service, message: impl Into<String>) -> Self {
        Self::InvalidResponse {
            service,
            message: message.into(),
        }
    }

    /// Returns the service this error came from.
    #[must_use]
    pub fn service(&self) -> Service {
        match self {
            Self::Status { service, .. }
            | Self::Transport { service, .. }
            | Self::InvalidRequest { service, .. }
            | Self::InvalidResponse { service, .. } => *service,
        }
    }

    /// Returns the HTTP status code, if the service answered at all.
    #[must_use]
    pub fn http_status(&self) -> Option<u16> {
        match self {
            Self::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns the response body for status errors.
    #[must_use]
    pub fn body(&self) -> Option<&str> {
        match self {
            Self::Status { body, .. } => Some(body),
            _ => None,
        }
    }

    /// Returns true if the response signals an invalid or expired access token.
    #[must_use]
    pub fn is_token_expired(&self) -> bool {
        match self {
            Self::Status { body, .. } => body
                .to_ascii_lowercase()
                .contains(TOKEN_EXPIRED_MESSAGE),
            _ => false,
        }
    }

    /// Returns true if no response was received.
    #[must_use]
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport { .. })
    }
}
