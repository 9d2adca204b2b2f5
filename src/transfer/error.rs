//! Error types for the transfer module.
//!
//! Every fatal transfer error carries the [`RequestId`] of the call that
//! raised it, so a failure can be matched to its log lines. Retry-budget
//! errors also carry the number of attempts made.
//!
//! Cancellation is not an error; see [`TransferOutcome`](super::TransferOutcome).

use std::path::PathBuf;

use thiserror::Error;

use super::request::RequestId;
use crate::api::ServiceError;

/// Errors that can occur during uploads and downloads.
#[derive(Debug, Error)]
pub enum TransferError {
    /// The project scope does not match the scope grammar.
    #[error(
        "invalid project scope '{scope}': expected 1-20 comma-separated tokens of 3-50 characters [A-Za-z0-9._-]"
    )]
    InvalidScope {
        /// The rejected scope string.
        scope: String,
    },

    /// The file exceeds the largest object the configured chunk limits allow.
    #[error("file of {size} bytes exceeds the maximum upload size of {max_bytes} bytes")]
    FileTooLarge {
        /// Size of the rejected file.
        size: u64,
        /// `max_chunk_count_allowed × chunk_size_bytes`.
        max_bytes: u64,
    },

    /// Configuration values are invalid.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// What was wrong.
        message: String,
    },

    /// The access token kept expiring after every allowed refresh.
    #[error("[{request_id}] access token still rejected after {attempts} refresh attempt(s)")]
    TokenRefreshExhausted {
        /// Correlation id of the failed transfer.
        request_id: RequestId,
        /// Refreshes performed before giving up.
        attempts: u32,
        /// The last expiry response.
        #[source]
        source: ServiceError,
    },

    /// Signed URLs kept expiring after every allowed renewal.
    #[error(
        "[{request_id}] signed URL for chunk {chunk_index} still rejected after {attempts} renewal(s)"
    )]
    UrlRenewalExhausted {
        /// Correlation id of the failed transfer.
        request_id: RequestId,
        /// Chunk that could not be transferred.
        chunk_index: u32,
        /// Renewals performed before giving up.
        attempts: u32,
    },

    /// The object exists but its parts have not been assembled yet.
    #[error("[{request_id}] object is not ready for download (status '{status}')")]
    ObjectNotReady {
        /// Correlation id of the failed transfer.
        request_id: RequestId,
        /// Status reported by the storage service.
        status: String,
    },

    /// The storage service or backend rejected a request.
    ///
    /// HTTP status and body are reachable through [`ServiceError::http_status`]
    /// and [`ServiceError::body`] on the source.
    #[error("[{request_id}] storage request failed: {source}")]
    StorageApi {
        /// Correlation id of the failed transfer.
        request_id: RequestId,
        /// The rejected request.
        #[source]
        source: ServiceError,
    },

    /// A chunk PUT kept failing at the transport level.
    #[error(
        "[{request_id}] chunk {chunk_index} upload failed after {attempts} attempt(s): {source}"
    )]
    ChunkUploadFailed {
        /// Correlation id of the failed transfer.
        request_id: RequestId,
        /// Chunk that could not be uploaded.
        chunk_index: u32,
        /// Attempts made.
        attempts: u32,
        /// The last transport failure.
        #[source]
        source: ServiceError,
    },

    /// A ranged GET failed at the transport level or returned the wrong byte count.
    #[error(
        "[{request_id}] chunk {chunk_index} download failed after {attempts} attempt(s): {source}"
    )]
    ChunkDownloadFailed {
        /// Correlation id of the failed transfer.
        request_id: RequestId,
        /// Chunk that could not be downloaded.
        chunk_index: u32,
        /// Attempts made.
        attempts: u32,
        /// The failure.
        #[source]
        source: ServiceError,
    },

    /// The authentication provider could not mint a token.
    #[error("[{request_id}] access token refresh failed: {source}")]
    Authentication {
        /// Correlation id of the failed transfer.
        request_id: RequestId,
        /// The provider's error.
        #[source]
        source: ServiceError,
    },

    /// Reading the source or writing the destination failed.
    #[error("IO error on {}: {}", display_path(.path), .source)]
    Io {
        /// Local file path, or `None` for caller-supplied streams.
        path: Option<PathBuf>,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

impl TransferError {
    /// Creates an invalid-scope error.
    pub fn invalid_scope(scope: impl Into<String>) -> Self {
        Self::InvalidScope {
            scope: scope.into(),
        }
    }

    /// Creates an invalid-config error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Creates a storage API error.
    pub fn storage_api(request_id: &RequestId, source: ServiceError) -> Self {
        Self::StorageApi {
            request_id: request_id.clone(),
            source,
        }
    }

    /// Creates an IO error, optionally tied to a local path.
    pub fn io(path: Option<PathBuf>, source: std::io::Error) -> Self {
        Self::Io { path, source }
    }

    /// Returns the correlation id for errors raised during a transfer.
    #[must_use]
    pub fn request_id(&self) -> Option<&RequestId> {
        match self {
            Self::TokenRefreshExhausted { request_id, .. }
            | Self::UrlRenewalExhausted { request_id, .. }
            | Self::ObjectNotReady { request_id, .. }
            | Self::StorageApi { request_id, .. }
            | Self::ChunkUploadFailed { request_id, .. }
            | Self::ChunkDownloadFailed { request_id, .. }
            | Self::Authentication { request_id, .. } => Some(request_id),
            Self::InvalidScope { .. }
            | Self::FileTooLarge { .. }
            | Self::InvalidConfig { .. }
            | Self::Io { .. } => None,
        }
    }
}

fn display_path(path: &Option<PathBuf>) -> String {
    path.as_ref()
        .map_or_else(|| "stream".to_string(), |p| p.display().to_string())
}

// No blanket `From<ServiceError>` or `From<std::io::Error>`: every variant
// needs a request id or path the source error does not have.
