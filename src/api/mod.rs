//! Collaborator services consumed by the transfer core.
//!
//! The transfer engines only talk to the platform through two traits:
//!
//! - [`ObjectStorageApi`] - issues signed upload/download URLs and completes
//!   multipart uploads
//! - [`AuthProvider`] - mints a fresh access token when the current one expires
//!
//! [`OssClient`] and [`ClientCredentialsProvider`] are the reqwest-backed
//! implementations. Tests substitute in-memory fakes.

mod auth;
mod error;
mod oss;

pub use auth::{
    ClientCredentialsProvider, DEFAULT_AUTH_BASE_URL, StaticTokenProvider, TokenResponse,
};
pub use error::{BoxError, Service, ServiceError, TOKEN_EXPIRED_MESSAGE};
pub use oss::{DEFAULT_BASE_URL, OssClient, SCOPE_HEADER};

use async_trait::async_trait;
use serde::Deserialize;

/// Object status reported by the download URL endpoint once all parts are assembled.
pub const OBJECT_STATUS_COMPLETE: &str = "complete";

/// A window of signed upload URLs to request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadUrlsRequest {
    /// Bucket holding the object.
    pub bucket_key: String,
    /// Object key inside the bucket.
    pub object_key: String,
    /// Number of part URLs requested.
    pub parts: u32,
    /// 1-based part number of the first URL in the window.
    pub first_part: u32,
    /// Upload key of an already started multipart upload.
    pub upload_key: Option<String>,
    /// Project scope narrowing the authorization context.
    pub scope: Option<String>,
}

/// A batch of signed upload URLs.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignedUploadUrls {
    /// Identifies the multipart upload; stable across batches.
    pub upload_key: String,
    /// One URL per requested part, in part order.
    pub urls: Vec<String>,
}

/// A signed download URL and the state of the object it points to.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SignedDownload {
    /// Upload status of the object; only `complete` objects can be downloaded.
    pub status: String,
    /// Signed URL valid for the whole object.
    #[serde(default)]
    pub url: Option<String>,
    /// Object size in bytes.
    #[serde(default)]
    pub size: u64,
}

impl SignedDownload {
    /// Returns true if the object is fully assembled.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.status.eq_ignore_ascii_case(OBJECT_STATUS_COMPLETE)
    }
}

/// Object details returned when a multipart upload is completed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectDetails {
    /// Bucket holding the object.
    pub bucket_key: String,
    /// Object key inside the bucket.
    pub object_key: String,
    /// Platform-wide object URN.
    #[serde(default)]
    pub object_id: Option<String>,
    /// Final object size in bytes.
    #[serde(default)]
    pub size: Option<u64>,
    /// Content type recorded for the object.
    #[serde(default)]
    pub content_type: Option<String>,
    /// API location of the object.
    #[serde(default)]
    pub location: Option<String>,
}

/// Object storage operations needed by the transfer engines.
#[async_trait]
pub trait ObjectStorageApi: Send + Sync {
    /// Requests a batch of signed upload URLs.
    ///
    /// The first call of an upload omits `upload_key`; the service returns the
    /// key that later batches and the completion call must use.
    async fn request_upload_urls(
        &self,
        request: &UploadUrlsRequest,
        access_token: &str,
    ) -> Result<SignedUploadUrls, ServiceError>;

    /// Assembles the uploaded parts into the final object.
    async fn complete_upload(
        &self,
        bucket_key: &str,
        object_key: &str,
        upload_key: &str,
        access_token: &str,
    ) -> Result<ObjectDetails, ServiceError>;

    /// Requests a signed download URL for an object.
    async fn request_download_url(
        &self,
        bucket_key: &str,
        object_key: &str,
        scope: Option<&str>,
        access_token: &str,
    ) -> Result<SignedDownload, ServiceError>;
}

/// Source of fresh access tokens.
///
/// Implementations are shared across concurrent transfers and must tolerate
/// concurrent refresh calls.
#[async_trait]
pub trait AuthProvider: Send + Sync {
    /// Mints a new access token, discarding any cached one.
    async fn refresh_access_token(&self) -> Result<String, ServiceError>;
}
