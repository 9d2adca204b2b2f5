//! Object storage API client for signed-URL multipart transfers.
//!
//! Implements the three endpoints the transfer core needs:
//!
//! - `GET  /oss/v2/buckets/{bucket}/objects/{object}/signeds3upload` - batch of part URLs
//! - `POST /oss/v2/buckets/{bucket}/objects/{object}/signeds3upload` - complete upload
//! - `GET  /oss/v2/buckets/{bucket}/objects/{object}/signeds3download` - download URL

use async_trait::async_trait;
use reqwest::Client;
use reqwest::header::AUTHORIZATION;
use serde::Serialize;
use tracing::{debug, instrument};
use url::Url;

use super::{
    ObjectDetails, ObjectStorageApi, Service, ServiceError, SignedDownload, SignedUploadUrls,
    UploadUrlsRequest,
};
use crate::http_client::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS, build_http_client, send_json};

/// Default platform API base URL.
pub const DEFAULT_BASE_URL: &str = "https://developer.api.autodesk.com";

/// Header carrying the project scope of a storage request.
pub const SCOPE_HEADER: &str = "x-ads-acm-scopes";

/// Default lifetime of issued signed URLs (the service maximum).
const DEFAULT_URL_EXPIRATION_MINUTES: u32 = 60;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CompleteUploadBody<'a> {
    upload_key: &'a str,
}

/// Object storage REST client backed by reqwest.
///
/// Cheap to clone; clones share the connection pool.
#[derive(Debug, Clone)]
pub struct OssClient {
    client: Client,
    base_url: String,
    url_expiration_minutes: u32,
}

impl OssClient {
    /// Creates a client against [`DEFAULT_BASE_URL`] with default timeouts.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidRequest`] if the HTTP client cannot be built.
    pub fn new() -> Result<Self, ServiceError> {
        Self::with_base_url(DEFAULT_BASE_URL)
    }

    /// Creates a client against a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidRequest`] if the base URL is not an
    /// absolute http(s) URL or the HTTP client cannot be built.
    pub fn with_base_url(base_url: &str) -> Result<Self, ServiceError> {
        let client = build_http_client(
            Service::ObjectStorage,
            CONNECT_TIMEOUT_SECS,
            READ_TIMEOUT_SECS,
        )?;
        Self::with_client(client, base_url)
    }

    /// Creates a client from an existing reqwest client.
    ///
    /// # Errors
    ///
    /// Returns [`ServiceError::InvalidRequest`] if the base URL is invalid.
    pub fn with_client(client: Client, base_url: &str) -> Result<Self, ServiceError> {
        let parsed = Url::parse(base_url).map_err(|e| {
            ServiceError::invalid_request(
                Service::ObjectStorage,
                format!("invalid base URL '{base_url}': {e}"),
            )
        })?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(ServiceError::invalid_request(
                Service::ObjectStorage,
                format!("base URL must be http or https: {base_url}"),
            ));
        }
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            url_expiration_minutes: DEFAULT_URL_EXPIRATION_MINUTES,
        })
    }

    /// Sets the lifetime requested for signed URLs, in minutes.
    #[must_use]
    pub fn url_expiration_minutes(mut self, minutes: u32) -> Self {
        self.url_expiration_minutes = minutes;
        self
    }

    /// Returns the configured base URL.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn object_url(
        &self,
        bucket_key: &str,
        object_key: &str,
        action: &str,
    ) -> Result<Url, ServiceError> {
        let raw = format!(
            "{}/oss/v2/buckets/{}/objects/{}/{action}",
            self.base_url,
            urlencoding::encode(bucket_key),
            urlencoding::encode(object_key),
        );
        Url::parse(&raw).map_err(|e| {
            ServiceError::invalid_request(
                Service::ObjectStorage,
                format!("invalid object URL '{raw}': {e}"),
            )
        })
    }
}

#[async_trait]
impl ObjectStorageApi for OssClient {
    #[instrument(
        skip(self, request, access_token),
        fields(
            bucket = %request.bucket_key,
            object = %request.object_key,
            first_part = request.first_part,
            parts = request.parts
        )
    )]
    async fn request_upload_urls(
        &self,
        request: &UploadUrlsRequest,
        access_token: &str,
    ) -> Result<SignedUploadUrls, ServiceError> {
        let mut url = self.object_url(&request.bucket_key, &request.object_key, "signeds3upload")?;
        {
            let mut query = url.query_pairs_mut();
            query
                .append_pair("parts", &request.parts.to_string())
                .append_pair("firstPart", &request.first_part.to_string())
                .append_pair("minutesExpiration", &self.url_expiration_minutes.to_string());
            if let Some(upload_key) = &request.upload_key {
                query.append_pair("uploadKey", upload_key);
            }
        }

        let mut builder = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {access_token}"));
        if let Some(scope) = request.scope.as_deref().filter(|s| !s.is_empty()) {
            builder = builder.header(SCOPE_HEADER, scope);
        }

        let urls: SignedUploadUrls = send_json(Service::ObjectStorage, builder).await?;
        if urls.urls.is_empty() {
            return Err(ServiceError::invalid_response(
                Service::ObjectStorage,
                "signed upload response contained no URLs",
            ));
        }
        debug!(count = urls.urls.len(), "received signed upload URLs");
        Ok(urls)
    }

    #[instrument(
        skip(self, upload_key, access_token),
        fields(bucket = %bucket_key, object = %object_key)
    )]
    async fn complete_upload(
        &self,
        bucket_key: &str,
        object_key: &str,
        upload_key: &str,
        access_token: &str,
    ) -> Result<ObjectDetails, ServiceError> {
        let url = self.object_url(bucket_key, object_key, "signeds3upload")?;
        let builder = self
            .client
            .post(url)
            .header(AUTHORIZATION, format!("Bearer {access_token}"))
            .json(&CompleteUploadBody { upload_key });
        send_json(Service::ObjectStorage, builder).await
    }

    #[instrument(skip(self, access_token), fields(bucket = %bucket_key, object = %object_key))]
    async fn request_download_url(
        &self,
        bucket_key: &str,
        object_key: &str,
        scope: Option<&str>,
        access_token: &str,
    ) -> Result<SignedDownload, ServiceError> {
        let mut url = self.object_url(bucket_key, object_key, "signeds3download")?;
        url.query_pairs_mut()
            .append_pair("minutesExpiration", &self.url_expiration_minutes.to_string());

        let mut builder = self
            .client
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {access_token}"));
        if let Some(scope) = scope.filter(|s| !s.is_empty()) {
            builder = builder.header(SCOPE_HEADER, scope);
        }
        send_json(Service::ObjectStorage, builder).await
    }
}
