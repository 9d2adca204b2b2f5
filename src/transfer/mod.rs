//! Chunked upload and ranged download through pre-signed URLs.
//!
//! [`FileTransfer`] is the entry point. Each call validates its inputs, opens a
//! signed-URL session and hands it to the upload or download engine, which
//! moves the object one chunk at a time:
//!
//! - uploads ask the object storage API for batches of part URLs, PUT each
//!   chunk, then complete the multipart upload
//! - downloads ask for one signed URL and issue contiguous ranged GETs
//!
//! Expired access tokens are refreshed through the [`AuthProvider`]; signed
//! URLs answering 403 are renewed. Both recoveries have their own budget from
//! [`TransferConfig`].
//!
//! Cancellation is cooperative via
//! [`CancellationToken`](tokio_util::sync::CancellationToken) and reported as
//! [`TransferOutcome::Cancelled`], never as an error.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! use oss_transfer::api::StaticTokenProvider;
//! use oss_transfer::{FileTransfer, TransferConfig, TransferOutcome, TransferRequest};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let auth = Arc::new(StaticTokenProvider::new("my-token"));
//! let transfer = FileTransfer::from_config(TransferConfig::default(), auth)?;
//!
//! let request = TransferRequest::new("my-bucket", "model.rvt", "my-token");
//! match transfer.upload(&request, Path::new("./model.rvt")).await? {
//!     TransferOutcome::Completed(object) => println!("uploaded {:?}", object.object_id),
//!     TransferOutcome::Cancelled => println!("cancelled"),
//! }
//! # Ok(())
//! # }
//! ```

mod chunk;
mod client;
mod download;
mod error;
mod request;
mod retry;
mod scope;
mod session;
mod upload;

pub use chunk::{ChunkPlan, ChunkRange};
pub use client::HttpTransport;
pub use download::DownloadSummary;
pub use error::TransferError;
pub use request::{ProgressCallback, RequestId, TransferProgress, TransferRequest};
pub use retry::{
    FailureType, RetryDecision, RetryPolicy, URL_EXPIRED_STATUS, classify_error, classify_status,
};
pub use scope::{validate_file_size, validate_scope};
pub use session::{
    DownloadSession, ObjectTarget, TokenSession, UploadSession, UploadUrlQueue,
};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tracing::{info, instrument};

use crate::api::{AuthProvider, ObjectDetails, ObjectStorageApi, OssClient, ServiceError};
use crate::config::TransferConfig;
use download::DownloadEngine;
use upload::UploadEngine;

/// Result of a transfer that was not aborted by an error.
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome<T> {
    /// Every chunk was transferred.
    Completed(T),
    /// The cancellation token fired; no further network calls were made.
    Cancelled,
}

impl<T> TransferOutcome<T> {
    /// Returns true if the transfer was cancelled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Returns true if the transfer completed.
    #[must_use]
    pub fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// Returns the completed value, or `None` if cancelled.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(value) => Some(value),
            Self::Cancelled => None,
        }
    }

    /// Maps the completed value.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> TransferOutcome<U> {
        match self {
            Self::Completed(value) => TransferOutcome::Completed(f(value)),
            Self::Cancelled => TransferOutcome::Cancelled,
        }
    }
}

/// Status and body of a signed-URL request.
///
/// Non-success statuses are values here; only transport failures are errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    /// HTTP status code.
    pub status: u16,
    /// Response body.
    pub body: Vec<u8>,
}

impl RawResponse {
    /// Creates a response.
    #[must_use]
    pub fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    /// Returns true for 2xx statuses.
    #[must_use]
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Body decoded as UTF-8, lossily.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Raw HTTP against pre-signed URLs.
#[async_trait]
pub trait SignedUrlTransport: Send + Sync {
    /// PUTs one chunk to a signed part URL.
    async fn put(&self, url: &str, body: Vec<u8>) -> Result<RawResponse, ServiceError>;

    /// GETs the half-open byte range `[start, end)` of a signed object URL.
    async fn get_range(&self, url: &str, start: u64, end: u64) -> Result<RawResponse, ServiceError>;
}

/// Upload and download facade.
///
/// Cheap to clone; clones share configuration and collaborators, so one
/// instance can serve concurrent transfers.
#[derive(Clone)]
pub struct FileTransfer {
    config: Arc<TransferConfig>,
    api: Arc<dyn ObjectStorageApi>,
    auth: Arc<dyn AuthProvider>,
    transport: Arc<dyn SignedUrlTransport>,
}

impl std::fmt::Debug for FileTransfer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileTransfer")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl FileTransfer {
    /// Creates a facade over explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidConfig`] if `config` does not validate.
    pub fn new(
        config: TransferConfig,
        api: Arc<dyn ObjectStorageApi>,
        auth: Arc<dyn AuthProvider>,
        transport: Arc<dyn SignedUrlTransport>,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            api,
            auth,
            transport,
        })
    }

    /// Creates a facade backed by [`OssClient`] and [`HttpTransport`].
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidConfig`] if `config` does not validate
    /// or the HTTP clients cannot be built from it.
    pub fn from_config(
        config: TransferConfig,
        auth: Arc<dyn AuthProvider>,
    ) -> Result<Self, TransferError> {
        config.validate()?;
        let http = crate::http_client::build_http_client(
            crate::api::Service::ObjectStorage,
            config.connect_timeout_secs,
            config.read_timeout_secs,
        )
        .map_err(|e| TransferError::invalid_config(e.to_string()))?;
        let api = OssClient::with_client(http, &config.base_url)
            .map_err(|e| TransferError::invalid_config(e.to_string()))?
            .url_expiration_minutes(config.url_expiration_minutes);
        let transport =
            HttpTransport::with_timeouts(config.connect_timeout_secs, config.read_timeout_secs)
                .map_err(|e| TransferError::invalid_config(e.to_string()))?;
        Self::new(config, Arc::new(api), auth, Arc::new(transport))
    }

    /// The configuration shared by every transfer of this facade.
    #[must_use]
    pub fn config(&self) -> &TransferConfig {
        &self.config
    }

    /// Uploads a local file.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidScope`] or [`TransferError::FileTooLarge`]
    /// before any network call, [`TransferError::Io`] if the file cannot be
    /// read, and the engine's errors otherwise.
    #[instrument(
        skip(self, request),
        fields(bucket = %request.bucket_key, object = %request.object_key)
    )]
    pub async fn upload(
        &self,
        request: &TransferRequest,
        path: &Path,
    ) -> Result<TransferOutcome<ObjectDetails>, TransferError> {
        validate_scope(request.project_scope.as_deref())?;
        let file = tokio::fs::File::open(path)
            .await
            .map_err(|e| TransferError::io(Some(path.to_path_buf()), e))?;
        let size = file
            .metadata()
            .await
            .map_err(|e| TransferError::io(Some(path.to_path_buf()), e))?
            .len();
        self.upload_source(request, file, size, Some(path.to_path_buf()))
            .await
    }

    /// Uploads `size` bytes read from `reader`.
    ///
    /// # Errors
    ///
    /// Same as [`FileTransfer::upload`]; a reader ending before `size` bytes
    /// is an [`TransferError::Io`] error.
    #[instrument(
        skip(self, request, reader),
        fields(bucket = %request.bucket_key, object = %request.object_key)
    )]
    pub async fn upload_from_reader<R>(
        &self,
        request: &TransferRequest,
        reader: R,
        size: u64,
    ) -> Result<TransferOutcome<ObjectDetails>, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_scope(request.project_scope.as_deref())?;
        self.upload_source(request, reader, size, None).await
    }

    async fn upload_source<R>(
        &self,
        request: &TransferRequest,
        mut reader: R,
        size: u64,
        path: Option<PathBuf>,
    ) -> Result<TransferOutcome<ObjectDetails>, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        validate_file_size(size, &self.config)?;
        let request_id = RequestId::for_request(request);
        let engine = UploadEngine::new(
            &self.config,
            self.api.as_ref(),
            self.auth.as_ref(),
            self.transport.as_ref(),
        );
        let outcome = engine
            .run(request, &request_id, &mut reader, size, path.as_deref())
            .await?;
        log_outcome(&request_id, "upload", &outcome);
        Ok(outcome)
    }

    /// Downloads an object into a local file, creating or truncating it.
    ///
    /// The file is only created once the object is known to be ready.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidScope`] before any network call,
    /// [`TransferError::ObjectNotReady`] if parts are not assembled yet,
    /// [`TransferError::Io`] if the file cannot be written, and the engine's
    /// errors otherwise.
    #[instrument(
        skip(self, request),
        fields(bucket = %request.bucket_key, object = %request.object_key)
    )]
    pub async fn download(
        &self,
        request: &TransferRequest,
        path: &Path,
    ) -> Result<TransferOutcome<DownloadSummary>, TransferError> {
        validate_scope(request.project_scope.as_deref())?;
        let request_id = RequestId::for_request(request);
        let engine = self.download_engine();
        let TransferOutcome::Completed(session) = engine.open(request, &request_id).await? else {
            log_outcome::<()>(&request_id, "download", &TransferOutcome::Cancelled);
            return Ok(TransferOutcome::Cancelled);
        };

        let file = tokio::fs::File::create(path)
            .await
            .map_err(|e| TransferError::io(Some(path.to_path_buf()), e))?;
        let mut writer = tokio::io::BufWriter::new(file);
        let outcome = engine
            .run(request, session, &mut writer, Some(path))
            .await?;
        writer
            .shutdown()
            .await
            .map_err(|e| TransferError::io(Some(path.to_path_buf()), e))?;
        log_outcome(&request_id, "download", &outcome);
        Ok(outcome)
    }

    /// Downloads an object into `writer`.
    ///
    /// # Errors
    ///
    /// Same as [`FileTransfer::download`].
    #[instrument(
        skip(self, request, writer),
        fields(bucket = %request.bucket_key, object = %request.object_key)
    )]
    pub async fn download_to_writer<W>(
        &self,
        request: &TransferRequest,
        mut writer: W,
    ) -> Result<TransferOutcome<DownloadSummary>, TransferError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        validate_scope(request.project_scope.as_deref())?;
        let request_id = RequestId::for_request(request);
        let engine = self.download_engine();
        let TransferOutcome::Completed(session) = engine.open(request, &request_id).await? else {
            log_outcome::<()>(&request_id, "download", &TransferOutcome::Cancelled);
            return Ok(TransferOutcome::Cancelled);
        };
        let outcome = engine.run(request, session, &mut writer, None).await?;
        log_outcome(&request_id, "download", &outcome);
        Ok(outcome)
    }

    fn download_engine(&self) -> DownloadEngine<'_> {
        DownloadEngine::new(
            &self.config,
            self.api.as_ref(),
            self.auth.as_ref(),
            self.transport.as_ref(),
        )
    }
}

fn log_outcome<T>(request_id: &RequestId, operation: &str, outcome: &TransferOutcome<T>) {
    match outcome {
        TransferOutcome::Completed(_) => info!(%request_id, operation, "transfer completed"),
        TransferOutcome::Cancelled => info!(%request_id, operation, "transfer cancelled"),
    }
}
