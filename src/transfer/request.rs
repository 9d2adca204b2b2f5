//! Per-call transfer inputs: request parameters, correlation id, progress.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

/// Correlation id attached to every log line and error of one transfer call.
///
/// Displayed as `{prefix}/{bucket_key}/{object_key}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId {
    prefix: String,
    bucket_key: String,
    object_key: String,
}

impl RequestId {
    /// Creates a request id from its parts.
    pub fn new(
        prefix: impl Into<String>,
        bucket_key: impl Into<String>,
        object_key: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            bucket_key: bucket_key.into(),
            object_key: object_key.into(),
        }
    }

    /// Derives the id for a request, generating a random prefix when none was given.
    #[must_use]
    pub fn for_request(request: &TransferRequest) -> Self {
        let prefix = request
            .request_id_prefix
            .clone()
            .filter(|p| !p.is_empty())
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());
        Self::new(prefix, &request.bucket_key, &request.object_key)
    }

    /// Returns the correlation prefix.
    #[must_use]
    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Returns the bucket key.
    #[must_use]
    pub fn bucket_key(&self) -> &str {
        &self.bucket_key
    }

    /// Returns the object key.
    #[must_use]
    pub fn object_key(&self) -> &str {
        &self.object_key
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.prefix, self.bucket_key, self.object_key)
    }
}

/// Progress snapshot delivered to a [`ProgressCallback`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferProgress {
    /// Whole percent complete, 0-100.
    pub percent: u8,
    /// Chunks transferred so far.
    pub completed_chunks: u32,
    /// Chunks in the transfer.
    pub total_chunks: u32,
}

impl TransferProgress {
    /// Creates a snapshot with `percent = floor(completed / total × 100)`.
    #[must_use]
    pub fn new(completed_chunks: u32, total_chunks: u32) -> Self {
        let percent = if total_chunks == 0 {
            100
        } else {
            u64::from(completed_chunks) * 100 / u64::from(total_chunks)
        };
        Self {
            percent: u8::try_from(percent.min(100)).unwrap_or(100),
            completed_chunks,
            total_chunks,
        }
    }

    /// Caps the percentage, leaving the chunk counts untouched.
    #[must_use]
    pub fn capped(mut self, max_percent: u8) -> Self {
        self.percent = self.percent.min(max_percent);
        self
    }
}

/// Callback invoked with progress updates.
///
/// Called inline on the transfer task; keep it cheap.
pub type ProgressCallback = Arc<dyn Fn(TransferProgress) + Send + Sync>;

/// Parameters of one upload or download call.
///
/// The local file or stream is passed next to the request.
#[derive(Clone)]
pub struct TransferRequest {
    /// Bucket holding the object.
    pub bucket_key: String,
    /// Object key inside the bucket.
    pub object_key: String,
    /// Bearer token for the object storage API.
    pub access_token: String,
    /// Optional project scope, validated before any network call.
    pub project_scope: Option<String>,
    /// Correlation prefix; a random one is generated when absent.
    pub request_id_prefix: Option<String>,
    /// Cooperative cancellation signal.
    pub cancellation: CancellationToken,
    /// Optional progress sink.
    pub progress: Option<ProgressCallback>,
}

impl TransferRequest {
    /// Creates a request with no scope, a fresh cancellation token, and no progress sink.
    pub fn new(
        bucket_key: impl Into<String>,
        object_key: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            bucket_key: bucket_key.into(),
            object_key: object_key.into(),
            access_token: access_token.into(),
            project_scope: None,
            request_id_prefix: None,
            cancellation: CancellationToken::new(),
            progress: None,
        }
    }

    /// Sets the project scope.
    #[must_use]
    pub fn with_scope(mut self, scope: impl Into<String>) -> Self {
        self.project_scope = Some(scope.into());
        self
    }

    /// Sets the correlation prefix.
    #[must_use]
    pub fn with_request_id_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.request_id_prefix = Some(prefix.into());
        self
    }

    /// Uses the given cancellation token.
    #[must_use]
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    /// Registers a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }
}

impl fmt::Debug for TransferRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransferRequest")
            .field("bucket_key", &self.bucket_key)
            .field("object_key", &self.object_key)
            .field("project_scope", &self.project_scope)
            .field("request_id_prefix", &self.request_id_prefix)
            .field("cancelled", &self.cancellation.is_cancelled())
            .field("has_progress", &self.progress.is_some())
            .finish_non_exhaustive()
    }
}
