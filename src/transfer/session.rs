//! Signed-URL session state and credential recovery.
//!
//! [`TokenSession`] owns the access token of one transfer and transparently
//! refreshes it when the object storage API rejects it as expired.
//! [`UploadSession`] and [`DownloadSession`] hold the signed URLs of one
//! transfer and renew them on request.
//!
//! Neither session checks budgets for signed-URL renewals; the engines count
//! those per chunk.

use std::collections::VecDeque;
use std::future::Future;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::chunk::ChunkRange;
use super::request::RequestId;
use super::{TransferError, TransferOutcome};
use crate::api::{
    AuthProvider, ObjectDetails, ObjectStorageApi, Service, ServiceError, SignedDownload,
    UploadUrlsRequest,
};

/// Runs `future` unless `cancel` fires first.
///
/// Returns `None` when cancelled; the future is dropped without being polled again.
pub(crate) async fn cancellable<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> Option<F::Output> {
    tokio::select! {
        biased;
        () = cancel.cancelled() => None,
        output = future => Some(output),
    }
}

/// Bucket, object and scope a session operates on.
#[derive(Debug, Clone)]
pub struct ObjectTarget {
    /// Bucket holding the object.
    pub bucket_key: String,
    /// Object key inside the bucket.
    pub object_key: String,
    /// Project scope sent with every API call.
    pub scope: Option<String>,
}

/// Access token of one transfer, refreshed on expiry.
pub struct TokenSession<'a> {
    auth: &'a dyn AuthProvider,
    access_token: String,
    max_refreshes: u32,
    request_id: RequestId,
    refreshes: u32,
}

impl<'a> TokenSession<'a> {
    /// Starts a session with the caller's token.
    ///
    /// Each logical API call may refresh at most `max_refreshes` times.
    pub fn new(
        auth: &'a dyn AuthProvider,
        access_token: impl Into<String>,
        max_refreshes: u32,
        request_id: RequestId,
    ) -> Self {
        Self {
            auth,
            access_token: access_token.into(),
            max_refreshes,
            request_id,
            refreshes: 0,
        }
    }

    /// The token used for the next call.
    #[must_use]
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Total refreshes performed so far in this transfer.
    #[must_use]
    pub fn refreshes(&self) -> u32 {
        self.refreshes
    }

    /// Invokes `call` with the current token, refreshing and resending on token expiry.
    ///
    /// A refreshed token replaces the current one for every later call.
    ///
    /// # Errors
    ///
    /// - [`TransferError::TokenRefreshExhausted`] once the token is still
    ///   rejected after `max_refreshes` refreshes
    /// - [`TransferError::Authentication`] if the refresh itself fails
    /// - [`TransferError::StorageApi`] for any other rejection
    pub async fn call<T, F, Fut>(
        &mut self,
        cancel: &CancellationToken,
        mut call: F,
    ) -> Result<TransferOutcome<T>, TransferError>
    where
        F: FnMut(String) -> Fut,
        Fut: Future<Output = Result<T, ServiceError>>,
    {
        let mut refreshes = 0;
        loop {
            if cancel.is_cancelled() {
                return Ok(TransferOutcome::Cancelled);
            }
            let Some(result) = cancellable(cancel, call(self.access_token.clone())).await else {
                return Ok(TransferOutcome::Cancelled);
            };
            let error = match result {
                Ok(value) => return Ok(TransferOutcome::Completed(value)),
                Err(error) if error.is_token_expired() => error,
                Err(error) => return Err(TransferError::storage_api(&self.request_id, error)),
            };

            if refreshes >= self.max_refreshes {
                warn!(
                    request_id = %self.request_id,
                    attempts = refreshes,
                    "access token still expired, giving up"
                );
                return Err(TransferError::TokenRefreshExhausted {
                    request_id: self.request_id.clone(),
                    attempts: refreshes,
                    source: error,
                });
            }

            info!(
                request_id = %self.request_id,
                attempt = refreshes + 1,
                max = self.max_refreshes,
                "access token expired, refreshing"
            );
            let Some(token) = cancellable(cancel, self.auth.refresh_access_token()).await else {
                return Ok(TransferOutcome::Cancelled);
            };
            self.access_token = token.map_err(|source| TransferError::Authentication {
                request_id: self.request_id.clone(),
                source,
            })?;
            refreshes += 1;
            self.refreshes += 1;
        }
    }
}

/// Signed upload URLs of one multipart upload.
///
/// The URL at the head of the queue belongs to the chunk being uploaded and
/// stays there until that chunk succeeds.
#[derive(Debug, Default)]
pub struct UploadUrlQueue {
    upload_key: Option<String>,
    pending: VecDeque<String>,
    uploaded_chunks: u32,
}

impl UploadUrlQueue {
    /// Upload key of the multipart upload, once the first batch arrived.
    #[must_use]
    pub fn upload_key(&self) -> Option<&str> {
        self.upload_key.as_deref()
    }

    /// URL for the current chunk, if one is queued.
    #[must_use]
    pub fn current_url(&self) -> Option<&str> {
        self.pending.front().map(String::as_str)
    }

    /// Chunks uploaded so far.
    #[must_use]
    pub fn uploaded_chunks(&self) -> u32 {
        self.uploaded_chunks
    }

    /// Queues a new batch of URLs. The first batch fixes the upload key.
    pub fn accept_batch(&mut self, upload_key: String, urls: Vec<String>) {
        match &self.upload_key {
            None => self.upload_key = Some(upload_key),
            Some(existing) if *existing != upload_key => {
                debug!(
                    existing = %existing,
                    received = %upload_key,
                    "ignoring different upload key in later batch"
                );
            }
            Some(_) => {}
        }
        self.pending.extend(urls);
    }

    /// Pops the URL of the chunk that just succeeded.
    pub fn consume(&mut self) {
        if self.pending.pop_front().is_some() {
            self.uploaded_chunks += 1;
        }
    }

    /// Drops every queued URL after a 403; the upload key survives.
    pub fn invalidate(&mut self) {
        self.pending.clear();
    }
}

/// Upload side of the signed-URL session.
pub struct UploadSession<'a> {
    api: &'a dyn ObjectStorageApi,
    tokens: TokenSession<'a>,
    target: ObjectTarget,
    batch_size: u32,
    total_chunks: u32,
    urls: UploadUrlQueue,
}

impl<'a> UploadSession<'a> {
    /// Starts an upload session for `total_chunks` chunks.
    pub fn new(
        api: &'a dyn ObjectStorageApi,
        tokens: TokenSession<'a>,
        target: ObjectTarget,
        batch_size: u32,
        total_chunks: u32,
    ) -> Self {
        Self {
            api,
            tokens,
            target,
            batch_size: batch_size.max(1),
            total_chunks,
            urls: UploadUrlQueue::default(),
        }
    }

    /// Queued URL state.
    #[must_use]
    pub fn urls(&self) -> &UploadUrlQueue {
        &self.urls
    }

    /// Token state.
    #[must_use]
    pub fn tokens(&self) -> &TokenSession<'a> {
        &self.tokens
    }

    /// Batch request for the window starting at `chunk`.
    #[must_use]
    pub fn batch_request(&self, chunk: &ChunkRange) -> UploadUrlsRequest {
        let remaining = self.total_chunks.saturating_sub(chunk.index).max(1);
        UploadUrlsRequest {
            bucket_key: self.target.bucket_key.clone(),
            object_key: self.target.object_key.clone(),
            parts: self.batch_size.min(remaining),
            first_part: chunk.part_number(),
            upload_key: self.urls.upload_key.clone(),
            scope: self.target.scope.clone(),
        }
    }

    /// Returns the URL for `chunk`, fetching a new batch when the queue is empty.
    ///
    /// # Errors
    ///
    /// Propagates the token session's errors.
    pub async fn url_for(
        &mut self,
        chunk: &ChunkRange,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome<String>, TransferError> {
        if let Some(url) = self.urls.current_url() {
            return Ok(TransferOutcome::Completed(url.to_string()));
        }

        let request = self.batch_request(chunk);
        debug!(
            first_part = request.first_part,
            parts = request.parts,
            "requesting signed upload URLs"
        );
        let api = self.api;
        let request = &request;
        let outcome = self
            .tokens
            .call(cancel, move |token| async move {
                api.request_upload_urls(request, &token).await
            })
            .await?;
        let TransferOutcome::Completed(batch) = outcome else {
            return Ok(TransferOutcome::Cancelled);
        };

        self.urls.accept_batch(batch.upload_key, batch.urls);
        match self.urls.current_url() {
            Some(url) => Ok(TransferOutcome::Completed(url.to_string())),
            None => Err(TransferError::storage_api(
                &self.tokens.request_id,
                ServiceError::invalid_response(
                    Service::ObjectStorage,
                    "signed upload response contained no URLs",
                ),
            )),
        }
    }

    /// Marks the current chunk uploaded.
    pub fn chunk_uploaded(&mut self) {
        self.urls.consume();
    }

    /// Forgets queued URLs after a signed URL expired.
    pub fn invalidate_urls(&mut self) {
        self.urls.invalidate();
    }

    /// Assembles the uploaded parts into the final object.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::StorageApi`] if no batch was ever received,
    /// plus the token session's errors.
    pub async fn complete(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome<ObjectDetails>, TransferError> {
        let Some(upload_key) = self.urls.upload_key.clone() else {
            return Err(TransferError::storage_api(
                &self.tokens.request_id,
                ServiceError::invalid_request(
                    Service::ObjectStorage,
                    "cannot complete an upload that never received an upload key",
                ),
            ));
        };
        let api = self.api;
        let target = &self.target;
        let upload_key = upload_key.as_str();
        self.tokens
            .call(cancel, move |token| async move {
                api.complete_upload(&target.bucket_key, &target.object_key, upload_key, &token)
                    .await
            })
            .await
    }
}

/// Download side of the signed-URL session.
///
/// One URL covers the whole object; a renewal replaces it.
pub struct DownloadSession<'a> {
    api: &'a dyn ObjectStorageApi,
    tokens: TokenSession<'a>,
    target: ObjectTarget,
    url: String,
    total_size: u64,
    bytes_written: u64,
}

impl std::fmt::Debug for DownloadSession<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DownloadSession")
            .field("target", &self.target)
            .field("total_size", &self.total_size)
            .field("bytes_written", &self.bytes_written)
            .finish_non_exhaustive()
    }
}

impl<'a> DownloadSession<'a> {
    /// Fetches the download URL and checks the object is assembled.
    ///
    /// # Errors
    ///
    /// - [`TransferError::ObjectNotReady`] unless the status is `complete`
    /// - [`TransferError::StorageApi`] if a complete object comes without a URL
    /// - the token session's errors
    pub async fn open(
        api: &'a dyn ObjectStorageApi,
        mut tokens: TokenSession<'a>,
        target: ObjectTarget,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome<Self>, TransferError> {
        let TransferOutcome::Completed(signed) =
            fetch_download(api, &mut tokens, &target, cancel).await?
        else {
            return Ok(TransferOutcome::Cancelled);
        };
        let (url, total_size) = checked_download(signed, &tokens.request_id)?;
        Ok(TransferOutcome::Completed(Self {
            api,
            tokens,
            target,
            url,
            total_size,
            bytes_written: 0,
        }))
    }

    /// Signed URL for ranged reads.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Object size reported when the session opened.
    #[must_use]
    pub fn total_size(&self) -> u64 {
        self.total_size
    }

    /// Bytes written to the sink so far.
    #[must_use]
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// Records bytes written to the sink.
    pub fn record_written(&mut self, bytes: u64) {
        self.bytes_written += bytes;
    }

    /// Correlation id of the transfer.
    #[must_use]
    pub fn request_id(&self) -> &RequestId {
        &self.tokens.request_id
    }

    /// Re-fetches the download URL after a 403, keeping the byte cursor.
    ///
    /// # Errors
    ///
    /// Same as [`DownloadSession::open`], plus [`TransferError::StorageApi`]
    /// if the object size changed underneath the transfer.
    pub async fn renew(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome<()>, TransferError> {
        let TransferOutcome::Completed(signed) =
            fetch_download(self.api, &mut self.tokens, &self.target, cancel).await?
        else {
            return Ok(TransferOutcome::Cancelled);
        };
        let (url, total_size) = checked_download(signed, &self.tokens.request_id)?;
        if total_size != self.total_size {
            return Err(TransferError::storage_api(
                &self.tokens.request_id,
                ServiceError::invalid_response(
                    Service::ObjectStorage,
                    format!(
                        "object size changed from {} to {total_size} bytes during download",
                        self.total_size
                    ),
                ),
            ));
        }
        self.url = url;
        Ok(TransferOutcome::Completed(()))
    }
}

async fn fetch_download(
    api: &dyn ObjectStorageApi,
    tokens: &mut TokenSession<'_>,
    target: &ObjectTarget,
    cancel: &CancellationToken,
) -> Result<TransferOutcome<SignedDownload>, TransferError> {
    tokens
        .call(cancel, move |token| async move {
            api.request_download_url(
                &target.bucket_key,
                &target.object_key,
                target.scope.as_deref(),
                &token,
            )
            .await
        })
        .await
}

fn checked_download(
    signed: SignedDownload,
    request_id: &RequestId,
) -> Result<(String, u64), TransferError> {
    if !signed.is_complete() {
        return Err(TransferError::ObjectNotReady {
            request_id: request_id.clone(),
            status: signed.status,
        });
    }
    let url = signed.url.filter(|u| !u.is_empty()).ok_or_else(|| {
        TransferError::storage_api(
            request_id,
            ServiceError::invalid_response(
                Service::ObjectStorage,
                "complete object returned no download URL",
            ),
        )
    })?;
    Ok((url, signed.size))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct CountingAuth {
        calls: AtomicU32,
    }

    #[async_trait]
    impl AuthProvider for CountingAuth {
        async fn refresh_access_token(&self) -> Result<String, ServiceError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(format!("token-{n}"))
        }
    }

    fn expired() -> ServiceError {
        ServiceError::status(Service::ObjectStorage, 401, "The token is invalid or expired")
    }

    fn request_id() -> RequestId {
        RequestId::new("t", "b", "o")
    }

    #[tokio::test]
    async fn test_token_session_refreshes_then_succeeds() {
        let auth = CountingAuth {
            calls: AtomicU32::new(0),
        };
        let mut tokens = TokenSession::new(&auth, "token-0", 3, request_id());
        let seen = Mutex::new(Vec::new());
        let cancel = CancellationToken::new();

        let outcome = tokens
            .call(&cancel, |token| {
                seen.lock().unwrap().push(token.clone());
                async move {
                    if token == "token-0" {
                        Err(expired())
                    } else {
                        Ok(token)
                    }
                }
            })
            .await
            .unwrap();

        assert_eq!(outcome, TransferOutcome::Completed("token-1".to_string()));
        assert_eq!(*seen.lock().unwrap(), vec!["token-0", "token-1"]);
        assert_eq!(tokens.access_token(), "token-1");
        assert_eq!(tokens.refreshes(), 1);
    }

    #[tokio::test]
    async fn test_token_session_exhausts_budget() {
        let auth = CountingAuth {
            calls: AtomicU32::new(0),
        };
        let mut tokens = TokenSession::new(&auth, "token-0", 2, request_id());
        let cancel = CancellationToken::new();

        let err = tokens
            .call(&cancel, |_token| async { Err::<(), _>(expired()) })
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            TransferError::TokenRefreshExhausted { attempts: 2, .. }
        ));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_token_session_does_not_refresh_other_errors() {
        let auth = CountingAuth {
            calls: AtomicU32::new(0),
        };
        let mut tokens = TokenSession::new(&auth, "token-0", 3, request_id());
        let cancel = CancellationToken::new();

        let err = tokens
            .call(&cancel, |_token| async {
                Err::<(), _>(ServiceError::status(Service::ObjectStorage, 404, "no such bucket"))
            })
            .await
            .unwrap_err();

        assert!(matches!(err, TransferError::StorageApi { .. }));
        assert_eq!(auth.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_token_session_observes_cancellation() {
        let auth = CountingAuth {
            calls: AtomicU32::new(0),
        };
        let mut tokens = TokenSession::new(&auth, "token-0", 3, request_id());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let outcome = tokens
            .call(&cancel, |_token| async { Ok::<_, ServiceError>(1) })
            .await
            .unwrap();
        assert!(outcome.is_cancelled());
    }

    #[test]
    fn test_url_queue_keeps_first_upload_key() {
        let mut queue = UploadUrlQueue::default();
        queue.accept_batch("key-1".to_string(), vec!["u1".to_string()]);
        queue.consume();
        queue.accept_batch("key-2".to_string(), vec!["u2".to_string()]);
        assert_eq!(queue.upload_key(), Some("key-1"));
        assert_eq!(queue.current_url(), Some("u2"));
        assert_eq!(queue.uploaded_chunks(), 1);
    }

    #[test]
    fn test_url_queue_invalidate_keeps_key_and_count() {
        let mut queue = UploadUrlQueue::default();
        queue.accept_batch("key-1".to_string(), vec!["u1".to_string(), "u2".to_string()]);
        queue.consume();
        queue.invalidate();
        assert!(queue.current_url().is_none());
        assert_eq!(queue.upload_key(), Some("key-1"));
        assert_eq!(queue.uploaded_chunks(), 1);
    }

    #[test]
    fn test_checked_download_rejects_incomplete() {
        let signed = SignedDownload {
            status: "chunked".to_string(),
            url: None,
            size: 0,
        };
        let err = checked_download(signed, &request_id()).unwrap_err();
        assert!(matches!(err, TransferError::ObjectNotReady { status, .. } if status == "chunked"));
    }

    #[test]
    fn test_checked_download_requires_url() {
        let signed = SignedDownload {
            status: "complete".to_string(),
            url: None,
            size: 10,
        };
        assert!(matches!(
            checked_download(signed, &request_id()),
            Err(TransferError::StorageApi { .. })
        ));
    }
}
