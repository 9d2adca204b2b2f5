//! Multipart upload engine.
//!
//! Reads the source one chunk at a time, PUTs each chunk to its signed part
//! URL, then completes the upload. Per chunk:
//!
//! 1. take the head URL from the session, fetching a batch if none is queued
//! 2. PUT the chunk
//! 3. status below 400: pop the URL, report progress; 403: drop queued URLs and renew;
//!    transport failure: back off and resend to the same URL; anything else
//!    ends the transfer

use std::path::Path;

use tokio::io::{AsyncRead, AsyncReadExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::chunk::{ChunkPlan, ChunkRange};
use super::request::{RequestId, TransferProgress, TransferRequest};
use super::retry::{FailureType, RetryDecision, RetryPolicy, classify_error};
use super::session::{ObjectTarget, TokenSession, UploadSession, cancellable};
use super::{SignedUrlTransport, TransferError, TransferOutcome};
use crate::api::{AuthProvider, ObjectDetails, ObjectStorageApi, Service, ServiceError};
use crate::config::TransferConfig;

/// Highest percentage reported before the upload is completed server-side.
const MAX_PERCENT_BEFORE_COMPLETE: u8 = 99;

/// Upload engine bound to one facade's collaborators.
pub(crate) struct UploadEngine<'a> {
    config: &'a TransferConfig,
    api: &'a dyn ObjectStorageApi,
    auth: &'a dyn AuthProvider,
    transport: &'a dyn SignedUrlTransport,
    retry: RetryPolicy,
}

impl<'a> UploadEngine<'a> {
    pub(crate) fn new(
        config: &'a TransferConfig,
        api: &'a dyn ObjectStorageApi,
        auth: &'a dyn AuthProvider,
        transport: &'a dyn SignedUrlTransport,
    ) -> Self {
        Self {
            config,
            api,
            auth,
            transport,
            retry: RetryPolicy::with_max_attempts(config.max_chunk_transport_attempts),
        }
    }

    /// Uploads `size` bytes from `reader` as one object.
    #[instrument(skip_all, fields(request_id = %request_id, size = size))]
    pub(crate) async fn run<R>(
        &self,
        request: &TransferRequest,
        request_id: &RequestId,
        reader: &mut R,
        size: u64,
        path: Option<&Path>,
    ) -> Result<TransferOutcome<ObjectDetails>, TransferError>
    where
        R: AsyncRead + Unpin + Send,
    {
        let cancel = &request.cancellation;
        let plan = ChunkPlan::new(size, self.config.chunk_size_bytes)?;
        let total_chunks = plan.total_chunks();
        info!(total_chunks, chunk_size = plan.chunk_size(), "starting upload");

        let tokens = TokenSession::new(
            self.auth,
            request.access_token.clone(),
            self.config.max_retry_on_token_expiry,
            request_id.clone(),
        );
        let target = ObjectTarget {
            bucket_key: request.bucket_key.clone(),
            object_key: request.object_key.clone(),
            scope: request.project_scope.clone(),
        };
        let mut session = UploadSession::new(
            self.api,
            tokens,
            target,
            self.config.upload_batch_size,
            total_chunks,
        );

        let capacity = usize::try_from(plan.chunk_size().min(size)).unwrap_or(0);
        let mut buffer = Vec::with_capacity(capacity);
        for chunk in plan.chunks() {
            if cancel.is_cancelled() {
                info!(chunk = chunk.index, "upload cancelled before reading chunk");
                return Ok(TransferOutcome::Cancelled);
            }
            read_chunk(reader, &mut buffer, &chunk, path).await?;

            let outcome = self
                .put_chunk(&mut session, &chunk, &buffer, request_id, cancel)
                .await?;
            if outcome.is_cancelled() {
                info!(chunk = chunk.index, "upload cancelled during chunk");
                return Ok(TransferOutcome::Cancelled);
            }
            session.chunk_uploaded();

            let progress = TransferProgress::new(chunk.index + 1, total_chunks)
                .capped(MAX_PERCENT_BEFORE_COMPLETE);
            debug!(
                chunk = chunk.index,
                percent = progress.percent,
                "chunk uploaded"
            );
            report(request, progress);
        }

        if cancel.is_cancelled() {
            return Ok(TransferOutcome::Cancelled);
        }
        let TransferOutcome::Completed(details) = session.complete(cancel).await? else {
            return Ok(TransferOutcome::Cancelled);
        };
        report(request, TransferProgress::new(total_chunks, total_chunks));
        info!(
            object_id = details.object_id.as_deref().unwrap_or_default(),
            token_refreshes = session.tokens().refreshes(),
            "upload completed"
        );
        Ok(TransferOutcome::Completed(details))
    }

    async fn put_chunk(
        &self,
        session: &mut UploadSession<'_>,
        chunk: &ChunkRange,
        body: &[u8],
        request_id: &RequestId,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome<()>, TransferError> {
        let max_renewals = self.config.max_retry_on_url_expiry;
        let mut renewals = 0;
        let mut attempt = 1;

        loop {
            let TransferOutcome::Completed(url) = session.url_for(chunk, cancel).await? else {
                return Ok(TransferOutcome::Cancelled);
            };
            if cancel.is_cancelled() {
                return Ok(TransferOutcome::Cancelled);
            }
            let Some(result) = cancellable(cancel, self.transport.put(&url, body.to_vec())).await
            else {
                return Ok(TransferOutcome::Cancelled);
            };

            let error = match result {
                Ok(response) if response.status < 400 => {
                    return Ok(TransferOutcome::Completed(()));
                }
                Ok(response) => {
                    ServiceError::status(Service::SignedUrl, response.status, response.body_text())
                }
                Err(error) => error,
            };

            match classify_error(&error) {
                FailureType::UrlExpired => {
                    if renewals >= max_renewals {
                        warn!(chunk = chunk.index, renewals, "signed URL renewals exhausted");
                        return Err(TransferError::UrlRenewalExhausted {
                            request_id: request_id.clone(),
                            chunk_index: chunk.index,
                            attempts: renewals,
                        });
                    }
                    renewals += 1;
                    info!(
                        chunk = chunk.index,
                        renewal = renewals,
                        max = max_renewals,
                        "signed upload URL expired, renewing"
                    );
                    session.invalidate_urls();
                }
                FailureType::Transient => {
                    match self.retry.should_retry(FailureType::Transient, attempt) {
                        RetryDecision::Retry {
                            delay,
                            attempt: next_attempt,
                        } => {
                            warn!(
                                chunk = chunk.index,
                                attempt,
                                delay_ms = delay.as_millis(),
                                error = %error,
                                "chunk PUT failed, retrying"
                            );
                            if cancellable(cancel, tokio::time::sleep(delay)).await.is_none() {
                                return Ok(TransferOutcome::Cancelled);
                            }
                            attempt = next_attempt;
                        }
                        RetryDecision::DoNotRetry { reason } => {
                            warn!(chunk = chunk.index, attempt, %reason, "chunk PUT failed");
                            return Err(TransferError::ChunkUploadFailed {
                                request_id: request_id.clone(),
                                chunk_index: chunk.index,
                                attempts: attempt,
                                source: error,
                            });
                        }
                    }
                }
                FailureType::Permanent | FailureType::TokenExpired => {
                    return Err(TransferError::storage_api(request_id, error));
                }
            }
        }
    }
}

async fn read_chunk<R>(
    reader: &mut R,
    buffer: &mut Vec<u8>,
    chunk: &ChunkRange,
    path: Option<&Path>,
) -> Result<(), TransferError>
where
    R: AsyncRead + Unpin + Send,
{
    let len = usize::try_from(chunk.len()).map_err(|_| {
        TransferError::invalid_config(format!(
            "chunk of {} bytes does not fit in memory",
            chunk.len()
        ))
    })?;
    buffer.resize(len, 0);
    reader
        .read_exact(buffer)
        .await
        .map_err(|e| TransferError::io(path.map(Path::to_path_buf), e))?;
    Ok(())
}

fn report(request: &TransferRequest, progress: TransferProgress) {
    if let Some(callback) = &request.progress {
        callback(progress);
    }
}
