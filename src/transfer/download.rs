//! Ranged download engine.
//!
//! One signed URL covers the object. Chunks are fetched in order as
//! half-open ranges and appended to the sink, so writes never overlap.
//! A 403 renews the URL and retries the same range; bytes already written
//! stay written.

use std::path::Path;

use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::chunk::{ChunkPlan, ChunkRange};
use super::request::{RequestId, TransferProgress, TransferRequest};
use super::retry::{FailureType, classify_error};
use super::session::{DownloadSession, ObjectTarget, TokenSession, cancellable};
use super::{SignedUrlTransport, TransferError, TransferOutcome};
use crate::api::{AuthProvider, ObjectStorageApi, Service, ServiceError};
use crate::config::TransferConfig;

/// Summary of a completed download.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadSummary {
    /// Object size reported by the storage service.
    pub object_size: u64,
    /// Bytes written to the sink; equals `object_size`.
    pub bytes_written: u64,
    /// Ranged requests needed, one per chunk.
    pub total_chunks: u32,
}

/// Download engine bound to one facade's collaborators.
pub(crate) struct DownloadEngine<'a> {
    config: &'a TransferConfig,
    api: &'a dyn ObjectStorageApi,
    auth: &'a dyn AuthProvider,
    transport: &'a dyn SignedUrlTransport,
}

impl<'a> DownloadEngine<'a> {
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
        }
    }

    /// Fetches the signed URL, failing if the object is not assembled yet.
    #[instrument(skip_all, fields(request_id = %request_id))]
    pub(crate) async fn open(
        &self,
        request: &TransferRequest,
        request_id: &RequestId,
    ) -> Result<TransferOutcome<DownloadSession<'a>>, TransferError> {
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
        DownloadSession::open(self.api, tokens, target, &request.cancellation).await
    }

    /// Streams every chunk of the session's object into `writer`.
    #[instrument(skip_all, fields(request_id = %session.request_id(), size = session.total_size()))]
    pub(crate) async fn run<W>(
        &self,
        request: &TransferRequest,
        mut session: DownloadSession<'a>,
        writer: &mut W,
        path: Option<&Path>,
    ) -> Result<TransferOutcome<DownloadSummary>, TransferError>
    where
        W: AsyncWrite + Unpin + Send,
    {
        let cancel = &request.cancellation;
        let plan = ChunkPlan::new(session.total_size(), self.config.chunk_size_bytes)?;
        let total_chunks = plan.total_chunks();
        let io_error = |e| TransferError::io(path.map(Path::to_path_buf), e);

        if plan.total_size() == 0 {
            writer.flush().await.map_err(io_error)?;
            report(request, TransferProgress::new(total_chunks, total_chunks));
            info!("object is empty, nothing to fetch");
            return Ok(TransferOutcome::Completed(DownloadSummary {
                object_size: 0,
                bytes_written: 0,
                total_chunks,
            }));
        }
        info!(total_chunks, chunk_size = plan.chunk_size(), "starting download");

        for chunk in plan.chunks() {
            if cancel.is_cancelled() {
                info!(chunk = chunk.index, "download cancelled before chunk");
                return Ok(TransferOutcome::Cancelled);
            }
            let TransferOutcome::Completed(bytes) =
                self.fetch_range(&mut session, &chunk, cancel).await?
            else {
                info!(chunk = chunk.index, "download cancelled during chunk");
                return Ok(TransferOutcome::Cancelled);
            };
            writer.write_all(&bytes).await.map_err(io_error)?;
            session.record_written(chunk.len());

            let progress = TransferProgress::new(chunk.index + 1, total_chunks);
            debug!(
                chunk = chunk.index,
                percent = progress.percent,
                bytes_written = session.bytes_written(),
                "chunk downloaded"
            );
            report(request, progress);
        }
        writer.flush().await.map_err(io_error)?;

        Ok(TransferOutcome::Completed(DownloadSummary {
            object_size: session.total_size(),
            bytes_written: session.bytes_written(),
            total_chunks,
        }))
    }

    async fn fetch_range(
        &self,
        session: &mut DownloadSession<'_>,
        chunk: &ChunkRange,
        cancel: &CancellationToken,
    ) -> Result<TransferOutcome<Vec<u8>>, TransferError> {
        let max_renewals = self.config.max_retry_on_url_expiry;
        let mut renewals = 0;

        loop {
            if cancel.is_cancelled() {
                return Ok(TransferOutcome::Cancelled);
            }
            let Some(result) = cancellable(
                cancel,
                self.transport.get_range(session.url(), chunk.start, chunk.end),
            )
            .await
            else {
                return Ok(TransferOutcome::Cancelled);
            };

            let response = match result {
                Ok(response) => response,
                Err(source) => {
                    warn!(chunk = chunk.index, error = %source, "ranged GET failed");
                    return Err(chunk_failed(session.request_id(), chunk, source));
                }
            };

            if response.is_success() {
                if response.body.len() as u64 != chunk.len() {
                    let source = ServiceError::invalid_response(
                        Service::SignedUrl,
                        format!(
                            "expected {} bytes for range [{}, {}), received {}",
                            chunk.len(),
                            chunk.start,
                            chunk.end,
                            response.body.len()
                        ),
                    );
                    return Err(chunk_failed(session.request_id(), chunk, source));
                }
                return Ok(TransferOutcome::Completed(response.body));
            }

            let error =
                ServiceError::status(Service::SignedUrl, response.status, response.body_text());
            if classify_error(&error) != FailureType::UrlExpired {
                return Err(TransferError::storage_api(session.request_id(), error));
            }
            if renewals >= max_renewals {
                warn!(chunk = chunk.index, renewals, "signed URL renewals exhausted");
                return Err(TransferError::UrlRenewalExhausted {
                    request_id: session.request_id().clone(),
                    chunk_index: chunk.index,
                    attempts: renewals,
                });
            }
            renewals += 1;
            info!(
                chunk = chunk.index,
                renewal = renewals,
                max = max_renewals,
                "signed download URL expired, renewing"
            );
            if session.renew(cancel).await?.is_cancelled() {
                return Ok(TransferOutcome::Cancelled);
            }
        }
    }
}

fn chunk_failed(request_id: &RequestId, chunk: &ChunkRange, source: ServiceError) -> TransferError {
    TransferError::ChunkDownloadFailed {
        request_id: request_id.clone(),
        chunk_index: chunk.index,
        attempts: 1,
        source,
    }
}

fn report(request: &TransferRequest, progress: TransferProgress) {
    if let Some(callback) = &request.progress {
        callback(progress);
    }
}
