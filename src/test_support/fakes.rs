//! In-memory collaborators for engine tests.

use std::collections::{HashSet, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::api::{
    AuthProvider, ObjectDetails, ObjectStorageApi, Service, ServiceError, SignedDownload,
    SignedUploadUrls, UploadUrlsRequest,
};
use crate::transfer::{RawResponse, SignedUrlTransport};

pub const EXPIRED_TOKEN_BODY: &str = r#"{"developerMessage":"The token is invalid or expired"}"#;

fn expired_token() -> ServiceError {
    ServiceError::status(Service::ObjectStorage, 401, EXPIRED_TOKEN_BODY)
}

/// Auth provider minting `token-1`, `token-2`, ...
#[derive(Default)]
pub struct FakeAuth {
    refreshes: AtomicU32,
}

impl FakeAuth {
    pub fn refreshes(&self) -> u32 {
        self.refreshes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AuthProvider for FakeAuth {
    async fn refresh_access_token(&self) -> Result<String, ServiceError> {
        let n = self.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{n}"))
    }
}

#[derive(Default)]
struct StorageState {
    batch_requests: Vec<(UploadUrlsRequest, String)>,
    completions: Vec<(String, String)>,
    download_requests: Vec<String>,
    upload_keys: VecDeque<String>,
    api_errors: VecDeque<ServiceError>,
}

/// Object storage API issuing `mem://` URLs.
pub struct FakeStorage {
    state: Mutex<StorageState>,
    expired_tokens: Mutex<HashSet<String>>,
    download_status: String,
    object_size: u64,
    url_generation: AtomicU32,
}

impl FakeStorage {
    pub fn new(object_size: u64) -> Self {
        Self {
            state: Mutex::new(StorageState::default()),
            expired_tokens: Mutex::new(HashSet::new()),
            download_status: "complete".to_string(),
            object_size,
            url_generation: AtomicU32::new(0),
        }
    }

    pub fn with_download_status(mut self, status: &str) -> Self {
        self.download_status = status.to_string();
        self
    }

    /// Upload keys returned by successive batches; the last repeats.
    pub fn with_upload_keys(self, keys: &[&str]) -> Self {
        self.state.lock().unwrap().upload_keys = keys.iter().map(ToString::to_string).collect();
        self
    }

    /// Next API calls fail with these errors, in order.
    pub fn fail_next(&self, error: ServiceError) {
        self.state.lock().unwrap().api_errors.push_back(error);
    }

    /// Every call presenting `token` is rejected as expired.
    pub fn expire_token(&self, token: &str) {
        self.expired_tokens.lock().unwrap().insert(token.to_string());
    }

    pub fn batch_requests(&self) -> Vec<(UploadUrlsRequest, String)> {
        self.state.lock().unwrap().batch_requests.clone()
    }

    pub fn completions(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().completions.clone()
    }

    pub fn download_requests(&self) -> usize {
        self.state.lock().unwrap().download_requests.len()
    }

    fn check(&self, token: &str) -> Result<(), ServiceError> {
        if self.expired_tokens.lock().unwrap().contains(token) {
            return Err(expired_token());
        }
        match self.state.lock().unwrap().api_errors.pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }

    fn next_upload_key(&self) -> String {
        let mut state = self.state.lock().unwrap();
        if state.upload_keys.len() > 1 {
            state.upload_keys.pop_front().unwrap()
        } else {
            state
                .upload_keys
                .front()
                .cloned()
                .unwrap_or_else(|| "upload-key-1".to_string())
        }
    }
}

#[async_trait]
impl ObjectStorageApi for FakeStorage {
    async fn request_upload_urls(
        &self,
        request: &UploadUrlsRequest,
        access_token: &str,
    ) -> Result<SignedUploadUrls, ServiceError> {
        self.state
            .lock()
            .unwrap()
            .batch_requests
            .push((request.clone(), access_token.to_string()));
        self.check(access_token)?;
        let generation = self.url_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let urls = (request.first_part..request.first_part + request.parts)
            .map(|part| format!("mem://part/{part}?gen={generation}"))
            .collect();
        Ok(SignedUploadUrls {
            upload_key: self.next_upload_key(),
            urls,
        })
    }

    async fn complete_upload(
        &self,
        bucket_key: &str,
        object_key: &str,
        upload_key: &str,
        access_token: &str,
    ) -> Result<ObjectDetails, ServiceError> {
        self.state
            .lock()
            .unwrap()
            .completions
            .push((upload_key.to_string(), access_token.to_string()));
        self.check(access_token)?;
        Ok(ObjectDetails {
            bucket_key: bucket_key.to_string(),
            object_key: object_key.to_string(),
            object_id: Some(format!("urn:oss:{bucket_key}/{object_key}")),
            size: Some(self.object_size),
            content_type: None,
            location: None,
        })
    }

    async fn request_download_url(
        &self,
        _bucket_key: &str,
        _object_key: &str,
        _scope: Option<&str>,
        access_token: &str,
    ) -> Result<SignedDownload, ServiceError> {
        self.state
            .lock()
            .unwrap()
            .download_requests
            .push(access_token.to_string());
        self.check(access_token)?;
        let generation = self.url_generation.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(SignedDownload {
            status: self.download_status.clone(),
            url: Some(format!("mem://object?gen={generation}")),
            size: self.object_size,
        })
    }
}

/// Scripted reply for one signed-URL request.
#[derive(Debug, Clone)]
pub enum Reply {
    /// Behave normally.
    Ok,
    /// Answer with this status and body.
    Status(u16, &'static str),
    /// Fail at the transport level.
    Transport,
    /// Answer 200 with a body of this many bytes.
    Truncated(usize),
}

#[derive(Default)]
struct TransportState {
    script: VecDeque<Reply>,
    fallback: Option<Reply>,
    puts: Vec<(String, Vec<u8>)>,
    successful_puts: usize,
    gets: Vec<(String, u64, u64)>,
    cancel_after_puts: Option<(usize, CancellationToken)>,
}

/// Signed-URL transport backed by an in-memory object.
pub struct FakeTransport {
    object: Vec<u8>,
    state: Mutex<TransportState>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::with_object(Vec::new())
    }

    pub fn with_object(object: Vec<u8>) -> Self {
        Self {
            object,
            state: Mutex::new(TransportState::default()),
        }
    }

    /// Replies consumed one per request before falling back to normal behavior.
    pub fn script(&self, replies: impl IntoIterator<Item = Reply>) {
        self.state.lock().unwrap().script.extend(replies);
    }

    /// Reply used for every request once the script is exhausted.
    pub fn always(&self, reply: Reply) {
        self.state.lock().unwrap().fallback = Some(reply);
    }

    /// Cancels `token` right after the `count`-th successful PUT.
    pub fn cancel_after_puts(&self, count: usize, token: CancellationToken) {
        self.state.lock().unwrap().cancel_after_puts = Some((count, token));
    }

    /// Successful and failed PUTs as (url, body).
    pub fn puts(&self) -> Vec<(String, Vec<u8>)> {
        self.state.lock().unwrap().puts.clone()
    }

    pub fn gets(&self) -> Vec<(String, u64, u64)> {
        self.state.lock().unwrap().gets.clone()
    }

    fn next_reply(&self) -> Reply {
        let mut state = self.state.lock().unwrap();
        state
            .script
            .pop_front()
            .or_else(|| state.fallback.clone())
            .unwrap_or(Reply::Ok)
    }
}

fn transport_error() -> ServiceError {
    ServiceError::transport(Service::SignedUrl, std::io::Error::other("connection reset"))
}

#[async_trait]
impl SignedUrlTransport for FakeTransport {
    async fn put(&self, url: &str, body: Vec<u8>) -> Result<RawResponse, ServiceError> {
        let reply = self.next_reply();
        let mut state = self.state.lock().unwrap();
        state.puts.push((url.to_string(), body));
        match reply {
            Reply::Ok | Reply::Truncated(_) => {
                state.successful_puts += 1;
                if let Some((count, token)) = &state.cancel_after_puts {
                    if state.successful_puts == *count {
                        token.cancel();
                    }
                }
                Ok(RawResponse::new(200, Vec::new()))
            }
            Reply::Status(status, body) => Ok(RawResponse::new(status, body.as_bytes().to_vec())),
            Reply::Transport => Err(transport_error()),
        }
    }

    async fn get_range(
        &self,
        url: &str,
        start: u64,
        end: u64,
    ) -> Result<RawResponse, ServiceError> {
        let reply = self.next_reply();
        self.state
            .lock()
            .unwrap()
            .gets
            .push((url.to_string(), start, end));
        match reply {
            Reply::Ok => {
                let start = usize::try_from(start).unwrap();
                let end = usize::try_from(end).unwrap();
                Ok(RawResponse::new(206, self.object[start..end].to_vec()))
            }
            Reply::Truncated(len) => Ok(RawResponse::new(206, vec![0; len])),
            Reply::Status(status, body) => Ok(RawResponse::new(status, body.as_bytes().to_vec())),
            Reply::Transport => Err(transport_error()),
        }
    }
}

/// Deterministic test payload.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| u8::try_from(i % 251).unwrap()).collect()
}
