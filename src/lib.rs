//! Object storage file transfer library
//!
//! Chunked multipart upload and ranged download against a signed-URL object
//! storage service, recovering from both access-token expiry and signed-URL
//! expiry.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`transfer`] - the [`FileTransfer`] facade, chunk planning, signed-URL
//!   sessions, and the upload and download engines
//! - [`api`] - collaborator traits and their reqwest-backed implementations
//!   (object storage REST API, token endpoint)
//! - [`config`] - transfer settings with environment overrides

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod api;
pub mod config;
mod http_client;
#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod test_support;
pub mod transfer;
pub(crate) mod user_agent;

// Re-export commonly used types
pub use api::{
    AuthProvider, ClientCredentialsProvider, ObjectDetails, ObjectStorageApi, OssClient, Service,
    ServiceError, StaticTokenProvider,
};
pub use config::TransferConfig;
pub use transfer::{
    DownloadSummary, FileTransfer, HttpTransport, ProgressCallback, RawResponse, RequestId,
    SignedUrlTransport, TransferError, TransferOutcome, TransferProgress, TransferRequest,
};
