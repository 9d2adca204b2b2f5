//! Transfer configuration.
//!
//! [`TransferConfig`] is read once when a [`FileTransfer`](crate::FileTransfer)
//! is built and shared read-only by every transfer it runs. Values come from
//! [`Default`], from serde (embedding in a larger config file), or from
//! `OSS_TRANSFER_*` environment overrides via [`TransferConfig::from_env`].

use std::env;
use std::str::FromStr;

use serde::Deserialize;

use crate::api::DEFAULT_BASE_URL;
use crate::http_client::{CONNECT_TIMEOUT_SECS, READ_TIMEOUT_SECS};
use crate::transfer::TransferError;

/// Default chunk size (5 MiB, the smallest part size the storage backend accepts).
pub const DEFAULT_CHUNK_SIZE_BYTES: u64 = 5 * 1024 * 1024;

/// Default maximum number of chunks in one object.
pub const DEFAULT_MAX_CHUNK_COUNT: u64 = 10_000;

/// Default renewal budget for expired signed URLs.
pub const DEFAULT_MAX_RETRY_ON_URL_EXPIRY: u32 = 3;

/// Default refresh budget for expired access tokens.
pub const DEFAULT_MAX_RETRY_ON_TOKEN_EXPIRY: u32 = 3;

/// Default and maximum number of signed upload URLs requested per batch.
pub const MAX_UPLOAD_BATCH_SIZE: u32 = 25;

/// Default attempts per chunk on transport failures.
pub const DEFAULT_MAX_CHUNK_TRANSPORT_ATTEMPTS: u32 = 5;

/// Maximum lifetime the service grants a signed URL, in minutes.
pub const MAX_URL_EXPIRATION_MINUTES: u32 = 60;

const ENV_PREFIX: &str = "OSS_TRANSFER_";

/// Process-wide transfer settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct TransferConfig {
    /// Fixed chunk size for every transfer.
    pub chunk_size_bytes: u64,
    /// Largest chunk count an upload may produce.
    pub max_chunk_count_allowed: u64,
    /// Signed-URL renewals allowed per chunk.
    pub max_retry_on_url_expiry: u32,
    /// Token refreshes allowed per API request.
    pub max_retry_on_token_expiry: u32,
    /// Signed upload URLs requested per batch.
    pub upload_batch_size: u32,
    /// Attempts per chunk PUT when the transport fails.
    pub max_chunk_transport_attempts: u32,
    /// Lifetime requested for signed URLs.
    pub url_expiration_minutes: u32,
    /// HTTP connect timeout.
    pub connect_timeout_secs: u64,
    /// HTTP read timeout per request.
    pub read_timeout_secs: u64,
    /// Platform API base URL.
    pub base_url: String,
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            chunk_size_bytes: DEFAULT_CHUNK_SIZE_BYTES,
            max_chunk_count_allowed: DEFAULT_MAX_CHUNK_COUNT,
            max_retry_on_url_expiry: DEFAULT_MAX_RETRY_ON_URL_EXPIRY,
            max_retry_on_token_expiry: DEFAULT_MAX_RETRY_ON_TOKEN_EXPIRY,
            upload_batch_size: MAX_UPLOAD_BATCH_SIZE,
            max_chunk_transport_attempts: DEFAULT_MAX_CHUNK_TRANSPORT_ATTEMPTS,
            url_expiration_minutes: MAX_URL_EXPIRATION_MINUTES,
            connect_timeout_secs: CONNECT_TIMEOUT_SECS,
            read_timeout_secs: READ_TIMEOUT_SECS,
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }
}

impl TransferConfig {
    /// Builds a config from defaults overlaid with `OSS_TRANSFER_*` environment variables.
    ///
    /// Empty variables are ignored. The result is validated.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidConfig`] if a variable does not parse
    /// or the resulting config is invalid.
    pub fn from_env() -> Result<Self, TransferError> {
        let mut cfg = Self::default();
        override_from_env("CHUNK_SIZE_BYTES", &mut cfg.chunk_size_bytes)?;
        override_from_env("MAX_CHUNK_COUNT", &mut cfg.max_chunk_count_allowed)?;
        override_from_env("MAX_RETRY_ON_URL_EXPIRY", &mut cfg.max_retry_on_url_expiry)?;
        override_from_env(
            "MAX_RETRY_ON_TOKEN_EXPIRY",
            &mut cfg.max_retry_on_token_expiry,
        )?;
        override_from_env("UPLOAD_BATCH_SIZE", &mut cfg.upload_batch_size)?;
        override_from_env("MAX_CHUNK_ATTEMPTS", &mut cfg.max_chunk_transport_attempts)?;
        override_from_env("URL_EXPIRATION_MINUTES", &mut cfg.url_expiration_minutes)?;
        override_from_env("CONNECT_TIMEOUT_SECS", &mut cfg.connect_timeout_secs)?;
        override_from_env("READ_TIMEOUT_SECS", &mut cfg.read_timeout_secs)?;
        if let Some(base_url) = env_var_non_empty("BASE_URL") {
            cfg.base_url = base_url;
        }
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validates config values.
    ///
    /// # Errors
    ///
    /// Returns [`TransferError::InvalidConfig`] naming the first bad field.
    pub fn validate(&self) -> Result<(), TransferError> {
        if self.chunk_size_bytes == 0 {
            return Err(invalid("chunk_size_bytes", self.chunk_size_bytes, ">= 1"));
        }
        if self.max_chunk_count_allowed == 0 {
            return Err(invalid(
                "max_chunk_count_allowed",
                self.max_chunk_count_allowed,
                ">= 1",
            ));
        }
        if !(1..=MAX_UPLOAD_BATCH_SIZE).contains(&self.upload_batch_size) {
            return Err(invalid(
                "upload_batch_size",
                self.upload_batch_size,
                &format!("1..={MAX_UPLOAD_BATCH_SIZE}"),
            ));
        }
        if self.max_chunk_transport_attempts == 0 {
            return Err(invalid(
                "max_chunk_transport_attempts",
                self.max_chunk_transport_attempts,
                ">= 1",
            ));
        }
        if !(1..=MAX_URL_EXPIRATION_MINUTES).contains(&self.url_expiration_minutes) {
            return Err(invalid(
                "url_expiration_minutes",
                self.url_expiration_minutes,
                &format!("1..={MAX_URL_EXPIRATION_MINUTES}"),
            ));
        }
        validate_timeout_secs("connect_timeout_secs", self.connect_timeout_secs)?;
        validate_timeout_secs("read_timeout_secs", self.read_timeout_secs)?;
        if url::Url::parse(&self.base_url).is_err() {
            return Err(TransferError::invalid_config(format!(
                "Invalid config value for `base_url`: '{}' is not an absolute URL",
                self.base_url
            )));
        }
        Ok(())
    }

    /// Largest file size an upload accepts: `max_chunk_count_allowed × chunk_size_bytes`.
    #[must_use]
    pub fn max_file_size_bytes(&self) -> u64 {
        self.max_chunk_count_allowed
            .saturating_mul(self.chunk_size_bytes)
    }
}

fn validate_timeout_secs(field: &str, value: u64) -> Result<(), TransferError> {
    if !(1..=3600).contains(&value) {
        return Err(invalid(field, value, "1..=3600"));
    }
    Ok(())
}

fn invalid(field: &str, value: impl std::fmt::Display, expected: &str) -> TransferError {
    TransferError::invalid_config(format!(
        "Invalid config value for `{field}`: {value}. Expected range: {expected}"
    ))
}

fn env_var_non_empty(suffix: &str) -> Option<String> {
    let value = env::var(format!("{ENV_PREFIX}{suffix}")).ok()?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn override_from_env<T: FromStr>(suffix: &str, target: &mut T) -> Result<(), TransferError> {
    let Some(raw) = env_var_non_empty(suffix) else {
        return Ok(());
    };
    *target = raw.parse().map_err(|_| {
        TransferError::invalid_config(format!(
            "Invalid value for `{ENV_PREFIX}{suffix}`: '{raw}' is not a valid number"
        ))
    })?;
    Ok(())
}
