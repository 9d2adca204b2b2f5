//! Pre-flight checks run before any network call.

use std::sync::LazyLock;

use regex::Regex;

use super::TransferError;
use crate::config::TransferConfig;

/// 1 to 20 comma-separated tokens of 3 to 50 characters from `[A-Za-z0-9._-]`.
#[allow(clippy::expect_used)]
static SCOPE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9._-]{3,50}(,[A-Za-z0-9._-]{3,50}){0,19}$")
        .expect("scope regex is valid")
});

/// Validates a project scope. A missing or empty scope is valid.
///
/// # Errors
///
/// Returns [`TransferError::InvalidScope`] if the scope does not match the grammar.
pub fn validate_scope(scope: Option<&str>) -> Result<(), TransferError> {
    match scope {
        None | Some("") => Ok(()),
        Some(scope) if SCOPE_PATTERN.is_match(scope) => Ok(()),
        Some(scope) => Err(TransferError::invalid_scope(scope)),
    }
}

/// Rejects files larger than `max_chunk_count_allowed × chunk_size_bytes`.
///
/// # Errors
///
/// Returns [`TransferError::FileTooLarge`] reporting the ceiling in bytes.
pub fn validate_file_size(size: u64, config: &TransferConfig) -> Result<(), TransferError> {
    let max_bytes = config.max_file_size_bytes();
    if size > max_bytes {
        return Err(TransferError::FileTooLarge { size, max_bytes });
    }
    Ok(())
}
