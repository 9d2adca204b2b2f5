//! Shared User-Agent string for API and signed-URL traffic.

/// Default User-Agent for every request the crate sends.
#[must_use]
pub(crate) fn default_user_agent() -> String {
    format!("oss-transfer/{}", env!("CARGO_PKG_VERSION"))
}
