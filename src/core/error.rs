//! Typed error kinds for the bonding pipeline's in-loop failure handling.
//!
//! Startup-only fallibility (config load, store open) stays on `anyhow::Result`
//! with `.context()` chains, matching the rest of the process; this enum exists
//! so loop bodies can match on *kind* instead of grepping message strings to
//! decide retry-vs-skip.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("normalization error on {raw_id}: {reason}")]
    NormalizationError { raw_id: String, reason: String },

    #[error("embedding unavailable for {0}")]
    EmbeddingUnavailable(String),

    #[error("store conflict: {0}")]
    StoreConflict(String),

    #[error("configuration invalid: {0}")]
    ConfigurationInvalid(String),
}

impl CoreError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::UpstreamUnavailable(_) | CoreError::RateLimited(_)
        )
    }
}
