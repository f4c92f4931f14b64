//! Collaborator-level error type.

use thiserror::Error;

/// Errors returned by a side-effect provider.
///
/// The dispatcher uses the variant to decide retry behaviour:
/// - `Transient`: the call may succeed if repeated (network, 5xx, rate limit).
/// - `Permanent`: repeating the call will not help.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Temporary failure; a retry may succeed.
    #[error("transient provider error: {0}")]
    Transient(String),

    /// Permanent failure; no retry should be attempted.
    #[error("provider error: {0}")]
    Permanent(String),
}

impl ProviderError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_))
    }
}
