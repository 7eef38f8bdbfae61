//! Transport error types for the fleet client.

use thiserror::Error;

/// A result type using `FleetError`.
pub type Result<T> = std::result::Result<T, FleetError>;

/// A fleet-management API request failed.
///
/// None of these are retried inside the client; the bootstrap loop re-polls
/// from scratch on its next cycle.
#[derive(Debug, Error)]
pub enum FleetError {
    /// The request could not be sent or the connection failed.
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The API answered with a non-2xx status.
    #[error("fleet API returned {status}: {message}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, if any.
        message: String,
    },

    /// The response body could not be decoded.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl FleetError {
    /// Returns `true` if the same request might succeed later.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        match self {
            Self::Request(_) => true,
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Decode(_) => false,
        }
    }

    /// Returns `true` if the API rejected a write because the key already exists.
    #[must_use]
    pub const fn is_conflict(&self) -> bool {
        matches!(self, Self::Status { status: 409, .. })
    }
}
