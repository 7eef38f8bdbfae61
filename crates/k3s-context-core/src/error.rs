//! Common error types for k3s-context.

use thiserror::Error;

/// A result type using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors raised while interpreting fleet records.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A role variable carried a value other than `server` or `agent`.
    #[error("invalid role: {0:?}")]
    InvalidRole(String),

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0:?}")]
    InvalidId(String),
}
