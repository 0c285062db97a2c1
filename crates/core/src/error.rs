//! Core error model.

use thiserror::Error;

/// Result type used by the core primitives.
pub type CoreResult<T> = Result<T, CoreError>;

/// Failure constructing or combining a core primitive.
///
/// Keep this focused on value-level failures (parsing, range). Ledger rules and
/// storage failures have their own error types in the crates that own them.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A monetary amount was malformed or outside the representable range.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// Arithmetic left the representable range.
    #[error("arithmetic overflow in {0}")]
    Overflow(&'static str),
}

impl CoreError {
    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn invalid_amount(msg: impl Into<String>) -> Self {
        Self::InvalidAmount(msg.into())
    }
}
