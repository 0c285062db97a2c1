//! Errors surfaced by the ledger engines.

use std::time::Duration;

use thiserror::Error;

use forgeledger_accounting::{ConsistencyFault, ErrorKind, LedgerError};

use crate::ledger_store::StoreError;

pub type EngineResult<T> = Result<T, EngineError>;

/// Failure of a chart, posting or report operation.
///
/// `Ledger` carries the caller-facing validation/state/invariant reasons.
/// Everything else is operational: the write (if any) left no trace and the
/// caller may retry the whole operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("operation cancelled")]
    Cancelled,

    #[error("operation exceeded its deadline of {0:?}")]
    DeadlineExceeded(Duration),

    /// Aggregate debits and credits disagree: stored history is corrupt.
    #[error("ledger consistency fault: {0}")]
    ConsistencyFault(ConsistencyFault),
}

impl EngineError {
    /// Classification of ledger errors; `None` for operational failures.
    pub fn ledger_kind(&self) -> Option<ErrorKind> {
        match self {
            EngineError::Ledger(e) => Some(e.kind()),
            _ => None,
        }
    }

    pub fn as_ledger(&self) -> Option<&LedgerError> {
        match self {
            EngineError::Ledger(e) => Some(e),
            _ => None,
        }
    }
}

impl From<forgeledger_core::CoreError> for EngineError {
    fn from(value: forgeledger_core::CoreError) -> Self {
        EngineError::Ledger(value.into())
    }
}
