//! Ledger error taxonomy.

use chrono::NaiveDate;
use thiserror::Error;

use forgeledger_core::{AccountId, CoreError, EntryId, Money};

/// Result type used by the ledger domain.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Broad class of a [`LedgerError`], used by callers to shape a rejection.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad input; report the reason to the caller verbatim.
    Validation,
    /// The entity is not in a state that allows the operation; re-fetch and decide.
    State,
    /// The balance invariant would be broken; the caller must correct the amounts.
    Invariant,
}

/// Deterministic failure of a ledger operation.
///
/// These are local and recoverable. Storage and cancellation failures are not
/// modelled here; they belong to the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("journal entry needs at least 2 lines, found {found}")]
    InvalidLineCount { found: usize },

    #[error("line {line} must have exactly one non-zero side")]
    LineAmbiguous { line: usize },

    #[error("account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("account is inactive: {0}")]
    AccountInactive(AccountId),

    #[error("account code already exists: {0}")]
    DuplicateCode(String),

    #[error("invalid parent account: {0}")]
    InvalidParent(AccountId),

    #[error("invalid account: {0}")]
    InvalidAccount(String),

    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid date range: {start} is after {end}")]
    InvalidDateRange { start: NaiveDate, end: NaiveDate },

    #[error("void reason must not be blank")]
    EmptyReason,

    #[error("journal entry not found: {0}")]
    EntryNotFound(EntryId),

    #[error("journal entry {0} is already posted")]
    AlreadyPosted(EntryId),

    #[error("journal entry {0} is already voided")]
    AlreadyVoided(EntryId),

    #[error("journal entry {0} is not posted")]
    NotPosted(EntryId),

    #[error("system account {0} is protected")]
    SystemAccountProtected(AccountId),

    #[error("account {0} is referenced by journal lines")]
    AccountInUse(AccountId),

    #[error("code of account {0} cannot change once referenced")]
    CodeImmutable(AccountId),

    #[error("journal entry is unbalanced by {difference}")]
    Unbalanced { difference: Money },
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::InvalidLineCount { .. }
            | LedgerError::LineAmbiguous { .. }
            | LedgerError::AccountNotFound(_)
            | LedgerError::AccountInactive(_)
            | LedgerError::DuplicateCode(_)
            | LedgerError::InvalidParent(_)
            | LedgerError::InvalidAccount(_)
            | LedgerError::InvalidAmount(_)
            | LedgerError::InvalidId(_)
            | LedgerError::InvalidDateRange { .. }
            | LedgerError::EmptyReason => ErrorKind::Validation,

            LedgerError::EntryNotFound(_)
            | LedgerError::AlreadyPosted(_)
            | LedgerError::AlreadyVoided(_)
            | LedgerError::NotPosted(_)
            | LedgerError::SystemAccountProtected(_)
            | LedgerError::AccountInUse(_)
            | LedgerError::CodeImmutable(_) => ErrorKind::State,

            LedgerError::Unbalanced { .. } => ErrorKind::Invariant,
        }
    }
}

impl From<CoreError> for LedgerError {
    fn from(value: CoreError) -> Self {
        match value {
            CoreError::InvalidAmount(msg) => LedgerError::InvalidAmount(msg),
            CoreError::Overflow(op) => LedgerError::InvalidAmount(format!("overflow in {op}")),
            CoreError::InvalidId(msg) => LedgerError::InvalidId(msg),
        }
    }
}
