//! Accounting module (double-entry ledger).
//!
//! Pure domain logic only: no IO, no HTTP, no persistence concerns. Storage,
//! atomic writes and orchestration live in `forgeledger-infra`.

pub mod account;
pub mod error;
pub mod journal;
pub mod reports;

pub use account::{Account, AccountType, NewAccount, NormalSide, default_chart, descendants};
pub use error::{ErrorKind, LedgerError, LedgerResult};
pub use journal::{
    DraftEntry, DraftHeader, EntryState, EntryStatus, EntryTotals, JournalEntry, JournalLine,
    LineInput, PostedEntry, VoidRequest, VoidedEntry, validate_void_reason,
};
pub use reports::{
    AccountActivity, ActivityRow, BalanceSheet, BalanceSheetSection, ConsistencyFault, DateRange,
    IncomeStatement, PostedLine, StatementLine, TrialBalance, TrialBalanceRow, net_balance,
};
