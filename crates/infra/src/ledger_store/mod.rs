//! Ledger persistence boundary.
//!
//! Engines talk to storage only through [`LedgerStore`] and
//! [`LedgerTransaction`]; the in-memory and Postgres backends are
//! interchangeable behind them.

pub mod in_memory;
pub mod postgres;
pub mod r#trait;

pub use in_memory::{InMemoryLedgerStore, InMemoryTransaction};
pub use postgres::{PostgresLedgerStore, PostgresTransaction};
pub use r#trait::{EntryFilter, LedgerStore, LedgerTransaction, LineQuery, StatusChange, StoreError};
