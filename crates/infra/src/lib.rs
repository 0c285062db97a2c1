//! Infrastructure layer: ledger storage, engines, config.
//!
//! The domain crates decide; this crate loads, orchestrates and persists.

use std::sync::Arc;

pub mod chart;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger_store;
pub mod posting;
pub mod reporting;


pub use chart::ChartOfAccounts;
pub use config::{ConfigError, LedgerConfig, StoreBackend};
pub use context::{CancelHandle, OperationContext};
pub use error::{EngineError, EngineResult};
pub use ledger_store::{
    EntryFilter, InMemoryLedgerStore, LedgerStore, LedgerTransaction, LineQuery,
    PostgresLedgerStore, StatusChange, StoreError,
};
pub use posting::{DraftUpdate, NewEntry, PostingEngine, VoidInput, VoidOutcome};
pub use reporting::ReportEngine;

/// The three ledger engines sharing one store.
#[derive(Debug)]
pub struct Ledger<S> {
    pub chart: ChartOfAccounts<S>,
    pub posting: PostingEngine<S>,
    pub reports: ReportEngine<S>,
}

impl<S> Clone for Ledger<S> {
    fn clone(&self) -> Self {
        Self {
            chart: self.chart.clone(),
            posting: self.posting.clone(),
            reports: self.reports.clone(),
        }
    }
}

impl<S: LedgerStore> Ledger<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            chart: ChartOfAccounts::new(Arc::clone(&store)),
            posting: PostingEngine::new(Arc::clone(&store)),
            reports: ReportEngine::new(store),
        }
    }
}

impl Ledger<PostgresLedgerStore> {
    /// Connect to Postgres as configured and apply the schema.
    pub async fn connect_postgres(config: &LedgerConfig) -> Result<Self, StoreError> {
        let url = config
            .database_url
            .as_deref()
            .ok_or_else(|| StoreError::Backend("DATABASE_URL is not configured".to_string()))?;
        let store = PostgresLedgerStore::connect(url, config.db_max_connections).await?;
        store.migrate().await?;
        tracing::info!(max_connections = config.db_max_connections, "postgres ledger store ready");
        Ok(Self::new(Arc::new(store)))
    }
}

impl Ledger<InMemoryLedgerStore> {
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryLedgerStore::new()))
    }
}
