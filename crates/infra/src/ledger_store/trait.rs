use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgeledger_accounting::{Account, DateRange, EntryStatus, JournalEntry, PostedLine};
use forgeledger_core::{AccountId, EntryId, TenantId};

/// Ledger store operation error.
///
/// These are **infrastructure errors** (storage, isolation, aborts) as opposed
/// to ledger errors (validation, state, invariants). The engines propagate them
/// as opaque failures and never retry; a failed write leaves no partial state,
/// so the caller may retry the whole logical operation.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// A concurrent writer won (unique constraint, serialization failure).
    #[error("write conflict: {0}")]
    Conflict(String),

    #[error("tenant isolation violation: {0}")]
    TenantIsolation(String),

    /// The transaction was rolled back by the backend.
    #[error("transaction aborted: {0}")]
    Aborted(String),

    /// Stored data could not be decoded into ledger types.
    #[error("corrupt ledger data: {0}")]
    Corrupt(String),

    /// Connection loss, timeouts and other backend failures.
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Status transition written by `update_entry_status`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusChange {
    Posted {
        entry_number: u64,
        posted_at: DateTime<Utc>,
    },
    Voided {
        reason: String,
        voided_at: DateTime<Utc>,
    },
}

impl StatusChange {
    pub fn status(&self) -> EntryStatus {
        match self {
            StatusChange::Posted { .. } => EntryStatus::Posted,
            StatusChange::Voided { .. } => EntryStatus::Voided,
        }
    }
}

/// Read filter for `fetch_posted_lines`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineQuery {
    /// Restrict to these accounts; `None` means every account.
    pub account_ids: Option<Vec<AccountId>>,
    pub date_range: DateRange,
}

impl LineQuery {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn for_accounts(account_ids: impl IntoIterator<Item = AccountId>) -> Self {
        Self {
            account_ids: Some(account_ids.into_iter().collect()),
            date_range: DateRange::all(),
        }
    }

    pub fn within(mut self, date_range: DateRange) -> Self {
        self.date_range = date_range;
        self
    }

    pub fn matches_account(&self, account_id: AccountId) -> bool {
        self.account_ids
            .as_ref()
            .is_none_or(|ids| ids.contains(&account_id))
    }
}

/// Read filter for `list_entries`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryFilter {
    pub status: Option<EntryStatus>,
    pub date_range: DateRange,
}

impl EntryFilter {
    pub fn matches(&self, entry: &JournalEntry) -> bool {
        self.status.is_none_or(|s| s == entry.status) && self.date_range.contains(entry.entry_date)
    }
}

/// Tenant-scoped atomic write.
///
/// Everything written through one transaction commits together on
/// [`LedgerTransaction::commit`]. Dropping the transaction without committing
/// rolls it back and leaves no trace, including entry numbers it allocated.
#[async_trait::async_trait]
pub trait LedgerTransaction: Send {
    fn tenant_id(&self) -> TenantId;

    /// Next entry number for the tenant (1, 2, 3, ...).
    ///
    /// Allocation is serialized per tenant and rolled back with the
    /// transaction, so numbers stay gapless.
    async fn next_entry_number(&mut self) -> Result<u64, StoreError>;

    /// Insert an entry together with all of its lines.
    async fn insert_entry_with_lines(
        &mut self,
        entry: &JournalEntry,
    ) -> Result<EntryId, StoreError>;

    async fn update_entry_status(
        &mut self,
        entry_id: EntryId,
        change: &StatusChange,
    ) -> Result<(), StoreError>;

    /// Load an entry and hold it against concurrent writers until commit.
    async fn load_entry_for_update(
        &mut self,
        entry_id: EntryId,
    ) -> Result<Option<JournalEntry>, StoreError>;

    /// Overwrite a DRAFT's header and lines.
    async fn replace_draft(&mut self, entry: &JournalEntry) -> Result<(), StoreError>;

    /// Remove a DRAFT and its lines.
    async fn delete_draft(&mut self, entry_id: EntryId) -> Result<(), StoreError>;

    async fn find_account(&mut self, account_id: AccountId) -> Result<Option<Account>, StoreError>;

    async fn find_account_by_code(&mut self, code: &str) -> Result<Option<Account>, StoreError>;

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError>;

    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError>;

    async fn delete_account(&mut self, account_id: AccountId) -> Result<(), StoreError>;

    /// Whether any journal line (draft or posted) references the account.
    async fn account_is_referenced(&mut self, account_id: AccountId) -> Result<bool, StoreError>;

    async fn commit(self) -> Result<(), StoreError>
    where
        Self: Sized;
}

/// Persistence contract consumed by the posting and report engines.
///
/// ## Semantics every backend must provide
///
/// - **Atomicity**: entry insertion, status updates and entry-number
///   allocation inside one [`LedgerTransaction`] commit or roll back as one.
/// - **Read isolation**: reads see committed data only. `fetch_posted_lines`
///   returns lines of POSTED and VOIDED entries (voiding adds a reversal, it
///   never erases history) and never lines of drafts.
/// - **Exact amounts**: money is persisted as fixed-point, never floating point.
/// - **Tenant isolation**: every read and write is scoped to one tenant.
///
/// Reads take no locks and never wait on in-flight writes.
#[async_trait::async_trait]
pub trait LedgerStore: Send + Sync {
    type Tx: LedgerTransaction;

    /// Start an atomic write for a tenant.
    ///
    /// May wait for other writers of the same tenant; never for other tenants.
    async fn begin_atomic_write(&self, tenant_id: TenantId) -> Result<Self::Tx, StoreError>;

    /// Posted lines joined with their entry date, ordered by entry number.
    async fn fetch_posted_lines(
        &self,
        tenant_id: TenantId,
        query: &LineQuery,
    ) -> Result<Vec<PostedLine>, StoreError>;

    async fn get_entry(
        &self,
        tenant_id: TenantId,
        entry_id: EntryId,
    ) -> Result<Option<JournalEntry>, StoreError>;

    /// Entries ordered by date, then entry number (drafts last within a date).
    async fn list_entries(
        &self,
        tenant_id: TenantId,
        filter: &EntryFilter,
    ) -> Result<Vec<JournalEntry>, StoreError>;

    async fn get_account(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
    ) -> Result<Option<Account>, StoreError>;

    /// All accounts of a tenant ordered by code.
    async fn list_accounts(&self, tenant_id: TenantId) -> Result<Vec<Account>, StoreError>;
}
