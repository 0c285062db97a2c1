use std::collections::{BTreeMap, HashMap, btree_map};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use tokio::sync::{Mutex, OwnedMutexGuard};

use forgeledger_accounting::{Account, EntryStatus, JournalEntry, PostedLine};
use forgeledger_core::{AccountId, EntryId, TenantId};

use super::r#trait::{
    EntryFilter, LedgerStore, LedgerTransaction, LineQuery, StatusChange, StoreError,
};

/// Committed state of one tenant's books.
#[derive(Debug, Clone, Default)]
struct TenantLedger {
    accounts: BTreeMap<AccountId, Account>,
    entries: BTreeMap<EntryId, JournalEntry>,
    /// Entry number -> entry holding it.
    numbers: BTreeMap<u64, EntryId>,
    /// Number of stored lines (any status) per account.
    line_refs: BTreeMap<AccountId, usize>,
    last_number: u64,
}

impl TenantLedger {
    fn insert_entry(&mut self, entry: JournalEntry) {
        if let Some(n) = entry.entry_number {
            self.numbers.insert(n, entry.id);
        }
        for line in &entry.lines {
            *self.line_refs.entry(line.account_id).or_default() += 1;
        }
        self.entries.insert(entry.id, entry);
    }

    fn remove_entry(&mut self, entry_id: EntryId) {
        let Some(entry) = self.entries.remove(&entry_id) else {
            return;
        };
        if let Some(n) = entry.entry_number {
            if self.numbers.get(&n) == Some(&entry_id) {
                self.numbers.remove(&n);
            }
        }
        for line in &entry.lines {
            if let Some(count) = self.line_refs.get_mut(&line.account_id) {
                *count -= 1;
                if *count == 0 {
                    self.line_refs.remove(&line.account_id);
                }
            }
        }
    }
}

#[derive(Debug, Default)]
struct TenantSlot {
    /// Serializes writers of this tenant; held for the life of a transaction.
    writer: Arc<Mutex<()>>,
    committed: RwLock<Arc<TenantLedger>>,
}

impl TenantSlot {
    fn snapshot(&self) -> Result<Arc<TenantLedger>, StoreError> {
        self.committed
            .read()
            .map(|g| Arc::clone(&g))
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))
    }
}

/// In-memory ledger store.
///
/// Intended for tests/dev. A transaction stages only the rows it touches on
/// top of the committed snapshot it started from; commit applies them in
/// place. Readers only ever observe committed state and a dropped transaction
/// leaves nothing behind.
#[derive(Debug, Default)]
pub struct InMemoryLedgerStore {
    tenants: RwLock<HashMap<TenantId, Arc<TenantSlot>>>,
    fail_next_commit: Arc<AtomicBool>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next commit (of any tenant) fail with [`StoreError::Aborted`].
    pub fn fail_next_commit(&self) {
        self.fail_next_commit.store(true, Ordering::SeqCst);
    }

    fn slot(&self, tenant_id: TenantId) -> Result<Arc<TenantSlot>, StoreError> {
        {
            let tenants = self
                .tenants
                .read()
                .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
            if let Some(slot) = tenants.get(&tenant_id) {
                return Ok(Arc::clone(slot));
            }
        }

        let mut tenants = self
            .tenants
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        Ok(Arc::clone(tenants.entry(tenant_id).or_default()))
    }

    fn snapshot(&self, tenant_id: TenantId) -> Result<Arc<TenantLedger>, StoreError> {
        self.slot(tenant_id)?.snapshot()
    }
}

/// Open write on one tenant's books.
///
/// Staged rows shadow the base snapshot; `None` marks a deletion.
#[derive(Debug)]
pub struct InMemoryTransaction {
    tenant_id: TenantId,
    slot: Arc<TenantSlot>,
    base: Arc<TenantLedger>,
    accounts: BTreeMap<AccountId, Option<Account>>,
    entries: BTreeMap<EntryId, Option<JournalEntry>>,
    last_number: u64,
    fail_commit: Arc<AtomicBool>,
    _writer: OwnedMutexGuard<()>,
}

impl InMemoryTransaction {
    fn check_tenant(&self, tenant_id: TenantId, what: &str) -> Result<(), StoreError> {
        if tenant_id != self.tenant_id {
            return Err(StoreError::TenantIsolation(format!(
                "{what} belongs to tenant {tenant_id}, transaction is scoped to {}",
                self.tenant_id
            )));
        }
        Ok(())
    }

    fn entry(&self, entry_id: EntryId) -> Option<&JournalEntry> {
        match self.entries.get(&entry_id) {
            Some(staged) => staged.as_ref(),
            None => self.base.entries.get(&entry_id),
        }
    }

    fn account(&self, account_id: AccountId) -> Option<&Account> {
        match self.accounts.get(&account_id) {
            Some(staged) => staged.as_ref(),
            None => self.base.accounts.get(&account_id),
        }
    }

    fn all_accounts(&self) -> impl Iterator<Item = &Account> {
        self.base
            .accounts
            .values()
            .filter(move |a| !self.accounts.contains_key(&a.id))
            .chain(self.accounts.values().flatten())
    }

    fn number_taken(&self, number: u64) -> bool {
        self.entries
            .values()
            .flatten()
            .any(|e| e.entry_number == Some(number))
            || self
                .base
                .numbers
                .get(&number)
                .is_some_and(|id| !self.entries.contains_key(id))
    }

    fn code_taken(&self, code: &str, except: Option<AccountId>) -> bool {
        self.all_accounts().any(|a| a.code == code && Some(a.id) != except)
    }

    fn staged_entry_mut(&mut self, entry_id: EntryId) -> Result<&mut JournalEntry, StoreError> {
        let missing = || StoreError::Conflict(format!("journal entry {entry_id} does not exist"));
        let staged = match self.entries.entry(entry_id) {
            btree_map::Entry::Occupied(o) => o.into_mut(),
            btree_map::Entry::Vacant(v) => match self.base.entries.get(&entry_id) {
                Some(current) => v.insert(Some(current.clone())),
                None => return Err(missing()),
            },
        };
        staged.as_mut().ok_or_else(missing)
    }
}

#[async_trait::async_trait]
impl LedgerTransaction for InMemoryTransaction {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    async fn next_entry_number(&mut self) -> Result<u64, StoreError> {
        self.last_number += 1;
        Ok(self.last_number)
    }

    async fn insert_entry_with_lines(
        &mut self,
        entry: &JournalEntry,
    ) -> Result<EntryId, StoreError> {
        self.check_tenant(entry.tenant_id, "journal entry")?;
        if self.entry(entry.id).is_some() {
            return Err(StoreError::Conflict(format!(
                "journal entry {} already exists",
                entry.id
            )));
        }
        if let Some(n) = entry.entry_number {
            if self.number_taken(n) {
                return Err(StoreError::Conflict(format!("entry number {n} already used")));
            }
        }
        self.entries.insert(entry.id, Some(entry.clone()));
        Ok(entry.id)
    }

    async fn update_entry_status(
        &mut self,
        entry_id: EntryId,
        change: &StatusChange,
    ) -> Result<(), StoreError> {
        if let StatusChange::Posted { entry_number, .. } = change {
            if self.number_taken(*entry_number) {
                return Err(StoreError::Conflict(format!(
                    "entry number {entry_number} already used"
                )));
            }
        }
        let entry = self.staged_entry_mut(entry_id)?;
        match change {
            StatusChange::Posted {
                entry_number,
                posted_at,
            } => {
                entry.status = EntryStatus::Posted;
                entry.entry_number = Some(*entry_number);
                entry.posted_at = Some(*posted_at);
            }
            StatusChange::Voided { reason, voided_at } => {
                entry.status = EntryStatus::Voided;
                entry.void_reason = Some(reason.clone());
                entry.voided_at = Some(*voided_at);
            }
        }
        Ok(())
    }

    async fn load_entry_for_update(
        &mut self,
        entry_id: EntryId,
    ) -> Result<Option<JournalEntry>, StoreError> {
        // The writer lock already excludes every other writer of this tenant.
        Ok(self.entry(entry_id).cloned())
    }

    async fn replace_draft(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.check_tenant(entry.tenant_id, "journal entry")?;
        let current = self.staged_entry_mut(entry.id)?;
        if current.status != EntryStatus::Draft {
            return Err(StoreError::Conflict(format!(
                "journal entry {} is no longer a draft",
                entry.id
            )));
        }
        *current = entry.clone();
        Ok(())
    }

    async fn delete_draft(&mut self, entry_id: EntryId) -> Result<(), StoreError> {
        match self.entry(entry_id) {
            Some(e) if e.status == EntryStatus::Draft => {
                self.entries.insert(entry_id, None);
                Ok(())
            }
            _ => Err(StoreError::Conflict(format!(
                "journal entry {entry_id} is not a stored draft"
            ))),
        }
    }

    async fn find_account(&mut self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        Ok(self.account(account_id).cloned())
    }

    async fn find_account_by_code(&mut self, code: &str) -> Result<Option<Account>, StoreError> {
        Ok(self.all_accounts().find(|a| a.code == code).cloned())
    }

    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.check_tenant(account.tenant_id, "account")?;
        if self.account(account.id).is_some() {
            return Err(StoreError::Conflict(format!(
                "account {} already exists",
                account.id
            )));
        }
        if self.code_taken(&account.code, None) {
            return Err(StoreError::Conflict(format!(
                "account code {} already exists",
                account.code
            )));
        }
        self.accounts.insert(account.id, Some(account.clone()));
        Ok(())
    }

    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.check_tenant(account.tenant_id, "account")?;
        if self.code_taken(&account.code, Some(account.id)) {
            return Err(StoreError::Conflict(format!(
                "account code {} already exists",
                account.code
            )));
        }
        if self.account(account.id).is_none() {
            return Err(StoreError::Conflict(format!(
                "account {} does not exist",
                account.id
            )));
        }
        self.accounts.insert(account.id, Some(account.clone()));
        Ok(())
    }

    async fn delete_account(&mut self, account_id: AccountId) -> Result<(), StoreError> {
        if self.all_accounts().any(|a| a.parent_id == Some(account_id)) {
            return Err(StoreError::Conflict(format!(
                "account {account_id} still has child accounts"
            )));
        }
        if self.account(account_id).is_none() {
            return Err(StoreError::Conflict(format!("account {account_id} does not exist")));
        }
        self.accounts.insert(account_id, None);
        Ok(())
    }

    async fn account_is_referenced(&mut self, account_id: AccountId) -> Result<bool, StoreError> {
        let references = |e: &JournalEntry| {
            e.lines.iter().filter(|l| l.account_id == account_id).count()
        };

        let mut count = self.base.line_refs.get(&account_id).copied().unwrap_or(0);
        for (id, staged) in &self.entries {
            if let Some(before) = self.base.entries.get(id) {
                count -= references(before);
            }
            if let Some(after) = staged {
                count += references(after);
            }
        }
        Ok(count > 0)
    }

    async fn commit(self) -> Result<(), StoreError> {
        if self.fail_commit.swap(false, Ordering::SeqCst) {
            return Err(StoreError::Aborted("injected commit failure".to_string()));
        }

        let Self {
            slot,
            base,
            accounts,
            entries,
            last_number,
            ..
        } = self;
        // Release our handle so an unshared ledger is updated without a copy.
        drop(base);

        let mut committed = slot
            .committed
            .write()
            .map_err(|_| StoreError::Backend("lock poisoned".to_string()))?;
        let ledger = Arc::make_mut(&mut *committed);
        for (id, account) in accounts {
            match account {
                Some(a) => ledger.accounts.insert(id, a),
                None => ledger.accounts.remove(&id),
            };
        }
        for (id, entry) in entries {
            ledger.remove_entry(id);
            if let Some(e) = entry {
                ledger.insert_entry(e);
            }
        }
        ledger.last_number = last_number;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerStore for InMemoryLedgerStore {
    type Tx = InMemoryTransaction;

    async fn begin_atomic_write(&self, tenant_id: TenantId) -> Result<Self::Tx, StoreError> {
        let slot = self.slot(tenant_id)?;
        let writer = Arc::clone(&slot.writer).lock_owned().await;
        // Snapshot only after the writer lock is held so no commit is lost.
        let base = slot.snapshot()?;

        Ok(InMemoryTransaction {
            tenant_id,
            last_number: base.last_number,
            slot,
            base,
            accounts: BTreeMap::new(),
            entries: BTreeMap::new(),
            fail_commit: Arc::clone(&self.fail_next_commit),
            _writer: writer,
        })
    }

    async fn fetch_posted_lines(
        &self,
        tenant_id: TenantId,
        query: &LineQuery,
    ) -> Result<Vec<PostedLine>, StoreError> {
        let ledger = self.snapshot(tenant_id)?;

        let mut entries = ledger
            .entries
            .values()
            .filter(|e| e.status.is_ledger_visible() && query.date_range.contains(e.entry_date))
            .map(|e| {
                e.entry_number.map(|n| (n, e)).ok_or_else(|| {
                    StoreError::Corrupt(format!("posted entry {} has no entry number", e.id))
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|(n, _)| *n);

        Ok(entries
            .into_iter()
            .flat_map(|(number, entry)| {
                entry
                    .lines
                    .iter()
                    .filter(|l| query.matches_account(l.account_id))
                    .map(move |l| PostedLine {
                        entry_id: entry.id,
                        entry_number: number,
                        entry_date: entry.entry_date,
                        entry_description: entry.description.clone(),
                        line_id: l.id,
                        account_id: l.account_id,
                        description: l.description.clone(),
                        debit_amount: l.debit_amount,
                        credit_amount: l.credit_amount,
                    })
            })
            .collect())
    }

    async fn get_entry(
        &self,
        tenant_id: TenantId,
        entry_id: EntryId,
    ) -> Result<Option<JournalEntry>, StoreError> {
        Ok(self.snapshot(tenant_id)?.entries.get(&entry_id).cloned())
    }

    async fn list_entries(
        &self,
        tenant_id: TenantId,
        filter: &EntryFilter,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        let ledger = self.snapshot(tenant_id)?;
        let mut out: Vec<JournalEntry> = ledger
            .entries
            .values()
            .filter(|e| filter.matches(e))
            .cloned()
            .collect();
        out.sort_by_key(|e| {
            (
                e.entry_date,
                e.entry_number.is_none(),
                e.entry_number,
                e.created_at,
            )
        });
        Ok(out)
    }

    async fn get_account(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        Ok(self.snapshot(tenant_id)?.accounts.get(&account_id).cloned())
    }

    async fn list_accounts(&self, tenant_id: TenantId) -> Result<Vec<Account>, StoreError> {
        let mut accounts: Vec<Account> = self
            .snapshot(tenant_id)?
            .accounts
            .values()
            .cloned()
            .collect();
        accounts.sort_by(|a, b| a.code.cmp(&b.code));
        Ok(accounts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, Utc};
    use forgeledger_accounting::{AccountType, DraftEntry, DraftHeader, LineInput, NewAccount};
    use forgeledger_core::{Money, UserId};

    fn account(tenant_id: TenantId, code: &str) -> Account {
        Account::open(
            AccountId::new(),
            tenant_id,
            NewAccount::new(code, code, AccountType::Asset),
            Utc::now(),
        )
        .unwrap()
    }

    fn draft(tenant_id: TenantId, a: AccountId, b: AccountId) -> JournalEntry {
        DraftEntry::new(
            EntryId::new(),
            DraftHeader {
                tenant_id,
                entry_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
                description: "test".into(),
                reference: None,
                created_by: UserId::new(),
            },
            vec![
                LineInput::debit(a, Money::from_cents(100)),
                LineInput::credit(b, Money::from_cents(100)),
            ],
            Utc::now(),
        )
        .unwrap()
        .into_entry()
    }

    #[tokio::test]
    async fn uncommitted_writes_are_invisible_and_dropped() {
        let store = InMemoryLedgerStore::new();
        let tenant = TenantId::new();
        let cash = account(tenant, "1000");

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        tx.insert_account(&cash).await.unwrap();
        assert_eq!(tx.next_entry_number().await.unwrap(), 1);
        assert!(store.get_account(tenant, cash.id).await.unwrap().is_none());
        drop(tx);

        assert!(store.list_accounts(tenant).await.unwrap().is_empty());
        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        assert_eq!(tx.next_entry_number().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn commit_publishes_staged_state() {
        let store = InMemoryLedgerStore::new();
        let tenant = TenantId::new();
        let cash = account(tenant, "1000");

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        tx.insert_account(&cash).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.get_account(tenant, cash.id).await.unwrap(), Some(cash));
    }

    #[tokio::test]
    async fn injected_failure_aborts_only_the_next_commit() {
        let store = InMemoryLedgerStore::new();
        let tenant = TenantId::new();
        store.fail_next_commit();

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        tx.insert_account(&account(tenant, "1000")).await.unwrap();
        assert!(matches!(tx.commit().await, Err(StoreError::Aborted(_))));
        assert!(store.list_accounts(tenant).await.unwrap().is_empty());

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        tx.insert_account(&account(tenant, "1000")).await.unwrap();
        tx.commit().await.unwrap();
        assert_eq!(store.list_accounts(tenant).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn writes_for_another_tenant_are_rejected() {
        let store = InMemoryLedgerStore::new();
        let tenant = TenantId::new();
        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        let err = tx.insert_account(&account(TenantId::new(), "1000")).await;
        assert!(matches!(err, Err(StoreError::TenantIsolation(_))));
    }

    #[tokio::test]
    async fn drafts_are_not_ledger_visible() {
        let store = InMemoryLedgerStore::new();
        let tenant = TenantId::new();
        let a = account(tenant, "1000");
        let b = account(tenant, "1100");

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        tx.insert_account(&a).await.unwrap();
        tx.insert_account(&b).await.unwrap();
        let entry = draft(tenant, a.id, b.id);
        tx.insert_entry_with_lines(&entry).await.unwrap();
        assert!(tx.account_is_referenced(a.id).await.unwrap());
        tx.commit().await.unwrap();

        let lines = store.fetch_posted_lines(tenant, &LineQuery::all()).await.unwrap();
        assert!(lines.is_empty());

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        let n = tx.next_entry_number().await.unwrap();
        tx.update_entry_status(
            entry.id,
            &StatusChange::Posted {
                entry_number: n,
                posted_at: Utc::now(),
            },
        )
        .await
        .unwrap();
        tx.commit().await.unwrap();

        let lines = store
            .fetch_posted_lines(tenant, &LineQuery::for_accounts([a.id]))
            .await
            .unwrap();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].entry_number, 1);
        assert_eq!(lines[0].debit_amount, Money::from_cents(100));
    }

    #[tokio::test]
    async fn tenants_do_not_share_books() {
        let store = InMemoryLedgerStore::new();
        let t1 = TenantId::new();
        let t2 = TenantId::new();

        let mut tx = store.begin_atomic_write(t1).await.unwrap();
        tx.insert_account(&account(t1, "1000")).await.unwrap();
        tx.commit().await.unwrap();

        // Holding t1's writer lock must not block t2.
        let _held = store.begin_atomic_write(t1).await.unwrap();
        let mut tx = store.begin_atomic_write(t2).await.unwrap();
        assert!(tx.find_account_by_code("1000").await.unwrap().is_none());
        assert_eq!(tx.next_entry_number().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn commit_updates_unshared_books_in_place() {
        let store = InMemoryLedgerStore::new();
        let tenant = TenantId::new();

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        tx.insert_account(&account(tenant, "1000")).await.unwrap();
        tx.commit().await.unwrap();
        let before = Arc::as_ptr(&store.snapshot(tenant).unwrap());

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        tx.insert_account(&account(tenant, "1100")).await.unwrap();
        tx.commit().await.unwrap();

        let after = store.snapshot(tenant).unwrap();
        assert_eq!(Arc::as_ptr(&after), before);
        assert_eq!(after.accounts.len(), 2);
    }

    #[tokio::test]
    async fn held_snapshot_is_untouched_by_later_commits() {
        let store = InMemoryLedgerStore::new();
        let tenant = TenantId::new();

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        tx.insert_account(&account(tenant, "1000")).await.unwrap();
        tx.commit().await.unwrap();
        let held = store.snapshot(tenant).unwrap();

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        tx.insert_account(&account(tenant, "1100")).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(held.accounts.len(), 1);
        let current = store.snapshot(tenant).unwrap();
        assert!(!Arc::ptr_eq(&held, &current));
        assert_eq!(current.accounts.len(), 2);
    }

    #[tokio::test]
    async fn line_references_follow_staged_and_committed_drafts() {
        let store = InMemoryLedgerStore::new();
        let tenant = TenantId::new();
        let a = account(tenant, "1000");
        let b = account(tenant, "1100");
        let c = account(tenant, "1200");

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        for acct in [&a, &b, &c] {
            tx.insert_account(acct).await.unwrap();
        }
        let entry = draft(tenant, a.id, b.id);
        tx.insert_entry_with_lines(&entry).await.unwrap();
        tx.commit().await.unwrap();

        // Move the debit line from a to c without committing.
        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        let mut moved = entry.clone();
        moved.lines[0].account_id = c.id;
        tx.replace_draft(&moved).await.unwrap();
        assert!(!tx.account_is_referenced(a.id).await.unwrap());
        assert!(tx.account_is_referenced(c.id).await.unwrap());
        drop(tx);

        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        assert!(tx.account_is_referenced(a.id).await.unwrap());
        tx.delete_draft(entry.id).await.unwrap();
        assert!(!tx.account_is_referenced(a.id).await.unwrap());
        assert!(!tx.account_is_referenced(b.id).await.unwrap());
        tx.commit().await.unwrap();

        let books = store.snapshot(tenant).unwrap();
        assert!(books.entries.is_empty());
        assert!(books.line_refs.is_empty());
        let mut tx = store.begin_atomic_write(tenant).await.unwrap();
        tx.delete_account(a.id).await.unwrap();
        tx.commit().await.unwrap();
    }
}
