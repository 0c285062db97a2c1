//! Balance and report engine.
//!
//! Reads committed posted lines only and takes no locks, so reports never
//! wait on in-flight posts. Aggregation itself is pure and lives in
//! `forgeledger_accounting::reports`.

use std::sync::Arc;

use chrono::{Days, NaiveDate};
use tracing::{debug, error, instrument};

use forgeledger_accounting::{
    Account, AccountActivity, BalanceSheet, DateRange, IncomeStatement, LedgerError, PostedLine,
    TrialBalance, descendants, net_balance,
};
use forgeledger_core::{AccountId, Money, TenantId};

use crate::context::OperationContext;
use crate::error::{EngineError, EngineResult};
use crate::ledger_store::{LedgerStore, LineQuery};

#[derive(Debug)]
pub struct ReportEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for ReportEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> ReportEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    async fn account(&self, tenant_id: TenantId, account_id: AccountId) -> EngineResult<Account> {
        self.store
            .get_account(tenant_id, account_id)
            .await?
            .ok_or_else(|| LedgerError::AccountNotFound(account_id).into())
    }

    /// Posted lines, then the accounts they reference.
    ///
    /// Lines are read first: an account referenced by a committed line can
    /// never be deleted, so the later account read covers every line even when
    /// other writers commit in between.
    async fn lines_with_accounts(
        &self,
        tenant_id: TenantId,
        query: &LineQuery,
    ) -> EngineResult<(Vec<Account>, Vec<PostedLine>)> {
        let lines = self.store.fetch_posted_lines(tenant_id, query).await?;
        let accounts = self.store.list_accounts(tenant_id).await?;
        Ok((accounts, lines))
    }

    /// Debit-positive balance of one account over posted lines dated on or
    /// before `as_of`. Callers flip the sign for credit-normal accounts.
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn account_balance(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        account_id: AccountId,
        as_of: NaiveDate,
    ) -> EngineResult<Money> {
        let balance = ctx
            .run(async {
                self.account(tenant_id, account_id).await?;
                let query = LineQuery::for_accounts([account_id]).within(DateRange::up_to(as_of));
                let lines = self.store.fetch_posted_lines(tenant_id, &query).await?;
                Ok(net_balance(&lines)?)
            })
            .await?;
        debug!(%balance, "account balance computed");
        Ok(balance)
    }

    /// Balance of an account together with all of its descendants.
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn rollup_balance(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        account_id: AccountId,
        as_of: NaiveDate,
    ) -> EngineResult<Money> {
        ctx.run(async {
            let accounts = self.store.list_accounts(tenant_id).await?;
            if !accounts.iter().any(|a| a.id == account_id) {
                return Err(LedgerError::AccountNotFound(account_id).into());
            }
            let ids = descendants(&accounts, account_id);
            let query = LineQuery::for_accounts(ids).within(DateRange::up_to(as_of));
            let lines = self.store.fetch_posted_lines(tenant_id, &query).await?;
            Ok(net_balance(&lines)?)
        })
        .await
    }

    /// Trial balance as of a date.
    ///
    /// Aggregate debits must equal aggregate credits. A mismatch means stored
    /// history is corrupt: it is logged on the `ledger.consistency` target and
    /// returned as [`EngineError::ConsistencyFault`].
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn trial_balance(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        as_of: NaiveDate,
    ) -> EngineResult<TrialBalance> {
        let trial = ctx
            .run(async {
                let query = LineQuery::all().within(DateRange::up_to(as_of));
                let (accounts, lines) = self.lines_with_accounts(tenant_id, &query).await?;
                Ok(TrialBalance::build(as_of, &accounts, &lines)?)
            })
            .await?;

        if let Err(fault) = trial.verify() {
            error!(
                target: "ledger.consistency",
                tenant_id = %tenant_id,
                as_of = %fault.as_of,
                total_debits = %fault.total_debits,
                total_credits = %fault.total_credits,
                "trial balance out of balance"
            );
            return Err(EngineError::ConsistencyFault(fault));
        }

        debug!(rows = trial.rows.len(), "trial balance computed");
        Ok(trial)
    }

    /// Revenue and expense activity with `start <= entry_date <= end`.
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn income_statement(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        start: NaiveDate,
        end: NaiveDate,
    ) -> EngineResult<IncomeStatement> {
        let range = DateRange::between(start, end)?;
        ctx.run(async {
            let query = LineQuery::all().within(range);
            let (accounts, lines) = self.lines_with_accounts(tenant_id, &query).await?;
            Ok(IncomeStatement::build(start, end, &accounts, &lines)?)
        })
        .await
    }

    /// Asset, liability and equity balances as of a date.
    ///
    /// Assets = Liabilities + Equity is not enforced here; see
    /// [`BalanceSheet::is_balanced`].
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn balance_sheet(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        as_of: NaiveDate,
    ) -> EngineResult<BalanceSheet> {
        ctx.run(async {
            let query = LineQuery::all().within(DateRange::up_to(as_of));
            let (accounts, lines) = self.lines_with_accounts(tenant_id, &query).await?;
            Ok(BalanceSheet::build(as_of, &accounts, &lines)?)
        })
        .await
    }

    /// Account ledger with running balance over `range`. The opening balance
    /// covers every posted line dated before `range.start`.
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn account_activity(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        account_id: AccountId,
        range: DateRange,
    ) -> EngineResult<AccountActivity> {
        ctx.run(async {
            self.account(tenant_id, account_id).await?;

            let opening_balance = match range.start.and_then(|s| s.checked_sub_days(Days::new(1))) {
                Some(day_before) => {
                    let query = LineQuery::for_accounts([account_id])
                        .within(DateRange::up_to(day_before));
                    net_balance(&self.store.fetch_posted_lines(tenant_id, &query).await?)?
                }
                None => Money::ZERO,
            };

            let query = LineQuery::for_accounts([account_id]).within(range);
            let lines = self.store.fetch_posted_lines(tenant_id, &query).await?;
            Ok(AccountActivity::build(account_id, range, opening_balance, &lines)?)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    use forgeledger_accounting::{AccountType, JournalEntry, LineInput, NewAccount};
    use forgeledger_core::{EntryId, UserId};

    use super::*;
    use crate::Ledger;
    use crate::ledger_store::{EntryFilter, InMemoryLedgerStore, InMemoryTransaction, StoreError};
    use crate::posting::NewEntry;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, d).unwrap()
    }

    /// Store whose first read after `arm` lets another writer open a revenue
    /// account and post to it before the read returns.
    struct RacingStore {
        inner: Arc<InMemoryLedgerStore>,
        writer: Ledger<InMemoryLedgerStore>,
        tenant: TenantId,
        cash: AccountId,
        armed: AtomicBool,
        opened: AtomicU32,
    }

    impl RacingStore {
        fn arm(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }

        async fn interleave(&self) {
            if !self.armed.swap(false, Ordering::SeqCst) {
                return;
            }
            let n = self.opened.fetch_add(1, Ordering::SeqCst);
            let ctx = OperationContext::background();
            let late = self
                .writer
                .chart
                .create_account(
                    &ctx,
                    self.tenant,
                    NewAccount::new(format!("41{n:02}"), "Late sales", AccountType::Revenue),
                )
                .await
                .unwrap();
            self.writer
                .posting
                .create_and_post(
                    &ctx,
                    self.tenant,
                    NewEntry::new(
                        day(10),
                        "Late sale",
                        UserId::new(),
                        vec![
                            LineInput::debit(self.cash, Money::from_cents(500)),
                            LineInput::credit(late.id, Money::from_cents(500)),
                        ],
                    ),
                )
                .await
                .unwrap();
        }
    }

    #[async_trait::async_trait]
    impl LedgerStore for RacingStore {
        type Tx = InMemoryTransaction;

        async fn begin_atomic_write(&self, tenant_id: TenantId) -> Result<Self::Tx, StoreError> {
            self.inner.begin_atomic_write(tenant_id).await
        }

        async fn fetch_posted_lines(
            &self,
            tenant_id: TenantId,
            query: &LineQuery,
        ) -> Result<Vec<PostedLine>, StoreError> {
            let lines = self.inner.fetch_posted_lines(tenant_id, query).await?;
            self.interleave().await;
            Ok(lines)
        }

        async fn get_entry(
            &self,
            tenant_id: TenantId,
            entry_id: EntryId,
        ) -> Result<Option<JournalEntry>, StoreError> {
            self.inner.get_entry(tenant_id, entry_id).await
        }

        async fn list_entries(
            &self,
            tenant_id: TenantId,
            filter: &EntryFilter,
        ) -> Result<Vec<JournalEntry>, StoreError> {
            self.inner.list_entries(tenant_id, filter).await
        }

        async fn get_account(
            &self,
            tenant_id: TenantId,
            account_id: AccountId,
        ) -> Result<Option<Account>, StoreError> {
            self.inner.get_account(tenant_id, account_id).await
        }

        async fn list_accounts(&self, tenant_id: TenantId) -> Result<Vec<Account>, StoreError> {
            let accounts = self.inner.list_accounts(tenant_id).await?;
            self.interleave().await;
            Ok(accounts)
        }
    }

    async fn racing_books() -> (Arc<RacingStore>, TenantId) {
        let inner = Arc::new(InMemoryLedgerStore::new());
        let writer = Ledger::new(Arc::clone(&inner));
        let tenant = TenantId::new();
        let cash = writer
            .chart
            .create_account(
                &OperationContext::background(),
                tenant,
                NewAccount::new("1000", "Cash", AccountType::Asset),
            )
            .await
            .unwrap();
        let store = RacingStore {
            inner,
            writer,
            tenant,
            cash: cash.id,
            armed: AtomicBool::new(false),
            opened: AtomicU32::new(0),
        };
        (Arc::new(store), tenant)
    }

    #[tokio::test]
    async fn statements_tolerate_accounts_committed_mid_read() {
        let (store, tenant) = racing_books().await;
        let reports = ReportEngine::new(Arc::clone(&store));
        let ctx = OperationContext::background();

        store.arm();
        let trial = reports.trial_balance(&ctx, tenant, day(31)).await.unwrap();
        assert!(trial.is_balanced());

        store.arm();
        let income = reports.income_statement(&ctx, tenant, day(1), day(31)).await.unwrap();
        assert_eq!(income.revenue_total, Money::from_cents(500));

        store.arm();
        let sheet = reports.balance_sheet(&ctx, tenant, day(31)).await.unwrap();
        assert_eq!(sheet.assets.total, Money::from_cents(1000));
        assert!(sheet.is_balanced());

        assert_eq!(store.opened.load(Ordering::SeqCst), 3);
        let settled = reports.trial_balance(&ctx, tenant, day(31)).await.unwrap();
        assert_eq!(settled.rows.len(), 4);
        assert_eq!(settled.total_debits, Money::from_cents(1500));
        assert!(settled.is_balanced());
    }
}
