//! Chart of accounts service.
//!
//! Account rules live in `forgeledger_accounting::account`; this module loads
//! and stores accounts through one atomic write per operation.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, instrument};

use forgeledger_accounting::{Account, LedgerError, NewAccount, default_chart};
use forgeledger_core::{AccountId, TenantId};

use crate::context::OperationContext;
use crate::error::EngineResult;
use crate::ledger_store::{LedgerStore, LedgerTransaction};

/// Load an account inside a write or fail with `AccountNotFound`.
pub(crate) async fn resolve_in_tx<T: LedgerTransaction>(
    tx: &mut T,
    account_id: AccountId,
) -> EngineResult<Account> {
    tx.find_account(account_id)
        .await?
        .ok_or_else(|| LedgerError::AccountNotFound(account_id).into())
}

/// Every account must exist in the tenant's chart and be active.
pub(crate) async fn ensure_postable<T: LedgerTransaction>(
    tx: &mut T,
    account_ids: BTreeSet<AccountId>,
) -> EngineResult<()> {
    for account_id in account_ids {
        resolve_in_tx(tx, account_id).await?.ensure_postable()?;
    }
    Ok(())
}

/// Hierarchical account registry of each tenant.
#[derive(Debug)]
pub struct ChartOfAccounts<S> {
    store: Arc<S>,
}

impl<S> Clone for ChartOfAccounts<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

impl<S: LedgerStore> ChartOfAccounts<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Open a new account.
    ///
    /// Fails with `DuplicateCode` if the code is taken within the tenant and
    /// `InvalidParent` if the parent does not exist in the tenant's chart.
    #[instrument(skip(self, ctx, new), fields(tenant_id = %tenant_id, code = %new.code), err)]
    pub async fn create_account(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        new: NewAccount,
    ) -> EngineResult<Account> {
        let account = Account::open(AccountId::new(), tenant_id, new, Utc::now())?;

        let (tx, account) = ctx
            .run(async {
                let mut tx = self.store.begin_atomic_write(tenant_id).await?;
                insert_new(&mut tx, tenant_id, &account).await?;
                Ok((tx, account))
            })
            .await?;
        tx.commit().await?;

        info!(account_id = %account.id, account_type = ?account.account_type, "account created");
        Ok(account)
    }

    /// Install the starter chart; accounts whose code already exists are skipped.
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn install_default_chart(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
    ) -> EngineResult<Vec<Account>> {
        let now = Utc::now();
        let accounts = default_chart()
            .into_iter()
            .map(|new| Account::open(AccountId::new(), tenant_id, new, now))
            .collect::<Result<Vec<_>, _>>()?;

        let (tx, created) = ctx
            .run(async {
                let mut tx = self.store.begin_atomic_write(tenant_id).await?;
                let mut created = Vec::new();
                for account in accounts {
                    if tx.find_account_by_code(&account.code).await?.is_some() {
                        continue;
                    }
                    tx.insert_account(&account).await?;
                    created.push(account);
                }
                Ok((tx, created))
            })
            .await?;
        tx.commit().await?;

        info!(created = created.len(), "default chart installed");
        Ok(created)
    }

    /// Committed account by id; fails with `AccountNotFound`.
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn resolve_account(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        account_id: AccountId,
    ) -> EngineResult<Account> {
        ctx.run(async {
            self.store
                .get_account(tenant_id, account_id)
                .await?
                .ok_or_else(|| LedgerError::AccountNotFound(account_id).into())
        })
        .await
    }

    /// Accounts ordered by code.
    pub async fn list_accounts(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
    ) -> EngineResult<Vec<Account>> {
        let accounts = ctx
            .run(async { Ok(self.store.list_accounts(tenant_id).await?) })
            .await?;
        debug!(tenant_id = %tenant_id, count = accounts.len(), "accounts listed");
        Ok(accounts)
    }

    /// Direct children of `parent_id`, ordered by code.
    pub async fn children(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        parent_id: AccountId,
    ) -> EngineResult<Vec<Account>> {
        let accounts = self.list_accounts(ctx, tenant_id).await?;
        if !accounts.iter().any(|a| a.id == parent_id) {
            return Err(LedgerError::AccountNotFound(parent_id).into());
        }
        Ok(accounts
            .into_iter()
            .filter(|a| a.parent_id == Some(parent_id))
            .collect())
    }

    /// Deactivate an account. History is kept; only new lines are refused.
    ///
    /// Fails with `SystemAccountProtected` for system accounts.
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn deactivate_account(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        account_id: AccountId,
    ) -> EngineResult<Account> {
        let account = self
            .modify(ctx, tenant_id, account_id, |account, _| account.deactivate())
            .await?;
        info!(account_id = %account_id, "account deactivated");
        Ok(account)
    }

    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn reactivate_account(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        account_id: AccountId,
    ) -> EngineResult<Account> {
        let account = self
            .modify(ctx, tenant_id, account_id, |account, _| {
                account.reactivate();
                Ok(())
            })
            .await?;
        info!(account_id = %account_id, "account reactivated");
        Ok(account)
    }

    #[instrument(skip(self, ctx, name), fields(tenant_id = %tenant_id), err)]
    pub async fn rename_account(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        account_id: AccountId,
        name: &str,
    ) -> EngineResult<Account> {
        self.modify(ctx, tenant_id, account_id, |account, _| account.rename(name))
            .await
    }

    /// Change an account's code; fails with `CodeImmutable` once any line
    /// references the account and `DuplicateCode` if the code is taken.
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn change_code(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        account_id: AccountId,
        code: &str,
    ) -> EngineResult<Account> {
        let (tx, account) = ctx
            .run(async {
                let mut tx = self.store.begin_atomic_write(tenant_id).await?;
                let mut account = resolve_in_tx(&mut tx, account_id).await?;
                let referenced = tx.account_is_referenced(account_id).await?;
                account.change_code(code, referenced)?;

                if let Some(other) = tx.find_account_by_code(&account.code).await? {
                    if other.id != account_id {
                        return Err(LedgerError::DuplicateCode(account.code).into());
                    }
                }
                tx.update_account(&account).await?;
                Ok((tx, account))
            })
            .await?;
        tx.commit().await?;

        info!(account_id = %account_id, code = %account.code, "account code changed");
        Ok(account)
    }

    /// Hard-delete an account nothing references.
    ///
    /// Fails with `SystemAccountProtected` for system accounts and
    /// `AccountInUse` once any journal line references it.
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id), err)]
    pub async fn delete_account(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        account_id: AccountId,
    ) -> EngineResult<()> {
        let tx = ctx
            .run(async {
                let mut tx = self.store.begin_atomic_write(tenant_id).await?;
                let account = resolve_in_tx(&mut tx, account_id).await?;
                let referenced = tx.account_is_referenced(account_id).await?;
                account.ensure_deletable(referenced)?;
                tx.delete_account(account_id).await?;
                Ok(tx)
            })
            .await?;
        tx.commit().await?;

        info!(account_id = %account_id, "account deleted");
        Ok(())
    }

    /// Load, mutate and store one account in a single write.
    async fn modify<F>(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        account_id: AccountId,
        change: F,
    ) -> EngineResult<Account>
    where
        F: FnOnce(&mut Account, TenantId) -> Result<(), LedgerError> + Send,
    {
        let (tx, account) = ctx
            .run(async {
                let mut tx = self.store.begin_atomic_write(tenant_id).await?;
                let mut account = resolve_in_tx(&mut tx, account_id).await?;
                change(&mut account, tenant_id)?;
                tx.update_account(&account).await?;
                Ok((tx, account))
            })
            .await?;
        tx.commit().await?;
        Ok(account)
    }
}

async fn insert_new<T: LedgerTransaction>(
    tx: &mut T,
    tenant_id: TenantId,
    account: &Account,
) -> EngineResult<()> {
    if tx.find_account_by_code(&account.code).await?.is_some() {
        return Err(LedgerError::DuplicateCode(account.code.clone()).into());
    }
    if let Some(parent_id) = account.parent_id {
        let parent = tx.find_account(parent_id).await?;
        Account::validate_parent(tenant_id, parent_id, parent.as_ref())?;
    }
    tx.insert_account(account).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use forgeledger_accounting::{AccountType, NormalSide};

    use crate::error::EngineError;
    use crate::ledger_store::InMemoryLedgerStore;

    fn chart() -> ChartOfAccounts<InMemoryLedgerStore> {
        ChartOfAccounts::new(Arc::new(InMemoryLedgerStore::new()))
    }

    fn ctx() -> OperationContext {
        OperationContext::background()
    }

    fn ledger_err(err: EngineError) -> LedgerError {
        match err {
            EngineError::Ledger(e) => e,
            other => panic!("expected ledger error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn create_then_resolve() {
        let chart = chart();
        let tenant = TenantId::new();
        let cash = chart
            .create_account(&ctx(), tenant, NewAccount::new("1000", "Cash", AccountType::Asset))
            .await
            .unwrap();

        assert_eq!(cash.normal_side, NormalSide::Debit);
        assert!(cash.is_active);
        assert_eq!(chart.resolve_account(&ctx(), tenant, cash.id).await.unwrap(), cash);
    }

    #[tokio::test]
    async fn duplicate_code_is_rejected_per_tenant() {
        let chart = chart();
        let tenant = TenantId::new();
        let new = NewAccount::new("1000", "Cash", AccountType::Asset);
        chart.create_account(&ctx(), tenant, new.clone()).await.unwrap();

        let err = chart.create_account(&ctx(), tenant, new.clone()).await.unwrap_err();
        assert_eq!(ledger_err(err), LedgerError::DuplicateCode("1000".into()));

        // Same code in another tenant is fine.
        chart.create_account(&ctx(), TenantId::new(), new).await.unwrap();
    }

    #[tokio::test]
    async fn parent_from_other_tenant_is_invalid() {
        let chart = chart();
        let t1 = TenantId::new();
        let t2 = TenantId::new();
        let parent = chart
            .create_account(&ctx(), t1, NewAccount::new("1000", "Assets", AccountType::Asset))
            .await
            .unwrap();

        let err = chart
            .create_account(
                &ctx(),
                t2,
                NewAccount::new("1010", "Petty cash", AccountType::Asset).with_parent(parent.id),
            )
            .await
            .unwrap_err();
        assert_eq!(ledger_err(err), LedgerError::InvalidParent(parent.id));

        let child = chart
            .create_account(
                &ctx(),
                t1,
                NewAccount::new("1010", "Petty cash", AccountType::Asset).with_parent(parent.id),
            )
            .await
            .unwrap();
        let children = chart.children(&ctx(), t1, parent.id).await.unwrap();
        assert_eq!(children, vec![child]);
    }

    #[tokio::test]
    async fn unknown_account_is_not_found() {
        let chart = chart();
        let id = AccountId::new();
        let err = chart.resolve_account(&ctx(), TenantId::new(), id).await.unwrap_err();
        assert_eq!(ledger_err(err), LedgerError::AccountNotFound(id));
    }

    #[tokio::test]
    async fn system_accounts_are_protected() {
        let chart = chart();
        let tenant = TenantId::new();
        let installed = chart.install_default_chart(&ctx(), tenant).await.unwrap();
        assert_eq!(installed.len(), default_chart().len());

        let cash = installed.iter().find(|a| a.code == "1000").unwrap();
        let err = chart.deactivate_account(&ctx(), tenant, cash.id).await.unwrap_err();
        assert_eq!(ledger_err(err), LedgerError::SystemAccountProtected(cash.id));

        let err = chart.delete_account(&ctx(), tenant, cash.id).await.unwrap_err();
        assert_eq!(ledger_err(err), LedgerError::SystemAccountProtected(cash.id));

        // Installing again adds nothing.
        assert!(chart.install_default_chart(&ctx(), tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deactivate_rename_and_recode_unreferenced_account() {
        let chart = chart();
        let tenant = TenantId::new();
        let acct = chart
            .create_account(&ctx(), tenant, NewAccount::new("6100", "Rent", AccountType::Expense))
            .await
            .unwrap();

        let acct = chart.deactivate_account(&ctx(), tenant, acct.id).await.unwrap();
        assert!(!acct.is_active);
        let acct = chart.reactivate_account(&ctx(), tenant, acct.id).await.unwrap();
        assert!(acct.is_active);

        let acct = chart.rename_account(&ctx(), tenant, acct.id, "Office rent").await.unwrap();
        assert_eq!(acct.name, "Office rent");
        let acct = chart.change_code(&ctx(), tenant, acct.id, "6110").await.unwrap();
        assert_eq!(acct.code, "6110");

        chart.delete_account(&ctx(), tenant, acct.id).await.unwrap();
        assert!(chart.list_accounts(&ctx(), tenant).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn change_code_rejects_taken_code() {
        let chart = chart();
        let tenant = TenantId::new();
        chart
            .create_account(&ctx(), tenant, NewAccount::new("1000", "Cash", AccountType::Asset))
            .await
            .unwrap();
        let bank = chart
            .create_account(&ctx(), tenant, NewAccount::new("1010", "Bank", AccountType::Asset))
            .await
            .unwrap();

        let err = chart.change_code(&ctx(), tenant, bank.id, "1000").await.unwrap_err();
        assert_eq!(ledger_err(err), LedgerError::DuplicateCode("1000".into()));
    }
}
