//! Chart of accounts rules.
//!
//! An account's normal side always follows from its type. Codes are unique per
//! tenant and freeze once any journal line references the account; referenced
//! accounts are deactivated, never deleted.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use forgeledger_core::{AccountId, Entity, Money, TenantId};

use crate::error::{LedgerError, LedgerResult};

/// Longest accepted account code.
pub const MAX_CODE_LEN: usize = 32;

/// High-level account type (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountType {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountType {
    pub const ALL: [AccountType; 5] = [
        AccountType::Asset,
        AccountType::Liability,
        AccountType::Equity,
        AccountType::Revenue,
        AccountType::Expense,
    ];

    /// ASSET/EXPENSE accumulate on the debit side, everything else on credit.
    pub fn normal_side(self) -> NormalSide {
        match self {
            AccountType::Asset | AccountType::Expense => NormalSide::Debit,
            AccountType::Liability | AccountType::Equity | AccountType::Revenue => {
                NormalSide::Credit
            }
        }
    }

    pub fn is_balance_sheet(self) -> bool {
        matches!(
            self,
            AccountType::Asset | AccountType::Liability | AccountType::Equity
        )
    }
}

/// Side on which an account ordinarily carries a positive balance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NormalSide {
    Debit,
    Credit,
}

impl NormalSide {
    /// Convert a debit-positive balance into this side's sign convention.
    pub fn present(self, debit_positive: Money) -> Money {
        match self {
            NormalSide::Debit => debit_positive,
            NormalSide::Credit => debit_positive.negate(),
        }
    }
}

/// Input for opening a new account.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewAccount {
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub parent_id: Option<AccountId>,
    pub is_system: bool,
}

impl NewAccount {
    pub fn new(
        code: impl Into<String>,
        name: impl Into<String>,
        account_type: AccountType,
    ) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            account_type,
            parent_id: None,
            is_system: false,
        }
    }

    pub fn with_parent(mut self, parent_id: AccountId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn system(mut self) -> Self {
        self.is_system = true;
        self
    }
}

/// An account in a tenant's chart of accounts.
///
/// Accounts are never hard-deleted once journal lines reference them; they are
/// deactivated instead.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub tenant_id: TenantId,
    /// Unique within the tenant, e.g. "1000".
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub normal_side: NormalSide,
    pub is_system: bool,
    pub is_active: bool,
    pub parent_id: Option<AccountId>,
    pub created_at: DateTime<Utc>,
}

impl Entity for Account {
    type Id = AccountId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Account {
    /// Open an account. The normal side is always derived from the type.
    ///
    /// Parent existence and code uniqueness need the rest of the chart and are
    /// checked by the caller ([`Account::validate_parent`]).
    pub fn open(
        id: AccountId,
        tenant_id: TenantId,
        new: NewAccount,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let code = validate_code(&new.code)?;
        let name = validate_name(&new.name)?;

        Ok(Self {
            id,
            tenant_id,
            code,
            name,
            account_type: new.account_type,
            normal_side: new.account_type.normal_side(),
            is_system: new.is_system,
            is_active: true,
            parent_id: new.parent_id,
            created_at: now,
        })
    }

    /// Check a resolved parent: it must exist and belong to the same tenant.
    pub fn validate_parent(
        tenant_id: TenantId,
        parent_id: AccountId,
        parent: Option<&Account>,
    ) -> LedgerResult<()> {
        match parent {
            Some(p) if p.tenant_id == tenant_id => Ok(()),
            _ => Err(LedgerError::InvalidParent(parent_id)),
        }
    }

    /// Lines may only be written against existing, active accounts.
    pub fn ensure_postable(&self) -> LedgerResult<()> {
        if !self.is_active {
            return Err(LedgerError::AccountInactive(self.id));
        }
        Ok(())
    }

    pub fn deactivate(&mut self) -> LedgerResult<()> {
        if self.is_system {
            return Err(LedgerError::SystemAccountProtected(self.id));
        }
        self.is_active = false;
        Ok(())
    }

    pub fn reactivate(&mut self) {
        self.is_active = true;
    }

    pub fn rename(&mut self, name: &str) -> LedgerResult<()> {
        self.name = validate_name(name)?;
        Ok(())
    }

    /// Codes are immutable once any journal line references the account.
    pub fn change_code(&mut self, code: &str, referenced: bool) -> LedgerResult<()> {
        if referenced {
            return Err(LedgerError::CodeImmutable(self.id));
        }
        self.code = validate_code(code)?;
        Ok(())
    }

    /// Hard deletion is only allowed for unreferenced, non-system accounts.
    pub fn ensure_deletable(&self, referenced: bool) -> LedgerResult<()> {
        if self.is_system {
            return Err(LedgerError::SystemAccountProtected(self.id));
        }
        if referenced {
            return Err(LedgerError::AccountInUse(self.id));
        }
        Ok(())
    }
}

fn validate_code(code: &str) -> LedgerResult<String> {
    let code = code.trim();
    if code.is_empty() {
        return Err(LedgerError::InvalidAccount("account code must not be empty".into()));
    }
    if code.len() > MAX_CODE_LEN {
        return Err(LedgerError::InvalidAccount(format!(
            "account code longer than {MAX_CODE_LEN} characters"
        )));
    }
    if !code
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '.')
    {
        return Err(LedgerError::InvalidAccount(format!(
            "account code '{code}' may only contain letters, digits, '-' and '.'"
        )));
    }
    Ok(code.to_string())
}

fn validate_name(name: &str) -> LedgerResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidAccount("account name must not be empty".into()));
    }
    Ok(name.to_string())
}

/// All accounts below `root` in the hierarchy, `root` included.
pub fn descendants(accounts: &[Account], root: AccountId) -> BTreeSet<AccountId> {
    let mut found = BTreeSet::from([root]);
    // Parents may appear after children in `accounts`; iterate to a fixed point.
    loop {
        let before = found.len();
        for account in accounts {
            if let Some(parent) = account.parent_id {
                if found.contains(&parent) {
                    found.insert(account.id);
                }
            }
        }
        if found.len() == before {
            return found;
        }
    }
}

/// Starter chart installed for a new tenant. Every account is a system account.
pub fn default_chart() -> Vec<NewAccount> {
    [
        ("1000", "Cash", AccountType::Asset),
        ("1100", "Accounts Receivable", AccountType::Asset),
        ("2000", "Accounts Payable", AccountType::Liability),
        ("3000", "Owner's Equity", AccountType::Equity),
        ("3100", "Retained Earnings", AccountType::Equity),
        ("4000", "Sales", AccountType::Revenue),
        ("5000", "Cost of Sales", AccountType::Expense),
        ("6000", "Operating Expenses", AccountType::Expense),
    ]
    .into_iter()
    .map(|(code, name, kind)| NewAccount::new(code, name, kind).system())
    .collect()
}
