//! Balance and statement aggregation over posted lines.
//!
//! Everything here is a pure function of the accounts and the posted lines a
//! caller already fetched. Balances use the debit-positive convention;
//! statements present amounts on each account's normal side.

use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use forgeledger_core::{AccountId, EntryId, LineId, Money, index_by_id};

use crate::account::{Account, AccountType};
use crate::error::{LedgerError, LedgerResult};

/// Inclusive date bounds; `None` leaves a side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
}

impl DateRange {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn up_to(end: NaiveDate) -> Self {
        Self {
            start: None,
            end: Some(end),
        }
    }

    pub fn between(start: NaiveDate, end: NaiveDate) -> LedgerResult<Self> {
        if start > end {
            return Err(LedgerError::InvalidDateRange { start, end });
        }
        Ok(Self {
            start: Some(start),
            end: Some(end),
        })
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        self.start.is_none_or(|s| date >= s) && self.end.is_none_or(|e| date <= e)
    }
}

/// A posted line joined with its entry header (the ledger read shape).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostedLine {
    pub entry_id: EntryId,
    pub entry_number: u64,
    pub entry_date: NaiveDate,
    pub entry_description: String,
    pub line_id: LineId,
    pub account_id: AccountId,
    pub description: Option<String>,
    pub debit_amount: Money,
    pub credit_amount: Money,
}

impl PostedLine {
    pub fn net(&self) -> LedgerResult<Money> {
        Ok(self.debit_amount.checked_sub(self.credit_amount)?)
    }
}

/// Sum of `debit - credit` over the given lines.
pub fn net_balance<'a, I>(lines: I) -> LedgerResult<Money>
where
    I: IntoIterator<Item = &'a PostedLine>,
{
    lines
        .into_iter()
        .try_fold(Money::ZERO, |acc, l| Ok(acc.checked_add(l.net()?)?))
}

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
struct Activity {
    debits: Money,
    credits: Money,
}

impl Activity {
    fn record(&mut self, line: &PostedLine) -> LedgerResult<()> {
        self.debits = self.debits.checked_add(line.debit_amount)?;
        self.credits = self.credits.checked_add(line.credit_amount)?;
        Ok(())
    }

    fn net(&self) -> LedgerResult<Money> {
        Ok(self.debits.checked_sub(self.credits)?)
    }
}

fn activity_by_account<'a, I>(lines: I) -> LedgerResult<BTreeMap<AccountId, Activity>>
where
    I: IntoIterator<Item = &'a PostedLine>,
{
    let mut out: BTreeMap<AccountId, Activity> = BTreeMap::new();
    for line in lines {
        out.entry(line.account_id).or_default().record(line)?;
    }
    Ok(out)
}

/// Resolve accounts for every account with activity, ordered by code.
fn with_accounts<'a>(
    accounts: &'a [Account],
    activity: BTreeMap<AccountId, Activity>,
) -> LedgerResult<Vec<(&'a Account, Activity)>> {
    let index = index_by_id(accounts);
    let mut rows = activity
        .into_iter()
        .map(|(id, act)| {
            index
                .get(&id)
                .map(|a| (*a, act))
                .ok_or(LedgerError::AccountNotFound(id))
        })
        .collect::<LedgerResult<Vec<_>>>()?;
    rows.sort_by(|a, b| a.0.code.cmp(&b.0.code));
    Ok(rows)
}

/// One account's line on a statement, on its normal side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub amount: Money,
}

impl StatementLine {
    fn new(account: &Account, activity: &Activity) -> LedgerResult<Self> {
        Ok(Self {
            account_id: account.id,
            code: account.code.clone(),
            name: account.name.clone(),
            amount: account.normal_side.present(activity.net()?),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalanceRow {
    pub account_id: AccountId,
    pub code: String,
    pub name: String,
    pub account_type: AccountType,
    pub debit_balance: Money,
    pub credit_balance: Money,
    /// Debit-positive.
    pub net_balance: Money,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrialBalance {
    pub as_of: NaiveDate,
    pub rows: Vec<TrialBalanceRow>,
    pub total_debits: Money,
    pub total_credits: Money,
}

/// Trial balance totals disagree: the stored history itself is corrupt.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("trial balance as of {as_of} is out of balance: debits {total_debits}, credits {total_credits}")]
pub struct ConsistencyFault {
    pub as_of: NaiveDate,
    pub total_debits: Money,
    pub total_credits: Money,
}

impl TrialBalance {
    /// One row per account with posted activity up to `as_of`. Lines dated
    /// after `as_of` are ignored.
    pub fn build(
        as_of: NaiveDate,
        accounts: &[Account],
        lines: &[PostedLine],
    ) -> LedgerResult<Self> {
        let activity = activity_by_account(lines.iter().filter(|l| l.entry_date <= as_of))?;

        let mut rows = Vec::new();
        let mut total_debits = Money::ZERO;
        let mut total_credits = Money::ZERO;

        for (account, act) in with_accounts(accounts, activity)? {
            let net = act.net()?;
            let (debit_balance, credit_balance) = if net.is_negative() {
                (Money::ZERO, net.negate())
            } else {
                (net, Money::ZERO)
            };
            total_debits = total_debits.checked_add(debit_balance)?;
            total_credits = total_credits.checked_add(credit_balance)?;
            rows.push(TrialBalanceRow {
                account_id: account.id,
                code: account.code.clone(),
                name: account.name.clone(),
                account_type: account.account_type,
                debit_balance,
                credit_balance,
                net_balance: net,
            });
        }

        Ok(Self {
            as_of,
            rows,
            total_debits,
            total_credits,
        })
    }

    pub fn is_balanced(&self) -> bool {
        self.total_debits == self.total_credits
    }

    pub fn verify(&self) -> Result<(), ConsistencyFault> {
        if self.is_balanced() {
            return Ok(());
        }
        Err(ConsistencyFault {
            as_of: self.as_of,
            total_debits: self.total_debits,
            total_credits: self.total_credits,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IncomeStatement {
    pub start: NaiveDate,
    pub end: NaiveDate,
    pub revenue: Vec<StatementLine>,
    pub expenses: Vec<StatementLine>,
    /// Credit-positive.
    pub revenue_total: Money,
    /// Debit-positive.
    pub expense_total: Money,
    pub net_income: Money,
}

impl IncomeStatement {
    /// Revenue and expense activity with `start <= entry_date <= end`.
    pub fn build(
        start: NaiveDate,
        end: NaiveDate,
        accounts: &[Account],
        lines: &[PostedLine],
    ) -> LedgerResult<Self> {
        let range = DateRange::between(start, end)?;
        let activity = activity_by_account(lines.iter().filter(|l| range.contains(l.entry_date)))?;

        let mut revenue = Vec::new();
        let mut expenses = Vec::new();
        for (account, act) in with_accounts(accounts, activity)? {
            match account.account_type {
                AccountType::Revenue => revenue.push(StatementLine::new(account, &act)?),
                AccountType::Expense => expenses.push(StatementLine::new(account, &act)?),
                _ => {}
            }
        }

        let revenue_total = Money::try_sum(revenue.iter().map(|l| l.amount))?;
        let expense_total = Money::try_sum(expenses.iter().map(|l| l.amount))?;
        let net_income = revenue_total.checked_sub(expense_total)?;

        Ok(Self {
            start,
            end,
            revenue,
            expenses,
            revenue_total,
            expense_total,
            net_income,
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSheetSection {
    pub lines: Vec<StatementLine>,
    pub total: Money,
}

impl BalanceSheetSection {
    fn push(&mut self, line: StatementLine) -> LedgerResult<()> {
        self.total = self.total.checked_add(line.amount)?;
        self.lines.push(line);
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub as_of: NaiveDate,
    pub assets: BalanceSheetSection,
    pub liabilities: BalanceSheetSection,
    pub equity: BalanceSheetSection,
    /// Cumulative revenue minus expenses not yet closed into equity.
    pub unclosed_net_income: Money,
}

impl BalanceSheet {
    /// Balances as of `as_of` for ASSET/LIABILITY/EQUITY accounts.
    ///
    /// Does not enforce the accounting equation; see [`BalanceSheet::is_balanced`].
    pub fn build(
        as_of: NaiveDate,
        accounts: &[Account],
        lines: &[PostedLine],
    ) -> LedgerResult<Self> {
        let activity = activity_by_account(lines.iter().filter(|l| l.entry_date <= as_of))?;

        let mut sheet = Self {
            as_of,
            assets: BalanceSheetSection::default(),
            liabilities: BalanceSheetSection::default(),
            equity: BalanceSheetSection::default(),
            unclosed_net_income: Money::ZERO,
        };

        for (account, act) in with_accounts(accounts, activity)? {
            let line = StatementLine::new(account, &act)?;
            match account.account_type {
                AccountType::Asset => sheet.assets.push(line)?,
                AccountType::Liability => sheet.liabilities.push(line)?,
                AccountType::Equity => sheet.equity.push(line)?,
                // credit-positive for revenue, debit-positive for expense
                AccountType::Revenue => {
                    sheet.unclosed_net_income = sheet.unclosed_net_income.checked_add(line.amount)?
                }
                AccountType::Expense => {
                    sheet.unclosed_net_income = sheet.unclosed_net_income.checked_sub(line.amount)?
                }
            }
        }

        Ok(sheet)
    }

    /// Assets = Liabilities + Equity (+ earnings not yet closed into equity).
    pub fn is_balanced(&self) -> bool {
        self.liabilities
            .total
            .checked_add(self.equity.total)
            .and_then(|s| s.checked_add(self.unclosed_net_income))
            .is_ok_and(|rhs| rhs == self.assets.total)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityRow {
    pub entry_id: EntryId,
    pub entry_number: u64,
    pub entry_date: NaiveDate,
    pub description: String,
    pub debit_amount: Money,
    pub credit_amount: Money,
    /// Debit-positive, including the opening balance.
    pub running_balance: Money,
}

/// Account ledger: every posted line of one account over a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountActivity {
    pub account_id: AccountId,
    pub range: DateRange,
    pub opening_balance: Money,
    pub rows: Vec<ActivityRow>,
    pub closing_balance: Money,
}

impl AccountActivity {
    /// `opening_balance` covers everything before `range.start`; `lines` are
    /// this account's lines inside `range`, in any order.
    pub fn build(
        account_id: AccountId,
        range: DateRange,
        opening_balance: Money,
        lines: &[PostedLine],
    ) -> LedgerResult<Self> {
        let mut lines: Vec<&PostedLine> = lines
            .iter()
            .filter(|l| l.account_id == account_id && range.contains(l.entry_date))
            .collect();
        lines.sort_by_key(|l| (l.entry_date, l.entry_number));

        let mut running = opening_balance;
        let mut rows = Vec::with_capacity(lines.len());
        for line in lines {
            running = running.checked_add(line.net()?)?;
            rows.push(ActivityRow {
                entry_id: line.entry_id,
                entry_number: line.entry_number,
                entry_date: line.entry_date,
                description: line
                    .description
                    .clone()
                    .unwrap_or_else(|| line.entry_description.clone()),
                debit_amount: line.debit_amount,
                credit_amount: line.credit_amount,
                running_balance: running,
            });
        }

        Ok(Self {
            account_id,
            range,
            opening_balance,
            rows,
            closing_balance: running,
        })
    }
}
