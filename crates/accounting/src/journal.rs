//! Journal entries and their lifecycle.
//!
//! A [`JournalEntry`] is the stored record. Its lifecycle is only reachable
//! through the typestate wrappers returned by [`JournalEntry::into_state`]:
//!
//! ```text
//! DraftEntry --post()--> PostedEntry --void()--> VoidedEntry (+ reversal PostedEntry)
//! ```
//!
//! `PostedEntry` exposes no way to edit lines and `VoidedEntry` exposes no
//! transitions at all, so "edit a posted entry" or "re-post a voided entry"
//! cannot be expressed against these types.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use forgeledger_core::{AccountId, Entity, EntryId, LineId, Money, TenantId, UserId};

use crate::error::{LedgerError, LedgerResult};

/// Lifecycle status as persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Draft,
    Posted,
    Voided,
}

impl EntryStatus {
    /// Lines of posted and voided entries count towards balances. Voiding
    /// adds a reversal; it never erases history.
    pub fn is_ledger_visible(self) -> bool {
        matches!(self, EntryStatus::Posted | EntryStatus::Voided)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Draft => "draft",
            EntryStatus::Posted => "posted",
            EntryStatus::Voided => "voided",
        }
    }
}

impl core::str::FromStr for EntryStatus {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(EntryStatus::Draft),
            "posted" => Ok(EntryStatus::Posted),
            "voided" => Ok(EntryStatus::Voided),
            other => Err(LedgerError::InvalidId(format!("unknown entry status '{other}'"))),
        }
    }
}

/// Caller-supplied line of a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineInput {
    pub account_id: AccountId,
    pub description: Option<String>,
    pub debit: Money,
    pub credit: Money,
}

impl LineInput {
    pub fn debit(account_id: AccountId, amount: Money) -> Self {
        Self {
            account_id,
            description: None,
            debit: amount,
            credit: Money::ZERO,
        }
    }

    pub fn credit(account_id: AccountId, amount: Money) -> Self {
        Self {
            account_id,
            description: None,
            debit: Money::ZERO,
            credit: amount,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// One line of a journal entry (composition: no lifecycle of its own).
///
/// Exactly one of `debit_amount` / `credit_amount` is non-zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalLine {
    pub id: LineId,
    pub entry_id: EntryId,
    pub account_id: AccountId,
    pub description: Option<String>,
    pub debit_amount: Money,
    pub credit_amount: Money,
}

impl JournalLine {
    /// Debit-positive signed amount of this line.
    pub fn net(&self) -> LedgerResult<Money> {
        Ok(self.debit_amount.checked_sub(self.credit_amount)?)
    }

    fn mirrored(&self, entry_id: EntryId) -> JournalLine {
        let description = match &self.description {
            Some(d) => format!("Reversal: {d}"),
            None => "Reversal".to_string(),
        };
        JournalLine {
            id: LineId::new(),
            entry_id,
            account_id: self.account_id,
            description: Some(description),
            debit_amount: self.credit_amount,
            credit_amount: self.debit_amount,
        }
    }
}

/// Stored journal entry record (header + lines).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JournalEntry {
    pub id: EntryId,
    pub tenant_id: TenantId,
    /// Sequential per tenant; assigned when the entry is posted.
    pub entry_number: Option<u64>,
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub status: EntryStatus,
    /// Set only when voided.
    pub void_reason: Option<String>,
    /// Set only on system-generated reversal entries.
    pub reversal_of_entry_id: Option<EntryId>,
    pub created_by: UserId,
    pub created_at: DateTime<Utc>,
    pub posted_at: Option<DateTime<Utc>>,
    pub voided_at: Option<DateTime<Utc>>,
    pub lines: Vec<JournalLine>,
}

impl Entity for JournalEntry {
    type Id = EntryId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

/// Debit and credit totals of an entry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct EntryTotals {
    pub debits: Money,
    pub credits: Money,
}

impl EntryTotals {
    /// Debits minus credits; zero for a balanced entry.
    pub fn difference(&self) -> LedgerResult<Money> {
        Ok(self.debits.checked_sub(self.credits)?)
    }
}

impl JournalEntry {
    pub fn totals(&self) -> LedgerResult<EntryTotals> {
        Ok(EntryTotals {
            debits: Money::try_sum(self.lines.iter().map(|l| l.debit_amount))?,
            credits: Money::try_sum(self.lines.iter().map(|l| l.credit_amount))?,
        })
    }

    /// Distinct accounts referenced by the lines.
    pub fn account_ids(&self) -> BTreeSet<AccountId> {
        self.lines.iter().map(|l| l.account_id).collect()
    }

    /// Split into the typestate that matches the persisted status.
    pub fn into_state(self) -> EntryState {
        match self.status {
            EntryStatus::Draft => EntryState::Draft(DraftEntry(self)),
            EntryStatus::Posted => EntryState::Posted(PostedEntry(self)),
            EntryStatus::Voided => EntryState::Voided(VoidedEntry(self)),
        }
    }
}

/// Header fields a caller controls on a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftHeader {
    pub tenant_id: TenantId,
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub created_by: UserId,
}

/// An entry in DRAFT: editable, deletable, postable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftEntry(JournalEntry);

/// An entry in POSTED: lines are immutable; the only transition is void.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedEntry(JournalEntry);

/// An entry in VOIDED: terminal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoidedEntry(JournalEntry);

/// Typestate view of a stored entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState {
    Draft(DraftEntry),
    Posted(PostedEntry),
    Voided(VoidedEntry),
}

impl EntryState {
    /// Require a draft; posted and voided entries are immutable.
    pub fn into_draft(self) -> LedgerResult<DraftEntry> {
        match self {
            EntryState::Draft(d) => Ok(d),
            EntryState::Posted(p) => Err(LedgerError::AlreadyPosted(p.0.id)),
            EntryState::Voided(v) => Err(LedgerError::AlreadyVoided(v.0.id)),
        }
    }

    /// Require a posted entry (the only voidable state).
    pub fn into_posted(self) -> LedgerResult<PostedEntry> {
        match self {
            EntryState::Posted(p) => Ok(p),
            EntryState::Draft(d) => Err(LedgerError::NotPosted(d.0.id)),
            EntryState::Voided(v) => Err(LedgerError::NotPosted(v.0.id)),
        }
    }
}

/// Structural checks shared by draft creation and revision.
fn build_lines(entry_id: EntryId, inputs: Vec<LineInput>) -> LedgerResult<Vec<JournalLine>> {
    if inputs.len() < 2 {
        return Err(LedgerError::InvalidLineCount {
            found: inputs.len(),
        });
    }

    inputs
        .into_iter()
        .enumerate()
        .map(|(idx, input)| {
            if input.debit.is_negative() || input.credit.is_negative() {
                return Err(LedgerError::InvalidAmount(format!(
                    "line {idx} has a negative amount"
                )));
            }
            if input.debit.is_zero() == input.credit.is_zero() {
                return Err(LedgerError::LineAmbiguous { line: idx });
            }
            Ok(JournalLine {
                id: LineId::new(),
                entry_id,
                account_id: input.account_id,
                description: input.description,
                debit_amount: input.debit,
                credit_amount: input.credit,
            })
        })
        .collect()
}

fn clean_reference(reference: Option<String>) -> Option<String> {
    reference
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty())
}

impl DraftEntry {
    /// Build a structurally valid draft: at least two lines, each with exactly
    /// one non-zero, non-negative side. Balance is checked at post time.
    pub fn new(
        id: EntryId,
        header: DraftHeader,
        lines: Vec<LineInput>,
        now: DateTime<Utc>,
    ) -> LedgerResult<Self> {
        let lines = build_lines(id, lines)?;
        Ok(Self(JournalEntry {
            id,
            tenant_id: header.tenant_id,
            entry_number: None,
            entry_date: header.entry_date,
            description: header.description.trim().to_string(),
            reference: clean_reference(header.reference),
            status: EntryStatus::Draft,
            void_reason: None,
            reversal_of_entry_id: None,
            created_by: header.created_by,
            created_at: now,
            posted_at: None,
            voided_at: None,
            lines,
        }))
    }

    /// Replace the editable fields and lines. Identity, tenant and author stay.
    pub fn revise(
        self,
        entry_date: NaiveDate,
        description: String,
        reference: Option<String>,
        lines: Vec<LineInput>,
    ) -> LedgerResult<Self> {
        let mut entry = self.0;
        entry.lines = build_lines(entry.id, lines)?;
        entry.entry_date = entry_date;
        entry.description = description.trim().to_string();
        entry.reference = clean_reference(reference);
        Ok(Self(entry))
    }

    /// Enforce the balance invariant: debits equal credits exactly.
    pub fn check_balance(&self) -> LedgerResult<EntryTotals> {
        let totals = self.0.totals()?;
        let difference = totals.difference()?;
        if !difference.is_zero() {
            return Err(LedgerError::Unbalanced { difference });
        }
        Ok(totals)
    }

    /// Post with an already allocated entry number.
    pub fn post(self, entry_number: u64, posted_at: DateTime<Utc>) -> LedgerResult<PostedEntry> {
        self.check_balance()?;
        let mut entry = self.0;
        entry.entry_number = Some(entry_number);
        entry.status = EntryStatus::Posted;
        entry.posted_at = Some(posted_at);
        Ok(PostedEntry(entry))
    }

    pub fn entry(&self) -> &JournalEntry {
        &self.0
    }

    pub fn into_entry(self) -> JournalEntry {
        self.0
    }
}

/// Parameters of a void, allocated by the caller inside its atomic write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoidRequest {
    pub reason: String,
    pub reversal_id: EntryId,
    pub reversal_number: u64,
    /// Defaults to the voided entry's date when `None`.
    pub reversal_date: Option<NaiveDate>,
    pub voided_by: UserId,
    pub voided_at: DateTime<Utc>,
}

/// Trimmed, non-blank void reason.
pub fn validate_void_reason(reason: &str) -> LedgerResult<String> {
    let reason = reason.trim();
    if reason.is_empty() {
        return Err(LedgerError::EmptyReason);
    }
    Ok(reason.to_string())
}

impl PostedEntry {
    pub fn entry_number(&self) -> Option<u64> {
        self.0.entry_number
    }

    /// Void this entry: returns the voided original and its posted reversal,
    /// whose lines mirror the original's (debits become credits and vice versa).
    pub fn void(self, request: VoidRequest) -> LedgerResult<(VoidedEntry, PostedEntry)> {
        let reason = validate_void_reason(&request.reason)?;
        let original = self.0;

        let number_label = original
            .entry_number
            .map(|n| format!("#{n}"))
            .unwrap_or_else(|| original.id.to_string());

        let reversal = JournalEntry {
            id: request.reversal_id,
            tenant_id: original.tenant_id,
            entry_number: Some(request.reversal_number),
            entry_date: request.reversal_date.unwrap_or(original.entry_date),
            description: format!("Reversal of {number_label}: {}", original.description),
            reference: original.reference.clone(),
            status: EntryStatus::Posted,
            void_reason: None,
            reversal_of_entry_id: Some(original.id),
            created_by: request.voided_by,
            created_at: request.voided_at,
            posted_at: Some(request.voided_at),
            voided_at: None,
            lines: original
                .lines
                .iter()
                .map(|l| l.mirrored(request.reversal_id))
                .collect(),
        };

        let mut voided = original;
        voided.status = EntryStatus::Voided;
        voided.void_reason = Some(reason);
        voided.voided_at = Some(request.voided_at);

        Ok((VoidedEntry(voided), PostedEntry(reversal)))
    }

    pub fn entry(&self) -> &JournalEntry {
        &self.0
    }

    pub fn into_entry(self) -> JournalEntry {
        self.0
    }
}

impl VoidedEntry {
    pub fn entry(&self) -> &JournalEntry {
        &self.0
    }

    pub fn into_entry(self) -> JournalEntry {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn money(s: &str) -> Money {
        Money::parse(s).unwrap()
    }

    fn header() -> DraftHeader {
        DraftHeader {
            tenant_id: TenantId::new(),
            entry_date: NaiveDate::from_ymd_opt(2024, 3, 1).unwrap(),
            description: "Cash sale".to_string(),
            reference: Some("INV-1".to_string()),
            created_by: UserId::new(),
        }
    }

    fn draft(debit: &str, credit: &str) -> (DraftEntry, AccountId, AccountId) {
        let cash = AccountId::new();
        let sales = AccountId::new();
        let d = DraftEntry::new(
            EntryId::new(),
            header(),
            vec![
                LineInput::debit(cash, money(debit)),
                LineInput::credit(sales, money(credit)).with_description("sale"),
            ],
            Utc::now(),
        )
        .unwrap();
        (d, cash, sales)
    }

    fn void_request(reason: &str) -> VoidRequest {
        VoidRequest {
            reason: reason.to_string(),
            reversal_id: EntryId::new(),
            reversal_number: 2,
            reversal_date: None,
            voided_by: UserId::new(),
            voided_at: Utc::now(),
        }
    }

    #[test]
    fn draft_needs_two_lines() {
        let err = DraftEntry::new(
            EntryId::new(),
            header(),
            vec![LineInput::debit(AccountId::new(), money("1"))],
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, LedgerError::InvalidLineCount { found: 1 });
    }

    #[test]
    fn line_with_both_or_neither_side_is_ambiguous() {
        let both = LineInput {
            account_id: AccountId::new(),
            description: None,
            debit: money("1"),
            credit: money("1"),
        };
        let neither = LineInput::debit(AccountId::new(), Money::ZERO);

        let err = DraftEntry::new(
            EntryId::new(),
            header(),
            vec![LineInput::credit(AccountId::new(), money("1")), both],
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, LedgerError::LineAmbiguous { line: 1 });

        let err = DraftEntry::new(
            EntryId::new(),
            header(),
            vec![neither, LineInput::credit(AccountId::new(), money("1"))],
            Utc::now(),
        )
        .unwrap_err();
        assert_eq!(err, LedgerError::LineAmbiguous { line: 0 });
    }

    #[test]
    fn negative_amounts_are_rejected() {
        let err = DraftEntry::new(
            EntryId::new(),
            header(),
            vec![
                LineInput::debit(AccountId::new(), money("-5")),
                LineInput::credit(AccountId::new(), money("5")),
            ],
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    #[test]
    fn posting_unbalanced_draft_reports_difference() {
        let (d, _, _) = draft("100.00", "90.00");
        let err = d.post(1, Utc::now()).unwrap_err();
        assert_eq!(err, LedgerError::Unbalanced { difference: money("10.00") });
        assert_eq!(err.to_string(), "journal entry is unbalanced by 10.00");
    }

    #[test]
    fn posting_sets_number_status_and_timestamp() {
        let (d, _, _) = draft("100.00", "100.00");
        let at = Utc::now();
        let posted = d.post(7, at).unwrap();
        let e = posted.entry();
        assert_eq!(e.status, EntryStatus::Posted);
        assert_eq!(e.entry_number, Some(7));
        assert_eq!(e.posted_at, Some(at));
    }

    #[test]
    fn void_mirrors_every_line() {
        let (d, cash, sales) = draft("100.00", "100.00");
        let posted = d.post(1, Utc::now()).unwrap();
        let original_id = posted.entry().id;

        let (voided, reversal) = posted.void(void_request("  data entry error ")).unwrap();
        let v = voided.entry();
        let r = reversal.entry();

        assert_eq!(v.status, EntryStatus::Voided);
        assert_eq!(v.void_reason.as_deref(), Some("data entry error"));
        assert_eq!(r.status, EntryStatus::Posted);
        assert_eq!(r.reversal_of_entry_id, Some(original_id));
        assert_eq!(r.entry_number, Some(2));
        assert_eq!(r.entry_date, v.entry_date);
        assert_eq!(r.description, "Reversal of #1: Cash sale");

        assert_eq!(r.lines[0].account_id, cash);
        assert_eq!(r.lines[0].credit_amount, money("100"));
        assert!(r.lines[0].debit_amount.is_zero());
        assert_eq!(r.lines[1].account_id, sales);
        assert_eq!(r.lines[1].debit_amount, money("100"));
        assert_eq!(r.lines[1].description.as_deref(), Some("Reversal: sale"));
        assert!(r.lines.iter().all(|l| l.entry_id == r.id));

        let totals = r.totals().unwrap();
        assert_eq!(totals.debits, totals.credits);
    }

    #[test]
    fn void_requires_a_reason() {
        let (d, _, _) = draft("1", "1");
        let posted = d.post(1, Utc::now()).unwrap();
        assert_eq!(posted.void(void_request("   ")).unwrap_err(), LedgerError::EmptyReason);
    }

    #[test]
    fn state_guards_reject_illegal_transitions() {
        let (d, _, _) = draft("1", "1");
        let draft_id = d.entry().id;
        let posted = d.post(1, Utc::now()).unwrap().into_entry();

        assert_eq!(
            posted.clone().into_state().into_draft().unwrap_err(),
            LedgerError::AlreadyPosted(draft_id)
        );

        let (voided, _) = posted
            .into_state()
            .into_posted()
            .unwrap()
            .void(void_request("dup"))
            .unwrap();
        let voided = voided.into_entry();
        assert_eq!(
            voided.clone().into_state().into_draft().unwrap_err(),
            LedgerError::AlreadyVoided(draft_id)
        );
        assert_eq!(
            voided.into_state().into_posted().unwrap_err(),
            LedgerError::NotPosted(draft_id)
        );
    }

    #[test]
    fn revise_keeps_identity_and_revalidates() {
        let (d, cash, sales) = draft("1", "1");
        let id = d.entry().id;
        let date = NaiveDate::from_ymd_opt(2024, 4, 1).unwrap();
        let revised = d
            .revise(
                date,
                "Corrected".into(),
                Some("  ".into()),
                vec![
                    LineInput::debit(cash, money("2")),
                    LineInput::credit(sales, money("2")),
                ],
            )
            .unwrap();
        let e = revised.entry();
        assert_eq!(e.id, id);
        assert_eq!(e.entry_date, date);
        assert_eq!(e.reference, None);
        assert!(e.lines.iter().all(|l| l.entry_id == id));

        let err = revised
            .revise(date, "x".into(), None, vec![LineInput::debit(cash, money("2"))])
            .unwrap_err();
        assert_eq!(err, LedgerError::InvalidLineCount { found: 1 });
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in [EntryStatus::Draft, EntryStatus::Posted, EntryStatus::Voided] {
            assert_eq!(s.as_str().parse::<EntryStatus>().unwrap(), s);
        }
        assert!("open".parse::<EntryStatus>().is_err());
    }
}
