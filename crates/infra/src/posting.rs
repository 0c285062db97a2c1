//! Posting engine: the journal entry lifecycle over the ledger store.
//!
//! ```text
//! create_draft ──> DRAFT ──post──> POSTED ──void──> VOIDED
//!                    │                  └─────────> reversal (POSTED)
//!                    └── update_draft / delete_draft
//! ```
//!
//! Each operation is one atomic write. Entry numbers are allocated inside
//! that write, so a failed or cancelled operation never burns a number and
//! a void never becomes visible without its reversal.

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use forgeledger_accounting::{
    DraftEntry, DraftHeader, JournalEntry, LedgerError, LineInput, VoidRequest,
    validate_void_reason,
};
use forgeledger_core::{EntryId, TenantId, UserId};

use crate::chart::ensure_postable;
use crate::context::OperationContext;
use crate::error::EngineResult;
use crate::ledger_store::{EntryFilter, LedgerStore, LedgerTransaction, StatusChange};

/// Input for a new journal entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewEntry {
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub created_by: UserId,
    pub lines: Vec<LineInput>,
}

impl NewEntry {
    pub fn new(
        entry_date: NaiveDate,
        description: impl Into<String>,
        created_by: UserId,
        lines: Vec<LineInput>,
    ) -> Self {
        Self {
            entry_date,
            description: description.into(),
            reference: None,
            created_by,
            lines,
        }
    }

    pub fn with_reference(mut self, reference: impl Into<String>) -> Self {
        self.reference = Some(reference.into());
        self
    }
}

/// Replacement header and lines for a draft.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DraftUpdate {
    pub entry_date: NaiveDate,
    pub description: String,
    pub reference: Option<String>,
    pub lines: Vec<LineInput>,
}

/// Void parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidInput {
    pub reason: String,
    pub voided_by: UserId,
    /// Reversal date; the voided entry's date when `None`.
    pub reversal_date: Option<NaiveDate>,
}

impl VoidInput {
    pub fn new(reason: impl Into<String>, voided_by: UserId) -> Self {
        Self {
            reason: reason.into(),
            voided_by,
            reversal_date: None,
        }
    }

    pub fn reversal_dated(mut self, date: NaiveDate) -> Self {
        self.reversal_date = Some(date);
        self
    }
}

/// Result of a void: the original (now VOIDED) and its POSTED reversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoidOutcome {
    pub voided: JournalEntry,
    pub reversal: JournalEntry,
}

#[derive(Debug)]
pub struct PostingEngine<S> {
    store: Arc<S>,
}

impl<S> Clone for PostingEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
        }
    }
}

async fn load_for_update<T: LedgerTransaction>(
    tx: &mut T,
    entry_id: EntryId,
) -> EngineResult<JournalEntry> {
    tx.load_entry_for_update(entry_id)
        .await?
        .ok_or_else(|| LedgerError::EntryNotFound(entry_id).into())
}

impl<S: LedgerStore> PostingEngine<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Store a new DRAFT.
    ///
    /// Fails with `InvalidLineCount`, `LineAmbiguous` or `InvalidAmount` for
    /// malformed lines and `AccountNotFound`/`AccountInactive` for bad accounts.
    /// Balance is not checked until the draft is posted.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %tenant_id, line_count = input.lines.len()), err)]
    pub async fn create_draft(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        input: NewEntry,
    ) -> EngineResult<JournalEntry> {
        let draft = new_draft(tenant_id, input)?;

        let (tx, entry) = ctx
            .run(async {
                let mut tx = self.store.begin_atomic_write(tenant_id).await?;
                ensure_postable(&mut tx, draft.entry().account_ids()).await?;
                tx.insert_entry_with_lines(draft.entry()).await?;
                Ok((tx, draft.into_entry()))
            })
            .await?;
        tx.commit().await?;

        info!(entry_id = %entry.id, "draft created");
        Ok(entry)
    }

    /// Replace a draft's header and lines; posted and voided entries are immutable.
    #[instrument(skip(self, ctx, update), fields(tenant_id = %tenant_id, entry_id = %entry_id), err)]
    pub async fn update_draft(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        entry_id: EntryId,
        update: DraftUpdate,
    ) -> EngineResult<JournalEntry> {
        let (tx, entry) = ctx
            .run(async {
                let mut tx = self.store.begin_atomic_write(tenant_id).await?;
                let draft = load_for_update(&mut tx, entry_id)
                    .await?
                    .into_state()
                    .into_draft()?
                    .revise(
                        update.entry_date,
                        update.description,
                        update.reference,
                        update.lines,
                    )?;
                ensure_postable(&mut tx, draft.entry().account_ids()).await?;
                tx.replace_draft(draft.entry()).await?;
                Ok((tx, draft.into_entry()))
            })
            .await?;
        tx.commit().await?;

        info!("draft updated");
        Ok(entry)
    }

    /// Delete a draft. No state transition is recorded.
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id, entry_id = %entry_id), err)]
    pub async fn delete_draft(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        entry_id: EntryId,
    ) -> EngineResult<()> {
        let tx = ctx
            .run(async {
                let mut tx = self.store.begin_atomic_write(tenant_id).await?;
                load_for_update(&mut tx, entry_id)
                    .await?
                    .into_state()
                    .into_draft()?;
                tx.delete_draft(entry_id).await?;
                Ok(tx)
            })
            .await?;
        tx.commit().await?;

        info!("draft deleted");
        Ok(())
    }

    /// Post a draft.
    ///
    /// Fails with `AlreadyPosted`/`AlreadyVoided` for non-drafts and
    /// `Unbalanced` when debits and credits differ. Accounts are re-checked,
    /// since they may have been deactivated after the draft was written.
    #[instrument(skip(self, ctx), fields(tenant_id = %tenant_id, entry_id = %entry_id), err)]
    pub async fn post(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        entry_id: EntryId,
    ) -> EngineResult<JournalEntry> {
        let (tx, entry) = ctx
            .run(async {
                let mut tx = self.store.begin_atomic_write(tenant_id).await?;
                let draft = load_for_update(&mut tx, entry_id)
                    .await?
                    .into_state()
                    .into_draft()?;
                draft.check_balance()?;
                ensure_postable(&mut tx, draft.entry().account_ids()).await?;

                let entry_number = tx.next_entry_number().await?;
                let posted_at = Utc::now();
                let posted = draft.post(entry_number, posted_at)?.into_entry();
                tx.update_entry_status(
                    entry_id,
                    &StatusChange::Posted {
                        entry_number,
                        posted_at,
                    },
                )
                .await?;
                Ok((tx, posted))
            })
            .await?;
        tx.commit().await?;

        info!(entry_number = ?entry.entry_number, "journal entry posted");
        Ok(entry)
    }

    /// Create and post in one atomic write; the entry is never visible as a draft.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %tenant_id, line_count = input.lines.len()), err)]
    pub async fn create_and_post(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        input: NewEntry,
    ) -> EngineResult<JournalEntry> {
        let draft = new_draft(tenant_id, input)?;
        draft.check_balance()?;

        let (tx, entry) = ctx
            .run(async {
                let mut tx = self.store.begin_atomic_write(tenant_id).await?;
                ensure_postable(&mut tx, draft.entry().account_ids()).await?;

                let entry_number = tx.next_entry_number().await?;
                let posted = draft.post(entry_number, Utc::now())?.into_entry();
                tx.insert_entry_with_lines(&posted).await?;
                Ok((tx, posted))
            })
            .await?;
        tx.commit().await?;

        info!(entry_id = %entry.id, entry_number = ?entry.entry_number, "journal entry posted");
        Ok(entry)
    }

    /// Void a posted entry by writing its mirror-image reversal.
    ///
    /// The reversal insert, its entry number and the original's status change
    /// commit together. Fails with `EmptyReason` for a blank reason and
    /// `NotPosted` unless the entry is POSTED. Reversals are ordinary posted
    /// entries and can themselves be voided.
    #[instrument(skip(self, ctx, input), fields(tenant_id = %tenant_id, entry_id = %entry_id), err)]
    pub async fn void(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        entry_id: EntryId,
        input: VoidInput,
    ) -> EngineResult<VoidOutcome> {
        let reason = validate_void_reason(&input.reason)?;

        let (tx, outcome) = ctx
            .run(async {
                let mut tx = self.store.begin_atomic_write(tenant_id).await?;
                let posted = load_for_update(&mut tx, entry_id)
                    .await?
                    .into_state()
                    .into_posted()?;

                let voided_at = Utc::now();
                let reversal_number = tx.next_entry_number().await?;
                let (voided, reversal) = posted.void(VoidRequest {
                    reason: reason.clone(),
                    reversal_id: EntryId::new(),
                    reversal_number,
                    reversal_date: input.reversal_date,
                    voided_by: input.voided_by,
                    voided_at,
                })?;

                tx.insert_entry_with_lines(reversal.entry()).await?;
                tx.update_entry_status(entry_id, &StatusChange::Voided { reason, voided_at })
                    .await?;

                Ok((
                    tx,
                    VoidOutcome {
                        voided: voided.into_entry(),
                        reversal: reversal.into_entry(),
                    },
                ))
            })
            .await?;
        tx.commit().await?;

        info!(
            reversal_id = %outcome.reversal.id,
            reversal_number = ?outcome.reversal.entry_number,
            "journal entry voided"
        );
        Ok(outcome)
    }

    /// Committed entry by id; fails with `EntryNotFound`.
    pub async fn get_entry(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        entry_id: EntryId,
    ) -> EngineResult<JournalEntry> {
        ctx.run(async {
            self.store
                .get_entry(tenant_id, entry_id)
                .await?
                .ok_or_else(|| LedgerError::EntryNotFound(entry_id).into())
        })
        .await
    }

    pub async fn list_entries(
        &self,
        ctx: &OperationContext,
        tenant_id: TenantId,
        filter: &EntryFilter,
    ) -> EngineResult<Vec<JournalEntry>> {
        let entries = ctx
            .run(async { Ok(self.store.list_entries(tenant_id, filter).await?) })
            .await?;
        debug!(tenant_id = %tenant_id, count = entries.len(), "entries listed");
        Ok(entries)
    }
}

fn new_draft(tenant_id: TenantId, input: NewEntry) -> EngineResult<DraftEntry> {
    Ok(DraftEntry::new(
        EntryId::new(),
        DraftHeader {
            tenant_id,
            entry_date: input.entry_date,
            description: input.description,
            reference: input.reference,
            created_by: input.created_by,
        },
        input.lines,
        Utc::now(),
    )?)
}
