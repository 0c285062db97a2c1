//! Postgres-backed ledger store.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | StoreError | Scenario |
//! |------------|----------------------|------------|----------|
//! | Database (unique violation) | `23505` | `Conflict` | Duplicate code or entry number |
//! | Database (serialization failure) | `40001` | `Conflict` | Concurrent writer won |
//! | Database (deadlock) | `40P01` | `Aborted` | Backend rolled the transaction back |
//! | Database (foreign key violation) | `23503` | `TenantIsolation` | Row references another tenant's data |
//! | Database (check constraint violation) | `23514` | `Corrupt` | Row breaks a schema invariant |
//! | Database (other) | Any other | `Backend` | Other database errors |
//! | PoolClosed / PoolTimedOut / Io | N/A | `Backend` | Connection failures |
//!
//! ## Atomic writes
//!
//! `begin_atomic_write` opens a transaction and takes a transaction-scoped
//! advisory lock keyed by tenant, so writers of one tenant run one at a time
//! while other tenants proceed. Entry numbers come from a counter row that is
//! incremented inside the same transaction; a rollback restores it.

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{FromRow, PgConnection, PgPool, Postgres, Row, Transaction};
use std::sync::Arc;
use std::time::Duration;
use tracing::{instrument, Span};

use forgeledger_accounting::{
    Account, AccountType, EntryStatus, JournalEntry, JournalLine, NormalSide, PostedLine,
};
use forgeledger_core::{AccountId, EntryId, LineId, Money, TenantId, UserId};

use super::r#trait::{
    EntryFilter, LedgerStore, LedgerTransaction, LineQuery, StatusChange, StoreError,
};

const MIGRATION: &str = include_str!("../../migrations/0001_ledger.sql");

/// Postgres-backed ledger store.
///
/// Every query includes `tenant_id` in its WHERE clause and every foreign key
/// in the schema includes it too, so rows of different tenants never mix.
#[derive(Debug, Clone)]
pub struct PostgresLedgerStore {
    pool: Arc<PgPool>,
}

impl PostgresLedgerStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Connect a pool to `database_url`.
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| map_sqlx_error("connect", e))?;
        Ok(Self::new(pool))
    }

    /// Create the ledger tables if they do not exist.
    #[instrument(skip(self), err)]
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(MIGRATION)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("migrate", e))?;
        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Open Postgres transaction scoped to one tenant.
pub struct PostgresTransaction {
    tenant_id: TenantId,
    tx: Transaction<'static, Postgres>,
}

impl std::fmt::Debug for PostgresTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresTransaction")
            .field("tenant_id", &self.tenant_id)
            .finish_non_exhaustive()
    }
}

impl PostgresTransaction {
    fn check_tenant(&self, tenant_id: TenantId, what: &str) -> Result<(), StoreError> {
        if tenant_id != self.tenant_id {
            return Err(StoreError::TenantIsolation(format!(
                "{what} belongs to tenant {tenant_id}, transaction is scoped to {}",
                self.tenant_id
            )));
        }
        Ok(())
    }

    async fn insert_lines(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        for (line_no, line) in entry.lines.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO journal_lines (
                    id,
                    tenant_id,
                    entry_id,
                    line_no,
                    account_id,
                    description,
                    debit_amount,
                    credit_amount
                )
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                "#,
            )
            .bind(line.id.as_uuid())
            .bind(self.tenant_id.as_uuid())
            .bind(entry.id.as_uuid())
            .bind(line_no as i32)
            .bind(line.account_id.as_uuid())
            .bind(line.description.as_deref())
            .bind(line.debit_amount.as_decimal())
            .bind(line.credit_amount.as_decimal())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("insert_line", e))?;
        }
        Ok(())
    }

    async fn delete_lines(&mut self, entry_id: EntryId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM journal_lines WHERE tenant_id = $1 AND entry_id = $2")
            .bind(self.tenant_id.as_uuid())
            .bind(entry_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_lines", e))?;
        Ok(())
    }
}

#[async_trait::async_trait]
impl LedgerTransaction for PostgresTransaction {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn next_entry_number(&mut self) -> Result<u64, StoreError> {
        let number: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO ledger_entry_counters (tenant_id, last_number)
            VALUES ($1, 1)
            ON CONFLICT (tenant_id)
            DO UPDATE SET last_number = ledger_entry_counters.last_number + 1
            RETURNING last_number
            "#,
        )
        .bind(self.tenant_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("next_entry_number", e))?;

        u64::try_from(number)
            .map_err(|_| StoreError::Corrupt(format!("negative entry counter {number}")))
    }

    #[instrument(
        skip(self, entry),
        fields(tenant_id = %self.tenant_id.as_uuid(), entry_id = %entry.id, line_count = entry.lines.len()),
        err
    )]
    async fn insert_entry_with_lines(
        &mut self,
        entry: &JournalEntry,
    ) -> Result<EntryId, StoreError> {
        self.check_tenant(entry.tenant_id, "journal entry")?;

        sqlx::query(
            r#"
            INSERT INTO journal_entries (
                id,
                tenant_id,
                entry_number,
                entry_date,
                description,
                reference,
                status,
                void_reason,
                reversal_of_entry_id,
                created_by,
                created_at,
                posted_at,
                voided_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(entry.id.as_uuid())
        .bind(self.tenant_id.as_uuid())
        .bind(entry.entry_number.map(|n| n as i64))
        .bind(entry.entry_date)
        .bind(&entry.description)
        .bind(entry.reference.as_deref())
        .bind(entry.status.as_str())
        .bind(entry.void_reason.as_deref())
        .bind(entry.reversal_of_entry_id.map(|id| *id.as_uuid()))
        .bind(entry.created_by.as_uuid())
        .bind(entry.created_at)
        .bind(entry.posted_at)
        .bind(entry.voided_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_entry", e))?;

        self.insert_lines(entry).await?;
        Ok(entry.id)
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn update_entry_status(
        &mut self,
        entry_id: EntryId,
        change: &StatusChange,
    ) -> Result<(), StoreError> {
        let result = match change {
            StatusChange::Posted {
                entry_number,
                posted_at,
            } => {
                sqlx::query(
                    r#"
                    UPDATE journal_entries
                    SET status = 'posted', entry_number = $3, posted_at = $4
                    WHERE tenant_id = $1 AND id = $2 AND status = 'draft'
                    "#,
                )
                .bind(self.tenant_id.as_uuid())
                .bind(entry_id.as_uuid())
                .bind(*entry_number as i64)
                .bind(posted_at)
                .execute(&mut *self.tx)
                .await
            }
            StatusChange::Voided { reason, voided_at } => {
                sqlx::query(
                    r#"
                    UPDATE journal_entries
                    SET status = 'voided', void_reason = $3, voided_at = $4
                    WHERE tenant_id = $1 AND id = $2 AND status = 'posted'
                    "#,
                )
                .bind(self.tenant_id.as_uuid())
                .bind(entry_id.as_uuid())
                .bind(reason)
                .bind(voided_at)
                .execute(&mut *self.tx)
                .await
            }
        }
        .map_err(|e| map_sqlx_error("update_entry_status", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict(format!(
                "journal entry {entry_id} cannot move to {}",
                change.status().as_str()
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn load_entry_for_update(
        &mut self,
        entry_id: EntryId,
    ) -> Result<Option<JournalEntry>, StoreError> {
        let tenant_id = self.tenant_id;
        load_entry(&mut *self.tx, tenant_id, entry_id, true).await
    }

    #[instrument(skip(self, entry), fields(tenant_id = %self.tenant_id.as_uuid(), entry_id = %entry.id), err)]
    async fn replace_draft(&mut self, entry: &JournalEntry) -> Result<(), StoreError> {
        self.check_tenant(entry.tenant_id, "journal entry")?;

        let result = sqlx::query(
            r#"
            UPDATE journal_entries
            SET entry_date = $3, description = $4, reference = $5
            WHERE tenant_id = $1 AND id = $2 AND status = 'draft'
            "#,
        )
        .bind(self.tenant_id.as_uuid())
        .bind(entry.id.as_uuid())
        .bind(entry.entry_date)
        .bind(&entry.description)
        .bind(entry.reference.as_deref())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("replace_draft", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict(format!(
                "journal entry {} is no longer a draft",
                entry.id
            )));
        }

        self.delete_lines(entry.id).await?;
        self.insert_lines(entry).await
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn delete_draft(&mut self, entry_id: EntryId) -> Result<(), StoreError> {
        let result = sqlx::query(
            "DELETE FROM journal_entries WHERE tenant_id = $1 AND id = $2 AND status = 'draft'",
        )
        .bind(self.tenant_id.as_uuid())
        .bind(entry_id.as_uuid())
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("delete_draft", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict(format!(
                "journal entry {entry_id} is not a stored draft"
            )));
        }
        Ok(())
    }

    async fn find_account(&mut self, account_id: AccountId) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ledger_accounts WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(self.tenant_id.as_uuid())
        .bind(account_id.as_uuid())
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_account", e))?;

        row.map(|r| decode_account(&r)).transpose()
    }

    async fn find_account_by_code(&mut self, code: &str) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ledger_accounts WHERE tenant_id = $1 AND code = $2"
        ))
        .bind(self.tenant_id.as_uuid())
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("find_account_by_code", e))?;

        row.map(|r| decode_account(&r)).transpose()
    }

    #[instrument(skip(self, account), fields(tenant_id = %self.tenant_id.as_uuid(), code = %account.code), err)]
    async fn insert_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.check_tenant(account.tenant_id, "account")?;

        sqlx::query(
            r#"
            INSERT INTO ledger_accounts (
                id,
                tenant_id,
                code,
                name,
                account_type,
                normal_side,
                is_system,
                is_active,
                parent_id,
                created_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(account.id.as_uuid())
        .bind(self.tenant_id.as_uuid())
        .bind(&account.code)
        .bind(&account.name)
        .bind(account_type_str(account.account_type))
        .bind(normal_side_str(account.normal_side))
        .bind(account.is_system)
        .bind(account.is_active)
        .bind(account.parent_id.map(|id| *id.as_uuid()))
        .bind(account.created_at)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("insert_account", e))?;
        Ok(())
    }

    #[instrument(skip(self, account), fields(tenant_id = %self.tenant_id.as_uuid(), account_id = %account.id), err)]
    async fn update_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.check_tenant(account.tenant_id, "account")?;

        let result = sqlx::query(
            r#"
            UPDATE ledger_accounts
            SET code = $3, name = $4, is_active = $5
            WHERE tenant_id = $1 AND id = $2
            "#,
        )
        .bind(self.tenant_id.as_uuid())
        .bind(account.id.as_uuid())
        .bind(&account.code)
        .bind(&account.name)
        .bind(account.is_active)
        .execute(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("update_account", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict(format!(
                "account {} does not exist",
                account.id
            )));
        }
        Ok(())
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn delete_account(&mut self, account_id: AccountId) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM ledger_accounts WHERE tenant_id = $1 AND id = $2")
            .bind(self.tenant_id.as_uuid())
            .bind(account_id.as_uuid())
            .execute(&mut *self.tx)
            .await
            .map_err(|e| map_sqlx_error("delete_account", e))?;

        if result.rows_affected() != 1 {
            return Err(StoreError::Conflict(format!(
                "account {account_id} does not exist"
            )));
        }
        Ok(())
    }

    async fn account_is_referenced(&mut self, account_id: AccountId) -> Result<bool, StoreError> {
        sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM journal_lines WHERE tenant_id = $1 AND account_id = $2)",
        )
        .bind(self.tenant_id.as_uuid())
        .bind(account_id.as_uuid())
        .fetch_one(&mut *self.tx)
        .await
        .map_err(|e| map_sqlx_error("account_is_referenced", e))
    }

    #[instrument(skip(self), fields(tenant_id = %self.tenant_id.as_uuid()), err)]
    async fn commit(self) -> Result<(), StoreError> {
        self.tx
            .commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))
    }
}

#[async_trait::async_trait]
impl LedgerStore for PostgresLedgerStore {
    type Tx = PostgresTransaction;

    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid()), err)]
    async fn begin_atomic_write(&self, tenant_id: TenantId) -> Result<Self::Tx, StoreError> {
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1, 0))")
            .bind(tenant_id.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("tenant_write_lock", e))?;

        Ok(PostgresTransaction { tenant_id, tx })
    }

    #[instrument(
        skip(self, query),
        fields(tenant_id = %tenant_id.as_uuid(), line_count = tracing::field::Empty),
        err
    )]
    async fn fetch_posted_lines(
        &self,
        tenant_id: TenantId,
        query: &LineQuery,
    ) -> Result<Vec<PostedLine>, StoreError> {
        let account_ids: Option<Vec<uuid::Uuid>> = query
            .account_ids
            .as_ref()
            .map(|ids| ids.iter().map(|id| *id.as_uuid()).collect());

        let rows = sqlx::query(
            r#"
            SELECT
                e.id AS entry_id,
                e.entry_number,
                e.entry_date,
                e.description AS entry_description,
                l.id AS line_id,
                l.account_id,
                l.description,
                l.debit_amount,
                l.credit_amount
            FROM journal_lines l
            JOIN journal_entries e
                ON e.tenant_id = l.tenant_id AND e.id = l.entry_id
            WHERE l.tenant_id = $1
                AND e.status IN ('posted', 'voided')
                AND ($2::uuid[] IS NULL OR l.account_id = ANY($2))
                AND ($3::date IS NULL OR e.entry_date >= $3)
                AND ($4::date IS NULL OR e.entry_date <= $4)
            ORDER BY e.entry_number ASC, l.line_no ASC
            "#,
        )
        .bind(tenant_id.as_uuid())
        .bind(account_ids)
        .bind(query.date_range.start)
        .bind(query.date_range.end)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("fetch_posted_lines", e))?;

        let span = Span::current();
        span.record("line_count", rows.len());

        rows.iter()
            .map(|row| {
                PostedLineRow::from_row(row)
                    .map_err(|e| StoreError::Corrupt(format!("failed to decode posted line: {e}")))?
                    .try_into()
            })
            .collect()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid()), err)]
    async fn get_entry(
        &self,
        tenant_id: TenantId,
        entry_id: EntryId,
    ) -> Result<Option<JournalEntry>, StoreError> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| map_sqlx_error("acquire", e))?;
        load_entry(&mut *conn, tenant_id, entry_id, false).await
    }

    #[instrument(skip(self, filter), fields(tenant_id = %tenant_id.as_uuid()), err)]
    async fn list_entries(
        &self,
        tenant_id: TenantId,
        filter: &EntryFilter,
    ) -> Result<Vec<JournalEntry>, StoreError> {
        // Header and lines are read in one repeatable-read transaction so they
        // come from the same snapshot.
        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL REPEATABLE READ, READ ONLY")
            .execute(&mut *tx)
            .await
            .map_err(|e| map_sqlx_error("set_isolation", e))?;

        let rows = sqlx::query(&format!(
            r#"
            SELECT {ENTRY_COLUMNS}
            FROM journal_entries
            WHERE tenant_id = $1
                AND ($2::text IS NULL OR status = $2)
                AND ($3::date IS NULL OR entry_date >= $3)
                AND ($4::date IS NULL OR entry_date <= $4)
            ORDER BY entry_date ASC, entry_number ASC NULLS LAST, created_at ASC
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.date_range.start)
        .bind(filter.date_range.end)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("list_entries", e))?;

        let mut entries = rows
            .iter()
            .map(decode_entry_header)
            .collect::<Result<Vec<_>, _>>()?;

        let ids: Vec<uuid::Uuid> = entries.iter().map(|e| *e.id.as_uuid()).collect();
        let line_rows = sqlx::query(&format!(
            r#"
            SELECT {LINE_COLUMNS}
            FROM journal_lines
            WHERE tenant_id = $1 AND entry_id = ANY($2)
            ORDER BY entry_id, line_no ASC
            "#
        ))
        .bind(tenant_id.as_uuid())
        .bind(&ids)
        .fetch_all(&mut *tx)
        .await
        .map_err(|e| map_sqlx_error("list_entry_lines", e))?;

        let mut lines: std::collections::HashMap<EntryId, Vec<JournalLine>> =
            std::collections::HashMap::new();
        for row in &line_rows {
            let line = decode_line(row)?;
            lines.entry(line.entry_id).or_default().push(line);
        }
        for entry in &mut entries {
            entry.lines = lines.remove(&entry.id).unwrap_or_default();
        }

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;
        Ok(entries)
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid()), err)]
    async fn get_account(
        &self,
        tenant_id: TenantId,
        account_id: AccountId,
    ) -> Result<Option<Account>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ledger_accounts WHERE tenant_id = $1 AND id = $2"
        ))
        .bind(tenant_id.as_uuid())
        .bind(account_id.as_uuid())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("get_account", e))?;

        row.map(|r| decode_account(&r)).transpose()
    }

    #[instrument(skip(self), fields(tenant_id = %tenant_id.as_uuid()), err)]
    async fn list_accounts(&self, tenant_id: TenantId) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM ledger_accounts WHERE tenant_id = $1 ORDER BY code ASC"
        ))
        .bind(tenant_id.as_uuid())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("list_accounts", e))?;

        rows.iter().map(decode_account).collect()
    }
}

/// Load an entry header and its lines; `for_update` row-locks the header.
async fn load_entry(
    conn: &mut PgConnection,
    tenant_id: TenantId,
    entry_id: EntryId,
    for_update: bool,
) -> Result<Option<JournalEntry>, StoreError> {
    let lock = if for_update { "FOR UPDATE" } else { "" };
    let row = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM journal_entries WHERE tenant_id = $1 AND id = $2 {lock}"
    ))
    .bind(tenant_id.as_uuid())
    .bind(entry_id.as_uuid())
    .fetch_optional(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_entry", e))?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut entry = decode_entry_header(&row)?;

    let line_rows = sqlx::query(&format!(
        "SELECT {LINE_COLUMNS} FROM journal_lines WHERE tenant_id = $1 AND entry_id = $2 ORDER BY line_no ASC"
    ))
    .bind(tenant_id.as_uuid())
    .bind(entry_id.as_uuid())
    .fetch_all(&mut *conn)
    .await
    .map_err(|e| map_sqlx_error("load_entry_lines", e))?;

    entry.lines = line_rows.iter().map(decode_line).collect::<Result<_, _>>()?;
    Ok(Some(entry))
}

/// Map SQLx errors to StoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> StoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") | Some("40001") => StoreError::Conflict(msg),
                Some("40P01") => StoreError::Aborted(msg),
                Some("23503") => StoreError::TenantIsolation(msg),
                Some("23514") => StoreError::Corrupt(msg),
                _ => StoreError::Backend(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            StoreError::Backend(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::PoolTimedOut => {
            StoreError::Backend(format!("connection pool timed out in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            StoreError::Corrupt(format!("decode error in {}: {}", operation, err))
        }
        _ => StoreError::Backend(format!("sqlx error in {}: {}", operation, err)),
    }
}

// SQLx row types

const ACCOUNT_COLUMNS: &str = "id, tenant_id, code, name, account_type, normal_side, \
     is_system, is_active, parent_id, created_at";

const ENTRY_COLUMNS: &str = "id, tenant_id, entry_number, entry_date, description, reference, \
     status, void_reason, reversal_of_entry_id, created_by, created_at, posted_at, voided_at";

const LINE_COLUMNS: &str =
    "id, entry_id, account_id, description, debit_amount, credit_amount";

fn account_type_str(kind: AccountType) -> &'static str {
    match kind {
        AccountType::Asset => "asset",
        AccountType::Liability => "liability",
        AccountType::Equity => "equity",
        AccountType::Revenue => "revenue",
        AccountType::Expense => "expense",
    }
}

fn parse_account_type(s: &str) -> Result<AccountType, StoreError> {
    AccountType::ALL
        .into_iter()
        .find(|k| account_type_str(*k) == s)
        .ok_or_else(|| StoreError::Corrupt(format!("unknown account type '{s}'")))
}

fn normal_side_str(side: NormalSide) -> &'static str {
    match side {
        NormalSide::Debit => "debit",
        NormalSide::Credit => "credit",
    }
}

fn parse_normal_side(s: &str) -> Result<NormalSide, StoreError> {
    match s {
        "debit" => Ok(NormalSide::Debit),
        "credit" => Ok(NormalSide::Credit),
        other => Err(StoreError::Corrupt(format!("unknown normal side '{other}'"))),
    }
}

fn decode_money(value: rust_decimal::Decimal) -> Result<Money, StoreError> {
    Money::from_decimal(value).map_err(|e| StoreError::Corrupt(e.to_string()))
}

fn decode_number(value: i64) -> Result<u64, StoreError> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("invalid entry number {value}")))
}

fn column_error(e: sqlx::Error) -> StoreError {
    StoreError::Corrupt(format!("failed to decode row: {e}"))
}

fn decode_account(row: &PgRow) -> Result<Account, StoreError> {
    let account_type: String = row.try_get("account_type").map_err(column_error)?;
    let normal_side: String = row.try_get("normal_side").map_err(column_error)?;
    let parent_id: Option<uuid::Uuid> = row.try_get("parent_id").map_err(column_error)?;

    Ok(Account {
        id: AccountId::from_uuid(row.try_get("id").map_err(column_error)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(column_error)?),
        code: row.try_get("code").map_err(column_error)?,
        name: row.try_get("name").map_err(column_error)?,
        account_type: parse_account_type(&account_type)?,
        normal_side: parse_normal_side(&normal_side)?,
        is_system: row.try_get("is_system").map_err(column_error)?,
        is_active: row.try_get("is_active").map_err(column_error)?,
        parent_id: parent_id.map(AccountId::from_uuid),
        created_at: row.try_get("created_at").map_err(column_error)?,
    })
}

/// Header only; lines are attached by the caller.
fn decode_entry_header(row: &PgRow) -> Result<JournalEntry, StoreError> {
    let status: String = row.try_get("status").map_err(column_error)?;
    let entry_number: Option<i64> = row.try_get("entry_number").map_err(column_error)?;
    let reversal_of: Option<uuid::Uuid> =
        row.try_get("reversal_of_entry_id").map_err(column_error)?;

    Ok(JournalEntry {
        id: EntryId::from_uuid(row.try_get("id").map_err(column_error)?),
        tenant_id: TenantId::from_uuid(row.try_get("tenant_id").map_err(column_error)?),
        entry_number: entry_number.map(decode_number).transpose()?,
        entry_date: row.try_get::<NaiveDate, _>("entry_date").map_err(column_error)?,
        description: row.try_get("description").map_err(column_error)?,
        reference: row.try_get("reference").map_err(column_error)?,
        status: status
            .parse::<EntryStatus>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        void_reason: row.try_get("void_reason").map_err(column_error)?,
        reversal_of_entry_id: reversal_of.map(EntryId::from_uuid),
        created_by: UserId::from_uuid(row.try_get("created_by").map_err(column_error)?),
        created_at: row.try_get("created_at").map_err(column_error)?,
        posted_at: row
            .try_get::<Option<DateTime<Utc>>, _>("posted_at")
            .map_err(column_error)?,
        voided_at: row
            .try_get::<Option<DateTime<Utc>>, _>("voided_at")
            .map_err(column_error)?,
        lines: Vec::new(),
    })
}

fn decode_line(row: &PgRow) -> Result<JournalLine, StoreError> {
    Ok(JournalLine {
        id: LineId::from_uuid(row.try_get("id").map_err(column_error)?),
        entry_id: EntryId::from_uuid(row.try_get("entry_id").map_err(column_error)?),
        account_id: AccountId::from_uuid(row.try_get("account_id").map_err(column_error)?),
        description: row.try_get("description").map_err(column_error)?,
        debit_amount: decode_money(row.try_get("debit_amount").map_err(column_error)?)?,
        credit_amount: decode_money(row.try_get("credit_amount").map_err(column_error)?)?,
    })
}

#[derive(Debug)]
struct PostedLineRow {
    entry_id: uuid::Uuid,
    entry_number: Option<i64>,
    entry_date: NaiveDate,
    entry_description: String,
    line_id: uuid::Uuid,
    account_id: uuid::Uuid,
    description: Option<String>,
    debit_amount: rust_decimal::Decimal,
    credit_amount: rust_decimal::Decimal,
}

impl<'r> FromRow<'r, PgRow> for PostedLineRow {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(PostedLineRow {
            entry_id: row.try_get("entry_id")?,
            entry_number: row.try_get("entry_number")?,
            entry_date: row.try_get("entry_date")?,
            entry_description: row.try_get("entry_description")?,
            line_id: row.try_get("line_id")?,
            account_id: row.try_get("account_id")?,
            description: row.try_get("description")?,
            debit_amount: row.try_get("debit_amount")?,
            credit_amount: row.try_get("credit_amount")?,
        })
    }
}

impl TryFrom<PostedLineRow> for PostedLine {
    type Error = StoreError;

    fn try_from(row: PostedLineRow) -> Result<Self, Self::Error> {
        let entry_number = row.entry_number.ok_or_else(|| {
            StoreError::Corrupt(format!("posted entry {} has no entry number", row.entry_id))
        })?;

        Ok(PostedLine {
            entry_id: EntryId::from_uuid(row.entry_id),
            entry_number: decode_number(entry_number)?,
            entry_date: row.entry_date,
            entry_description: row.entry_description,
            line_id: LineId::from_uuid(row.line_id),
            account_id: AccountId::from_uuid(row.account_id),
            description: row.description,
            debit_amount: decode_money(row.debit_amount)?,
            credit_amount: decode_money(row.credit_amount)?,
        })
    }
}
