use chrono::{DateTime, NaiveDate, Utc};
use conta_core::{
    BankAccountId, CategoryId, DateRange, Direction, EntryId, EntryLinks, GroupSummary,
    ImportProvenance, LedgerEntry, Money, NewEntry,
};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow};
use sqlx::{Pool, Row, Sqlite};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

pub type DbPool = Pool<Sqlite>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("FITID {fit_id} already imported for bank account {account}")]
    DuplicateFitId { fit_id: String, account: String },
    #[error("Corrupt ledger entry {id}: {reason}")]
    Corrupt { id: i64, reason: String },
}

pub async fn create_db(path: &Path) -> Result<DbPool, StorageError> {
    let options = SqliteConnectOptions::new()
        .filename(path)
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        .busy_timeout(Duration::from_millis(5000))
        .pragma("synchronous", "NORMAL")
        .pragma("cache_size", "-32000");

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS ledger_entries (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            direction TEXT NOT NULL,
            amount_cents INTEGER NOT NULL CHECK (amount_cents >= 0),
            date TEXT NOT NULL,
            description TEXT NOT NULL,
            document_number TEXT,
            category_id INTEGER,
            bank_account_id INTEGER,
            sale_id INTEGER,
            customer_id INTEGER,
            supplier_id INTEGER,
            incoming_invoice_id INTEGER,
            fit_id TEXT,
            imported_at TEXT,
            reconciled INTEGER NOT NULL DEFAULT 0,
            has_invoice INTEGER NOT NULL DEFAULT 0,
            group_id INTEGER REFERENCES ledger_entries(id),
            is_group_principal INTEGER NOT NULL DEFAULT 0,
            group_item_count INTEGER NOT NULL DEFAULT 0,
            group_has_invoice INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    // One FITID per bank account.
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_entries_account_fit_id \
         ON ledger_entries (bank_account_id, fit_id) WHERE fit_id IS NOT NULL",
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_entries_group ON ledger_entries (group_id)")
        .execute(pool)
        .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_entries_amount_date ON ledger_entries (amount_cents, date)",
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS bank_reconciliations (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            entry_id INTEGER NOT NULL REFERENCES ledger_entries(id),
            statement_ref TEXT,
            reconciled_at TEXT NOT NULL DEFAULT (datetime('now'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

const ENTRY_COLUMNS: &str = "id, direction, amount_cents, date, description, document_number, \
    category_id, bank_account_id, sale_id, customer_id, supplier_id, incoming_invoice_id, \
    fit_id, imported_at, reconciled, has_invoice, group_id, is_group_principal, \
    group_item_count, group_has_invoice";

fn row_to_entry(row: &SqliteRow) -> Result<LedgerEntry, StorageError> {
    let id: i64 = row.try_get("id")?;
    let corrupt = |reason: String| StorageError::Corrupt { id, reason };

    let direction: String = row.try_get("direction")?;
    let direction: Direction = direction.parse().map_err(|e| corrupt(format!("{e}")))?;

    let date: String = row.try_get("date")?;
    let date = NaiveDate::parse_from_str(&date, "%Y-%m-%d")
        .map_err(|e| corrupt(format!("bad date '{date}': {e}")))?;

    let fit_id: Option<String> = row.try_get("fit_id")?;
    let imported_at: Option<String> = row.try_get("imported_at")?;
    let provenance = match (fit_id, imported_at) {
        (Some(fit_id), Some(at)) => {
            let imported_at = DateTime::parse_from_rfc3339(&at)
                .map_err(|e| corrupt(format!("bad imported_at '{at}': {e}")))?
                .with_timezone(&Utc);
            Some(ImportProvenance { fit_id, imported_at })
        }
        (Some(_), None) => return Err(corrupt("fit_id without imported_at".to_string())),
        (None, _) => None,
    };

    let is_group_principal: bool = row.try_get("is_group_principal")?;
    let group = if is_group_principal {
        let item_count: i64 = row.try_get("group_item_count")?;
        Some(GroupSummary {
            item_count: u32::try_from(item_count)
                .map_err(|_| corrupt(format!("bad group_item_count {item_count}")))?,
            has_invoice: row.try_get("group_has_invoice")?,
            children: Vec::new(),
        })
    } else {
        None
    };

    Ok(LedgerEntry {
        id: EntryId(id),
        direction,
        amount: Money::from_cents(row.try_get("amount_cents")?),
        date,
        description: row.try_get("description")?,
        document_number: row.try_get("document_number")?,
        links: EntryLinks {
            category_id: row.try_get::<Option<i64>, _>("category_id")?.map(CategoryId),
            bank_account_id: row
                .try_get::<Option<i64>, _>("bank_account_id")?
                .map(BankAccountId),
            sale_id: row.try_get("sale_id")?,
            customer_id: row.try_get("customer_id")?,
            supplier_id: row.try_get("supplier_id")?,
            incoming_invoice_id: row.try_get("incoming_invoice_id")?,
        },
        provenance,
        reconciled: row.try_get("reconciled")?,
        has_invoice: row.try_get("has_invoice")?,
        group_id: row.try_get::<Option<i64>, _>("group_id")?.map(EntryId),
        is_group_principal,
        group,
    })
}

fn rows_to_entries(rows: &[SqliteRow]) -> Result<Vec<LedgerEntry>, StorageError> {
    rows.iter().map(row_to_entry).collect()
}

/// Fills in the child list of every principal in `entries`.
async fn attach_children(
    pool: &DbPool,
    entries: &mut [LedgerEntry],
) -> Result<(), StorageError> {
    for entry in entries.iter_mut() {
        if !entry.is_group_principal {
            continue;
        }
        let children = list_children(pool, entry.id).await?;
        if let Some(group) = entry.group.as_mut() {
            group.children = children;
        }
    }
    Ok(())
}

pub async fn insert_entry(pool: &DbPool, entry: &NewEntry) -> Result<EntryId, StorageError> {
    let links = &entry.links;
    let result = sqlx::query(
        "INSERT INTO ledger_entries (direction, amount_cents, date, description, document_number, \
         category_id, bank_account_id, sale_id, customer_id, supplier_id, incoming_invoice_id, \
         fit_id, imported_at, has_invoice) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING id",
    )
    .bind(entry.direction.as_str())
    .bind(entry.amount.to_cents())
    .bind(entry.date.to_string())
    .bind(&entry.description)
    .bind(&entry.document_number)
    .bind(links.category_id.map(|c| c.0))
    .bind(links.bank_account_id.map(|b| b.0))
    .bind(links.sale_id)
    .bind(links.customer_id)
    .bind(links.supplier_id)
    .bind(links.incoming_invoice_id)
    .bind(entry.provenance.as_ref().map(|p| p.fit_id.as_str()))
    .bind(entry.provenance.as_ref().map(|p| p.imported_at.to_rfc3339()))
    .bind(entry.has_invoice)
    .fetch_one(pool)
    .await;

    match result {
        Ok(row) => Ok(EntryId(row.try_get("id")?)),
        Err(sqlx::Error::Database(db)) if db.is_unique_violation() => {
            Err(StorageError::DuplicateFitId {
                fit_id: entry
                    .provenance
                    .as_ref()
                    .map(|p| p.fit_id.clone())
                    .unwrap_or_default(),
                account: links
                    .bank_account_id
                    .map(|b| b.to_string())
                    .unwrap_or_else(|| "-".to_string()),
            })
        }
        Err(e) => Err(e.into()),
    }
}

/// Loads one entry; principals come back with their children attached.
pub async fn get_entry(pool: &DbPool, id: EntryId) -> Result<Option<LedgerEntry>, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE id = ?"
    ))
    .bind(id.0)
    .fetch_optional(pool)
    .await?;

    let Some(row) = row else {
        return Ok(None);
    };
    let mut entries = vec![row_to_entry(&row)?];
    attach_children(pool, &mut entries).await?;
    Ok(entries.pop())
}

pub async fn find_by_fit_id(
    pool: &DbPool,
    account: BankAccountId,
    fit_id: &str,
) -> Result<Option<LedgerEntry>, StorageError> {
    let row = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE bank_account_id = ? AND fit_id = ?"
    ))
    .bind(account.0)
    .bind(fit_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(row_to_entry).transpose()
}

/// The default ledger listing: group children are left out, principals carry
/// their children.
pub async fn list_top_level(pool: &DbPool) -> Result<Vec<LedgerEntry>, StorageError> {
    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE group_id IS NULL ORDER BY date DESC, id DESC"
    ))
    .fetch_all(pool)
    .await?;

    let mut entries = rows_to_entries(&rows)?;
    attach_children(pool, &mut entries).await?;
    Ok(entries)
}

pub async fn list_children(
    pool: &DbPool,
    principal: EntryId,
) -> Result<Vec<LedgerEntry>, StorageError> {
    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE group_id = ? ORDER BY date, id"
    ))
    .bind(principal.0)
    .fetch_all(pool)
    .await?;

    rows_to_entries(&rows)
}

/// Unreconciled top-level entries dated inside `range`.
pub async fn list_unreconciled(
    pool: &DbPool,
    range: DateRange,
) -> Result<Vec<LedgerEntry>, StorageError> {
    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
         WHERE reconciled = 0 AND group_id IS NULL AND date >= ? AND date <= ? \
         ORDER BY date, id"
    ))
    .bind(range.start.to_string())
    .bind(range.end.to_string())
    .fetch_all(pool)
    .await?;

    let mut entries = rows_to_entries(&rows)?;
    attach_children(pool, &mut entries).await?;
    Ok(entries)
}

/// Top-level entries with the given direction and amount dated inside
/// `range`, optionally restricted to one bank account.
pub async fn list_same_amount(
    pool: &DbPool,
    direction: Direction,
    amount_cents: i64,
    range: DateRange,
    account: Option<BankAccountId>,
) -> Result<Vec<LedgerEntry>, StorageError> {
    let rows = sqlx::query(&format!(
        "SELECT {ENTRY_COLUMNS} FROM ledger_entries \
         WHERE group_id IS NULL AND direction = ? AND amount_cents = ? \
         AND date >= ? AND date <= ? AND (? IS NULL OR bank_account_id = ?) \
         ORDER BY date, id"
    ))
    .bind(direction.as_str())
    .bind(amount_cents)
    .bind(range.start.to_string())
    .bind(range.end.to_string())
    .bind(account.map(|a| a.0))
    .bind(account.map(|a| a.0))
    .fetch_all(pool)
    .await?;

    let mut entries = rows_to_entries(&rows)?;
    attach_children(pool, &mut entries).await?;
    Ok(entries)
}

/// Points `child` at `principal`, or detaches it when `principal` is `None`.
pub async fn set_group_id(
    pool: &DbPool,
    child: EntryId,
    principal: Option<EntryId>,
) -> Result<bool, StorageError> {
    let result = sqlx::query("UPDATE ledger_entries SET group_id = ? WHERE id = ?")
        .bind(principal.map(|p| p.0))
        .bind(child.0)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Overwrites the principal flag and the derived group aggregates.
pub async fn write_group_summary(
    pool: &DbPool,
    id: EntryId,
    is_principal: bool,
    item_count: u32,
    has_invoice: bool,
) -> Result<bool, StorageError> {
    let result = sqlx::query(
        "UPDATE ledger_entries SET is_group_principal = ?, group_item_count = ?, \
         group_has_invoice = ? WHERE id = ?",
    )
    .bind(is_principal)
    .bind(i64::from(item_count))
    .bind(has_invoice)
    .bind(id.0)
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_reconciled(
    pool: &DbPool,
    id: EntryId,
    reconciled: bool,
) -> Result<bool, StorageError> {
    let result = sqlx::query("UPDATE ledger_entries SET reconciled = ? WHERE id = ?")
        .bind(reconciled)
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn set_category(
    pool: &DbPool,
    id: EntryId,
    category: Option<CategoryId>,
) -> Result<bool, StorageError> {
    let result = sqlx::query("UPDATE ledger_entries SET category_id = ? WHERE id = ?")
        .bind(category.map(|c| c.0))
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

pub async fn insert_bank_reconciliation(
    pool: &DbPool,
    entry: EntryId,
    statement_ref: Option<&str>,
) -> Result<i64, StorageError> {
    let row = sqlx::query(
        "INSERT INTO bank_reconciliations (entry_id, statement_ref) VALUES (?, ?) RETURNING id",
    )
    .bind(entry.0)
    .bind(statement_ref)
    .fetch_one(pool)
    .await?;
    Ok(row.try_get("id")?)
}

pub async fn count_bank_reconciliations(
    pool: &DbPool,
    entry: EntryId,
) -> Result<i64, StorageError> {
    let (count,) = sqlx::query_as::<_, (i64,)>(
        "SELECT COUNT(*) FROM bank_reconciliations WHERE entry_id = ?",
    )
    .bind(entry.0)
    .fetch_one(pool)
    .await?;
    Ok(count)
}

pub async fn delete_entry(pool: &DbPool, id: EntryId) -> Result<bool, StorageError> {
    let result = sqlx::query("DELETE FROM ledger_entries WHERE id = ?")
        .bind(id.0)
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}
