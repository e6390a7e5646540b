//! Statement import in two passes: `preview` flags duplicates for the user,
//! `commit` re-checks each row right before inserting it.

use std::ops::ControlFlow;

use chrono::{DateTime, Utc};
use conta_core::{BankAccountId, CategoryId, EntryId, EntryLinks, NewEntry};
use conta_import::{
    DuplicateMatcher, MatchMethod, MatchableEntry, OfxAccount, OfxTransaction, SkippedBlock,
};
use conta_storage::{insert_entry, DbPool, StorageError};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::ReconcileConfig;
use crate::duplicates::{detect_import_duplicate, DuplicateMatch};
use crate::error::ReconcileError;
use crate::Progress;

#[derive(Debug, Clone)]
pub struct PreviewRow {
    pub transaction: OfxTransaction,
    pub duplicate: Option<DuplicateMatch>,
}

#[derive(Debug, Clone, Default)]
pub struct ImportPreview {
    pub account: OfxAccount,
    pub rows: Vec<PreviewRow>,
    pub skipped: Vec<SkippedBlock>,
    pub repeated_fit_ids: usize,
    /// Set when the file could not be read as a statement at all; `rows` is
    /// empty in that case.
    pub parse_error: Option<String>,
}

impl ImportPreview {
    /// Rows not already flagged as duplicates, ready to be categorised.
    pub fn new_rows(&self) -> Vec<ImportRow> {
        self.rows
            .iter()
            .filter(|r| r.duplicate.is_none())
            .map(|r| ImportRow::new(r.transaction.clone()))
            .collect()
    }
}

/// A statement line the user chose to import.
#[derive(Debug, Clone)]
pub struct ImportRow {
    pub transaction: OfxTransaction,
    pub category_id: Option<CategoryId>,
}

impl ImportRow {
    pub fn new(transaction: OfxTransaction) -> Self {
        Self {
            transaction,
            category_id: None,
        }
    }

    pub fn with_category(mut self, category: CategoryId) -> Self {
        self.category_id = Some(category);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RowStatus {
    Imported,
    Duplicate { method: MatchMethod },
    /// Needs user input (e.g. a category) before it can be imported.
    Pending,
    Error,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowDetail {
    pub description: String,
    pub fit_id: String,
    #[serde(flatten)]
    pub status: RowStatus,
    pub message: String,
    pub entry_id: Option<EntryId>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ImportReport {
    pub imported: usize,
    pub duplicate_exact: usize,
    pub duplicate_fingerprint: usize,
    pub pending: usize,
    pub errors: usize,
    /// The caller stopped the run; rows after the last detail were not looked at.
    pub cancelled: bool,
    pub details: Vec<RowDetail>,
}

impl ImportReport {
    fn record(
        &mut self,
        row: &ImportRow,
        status: RowStatus,
        message: String,
        entry_id: Option<EntryId>,
    ) {
        match status {
            RowStatus::Imported => self.imported += 1,
            RowStatus::Duplicate {
                method: MatchMethod::Exact,
            } => self.duplicate_exact += 1,
            RowStatus::Duplicate {
                method: MatchMethod::Fingerprint,
            } => self.duplicate_fingerprint += 1,
            RowStatus::Pending => self.pending += 1,
            RowStatus::Error => self.errors += 1,
        }
        self.details.push(RowDetail {
            description: row.transaction.description.clone(),
            fit_id: row.transaction.fit_id.clone(),
            status,
            message,
            entry_id,
        });
    }
}

/// Parses `data` and tags each transaction that already exists in `account`.
/// A file that cannot be parsed yields an empty preview with `parse_error`
/// set; store failures are errors.
pub async fn preview(
    pool: &DbPool,
    config: &ReconcileConfig,
    data: &[u8],
    account: BankAccountId,
) -> Result<ImportPreview, ReconcileError> {
    let statement = match conta_import::import::import_ofx(data) {
        Ok(statement) => statement,
        Err(e) => {
            warn!(error = %e, "Statement could not be parsed");
            return Ok(ImportPreview {
                parse_error: Some(e.to_string()),
                ..ImportPreview::default()
            });
        }
    };

    let matcher = DuplicateMatcher::new(config.matching.clone());
    let mut rows = Vec::with_capacity(statement.transactions.len());
    for transaction in statement.transactions {
        let subject = MatchableEntry::from_statement(&transaction, account);
        let duplicate = detect_import_duplicate(
            pool,
            &matcher,
            &subject,
            account,
            &transaction.fit_id,
            config.import.fingerprint_threshold,
        )
        .await?;
        rows.push(PreviewRow {
            transaction,
            duplicate,
        });
    }

    debug!(
        rows = rows.len(),
        duplicates = rows.iter().filter(|r| r.duplicate.is_some()).count(),
        skipped = statement.skipped.len(),
        "Statement previewed"
    );

    Ok(ImportPreview {
        account: statement.account,
        rows,
        skipped: statement.skipped,
        repeated_fit_ids: statement.repeated_fit_ids,
        parse_error: None,
    })
}

/// Imports `rows` into `account` one at a time. Every row gets a detail
/// entry; failures never abort the run. `on_progress` is called after each
/// row and may stop the run with `ControlFlow::Break`. Rows already inserted
/// stay inserted.
pub async fn commit<F>(
    pool: &DbPool,
    config: &ReconcileConfig,
    account: BankAccountId,
    rows: &[ImportRow],
    imported_at: DateTime<Utc>,
    mut on_progress: F,
) -> ImportReport
where
    F: FnMut(Progress) -> ControlFlow<()>,
{
    let matcher = DuplicateMatcher::new(config.matching.clone());
    let mut report = ImportReport::default();
    let total = rows.len();

    for (i, row) in rows.iter().enumerate() {
        let (status, message, entry_id) =
            commit_row(pool, config, &matcher, account, row, imported_at).await;
        debug!(
            fit_id = %row.transaction.fit_id,
            status = ?status,
            "Statement row processed"
        );
        report.record(row, status, message, entry_id);

        if on_progress(Progress { done: i + 1, total }).is_break() {
            report.cancelled = i + 1 < total;
            break;
        }
    }

    info!(
        imported = report.imported,
        duplicate_exact = report.duplicate_exact,
        duplicate_fingerprint = report.duplicate_fingerprint,
        pending = report.pending,
        errors = report.errors,
        cancelled = report.cancelled,
        "Statement import finished"
    );
    report
}

async fn commit_row(
    pool: &DbPool,
    config: &ReconcileConfig,
    matcher: &DuplicateMatcher,
    account: BankAccountId,
    row: &ImportRow,
    imported_at: DateTime<Utc>,
) -> (RowStatus, String, Option<EntryId>) {
    let tx = &row.transaction;

    if config.import.require_category && row.category_id.is_none() {
        return (RowStatus::Pending, "Category required".to_string(), None);
    }

    let entry = NewEntry::new(tx.direction, tx.amount, tx.date, &tx.description)
        .map(|e| {
            e.with_links(EntryLinks {
                category_id: row.category_id,
                bank_account_id: Some(account),
                ..EntryLinks::default()
            })
        })
        .and_then(|e| e.imported(&tx.fit_id, imported_at));
    let entry = match entry {
        Ok(entry) => entry,
        Err(e) => return (RowStatus::Pending, e.to_string(), None),
    };

    let subject = MatchableEntry::from(&entry);
    let duplicate = detect_import_duplicate(
        pool,
        matcher,
        &subject,
        account,
        &tx.fit_id,
        config.import.fingerprint_threshold,
    )
    .await;
    match duplicate {
        Ok(Some(found)) => return duplicate_status(found),
        Ok(None) => {}
        Err(e) => {
            warn!(fit_id = %tx.fit_id, error = %e, "Duplicate check failed");
            return (RowStatus::Error, e.to_string(), None);
        }
    }

    match insert_entry(pool, &entry).await {
        Ok(id) => (RowStatus::Imported, "Imported".to_string(), Some(id)),
        // Another import inserted the same line between the check and the insert.
        Err(StorageError::DuplicateFitId { .. }) => (
            RowStatus::Duplicate {
                method: MatchMethod::Exact,
            },
            "Already imported (same FITID)".to_string(),
            None,
        ),
        Err(e) => {
            warn!(fit_id = %tx.fit_id, error = %e, "Failed to insert statement row");
            (RowStatus::Error, e.to_string(), None)
        }
    }
}

fn duplicate_status(found: DuplicateMatch) -> (RowStatus, String, Option<EntryId>) {
    let message = match found.method {
        MatchMethod::Exact => format!("Already imported as entry {} (same FITID)", found.entry_id),
        MatchMethod::Fingerprint => format!(
            "Matches entry {} (score {:.2}, {} day(s) apart)",
            found.entry_id, found.score, found.day_delta
        ),
    };
    (
        RowStatus::Duplicate {
            method: found.method,
        },
        message,
        Some(found.entry_id),
    )
}
