//! Deletion guard. Refusals are ordinary outcomes carrying a reason for the
//! user, not errors.

use std::fmt;

use conta_core::{EntryId, LedgerEntry};
use conta_storage::{count_bank_reconciliations, get_entry, DbPool};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::ReconcileError;
use crate::grouping::settle_after_removal;
use crate::Progress;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum DeleteBlock {
    NotFound,
    HasChildren { count: u32 },
    Reconciled,
    LinkedSale { sale_id: i64 },
    BankReconciliation { records: i64 },
    LinkedInvoice { invoice_id: i64 },
}

impl fmt::Display for DeleteBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeleteBlock::NotFound => write!(f, "Entry not found"),
            DeleteBlock::HasChildren { count } => write!(
                f,
                "Entry leads a group with {count} grouped entries; ungroup them first"
            ),
            DeleteBlock::Reconciled => write!(f, "Entry is already reconciled"),
            DeleteBlock::LinkedSale { sale_id } => {
                write!(f, "Entry is linked to sale {sale_id}")
            }
            DeleteBlock::BankReconciliation { records } => {
                write!(f, "Entry is referenced by {records} bank reconciliation record(s)")
            }
            DeleteBlock::LinkedInvoice { invoice_id } => {
                write!(f, "Entry is linked to incoming invoice {invoice_id}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeleteVerdict {
    Allowed,
    Blocked(DeleteBlock),
}

impl DeleteVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, DeleteVerdict::Allowed)
    }

    pub fn reason(&self) -> Option<String> {
        match self {
            DeleteVerdict::Allowed => None,
            DeleteVerdict::Blocked(block) => Some(block.to_string()),
        }
    }
}

/// Checks whether `id` may be deleted. The first failing rule wins.
pub async fn can_delete(pool: &DbPool, id: EntryId) -> Result<DeleteVerdict, ReconcileError> {
    let Some(entry) = get_entry(pool, id).await? else {
        return Ok(DeleteVerdict::Blocked(DeleteBlock::NotFound));
    };
    Ok(match local_block(&entry) {
        Some(block) => DeleteVerdict::Blocked(block),
        None => {
            let records = count_bank_reconciliations(pool, id).await?;
            if records > 0 {
                DeleteVerdict::Blocked(DeleteBlock::BankReconciliation { records })
            } else if let Some(invoice_id) = entry.links.incoming_invoice_id {
                DeleteVerdict::Blocked(DeleteBlock::LinkedInvoice { invoice_id })
            } else {
                DeleteVerdict::Allowed
            }
        }
    })
}

/// Rules that need nothing beyond the entry itself.
fn local_block(entry: &LedgerEntry) -> Option<DeleteBlock> {
    let children = entry.group.as_ref().map_or(0, |g| g.children.len() as u32);
    if children > 0 {
        return Some(DeleteBlock::HasChildren { count: children });
    }
    if entry.reconciled {
        return Some(DeleteBlock::Reconciled);
    }
    entry
        .links
        .sale_id
        .map(|sale_id| DeleteBlock::LinkedSale { sale_id })
}

/// Deletes `id` if the guard allows it. A deleted child leaves its group the
/// same way an ungroup would.
pub async fn delete_entry(pool: &DbPool, id: EntryId) -> Result<DeleteVerdict, ReconcileError> {
    let verdict = can_delete(pool, id).await?;
    if !verdict.is_allowed() {
        return Ok(verdict);
    }

    let former_principal = get_entry(pool, id).await?.and_then(|e| e.group_id);
    if !conta_storage::delete_entry(pool, id).await? {
        return Ok(DeleteVerdict::Blocked(DeleteBlock::NotFound));
    }
    if let Some(principal) = former_principal {
        settle_after_removal(pool, principal).await?;
    }
    info!(entry = %id, "Entry deleted");
    Ok(DeleteVerdict::Allowed)
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BatchDeleteReport {
    pub deleted: Vec<EntryId>,
    pub skipped: Vec<(EntryId, String)>,
    pub failed: Vec<(EntryId, String)>,
}

impl BatchDeleteReport {
    pub fn deleted_count(&self) -> usize {
        self.deleted.len()
    }

    pub fn skipped_count(&self) -> usize {
        self.skipped.len()
    }
}

/// Deletes `ids` one at a time. Guard refusals are skipped and store failures
/// counted; neither stops the loop, and nothing already deleted is undone.
pub async fn delete_batch<F>(
    pool: &DbPool,
    ids: &[EntryId],
    mut on_progress: F,
) -> BatchDeleteReport
where
    F: FnMut(Progress),
{
    let mut report = BatchDeleteReport::default();
    let total = ids.len();

    for (i, &id) in ids.iter().enumerate() {
        match delete_entry(pool, id).await {
            Ok(DeleteVerdict::Allowed) => report.deleted.push(id),
            Ok(DeleteVerdict::Blocked(block)) => report.skipped.push((id, block.to_string())),
            Err(e) => {
                warn!(entry = %id, error = %e, "Failed to delete entry");
                report.failed.push((id, e.to_string()));
            }
        }
        on_progress(Progress { done: i + 1, total });
    }

    info!(
        deleted = report.deleted.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "Batch deletion finished"
    );
    report
}
