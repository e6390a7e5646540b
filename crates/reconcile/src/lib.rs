pub mod config;
pub mod duplicates;
pub mod entries;
pub mod error;
pub mod grouping;
pub mod guard;
pub mod import;
pub mod logging;
pub mod scheduler;

use serde::Serialize;

pub use config::{AutoMergeConfig, ConfigError, ImportConfig, ReconcileConfig};
pub use duplicates::{check_exact, detect_import_duplicate, suggest_duplicates, DuplicateMatch};
pub use entries::{create_manual_entry, merge_suggestion, suggest_for_draft, CreatedEntry};
pub use error::ReconcileError;
pub use grouping::{
    dissolve_group, group, refresh_group, ungroup, GroupOutcome, GroupRejection, UngroupOutcome,
};
pub use guard::{
    can_delete, delete_batch, delete_entry, BatchDeleteReport, DeleteBlock, DeleteVerdict,
};
pub use import::{ImportPreview, ImportReport, ImportRow, PreviewRow, RowDetail, RowStatus};
pub use scheduler::{run_auto_reconciliation, AutoReconcileReport, ReconciliationSession};

/// Reported after each item of a sequential batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Progress {
    pub done: usize,
    pub total: usize,
}
