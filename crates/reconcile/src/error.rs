use conta_core::{EntryError, EntryId};
use conta_storage::StorageError;
use thiserror::Error;

use crate::config::ConfigError;

/// Failures the caller cannot treat as a normal outcome. Duplicates, guard
/// refusals and group rejections are reported through result types instead.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error("Invalid entry: {0}")]
    Entry(#[from] EntryError),
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),
    #[error("Entry {0} not found")]
    NotFound(EntryId),
}
