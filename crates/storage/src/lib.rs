pub mod db;

pub use db::{
    count_bank_reconciliations, create_db, delete_entry, find_by_fit_id, get_entry,
    insert_bank_reconciliation, insert_entry, list_children, list_same_amount, list_top_level,
    list_unreconciled, set_category, set_group_id, set_reconciled, write_group_summary, DbPool,
    StorageError,
};
