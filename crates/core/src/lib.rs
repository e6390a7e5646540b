pub mod entry;
pub mod money;
pub mod period;

pub use entry::{
    BankAccountId, CategoryId, Direction, EntryError, EntryId, EntryLinks, EntryRole,
    GroupSummary, ImportProvenance, LedgerEntry, NewEntry,
};
pub use money::Money;
pub use period::DateRange;
