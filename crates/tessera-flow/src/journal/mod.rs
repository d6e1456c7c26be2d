//! Per-record change journals and their processing.
//!
//! - [`id`]: page identifiers and listing addresses
//! - [`page`]: entries and bounded pages
//! - [`store`]: paginated persistence with append, archive, and cleanup
//! - [`process`]: the processor trait entries flow through
//! - [`scheduler`]: per-entity workers that drain journals

pub mod id;
pub mod page;
pub mod process;
pub mod scheduler;
pub mod store;

pub use id::{JournalId, JournalTarget};
pub use page::{JOURNAL_RECORD_TYPE, JournalEntry, JournalPage, MAX_ENTRY_PER_PAGE};
pub use process::{JournalProcess, LogProcess};
pub use scheduler::JournalScheduler;
pub use store::{JournalStore, JournalView};
