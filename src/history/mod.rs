pub mod store;
pub mod types;

pub use store::{BoundedLog, HistoryLog, SavedMachineLog, LOG_CAPACITY};
pub use types::{new_entry_id, HistoryEntry, Keyed, SavedMachineEntry};
