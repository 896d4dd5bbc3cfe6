//! Background services started by the backend binary.

pub mod review_cleaner;
pub mod state_backup;

pub use review_cleaner::ReviewCleaner;
pub use state_backup::StateBackup;
