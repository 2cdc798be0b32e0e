pub mod coordinator;
pub mod scheduler;

pub use coordinator::{BackupOutcome, Coordinator, SkipReason, Trigger};
