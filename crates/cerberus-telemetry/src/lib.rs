//! The daemon's audit/event log: a day-rotated JSONL trail of state
//! transitions (doze changes, freeze/unfreeze outcomes, safety-net
//! rejections) plus the retention policy that keeps it bounded.

pub mod event;
pub mod retention;
pub mod writer;

pub use event::{DaemonEvent, DaemonEventType};
pub use retention::{enforce as enforce_retention, PruneReason, PrunedFile, RetentionError, RetentionPolicy};
pub use writer::{read_log_file, EventLogWriter, WriteError};
