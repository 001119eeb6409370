//! Process identity resolution and the live pid ↔ instance map.

pub mod proc_parsers;
pub mod tracker;

pub use proc_parsers::{resolve_pid, scan_all_pids, ResolvedIdentity};
pub use tracker::{ProcEvent, ProcessTracker, TrackerEffect};
