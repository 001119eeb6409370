//! Coordinated freeze/unfreeze execution: binder handshake, cgroup v2
//! freezer, and a signal-based fallback.

pub mod binder;
pub mod executor;
pub mod freeze;
pub mod network;
pub mod signal;

pub use executor::{FreezeExecutor, FreezeOutcome};
