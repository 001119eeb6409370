//! Background-app freezer daemon core library.
//!
//! Owns process tracking, the per-instance and device-wide doze state
//! machines, coordinated freeze/unfreeze execution, the 1 Hz scheduler, and
//! the admin/probe IPC surface. The binary entry point is in `main.rs`.

pub mod action;
pub mod doze;
pub mod exit_codes;
pub mod instance;
pub mod ipc;
pub mod logging;
pub mod power;
pub mod process;
pub mod tick;
