//! Admin/probe IPC: a local stream-socket protocol for the privileged
//! probe helper (screen/charging/doze signals) and administrative clients
//! (policy changes, state queries).

pub mod protocol;
pub mod server;

pub use protocol::{Frame, Message};
pub use server::{IpcServer, MessageHandler};
