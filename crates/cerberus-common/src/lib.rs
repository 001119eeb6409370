//! Identifiers, policy types, and the error taxonomy shared across the
//! cerberus crates.

pub mod error;
pub mod id;
pub mod policy;

pub use error::{Error, ErrorCategory, Result, StructuredError, SuggestedAction};
pub use id::{user_id_from_uid, InstanceKey, Pid, UserId};
pub use policy::AppPolicy;
