//! Master configuration, per-package policy persistence, and the safety net
//! that overrides stored policy for system-critical packages.

pub mod master;
pub mod resolve;
pub mod safety_net;
pub mod store;
pub mod validate;

pub use master::{MasterConfig, MASTER_CONFIG_SCHEMA_VERSION};
pub use resolve::{resolve_paths, ConfigPaths, ConfigSource};
pub use safety_net::SafetyNet;
pub use store::{AppConfigRecord, PackagePolicyStore};
pub use validate::{validate_master_config, ValidationError, ValidationResult};
