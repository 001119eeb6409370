//! Configuration and data-directory resolution.
//!
//! Resolution order: CLI argument → environment variable → well-known system
//! paths → built-in default. Mirrors the daemon's installed layout under
//! Magisk/KernelSU (`/data/adb/cerberus`) as well as a conventional Linux
//! install (`/etc/cerberus`) for development and testing off-device.

use std::path::{Path, PathBuf};

/// Where a configuration value was found, kept for diagnostics and
/// `cerberusd check-config` output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ConfigSource {
    CliArgument,
    Environment,
    SystemConfig,
    #[default]
    BuiltinDefault,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::CliArgument => write!(f, "CLI argument"),
            ConfigSource::Environment => write!(f, "environment variable"),
            ConfigSource::SystemConfig => write!(f, "system config"),
            ConfigSource::BuiltinDefault => write!(f, "builtin default"),
        }
    }
}

/// Discovered configuration and data paths.
#[derive(Debug, Clone)]
pub struct ConfigPaths {
    /// Path to the master config JSON file, if one was found.
    pub master_config: Option<PathBuf>,
    pub master_config_source: ConfigSource,
    /// Directory holding the policy database and the event log. Always has
    /// a value: falls back to `data_dir_default()` if nothing else resolves.
    pub data_dir: PathBuf,
    pub data_dir_source: ConfigSource,
}

const ENV_CONFIG_PATH: &str = "CERBERUS_CONFIG";
const ENV_DATA_DIR: &str = "CERBERUS_DATA_DIR";
const CONFIG_FILENAME: &str = "master.json";
const APP_NAME: &str = "cerberus";

/// Primary on-device data directory (Magisk/KernelSU module convention).
fn adb_data_dir() -> PathBuf {
    PathBuf::from("/data/adb").join(APP_NAME)
}

/// Conventional Linux system config directory, used off-device and in CI.
fn system_config_dir() -> PathBuf {
    PathBuf::from("/etc").join(APP_NAME)
}

/// Resolve the master config path and data directory using the standard
/// precedence: CLI → env → well-known system paths → defaults.
pub fn resolve_paths(cli_config: Option<&Path>, cli_data_dir: Option<&Path>) -> ConfigPaths {
    let (master_config, master_config_source) = resolve_config_path(cli_config);
    let (data_dir, data_dir_source) = resolve_data_dir(cli_data_dir);

    ConfigPaths {
        master_config,
        master_config_source,
        data_dir,
        data_dir_source,
    }
}

fn resolve_config_path(cli_config: Option<&Path>) -> (Option<PathBuf>, ConfigSource) {
    if let Some(path) = cli_config {
        if path.exists() {
            return (Some(path.to_path_buf()), ConfigSource::CliArgument);
        }
    }

    if let Ok(env_path) = std::env::var(ENV_CONFIG_PATH) {
        let path = PathBuf::from(env_path);
        if path.exists() {
            return (Some(path), ConfigSource::Environment);
        }
    }

    for candidate_dir in [adb_data_dir(), system_config_dir()] {
        let path = candidate_dir.join(CONFIG_FILENAME);
        if path.exists() {
            return (Some(path), ConfigSource::SystemConfig);
        }
    }

    (None, ConfigSource::BuiltinDefault)
}

fn resolve_data_dir(cli_data_dir: Option<&Path>) -> (PathBuf, ConfigSource) {
    if let Some(path) = cli_data_dir {
        return (path.to_path_buf(), ConfigSource::CliArgument);
    }

    if let Ok(env_dir) = std::env::var(ENV_DATA_DIR) {
        return (PathBuf::from(env_dir), ConfigSource::Environment);
    }

    let adb_dir = adb_data_dir();
    if adb_dir.is_dir() {
        return (adb_dir, ConfigSource::SystemConfig);
    }

    (data_dir_default(), ConfigSource::BuiltinDefault)
}

/// Default data directory when nothing else resolves: the on-device path
/// if `/data/adb` exists, otherwise an XDG data directory for development.
pub fn data_dir_default() -> PathBuf {
    if Path::new("/data/adb").is_dir() {
        adb_data_dir()
    } else {
        dirs::data_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join(APP_NAME)
    }
}
