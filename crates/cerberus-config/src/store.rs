//! Persisted per-package policy, backed by a single SQLite database.
//!
//! Grounded on the original daemon's `DatabaseManager::get_app_config`/
//! `set_app_config`/`get_all_app_configs` (`database_manager.h`): one row per
//! package, storing the assigned [`AppPolicy`] plus the force-exempt flags
//! and cumulative background runtime used for the dashboard's per-app
//! history view.

use cerberus_common::policy::AppPolicy;
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;

use crate::validate::ValidationError;

/// A package's stored configuration row.
#[derive(Debug, Clone, PartialEq)]
pub struct AppConfigRecord {
    pub package_name: String,
    pub policy: AppPolicy,
    pub force_playback_exempt: bool,
    pub force_network_exempt: bool,
    pub cumulative_runtime_seconds: i64,
}

impl AppConfigRecord {
    pub fn new(package_name: impl Into<String>) -> Self {
        AppConfigRecord {
            package_name: package_name.into(),
            policy: AppPolicy::default(),
            force_playback_exempt: false,
            force_network_exempt: false,
            cumulative_runtime_seconds: 0,
        }
    }
}

/// SQLite-backed store for per-package policy. Internally single-writer via
/// a mutex around the connection, matching the original's `db_mutex_`
/// guarding every `DatabaseManager` method.
pub struct PackagePolicyStore {
    conn: Mutex<Connection>,
}

impl PackagePolicyStore {
    pub fn open(db_path: &Path) -> Result<Self, ValidationError> {
        let conn = Connection::open(db_path)
            .map_err(|e| ValidationError::Io(format!("opening {}: {}", db_path.display(), e)))?;
        let store = PackagePolicyStore { conn: Mutex::new(conn) };
        store.initialize()?;
        Ok(store)
    }

    /// In-memory store for tests.
    pub fn open_in_memory() -> Result<Self, ValidationError> {
        let conn = Connection::open_in_memory()
            .map_err(|e| ValidationError::Io(format!("opening in-memory db: {}", e)))?;
        let store = PackagePolicyStore { conn: Mutex::new(conn) };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<(), ValidationError> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS app_config (
                package_name TEXT PRIMARY KEY,
                policy INTEGER NOT NULL DEFAULT 2,
                force_playback_exempt INTEGER NOT NULL DEFAULT 0,
                force_network_exempt INTEGER NOT NULL DEFAULT 0,
                cumulative_runtime_seconds INTEGER NOT NULL DEFAULT 0
            );",
        )
        .map_err(|e| ValidationError::Io(format!("creating app_config table: {}", e)))?;
        Ok(())
    }

    pub fn get_app_config(&self, package_name: &str) -> Result<Option<AppConfigRecord>, ValidationError> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT package_name, policy, force_playback_exempt, force_network_exempt, cumulative_runtime_seconds
             FROM app_config WHERE package_name = ?1",
            params![package_name],
            row_to_record,
        )
        .optional()
        .map_err(|e| ValidationError::Io(format!("reading app_config for {}: {}", package_name, e)))
    }

    pub fn set_app_config(&self, record: &AppConfigRecord) -> Result<(), ValidationError> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO app_config (package_name, policy, force_playback_exempt, force_network_exempt, cumulative_runtime_seconds)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(package_name) DO UPDATE SET
                policy = excluded.policy,
                force_playback_exempt = excluded.force_playback_exempt,
                force_network_exempt = excluded.force_network_exempt,
                cumulative_runtime_seconds = excluded.cumulative_runtime_seconds",
            params![
                record.package_name,
                record.policy.as_i32(),
                record.force_playback_exempt,
                record.force_network_exempt,
                record.cumulative_runtime_seconds,
            ],
        )
        .map_err(|e| ValidationError::Io(format!("writing app_config for {}: {}", record.package_name, e)))?;
        Ok(())
    }

    pub fn update_app_runtime(&self, package_name: &str, session_seconds: i64) -> Result<(), ValidationError> {
        let conn = self.conn.lock().unwrap();
        let updated = conn
            .execute(
                "UPDATE app_config SET cumulative_runtime_seconds = cumulative_runtime_seconds + ?1
                 WHERE package_name = ?2",
                params![session_seconds, package_name],
            )
            .map_err(|e| ValidationError::Io(format!("updating runtime for {}: {}", package_name, e)))?;

        if updated == 0 {
            let mut record = AppConfigRecord::new(package_name);
            record.cumulative_runtime_seconds = session_seconds;
            drop(conn);
            self.set_app_config(&record)?;
        }
        Ok(())
    }

    pub fn get_all_app_configs(&self) -> Result<Vec<AppConfigRecord>, ValidationError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT package_name, policy, force_playback_exempt, force_network_exempt, cumulative_runtime_seconds
                 FROM app_config ORDER BY package_name",
            )
            .map_err(|e| ValidationError::Io(format!("preparing app_config scan: {}", e)))?;

        let rows = stmt
            .query_map([], row_to_record)
            .map_err(|e| ValidationError::Io(format!("scanning app_config: {}", e)))?;

        rows.collect::<Result<Vec<_>, _>>()
            .map_err(|e| ValidationError::Io(format!("reading app_config row: {}", e)))
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AppConfigRecord> {
    let policy_ordinal: i32 = row.get(1)?;
    Ok(AppConfigRecord {
        package_name: row.get(0)?,
        policy: AppPolicy::from_i32(policy_ordinal).unwrap_or_default(),
        force_playback_exempt: row.get(2)?,
        force_network_exempt: row.get(3)?,
        cumulative_runtime_seconds: row.get(4)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_package_returns_none() {
        let store = PackagePolicyStore::open_in_memory().unwrap();
        assert_eq!(store.get_app_config("com.example.app").unwrap(), None);
    }

    #[test]
    fn set_then_get_roundtrips() {
        let store = PackagePolicyStore::open_in_memory().unwrap();
        let mut record = AppConfigRecord::new("com.example.app");
        record.policy = AppPolicy::Strict;
        record.force_playback_exempt = true;
        store.set_app_config(&record).unwrap();

        let fetched = store.get_app_config("com.example.app").unwrap().unwrap();
        assert_eq!(fetched, record);
    }

    #[test]
    fn set_app_config_upserts() {
        let store = PackagePolicyStore::open_in_memory().unwrap();
        let mut record = AppConfigRecord::new("com.example.app");
        store.set_app_config(&record).unwrap();

        record.policy = AppPolicy::Exempted;
        store.set_app_config(&record).unwrap();

        let fetched = store.get_app_config("com.example.app").unwrap().unwrap();
        assert_eq!(fetched.policy, AppPolicy::Exempted);
    }

    #[test]
    fn update_app_runtime_accumulates() {
        let store = PackagePolicyStore::open_in_memory().unwrap();
        store.set_app_config(&AppConfigRecord::new("com.example.app")).unwrap();
        store.update_app_runtime("com.example.app", 30).unwrap();
        store.update_app_runtime("com.example.app", 15).unwrap();

        let fetched = store.get_app_config("com.example.app").unwrap().unwrap();
        assert_eq!(fetched.cumulative_runtime_seconds, 45);
    }

    #[test]
    fn update_app_runtime_creates_row_if_missing() {
        let store = PackagePolicyStore::open_in_memory().unwrap();
        store.update_app_runtime("com.example.new", 10).unwrap();
        let fetched = store.get_app_config("com.example.new").unwrap().unwrap();
        assert_eq!(fetched.cumulative_runtime_seconds, 10);
    }

    #[test]
    fn get_all_app_configs_is_sorted_by_package_name() {
        let store = PackagePolicyStore::open_in_memory().unwrap();
        store.set_app_config(&AppConfigRecord::new("com.b.app")).unwrap();
        store.set_app_config(&AppConfigRecord::new("com.a.app")).unwrap();

        let all = store.get_all_app_configs().unwrap();
        let names: Vec<_> = all.iter().map(|r| r.package_name.as_str()).collect();
        assert_eq!(names, vec!["com.a.app", "com.b.app"]);
    }
}
