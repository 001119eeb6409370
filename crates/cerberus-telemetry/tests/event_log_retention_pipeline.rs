//! End-to-end check: writer rotation plus retention enforcement against a
//! real directory of JSONL files (no mocked filesystem).

use cerberus_telemetry::{
    enforce_retention, event::DaemonEventType, DaemonEvent, EventLogWriter, RetentionPolicy,
};
use std::fs;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

#[test]
fn writer_then_retention_enforcement_prunes_old_days() {
    let dir = tempdir().unwrap();
    let log_dir = dir.path().join("logs");

    let mut writer = EventLogWriter::new(log_dir.clone());
    writer
        .write(&DaemonEvent::new(DaemonEventType::DaemonStart, "daemon starting"))
        .unwrap();
    writer
        .write(&DaemonEvent::new(DaemonEventType::AppFrozen, "froze app").with_instance("com.example.app", 0))
        .unwrap();

    let today_file = writer.path_for_today();
    assert!(today_file.exists());

    // Fabricate an old log file as if it rotated weeks ago.
    let old_file = log_dir.join("cerberus-2020-01-01.jsonl");
    fs::write(&old_file, "{}\n").unwrap();
    let old_mtime = SystemTime::now() - Duration::from_secs(90 * 86400);
    filetime::set_file_mtime(&old_file, filetime::FileTime::from_system_time(old_mtime)).unwrap();

    let policy = RetentionPolicy::new(30, u64::MAX);
    let pruned = enforce_retention(&log_dir, &policy, false).unwrap();

    assert_eq!(pruned.len(), 1);
    assert_eq!(pruned[0].path, old_file);
    assert!(!old_file.exists(), "old file should be deleted");
    assert!(today_file.exists(), "today's log should survive retention");
}
