//! Append-only JSONL event log with day-based rotation.
//!
//! Grounded on the original daemon's `Logger`: `ensure_log_file()` opens a
//! new file whenever the wall-clock day changes (tracked via `current_day_`),
//! and every record is appended as a single JSON line. This crate drops the
//! original's in-process queue + writer thread (the caller already serializes
//! writes through a single `EventLogWriter`) and the teacher's Arrow/Parquet
//! machinery (`pt-telemetry`'s `BatchedWriter`) — overkill for an append-only
//! audit trail of daemon events.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, Utc};
use thiserror::Error;

use crate::event::DaemonEvent;

#[derive(Error, Debug)]
pub enum WriteError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Appends [`DaemonEvent`]s to `<dir>/cerberus-YYYY-MM-DD.jsonl`, opening a
/// new file whenever the date rolls over.
pub struct EventLogWriter {
    dir: PathBuf,
    current_day: Option<NaiveDate>,
    file: Option<File>,
}

impl EventLogWriter {
    pub fn new(dir: PathBuf) -> Self {
        EventLogWriter {
            dir,
            current_day: None,
            file: None,
        }
    }

    pub fn write(&mut self, event: &DaemonEvent) -> Result<(), WriteError> {
        self.ensure_log_file(event.timestamp.date_naive())?;
        let file = self.file.as_mut().expect("ensure_log_file sets file");
        serde_json::to_writer(&mut *file, event)?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    fn ensure_log_file(&mut self, day: NaiveDate) -> Result<(), WriteError> {
        if self.current_day == Some(day) && self.file.is_some() {
            return Ok(());
        }

        fs::create_dir_all(&self.dir)?;
        let path = self.path_for_day(day);
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        self.file = Some(file);
        self.current_day = Some(day);
        Ok(())
    }

    fn path_for_day(&self, day: NaiveDate) -> PathBuf {
        self.dir.join(format!("cerberus-{}.jsonl", day.format("%Y-%m-%d")))
    }

    /// Path of the file that `today`'s events are (or would be) written to.
    pub fn path_for_today(&self) -> PathBuf {
        self.path_for_day(Utc::now().date_naive())
    }
}

/// Read every event recorded in a single day's log file, oldest first.
pub fn read_log_file(path: &Path) -> Result<Vec<DaemonEvent>, WriteError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(WriteError::from))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::DaemonEventType;
    use tempfile::TempDir;

    #[test]
    fn write_then_read_roundtrips() {
        let dir = TempDir::new().unwrap();
        let mut writer = EventLogWriter::new(dir.path().to_path_buf());

        let event = DaemonEvent::new(DaemonEventType::DaemonStart, "starting up");
        writer.write(&event).unwrap();

        let events = read_log_file(&writer.path_for_today()).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].message, "starting up");
    }

    #[test]
    fn missing_log_file_reads_as_empty() {
        let dir = TempDir::new().unwrap();
        let events = read_log_file(&dir.path().join("cerberus-2020-01-01.jsonl")).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn multiple_writes_append_to_same_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = EventLogWriter::new(dir.path().to_path_buf());

        writer
            .write(&DaemonEvent::new(DaemonEventType::AppForeground, "a"))
            .unwrap();
        writer
            .write(&DaemonEvent::new(DaemonEventType::AppBackground, "b"))
            .unwrap();

        let events = read_log_file(&writer.path_for_today()).unwrap();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn writing_on_a_different_day_opens_a_new_file() {
        let dir = TempDir::new().unwrap();
        let mut writer = EventLogWriter::new(dir.path().to_path_buf());

        let mut yesterday = DaemonEvent::new(DaemonEventType::DaemonStart, "yesterday");
        yesterday.timestamp = Utc::now() - chrono::Duration::days(1);
        writer.write(&yesterday).unwrap();

        let mut today = DaemonEvent::new(DaemonEventType::DaemonStart, "today");
        today.timestamp = Utc::now();
        writer.write(&today).unwrap();

        let today_events = read_log_file(&writer.path_for_today()).unwrap();
        assert_eq!(today_events.len(), 1);
        assert_eq!(today_events[0].message, "today");
    }
}
