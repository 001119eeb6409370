//! Battery sampling and drain-rate warnings.
//!
//! Grounded on the original `StateManager::tick_power_state` and
//! `SystemMonitor::get_battery_stats`: capacity/temperature/status read from
//! the kernel's `power_supply` sysfs class, with a capacity-drop-per-hour
//! threshold that fires a warning event.

use std::fs;
use std::path::{Path, PathBuf};

/// A single battery sample.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BatteryStats {
    /// State of charge, 0-100.
    pub capacity: i32,
    /// Degrees Celsius.
    pub temperature_c: f32,
    pub is_charging: bool,
}

fn power_supply_root() -> PathBuf {
    PathBuf::from("/sys/class/power_supply/battery")
}

fn read_trimmed(path: &Path) -> Option<String> {
    fs::read_to_string(path).ok().map(|s| s.trim().to_string())
}

/// Reads the current battery sample. `None` when the platform exposes no
/// `battery` power-supply node (most non-Android machines).
pub fn read_battery_stats() -> Option<BatteryStats> {
    read_battery_stats_from(&power_supply_root())
}

fn read_battery_stats_from(root: &Path) -> Option<BatteryStats> {
    let capacity: i32 = read_trimmed(&root.join("capacity"))?.parse().ok()?;
    let status = read_trimmed(&root.join("status")).unwrap_or_default();
    let is_charging = status.eq_ignore_ascii_case("charging") || status.eq_ignore_ascii_case("full");
    let temp_deci_celsius: f32 = read_trimmed(&root.join("temp")).and_then(|s| s.parse().ok()).unwrap_or(0.0);
    Some(BatteryStats { capacity, temperature_c: temp_deci_celsius / 10.0, is_charging })
}

/// Tracks capacity across successive samples and reports a drain-rate
/// warning when the hourly-extrapolated drop exceeds `warning_pct_per_hour`.
pub struct BatteryMonitor {
    last_capacity: Option<i32>,
    warning_pct_per_hour: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct CapacitySample {
    pub stats: BatteryStats,
    pub drop_pct: Option<i32>,
    pub is_warning: bool,
}

impl BatteryMonitor {
    pub fn new(warning_pct_per_hour: f64) -> Self {
        BatteryMonitor { last_capacity: None, warning_pct_per_hour }
    }

    /// `elapsed_secs` is the time since the previous sample, used to
    /// extrapolate the observed drop to a per-hour rate.
    pub fn sample(&mut self, stats: BatteryStats, elapsed_secs: u64) -> CapacitySample {
        let drop_pct = self.last_capacity.and_then(|prev| if prev > stats.capacity { Some(prev - stats.capacity) } else { None });
        let is_warning = match drop_pct {
            Some(drop) => {
                let minutes = (elapsed_secs / 60).max(1) as f64;
                let rate_per_hour = drop as f64 * 60.0 / minutes;
                rate_per_hour >= self.warning_pct_per_hour
            }
            None => false,
        };
        self.last_capacity = Some(stats.capacity);
        CapacitySample { stats, drop_pct, is_warning }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn reads_fake_power_supply_node() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("capacity"), "42\n").unwrap();
        fs::write(dir.path().join("status"), "Charging\n").unwrap();
        fs::write(dir.path().join("temp"), "305\n").unwrap();

        let stats = read_battery_stats_from(dir.path()).unwrap();
        assert_eq!(stats.capacity, 42);
        assert!(stats.is_charging);
        assert!((stats.temperature_c - 30.5).abs() < 0.01);
    }

    #[test]
    fn missing_capacity_node_yields_none() {
        let dir = tempdir().unwrap();
        assert!(read_battery_stats_from(dir.path()).is_none());
    }

    #[test]
    fn drop_rate_above_threshold_warns() {
        let mut monitor = BatteryMonitor::new(30.0);
        let first = BatteryStats { capacity: 80, temperature_c: 25.0, is_charging: false };
        let second = BatteryStats { capacity: 70, temperature_c: 25.0, is_charging: false };
        monitor.sample(first, 0);
        let sample = monitor.sample(second, 600);
        assert_eq!(sample.drop_pct, Some(10));
        assert!(sample.is_warning);
    }

    #[test]
    fn slow_drop_does_not_warn() {
        let mut monitor = BatteryMonitor::new(30.0);
        let first = BatteryStats { capacity: 80, temperature_c: 25.0, is_charging: false };
        let second = BatteryStats { capacity: 79, temperature_c: 25.0, is_charging: false };
        monitor.sample(first, 0);
        let sample = monitor.sample(second, 3600);
        assert!(!sample.is_warning);
    }

    #[test]
    fn charging_capacity_increase_reports_no_drop() {
        let mut monitor = BatteryMonitor::new(30.0);
        let first = BatteryStats { capacity: 50, temperature_c: 25.0, is_charging: true };
        let second = BatteryStats { capacity: 60, temperature_c: 25.0, is_charging: true };
        monitor.sample(first, 0);
        let sample = monitor.sample(second, 600);
        assert_eq!(sample.drop_pct, None);
        assert!(!sample.is_warning);
    }
}
