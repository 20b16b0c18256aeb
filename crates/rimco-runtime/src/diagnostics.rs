//! Component health aggregation from the diagnostics channel.

use std::collections::BTreeMap;
use std::path::PathBuf;

use rimco_memory::{LogRecord, RotatingLogWriter, SessionStamp};
use rimco_types::{DiagnosticStatus, MonitoringEntry, ViewerEvent};
use tracing::{debug, warn};

/// Latest severity per component plus an hourly-bucketed status log.
pub struct DiagnosticsMonitor {
    latest: BTreeMap<String, MonitoringEntry>,
    writer: RotatingLogWriter,
}

impl DiagnosticsMonitor {
    /// Statuses are logged to `monitoring-<YYYY-MM-DD-HH>-<index>.jsonl`
    /// under `log_dir`.
    pub fn new(log_dir: impl Into<PathBuf>, max_log_bytes: u64) -> Self {
        Self {
            latest: BTreeMap::new(),
            writer: RotatingLogWriter::new(log_dir, "monitoring", None, SessionStamp::HourBucket, max_log_bytes),
        }
    }

    /// Record `status` received at `stamp` and return the envelope to
    /// broadcast.  A failed log write is logged and otherwise ignored.
    pub async fn observe(&mut self, status: &DiagnosticStatus, stamp: i64) -> ViewerEvent {
        self.latest.insert(
            status.name.clone(),
            MonitoringEntry {
                level: status.level,
                stamp,
            },
        );
        debug!(component = %status.name, level = status.level, "diagnostic status");

        let record = LogRecord {
            stamp,
            payload: status,
        };
        if let Err(e) = self.writer.append(&record).await {
            warn!(error = %e, "monitoring log write failed");
        }

        ViewerEvent::Monitoring {
            name: status.name.clone(),
            level: status.level,
            stamp,
        }
    }

    pub fn get(&self, name: &str) -> Option<&MonitoringEntry> {
        self.latest.get(name)
    }

    pub fn snapshot(&self) -> BTreeMap<String, MonitoringEntry> {
        self.latest.clone()
    }

    pub async fn flush(&mut self) {
        if let Err(e) = self.writer.flush().await {
            warn!(error = %e, "monitoring log flush failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(name: &str, level: u8) -> DiagnosticStatus {
        DiagnosticStatus {
            name: name.into(),
            level,
            message: "ok".into(),
            hardware_id: String::new(),
            values: Vec::new(),
        }
    }

    #[tokio::test]
    async fn latest_level_wins_per_component() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = DiagnosticsMonitor::new(dir.path(), 5 * 1_048_576);

        monitor.observe(&status("gnss", 0), 1).await;
        monitor.observe(&status("lidar", 1), 2).await;
        let event = monitor.observe(&status("gnss", 2), 3).await;

        assert_eq!(
            event,
            ViewerEvent::Monitoring { name: "gnss".into(), level: 2, stamp: 3 }
        );
        assert_eq!(monitor.get("gnss"), Some(&MonitoringEntry { level: 2, stamp: 3 }));
        assert_eq!(monitor.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn every_status_is_logged() {
        let dir = tempfile::tempdir().unwrap();
        let mut monitor = DiagnosticsMonitor::new(dir.path(), 5 * 1_048_576);
        monitor.observe(&status("gnss", 0), 10).await;
        monitor.observe(&status("gnss", 1), 11).await;
        monitor.flush().await;

        let files: Vec<_> = std::fs::read_dir(dir.path()).unwrap().map(|e| e.unwrap().path()).collect();
        assert_eq!(files.len(), 1);
        let content = std::fs::read_to_string(&files[0]).unwrap();
        let lines: Vec<serde_json::Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["name"], "gnss");
        assert_eq!(lines[1]["level"], 1);
        assert_eq!(lines[1]["stamp"], 11);
    }
}
