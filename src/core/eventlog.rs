//! Append-only JSONL log of a run, kept next to the audit files.

use crate::core::types::Status;
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::{Path, PathBuf};

/// One entry of the run log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum RunEvent {
    RunStarted {
        run_id: String,
        manifest_digest: String,
        resources: usize,
    },
    ResourceResolved {
        resource: String,
        status: Status,
        actions: usize,
    },
    ActionExecuted {
        resource: String,
        action: String,
        duration_seconds: f64,
    },
    RunCompleted {
        run_id: String,
        resources_executed: usize,
        total_seconds: f64,
    },
}

/// Timestamped event wrapper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimestampedEvent {
    pub ts: String,
    #[serde(flatten)]
    pub event: RunEvent,
}

/// RFC 3339 UTC timestamp.
pub fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

/// Generate a run ID.
pub fn generate_run_id() -> String {
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default() as u64;
    format!("r-{:012x}", nanos & 0xFFFF_FFFF_FFFF)
}

/// Event log location inside a work directory.
pub fn event_log_path(work_dir: &Path) -> PathBuf {
    work_dir.join("events.jsonl")
}

/// Appends events to `<work_dir>/events.jsonl`.
#[derive(Debug, Clone)]
pub struct EventLog {
    path: PathBuf,
}

impl EventLog {
    pub fn new(work_dir: &Path) -> Self {
        Self {
            path: event_log_path(work_dir),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: RunEvent) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let te = TimestampedEvent {
            ts: now_rfc3339(),
            event,
        };
        let json = serde_json::to_string(&te).map_err(std::io::Error::other)?;
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", json)?;
        Ok(())
    }

    /// Read every event back, skipping lines that do not parse.
    pub fn read(&self) -> Result<Vec<TimestampedEvent>> {
        let content = match std::fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(content
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_now_rfc3339() {
        let ts = now_rfc3339();
        assert!(ts.starts_with("20"));
        assert!(ts.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(&ts).is_ok());
    }

    #[test]
    fn test_generate_run_id() {
        let id = generate_run_id();
        assert!(id.starts_with("r-"));
        assert_eq!(id.len(), 14);
    }

    #[test]
    fn test_append_and_read() {
        let dir = tempfile::tempdir().unwrap();
        let log = EventLog::new(dir.path());
        log.append(RunEvent::RunStarted {
            run_id: "r-abc".into(),
            manifest_digest: "blake3:00".into(),
            resources: 2,
        })
        .unwrap();
        log.append(RunEvent::ResourceResolved {
            resource: "net".into(),
            status: Status::Missing,
            actions: 1,
        })
        .unwrap();

        let raw = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
        assert_eq!(raw.lines().count(), 2);
        assert!(raw.contains("\"event\":\"run_started\""));
        assert!(raw.contains("\"status\":\"MISSING\""));

        let events = log.read().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(
            events[1].event,
            RunEvent::ResourceResolved {
                resource: "net".into(),
                status: Status::Missing,
                actions: 1,
            }
        );
    }

    #[test]
    fn test_read_missing_log() {
        let dir = tempfile::tempdir().unwrap();
        assert!(EventLog::new(&dir.path().join("none")).read().unwrap().is_empty());
    }
}
