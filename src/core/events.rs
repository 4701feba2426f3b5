//! Append-only JSONL audit log of hook decisions.
//!
//! One line per decision at `<state_dir>/phasegate.events.jsonl`. Allows are
//! logged too, so the log reads as a complete trace of what the agent tried.

use crate::core::config::Config;
use crate::core::error::PhaseGateError;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AuditEvent {
    pub ts: String,
    pub event_id: String,
    pub hook: String,
    pub tool: Option<String>,
    pub target: Option<String>,
    pub decision: String,
    pub reason: Option<String>,
}

impl AuditEvent {
    pub fn new(hook: &str, decision: &str) -> Self {
        Self {
            ts: time::now_epoch_z(),
            event_id: time::new_event_id(),
            hook: hook.to_string(),
            tool: None,
            target: None,
            decision: decision.to_string(),
            reason: None,
        }
    }

    pub fn tool(mut self, tool: Option<&str>) -> Self {
        self.tool = tool.map(str::to_string);
        self
    }

    pub fn target(mut self, target: Option<&str>) -> Self {
        self.target = target.map(str::to_string);
        self
    }

    pub fn reason(mut self, reason: Option<&str>) -> Self {
        self.reason = reason.map(str::to_string);
        self
    }
}

pub struct EventLog {
    path: PathBuf,
    enabled: bool,
}

impl EventLog {
    pub fn new(path: impl Into<PathBuf>, enabled: bool) -> Self {
        Self {
            path: path.into(),
            enabled,
        }
    }

    pub fn for_config(config: &Config) -> Self {
        Self::new(config.events_path(), config.settings.logging.audit)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, event: &AuditEvent) -> Result<(), PhaseGateError> {
        if !self.enabled {
            return Ok(());
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut f = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(f, "{}", serde_json::to_string(event)?)?;
        Ok(())
    }

    /// All parseable events, oldest first. Broken lines are skipped.
    pub fn read_all(&self) -> Result<Vec<AuditEvent>, PhaseGateError> {
        let text = match fs::read_to_string(&self.path) {
            Ok(t) => t,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PhaseGateError::IoError(e)),
        };
        Ok(text
            .lines()
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_appends_one_line_per_event() {
        let tmp = tempdir().unwrap();
        let log = EventLog::new(tmp.path().join("state/events.jsonl"), true);
        log.append(
            &AuditEvent::new("gate", "block")
                .tool(Some("Edit"))
                .target(Some("src/app.py"))
                .reason(Some("workflow_not_started")),
        )
        .unwrap();
        log.append(&AuditEvent::new("gate", "allow")).unwrap();
        let events = log.read_all().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].decision, "block");
        assert_eq!(events[0].target.as_deref(), Some("src/app.py"));
        assert_ne!(events[0].event_id, events[1].event_id);
    }

    #[test]
    fn test_disabled_log_writes_nothing() {
        let tmp = tempdir().unwrap();
        let log = EventLog::new(tmp.path().join("events.jsonl"), false);
        log.append(&AuditEvent::new("gate", "allow")).unwrap();
        assert!(!log.path().exists());
        assert!(log.read_all().unwrap().is_empty());
    }
}
