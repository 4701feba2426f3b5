//! Batch validation lock.
//!
//! A burst of edits to protected paths is grouped into one lock. While
//! edits keep arriving inside the window the batch grows; once the window
//! has lapsed every further protected edit is blocked until a human drops
//! the approval marker (by hand or through the prompt hook). The marker
//! clears the lock and the next edit opens a fresh batch.

use crate::core::backend::{FileBackend, StateBackend};
use crate::core::config::{BatchSettings, Config};
use crate::core::error::PhaseGateError;
use crate::core::resolver;
use crate::core::time;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchLock {
    pub files: Vec<String>,
    pub first_change: String,
    pub last_change: String,
    #[serde(default)]
    pub user_approved: bool,
    #[serde(default = "default_requires_validation")]
    pub requires_validation: bool,
}

fn default_requires_validation() -> bool {
    true
}

impl BatchLock {
    fn open(file: &str, now: &str) -> Self {
        Self {
            files: vec![file.to_string()],
            first_change: now.to_string(),
            last_change: now.to_string(),
            user_approved: false,
            requires_validation: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BatchDecision {
    /// Path is exempt or not protected.
    Untracked,
    /// No lock existed; this edit opened one.
    Started,
    /// An approval marker closed the previous batch; this edit opened a new one.
    Restarted { approved_files: Vec<String> },
    Accumulated { files: usize },
    /// Window lapsed without approval.
    Expired { files: Vec<String> },
}

impl BatchDecision {
    pub fn is_allowed(&self) -> bool {
        !matches!(self, BatchDecision::Expired { .. })
    }
}

/// Lock document plus approval marker. Both are backends so tests can keep
/// them in memory.
pub struct BatchTracker<B: StateBackend> {
    lock: B,
    marker: B,
    window_secs: i64,
    protected: Vec<Regex>,
    exempt: Vec<Regex>,
    /// Paths are matched and recorded relative to this.
    root: PathBuf,
}

impl BatchTracker<FileBackend> {
    pub fn open(config: &Config) -> Result<Self, PhaseGateError> {
        Self::new(
            FileBackend::new(config.lock_path()),
            FileBackend::new(config.marker_path()),
            &config.settings.batch,
        )
        .map(|tracker| tracker.with_root(&config.root))
    }
}

impl<B: StateBackend> BatchTracker<B> {
    pub fn new(lock: B, marker: B, settings: &BatchSettings) -> Result<Self, PhaseGateError> {
        let compile = |patterns: &[String]| -> Result<Vec<Regex>, PhaseGateError> {
            patterns
                .iter()
                .map(|p| Regex::new(p).map_err(PhaseGateError::from))
                .collect()
        };
        Ok(Self {
            lock,
            marker,
            window_secs: settings.window_minutes as i64 * 60,
            protected: compile(&settings.protected_paths)?,
            exempt: compile(&settings.exempt_paths)?,
            root: PathBuf::new(),
        })
    }

    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = root.into();
        self
    }

    /// Exempt patterns win over protected ones.
    pub fn tracks(&self, path: &str) -> bool {
        let path = resolver::normalize(&self.root, path);
        if self.exempt.iter().any(|re| re.is_match(&path)) {
            return false;
        }
        self.protected.iter().any(|re| re.is_match(&path))
    }

    /// Current lock; an unreadable document counts as none.
    pub fn current(&self) -> Result<Option<BatchLock>, PhaseGateError> {
        Ok(self
            .lock
            .read()?
            .and_then(|text| serde_json::from_str(&text).ok()))
    }

    pub fn approved(&self) -> Result<bool, PhaseGateError> {
        Ok(self.marker.read()?.is_some())
    }

    fn write_lock(&self, lock: &BatchLock) -> Result<(), PhaseGateError> {
        self.lock.write(&serde_json::to_string_pretty(lock)?)
    }

    pub fn record_change(&self, path: &str, now: i64) -> Result<BatchDecision, PhaseGateError> {
        if !self.tracks(path) {
            return Ok(BatchDecision::Untracked);
        }
        let path = resolver::normalize(&self.root, path);
        let path = path.as_str();
        let stamp = time::format_epoch_z(now);
        self.lock.with_lock(|| {
            let Some(mut lock) = self.current()? else {
                self.marker.remove()?;
                self.write_lock(&BatchLock::open(path, &stamp))?;
                return Ok(BatchDecision::Started);
            };
            if self.approved()? {
                self.marker.remove()?;
                self.lock.remove()?;
                self.write_lock(&BatchLock::open(path, &stamp))?;
                return Ok(BatchDecision::Restarted {
                    approved_files: lock.files,
                });
            }
            let within = time::parse_ts(&lock.last_change)
                .map(|last| now - last < self.window_secs)
                .unwrap_or(false);
            if !within {
                return Ok(BatchDecision::Expired { files: lock.files });
            }
            if !lock.files.iter().any(|f| f == path) {
                lock.files.push(path.to_string());
            }
            lock.last_change = stamp.clone();
            self.write_lock(&lock)?;
            Ok(BatchDecision::Accumulated {
                files: lock.files.len(),
            })
        })
    }

    /// Human approval from chat. Only meaningful while a batch is pending.
    pub fn approve(&self) -> Result<bool, PhaseGateError> {
        self.lock.with_lock(|| {
            if self.lock.read()?.is_none() {
                return Ok(false);
            }
            self.marker.write("")?;
            Ok(true)
        })
    }

    /// Drop both lock and marker.
    pub fn clear(&self) -> Result<(), PhaseGateError> {
        self.lock.with_lock(|| {
            self.lock.remove()?;
            self.marker.remove()
        })
    }
}
