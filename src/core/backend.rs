//! Persistence backends for JSON state documents.
//!
//! Each document (workflow store, override token, batch lock) is one
//! `StateBackend`. Writers call [`StateBackend::with_lock`] around their
//! load-mutate-save cycle; readers call [`StateBackend::read`] directly.
//! The file backend writes through a temp file and `rename`, so a reader
//! sees either the old or the new document, never a partial one.

use crate::core::error::PhaseGateError;
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use ulid::Ulid;

pub trait StateBackend {
    /// Raw document text, `None` when nothing has been written yet.
    fn read(&self) -> Result<Option<String>, PhaseGateError>;

    /// Replace the whole document.
    fn write(&self, contents: &str) -> Result<(), PhaseGateError>;

    /// Delete the document; absent is fine.
    fn remove(&self) -> Result<(), PhaseGateError>;

    /// Run `f` while holding this document's exclusive writer lock.
    fn with_lock<T, F>(&self, f: F) -> Result<T, PhaseGateError>
    where
        F: FnOnce() -> Result<T, PhaseGateError>;
}

/// A JSON document on disk, locked through a sibling `<name>.lock` file.
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".lock");
        self.path.with_file_name(name)
    }

    fn ensure_parent(&self) -> Result<(), PhaseGateError> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        Ok(())
    }
}

impl StateBackend for FileBackend {
    fn read(&self) -> Result<Option<String>, PhaseGateError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(PhaseGateError::IoError(e)),
        }
    }

    fn write(&self, contents: &str) -> Result<(), PhaseGateError> {
        self.ensure_parent()?;
        let file_name = self
            .path
            .file_name()
            .ok_or_else(|| PhaseGateError::PathError(self.path.display().to_string()))?
            .to_string_lossy()
            .to_string();
        let tmp = self
            .path
            .with_file_name(format!(".{}.{}.tmp", file_name, Ulid::new()));
        fs::write(&tmp, contents)?;
        if let Err(e) = fs::rename(&tmp, &self.path) {
            let _ = fs::remove_file(&tmp);
            return Err(PhaseGateError::IoError(e));
        }
        Ok(())
    }

    fn remove(&self) -> Result<(), PhaseGateError> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PhaseGateError::IoError(e)),
        }
    }

    fn with_lock<T, F>(&self, f: F) -> Result<T, PhaseGateError>
    where
        F: FnOnce() -> Result<T, PhaseGateError>,
    {
        self.ensure_parent()?;
        let lock_file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(self.lock_path())?;
        lock_file.lock_exclusive()?;
        // Lock released when `lock_file` drops.
        f()
    }
}

/// In-memory document for tests. Clones share the same document.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    doc: Arc<Mutex<Option<String>>>,
    writer: Arc<Mutex<()>>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_contents(contents: &str) -> Self {
        let backend = Self::default();
        *backend.doc.lock().unwrap_or_else(|e| e.into_inner()) = Some(contents.to_string());
        backend
    }
}

impl StateBackend for MemoryBackend {
    fn read(&self) -> Result<Option<String>, PhaseGateError> {
        Ok(self.doc.lock().unwrap_or_else(|e| e.into_inner()).clone())
    }

    fn write(&self, contents: &str) -> Result<(), PhaseGateError> {
        *self.doc.lock().unwrap_or_else(|e| e.into_inner()) = Some(contents.to_string());
        Ok(())
    }

    fn remove(&self) -> Result<(), PhaseGateError> {
        *self.doc.lock().unwrap_or_else(|e| e.into_inner()) = None;
        Ok(())
    }

    fn with_lock<T, F>(&self, f: F) -> Result<T, PhaseGateError>
    where
        F: FnOnce() -> Result<T, PhaseGateError>,
    {
        let _guard = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        f()
    }
}
