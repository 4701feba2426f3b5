//! Test-evidence validation.
//!
//! Checks run in a fixed order and stop at the first failure: type, file
//! presence, extension, size, description quality, age. File access goes
//! through [`EvidenceProbe`] so the rules can be exercised without a disk.

use crate::core::config::ArtifactSettings;
use crate::core::error::PhaseGateError;
use crate::core::store::Artifact;
use crate::core::time;
use sha2::{Digest, Sha256};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ArtifactType {
    Screenshot,
    Email,
    ApiResponse,
    Log,
    File,
    TestOutput,
    UiTestOutput,
    Video,
    Audio,
}

impl ArtifactType {
    pub const ALL: [ArtifactType; 9] = [
        ArtifactType::Screenshot,
        ArtifactType::Email,
        ArtifactType::ApiResponse,
        ArtifactType::Log,
        ArtifactType::File,
        ArtifactType::TestOutput,
        ArtifactType::UiTestOutput,
        ArtifactType::Video,
        ArtifactType::Audio,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ArtifactType::Screenshot => "screenshot",
            ArtifactType::Email => "email",
            ArtifactType::ApiResponse => "api_response",
            ArtifactType::Log => "log",
            ArtifactType::File => "file",
            ArtifactType::TestOutput => "test_output",
            ArtifactType::UiTestOutput => "ui_test_output",
            ArtifactType::Video => "video",
            ArtifactType::Audio => "audio",
        }
    }

    pub fn parse(raw: &str) -> Result<ArtifactType, PhaseGateError> {
        ArtifactType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == raw)
            .ok_or_else(|| {
                PhaseGateError::ValidationError(format!(
                    "unknown artifact type '{}' (expected one of: {})",
                    raw,
                    ArtifactType::ALL.map(|t| t.as_str()).join(", ")
                ))
            })
    }

    /// Evidence from a unit/API level test run.
    pub fn is_unit(self) -> bool {
        matches!(
            self,
            ArtifactType::TestOutput | ArtifactType::Log | ArtifactType::ApiResponse
        )
    }

    /// Evidence from a UI test run.
    pub fn is_ui(self) -> bool {
        matches!(
            self,
            ArtifactType::UiTestOutput | ArtifactType::Screenshot | ArtifactType::Video
        )
    }
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Read-only view of the evidence files.
pub trait EvidenceProbe {
    /// Size in bytes of a regular file, `None` when it does not exist.
    fn file_size(&self, path: &Path) -> Option<u64>;
}

impl<T: EvidenceProbe + ?Sized> EvidenceProbe for &T {
    fn file_size(&self, path: &Path) -> Option<u64> {
        (**self).file_size(path)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FsProbe;

impl EvidenceProbe for FsProbe {
    fn file_size(&self, path: &Path) -> Option<u64> {
        fs::metadata(path)
            .ok()
            .filter(|m| m.is_file())
            .map(|m| m.len())
    }
}

/// Why a piece of evidence was rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactIssue {
    UnknownType(String),
    MissingPath,
    FileNotFound(String),
    BadExtension {
        artifact_type: String,
        extension: String,
        allowed: Vec<String>,
    },
    TooSmall {
        artifact_type: String,
        size: u64,
        min: u64,
    },
    DescriptionTooShort {
        chars: usize,
        min: usize,
    },
    PlaceholderDescription(String),
    Stale {
        age_hours: i64,
        max_hours: u64,
    },
}

impl fmt::Display for ArtifactIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArtifactIssue::UnknownType(t) => write!(f, "unknown artifact type '{}'", t),
            ArtifactIssue::MissingPath => write!(f, "artifact has no path"),
            ArtifactIssue::FileNotFound(p) => write!(f, "file not found: {}", p),
            ArtifactIssue::BadExtension {
                artifact_type,
                extension,
                allowed,
            } => write!(
                f,
                "extension '.{}' not allowed for {} (allowed: {})",
                extension,
                artifact_type,
                allowed.join(", ")
            ),
            ArtifactIssue::TooSmall {
                artifact_type,
                size,
                min,
            } => write!(
                f,
                "file too small for {}: {} bytes (minimum {})",
                artifact_type, size, min
            ),
            ArtifactIssue::DescriptionTooShort { chars, min } => write!(
                f,
                "description too short: {} chars (minimum {})",
                chars, min
            ),
            ArtifactIssue::PlaceholderDescription(p) => {
                write!(f, "description contains placeholder '{}'", p)
            }
            ArtifactIssue::Stale {
                age_hours,
                max_hours,
            } => write!(
                f,
                "artifact is {}h old (maximum {}h)",
                age_hours, max_hours
            ),
        }
    }
}

pub struct ArtifactValidator<'a, P: EvidenceProbe> {
    settings: &'a ArtifactSettings,
    root: &'a Path,
    probe: P,
    now: i64,
}

impl<'a> ArtifactValidator<'a, FsProbe> {
    pub fn on_disk(settings: &'a ArtifactSettings, root: &'a Path) -> Self {
        Self::new(settings, root, FsProbe, time::now_secs())
    }
}

impl<'a, P: EvidenceProbe> ArtifactValidator<'a, P> {
    pub fn new(settings: &'a ArtifactSettings, root: &'a Path, probe: P, now: i64) -> Self {
        Self {
            settings,
            root,
            probe,
            now,
        }
    }

    pub fn validate(&self, artifact: &Artifact) -> Result<(), ArtifactIssue> {
        let artifact_type = ArtifactType::parse(&artifact.artifact_type)
            .map_err(|_| ArtifactIssue::UnknownType(artifact.artifact_type.clone()))?;
        let rule = self
            .settings
            .rule_for(artifact_type.as_str())
            .ok_or_else(|| ArtifactIssue::UnknownType(artifact.artifact_type.clone()))?;

        if artifact.path.trim().is_empty() {
            return Err(ArtifactIssue::MissingPath);
        }
        let full = resolve_path(self.root, &artifact.path);
        let size = self
            .probe
            .file_size(&full)
            .ok_or_else(|| ArtifactIssue::FileNotFound(artifact.path.clone()))?;

        if !rule.extensions.iter().any(|e| e == "*") {
            let extension = full
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default();
            if !rule.extensions.iter().any(|e| e.eq_ignore_ascii_case(&extension)) {
                return Err(ArtifactIssue::BadExtension {
                    artifact_type: artifact_type.to_string(),
                    extension,
                    allowed: rule.extensions.clone(),
                });
            }
        }

        if size < rule.min_bytes {
            return Err(ArtifactIssue::TooSmall {
                artifact_type: artifact_type.to_string(),
                size,
                min: rule.min_bytes,
            });
        }

        let chars = artifact.description.chars().count();
        if chars < self.settings.min_description_chars {
            return Err(ArtifactIssue::DescriptionTooShort {
                chars,
                min: self.settings.min_description_chars,
            });
        }
        let lowered = artifact.description.to_lowercase();
        if let Some(p) = self
            .settings
            .placeholder_phrases
            .iter()
            .find(|p| lowered.contains(&p.to_lowercase()))
        {
            return Err(ArtifactIssue::PlaceholderDescription(p.clone()));
        }

        if let Some(created) = artifact.created.as_deref().and_then(time::parse_ts) {
            let age_secs = self.now - created;
            let max_secs = self.settings.max_age_hours as i64 * 3600;
            if age_secs > max_secs {
                return Err(ArtifactIssue::Stale {
                    age_hours: age_secs / 3600,
                    max_hours: self.settings.max_age_hours,
                });
            }
        }
        Ok(())
    }

    /// The description names an actual failure, not just a test run.
    pub fn shows_failure(&self, artifact: &Artifact) -> bool {
        let lowered = artifact.description.to_lowercase();
        self.settings
            .failure_keywords
            .iter()
            .any(|k| lowered.contains(&k.to_lowercase()))
    }
}

fn resolve_path(root: &Path, path: &str) -> PathBuf {
    let p = Path::new(path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        root.join(p)
    }
}

/// Hex sha256 of the artifact file, `None` if unreadable.
pub fn digest_file(root: &Path, path: &str) -> Option<String> {
    if path.trim().is_empty() {
        return None;
    }
    let bytes = fs::read(resolve_path(root, path)).ok()?;
    let mut hasher = Sha256::new();
    hasher.update(&bytes);
    Some(format!("{:x}", hasher.finalize()))
}
