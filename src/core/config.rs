//! Layered configuration: built-in defaults, project file, local override.
//!
//! Both files are TOML. The project file is `phasegate.toml` (or
//! `.claude/phasegate.toml`), the local override `phasegate.local.toml` (or
//! `.claude/phasegate.local.toml`). Tables are deep-merged before
//! deserialization, so a local file only needs the keys it changes.

use crate::core::classify::{self, ClassRule};
use crate::core::error::PhaseGateError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const ROOT_ENV: &str = "PHASEGATE_PROJECT_ROOT";

const PROJECT_FILES: [&str; 2] = ["phasegate.toml", ".claude/phasegate.toml"];
const LOCAL_FILES: [&str; 2] = ["phasegate.local.toml", ".claude/phasegate.local.toml"];

pub const STORE_FILE: &str = "workflow_state.json";
pub const TOKEN_FILE: &str = "user_override_token.json";
pub const LOCK_FILE: &str = "pending_validation.json";
pub const MARKER_FILE: &str = "user_approved_validation";
pub const EVENTS_FILE: &str = "phasegate.events.jsonl";

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Settings {
    /// Directory holding all shared state, relative to the project root.
    pub state_dir: String,
    pub code_extensions: Vec<String>,
    pub classification: ClassificationSettings,
    pub workflow: WorkflowSettings,
    #[serde(rename = "override")]
    pub override_token: OverrideSettings,
    pub artifacts: ArtifactSettings,
    pub tdd: TddSettings,
    pub scope: ScopeSettings,
    pub batch: BatchSettings,
    pub commit: CommitSettings,
    pub logging: LoggingSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            state_dir: ".claude".to_string(),
            code_extensions: strings(&[
                ".swift", ".kt", ".java", ".py", ".js", ".ts", ".tsx", ".jsx", ".go", ".rs",
                ".cpp", ".c", ".h", ".hpp",
            ]),
            classification: ClassificationSettings::default(),
            workflow: WorkflowSettings::default(),
            override_token: OverrideSettings::default(),
            artifacts: ArtifactSettings::default(),
            tdd: TddSettings::default(),
            scope: ScopeSettings::default(),
            batch: BatchSettings::default(),
            commit: CommitSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ClassificationSettings {
    /// Ordered, first match wins. Protected rules are always evaluated first.
    pub rules: Vec<ClassRule>,
}

impl Default for ClassificationSettings {
    fn default() -> Self {
        Self {
            rules: classify::default_rules(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct WorkflowSettings {
    pub approval_phrases: Vec<String>,
    pub pause_phrases: Vec<String>,
}

impl Default for WorkflowSettings {
    fn default() -> Self {
        Self {
            approval_phrases: strings(&["approved", "freigabe", "spec ok", "lgtm", "looks good"]),
            pause_phrases: strings(&[
                "ich höre hier auf",
                "das reicht für heute",
                "implementation später",
                "nur die spec",
                "pause",
                "später weitermachen",
                "für heute fertig",
                "rest später",
                "spec reicht erstmal",
                "stop here",
                "pause workflow",
                "continue later",
            ]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OverrideSettings {
    pub phrases: Vec<String>,
    pub ttl_minutes: u64,
}

impl Default for OverrideSettings {
    fn default() -> Self {
        Self {
            phrases: strings(&["override", "override genehmigt", "ich genehmige", "ich genehmige das"]),
            ttl_minutes: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ArtifactRule {
    /// Lowercase extensions without the dot; `*` allows any.
    pub extensions: Vec<String>,
    pub min_bytes: u64,
}

impl ArtifactRule {
    fn new(extensions: &[&str], min_bytes: u64) -> Self {
        Self {
            extensions: strings(extensions),
            min_bytes,
        }
    }
}

pub fn default_artifact_rules() -> BTreeMap<String, ArtifactRule> {
    let mut rules = BTreeMap::new();
    rules.insert(
        "screenshot".to_string(),
        ArtifactRule::new(&["png", "jpg", "jpeg", "gif", "webp", "bmp"], 1000),
    );
    rules.insert("email".to_string(), ArtifactRule::new(&["eml", "msg", "txt"], 100));
    rules.insert(
        "api_response".to_string(),
        ArtifactRule::new(&["json", "xml", "txt"], 10),
    );
    rules.insert("log".to_string(), ArtifactRule::new(&["log", "txt"], 10));
    rules.insert("file".to_string(), ArtifactRule::new(&["*"], 1));
    rules.insert(
        "test_output".to_string(),
        ArtifactRule::new(&["txt", "log", "json"], 10),
    );
    rules.insert(
        "ui_test_output".to_string(),
        ArtifactRule::new(&["txt", "log", "json"], 10),
    );
    rules.insert(
        "video".to_string(),
        ArtifactRule::new(&["mp4", "mov", "webm", "gif"], 10000),
    );
    rules.insert("audio".to_string(), ArtifactRule::new(&["mp3", "wav", "m4a"], 1000));
    rules
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ArtifactSettings {
    pub max_age_hours: u64,
    pub min_description_chars: usize,
    pub placeholder_phrases: Vec<String>,
    pub failure_keywords: Vec<String>,
    /// Per-type overrides. Types missing here use the built-in rule.
    pub rules: BTreeMap<String, ArtifactRule>,
}

impl Default for ArtifactSettings {
    fn default() -> Self {
        Self {
            max_age_hours: 24,
            min_description_chars: 10,
            placeholder_phrases: strings(&[
                "[todo]",
                "[placeholder]",
                "[add later]",
                "[screenshot here]",
                "tbd",
                "to be done",
                "will add",
                "need to add",
            ]),
            failure_keywords: strings(&[
                "fail",
                "error",
                "assert",
                "not found",
                "exception",
                "red",
                "cannot find",
            ]),
            rules: default_artifact_rules(),
        }
    }
}

impl ArtifactSettings {
    pub fn rule_for(&self, artifact_type: &str) -> Option<ArtifactRule> {
        self.rules
            .get(artifact_type)
            .cloned()
            .or_else(|| default_artifact_rules().remove(artifact_type))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TddSettings {
    /// Regexes selecting files that need RED evidence in phases 6 and 7.
    pub red_test_paths: Vec<String>,
    pub require_unit_and_ui: bool,
}

impl Default for TddSettings {
    fn default() -> Self {
        Self {
            red_test_paths: strings(&[".*"]),
            require_unit_and_ui: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScopeSettings {
    pub require_declared_files: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BatchSettings {
    pub window_minutes: u64,
    pub protected_paths: Vec<String>,
    pub exempt_paths: Vec<String>,
    pub approval_phrases: Vec<String>,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            window_minutes: 5,
            protected_paths: strings(&["src/", "lib/", "app/"]),
            exempt_paths: strings(&[r"\.claude/", "docs/", r"\.md$", r"\.git/", "test", "spec"]),
            approval_phrases: strings(&["approved", "validated", "test ok", "freigabe"]),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CommitSettings {
    /// Shell command run before `git commit`; unset skips the test run.
    pub test_command: Option<String>,
    pub allow_amend: bool,
    pub timeout_secs: u64,
}

impl Default for CommitSettings {
    fn default() -> Self {
        Self {
            test_command: None,
            allow_amend: true,
            timeout_secs: 300,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingSettings {
    pub audit: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self { audit: true }
    }
}

/// Resolved configuration bound to one project root.
#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub settings: Settings,
}

impl Config {
    pub fn new(root: impl Into<PathBuf>, settings: Settings) -> Self {
        Self {
            root: root.into(),
            settings,
        }
    }

    /// Locate the project root from the environment and load its config.
    pub fn discover() -> Result<Self, PhaseGateError> {
        let root = find_project_root()?;
        Self::load(&root)
    }

    pub fn load(root: &Path) -> Result<Self, PhaseGateError> {
        let mut merged = toml::Table::new();
        for layer in [&PROJECT_FILES, &LOCAL_FILES] {
            if let Some(table) = read_first_table(root, layer)? {
                deep_merge(&mut merged, table);
            }
        }
        let text = toml::to_string(&merged).map_err(|e| PhaseGateError::ConfigError(e.to_string()))?;
        let settings: Settings = toml::from_str(&text)?;
        Ok(Self::new(root, settings))
    }

    pub fn state_dir(&self) -> PathBuf {
        self.root.join(&self.settings.state_dir)
    }

    pub fn store_path(&self) -> PathBuf {
        self.state_dir().join(STORE_FILE)
    }

    pub fn token_path(&self) -> PathBuf {
        self.state_dir().join(TOKEN_FILE)
    }

    pub fn lock_path(&self) -> PathBuf {
        self.state_dir().join(LOCK_FILE)
    }

    pub fn marker_path(&self) -> PathBuf {
        self.state_dir().join(MARKER_FILE)
    }

    pub fn events_path(&self) -> PathBuf {
        self.state_dir().join(EVENTS_FILE)
    }
}

fn read_first_table(root: &Path, candidates: &[&str]) -> Result<Option<toml::Table>, PhaseGateError> {
    for rel in candidates {
        let path = root.join(rel);
        if path.is_file() {
            let content = fs::read_to_string(&path)?;
            let table: toml::Table = toml::from_str(&content).map_err(|e| {
                PhaseGateError::ConfigError(format!("{}: {}", path.display(), e))
            })?;
            return Ok(Some(table));
        }
    }
    Ok(None)
}

/// Merge `overlay` into `base`; nested tables merge key by key, anything else replaces.
pub fn deep_merge(base: &mut toml::Table, overlay: toml::Table) {
    for (key, value) in overlay {
        match (base.get_mut(&key), value) {
            (Some(toml::Value::Table(existing)), toml::Value::Table(incoming)) => {
                deep_merge(existing, incoming);
            }
            (_, value) => {
                base.insert(key, value);
            }
        }
    }
}

pub fn find_project_root() -> Result<PathBuf, PhaseGateError> {
    if let Ok(root) = std::env::var(ROOT_ENV) {
        if !root.trim().is_empty() {
            return Ok(PathBuf::from(root));
        }
    }
    let cwd = std::env::current_dir()?;
    Ok(find_root_from(&cwd).unwrap_or(cwd))
}

/// Walk up from `start` to the first directory holding a config file or `.git`.
pub fn find_root_from(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| {
            PROJECT_FILES
                .iter()
                .chain(LOCAL_FILES.iter())
                .any(|rel| dir.join(rel).is_file())
                || dir.join(".git").exists()
        })
        .map(Path::to_path_buf)
}

/// Commented default config written by `phasegate init`.
pub fn default_config_text() -> Result<String, PhaseGateError> {
    let body = toml::to_string_pretty(&Settings::default())
        .map_err(|e| PhaseGateError::ConfigError(e.to_string()))?;
    Ok(format!(
        "# phasegate configuration\n\
         # Values below are the built-in defaults. Delete what you do not change;\n\
         # machine-specific tweaks belong in phasegate.local.toml.\n\n{}",
        body
    ))
}
