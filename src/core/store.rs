//! Workflow store: every named workflow plus which one is active.
//!
//! The document is read whole and written whole. Mutations go through
//! [`WorkflowStore::transaction`], which holds the backend's writer lock for
//! the entire load-mutate-save cycle. The gate only reads.

use crate::core::artifact::{self, ArtifactType};
use crate::core::backend::{FileBackend, StateBackend};
use crate::core::config::Config;
use crate::core::error::PhaseGateError;
use crate::core::migration;
use crate::core::phase::{self, BacklogStatus, Phase};
use crate::core::time;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value as JsonValue};
use std::fmt;
use std::path::{Path, PathBuf};

pub const SCHEMA_VERSION: &str = "2.0";

/// One piece of recorded evidence.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Artifact {
    /// Kept as text so foreign documents load; checked by the validator.
    #[serde(rename = "type", default)]
    pub artifact_type: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created: Option<String>,
    #[serde(default)]
    pub phase: Option<String>,
    /// Content digest taken at registration. Informational.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Artifact {
    pub fn in_phase(&self, phase: Phase) -> bool {
        self.phase.as_deref() == Some(phase.as_str())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Workflow {
    pub current_phase: Phase,
    pub created: String,
    pub last_updated: String,
    pub spec_file: Option<String>,
    pub spec_approved: bool,
    pub context_file: Option<String>,
    /// Ownership set. Empty means the workflow has not scoped itself yet.
    pub affected_files: Vec<String>,
    pub test_artifacts: Vec<Artifact>,
    pub red_test_done: bool,
    pub red_test_result: Option<String>,
    pub green_test_done: bool,
    pub green_test_result: Option<String>,
    pub ui_test_red_done: bool,
    pub ui_test_red_result: Option<String>,
    pub ui_test_green_done: bool,
    pub user_override: bool,
    pub analysis_findings: Option<String>,
    pub phases_completed: Vec<String>,
    pub backlog_status: Option<BacklogStatus>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Workflow {
    pub fn new(now: &str) -> Self {
        Self {
            created: now.to_string(),
            last_updated: now.to_string(),
            backlog_status: Some(BacklogStatus::Open),
            ..Self::default()
        }
    }

    pub fn red_artifacts(&self) -> impl Iterator<Item = &Artifact> {
        self.test_artifacts.iter().filter(|a| a.in_phase(Phase::TddRed))
    }
}

/// Workflows keyed by name, kept in document order.
///
/// Order matters: ownership resolution scans in this order and the first
/// claiming workflow wins.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Workflows(Vec<(String, Workflow)>);

impl Workflows {
    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Workflow> {
        self.0.iter().find(|(n, _)| n == name).map(|(_, w)| w)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut Workflow> {
        self.0.iter_mut().find(|(n, _)| n == name).map(|(_, w)| w)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Insert or replace. A replaced entry keeps its position.
    pub fn insert(&mut self, name: String, workflow: Workflow) {
        match self.get_mut(&name) {
            Some(existing) => *existing = workflow,
            None => self.0.push((name, workflow)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Workflow)> {
        self.0.iter().map(|(n, w)| (n.as_str(), w))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&str, &mut Workflow)> {
        self.0.iter_mut().map(|(n, w)| (n.as_str(), w))
    }

    pub fn names(&self) -> Vec<String> {
        self.0.iter().map(|(n, _)| n.clone()).collect()
    }
}

impl Serialize for Workflows {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (name, wf) in &self.0 {
            map.serialize_entry(name, wf)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for Workflows {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct OrderedVisitor;

        impl<'de> Visitor<'de> for OrderedVisitor {
            type Value = Workflows;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a map of workflow name to workflow")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Workflows, A::Error> {
                let mut out = Workflows::default();
                while let Some((name, wf)) = access.next_entry::<String, Workflow>()? {
                    out.insert(name, wf);
                }
                Ok(out)
            }
        }

        deserializer.deserialize_map(OrderedVisitor)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Store {
    pub version: String,
    #[serde(default)]
    pub workflows: Workflows,
    #[serde(default)]
    pub active_workflow: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, JsonValue>,
}

impl Default for Store {
    fn default() -> Self {
        Self {
            version: SCHEMA_VERSION.to_string(),
            workflows: Workflows::default(),
            active_workflow: None,
            extra: Map::new(),
        }
    }
}

impl Store {
    /// Parse a store document, migrating an unversioned one.
    pub fn from_json(text: &str) -> Result<Store, PhaseGateError> {
        // Deserialize from the text itself: an intermediate Value map would
        // sort the workflow keys and lose the ownership tie-break order.
        if migration::needs_migration(text)? {
            let legacy: migration::LegacyState = serde_json::from_str(text)?;
            return Ok(migration::migrate_legacy(legacy));
        }
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, PhaseGateError> {
        let mut text = serde_json::to_string_pretty(self)?;
        text.push('\n');
        Ok(text)
    }

    /// The active workflow, if it names an existing entry.
    pub fn active(&self) -> Option<(&str, &Workflow)> {
        let name = self.active_workflow.as_deref()?;
        self.workflows.get(name).map(|wf| (name, wf))
    }

    fn target_name(&self, name: Option<&str>) -> Result<String, PhaseGateError> {
        match name {
            Some(n) if self.workflows.contains(n) => Ok(n.to_string()),
            Some(n) => Err(PhaseGateError::NotFound(format!("workflow '{}'", n))),
            None => self
                .active()
                .map(|(n, _)| n.to_string())
                .ok_or_else(|| PhaseGateError::NotFound("no active workflow".to_string())),
        }
    }

    fn workflow_mut(&mut self, name: &str) -> Result<&mut Workflow, PhaseGateError> {
        self.workflows
            .get_mut(name)
            .ok_or_else(|| PhaseGateError::NotFound(format!("workflow '{}'", name)))
    }
}

pub fn validate_workflow_name(name: &str) -> Result<(), PhaseGateError> {
    if name.is_empty() {
        return Err(PhaseGateError::ValidationError(
            "workflow name cannot be empty".to_string(),
        ));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(PhaseGateError::ValidationError(format!(
            "invalid workflow name '{}': use [A-Za-z0-9._-]",
            name
        )));
    }
    Ok(())
}

/// Summary row for `workflow list`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowSummary {
    pub name: String,
    pub phase: Phase,
    pub backlog_status: BacklogStatus,
    pub active: bool,
    pub affected_files: usize,
    pub artifacts: usize,
}

/// Store handle bound to a backend and the project root used to resolve
/// artifact paths.
#[derive(Debug, Clone)]
pub struct WorkflowStore<B: StateBackend> {
    backend: B,
    root: PathBuf,
}

impl WorkflowStore<FileBackend> {
    pub fn open(config: &Config) -> Self {
        Self::new(FileBackend::new(config.store_path()), config.root.clone())
    }
}

impl<B: StateBackend> WorkflowStore<B> {
    pub fn new(backend: B, root: impl Into<PathBuf>) -> Self {
        Self {
            backend,
            root: root.into(),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Absent document yields an empty store.
    pub fn load(&self) -> Result<Store, PhaseGateError> {
        match self.backend.read()? {
            Some(text) if !text.trim().is_empty() => Store::from_json(&text),
            _ => Ok(Store::default()),
        }
    }

    pub fn save(&self, store: &Store) -> Result<(), PhaseGateError> {
        self.backend.write(&store.to_json()?)
    }

    /// One locked load-mutate-save cycle. Nothing is written if `f` fails.
    pub fn transaction<T, F>(&self, f: F) -> Result<T, PhaseGateError>
    where
        F: FnOnce(&mut Store) -> Result<T, PhaseGateError>,
    {
        self.backend.with_lock(|| {
            let mut store = self.load()?;
            let out = f(&mut store)?;
            self.save(&store)?;
            Ok(out)
        })
    }

    /// Create `name` at phase 0 unless it exists; optionally make it active.
    pub fn start(&self, name: &str, make_active: bool) -> Result<bool, PhaseGateError> {
        validate_workflow_name(name)?;
        self.transaction(|store| {
            let created = !store.workflows.contains(name);
            if created {
                store
                    .workflows
                    .insert(name.to_string(), Workflow::new(&time::now_epoch_z()));
            }
            if make_active {
                store.active_workflow = Some(name.to_string());
            }
            Ok(created)
        })
    }

    pub fn switch(&self, name: &str) -> Result<(), PhaseGateError> {
        self.transaction(|store| {
            if !store.workflows.contains(name) {
                return Err(PhaseGateError::NotFound(format!("workflow '{}'", name)));
            }
            store.active_workflow = Some(name.to_string());
            Ok(())
        })
    }

    pub fn advance(&self, name: Option<&str>) -> Result<(String, Phase), PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            let phase = phase::advance(wf, &time::now_epoch_z());
            Ok((target, phase))
        })
    }

    pub fn set_phase(&self, name: Option<&str>, to: Phase) -> Result<String, PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            phase::set_phase(store.workflow_mut(&target)?, to, &time::now_epoch_z());
            Ok(target)
        })
    }

    /// Finish a workflow. If it was active, the first unfinished workflow
    /// takes over (or none).
    pub fn complete(&self, name: Option<&str>) -> Result<String, PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            phase::set_phase(wf, Phase::Complete, &time::now_epoch_z());
            wf.backlog_status = Some(BacklogStatus::Done);
            if store.active_workflow.as_deref() == Some(target.as_str()) {
                store.active_workflow = store
                    .workflows
                    .iter()
                    .find(|(n, w)| *n != target && w.current_phase != Phase::Complete)
                    .map(|(n, _)| n.to_string());
            }
            Ok(target)
        })
    }

    /// Record a failing unit test. Phase 4 moves on to phase 5.
    pub fn mark_red_done(&self, name: Option<&str>, result: &str) -> Result<Phase, PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            let now = time::now_epoch_z();
            wf.red_test_done = true;
            wf.red_test_result = Some(result.to_string());
            wf.last_updated = now.clone();
            if wf.current_phase == Phase::Approved {
                phase::advance(wf, &now);
            }
            Ok(wf.current_phase)
        })
    }

    /// Record passing tests. Phase 6 moves on to phase 7.
    pub fn mark_green_done(
        &self,
        name: Option<&str>,
        result: &str,
    ) -> Result<Phase, PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            let now = time::now_epoch_z();
            wf.green_test_done = true;
            wf.green_test_result = Some(result.to_string());
            wf.last_updated = now.clone();
            if wf.current_phase == Phase::Implement {
                phase::advance(wf, &now);
            }
            Ok(wf.current_phase)
        })
    }

    pub fn mark_ui_red_done(&self, name: Option<&str>, result: &str) -> Result<(), PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            wf.ui_test_red_done = true;
            wf.ui_test_red_result = Some(result.to_string());
            wf.last_updated = time::now_epoch_z();
            Ok(())
        })
    }

    pub fn mark_ui_green_done(&self, name: Option<&str>) -> Result<(), PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            wf.ui_test_green_done = true;
            wf.last_updated = time::now_epoch_z();
            Ok(())
        })
    }

    /// Attach evidence. `created` and the content digest are set here, never
    /// taken from the caller.
    pub fn add_artifact(
        &self,
        name: Option<&str>,
        mut artifact: Artifact,
    ) -> Result<Artifact, PhaseGateError> {
        ArtifactType::parse(&artifact.artifact_type)?;
        let now = time::now_epoch_z();
        artifact.created = Some(now.clone());
        artifact.sha256 = artifact::digest_file(&self.root, &artifact.path);
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            if artifact.phase.is_none() {
                artifact.phase = Some(wf.current_phase.as_str().to_string());
            }
            wf.test_artifacts.push(artifact.clone());
            wf.last_updated = now.clone();
            Ok(artifact.clone())
        })
    }

    /// Append to the ownership set, skipping entries already present.
    pub fn add_affected_files(
        &self,
        name: Option<&str>,
        files: &[String],
    ) -> Result<Vec<String>, PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            for file in files {
                let file = file.trim();
                if !file.is_empty() && !wf.affected_files.iter().any(|f| f == file) {
                    wf.affected_files.push(file.to_string());
                }
            }
            wf.last_updated = time::now_epoch_z();
            Ok(wf.affected_files.clone())
        })
    }

    pub fn set_spec_file(&self, name: Option<&str>, spec_file: &str) -> Result<(), PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            wf.spec_file = Some(spec_file.to_string());
            wf.last_updated = time::now_epoch_z();
            Ok(())
        })
    }

    pub fn set_backlog(
        &self,
        name: Option<&str>,
        status: BacklogStatus,
    ) -> Result<(), PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            wf.backlog_status = Some(status);
            wf.last_updated = time::now_epoch_z();
            Ok(())
        })
    }

    /// Drop a `blocked` pin and go back to the phase projection.
    pub fn clear_backlog_pin(&self, name: Option<&str>) -> Result<BacklogStatus, PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            let status = wf.current_phase.backlog();
            wf.backlog_status = Some(status);
            wf.last_updated = time::now_epoch_z();
            Ok(status)
        })
    }

    pub fn pause(&self, name: Option<&str>) -> Result<(String, BacklogStatus), PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let status = phase::pause(store.workflow_mut(&target)?, &time::now_epoch_z())?;
            Ok((target, status))
        })
    }

    /// Human spec approval: phase 3 moves to phase 4. Returns `None` when the
    /// workflow is not waiting for approval.
    pub fn approve_spec(&self, name: Option<&str>) -> Result<Option<String>, PhaseGateError> {
        self.transaction(|store| {
            let target = store.target_name(name)?;
            let wf = store.workflow_mut(&target)?;
            if wf.current_phase != Phase::Spec {
                return Ok(None);
            }
            wf.spec_approved = true;
            phase::advance(wf, &time::now_epoch_z());
            Ok(Some(target))
        })
    }

    pub fn list(&self) -> Result<Vec<WorkflowSummary>, PhaseGateError> {
        let store = self.load()?;
        Ok(store
            .workflows
            .iter()
            .map(|(name, wf)| WorkflowSummary {
                name: name.to_string(),
                phase: wf.current_phase,
                backlog_status: wf
                    .backlog_status
                    .unwrap_or_else(|| wf.current_phase.backlog()),
                active: store.active_workflow.as_deref() == Some(name),
                affected_files: wf.affected_files.len(),
                artifacts: wf.test_artifacts.len(),
            })
            .collect())
    }

    pub fn status(&self, name: Option<&str>) -> Result<(String, Workflow), PhaseGateError> {
        let store = self.load()?;
        let target = store.target_name(name)?;
        let wf = store
            .workflows
            .get(&target)
            .cloned()
            .ok_or_else(|| PhaseGateError::NotFound(format!("workflow '{}'", target)))?;
        Ok((target, wf))
    }
}
