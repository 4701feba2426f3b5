//! Gate evaluation for one attempted file write.
//!
//! The evaluator is a pure function of the configuration, a loaded store,
//! the override state and the evidence files. Hooks load the inputs, call
//! [`Gate::evaluate`], and turn the [`Decision`] into an exit code.
//!
//! Order of checks:
//! 0. protected path: always blocked, no override
//! 1. exempt class: allowed
//! 2. not a code file: allowed
//! 3. ownership; an empty store means no workflow system is in effect
//! 4. override token for the active workflow: allowed
//! 5. unowned file: scope violation
//! 6. phase rules and RED evidence; with `tdd.require_unit_and_ui`, a
//!    passing UI run in phases 7 and 8
//! 7. declared scope
//!
//! Settings that fail to load never reach the evaluator; see
//! [`config_failure`].

use crate::core::artifact::{ArtifactType, ArtifactValidator, EvidenceProbe};
use crate::core::backend::StateBackend;
use crate::core::classify::{Classifier, PathClass};
use crate::core::config::{Config, Settings};
use crate::core::error::PhaseGateError;
use crate::core::output;
use crate::core::override_token::OverrideStore;
use crate::core::phase::{Phase, PhaseRule};
use crate::core::resolver::{self, Resolution};
use crate::core::store::{Store, Workflow};
use regex::Regex;
use std::fmt;
use std::path::Path;

/// Tools whose calls write files and are therefore gated.
pub const GATED_TOOLS: [&str; 4] = ["Edit", "Write", "MultiEdit", "NotebookEdit"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BlockReason {
    TamperAttempt,
    WorkflowNotStarted,
    ContextPhase,
    SpecMissing,
    SpecNotApproved,
    RedPhaseRequired,
    RedCaptureMissing,
    RedEvidenceMissing,
    InvalidArtifact,
    NoFailureEvidence,
    NoActiveWorkflow,
    OutOfScope,
    NoDeclaredFiles,
    StateUnreadable,
    BatchExpired,
    TestsFailing,
    UiTestsIncomplete,
    ConfigInvalid,
}

impl BlockReason {
    pub fn headline(self) -> &'static str {
        match self {
            BlockReason::TamperAttempt => "PROTECTED FILE - Human Approval Only!",
            BlockReason::WorkflowNotStarted => "WORKFLOW NOT STARTED!",
            BlockReason::ContextPhase => "CONTEXT PHASE - Analysis Required",
            BlockReason::SpecMissing => "SPEC MISSING!",
            BlockReason::SpecNotApproved => "SPEC NOT APPROVED!",
            BlockReason::RedPhaseRequired => "TDD RED PHASE REQUIRED!",
            BlockReason::RedCaptureMissing => "TDD RED PHASE - Capture Failure First!",
            BlockReason::RedEvidenceMissing => "TDD RED PHASE INCOMPLETE!",
            BlockReason::InvalidArtifact => "INVALID TEST ARTIFACT!",
            BlockReason::NoFailureEvidence => "RED ARTIFACT SHOWS NO FAILURE!",
            BlockReason::NoActiveWorkflow => "NO ACTIVE WORKFLOW!",
            BlockReason::OutOfScope => "FILE NOT IN WORKFLOW SCOPE!",
            BlockReason::NoDeclaredFiles => "NO AFFECTED FILES DECLARED!",
            BlockReason::StateUnreadable => "WORKFLOW STATE UNREADABLE!",
            BlockReason::BatchExpired => "VALIDATION REQUIRED - Batch Window Expired!",
            BlockReason::TestsFailing => "TESTS FAILING - Commit Blocked!",
            BlockReason::UiTestsIncomplete => "UI TESTS NOT COMPLETED!",
            BlockReason::ConfigInvalid => "PHASEGATE CONFIG INVALID!",
        }
    }

    /// Stable identifier for logs and JSON output.
    pub fn code(self) -> &'static str {
        match self {
            BlockReason::TamperAttempt => "tamper_attempt",
            BlockReason::WorkflowNotStarted => "workflow_not_started",
            BlockReason::ContextPhase => "context_phase",
            BlockReason::SpecMissing => "spec_missing",
            BlockReason::SpecNotApproved => "spec_not_approved",
            BlockReason::RedPhaseRequired => "red_phase_required",
            BlockReason::RedCaptureMissing => "red_capture_missing",
            BlockReason::RedEvidenceMissing => "red_evidence_missing",
            BlockReason::InvalidArtifact => "invalid_artifact",
            BlockReason::NoFailureEvidence => "no_failure_evidence",
            BlockReason::NoActiveWorkflow => "no_active_workflow",
            BlockReason::OutOfScope => "out_of_scope",
            BlockReason::NoDeclaredFiles => "no_declared_files",
            BlockReason::StateUnreadable => "state_unreadable",
            BlockReason::BatchExpired => "batch_expired",
            BlockReason::TestsFailing => "tests_failing",
            BlockReason::UiTestsIncomplete => "ui_tests_incomplete",
            BlockReason::ConfigInvalid => "config_invalid",
        }
    }

    /// Block reason for a phase that never allows code writes.
    pub fn for_closed_phase(phase: Phase) -> Option<BlockReason> {
        match phase {
            Phase::Idle => Some(BlockReason::WorkflowNotStarted),
            Phase::Context => Some(BlockReason::ContextPhase),
            Phase::Analyse => Some(BlockReason::SpecMissing),
            Phase::Spec => Some(BlockReason::SpecNotApproved),
            _ => None,
        }
    }
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.headline())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub allow: bool,
    pub reason: Option<BlockReason>,
    /// Rendered block text for stderr; a short note on allows.
    pub message: String,
    pub workflow: Option<String>,
}

impl Decision {
    pub fn allow(note: &str) -> Self {
        Self {
            allow: true,
            reason: None,
            message: note.to_string(),
            workflow: None,
        }
    }

    pub fn block(reason: BlockReason, body: Vec<String>) -> Self {
        Self {
            allow: false,
            reason: Some(reason),
            message: output::render_block(reason.headline(), &body),
            workflow: None,
        }
    }

    fn for_workflow(mut self, name: &str) -> Self {
        self.workflow = Some(name.to_string());
        self
    }
}

/// Whether a human override is currently granted for a workflow.
pub trait OverrideCheck {
    fn is_granted(&self, workflow: &str, now: i64) -> bool;
}

impl<B: StateBackend> OverrideCheck for OverrideStore<B> {
    fn is_granted(&self, workflow: &str, now: i64) -> bool {
        self.check(workflow, now)
            .map(|c| c.is_valid())
            .unwrap_or(false)
    }
}

/// No override ever granted.
pub struct NoOverride;

impl OverrideCheck for NoOverride {
    fn is_granted(&self, _workflow: &str, _now: i64) -> bool {
        false
    }
}

pub fn is_gated_tool(tool: Option<&str>) -> bool {
    match tool {
        None => true,
        Some(t) => GATED_TOOLS.contains(&t),
    }
}

/// Decision for a write when the settings failed to load or compile. Code
/// and approval files are judged by the built-in table and blocked; other
/// paths pass.
pub fn config_failure(
    root: &Path,
    file_path: &str,
    tool: Option<&str>,
    err: &PhaseGateError,
) -> Decision {
    if !is_gated_tool(tool) {
        return Decision::allow("tool is not gated");
    }
    let class = Classifier::from_settings(&Settings::default())
        .map(|c| c.classify_under(root, file_path))
        .unwrap_or(PathClass::Code);
    if !matches!(class, PathClass::Code | PathClass::Protected) {
        return Decision::allow("not a code file");
    }
    Decision::block(
        BlockReason::ConfigInvalid,
        vec![
            format!("File: {}", file_path),
            format!("Error: {}", output::compact_line(&err.to_string(), 200)),
            String::new(),
            "Code edits stay blocked until the configuration loads.".into(),
            "Fix phasegate.toml or phasegate.local.toml, then check: phasegate config show".into(),
        ],
    )
}

pub struct Gate<'a, P: EvidenceProbe> {
    config: &'a Config,
    classifier: Classifier,
    red_paths: Vec<Regex>,
    probe: P,
    now: i64,
}

impl<'a, P: EvidenceProbe> Gate<'a, P> {
    pub fn new(config: &'a Config, probe: P, now: i64) -> Result<Self, PhaseGateError> {
        let red_paths = config
            .settings
            .tdd
            .red_test_paths
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            classifier: Classifier::from_settings(&config.settings)?,
            red_paths,
            probe,
            now,
        })
    }

    pub fn classify(&self, file_path: &str) -> PathClass {
        self.classifier.classify_under(&self.config.root, file_path)
    }

    pub fn evaluate(
        &self,
        store: Result<&Store, &PhaseGateError>,
        overrides: &impl OverrideCheck,
        file_path: &str,
        tool: Option<&str>,
    ) -> Decision {
        if !is_gated_tool(tool) {
            return Decision::allow("tool is not gated");
        }
        match self.classify(file_path) {
            PathClass::Protected => {
                return Decision::block(
                    BlockReason::TamperAttempt,
                    vec![
                        format!("File: {}", file_path),
                        String::new(),
                        "This file holds approvals or workflow state. Agent tools may not write it.".into(),
                        "To grant an override, the user types 'override' in the chat.".into(),
                    ],
                );
            }
            class if class.is_exempt() => return Decision::allow("exempt path"),
            PathClass::Code => {}
            _ => return Decision::allow("not a code file"),
        }

        let store = match store {
            Ok(s) => s,
            Err(e) => {
                return Decision::block(
                    BlockReason::StateUnreadable,
                    vec![
                        format!("State file: {}", self.config.store_path().display()),
                        format!("Error: {}", output::compact_line(&e.to_string(), 200)),
                        String::new(),
                        "Fix or remove the state file, then retry.".into(),
                    ],
                );
            }
        };

        let root = &self.config.root;
        let resolution = resolver::resolve(store, root, file_path);
        let candidate = match &resolution {
            Resolution::NoWorkflows => return Decision::allow("no workflows"),
            Resolution::Owned(n) | Resolution::ActiveFallback(n) => n.clone(),
            Resolution::Unowned { active: Some(a) } => a.clone(),
            Resolution::Unowned { active: None } => {
                return Decision::block(
                    BlockReason::NoActiveWorkflow,
                    vec![
                        format!("File: {}", file_path),
                        String::new(),
                        "No workflow owns this file and none is active.".into(),
                        String::new(),
                        format!(
                            "Known workflows: {}",
                            output::preview_list(&store.workflows.names(), 5, ", ")
                        ),
                        "NEXT: phasegate workflow switch <name> or start a new workflow".into(),
                    ],
                );
            }
        };

        if store.active_workflow.as_deref() == Some(candidate.as_str())
            && overrides.is_granted(&candidate, self.now)
        {
            return Decision::allow("override token").for_workflow(&candidate);
        }

        let Some(wf) = store.workflows.get(&candidate) else {
            return Decision::block(
                BlockReason::NoActiveWorkflow,
                vec![format!("Active workflow '{}' does not exist.", candidate)],
            );
        };

        if let Resolution::Unowned { .. } = resolution {
            return scope_violation(&candidate, wf, file_path).for_workflow(&candidate);
        }

        let normalized = resolver::normalize(root, file_path);
        if let Some(block) = self.phase_rules(&candidate, wf, file_path, &normalized) {
            return block.for_workflow(&candidate);
        }

        if self.config.settings.scope.require_declared_files
            && wf.current_phase >= Phase::Implement
            && wf.affected_files.is_empty()
        {
            return Decision::block(
                BlockReason::NoDeclaredFiles,
                vec![
                    format!("Workflow: {}", candidate),
                    format!("File: {}", file_path),
                    String::new(),
                    "The workflow has not declared its affected_files yet.".into(),
                    "NEXT: phasegate workflow files <path>... (update the spec first)".into(),
                ],
            )
            .for_workflow(&candidate);
        }

        if !wf.affected_files.is_empty() && !resolver::workflow_claims(wf, &normalized) {
            return scope_violation(&candidate, wf, file_path).for_workflow(&candidate);
        }

        Decision::allow("workflow permits edit").for_workflow(&candidate)
    }

    fn phase_rules(
        &self,
        name: &str,
        wf: &Workflow,
        file_path: &str,
        normalized: &str,
    ) -> Option<Decision> {
        let phase = wf.current_phase;
        let header = || {
            vec![
                format!("Workflow: {}", name),
                format!("Phase: {}", phase),
                format!("File: {}", file_path),
                String::new(),
            ]
        };
        let red_flag = wf.red_test_done || wf.ui_test_red_done;
        let verdict = match phase.code_rule() {
            PhaseRule::Open => None,
            PhaseRule::Closed => {
                let reason = BlockReason::for_closed_phase(phase)?;
                Some(Decision::block(reason, [header(), closed_phase_body(wf, phase)].concat()))
            }
            PhaseRule::RedFlag if red_flag => None,
            PhaseRule::RedFlag => Some(Decision::block(
                BlockReason::RedPhaseRequired,
                [
                    header(),
                    vec![
                        "The spec is approved, but there is no failing test yet.".into(),
                        String::new(),
                        "  RED    write tests that FAIL (the feature does not exist)".into(),
                        "  GREEN  write code until the tests PASS".into(),
                        String::new(),
                        "NEXT: /tdd-red, run the tests, record the failure:".into(),
                        "  phasegate workflow red-done \"<failing test output>\"".into(),
                    ],
                ]
                .concat(),
            )),
            PhaseRule::RedCapture if !red_flag => Some(red_capture_missing(header())),
            PhaseRule::RedCapture => self.red_capture(wf, header()),
            PhaseRule::RedEvidence if self.red_paths.iter().any(|re| re.is_match(normalized)) => {
                self.red_evidence(wf, header())
            }
            PhaseRule::RedEvidence => None,
        };
        if verdict.is_some() {
            return verdict;
        }
        if phase >= Phase::Validate
            && self.config.settings.tdd.require_unit_and_ui
            && !ui_tests_green(wf)
        {
            return Some(ui_tests_incomplete(header(), wf));
        }
        None
    }

    fn validator(&self) -> ArtifactValidator<'_, &P> {
        ArtifactValidator::new(
            &self.config.settings.artifacts,
            &self.config.root,
            &self.probe,
            self.now,
        )
    }

    /// Phase 5: at least one valid RED artifact that shows a failure.
    fn red_capture(&self, wf: &Workflow, header: Vec<String>) -> Option<Decision> {
        let validator = self.validator();
        let mut first_issue = None;
        let mut valid_without_failure = false;
        for a in wf.red_artifacts() {
            match validator.validate(a) {
                Ok(()) if validator.shows_failure(a) => return None,
                Ok(()) => valid_without_failure = true,
                Err(issue) => {
                    if first_issue.is_none() {
                        first_issue = Some((a.path.clone(), issue));
                    }
                }
            }
        }
        if valid_without_failure {
            return Some(no_failure_evidence(header));
        }
        if let Some((path, issue)) = first_issue {
            return Some(invalid_artifact(header, &path, &issue.to_string()));
        }
        Some(red_capture_missing(header))
    }

    /// Phases 6-7: recorded RED artifacts must hold up; without any, the
    /// RED flag is enough.
    fn red_evidence(&self, wf: &Workflow, header: Vec<String>) -> Option<Decision> {
        let validator = self.validator();
        let red: Vec<_> = wf.red_artifacts().collect();
        let tdd = &self.config.settings.tdd;

        if red.is_empty() {
            if tdd.require_unit_and_ui || !(wf.red_test_done || wf.ui_test_red_done) {
                return Some(red_evidence_missing(
                    header,
                    "No RED test was recorded for this workflow.",
                ));
            }
            return None;
        }

        for a in &red {
            if let Err(issue) = validator.validate(a) {
                return Some(invalid_artifact(header, &a.path, &issue.to_string()));
            }
        }
        if !red.iter().any(|a| validator.shows_failure(a)) {
            return Some(no_failure_evidence(header));
        }

        if tdd.require_unit_and_ui {
            let types: Vec<ArtifactType> = red
                .iter()
                .filter_map(|a| ArtifactType::parse(&a.artifact_type).ok())
                .collect();
            if !types.iter().any(|t| t.is_unit()) {
                return Some(red_evidence_missing(
                    header,
                    "A unit-test RED artifact (test_output, log, api_response) is required.",
                ));
            }
            if !types.iter().any(|t| t.is_ui()) {
                return Some(red_evidence_missing(
                    header,
                    "A UI-test RED artifact (ui_test_output, screenshot, video) is required.",
                ));
            }
            let ui_failed = wf.ui_test_red_done
                && wf
                    .ui_test_red_result
                    .as_deref()
                    .is_some_and(|r| r.to_lowercase().contains("fail"));
            if !ui_failed {
                return Some(red_evidence_missing(
                    header,
                    "The UI RED run must be recorded with a failing result.",
                ));
            }
        }
        None
    }
}

fn closed_phase_body(wf: &Workflow, phase: Phase) -> Vec<String> {
    match phase {
        Phase::Idle => vec![
            "You are trying to modify code without starting the workflow.".into(),
            String::new(),
            "REQUIRED WORKFLOW:".into(),
            "  /context    gather relevant context       (phase 1)".into(),
            "  /analyse    analyse requirements          (phase 2)".into(),
            "  /write-spec create the specification      (phase 3)".into(),
            "  \"approved\"  user approval                 (phase 4)".into(),
            "  /tdd-red    write FAILING tests           (phase 5)".into(),
            "  /implement  make the tests GREEN          (phase 6)".into(),
            "  /validate   manual validation             (phase 7)".into(),
            String::new(),
            "START WITH: /context or /analyse".into(),
        ],
        Phase::Context => vec![
            "Context is being gathered, but the analysis is not complete.".into(),
            String::new(),
            "NEXT: /analyse".into(),
        ],
        Phase::Analyse => vec![
            "The analysis is complete, but no spec has been written.".into(),
            "The spec defines WHAT to build and HOW to test it.".into(),
            String::new(),
            "NEXT: /write-spec".into(),
        ],
        _ => vec![
            "A spec exists but the USER has not approved it yet.".into(),
            format!(
                "Spec: {}",
                wf.spec_file.as_deref().unwrap_or("(not recorded)")
            ),
            String::new(),
            "The user confirms with one of: \"approved\" | \"freigabe\" | \"spec ok\" | \"lgtm\"".into(),
            "Specs cannot be approved by the agent.".into(),
        ],
    }
}

fn red_capture_missing(header: Vec<String>) -> Decision {
    Decision::block(
        BlockReason::RedCaptureMissing,
        [
            header,
            vec![
                "You are in the RED phase but no test failure has been captured.".into(),
                String::new(),
                "REQUIRED:".into(),
                "  1. write tests for the new functionality".into(),
                "  2. run them; they MUST FAIL".into(),
                "  3. record the failure: phasegate workflow red-done \"<output>\"".into(),
                "  4. attach the output: phasegate workflow artifact --type test_output ...".into(),
            ],
        ]
        .concat(),
    )
}

/// A passing UI run is on record: the explicit flag, or a UI artifact
/// attached during implementation.
fn ui_tests_green(wf: &Workflow) -> bool {
    wf.ui_test_green_done || ui_artifact_count(wf, Phase::Implement) > 0
}

fn ui_artifact_count(wf: &Workflow, phase: Phase) -> usize {
    wf.test_artifacts
        .iter()
        .filter(|a| a.in_phase(phase))
        .filter(|a| ArtifactType::parse(&a.artifact_type).is_ok_and(|t| t.is_ui()))
        .count()
}

fn ui_tests_incomplete(header: Vec<String>, wf: &Workflow) -> Decision {
    Decision::block(
        BlockReason::UiTestsIncomplete,
        [
            header,
            vec![
                "Validation needs a passing UI test run on record.".into(),
                format!("UI RED artifacts: {}", ui_artifact_count(wf, Phase::TddRed)),
                format!("UI GREEN artifacts: {}", ui_artifact_count(wf, Phase::Implement)),
                String::new(),
                "NEXT: run the UI tests until they pass, then record it:".into(),
                "  phasegate workflow ui-green-done".into(),
                "  or attach a ui_test_output / screenshot artifact for phase6_implement".into(),
            ],
        ]
        .concat(),
    )
}

fn red_evidence_missing(header: Vec<String>, detail: &str) -> Decision {
    Decision::block(
        BlockReason::RedEvidenceMissing,
        [
            header,
            vec![
                detail.to_string(),
                String::new(),
                "Implementation requires a captured failing test first.".into(),
                "NEXT: /tdd-red and attach the failing output as a phase5_tdd_red artifact".into(),
            ],
        ]
        .concat(),
    )
}

fn invalid_artifact(header: Vec<String>, path: &str, issue: &str) -> Decision {
    Decision::block(
        BlockReason::InvalidArtifact,
        [
            header,
            vec![
                format!("Artifact: {}", path),
                format!("Problem: {}", issue),
                String::new(),
                "Record real, current evidence and attach it again.".into(),
            ],
        ]
        .concat(),
    )
}

fn no_failure_evidence(header: Vec<String>) -> Decision {
    Decision::block(
        BlockReason::NoFailureEvidence,
        [
            header,
            vec![
                "The RED artifacts do not describe a failing test.".into(),
                "A description must mention the failure (e.g. fail, error, assert,".into(),
                "exception, not found).".into(),
                String::new(),
                "NEXT: attach the actual failing output".into(),
            ],
        ]
        .concat(),
    )
}

fn scope_violation(name: &str, wf: &Workflow, file_path: &str) -> Decision {
    Decision::block(
        BlockReason::OutOfScope,
        vec![
            format!("Workflow: {}", name),
            format!("File: {}", file_path),
            String::new(),
            "This file is NOT in the workflow's affected_files:".into(),
            format!("  {}", output::preview_list(&wf.affected_files, 8, ", ")),
            String::new(),
            "You may be working on a different feature than the active workflow.".into(),
            "NEXT: add the file to the spec and run phasegate workflow files <path>,".into(),
            "or switch to the workflow that owns it.".into(),
        ],
    )
}
