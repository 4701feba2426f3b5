//! The nine-phase workflow state machine.
//!
//! Phases are totally ordered. `advance` moves forward one step and never
//! past `phase8_complete`; `set_phase` jumps anywhere. The backlog status is
//! a projection of the phase unless pinned to `blocked`.

use crate::core::error::PhaseGateError;
use crate::core::store::Workflow;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub enum Phase {
    #[default]
    Idle,
    Context,
    Analyse,
    Spec,
    Approved,
    TddRed,
    Implement,
    Validate,
    Complete,
}

pub const PHASES: [Phase; 9] = [
    Phase::Idle,
    Phase::Context,
    Phase::Analyse,
    Phase::Spec,
    Phase::Approved,
    Phase::TddRed,
    Phase::Implement,
    Phase::Validate,
    Phase::Complete,
];

impl Phase {
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "phase0_idle",
            Phase::Context => "phase1_context",
            Phase::Analyse => "phase2_analyse",
            Phase::Spec => "phase3_spec",
            Phase::Approved => "phase4_approved",
            Phase::TddRed => "phase5_tdd_red",
            Phase::Implement => "phase6_implement",
            Phase::Validate => "phase7_validate",
            Phase::Complete => "phase8_complete",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Phase> {
        PHASES.get(index).copied()
    }

    /// The following phase; `Complete` stays `Complete`.
    pub fn next(self) -> Phase {
        Phase::from_index(self.index() + 1).unwrap_or(Phase::Complete)
    }

    /// Map a single-workflow (v1) phase name. Unknown names start over at idle.
    pub fn from_legacy(name: &str) -> Phase {
        match name {
            "idle" => Phase::Idle,
            "analyse_done" => Phase::Analyse,
            "spec_written" => Phase::Spec,
            "spec_approved" => Phase::Approved,
            "implemented" => Phase::Implement,
            "validated" => Phase::Validate,
            _ => Phase::Idle,
        }
    }

    /// Parse a phase given as a v2 name, a bare index (`6`), or a v1 name.
    pub fn parse(raw: &str) -> Result<Phase, PhaseGateError> {
        let raw = raw.trim();
        if let Some(phase) = PHASES.iter().find(|p| p.as_str() == raw) {
            return Ok(*phase);
        }
        if let Ok(index) = raw.parse::<usize>() {
            if let Some(phase) = Phase::from_index(index) {
                return Ok(phase);
            }
        }
        match raw {
            "idle" | "analyse_done" | "spec_written" | "spec_approved" | "implemented"
            | "validated" => Ok(Phase::from_legacy(raw)),
            _ => Err(PhaseGateError::ValidationError(format!(
                "unknown phase '{}'",
                raw
            ))),
        }
    }

    pub fn backlog(self) -> BacklogStatus {
        match self {
            Phase::Idle | Phase::Context | Phase::Analyse | Phase::Spec => BacklogStatus::Open,
            Phase::Approved => BacklogStatus::SpecReady,
            Phase::TddRed | Phase::Implement | Phase::Validate => BacklogStatus::InProgress,
            Phase::Complete => BacklogStatus::Done,
        }
    }

    /// What the gate requires before a code file may be written in this phase.
    pub fn code_rule(self) -> PhaseRule {
        match self {
            Phase::Idle | Phase::Context | Phase::Analyse | Phase::Spec => PhaseRule::Closed,
            Phase::Approved => PhaseRule::RedFlag,
            Phase::TddRed => PhaseRule::RedCapture,
            Phase::Implement | Phase::Validate => PhaseRule::RedEvidence,
            Phase::Complete => PhaseRule::Open,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl Serialize for Phase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Phase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Phase::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseRule {
    /// No code writes in this phase.
    Closed,
    /// `red_test_done` or `ui_test_red_done` must be set.
    RedFlag,
    /// Red flag plus a valid failure artifact recorded in the RED phase.
    RedCapture,
    /// Files under red-test scope need RED evidence.
    RedEvidence,
    Open,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BacklogStatus {
    Open,
    SpecReady,
    InProgress,
    Done,
    Blocked,
}

impl BacklogStatus {
    pub fn parse(raw: &str) -> Result<BacklogStatus, PhaseGateError> {
        match raw.trim() {
            "open" => Ok(BacklogStatus::Open),
            "spec_ready" => Ok(BacklogStatus::SpecReady),
            "in_progress" => Ok(BacklogStatus::InProgress),
            "done" => Ok(BacklogStatus::Done),
            "blocked" => Ok(BacklogStatus::Blocked),
            other => Err(PhaseGateError::ValidationError(format!(
                "unknown backlog status '{}'",
                other
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BacklogStatus::Open => "open",
            BacklogStatus::SpecReady => "spec_ready",
            BacklogStatus::InProgress => "in_progress",
            BacklogStatus::Done => "done",
            BacklogStatus::Blocked => "blocked",
        }
    }
}

impl fmt::Display for BacklogStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Recompute the backlog projection, keeping a `blocked` pin.
pub fn sync_backlog(wf: &mut Workflow) {
    if wf.backlog_status != Some(BacklogStatus::Blocked) {
        wf.backlog_status = Some(wf.current_phase.backlog());
    }
}

fn enter(wf: &mut Workflow, phase: Phase, now: &str) {
    wf.current_phase = phase;
    let name = phase.as_str().to_string();
    if !wf.phases_completed.contains(&name) {
        wf.phases_completed.push(name);
    }
    wf.last_updated = now.to_string();
    sync_backlog(wf);
}

/// Move one phase forward. Returns the new phase; a no-op at `Complete`.
pub fn advance(wf: &mut Workflow, now: &str) -> Phase {
    let next = wf.current_phase.next();
    if next != wf.current_phase {
        enter(wf, next, now);
    }
    wf.current_phase
}

pub fn set_phase(wf: &mut Workflow, phase: Phase, now: &str) {
    enter(wf, phase, now);
}

/// Park a workflow without touching its phase.
pub fn pause(wf: &mut Workflow, now: &str) -> Result<BacklogStatus, PhaseGateError> {
    let status = match wf.current_phase {
        Phase::Complete => {
            return Err(PhaseGateError::ValidationError(
                "completed workflows cannot be paused".to_string(),
            ));
        }
        p if p >= Phase::Approved => BacklogStatus::SpecReady,
        _ => BacklogStatus::Open,
    };
    wf.backlog_status = Some(status);
    wf.last_updated = now.to_string();
    Ok(status)
}
