//! Hook entry points.
//!
//! Each hook is one short-lived process: resolve the input, load shared
//! state, decide, append an audit event. Exit code `0` allows, `2` blocks
//! with the message on stderr. Internal failures surface as errors and the
//! binary exits `1`, which hosts treat as non-blocking. Settings that fail
//! to load are not internal failures: the write hooks block code edits
//! until the configuration is fixed.

use crate::core::artifact::FsProbe;
use crate::core::batch_lock::{BatchDecision, BatchTracker};
use crate::core::classify::{self, Classifier, PathClass};
use crate::core::config::Config;
use crate::core::error::PhaseGateError;
use crate::core::events::{AuditEvent, EventLog};
use crate::core::gate::{self, BlockReason, Decision, Gate};
use crate::core::hook_input::{self, HookInput};
use crate::core::override_token::OverrideStore;
use crate::core::phase::Phase;
use crate::core::store::WorkflowStore;
use crate::core::{output, resolver, time};
use crate::plugins::approval;
use clap::{Parser, Subcommand};
use regex::Regex;
use std::fs::{self, File};
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

pub const EXIT_ALLOW: i32 = 0;
pub const EXIT_BLOCK: i32 = 2;

/// Combined output of the last pre-commit test run, kept for inspection.
pub const TEST_LOG_FILE: &str = "pre_commit_tests.log";

#[derive(Parser, Debug)]
#[clap(name = "hook", about = "Hook entry points invoked by the agent host")]
pub struct HookCli {
    #[clap(subcommand)]
    pub command: HookCommand,
}

#[derive(Subcommand, Debug)]
pub enum HookCommand {
    /// Phase gate for file-writing tools.
    Gate,
    /// Block tool writes to approval files.
    GuardWrite,
    /// Block shell commands that touch approval files.
    GuardBash,
    /// Batch validation lock for protected source paths.
    Batch,
    /// Human prompt: override, spec approval, batch approval, pause.
    Prompt,
    /// Run the test command before `git commit`.
    PreCommit,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct HookOutcome {
    pub exit_code: i32,
    /// Block explanation for stderr.
    pub message: Option<String>,
    /// Lines for stdout on allow; hosts add them to the agent's context.
    pub notices: Vec<String>,
}

impl HookOutcome {
    pub fn allow() -> Self {
        Self::default()
    }

    pub fn block(message: String) -> Self {
        Self {
            exit_code: EXIT_BLOCK,
            message: Some(message),
            notices: Vec::new(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.exit_code == EXIT_BLOCK
    }

    fn notice(mut self, line: String) -> Self {
        self.notices.push(line);
        self
    }
}

impl From<&Decision> for HookOutcome {
    fn from(d: &Decision) -> Self {
        if d.allow {
            HookOutcome::allow()
        } else {
            HookOutcome::block(d.message.clone())
        }
    }
}

pub fn run_hook_cli(config: &Config, cli: HookCli) -> Result<HookOutcome, PhaseGateError> {
    let stdin = hook_input::read_stdin();
    let now = time::now_secs();
    match cli.command {
        HookCommand::Prompt => match hook_input::prompt_from_process(&stdin) {
            Some(text) => prompt(config, &text),
            None => Ok(HookOutcome::allow()),
        },
        command => {
            let input = hook_input::from_process(&stdin);
            match command {
                HookCommand::Gate => gate(config, &input, now),
                HookCommand::GuardWrite => guard_write(config, &input),
                HookCommand::GuardBash => guard_bash(config, &input),
                HookCommand::Batch => batch(config, &input, now),
                _ => pre_commit(config, &input),
            }
        }
    }
}

/// Run a hook when the project configuration could not be loaded. Nothing
/// is audited since the state directory is unknown.
pub fn run_without_config(root: &Path, cli: HookCli, err: &PhaseGateError) -> HookOutcome {
    let stdin = hook_input::read_stdin();
    match cli.command {
        HookCommand::Gate | HookCommand::GuardWrite | HookCommand::Batch => {
            let input = hook_input::from_process(&stdin);
            match input.file_path() {
                Some(file) => HookOutcome::from(&gate::config_failure(
                    root,
                    file,
                    input.tool_name.as_deref(),
                    err,
                )),
                None => HookOutcome::allow(),
            }
        }
        HookCommand::GuardBash => match hook_input::from_process(&stdin).command() {
            Some(command) if classify::references_protected(command) => {
                HookOutcome::from(&shell_tamper(command))
            }
            _ => HookOutcome::allow(),
        },
        _ => HookOutcome::allow().notice(format!(
            "phasegate: configuration unreadable: {}",
            output::compact_line(&err.to_string(), 200)
        )),
    }
}

fn audit(
    config: &Config,
    hook: &str,
    tool: Option<&str>,
    target: Option<&str>,
    outcome: &HookOutcome,
    reason: Option<&str>,
) {
    let decision = if outcome.is_blocked() { "block" } else { "allow" };
    let event = AuditEvent::new(hook, decision)
        .tool(tool)
        .target(target)
        .reason(reason);
    if let Err(e) = EventLog::for_config(config).append(&event) {
        eprintln!("phasegate: audit log unavailable: {}", e);
    }
}

/// Settings loaded but a pattern in them does not compile.
fn settings_failure(
    config: &Config,
    hook: &str,
    file: &str,
    tool: Option<&str>,
    err: &PhaseGateError,
) -> HookOutcome {
    let decision = gate::config_failure(&config.root, file, tool, err);
    let outcome = HookOutcome::from(&decision);
    audit(config, hook, tool, Some(file), &outcome, decision.reason.map(|r| r.code()));
    outcome
}

pub fn gate(config: &Config, input: &HookInput, now: i64) -> Result<HookOutcome, PhaseGateError> {
    let Some(file) = input.file_path() else {
        return Ok(HookOutcome::allow());
    };
    let tool = input.tool_name.as_deref();
    let decision = match Gate::new(config, FsProbe, now) {
        Ok(gate) => gate.evaluate(
            WorkflowStore::open(config).load().as_ref(),
            &OverrideStore::open(config),
            file,
            tool,
        ),
        Err(e) => gate::config_failure(&config.root, file, tool, &e),
    };
    let outcome = HookOutcome::from(&decision);
    let reason = match decision.reason {
        Some(r) => r.code(),
        None => decision.message.as_str(),
    };
    audit(config, "gate", tool, Some(file), &outcome, Some(reason));
    Ok(outcome)
}

pub fn guard_write(config: &Config, input: &HookInput) -> Result<HookOutcome, PhaseGateError> {
    let Some(file) = input.file_path() else {
        return Ok(HookOutcome::allow());
    };
    let tool = input.tool_name.as_deref();
    if !gate::is_gated_tool(tool) {
        return Ok(HookOutcome::allow());
    }
    let classifier = match Classifier::from_settings(&config.settings) {
        Ok(c) => c,
        Err(e) => return Ok(settings_failure(config, "guard-write", file, tool, &e)),
    };
    if classifier.classify(file) != PathClass::Protected {
        return Ok(HookOutcome::allow());
    }
    let decision = Decision::block(
        BlockReason::TamperAttempt,
        vec![
            format!("File: {}", file),
            String::new(),
            "Approval files are created by the user; workflow state changes go through".into(),
            "`phasegate workflow ...`.".into(),
            "To grant an override, the user types 'override' in the chat.".into(),
        ],
    );
    let outcome = HookOutcome::from(&decision);
    audit(
        config,
        "guard-write",
        tool,
        Some(file),
        &outcome,
        Some(BlockReason::TamperAttempt.code()),
    );
    Ok(outcome)
}

pub fn guard_bash(config: &Config, input: &HookInput) -> Result<HookOutcome, PhaseGateError> {
    let Some(command) = input.command() else {
        return Ok(HookOutcome::allow());
    };
    if !classify::references_protected(command) {
        return Ok(HookOutcome::allow());
    }
    let outcome = HookOutcome::from(&shell_tamper(command));
    let target = output::compact_line(command, 200);
    audit(
        config,
        "guard-bash",
        input.tool_name.as_deref(),
        Some(&target),
        &outcome,
        Some(BlockReason::TamperAttempt.code()),
    );
    Ok(outcome)
}

fn shell_tamper(command: &str) -> Decision {
    Decision::block(
        BlockReason::TamperAttempt,
        vec![
            format!("Command: {}", output::compact_line(command, 120)),
            String::new(),
            "Shell access to approval files is not allowed.".into(),
            "Override tokens and validation markers come from the user's chat only.".into(),
        ],
    )
}

pub fn batch(config: &Config, input: &HookInput, now: i64) -> Result<HookOutcome, PhaseGateError> {
    let Some(file) = input.file_path() else {
        return Ok(HookOutcome::allow());
    };
    let tool = input.tool_name.as_deref();
    if !gate::is_gated_tool(tool) {
        return Ok(HookOutcome::allow());
    }
    let path = resolver::normalize(&config.root, file);
    let tracker = match BatchTracker::open(config) {
        Ok(t) => t,
        Err(e) => return Ok(settings_failure(config, "batch", &path, tool, &e)),
    };
    let decision = tracker.record_change(&path, now)?;
    if decision == BatchDecision::Untracked {
        return Ok(HookOutcome::allow());
    }
    let outcome = match &decision {
        BatchDecision::Expired { files } => {
            let phrases = config
                .settings
                .batch
                .approval_phrases
                .iter()
                .map(|p| format!("'{}'", p))
                .collect::<Vec<_>>();
            let d = Decision::block(
                BlockReason::BatchExpired,
                vec![
                    format!("Pending files: {}", output::preview_list(files, 3, ", ")),
                    format!("Blocked file: {}", path),
                    String::new(),
                    format!(
                        "More than {} minutes passed since the last change.",
                        config.settings.batch.window_minutes
                    ),
                    "The user must validate the pending changes before more are made.".into(),
                    format!("Approve in chat with: {}", phrases.join(" | ")),
                ],
            );
            HookOutcome::from(&d)
        }
        BatchDecision::Restarted { approved_files } => HookOutcome::allow().notice(format!(
            "Validated batch of {} file(s) closed; new batch started with {}.",
            approved_files.len(),
            path
        )),
        _ => HookOutcome::allow(),
    };
    let reason = match decision {
        BatchDecision::Expired { .. } => BlockReason::BatchExpired.code(),
        BatchDecision::Started => "started",
        BatchDecision::Restarted { .. } => "restarted",
        _ => "accumulated",
    };
    audit(config, "batch", tool, Some(&path), &outcome, Some(reason));
    Ok(outcome)
}

/// Apply every action a human prompt asks for. Never blocks.
pub fn prompt(config: &Config, text: &str) -> Result<HookOutcome, PhaseGateError> {
    let settings = &config.settings;
    let workflows = WorkflowStore::open(config);
    let mut outcome = HookOutcome::allow();
    let mut actions: Vec<&str> = Vec::new();

    let active = match workflows.load() {
        Ok(store) => store.active().map(|(n, wf)| (n.to_string(), wf.current_phase)),
        Err(e) => {
            outcome = outcome.notice(format!("phasegate: workflow state unreadable: {}", e));
            None
        }
    };

    if hook_input::mentions_phrase(text, &settings.override_token.phrases).is_some() {
        match &active {
            Some((name, _)) => {
                OverrideStore::open(config).grant(name)?;
                workflows.transaction(|store| {
                    if let Some(wf) = store.workflows.get_mut(name) {
                        wf.user_override = true;
                        wf.last_updated = time::now_epoch_z();
                    }
                    Ok(())
                })?;
                actions.push("override_granted");
                outcome = outcome.notice(format!(
                    "Override granted for workflow '{}' ({} minutes).",
                    name, settings.override_token.ttl_minutes
                ));
            }
            None => {
                outcome = outcome.notice("Override requested, but no workflow is active.".into());
            }
        }
    }

    if let Some((name, Phase::Spec)) = &active {
        if hook_input::mentions_phrase(text, &settings.workflow.approval_phrases).is_some()
            && workflows.approve_spec(Some(name.as_str()))?.is_some()
        {
            actions.push("spec_approved");
            outcome = outcome.notice(format!(
                "Spec for '{}' approved by the user; workflow is now {}.",
                name,
                Phase::Approved
            ));
        }
    }

    if hook_input::mentions_phrase(text, &settings.batch.approval_phrases).is_some()
        && BatchTracker::open(config)?.approve()?
    {
        actions.push("batch_approved");
        outcome = outcome.notice("Pending batch validated by the user.".into());
    }

    if let Some((name, phase)) = &active {
        if *phase != Phase::Complete
            && hook_input::mentions_phrase(text, &settings.workflow.pause_phrases).is_some()
        {
            let (_, status) = workflows.pause(Some(name.as_str()))?;
            actions.push("paused");
            outcome = outcome.notice(format!(
                "Workflow '{}' paused (backlog: {}). Resume it any time.",
                name, status
            ));
        }
    }

    if !actions.is_empty() {
        let reason = actions.join(",");
        audit(config, "prompt", None, None, &outcome, Some(&reason));
    }
    Ok(outcome)
}

pub fn is_git_commit(command: &str) -> bool {
    Regex::new(r"\bgit\s+commit(?:\s|$)")
        .map(|re| re.is_match(command))
        .unwrap_or(false)
}

/// Up to `max` lines that look like test failures.
pub fn failure_lines(output: &str, max: usize) -> Vec<String> {
    output
        .lines()
        .filter(|l| l.contains("FAIL") || l.contains("Error"))
        .take(max)
        .map(|l| output::compact_line(l, 160))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct TestRun {
    pub passed: bool,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
    pub output: String,
}

/// Run `command` through `sh -c` in the project root. Output of both
/// streams goes to `<state_dir>/pre_commit_tests.log`.
pub fn run_test_command(config: &Config, command: &str) -> Result<TestRun, PhaseGateError> {
    let dir = config.state_dir();
    fs::create_dir_all(&dir)?;
    let log_path = dir.join(TEST_LOG_FILE);
    let log = File::create(&log_path)?;
    let mut child = Command::new("sh")
        .arg("-c")
        .arg(command)
        .current_dir(&config.root)
        .stdin(Stdio::null())
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log))
        .spawn()?;

    let deadline = Instant::now() + Duration::from_secs(config.settings.commit.timeout_secs);
    let status = loop {
        if let Some(status) = child.try_wait()? {
            break Some(status);
        }
        if Instant::now() >= deadline {
            child.kill()?;
            child.wait()?;
            break None;
        }
        thread::sleep(Duration::from_millis(50));
    };
    let output = String::from_utf8_lossy(&fs::read(&log_path)?).into_owned();
    Ok(TestRun {
        passed: status.is_some_and(|s| s.success()),
        exit_code: status.and_then(|s| s.code()),
        timed_out: status.is_none(),
        output,
    })
}

pub fn pre_commit(config: &Config, input: &HookInput) -> Result<HookOutcome, PhaseGateError> {
    let Some(command) = input.command() else {
        return Ok(HookOutcome::allow());
    };
    if !is_git_commit(command) {
        return Ok(HookOutcome::allow());
    }
    let tool = input.tool_name.as_deref();
    let target = output::compact_line(command, 200);
    let commit = &config.settings.commit;
    if commit.allow_amend && command.contains("--amend") {
        let outcome = HookOutcome::allow();
        audit(config, "pre-commit", tool, Some(&target), &outcome, Some("amend"));
        return Ok(outcome);
    }

    if let Some(test_command) = commit.test_command.as_deref().filter(|c| !c.trim().is_empty()) {
        let run = run_test_command(config, test_command)?;
        if !run.passed {
            let status = if run.timed_out {
                format!("timed out after {}s", commit.timeout_secs)
            } else {
                format!(
                    "exit code {}",
                    run.exit_code.map_or("unknown".to_string(), |c| c.to_string())
                )
            };
            let mut body = vec![
                format!("Test command: {}", test_command),
                format!("Result: {}", status),
                String::new(),
            ];
            let failures = failure_lines(&run.output, 5);
            if !failures.is_empty() {
                body.push("Failures:".into());
                body.extend(failures.into_iter().map(|l| format!("  {}", l)));
                body.push(String::new());
            }
            body.push(format!(
                "Full output: {}",
                config.state_dir().join(TEST_LOG_FILE).display()
            ));
            body.push("Fix the failing tests before committing.".into());
            let outcome = HookOutcome::from(&Decision::block(BlockReason::TestsFailing, body));
            audit(
                config,
                "pre-commit",
                tool,
                Some(&target),
                &outcome,
                Some(BlockReason::TestsFailing.code()),
            );
            return Ok(outcome);
        }
    }

    let mut outcome = HookOutcome::allow();
    if approval::revoke_override(config)? {
        outcome = outcome.notice("Commit allowed; override token revoked.".into());
    }
    audit(config, "pre-commit", tool, Some(&target), &outcome, Some("committed"));
    Ok(outcome)
}
