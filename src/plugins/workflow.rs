use crate::core::artifact::{ArtifactValidator, FsProbe};
use crate::core::config::Config;
use crate::core::error::PhaseGateError;
use crate::core::gate::Gate;
use crate::core::override_token::OverrideStore;
use crate::core::phase::{BacklogStatus, Phase};
use crate::core::resolver::{self, Resolution};
use crate::core::store::{Artifact, Workflow, WorkflowStore};
use crate::core::{output, time};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::{Value as JsonValue, json};

#[derive(Parser, Debug)]
#[clap(name = "workflow", about = "Workflow lifecycle and evidence recording")]
pub struct WorkflowCli {
    /// Workflow to operate on (defaults to the active one).
    #[clap(long, short, global = true)]
    pub workflow: Option<String>,
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text", global = true)]
    pub format: String,
    #[clap(subcommand)]
    pub command: WorkflowCommand,
}

#[derive(Subcommand, Debug)]
pub enum WorkflowCommand {
    /// Create a workflow at phase0_idle (no-op if it exists).
    Start {
        name: String,
        /// Keep the current active workflow.
        #[clap(long)]
        no_activate: bool,
    },
    /// Make an existing workflow active.
    Switch { name: String },
    /// List all workflows in store order.
    List,
    /// Show one workflow in full.
    Status,
    /// Move forward exactly one phase.
    Advance,
    /// Jump to any phase (name like `phase5_tdd_red` or index 0-8).
    SetPhase { phase: String },
    /// Finish the workflow; the next unfinished one becomes active.
    Complete,
    /// Park the workflow without changing its phase.
    Pause,
    /// Record the failing unit-test run (phase 4 advances to 5).
    RedDone { result: String },
    /// Record the passing unit-test run (phase 6 advances to 7).
    GreenDone { result: String },
    /// Record the failing UI-test run.
    UiRedDone { result: String },
    /// Record the passing UI-test run.
    UiGreenDone,
    /// Attach a test artifact.
    Artifact {
        #[clap(long = "type")]
        artifact_type: String,
        #[clap(long)]
        path: String,
        #[clap(long)]
        description: String,
        /// Phase the evidence belongs to (defaults to the current phase).
        #[clap(long)]
        phase: Option<String>,
    },
    /// Declare files the workflow owns (paths or `*` globs).
    Files {
        #[clap(required = true)]
        files: Vec<String>,
    },
    /// Record the spec document.
    Spec { path: String },
    /// Pin a backlog status, or `auto` to follow the phase again.
    Backlog { status: String },
    /// Show which workflow owns a file.
    Resolve { file: String },
    /// Dry-run the gate for a file without logging.
    Check {
        file: String,
        #[clap(long, default_value = "Edit")]
        tool: String,
    },
}

struct Reply {
    cmd: &'static str,
    data: JsonValue,
    lines: Vec<String>,
}

impl Reply {
    fn new(cmd: &'static str, data: JsonValue) -> Self {
        Self {
            cmd,
            data,
            lines: Vec::new(),
        }
    }

    fn line(mut self, line: impl Into<String>) -> Self {
        self.lines.push(line.into());
        self
    }

    fn print(self, json_out: bool) -> Result<(), PhaseGateError> {
        if json_out {
            let env = time::command_envelope(&format!("workflow.{}", self.cmd), "ok", self.data);
            println!("{}", serde_json::to_string_pretty(&env)?);
        } else {
            for line in self.lines {
                println!("{}", line);
            }
        }
        Ok(())
    }
}

pub fn run_workflow_cli(config: &Config, cli: WorkflowCli) -> Result<(), PhaseGateError> {
    let store = WorkflowStore::open(config);
    let json_out = cli.format == "json";
    let target = cli.workflow.as_deref();
    let reply = match cli.command {
        WorkflowCommand::Start { name, no_activate } => {
            let created = store.start(&name, !no_activate)?;
            let msg = if created {
                format!("{} workflow '{}' at {}", "Started".green().bold(), name, Phase::Idle)
            } else {
                format!("Workflow '{}' already exists", name)
            };
            Reply::new("start", json!({ "workflow": name, "created": created })).line(msg)
        }
        WorkflowCommand::Switch { name } => {
            store.switch(&name)?;
            Reply::new("switch", json!({ "active_workflow": name }))
                .line(format!("Active workflow: {}", name.bold()))
        }
        WorkflowCommand::List => {
            let rows = store.list()?;
            let mut reply = Reply::new("list", serde_json::to_value(&rows)?);
            if rows.is_empty() {
                reply = reply.line("No workflows.".dimmed().to_string());
            }
            for row in &rows {
                let marker = if row.active { "*".green().bold() } else { " ".normal() };
                reply = reply.line(format!(
                    "{} {:<24} {:<20} {:<12} files:{} artifacts:{}",
                    marker,
                    row.name,
                    row.phase.as_str(),
                    row.backlog_status.as_str(),
                    row.affected_files,
                    row.artifacts
                ));
            }
            reply
        }
        WorkflowCommand::Status => {
            let (name, wf) = store.status(target)?;
            let data = json!({ "workflow": name, "state": serde_json::to_value(&wf)? });
            status_lines(Reply::new("status", data), &name, &wf)
        }
        WorkflowCommand::Advance => {
            let (name, phase) = store.advance(target)?;
            Reply::new("advance", json!({ "workflow": name, "phase": phase }))
                .line(format!("{} -> {}", name, phase.to_string().cyan()))
        }
        WorkflowCommand::SetPhase { phase } => {
            let phase = Phase::parse(&phase)?;
            let name = store.set_phase(target, phase)?;
            Reply::new("set_phase", json!({ "workflow": name, "phase": phase }))
                .line(format!("{} set to {}", name, phase.to_string().cyan()))
        }
        WorkflowCommand::Complete => {
            let name = store.complete(target)?;
            let active = store.load()?.active_workflow;
            Reply::new(
                "complete",
                json!({ "workflow": name, "active_workflow": active }),
            )
            .line(format!("{} workflow '{}'", "Completed".green().bold(), name))
            .line(format!(
                "Active workflow: {}",
                active.as_deref().unwrap_or("(none)")
            ))
        }
        WorkflowCommand::Pause => {
            let (name, status) = store.pause(target)?;
            Reply::new("pause", json!({ "workflow": name, "backlog_status": status }))
                .line(format!("Paused '{}' (backlog: {})", name, status))
        }
        WorkflowCommand::RedDone { result } => {
            let phase = store.mark_red_done(target, &result)?;
            Reply::new("red_done", json!({ "phase": phase }))
                .line(format!("{} recorded; phase {}", "RED".red().bold(), phase))
        }
        WorkflowCommand::GreenDone { result } => {
            let phase = store.mark_green_done(target, &result)?;
            Reply::new("green_done", json!({ "phase": phase }))
                .line(format!("{} recorded; phase {}", "GREEN".green().bold(), phase))
        }
        WorkflowCommand::UiRedDone { result } => {
            store.mark_ui_red_done(target, &result)?;
            Reply::new("ui_red_done", json!({})).line(format!("UI {} recorded", "RED".red().bold()))
        }
        WorkflowCommand::UiGreenDone => {
            store.mark_ui_green_done(target)?;
            Reply::new("ui_green_done", json!({}))
                .line(format!("UI {} recorded", "GREEN".green().bold()))
        }
        WorkflowCommand::Artifact {
            artifact_type,
            path,
            description,
            phase,
        } => {
            let phase = phase
                .map(|p| Phase::parse(&p).map(|p| p.as_str().to_string()))
                .transpose()?;
            let artifact = store.add_artifact(
                target,
                Artifact {
                    artifact_type,
                    path,
                    description,
                    phase,
                    ..Artifact::default()
                },
            )?;
            let mut reply = Reply::new("artifact", serde_json::to_value(&artifact)?).line(format!(
                "Artifact {} recorded for {}",
                artifact.path,
                artifact.phase.as_deref().unwrap_or("-")
            ));
            if let Err(issue) = ArtifactValidator::on_disk(&config.settings.artifacts, &config.root)
                .validate(&artifact)
            {
                reply = reply.line(format!("{} {}", "warning:".yellow().bold(), issue));
            }
            reply
        }
        WorkflowCommand::Files { files } => {
            let all = store.add_affected_files(target, &files)?;
            Reply::new("files", json!({ "affected_files": all })).line(format!(
                "affected_files: {}",
                output::preview_list(&all, 10, ", ")
            ))
        }
        WorkflowCommand::Spec { path } => {
            store.set_spec_file(target, &path)?;
            Reply::new("spec", json!({ "spec_file": path })).line(format!("Spec file: {}", path))
        }
        WorkflowCommand::Backlog { status } => {
            let status = if status == "auto" {
                store.clear_backlog_pin(target)?
            } else {
                let status = BacklogStatus::parse(&status)?;
                store.set_backlog(target, status)?;
                status
            };
            Reply::new("backlog", json!({ "backlog_status": status }))
                .line(format!("Backlog status: {}", status))
        }
        WorkflowCommand::Resolve { file } => {
            let loaded = store.load()?;
            let resolution = resolver::resolve(&loaded, &config.root, &file);
            let (kind, owner) = match &resolution {
                Resolution::NoWorkflows => ("no_workflows", None),
                Resolution::Owned(n) => ("owned", Some(n.clone())),
                Resolution::ActiveFallback(n) => ("active_fallback", Some(n.clone())),
                Resolution::Unowned { active } => ("unowned", active.clone()),
            };
            Reply::new("resolve", json!({ "file": file, "resolution": kind, "workflow": owner }))
                .line(format!(
                    "{} -> {} ({})",
                    file,
                    owner.as_deref().unwrap_or("(none)"),
                    kind
                ))
        }
        WorkflowCommand::Check { file, tool } => {
            let loaded = store.load();
            let decision = Gate::new(config, FsProbe, time::now_secs())?.evaluate(
                loaded.as_ref(),
                &OverrideStore::open(config),
                &file,
                Some(tool.as_str()),
            );
            let data = json!({
                "file": file,
                "allow": decision.allow,
                "reason": decision.reason.map(|r| r.code()),
                "workflow": decision.workflow.clone(),
            });
            let reply = Reply::new("check", data);
            if decision.allow {
                reply.line(format!("{} {} ({})", "ALLOW".green().bold(), file, decision.message))
            } else {
                reply.line(decision.message)
            }
        }
    };
    reply.print(json_out)
}

fn status_lines(reply: Reply, name: &str, wf: &Workflow) -> Reply {
    let flag = |done: bool| {
        if done {
            "yes".green().to_string()
        } else {
            "no".dimmed().to_string()
        }
    };
    let backlog = wf
        .backlog_status
        .unwrap_or_else(|| wf.current_phase.backlog());
    reply
        .line(format!("{} {}", "Workflow:".bold(), name))
        .line(format!("  phase:          {}", wf.current_phase.to_string().cyan()))
        .line(format!("  backlog:        {}", backlog))
        .line(format!(
            "  spec:           {} (approved: {})",
            wf.spec_file.as_deref().unwrap_or("-"),
            flag(wf.spec_approved)
        ))
        .line(format!(
            "  affected files: {}",
            output::preview_list(&wf.affected_files, 5, ", ")
        ))
        .line(format!(
            "  red / green:    {} / {}",
            flag(wf.red_test_done),
            flag(wf.green_test_done)
        ))
        .line(format!(
            "  ui red / green: {} / {}",
            flag(wf.ui_test_red_done),
            flag(wf.ui_test_green_done)
        ))
        .line(format!("  artifacts:      {}", wf.test_artifacts.len()))
        .line(format!("  updated:        {}", wf.last_updated))
}
