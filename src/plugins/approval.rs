//! Read-mostly CLI over the human approval state: the override token and
//! the batch validation lock.
//!
//! Granting is deliberately absent. Tokens and markers are only created by
//! the prompt hook from text the human typed.

use crate::core::batch_lock::BatchTracker;
use crate::core::config::Config;
use crate::core::error::PhaseGateError;
use crate::core::override_token::{OverrideStore, TokenCheck};
use crate::core::store::WorkflowStore;
use crate::core::{output, time};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde_json::json;

#[derive(Parser, Debug)]
#[clap(name = "override", about = "Inspect or revoke the human override token")]
pub struct OverrideCli {
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
    #[clap(subcommand)]
    pub command: OverrideCommand,
}

#[derive(Subcommand, Debug)]
pub enum OverrideCommand {
    /// Show the token and whether it applies to the active workflow.
    Status,
    /// Delete the token and clear the per-workflow override records.
    Revoke,
}

#[derive(Parser, Debug)]
#[clap(name = "batch", about = "Inspect the batch validation lock")]
pub struct BatchCli {
    /// Output format: 'text' or 'json'.
    #[clap(long, default_value = "text")]
    pub format: String,
    #[clap(subcommand)]
    pub command: BatchCommand,
}

#[derive(Subcommand, Debug)]
pub enum BatchCommand {
    /// Show pending files, timestamps and approval state.
    Status,
}

/// Revoke the token and reset `user_override` on every workflow.
/// Returns whether a token existed.
pub fn revoke_override(config: &Config) -> Result<bool, PhaseGateError> {
    let existed = OverrideStore::open(config).revoke()?;
    let workflows = WorkflowStore::open(config);
    if workflows
        .load()?
        .workflows
        .iter()
        .any(|(_, wf)| wf.user_override)
    {
        workflows.transaction(|store| {
            for (_, wf) in store.workflows.iter_mut() {
                wf.user_override = false;
            }
            Ok(())
        })?;
    }
    Ok(existed)
}

pub fn run_override_cli(config: &Config, cli: OverrideCli) -> Result<(), PhaseGateError> {
    let json_out = cli.format == "json";
    match cli.command {
        OverrideCommand::Status => {
            let tokens = OverrideStore::open(config);
            let store = WorkflowStore::open(config).load()?;
            let active = store.active_workflow.clone();
            let check = match active.as_deref() {
                Some(name) => tokens.check(name, time::now_secs())?,
                None => match tokens.read()? {
                    Some(t) => TokenCheck::WrongWorkflow(t.workflow),
                    None => TokenCheck::Absent,
                },
            };
            if json_out {
                let (state, token) = match &check {
                    TokenCheck::Absent => ("absent", None),
                    TokenCheck::Expired => ("expired", None),
                    TokenCheck::WrongWorkflow(w) => ("other_workflow", Some(json!({ "workflow": w }))),
                    TokenCheck::Valid(t) => ("valid", Some(serde_json::to_value(t)?)),
                };
                let env = time::command_envelope(
                    "override.status",
                    "ok",
                    json!({ "state": state, "token": token, "active_workflow": active }),
                );
                println!("{}", serde_json::to_string_pretty(&env)?);
                return Ok(());
            }
            match check {
                TokenCheck::Absent => println!("{}", "No override token.".dimmed()),
                TokenCheck::Expired => println!("{}", "Override token expired (removed).".yellow()),
                TokenCheck::WrongWorkflow(w) => println!(
                    "{} token is bound to '{}', active workflow is {}",
                    "INACTIVE".yellow().bold(),
                    w,
                    active.as_deref().unwrap_or("(none)")
                ),
                TokenCheck::Valid(t) => println!(
                    "{} override for '{}' granted {} by {}",
                    "ACTIVE".green().bold(),
                    t.workflow,
                    t.created,
                    t.granted_by
                ),
            }
        }
        OverrideCommand::Revoke => {
            let existed = revoke_override(config)?;
            if json_out {
                let env = time::command_envelope(
                    "override.revoke",
                    "ok",
                    json!({ "revoked": existed }),
                );
                println!("{}", serde_json::to_string_pretty(&env)?);
            } else if existed {
                println!("{}", "Override token revoked.".green());
            } else {
                println!("{}", "No override token to revoke.".dimmed());
            }
        }
    }
    Ok(())
}

pub fn run_batch_cli(config: &Config, cli: BatchCli) -> Result<(), PhaseGateError> {
    match cli.command {
        BatchCommand::Status => {
            let tracker = BatchTracker::open(config)?;
            let lock = tracker.current()?;
            let approved = tracker.approved()?;
            if cli.format == "json" {
                let env = time::command_envelope(
                    "batch.status",
                    "ok",
                    json!({
                        "lock": lock,
                        "approved": approved,
                        "window_minutes": config.settings.batch.window_minutes,
                    }),
                );
                println!("{}", serde_json::to_string_pretty(&env)?);
                return Ok(());
            }
            let Some(lock) = lock else {
                println!("{}", "No pending batch.".dimmed());
                return Ok(());
            };
            let state = if approved {
                "APPROVED".green().bold()
            } else {
                "PENDING".yellow().bold()
            };
            println!("{} {} file(s) awaiting validation", state, lock.files.len());
            println!("  files: {}", output::preview_list(&lock.files, 10, ", "));
            println!("  first change: {}", lock.first_change);
            println!("  last change:  {}", lock.last_change);
        }
    }
    Ok(())
}
