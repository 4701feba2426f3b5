//! phasegate: a workflow phase gate for AI code-editing agents.
//!
//! The agent host calls `phasegate hook <name>` before tool use. Each call is
//! one short-lived process that loads the shared JSON state from the
//! project's state directory, decides, and exits `0` (allow) or `2` (block,
//! explanation on stderr).
//!
//! # Workflow
//!
//! Every feature moves through nine phases:
//!
//! ```text
//! phase0_idle -> phase1_context -> phase2_analyse -> phase3_spec
//!   -> phase4_approved -> phase5_tdd_red -> phase6_implement
//!   -> phase7_validate -> phase8_complete
//! ```
//!
//! Code files stay closed until the user has approved a spec and a failing
//! test has been captured. Several workflows can run side by side; a file
//! belongs to the workflow whose `affected_files` claim it.
//!
//! # Human-only approvals
//!
//! Spec approval, override tokens and batch validation are created only by
//! the prompt hook from text the user typed. Guards block any tool or shell
//! access to the files that record them.
//!
//! # Crate Structure
//!
//! - [`core`]: state, policy and evaluation (store, resolver, phases, gate)
//! - [`plugins`]: hook entry points and CLI commands

pub mod core;
pub mod plugins;

mod cli;

use crate::cli::{Cli, Command, ConfigCommand, InitCli};
use crate::core::config::{self, Config};
use crate::core::error::PhaseGateError;
use crate::plugins::{approval, hooks, workflow};

use clap::Parser;
use colored::Colorize;
use serde_json::json;
use std::fs;

/// Parse the command line and run it. Returns the process exit code.
pub fn run() -> Result<i32, PhaseGateError> {
    // clap's own exit code for usage errors is 2, which the host reads as a block.
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            e.print()?;
            return Ok(if e.use_stderr() { 1 } else { 0 });
        }
    };

    match cli.command {
        Command::Version => {
            println!("v{}", env!("CARGO_PKG_VERSION"));
            Ok(0)
        }
        Command::Init(init) => {
            run_init(init)?;
            Ok(0)
        }
        Command::Hook(hook_cli) => {
            let root = config::find_project_root()?;
            let outcome = match Config::load(&root) {
                Ok(config) => hooks::run_hook_cli(&config, hook_cli)?,
                Err(e) => hooks::run_without_config(&root, hook_cli, &e),
            };
            for line in &outcome.notices {
                println!("{}", line);
            }
            if let Some(message) = &outcome.message {
                eprintln!("{}", message);
            }
            Ok(outcome.exit_code)
        }
        Command::Workflow(wf_cli) => {
            let config = Config::discover()?;
            workflow::run_workflow_cli(&config, wf_cli)?;
            Ok(0)
        }
        Command::Override(override_cli) => {
            let config = Config::discover()?;
            approval::run_override_cli(&config, override_cli)?;
            Ok(0)
        }
        Command::Batch(batch_cli) => {
            let config = Config::discover()?;
            approval::run_batch_cli(&config, batch_cli)?;
            Ok(0)
        }
        Command::Config(config_cli) => {
            let config = Config::discover()?;
            match config_cli.command {
                ConfigCommand::Show { format } => {
                    if format == "json" {
                        println!("{}", serde_json::to_string_pretty(&config.settings)?);
                    } else {
                        let text = toml::to_string_pretty(&config.settings)
                            .map_err(|e| PhaseGateError::ConfigError(e.to_string()))?;
                        print!("{}", text);
                    }
                }
                ConfigCommand::Paths => {
                    let paths = json!({
                        "root": config.root,
                        "state_dir": config.state_dir(),
                        "workflow_state": config.store_path(),
                        "override_token": config.token_path(),
                        "batch_lock": config.lock_path(),
                        "batch_marker": config.marker_path(),
                        "events": config.events_path(),
                    });
                    println!("{}", serde_json::to_string_pretty(&paths)?);
                }
            }
            Ok(0)
        }
    }
}

fn run_init(init: InitCli) -> Result<(), PhaseGateError> {
    let root = match init.dir {
        Some(dir) => dir,
        None => config::find_project_root()?,
    };
    let config_path = root.join("phasegate.toml");
    if config_path.exists() && !init.force {
        println!(
            "{} {} (use --force to overwrite)",
            "exists".yellow(),
            config_path.display()
        );
    } else {
        fs::create_dir_all(&root)?;
        fs::write(&config_path, config::default_config_text()?)?;
        println!("{} {}", "wrote".green(), config_path.display());
    }

    let config = Config::load(&root)?;
    fs::create_dir_all(config.state_dir())?;
    println!("{} {}", "state".green(), config.state_dir().display());

    println!();
    println!("Register the hooks with your agent host, for example in .claude/settings.json:");
    println!("{}", serde_json::to_string_pretty(&hook_settings())?);
    Ok(())
}

/// Host hook registration covering every entry point.
pub fn hook_settings() -> serde_json::Value {
    let command = |name: &str| json!({ "type": "command", "command": format!("phasegate hook {}", name) });
    json!({
        "hooks": {
            "PreToolUse": [
                {
                    "matcher": "Edit|Write|MultiEdit|NotebookEdit",
                    "hooks": [command("guard-write"), command("gate"), command("batch")]
                },
                {
                    "matcher": "Bash",
                    "hooks": [command("guard-bash"), command("pre-commit")]
                }
            ],
            "UserPromptSubmit": [
                { "hooks": [command("prompt")] }
            ]
        }
    })
}
