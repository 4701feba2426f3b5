//! CLI struct definitions for the phasegate command-line interface.
//!
//! All clap-derived types live here. Dispatch lives in `lib.rs`.

use crate::plugins::{approval, hooks, workflow};

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[clap(
    name = "phasegate",
    version = env!("CARGO_PKG_VERSION"),
    about = "Workflow phase gate for AI code-editing agents: no code before an approved spec and a failing test.",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    #[clap(subcommand)]
    pub command: Command,
}

#[derive(clap::Args, Debug)]
pub(crate) struct InitCli {
    /// Project root to initialize (defaults to the discovered root).
    #[clap(short, long)]
    pub dir: Option<PathBuf>,
    /// Overwrite an existing phasegate.toml.
    #[clap(long)]
    pub force: bool,
}

#[derive(clap::Args, Debug)]
pub(crate) struct ConfigCli {
    #[clap(subcommand)]
    pub command: ConfigCommand,
}

#[derive(Subcommand, Debug)]
pub(crate) enum ConfigCommand {
    /// Print the merged configuration.
    Show {
        /// Output format: 'toml' or 'json'.
        #[clap(long, default_value = "toml")]
        format: String,
    },
    /// Print the resolved project root and state paths.
    Paths,
}

#[derive(Subcommand, Debug)]
pub(crate) enum Command {
    /// Hook entry points (exit 0 allows, 2 blocks)
    Hook(hooks::HookCli),

    /// Workflow lifecycle and evidence
    Workflow(workflow::WorkflowCli),

    /// Human override token
    Override(approval::OverrideCli),

    /// Batch validation lock
    Batch(approval::BatchCli),

    /// Configuration
    Config(ConfigCli),

    /// Write a default phasegate.toml and create the state directory
    Init(InitCli),

    /// Print the version
    Version,
}
