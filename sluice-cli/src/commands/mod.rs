//! Commands module
//!
//! Defines all CLI commands and their handlers.

mod deploy;
mod rehearse;
mod stack;

pub use deploy::DeployCommands;

use anyhow::Result;
use clap::Subcommand;
use std::path::PathBuf;

use crate::config::Config;

/// Top-level CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Synthesize the stack template and asset manifest
    Synth {
        /// Write the template to a file instead of stdout
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Assemble the stack and report its shape and warnings
    Validate,
    /// Print a build project's inline buildspec
    Buildspec {
        /// Logical id of the build project
        project: String,
    },
    /// Deployment state management
    #[command(flatten)]
    Deploy(DeployCommands),
    /// Run the pipeline locally for a push to a branch
    Rehearse {
        /// Branch the push goes to
        #[arg(short, long)]
        branch: String,

        /// Local checkout used as the source artifact
        #[arg(short, long, default_value = ".")]
        workdir: PathBuf,

        /// Log commands without running them
        #[arg(long)]
        dry_run: bool,
    },
}

/// Handle a CLI command
///
/// Routes the command to the appropriate handler module.
///
/// # Arguments
/// * `command` - The command to execute
/// * `config` - The CLI configuration
///
/// # Returns
/// Result indicating success or failure
pub async fn handle_command(command: Commands, config: &Config) -> Result<()> {
    match command {
        Commands::Synth { out } => stack::synth(config, out.as_deref()),
        Commands::Validate => stack::validate(config),
        Commands::Buildspec { project } => stack::print_build_spec(config, &project),
        Commands::Deploy(command) => deploy::handle_deploy_command(command, config),
        Commands::Rehearse {
            branch,
            workdir,
            dry_run,
        } => rehearse::rehearse(config, &branch, &workdir, dry_run).await,
    }
}
