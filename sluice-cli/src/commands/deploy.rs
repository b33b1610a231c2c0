//! Deploy command handlers
//!
//! Plans and applies the synthesized template against a deployment state
//! file. A missing state file means nothing has been deployed yet.

use anyhow::{Context, Result};
use clap::Subcommand;
use colored::*;
use sluice_core::deploy::{self, ChangeAction, ChangeSet, DeploymentState};
use std::path::{Path, PathBuf};

use crate::config::Config;

/// Deploy subcommands
#[derive(Subcommand)]
pub enum DeployCommands {
    /// Show what deploying the current stack would change
    Plan {
        /// Deployment state file
        #[arg(short, long)]
        state: PathBuf,
    },
    /// Deploy the current stack and record the new state
    Apply {
        /// Deployment state file
        #[arg(short, long)]
        state: PathBuf,
    },
}

/// Handle deploy commands
///
/// # Arguments
/// * `command` - The deploy command to execute
/// * `config` - The CLI configuration
pub fn handle_deploy_command(command: DeployCommands, config: &Config) -> Result<()> {
    let stack = config.build_stack()?;
    let template = stack.synthesize().context("Failed to synthesize stack")?;

    match command {
        DeployCommands::Plan { state } => {
            let current = load_state(&state, &stack.name)?;
            let changes = deploy::plan(&current, &template);
            print_change_set(&changes);
            Ok(())
        }
        DeployCommands::Apply { state } => {
            let current = load_state(&state, &stack.name)?;
            let (next, changes) = deploy::apply(&current, &template);
            save_state(&state, &next)?;
            print_change_set(&changes);
            println!(
                "{}",
                format!("✓ Stack {} deployed", stack.name).green().bold()
            );
            Ok(())
        }
    }
}

/// Reads the state file, or an empty state when it does not exist
fn load_state(path: &Path, stack_name: &str) -> Result<DeploymentState> {
    if !path.exists() {
        return Ok(DeploymentState::empty(stack_name));
    }
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read state file {}", path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse state file {}", path.display()))
}

fn save_state(path: &Path, state: &DeploymentState) -> Result<()> {
    let json = serde_json::to_string_pretty(state).context("Failed to serialize state")?;
    std::fs::write(path, json)
        .with_context(|| format!("Failed to write state file {}", path.display()))
}

fn print_change_set(changes: &ChangeSet) {
    if changes.is_empty() {
        println!("{}", "No changes.".yellow());
        return;
    }

    println!(
        "{}",
        format!("{} change(s):", changes.changes.len()).bold()
    );
    for change in &changes.changes {
        let action = match change.action {
            ChangeAction::Create => change.action.to_string().green(),
            ChangeAction::Update => change.action.to_string().yellow(),
            ChangeAction::Replace => change.action.to_string().magenta(),
            ChangeAction::Delete => change.action.to_string().red(),
        };
        println!(
            "  {:<8} {} {}",
            action,
            change.logical_id.bold(),
            change.resource_type.dimmed()
        );
    }

    if !changes.uploads.is_empty() {
        println!("{}", "Uploads:".bold());
        for key in &changes.uploads {
            println!("  {} {}", "↑".cyan(), key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sluice_core::deploy::DeployedResource;

    #[test]
    fn test_missing_state_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let state = load_state(&dir.path().join("state.json"), "Stack").unwrap();
        assert_eq!(state, DeploymentState::empty("Stack"));
    }

    #[test]
    fn test_state_round_trips_through_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = DeploymentState::empty("Stack");
        state.resources.insert(
            "GlueETLJob".into(),
            DeployedResource {
                resource_type: "AWS::Glue::Job".into(),
                fingerprint: "abc".into(),
            },
        );
        state.assets.insert("abc.py".into());

        save_state(&path, &state).unwrap();
        assert_eq!(load_state(&path, "Other").unwrap(), state);
    }

    #[test]
    fn test_corrupt_state_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{").unwrap();
        assert!(load_state(&path, "Stack").is_err());
    }
}
