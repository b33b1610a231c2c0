//! Buildspec execution
//!
//! Runs the commands of a buildspec phase by phase in the given working
//! directory. All commands of one phase share a single `sh` session, so
//! directory changes and exported variables persist until the phase ends.
//! The first command exiting non-zero stops the build; nothing after it
//! runs.

use anyhow::{Context, Result};
use sluice_core::domain::buildspec::{BuildSpec, PhaseName};
use std::collections::BTreeMap;
use std::path::Path;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Whether commands are actually run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandMode {
    Execute,
    /// Log each command without running it
    DryRun,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandRecord {
    pub phase: PhaseName,
    pub command: String,
    /// `None` in dry-run mode, or when the process was killed by a signal
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseFailure {
    pub phase: PhaseName,
    pub command: String,
    pub exit_code: Option<i32>,
}

/// Outcome of one buildspec run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildReport {
    pub commands: Vec<CommandRecord>,
    pub failure: Option<PhaseFailure>,
}

impl BuildReport {
    pub fn success(&self) -> bool {
        self.failure.is_none()
    }
}

pub struct BuildSpecExecutor {
    mode: CommandMode,
    env: BTreeMap<String, String>,
}

impl BuildSpecExecutor {
    pub fn new(mode: CommandMode) -> Self {
        Self {
            mode,
            env: BTreeMap::new(),
        }
    }

    /// Extra environment variables for every command
    pub fn with_env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env.extend(env);
        self
    }

    /// Runs the buildspec's phases in execution order
    ///
    /// A failing command is reported in the returned [`BuildReport`]; `Err`
    /// means a command could not be started at all.
    pub async fn run(&self, spec: &BuildSpec, workdir: &Path) -> Result<BuildReport> {
        let mut report = BuildReport::default();

        for (phase_name, phase) in spec.ordered_phases() {
            info!("Entering phase {}", phase_name.as_str());
            for (runtime, version) in &phase.runtime_versions {
                debug!("Runtime {} {} requested", runtime, version);
            }

            let exit_codes = match self.mode {
                CommandMode::DryRun => {
                    for command in &phase.commands {
                        info!("[dry-run] {}", command);
                    }
                    vec![None; phase.commands.len()]
                }
                CommandMode::Execute => self.run_phase(&phase.commands, workdir).await?,
            };

            for (command, exit_code) in phase.commands.iter().zip(exit_codes) {
                report.commands.push(CommandRecord {
                    phase: phase_name,
                    command: command.clone(),
                    exit_code,
                });

                let failed = self.mode == CommandMode::Execute && exit_code != Some(0);
                if failed {
                    warn!(
                        "Command failed in phase {}: '{}' (exit code {:?})",
                        phase_name.as_str(),
                        command,
                        exit_code
                    );
                    report.failure = Some(PhaseFailure {
                        phase: phase_name,
                        command: command.clone(),
                        exit_code,
                    });
                    return Ok(report);
                }
            }
        }

        Ok(report)
    }

    /// Runs a phase's commands in one `sh` session
    ///
    /// `cd` and `export` carry over between commands of the same phase.
    /// Returns one exit code per command that ran; the session stops after
    /// the first non-zero exit.
    async fn run_phase(&self, commands: &[String], workdir: &Path) -> Result<Vec<Option<i32>>> {
        if commands.is_empty() {
            return Ok(Vec::new());
        }
        for command in commands {
            debug!("Queued: {}", command);
        }

        let output = Command::new("sh")
            .arg("-c")
            .arg(phase_script(commands))
            .current_dir(workdir)
            .envs(&self.env)
            .output()
            .await
            .context("Failed to spawn sh")?;

        let mut exit_codes = Vec::with_capacity(commands.len());
        for line in String::from_utf8_lossy(&output.stdout).lines() {
            match line.find(EXIT_MARKER) {
                Some(pos) => {
                    if pos > 0 {
                        info!("{}", &line[..pos]);
                    }
                    let code = line[pos + EXIT_MARKER.len()..]
                        .split_whitespace()
                        .nth(1)
                        .and_then(|c| c.parse().ok());
                    exit_codes.push(code);
                }
                None => info!("{}", line),
            }
        }
        for line in String::from_utf8_lossy(&output.stderr).lines() {
            warn!("{}", line);
        }

        // The session ended inside a command, e.g. through `exit`
        let last_succeeded = exit_codes.last().is_none_or(|code| *code == Some(0));
        if exit_codes.len() < commands.len() && last_succeeded {
            exit_codes.push(output.status.code());
        }
        Ok(exit_codes)
    }
}

const EXIT_MARKER: &str = "__sluice_exit__";

/// Shell script reporting each command's exit status on stdout
fn phase_script(commands: &[String]) -> String {
    let mut script = String::new();
    for (idx, command) in commands.iter().enumerate() {
        script.push_str(&format!(
            "{{\n{command}\n}}\n__sluice_rc=$?\nprintf '%s %s %s\\n' '{EXIT_MARKER}' {idx} \"$__sluice_rc\"\n[ \"$__sluice_rc\" -eq 0 ] || exit \"$__sluice_rc\"\n"
        ));
    }
    script
}
