//! Rehearse command handler
//!
//! Runs the stack's pipeline on this machine, as if a push to the given
//! branch had arrived through the webhook.

use anyhow::{Result, anyhow, bail};
use colored::*;
use sluice_core::domain::execution::{ActionStatus, PipelineExecution};
use sluice_runner::{CommandMode, LocalActionRunner, PipelineExecutor};
use std::path::Path;
use std::sync::Arc;

use crate::config::Config;

pub async fn rehearse(config: &Config, branch: &str, workdir: &Path, dry_run: bool) -> Result<()> {
    let stack = config.build_stack()?;
    let pipeline = stack
        .pipelines()
        .next()
        .ok_or_else(|| anyhow!("Stack '{}' has no pipeline", stack.name))?;

    let mode = if dry_run {
        CommandMode::DryRun
    } else {
        CommandMode::Execute
    };
    let runner = LocalActionRunner::from_stack(&stack, workdir, mode);
    let executor = PipelineExecutor::new(Arc::new(runner));

    let Some(execution) = executor.on_push(pipeline, branch).await else {
        println!(
            "{}",
            format!(
                "Pipeline {} does not track branch '{}'; nothing to run.",
                pipeline.name, branch
            )
            .yellow()
        );
        return Ok(());
    };

    print_execution(&execution);

    if let Some(failure) = execution.failure() {
        bail!(
            "Pipeline failed at {}/{}: {}",
            failure.stage,
            failure.action,
            failure.error_message.as_deref().unwrap_or("unknown error")
        );
    }

    println!("{}", "✓ Pipeline succeeded".green().bold());
    Ok(())
}

fn print_execution(execution: &PipelineExecution) {
    println!("{}", "Execution:".bold());
    println!("  ID:       {}", execution.id.to_string().cyan());
    println!("  Pipeline: {}", execution.pipeline.bold());
    println!(
        "  Started:  {}",
        execution.started_at.format("%Y-%m-%d %H:%M:%S")
    );
    println!();

    for record in &execution.actions {
        let status = match record.status {
            ActionStatus::Succeeded => "succeeded".green(),
            ActionStatus::Failed => "failed".red().bold(),
            ActionStatus::Skipped => "skipped".dimmed(),
        };
        println!(
            "  {} {}/{} {}",
            "▸".cyan(),
            record.stage,
            record.action,
            status
        );
        if let Some(message) = &record.error_message {
            println!("      {}", message.red());
        }
    }
    println!();
}
