//! Stack command handlers
//!
//! Synthesis, validation and buildspec inspection.

use anyhow::{Context, Result, anyhow};
use colored::*;
use sluice_core::domain::pipeline::ActionKind;
use std::path::Path;

use crate::config::Config;

/// Synthesize the template, to a file or stdout
pub fn synth(config: &Config, out: Option<&Path>) -> Result<()> {
    let stack = config.build_stack()?;
    let template = stack.synthesize().context("Failed to synthesize stack")?;
    let json = template.to_json_pretty();

    match out {
        Some(path) => {
            std::fs::write(path, &json)
                .with_context(|| format!("Failed to write {}", path.display()))?;
            println!("{}", "✓ Stack synthesized successfully!".green().bold());
            println!("  Stack:     {}", stack.name.bold());
            println!("  Resources: {}", template.resources.len().to_string().cyan());
            println!("  Assets:    {}", template.assets.len().to_string().cyan());
            println!("  Template:  {}", path.display().to_string().dimmed());
        }
        None => println!("{}", json),
    }

    Ok(())
}

/// Assemble the stack and print its pipeline, roles and warnings
pub fn validate(config: &Config) -> Result<()> {
    let stack = config.build_stack()?;
    stack.validate().context("Stack validation failed")?;

    println!("{}", "✓ Stack is valid".green().bold());
    println!("  Stack: {}", stack.name.bold());

    for pipeline in stack.pipelines() {
        println!();
        println!("{} {}", "Pipeline:".bold(), pipeline.name.cyan());
        for (idx, stage) in pipeline.stages().iter().enumerate() {
            println!("  {}. {}", idx + 1, stage.name.bold());
            for action in &stage.actions {
                let detail = match &action.kind {
                    ActionKind::GitHubSource(source) => {
                        format!("{}/{}@{}", source.owner, source.repo, source.branch)
                    }
                    ActionKind::CodeBuild { project } => format!("project {}", project),
                };
                println!(
                    "     {} {} [{}] {}",
                    "▸".cyan(),
                    action.name,
                    action.run_order,
                    detail.dimmed()
                );
            }
        }
    }

    println!();
    println!("{}", "Roles:".bold());
    let mut warnings = 0;
    for role in stack.roles() {
        let policies: Vec<&str> = role.managed_policies().iter().map(|p| p.name()).collect();
        println!(
            "  {} {}",
            role.logical_id.bold(),
            policies.join(", ").dimmed()
        );
        if role.is_over_granted() {
            warnings += 1;
            println!(
                "    {}",
                "⚠ administrative access; consider narrowing".yellow()
            );
        }
    }

    if warnings > 0 {
        println!();
        println!(
            "{}",
            format!("{} warning(s)", warnings).yellow().bold()
        );
    }

    Ok(())
}

/// Print a build project's inline buildspec as JSON
pub fn print_build_spec(config: &Config, project_id: &str) -> Result<()> {
    let stack = config.build_stack()?;
    let project = stack
        .build_project(project_id)
        .ok_or_else(|| anyhow!("No build project '{}' in stack", project_id))?;

    match project.inline_spec() {
        Some(spec) => println!("{}", spec.to_json_pretty()),
        None => println!(
            "{}",
            format!(
                "Project '{}' reads buildspec.yml from its source artifact",
                project_id
            )
            .yellow()
        ),
    }

    Ok(())
}
