//! Local action runner
//!
//! Rehearses a pipeline on the local machine:
//! - Source actions hand out the local workspace as their output artifact
//! - Build actions run their project's buildspec in the input artifact
//!   directory; projects without an inline spec read `buildspec.yml` from
//!   that directory

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use sluice_core::domain::buildspec::BuildSpec;
use sluice_core::domain::pipeline::{Action, ActionKind};
use sluice_core::domain::project::{BuildProject, BuildSpecSource, EnvValue, SOURCE_BUILDSPEC_FILE};
use sluice_core::stack::Stack;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::execution::{ActionRunner, ArtifactLocations};
use super::phases::{BuildSpecExecutor, CommandMode};

pub struct LocalActionRunner {
    workspace: PathBuf,
    projects: BTreeMap<String, BuildProject>,
    mode: CommandMode,
}

impl LocalActionRunner {
    pub fn new(
        workspace: impl Into<PathBuf>,
        projects: impl IntoIterator<Item = BuildProject>,
        mode: CommandMode,
    ) -> Self {
        Self {
            workspace: workspace.into(),
            projects: projects
                .into_iter()
                .map(|p| (p.logical_id.clone(), p))
                .collect(),
            mode,
        }
    }

    /// Runner for every build project referenced by the stack's pipelines
    pub fn from_stack(stack: &Stack, workspace: impl Into<PathBuf>, mode: CommandMode) -> Self {
        let projects: Vec<BuildProject> = stack
            .pipelines()
            .flat_map(|p| p.build_projects())
            .filter_map(|id| stack.build_project(id).cloned())
            .collect();
        Self::new(workspace, projects, mode)
    }

    fn load_build_spec(project: &BuildProject, input_dir: &Path) -> Result<BuildSpec> {
        match &project.build_spec {
            BuildSpecSource::Inline(spec) => Ok(spec.clone()),
            BuildSpecSource::FromSource => {
                let path = input_dir.join(SOURCE_BUILDSPEC_FILE);
                let content = std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                serde_yaml::from_str(&content)
                    .with_context(|| format!("Failed to parse {}", path.display()))
            }
        }
    }

    /// Environment for a project's commands
    ///
    /// Deferred values only exist once deployed; they are taken from the
    /// process environment when set there.
    fn build_env(project: &BuildProject) -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        for (name, value) in &project.environment.variables {
            match value {
                EnvValue::Literal(literal) => {
                    env.insert(name.clone(), literal.clone());
                }
                EnvValue::Deferred(_) => match std::env::var(name) {
                    Ok(local) => {
                        env.insert(name.clone(), local);
                    }
                    Err(_) => warn!(
                        "{} resolves at deploy time and is not set locally",
                        name
                    ),
                },
            }
        }
        env
    }

    async fn run_build(
        &self,
        action: &Action,
        project_id: &str,
        inputs: &ArtifactLocations,
    ) -> Result<ArtifactLocations> {
        let project = self
            .projects
            .get(project_id)
            .ok_or_else(|| anyhow!("Unknown build project '{}'", project_id))?;

        let primary = action
            .inputs
            .first()
            .ok_or_else(|| anyhow!("Action '{}' has no input artifact", action.name))?;
        let input_dir = inputs
            .get(primary)
            .ok_or_else(|| anyhow!("Input artifact '{}' is not available", primary))?;

        let spec = Self::load_build_spec(project, input_dir)?;
        info!(
            "Running project '{}' ({} command(s)) in {}",
            project_id,
            spec.command_count(),
            input_dir.display()
        );

        let report = BuildSpecExecutor::new(self.mode)
            .with_env(Self::build_env(project))
            .run(&spec, input_dir)
            .await?;

        if let Some(failure) = report.failure {
            bail!(
                "Command '{}' failed in phase {} with exit code {:?}",
                failure.command,
                failure.phase.as_str(),
                failure.exit_code
            );
        }

        Ok(action
            .outputs
            .iter()
            .map(|o| (o.clone(), input_dir.clone()))
            .collect())
    }
}

#[async_trait]
impl ActionRunner for LocalActionRunner {
    async fn run_action(
        &self,
        stage: &str,
        action: &Action,
        inputs: &ArtifactLocations,
    ) -> Result<ArtifactLocations> {
        info!("[{}] {}", stage, action.name);
        match &action.kind {
            ActionKind::GitHubSource(source) => {
                info!(
                    "Using {} as checkout of {}/{}@{}",
                    self.workspace.display(),
                    source.owner,
                    source.repo,
                    source.branch
                );
                Ok(action
                    .outputs
                    .iter()
                    .map(|o| (o.clone(), self.workspace.clone()))
                    .collect())
            }
            ActionKind::CodeBuild { project } => self.run_build(action, project, inputs).await,
        }
    }
}
