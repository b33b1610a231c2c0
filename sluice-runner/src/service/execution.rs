//! Execution service
//!
//! Drives a pipeline through its stages:
//! - Stages run strictly in declaration order
//! - Within a stage, actions run grouped by ascending run order; actions
//!   sharing a run order run concurrently
//! - The first failure stops the pipeline; later actions are recorded as
//!   skipped and never started
//!
//! What an action actually does is delegated to an [`ActionRunner`].

use anyhow::Result;
use async_trait::async_trait;
use chrono::Utc;
use sluice_core::domain::artifact::Artifact;
use sluice_core::domain::execution::{
    ActionExecution, ActionStatus, ExecutionStatus, PipelineExecution, Trigger,
};
use sluice_core::domain::pipeline::{Action, Pipeline};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Where each artifact lives on disk
pub type ArtifactLocations = BTreeMap<Artifact, PathBuf>;

/// Service trait for running a single pipeline action
#[async_trait]
pub trait ActionRunner: Send + Sync {
    /// Runs one action
    ///
    /// # Arguments
    /// * `stage` - Name of the stage the action belongs to
    /// * `action` - The action definition
    /// * `inputs` - Locations of the action's input artifacts
    ///
    /// # Returns
    /// Locations of the artifacts the action produced
    async fn run_action(
        &self,
        stage: &str,
        action: &Action,
        inputs: &ArtifactLocations,
    ) -> Result<ArtifactLocations>;
}

/// Runs pipelines against an [`ActionRunner`]
#[derive(Clone)]
pub struct PipelineExecutor {
    runner: Arc<dyn ActionRunner>,
}

impl PipelineExecutor {
    pub fn new(runner: Arc<dyn ActionRunner>) -> Self {
        Self { runner }
    }

    /// Whether a push to `branch` triggers the pipeline through a webhook
    pub fn tracks_branch(pipeline: &Pipeline, branch: &str) -> bool {
        pipeline
            .webhook_sources()
            .any(|(_, source)| source.branch == branch)
    }

    /// Handles a push event; pushes to untracked branches start nothing
    pub async fn on_push(&self, pipeline: &Pipeline, branch: &str) -> Option<PipelineExecution> {
        if !Self::tracks_branch(pipeline, branch) {
            info!(
                "Ignoring push to '{}': pipeline '{}' does not track it",
                branch, pipeline.name
            );
            return None;
        }

        let trigger = Trigger::Push {
            branch: branch.to_string(),
        };
        Some(self.execute(pipeline, trigger).await)
    }

    /// Executes every stage in order, stopping at the first failure
    pub async fn execute(&self, pipeline: &Pipeline, trigger: Trigger) -> PipelineExecution {
        let mut execution = PipelineExecution::start(&pipeline.name, trigger);
        info!(
            "Starting execution {} of pipeline '{}'",
            execution.id, pipeline.name
        );

        let mut artifacts = ArtifactLocations::new();
        let mut failed = false;
        let stage_count = pipeline.stages().len();

        for (idx, stage) in pipeline.stages().iter().enumerate() {
            if failed {
                for action in &stage.actions {
                    execution.actions.push(ActionExecution::skipped(
                        &stage.name,
                        &action.name,
                        action.run_order,
                    ));
                }
                continue;
            }

            info!("Executing stage {}/{}: {}", idx + 1, stage_count, stage.name);

            for (run_order, group) in stage.run_groups() {
                if failed {
                    for action in group {
                        execution.actions.push(ActionExecution::skipped(
                            &stage.name,
                            &action.name,
                            run_order,
                        ));
                    }
                    continue;
                }

                let results = self.run_group(&stage.name, &group, &artifacts).await;
                for (record, produced) in results {
                    if record.status == ActionStatus::Failed {
                        failed = true;
                    }
                    if let Some(produced) = produced {
                        artifacts.extend(produced);
                    }
                    execution.actions.push(record);
                }
            }

            if failed {
                error!("Stage '{}' failed; stopping pipeline", stage.name);
            } else {
                info!("Stage '{}' completed", stage.name);
            }
        }

        let status = if failed {
            ExecutionStatus::Failed
        } else {
            ExecutionStatus::Succeeded
        };
        execution.finish(status);
        info!("Execution {} finished: {:?}", execution.id, status);
        execution
    }

    /// Runs all actions of one run order concurrently
    ///
    /// Results come back in the group's order. A failed action does not
    /// cancel its siblings.
    async fn run_group(
        &self,
        stage: &str,
        group: &[&Action],
        artifacts: &ArtifactLocations,
    ) -> Vec<(ActionExecution, Option<ArtifactLocations>)> {
        let handles: Vec<_> = group
            .iter()
            .map(|action| {
                let runner = self.runner.clone();
                let stage = stage.to_string();
                let action = (*action).clone();
                let inputs: ArtifactLocations = action
                    .inputs
                    .iter()
                    .filter_map(|a| artifacts.get(a).map(|p| (a.clone(), p.clone())))
                    .collect();

                tokio::spawn(async move {
                    let started_at = Utc::now();
                    let result = runner.run_action(&stage, &action, &inputs).await;
                    (started_at, Utc::now(), result)
                })
            })
            .collect();

        let mut results = Vec::with_capacity(group.len());
        for (action, handle) in group.iter().zip(handles) {
            let (started_at, completed_at, result) = match handle.await {
                Ok(outcome) => outcome,
                Err(e) => (
                    Utc::now(),
                    Utc::now(),
                    Err(anyhow::anyhow!("Action task aborted: {}", e)),
                ),
            };

            let result = result.and_then(|produced| check_outputs(action, produced));
            let mut record = ActionExecution {
                stage: stage.to_string(),
                action: action.name.clone(),
                run_order: action.run_order,
                status: ActionStatus::Succeeded,
                started_at: Some(started_at),
                completed_at: Some(completed_at),
                error_message: None,
            };

            match result {
                Ok(produced) => {
                    info!("Action '{}' succeeded", action.name);
                    results.push((record, Some(produced)));
                }
                Err(e) => {
                    warn!("Action '{}' failed: {:#}", action.name, e);
                    record.status = ActionStatus::Failed;
                    record.error_message = Some(format!("{:#}", e));
                    results.push((record, None));
                }
            }
        }
        results
    }
}

/// Fails the action if it did not produce every declared output
fn check_outputs(action: &Action, produced: ArtifactLocations) -> Result<ArtifactLocations> {
    for output in &action.outputs {
        if !produced.contains_key(output) {
            anyhow::bail!("Action '{}' did not produce artifact '{}'", action.name, output);
        }
    }
    Ok(produced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use sluice_core::domain::pipeline::{GitHubSource, PipelineBuilder, SourceTrigger};
    use sluice_core::domain::secret::{SecretReference, StaticSecretStore};
    use std::sync::Mutex;
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq)]
    enum Event {
        Start(String),
        End(String),
    }

    /// Records start/end events and fails selected actions
    struct RecordingRunner {
        events: Mutex<Vec<Event>>,
        fail: Vec<String>,
    }

    impl RecordingRunner {
        fn new(fail: &[&str]) -> Arc<Self> {
            Arc::new(Self {
                events: Mutex::new(Vec::new()),
                fail: fail.iter().map(|s| s.to_string()).collect(),
            })
        }

        fn events(&self) -> Vec<Event> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ActionRunner for RecordingRunner {
        async fn run_action(
            &self,
            _stage: &str,
            action: &Action,
            inputs: &ArtifactLocations,
        ) -> Result<ArtifactLocations> {
            self.events
                .lock()
                .unwrap()
                .push(Event::Start(action.name.clone()));

            for input in &action.inputs {
                assert!(inputs.contains_key(input), "missing input {}", input);
            }
            tokio::time::sleep(Duration::from_millis(5)).await;

            self.events
                .lock()
                .unwrap()
                .push(Event::End(action.name.clone()));

            if self.fail.contains(&action.name) {
                anyhow::bail!("{} exited with status 1", action.name);
            }
            Ok(action
                .outputs
                .iter()
                .map(|o| (o.clone(), PathBuf::from(format!("/artifacts/{}", o))))
                .collect())
        }
    }

    fn source() -> Action {
        let store = StaticSecretStore::new().with_secret("T", json!({"T": "x"}));
        let token = SecretReference::new("T", "T").resolve(&store).unwrap();
        Action::github_source(
            "GitHub_Source",
            GitHubSource {
                owner: "octo".into(),
                repo: "repo".into(),
                branch: "main".into(),
                oauth_token: token,
                trigger: SourceTrigger::Webhook,
            },
            Artifact::new("SourceOutput"),
        )
    }

    fn pipeline() -> Pipeline {
        let mut builder = PipelineBuilder::new("P", "Pipeline", "Role", "Bucket");
        builder
            .add_stage("Source", vec![source()])
            .unwrap()
            .add_stage(
                "Build",
                vec![
                    Action::code_build("Lint", "P", Artifact::new("SourceOutput")),
                    Action::code_build("Build", "P", Artifact::new("SourceOutput"))
                        .with_outputs(vec![Artifact::new("BuildOutput")]),
                    Action::code_build("Package", "P", Artifact::new("BuildOutput"))
                        .with_run_order(2),
                ],
            )
            .unwrap()
            .add_stage(
                "Deploy",
                vec![Action::code_build("CDK_Deploy", "P", Artifact::new("BuildOutput"))],
            )
            .unwrap();
        builder.build().unwrap()
    }

    fn position(events: &[Event], event: Event) -> usize {
        events.iter().position(|e| *e == event).unwrap()
    }

    #[tokio::test]
    async fn test_stages_run_in_order() {
        let runner = RecordingRunner::new(&[]);
        let executor = PipelineExecutor::new(runner.clone());
        let pipeline = pipeline();

        let execution = executor.execute(&pipeline, Trigger::Manual).await;
        assert!(execution.succeeded());
        assert_eq!(execution.actions.len(), 5);

        let events = runner.events();
        let source_end = position(&events, Event::End("GitHub_Source".into()));
        let lint_end = position(&events, Event::End("Lint".into()));
        let build_end = position(&events, Event::End("Build".into()));
        let package_start = position(&events, Event::Start("Package".into()));
        let package_end = position(&events, Event::End("Package".into()));
        let deploy_start = position(&events, Event::Start("CDK_Deploy".into()));

        assert!(source_end < position(&events, Event::Start("Build".into())));
        assert!(source_end < position(&events, Event::Start("Lint".into())));
        assert!(lint_end < package_start && build_end < package_start);
        assert!(package_end < deploy_start);
    }

    #[tokio::test]
    async fn test_failure_stops_pipeline() {
        let runner = RecordingRunner::new(&["Build"]);
        let executor = PipelineExecutor::new(runner.clone());

        let execution = executor.execute(&pipeline(), Trigger::Manual).await;
        assert_eq!(execution.status, ExecutionStatus::Failed);

        let failure = execution.failure().unwrap();
        assert_eq!(failure.action, "Build");
        assert!(failure.error_message.as_ref().unwrap().contains("status 1"));

        // Sibling in the same run order still completes
        assert_eq!(execution.action("Build", "Lint").unwrap().status, ActionStatus::Succeeded);
        for (stage, action) in [("Build", "Package"), ("Deploy", "CDK_Deploy")] {
            let record = execution.action(stage, action).unwrap();
            assert_eq!(record.status, ActionStatus::Skipped);
            assert!(record.started_at.is_none());
        }

        let events = runner.events();
        assert!(!events.contains(&Event::Start("Package".into())));
        assert!(!events.contains(&Event::Start("CDK_Deploy".into())));
    }

    #[tokio::test]
    async fn test_same_run_order_runs_concurrently() {
        struct BarrierRunner {
            barrier: tokio::sync::Barrier,
        }

        #[async_trait]
        impl ActionRunner for BarrierRunner {
            async fn run_action(
                &self,
                stage: &str,
                action: &Action,
                _inputs: &ArtifactLocations,
            ) -> Result<ArtifactLocations> {
                if stage == "Build" && action.run_order == 1 {
                    // Both run-order-1 build actions must be in flight at once
                    self.barrier.wait().await;
                }
                Ok(action
                    .outputs
                    .iter()
                    .map(|o| (o.clone(), PathBuf::from("/tmp")))
                    .collect())
            }
        }

        let executor = PipelineExecutor::new(Arc::new(BarrierRunner {
            barrier: tokio::sync::Barrier::new(2),
        }));
        let pipeline = pipeline();

        let execution = tokio::time::timeout(
            Duration::from_secs(5),
            executor.execute(&pipeline, Trigger::Manual),
        )
        .await
        .expect("run-order group did not run concurrently");
        assert!(execution.succeeded());
    }

    #[tokio::test]
    async fn test_missing_declared_output_fails() {
        struct NoOutputRunner;

        #[async_trait]
        impl ActionRunner for NoOutputRunner {
            async fn run_action(
                &self,
                _stage: &str,
                _action: &Action,
                _inputs: &ArtifactLocations,
            ) -> Result<ArtifactLocations> {
                Ok(ArtifactLocations::new())
            }
        }

        let executor = PipelineExecutor::new(Arc::new(NoOutputRunner));
        let execution = executor.execute(&pipeline(), Trigger::Manual).await;

        let failure = execution.failure().unwrap();
        assert_eq!(failure.action, "GitHub_Source");
        assert!(failure.error_message.as_ref().unwrap().contains("SourceOutput"));
    }

    #[tokio::test]
    async fn test_push_to_untracked_branch_ignored() {
        let runner = RecordingRunner::new(&[]);
        let executor = PipelineExecutor::new(runner.clone());
        let pipeline = pipeline();

        assert!(executor.on_push(&pipeline, "feature").await.is_none());
        assert!(runner.events().is_empty());

        let execution = executor.on_push(&pipeline, "main").await.unwrap();
        assert_eq!(
            execution.trigger,
            Trigger::Push {
                branch: "main".into()
            }
        );
        assert!(execution.succeeded());
    }
}
