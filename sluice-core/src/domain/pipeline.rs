//! Pipeline domain types
//!
//! A pipeline is an ordered list of stages; each stage holds actions ordered
//! by run order. [`PipelineBuilder`] enforces the wiring rules at
//! construction time so that a built [`Pipeline`] is always runnable:
//! every consumed artifact has an upstream producer and source actions sit
//! alone in the first stage.

use serde_json::{Value as JsonValue, json};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

use crate::domain::artifact::Artifact;
use crate::domain::iam::{PolicyStatement, Role};
use crate::domain::secret::SecretValue;
use crate::error::{Result, SynthError};
use crate::stack::{Construct, Reference, ResourceKind, StackEnv, arn_of, ref_to};

pub const MIN_RUN_ORDER: u32 = 1;
pub const MAX_RUN_ORDER: u32 = 999;

/// How a source action learns about new commits
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceTrigger {
    /// Push events delivered by a registered webhook
    Webhook,
    /// The pipeline engine polls the repository
    Poll,
    /// Only manual releases
    None,
}

/// GitHub repository tracked by a source action
#[derive(Debug, Clone)]
pub struct GitHubSource {
    pub owner: String,
    pub repo: String,
    pub branch: String,
    pub oauth_token: SecretValue,
    pub trigger: SourceTrigger,
}

#[derive(Debug, Clone)]
pub enum ActionKind {
    GitHubSource(GitHubSource),
    /// Runs the build project with the given logical id
    CodeBuild { project: String },
}

/// One unit of work inside a stage
#[derive(Debug, Clone)]
pub struct Action {
    pub name: String,
    pub kind: ActionKind,
    pub inputs: Vec<Artifact>,
    pub outputs: Vec<Artifact>,
    pub run_order: u32,
    /// Role assumed by the pipeline to run this action
    pub role: Option<String>,
}

impl Action {
    pub fn github_source(name: impl Into<String>, source: GitHubSource, output: Artifact) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::GitHubSource(source),
            inputs: Vec::new(),
            outputs: vec![output],
            run_order: MIN_RUN_ORDER,
            role: None,
        }
    }

    pub fn code_build(name: impl Into<String>, project: impl Into<String>, input: Artifact) -> Self {
        Self {
            name: name.into(),
            kind: ActionKind::CodeBuild {
                project: project.into(),
            },
            inputs: vec![input],
            outputs: Vec::new(),
            run_order: MIN_RUN_ORDER,
            role: None,
        }
    }

    pub fn with_outputs(mut self, outputs: Vec<Artifact>) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_run_order(mut self, run_order: u32) -> Self {
        self.run_order = run_order;
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn is_source(&self) -> bool {
        matches!(self.kind, ActionKind::GitHubSource(_))
    }

    fn render(&self) -> JsonValue {
        let (type_id, configuration) = match &self.kind {
            ActionKind::GitHubSource(source) => (
                json!({
                    "Category": "Source",
                    "Owner": "ThirdParty",
                    "Provider": "GitHub",
                    "Version": "1",
                }),
                json!({
                    "Owner": source.owner,
                    "Repo": source.repo,
                    "Branch": source.branch,
                    "OAuthToken": source.oauth_token.dynamic_reference(),
                    "PollForSourceChanges": source.trigger == SourceTrigger::Poll,
                }),
            ),
            ActionKind::CodeBuild { project } => (
                json!({
                    "Category": "Build",
                    "Owner": "AWS",
                    "Provider": "CodeBuild",
                    "Version": "1",
                }),
                json!({ "ProjectName": ref_to(project) }),
            ),
        };

        let mut action = json!({
            "Name": self.name,
            "ActionTypeId": type_id,
            "Configuration": configuration,
            "RunOrder": self.run_order,
        });

        if !self.inputs.is_empty() {
            action["InputArtifacts"] = artifact_list(&self.inputs);
        }
        if !self.outputs.is_empty() {
            action["OutputArtifacts"] = artifact_list(&self.outputs);
        }
        if let Some(role) = &self.role {
            action["RoleArn"] = arn_of(role);
        }

        action
    }
}

fn artifact_list(artifacts: &[Artifact]) -> JsonValue {
    JsonValue::Array(
        artifacts
            .iter()
            .map(|a| json!({ "Name": a.name() }))
            .collect(),
    )
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub name: String,
    pub actions: Vec<Action>,
}

impl Stage {
    /// Actions grouped by ascending run order
    ///
    /// Actions sharing a run order may run concurrently; groups run one
    /// after another.
    pub fn run_groups(&self) -> Vec<(u32, Vec<&Action>)> {
        let mut groups: BTreeMap<u32, Vec<&Action>> = BTreeMap::new();
        for action in &self.actions {
            groups.entry(action.run_order).or_default().push(action);
        }
        groups.into_iter().collect()
    }
}

/// Validated pipeline definition
#[derive(Debug, Clone)]
pub struct Pipeline {
    pub logical_id: String,
    pub name: String,
    pub role: String,
    pub artifact_store: String,
    stages: Vec<Stage>,
}

impl Pipeline {
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    pub fn stage(&self, name: &str) -> Option<&Stage> {
        self.stages.iter().find(|s| s.name == name)
    }

    pub fn actions(&self) -> impl Iterator<Item = (&Stage, &Action)> {
        self.stages
            .iter()
            .flat_map(|stage| stage.actions.iter().map(move |action| (stage, action)))
    }

    /// GitHub sources whose pushes start the pipeline
    pub fn webhook_sources(&self) -> impl Iterator<Item = (&Action, &GitHubSource)> {
        self.actions().filter_map(|(_, action)| match &action.kind {
            ActionKind::GitHubSource(source) if source.trigger == SourceTrigger::Webhook => {
                Some((action, source))
            }
            _ => None,
        })
    }

    /// Webhooks registered with the source host, one per webhook-triggered source
    pub fn webhooks(&self) -> Vec<Webhook> {
        self.webhook_sources()
            .map(|(action, source)| Webhook {
                logical_id: format!("{}{}Webhook", self.logical_id, alphanumeric(&action.name)),
                pipeline: self.logical_id.clone(),
                target_action: action.name.clone(),
                branch: source.branch.clone(),
                secret: source.oauth_token.clone(),
            })
            .collect()
    }

    /// Build projects started by this pipeline
    pub fn build_projects(&self) -> BTreeSet<&str> {
        self.actions()
            .filter_map(|(_, action)| match &action.kind {
                ActionKind::CodeBuild { project } => Some(project.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Grants the pipeline's own role what it needs to drive its actions
    ///
    /// Artifact bucket read/write, build start/status on every referenced
    /// project and `sts:AssumeRole` on every per-action role.
    pub fn grant_to(&self, role: &mut Role) {
        role.add_statement(PolicyStatement::allow(
            [
                "s3:GetObject*",
                "s3:GetBucket*",
                "s3:List*",
                "s3:DeleteObject*",
                "s3:PutObject*",
                "s3:Abort*",
            ],
            vec![
                arn_of(&self.artifact_store),
                json!({ "Fn::Join": ["", [arn_of(&self.artifact_store), "/*"]] }),
            ],
        ));

        let projects: Vec<JsonValue> = self.build_projects().into_iter().map(arn_of).collect();
        if !projects.is_empty() {
            role.add_statement(PolicyStatement::allow(
                ["codebuild:BatchGetBuilds", "codebuild:StartBuild", "codebuild:StopBuild"],
                projects,
            ));
        }

        let action_roles: BTreeSet<&str> = self
            .actions()
            .filter_map(|(_, action)| action.role.as_deref())
            .collect();
        if !action_roles.is_empty() {
            role.add_statement(PolicyStatement::allow(
                ["sts:AssumeRole"],
                action_roles.into_iter().map(arn_of).collect(),
            ));
        }
    }
}

impl Construct for Pipeline {
    fn logical_id(&self) -> &str {
        &self.logical_id
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Pipeline
    }

    fn resource_type(&self) -> &'static str {
        "AWS::CodePipeline::Pipeline"
    }

    fn properties(&self, _env: &StackEnv) -> JsonValue {
        let stages: Vec<JsonValue> = self
            .stages
            .iter()
            .map(|stage| {
                json!({
                    "Name": stage.name,
                    "Actions": stage.actions.iter().map(Action::render).collect::<Vec<_>>(),
                })
            })
            .collect();

        json!({
            "Name": self.name,
            "RoleArn": arn_of(&self.role),
            "ArtifactStore": {
                "Type": "S3",
                "Location": ref_to(&self.artifact_store),
            },
            "Stages": stages,
        })
    }

    fn references(&self) -> Vec<Reference> {
        let mut refs = vec![
            Reference::new(self.role.clone(), ResourceKind::Role),
            Reference::new(self.artifact_store.clone(), ResourceKind::ArtifactStore),
        ];
        for (_, action) in self.actions() {
            if let ActionKind::CodeBuild { project } = &action.kind {
                refs.push(Reference::new(project.clone(), ResourceKind::BuildProject));
            }
            if let Some(role) = &action.role {
                refs.push(Reference::new(role.clone(), ResourceKind::Role));
            }
        }
        refs
    }
}

/// Push webhook registered with the source host
#[derive(Debug, Clone)]
pub struct Webhook {
    pub logical_id: String,
    pub pipeline: String,
    pub target_action: String,
    pub branch: String,
    pub secret: SecretValue,
}

impl Construct for Webhook {
    fn logical_id(&self) -> &str {
        &self.logical_id
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Webhook
    }

    fn resource_type(&self) -> &'static str {
        "AWS::CodePipeline::Webhook"
    }

    fn properties(&self, _env: &StackEnv) -> JsonValue {
        json!({
            "Authentication": "GITHUB_HMAC",
            "AuthenticationConfiguration": {
                "SecretToken": self.secret.dynamic_reference(),
            },
            "Filters": [{
                "JsonPath": "$.ref",
                "MatchEquals": format!("refs/heads/{}", self.branch),
            }],
            "TargetAction": self.target_action,
            "TargetPipeline": ref_to(&self.pipeline),
            "TargetPipelineVersion": 1,
            "RegisterWithThirdParty": true,
        })
    }

    fn references(&self) -> Vec<Reference> {
        vec![Reference::new(self.pipeline.clone(), ResourceKind::Pipeline)]
    }
}

fn alphanumeric(name: &str) -> String {
    name.chars().filter(|c| c.is_ascii_alphanumeric()).collect()
}

/// Incremental, validating pipeline constructor
#[derive(Debug)]
pub struct PipelineBuilder {
    logical_id: String,
    name: String,
    role: String,
    artifact_store: String,
    stages: Vec<Stage>,
    produced: BTreeSet<Artifact>,
}

impl PipelineBuilder {
    pub fn new(
        logical_id: impl Into<String>,
        name: impl Into<String>,
        role: impl Into<String>,
        artifact_store: impl Into<String>,
    ) -> Self {
        Self {
            logical_id: logical_id.into(),
            name: name.into(),
            role: role.into(),
            artifact_store: artifact_store.into(),
            stages: Vec::new(),
            produced: BTreeSet::new(),
        }
    }

    /// Appends a stage after all previously added ones
    ///
    /// # Errors
    /// Any wiring violation in the stage: naming, placement of source
    /// actions, run order range, or an input artifact without an upstream
    /// producer. On error the builder is left unchanged.
    pub fn add_stage(&mut self, name: impl Into<String>, actions: Vec<Action>) -> Result<&mut Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(SynthError::EmptyStageName);
        }
        if self.stages.iter().any(|s| s.name == name) {
            return Err(SynthError::DuplicateStage(name));
        }
        if actions.is_empty() {
            return Err(SynthError::EmptyStage(name));
        }

        let is_first = self.stages.is_empty();
        let mut names = BTreeSet::new();
        for action in &actions {
            if !names.insert(action.name.as_str()) {
                return Err(SynthError::DuplicateAction {
                    stage: name.clone(),
                    action: action.name.clone(),
                });
            }
            if !(MIN_RUN_ORDER..=MAX_RUN_ORDER).contains(&action.run_order) {
                return Err(SynthError::InvalidRunOrder {
                    action: action.name.clone(),
                    run_order: action.run_order,
                });
            }
            validate_placement(&name, action, is_first)?;
        }

        let stage = Stage { name, actions };
        let mut produced = self.produced.clone();
        for (_, group) in stage.run_groups() {
            for action in &group {
                for input in &action.inputs {
                    if !produced.contains(input) {
                        return Err(SynthError::ArtifactNotProduced {
                            action: action.name.clone(),
                            artifact: input.name().to_string(),
                        });
                    }
                }
            }
            for action in &group {
                for output in &action.outputs {
                    if !produced.insert(output.clone()) {
                        return Err(SynthError::DuplicateArtifact(output.name().to_string()));
                    }
                }
            }
        }

        debug!(
            "Pipeline '{}': added stage '{}' with {} action(s)",
            self.name,
            stage.name,
            stage.actions.len()
        );

        self.produced = produced;
        self.stages.push(stage);
        Ok(self)
    }

    pub fn build(self) -> Result<Pipeline> {
        if self.stages.len() < 2 {
            return Err(SynthError::TooFewStages {
                name: self.name,
                count: self.stages.len(),
            });
        }

        Ok(Pipeline {
            logical_id: self.logical_id,
            name: self.name,
            role: self.role,
            artifact_store: self.artifact_store,
            stages: self.stages,
        })
    }
}

fn validate_placement(stage: &str, action: &Action, is_first: bool) -> Result<()> {
    let misplaced = |reason: &str| SynthError::MisplacedAction {
        stage: stage.to_string(),
        action: action.name.clone(),
        reason: reason.to_string(),
    };

    if action.is_source() {
        if !is_first {
            return Err(misplaced("source actions belong in the first stage"));
        }
        if !action.inputs.is_empty() || action.outputs.len() != 1 {
            return Err(SynthError::InvalidSourceAction(action.name.clone()));
        }
    } else if is_first {
        return Err(misplaced("the first stage may only contain source actions"));
    }
    Ok(())
}
