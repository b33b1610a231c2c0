//! The Glue ETL CI/CD stack
//!
//! Wires a GitHub source, a build stage, and a CDK deploy stage into one
//! pipeline, and registers the ETL script as a Glue job. The Glue job is
//! independent of the pipeline; the only link is the read grant on the
//! script asset.

use serde_json::json;
use tracing::{info, warn};

use crate::config::StackConfig;
use crate::domain::artifact::{Artifact, ArtifactStore};
use crate::domain::asset::Asset;
use crate::domain::buildspec::{BuildSpec, Phase, PhaseName};
use crate::domain::glue::GlueJob;
use crate::domain::iam::{ADMINISTRATOR_ACCESS, PolicyCatalog, PolicyStatement, Principal, RoleComposer};
use crate::domain::pipeline::{Action, GitHubSource, PipelineBuilder, SourceTrigger};
use crate::domain::project::{BuildEnvironment, BuildImage, BuildProject, ComputeType};
use crate::domain::secret::{SecretReference, SecretStore};
use crate::error::Result;
use crate::stack::Stack;

pub const PIPELINE_ID: &str = "ETLPipeline";
pub const PIPELINE_ROLE_ID: &str = "PipelineRole";
pub const ARTIFACT_STORE_ID: &str = "ArtifactsBucket";
pub const GLUE_ROLE_ID: &str = "GlueJobRole";
pub const DEPLOY_ROLE_ID: &str = "DeployRole";
pub const BUILD_ROLE_ID: &str = "BuildProjectRole";
pub const BUILD_PROJECT_ID: &str = "BuildProject";
pub const DEPLOY_PROJECT_ID: &str = "DeployProject";
pub const ETL_ASSET_ID: &str = "ETLScriptAsset";
pub const GLUE_JOB_ID: &str = "GlueETLJob";

pub const SOURCE_STAGE: &str = "Source";
pub const BUILD_STAGE: &str = "Build";
pub const DEPLOY_STAGE: &str = "Deploy";

/// Buildspec of the deploy project: install the CDK toolchain, then deploy
pub fn deploy_build_spec() -> BuildSpec {
    BuildSpec::new()
        .with_phase(
            PhaseName::Install,
            Phase::commands(["npm install -g aws-cdk", "pip install -r requirements.txt"])
                .with_runtime("python", "3.11"),
        )
        .with_phase(
            PhaseName::Build,
            Phase::commands(["cdk deploy --require-approval never"]),
        )
}

/// Assembles the ETL pipeline stack
///
/// The GitHub token is resolved first: a missing secret fails before any
/// role, stage or resource is created.
pub fn glue_etl_stack(
    config: &StackConfig,
    secrets: &dyn SecretStore,
    catalog: &PolicyCatalog,
) -> Result<Stack> {
    config.validate()?;

    let oauth_token = SecretReference::new(&config.token_secret_name, &config.token_secret_field)
        .resolve(secrets)?;

    let env = config.env();
    let composer = RoleComposer::new(catalog);

    let mut pipeline_role = composer.compose(
        PIPELINE_ROLE_ID,
        [Principal::service("codepipeline.amazonaws.com")],
        &[],
    )?;

    let mut glue_role = composer.compose(
        GLUE_ROLE_ID,
        [Principal::service("glue.amazonaws.com")],
        &["service-role/AWSGlueServiceRole"],
    )?;

    let mut deploy_role = composer
        .compose(
            DEPLOY_ROLE_ID,
            [
                Principal::service("codebuild.amazonaws.com"),
                Principal::role_of(PIPELINE_ROLE_ID),
            ],
            &[],
        )?
        .with_description("Role assumed by CodeBuild project to deploy CDK stack");
    // Kept as observed; flagged by `validate` rather than narrowed here
    deploy_role.add_managed_policy(catalog, ADMINISTRATOR_ACCESS)?;

    let artifact_store = ArtifactStore::new(ARTIFACT_STORE_ID);

    let mut build_role = composer.compose(
        BUILD_ROLE_ID,
        [Principal::service("codebuild.amazonaws.com")],
        &[],
    )?;
    build_role.add_statement(PolicyStatement::allow(
        ["logs:CreateLogGroup", "logs:CreateLogStream", "logs:PutLogEvents"],
        vec![json!("*")],
    ));
    build_role.add_statement(PolicyStatement::allow(
        ["s3:GetObject*", "s3:GetBucket*", "s3:List*", "s3:PutObject*"],
        vec![artifact_store.arn(), artifact_store.objects_arn()],
    ));

    let build_project = BuildProject::new(
        BUILD_PROJECT_ID,
        BuildEnvironment::new(BuildImage::Standard6),
    )
    .with_role(BUILD_ROLE_ID);

    let deploy_project = BuildProject::new(
        DEPLOY_PROJECT_ID,
        BuildEnvironment::new(BuildImage::Standard7)
            .with_compute_type(ComputeType::Small)
            .with_variable("CDK_DEFAULT_ACCOUNT", env.account_value())
            .with_variable("CDK_DEFAULT_REGION", env.region_value()),
    )
    .with_build_spec(deploy_build_spec())
    .with_role(DEPLOY_ROLE_ID);

    let source_output = Artifact::new("SourceOutput");
    let build_output = Artifact::new("BuildOutput");

    let mut builder = PipelineBuilder::new(
        PIPELINE_ID,
        &config.pipeline_name,
        PIPELINE_ROLE_ID,
        ARTIFACT_STORE_ID,
    );
    builder
        .add_stage(
            SOURCE_STAGE,
            vec![Action::github_source(
                "GitHub_Source",
                GitHubSource {
                    owner: config.github_owner.clone(),
                    repo: config.github_repo.clone(),
                    branch: config.github_branch.clone(),
                    oauth_token,
                    trigger: SourceTrigger::Webhook,
                },
                source_output.clone(),
            )],
        )?
        .add_stage(
            BUILD_STAGE,
            vec![
                Action::code_build("Build", BUILD_PROJECT_ID, source_output)
                    .with_outputs(vec![build_output.clone()]),
            ],
        )?
        .add_stage(
            DEPLOY_STAGE,
            vec![
                Action::code_build("CDK_Deploy", DEPLOY_PROJECT_ID, build_output)
                    .with_role(DEPLOY_ROLE_ID)
                    .with_run_order(1),
            ],
        )?;
    let pipeline = builder.build()?;
    pipeline.grant_to(&mut pipeline_role);

    let etl_asset = Asset::from_path(ETL_ASSET_ID, &config.etl_script, config.asset_bucket())?;
    etl_asset.grant_read(&mut glue_role, &env);

    let glue_job = GlueJob::python_etl(
        GLUE_JOB_ID,
        &config.glue_job_name,
        GLUE_ROLE_ID,
        etl_asset.s3_object_url(),
    );
    glue_job.validate()?;

    let mut stack = Stack::new(&config.stack_name, env)
        .with_description("CI/CD pipeline deploying a Glue ETL job");
    stack.add(pipeline_role)?;
    stack.add(glue_role)?;
    stack.add(deploy_role)?;
    stack.add(build_role)?;
    stack.add(artifact_store)?;
    stack.add(build_project)?;
    stack.add(deploy_project)?;
    stack.add_pipeline(pipeline)?;
    stack.add_asset(etl_asset)?;
    stack.add(glue_job)?;

    for role in stack.roles().filter(|r| r.is_over_granted()) {
        warn!("Role '{}' carries {}", role.logical_id, ADMINISTRATOR_ACCESS);
    }
    info!(
        "Assembled stack '{}' tracking {}/{}@{}",
        config.stack_name, config.github_owner, config.github_repo, config.github_branch
    );

    Ok(stack)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deploy::{self, DeploymentState};
    use crate::domain::pipeline::ActionKind;
    use crate::domain::secret::StaticSecretStore;
    use crate::error::SynthError;
    use crate::stack::{Construct, Resource, arn_of};
    use std::io::Write;

    fn secrets() -> StaticSecretStore {
        StaticSecretStore::new().with_secret("GITHUB_TOKEN", json!({"GITHUB_TOKEN": "ghp_x"}))
    }

    fn config_with_script(content: &str) -> (StackConfig, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample_job.py");
        std::fs::File::create(&path)
            .unwrap()
            .write_all(content.as_bytes())
            .unwrap();

        let config = StackConfig {
            etl_script: path,
            asset_bucket: Some("assets".to_string()),
            ..StackConfig::default()
        };
        (config, dir)
    }

    #[test]
    fn test_stack_shape() {
        let (config, _dir) = config_with_script("print('etl')");
        let stack = glue_etl_stack(&config, &secrets(), &PolicyCatalog::default()).unwrap();

        let pipeline = stack.pipelines().next().unwrap();
        assert_eq!(pipeline.name, "GlueETL-CICD-Pipeline");
        let stages: Vec<&str> = pipeline.stages().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(stages, vec![SOURCE_STAGE, BUILD_STAGE, DEPLOY_STAGE]);

        let deploy = &pipeline.stage(DEPLOY_STAGE).unwrap().actions[0];
        assert!(matches!(&deploy.kind, ActionKind::CodeBuild { project } if project == DEPLOY_PROJECT_ID));
        assert_eq!(deploy.role.as_deref(), Some(DEPLOY_ROLE_ID));

        let over_granted: Vec<&str> = stack
            .roles()
            .filter(|r| r.is_over_granted())
            .map(|r| r.logical_id.as_str())
            .collect();
        assert_eq!(over_granted, vec![DEPLOY_ROLE_ID]);

        assert!(matches!(
            stack.resource("ETLPipelineGitHubSourceWebhook"),
            Some(Resource::Webhook(_))
        ));
    }

    #[test]
    fn test_synthesized_job_points_at_asset() {
        let (config, _dir) = config_with_script("print('etl')");
        let stack = glue_etl_stack(&config, &secrets(), &PolicyCatalog::default()).unwrap();
        let template = stack.synthesize().unwrap();

        let asset = &template.assets[0];
        let job = &template.resources[GLUE_JOB_ID];
        assert_eq!(job.resource_type, "AWS::Glue::Job");
        assert_eq!(
            job.properties["Command"]["ScriptLocation"],
            format!("s3://assets/{}", asset.object_key)
        );
        assert_eq!(job.properties["Role"], arn_of(GLUE_ROLE_ID));

        let glue_role = &template.resources[GLUE_ROLE_ID].properties;
        let granted = glue_role["Policies"][0]["PolicyDocument"]["Statement"][0]["Resource"][1]
            .as_str()
            .unwrap();
        assert!(granted.ends_with(&asset.object_key));
    }

    #[test]
    fn test_deploy_project_environment() {
        let (mut config, _dir) = config_with_script("x");
        config.account = Some("123456789012".into());
        config.region = Some("us-west-2".into());
        let stack = glue_etl_stack(&config, &secrets(), &PolicyCatalog::default()).unwrap();

        let project = stack.build_project(DEPLOY_PROJECT_ID).unwrap();
        assert_eq!(
            project.environment.variables["CDK_DEFAULT_ACCOUNT"].literal(),
            Some("123456789012")
        );
        assert_eq!(
            project.environment.variables["CDK_DEFAULT_REGION"].literal(),
            Some("us-west-2")
        );

        let spec = project.inline_spec().unwrap();
        let build = &spec.phases[&PhaseName::Build];
        assert_eq!(build.commands, vec!["cdk deploy --require-approval never".to_string()]);
        assert!(stack.build_project(BUILD_PROJECT_ID).unwrap().inline_spec().is_none());
    }

    #[test]
    fn test_missing_secret_fails_before_stages() {
        let (config, _dir) = config_with_script("x");
        let err = glue_etl_stack(&config, &StaticSecretStore::new(), &PolicyCatalog::default())
            .unwrap_err();
        assert!(err.is_secret_error());
    }

    #[test]
    fn test_unknown_glue_policy_fails() {
        let (config, _dir) = config_with_script("x");
        let catalog = PolicyCatalog::new([ADMINISTRATOR_ACCESS]);
        let err = glue_etl_stack(&config, &secrets(), &catalog).unwrap_err();
        assert!(
            matches!(err, SynthError::UnknownManagedPolicy(name) if name == "service-role/AWSGlueServiceRole")
        );
    }

    #[test]
    fn test_default_config_assembles_from_workspace() {
        let workspace = std::path::Path::new(env!("CARGO_MANIFEST_DIR"))
            .parent()
            .unwrap();
        let config = StackConfig::default().relative_to(workspace);

        let stack = glue_etl_stack(&config, &secrets(), &PolicyCatalog::default()).unwrap();
        let template = stack.synthesize().unwrap();

        let asset = stack.assets().next().unwrap();
        let shipped = std::fs::read(workspace.join("etl/sample_job.py")).unwrap();
        let expected = Asset::from_bytes(ETL_ASSET_ID, "sample_job.py", &shipped, "b");
        assert_eq!(asset.hash, expected.hash);

        let job = &template.resources[GLUE_JOB_ID];
        assert_eq!(job.properties["Name"], json!("SampleETLJob"));
        assert_eq!(
            job.properties["Command"]["ScriptLocation"],
            json!(asset.s3_object_url())
        );
    }

    #[test]
    fn test_missing_script_fails() {
        let config = StackConfig {
            etl_script: "/nonexistent/sample_job.py".into(),
            ..StackConfig::default()
        };
        let err = glue_etl_stack(&config, &secrets(), &PolicyCatalog::default()).unwrap_err();
        assert!(matches!(err, SynthError::AssetRead { .. }));
    }

    #[test]
    fn test_redeploy_unchanged_script_is_noop() {
        let (config, _dir) = config_with_script("print('etl')");
        let catalog = PolicyCatalog::default();

        let first = glue_etl_stack(&config, &secrets(), &catalog)
            .unwrap()
            .synthesize()
            .unwrap();
        let (state, changes) = deploy::apply(&DeploymentState::empty("CicdPipelineStack"), &first);
        assert!(!changes.is_empty());

        let second = glue_etl_stack(&config, &secrets(), &catalog)
            .unwrap()
            .synthesize()
            .unwrap();
        assert!(deploy::plan(&state, &second).is_empty());

        std::fs::write(&config.etl_script, "print('etl v2')").unwrap();
        let third = glue_etl_stack(&config, &secrets(), &catalog)
            .unwrap()
            .synthesize()
            .unwrap();
        let changes = deploy::plan(&state, &third);
        assert_eq!(changes.uploads.len(), 1);
        assert!(changes.change_for(GLUE_JOB_ID).is_some());
    }

    #[test]
    fn test_every_reference_resolves() {
        let (config, _dir) = config_with_script("x");
        let stack = glue_etl_stack(&config, &secrets(), &PolicyCatalog::default()).unwrap();
        for resource in stack.resources() {
            for reference in resource.references() {
                assert!(stack.resource(&reference.target).is_some());
            }
        }
    }
}
