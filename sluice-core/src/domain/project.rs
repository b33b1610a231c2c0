//! Build projects
//!
//! A build project binds a buildspec to a managed compute environment. It is
//! invoked by pipeline actions; its output artifacts are the pipeline's.

use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;

use crate::domain::buildspec::BuildSpec;
use crate::stack::{Construct, Reference, ResourceKind, StackEnv, arn_of};

/// Buildspec file read from the input artifact when none is inline
pub const SOURCE_BUILDSPEC_FILE: &str = "buildspec.yml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildImage {
    Standard6,
    Standard7,
}

impl BuildImage {
    pub fn as_str(&self) -> &'static str {
        match self {
            BuildImage::Standard6 => "aws/codebuild/standard:6.0",
            BuildImage::Standard7 => "aws/codebuild/standard:7.0",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeType {
    Small,
    Medium,
    Large,
}

impl ComputeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComputeType::Small => "BUILD_GENERAL1_SMALL",
            ComputeType::Medium => "BUILD_GENERAL1_MEDIUM",
            ComputeType::Large => "BUILD_GENERAL1_LARGE",
        }
    }
}

/// Value of a build environment variable
#[derive(Debug, Clone, PartialEq)]
pub enum EnvValue {
    Literal(String),
    /// Resolved at deploy time (pseudo parameters and references)
    Deferred(JsonValue),
}

impl EnvValue {
    fn render(&self) -> JsonValue {
        match self {
            EnvValue::Literal(value) => json!(value),
            EnvValue::Deferred(value) => value.clone(),
        }
    }

    /// Literal value, if known before deployment
    pub fn literal(&self) -> Option<&str> {
        match self {
            EnvValue::Literal(value) => Some(value),
            EnvValue::Deferred(_) => None,
        }
    }
}

impl From<JsonValue> for EnvValue {
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::String(s) => EnvValue::Literal(s),
            other => EnvValue::Deferred(other),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildEnvironment {
    pub image: BuildImage,
    pub compute_type: ComputeType,
    pub variables: BTreeMap<String, EnvValue>,
}

impl BuildEnvironment {
    pub fn new(image: BuildImage) -> Self {
        Self {
            image,
            compute_type: ComputeType::Small,
            variables: BTreeMap::new(),
        }
    }

    pub fn with_compute_type(mut self, compute_type: ComputeType) -> Self {
        self.compute_type = compute_type;
        self
    }

    pub fn with_variable(mut self, name: impl Into<String>, value: impl Into<EnvValue>) -> Self {
        self.variables.insert(name.into(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub enum BuildSpecSource {
    Inline(BuildSpec),
    /// `buildspec.yml` at the root of the input artifact
    FromSource,
}

#[derive(Debug, Clone)]
pub struct BuildProject {
    pub logical_id: String,
    pub environment: BuildEnvironment,
    pub build_spec: BuildSpecSource,
    /// Service role; `None` leaves role creation to the deploy engine
    pub role: Option<String>,
}

impl BuildProject {
    pub fn new(logical_id: impl Into<String>, environment: BuildEnvironment) -> Self {
        Self {
            logical_id: logical_id.into(),
            environment,
            build_spec: BuildSpecSource::FromSource,
            role: None,
        }
    }

    pub fn with_build_spec(mut self, spec: BuildSpec) -> Self {
        self.build_spec = BuildSpecSource::Inline(spec);
        self
    }

    pub fn with_role(mut self, role: impl Into<String>) -> Self {
        self.role = Some(role.into());
        self
    }

    pub fn inline_spec(&self) -> Option<&BuildSpec> {
        match &self.build_spec {
            BuildSpecSource::Inline(spec) => Some(spec),
            BuildSpecSource::FromSource => None,
        }
    }
}

impl Construct for BuildProject {
    fn logical_id(&self) -> &str {
        &self.logical_id
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::BuildProject
    }

    fn resource_type(&self) -> &'static str {
        "AWS::CodeBuild::Project"
    }

    fn properties(&self, _env: &StackEnv) -> JsonValue {
        let variables: Vec<JsonValue> = self
            .environment
            .variables
            .iter()
            .map(|(name, value)| {
                json!({
                    "Name": name,
                    "Type": "PLAINTEXT",
                    "Value": value.render(),
                })
            })
            .collect();

        let mut environment = json!({
            "Type": "LINUX_CONTAINER",
            "Image": self.environment.image.as_str(),
            "ComputeType": self.environment.compute_type.as_str(),
            "ImagePullCredentialsType": "CODEBUILD",
            "PrivilegedMode": false,
        });
        if !variables.is_empty() {
            environment["EnvironmentVariables"] = JsonValue::Array(variables);
        }

        let mut source = json!({ "Type": "CODEPIPELINE" });
        if let Some(spec) = self.inline_spec() {
            source["BuildSpec"] = json!(spec.to_json_pretty());
        }

        let mut props = json!({
            "Artifacts": { "Type": "CODEPIPELINE" },
            "Environment": environment,
            "Source": source,
        });
        if let Some(role) = &self.role {
            props["ServiceRole"] = arn_of(role);
        }
        props
    }

    fn references(&self) -> Vec<Reference> {
        self.role
            .iter()
            .map(|role| Reference::new(role.clone(), ResourceKind::Role))
            .collect()
    }
}
