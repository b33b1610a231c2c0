//! Stack assembly and template synthesis
//!
//! A [`Stack`] is a resource graph keyed by logical id. Synthesis checks that
//! every cross-resource reference resolves and then renders the graph as a
//! CloudFormation template plus an asset manifest for the deploy tool.

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeMap;
use tracing::{debug, info};

use crate::domain::artifact::ArtifactStore;
use crate::domain::asset::Asset;
use crate::domain::glue::GlueJob;
use crate::domain::iam::Role;
use crate::domain::pipeline::{Pipeline, Webhook};
use crate::domain::project::BuildProject;
use crate::error::{Result, SynthError};

pub const TEMPLATE_FORMAT_VERSION: &str = "2010-09-09";

/// Account/region the stack is deployed into
///
/// `None` means environment-agnostic: values resolve to pseudo parameters at
/// deploy time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StackEnv {
    pub account: Option<String>,
    pub region: Option<String>,
    pub partition: String,
}

impl StackEnv {
    pub fn new(account: Option<String>, region: Option<String>) -> Self {
        Self {
            account,
            region,
            partition: "aws".to_string(),
        }
    }

    pub fn account_value(&self) -> JsonValue {
        match &self.account {
            Some(account) => json!(account),
            None => ref_to("AWS::AccountId"),
        }
    }

    pub fn region_value(&self) -> JsonValue {
        match &self.region {
            Some(region) => json!(region),
            None => ref_to("AWS::Region"),
        }
    }
}

impl Default for StackEnv {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// `{"Ref": id}`
pub fn ref_to(logical_id: &str) -> JsonValue {
    json!({ "Ref": logical_id })
}

/// `{"Fn::GetAtt": [id, "Arn"]}`
pub fn arn_of(logical_id: &str) -> JsonValue {
    json!({ "Fn::GetAtt": [logical_id, "Arn"] })
}

/// Kind of resource a reference must point to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Role,
    Pipeline,
    Webhook,
    BuildProject,
    ArtifactStore,
    GlueJob,
}

impl ResourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::Role => "an IAM role",
            ResourceKind::Pipeline => "a pipeline",
            ResourceKind::Webhook => "a webhook",
            ResourceKind::BuildProject => "a build project",
            ResourceKind::ArtifactStore => "an artifact store",
            ResourceKind::GlueJob => "a Glue job",
        }
    }
}

/// Outgoing edge from one resource to another
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reference {
    pub target: String,
    pub kind: ResourceKind,
}

impl Reference {
    pub fn new(target: impl Into<String>, kind: ResourceKind) -> Self {
        Self {
            target: target.into(),
            kind,
        }
    }
}

/// Anything that synthesizes into a template resource
pub trait Construct {
    fn logical_id(&self) -> &str;

    fn kind(&self) -> ResourceKind;

    /// CloudFormation resource type, e.g. `AWS::IAM::Role`
    fn resource_type(&self) -> &'static str;

    fn properties(&self, env: &StackEnv) -> JsonValue;

    /// Other resources this one points at
    fn references(&self) -> Vec<Reference> {
        Vec::new()
    }
}

/// A resource held by a stack
#[derive(Debug, Clone)]
pub enum Resource {
    Role(Role),
    Pipeline(Pipeline),
    Webhook(Webhook),
    BuildProject(BuildProject),
    ArtifactStore(ArtifactStore),
    GlueJob(GlueJob),
}

impl Resource {
    fn as_construct(&self) -> &dyn Construct {
        match self {
            Resource::Role(r) => r,
            Resource::Pipeline(p) => p,
            Resource::Webhook(w) => w,
            Resource::BuildProject(b) => b,
            Resource::ArtifactStore(a) => a,
            Resource::GlueJob(g) => g,
        }
    }
}

impl Construct for Resource {
    fn logical_id(&self) -> &str {
        self.as_construct().logical_id()
    }

    fn kind(&self) -> ResourceKind {
        self.as_construct().kind()
    }

    fn resource_type(&self) -> &'static str {
        self.as_construct().resource_type()
    }

    fn properties(&self, env: &StackEnv) -> JsonValue {
        self.as_construct().properties(env)
    }

    fn references(&self) -> Vec<Reference> {
        self.as_construct().references()
    }
}

macro_rules! impl_into_resource {
    ($($variant:ident),*) => {
        $(
            impl From<$variant> for Resource {
                fn from(value: $variant) -> Self {
                    Resource::$variant(value)
                }
            }
        )*
    };
}

impl_into_resource!(Role, Pipeline, Webhook, BuildProject, ArtifactStore, GlueJob);

/// Declarative resource graph
#[derive(Debug, Clone)]
pub struct Stack {
    pub name: String,
    pub env: StackEnv,
    pub description: Option<String>,
    resources: BTreeMap<String, Resource>,
    assets: BTreeMap<String, Asset>,
}

impl Stack {
    pub fn new(name: impl Into<String>, env: StackEnv) -> Self {
        Self {
            name: name.into(),
            env,
            description: None,
            resources: BTreeMap::new(),
            assets: BTreeMap::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Adds a resource under its logical id
    ///
    /// # Errors
    /// `DuplicateLogicalId` if the id is already taken by a resource or asset
    pub fn add(&mut self, resource: impl Into<Resource>) -> Result<()> {
        let resource = resource.into();
        let id = resource.logical_id().to_string();
        self.ensure_free(&id)?;
        debug!("Adding {} '{}'", resource.resource_type(), id);
        self.resources.insert(id, resource);
        Ok(())
    }

    /// Adds a pipeline along with the webhooks its source actions register
    pub fn add_pipeline(&mut self, pipeline: Pipeline) -> Result<()> {
        let webhooks = pipeline.webhooks();
        self.add(pipeline)?;
        for webhook in webhooks {
            self.add(webhook)?;
        }
        Ok(())
    }

    /// Registers a file asset that the deploy tool uploads before deployment
    pub fn add_asset(&mut self, asset: Asset) -> Result<()> {
        let id = asset.logical_id.clone();
        self.ensure_free(&id)?;
        self.assets.insert(id, asset);
        Ok(())
    }

    fn ensure_free(&self, id: &str) -> Result<()> {
        if self.resources.contains_key(id) || self.assets.contains_key(id) {
            return Err(SynthError::DuplicateLogicalId(id.to_string()));
        }
        Ok(())
    }

    pub fn resource(&self, logical_id: &str) -> Option<&Resource> {
        self.resources.get(logical_id)
    }

    pub fn resources(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    pub fn roles(&self) -> impl Iterator<Item = &Role> {
        self.resources.values().filter_map(|r| match r {
            Resource::Role(role) => Some(role),
            _ => None,
        })
    }

    pub fn pipelines(&self) -> impl Iterator<Item = &Pipeline> {
        self.resources.values().filter_map(|r| match r {
            Resource::Pipeline(pipeline) => Some(pipeline),
            _ => None,
        })
    }

    pub fn build_project(&self, logical_id: &str) -> Option<&BuildProject> {
        match self.resources.get(logical_id) {
            Some(Resource::BuildProject(project)) => Some(project),
            _ => None,
        }
    }

    pub fn assets(&self) -> impl Iterator<Item = &Asset> {
        self.assets.values()
    }

    /// Checks that every reference points at a resource of the expected kind
    pub fn validate(&self) -> Result<()> {
        for resource in self.resources.values() {
            for reference in resource.references() {
                let found = self
                    .resources
                    .get(&reference.target)
                    .map(|target| target.kind() == reference.kind)
                    .unwrap_or(false);

                if !found {
                    return Err(SynthError::DanglingReference {
                        from: resource.logical_id().to_string(),
                        to: reference.target,
                        expected: reference.kind.as_str(),
                    });
                }
            }
        }
        Ok(())
    }

    /// Validates the graph and renders it as a template
    pub fn synthesize(&self) -> Result<Template> {
        self.validate()?;

        let resources = self
            .resources
            .values()
            .map(|resource| {
                (
                    resource.logical_id().to_string(),
                    TemplateResource {
                        resource_type: resource.resource_type().to_string(),
                        properties: resource.properties(&self.env),
                    },
                )
            })
            .collect();

        let assets = self
            .assets
            .values()
            .map(|asset| AssetManifestEntry {
                logical_id: asset.logical_id.clone(),
                source_path: asset.source_path.display().to_string(),
                hash: asset.hash.clone(),
                bucket: asset.bucket.clone(),
                object_key: asset.object_key(),
            })
            .collect();

        let template = Template {
            format_version: TEMPLATE_FORMAT_VERSION.to_string(),
            description: self.description.clone(),
            resources,
            assets,
        };

        info!(
            "Synthesized stack '{}' with {} resource(s) and {} asset(s)",
            self.name,
            template.resources.len(),
            template.assets.len()
        );

        Ok(template)
    }
}

/// One rendered resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateResource {
    #[serde(rename = "Type")]
    pub resource_type: String,
    #[serde(rename = "Properties")]
    pub properties: JsonValue,
}

/// File the deploy tool must upload before applying the template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetManifestEntry {
    pub logical_id: String,
    pub source_path: String,
    pub hash: String,
    pub bucket: String,
    pub object_key: String,
}

/// Synthesized stack
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(rename = "AWSTemplateFormatVersion")]
    pub format_version: String,
    #[serde(rename = "Description", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(rename = "Resources")]
    pub resources: BTreeMap<String, TemplateResource>,
    /// Not part of the CloudFormation document; consumed by the deploy tool
    #[serde(rename = "Assets", default, skip_serializing_if = "Vec::is_empty")]
    pub assets: Vec<AssetManifestEntry>,
}

impl Template {
    pub fn to_json_pretty(&self) -> String {
        // Template only holds strings, maps and JSON values
        serde_json::to_string_pretty(self).unwrap_or_default()
    }
}
