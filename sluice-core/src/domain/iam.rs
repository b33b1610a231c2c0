//! IAM domain types
//!
//! Roles are composed from a set of trusted principals and a set of managed
//! policy names checked against a [`PolicyCatalog`]. Composite trust is just a
//! principal set with more than one member.

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::{Result, SynthError};
use crate::stack::{Construct, Reference, ResourceKind, StackEnv, arn_of};

pub const ADMINISTRATOR_ACCESS: &str = "AdministratorAccess";
pub const POLICY_VERSION: &str = "2012-10-17";

/// Identity allowed to assume a role
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Principal {
    /// AWS service, e.g. `glue.amazonaws.com`
    Service(String),
    /// Literal ARN
    Arn(String),
    /// ARN of another role in the same stack
    RoleOf(String),
}

impl Principal {
    pub fn service(host: impl Into<String>) -> Self {
        Principal::Service(host.into())
    }

    pub fn arn(arn: impl Into<String>) -> Self {
        Principal::Arn(arn.into())
    }

    pub fn role_of(logical_id: impl Into<String>) -> Self {
        Principal::RoleOf(logical_id.into())
    }
}

/// AWS managed policy referenced by name
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ManagedPolicy {
    name: String,
}

impl ManagedPolicy {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn arn(&self, partition: &str) -> String {
        format!("arn:{}:iam::aws:policy/{}", partition, self.name)
    }
}

/// Known managed policy names
///
/// Synthesis fails for any name outside the catalog, standing in for the
/// deploy-time "policy does not exist" failure.
#[derive(Debug, Clone)]
pub struct PolicyCatalog {
    names: BTreeSet<String>,
}

impl PolicyCatalog {
    pub fn new<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            names: names.into_iter().map(Into::into).collect(),
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn lookup(&self, name: &str) -> Result<ManagedPolicy> {
        if !self.contains(name) {
            return Err(SynthError::UnknownManagedPolicy(name.to_string()));
        }
        Ok(ManagedPolicy {
            name: name.to_string(),
        })
    }
}

impl Default for PolicyCatalog {
    fn default() -> Self {
        Self::new([
            ADMINISTRATOR_ACCESS,
            "PowerUserAccess",
            "ReadOnlyAccess",
            "service-role/AWSGlueServiceRole",
            "AmazonS3ReadOnlyAccess",
            "AWSCodePipeline_FullAccess",
            "AWSCodeBuildAdminAccess",
            "AWSCodeBuildDeveloperAccess",
            "CloudWatchLogsFullAccess",
        ])
    }
}

/// Inline `Allow` statement
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyStatement {
    pub actions: Vec<String>,
    pub resources: Vec<JsonValue>,
}

impl PolicyStatement {
    pub fn allow<I, S>(actions: I, resources: Vec<JsonValue>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            actions: actions.into_iter().map(Into::into).collect(),
            resources,
        }
    }

    fn render(&self) -> JsonValue {
        json!({
            "Effect": "Allow",
            "Action": self.actions,
            "Resource": self.resources,
        })
    }
}

/// Assumable identity with attached permissions
#[derive(Debug, Clone)]
pub struct Role {
    pub logical_id: String,
    pub description: Option<String>,
    principals: BTreeSet<Principal>,
    managed_policies: BTreeSet<ManagedPolicy>,
    statements: Vec<PolicyStatement>,
}

impl Role {
    pub fn principals(&self) -> &BTreeSet<Principal> {
        &self.principals
    }

    pub fn managed_policies(&self) -> &BTreeSet<ManagedPolicy> {
        &self.managed_policies
    }

    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Attaches a managed policy after composition
    pub fn add_managed_policy(&mut self, catalog: &PolicyCatalog, name: &str) -> Result<()> {
        let policy = catalog.lookup(name)?;
        warn_if_admin(&self.logical_id, &policy);
        self.managed_policies.insert(policy);
        Ok(())
    }

    pub fn add_statement(&mut self, statement: PolicyStatement) {
        self.statements.push(statement);
    }

    /// True when the role carries full administrative access
    pub fn is_over_granted(&self) -> bool {
        self.managed_policies
            .iter()
            .any(|p| p.name() == ADMINISTRATOR_ACCESS)
    }

    fn trust_policy(&self) -> JsonValue {
        let mut services = Vec::new();
        let mut aws = Vec::new();
        for principal in &self.principals {
            match principal {
                Principal::Service(host) => services.push(json!(host)),
                Principal::Arn(arn) => aws.push(json!(arn)),
                Principal::RoleOf(id) => aws.push(arn_of(id)),
            }
        }

        let mut principal = serde_json::Map::new();
        if !services.is_empty() {
            principal.insert("Service".to_string(), JsonValue::Array(services));
        }
        if !aws.is_empty() {
            principal.insert("AWS".to_string(), JsonValue::Array(aws));
        }

        json!({
            "Version": POLICY_VERSION,
            "Statement": [{
                "Action": "sts:AssumeRole",
                "Effect": "Allow",
                "Principal": principal,
            }],
        })
    }
}

impl Construct for Role {
    fn logical_id(&self) -> &str {
        &self.logical_id
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::Role
    }

    fn resource_type(&self) -> &'static str {
        "AWS::IAM::Role"
    }

    fn properties(&self, env: &StackEnv) -> JsonValue {
        let mut props = serde_json::Map::new();
        props.insert("AssumeRolePolicyDocument".into(), self.trust_policy());

        if !self.managed_policies.is_empty() {
            let arns: Vec<String> = self
                .managed_policies
                .iter()
                .map(|p| p.arn(&env.partition))
                .collect();
            props.insert("ManagedPolicyArns".into(), json!(arns));
        }

        if !self.statements.is_empty() {
            let statements: Vec<JsonValue> = self.statements.iter().map(|s| s.render()).collect();
            props.insert(
                "Policies".into(),
                json!([{
                    "PolicyName": format!("{}DefaultPolicy", self.logical_id),
                    "PolicyDocument": {
                        "Version": POLICY_VERSION,
                        "Statement": statements,
                    },
                }]),
            );
        }

        if let Some(description) = &self.description {
            props.insert("Description".into(), json!(description));
        }

        JsonValue::Object(props)
    }

    fn references(&self) -> Vec<Reference> {
        self.principals
            .iter()
            .filter_map(|p| match p {
                Principal::RoleOf(id) => Some(Reference::new(id.clone(), ResourceKind::Role)),
                _ => None,
            })
            .collect()
    }
}

/// Builds roles against a policy catalog
pub struct RoleComposer<'a> {
    catalog: &'a PolicyCatalog,
}

impl<'a> RoleComposer<'a> {
    pub fn new(catalog: &'a PolicyCatalog) -> Self {
        Self { catalog }
    }

    /// Composes a role trusted by exactly `principals` with exactly `policies`
    ///
    /// # Errors
    /// - `NoTrustedPrincipals` if `principals` is empty
    /// - `UnknownManagedPolicy` for the first policy name not in the catalog
    pub fn compose(
        &self,
        logical_id: impl Into<String>,
        principals: impl IntoIterator<Item = Principal>,
        policies: &[&str],
    ) -> Result<Role> {
        let logical_id = logical_id.into();
        let principals: BTreeSet<Principal> = principals.into_iter().collect();
        if principals.is_empty() {
            return Err(SynthError::NoTrustedPrincipals(logical_id));
        }

        let mut managed_policies = BTreeSet::new();
        for name in policies {
            let policy = self.catalog.lookup(name)?;
            warn_if_admin(&logical_id, &policy);
            managed_policies.insert(policy);
        }

        debug!(
            "Composed role '{}' with {} principal(s) and {} managed policy(ies)",
            logical_id,
            principals.len(),
            managed_policies.len()
        );

        Ok(Role {
            logical_id,
            description: None,
            principals,
            managed_policies,
            statements: Vec::new(),
        })
    }
}

fn warn_if_admin(role: &str, policy: &ManagedPolicy) {
    if policy.name() == ADMINISTRATOR_ACCESS {
        warn!(
            "Role '{}' is granted {}; consider narrowing its permissions",
            role, ADMINISTRATOR_ACCESS
        );
    }
}
