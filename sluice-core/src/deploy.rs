//! Deployment state and change sets
//!
//! Redeploying a stack is modeled as a pure function from the recorded
//! state and a freshly synthesized template to a change set and the next
//! state. Resources are compared by a fingerprint of their canonical
//! properties, assets by their content-addressed object key, so applying
//! the same template twice yields an empty change set the second time.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use tracing::info;

use crate::stack::{Template, TemplateResource};

/// What the deploy engine last applied for one resource
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeployedResource {
    pub resource_type: String,
    pub fingerprint: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    pub stack_name: String,
    pub resources: BTreeMap<String, DeployedResource>,
    /// Object keys already uploaded
    pub assets: BTreeSet<String>,
}

impl DeploymentState {
    pub fn empty(stack_name: impl Into<String>) -> Self {
        Self {
            stack_name: stack_name.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeAction {
    Create,
    Update,
    /// Resource type changed; the old resource is deleted and a new one created
    Replace,
    Delete,
}

impl fmt::Display for ChangeAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChangeAction::Create => "create",
            ChangeAction::Update => "update",
            ChangeAction::Replace => "replace",
            ChangeAction::Delete => "delete",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceChange {
    pub logical_id: String,
    pub resource_type: String,
    pub action: ChangeAction,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeSet {
    pub changes: Vec<ResourceChange>,
    /// Object keys that must be uploaded before the changes apply
    pub uploads: Vec<String>,
}

impl ChangeSet {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.uploads.is_empty()
    }

    pub fn change_for(&self, logical_id: &str) -> Option<&ResourceChange> {
        self.changes.iter().find(|c| c.logical_id == logical_id)
    }
}

/// SHA-256 over the canonical JSON of a resource's type and properties
///
/// `serde_json::Map` is ordered by key without the `preserve_order` feature,
/// so equal properties always serialize identically.
pub fn fingerprint(resource: &TemplateResource) -> String {
    let mut hasher = Sha256::new();
    hasher.update(resource.resource_type.as_bytes());
    hasher.update(resource.properties.to_string().as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Computes what applying `template` on top of `state` would change
pub fn plan(state: &DeploymentState, template: &Template) -> ChangeSet {
    let mut changes = Vec::new();

    for (id, resource) in &template.resources {
        let action = match state.resources.get(id) {
            None => Some(ChangeAction::Create),
            Some(deployed) if deployed.resource_type != resource.resource_type => {
                Some(ChangeAction::Replace)
            }
            Some(deployed) if deployed.fingerprint != fingerprint(resource) => {
                Some(ChangeAction::Update)
            }
            Some(_) => None,
        };

        if let Some(action) = action {
            changes.push(ResourceChange {
                logical_id: id.clone(),
                resource_type: resource.resource_type.clone(),
                action,
            });
        }
    }

    for (id, deployed) in &state.resources {
        if !template.resources.contains_key(id) {
            changes.push(ResourceChange {
                logical_id: id.clone(),
                resource_type: deployed.resource_type.clone(),
                action: ChangeAction::Delete,
            });
        }
    }

    let uploads = template
        .assets
        .iter()
        .map(|a| a.object_key.clone())
        .filter(|key| !state.assets.contains(key))
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    ChangeSet { changes, uploads }
}

/// Applies `template`, returning the next state and the changes made
///
/// Previously uploaded asset versions are retained; objects are immutable
/// per key and may still be referenced by rollbacks.
pub fn apply(state: &DeploymentState, template: &Template) -> (DeploymentState, ChangeSet) {
    let change_set = plan(state, template);

    let resources = template
        .resources
        .iter()
        .map(|(id, resource)| {
            (
                id.clone(),
                DeployedResource {
                    resource_type: resource.resource_type.clone(),
                    fingerprint: fingerprint(resource),
                },
            )
        })
        .collect();

    let mut assets = state.assets.clone();
    assets.extend(change_set.uploads.iter().cloned());

    info!(
        "Applied stack '{}': {} change(s), {} upload(s)",
        state.stack_name,
        change_set.changes.len(),
        change_set.uploads.len()
    );

    let next = DeploymentState {
        stack_name: state.stack_name.clone(),
        resources,
        assets,
    };
    (next, change_set)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stack::AssetManifestEntry;
    use serde_json::json;

    fn template(job_script: &str) -> Template {
        let mut resources = BTreeMap::new();
        resources.insert(
            "GlueJobRole".to_string(),
            TemplateResource {
                resource_type: "AWS::IAM::Role".into(),
                properties: json!({"Description": "glue"}),
            },
        );
        resources.insert(
            "GlueETLJob".to_string(),
            TemplateResource {
                resource_type: "AWS::Glue::Job".into(),
                properties: json!({"Command": {"ScriptLocation": format!("s3://b/{}", job_script)}}),
            },
        );
        Template {
            format_version: "2010-09-09".into(),
            description: None,
            resources,
            assets: vec![AssetManifestEntry {
                logical_id: "ETLScriptAsset".into(),
                source_path: "etl/sample_job.py".into(),
                hash: job_script.into(),
                bucket: "b".into(),
                object_key: job_script.into(),
            }],
        }
    }

    #[test]
    fn test_first_apply_creates_everything() {
        let state = DeploymentState::empty("Stack");
        let (next, changes) = apply(&state, &template("v1.py"));

        assert_eq!(changes.changes.len(), 2);
        assert!(changes.changes.iter().all(|c| c.action == ChangeAction::Create));
        assert_eq!(changes.uploads, vec!["v1.py".to_string()]);
        assert_eq!(next.resources.len(), 2);
        assert!(next.assets.contains("v1.py"));
    }

    #[test]
    fn test_reapply_is_idempotent() {
        let (state, _) = apply(&DeploymentState::empty("Stack"), &template("v1.py"));
        let (again, changes) = apply(&state, &template("v1.py"));

        assert!(changes.is_empty());
        assert_eq!(again, state);
    }

    #[test]
    fn test_changed_script_updates_job_only() {
        let (state, _) = apply(&DeploymentState::empty("Stack"), &template("v1.py"));
        let changes = plan(&state, &template("v2.py"));

        assert_eq!(changes.changes.len(), 1);
        assert_eq!(changes.change_for("GlueETLJob").unwrap().action, ChangeAction::Update);
        assert_eq!(changes.uploads, vec!["v2.py".to_string()]);
    }

    #[test]
    fn test_removed_and_retyped_resources() {
        let (state, _) = apply(&DeploymentState::empty("Stack"), &template("v1.py"));
        let mut next = template("v1.py");
        next.resources.remove("GlueJobRole");
        next.resources
            .get_mut("GlueETLJob")
            .unwrap()
            .resource_type = "AWS::Glue::Trigger".into();

        let changes = plan(&state, &next);
        assert_eq!(changes.change_for("GlueJobRole").unwrap().action, ChangeAction::Delete);
        assert_eq!(changes.change_for("GlueETLJob").unwrap().action, ChangeAction::Replace);
        assert!(changes.uploads.is_empty());
    }

    #[test]
    fn test_fingerprint_ignores_key_order() {
        let a = TemplateResource {
            resource_type: "T".into(),
            properties: serde_json::from_str(r#"{"a":1,"b":2}"#).unwrap(),
        };
        let b = TemplateResource {
            resource_type: "T".into(),
            properties: serde_json::from_str(r#"{"b":2,"a":1}"#).unwrap(),
        };
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }
}
