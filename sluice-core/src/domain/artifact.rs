//! Pipeline artifacts and the bucket that stores them

use serde::{Deserialize, Serialize};
use serde_json::{Value as JsonValue, json};
use std::fmt;

use crate::stack::{Construct, ResourceKind, StackEnv, arn_of};

/// Opaque handle passed from a producing action to consuming ones
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Artifact(String);

impl Artifact {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn name(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Encrypted, private S3 bucket holding pipeline artifacts
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    pub logical_id: String,
}

impl ArtifactStore {
    pub fn new(logical_id: impl Into<String>) -> Self {
        Self {
            logical_id: logical_id.into(),
        }
    }

    pub fn arn(&self) -> JsonValue {
        arn_of(&self.logical_id)
    }

    /// ARN pattern covering every object in the bucket
    pub fn objects_arn(&self) -> JsonValue {
        json!({ "Fn::Join": ["", [self.arn(), "/*"]] })
    }
}

impl Construct for ArtifactStore {
    fn logical_id(&self) -> &str {
        &self.logical_id
    }

    fn kind(&self) -> ResourceKind {
        ResourceKind::ArtifactStore
    }

    fn resource_type(&self) -> &'static str {
        "AWS::S3::Bucket"
    }

    fn properties(&self, _env: &StackEnv) -> JsonValue {
        json!({
            "BucketEncryption": {
                "ServerSideEncryptionConfiguration": [{
                    "ServerSideEncryptionByDefault": { "SSEAlgorithm": "aws:kms" }
                }]
            },
            "PublicAccessBlockConfiguration": {
                "BlockPublicAcls": true,
                "BlockPublicPolicy": true,
                "IgnorePublicAcls": true,
                "RestrictPublicBuckets": true,
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_is_private() {
        let store = ArtifactStore::new("ArtifactsBucket");
        let props = store.properties(&StackEnv::default());
        assert_eq!(props["PublicAccessBlockConfiguration"]["BlockPublicAcls"], true);
        assert_eq!(store.objects_arn()["Fn::Join"][1][1], "/*");
    }
}
