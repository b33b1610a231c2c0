//! File assets
//!
//! An asset is a local file uploaded to object storage under a
//! content-addressed key, so an unchanged file always maps to the same
//! object and redeploying it is a no-op.

use serde_json::json;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::domain::iam::{PolicyStatement, Role};
use crate::error::{Result, SynthError};
use crate::stack::StackEnv;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asset {
    pub logical_id: String,
    pub source_path: PathBuf,
    /// Lowercase hex SHA-256 of the file contents
    pub hash: String,
    pub bucket: String,
}

impl Asset {
    /// Reads and hashes a local file
    ///
    /// # Errors
    /// `AssetRead` if the file cannot be read
    pub fn from_path(
        logical_id: impl Into<String>,
        path: impl AsRef<Path>,
        bucket: impl Into<String>,
    ) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read(path).map_err(|source| SynthError::AssetRead {
            path: path.to_path_buf(),
            source,
        })?;

        let asset = Self::from_bytes(logical_id, path, &content, bucket);
        debug!(
            "Asset '{}' from {} hashed to {}",
            asset.logical_id,
            path.display(),
            asset.hash
        );
        Ok(asset)
    }

    pub fn from_bytes(
        logical_id: impl Into<String>,
        path: impl AsRef<Path>,
        content: &[u8],
        bucket: impl Into<String>,
    ) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(content);
        Self {
            logical_id: logical_id.into(),
            source_path: path.as_ref().to_path_buf(),
            hash: format!("{:x}", hasher.finalize()),
            bucket: bucket.into(),
        }
    }

    /// `<hash><extension>`, e.g. `9f86d0....py`
    pub fn object_key(&self) -> String {
        match self.source_path.extension().and_then(|e| e.to_str()) {
            Some(ext) => format!("{}.{}", self.hash, ext),
            None => self.hash.clone(),
        }
    }

    pub fn s3_object_url(&self) -> String {
        format!("s3://{}/{}", self.bucket, self.object_key())
    }

    fn bucket_arn(&self, partition: &str) -> String {
        format!("arn:{}:s3:::{}", partition, self.bucket)
    }

    /// Allows `role` to read this object
    pub fn grant_read(&self, role: &mut Role, env: &StackEnv) {
        let bucket_arn = self.bucket_arn(&env.partition);
        role.add_statement(PolicyStatement::allow(
            ["s3:GetObject*", "s3:GetBucket*", "s3:List*"],
            vec![
                json!(bucket_arn),
                json!(format!("{}/{}", bucket_arn, self.object_key())),
            ],
        ));
    }
}
