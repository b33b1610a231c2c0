//! Stack configuration
//!
//! Defines every tunable name in the ETL pipeline stack: where the source
//! lives, how things are named, and which account/region to target.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Result, SynthError};
use crate::stack::StackEnv;

/// Stack configuration
///
/// Loaded from an optional JSON file, then overridden by environment
/// variables. Missing fields fall back to the defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StackConfig {
    pub stack_name: String,

    /// Target account; `None` resolves at deploy time
    pub account: Option<String>,
    /// Target region; `None` resolves at deploy time
    pub region: Option<String>,

    pub github_owner: String,
    pub github_repo: String,
    pub github_branch: String,

    /// Secrets Manager secret holding the GitHub token
    pub token_secret_name: String,
    /// JSON field inside the secret
    pub token_secret_field: String,

    pub pipeline_name: String,

    /// Local path of the ETL script uploaded as an asset
    pub etl_script: PathBuf,
    pub glue_job_name: String,

    /// Bucket for file assets; defaults to the bootstrap bucket naming scheme
    pub asset_bucket: Option<String>,
}

impl Default for StackConfig {
    fn default() -> Self {
        Self {
            stack_name: "CicdPipelineStack".to_string(),
            account: None,
            region: None,
            github_owner: "DebarunDe".to_string(),
            github_repo: "CICDPipeline".to_string(),
            github_branch: "main".to_string(),
            token_secret_name: "GITHUB_TOKEN".to_string(),
            token_secret_field: "GITHUB_TOKEN".to_string(),
            pipeline_name: "GlueETL-CICD-Pipeline".to_string(),
            etl_script: PathBuf::from("etl/sample_job.py"),
            glue_job_name: "SampleETLJob".to_string(),
            asset_bucket: None,
        }
    }
}

impl StackConfig {
    /// Loads a JSON config file; absent fields keep their defaults
    ///
    /// A relative `etl_script` is taken relative to the file's directory.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SynthError::InvalidConfig(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&content).map_err(|e| {
            SynthError::InvalidConfig(format!("Failed to parse {}: {}", path.display(), e))
        })?;

        match path.parent() {
            Some(dir) => Ok(config.relative_to(dir)),
            None => Ok(config),
        }
    }

    /// Anchors a relative `etl_script` at `base`
    pub fn relative_to(mut self, base: impl AsRef<Path>) -> Self {
        if self.etl_script.is_relative() {
            self.etl_script = base.as_ref().join(&self.etl_script);
        }
        self
    }

    /// Applies environment overrides
    ///
    /// Recognized variables:
    /// - CDK_DEFAULT_ACCOUNT, CDK_DEFAULT_REGION
    /// - SLUICE_STACK_NAME
    /// - SLUICE_GITHUB_OWNER, SLUICE_GITHUB_REPO, SLUICE_GITHUB_BRANCH
    /// - SLUICE_ETL_SCRIPT
    /// - SLUICE_ASSET_BUCKET
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, var: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(account) = var("CDK_DEFAULT_ACCOUNT") {
            self.account = Some(account);
        }
        if let Some(region) = var("CDK_DEFAULT_REGION") {
            self.region = Some(region);
        }
        if let Some(name) = var("SLUICE_STACK_NAME") {
            self.stack_name = name;
        }
        if let Some(owner) = var("SLUICE_GITHUB_OWNER") {
            self.github_owner = owner;
        }
        if let Some(repo) = var("SLUICE_GITHUB_REPO") {
            self.github_repo = repo;
        }
        if let Some(branch) = var("SLUICE_GITHUB_BRANCH") {
            self.github_branch = branch;
        }
        if let Some(script) = var("SLUICE_ETL_SCRIPT") {
            self.etl_script = PathBuf::from(script);
        }
        if let Some(bucket) = var("SLUICE_ASSET_BUCKET") {
            self.asset_bucket = Some(bucket);
        }
        self
    }

    pub fn env(&self) -> StackEnv {
        StackEnv::new(self.account.clone(), self.region.clone())
    }

    /// Bucket the ETL script is uploaded to
    pub fn asset_bucket(&self) -> String {
        match &self.asset_bucket {
            Some(bucket) => bucket.clone(),
            None => format!(
                "cdk-hnb659fds-assets-{}-{}",
                self.account.as_deref().unwrap_or("unknown-account"),
                self.region.as_deref().unwrap_or("unknown-region")
            ),
        }
    }

    /// Validates the configuration
    pub fn validate(&self) -> Result<()> {
        let required = [
            ("stack_name", &self.stack_name),
            ("github_owner", &self.github_owner),
            ("github_repo", &self.github_repo),
            ("github_branch", &self.github_branch),
            ("token_secret_name", &self.token_secret_name),
            ("token_secret_field", &self.token_secret_field),
            ("pipeline_name", &self.pipeline_name),
            ("glue_job_name", &self.glue_job_name),
        ];
        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(SynthError::InvalidConfig(format!("{} cannot be empty", field)));
            }
        }

        if self.pipeline_name.len() > 100 {
            return Err(SynthError::InvalidConfig(
                "pipeline_name is too long (max 100 characters)".to_string(),
            ));
        }

        if let Some(account) = &self.account {
            if account.len() != 12 || !account.chars().all(|c| c.is_ascii_digit()) {
                return Err(SynthError::InvalidConfig(format!(
                    "account must be a 12-digit id, got '{}'",
                    account
                )));
            }
        }

        if self.etl_script.as_os_str().is_empty() {
            return Err(SynthError::InvalidConfig("etl_script cannot be empty".to_string()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = StackConfig::default();
        assert_eq!(config.github_branch, "main");
        assert_eq!(config.pipeline_name, "GlueETL-CICD-Pipeline");
        assert_eq!(config.glue_job_name, "SampleETLJob");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = StackConfig::default();
        config.github_repo = String::new();
        assert!(config.validate().is_err());

        config.github_repo = "repo".to_string();
        config.account = Some("not-an-account".to_string());
        assert!(config.validate().is_err());

        config.account = Some("123456789012".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("CDK_DEFAULT_ACCOUNT", "123456789012"),
            ("CDK_DEFAULT_REGION", "eu-central-1"),
            ("SLUICE_GITHUB_BRANCH", "release"),
        ]
        .into_iter()
        .collect();

        let config = StackConfig::default().with_overrides(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(config.github_branch, "release");
        assert_eq!(config.env().region.as_deref(), Some("eu-central-1"));
        assert_eq!(
            config.asset_bucket(),
            "cdk-hnb659fds-assets-123456789012-eu-central-1"
        );
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"github_owner": "acme", "asset_bucket": "my-assets"}}"#).unwrap();

        let config = StackConfig::from_file(file.path()).unwrap();
        assert_eq!(config.github_owner, "acme");
        assert_eq!(config.github_repo, "CICDPipeline");
        assert_eq!(config.asset_bucket(), "my-assets");
    }

    #[test]
    fn test_file_anchors_relative_script() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sluice.json");
        std::fs::write(&path, r#"{"etl_script": "jobs/etl.py"}"#).unwrap();

        let config = StackConfig::from_file(&path).unwrap();
        assert_eq!(config.etl_script, dir.path().join("jobs/etl.py"));

        let absolute = StackConfig::default().relative_to("/srv").relative_to("/other");
        assert_eq!(absolute.etl_script, PathBuf::from("/srv/etl/sample_job.py"));
    }

    #[test]
    fn test_bad_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        assert!(matches!(
            StackConfig::from_file(file.path()).unwrap_err(),
            SynthError::InvalidConfig(_)
        ));
    }
}
