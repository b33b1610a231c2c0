//! Configuration module
//!
//! Resolves the stack configuration and the secret store from the global
//! CLI options.

use anyhow::{Context, Result};
use sluice_core::app::glue_etl_stack;
use sluice_core::config::StackConfig;
use sluice_core::domain::iam::PolicyCatalog;
use sluice_core::domain::secret::{EnvSecretStore, FileSecretStore, SecretStore};
use sluice_core::stack::Stack;
use std::path::{Path, PathBuf};
use tracing::debug;

/// CLI configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub stack: StackConfig,
    /// Secrets file; `None` reads secrets from the environment
    pub secrets_file: Option<PathBuf>,
}

impl Config {
    /// Loads the stack configuration, then applies environment overrides
    pub fn load(config_file: Option<&Path>, secrets_file: Option<PathBuf>) -> Result<Self> {
        let stack = match config_file {
            Some(path) => {
                debug!("Loading stack config from {}", path.display());
                StackConfig::from_file(path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?
            }
            None => StackConfig::default(),
        };

        Ok(Self {
            stack: stack.with_env_overrides(),
            secrets_file,
        })
    }

    pub fn secret_store(&self) -> Box<dyn SecretStore> {
        match &self.secrets_file {
            Some(path) => Box::new(FileSecretStore::new(path)),
            None => Box::new(EnvSecretStore),
        }
    }

    /// Assembles the stack with the default policy catalog
    pub fn build_stack(&self) -> Result<Stack> {
        let secrets = self.secret_store();
        let stack = glue_etl_stack(&self.stack, secrets.as_ref(), &PolicyCatalog::default())
            .context("Failed to assemble stack")?;
        Ok(stack)
    }
}
