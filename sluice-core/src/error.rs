//! Synthesis error types
//!
//! Every variant here is raised while a stack is being assembled or
//! synthesized. None of them can occur at pipeline run time.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for synthesis operations
pub type Result<T> = std::result::Result<T, SynthError>;

/// Errors that block synthesis of a stack
#[derive(Debug, Error)]
pub enum SynthError {
    /// Secret does not exist in the secret store
    #[error("Secret not found: {name}")]
    SecretNotFound { name: String },

    /// Secret exists but the requested JSON field is missing or not a string
    #[error("Secret '{name}' has no string field '{field}'")]
    SecretFieldMissing { name: String, field: String },

    /// Secret store itself could not be read
    #[error("Secret store unavailable: {0}")]
    SecretStore(String),

    /// Managed policy name is not part of the policy catalog
    #[error("Unknown managed policy: {0}")]
    UnknownManagedPolicy(String),

    /// Role would be assumable by nobody
    #[error("Role '{0}' has no trusted principals")]
    NoTrustedPrincipals(String),

    #[error("Stage name cannot be empty")]
    EmptyStageName,

    #[error("Duplicate stage name: {0}")]
    DuplicateStage(String),

    #[error("Stage '{0}' has no actions")]
    EmptyStage(String),

    #[error("Action '{action}' in stage '{stage}' is duplicated")]
    DuplicateAction { stage: String, action: String },

    /// Run order outside the range accepted by the pipeline engine
    #[error("Action '{action}' has invalid run order {run_order} (expected 1..=999)")]
    InvalidRunOrder { action: String, run_order: u32 },

    /// Action consumes an artifact nothing upstream has produced
    #[error("Action '{action}' consumes artifact '{artifact}' before it is produced")]
    ArtifactNotProduced { action: String, artifact: String },

    #[error("Artifact '{0}' is produced more than once")]
    DuplicateArtifact(String),

    /// Source actions must live in the first stage and only there
    #[error("Action '{action}' in stage '{stage}' is misplaced: {reason}")]
    MisplacedAction {
        stage: String,
        action: String,
        reason: String,
    },

    /// Source action has inputs or does not produce exactly one output
    #[error("Source action '{0}' must have no inputs and exactly one output")]
    InvalidSourceAction(String),

    #[error("Pipeline '{name}' needs at least two stages, found {count}")]
    TooFewStages { name: String, count: usize },

    #[error("Failed to read asset {path}: {source}")]
    AssetRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Job '{name}' needs at least 2 workers, found {count}")]
    InvalidWorkerCount { name: String, count: u32 },

    #[error("Duplicate logical id: {0}")]
    DuplicateLogicalId(String),

    /// Resource references a logical id that is missing or of the wrong kind
    #[error("Resource '{from}' references '{to}', expected {expected}")]
    DanglingReference {
        from: String,
        to: String,
        expected: &'static str,
    },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl SynthError {
    /// Check if this error was caused by secret resolution
    pub fn is_secret_error(&self) -> bool {
        matches!(
            self,
            Self::SecretNotFound { .. } | Self::SecretFieldMissing { .. } | Self::SecretStore(_)
        )
    }

    /// Check if this error comes from pipeline stage/action validation
    pub fn is_pipeline_error(&self) -> bool {
        matches!(
            self,
            Self::EmptyStageName
                | Self::DuplicateStage(_)
                | Self::EmptyStage(_)
                | Self::DuplicateAction { .. }
                | Self::InvalidRunOrder { .. }
                | Self::ArtifactNotProduced { .. }
                | Self::DuplicateArtifact(_)
                | Self::MisplacedAction { .. }
                | Self::InvalidSourceAction(_)
                | Self::TooFewStages { .. }
        )
    }
}
