//! Sluice Runner
//!
//! Local rehearsal of pipeline executions.
//!
//! Architecture:
//! - Services: pipeline execution ordering, buildspec phase execution, and a
//!   local action runner that maps pipeline actions onto a workspace
//!
//! The runner reproduces the managed engine's ordering and failure rules:
//! stages run strictly in sequence, the first failing action stops the
//! pipeline, and nothing is retried.

pub mod service;

pub use service::{
    ActionRunner, ArtifactLocations, BuildReport, BuildSpecExecutor, CommandMode,
    LocalActionRunner, PipelineExecutor,
};
