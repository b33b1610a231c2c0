//! Service layer
//!
//! Services contain the runner's execution logic. Action execution is
//! trait-based so the ordering rules can be tested without a shell.

mod execution;
mod local;
mod phases;

// Re-export traits
pub use execution::ActionRunner;

// Re-export implementations
pub use execution::{ArtifactLocations, PipelineExecutor};
pub use local::LocalActionRunner;
pub use phases::{BuildReport, BuildSpecExecutor, CommandMode, CommandRecord, PhaseFailure};
