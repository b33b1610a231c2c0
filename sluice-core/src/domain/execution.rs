//! Pipeline execution records
//!
//! Structure produced by a runner while a pipeline executes. Execution logic
//! lives in the runner crate; these types only describe the outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// What started an execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// Webhook push to a tracked branch
    Push { branch: String },
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStatus {
    InProgress,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionStatus {
    Succeeded,
    Failed,
    /// Never started because an earlier action failed
    Skipped,
}

/// Outcome of one action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionExecution {
    pub stage: String,
    pub action: String,
    pub run_order: u32,
    pub status: ActionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

impl ActionExecution {
    pub fn skipped(stage: &str, action: &str, run_order: u32) -> Self {
        Self {
            stage: stage.to_string(),
            action: action.to_string(),
            run_order,
            status: ActionStatus::Skipped,
            started_at: None,
            completed_at: None,
            error_message: None,
        }
    }
}

/// One run of a pipeline from trigger to completion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineExecution {
    pub id: Uuid,
    pub pipeline: String,
    pub trigger: Trigger,
    pub status: ExecutionStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub actions: Vec<ActionExecution>,
}

impl PipelineExecution {
    pub fn start(pipeline: impl Into<String>, trigger: Trigger) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline: pipeline.into(),
            trigger,
            status: ExecutionStatus::InProgress,
            started_at: Utc::now(),
            completed_at: None,
            actions: Vec::new(),
        }
    }

    pub fn finish(&mut self, status: ExecutionStatus) {
        self.status = status;
        self.completed_at = Some(Utc::now());
    }

    pub fn succeeded(&self) -> bool {
        self.status == ExecutionStatus::Succeeded
    }

    /// First failed action, if any
    pub fn failure(&self) -> Option<&ActionExecution> {
        self.actions
            .iter()
            .find(|a| a.status == ActionStatus::Failed)
    }

    pub fn action(&self, stage: &str, action: &str) -> Option<&ActionExecution> {
        self.actions
            .iter()
            .find(|a| a.stage == stage && a.action == action)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_finish_sets_completion() {
        let mut execution = PipelineExecution::start("p", Trigger::Manual);
        assert_eq!(execution.status, ExecutionStatus::InProgress);
        assert!(execution.completed_at.is_none());

        execution.finish(ExecutionStatus::Succeeded);
        assert!(execution.succeeded());
        assert!(execution.completed_at.is_some());
        assert!(execution.failure().is_none());
    }

    #[test]
    fn test_lookup_failure() {
        let mut execution = PipelineExecution::start("p", Trigger::Push { branch: "main".into() });
        execution.actions.push(ActionExecution::skipped("Deploy", "CDK_Deploy", 1));
        execution.actions.push(ActionExecution {
            status: ActionStatus::Failed,
            error_message: Some("exit 1".into()),
            ..ActionExecution::skipped("Build", "Build", 1)
        });

        assert_eq!(execution.failure().unwrap().action, "Build");
        assert_eq!(
            execution.action("Deploy", "CDK_Deploy").unwrap().status,
            ActionStatus::Skipped
        );
    }
}
