//! Agent step execution.
//!
//! The orchestrator hands each role's prompt to a [`StepRunner`] and blocks
//! until the step finishes. [`ClaudeStepRunner`] is the production runner; it
//! drives the agent CLI as a child process.

mod claude;
pub mod stream;

pub use claude::ClaudeStepRunner;

use async_trait::async_trait;
use std::time::Duration;

use crate::pipeline::Role;

/// One step to execute.
#[derive(Debug, Clone, PartialEq)]
pub struct StepRequest {
    pub role: Role,
    /// Loop iteration for worker/reviewer steps; 1 for scout/planner.
    pub iteration: u32,
    pub prompt: String,
}

/// What the runner reports back for a finished step.
#[derive(Debug, Clone, PartialEq)]
pub struct StepOutput {
    pub output: String,
    /// 0 = success; anything else is a failed step regardless of output.
    pub exit_status: i32,
    pub cost_usd: f64,
    pub duration: Duration,
    pub error: Option<String>,
}

impl StepOutput {
    pub fn success(output: impl Into<String>, cost_usd: f64, duration: Duration) -> Self {
        Self {
            output: output.into(),
            exit_status: 0,
            cost_usd,
            duration,
            error: None,
        }
    }

    pub fn failure(exit_status: i32, error: impl Into<String>, duration: Duration) -> Self {
        Self {
            output: String::new(),
            exit_status,
            cost_usd: 0.0,
            duration,
            error: Some(error.into()),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.exit_status == 0
    }
}

/// Executes one named pipeline role.
///
/// Real implementation: `ClaudeStepRunner`. Tests use scripted runners.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run(&self, request: &StepRequest) -> anyhow::Result<StepOutput>;
}
