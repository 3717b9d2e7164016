use std::fmt;

use serde::{Deserialize, Serialize};

pub const STEP_COMPLETED: &str = "completed";

/// Persisted form of one ledger entry: `{"output": ..., "status": "completed"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepStatus {
    pub output: String,
    pub status: String,
}

impl StepStatus {
    pub fn completed(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            status: STEP_COMPLETED.to_string(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == STEP_COMPLETED
    }

    pub fn state(&self) -> StepState {
        if self.is_completed() {
            StepState::Completed
        } else {
            StepState::Pending
        }
    }
}

/// Only `Completed` is ever written; anything else reads back as `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepState {
    Pending,
    Completed,
}

impl StepState {
    pub fn as_str(&self) -> &'static str {
        match self {
            StepState::Pending => "pending",
            StepState::Completed => STEP_COMPLETED,
        }
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
