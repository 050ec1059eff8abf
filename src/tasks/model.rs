use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Functions whose tasks may not overlap: at most one of them is PENDING or RUNNING at a time.
pub const EXCLUSIVE_FUNCS: &[&str] = &[
    "internal_cross_match",
    "external_cross_match",
    "release_sources",
    "delete_run",
];

/// A queued workflow invocation; stored as the task's `func` plus JSON `args`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "func", rename_all = "snake_case")]
pub enum WorkflowJob {
    InternalCrossMatch { run_id: i32 },
    ExternalCrossMatch { run_id: i32 },
    ReleaseSources { run_id: i32 },
    DeleteRun { run_id: i32 },
}

impl WorkflowJob {
    pub fn func(&self) -> &'static str {
        match self {
            WorkflowJob::InternalCrossMatch { .. } => "internal_cross_match",
            WorkflowJob::ExternalCrossMatch { .. } => "external_cross_match",
            WorkflowJob::ReleaseSources { .. } => "release_sources",
            WorkflowJob::DeleteRun { .. } => "delete_run",
        }
    }

    pub fn run_id(&self) -> i32 {
        match self {
            WorkflowJob::InternalCrossMatch { run_id }
            | WorkflowJob::ExternalCrossMatch { run_id }
            | WorkflowJob::ReleaseSources { run_id }
            | WorkflowJob::DeleteRun { run_id } => *run_id,
        }
    }

    pub fn is_exclusive(&self) -> bool {
        EXCLUSIVE_FUNCS.contains(&self.func())
    }

    /// `args` column value.
    pub fn args(&self) -> String {
        serde_json::json!({ "run_id": self.run_id() }).to_string()
    }

    /// Rebuilds a job from a task row.
    pub fn from_row(func: &str, args: &str) -> Result<Self, TaskError> {
        let mut value: serde_json::Value =
            serde_json::from_str(args).map_err(|e| TaskError::Decode(e.to_string()))?;
        match value.as_object_mut() {
            Some(obj) => {
                obj.insert("func".into(), serde_json::Value::String(func.to_string()));
            }
            None => return Err(TaskError::Decode(format!("args of {} is not an object", func))),
        }
        serde_json::from_value(value).map_err(|e| TaskError::Decode(e.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    Error,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskState::Pending => "PENDING",
            TaskState::Running => "RUNNING",
            TaskState::Completed => "COMPLETED",
            TaskState::Error => "ERROR",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, TaskState::Pending | TaskState::Running)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskState {
    type Err = TaskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(TaskState::Pending),
            "RUNNING" => Ok(TaskState::Running),
            "COMPLETED" => Ok(TaskState::Completed),
            "ERROR" => Ok(TaskState::Error),
            other => Err(TaskError::Decode(format!("unknown task state {}", other))),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum TaskError {
    #[error("Task {active_id} ({func}) is still active; try again once it has finished")]
    Conflict { active_id: i32, func: String },
    #[error("invalid task row: {0}")]
    Decode(String),
    #[error("database error: {0}")]
    Database(#[from] sea_orm::DbErr),
}
