//! Task results and run exit codes

use crate::error::{is_cancellation, ExecutionError};
use crate::value::Outputs;
use chrono::{DateTime, Utc};
use std::fmt;

/// All tasks succeeded or were skipped
pub const EXIT_SUCCESS: i32 = 0;

/// At least one task failed
pub const EXIT_FAILURE: i32 = 1;

/// At least one task was cancelled and none failed
pub const EXIT_CANCELLED: i32 = 2;

/// Lifecycle state of a task attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TaskStatus {
    #[default]
    None,
    Running,
    Ok,
    Error,
    Skipped,
    Cancelled,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Ok | TaskStatus::Error | TaskStatus::Skipped | TaskStatus::Cancelled
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::None => "none",
            TaskStatus::Running => "running",
            TaskStatus::Ok => "ok",
            TaskStatus::Error => "error",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of one task attempt
///
/// Built with the consuming `start`/`ok`/`fail`/`skip`/`cancel` methods; once
/// a terminal status is set the result is not changed again.
#[derive(Debug, Default)]
pub struct TaskResult {
    pub id: String,
    pub status: TaskStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub error: Option<ExecutionError>,
    pub outputs: Outputs,
    pub message: Option<String>,
}

impl TaskResult {
    pub fn new(id: impl Into<String>) -> Self {
        TaskResult {
            id: id.into(),
            ..Default::default()
        }
    }

    /// Mark the attempt as running
    pub fn start(mut self) -> Self {
        if !self.status.is_terminal() {
            self.status = TaskStatus::Running;
            self.started_at = Some(Utc::now());
        }
        self
    }

    pub fn ok(self) -> Self {
        self.finish(TaskStatus::Ok, None)
    }

    /// Record an error; cancellation errors become `Cancelled`
    pub fn fail(self, error: ExecutionError) -> Self {
        if is_cancellation(&error) {
            return self.finish(TaskStatus::Cancelled, Some(error));
        }
        self.finish(TaskStatus::Error, Some(error))
    }

    pub fn skip(mut self, reason: impl Into<String>) -> Self {
        if !self.status.is_terminal() {
            self.message = Some(reason.into());
        }
        self.finish(TaskStatus::Skipped, None)
    }

    pub fn cancel(self, error: ExecutionError) -> Self {
        self.finish(TaskStatus::Cancelled, Some(error))
    }

    pub fn with_outputs(mut self, outputs: Outputs) -> Self {
        self.outputs = outputs;
        self
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    fn finish(mut self, status: TaskStatus, error: Option<ExecutionError>) -> Self {
        if self.status.is_terminal() {
            return self;
        }
        let now = Utc::now();
        if self.started_at.is_none() {
            self.started_at = Some(now);
        }
        self.status = status;
        self.ended_at = Some(now);
        self.error = error;
        self
    }

    pub fn is_ok(&self) -> bool {
        self.status == TaskStatus::Ok
    }

    pub fn is_error(&self) -> bool {
        self.status == TaskStatus::Error
    }

    pub fn is_cancelled(&self) -> bool {
        self.status == TaskStatus::Cancelled
    }

    pub fn is_skipped(&self) -> bool {
        self.status == TaskStatus::Skipped
    }
}

/// Aggregate exit code; failures win over cancellations
pub fn exit_code(results: &[TaskResult]) -> i32 {
    if results.iter().any(TaskResult::is_error) {
        EXIT_FAILURE
    } else if results.iter().any(TaskResult::is_cancelled) {
        EXIT_CANCELLED
    } else {
        EXIT_SUCCESS
    }
}
