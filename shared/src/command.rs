//! Command identity, lifecycle status and result types

use std::fmt;

use uuid::Uuid;

use crate::now_ms;

/// Opaque handle returned to a caller invoking an asynchronous command
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CommandId(String);

impl CommandId {
    /// Generate a fresh id for the named command.
    ///
    /// The millisecond prefix alone is not unique under concurrent calls, so
    /// the 48-bit node field of a random v4 uuid is appended before the name.
    pub fn generate(command_name: &str) -> Self {
        let node = Uuid::new_v4().as_u128() & 0xFFFF_FFFF_FFFF;
        Self(format!("{}_{}_{}", now_ms(), node, command_name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for CommandId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for CommandId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Lifecycle of one asynchronous command execution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Staging,
    Queued,
    InProgress,
    Aborted,
    /// Sentinel for queries on ids the tracker does not hold
    NotFound,
    Completed,
    Rejected,
    Failed,
}

impl TaskStatus {
    /// Terminal statuses clear progress and schedule record removal
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Aborted | TaskStatus::Failed | TaskStatus::Rejected
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            TaskStatus::Staging => "STAGING",
            TaskStatus::Queued => "QUEUED",
            TaskStatus::InProgress => "IN_PROGRESS",
            TaskStatus::Aborted => "ABORTED",
            TaskStatus::NotFound => "NOT_FOUND",
            TaskStatus::Completed => "COMPLETED",
            TaskStatus::Rejected => "REJECTED",
            TaskStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result codes returned by invocations and carried by task results
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ResultCode {
    Ok = 0,
    Started = 1,
    Queued = 2,
    Failed = 3,
    Unknown = 4,
    Rejected = 5,
    NotAllowed = 6,
    Aborted = 7,
}

impl ResultCode {
    pub fn code(self) -> i32 {
        self as i32
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResultCode::Ok => "OK",
            ResultCode::Started => "STARTED",
            ResultCode::Queued => "QUEUED",
            ResultCode::Failed => "FAILED",
            ResultCode::Unknown => "UNKNOWN",
            ResultCode::Rejected => "REJECTED",
            ResultCode::NotAllowed => "NOT_ALLOWED",
            ResultCode::Aborted => "ABORTED",
        };
        f.write_str(name)
    }
}

/// Outcome reported by a finished task
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskResult {
    pub code: ResultCode,
    pub message: String,
}

impl TaskResult {
    pub fn new(code: ResultCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Successful completion of the named command
    pub fn ok(command_name: &str) -> Self {
        Self::new(ResultCode::Ok, format!("{command_name} command completed OK"))
    }

    /// The task ran to completion with a failure outcome
    pub fn failed(command_name: &str) -> Self {
        Self::new(ResultCode::Failed, format!("{command_name} command failed"))
    }

    pub fn aborted(command_name: &str) -> Self {
        Self::new(ResultCode::Aborted, format!("{command_name} command aborted"))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self.code, ResultCode::Failed | ResultCode::Rejected | ResultCode::NotAllowed)
    }
}

/// A partial update applied atomically by the tracker
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CommandUpdate {
    pub status: Option<TaskStatus>,
    pub progress: Option<u32>,
    pub result: Option<TaskResult>,
    pub exception: Option<String>,
}

impl CommandUpdate {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    pub fn progress(progress: u32) -> Self {
        Self {
            progress: Some(progress),
            ..Default::default()
        }
    }

    /// Terminal status paired with the task's result
    pub fn finished(status: TaskStatus, result: TaskResult) -> Self {
        Self {
            status: Some(status),
            result: Some(result),
            ..Default::default()
        }
    }

    pub fn with_exception(mut self, exception: impl Into<String>) -> Self {
        self.exception = Some(exception.into());
        self
    }
}
