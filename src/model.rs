use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// One completed backup job, as extracted from a notification.
///
/// Only ever built by `notification::parse`, which either fills every field or
/// fails; there is no partially populated event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackupEvent {
    pub status_message: String,
    pub recovery_point_id: String,
    pub source_resource_id: String,
    pub job_id: String,
    pub start_time: DateTime<Utc>,
}

/// Name assigned to the restored table.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TargetName(String);

impl TargetName {
    pub(crate) fn new(name: String) -> Self {
        Self(name)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Everything a workflow instance carries between steps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowInput {
    pub event: BackupEvent,
    pub source_pattern: String,
    pub replacement_pattern: String,
    pub target_name: TargetName,
    pub parameter_name: String,
}

/// Status of a restore job as reported by the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestoreStatus {
    Pending,
    Available,
    Failed,
}

impl RestoreStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, RestoreStatus::Pending)
    }
}

/// Snapshot of a restore job owned by the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreJob {
    pub target_name: String,
    pub status: RestoreStatus,
    pub resolved_identifier: Option<String>,
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkflowState {
    Received,
    Matched,
    RestoreRequested,
    Polling,
    Published,
    Done,
    Rejected,
    Failed,
    PollTimeout,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Received => "RECEIVED",
            WorkflowState::Matched => "MATCHED",
            WorkflowState::RestoreRequested => "RESTORE_REQUESTED",
            WorkflowState::Polling => "POLLING",
            WorkflowState::Published => "PUBLISHED",
            WorkflowState::Done => "DONE",
            WorkflowState::Rejected => "REJECTED",
            WorkflowState::Failed => "FAILED",
            WorkflowState::PollTimeout => "POLL_TIMEOUT",
        }
    }

    pub fn parse_state(s: &str) -> Option<Self> {
        match s {
            "RECEIVED" => Some(WorkflowState::Received),
            "MATCHED" => Some(WorkflowState::Matched),
            "RESTORE_REQUESTED" => Some(WorkflowState::RestoreRequested),
            "POLLING" => Some(WorkflowState::Polling),
            "PUBLISHED" => Some(WorkflowState::Published),
            "DONE" => Some(WorkflowState::Done),
            "REJECTED" => Some(WorkflowState::Rejected),
            "FAILED" => Some(WorkflowState::Failed),
            "POLL_TIMEOUT" => Some(WorkflowState::PollTimeout),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            WorkflowState::Done
                | WorkflowState::Rejected
                | WorkflowState::Failed
                | WorkflowState::PollTimeout
        )
    }
}

/// The unit of work the engine re-invokes. Each variant is self-contained:
/// `Poll` only needs the target name (from the input) and its deadline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "step", rename_all = "snake_case")]
pub enum Step {
    RequestRestore,
    Poll { deadline: DateTime<Utc> },
    Publish { resolved_identifier: String },
}

impl Step {
    /// State an instance is in while this step is pending.
    pub fn state(&self) -> WorkflowState {
        match self {
            Step::RequestRestore => WorkflowState::RestoreRequested,
            Step::Poll { .. } => WorkflowState::Polling,
            Step::Publish { .. } => WorkflowState::Published,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Step::RequestRestore => "request_restore",
            Step::Poll { .. } => "poll",
            Step::Publish { .. } => "publish",
        }
    }
}
