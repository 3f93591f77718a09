//! Row models used by repositories.
//!
//! Keep these structs focused on the data returned by queries. Workflow logic
//! lives in `orchestrator` and `engine`.

use chrono::{DateTime, Utc};

use crate::error::Failure;
use crate::model::{Step, WorkflowInput, WorkflowState};

/// Everything needed to record an admitted notification.
#[derive(Debug, Clone)]
pub struct NewInstance<'a> {
    pub workflow_name: &'a str,
    pub message_id: Option<&'a str>,
    pub raw_message: &'a str,
    pub state: WorkflowState,
    pub input: Option<&'a WorkflowInput>,
    pub failure: Option<&'a Failure>,
    /// First step to schedule, for started instances.
    pub step: Option<&'a Step>,
    /// States passed through during admission, oldest first.
    pub history: &'a [(WorkflowState, Option<String>)],
}

#[derive(Debug, Clone)]
pub struct InstanceRecord {
    pub id: String,
    pub workflow_name: String,
    pub message_id: Option<String>,
    pub target_name: Option<String>,
    pub state: WorkflowState,
    pub input: Option<WorkflowInput>,
    pub resolved_identifier: Option<String>,
    pub failure: Option<Failure>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A due step claimed by a worker, with the instance input it runs against.
#[derive(Debug, Clone)]
pub struct ClaimedStep {
    pub id: i64,
    pub instance_id: String,
    pub step: Step,
    pub attempt: u32,
    pub input: WorkflowInput,
    /// Token written by the claim; stale once another worker re-claims the step.
    pub lease_token: String,
}

#[derive(Debug, Clone)]
pub struct TransitionRecord {
    pub state: WorkflowState,
    pub detail: Option<String>,
    pub recorded_at: DateTime<Utc>,
}
