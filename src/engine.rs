//! Timer-driven re-invocation of the orchestrator over the SQLite record.
use crate::db::{self, ClaimedStep, NewInstance, Pool};
use crate::error::{Failure, FailureKind, ParseError};
use crate::model::WorkflowState;
use crate::notification::Notification;
use crate::orchestrator::{Admission, Orchestrator, Transition};
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tracing::{error, info, instrument, warn};

/// How long a claimed step stays invisible to other workers.
pub const STEP_LEASE_SECONDS: i64 = 300;

/// One admitted notification record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Admitted {
    pub instance_id: String,
    pub state: WorkflowState,
}

/// Start one instance per record. Rejected and unparsable records are recorded
/// as terminal instances.
#[instrument(skip_all, fields(records = notification.records.len()))]
pub async fn admit_notification(
    pool: &Pool,
    orch: &Orchestrator,
    workflow_name: &str,
    notification: &Notification,
    now: DateTime<Utc>,
) -> Result<Vec<Admitted>> {
    if notification.records.is_empty() {
        let failure = Failure::from(&ParseError::NoRecords);
        warn!(%failure, "notification without records");
        let history = [
            (WorkflowState::Received, None),
            (WorkflowState::Failed, Some(failure.to_string())),
        ];
        let instance_id = db::insert_instance(
            pool,
            &NewInstance {
                workflow_name,
                message_id: None,
                raw_message: "",
                state: WorkflowState::Failed,
                input: None,
                failure: Some(&failure),
                step: None,
                history: &history,
            },
            now,
        )
        .await?;
        return Ok(vec![Admitted {
            instance_id,
            state: WorkflowState::Failed,
        }]);
    }

    let mut admitted = Vec::with_capacity(notification.records.len());
    for record in &notification.records {
        let raw = record.message.message.as_str();
        let message_id = Some(record.message.message_id.as_str()).filter(|s| !s.is_empty());
        let admission = orch.admit(raw, &record.attributes());
        let state = admission.state();

        let mut history = vec![(WorkflowState::Received, None)];
        let (input, step, failure) = match &admission {
            Admission::Started { input, step } => {
                history.push((WorkflowState::Matched, Some(input.target_name.to_string())));
                history.push((state, None));
                (Some(input), Some(step), None)
            }
            Admission::Rejected { event } => {
                history.push((state, Some(event.source_resource_id.clone())));
                (None, None, None)
            }
            Admission::Failed { failure, .. } => {
                if failure.kind == FailureKind::Naming {
                    history.push((WorkflowState::Matched, None));
                }
                history.push((state, Some(failure.to_string())));
                (None, None, Some(failure))
            }
        };

        let instance_id = db::insert_instance(
            pool,
            &NewInstance {
                workflow_name,
                message_id,
                raw_message: raw,
                state,
                input,
                failure,
                step,
                history: &history,
            },
            now,
        )
        .await?;
        info!(%instance_id, state = state.as_str(), "notification admitted");
        admitted.push(Admitted { instance_id, state });
    }
    Ok(admitted)
}

/// Run the earliest due step, if any. Returns whether a step ran.
#[instrument(skip_all)]
pub async fn process_next_step(pool: &Pool, orch: &Orchestrator, now: DateTime<Utc>) -> Result<bool> {
    Ok(process_due_steps(pool, orch, now, 1).await? > 0)
}

/// Claim up to `limit` due steps and run them concurrently.
#[instrument(skip_all)]
pub async fn process_due_steps(
    pool: &Pool,
    orch: &Orchestrator,
    now: DateTime<Utc>,
    limit: i64,
) -> Result<usize> {
    let claimed =
        db::claim_due_steps(pool, now, limit, Duration::seconds(STEP_LEASE_SECONDS)).await?;
    let count = claimed.len();
    let results = join_all(claimed.iter().map(|step| run_step(pool, orch, step, now))).await;
    for (step, res) in claimed.iter().zip(results) {
        // The lease expires and the step runs again.
        if let Err(err) = res {
            error!(?err, instance_id = %step.instance_id, step = step.step.kind(), "step not recorded");
        }
    }
    Ok(count)
}

async fn run_step(
    pool: &Pool,
    orch: &Orchestrator,
    claimed: &ClaimedStep,
    now: DateTime<Utc>,
) -> Result<WorkflowState> {
    let transition = orch
        .advance(&claimed.input, &claimed.step, claimed.attempt, now)
        .await;
    let state = transition.state(&claimed.step);
    let recorded = match &transition {
        Transition::Next { step, delay } => {
            db::advance_step(pool, claimed, step, now + *delay, now).await?
        }
        Transition::Retry { delay, reason } => {
            db::retry_step(pool, claimed, now + *delay, reason, now).await?
        }
        Transition::Done {
            resolved_identifier,
        } => {
            db::finish_instance(
                pool,
                claimed,
                state,
                Some(resolved_identifier.as_str()),
                None,
                now,
            )
            .await?
        }
        Transition::Failed(failure) => {
            db::finish_instance(pool, claimed, state, None, Some(failure), now).await?
        }
    };
    if !recorded {
        warn!(
            instance_id = %claimed.instance_id,
            step = claimed.step.kind(),
            "lease lost to another worker; outcome discarded"
        );
        return Ok(claimed.step.state());
    }
    info!(
        instance_id = %claimed.instance_id,
        step = claimed.step.kind(),
        attempt = claimed.attempt,
        state = state.as_str(),
        "step processed"
    );
    Ok(state)
}
