//! Restore workflow state machine.
//!
//! `Received -> Matched -> RestoreRequested -> Polling -> Published -> Done`,
//! ending early in `Rejected`, `Failed` or `PollTimeout`.
//!
//! Admission (`Received` and the match check) runs once per notification. Every
//! later state is entered through [`Orchestrator::advance`], which performs one
//! collaborator call and says what should run next and when. Nothing is held in
//! memory between calls: a `Poll` step only carries its deadline and asks the
//! store afresh each time.
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::config::Config;
use crate::error::{Failure, FailureKind, GatewayError, MatchError};
use crate::gateway::{ParameterGateway, RestoreGateway};
use crate::matcher::{self, JobMatcher};
use crate::model::{BackupEvent, RestoreStatus, Step, WorkflowInput, WorkflowState};
use crate::namer::TargetNamer;
use crate::notification;
use crate::retry::{PollPolicy, RetryPolicy};

/// Patterns and policies shared by every instance, validated once.
#[derive(Debug, Clone)]
pub struct WorkflowSettings {
    pub source_pattern: String,
    pub replacement_pattern: String,
    pub parameter_name: String,
    pub restore_retry: RetryPolicy,
    pub publish_retry: RetryPolicy,
    pub poll: PollPolicy,
    matcher: JobMatcher,
    namer: TargetNamer,
}

impl WorkflowSettings {
    pub fn new(
        source_pattern: &str,
        replacement_pattern: &str,
        parameter_name: &str,
    ) -> Result<Self, MatchError> {
        let source = matcher::compile(source_pattern)?;
        Ok(Self {
            source_pattern: source_pattern.to_string(),
            replacement_pattern: replacement_pattern.to_string(),
            parameter_name: parameter_name.to_string(),
            restore_retry: RetryPolicy::new(5, 300),
            publish_retry: RetryPolicy::new(5, 300),
            poll: PollPolicy::new(Duration::seconds(30), Duration::hours(6)),
            matcher: JobMatcher::from_regex(source.clone()),
            namer: TargetNamer::new(source, replacement_pattern),
        })
    }

    pub fn from_config(cfg: &Config) -> Result<Self, MatchError> {
        let wf = &cfg.workflow;
        let max_backoff = cfg.app.max_backoff_seconds as i64;
        Ok(Self::new(&wf.source_pattern, &wf.replacement_pattern, &wf.parameter_name)?
            .with_restore_retry(RetryPolicy::new(wf.max_restore_attempts, max_backoff))
            .with_publish_retry(RetryPolicy::new(wf.max_publish_attempts, max_backoff))
            .with_poll(PollPolicy::new(
                Duration::seconds(wf.poll_interval_seconds as i64),
                Duration::seconds(wf.poll_timeout_seconds as i64),
            )))
    }

    pub fn with_restore_retry(mut self, policy: RetryPolicy) -> Self {
        self.restore_retry = policy;
        self
    }

    pub fn with_publish_retry(mut self, policy: RetryPolicy) -> Self {
        self.publish_retry = policy;
        self
    }

    pub fn with_poll(mut self, policy: PollPolicy) -> Self {
        self.poll = policy;
        self
    }
}

/// Result of handling one notification record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Matched; the instance continues with `step`.
    Started { input: WorkflowInput, step: Step },
    /// Valid but not a job we restore. Not an error.
    Rejected { event: BackupEvent },
    Failed {
        event: Option<BackupEvent>,
        failure: Failure,
    },
}

impl Admission {
    pub fn state(&self) -> WorkflowState {
        match self {
            Admission::Started { step, .. } => step.state(),
            Admission::Rejected { .. } => WorkflowState::Rejected,
            Admission::Failed { .. } => WorkflowState::Failed,
        }
    }
}

/// What the engine should do after one step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Run `step` after `delay`.
    Next { step: Step, delay: Duration },
    /// Run the same step again after `delay`.
    Retry { delay: Duration, reason: String },
    Done { resolved_identifier: String },
    Failed(Failure),
}

impl Transition {
    /// State the instance is in once this transition is applied.
    pub fn state(&self, current: &Step) -> WorkflowState {
        match self {
            Transition::Next { step, .. } => step.state(),
            Transition::Retry { .. } => current.state(),
            Transition::Done { .. } => WorkflowState::Done,
            Transition::Failed(f) if f.kind == FailureKind::PollTimeout => {
                WorkflowState::PollTimeout
            }
            Transition::Failed(_) => WorkflowState::Failed,
        }
    }
}

#[derive(Clone)]
pub struct Orchestrator {
    restore: Arc<dyn RestoreGateway>,
    parameters: Arc<dyn ParameterGateway>,
    settings: WorkflowSettings,
}

impl Orchestrator {
    pub fn new(
        restore: Arc<dyn RestoreGateway>,
        parameters: Arc<dyn ParameterGateway>,
        settings: WorkflowSettings,
    ) -> Self {
        Self {
            restore,
            parameters,
            settings,
        }
    }

    pub fn settings(&self) -> &WorkflowSettings {
        &self.settings
    }

    /// `Received` and the match check: parse, match, derive the target name.
    pub fn admit(&self, raw: &str, attributes: &HashMap<String, String>) -> Admission {
        let event = match notification::parse(raw, attributes) {
            Ok(event) => event,
            Err(err) => {
                error!(%err, "unable to parse backup notification");
                return Admission::Failed {
                    event: None,
                    failure: Failure::from(&err),
                };
            }
        };

        if !self.settings.matcher.matches(&event) {
            info!(
                resource = %event.source_resource_id,
                job_id = %event.job_id,
                "backup does not require a restore"
            );
            return Admission::Rejected { event };
        }

        let target_name = match self.settings.namer.derive(&event) {
            Ok(name) => name,
            Err(err) => {
                error!(%err, resource = %event.source_resource_id, "unable to derive target name");
                return Admission::Failed {
                    failure: Failure::from(&err),
                    event: Some(event),
                };
            }
        };

        info!(
            table = %target_name,
            recovery_point = %event.recovery_point_id,
            job_id = %event.job_id,
            "backup matched; restore requested"
        );
        Admission::Started {
            input: WorkflowInput {
                event,
                source_pattern: self.settings.source_pattern.clone(),
                replacement_pattern: self.settings.replacement_pattern.clone(),
                target_name,
                parameter_name: self.settings.parameter_name.clone(),
            },
            step: Step::RequestRestore,
        }
    }

    /// Run one step. `attempt` counts previous transient failures of this step.
    pub async fn advance(
        &self,
        input: &WorkflowInput,
        step: &Step,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Transition {
        match step {
            Step::RequestRestore => self.request_restore(input, attempt, now).await,
            Step::Poll { deadline } => self.poll(input, *deadline, now).await,
            Step::Publish {
                resolved_identifier,
            } => self.publish(input, resolved_identifier, attempt).await,
        }
    }

    async fn request_restore(
        &self,
        input: &WorkflowInput,
        attempt: u32,
        now: DateTime<Utc>,
    ) -> Transition {
        let table = input.target_name.as_str();
        let start_polling = Transition::Next {
            step: Step::Poll {
                deadline: self.settings.poll.deadline_from(now),
            },
            delay: self.settings.poll.interval,
        };
        match self
            .restore
            .initiate_restore(&input.event.recovery_point_id, table)
            .await
        {
            Ok(job) => {
                info!(table, status = ?job.status, "restore initiated");
                start_polling
            }
            Err(GatewayError::Conflict(detail)) => {
                info!(table, %detail, "restore already in flight");
                start_polling
            }
            Err(err) if err.is_transient() => {
                match self.settings.restore_retry.next_delay(attempt) {
                    Some(delay) => {
                        warn!(table, attempt, %err, "restore initiation failed; backoff");
                        Transition::Retry {
                            delay,
                            reason: err.to_string(),
                        }
                    }
                    None => self.fail(
                        FailureKind::RestoreInitiation,
                        format!("gave up after {} attempts: {err}", attempt + 1),
                    ),
                }
            }
            Err(err) => self.fail(FailureKind::RestoreInitiation, err.to_string()),
        }
    }

    async fn poll(
        &self,
        input: &WorkflowInput,
        deadline: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Transition {
        let table = input.target_name.as_str();
        let pending_detail = match self.restore.restore_status(table).await {
            Ok(job) => match (job.status, job.resolved_identifier) {
                (RestoreStatus::Available, Some(resolved_identifier)) => {
                    info!(table, %resolved_identifier, "restore available");
                    return Transition::Next {
                        step: Step::Publish {
                            resolved_identifier,
                        },
                        delay: Duration::zero(),
                    };
                }
                (RestoreStatus::Failed, _) => {
                    let detail = job.detail.unwrap_or_else(|| "store reported failure".into());
                    return self.fail(FailureKind::RestoreFailed, format!("{table}: {detail}"));
                }
                (RestoreStatus::Available, None) => "available without identifier".to_string(),
                (RestoreStatus::Pending, _) => "pending".to_string(),
            },
            // Freshly created jobs may not be visible yet.
            Err(GatewayError::NotFound(detail)) => detail,
            // Only the store's own status fails a restore; unreadable
            // answers wait out the poll budget.
            Err(err) => {
                warn!(table, %err, transient = err.is_transient(), "restore status check failed");
                err.to_string()
            }
        };

        if now >= deadline {
            return self.fail(
                FailureKind::PollTimeout,
                format!("{table} still {pending_detail} at {deadline}; restore left running"),
            );
        }
        Transition::Next {
            step: Step::Poll { deadline },
            delay: self.settings.poll.wait_until_next(now, deadline),
        }
    }

    async fn publish(
        &self,
        input: &WorkflowInput,
        resolved_identifier: &str,
        attempt: u32,
    ) -> Transition {
        let name = input.parameter_name.as_str();
        match self
            .parameters
            .publish_parameter(name, resolved_identifier)
            .await
        {
            Ok(()) => {
                info!(parameter = name, value = resolved_identifier, "parameter published");
                Transition::Done {
                    resolved_identifier: resolved_identifier.to_string(),
                }
            }
            Err(err) if err.is_transient() => {
                match self.settings.publish_retry.next_delay(attempt) {
                    Some(delay) => {
                        warn!(parameter = name, attempt, %err, "publish failed; backoff");
                        Transition::Retry {
                            delay,
                            reason: err.to_string(),
                        }
                    }
                    None => self.fail(
                        FailureKind::Publish,
                        format!(
                            "{resolved_identifier} restored but {name} not updated after {} attempts: {err}",
                            attempt + 1
                        ),
                    ),
                }
            }
            Err(err) => self.fail(
                FailureKind::Publish,
                format!("{resolved_identifier} restored but {name} not updated: {err}"),
            ),
        }
    }

    fn fail(&self, kind: FailureKind, detail: String) -> Transition {
        let failure = Failure::new(kind, detail);
        error!(%failure, "workflow failed");
        Transition::Failed(failure)
    }
}
