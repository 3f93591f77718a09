#![allow(dead_code)]

use async_trait::async_trait;
use backup_restorer::error::GatewayError;
use backup_restorer::gateway::{ParameterGateway, RestoreGateway};
use backup_restorer::model::{RestoreJob, RestoreStatus};
use backup_restorer::notification::Notification;
use backup_restorer::orchestrator::{Orchestrator, WorkflowSettings};
use backup_restorer::retry::{PollPolicy, RetryPolicy};
use chrono::{DateTime, Duration, TimeZone, Utc};
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const SUCCESS_MESSAGE: &str = "An AWS Backup job was completed successfully. Recovery point ARN: rp-123. Backed up Resource ARN : arn:aws:dynamodb:us-east-1:1:table/Orders. Backup Job Id : job-9";
pub const TARGET: &str = "Orders-restored-20210304-05-06-07";
pub const PARAMETER: &str = "/restore/orders/table-arn";

pub async fn setup_pool() -> sqlx::SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    sqlx::migrate!("./migrations").run(&pool).await.unwrap();
    pool
}

pub fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2021, 3, 4, 6, 0, 0).unwrap()
}

/// Notification envelope with one record per message.
pub fn notification(messages: &[&str]) -> Notification {
    let records: Vec<serde_json::Value> = messages
        .iter()
        .enumerate()
        .map(|(i, msg)| {
            serde_json::json!({
                "EventSource": "aws:sns",
                "EventSubscriptionArn": "arn:aws:sns:us-east-1:1:backup-events:sub",
                "EventVersion": "1.0",
                "Sns": {
                    "Type": "Notification",
                    "MessageId": format!("msg-{i}"),
                    "TopicArn": "arn:aws:sns:us-east-1:1:backup-events",
                    "Subject": "Notification from AWS Backup",
                    "Message": msg,
                    "Timestamp": "2021-03-04T05:40:00.000Z",
                    "MessageAttributes": {
                        "StartTime": {"Type": "String", "Value": "2021-03-04T05:06:07Z"},
                        "State": {"Type": "String", "Value": "COMPLETED"}
                    }
                }
            })
        })
        .collect();
    let payload = serde_json::json!({ "Records": records });
    Notification::from_json(&payload.to_string()).unwrap()
}

/// In-memory restore and parameter store.
///
/// A restored table stays `Pending` for `pending_polls` status checks, then
/// becomes `Available`. Scripted errors are served before the simulated
/// behaviour.
#[derive(Clone, Default)]
pub struct SimulatedStore {
    pub pending_polls: u32,
    jobs: Arc<Mutex<HashMap<String, u32>>>,
    initiate_calls: Arc<Mutex<Vec<(String, String)>>>,
    status_calls: Arc<Mutex<Vec<String>>>,
    parameters: Arc<Mutex<HashMap<String, String>>>,
    publish_calls: Arc<Mutex<Vec<(String, String)>>>,
    initiate_errors: Arc<Mutex<VecDeque<GatewayError>>>,
    publish_errors: Arc<Mutex<VecDeque<GatewayError>>>,
    fail_restores: bool,
}

impl SimulatedStore {
    pub fn new(pending_polls: u32) -> Self {
        Self {
            pending_polls,
            ..Default::default()
        }
    }

    pub fn failing_restores() -> Self {
        Self {
            fail_restores: true,
            ..Default::default()
        }
    }

    pub async fn fail_next_initiate(&self, err: GatewayError) {
        self.initiate_errors.lock().await.push_back(err);
    }

    pub async fn fail_next_publish(&self, err: GatewayError) {
        self.publish_errors.lock().await.push_back(err);
    }

    pub async fn initiate_calls(&self) -> Vec<(String, String)> {
        self.initiate_calls.lock().await.clone()
    }

    pub async fn status_calls(&self) -> usize {
        self.status_calls.lock().await.len()
    }

    pub async fn job_count(&self) -> usize {
        self.jobs.lock().await.len()
    }

    pub async fn parameter(&self, name: &str) -> Option<String> {
        self.parameters.lock().await.get(name).cloned()
    }

    pub async fn publish_calls(&self) -> Vec<(String, String)> {
        self.publish_calls.lock().await.clone()
    }

    pub fn table_arn(name: &str) -> String {
        format!("arn:aws:dynamodb:us-east-1:1:table/{name}")
    }
}

#[async_trait]
impl RestoreGateway for SimulatedStore {
    async fn initiate_restore(
        &self,
        recovery_point_id: &str,
        target_name: &str,
    ) -> Result<RestoreJob, GatewayError> {
        self.initiate_calls
            .lock()
            .await
            .push((recovery_point_id.to_string(), target_name.to_string()));
        if let Some(err) = self.initiate_errors.lock().await.pop_front() {
            return Err(err);
        }
        let mut jobs = self.jobs.lock().await;
        if jobs.contains_key(target_name) {
            return Err(GatewayError::Conflict(format!("table {target_name} already exists")));
        }
        jobs.insert(target_name.to_string(), self.pending_polls);
        Ok(RestoreJob {
            target_name: target_name.to_string(),
            status: RestoreStatus::Pending,
            resolved_identifier: None,
            detail: None,
        })
    }

    async fn restore_status(&self, target_name: &str) -> Result<RestoreJob, GatewayError> {
        self.status_calls.lock().await.push(target_name.to_string());
        let mut jobs = self.jobs.lock().await;
        let remaining = jobs
            .get_mut(target_name)
            .ok_or_else(|| GatewayError::NotFound(format!("table {target_name} not found")))?;
        let mut job = RestoreJob {
            target_name: target_name.to_string(),
            status: RestoreStatus::Pending,
            resolved_identifier: None,
            detail: None,
        };
        if self.fail_restores {
            job.status = RestoreStatus::Failed;
            job.detail = Some("recovery point is corrupt".into());
        } else if *remaining > 0 {
            *remaining -= 1;
        } else {
            job.status = RestoreStatus::Available;
            job.resolved_identifier = Some(Self::table_arn(target_name));
        }
        Ok(job)
    }
}

#[async_trait]
impl ParameterGateway for SimulatedStore {
    async fn publish_parameter(&self, name: &str, value: &str) -> Result<(), GatewayError> {
        self.publish_calls
            .lock()
            .await
            .push((name.to_string(), value.to_string()));
        if let Some(err) = self.publish_errors.lock().await.pop_front() {
            return Err(err);
        }
        self.parameters
            .lock()
            .await
            .insert(name.to_string(), value.to_string());
        Ok(())
    }
}

pub fn settings() -> WorkflowSettings {
    WorkflowSettings::new("Orders", "Orders-restored", PARAMETER)
        .unwrap()
        .with_restore_retry(RetryPolicy::new(3, 60))
        .with_publish_retry(RetryPolicy::new(3, 60))
        .with_poll(PollPolicy::new(Duration::seconds(30), Duration::minutes(10)))
}

pub fn orchestrator(store: &SimulatedStore, settings: WorkflowSettings) -> Orchestrator {
    let store = Arc::new(store.clone());
    Orchestrator::new(store.clone(), store, settings)
}
