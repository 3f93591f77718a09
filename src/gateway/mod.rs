//! Collaborators the workflow talks to: the restorable-resource store and the
//! parameter store. Each call is a single RPC; retries are the orchestrator's job.
use async_trait::async_trait;

use crate::error::GatewayError;
use crate::model::RestoreJob;

pub mod http;
pub mod model;

pub use http::StoreClient;

#[async_trait]
pub trait RestoreGateway: Send + Sync {
    /// Start restoring `recovery_point_id` into a new table named `target_name`.
    /// Fails with `GatewayError::Conflict` when that table already exists.
    async fn initiate_restore(
        &self,
        recovery_point_id: &str,
        target_name: &str,
    ) -> Result<RestoreJob, GatewayError>;

    async fn restore_status(&self, target_name: &str) -> Result<RestoreJob, GatewayError>;
}

#[async_trait]
pub trait ParameterGateway: Send + Sync {
    /// Overwrites any existing value.
    async fn publish_parameter(&self, name: &str, value: &str) -> Result<(), GatewayError>;
}
