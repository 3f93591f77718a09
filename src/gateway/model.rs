use serde::{Deserialize, Serialize};

use crate::model::{RestoreJob, RestoreStatus};

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct InitiateRestoreReq<'a> {
    pub recovery_point_id: &'a str,
    pub target_name: &'a str,
}

#[derive(Serialize, Debug)]
pub struct PutParameterReq<'a> {
    pub value: &'a str,
    pub overwrite: bool,
    #[serde(rename = "type")]
    pub typ: &'a str,
}

#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct RestoreJobResp {
    pub target_name: String,
    pub status: String,
    #[serde(default)]
    pub resolved_identifier: Option<String>,
    #[serde(default)]
    pub detail: Option<String>,
}

impl RestoreJobResp {
    pub fn into_job(self) -> Option<RestoreJob> {
        let status = parse_status(&self.status)?;
        Some(RestoreJob {
            target_name: self.target_name,
            status,
            resolved_identifier: self.resolved_identifier.filter(|s| !s.trim().is_empty()),
            detail: self.detail,
        })
    }
}

/// Accepts both the abstract statuses and the store's native table statuses.
pub fn parse_status(s: &str) -> Option<RestoreStatus> {
    match s.trim().to_ascii_uppercase().as_str() {
        "PENDING" | "CREATING" | "UPDATING" | "RESTORING" => Some(RestoreStatus::Pending),
        "AVAILABLE" | "ACTIVE" => Some(RestoreStatus::Available),
        "FAILED" | "DELETING" | "ARCHIVED" | "INACCESSIBLE_ENCRYPTION_CREDENTIALS" => {
            Some(RestoreStatus::Failed)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_statuses_map_to_restore_status() {
        assert_eq!(parse_status("CREATING"), Some(RestoreStatus::Pending));
        assert_eq!(parse_status("Pending"), Some(RestoreStatus::Pending));
        assert_eq!(parse_status("ACTIVE"), Some(RestoreStatus::Available));
        assert_eq!(parse_status("available"), Some(RestoreStatus::Available));
        assert_eq!(parse_status("DELETING"), Some(RestoreStatus::Failed));
        assert_eq!(parse_status("SOMETHING_NEW"), None);
    }

    #[test]
    fn blank_identifier_is_dropped() {
        let resp: RestoreJobResp = serde_json::from_value(serde_json::json!({
            "targetName": "Orders-x",
            "status": "ACTIVE",
            "resolvedIdentifier": "  "
        }))
        .unwrap();
        let job = resp.into_job().unwrap();
        assert_eq!(job.status, RestoreStatus::Available);
        assert!(job.resolved_identifier.is_none());
    }
}
