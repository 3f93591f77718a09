//! Inbound backup-completion notifications and the text parser that turns the
//! free-form message into a [`BackupEvent`].
//!
//! A message looks like:
//!
//! ```text
//! An AWS Backup job was completed successfully. Recovery point ARN: <id>. Backed up Resource ARN : <arn>. Backup Job Id : <job>
//! ```
//!
//! Fields are located by their literal markers and end at the next period. A
//! resource ARN that itself contains a period or marker text is split at the
//! wrong place; callers only ever see a fully parsed event or a `ParseError`.
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{ParseError, ParseStage};
use crate::model::BackupEvent;

pub const RECOVERY_POINT_MARKER: &str = "Recovery point ARN: ";
pub const RESOURCE_MARKER: &str = "Backed up Resource ARN : ";
pub const JOB_ID_MARKER: &str = "Backup Job Id : ";
pub const START_TIME_ATTRIBUTE: &str = "StartTime";

/// Notification envelope as delivered by the notification service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Notification {
    #[serde(rename = "Records", default)]
    pub records: Vec<NotificationRecord>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct NotificationRecord {
    #[serde(default)]
    pub event_source: String,
    #[serde(default)]
    pub event_subscription_arn: String,
    #[serde(default)]
    pub event_version: String,
    #[serde(rename = "Sns", alias = "Message")]
    pub message: SnsMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SnsMessage {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub message_attributes: HashMap<String, AttributeValue>,
    #[serde(default, rename = "MessageId")]
    pub message_id: String,
    #[serde(default)]
    pub signature: String,
    #[serde(default)]
    pub signature_version: String,
    #[serde(default, rename = "SigningCertUrl", alias = "SigningCertURL")]
    pub signing_cert_url: String,
    #[serde(default)]
    pub subject: Option<String>,
    #[serde(default)]
    pub timestamp: String,
    #[serde(default)]
    pub topic_arn: String,
    #[serde(default, rename = "Type")]
    pub kind: String,
    #[serde(default, rename = "UnsubscribeUrl", alias = "UnsubscribeURL")]
    pub unsubscribe_url: String,
}

/// Message attributes arrive either typed (`{"Type": .., "Value": ..}`) or as
/// plain strings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Typed {
        #[serde(rename = "Type", default)]
        kind: String,
        #[serde(rename = "Value")]
        value: String,
    },
    Plain(String),
}

impl AttributeValue {
    pub fn value(&self) -> &str {
        match self {
            AttributeValue::Typed { value, .. } => value,
            AttributeValue::Plain(value) => value,
        }
    }
}

impl Notification {
    pub fn from_json(payload: &str) -> serde_json::Result<Self> {
        serde_json::from_str(payload)
    }
}

impl NotificationRecord {
    /// Flattened attribute map handed to [`parse`].
    pub fn attributes(&self) -> HashMap<String, String> {
        self.message
            .message_attributes
            .iter()
            .map(|(k, v)| (k.clone(), v.value().to_string()))
            .collect()
    }

    pub fn parse(&self) -> Result<BackupEvent, ParseError> {
        parse(&self.message.message, &self.attributes())
    }
}

/// Parse a raw notification message plus its attributes into a `BackupEvent`.
pub fn parse(raw: &str, attributes: &HashMap<String, String>) -> Result<BackupEvent, ParseError> {
    let (status, rest) = raw
        .split_once(RECOVERY_POINT_MARKER)
        .ok_or(ParseError::MissingMarker {
            stage: ParseStage::RecoveryPointId,
        })?;
    let status_message = required(status, ParseStage::StatusMessage)?;

    let (recovery_point_id, rest) = until_period(rest, ParseStage::RecoveryPointId)?;

    let rest = after_marker(rest, RESOURCE_MARKER, ParseStage::SourceResourceId)?;
    let (source_resource_id, rest) = until_period(rest, ParseStage::SourceResourceId)?;
    if !has_resource_name(&source_resource_id) {
        return Err(ParseError::NoResourceName(source_resource_id));
    }

    let job = after_marker(rest, JOB_ID_MARKER, ParseStage::JobId)?;
    let job_id = required(job, ParseStage::JobId)?;

    let start_time = start_time(attributes)?;

    Ok(BackupEvent {
        status_message,
        recovery_point_id,
        source_resource_id,
        job_id,
        start_time,
    })
}

fn required(value: &str, stage: ParseStage) -> Result<String, ParseError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(ParseError::EmptyField { stage });
    }
    Ok(value.to_string())
}

fn after_marker<'a>(
    text: &'a str,
    marker: &str,
    stage: ParseStage,
) -> Result<&'a str, ParseError> {
    text.split_once(marker)
        .map(|(_, rest)| rest)
        .ok_or(ParseError::MissingMarker { stage })
}

/// Value up to the next period, and the text after that period.
fn until_period(text: &str, stage: ParseStage) -> Result<(String, &str), ParseError> {
    let (value, rest) = text
        .split_once('.')
        .ok_or(ParseError::MissingMarker { stage })?;
    Ok((required(value, stage)?, rest))
}

fn has_resource_name(resource_id: &str) -> bool {
    match resource_id.rfind(['/', ':']) {
        Some(idx) => !resource_id[idx + 1..].trim().is_empty(),
        None => false,
    }
}

fn start_time(attributes: &HashMap<String, String>) -> Result<DateTime<Utc>, ParseError> {
    let value = attributes
        .get(START_TIME_ATTRIBUTE)
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .ok_or(ParseError::MissingStartTime)?;
    DateTime::parse_from_rfc3339(value)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|source| ParseError::InvalidStartTime {
            value: value.to_string(),
            source,
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const SAMPLE: &str = "An AWS Backup job was completed successfully. Recovery point ARN: rp-123. Backed up Resource ARN : arn:aws:dynamodb:us-east-1:1:table/Orders. Backup Job Id : job-9";

    fn attrs(start: &str) -> HashMap<String, String> {
        HashMap::from([(START_TIME_ATTRIBUTE.to_string(), start.to_string())])
    }

    #[test]
    fn parses_all_fields_between_markers() {
        let event = parse(SAMPLE, &attrs("2021-03-04T05:06:07Z")).unwrap();
        assert_eq!(
            event.status_message,
            "An AWS Backup job was completed successfully."
        );
        assert_eq!(event.recovery_point_id, "rp-123");
        assert_eq!(
            event.source_resource_id,
            "arn:aws:dynamodb:us-east-1:1:table/Orders"
        );
        assert_eq!(event.job_id, "job-9");
        assert_eq!(
            event.start_time,
            Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap()
        );
    }

    #[test]
    fn parses_real_recovery_point_arn() {
        let raw = "An AWS Backup job was completed successfully. Recovery point ARN: arn:aws:dynamodb:us-east-1:637093487455:table/MyDynamoDBTable/backup/01568804569000-d3306d76. Backed up Resource ARN : arn:aws:dynamodb:us-east-1:637093487455:table/MyDynamoDBTable. Backup Job Id : 5a772b5a-36d5-4a69-9b18-ed2f5213c659";
        let event = parse(raw, &attrs("2019-09-18T10:49:29.919+00:00")).unwrap();
        assert_eq!(
            event.recovery_point_id,
            "arn:aws:dynamodb:us-east-1:637093487455:table/MyDynamoDBTable/backup/01568804569000-d3306d76"
        );
        assert_eq!(event.job_id, "5a772b5a-36d5-4a69-9b18-ed2f5213c659");
    }

    #[test]
    fn start_time_offset_is_normalised_to_utc() {
        let event = parse(SAMPLE, &attrs("2021-03-04T07:06:07+02:00")).unwrap();
        assert_eq!(
            event.start_time,
            Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap()
        );
    }

    #[test]
    fn each_missing_marker_names_its_stage() {
        let cases = [
            (RECOVERY_POINT_MARKER, ParseStage::RecoveryPointId),
            (RESOURCE_MARKER, ParseStage::SourceResourceId),
            (JOB_ID_MARKER, ParseStage::JobId),
        ];
        for (marker, stage) in cases {
            let raw = SAMPLE.replace(marker, "");
            let err = parse(&raw, &attrs("2021-03-04T05:06:07Z")).unwrap_err();
            assert_eq!(err.stage(), Some(stage), "removed {marker:?}");
        }
    }

    #[test]
    fn missing_status_prose_fails() {
        let raw = SAMPLE.replace("An AWS Backup job was completed successfully. ", "");
        let err = parse(&raw, &attrs("2021-03-04T05:06:07Z")).unwrap_err();
        assert_eq!(err.stage(), Some(ParseStage::StatusMessage));
    }

    #[test]
    fn start_time_attribute_required_and_valid() {
        let err = parse(SAMPLE, &HashMap::new()).unwrap_err();
        assert!(matches!(err, ParseError::MissingStartTime));

        let err = parse(SAMPLE, &attrs("yesterday")).unwrap_err();
        assert!(matches!(err, ParseError::InvalidStartTime { .. }));
    }

    #[test]
    fn resource_without_name_segment_is_rejected() {
        let raw = SAMPLE.replace("arn:aws:dynamodb:us-east-1:1:table/Orders", "arn:aws:dynamodb:us-east-1:1:table/");
        let err = parse(&raw, &attrs("2021-03-04T05:06:07Z")).unwrap_err();
        assert!(matches!(err, ParseError::NoResourceName(_)));
    }

    #[test]
    fn period_in_resource_name_misattributes_boundary() {
        // Known limitation: the ARN ends at its first period.
        let raw = SAMPLE.replace("table/Orders", "table/Orders.v2");
        let event = parse(&raw, &attrs("2021-03-04T05:06:07Z")).unwrap();
        assert_eq!(
            event.source_resource_id,
            "arn:aws:dynamodb:us-east-1:1:table/Orders"
        );
    }

    #[test]
    fn envelope_deserializes_lambda_shape() {
        let payload = serde_json::json!({
            "Records": [{
                "EventSource": "aws:sns",
                "EventVersion": "1.0",
                "EventSubscriptionArn": "arn:aws:sns:us-east-1:1:backup:sub",
                "Sns": {
                    "Type": "Notification",
                    "MessageId": "m-1",
                    "TopicArn": "arn:aws:sns:us-east-1:1:backup",
                    "Subject": null,
                    "Message": SAMPLE,
                    "Timestamp": "2021-03-04T05:10:00.000Z",
                    "SignatureVersion": "1",
                    "Signature": "sig",
                    "SigningCertUrl": "https://example/cert.pem",
                    "UnsubscribeUrl": "https://example/unsub",
                    "MessageAttributes": {
                        "StartTime": { "Type": "String", "Value": "2021-03-04T05:06:07Z" },
                        "State": "COMPLETED"
                    }
                }
            }]
        });
        let notification = Notification::from_json(&payload.to_string()).unwrap();
        assert_eq!(notification.records.len(), 1);
        let record = &notification.records[0];
        assert_eq!(record.message.message_id, "m-1");
        assert_eq!(record.attributes().get("State").map(String::as_str), Some("COMPLETED"));
        let event = record.parse().unwrap();
        assert_eq!(event.job_id, "job-9");
    }
}
