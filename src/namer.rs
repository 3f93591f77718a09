use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::NamingError;
use crate::matcher;
use crate::model::{BackupEvent, TargetName};

/// Delimiter preceding the table name in a table ARN.
pub const TABLE_DELIMITER: &str = "table/";

/// `-YYYYMMDD-HH-mm-ss`, always UTC.
pub const SUFFIX_FORMAT: &str = "-%Y%m%d-%H-%M-%S";

static VALID_TABLE_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_.-]{3,255}$").expect("table name expression compiles"));

/// Derives restore target names from a compiled source pattern.
#[derive(Debug, Clone)]
pub struct TargetNamer {
    source: Regex,
    replacement: String,
}

impl TargetNamer {
    pub fn new(source: Regex, replacement: impl Into<String>) -> Self {
        Self {
            source,
            replacement: replacement.into(),
        }
    }

    /// Same inputs always produce the same name, so duplicate notifications
    /// converge on one restore job.
    pub fn derive(&self, event: &BackupEvent) -> Result<TargetName, NamingError> {
        let table = table_name(&event.source_resource_id)?;
        let mut name = self
            .source
            .replace(table, self.replacement.as_str())
            .into_owned();
        name.push_str(&event.start_time.format(SUFFIX_FORMAT).to_string());

        if !VALID_TABLE_NAME.is_match(&name) {
            return Err(NamingError::InvalidName(name));
        }
        Ok(TargetName::new(name))
    }
}

/// One-shot form of [`TargetNamer::derive`].
pub fn derive_target_name(
    event: &BackupEvent,
    source_pattern: &str,
    replacement_pattern: &str,
) -> Result<TargetName, NamingError> {
    let source = matcher::compile(source_pattern)?;
    TargetNamer::new(source, replacement_pattern).derive(event)
}

fn table_name(resource_id: &str) -> Result<&str, NamingError> {
    resource_id
        .rfind(TABLE_DELIMITER)
        .map(|idx| &resource_id[idx + TABLE_DELIMITER.len()..])
        .filter(|name| !name.is_empty())
        .ok_or_else(|| NamingError::NoTableSegment(resource_id.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeZone, Utc};

    fn event(resource: &str, start: DateTime<Utc>) -> BackupEvent {
        BackupEvent {
            status_message: matcher::SUCCESS_MARKER.into(),
            recovery_point_id: "rp-1".into(),
            source_resource_id: resource.into(),
            job_id: "job-1".into(),
            start_time: start,
        }
    }

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2021, 3, 4, 5, 6, 7).unwrap()
    }

    #[test]
    fn derives_documented_name() {
        let e = event("arn:x:dynamodb:r:a:table/Orders", start());
        for _ in 0..3 {
            let name = derive_target_name(&e, "Orders", "Orders-copy").unwrap();
            assert_eq!(name.as_str(), "Orders-copy-20210304-05-06-07");
        }
    }

    #[test]
    fn unmatched_name_passes_through() {
        let e = event("arn:aws:dynamodb:us-east-1:1:table/Customers", start());
        let name = derive_target_name(&e, "Orders", "Orders-copy").unwrap();
        assert_eq!(name.as_str(), "Customers-20210304-05-06-07");
    }

    #[test]
    fn capture_groups_are_expanded() {
        let e = event("arn:aws:dynamodb:us-east-1:1:table/prod-Orders", start());
        let name = derive_target_name(&e, "^prod-(.+)$", "staging-${1}").unwrap();
        assert_eq!(name.as_str(), "staging-Orders-20210304-05-06-07");
    }

    #[test]
    fn only_first_match_is_replaced() {
        let e = event("arn:aws:dynamodb:us-east-1:1:table/a-a-a", start());
        let name = derive_target_name(&e, "a", "b").unwrap();
        assert_eq!(name.as_str(), "b-a-a-20210304-05-06-07");
    }

    #[test]
    fn uses_last_table_segment() {
        let e = event("arn:aws:dynamodb:us-east-1:1:table/x/table/Orders", start());
        let name = derive_target_name(&e, "zzz", "").unwrap();
        assert_eq!(name.as_str(), "Orders-20210304-05-06-07");
    }

    #[test]
    fn suffix_is_utc() {
        let local = DateTime::parse_from_rfc3339("2021-03-04T23:30:00-05:00")
            .unwrap()
            .with_timezone(&Utc);
        let e = event("arn:aws:dynamodb:us-east-1:1:table/Orders", local);
        let name = derive_target_name(&e, "zzz", "").unwrap();
        assert_eq!(name.as_str(), "Orders-20210305-04-30-00");
    }

    #[test]
    fn rejects_non_table_arn_and_invalid_names() {
        let e = event("arn:aws:ec2:us-east-1:1:volume/vol-1", start());
        assert!(matches!(
            derive_target_name(&e, "x", "y"),
            Err(NamingError::NoTableSegment(_))
        ));

        let e = event("arn:aws:dynamodb:us-east-1:1:table/Orders", start());
        assert!(matches!(
            derive_target_name(&e, "Orders", "Orders copy"),
            Err(NamingError::InvalidName(_))
        ));
        assert!(matches!(
            derive_target_name(&e, "Orders(", "x"),
            Err(NamingError::Pattern(_))
        ));
    }
}
