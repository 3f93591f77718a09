use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::error::MatchError;
use crate::model::BackupEvent;

/// Prose the backup service uses for a successfully completed job.
pub const SUCCESS_MARKER: &str = "An AWS Backup job was completed successfully.";

static TABLE_ARN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^arn:[a-z0-9-]+:dynamodb:[^:]*:[^:]*:table/.+")
        .expect("table ARN expression compiles")
});

/// Decides whether a backup event should trigger a restore.
#[derive(Debug, Clone)]
pub struct JobMatcher {
    source: Regex,
}

impl JobMatcher {
    pub fn new(source_pattern: &str) -> Result<Self, MatchError> {
        Ok(Self {
            source: compile(source_pattern)?,
        })
    }

    pub fn from_regex(source: Regex) -> Self {
        Self { source }
    }

    /// All of: job succeeded, resource is a table, resource matches the source pattern.
    pub fn matches(&self, event: &BackupEvent) -> bool {
        if !event.status_message.contains(SUCCESS_MARKER) {
            debug!(status = %event.status_message, "not a completed backup job");
            return false;
        }
        if !is_table(&event.source_resource_id) {
            debug!(resource = %event.source_resource_id, "backed up resource is not a table");
            return false;
        }
        self.source.is_match(&event.source_resource_id)
    }
}

pub fn is_table(resource_id: &str) -> bool {
    TABLE_ARN.is_match(resource_id)
}

/// One-shot form of [`JobMatcher::matches`]; compiles `source_pattern` each call.
pub fn matches(event: &BackupEvent, source_pattern: &str) -> Result<bool, MatchError> {
    Ok(JobMatcher::new(source_pattern)?.matches(event))
}

pub(crate) fn compile(pattern: &str) -> Result<Regex, MatchError> {
    Regex::new(pattern).map_err(|source| MatchError {
        pattern: pattern.to_string(),
        source,
    })
}
