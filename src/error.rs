//! Error taxonomy for the restore workflow.
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Which part of a notification could not be extracted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ParseStage {
    StatusMessage,
    RecoveryPointId,
    SourceResourceId,
    JobId,
    StartTime,
}

impl fmt::Display for ParseStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ParseStage::StatusMessage => "status message",
            ParseStage::RecoveryPointId => "recovery point ARN",
            ParseStage::SourceResourceId => "backed up resource ARN",
            ParseStage::JobId => "backup job id",
            ParseStage::StartTime => "StartTime attribute",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("parse failure: {stage} marker not found")]
    MissingMarker { stage: ParseStage },
    #[error("parse failure: {stage} is empty")]
    EmptyField { stage: ParseStage },
    #[error("parse failure: backed up resource ARN has no resource name: {0}")]
    NoResourceName(String),
    #[error("parse failure: StartTime attribute missing")]
    MissingStartTime,
    #[error("parse failure: StartTime {value:?} is not RFC 3339: {source}")]
    InvalidStartTime {
        value: String,
        #[source]
        source: chrono::ParseError,
    },
    #[error("notification has no records")]
    NoRecords,
}

impl ParseError {
    pub fn stage(&self) -> Option<ParseStage> {
        match self {
            ParseError::MissingMarker { stage } | ParseError::EmptyField { stage } => Some(*stage),
            ParseError::NoResourceName(_) => Some(ParseStage::SourceResourceId),
            ParseError::MissingStartTime | ParseError::InvalidStartTime { .. } => {
                Some(ParseStage::StartTime)
            }
            ParseError::NoRecords => None,
        }
    }
}

/// The configured source pattern is not a valid regular expression.
#[derive(Debug, Error)]
#[error("invalid source pattern {pattern:?}: {source}")]
pub struct MatchError {
    pub pattern: String,
    #[source]
    pub source: regex::Error,
}

#[derive(Debug, Error)]
pub enum NamingError {
    #[error("no table name in resource ARN {0}")]
    NoTableSegment(String),
    #[error("derived table name {0:?} is not a valid table name")]
    InvalidName(String),
    #[error(transparent)]
    Pattern(#[from] MatchError),
}

/// Failure reported by an external collaborator.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("transient: {0}")]
    Transient(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl GatewayError {
    pub fn is_transient(&self) -> bool {
        matches!(self, GatewayError::Transient(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailureKind {
    Parse,
    Match,
    Naming,
    RestoreInitiation,
    RestoreFailed,
    PollTimeout,
    /// The table was restored but the parameter was not updated.
    Publish,
}

impl FailureKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureKind::Parse => "parse",
            FailureKind::Match => "match",
            FailureKind::Naming => "naming",
            FailureKind::RestoreInitiation => "restore_initiation",
            FailureKind::RestoreFailed => "restore_failed",
            FailureKind::PollTimeout => "poll_timeout",
            FailureKind::Publish => "publish",
        }
    }

    pub fn parse_kind(s: &str) -> Option<Self> {
        match s {
            "parse" => Some(FailureKind::Parse),
            "match" => Some(FailureKind::Match),
            "naming" => Some(FailureKind::Naming),
            "restore_initiation" => Some(FailureKind::RestoreInitiation),
            "restore_failed" => Some(FailureKind::RestoreFailed),
            "poll_timeout" => Some(FailureKind::PollTimeout),
            "publish" => Some(FailureKind::Publish),
            _ => None,
        }
    }
}

/// Terminal failure of a workflow instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("{}: {}", .kind.as_str(), .detail)]
pub struct Failure {
    pub kind: FailureKind,
    pub detail: String,
}

impl Failure {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self {
            kind,
            detail: detail.into(),
        }
    }
}

impl From<&ParseError> for Failure {
    fn from(err: &ParseError) -> Self {
        Failure::new(FailureKind::Parse, err.to_string())
    }
}

impl From<&MatchError> for Failure {
    fn from(err: &MatchError) -> Self {
        Failure::new(FailureKind::Match, err.to_string())
    }
}

impl From<&NamingError> for Failure {
    fn from(err: &NamingError) -> Self {
        match err {
            NamingError::Pattern(inner) => inner.into(),
            other => Failure::new(FailureKind::Naming, other.to_string()),
        }
    }
}
