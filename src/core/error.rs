use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum DbError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Version conflict on '{domain}:{item_name}': {message}")]
    VersionConflict {
        domain: String,
        item_name: String,
        message: String,
    },

    #[error("Batch too large: a reliable write holds at most {limit} steps")]
    BatchTooLarge { limit: usize },

    #[error("Transient store error: {0}")]
    TransientStoreError(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Reliable write '{reliable_write_id}' failed for {} step(s): {}", .failures.len(), summarize(.failures))]
    CommitFailed {
        reliable_write_id: String,
        failures: Vec<StepFailure>,
    },

    #[error("Codec error: {0}")]
    CodecError(String),

    #[error("Store error: {0}")]
    StoreError(String),

    #[error("Lock error: {0}")]
    LockError(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    pub fn version_conflict(
        domain: impl Into<String>,
        item_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::VersionConflict {
            domain: domain.into(),
            item_name: item_name.into(),
            message: message.into(),
        }
    }

    /// Failures that may succeed when the same request is replayed later.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientStoreError(_))
    }

    pub fn is_version_conflict(&self) -> bool {
        matches!(self, Self::VersionConflict { .. })
    }

    /// A CAS failure, either direct or on at least one step of a commit.
    pub fn has_version_conflict(&self) -> bool {
        self.is_version_conflict()
            || self
                .step_failures()
                .iter()
                .any(|failure| failure.kind == StepFailureKind::Conflict)
    }

    /// Per-step failures of an aggregated commit error, empty for every other kind.
    pub fn step_failures(&self) -> &[StepFailure] {
        match self {
            Self::CommitFailed { failures, .. } => failures,
            _ => &[],
        }
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        Self::LockError(err.to_string())
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        Self::CodecError(err.to_string())
    }
}

/// How a single propagation unit failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepFailureKind {
    /// The CAS predicate did not hold; the step was dropped from the log.
    Conflict,
    /// Network or throttling fault; the step stays queued for the daemon.
    Transient,
    /// Any other store rejection; the step stays queued for the daemon.
    Rejected,
}

impl fmt::Display for StepFailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Conflict => "conflict",
            Self::Transient => "transient",
            Self::Rejected => "rejected",
        };
        write!(f, "{label}")
    }
}

/// One failed step inside a `CommitFailed` error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepFailure {
    pub step_id: String,
    pub kind: StepFailureKind,
    pub message: String,
    /// Whether the step's log row was left behind for the reconciliation daemon.
    pub retained_in_log: bool,
}

impl StepFailure {
    pub fn from_error(step_id: impl Into<String>, err: &DbError) -> Self {
        let kind = if err.is_version_conflict() {
            StepFailureKind::Conflict
        } else if err.is_transient() {
            StepFailureKind::Transient
        } else {
            StepFailureKind::Rejected
        };
        Self {
            step_id: step_id.into(),
            kind,
            message: err.to_string(),
            retained_in_log: kind != StepFailureKind::Conflict,
        }
    }
}

fn summarize(failures: &[StepFailure]) -> String {
    failures
        .iter()
        .map(|failure| format!("{}({})", failure.step_id, failure.kind))
        .collect::<Vec<_>>()
        .join(", ")
}
