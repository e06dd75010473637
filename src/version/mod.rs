// ============================================================================
// Optimistic Versioning
// ============================================================================
//
// A mapped record may designate one version attribute holding an integer
// counter or a timestamp. Every conditional put presents the previously
// observed value as its CAS predicate, or asserts non-existence when no prior
// value is known, and stores a strictly greater value.
//
// ============================================================================

pub mod manager;

pub use manager::VersionManager;

use crate::core::{DbError, Result};
use chrono::{DateTime, NaiveDateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

/// Formats a timestamp so that string order equals time order.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Drops the sub-microsecond part that the stored format cannot carry.
pub fn truncate_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    NaiveDateTime::parse_from_str(raw, TIMESTAMP_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|err| DbError::CodecError(format!("invalid timestamp '{}': {}", raw, err)))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum VersionKind {
    Counter,
    Timestamp,
}

/// The designated version attribute of a record type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct VersionAttribute {
    pub name: String,
    pub kind: VersionKind,
}

impl VersionAttribute {
    pub fn counter(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VersionKind::Counter,
        }
    }

    pub fn timestamp(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: VersionKind::Timestamp,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub enum VersionValue {
    Counter(i64),
    Timestamp(DateTime<Utc>),
}

impl VersionValue {
    pub fn kind(&self) -> VersionKind {
        match self {
            Self::Counter(_) => VersionKind::Counter,
            Self::Timestamp(_) => VersionKind::Timestamp,
        }
    }

    /// Zero counters and timestamps at or before the epoch mean "never stored".
    pub fn is_unset(&self) -> bool {
        match self {
            Self::Counter(value) => *value == 0,
            Self::Timestamp(ts) => *ts <= DateTime::<Utc>::UNIX_EPOCH,
        }
    }

    /// The string form stored in the attribute and compared by CAS predicates.
    pub fn format(&self) -> String {
        match self {
            Self::Counter(value) => value.to_string(),
            Self::Timestamp(ts) => format_timestamp(ts),
        }
    }

    pub fn parse(kind: VersionKind, raw: &str) -> Result<Self> {
        match kind {
            VersionKind::Counter => raw.parse::<i64>().map(Self::Counter).map_err(|err| {
                DbError::CodecError(format!("invalid counter version '{}': {}", raw, err))
            }),
            VersionKind::Timestamp => parse_timestamp(raw).map(Self::Timestamp),
        }
    }
}

impl fmt::Display for VersionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.format())
    }
}
