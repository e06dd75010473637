use super::{VersionAttribute, VersionKind, VersionValue, truncate_timestamp};
use crate::core::{Attributes, Clock, DbError, Result};
use crate::store::{BatchItem, Condition, PutRequest};
use chrono::Duration;
use std::sync::Arc;

/// Computes next versions and the CAS predicates that guard them.
#[derive(Clone)]
pub struct VersionManager {
    clock: Arc<dyn Clock>,
}

impl VersionManager {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Counters increment (a missing previous counts as 0). Timestamps take
    /// the current time, nudged one microsecond past `previous` when the clock
    /// has not moved beyond it.
    pub fn next_version(&self, kind: VersionKind, previous: Option<&VersionValue>) -> VersionValue {
        match kind {
            VersionKind::Counter => {
                let current = match previous {
                    Some(VersionValue::Counter(value)) => *value,
                    _ => 0,
                };
                VersionValue::Counter(current.saturating_add(1))
            }
            VersionKind::Timestamp => {
                // Compared at stored precision so the formatted value moves too.
                let now = truncate_timestamp(self.clock.now());
                match previous {
                    Some(VersionValue::Timestamp(prior)) if now <= truncate_timestamp(*prior) => {
                        VersionValue::Timestamp(truncate_timestamp(*prior) + Duration::microseconds(1))
                    }
                    _ => VersionValue::Timestamp(now),
                }
            }
        }
    }

    /// "Must not exist" when no prior version is known, otherwise "must equal
    /// the prior formatted value".
    pub fn build_condition(
        &self,
        attribute: &VersionAttribute,
        previous: Option<&VersionValue>,
    ) -> Condition {
        match previous {
            Some(value) if !value.is_unset() => Condition::Equals {
                name: attribute.name.clone(),
                value: value.format(),
            },
            _ => Condition::NotExists {
                name: attribute.name.clone(),
            },
        }
    }

    /// Builds a conditional put and returns the version it will store.
    pub fn versioned_put(
        &self,
        domain: &str,
        item_name: &str,
        mut attributes: Attributes,
        attribute: &VersionAttribute,
        previous: Option<&VersionValue>,
    ) -> Result<(PutRequest, VersionValue)> {
        check_kind(attribute, previous)?;
        let next = self.next_version(attribute.kind, previous);
        let condition = self.build_condition(attribute, previous);
        attributes.insert(attribute.name.clone(), next.format());

        let request = PutRequest {
            domain: domain.to_string(),
            item_name: item_name.to_string(),
            attributes,
            condition: Some(condition),
        };
        Ok((request, next))
    }

    /// Stamps the next version on a batch item. Batch puts never carry a
    /// predicate, so concurrent writers are not detected on this path.
    pub fn stamp_batch_item(
        &self,
        item_name: &str,
        mut attributes: Attributes,
        attribute: &VersionAttribute,
        previous: Option<&VersionValue>,
    ) -> Result<(BatchItem, VersionValue)> {
        check_kind(attribute, previous)?;
        let next = self.next_version(attribute.kind, previous);
        attributes.insert(attribute.name.clone(), next.format());
        Ok((
            BatchItem {
                item_name: item_name.to_string(),
                attributes,
            },
            next,
        ))
    }
}

fn check_kind(attribute: &VersionAttribute, previous: Option<&VersionValue>) -> Result<()> {
    match previous {
        Some(value) if value.kind() != attribute.kind => Err(DbError::InvalidArgument(format!(
            "version attribute '{}' is {:?} but the record holds a {:?} value",
            attribute.name,
            attribute.kind,
            value.kind()
        ))),
        _ => Ok(()),
    }
}
