use crate::core::{DbError, HostIdentity, Result};
use crate::store::StoreRequest;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// One logged, individually replayable store mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteStep {
    pub id: String,
    pub reliable_write_id: String,
    pub request: StoreRequest,
    pub machine_id: String,
    pub host_name: String,
    /// Assigned when the batch is committed; orders replay.
    pub version: DateTime<Utc>,
}

/// A step buffered in an open batch, not yet durable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingStep {
    pub id: String,
    pub request: StoreRequest,
}

/// Ordered steps sharing one reliable-write id, bounded by `max_size`.
#[derive(Debug, Clone)]
pub struct WriteBatch {
    reliable_write_id: String,
    max_size: usize,
    steps: Vec<PendingStep>,
}

impl WriteBatch {
    pub fn new(max_size: usize) -> Self {
        Self {
            reliable_write_id: Uuid::new_v4().to_string(),
            max_size,
            steps: Vec::new(),
        }
    }

    pub fn reliable_write_id(&self) -> &str {
        &self.reliable_write_id
    }

    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn steps(&self) -> &[PendingStep] {
        &self.steps
    }

    /// Buffers a request and returns its step id.
    pub fn push(&mut self, request: StoreRequest) -> Result<&str> {
        request.validate()?;
        if self.steps.len() >= self.max_size {
            return Err(DbError::BatchTooLarge {
                limit: self.max_size,
            });
        }
        self.steps.push(PendingStep {
            id: Uuid::new_v4().to_string(),
            request,
        });
        Ok(self
            .steps
            .last()
            .map(|step| step.id.as_str())
            .unwrap_or_default())
    }

    /// Turns the buffered steps into log records. `versions` yields one
    /// strictly increasing stamp per step.
    pub fn seal(
        self,
        identity: &HostIdentity,
        mut versions: impl FnMut() -> DateTime<Utc>,
    ) -> Vec<WriteStep> {
        let reliable_write_id = self.reliable_write_id;
        self.steps
            .into_iter()
            .map(|pending| WriteStep {
                id: pending.id,
                reliable_write_id: reliable_write_id.clone(),
                request: pending.request,
                machine_id: identity.machine_id.clone(),
                host_name: identity.host_name.clone(),
                version: versions(),
            })
            .collect()
    }
}
