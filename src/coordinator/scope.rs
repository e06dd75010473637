use super::{PropagationReport, Propagator};
use crate::core::{DbError, ItemKey, Result};
use crate::journal::{DurableIntentLog, WriteBatch};
use crate::store::StoreRequest;
use std::fmt;
use std::sync::Arc;
use tracing::{Instrument, Level, event, info_span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordinatorState {
    Open,
    Committing,
    Closed,
}

/// Summary of a fully propagated reliable write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitReport {
    pub reliable_write_id: String,
    pub steps: usize,
    pub applied: usize,
    /// Applied steps whose log rows the daemon will clean up.
    pub cleanup_pending: usize,
}

/// Buffers store mutations and commits them as one reliable write.
pub struct WriteCoordinator {
    reliable_write_id: String,
    batch: Option<WriteBatch>,
    state: CoordinatorState,
    log: Arc<DurableIntentLog>,
    propagator: Propagator,
}

impl WriteCoordinator {
    pub fn open(log: Arc<DurableIntentLog>, propagator: Propagator, max_batch_size: usize) -> Self {
        let batch = WriteBatch::new(max_batch_size);
        Self {
            reliable_write_id: batch.reliable_write_id().to_string(),
            batch: Some(batch),
            state: CoordinatorState::Open,
            log,
            propagator,
        }
    }

    pub fn reliable_write_id(&self) -> &str {
        &self.reliable_write_id
    }

    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == CoordinatorState::Open
    }

    /// Buffered step count. Zero once the batch was committed or discarded.
    pub fn len(&self) -> usize {
        self.batch.as_ref().map_or(0, WriteBatch::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Items written by the buffered steps.
    pub fn touched_keys(&self) -> Vec<ItemKey> {
        self.batch.as_ref().map_or_else(Vec::new, |batch| {
            batch
                .steps()
                .iter()
                .flat_map(|step| step.request.touched_keys())
                .collect()
        })
    }

    /// Buffers one mutation and returns its step id.
    pub fn add_step(&mut self, request: StoreRequest) -> Result<String> {
        let batch = match (self.state, self.batch.as_mut()) {
            (CoordinatorState::Open, Some(batch)) => batch,
            _ => {
                return Err(DbError::InvalidState(format!(
                    "reliable write {} is {:?} and accepts no more steps",
                    self.reliable_write_id, self.state
                )));
            }
        };
        batch.push(request).map(str::to_string)
    }

    /// Persists the batch to the intent log, then propagates every step.
    ///
    /// Returns only after all propagation units finished. If any step
    /// failed, the error lists each failure; failed non-conflict steps stay
    /// in the log for the reconciliation daemon. The coordinator is closed
    /// afterwards whatever the outcome.
    pub async fn commit(&mut self) -> Result<CommitReport> {
        if self.state != CoordinatorState::Open {
            return Err(DbError::InvalidState(format!(
                "reliable write {} was already committed or closed",
                self.reliable_write_id
            )));
        }
        self.state = CoordinatorState::Committing;
        let batch = self.batch.take();

        let span = info_span!(
            "reliable.commit",
            reliable_write_id = %self.reliable_write_id,
            steps = batch.as_ref().map_or(0, WriteBatch::len)
        );
        let result = self.commit_batch(batch).instrument(span).await;
        self.state = CoordinatorState::Closed;
        result
    }

    async fn commit_batch(&self, batch: Option<WriteBatch>) -> Result<CommitReport> {
        let Some(batch) = batch.filter(|batch| !batch.is_empty()) else {
            event!(Level::DEBUG, "empty reliable write committed");
            return Ok(self.report(0, &PropagationReport::default()));
        };

        let steps = self.log.seal(batch)?;
        let step_count = steps.len();
        self.log.append(&steps).await?;

        let propagation = self.propagator.propagate(steps).await;
        if !propagation.is_success() {
            event!(
                Level::WARN,
                failed = propagation.failures.len(),
                applied = propagation.applied.len(),
                "reliable write partially propagated"
            );
            return Err(DbError::CommitFailed {
                reliable_write_id: self.reliable_write_id.clone(),
                failures: propagation.failures,
            });
        }

        event!(Level::INFO, applied = propagation.applied.len(), "reliable write committed");
        Ok(self.report(step_count, &propagation))
    }

    fn report(&self, steps: usize, propagation: &PropagationReport) -> CommitReport {
        CommitReport {
            reliable_write_id: self.reliable_write_id.clone(),
            steps,
            applied: propagation.applied.len(),
            cleanup_pending: propagation.cleanup_pending.len(),
        }
    }

    /// Discards any buffered steps without writing them.
    pub fn close(&mut self) {
        if self.is_open() && !self.is_empty() {
            event!(
                Level::WARN,
                reliable_write_id = %self.reliable_write_id,
                discarded = self.len(),
                "reliable write closed without commit"
            );
        }
        self.batch = None;
        self.state = CoordinatorState::Closed;
    }
}

impl fmt::Debug for WriteCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteCoordinator")
            .field("reliable_write_id", &self.reliable_write_id)
            .field("state", &self.state)
            .field("steps", &self.len())
            .finish()
    }
}
