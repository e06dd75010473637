use crate::core::{DbError, Result, StepFailure, StepFailureKind};
use crate::journal::{DurableIntentLog, WriteStep};
use crate::store::{Store, apply_request};
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{Instrument, Level, event, info_span};

/// Applies logged steps to the store and removes their log rows.
///
/// Shared by inline commits and the reconciliation daemon, so a stranded
/// step is replayed exactly the way it would have been applied the first
/// time.
#[derive(Clone)]
pub struct Propagator {
    store: Arc<dyn Store>,
    log: Arc<DurableIntentLog>,
    permits: Arc<Semaphore>,
}

/// Outcome of one fan-out, collected after every unit finished.
#[derive(Debug, Clone, Default)]
pub struct PropagationReport {
    /// Steps applied to the store.
    pub applied: Vec<String>,
    pub failures: Vec<StepFailure>,
    /// Applied steps whose log row could not be removed. A later replay
    /// re-applies them harmlessly.
    pub cleanup_pending: Vec<String>,
}

impl PropagationReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn conflicts(&self) -> usize {
        self.failures
            .iter()
            .filter(|failure| failure.kind == StepFailureKind::Conflict)
            .count()
    }
}

enum UnitOutcome {
    Applied { cleaned: bool },
    Failed(StepFailure),
}

impl Propagator {
    pub fn new(store: Arc<dyn Store>, log: Arc<DurableIntentLog>, max_parallel_steps: usize) -> Self {
        Self {
            store,
            log,
            permits: Arc::new(Semaphore::new(max_parallel_steps.max(1))),
        }
    }

    /// Starts one unit per step and waits for all of them. A failing unit
    /// never cancels the others.
    pub async fn propagate(&self, steps: Vec<WriteStep>) -> PropagationReport {
        let mut step_ids = Vec::with_capacity(steps.len());
        let mut handles = Vec::with_capacity(steps.len());
        for step in steps {
            step_ids.push(step.id.clone());
            let unit = self.clone();
            handles.push(tokio::spawn(async move { unit.run_unit(step).await }));
        }

        let mut report = PropagationReport::default();
        for (step_id, joined) in step_ids.into_iter().zip(join_all(handles).await) {
            match joined {
                Ok(UnitOutcome::Applied { cleaned }) => {
                    if !cleaned {
                        report.cleanup_pending.push(step_id.clone());
                    }
                    report.applied.push(step_id);
                }
                Ok(UnitOutcome::Failed(failure)) => report.failures.push(failure),
                Err(err) => {
                    event!(Level::ERROR, step_id = %step_id, error = %err, "propagation task aborted");
                    report.failures.push(StepFailure {
                        step_id,
                        kind: StepFailureKind::Rejected,
                        message: format!("propagation task aborted: {}", err),
                        retained_in_log: true,
                    });
                }
            }
        }
        report
    }

    async fn acquire_permit(&self) -> Result<OwnedSemaphorePermit> {
        self.permits
            .clone()
            .acquire_owned()
            .await
            .map_err(|_| DbError::InvalidState("propagation semaphore closed".to_string()))
    }

    async fn run_unit(&self, step: WriteStep) -> UnitOutcome {
        let span = info_span!(
            "reliable.propagate",
            step_id = %step.id,
            reliable_write_id = %step.reliable_write_id,
            kind = step.request.kind_name(),
            domain = step.request.domain()
        );
        async move {
            let _permit = match self.acquire_permit().await {
                Ok(permit) => permit,
                Err(err) => return UnitOutcome::Failed(StepFailure::from_error(&step.id, &err)),
            };

            match apply_request(self.store.as_ref(), step.request).await {
                Ok(()) => match self.log.delete(&step.id).await {
                    Ok(()) => {
                        event!(Level::DEBUG, "step applied");
                        UnitOutcome::Applied { cleaned: true }
                    }
                    Err(err) => {
                        event!(Level::WARN, error = %err, "step applied but its log row remains");
                        UnitOutcome::Applied { cleaned: false }
                    }
                },
                Err(err) if err.is_version_conflict() => {
                    // Replaying a conflicting step can never succeed.
                    let mut failure = StepFailure::from_error(&step.id, &err);
                    if let Err(delete_err) = self.log.delete(&step.id).await {
                        event!(Level::WARN, error = %delete_err, "could not drop conflicting step");
                        failure.retained_in_log = true;
                    }
                    event!(Level::INFO, error = %err, "step rejected by version check");
                    UnitOutcome::Failed(failure)
                }
                Err(err) => {
                    event!(Level::WARN, error = %err, "step left in log for retry");
                    UnitOutcome::Failed(StepFailure::from_error(&step.id, &err))
                }
            }
        }
        .instrument(span)
        .await
    }
}
