// ============================================================================
// Reconciliation Daemon
// ============================================================================
//
// Finds intent log rows older than the reprocess delay and replays them
// through the same propagation path a commit uses. Rows are read inside a
// consistency scope, oldest version first, one page at a time. Replay is
// at-least-once: a step applied before a crash may be applied again.
//
//   Stopped --start--> Running --stop--> Stopping --> Stopped
//
// ============================================================================

mod worker;

use crate::client::ReliableConfig;
use crate::consistency::CallContext;
use crate::coordinator::Propagator;
use crate::core::{Clock, DbError, Result, StepFailureKind};
use crate::journal::{DurableIntentLog, StepScan};
use chrono::{DateTime, Duration, Utc};
use std::sync::{Arc, Mutex};
use tracing::{Instrument, Level, event, info_span};
use worker::ReconciliationWorker;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DaemonState {
    Stopped,
    Running,
    Stopping,
}

/// Result of one scan-and-replay pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub pages: usize,
    pub scanned: usize,
    pub applied: usize,
    pub conflicts: usize,
    /// Steps that failed again and stay in the log.
    pub failed: usize,
    pub undecodable: usize,
}

/// Cumulative counters since the daemon was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DaemonStats {
    pub cycles: u64,
    pub applied: u64,
    pub conflicts: u64,
    pub failed: u64,
    pub undecodable: u64,
    pub last_error: Option<String>,
    pub last_cycle_at: Option<DateTime<Utc>>,
}

struct DaemonShared {
    log: Arc<DurableIntentLog>,
    propagator: Propagator,
    clock: Arc<dyn Clock>,
    reprocess_delay: Duration,
    page_size: usize,
    state: Mutex<DaemonState>,
    stats: Mutex<DaemonStats>,
}

impl DaemonShared {
    fn machine_id(&self) -> &str {
        &self.log.identity().machine_id
    }

    fn set_state(&self, state: DaemonState) -> Result<()> {
        *self.state.lock()? = state;
        Ok(())
    }

    fn cutoff(&self) -> DateTime<Utc> {
        self.clock.now() - self.reprocess_delay
    }

    async fn run_cycle(&self) -> Result<CycleReport> {
        let machine_id = self.machine_id().to_string();
        self.reconcile(&machine_id).await
    }

    async fn reconcile(&self, machine_id: &str) -> Result<CycleReport> {
        let cutoff = self.cutoff();
        let span = info_span!(
            "reliable.reconcile",
            machine_id = %machine_id,
            cutoff = %cutoff
        );

        let result = async {
            let mut ctx = CallContext::new();
            let scope = ctx.enter_consistency_scope();
            let scan = self
                .log
                .scan_host(machine_id, cutoff, self.page_size, scope.is_consistent());
            self.replay(scan).await
        }
        .instrument(span)
        .await;

        self.record_cycle(&result)?;
        result
    }

    async fn replay(&self, mut scan: StepScan<'_>) -> Result<CycleReport> {
        let mut report = CycleReport::default();
        while let Some(page) = scan.next_page().await? {
            report.pages += 1;
            report.scanned += page.steps.len() + page.undecodable.len();

            for (item_name, err) in &page.undecodable {
                event!(Level::WARN, row = %item_name, error = %err, "skipping undecodable log row");
            }
            report.undecodable += page.undecodable.len();

            if page.steps.is_empty() {
                continue;
            }
            let outcome = self.propagator.propagate(page.steps).await;
            report.applied += outcome.applied.len();
            for failure in &outcome.failures {
                match failure.kind {
                    StepFailureKind::Conflict => report.conflicts += 1,
                    StepFailureKind::Transient | StepFailureKind::Rejected => report.failed += 1,
                }
            }
        }

        if report.scanned > 0 {
            event!(
                Level::INFO,
                scanned = report.scanned,
                applied = report.applied,
                conflicts = report.conflicts,
                failed = report.failed,
                "reconciliation cycle finished"
            );
        }
        Ok(report)
    }

    fn record_cycle(&self, result: &Result<CycleReport>) -> Result<()> {
        let mut stats = self.stats.lock()?;
        stats.cycles += 1;
        stats.last_cycle_at = Some(self.clock.now());
        match result {
            Ok(report) => {
                stats.applied += report.applied as u64;
                stats.conflicts += report.conflicts as u64;
                stats.failed += report.failed as u64;
                stats.undecodable += report.undecodable as u64;
            }
            Err(err) => stats.last_error = Some(err.to_string()),
        }
        Ok(())
    }
}

/// Background worker replaying stranded steps of this host.
pub struct ReconciliationDaemon {
    shared: Arc<DaemonShared>,
    retry_interval: std::time::Duration,
    /// Held across a stop's join so concurrent stops all wait for it.
    worker: tokio::sync::Mutex<Option<ReconciliationWorker>>,
}

impl ReconciliationDaemon {
    pub fn new(
        log: Arc<DurableIntentLog>,
        propagator: Propagator,
        clock: Arc<dyn Clock>,
        config: &ReliableConfig,
    ) -> Self {
        let reprocess_delay =
            Duration::milliseconds(i64::try_from(config.reprocess_delay_ms).unwrap_or(i64::MAX));
        Self {
            shared: Arc::new(DaemonShared {
                log,
                propagator,
                clock,
                reprocess_delay,
                page_size: config.scan_page_size,
                state: Mutex::new(DaemonState::Stopped),
                stats: Mutex::new(DaemonStats::default()),
            }),
            retry_interval: std::time::Duration::from_millis(config.retry_interval_ms),
            worker: tokio::sync::Mutex::new(None),
        }
    }

    pub fn state(&self) -> Result<DaemonState> {
        Ok(*self.shared.state.lock()?)
    }

    pub fn is_running(&self) -> Result<bool> {
        Ok(self.state()? == DaemonState::Running)
    }

    pub fn stats(&self) -> Result<DaemonStats> {
        Ok(self.shared.stats.lock()?.clone())
    }

    /// Spawns the background loop and returns immediately. Must be called
    /// from within a tokio runtime.
    pub fn start(&self) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|err| {
            DbError::InvalidState(format!("reconciliation daemon needs a tokio runtime: {}", err))
        })?;

        let mut worker = self.worker.try_lock().map_err(|_| {
            DbError::InvalidState("reconciliation daemon is stopping".to_string())
        })?;
        {
            let mut state = self.shared.state.lock()?;
            if *state != DaemonState::Stopped || worker.is_some() {
                return Err(DbError::InvalidState(format!(
                    "reconciliation daemon is already {:?}",
                    *state
                )));
            }
            *state = DaemonState::Running;
        }

        *worker = Some(ReconciliationWorker::spawn(
            &runtime,
            self.shared.clone(),
            self.retry_interval,
        ));
        Ok(())
    }

    /// Stops the loop, interrupting its sleep, and waits until the current
    /// cycle has finished. Stopping a stopped daemon is a no-op; a stop
    /// racing another one returns once the loop has exited.
    pub async fn stop(&self) -> Result<()> {
        let mut worker = self.worker.lock().await;
        match worker.take() {
            Some(running) => running.stop(&self.shared).await,
            None => Ok(()),
        }
    }

    /// Runs one pass over this host's stranded steps.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        self.shared.run_cycle().await
    }

    /// Runs one pass over another host's stranded steps.
    ///
    /// The background loop only ever replays its own host's rows; this is
    /// the recovery path for a host that will not come back.
    pub async fn drain_host(&self, machine_id: &str) -> Result<CycleReport> {
        if machine_id.trim().is_empty() {
            return Err(DbError::InvalidArgument(
                "machine id must not be empty".to_string(),
            ));
        }
        self.shared.reconcile(machine_id).await
    }
}
