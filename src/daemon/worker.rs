use super::{DaemonShared, DaemonState};
use crate::core::{DbError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{Level, event};

/// Handle of the spawned reconciliation loop.
pub(super) struct ReconciliationWorker {
    stop_tx: Option<oneshot::Sender<()>>,
    join_handle: Option<JoinHandle<()>>,
}

impl ReconciliationWorker {
    /// Spawns the loop on the current tokio runtime.
    pub(super) fn spawn(
        runtime: &tokio::runtime::Handle,
        shared: Arc<DaemonShared>,
        retry_interval: Duration,
    ) -> Self {
        let (stop_tx, mut stop_rx) = oneshot::channel::<()>();

        let join_handle = runtime.spawn(async move {
            event!(Level::INFO, machine_id = %shared.machine_id(), "reconciliation daemon started");
            loop {
                // A requested stop waits for the running cycle to finish.
                if let Err(err) = shared.run_cycle().await {
                    event!(Level::ERROR, error = %err, "reconciliation cycle failed");
                }

                tokio::select! {
                    biased;
                    _ = &mut stop_rx => {
                        break;
                    }
                    _ = sleep(retry_interval) => {}
                }
            }
            event!(Level::INFO, "reconciliation daemon stopped");
        });

        Self {
            stop_tx: Some(stop_tx),
            join_handle: Some(join_handle),
        }
    }

    /// Signals the loop to exit and waits for it.
    pub(super) async fn stop(mut self, shared: &DaemonShared) -> Result<()> {
        shared.set_state(DaemonState::Stopping)?;
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        let joined = match self.join_handle.take() {
            Some(join_handle) => join_handle.await,
            None => Ok(()),
        };
        shared.set_state(DaemonState::Stopped)?;
        joined.map_err(|err| {
            DbError::InvalidState(format!("reconciliation worker join: {}", err))
        })
    }
}

impl Drop for ReconciliationWorker {
    fn drop(&mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }
        if let Some(join_handle) = self.join_handle.take() {
            join_handle.abort();
        }
    }
}
