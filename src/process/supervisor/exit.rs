//! Reconciles OS exit notifications with the stored records and drives
//! automatic crash restarts.

use super::Supervisor;
use crate::error::Result;
use crate::process::handle::ExitOutcome;
use crate::process::types::{ProcessId, ProcessRecord, ProcessStatus};
use tokio::process::Child;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

impl Supervisor {
    /// Own `child` until it exits, publish the outcome, then reconcile it
    pub(super) fn watch_exit(
        &self,
        id: ProcessId,
        name: String,
        generation: u64,
        mut child: Child,
        exited: watch::Sender<Option<ExitOutcome>>,
    ) {
        let supervisor = self.clone();

        tokio::spawn(async move {
            let outcome = match child.wait().await {
                Ok(status) => ExitOutcome::from(status),
                Err(e) => {
                    error!("Failed to wait for process {} ({}): {}", name, id, e);
                    ExitOutcome::unknown()
                }
            };

            exited.send_replace(Some(outcome));
            supervisor.handle_exit(id, generation, outcome).await;
        });
    }

    /// Apply one exit notification.
    ///
    /// Notifications from a generation that is no longer registered are
    /// ignored: the process was stopped or replaced on purpose.
    async fn handle_exit(&self, id: ProcessId, generation: u64, outcome: ExitOutcome) {
        let guard = self.inner.locks.lock(id).await;

        if !self.inner.handles.is_current(id, generation) {
            debug!(
                "Ignoring exit of stale generation {} for process {}",
                generation, id
            );
            return;
        }

        let mut record = match self.inner.store.find(id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                warn!("Process {} exited but its record no longer exists", id);
                self.inner.handles.remove(id);
                return;
            }
            Err(e) => {
                error!("Failed to load record of exited process {}: {}", id, e);
                return;
            }
        };

        if record.status == ProcessStatus::Stopped {
            self.inner.handles.remove(id);
            return;
        }

        if outcome.is_success() {
            info!("Process {} ({}) exited with {}", record.name, id, outcome);
            record.mark_stopped();
        } else {
            error!(
                "Process {} ({}) exited with {}",
                record.name, id, outcome
            );
            record.mark_crashed();
        }

        // Keep the exited handle registered until the exit is persisted
        if let Err(e) = self.inner.store.save(&record) {
            error!("Failed to persist exit of process {}: {}", id, e);
            return;
        }
        self.inner.handles.remove(id);
        drop(guard);

        if record.status == ProcessStatus::Crashed {
            self.schedule_crash_restart(&record);
        }
    }

    fn schedule_crash_restart(&self, record: &ProcessRecord) {
        let policy = &self.inner.policy;

        if !policy.should_restart(record.restart_attempts) {
            warn!(
                "Process {} ({}) reached max restart attempts ({}), not restarting",
                record.name, record.id, policy.max_attempts
            );
            return;
        }

        info!(
            "Scheduling restart of process {} ({}) in {:?}",
            record.name, record.id, policy.crash_delay
        );

        let supervisor = self.clone();
        let id = record.id;
        self.inner.scheduler.schedule_after(policy.crash_delay, async move {
            match supervisor.restart_after_crash(id).await {
                Ok(Some(record)) => info!(
                    "Process {} ({}) restarted after crash (attempt {})",
                    record.name, id, record.restart_attempts
                ),
                Ok(None) => {}
                Err(e) => error!("Automatic restart of process {} failed: {}", id, e),
            }
        });
    }

    /// Restart `id` if it is still crashed and under the cap once the delay
    /// has elapsed; an operator action in between wins.
    async fn restart_after_crash(&self, id: ProcessId) -> Result<Option<ProcessRecord>> {
        let _guard = self.inner.locks.lock(id).await;

        let Some(record) = self.inner.store.find(id)? else {
            return Ok(None);
        };

        if record.status != ProcessStatus::Crashed || self.inner.handles.contains(id) {
            debug!(
                "Process {} is {} now, skipping automatic restart",
                id, record.status
            );
            return Ok(None);
        }

        if !self.inner.policy.should_restart(record.restart_attempts) {
            return Ok(None);
        }

        self.restart_locked(id).await.map(Some)
    }
}
