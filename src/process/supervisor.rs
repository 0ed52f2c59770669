use crate::config::WardenConfig;
use crate::error::{Result, WardenError};
use crate::process::handle::{ExitOutcome, HandleTable, LockTable, RuntimeHandle};
use crate::process::output::{forward_lines, OutputStream};
use crate::process::restart::RestartPolicy;
use crate::process::spawner::{spawn_command, SpawnedProcess};
use crate::process::types::{NewScalingRule, ProcessId, ProcessRecord, ProcessStatus, ScalingRule};
use crate::scheduler::Scheduler;
use crate::state::{ProcessFilter, Store};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

mod exit;

/// How long to wait for the exit notification after SIGKILL
const KILL_WAIT: Duration = Duration::from_secs(2);

/// Owns the lifecycle of every supervised process.
///
/// The supervisor is the only component that changes a record's status or
/// pid, and the only one holding runtime handles. Operations on one process
/// id are serialized through a per-id lock; operations on different ids run
/// concurrently. Cloning is cheap and every clone drives the same state.
#[derive(Clone)]
pub struct Supervisor {
    inner: Arc<Inner>,
}

struct Inner {
    store: Arc<dyn Store>,
    policy: RestartPolicy,
    shell: PathBuf,
    preempt_same_name: bool,
    default_max_memory: f64,
    stop_grace_period: Duration,
    handles: HandleTable,
    locks: LockTable,
    scheduler: Scheduler,
    generation: AtomicU64,
}

impl Supervisor {
    pub fn new(store: Arc<dyn Store>, config: &WardenConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                store,
                policy: RestartPolicy::from_config(config),
                shell: config.shell.clone(),
                preempt_same_name: config.preempt_same_name,
                default_max_memory: config.default_max_memory_mb,
                stop_grace_period: config.stop_grace_period(),
                handles: HandleTable::default(),
                locks: LockTable::default(),
                scheduler: Scheduler::new(),
                generation: AtomicU64::new(0),
            }),
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub fn list(&self) -> Result<Vec<ProcessRecord>> {
        self.inner.store.find_by(&ProcessFilter::all())
    }

    pub fn find_by(&self, filter: &ProcessFilter) -> Result<Vec<ProcessRecord>> {
        self.inner.store.find_by(filter)
    }

    pub fn get(&self, id: ProcessId) -> Result<ProcessRecord> {
        self.inner
            .store
            .find(id)?
            .ok_or_else(|| WardenError::ProcessNotFound(id.to_string()))
    }

    /// Whether a live runtime handle is registered for `id`
    pub fn has_handle(&self, id: ProcessId) -> bool {
        self.inner.handles.contains(id)
    }

    pub fn handle_count(&self) -> usize {
        self.inner.handles.len()
    }

    /// Operator start: a fresh record with zeroed restart attempts.
    ///
    /// With same-name preemption enabled, every running or crashed record
    /// sharing `name` is stopped first, which also cancels its pending crash
    /// restart. Spawn failures yield a `crashed` record, not an error.
    pub async fn start(&self, name: &str, command: &str) -> Result<ProcessRecord> {
        if self.inner.preempt_same_name {
            let existing = self.inner.store.find_by(&ProcessFilter::all().named(name))?;

            for record in existing
                .into_iter()
                .filter(|r| r.status != ProcessStatus::Stopped || self.has_handle(r.id))
            {
                warn!(
                    "Process {} already exists ({}). Stopping existing process before starting a new one.",
                    name, record.id
                );
                match self.stop(record.id).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => {}
                    Err(e) => return Err(e),
                }
            }
        }

        self.spawn_instance(name, command).await
    }

    /// Start one more instance of `name` without touching existing ones
    pub async fn spawn_instance(&self, name: &str, command: &str) -> Result<ProcessRecord> {
        let mut record = ProcessRecord::new(name, command, self.inner.default_max_memory);
        let _guard = self.inner.locks.lock(record.id).await;

        match self.spawn_into(&record) {
            Ok(pid) => {
                record.mark_running(pid);
                info!("Started process {} ({}) with PID {}", name, record.id, pid);
            }
            Err(e) => {
                error!("Failed to start process {}: {}", name, e);
                record.mark_crashed();
            }
        }

        if let Err(e) = self.inner.store.save(&record) {
            if let Some(handle) = self.inner.handles.remove(record.id) {
                self.terminate(&record.name, handle).await;
            }
            return Err(e);
        }

        Ok(record)
    }

    pub async fn stop(&self, id: ProcessId) -> Result<ProcessRecord> {
        let _guard = self.inner.locks.lock(id).await;
        self.stop_locked(id).await
    }

    pub async fn restart(&self, id: ProcessId) -> Result<ProcessRecord> {
        let _guard = self.inner.locks.lock(id).await;
        self.restart_locked(id).await
    }

    /// Stop if needed, then remove the record. `None` when it never existed.
    pub async fn delete(&self, id: ProcessId) -> Result<Option<ProcessRecord>> {
        let guard = self.inner.locks.lock(id).await;

        let Some(record) = self.inner.store.find(id)? else {
            return Ok(None);
        };

        info!("Attempting to delete process {} ({})", record.name, id);

        let record = if record.is_running() || self.inner.handles.contains(id) {
            self.stop_locked(id).await?
        } else {
            record
        };

        self.inner.store.remove(id)?;
        drop(guard);
        self.inner.locks.forget(id);

        info!("Process {} ({}) has been deleted", record.name, id);

        Ok(Some(record))
    }

    pub fn add_scaling_rule(&self, rule: NewScalingRule) -> Result<ScalingRule> {
        let rule = rule.into_rule()?;
        self.inner.store.save_rule(&rule)?;

        info!(
            "Added scaling rule {} for {} ({}..={} instances)",
            rule.id, rule.process_name, rule.min_instances, rule.max_instances
        );

        Ok(rule)
    }

    pub fn scaling_rules(&self) -> Result<Vec<ScalingRule>> {
        self.inner.store.rules()
    }

    /// Respawn records persisted as running by a previous supervisor run.
    ///
    /// The record keeps its id and restart attempts. Returns how many records
    /// are running again.
    pub async fn recover(&self) -> Result<usize> {
        let persisted = self.inner.store.find_by(&ProcessFilter::running())?;
        let mut recovered = 0;

        for stale in persisted {
            let _guard = self.inner.locks.lock(stale.id).await;

            let Some(mut record) = self.inner.store.find(stale.id)? else {
                continue;
            };
            if !record.is_running() || self.inner.handles.contains(record.id) {
                continue;
            }

            info!(
                "Restoring process {} ({}) from previous state",
                record.name, record.id
            );

            record.record_usage(0.0, 0.0);
            match self.spawn_into(&record) {
                Ok(pid) => {
                    record.mark_running(pid);
                    recovered += 1;
                }
                Err(e) => {
                    error!("Failed to restore persisted process {}: {}", record.name, e);
                    record.mark_crashed();
                }
            }

            self.inner.store.save(&record)?;
        }

        Ok(recovered)
    }

    /// Cancel scheduled work and stop every process with a live handle
    pub async fn shutdown(&self) {
        self.inner.scheduler.shutdown();

        let ids = self.inner.handles.ids();
        info!("Stopping {} processes gracefully", ids.len());

        for id in ids {
            if let Err(e) = self.stop(id).await {
                error!("Failed to stop process {}: {}", id, e);
            }
        }
    }

    /// Store a resource sample for a record that is still running on `pid`.
    ///
    /// Skips records busy in another lifecycle operation; returns whether the
    /// sample was applied.
    pub(crate) fn apply_sample(
        &self,
        id: ProcessId,
        pid: u32,
        cpu: f64,
        memory_mb: f64,
    ) -> Result<bool> {
        let Some(_guard) = self.inner.locks.try_lock(id) else {
            debug!("Process {} busy, skipping metrics update", id);
            return Ok(false);
        };

        let Some(mut record) = self.inner.store.find(id)? else {
            return Ok(false);
        };
        if record.pid != Some(pid) {
            return Ok(false);
        }

        record.record_usage(cpu, memory_mb);
        self.inner.store.save(&record)?;
        Ok(true)
    }

    /// Crash detection from the monitor: `pid` no longer exists.
    ///
    /// Leaves restart attempts and the runtime handle alone; if the exit
    /// watcher still reports the exit it converges on the same record.
    pub(crate) fn mark_gone(&self, id: ProcessId, pid: u32) -> Result<bool> {
        let Some(_guard) = self.inner.locks.try_lock(id) else {
            return Ok(false);
        };

        let Some(mut record) = self.inner.store.find(id)? else {
            return Ok(false);
        };
        if record.pid != Some(pid) {
            return Ok(false);
        }

        error!(
            "Process {} ({}) with PID {} is gone, marking as crashed",
            record.name, id, pid
        );
        record.mark_crashed();
        self.inner.store.save(&record)?;
        Ok(true)
    }

    fn find_record(&self, id: ProcessId) -> Result<ProcessRecord> {
        self.get(id)
    }

    /// Spawn the record's command and register its handle and exit watcher.
    /// The caller holds the id lock and persists the new status.
    fn spawn_into(&self, record: &ProcessRecord) -> Result<u32> {
        let SpawnedProcess { mut child, pid } = spawn_command(&self.inner.shell, &record.command)?;
        let generation = self.inner.generation.fetch_add(1, Ordering::Relaxed) + 1;

        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_lines(record.name.clone(), OutputStream::Stdout, stdout));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_lines(record.name.clone(), OutputStream::Stderr, stderr));
        }

        let (exit_tx, exit_rx) = watch::channel(None);
        let handle = RuntimeHandle {
            pid,
            generation,
            exited: exit_rx,
        };

        if let Some(previous) = self.inner.handles.insert(record.id, handle) {
            warn!(
                "Replaced runtime handle of process {} (PID {})",
                record.id, previous.pid
            );
        }

        self.watch_exit(record.id, record.name.clone(), generation, child, exit_tx);

        debug!(
            "Spawned {} ({}) as PID {} (generation {})",
            record.name, record.id, pid, generation
        );

        Ok(pid)
    }

    async fn stop_locked(&self, id: ProcessId) -> Result<ProcessRecord> {
        let mut record = self.find_record(id)?;
        let handle = self.inner.handles.remove(id);

        if record.status == ProcessStatus::Stopped && handle.is_none() {
            debug!("Process {} ({}) already stopped", record.name, id);
            return Ok(record);
        }

        info!("Attempting to stop process {} ({})", record.name, id);

        match handle {
            Some(handle) => self.terminate(&record.name, handle).await,
            None if record.is_running() => warn!(
                "No runtime handle for process {} ({}), assuming it's not running",
                record.name, id
            ),
            None => {}
        }

        record.mark_stopped();
        self.inner.store.save(&record)?;

        info!("Process {} ({}) stopped successfully", record.name, id);

        Ok(record)
    }

    async fn restart_locked(&self, id: ProcessId) -> Result<ProcessRecord> {
        let mut record = self.stop_locked(id).await?;

        info!("Attempting to restart process {} ({})", record.name, id);

        tokio::time::sleep(self.inner.policy.settle_delay).await;

        let retries = self.inner.policy.retries;
        for attempt in 1..=retries {
            match self.spawn_into(&record) {
                Ok(pid) => {
                    record.record_restart(pid);
                    self.inner.store.save(&record)?;
                    info!(
                        "Process {} ({}) restarted successfully on attempt {}",
                        record.name, id, attempt
                    );
                    return Ok(record);
                }
                Err(e) => {
                    error!(
                        "Failed to restart process {} ({}) on attempt {}: {}",
                        record.name, id, attempt, e
                    );
                    if let Some(delay) = self.inner.policy.delay_after_attempt(attempt) {
                        info!("Retrying in {:?}", delay);
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        record.mark_crashed();
        self.inner.store.save(&record)?;

        Err(WardenError::RestartExhausted {
            name: record.name,
            id: id.to_string(),
            attempts: retries,
        })
    }

    /// SIGTERM the process group, wait out the grace period, then SIGKILL.
    /// Signal failures are logged; the caller marks the record stopped anyway.
    async fn terminate(&self, name: &str, mut handle: RuntimeHandle) {
        let pid = handle.pid;

        if handle.has_exited() {
            debug!("Process {} (PID: {}) already exited", name, pid);
            return;
        }

        info!("Killing process {} (PID: {})", name, pid);

        if let Err(e) = signal_group(pid, StopSignal::Terminate) {
            error!("Failed to send SIGTERM to process {} (PID: {}): {}", name, pid, e);
        }

        let grace = self.inner.stop_grace_period;
        if wait_for_exit(&mut handle.exited, grace).await {
            debug!("Process {} (PID: {}) exited gracefully", name, pid);
            return;
        }

        warn!(
            "Process {} did not exit within {:?}, forcing kill with SIGKILL",
            name, grace
        );

        if let Err(e) = signal_group(pid, StopSignal::Kill) {
            error!("Failed to send SIGKILL to process {} (PID: {}): {}", name, pid, e);
        }

        if !wait_for_exit(&mut handle.exited, KILL_WAIT).await {
            error!("Process {} (PID: {}) still alive after SIGKILL", name, pid);
        }
    }
}

/// Wait until the exit watcher reports an outcome; true if it did in time
async fn wait_for_exit(exited: &mut watch::Receiver<Option<ExitOutcome>>, limit: Duration) -> bool {
    match tokio::time::timeout(limit, exited.wait_for(|outcome| outcome.is_some())).await {
        Ok(Ok(_)) => true,
        // The watcher only drops its sender after reaping the child
        Ok(Err(_)) => true,
        Err(_) => false,
    }
}

#[derive(Debug, Clone, Copy)]
enum StopSignal {
    Terminate,
    Kill,
}

#[cfg(unix)]
fn signal_group(pid: u32, signal: StopSignal) -> std::io::Result<()> {
    use nix::errno::Errno;
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    let signal = match signal {
        StopSignal::Terminate => Signal::SIGTERM,
        StopSignal::Kill => Signal::SIGKILL,
    };

    match killpg(Pid::from_raw(pid as i32), signal) {
        Ok(()) | Err(Errno::ESRCH) => Ok(()),
        Err(e) => Err(std::io::Error::from(e)),
    }
}

#[cfg(not(unix))]
fn signal_group(_pid: u32, _signal: StopSignal) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "process group signals require a unix platform",
    ))
}
