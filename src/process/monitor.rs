use crate::error::{Result, WardenError};
use crate::process::supervisor::Supervisor;
use crate::state::ProcessFilter;
use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};
use tracing::{debug, error};

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Point-in-time resource usage of one OS process
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    /// CPU usage in percent
    pub cpu: f64,
    /// Resident memory in MB
    pub memory_mb: f64,
}

/// Source of per-pid resource samples.
///
/// Implementations return [`WardenError::ProcessGone`] when no live process
/// matches the pid; any other error is treated as a transient failure.
pub trait ResourceSampler: Send {
    fn sample(&mut self, pid: u32) -> Result<ResourceSample>;
}

/// Samples the live process table through sysinfo
pub struct SysinfoSampler {
    system: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
        }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&mut self, pid: u32) -> Result<ResourceSample> {
        let sys_pid = Pid::from_u32(pid);

        self.system.refresh_processes_specifics(
            ProcessesToUpdate::Some(&[sys_pid]),
            true,
            ProcessRefreshKind::everything(),
        );

        match self.system.process(sys_pid) {
            // A zombie has exited and only waits to be reaped
            Some(process) if process.status() != sysinfo::ProcessStatus::Zombie => {
                Ok(ResourceSample {
                    cpu: f64::from(process.cpu_usage()),
                    memory_mb: process.memory() as f64 / BYTES_PER_MB,
                })
            }
            _ => Err(WardenError::ProcessGone(pid)),
        }
    }
}

/// Outcome counts of one monitoring pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MonitorReport {
    pub sampled: usize,
    pub gone: usize,
    pub failed: usize,
}

/// Periodic resource sampler for every running record
pub struct Monitor {
    sampler: Box<dyn ResourceSampler>,
}

impl Monitor {
    pub fn new(sampler: Box<dyn ResourceSampler>) -> Self {
        Self { sampler }
    }

    pub fn with_sysinfo() -> Self {
        Self::new(Box::new(SysinfoSampler::new()))
    }

    /// Sample every running record and store cpu and memory on it.
    ///
    /// # Arguments
    /// * `supervisor` - Owner of the records; all writes go through it
    ///
    /// # Returns
    /// Counts of updated records, records whose pid vanished (now crashed),
    /// and failed samples. One record's failure never aborts the pass.
    pub fn sample_all(&mut self, supervisor: &Supervisor) -> MonitorReport {
        let mut report = MonitorReport::default();

        let running = match supervisor.find_by(&ProcessFilter::running()) {
            Ok(records) => records,
            Err(e) => {
                error!("Failed to load running processes for monitoring: {}", e);
                return report;
            }
        };

        for record in running {
            let Some(pid) = record.pid else {
                continue;
            };

            match self.sampler.sample(pid) {
                Ok(sample) => {
                    match supervisor.apply_sample(record.id, pid, sample.cpu, sample.memory_mb) {
                        Ok(true) => report.sampled += 1,
                        Ok(false) => {}
                        Err(e) => {
                            error!("Failed to store metrics for process {}: {}", record.name, e);
                            report.failed += 1;
                        }
                    }
                }
                Err(WardenError::ProcessGone(_)) => {
                    error!(
                        "Error monitoring process {}: no matching pid found: {}",
                        record.name, pid
                    );
                    match supervisor.mark_gone(record.id, pid) {
                        Ok(true) => report.gone += 1,
                        Ok(false) => {}
                        Err(e) => {
                            error!("Failed to mark process {} as crashed: {}", record.name, e);
                            report.failed += 1;
                        }
                    }
                }
                Err(e) => {
                    error!("Error monitoring process {}: {}", record.name, e);
                    report.failed += 1;
                }
            }
        }

        debug!(
            "Monitoring pass: {} sampled, {} gone, {} failed",
            report.sampled, report.gone, report.failed
        );

        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::WardenConfig;
    use crate::process::types::{ProcessRecord, ProcessStatus, DEFAULT_MAX_MEMORY_MB};
    use crate::state::{MemoryStore, ProcessRepository, Store};
    use std::collections::HashMap;
    use std::sync::Arc;

    enum Scripted {
        Sample(f64, f64),
        Gone,
        Fail,
    }

    struct ScriptedSampler(HashMap<u32, Scripted>);

    impl ResourceSampler for ScriptedSampler {
        fn sample(&mut self, pid: u32) -> Result<ResourceSample> {
            match self.0.get(&pid) {
                Some(Scripted::Sample(cpu, memory_mb)) => Ok(ResourceSample {
                    cpu: *cpu,
                    memory_mb: *memory_mb,
                }),
                Some(Scripted::Gone) | None => Err(WardenError::ProcessGone(pid)),
                Some(Scripted::Fail) => Err(WardenError::MetricSample("boom".to_string())),
            }
        }
    }

    fn seeded(pids: &[u32]) -> (Arc<MemoryStore>, Supervisor, Vec<ProcessRecord>) {
        let store = Arc::new(MemoryStore::new());
        let mut records = Vec::new();
        for pid in pids {
            let mut record = ProcessRecord::new("w", "sleep 100", DEFAULT_MAX_MEMORY_MB);
            record.mark_running(*pid);
            store.save(&record).unwrap();
            records.push(record);
        }
        let shared: Arc<dyn Store> = store.clone();
        let supervisor = Supervisor::new(shared, &WardenConfig::default());
        (store, supervisor, records)
    }

    #[tokio::test]
    async fn test_sample_all_updates_usage() {
        let (store, supervisor, records) = seeded(&[101, 102]);
        let mut monitor = Monitor::new(Box::new(ScriptedSampler(HashMap::from([
            (101, Scripted::Sample(42.5, 128.0)),
            (102, Scripted::Sample(3.0, 16.0)),
        ]))));

        let report = monitor.sample_all(&supervisor);
        assert_eq!(report.sampled, 2);

        let first = store.find(records[0].id).unwrap().unwrap();
        assert_eq!(first.cpu, 42.5);
        assert_eq!(first.memory, 128.0);
        assert_eq!(first.status, ProcessStatus::Running);
    }

    #[tokio::test]
    async fn test_gone_pid_marks_crashed_without_restart_attempt() {
        let (store, supervisor, records) = seeded(&[201, 202]);
        let mut monitor = Monitor::new(Box::new(ScriptedSampler(HashMap::from([
            (201, Scripted::Gone),
            (202, Scripted::Sample(1.0, 1.0)),
        ]))));

        let report = monitor.sample_all(&supervisor);
        assert_eq!(report.gone, 1);
        assert_eq!(report.sampled, 1);

        let gone = store.find(records[0].id).unwrap().unwrap();
        assert_eq!(gone.status, ProcessStatus::Crashed);
        assert_eq!(gone.pid, None);
        assert_eq!(gone.restart_attempts, 0);

        let alive = store.find(records[1].id).unwrap().unwrap();
        assert_eq!(alive.status, ProcessStatus::Running);
    }

    #[tokio::test]
    async fn test_sampling_failure_leaves_record_untouched() {
        let (store, supervisor, records) = seeded(&[301]);
        let mut monitor = Monitor::new(Box::new(ScriptedSampler(HashMap::from([(
            301,
            Scripted::Fail,
        )]))));

        let report = monitor.sample_all(&supervisor);
        assert_eq!(report.failed, 1);

        let record = store.find(records[0].id).unwrap().unwrap();
        assert_eq!(record.status, ProcessStatus::Running);
        assert_eq!(record.pid, Some(301));
    }

    #[tokio::test]
    async fn test_stopped_records_are_not_sampled() {
        let store = Arc::new(MemoryStore::new());
        let record = ProcessRecord::new("w", "sleep 100", DEFAULT_MAX_MEMORY_MB);
        store.save(&record).unwrap();
        let shared: Arc<dyn Store> = store.clone();
        let supervisor = Supervisor::new(shared, &WardenConfig::default());

        let mut monitor = Monitor::new(Box::new(ScriptedSampler(HashMap::new())));
        assert_eq!(monitor.sample_all(&supervisor), MonitorReport::default());
    }

    #[test]
    fn test_sysinfo_samples_own_process() {
        let mut sampler = SysinfoSampler::new();
        let sample = sampler.sample(std::process::id()).unwrap();
        assert!(sample.memory_mb > 0.0);
        assert!(sample.cpu >= 0.0);
    }

    #[test]
    fn test_sysinfo_missing_pid() {
        let mut sampler = SysinfoSampler::new();
        // Above the default pid_max on Linux
        let result = sampler.sample(4_194_304 + 12_345);
        assert!(matches!(result, Err(WardenError::ProcessGone(_))));
    }
}
