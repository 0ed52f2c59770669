//! The periodic control loop: Monitor, then scaling, then ranking.

use crate::process::{Monitor, MonitorReport, Supervisor};
use crate::scaling::{rank_by_load, ScalingAction, ScalingEngine};
use crate::scheduler::Tick;
use crate::state::ProcessFilter;
use tracing::{debug, error};

/// What one tick did
#[derive(Debug, Default)]
pub struct TickReport {
    pub monitor: MonitorReport,
    pub actions: Vec<ScalingAction>,
    pub ranked: usize,
}

pub struct ControlLoop {
    supervisor: Supervisor,
    monitor: Monitor,
    engine: ScalingEngine,
}

impl ControlLoop {
    pub fn new(supervisor: Supervisor, monitor: Monitor) -> Self {
        Self {
            supervisor,
            monitor,
            engine: ScalingEngine::new(),
        }
    }

    /// Run one full pass; the scheduler never overlaps two of them
    pub async fn run_tick(&mut self) -> TickReport {
        let monitor = self.monitor.sample_all(&self.supervisor);
        let actions = self.engine.evaluate(&self.supervisor).await;

        let ranked = match self.supervisor.find_by(&ProcessFilter::running()) {
            Ok(running) => {
                let ranked = rank_by_load(&running);
                for (position, record) in ranked.iter().enumerate() {
                    debug!(
                        "Rank {}: {} ({}) cpu={:.1}% memory={:.1}MB",
                        position + 1,
                        record.name,
                        record.id,
                        record.cpu,
                        record.memory
                    );
                }
                ranked.len()
            }
            Err(e) => {
                error!("Failed to rank running processes: {}", e);
                0
            }
        };

        TickReport {
            monitor,
            actions,
            ranked,
        }
    }
}

impl Tick for ControlLoop {
    async fn tick(&mut self) {
        let report = self.run_tick().await;
        debug!(
            "Tick complete: {} sampled, {} scaling actions",
            report.monitor.sampled,
            report.actions.len()
        );
    }
}
