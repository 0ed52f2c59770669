// Process module - supervised process lifecycle, exit handling and sampling

mod handle;
pub mod monitor;
pub mod output;
pub mod restart;
pub mod spawner;
mod supervisor;
mod types;

pub use handle::ExitOutcome;
pub use monitor::{Monitor, MonitorReport, ResourceSample, ResourceSampler, SysinfoSampler};
pub use restart::RestartPolicy;
pub use spawner::{spawn_command, SpawnedProcess};
pub use supervisor::Supervisor;
pub use types::{
    NewScalingRule, ProcessId, ProcessRecord, ProcessStatus, ScalingRule, DEFAULT_MAX_MEMORY_MB,
};
