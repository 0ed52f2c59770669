use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{Result, WardenError};

/// Default soft memory budget for a record, in MB
pub const DEFAULT_MAX_MEMORY_MB: f64 = 1024.0;

/// Unique identifier for a supervised process record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessId(Uuid);

impl ProcessId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ProcessId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProcessId {
    type Err = WardenError;

    fn from_str(s: &str) -> Result<Self> {
        Uuid::parse_str(s)
            .map(Self)
            .map_err(|_| WardenError::ProcessNotFound(s.to_string()))
    }
}

/// Lifecycle status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Stopped,
    Running,
    Crashed,
}

impl fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessStatus::Stopped => write!(f, "stopped"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Crashed => write!(f, "crashed"),
        }
    }
}

/// Durable state of one supervised process.
///
/// `pid` is present exactly when `status` is [`ProcessStatus::Running`]. The
/// status mutators are crate-private so that only the supervisor moves a
/// record through its lifecycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessRecord {
    pub id: ProcessId,
    pub name: String,
    pub command: String,
    pub status: ProcessStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(default)]
    pub restart_attempts: u32,
    #[serde(default)]
    pub last_restart: Option<DateTime<Utc>>,
    #[serde(default)]
    pub cpu: f64,
    #[serde(default)]
    pub memory: f64,
    #[serde(default = "default_max_memory")]
    pub max_memory: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

fn default_max_memory() -> f64 {
    DEFAULT_MAX_MEMORY_MB
}

impl ProcessRecord {
    /// Create a fresh, stopped record with a newly generated id
    pub fn new(name: impl Into<String>, command: impl Into<String>, max_memory: f64) -> Self {
        let now = Utc::now();
        Self {
            id: ProcessId::new(),
            name: name.into(),
            command: command.into(),
            status: ProcessStatus::Stopped,
            pid: None,
            restart_attempts: 0,
            last_restart: None,
            cpu: 0.0,
            memory: 0.0,
            max_memory,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == ProcessStatus::Running
    }

    pub(crate) fn mark_running(&mut self, pid: u32) {
        self.status = ProcessStatus::Running;
        self.pid = Some(pid);
        self.touch();
    }

    pub(crate) fn mark_stopped(&mut self) {
        self.status = ProcessStatus::Stopped;
        self.pid = None;
        self.touch();
    }

    pub(crate) fn mark_crashed(&mut self) {
        self.status = ProcessStatus::Crashed;
        self.pid = None;
        self.touch();
    }

    /// Record a successful restart onto `pid`
    pub(crate) fn record_restart(&mut self, pid: u32) {
        self.restart_attempts += 1;
        self.last_restart = Some(Utc::now());
        self.cpu = 0.0;
        self.memory = 0.0;
        self.mark_running(pid);
    }

    pub(crate) fn record_usage(&mut self, cpu: f64, memory: f64) {
        self.cpu = cpu;
        self.memory = memory;
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Declarative scaling bounds for every record sharing `process_name`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScalingRule {
    pub id: Uuid,
    pub process_name: String,
    pub min_instances: u32,
    pub max_instances: u32,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request payload for creating a [`ScalingRule`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewScalingRule {
    pub process_name: String,
    pub min_instances: u32,
    pub max_instances: u32,
    pub cpu_threshold: f64,
    pub memory_threshold: f64,
}

impl NewScalingRule {
    pub fn validate(&self) -> Result<()> {
        if self.process_name.trim().is_empty() {
            return Err(WardenError::InvalidScalingRule(
                "processName must not be empty".to_string(),
            ));
        }

        if self.max_instances == 0 {
            return Err(WardenError::InvalidScalingRule(
                "maxInstances must be at least 1".to_string(),
            ));
        }

        if self.min_instances > self.max_instances {
            return Err(WardenError::InvalidScalingRule(format!(
                "minInstances ({}) cannot exceed maxInstances ({})",
                self.min_instances, self.max_instances
            )));
        }

        for (field, value) in [
            ("cpuThreshold", self.cpu_threshold),
            ("memoryThreshold", self.memory_threshold),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(WardenError::InvalidScalingRule(format!(
                    "{} must be a non-negative number",
                    field
                )));
            }
        }

        Ok(())
    }

    /// Validate and stamp the rule with an id and timestamps
    pub fn into_rule(self) -> Result<ScalingRule> {
        self.validate()?;
        let now = Utc::now();
        Ok(ScalingRule {
            id: Uuid::new_v4(),
            process_name: self.process_name,
            min_instances: self.min_instances,
            max_instances: self.max_instances,
            cpu_threshold: self.cpu_threshold,
            memory_threshold: self.memory_threshold,
            created_at: now,
            updated_at: now,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(min: u32, max: u32) -> NewScalingRule {
        NewScalingRule {
            process_name: "w".to_string(),
            min_instances: min,
            max_instances: max,
            cpu_threshold: 80.0,
            memory_threshold: 512.0,
        }
    }

    #[test]
    fn test_new_record_is_stopped() {
        let record = ProcessRecord::new("w", "sleep 100", DEFAULT_MAX_MEMORY_MB);
        assert_eq!(record.status, ProcessStatus::Stopped);
        assert_eq!(record.pid, None);
        assert_eq!(record.restart_attempts, 0);
        assert_eq!(record.max_memory, 1024.0);
        assert!(record.last_restart.is_none());
    }

    #[test]
    fn test_pid_follows_status() {
        let mut record = ProcessRecord::new("w", "sleep 100", DEFAULT_MAX_MEMORY_MB);

        record.mark_running(42);
        assert!(record.is_running());
        assert_eq!(record.pid, Some(42));

        record.mark_crashed();
        assert_eq!(record.status, ProcessStatus::Crashed);
        assert_eq!(record.pid, None);

        record.mark_running(43);
        record.mark_stopped();
        assert_eq!(record.status, ProcessStatus::Stopped);
        assert_eq!(record.pid, None);
    }

    #[test]
    fn test_record_restart() {
        let mut record = ProcessRecord::new("w", "sleep 100", DEFAULT_MAX_MEMORY_MB);
        record.mark_running(10);
        record.record_usage(55.0, 120.0);

        record.record_restart(11);
        let first = record.last_restart.unwrap();
        assert_eq!(record.restart_attempts, 1);
        assert_eq!(record.pid, Some(11));
        assert_eq!(record.cpu, 0.0);

        record.record_restart(12);
        assert_eq!(record.restart_attempts, 2);
        assert!(record.last_restart.unwrap() >= first);
    }

    #[test]
    fn test_record_serializes_camel_case() {
        let mut record = ProcessRecord::new("w", "sleep 100", DEFAULT_MAX_MEMORY_MB);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "stopped");
        assert_eq!(json["restartAttempts"], 0);
        assert_eq!(json["maxMemory"], 1024.0);
        assert!(json.get("pid").is_none());

        record.mark_running(7);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "running");
        assert_eq!(json["pid"], 7);
    }

    #[test]
    fn test_process_id_parse() {
        let id = ProcessId::new();
        let parsed: ProcessId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);

        let bad = "not-a-uuid".parse::<ProcessId>();
        assert!(matches!(bad, Err(WardenError::ProcessNotFound(_))));
    }

    #[test]
    fn test_scaling_rule_validation() {
        assert!(rule(1, 3).validate().is_ok());
        assert!(rule(0, 1).validate().is_ok());

        assert!(matches!(
            rule(4, 3).validate(),
            Err(WardenError::InvalidScalingRule(_))
        ));
        assert!(matches!(
            rule(0, 0).validate(),
            Err(WardenError::InvalidScalingRule(_))
        ));

        let mut blank = rule(1, 2);
        blank.process_name = "  ".to_string();
        assert!(blank.validate().is_err());

        let mut negative = rule(1, 2);
        negative.cpu_threshold = -1.0;
        assert!(negative.validate().is_err());

        let mut nan = rule(1, 2);
        nan.memory_threshold = f64::NAN;
        assert!(nan.validate().is_err());
    }

    #[test]
    fn test_into_rule_stamps_id() {
        let a = rule(1, 3).into_rule().unwrap();
        let b = rule(1, 3).into_rule().unwrap();
        assert_ne!(a.id, b.id);
        assert_eq!(a.process_name, "w");
        assert_eq!(a.max_instances, 3);
    }

    #[test]
    fn test_new_rule_deserializes_camel_case() {
        let json = r#"{
            "processName": "w",
            "minInstances": 1,
            "maxInstances": 3,
            "cpuThreshold": 80,
            "memoryThreshold": 512.5
        }"#;
        let parsed: NewScalingRule = serde_json::from_str(json).unwrap();
        assert_eq!(parsed, NewScalingRule { memory_threshold: 512.5, ..rule(1, 3) });
    }
}
