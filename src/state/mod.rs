// State module - Durable storage for process records and scaling rules

mod file;

pub use file::FileStore;

use crate::error::{Result, WardenError};
use crate::process::{ProcessId, ProcessRecord, ProcessStatus, ScalingRule};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

/// Version of the state snapshot format
pub(crate) const STATE_VERSION: &str = "1.0.0";

/// Selection criteria for [`ProcessRepository::find_by`]
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProcessFilter {
    pub name: Option<String>,
    pub status: Option<ProcessStatus>,
}

impl ProcessFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn running() -> Self {
        Self {
            status: Some(ProcessStatus::Running),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn matches(&self, record: &ProcessRecord) -> bool {
        self.name.as_deref().map_or(true, |n| record.name == n)
            && self.status.map_or(true, |s| record.status == s)
    }
}

/// Durable storage of process records.
///
/// Implementations return records in insertion order; the scaling engine
/// relies on that order for its tie-breaks. Callers serialize writes per id,
/// the repository itself only guarantees that each call is atomic.
pub trait ProcessRepository: Send + Sync {
    fn find(&self, id: ProcessId) -> Result<Option<ProcessRecord>>;
    fn find_by(&self, filter: &ProcessFilter) -> Result<Vec<ProcessRecord>>;
    /// Insert or replace the record with the same id
    fn save(&self, record: &ProcessRecord) -> Result<()>;
    fn remove(&self, id: ProcessId) -> Result<Option<ProcessRecord>>;
}

/// Durable storage of scaling rules
pub trait ScalingRuleRepository: Send + Sync {
    fn rules(&self) -> Result<Vec<ScalingRule>>;
    fn save_rule(&self, rule: &ScalingRule) -> Result<()>;
}

/// Everything the supervisor persists
pub trait Store: ProcessRepository + ScalingRuleRepository {}

impl<T: ProcessRepository + ScalingRuleRepository> Store for T {}

/// Complete persisted state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreState {
    pub version: String,
    pub processes: Vec<ProcessRecord>,
    #[serde(default)]
    pub rules: Vec<ScalingRule>,
    pub last_updated: DateTime<Utc>,
}

impl StoreState {
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            processes: Vec::new(),
            rules: Vec::new(),
            last_updated: Utc::now(),
        }
    }

    /// Validate the state structure
    pub fn validate(&self) -> Result<()> {
        if self.version != STATE_VERSION {
            return Err(WardenError::StateCorruption(format!(
                "Incompatible state version: expected {}, found {}",
                STATE_VERSION, self.version
            )));
        }

        let mut seen_ids = HashSet::new();
        for process in &self.processes {
            if !seen_ids.insert(process.id) {
                return Err(WardenError::StateCorruption(format!(
                    "Duplicate process ID found: {}",
                    process.id
                )));
            }
        }

        let mut seen_rules = HashSet::new();
        for rule in &self.rules {
            if !seen_rules.insert(rule.id) {
                return Err(WardenError::StateCorruption(format!(
                    "Duplicate scaling rule ID found: {}",
                    rule.id
                )));
            }
        }

        Ok(())
    }

    fn find(&self, id: ProcessId) -> Option<ProcessRecord> {
        self.processes.iter().find(|p| p.id == id).cloned()
    }

    fn find_by(&self, filter: &ProcessFilter) -> Vec<ProcessRecord> {
        self.processes
            .iter()
            .filter(|p| filter.matches(p))
            .cloned()
            .collect()
    }

    fn upsert(&mut self, record: &ProcessRecord) {
        match self.processes.iter_mut().find(|p| p.id == record.id) {
            Some(existing) => *existing = record.clone(),
            None => self.processes.push(record.clone()),
        }
        self.last_updated = Utc::now();
    }

    fn remove(&mut self, id: ProcessId) -> Option<ProcessRecord> {
        let index = self.processes.iter().position(|p| p.id == id)?;
        self.last_updated = Utc::now();
        Some(self.processes.remove(index))
    }

    fn upsert_rule(&mut self, rule: &ScalingRule) {
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule.clone(),
            None => self.rules.push(rule.clone()),
        }
        self.last_updated = Utc::now();
    }
}

impl Default for StoreState {
    fn default() -> Self {
        Self::new()
    }
}

fn lock_state(state: &Mutex<StoreState>) -> Result<MutexGuard<'_, StoreState>> {
    state
        .lock()
        .map_err(|_| WardenError::StateError("state lock poisoned".to_string()))
}

/// In-memory store; contents are lost when the supervisor exits
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProcessRepository for MemoryStore {
    fn find(&self, id: ProcessId) -> Result<Option<ProcessRecord>> {
        Ok(lock_state(&self.state)?.find(id))
    }

    fn find_by(&self, filter: &ProcessFilter) -> Result<Vec<ProcessRecord>> {
        Ok(lock_state(&self.state)?.find_by(filter))
    }

    fn save(&self, record: &ProcessRecord) -> Result<()> {
        lock_state(&self.state)?.upsert(record);
        Ok(())
    }

    fn remove(&self, id: ProcessId) -> Result<Option<ProcessRecord>> {
        Ok(lock_state(&self.state)?.remove(id))
    }
}

impl ScalingRuleRepository for MemoryStore {
    fn rules(&self) -> Result<Vec<ScalingRule>> {
        Ok(lock_state(&self.state)?.rules.clone())
    }

    fn save_rule(&self, rule: &ScalingRule) -> Result<()> {
        lock_state(&self.state)?.upsert_rule(rule);
        Ok(())
    }
}
