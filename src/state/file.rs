use super::{lock_state, ProcessFilter, ProcessRepository, ScalingRuleRepository, StoreState};
use crate::error::{Result, WardenError};
use crate::process::{ProcessId, ProcessRecord, ScalingRule};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Store that mirrors every mutation into a JSON snapshot on disk
#[derive(Debug)]
pub struct FileStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl FileStore {
    /// Open the snapshot at `path`, starting empty when it does not exist
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let state = Self::load(&path)?;

        Ok(Self {
            path,
            state: Mutex::new(state),
        })
    }

    /// Get the path to the state file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(path: &Path) -> Result<StoreState> {
        if !path.exists() {
            return Ok(StoreState::new());
        }

        let file = File::open(path).map_err(|e| {
            WardenError::StateLoadError(format!("Failed to open state file: {}", e))
        })?;

        let state: StoreState = serde_json::from_reader(BufReader::new(file)).map_err(|e| {
            WardenError::StateLoadError(format!("Failed to parse state file: {}", e))
        })?;

        state.validate()?;

        Ok(state)
    }

    /// Write the snapshot through a temp file and rename it into place
    fn flush(&self, state: &StoreState) -> Result<()> {
        state.validate()?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                WardenError::StateSaveError(format!("Failed to create state directory: {}", e))
            })?;
        }

        let temp_path = self.path.with_extension("tmp");

        {
            let file = File::create(&temp_path).map_err(|e| {
                WardenError::StateSaveError(format!("Failed to create temp state file: {}", e))
            })?;

            let mut writer = BufWriter::new(file);

            serde_json::to_writer_pretty(&mut writer, state).map_err(|e| {
                WardenError::StateSaveError(format!("Failed to serialize state: {}", e))
            })?;

            writer.flush().map_err(|e| {
                WardenError::StateSaveError(format!("Failed to flush state file: {}", e))
            })?;
        }

        fs::rename(&temp_path, &self.path).map_err(|e| {
            WardenError::StateSaveError(format!("Failed to rename temp state file: {}", e))
        })?;

        Ok(())
    }
}

impl ProcessRepository for FileStore {
    fn find(&self, id: ProcessId) -> Result<Option<ProcessRecord>> {
        Ok(lock_state(&self.state)?.find(id))
    }

    fn find_by(&self, filter: &ProcessFilter) -> Result<Vec<ProcessRecord>> {
        Ok(lock_state(&self.state)?.find_by(filter))
    }

    fn save(&self, record: &ProcessRecord) -> Result<()> {
        let mut state = lock_state(&self.state)?;
        state.upsert(record);
        self.flush(&state)
    }

    fn remove(&self, id: ProcessId) -> Result<Option<ProcessRecord>> {
        let mut state = lock_state(&self.state)?;
        let removed = state.remove(id);
        if removed.is_some() {
            self.flush(&state)?;
        }
        Ok(removed)
    }
}

impl ScalingRuleRepository for FileStore {
    fn rules(&self) -> Result<Vec<ScalingRule>> {
        Ok(lock_state(&self.state)?.rules.clone())
    }

    fn save_rule(&self, rule: &ScalingRule) -> Result<()> {
        let mut state = lock_state(&self.state)?;
        state.upsert_rule(rule);
        self.flush(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::{NewScalingRule, DEFAULT_MAX_MEMORY_MB};
    use tempfile::TempDir;

    #[test]
    fn test_open_nonexistent_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let store = FileStore::open(temp_dir.path().join("state.json")).unwrap();

        assert!(store.find_by(&ProcessFilter::all()).unwrap().is_empty());
        assert!(store.rules().unwrap().is_empty());
    }

    #[test]
    fn test_save_and_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");

        let mut record = ProcessRecord::new("w", "sleep 100", DEFAULT_MAX_MEMORY_MB);
        record.mark_running(1234);
        let rule = NewScalingRule {
            process_name: "w".to_string(),
            min_instances: 1,
            max_instances: 2,
            cpu_threshold: 50.0,
            memory_threshold: 100.0,
        }
        .into_rule()
        .unwrap();

        {
            let store = FileStore::open(&path).unwrap();
            store.save(&record).unwrap();
            store.save_rule(&rule).unwrap();
        }

        let reopened = FileStore::open(&path).unwrap();
        assert_eq!(reopened.find(record.id).unwrap(), Some(record));
        assert_eq!(reopened.rules().unwrap(), vec![rule]);
        assert!(!path.with_extension("tmp").exists());
    }

    #[test]
    fn test_remove_is_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        let record = ProcessRecord::new("w", "sleep 100", DEFAULT_MAX_MEMORY_MB);

        let store = FileStore::open(&path).unwrap();
        store.save(&record).unwrap();
        store.remove(record.id).unwrap();

        let reopened = FileStore::open(&path).unwrap();
        assert!(reopened.find(record.id).unwrap().is_none());
    }

    #[test]
    fn test_creates_parent_directory() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("subdir").join("state.json");
        let store = FileStore::open(&path).unwrap();

        store
            .save(&ProcessRecord::new("w", "true", DEFAULT_MAX_MEMORY_MB))
            .unwrap();

        assert!(path.exists());
        assert_eq!(store.path(), path.as_path());
    }

    #[test]
    fn test_open_corrupt_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(WardenError::StateLoadError(_))));
    }

    #[test]
    fn test_open_wrong_version() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("state.json");
        let mut state = StoreState::new();
        state.version = "0.0.1".to_string();
        fs::write(&path, serde_json::to_string(&state).unwrap()).unwrap();

        let result = FileStore::open(&path);
        assert!(matches!(result, Err(WardenError::StateCorruption(_))));
    }
}
