use crate::error::{Result, WardenError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WardenConfig {
    /// Period of the monitor/scale tick (in milliseconds)
    #[serde(default = "default_monitoring_interval")]
    pub monitoring_interval_ms: u64,

    /// Crash count after which automatic restarts stop
    #[serde(default = "default_max_restart_attempts")]
    pub max_restart_attempts: u32,

    /// Delay between a crash and its automatic restart (in milliseconds)
    #[serde(default = "default_restart_delay")]
    pub restart_delay_ms: u64,

    /// Spawn attempts made by a single restart
    #[serde(default = "default_restart_retries")]
    pub restart_retries: u32,

    /// Delay between spawn attempts of a restart (in milliseconds)
    #[serde(default = "default_restart_delay")]
    pub restart_retry_delay_ms: u64,

    /// Pause between stop and respawn during a restart (in milliseconds)
    #[serde(default = "default_restart_settle")]
    pub restart_settle_ms: u64,

    /// Time allowed for SIGTERM before SIGKILL (in milliseconds)
    #[serde(default = "default_stop_grace_period")]
    pub stop_grace_period_ms: u64,

    /// Shell used to run commands (`<shell> -c <command>`)
    #[serde(default = "default_shell")]
    pub shell: PathBuf,

    /// Whether an operator start stops running records with the same name
    #[serde(default = "default_preempt_same_name")]
    pub preempt_same_name: bool,

    /// Soft memory budget (MB) given to new records
    #[serde(default = "default_max_memory")]
    pub default_max_memory_mb: f64,

    /// HTTP listen address
    #[serde(default = "default_bind")]
    pub bind: String,

    /// JSON state file; records are kept in memory only when unset
    #[serde(default)]
    pub state_path: Option<PathBuf>,
}

// Default value functions for serde
fn default_monitoring_interval() -> u64 {
    10_000
}

fn default_max_restart_attempts() -> u32 {
    3
}

fn default_restart_delay() -> u64 {
    5_000
}

fn default_restart_retries() -> u32 {
    3
}

fn default_restart_settle() -> u64 {
    2_000
}

fn default_stop_grace_period() -> u64 {
    5_000
}

fn default_shell() -> PathBuf {
    PathBuf::from("/bin/sh")
}

fn default_preempt_same_name() -> bool {
    true
}

fn default_max_memory() -> f64 {
    crate::process::DEFAULT_MAX_MEMORY_MB
}

fn default_bind() -> String {
    "0.0.0.0:9393".to_string()
}

impl Default for WardenConfig {
    fn default() -> Self {
        Self {
            monitoring_interval_ms: default_monitoring_interval(),
            max_restart_attempts: default_max_restart_attempts(),
            restart_delay_ms: default_restart_delay(),
            restart_retries: default_restart_retries(),
            restart_retry_delay_ms: default_restart_delay(),
            restart_settle_ms: default_restart_settle(),
            stop_grace_period_ms: default_stop_grace_period(),
            shell: default_shell(),
            preempt_same_name: default_preempt_same_name(),
            default_max_memory_mb: default_max_memory(),
            bind: default_bind(),
            state_path: None,
        }
    }
}

impl WardenConfig {
    /// Load configuration from a file (supports TOML and JSON)
    pub fn from_file(path: &Path) -> Result<WardenConfig> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| WardenError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let extension = path.extension().and_then(|s| s.to_str()).unwrap_or("");

        let mut config = match extension {
            "toml" => toml::from_str::<WardenConfig>(&contents)
                .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse TOML: {}", e)))?,
            "json" => serde_json::from_str::<WardenConfig>(&contents)
                .map_err(|e| WardenError::InvalidConfig(format!("Failed to parse JSON: {}", e)))?,
            _ => {
                return Err(WardenError::InvalidConfig(format!(
                    "Unsupported file format: {}. Use .toml or .json",
                    extension
                )))
            }
        };

        config.expand_env_vars();
        config.validate()?;

        Ok(config)
    }

    /// Apply overrides from the process environment
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(std::env::vars())
    }

    /// Apply `MONITORING_INTERVAL`, `MAX_RESTART_ATTEMPTS` and `RESTART_DELAY`
    /// overrides from the given variables
    pub fn apply_overrides<I>(&mut self, vars: I) -> Result<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (key, value) in vars {
            match key.as_str() {
                "MONITORING_INTERVAL" => self.monitoring_interval_ms = parse_var(&key, &value)?,
                "MAX_RESTART_ATTEMPTS" => self.max_restart_attempts = parse_var(&key, &value)?,
                "RESTART_DELAY" => self.restart_delay_ms = parse_var(&key, &value)?,
                _ => {}
            }
        }
        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.monitoring_interval_ms == 0 {
            return Err(WardenError::ConfigValidationError(
                "monitoring_interval_ms must be at least 1".to_string(),
            ));
        }

        if self.restart_retries == 0 {
            return Err(WardenError::ConfigValidationError(
                "restart_retries must be at least 1".to_string(),
            ));
        }

        if self.shell.as_os_str().is_empty() {
            return Err(WardenError::MissingConfigField("shell".to_string()));
        }

        if self.bind.is_empty() {
            return Err(WardenError::MissingConfigField("bind".to_string()));
        }

        if !self.default_max_memory_mb.is_finite() || self.default_max_memory_mb <= 0.0 {
            return Err(WardenError::ConfigValidationError(format!(
                "default_max_memory_mb must be positive, got {}",
                self.default_max_memory_mb
            )));
        }

        Ok(())
    }

    /// Expand environment variables in path and address fields
    fn expand_env_vars(&mut self) {
        self.shell = Self::expand_env_in_path(&self.shell);
        self.bind = Self::expand_env_in_string(&self.bind);

        if let Some(ref state_path) = self.state_path {
            self.state_path = Some(Self::expand_env_in_path(state_path));
        }
    }

    /// Expand environment variables in a string
    fn expand_env_in_string(s: &str) -> String {
        let mut result = s.to_string();

        // Handle $VAR and ${VAR} syntax
        for (key, value) in std::env::vars() {
            result = result.replace(&format!("${{{}}}", key), &value);
            result = result.replace(&format!("${}", key), &value);
        }

        result
    }

    fn expand_env_in_path(path: &Path) -> PathBuf {
        let path_str = path.to_string_lossy();
        PathBuf::from(Self::expand_env_in_string(&path_str))
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_millis(self.monitoring_interval_ms)
    }

    pub fn stop_grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }
}

fn parse_var<T: std::str::FromStr>(key: &str, value: &str) -> Result<T> {
    value.trim().parse().map_err(|_| {
        WardenError::ConfigValidationError(format!("{} must be a number, got '{}'", key, value))
    })
}
