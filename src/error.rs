use thiserror::Error;

/// Main error type for the Warden supervisor
#[derive(Debug, Error)]
pub enum WardenError {
    // Process-related errors
    #[error("Process with id {0} not found")]
    ProcessNotFound(String),

    #[error("Failed to spawn process: {0}")]
    SpawnError(String),

    #[error("Failed to restart process {name} ({id}) after {attempts} attempts")]
    RestartExhausted {
        name: String,
        id: String,
        attempts: u32,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    // Metric sampling errors
    #[error("Failed to sample metrics: {0}")]
    MetricSample(String),

    #[error("No matching pid found: {0}")]
    ProcessGone(u32),

    // Scaling errors
    #[error("Invalid scaling rule: {0}")]
    InvalidScalingRule(String),

    // State store errors
    #[error("State store error: {0}")]
    StateError(String),

    #[error("Failed to load state: {0}")]
    StateLoadError(String),

    #[error("Failed to save state: {0}")]
    StateSaveError(String),

    #[error("State corruption detected: {0}")]
    StateCorruption(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid configuration file: {0}")]
    InvalidConfig(String),

    #[error("Missing required configuration field: {0}")]
    MissingConfigField(String),

    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl WardenError {
    /// True when the error means the referenced record does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, WardenError::ProcessNotFound(_))
    }
}

/// Result type alias for Warden operations
pub type Result<T> = std::result::Result<T, WardenError>;
