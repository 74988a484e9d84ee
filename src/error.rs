/// Centralized error types for the sync engine
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    // Precondition Errors
    #[error("Universe resolution failed: {0}")]
    UniverseFailed(String),

    #[error("Provider session invalid: {0}")]
    Session(String),

    // Storage Errors
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("Serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    // Sink Errors
    #[error("Sink {sink} flush failed: {message}")]
    FlushFailed { sink: String, message: String },

    // System Errors
    #[error("Task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, SyncError>;

impl SyncError {
    /// Errors that abort the whole run rather than a single record
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::UniverseFailed(_)
                | SyncError::Session(_)
                | SyncError::ConfigError(_)
                | SyncError::InvalidParameter(_)
        )
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            SyncError::ConfigError(_) => "CFG_001",
            SyncError::InvalidParameter(_) => "CFG_002",
            SyncError::UniverseFailed(_) => "UNI_001",
            SyncError::Session(_) => "AUTH_001",
            SyncError::Database(_) => "DB_001",
            SyncError::Pool(_) => "DB_002",
            SyncError::Csv(_) => "FILE_001",
            SyncError::FileError(_) => "FILE_002",
            SyncError::Serialization(_) => "DATA_001",
            SyncError::FlushFailed { .. } => "SINK_001",
            SyncError::TaskFailed(_) => "SYS_001",
        }
    }
}

impl From<tokio::task::JoinError> for SyncError {
    fn from(err: tokio::task::JoinError) -> Self {
        SyncError::TaskFailed(err.to_string())
    }
}

/// Failure classes a provider gateway can report for one fetch
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Login/session is invalid; no further fetch can succeed this run
    #[error("session error: {0}")]
    Session(String),

    #[error("transient error: {0}")]
    Transient(String),

    /// Provider rejected the request itself (bad code, unsupported market)
    #[error("permanent error: {0}")]
    Permanent(String),

    #[error("timed out after {0}s")]
    Timeout(u64),
}

impl ProviderError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, ProviderError::Transient(_) | ProviderError::Timeout(_))
    }

    pub fn is_session(&self) -> bool {
        matches!(self, ProviderError::Session(_))
    }
}
