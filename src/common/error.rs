//! Common Error Types
//!
//! Unified error handling across all modules.

use thiserror::Error;

/// Root error type for the service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    /// Logging errors
    #[error("logging error: {0}")]
    Logging(#[from] crate::logging::LoggingError),

    /// Storage errors
    #[error("storage error: {0}")]
    Storage(#[from] crate::storage::StorageError),

    /// Pipeline errors
    #[error("pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    /// API errors
    #[error("API error: {0}")]
    Api(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServiceError {
    /// Create an API error
    pub fn api(msg: impl Into<String>) -> Self {
        Self::Api(msg.into())
    }

    /// Get error code for API responses
    pub fn error_code(&self) -> &'static str {
        match self {
            ServiceError::Config(_) => "CONFIG_ERROR",
            ServiceError::Logging(_) => "LOGGING_ERROR",
            ServiceError::Storage(_) => "STORAGE_ERROR",
            ServiceError::Pipeline(_) => "PIPELINE_ERROR",
            ServiceError::Api(_) => "API_ERROR",
            ServiceError::Io(_) => "IO_ERROR",
        }
    }
}

/// Result type alias using ServiceError
pub type Result<T> = std::result::Result<T, ServiceError>;
