//! Error types for subcast.

use thiserror::Error;

/// Application result type.
pub type AppResult<T> = Result<T, AppError>;

/// Application error type.
///
/// Only errors that reach a synchronous caller live here. Failures inside
/// the job queue are recorded on the job itself and never surface as an
/// `AppError` to whoever enqueued the work.
#[derive(Debug, Error)]
pub enum AppError {
    // === Request Errors ===
    #[error("Broadcasts are disabled")]
    BroadcastsDisabled,

    #[error("Validation error: {0}")]
    Validation(String),

    // === Server Errors ===
    #[error("Queue error: {0}")]
    Queue(String),

    #[error("Redis error: {0}")]
    Redis(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("External service error: {0}")]
    ExternalService(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the stable error code for logs and mirrored records.
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BroadcastsDisabled => "BROADCASTS_DISABLED",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Queue(_) => "QUEUE_ERROR",
            Self::Redis(_) => "REDIS_ERROR",
            Self::Config(_) => "CONFIG_ERROR",
            Self::ExternalService(_) => "EXTERNAL_SERVICE_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Returns whether the error was caused by the request rather than the system.
    #[must_use]
    pub const fn is_rejection(&self) -> bool {
        matches!(self, Self::BroadcastsDisabled | Self::Validation(_))
    }

    /// Log this error at a level matching its kind.
    pub fn log(&self) {
        let code = self.error_code();
        if self.is_rejection() {
            tracing::debug!(error = %self, code = code, "Request rejected");
        } else {
            tracing::error!(error = %self, code = code, "Server error occurred");
        }
    }
}

// === From implementations ===

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        Self::Validation(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        Self::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(AppError::BroadcastsDisabled.error_code(), "BROADCASTS_DISABLED");
        assert_eq!(
            AppError::Validation("chunk".into()).error_code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(AppError::Queue("full".into()).error_code(), "QUEUE_ERROR");
    }

    #[test]
    fn test_rejections() {
        assert!(AppError::BroadcastsDisabled.is_rejection());
        assert!(AppError::Validation("x".into()).is_rejection());
        assert!(!AppError::Queue("x".into()).is_rejection());
        assert!(!AppError::Internal("x".into()).is_rejection());
    }

    #[test]
    fn test_display() {
        assert_eq!(AppError::BroadcastsDisabled.to_string(), "Broadcasts are disabled");
        assert_eq!(
            AppError::Queue("queue is full".into()).to_string(),
            "Queue error: queue is full"
        );
    }
}
