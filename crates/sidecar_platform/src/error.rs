//! Platform Error Types

use thiserror::Error;

/// Errors from platform-specific operations
#[derive(Error, Debug)]
pub enum PlatformError {
    #[error("Platform not supported")]
    UnsupportedPlatform,

    #[error("Feature not available on this backend: {0}")]
    FeatureNotAvailable(String),

    #[error("Executable not found on PATH: {0}")]
    ExecutableNotFound(String),

    #[error("Failed to spawn {program}: {reason}")]
    SpawnFailed { program: String, reason: String },

    #[error("Process is not running")]
    NotRunning,

    #[error("Signal delivery failed: {0}")]
    SignalFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),
}

/// Result type alias for platform operations
pub type PlatformResult<T> = Result<T, PlatformError>;

impl PlatformError {
    pub(crate) fn unsupported(what: &str) -> Self {
        PlatformError::FeatureNotAvailable(what.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = PlatformError::ExecutableNotFound("mpv".into());
        assert!(err.to_string().contains("mpv"));

        let err = PlatformError::SpawnFailed {
            program: "ffplay".into(),
            reason: "permission denied".into(),
        };
        assert!(err.to_string().contains("ffplay"));
        assert!(err.to_string().contains("permission denied"));
    }
}
