//! Engine Error Types

use thiserror::Error;

/// Errors that can occur inside the playback core
///
/// None of these cross the [`crate::Router`] boundary; the router logs them
/// and falls back or turns the call into a no-op.
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("No audio devices found")]
    NoDevicesFound,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    #[error("Failed to play audio stream: {0}")]
    StreamPlayError(String),

    #[error("Audio device write failed: {0}")]
    DeviceWriteError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Failed to decode audio: {0}")]
    DecodeError(String),

    #[error("Resampler error: {0}")]
    ResampleError(String),

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("DSP error: {0}")]
    DspError(#[from] sidecar_dsp::DspError),

    #[error("Platform error: {0}")]
    PlatformError(#[from] sidecar_platform::PlatformError),
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = EngineError::NoDevicesFound;
        assert!(err.to_string().contains("No audio devices"));

        let err = EngineError::DeviceNotFound("Test Device".into());
        assert!(err.to_string().contains("Test Device"));
    }

    #[test]
    fn test_error_from_dsp() {
        let dsp_err = sidecar_dsp::DspError::InvalidBandIndex(10);
        let engine_err: EngineError = dsp_err.into();
        assert!(matches!(engine_err, EngineError::DspError(_)));
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let engine_err: EngineError = io_err.into();
        assert!(engine_err.to_string().contains("gone"));
    }
}
