//! Audio error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("No audio device found")]
    NoDevice,

    #[error("Device not found: {0}")]
    DeviceNotFound(String),

    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    #[error("Failed to build stream: {0}")]
    StreamBuildError(String),

    #[error("Stream error: {0}")]
    StreamError(String),

    #[error("Unsupported sample rate: {0}")]
    UnsupportedSampleRate(u32),

    #[error("Unsupported buffer size: {0}")]
    UnsupportedBufferSize(u32),

    #[error("Backend error: {0}")]
    BackendError(String),

    /// `set_output_format` (or any open-time-only reconfiguration) was
    /// called while audio is engaged (spec §4.1/§9).
    #[error("mixer is busy: audio is currently engaged")]
    Busy,
}

pub type AudioResult<T> = Result<T, AudioError>;
