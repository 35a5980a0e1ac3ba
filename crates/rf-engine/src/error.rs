//! The uniform result taxonomy (spec §7), folded from the lower crates'
//! error types at the public API boundary.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    /// Null handle, out-of-range integer, or unsupported enum.
    #[error("invalid parameter: {0}")]
    ParamErr(String),

    #[error("memory allocation failed")]
    MemoryErr,

    /// Container structure is invalid.
    #[error("malformed container: {0}")]
    BadFile(String),

    /// Magic-byte sniffing could not classify the file.
    #[error("unrecognized file type: {0}")]
    BadFileType(String),

    /// Format sniffed but not compiled in (e.g. SF3 without Vorbis).
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    /// A referenced instrument cannot be loaded.
    #[error("bad instrument: {0}")]
    BadInstrument(String),

    /// Bank file rejected by loader.
    #[error("bad bank: {0}")]
    BadBank(String),

    /// Platform audio backend refused to open.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// Engine operation attempted before `Open`.
    #[error("mixer not set up")]
    NotSetup,

    /// Voice pool exhausted. A note-on dispatch never returns this —
    /// the engine steals silently there — but `Mixer::start_sound`
    /// returns it when the `sound_voices` partition (spec §4.8) is full.
    #[error("no free voices")]
    NoFreeVoices,

    /// Operation requires a stopped Song/Sound.
    #[error("still playing")]
    StillPlaying,

    /// A referenced resource ID is missing in an RMF container.
    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    /// Duplicate add (e.g. same bank token re-added).
    #[error("already exists: {0}")]
    AlreadyExists(String),

    /// A reconfiguration-only operation (`set_output_format`, bank
    /// unload) was attempted while audio is engaged or voices have not
    /// yet drained.
    #[error("mixer is busy")]
    Busy,

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<rf_core::RfError> for EngineError {
    fn from(err: rf_core::RfError) -> Self {
        EngineError::Internal(anyhow::anyhow!(err))
    }
}

impl From<rf_file::FileError> for EngineError {
    fn from(err: rf_file::FileError) -> Self {
        match err {
            rf_file::FileError::NotFound(m) => EngineError::ResourceNotFound(m),
            rf_file::FileError::BadFile(m) => EngineError::BadFile(m),
            rf_file::FileError::BadFileType(m) => EngineError::BadFileType(m),
            rf_file::FileError::UnsupportedFormat(m) => EngineError::UnsupportedFormat(m),
            rf_file::FileError::ResourceNotFound(m) => EngineError::ResourceNotFound(m),
            other => EngineError::BadFile(other.to_string()),
        }
    }
}

impl From<rf_audio::AudioError> for EngineError {
    fn from(err: rf_audio::AudioError) -> Self {
        match err {
            rf_audio::AudioError::Busy => EngineError::Busy,
            other => EngineError::DeviceUnavailable(other.to_string()),
        }
    }
}
