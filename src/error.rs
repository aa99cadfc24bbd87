//! Error types for the playback engine

use thiserror::Error;

/// Playback engine and backend errors
///
/// Setup failures are returned synchronously from [`OutputStream::open`];
/// steady-state failures are recorded in the stream's error slot and read
/// back through [`OutputStream::last_error`].
///
/// [`OutputStream::open`]: crate::stream::OutputStream::open
/// [`OutputStream::last_error`]: crate::stream::OutputStream::last_error
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    #[error("Unsupported sample rate: {0} Hz")]
    UnsupportedRate(u32),

    #[error("Failed to acquire audio device: {0}")]
    DeviceAcquisition(String),

    #[error("Playback stalled: {0}")]
    StreamStall(String),

    #[error("Missing backend prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Audio device lost: {0}")]
    DeviceLost(String),
}

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, AudioError>;
