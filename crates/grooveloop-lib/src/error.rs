//! Unified error type for the grooveloop-lib crate.
//!
//! [`GrooveloopError`] wraps the module-specific errors (`DeviceError`,
//! `WavError`, `PlaybackError`). `From` impls allow `?` to propagate across
//! module boundaries seamlessly.

use std::fmt;

use crate::playback::PlaybackError;
use crate::transport::DeviceError;
use crate::wav::WavError;

/// Unified error type for grooveloop-lib operations.
#[derive(Debug)]
pub enum GrooveloopError {
    /// Device communication error (enumerate, connect, transfer, protocol).
    Device(DeviceError),
    /// WAV file reading or writing error.
    Wav(WavError),
    /// Host audio output error.
    Playback(PlaybackError),
    /// Standard I/O error.
    Io(std::io::Error),
}

impl GrooveloopError {
    /// Whether this is the cooperative-cancellation marker, which callers
    /// usually treat as a clean exit rather than a failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GrooveloopError::Device(DeviceError::Cancelled))
    }
}

impl fmt::Display for GrooveloopError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GrooveloopError::Device(e) => write!(f, "{e}"),
            GrooveloopError::Wav(e) => write!(f, "{e}"),
            GrooveloopError::Playback(e) => write!(f, "{e}"),
            GrooveloopError::Io(e) => write!(f, "I/O error: {e}"),
        }
    }
}

impl std::error::Error for GrooveloopError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GrooveloopError::Device(e) => Some(e),
            GrooveloopError::Wav(e) => Some(e),
            GrooveloopError::Playback(e) => Some(e),
            GrooveloopError::Io(e) => Some(e),
        }
    }
}

impl From<DeviceError> for GrooveloopError {
    fn from(e: DeviceError) -> Self {
        GrooveloopError::Device(e)
    }
}

impl From<WavError> for GrooveloopError {
    fn from(e: WavError) -> Self {
        GrooveloopError::Wav(e)
    }
}

impl From<PlaybackError> for GrooveloopError {
    fn from(e: PlaybackError) -> Self {
        GrooveloopError::Playback(e)
    }
}

impl From<std::io::Error> for GrooveloopError {
    fn from(e: std::io::Error) -> Self {
        GrooveloopError::Io(e)
    }
}

/// Crate-level Result alias using [`GrooveloopError`].
pub type Result<T> = std::result::Result<T, GrooveloopError>;
