//! # Error Module
//!
//! Failures that can cross the public API of the practice core.
//!
//! Degenerate inputs (silent buffers, non-positive frequencies, empty songs,
//! zero expected notes) are never errors: they resolve to well-defined
//! fallback values so the real-time loop keeps running. What remains here is
//! setup failures and misuse of the session lifecycle.

use crate::session::SessionState;

/// Crate-level error type for the practice engine.
#[derive(Debug, thiserror::Error)]
pub enum PracticeError {
    /// The audio input device could not be opened or started.
    #[error("audio capture unavailable: {0}")]
    Capture(String),

    /// A lifecycle control was issued from a state that does not allow it.
    #[error("cannot {action} while session is {state:?}")]
    InvalidTransition {
        action: &'static str,
        state: SessionState,
    },

    /// A song, note or configuration value is malformed.
    #[error("invalid {what}: {reason}")]
    InvalidInput { what: &'static str, reason: String },

    /// A song could not be encoded as a MIDI file.
    #[error("MIDI export failed: {0}")]
    Midi(String),

    /// File I/O errors.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization errors.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, PracticeError>;

impl From<anyhow::Error> for PracticeError {
    fn from(err: anyhow::Error) -> Self {
        PracticeError::Capture(format!("{err:#}"))
    }
}
