//! The core logic for the pitch-practice engine.
//! This crate turns a live microphone signal into pitch estimates, follows a
//! musical score along a playback clock, judges each note for pitch and
//! timing, and scores the whole session. It is completely headless and
//! contains no UI code.

pub mod audio;
pub mod compare;
pub mod config;
pub mod error;
pub mod fft;
pub mod follower;
pub mod midi;
pub mod pipeline;
pub mod pitch;
pub mod playback;
pub mod score;
pub mod scoring;
pub mod session;
pub mod smoothing;
pub mod tuning;

pub use config::EngineConfig;
pub use error::{PracticeError, Result};

use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};

/// One analysed audio frame, as published to the session tick.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PitchSample {
    /// Smoothed frequency in Hz, 0 when nothing is detected.
    pub frequency_hz: f32,
    /// Normalized autocorrelation at the lag the estimator chose (0.0 to 1.0).
    pub confidence: f32,
    pub is_silent: bool,
    /// Milliseconds since the pipeline was created.
    pub timestamp_ms: u64,
}

impl PitchSample {
    /// The frequency, if this frame carries one.
    pub fn frequency(&self) -> Option<f32> {
        (!self.is_silent && self.frequency_hz > 0.0).then_some(self.frequency_hz)
    }
}

/// Locks a mutex, recovering the data if a holder panicked.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
