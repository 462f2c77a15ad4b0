//! # Configuration Module
//!
//! Tunable parameters of the practice engine. Every field has a default, so
//! a JSON config file only needs to name what it changes:
//!
//! ```json
//! { "smoothing_window": 3, "timing_window": { "late_ms": 250 } }
//! ```

use crate::error::{PracticeError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

// Audio capture constants
pub const SAMPLE_RATE: u32 = 44_100;
/// Samples per analysis frame (~93ms at 44.1kHz).
pub const BUFFER_SIZE: usize = 4096;

// Pitch estimation constants
pub const MIN_FREQUENCY: f32 = 65.0; // ~C2
pub const MAX_FREQUENCY: f32 = 4186.0; // ~C8
pub const SILENCE_THRESHOLD: f32 = 0.01; // Mean-square energy
pub const CONFIDENCE_THRESHOLD: f32 = 0.3;
pub const SMOOTHING_WINDOW: usize = 5; // Number of frequencies averaged

// Session constants
pub const TICK_INTERVAL_MS: u64 = 33; // ~30 ticks per second
pub const TIME_WINDOW_EARLY_MS: i64 = -100;
pub const TIME_WINDOW_LATE_MS: i64 = 200;
pub const VIOLIN_PROGRAM: u8 = 40; // General MIDI: Violin

/// Parameters of the autocorrelation frequency estimator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Lowest detectable fundamental in Hz.
    pub min_frequency: f32,
    /// Highest detectable fundamental in Hz.
    pub max_frequency: f32,
    /// Mean-square energy below which a frame counts as silence.
    pub silence_threshold: f32,
    /// Normalized autocorrelation peak required to report a frequency.
    pub confidence_threshold: f32,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            min_frequency: MIN_FREQUENCY,
            max_frequency: MAX_FREQUENCY,
            silence_threshold: SILENCE_THRESHOLD,
            confidence_threshold: CONFIDENCE_THRESHOLD,
        }
    }
}

/// Audio input format requested from the capture device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    pub sample_rate: u32,
    pub buffer_size: usize,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            sample_rate: SAMPLE_RATE,
            buffer_size: BUFFER_SIZE,
        }
    }
}

/// Tolerance around a note's nominal start for an attack to be "on time".
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingWindow {
    /// Earliest accepted timing error (negative = early).
    pub early_ms: i64,
    /// Latest accepted timing error.
    pub late_ms: i64,
}

impl Default for TimingWindow {
    fn default() -> Self {
        Self {
            early_ms: TIME_WINDOW_EARLY_MS,
            late_ms: TIME_WINDOW_LATE_MS,
        }
    }
}

impl TimingWindow {
    pub fn contains(&self, timing_error_ms: i64) -> bool {
        (self.early_ms..=self.late_ms).contains(&timing_error_ms)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub estimator: EstimatorConfig,
    pub capture: CaptureConfig,
    /// Number of recent frequencies averaged by the smoother.
    pub smoothing_window: usize,
    /// Period of the session tick.
    pub tick_interval_ms: u64,
    pub timing_window: TimingWindow,
    /// Subtracted from the playback position to get the score position.
    pub sync_offset_ms: i64,
    /// Record an explicit MISS for notes that elapse without an attempt.
    pub synthesize_misses: bool,
    /// General MIDI program used for the reference track.
    pub instrument_program: u8,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            capture: CaptureConfig::default(),
            smoothing_window: SMOOTHING_WINDOW,
            tick_interval_ms: TICK_INTERVAL_MS,
            timing_window: TimingWindow::default(),
            sync_offset_ms: 0,
            synthesize_misses: true,
            instrument_program: VIOLIN_PROGRAM,
        }
    }
}

impl EngineConfig {
    /// Parses a configuration from JSON and validates it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: EngineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads a configuration file written as JSON.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| PracticeError::InvalidInput {
            what: "config",
            reason,
        };
        let est = &self.estimator;
        if !(est.min_frequency > 0.0 && est.min_frequency < est.max_frequency) {
            return Err(invalid(format!(
                "frequency range {}..{} Hz",
                est.min_frequency, est.max_frequency
            )));
        }
        if self.capture.sample_rate == 0 || self.capture.buffer_size < 2 {
            return Err(invalid(format!(
                "capture format {} Hz / {} samples",
                self.capture.sample_rate, self.capture.buffer_size
            )));
        }
        if self.smoothing_window == 0 {
            return Err(invalid("smoothing window must hold at least one value".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(invalid("tick interval must be positive".into()));
        }
        if self.timing_window.early_ms > self.timing_window.late_ms {
            return Err(invalid(format!(
                "timing window {}..{} ms",
                self.timing_window.early_ms, self.timing_window.late_ms
            )));
        }
        if self.instrument_program > 127 {
            return Err(invalid(format!("MIDI program {}", self.instrument_program)));
        }
        Ok(())
    }
}
