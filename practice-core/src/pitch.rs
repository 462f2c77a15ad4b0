//! # Pitch Detection Module
//!
//! Fundamental-frequency estimation for a single monophonic voice using
//! normalized autocorrelation.
//!
//! ## Features
//! - Energy gate that short-circuits silent frames
//! - Lag search bounded by the supported frequency range (C2–C8 by default)
//! - First-strong-peak selection to avoid octave errors
//! - Parabolic interpolation for sub-sample period accuracy

use crate::audio::mean_square;
use crate::config::EstimatorConfig;
use crate::fft;
use serde::{Deserialize, Serialize};

/// A candidate peak must reach this fraction of the strongest peak. Picks
/// the fundamental period over its multiples, which correlate almost as well.
const PEAK_SELECTION_RATIO: f32 = 0.9;

/// Result of analysing one audio frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PitchEstimate {
    /// Estimated fundamental in Hz, or 0 when nothing was detected.
    pub frequency_hz: f32,
    /// Normalized autocorrelation at the chosen lag, clamped to `[0, 1]`.
    /// The chosen lag is the first strong peak, which need not be the
    /// maximum over the lag range.
    pub confidence: f32,
    /// The frame's energy fell below the silence threshold.
    pub is_silent: bool,
}

impl PitchEstimate {
    /// The estimate reported for frames below the energy gate.
    pub const SILENT: PitchEstimate = PitchEstimate {
        frequency_hz: 0.0,
        confidence: 0.0,
        is_silent: true,
    };

    const UNDETECTED: PitchEstimate = PitchEstimate {
        frequency_hz: 0.0,
        confidence: 0.0,
        is_silent: false,
    };

    /// True when the frame carried a usable frequency.
    pub fn is_detected(&self) -> bool {
        !self.is_silent && self.frequency_hz > 0.0
    }
}

/// Stateless autocorrelation pitch estimator.
#[derive(Debug, Clone, Default)]
pub struct FrequencyEstimator {
    config: EstimatorConfig,
}

impl FrequencyEstimator {
    pub fn new(config: EstimatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Estimates the fundamental frequency of a frame of normalized samples.
    ///
    /// The result depends only on the frame and sample rate. Frames shorter
    /// than the longest period in range are handled by clamping the lag
    /// search to `samples.len() - 1`.
    ///
    /// # Arguments
    /// * `samples` - Audio samples in `[-1, 1]`
    /// * `sample_rate` - Sample rate in Hz
    ///
    /// # Returns
    /// * `PitchEstimate` - silent, undetected (frequency 0) or detected
    pub fn estimate(&self, samples: &[f32], sample_rate: u32) -> PitchEstimate {
        if samples.is_empty() || mean_square(samples) < self.config.silence_threshold {
            return PitchEstimate::SILENT;
        }
        if sample_rate == 0 {
            return PitchEstimate::UNDETECTED;
        }

        let (period, confidence) = self.detect_period(samples, sample_rate as f32);
        let frequency_hz = if period > 0.0 && confidence > self.config.confidence_threshold {
            sample_rate as f32 / period
        } else {
            0.0
        };

        PitchEstimate {
            frequency_hz,
            confidence,
            is_silent: false,
        }
    }

    /// Returns the refined period in samples and its normalized correlation.
    fn detect_period(&self, samples: &[f32], sample_rate: f32) -> (f32, f32) {
        let min_lag = ((sample_rate / self.config.max_frequency) as usize).max(1);
        let max_lag = ((sample_rate / self.config.min_frequency) as usize).min(samples.len() - 1);
        if min_lag >= max_lag {
            return (0.0, 0.0);
        }

        let r0: f32 = samples.iter().map(|s| s * s).sum();
        if r0 == 0.0 {
            return (0.0, 0.0);
        }

        let correlation: Vec<f32> = fft::autocorrelation(samples, max_lag)
            .into_iter()
            .map(|r| r / r0)
            .collect();

        let Some(best_lag) = select_lag(&correlation, min_lag, max_lag) else {
            return (0.0, 0.0);
        };
        let confidence = correlation[best_lag].clamp(0.0, 1.0);

        // --- Parabolic interpolation, skipped at the range boundaries ---
        let period = if best_lag > min_lag && best_lag < max_lag {
            parabolic_peak(
                correlation[best_lag - 1],
                correlation[best_lag],
                correlation[best_lag + 1],
                best_lag,
            )
        } else {
            best_lag as f32
        };

        (period, confidence)
    }
}

/// Chooses the lag whose correlation best explains the period.
///
/// Looks at interior local maxima first and takes the earliest one that
/// reaches [`PEAK_SELECTION_RATIO`] of the strongest. Without any interior
/// peak, falls back to the largest positive value in range.
fn select_lag(correlation: &[f32], min_lag: usize, max_lag: usize) -> Option<usize> {
    let peaks: Vec<usize> = (min_lag + 1..max_lag)
        .filter(|&lag| {
            let r = correlation[lag];
            r > 0.0 && r >= correlation[lag - 1] && r > correlation[lag + 1]
        })
        .collect();

    if let Some(strongest) = peaks.iter().map(|&lag| correlation[lag]).reduce(f32::max) {
        let floor = strongest * PEAK_SELECTION_RATIO;
        return peaks.into_iter().find(|&lag| correlation[lag] >= floor);
    }

    (min_lag..=max_lag)
        .filter(|&lag| correlation[lag] > 0.0)
        .max_by(|&a, &b| correlation[a].total_cmp(&correlation[b]))
}

/// Vertex of the parabola through three equally spaced points around `lag`.
fn parabolic_peak(y1: f32, y2: f32, y3: f32, lag: usize) -> f32 {
    let a = (y1 + y3 - 2.0 * y2) / 2.0;
    let b = (y3 - y1) / 2.0;
    if a.abs() > 1e-10 {
        // The true vertex of a sampled peak is never more than a sample away.
        lag as f32 - (b / (2.0 * a)).clamp(-1.0, 1.0)
    } else {
        lag as f32
    }
}
