//! # Pitch Pipeline Module
//!
//! Per-session pitch state: estimator, smoother and the "latest pitch" slot.
//!
//! The capture thread is the only writer of the slot and the session tick
//! its only reader. The slot holds a single value and every write replaces
//! it, so a slow reader sees the newest frame and never a backlog.

use crate::audio::{AudioCallback, pcm16_to_f32};
use crate::config::EngineConfig;
use crate::fft::remove_dc_offset;
use crate::pitch::FrequencyEstimator;
use crate::smoothing::FrequencySmoother;
use crate::{PitchSample, lock};
use log::{trace, warn};
use std::sync::Mutex;
use std::time::Instant;

pub struct PitchPipeline {
    estimator: FrequencyEstimator,
    smoother: Mutex<FrequencySmoother>,
    latest: Mutex<Option<PitchSample>>,
    capture_error: Mutex<Option<String>>,
    epoch: Instant,
}

impl PitchPipeline {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            estimator: FrequencyEstimator::new(config.estimator.clone()),
            smoother: Mutex::new(FrequencySmoother::new(config.smoothing_window)),
            latest: Mutex::new(None),
            capture_error: Mutex::new(None),
            epoch: Instant::now(),
        }
    }

    /// Estimates, smooths and publishes the pitch of one frame.
    ///
    /// A silent frame resets the smoother, so the first reading after a
    /// pause reflects only the new note.
    pub fn process_audio_block(&self, samples: &[f32], sample_rate: u32) -> PitchSample {
        let mut frame = samples.to_vec();
        remove_dc_offset(&mut frame);
        let estimate = self.estimator.estimate(&frame, sample_rate);

        let frequency_hz = {
            let mut smoother = lock(&self.smoother);
            if estimate.is_silent {
                smoother.reset();
                0.0
            } else {
                smoother.add_frequency(estimate.frequency_hz)
            }
        };

        let sample = PitchSample {
            frequency_hz,
            confidence: estimate.confidence,
            is_silent: estimate.is_silent,
            timestamp_ms: self.epoch.elapsed().as_millis() as u64,
        };
        trace!(
            "[PIPELINE] raw {:.2} Hz, smoothed {:.2} Hz, confidence {:.2}",
            estimate.frequency_hz, frequency_hz, estimate.confidence
        );

        *lock(&self.latest) = Some(sample);
        sample
    }

    /// [`process_audio_block`](Self::process_audio_block) for signed 16-bit PCM.
    pub fn process_pcm16(&self, samples: &[i16], sample_rate: u32) -> PitchSample {
        self.process_audio_block(&pcm16_to_f32(samples), sample_rate)
    }

    /// The newest smoothed frequency, if the last frame carried one.
    pub fn latest_pitch(&self) -> Option<f32> {
        lock(&self.latest).and_then(|sample| sample.frequency())
    }

    pub fn latest_sample(&self) -> Option<PitchSample> {
        *lock(&self.latest)
    }

    /// Takes the pending capture failure, if any.
    pub fn take_capture_error(&self) -> Option<String> {
        lock(&self.capture_error).take()
    }

    /// Clears smoothing history and the latest slot.
    pub fn reset(&self) {
        lock(&self.smoother).reset();
        *lock(&self.latest) = None;
        *lock(&self.capture_error) = None;
    }
}

impl AudioCallback for PitchPipeline {
    fn on_audio_data(&self, samples: &[f32], sample_rate: u32) {
        self.process_audio_block(samples, sample_rate);
    }

    fn on_capture_error(&self, message: String) {
        warn!("[CAPTURE] Stream error: {}", message);
        lock(&self.capture_error).get_or_insert(message);
    }
}
