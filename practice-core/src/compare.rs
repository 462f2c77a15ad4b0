//! # Pitch Comparison Module
//!
//! Judges one attempt at a note: intonation against the written pitch and
//! attack time against the written start.

use crate::config::TimingWindow;
use crate::score::Note;
use crate::tuning::{GOOD_THRESHOLD_CENTS, Verdict, accuracy_verdict, cents_deviation};
use log::debug;
use serde::{Deserialize, Serialize};

/// Deviations within this many cents are reported as in tune.
pub const IN_TUNE_CENTS: f32 = 5.0;

/// Judgement of a single note occurrence. Never mutated once recorded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonResult {
    pub target_note: Note,
    /// 0 for a missed note.
    pub detected_frequency_hz: f32,
    /// Positive when the detected pitch is sharp of the target.
    pub deviation_cents: f32,
    pub verdict: Verdict,
    /// Attack time minus written start; negative is early.
    pub timing_error_ms: i64,
    pub in_time_window: bool,
}

impl ComparisonResult {
    /// Played in time with better than POOR intonation.
    pub fn is_hit(&self) -> bool {
        self.in_time_window
            && matches!(self.verdict, Verdict::Perfect | Verdict::Good | Verdict::Fair)
    }

    pub fn direction(&self) -> PitchDirection {
        deviation_direction(self.deviation_cents)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PitchDirection {
    Sharp,
    Flat,
    InTune,
}

/// Classifies a deviation, with ±[`IN_TUNE_CENTS`] counted as in tune.
pub fn deviation_direction(deviation_cents: f32) -> PitchDirection {
    if deviation_cents > IN_TUNE_CENTS {
        PitchDirection::Sharp
    } else if deviation_cents < -IN_TUNE_CENTS {
        PitchDirection::Flat
    } else {
        PitchDirection::InTune
    }
}

#[derive(Debug, Clone, Default)]
pub struct PitchComparator {
    window: TimingWindow,
}

impl PitchComparator {
    pub fn new(window: TimingWindow) -> Self {
        Self { window }
    }

    /// Compares a detected frequency with `target` at `current_time_ms`.
    ///
    /// Invalid frequencies degrade to a deviation of 0 cents.
    pub fn compare(
        &self,
        target: &Note,
        detected_frequency_hz: f32,
        current_time_ms: u64,
    ) -> ComparisonResult {
        let deviation_cents = cents_deviation(detected_frequency_hz, target.frequency_hz);
        let verdict = accuracy_verdict(deviation_cents);
        let timing_error_ms = current_time_ms as i64 - target.start_time_ms as i64;
        let in_time_window = self.window.contains(timing_error_ms);

        debug!(
            "[COMPARE] {} ({:.2} Hz) vs {:.2} Hz: {:+.1} cents, {:?}, {:+} ms",
            target.pitch_name,
            target.frequency_hz,
            detected_frequency_hz,
            deviation_cents,
            verdict,
            timing_error_ms
        );

        ComparisonResult {
            target_note: target.clone(),
            detected_frequency_hz,
            deviation_cents,
            verdict,
            timing_error_ms,
            in_time_window,
        }
    }

    /// The result recorded for a note whose interval elapsed unplayed.
    pub fn miss(&self, target: &Note) -> ComparisonResult {
        ComparisonResult {
            target_note: target.clone(),
            detected_frequency_hz: 0.0,
            deviation_cents: 0.0,
            verdict: Verdict::Miss,
            timing_error_ms: 0,
            in_time_window: false,
        }
    }
}

/// Whether `detected` is within `threshold_cents` of `target`, in either
/// direction. [`GOOD_THRESHOLD_CENTS`] is the usual threshold.
pub fn is_close_to_target(target_hz: f32, detected_hz: f32, threshold_cents: f32) -> bool {
    cents_deviation(detected_hz, target_hz).abs() <= threshold_cents
}

/// [`is_close_to_target`] with the GOOD threshold.
pub fn is_good_match(target_hz: f32, detected_hz: f32) -> bool {
    is_close_to_target(target_hz, detected_hz, GOOD_THRESHOLD_CENTS)
}

/// One line of coaching for a single result.
pub fn suggestion(result: &ComparisonResult) -> &'static str {
    let deviation = result.deviation_cents;
    match result.verdict {
        Verdict::Perfect => "Great! Keep it up.",
        Verdict::Miss => "Note missed. Watch for the next entry.",
        _ if deviation.abs() > 50.0 && deviation > 0.0 => "Pitch is high. Try bringing it down.",
        _ if deviation.abs() > 50.0 => "Pitch is low. Try bringing it up.",
        _ if deviation.abs() > 25.0 => "Intonation needs a small adjustment.",
        _ if !result.in_time_window && result.timing_error_ms < 0 => "Too early. Mind the rhythm.",
        _ if !result.in_time_window => "Too late. Keep up with the beat.",
        _ => "Nice. Keep practicing.",
    }
}
