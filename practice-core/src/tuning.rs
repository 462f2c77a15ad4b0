//! # Pitch Math Module
//!
//! Pure conversions between frequency, MIDI note numbers, note names and
//! cents, plus the accuracy verdict shared by every part of the engine that
//! judges intonation.
//!
//! ## Features
//! - Equal temperament with A4 = 440 Hz = MIDI 69
//! - Precomputed 128-entry MIDI note table
//! - Note name parsing (`C4`, `F#3`, `Bb2`, `A-1`)
//! - Cent deviation calculations (positive = sharp, negative = flat)
//! - The PERFECT / GOOD / FAIR / POOR thresholds, defined once

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Reference pitch of A4 in Hz.
pub const A4_FREQUENCY: f32 = 440.0;
/// MIDI note number of A4.
pub const A4_MIDI: u8 = 69;

/// Deviations strictly below this are PERFECT.
pub const PERFECT_THRESHOLD_CENTS: f32 = 10.0;
/// Deviations strictly below this are GOOD.
pub const GOOD_THRESHOLD_CENTS: f32 = 25.0;
/// Deviations strictly below this are FAIR; anything else is POOR.
pub const FAIR_THRESHOLD_CENTS: f32 = 50.0;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Represents a single MIDI note with its name and frequency.
#[derive(Debug, Clone)]
pub struct NoteInfo {
    /// Note name (e.g., "A4", "C#3")
    pub name: String,
    /// Frequency in Hz
    pub frequency: f32,
}

/// Statically computed names and frequencies for MIDI notes 0..=127.
static NOTES: Lazy<Vec<NoteInfo>> = Lazy::new(|| {
    (0..=127u8)
        .map(|midi| NoteInfo {
            name: format!("{}{}", NOTE_NAMES[(midi % 12) as usize], octave_of(midi)),
            frequency: equal_tempered(midi),
        })
        .collect()
});

/// Static map for quick note name to MIDI number lookups.
static NOTE_MAP: Lazy<BTreeMap<String, u8>> = Lazy::new(|| {
    NOTES
        .iter()
        .enumerate()
        .map(|(i, note)| (note.name.clone(), i as u8))
        .collect()
});

fn is_positive(frequency: f32) -> bool {
    frequency.is_finite() && frequency > 0.0
}

fn octave_of(midi: u8) -> i32 {
    (midi / 12) as i32 - 1
}

fn equal_tempered(midi: u8) -> f32 {
    A4_FREQUENCY * 2.0_f32.powf((midi as f32 - A4_MIDI as f32) / 12.0)
}

/// Discrete accuracy bucket assigned to one note attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Verdict {
    Perfect,
    Good,
    Fair,
    Poor,
    /// The note was never attempted.
    Miss,
}

impl Verdict {
    /// Point value used by the pitch accuracy sub-score.
    pub fn points(self) -> f32 {
        match self {
            Verdict::Perfect => 100.0,
            Verdict::Good => 80.0,
            Verdict::Fair => 60.0,
            Verdict::Poor => 40.0,
            Verdict::Miss => 0.0,
        }
    }

    /// PERFECT and GOOD count as accurate.
    pub fn is_accurate(self) -> bool {
        matches!(self, Verdict::Perfect | Verdict::Good)
    }

    pub fn label(self) -> &'static str {
        match self {
            Verdict::Perfect => "Perfect",
            Verdict::Good => "Good",
            Verdict::Fair => "Fair",
            Verdict::Poor => "Poor",
            Verdict::Miss => "Miss",
        }
    }
}

/// Converts a frequency to the nearest MIDI note number.
///
/// # Returns
/// * MIDI note number clamped to 0..=127, or 0 for non-positive input
pub fn frequency_to_midi(frequency: f32) -> u8 {
    if frequency.is_nan() || frequency <= 0.0 {
        return 0;
    }
    let midi = A4_MIDI as f32 + 12.0 * (frequency / A4_FREQUENCY).log2();
    midi.round().clamp(0.0, 127.0) as u8
}

/// Converts a MIDI note number to its equal-tempered frequency.
pub fn midi_to_frequency(midi: u8) -> f32 {
    NOTES
        .get(midi as usize)
        .map_or_else(|| equal_tempered(midi), |note| note.frequency)
}

/// Converts a MIDI note number to a name with octave, e.g. 69 → "A4".
pub fn midi_to_note_name(midi: u8) -> String {
    match NOTES.get(midi as usize) {
        Some(note) => note.name.clone(),
        None => format!("{}{}", NOTE_NAMES[(midi % 12) as usize], octave_of(midi)),
    }
}

/// Converts a frequency straight to the name of its nearest note.
pub fn frequency_to_note_name(frequency: f32) -> String {
    midi_to_note_name(frequency_to_midi(frequency))
}

/// Parses a note name into a MIDI note number.
///
/// Accepts sharps (`#`) and flats (`b`), and negative octaves (`C-1` is
/// MIDI 0). Returns `None` for malformed names or notes outside 0..=127.
pub fn note_name_to_midi(name: &str) -> Option<u8> {
    let name = name.trim();
    if let Some(&midi) = NOTE_MAP.get(name) {
        return Some(midi);
    }

    let mut chars = name.chars();
    let step = match chars.next()?.to_ascii_uppercase() {
        'C' => 0,
        'D' => 2,
        'E' => 4,
        'F' => 5,
        'G' => 7,
        'A' => 9,
        'B' => 11,
        _ => return None,
    };
    let rest = chars.as_str();
    let accidental_len = rest
        .chars()
        .take_while(|c| *c == '#' || *c == 'b')
        .count();
    let alter: i32 = rest[..accidental_len]
        .chars()
        .map(|c| if c == '#' { 1 } else { -1 })
        .sum();
    let octave: i32 = rest[accidental_len..].parse().ok()?;

    let midi = (octave + 1) * 12 + step + alter;
    u8::try_from(midi).ok().filter(|m| *m <= 127)
}

/// Calculates the deviation of `actual` from `target` in cents.
///
/// - 100 cents = 1 semitone
/// - Positive values indicate sharpness, negative values indicate flatness
/// - Returns 0 when either frequency is not positive
pub fn cents_deviation(actual: f32, target: f32) -> f32 {
    if !is_positive(actual) || !is_positive(target) {
        return 0.0;
    }
    // log2 difference rather than log2 of the ratio: exactly antisymmetric
    (1200.0 * ((actual as f64).log2() - (target as f64).log2())) as f32
}

/// Cent deviation of a frequency from its nearest equal-tempered note.
pub fn cents_from_nearest_note(frequency: f32) -> f32 {
    if frequency.is_nan() || frequency <= 0.0 {
        return 0.0;
    }
    cents_deviation(frequency, midi_to_frequency(frequency_to_midi(frequency)))
}

/// Maps an absolute cent deviation to its verdict.
///
/// Never returns [`Verdict::Miss`]; misses are decided by the session, not
/// by intonation.
pub fn accuracy_verdict(cents: f32) -> Verdict {
    let abs_cents = cents.abs();
    if abs_cents < PERFECT_THRESHOLD_CENTS {
        Verdict::Perfect
    } else if abs_cents < GOOD_THRESHOLD_CENTS {
        Verdict::Good
    } else if abs_cents < FAIR_THRESHOLD_CENTS {
        Verdict::Fair
    } else {
        Verdict::Poor
    }
}

/// Finds the closest musical note to a given frequency.
///
/// # Returns
/// * `(note_name, target_frequency)` - Closest note name and its frequency
pub fn find_nearest_note(frequency: f32) -> (String, f32) {
    let midi = frequency_to_midi(frequency);
    (midi_to_note_name(midi), midi_to_frequency(midi))
}

/// Full tuner-style reading of a single frequency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FrequencyAnalysis {
    pub frequency: f32,
    pub midi: u8,
    pub note_name: String,
    /// Deviation from the nearest note in cents.
    pub cents: f32,
    pub verdict: Verdict,
}

/// Analyzes a frequency against its nearest note.
pub fn analyze_frequency(frequency: f32) -> FrequencyAnalysis {
    let midi = frequency_to_midi(frequency);
    let cents = cents_from_nearest_note(frequency);
    FrequencyAnalysis {
        frequency,
        midi,
        note_name: midi_to_note_name(midi),
        cents,
        verdict: accuracy_verdict(cents),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn a4_is_midi_69() {
        assert_eq!(frequency_to_midi(440.0), 69);
        assert_relative_eq!(midi_to_frequency(69), 440.0);
        assert_eq!(midi_to_note_name(69), "A4");
    }

    #[test]
    fn frequency_to_midi_clamps_and_rejects_non_positive() {
        assert_eq!(frequency_to_midi(0.0), 0);
        assert_eq!(frequency_to_midi(-10.0), 0);
        assert_eq!(frequency_to_midi(f32::NAN), 0);
        assert_eq!(frequency_to_midi(1.0), 0);
        assert_eq!(frequency_to_midi(50_000.0), 127);
    }

    #[test]
    fn note_names_cover_octave_boundaries() {
        assert_eq!(midi_to_note_name(0), "C-1");
        assert_eq!(midi_to_note_name(60), "C4");
        assert_eq!(midi_to_note_name(61), "C#4");
        assert_eq!(midi_to_note_name(127), "G9");
    }

    #[test]
    fn parses_sharps_flats_and_negative_octaves() {
        assert_eq!(note_name_to_midi("A4"), Some(69));
        assert_eq!(note_name_to_midi("C4"), Some(60));
        assert_eq!(note_name_to_midi("Bb3"), Some(58));
        assert_eq!(note_name_to_midi("Cb4"), Some(59));
        assert_eq!(note_name_to_midi("C-1"), Some(0));
        assert_eq!(note_name_to_midi("H2"), None);
        assert_eq!(note_name_to_midi("C"), None);
        assert_eq!(note_name_to_midi("G#9"), None);
    }

    #[test]
    fn cents_of_an_octave_and_a_semitone() {
        assert_relative_eq!(cents_deviation(880.0, 440.0), 1200.0, epsilon = 1e-3);
        assert_relative_eq!(cents_deviation(440.0, 880.0), -1200.0, epsilon = 1e-3);
        let semitone = midi_to_frequency(70);
        assert_relative_eq!(cents_deviation(semitone, 440.0), 100.0, epsilon = 1e-2);
    }

    #[test]
    fn cents_degenerate_to_zero() {
        assert_eq!(cents_deviation(0.0, 440.0), 0.0);
        assert_eq!(cents_deviation(440.0, 0.0), 0.0);
        assert_eq!(cents_deviation(-1.0, -1.0), 0.0);
        assert_eq!(cents_deviation(440.0, 440.0), 0.0);
    }

    #[test]
    fn verdict_boundaries() {
        assert_eq!(accuracy_verdict(9.99), Verdict::Perfect);
        assert_eq!(accuracy_verdict(10.0), Verdict::Good);
        assert_eq!(accuracy_verdict(24.99), Verdict::Good);
        assert_eq!(accuracy_verdict(25.0), Verdict::Fair);
        assert_eq!(accuracy_verdict(49.99), Verdict::Fair);
        assert_eq!(accuracy_verdict(50.0), Verdict::Poor);
        assert_eq!(accuracy_verdict(-9.99), Verdict::Perfect);
        assert_eq!(accuracy_verdict(-50.0), Verdict::Poor);
    }

    #[test]
    fn analyze_slightly_sharp_a() {
        let analysis = analyze_frequency(442.0);
        assert_eq!(analysis.note_name, "A4");
        assert_eq!(analysis.midi, 69);
        assert!(analysis.cents > 7.0 && analysis.cents < 8.5);
        assert_eq!(analysis.verdict, Verdict::Perfect);
    }

    #[test]
    fn nearest_note_of_middle_c() {
        let (name, freq) = find_nearest_note(262.0);
        assert_eq!(name, "C4");
        assert_relative_eq!(freq, 261.6256, epsilon = 1e-2);
    }
}
