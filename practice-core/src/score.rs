//! # Score Module
//!
//! The immutable timeline a session follows: a [`Song`] made of numbered
//! [`Measure`]s, each holding [`Note`]s with absolute start times.
//!
//! Songs come from an external notation parser (or JSON). Once loaded they
//! are shared read-only, typically behind an `Arc`.
//!
//! ## Features
//! - Time lookups: note/measure at a given playback position
//! - `TimeSignature` parsing from the usual `"3/4"` notation
//! - Structural validation of loaded songs
//! - A built-in four-measure demo song

use crate::error::{PracticeError, Result};
use crate::tuning::{frequency_to_midi, midi_to_frequency, midi_to_note_name, note_name_to_midi};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;

pub const DEFAULT_TEMPO_BPM: u32 = 120;
/// MIDI number of middle C, staff position 0.
const MIDDLE_C: i32 = 60;

/// Written note value, kept for display only.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotationType {
    Whole,
    Half,
    #[default]
    Quarter,
    Eighth,
    Sixteenth,
}

/// A single note of a monophonic line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Scientific pitch name, e.g. `"C#4"`.
    pub pitch_name: String,
    pub frequency_hz: f32,
    /// Absolute start time from the beginning of the song.
    pub start_time_ms: u64,
    pub duration_ms: u64,
    /// Semitone offset from middle C, used for layout.
    #[serde(default)]
    pub staff_position: i32,
    #[serde(default)]
    pub notation: NotationType,
}

impl Note {
    pub fn new(
        pitch_name: impl Into<String>,
        frequency_hz: f32,
        start_time_ms: u64,
        duration_ms: u64,
    ) -> Self {
        Self {
            pitch_name: pitch_name.into(),
            frequency_hz,
            start_time_ms,
            duration_ms,
            staff_position: 0,
            notation: NotationType::default(),
        }
    }

    /// Builds a note from a MIDI number, deriving name, frequency and staff
    /// position.
    pub fn from_midi(midi: u8, start_time_ms: u64, duration_ms: u64) -> Self {
        Self {
            pitch_name: midi_to_note_name(midi),
            frequency_hz: midi_to_frequency(midi),
            start_time_ms,
            duration_ms,
            staff_position: i32::from(midi) - MIDDLE_C,
            notation: NotationType::default(),
        }
    }

    /// MIDI number, from the pitch name when it parses, else the frequency.
    pub fn midi(&self) -> u8 {
        note_name_to_midi(&self.pitch_name).unwrap_or_else(|| frequency_to_midi(self.frequency_hz))
    }

    pub fn end_time_ms(&self) -> u64 {
        self.start_time_ms.saturating_add(self.duration_ms)
    }

    /// Whether `time_ms` falls in `[start, start + duration)`.
    pub fn contains_time(&self, time_ms: u64) -> bool {
        time_ms >= self.start_time_ms && time_ms < self.end_time_ms()
    }
}

/// Meter of a measure, written `numerator/denominator`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct TimeSignature {
    pub numerator: u8,
    pub denominator: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self {
            numerator: 4,
            denominator: 4,
        }
    }
}

impl FromStr for TimeSignature {
    type Err = PracticeError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || PracticeError::InvalidInput {
            what: "time signature",
            reason: format!("{s:?}"),
        };
        let (num, den) = s.trim().split_once('/').ok_or_else(invalid)?;
        let numerator: u8 = num.trim().parse().map_err(|_| invalid())?;
        let denominator: u8 = den.trim().parse().map_err(|_| invalid())?;
        if numerator == 0 || !denominator.is_power_of_two() {
            return Err(invalid());
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }
}

impl TryFrom<String> for TimeSignature {
    type Error = PracticeError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TimeSignature> for String {
    fn from(value: TimeSignature) -> Self {
        value.to_string()
    }
}

impl fmt::Display for TimeSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

fn default_tempo() -> u32 {
    DEFAULT_TEMPO_BPM
}

/// A numbered bar of notes sharing a meter and tempo.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    /// 1-based bar number.
    pub measure_number: u32,
    /// Ordered by start time, non-overlapping.
    pub notes: Vec<Note>,
    #[serde(default)]
    pub time_signature: TimeSignature,
    #[serde(default = "default_tempo")]
    pub tempo_bpm: u32,
}

impl Measure {
    pub fn new(measure_number: u32, notes: Vec<Note>) -> Self {
        Self {
            measure_number,
            notes,
            time_signature: TimeSignature::default(),
            tempo_bpm: DEFAULT_TEMPO_BPM,
        }
    }

    /// Earliest note start, 0 for an empty measure.
    pub fn start_time_ms(&self) -> u64 {
        self.notes.iter().map(|n| n.start_time_ms).min().unwrap_or(0)
    }

    /// Latest note end, 0 for an empty measure.
    pub fn end_time_ms(&self) -> u64 {
        self.notes.iter().map(Note::end_time_ms).max().unwrap_or(0)
    }

    pub fn duration_ms(&self) -> u64 {
        self.end_time_ms() - self.start_time_ms()
    }

    /// Whether `time_ms` falls in `[start, end)`. Empty measures contain nothing.
    pub fn contains_time(&self, time_ms: u64) -> bool {
        !self.notes.is_empty() && time_ms >= self.start_time_ms() && time_ms < self.end_time_ms()
    }

    pub fn note_at_time(&self, time_ms: u64) -> Option<&Note> {
        self.notes.iter().find(|n| n.contains_time(time_ms))
    }
}

/// Rough level label for catalogue display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Difficulty {
    #[default]
    Beginner,
    Intermediate,
    Advanced,
}

/// A complete piece, ordered by measure number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Song {
    pub id: String,
    pub title: String,
    #[serde(default = "unknown_composer")]
    pub composer: String,
    #[serde(default = "default_tempo")]
    pub default_tempo_bpm: u32,
    #[serde(default)]
    pub default_time_signature: TimeSignature,
    #[serde(default = "default_key")]
    pub key: String,
    pub measures: Vec<Measure>,
    /// Locator of a recorded reference performance, if any.
    #[serde(default)]
    pub reference_audio: Option<String>,
    #[serde(default)]
    pub difficulty: Difficulty,
    #[serde(default)]
    pub tags: Vec<String>,
}

fn unknown_composer() -> String {
    "Unknown".into()
}

fn default_key() -> String {
    "C".into()
}

impl Song {
    pub fn new(id: impl Into<String>, title: impl Into<String>, measures: Vec<Measure>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            composer: unknown_composer(),
            default_tempo_bpm: DEFAULT_TEMPO_BPM,
            default_time_signature: TimeSignature::default(),
            key: default_key(),
            measures,
            reference_audio: None,
            difficulty: Difficulty::default(),
            tags: Vec::new(),
        }
    }

    /// End time of the last measure.
    pub fn total_duration_ms(&self) -> u64 {
        self.measures.last().map(Measure::end_time_ms).unwrap_or(0)
    }

    pub fn total_note_count(&self) -> usize {
        self.measures.iter().map(|m| m.notes.len()).sum()
    }

    /// All notes in playing order.
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.measures.iter().flat_map(|m| m.notes.iter())
    }

    pub fn measure(&self, measure_number: u32) -> Option<&Measure> {
        self.measures.iter().find(|m| m.measure_number == measure_number)
    }

    pub fn measure_at_time(&self, time_ms: u64) -> Option<&Measure> {
        self.measures.iter().find(|m| m.contains_time(time_ms))
    }

    pub fn note_at_time(&self, time_ms: u64) -> Option<&Note> {
        self.measure_at_time(time_ms)?.note_at_time(time_ms)
    }

    /// Checks the ordering invariants a parser must uphold.
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| PracticeError::InvalidInput { what: "song", reason };

        let mut previous_number = 0;
        let mut previous_end = 0;
        for measure in &self.measures {
            if measure.measure_number <= previous_number {
                return Err(invalid(format!(
                    "measure {} follows measure {}",
                    measure.measure_number, previous_number
                )));
            }
            previous_number = measure.measure_number;

            for note in &measure.notes {
                if note.start_time_ms < previous_end {
                    return Err(invalid(format!(
                        "note {} at {} ms overlaps the previous note (ends {} ms)",
                        note.pitch_name, note.start_time_ms, previous_end
                    )));
                }
                if !(note.frequency_hz.is_finite() && note.frequency_hz > 0.0) {
                    return Err(invalid(format!(
                        "note {} has frequency {}",
                        note.pitch_name, note.frequency_hz
                    )));
                }
                previous_end = note.end_time_ms();
            }
        }
        Ok(())
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let song: Song = serde_json::from_str(json)?;
        song.validate()?;
        Ok(song)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        std::fs::write(path, self.to_json()?)?;
        Ok(())
    }

    /// "Twinkle Twinkle Little Star", first phrase: C C G G A A G.
    pub fn sample() -> Self {
        let measures = vec![
            Measure::new(1, vec![Note::from_midi(60, 0, 500), Note::from_midi(60, 500, 500)]),
            Measure::new(2, vec![Note::from_midi(67, 1000, 500), Note::from_midi(67, 1500, 500)]),
            Measure::new(3, vec![Note::from_midi(69, 2000, 500), Note::from_midi(69, 2500, 500)]),
            Measure::new(4, vec![Note {
                notation: NotationType::Half,
                ..Note::from_midi(67, 3000, 1000)
            }]),
        ];
        Self {
            composer: "Traditional".into(),
            tags: vec!["children".into(), "etude".into()],
            ..Self::new("sample_001", "Twinkle Twinkle Little Star", measures)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_song_shape() {
        let song = Song::sample();
        assert_eq!(song.measures.len(), 4);
        assert_eq!(song.total_note_count(), 7);
        assert_eq!(song.total_duration_ms(), 4000);
        assert!(song.validate().is_ok());
        let keys: Vec<u8> = song.notes().map(Note::midi).collect();
        assert_eq!(keys, vec![60, 60, 67, 67, 69, 69, 67]);
    }

    #[test]
    fn from_midi_derives_fields() {
        let note = Note::from_midi(69, 100, 250);
        assert_eq!(note.pitch_name, "A4");
        assert_eq!(note.frequency_hz, 440.0);
        assert_eq!(note.staff_position, 9);
        assert_eq!(note.end_time_ms(), 350);
    }

    #[test]
    fn lookups_by_time_are_half_open() {
        let song = Song::sample();
        assert_eq!(song.note_at_time(499).map(|n| n.start_time_ms), Some(0));
        assert_eq!(song.note_at_time(500).map(|n| n.start_time_ms), Some(500));
        assert_eq!(song.measure_at_time(1000).map(|m| m.measure_number), Some(2));
        assert!(song.measure_at_time(4000).is_none());
        assert_eq!(song.measure(3).map(|m| m.start_time_ms()), Some(2000));
        assert!(song.measure(9).is_none());
    }

    #[test]
    fn empty_measure_has_zero_extent() {
        let measure = Measure::new(1, Vec::new());
        assert_eq!(measure.start_time_ms(), 0);
        assert_eq!(measure.end_time_ms(), 0);
        assert!(!measure.contains_time(0));
    }

    #[test]
    fn time_signature_parsing() {
        let sig: TimeSignature = "3/4".parse().unwrap();
        assert_eq!((sig.numerator, sig.denominator), (3, 4));
        assert_eq!(sig.to_string(), "3/4");
        assert!("3/5".parse::<TimeSignature>().is_err());
        assert!("waltz".parse::<TimeSignature>().is_err());
        assert!("0/4".parse::<TimeSignature>().is_err());
    }

    #[test]
    fn json_round_trip_with_defaults() {
        let json = r#"{
            "id": "scale",
            "title": "Scale",
            "measures": [
                { "measure_number": 1, "time_signature": "2/4",
                  "notes": [ { "pitch_name": "D4", "frequency_hz": 293.66,
                               "start_time_ms": 0, "duration_ms": 400 } ] }
            ]
        }"#;
        let song = Song::from_json_str(json).unwrap();
        assert_eq!(song.composer, "Unknown");
        assert_eq!(song.default_tempo_bpm, 120);
        assert_eq!(song.measures[0].time_signature.numerator, 2);
        assert_eq!(song.measures[0].tempo_bpm, 120);
        assert_eq!(song.measures[0].notes[0].notation, NotationType::Quarter);

        let reparsed = Song::from_json_str(&song.to_json().unwrap()).unwrap();
        assert_eq!(reparsed, song);
    }

    #[test]
    fn validate_rejects_overlap_and_misordered_measures() {
        let overlapping = Song::new(
            "x",
            "x",
            vec![Measure::new(1, vec![Note::from_midi(60, 0, 500), Note::from_midi(62, 400, 500)])],
        );
        assert!(overlapping.validate().is_err());

        let misordered = Song::new(
            "y",
            "y",
            vec![
                Measure::new(2, vec![Note::from_midi(60, 0, 500)]),
                Measure::new(1, vec![Note::from_midi(62, 500, 500)]),
            ],
        );
        assert!(misordered.validate().is_err());
    }
}
