//! # Score Follower Module
//!
//! Maps a continuous playback position onto a [`Song`]'s discrete notes.
//!
//! Each position update returns the [`FollowerEvent`]s it caused, in order;
//! callers forward them to whoever is listening. Between notes the follower
//! legitimately has no current note, which is reported as
//! `NoteChanged { note: None, .. }` rather than as an error.

use crate::score::{Measure, Note, Song};
use log::debug;
use serde::Serialize;
use std::sync::Arc;

/// Something the follower noticed while moving to a new position.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum FollowerEvent {
    MeasureChanged {
        measure_index: usize,
        measure_number: u32,
    },
    NoteChanged {
        note: Option<Note>,
        measure_number: u32,
    },
    Progress {
        position_ms: u64,
        total_ms: u64,
        fraction: f32,
    },
}

pub struct ScoreFollower {
    song: Arc<Song>,
    /// `None` until the first update, and after a reset.
    position_ms: Option<u64>,
    measure_index: usize,
    note_index: Option<usize>,
}

impl ScoreFollower {
    pub fn new(song: Arc<Song>) -> Self {
        Self {
            song,
            position_ms: None,
            measure_index: 0,
            note_index: None,
        }
    }

    pub fn song(&self) -> &Arc<Song> {
        &self.song
    }

    pub fn position_ms(&self) -> u64 {
        self.position_ms.unwrap_or(0)
    }

    /// Moves to `position_ms`. Repeating the current position is a no-op.
    pub fn update_position(&mut self, position_ms: u64) -> Vec<FollowerEvent> {
        if self.position_ms == Some(position_ms) {
            return Vec::new();
        }
        self.locate(position_ms, false)
    }

    /// Jumps to `position_ms`, re-announcing the measure and note even if
    /// they did not change.
    pub fn seek_to(&mut self, position_ms: u64) -> Vec<FollowerEvent> {
        self.locate(position_ms, true)
    }

    /// Returns to the first measure. An empty song emits nothing.
    pub fn reset(&mut self) -> Vec<FollowerEvent> {
        self.position_ms = None;
        self.measure_index = 0;
        self.note_index = None;
        match self.song.measures.first() {
            Some(measure) => vec![FollowerEvent::MeasureChanged {
                measure_index: 0,
                measure_number: measure.measure_number,
            }],
            None => Vec::new(),
        }
    }

    fn locate(&mut self, position_ms: u64, force: bool) -> Vec<FollowerEvent> {
        self.position_ms = Some(position_ms);
        let mut events = Vec::new();

        if let Some(measure_index) = self.find_measure_index(position_ms) {
            let previous = (self.measure_index, self.note_index);

            if force || measure_index != self.measure_index {
                self.measure_index = measure_index;
                self.note_index = None;
                let measure_number = self.song.measures[measure_index].measure_number;
                debug!("[FOLLOWER] Measure {} at {} ms", measure_number, position_ms);
                events.push(FollowerEvent::MeasureChanged {
                    measure_index,
                    measure_number,
                });
            }

            let measure = &self.song.measures[self.measure_index];
            self.note_index = measure.notes.iter().position(|n| n.contains_time(position_ms));

            if force || (self.measure_index, self.note_index) != previous {
                let note = self.note_index.map(|i| measure.notes[i].clone());
                debug!(
                    "[FOLLOWER] Current note {} in measure {}",
                    note.as_ref().map_or("-", |n| n.pitch_name.as_str()),
                    measure.measure_number
                );
                events.push(FollowerEvent::NoteChanged {
                    note,
                    measure_number: measure.measure_number,
                });
            }
        }

        events.push(FollowerEvent::Progress {
            position_ms,
            total_ms: self.song.total_duration_ms(),
            fraction: self.progress(),
        });
        events
    }

    /// The measure in effect at `time_ms`: the one containing it, the last
    /// one past the end, the first one before the start, otherwise the last
    /// one already begun (a rest between measures).
    fn find_measure_index(&self, time_ms: u64) -> Option<usize> {
        let measures = &self.song.measures;
        if measures.is_empty() {
            return None;
        }
        if let Some(index) = measures.iter().position(|m| m.contains_time(time_ms)) {
            return Some(index);
        }
        if time_ms >= self.song.total_duration_ms() {
            return Some(measures.len() - 1);
        }
        Some(
            measures
                .iter()
                .rposition(|m| !m.notes.is_empty() && m.start_time_ms() <= time_ms)
                .unwrap_or(0),
        )
    }

    /// The note at the cached position, if the position still lies within it.
    pub fn current_note(&self) -> Option<&Note> {
        let position = self.position_ms?;
        let note = self.current_measure()?.notes.get(self.note_index?)?;
        note.contains_time(position).then_some(note)
    }

    pub fn current_measure(&self) -> Option<&Measure> {
        self.song.measures.get(self.measure_index)
    }

    pub fn current_measure_index(&self) -> usize {
        self.measure_index
    }

    /// Number of the current measure, 0 for an empty song.
    pub fn current_measure_number(&self) -> u32 {
        self.current_measure().map_or(0, |m| m.measure_number)
    }

    /// The note after the current one: later in this measure, else the
    /// first note of the following measures.
    pub fn next_note(&self) -> Option<&Note> {
        let measure = self.current_measure()?;
        let position = self.position_ms();
        let in_measure = match self.note_index {
            Some(index) => measure.notes.get(index + 1),
            None => measure.notes.iter().find(|n| n.start_time_ms > position),
        };
        in_measure.or_else(|| {
            self.song.measures[self.measure_index + 1..]
                .iter()
                .find_map(|m| m.notes.first())
        })
    }

    /// Notes overlapping `[start_ms, end_ms)`.
    pub fn notes_in_range(&self, start_ms: u64, end_ms: u64) -> Vec<&Note> {
        self.song
            .notes()
            .filter(|n| n.end_time_ms() > start_ms && n.start_time_ms < end_ms)
            .collect()
    }

    pub fn total_duration_ms(&self) -> u64 {
        self.song.total_duration_ms()
    }

    /// Fraction of the song played, in `[0, 1]`; 0 for a zero-length song.
    pub fn progress(&self) -> f32 {
        let total = self.total_duration_ms();
        if total == 0 {
            return 0.0;
        }
        (self.position_ms() as f64 / total as f64).clamp(0.0, 1.0) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_note_song() -> Arc<Song> {
        Arc::new(Song::new(
            "two",
            "Two Notes",
            vec![Measure::new(1, vec![Note::from_midi(60, 0, 500), Note::from_midi(62, 500, 500)])],
        ))
    }

    fn note_changes(events: &[FollowerEvent]) -> Vec<Option<String>> {
        events
            .iter()
            .filter_map(|e| match e {
                FollowerEvent::NoteChanged { note, .. } => {
                    Some(note.as_ref().map(|n| n.pitch_name.clone()))
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn follows_notes_and_pins_past_the_end() {
        let mut follower = ScoreFollower::new(two_note_song());

        follower.update_position(250);
        assert_eq!(follower.current_note().map(|n| n.pitch_name.as_str()), Some("C4"));

        follower.update_position(750);
        assert_eq!(follower.current_note().map(|n| n.pitch_name.as_str()), Some("D4"));

        follower.update_position(1500);
        assert!(follower.current_note().is_none());
        assert_eq!(follower.current_measure().map(|m| m.measure_number), Some(1));
        assert_eq!(follower.progress(), 1.0);
    }

    #[test]
    fn repeated_position_is_a_no_op() {
        let mut follower = ScoreFollower::new(two_note_song());
        assert!(!follower.update_position(100).is_empty());
        assert!(follower.update_position(100).is_empty());
    }

    #[test]
    fn note_change_emitted_once_per_note() {
        let mut follower = ScoreFollower::new(two_note_song());
        let mut changes = Vec::new();
        for t in [0, 100, 200, 499, 500, 900, 1000, 1100] {
            changes.extend(note_changes(&follower.update_position(t)));
        }
        assert_eq!(
            changes,
            vec![Some("C4".to_string()), Some("D4".to_string()), None]
        );
    }

    #[test]
    fn measure_change_then_note_change() {
        let mut follower = ScoreFollower::new(Arc::new(Song::sample()));
        follower.update_position(100);
        let events = follower.update_position(1100);
        assert!(matches!(
            events[0],
            FollowerEvent::MeasureChanged { measure_index: 1, measure_number: 2 }
        ));
        assert_eq!(note_changes(&events), vec![Some("G4".to_string())]);
        assert!(matches!(events.last(), Some(FollowerEvent::Progress { .. })));
        assert_eq!(follower.current_measure_number(), 2);
    }

    #[test]
    fn next_note_crosses_measures() {
        let mut follower = ScoreFollower::new(Arc::new(Song::sample()));
        follower.update_position(600);
        assert_eq!(follower.next_note().map(|n| n.start_time_ms), Some(1000));
        follower.update_position(3500);
        assert!(follower.next_note().is_none());
    }

    #[test]
    fn seek_re_announces_current_note() {
        let mut follower = ScoreFollower::new(two_note_song());
        follower.update_position(250);
        let events = follower.seek_to(260);
        assert_eq!(note_changes(&events), vec![Some("C4".to_string())]);
        assert!(events.iter().any(|e| matches!(e, FollowerEvent::MeasureChanged { .. })));
    }

    #[test]
    fn reset_on_empty_song_emits_nothing() {
        let mut follower = ScoreFollower::new(Arc::new(Song::new("e", "Empty", Vec::new())));
        assert!(follower.reset().is_empty());
        assert_eq!(follower.current_measure_index(), 0);
        assert_eq!(follower.current_measure_number(), 0);
        assert_eq!(follower.progress(), 0.0);
        assert!(follower.current_note().is_none());
    }

    #[test]
    fn notes_in_range_uses_overlap() {
        let follower = ScoreFollower::new(Arc::new(Song::sample()));
        let starts: Vec<u64> = follower
            .notes_in_range(400, 1100)
            .iter()
            .map(|n| n.start_time_ms)
            .collect();
        assert_eq!(starts, vec![0, 500, 1000]);
        assert!(follower.notes_in_range(500, 500).is_empty());
    }
}
