//! # MIDI Export Module
//!
//! Writes a [`Song`] as a Standard MIDI File (format 1, one track) so the
//! piece can be heard or imported into notation software.
//!
//! ## Track layout
//! - Track name, tempo and time signature meta events at tick 0
//! - One program change selecting the instrument
//! - Note on/off pairs for every note, in start-time order
//! - End of track

use crate::error::{PracticeError, Result};
use crate::score::Song;
use log::info;
use midly::{
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind,
};
use std::path::Path;

/// Ticks per quarter note.
pub const TICKS_PER_QUARTER: u16 = 480;

const NOTE_VELOCITY: u8 = 80;
const CHANNEL: u8 = 0;

/// Largest delta a variable-length quantity can hold.
const MAX_TICK: u32 = 0x0FFF_FFFF;
const MAX_TEMPO_MICROS: u32 = 0xFF_FFFF;

/// Milliseconds to ticks at `tempo_bpm`.
pub fn ms_to_ticks(ms: u64, tempo_bpm: u32) -> u32 {
    let ticks = ms as u128 * tempo_bpm as u128 * TICKS_PER_QUARTER as u128 / 60_000;
    ticks.min(MAX_TICK as u128) as u32
}

#[derive(Debug, Clone, Copy)]
struct TimedNote {
    tick: u32,
    /// Note-offs sort before note-ons at the same tick.
    is_on: bool,
    key: u8,
}

fn timed_notes(song: &Song, tempo_bpm: u32) -> Vec<TimedNote> {
    let mut timed = Vec::with_capacity(song.total_note_count() * 2);
    for note in song.notes() {
        let key = note.midi().min(127);
        timed.push(TimedNote {
            tick: ms_to_ticks(note.start_time_ms, tempo_bpm),
            is_on: true,
            key,
        });
        timed.push(TimedNote {
            tick: ms_to_ticks(note.end_time_ms(), tempo_bpm),
            is_on: false,
            key,
        });
    }
    timed.sort_by_key(|n| (n.tick, n.is_on));
    timed
}

fn meta(message: MetaMessage<'_>) -> TrackEvent<'_> {
    TrackEvent {
        delta: 0.into(),
        kind: TrackEventKind::Meta(message),
    }
}

/// Builds the single-track file for `song` using General MIDI `program`.
fn build_smf(song: &Song, program: u8) -> Smf<'_> {
    let tempo_bpm = song.default_tempo_bpm.max(1);
    let signature = song.default_time_signature;
    let micros_per_quarter = (60_000_000 / tempo_bpm).min(MAX_TEMPO_MICROS);

    let mut events = vec![
        meta(MetaMessage::TrackName(song.title.as_bytes())),
        meta(MetaMessage::Tempo(micros_per_quarter.into())),
        meta(MetaMessage::TimeSignature(
            signature.numerator,
            signature.denominator.trailing_zeros() as u8,
            24,
            8,
        )),
        TrackEvent {
            delta: 0.into(),
            kind: TrackEventKind::Midi {
                channel: CHANNEL.into(),
                message: MidiMessage::ProgramChange {
                    program: (program & 0x7F).into(),
                },
            },
        },
    ];

    let mut last_tick = 0;
    for note in timed_notes(song, tempo_bpm) {
        let message = if note.is_on {
            MidiMessage::NoteOn {
                key: note.key.into(),
                vel: NOTE_VELOCITY.into(),
            }
        } else {
            MidiMessage::NoteOff {
                key: note.key.into(),
                vel: 0.into(),
            }
        };
        events.push(TrackEvent {
            delta: (note.tick - last_tick).into(),
            kind: TrackEventKind::Midi {
                channel: CHANNEL.into(),
                message,
            },
        });
        last_tick = note.tick;
    }
    events.push(meta(MetaMessage::EndOfTrack));

    let header = Header::new(Format::Parallel, Timing::Metrical(TICKS_PER_QUARTER.into()));
    Smf {
        header,
        tracks: vec![Track::from(events)],
    }
}

/// Encodes `song` as a complete SMF file using General MIDI `program`.
pub fn song_to_midi(song: &Song, program: u8) -> Result<Vec<u8>> {
    let smf = build_smf(song, program);
    let mut buffer = Vec::new();
    smf.write(&mut buffer).map_err(|e| PracticeError::Midi(e.to_string()))?;
    Ok(buffer)
}

/// Writes `song` to `path` as a MIDI file.
pub fn save(song: &Song, program: u8, path: impl AsRef<Path>) -> Result<()> {
    let bytes = song_to_midi(song, program)?;
    std::fs::write(path.as_ref(), &bytes)?;
    info!(
        "[MIDI] Exported {} ({} notes, {} bytes) to {}",
        song.title,
        song.total_note_count(),
        bytes.len(),
        path.as_ref().display()
    );
    Ok(())
}
