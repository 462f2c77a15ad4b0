use midly::{Format, MetaMessage, MidiMessage, Smf, Timing, TrackEventKind};
use practice_core::midi::{ms_to_ticks, save, song_to_midi};
use practice_core::score::{Measure, Note, Song};

#[test]
fn exported_song_parses_back() {
    let song = Song::sample();
    let bytes = song_to_midi(&song, 40).unwrap();
    let smf = Smf::parse(&bytes).unwrap();

    assert_eq!(smf.header.format, Format::Parallel);
    assert!(matches!(smf.header.timing, Timing::Metrical(ticks) if ticks.as_int() == 480));
    assert_eq!(smf.tracks.len(), 1);

    let mut tick = 0u32;
    let mut name = None;
    let mut tempo = None;
    let mut signature = None;
    let mut program = None;
    let mut note_ons = Vec::new();
    let mut last_off = 0u32;

    for event in &smf.tracks[0] {
        tick += event.delta.as_int();
        match event.kind {
            TrackEventKind::Meta(MetaMessage::TrackName(bytes)) => name = Some(bytes.to_vec()),
            TrackEventKind::Meta(MetaMessage::Tempo(t)) => tempo = Some(t.as_int()),
            TrackEventKind::Meta(MetaMessage::TimeSignature(n, d, c, b)) => {
                signature = Some((n, d, c, b))
            }
            TrackEventKind::Midi { message, .. } => match message {
                MidiMessage::ProgramChange { program: p } => program = Some(p.as_int()),
                MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                    note_ons.push((tick, key.as_int()))
                }
                MidiMessage::NoteOff { .. } => last_off = tick,
                _ => {}
            },
            _ => {}
        }
    }

    assert_eq!(name.as_deref(), Some(song.title.as_bytes()));
    assert_eq!(tempo, Some(500_000));
    assert_eq!(signature, Some((4, 2, 24, 8)));
    assert_eq!(program, Some(40));
    assert_eq!(
        note_ons,
        vec![(0, 60), (480, 60), (960, 67), (1440, 67), (1920, 69), (2400, 69), (2880, 67)]
    );
    assert_eq!(last_off, ms_to_ticks(song.total_duration_ms(), 120));
}

#[test]
fn rests_become_delta_time() {
    let mut song = Song::new(
        "rest",
        "With Rest",
        vec![Measure::new(
            1,
            vec![Note::from_midi(69, 0, 250), Note::from_midi(71, 1000, 250)],
        )],
    );
    song.default_tempo_bpm = 60;
    let bytes = song_to_midi(&song, 0).unwrap();
    let smf = Smf::parse(&bytes).unwrap();

    let mut tick = 0u32;
    let mut ons = Vec::new();
    for event in &smf.tracks[0] {
        tick += event.delta.as_int();
        if let TrackEventKind::Midi {
            message: MidiMessage::NoteOn { key, .. },
            ..
        } = event.kind
        {
            ons.push((tick, key.as_int()));
        }
    }
    assert_eq!(ons, vec![(0, 69), (480, 71)]);
}

#[test]
fn save_writes_the_file() {
    let path = std::env::temp_dir()
        .join(format!("practice-core-export-{}.mid", std::process::id()));
    save(&Song::sample(), 40, &path).unwrap();
    let written = std::fs::read(&path).unwrap();
    assert_eq!(written, song_to_midi(&Song::sample(), 40).unwrap());
    std::fs::remove_file(&path).unwrap();
}
