use crossbeam_channel::Receiver;
use practice_core::audio::{AudioCallback, AudioInput, ReplayInput};
use practice_core::config::{BUFFER_SIZE, SAMPLE_RATE};
use practice_core::playback::{ManualPlayback, Playback};
use practice_core::score::Song;
use practice_core::session::{PracticeEngine, SessionEvent, SessionState};
use practice_core::tuning::{Verdict, midi_to_frequency};
use practice_core::{EngineConfig, PracticeError, Result};
use std::f32::consts::PI;
use std::sync::Arc;
use std::time::{Duration, Instant};

const WAIT: Duration = Duration::from_secs(3);

fn sine_frames(freq: f32, count: usize) -> Vec<Vec<f32>> {
    let frame: Vec<f32> = (0..BUFFER_SIZE)
        .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / SAMPLE_RATE as f32).sin())
        .collect();
    vec![frame; count]
}

fn fast_config() -> EngineConfig {
    EngineConfig {
        tick_interval_ms: 5,
        ..EngineConfig::default()
    }
}

/// Receives until `matches` accepts an event or the wait runs out.
fn wait_for(
    events: &Receiver<SessionEvent>,
    matches: impl Fn(&SessionEvent) -> bool,
) -> Option<SessionEvent> {
    let deadline = Instant::now() + WAIT;
    while let Some(left) = deadline.checked_duration_since(Instant::now()) {
        match events.recv_timeout(left) {
            Ok(event) if matches(&event) => return Some(event),
            Ok(_) => continue,
            Err(_) => return None,
        }
    }
    None
}

fn engine_playing_c4(playback: Arc<ManualPlayback>) -> (PracticeEngine, Receiver<SessionEvent>) {
    let _ = env_logger::builder().is_test(true).try_init();
    let frames = sine_frames(midi_to_frequency(60), 4);
    let input = ReplayInput::new(frames, SAMPLE_RATE, Duration::from_millis(5));
    PracticeEngine::new(Arc::new(Song::sample()), fast_config(), Box::new(input), playback)
}

#[test]
fn played_note_is_hit_and_scored() {
    let playback = Arc::new(ManualPlayback::new(4000));
    let (mut engine, events) = engine_playing_c4(Arc::clone(&playback));

    engine.start().unwrap();
    assert_eq!(engine.state(), SessionState::Practicing);
    assert!(playback.is_playing());

    let hit = wait_for(&events, |e| matches!(e, SessionEvent::NoteHit(_)));
    match hit {
        Some(SessionEvent::NoteHit(result)) => {
            assert_eq!(result.target_note.pitch_name, "C4");
            assert!(result.in_time_window);
        }
        other => panic!("expected a hit, got {other:?}"),
    }

    let score = engine.complete().unwrap();
    assert_eq!(engine.state(), SessionState::Completed);
    assert_eq!(score.statistics.total_notes, 1);
    assert!(score.completion_score > 0.0 && score.completion_score < 100.0);

    let session = engine.session().unwrap();
    assert!(session.is_completed());
    assert_eq!(session.song_id, "sample_001");
    assert_eq!(session.total_score, score.total_score);
    assert_eq!(engine.score(), Some(&score));

    assert!(wait_for(&events, |e| matches!(e, SessionEvent::Completed(_))).is_some());
    assert!(matches!(engine.complete(), Err(PracticeError::InvalidTransition { .. })));
}

#[test]
fn pause_and_resume_keep_results() {
    let playback = Arc::new(ManualPlayback::new(4000));
    let (mut engine, events) = engine_playing_c4(Arc::clone(&playback));

    engine.start().unwrap();
    assert!(wait_for(&events, |e| matches!(e, SessionEvent::NoteHit(_))).is_some());

    engine.pause().unwrap();
    assert_eq!(engine.state(), SessionState::Paused);
    assert!(!playback.is_playing());
    assert!(engine.pause().is_err());

    engine.resume().unwrap();
    assert_eq!(engine.state(), SessionState::Practicing);

    let score = engine.complete().unwrap();
    assert_eq!(score.statistics.total_notes, 1);
}

#[test]
fn wrong_note_is_recorded_and_song_end_reported() {
    let playback = Arc::new(ManualPlayback::new(4000));
    let (mut engine, events) = engine_playing_c4(Arc::clone(&playback));

    engine.start().unwrap();
    assert!(wait_for(&events, |e| matches!(e, SessionEvent::NoteHit(_))).is_some());

    // Still sounding C4 while the score has moved on to the second note
    playback.set_position(600);
    let reached_second = wait_for(&events, |e| match e {
        SessionEvent::NoteChanged { note: Some(note), .. } => note.start_time_ms == 500,
        _ => false,
    });
    assert!(reached_second.is_some());
    playback.set_position(4000);
    assert!(wait_for(&events, |e| matches!(e, SessionEvent::PlaybackFinished)).is_some());

    let score = engine.complete().unwrap();
    assert_eq!(score.statistics.total_notes, 2);
    let results = engine.last_results();
    assert_eq!(results[0].target_note.start_time_ms, 0);
    assert!(results[0].verdict.is_accurate());
    assert_eq!(results[1].target_note.start_time_ms, 500);
    assert_eq!(results[1].verdict, Verdict::Poor);
    assert!(results[1].deviation_cents < 0.0);
}

#[test]
fn stop_abandons_without_scoring() {
    let playback = Arc::new(ManualPlayback::new(4000));
    let (mut engine, events) = engine_playing_c4(playback);

    engine.start().unwrap();
    engine.stop().unwrap();
    assert_eq!(engine.state(), SessionState::Idle);
    assert!(engine.session().is_none());
    assert!(engine.score().is_none());
    let idle = wait_for(&events, |e| {
        matches!(e, SessionEvent::StateChanged(SessionState::Idle))
    });
    assert!(idle.is_some());

    // A stopped engine can start over
    engine.start().unwrap();
    assert_eq!(engine.state(), SessionState::Practicing);
    engine.stop().unwrap();
}

struct UnpluggedInput;

impl AudioInput for UnpluggedInput {
    fn start(&mut self, callback: Arc<dyn AudioCallback>) -> Result<()> {
        callback.on_capture_error("device unplugged".into());
        Ok(())
    }
    fn stop(&mut self) {}
    fn is_running(&self) -> bool {
        false
    }
}

#[test]
fn capture_failure_is_reported_once() {
    let playback = Arc::new(ManualPlayback::new(4000));
    let (mut engine, events) = PracticeEngine::new(
        Arc::new(Song::sample()),
        fast_config(),
        Box::new(UnpluggedInput),
        playback,
    );

    engine.start().unwrap();
    match wait_for(&events, |e| matches!(e, SessionEvent::CaptureError(_))) {
        Some(SessionEvent::CaptureError(message)) => assert_eq!(message, "device unplugged"),
        other => panic!("expected a capture error, got {other:?}"),
    }
    std::thread::sleep(Duration::from_millis(50));
    assert!(events.try_iter().all(|e| !matches!(e, SessionEvent::CaptureError(_))));

    // Nothing was played; every note counts as expected but unplayed
    let score = engine.complete().unwrap();
    assert_eq!(score.completion_score, 0.0);
}
