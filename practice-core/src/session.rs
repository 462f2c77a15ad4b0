//! # Practice Session Module
//!
//! Coordinates a practice run: audio capture feeds the pitch pipeline, the
//! playback position drives the score follower, and a periodic tick compares
//! the two and records one result per note.
//!
//! ## Lifecycle
//! `Idle → Practicing ⇄ Paused → Completed`. `stop` abandons a run and
//! returns to `Idle`; `complete` scores it and is terminal.
//!
//! ## Threads
//! - The capture thread (owned by the [`AudioInput`]) is the only writer of
//!   the pipeline's latest-pitch slot.
//! - The tick thread owns the [`SessionTracker`], so follower state is never
//!   shared. It hands the tracker back when joined.
//! - Everything observable is sent as [`SessionEvent`]s on one channel.

use crate::audio::{AudioCallback, AudioInput};
use crate::compare::{ComparisonResult, PitchComparator};
use crate::config::EngineConfig;
use crate::error::{PracticeError, Result};
use crate::follower::{FollowerEvent, ScoreFollower};
use crate::pipeline::PitchPipeline;
use crate::playback::Playback;
use crate::score::{Note, Song};
use crate::scoring::{PracticeScore, calculate_score};
use crate::tuning::Verdict;
use chrono::{DateTime, Utc};
use crossbeam_channel::{Receiver, Sender, select, unbounded};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionState {
    Idle,
    Practicing,
    Paused,
    Completed,
}

/// Everything a front end can observe about a running session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum SessionEvent {
    /// Sent every tick while practicing.
    RealtimeFeedback {
        target: Option<Note>,
        detected_hz: Option<f32>,
        comparison: Option<ComparisonResult>,
    },
    /// A recorded result that was in time with better than POOR pitch.
    NoteHit(ComparisonResult),
    /// A note elapsed without ever being played.
    NoteMissed(ComparisonResult),
    NoteChanged {
        note: Option<Note>,
        measure_number: u32,
    },
    MeasureChanged {
        measure_index: usize,
        measure_number: u32,
    },
    Progress {
        position_ms: u64,
        total_ms: u64,
        fraction: f32,
    },
    StateChanged(SessionState),
    /// The transport reached the end of the song.
    PlaybackFinished,
    Completed(Box<PracticeScore>),
    /// A tick failed; the session carries on.
    Error(String),
    /// Audio input failed; no more pitch will arrive until capture restarts.
    CaptureError(String),
}

impl From<FollowerEvent> for SessionEvent {
    fn from(event: FollowerEvent) -> Self {
        match event {
            FollowerEvent::MeasureChanged {
                measure_index,
                measure_number,
            } => SessionEvent::MeasureChanged {
                measure_index,
                measure_number,
            },
            FollowerEvent::NoteChanged { note, measure_number } => {
                SessionEvent::NoteChanged { note, measure_number }
            }
            FollowerEvent::Progress {
                position_ms,
                total_ms,
                fraction,
            } => SessionEvent::Progress {
                position_ms,
                total_ms,
                fraction,
            },
        }
    }
}

// --- Session record ---

/// Verdict tally of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct VerdictCounts {
    pub perfect: usize,
    pub good: usize,
    pub fair: usize,
    pub poor: usize,
    pub miss: usize,
}

impl VerdictCounts {
    pub fn total(&self) -> usize {
        self.perfect + self.good + self.fair + self.poor + self.miss
    }

    pub fn perfect_rate(&self) -> f32 {
        match self.total() {
            0 => 0.0,
            total => self.perfect as f32 / total as f32,
        }
    }

    pub fn good_or_better_rate(&self) -> f32 {
        match self.total() {
            0 => 0.0,
            total => (self.perfect + self.good) as f32 / total as f32,
        }
    }
}

/// The persisted record of one practice run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeSession {
    pub id: String,
    pub song_id: String,
    pub start_time: DateTime<Utc>,
    /// Set when the session is sealed.
    pub end_time: Option<DateTime<Utc>>,
    pub results: Vec<ComparisonResult>,
    pub total_score: u8,
    pub accuracy_rate: f32,
}

impl PracticeSession {
    pub fn create(song_id: &str) -> Self {
        let start_time = Utc::now();
        Self {
            id: format!("{}-{}", song_id, start_time.timestamp_millis()),
            song_id: song_id.to_string(),
            start_time,
            end_time: None,
            results: Vec::new(),
            total_score: 0,
            accuracy_rate: 0.0,
        }
    }

    /// Attaches the final results and score and stamps the end time.
    pub fn seal(&mut self, results: Vec<ComparisonResult>, score: &PracticeScore) {
        self.results = results;
        self.total_score = score.total_score;
        self.accuracy_rate = score.statistics.accuracy_rate;
        self.end_time = Some(Utc::now());
    }

    pub fn is_completed(&self) -> bool {
        self.end_time.is_some()
    }

    /// Whole seconds between start and end, 0 while unsealed.
    pub fn duration_seconds(&self) -> i64 {
        self.end_time
            .map_or(0, |end| (end - self.start_time).num_seconds())
    }

    pub fn total_notes(&self) -> usize {
        self.results.len()
    }

    pub fn hit_notes(&self) -> usize {
        self.results.iter().filter(|r| r.is_hit()).count()
    }

    pub fn verdict_counts(&self) -> VerdictCounts {
        let mut counts = VerdictCounts::default();
        for result in &self.results {
            match result.verdict {
                Verdict::Perfect => counts.perfect += 1,
                Verdict::Good => counts.good += 1,
                Verdict::Fair => counts.fair += 1,
                Verdict::Poor => counts.poor += 1,
                Verdict::Miss => counts.miss += 1,
            }
        }
        counts
    }

    /// Mean absolute deviation in cents over the attempted notes.
    pub fn average_deviation(&self) -> f32 {
        let attempted: Vec<f32> = self
            .results
            .iter()
            .filter(|r| r.verdict != Verdict::Miss)
            .map(|r| r.deviation_cents.abs())
            .collect();
        if attempted.is_empty() {
            return 0.0;
        }
        attempted.iter().sum::<f32>() / attempted.len() as f32
    }
}

// --- Tick logic ---

/// Per-session follow-and-compare state, advanced once per tick.
pub struct SessionTracker {
    follower: ScoreFollower,
    comparator: PitchComparator,
    sync_offset_ms: i64,
    synthesize_misses: bool,
    results: Vec<ComparisonResult>,
    /// Start time of the note that last produced a result.
    last_recorded_start: Option<u64>,
    /// Current note not yet compared; becomes a MISS if it ends that way.
    pending: Option<Note>,
    /// Score position of the previous tick.
    previous_position: u64,
}

impl SessionTracker {
    pub fn new(song: Arc<Song>, config: &EngineConfig) -> Self {
        Self {
            follower: ScoreFollower::new(song),
            comparator: PitchComparator::new(config.timing_window),
            sync_offset_ms: config.sync_offset_ms,
            synthesize_misses: config.synthesize_misses,
            results: Vec::new(),
            last_recorded_start: None,
            pending: None,
            previous_position: 0,
        }
    }

    fn score_position(&self, playback_position_ms: u64) -> u64 {
        (playback_position_ms as i64)
            .saturating_sub(self.sync_offset_ms)
            .max(0) as u64
    }

    /// Advances to the playback position and judges the latest pitch.
    ///
    /// A result is recorded on the first tick that has both a target note
    /// and a pitch for a note not yet recorded; later ticks on the same note
    /// only produce live feedback.
    pub fn tick(&mut self, playback_position_ms: u64, pitch_hz: Option<f32>) -> Vec<SessionEvent> {
        let position = self.score_position(playback_position_ms);
        let mut events: Vec<SessionEvent> = self
            .follower
            .update_position(position)
            .into_iter()
            .map(SessionEvent::from)
            .collect();

        let current = self.follower.current_note().cloned();
        let current_start = current.as_ref().map(|n| n.start_time_ms);
        let pending_start = self.pending.as_ref().map(|n| n.start_time_ms);

        if pending_start != current_start {
            if let Some(missed) = self.pending.take() {
                if self.synthesize_misses {
                    events.push(self.record_miss(&missed));
                }
            }
        }
        if self.synthesize_misses {
            for skipped in self.skipped_notes(position, pending_start) {
                events.push(self.record_miss(&skipped));
            }
        }
        self.previous_position = position;
        if let Some(note) = &current {
            if self.pending.is_none() && self.last_recorded_start != Some(note.start_time_ms) {
                self.pending = Some(note.clone());
            }
        }

        let comparison = match (&current, pitch_hz) {
            (Some(note), Some(pitch)) => {
                let result = self.comparator.compare(note, pitch, position);
                if self.last_recorded_start != Some(note.start_time_ms) {
                    self.last_recorded_start = Some(note.start_time_ms);
                    self.pending = None;
                    self.results.push(result.clone());
                    if result.is_hit() {
                        events.push(SessionEvent::NoteHit(result.clone()));
                    }
                }
                Some(result)
            }
            _ => None,
        };

        events.push(SessionEvent::RealtimeFeedback {
            target: current,
            detected_hz: pitch_hz,
            comparison,
        });
        events
    }

    /// Notes that began and ended between the previous tick and `position`,
    /// so they were never current on any tick.
    fn skipped_notes(&self, position: u64, pending_start: Option<u64>) -> Vec<Note> {
        let from = self.previous_position;
        if position <= from {
            return Vec::new();
        }
        self.follower
            .notes_in_range(from, position)
            .into_iter()
            .filter(|n| n.start_time_ms >= from && n.end_time_ms() <= position)
            .filter(|n| {
                Some(n.start_time_ms) != pending_start
                    && Some(n.start_time_ms) != self.last_recorded_start
            })
            .cloned()
            .collect()
    }

    fn record_miss(&mut self, note: &Note) -> SessionEvent {
        let result = self.comparator.miss(note);
        debug!("[SESSION] Missed {} at {} ms", note.pitch_name, note.start_time_ms);
        self.results.push(result.clone());
        SessionEvent::NoteMissed(result)
    }

    /// Jumps to a playback position without judging the notes left behind
    /// or skipped over.
    pub fn seek(&mut self, playback_position_ms: u64) -> Vec<SessionEvent> {
        self.pending = None;
        let position = self.score_position(playback_position_ms);
        self.previous_position = position;
        self.follower.seek_to(position).into_iter().map(SessionEvent::from).collect()
    }

    pub fn results(&self) -> &[ComparisonResult] {
        &self.results
    }

    pub fn into_results(self) -> Vec<ComparisonResult> {
        self.results
    }

    pub fn follower(&self) -> &ScoreFollower {
        &self.follower
    }
}

// --- Tick thread ---

#[derive(Debug)]
enum Control {
    Pause,
    Resume,
    Seek(u64),
}

/// Handle on a running tick thread.
struct TickWorker {
    control_tx: Sender<Control>,
    shutdown_tx: Sender<()>,
    thread_handle: JoinHandle<SessionTracker>,
}

impl TickWorker {
    fn spawn(
        mut tracker: SessionTracker,
        interval: Duration,
        pipeline: Arc<PitchPipeline>,
        playback: Arc<dyn Playback>,
        events: Sender<SessionEvent>,
    ) -> Result<Self> {
        let (control_tx, control_rx) = unbounded::<Control>();
        let (shutdown_tx, shutdown_rx) = crossbeam_channel::bounded::<()>(1);

        let thread_handle = thread::Builder::new()
            .name("practice-tick".into())
            .spawn(move || {
                info!("[SESSION] Tick thread started ({} ms)", interval.as_millis());
                let ticker = crossbeam_channel::tick(interval);
                let mut paused = false;
                let mut capture_failed = false;
                let mut finish_reported = false;

                loop {
                    select! {
                        recv(control_rx) -> msg => match msg {
                            Ok(Control::Pause) => paused = true,
                            Ok(Control::Resume) => {
                                paused = false;
                                capture_failed = false;
                            }
                            Ok(Control::Seek(position)) => {
                                finish_reported = false;
                                // Playback and tracker move together, between ticks.
                                playback.seek_to(position);
                                let landed = playback.current_position_ms();
                                for event in tracker.seek(landed) {
                                    let _ = events.send(event);
                                }
                            }
                            Err(_) => break,
                        },
                        recv(shutdown_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if paused || capture_failed {
                                continue;
                            }
                            if let Some(message) = pipeline.take_capture_error() {
                                error!("[SESSION] Capture failed: {}", message);
                                capture_failed = true;
                                let _ = events.send(SessionEvent::CaptureError(message));
                                continue;
                            }

                            let position = playback.current_position_ms();
                            let pitch = pipeline.latest_pitch();
                            match catch_unwind(AssertUnwindSafe(|| tracker.tick(position, pitch))) {
                                Ok(tick_events) => {
                                    for event in tick_events {
                                        let _ = events.send(event);
                                    }
                                }
                                Err(panic) => {
                                    let message = panic_message(panic.as_ref());
                                    warn!("[SESSION] Tick at {} ms failed: {}", position, message);
                                    let _ = events.send(SessionEvent::Error(message));
                                }
                            }

                            if !finish_reported && playback.is_completed() {
                                finish_reported = true;
                                info!("[SESSION] Playback finished");
                                let _ = events.send(SessionEvent::PlaybackFinished);
                            }
                        },
                    }
                }

                info!("[SESSION] Tick thread stopped");
                tracker
            })?;

        Ok(Self {
            control_tx,
            shutdown_tx,
            thread_handle,
        })
    }

    fn send(&self, control: Control) {
        let _ = self.control_tx.send(control);
    }

    /// Stops the thread and takes back its tracker.
    fn join(self) -> Option<SessionTracker> {
        let _ = self.shutdown_tx.send(());
        match self.thread_handle.join() {
            Ok(tracker) => Some(tracker),
            Err(_) => {
                error!("[SESSION] Tick thread panicked; its results are lost");
                None
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

// --- Engine ---

/// Runs practice sessions for one song.
pub struct PracticeEngine {
    song: Arc<Song>,
    config: EngineConfig,
    input: Box<dyn AudioInput>,
    playback: Arc<dyn Playback>,
    pipeline: Arc<PitchPipeline>,
    events: Sender<SessionEvent>,
    state: SessionState,
    worker: Option<TickWorker>,
    session: Option<PracticeSession>,
    score: Option<PracticeScore>,
    last_results: Vec<ComparisonResult>,
}

impl PracticeEngine {
    /// Creates an idle engine and the receiving end of its events.
    pub fn new(
        song: Arc<Song>,
        config: EngineConfig,
        input: Box<dyn AudioInput>,
        playback: Arc<dyn Playback>,
    ) -> (Self, Receiver<SessionEvent>) {
        let (events, receiver) = unbounded();
        let pipeline = Arc::new(PitchPipeline::new(&config));
        let engine = Self {
            song,
            config,
            input,
            playback,
            pipeline,
            events,
            state: SessionState::Idle,
            worker: None,
            session: None,
            score: None,
            last_results: Vec::new(),
        };
        (engine, receiver)
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn song(&self) -> &Arc<Song> {
        &self.song
    }

    /// The pitch pipeline fed by the audio input.
    pub fn pipeline(&self) -> &Arc<PitchPipeline> {
        &self.pipeline
    }

    pub fn playback(&self) -> &Arc<dyn Playback> {
        &self.playback
    }

    /// The sealed record, once completed.
    pub fn session(&self) -> Option<&PracticeSession> {
        self.session.as_ref().filter(|s| s.is_completed())
    }

    pub fn score(&self) -> Option<&PracticeScore> {
        self.score.as_ref()
    }

    /// Results of the last stopped or completed run.
    pub fn last_results(&self) -> &[ComparisonResult] {
        &self.last_results
    }

    fn set_state(&mut self, state: SessionState) {
        info!("[SESSION] {:?} -> {:?}", self.state, state);
        self.state = state;
        let _ = self.events.send(SessionEvent::StateChanged(state));
    }

    fn require(&self, action: &'static str, allowed: &[SessionState]) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(PracticeError::InvalidTransition {
                action,
                state: self.state,
            })
        }
    }

    fn start_capture(&mut self) -> Result<()> {
        let callback: Arc<dyn AudioCallback> = self.pipeline.clone();
        self.input.start(callback)
    }

    /// Begins a fresh run from the top of the song.
    ///
    /// Fails without changing state if the audio input cannot be started.
    pub fn start(&mut self) -> Result<()> {
        self.require("start", &[SessionState::Idle])?;

        self.pipeline.reset();
        self.last_results.clear();
        self.score = None;
        self.start_capture()?;

        let mut tracker = SessionTracker::new(Arc::clone(&self.song), &self.config);
        for event in tracker.follower.reset() {
            let _ = self.events.send(event.into());
        }

        let worker = TickWorker::spawn(
            tracker,
            Duration::from_millis(self.config.tick_interval_ms),
            Arc::clone(&self.pipeline),
            Arc::clone(&self.playback),
            self.events.clone(),
        );
        let worker = match worker {
            Ok(worker) => worker,
            Err(e) => {
                self.input.stop();
                return Err(e);
            }
        };
        self.worker = Some(worker);

        self.playback.stop();
        self.playback.play();
        self.session = Some(PracticeSession::create(&self.song.id));
        self.set_state(SessionState::Practicing);
        Ok(())
    }

    /// Suspends capture, playback and ticking; results are kept.
    pub fn pause(&mut self) -> Result<()> {
        self.require("pause", &[SessionState::Practicing])?;
        if let Some(worker) = &self.worker {
            worker.send(Control::Pause);
        }
        self.playback.pause();
        self.input.stop();
        self.set_state(SessionState::Paused);
        Ok(())
    }

    /// Restarts capture and playback after a pause. Also the way to retry
    /// after a capture error.
    pub fn resume(&mut self) -> Result<()> {
        self.require("resume", &[SessionState::Paused])?;
        self.pipeline.reset();
        self.start_capture()?;
        self.playback.play();
        if let Some(worker) = &self.worker {
            worker.send(Control::Resume);
        }
        self.set_state(SessionState::Practicing);
        Ok(())
    }

    /// Moves playback and the score to `position_ms`. The tick thread
    /// applies both, so no tick sees one without the other.
    pub fn seek_to(&mut self, position_ms: u64) -> Result<()> {
        self.require("seek", &[SessionState::Practicing, SessionState::Paused])?;
        match &self.worker {
            Some(worker) => worker.send(Control::Seek(position_ms)),
            None => self.playback.seek_to(position_ms),
        }
        Ok(())
    }

    pub fn set_speed(&self, speed: f32) {
        self.playback.set_speed(speed);
    }

    pub fn set_loop_range(&self, start_ms: u64, end_ms: u64) {
        self.playback.set_loop_range(start_ms, end_ms);
    }

    pub fn clear_loop(&self) {
        self.playback.clear_loop();
    }

    /// Halts the tick thread, capture and playback, returning the results.
    fn halt(&mut self) -> Vec<ComparisonResult> {
        let results = self
            .worker
            .take()
            .and_then(TickWorker::join)
            .map(SessionTracker::into_results)
            .unwrap_or_default();
        self.input.stop();
        self.playback.stop();
        results
    }

    /// Abandons the run without scoring it.
    pub fn stop(&mut self) -> Result<()> {
        self.require("stop", &[SessionState::Practicing, SessionState::Paused])?;
        self.last_results = self.halt();
        self.session = None;
        self.set_state(SessionState::Idle);
        Ok(())
    }

    /// Ends the run, scores it once and seals the session record.
    pub fn complete(&mut self) -> Result<PracticeScore> {
        self.require("complete", &[SessionState::Practicing, SessionState::Paused])?;
        let results = self.halt();
        let score = calculate_score(&results, self.song.total_note_count());
        info!(
            "[SESSION] Completed {}: {} notes, total {} ({:?})",
            self.song.title,
            results.len(),
            score.total_score,
            score.grade
        );

        let song_id = &self.song.id;
        let session = self.session.get_or_insert_with(|| PracticeSession::create(song_id));
        session.seal(results.clone(), &score);
        self.last_results = results;
        self.score = Some(score.clone());

        self.set_state(SessionState::Completed);
        let _ = self.events.send(SessionEvent::Completed(Box::new(score.clone())));
        Ok(score)
    }
}

impl Drop for PracticeEngine {
    fn drop(&mut self) {
        if self.worker.is_some() {
            self.halt();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::playback::ManualPlayback;
    use crate::score::Measure;

    fn two_note_song() -> Arc<Song> {
        Arc::new(Song::new(
            "two",
            "Two Notes",
            vec![Measure::new(1, vec![Note::from_midi(60, 0, 500), Note::from_midi(62, 500, 500)])],
        ))
    }

    fn c4() -> f32 {
        Note::from_midi(60, 0, 0).frequency_hz
    }

    fn d4() -> f32 {
        Note::from_midi(62, 0, 0).frequency_hz
    }

    #[test]
    fn records_once_per_note_including_the_first() {
        let mut tracker = SessionTracker::new(two_note_song(), &EngineConfig::default());
        let events = tracker.tick(0, Some(c4()));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::NoteHit(_))));
        tracker.tick(33, Some(c4()));
        tracker.tick(66, Some(c4() * 1.05));
        tracker.tick(520, Some(d4()));

        let results = tracker.results();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].verdict, Verdict::Perfect);
        assert_eq!(results[0].timing_error_ms, 0);
        assert_eq!(results[1].target_note.pitch_name, "D4");
        assert_eq!(results[1].timing_error_ms, 20);
    }

    #[test]
    fn realtime_feedback_every_tick() {
        let mut tracker = SessionTracker::new(two_note_song(), &EngineConfig::default());
        for t in [0, 33, 66] {
            let events = tracker.tick(t, None);
            assert!(matches!(
                events.last(),
                Some(SessionEvent::RealtimeFeedback { comparison: None, detected_hz: None, .. })
            ));
        }
    }

    #[test]
    fn unplayed_note_becomes_a_miss() {
        let mut tracker = SessionTracker::new(two_note_song(), &EngineConfig::default());
        tracker.tick(100, None);
        tracker.tick(300, None);
        let events = tracker.tick(600, Some(d4()));
        assert!(events.iter().any(|e| matches!(e, SessionEvent::NoteMissed(_))));

        let verdicts: Vec<Verdict> = tracker.results().iter().map(|r| r.verdict).collect();
        assert_eq!(verdicts, vec![Verdict::Miss, Verdict::Perfect]);
        assert!(!tracker.results()[0].in_time_window);
        assert_eq!(tracker.results()[0].deviation_cents, 0.0);
    }

    #[test]
    fn last_note_is_missed_when_song_ends() {
        let mut tracker = SessionTracker::new(two_note_song(), &EngineConfig::default());
        tracker.tick(100, Some(c4()));
        tracker.tick(600, None);
        tracker.tick(1200, None);
        let verdicts: Vec<Verdict> = tracker.results().iter().map(|r| r.verdict).collect();
        assert_eq!(verdicts, vec![Verdict::Perfect, Verdict::Miss]);
    }

    #[test]
    fn misses_can_be_disabled() {
        let config = EngineConfig {
            synthesize_misses: false,
            ..EngineConfig::default()
        };
        let mut tracker = SessionTracker::new(two_note_song(), &config);
        tracker.tick(100, None);
        tracker.tick(600, Some(d4()));
        assert_eq!(tracker.results().len(), 1);
    }

    #[test]
    fn sync_offset_shifts_the_score() {
        let config = EngineConfig {
            sync_offset_ms: 100,
            ..EngineConfig::default()
        };
        let mut tracker = SessionTracker::new(two_note_song(), &config);
        tracker.tick(50, Some(c4()));
        tracker.tick(600, Some(d4()));
        let results = tracker.results();
        assert_eq!(results[0].timing_error_ms, 0);
        assert_eq!(results[1].target_note.pitch_name, "D4");
        assert_eq!(results[1].timing_error_ms, 0);
    }

    #[test]
    fn seeking_does_not_miss_the_note_left_behind() {
        let mut tracker = SessionTracker::new(two_note_song(), &EngineConfig::default());
        tracker.tick(100, None);
        tracker.seek(700);
        tracker.tick(700, None);
        assert!(tracker.results().is_empty());
    }

    #[test]
    fn note_shorter_than_a_tick_is_still_missed() {
        let song = Arc::new(Song::new(
            "grace",
            "Grace Note",
            vec![Measure::new(
                1,
                vec![
                    Note::from_midi(60, 0, 500),
                    Note::from_midi(64, 500, 20),
                    Note::from_midi(62, 520, 480),
                ],
            )],
        ));
        let mut tracker = SessionTracker::new(song, &EngineConfig::default());
        tracker.tick(0, Some(c4()));
        tracker.tick(480, Some(c4()));
        let events = tracker.tick(530, Some(d4()));
        assert!(events.iter().any(
            |e| matches!(e, SessionEvent::NoteMissed(r) if r.target_note.pitch_name == "E4")
        ));

        let names: Vec<&str> = tracker
            .results()
            .iter()
            .map(|r| r.target_note.pitch_name.as_str())
            .collect();
        assert_eq!(names, vec!["C4", "E4", "D4"]);
        assert_eq!(tracker.results()[1].verdict, Verdict::Miss);
    }

    #[test]
    fn seeking_past_short_notes_does_not_miss_them() {
        let song = Arc::new(Song::new(
            "grace",
            "Grace Note",
            vec![Measure::new(
                1,
                vec![
                    Note::from_midi(60, 0, 500),
                    Note::from_midi(64, 500, 20),
                    Note::from_midi(62, 520, 480),
                ],
            )],
        ));
        let mut tracker = SessionTracker::new(song, &EngineConfig::default());
        tracker.tick(100, Some(c4()));
        tracker.seek(600);
        tracker.tick(610, Some(d4()));
        let verdicts: Vec<Verdict> = tracker.results().iter().map(|r| r.verdict).collect();
        assert_eq!(verdicts, vec![Verdict::Perfect, Verdict::Perfect]);
    }

    #[test]
    fn misses_are_left_out_of_average_deviation() {
        let mut tracker = SessionTracker::new(two_note_song(), &EngineConfig::default());
        tracker.tick(0, Some(c4() * 2f32.powf(10.0 / 1200.0)));
        tracker.tick(600, None);
        tracker.tick(1200, None);
        let results = tracker.into_results();
        assert_eq!(results[1].verdict, Verdict::Miss);

        let mut session = PracticeSession::create("two");
        session.seal(results.clone(), &calculate_score(&results, 2));
        assert!((session.average_deviation() - 10.0).abs() < 0.01);
    }

    #[test]
    fn session_record_helpers() {
        let mut tracker = SessionTracker::new(two_note_song(), &EngineConfig::default());
        tracker.tick(0, Some(c4()));
        tracker.tick(600, None);
        tracker.tick(1200, None);
        let results = tracker.into_results();
        let score = calculate_score(&results, 2);

        let mut session = PracticeSession::create("two");
        assert!(!session.is_completed());
        assert_eq!(session.duration_seconds(), 0);
        session.seal(results, &score);

        assert!(session.is_completed());
        assert!(session.id.starts_with("two-"));
        assert_eq!(session.total_notes(), 2);
        assert_eq!(session.hit_notes(), 1);
        let counts = session.verdict_counts();
        assert_eq!((counts.perfect, counts.miss, counts.total()), (1, 1, 2));
        assert_eq!(counts.perfect_rate(), 0.5);
        assert_eq!(session.total_score, score.total_score);
    }

    struct IdleInput;

    impl AudioInput for IdleInput {
        fn start(&mut self, _callback: Arc<dyn AudioCallback>) -> Result<()> {
            Ok(())
        }
        fn stop(&mut self) {}
        fn is_running(&self) -> bool {
            true
        }
    }

    #[test]
    fn seek_moves_playback_and_score_together() {
        let playback = Arc::new(ManualPlayback::new(1000));
        let config = EngineConfig {
            tick_interval_ms: 1,
            ..EngineConfig::default()
        };
        let (mut engine, events) =
            PracticeEngine::new(two_note_song(), config, Box::new(IdleInput), playback.clone());
        engine.start().unwrap();

        // C4 is pending once a tick has seen it
        let timeout = Duration::from_secs(3);
        loop {
            match events.recv_timeout(timeout).unwrap() {
                SessionEvent::RealtimeFeedback { target: Some(note), .. } => {
                    assert_eq!(note.pitch_name, "C4");
                    break;
                }
                _ => continue,
            }
        }

        engine.seek_to(700).unwrap();
        loop {
            match events.recv_timeout(timeout).unwrap() {
                SessionEvent::NoteMissed(result) => panic!("missed {result:?} while seeking"),
                SessionEvent::NoteChanged { note: Some(note), .. } if note.start_time_ms == 500 => {
                    break;
                }
                _ => continue,
            }
        }
        assert_eq!(playback.current_position_ms(), 700);

        engine.complete().unwrap();
        assert!(engine.last_results().iter().all(|r| r.verdict != Verdict::Miss));
    }

    struct UnavailableInput;

    impl AudioInput for UnavailableInput {
        fn start(&mut self, _callback: Arc<dyn AudioCallback>) -> Result<()> {
            Err(PracticeError::Capture("permission denied".into()))
        }
        fn stop(&mut self) {}
        fn is_running(&self) -> bool {
            false
        }
    }

    #[test]
    fn capture_failure_keeps_engine_idle() {
        let playback = Arc::new(ManualPlayback::new(1000));
        let (mut engine, _events) = PracticeEngine::new(
            two_note_song(),
            EngineConfig::default(),
            Box::new(UnavailableInput),
            playback,
        );
        let err = engine.start().unwrap_err();
        assert!(matches!(err, PracticeError::Capture(_)));
        assert_eq!(engine.state(), SessionState::Idle);
    }

    #[test]
    fn invalid_transitions_are_rejected() {
        let playback = Arc::new(ManualPlayback::new(1000));
        let (mut engine, _events) = PracticeEngine::new(
            two_note_song(),
            EngineConfig::default(),
            Box::new(UnavailableInput),
            playback,
        );
        assert!(matches!(
            engine.pause(),
            Err(PracticeError::InvalidTransition { action: "pause", state: SessionState::Idle })
        ));
        assert!(engine.resume().is_err());
        assert!(engine.complete().is_err());
        assert!(engine.stop().is_err());
    }
}
