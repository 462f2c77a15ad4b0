//! # Playback Module
//!
//! The transport a session follows. The session only needs a position; the
//! [`Playback`] trait adds the controls a practice front end exposes.
//!
//! ## Features
//! - `ClockPlayback`: a wall-clock transport with speed, seek and loop range
//! - `ManualPlayback`: a transport whose position is pushed from outside
//! - Completion and error notifications over a channel

use crate::lock;
use crossbeam_channel::{Receiver, Sender, unbounded};
use log::{debug, info};
use serde::Serialize;
use std::sync::Mutex;
use std::time::Instant;

pub const MIN_SPEED: f32 = 0.5;
pub const MAX_SPEED: f32 = 2.0;

/// Notification pushed by a transport.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PlaybackEvent {
    StateChanged { playing: bool },
    /// Reached the end of the material. Sent once per run to the end.
    Completed,
    Error(String),
}

/// Playback controls and position reporting.
pub trait Playback: Send + Sync {
    fn play(&self);
    fn pause(&self);
    /// Stops and rewinds to the start.
    fn stop(&self);
    fn seek_to(&self, position_ms: u64);
    /// Sets the rate, clamped to `MIN_SPEED..=MAX_SPEED`.
    fn set_speed(&self, speed: f32);
    fn set_loop_range(&self, start_ms: u64, end_ms: u64);
    fn clear_loop(&self);
    fn current_position_ms(&self) -> u64;
    fn duration_ms(&self) -> u64;
    fn is_playing(&self) -> bool;
    /// True once the end was reached, until the next seek or stop.
    fn is_completed(&self) -> bool;
}

// --- Wall-clock transport ---

#[derive(Debug)]
struct ClockState {
    /// Set while playing: the instant `position_ms` was last anchored.
    anchor: Option<Instant>,
    position_ms: f64,
    speed: f32,
    loop_range: Option<(u64, u64)>,
    completed: bool,
}

/// A transport driven by the system clock, for sessions without a
/// reference recording (or with one played by an external player in step).
pub struct ClockPlayback {
    duration_ms: u64,
    state: Mutex<ClockState>,
    events: Sender<PlaybackEvent>,
}

impl ClockPlayback {
    /// Creates a stopped transport for material of `duration_ms` and the
    /// receiving end of its notifications.
    pub fn new(duration_ms: u64) -> (Self, Receiver<PlaybackEvent>) {
        let (events, receiver) = unbounded();
        let playback = Self {
            duration_ms,
            state: Mutex::new(ClockState {
                anchor: None,
                position_ms: 0.0,
                speed: 1.0,
                loop_range: None,
                completed: false,
            }),
            events,
        };
        (playback, receiver)
    }

    pub fn speed(&self) -> f32 {
        lock(&self.state).speed
    }

    pub fn loop_range(&self) -> Option<(u64, u64)> {
        lock(&self.state).loop_range
    }

    /// Brings the stored position up to now, applying loop and end handling.
    fn advance(&self, state: &mut ClockState) {
        let Some(anchor) = state.anchor else {
            return;
        };
        let now = Instant::now();
        let elapsed_ms = now.duration_since(anchor).as_secs_f64() * 1000.0;
        state.position_ms += elapsed_ms * f64::from(state.speed);
        state.anchor = Some(now);

        if let Some((start, end)) = state.loop_range {
            let (start, end) = (start as f64, end as f64);
            if state.position_ms >= end {
                state.position_ms = start + (state.position_ms - start) % (end - start);
                debug!("[PLAYBACK] Looped back to {:.0} ms", state.position_ms);
            }
            return;
        }

        if state.position_ms >= self.duration_ms as f64 {
            state.position_ms = self.duration_ms as f64;
            state.anchor = None;
            if !state.completed {
                state.completed = true;
                info!("[PLAYBACK] Reached the end at {} ms", self.duration_ms);
                let _ = self.events.send(PlaybackEvent::StateChanged { playing: false });
                let _ = self.events.send(PlaybackEvent::Completed);
            }
        }
    }
}

impl Playback for ClockPlayback {
    fn play(&self) {
        let mut state = lock(&self.state);
        if state.anchor.is_some() {
            return;
        }
        if state.completed {
            state.position_ms = 0.0;
            state.completed = false;
        }
        state.anchor = Some(Instant::now());
        let _ = self.events.send(PlaybackEvent::StateChanged { playing: true });
    }

    fn pause(&self) {
        let mut state = lock(&self.state);
        self.advance(&mut state);
        if state.anchor.take().is_some() {
            let _ = self.events.send(PlaybackEvent::StateChanged { playing: false });
        }
    }

    fn stop(&self) {
        let mut state = lock(&self.state);
        let was_playing = state.anchor.take().is_some();
        state.position_ms = 0.0;
        state.completed = false;
        if was_playing {
            let _ = self.events.send(PlaybackEvent::StateChanged { playing: false });
        }
    }

    fn seek_to(&self, position_ms: u64) {
        let mut state = lock(&self.state);
        state.position_ms = position_ms.min(self.duration_ms) as f64;
        state.completed = false;
        if state.anchor.is_some() {
            state.anchor = Some(Instant::now());
        }
    }

    fn set_speed(&self, speed: f32) {
        let mut state = lock(&self.state);
        // Bank the time played at the old speed first.
        self.advance(&mut state);
        state.speed = if speed.is_finite() { speed.clamp(MIN_SPEED, MAX_SPEED) } else { 1.0 };
    }

    fn set_loop_range(&self, start_ms: u64, end_ms: u64) {
        let mut state = lock(&self.state);
        let end_ms = end_ms.min(self.duration_ms);
        if start_ms >= end_ms {
            let _ = self.events.send(PlaybackEvent::Error(format!(
                "empty loop range {start_ms}..{end_ms} ms"
            )));
            return;
        }
        self.advance(&mut state);
        state.loop_range = Some((start_ms, end_ms));
    }

    fn clear_loop(&self) {
        let mut state = lock(&self.state);
        self.advance(&mut state);
        state.loop_range = None;
    }

    fn current_position_ms(&self) -> u64 {
        let mut state = lock(&self.state);
        self.advance(&mut state);
        state.position_ms as u64
    }

    fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    fn is_playing(&self) -> bool {
        let mut state = lock(&self.state);
        self.advance(&mut state);
        state.anchor.is_some()
    }

    fn is_completed(&self) -> bool {
        let mut state = lock(&self.state);
        self.advance(&mut state);
        state.completed
    }
}

// --- Externally driven transport ---

#[derive(Debug, Default)]
struct ManualState {
    position_ms: u64,
    playing: bool,
    speed: f32,
    loop_range: Option<(u64, u64)>,
}

/// A transport whose position is reported by someone else, such as a UI
/// audio player, via [`set_position`](Self::set_position). Controls only
/// record what was requested.
pub struct ManualPlayback {
    duration_ms: u64,
    state: Mutex<ManualState>,
}

impl ManualPlayback {
    pub fn new(duration_ms: u64) -> Self {
        Self {
            duration_ms,
            state: Mutex::new(ManualState {
                speed: 1.0,
                ..ManualState::default()
            }),
        }
    }

    pub fn set_position(&self, position_ms: u64) {
        lock(&self.state).position_ms = position_ms;
    }

    pub fn speed(&self) -> f32 {
        lock(&self.state).speed
    }

    pub fn loop_range(&self) -> Option<(u64, u64)> {
        lock(&self.state).loop_range
    }
}

impl Playback for ManualPlayback {
    fn play(&self) {
        lock(&self.state).playing = true;
    }

    fn pause(&self) {
        lock(&self.state).playing = false;
    }

    fn stop(&self) {
        let mut state = lock(&self.state);
        state.playing = false;
        state.position_ms = 0;
    }

    fn seek_to(&self, position_ms: u64) {
        lock(&self.state).position_ms = position_ms;
    }

    fn set_speed(&self, speed: f32) {
        lock(&self.state).speed = speed.clamp(MIN_SPEED, MAX_SPEED);
    }

    fn set_loop_range(&self, start_ms: u64, end_ms: u64) {
        lock(&self.state).loop_range = Some((start_ms, end_ms));
    }

    fn clear_loop(&self) {
        lock(&self.state).loop_range = None;
    }

    fn current_position_ms(&self) -> u64 {
        lock(&self.state).position_ms
    }

    fn duration_ms(&self) -> u64 {
        self.duration_ms
    }

    fn is_playing(&self) -> bool {
        lock(&self.state).playing
    }

    fn is_completed(&self) -> bool {
        lock(&self.state).position_ms >= self.duration_ms
    }
}
