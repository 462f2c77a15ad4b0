//! # Scoring Module
//!
//! Turns a finished session's [`ComparisonResult`]s into a [`PracticeScore`].
//!
//! Everything here is a pure fold over the result list: the same results
//! always produce the same score, whenever it is computed.
//!
//! ## Features
//! - Weighted pitch / timing / completion sub-scores and a letter grade
//! - Per-session statistics, including a rushing/dragging trend
//! - Rule-table strengths, weaknesses and suggestions
//! - Cross-session progress tracking

use crate::compare::{ComparisonResult, PitchDirection};
use crate::tuning::Verdict;
use linreg::linear_regression;
use log::debug;
use serde::{Deserialize, Serialize};
use std::fmt;

// Sub-score weights
const PITCH_WEIGHT: f64 = 0.6;
const TIMING_WEIGHT: f64 = 0.3;
const COMPLETION_WEIGHT: f64 = 0.1;

/// Slope of timing error per note (ms) beyond which a tempo drift is reported.
const TREND_THRESHOLD_MS_PER_NOTE: f32 = 10.0;
/// Fewest attempted notes needed before fitting a timing trend.
const TREND_MIN_NOTES: usize = 3;
/// Number of sessions on each side of the progress trend comparison.
const TREND_SESSIONS: usize = 5;
const RECENT_SCORES: usize = 10;

/// Letter grade for a total score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Grade {
    S,
    A,
    B,
    C,
    D,
}

impl Grade {
    pub fn from_score(total_score: u8) -> Self {
        match total_score {
            90..=u8::MAX => Grade::S,
            80..=89 => Grade::A,
            70..=79 => Grade::B,
            60..=69 => Grade::C,
            _ => Grade::D,
        }
    }

    pub fn text(self) -> &'static str {
        match self {
            Grade::S => "S - Outstanding",
            Grade::A => "A - Excellent",
            Grade::B => "B - Good",
            Grade::C => "C - Pass",
            Grade::D => "D - Needs work",
        }
    }

    pub fn encouragement(self) -> &'static str {
        match self {
            Grade::S => "Fantastic! You've really mastered this one!",
            Grade::A => "Well done! Keep it up!",
            Grade::B => "Not bad! There's still room to grow.",
            Grade::C => "Keep going, you can do better!",
            Grade::D => "Don't give up, practice makes progress!",
        }
    }
}

impl fmt::Display for Grade {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.text())
    }
}

/// Snapshot of a session's results.
///
/// Deviation figures only consider attempted notes; a MISS has no pitch.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Statistics {
    pub total_notes: usize,
    pub perfect_count: usize,
    pub good_count: usize,
    pub fair_count: usize,
    pub poor_count: usize,
    pub miss_count: usize,
    /// PERFECT + GOOD over all notes.
    pub accuracy_rate: f32,
    pub perfect_rate: f32,
    /// Mean absolute deviation in cents.
    pub average_deviation: f32,
    pub max_deviation: f32,
    pub sharp_rate: f32,
    pub flat_rate: f32,
    pub mean_abs_timing_error_ms: f32,
    /// Least-squares slope of timing error over note order, in ms per note.
    /// Negative means the player is speeding up.
    pub timing_trend_ms_per_note: Option<f32>,
}

impl Statistics {
    pub fn from_results(results: &[ComparisonResult]) -> Self {
        let total = results.len();
        if total == 0 {
            return Self::default();
        }
        let count = |verdict: Verdict| results.iter().filter(|r| r.verdict == verdict).count();
        let rate = |n: usize, of: usize| if of == 0 { 0.0 } else { n as f32 / of as f32 };

        let perfect_count = count(Verdict::Perfect);
        let good_count = count(Verdict::Good);
        let attempted: Vec<&ComparisonResult> =
            results.iter().filter(|r| r.verdict != Verdict::Miss).collect();
        let deviations: Vec<f32> = attempted.iter().map(|r| r.deviation_cents.abs()).collect();
        let direction_count = |direction: PitchDirection| {
            attempted.iter().filter(|r| r.direction() == direction).count()
        };

        Self {
            total_notes: total,
            perfect_count,
            good_count,
            fair_count: count(Verdict::Fair),
            poor_count: count(Verdict::Poor),
            miss_count: count(Verdict::Miss),
            accuracy_rate: rate(perfect_count + good_count, total),
            perfect_rate: rate(perfect_count, total),
            average_deviation: mean(&deviations),
            max_deviation: deviations.iter().copied().fold(0.0, f32::max),
            sharp_rate: rate(direction_count(PitchDirection::Sharp), attempted.len()),
            flat_rate: rate(direction_count(PitchDirection::Flat), attempted.len()),
            mean_abs_timing_error_ms: mean_abs_timing_error(results) as f32,
            timing_trend_ms_per_note: timing_trend(&attempted),
        }
    }
}

fn mean(values: &[f32]) -> f32 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f32>() / values.len() as f32
}

/// Mean absolute timing error of the attempted notes. A MISS has no attack
/// time, so it is left out.
fn mean_abs_timing_error(results: &[ComparisonResult]) -> f64 {
    let errors: Vec<f64> = results
        .iter()
        .filter(|r| r.verdict != Verdict::Miss)
        .map(|r| r.timing_error_ms.unsigned_abs() as f64)
        .collect();
    if errors.is_empty() {
        return 0.0;
    }
    errors.iter().sum::<f64>() / errors.len() as f64
}

/// Fits timing error against note order.
fn timing_trend(attempted: &[&ComparisonResult]) -> Option<f32> {
    if attempted.len() < TREND_MIN_NOTES {
        return None;
    }
    let (xs, ys): (Vec<f64>, Vec<f64>) = attempted
        .iter()
        .enumerate()
        .map(|(i, r)| (i as f64, r.timing_error_ms as f64))
        .unzip();
    linear_regression::<_, _, f64>(&xs, &ys)
        .ok()
        .map(|(slope, _intercept)| slope as f32)
}

/// A weakness detected in a session, each with its own coaching.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Weakness {
    LowAccuracy,
    LargeDeviation,
    SharpBias,
    FlatBias,
    ManyPoorNotes,
    Rushing,
    Dragging,
}

impl Weakness {
    pub fn description(self) -> &'static str {
        match self {
            Weakness::LowAccuracy => "Intonation accuracy is low",
            Weakness::LargeDeviation => "Pitch deviation is large",
            Weakness::SharpBias => "Pitch tends to be sharp",
            Weakness::FlatBias => "Pitch tends to be flat",
            Weakness::ManyPoorNotes => "Too many poor notes",
            Weakness::Rushing => "Tempo is rushing",
            Weakness::Dragging => "Tempo is dragging",
        }
    }

    fn suggestions(self) -> &'static [&'static str] {
        match self {
            Weakness::LowAccuracy => &[
                "Practice at a slower speed and focus on intonation",
                "Warm up with scales to get familiar with the pitches",
            ],
            Weakness::SharpBias => &["Bring the pitch down; fingers may be placed too far forward"],
            Weakness::FlatBias => &["Bring the pitch up; fingers may be placed too far back"],
            Weakness::LargeDeviation => &[
                "Calibrate against a tuner before practicing",
                "Loop a single measure to build stability",
            ],
            Weakness::Rushing => &["Count along or use a metronome to hold the tempo back"],
            Weakness::Dragging => &["Anticipate each entry slightly to keep up with the beat"],
            Weakness::ManyPoorNotes => &[],
        }
    }
}

/// Strength rules: `(applies, text)`, checked in order.
const STRENGTH_RULES: &[(fn(&Statistics, u8) -> bool, &str)] = &[
    (|_, total| total >= 90, "Excellent overall performance"),
    (|s, _| s.accuracy_rate >= 0.9, "Outstanding intonation control"),
    (|s, _| s.average_deviation < 15.0, "Stable pitch"),
    (|s, _| s.perfect_rate >= 0.5, "High share of perfect notes"),
];

fn analyze_strengths(stats: &Statistics, total_score: u8) -> Vec<String> {
    let mut strengths: Vec<String> = STRENGTH_RULES
        .iter()
        .filter(|(applies, _)| stats.total_notes > 0 && applies(stats, total_score))
        .map(|(_, text)| text.to_string())
        .collect();
    if strengths.is_empty() {
        strengths.push("Keep practicing".into());
    }
    strengths
}

fn detect_weaknesses(stats: &Statistics) -> Vec<Weakness> {
    let mut weaknesses = Vec::new();
    if stats.total_notes == 0 {
        return weaknesses;
    }
    if stats.accuracy_rate < 0.7 {
        weaknesses.push(Weakness::LowAccuracy);
    }
    if stats.average_deviation > 25.0 {
        weaknesses.push(Weakness::LargeDeviation);
    }
    if stats.sharp_rate > 0.5 {
        weaknesses.push(Weakness::SharpBias);
    } else if stats.flat_rate > 0.5 {
        weaknesses.push(Weakness::FlatBias);
    }
    if stats.poor_count as f32 >= stats.total_notes as f32 * 0.3 {
        weaknesses.push(Weakness::ManyPoorNotes);
    }
    match stats.timing_trend_ms_per_note {
        Some(slope) if slope < -TREND_THRESHOLD_MS_PER_NOTE => weaknesses.push(Weakness::Rushing),
        Some(slope) if slope > TREND_THRESHOLD_MS_PER_NOTE => weaknesses.push(Weakness::Dragging),
        _ => {}
    }
    weaknesses
}

fn generate_suggestions(stats: &Statistics, weaknesses: &[Weakness]) -> Vec<String> {
    let mut suggestions: Vec<String> = weaknesses
        .iter()
        .flat_map(|w| w.suggestions())
        .map(|s| s.to_string())
        .collect();
    if stats.average_deviation > 30.0 {
        suggestions.push("Slow the playback down to 0.5x-0.75x".into());
    }
    if suggestions.is_empty() {
        suggestions.push("Keep it up and try a faster speed".into());
        suggestions.push("Challenge yourself with a harder piece".into());
    }
    suggestions
}

/// Final, immutable evaluation of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PracticeScore {
    pub total_score: u8,
    pub pitch_accuracy_score: f32,
    pub timing_accuracy_score: f32,
    pub completion_score: f32,
    pub grade: Grade,
    pub statistics: Statistics,
    pub strengths: Vec<String>,
    pub weaknesses: Vec<String>,
    pub suggestions: Vec<String>,
}

/// Mean verdict points; 0 for no results.
pub fn pitch_accuracy_score(results: &[ComparisonResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    let points: f64 = results.iter().map(|r| f64::from(r.verdict.points())).sum();
    (points / results.len() as f64) as f32
}

/// Share of results in the time window, less a penalty for the mean
/// absolute timing error. 0 for no results.
pub fn timing_accuracy_score(results: &[ComparisonResult]) -> f32 {
    if results.is_empty() {
        return 0.0;
    }
    let in_window = results.iter().filter(|r| r.in_time_window).count();
    let base = in_window as f64 / results.len() as f64 * 100.0;
    let penalty = match mean_abs_timing_error(results) {
        e if e < 50.0 => 0.0,
        e if e < 100.0 => 5.0,
        e if e < 150.0 => 10.0,
        _ => 15.0,
    };
    (base - penalty).max(0.0) as f32
}

/// Share of expected notes actually played (MISS results do not count).
/// A song with nothing to play is complete.
pub fn completion_score(results: &[ComparisonResult], expected_notes: usize) -> f32 {
    if expected_notes == 0 {
        return 100.0;
    }
    let played = results.iter().filter(|r| r.verdict != Verdict::Miss).count();
    (played as f64 / expected_notes as f64).min(1.0) as f32 * 100.0
}

/// Weighted total, rounded and clamped to `0..=100`.
pub fn total_score(pitch: f32, timing: f32, completion: f32) -> u8 {
    let weighted = PITCH_WEIGHT * f64::from(pitch)
        + TIMING_WEIGHT * f64::from(timing)
        + COMPLETION_WEIGHT * f64::from(completion);
    weighted.round().clamp(0.0, 100.0) as u8
}

/// Scores a finished session.
///
/// # Arguments
/// * `results` - Every result recorded during the session, in order
/// * `expected_notes` - Number of notes in the song
pub fn calculate_score(results: &[ComparisonResult], expected_notes: usize) -> PracticeScore {
    let statistics = Statistics::from_results(results);
    let pitch = pitch_accuracy_score(results);
    let timing = timing_accuracy_score(results);
    let completion = completion_score(results, expected_notes);
    let total = total_score(pitch, timing, completion);
    let grade = Grade::from_score(total);

    let weaknesses = detect_weaknesses(&statistics);
    let suggestions = generate_suggestions(&statistics, &weaknesses);
    debug!(
        "[SCORE] {} results / {} expected: pitch {:.1}, timing {:.1}, completion {:.1} \
         => {} ({:?})",
        results.len(),
        expected_notes,
        pitch,
        timing,
        completion,
        total,
        grade
    );

    PracticeScore {
        total_score: total,
        pitch_accuracy_score: pitch,
        timing_accuracy_score: timing,
        completion_score: completion,
        grade,
        strengths: analyze_strengths(&statistics, total),
        weaknesses: weaknesses.iter().map(|w| w.description().to_string()).collect(),
        suggestions,
        statistics,
    }
}

// --- Progress across sessions ---

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressReport {
    pub total_practices: usize,
    pub average_score: f32,
    pub highest_score: u8,
    /// Mean of the last five totals minus the mean of the five before.
    pub progress_trend: f32,
    pub recent_scores: Vec<u8>,
}

/// In-memory history of session scores.
#[derive(Debug, Clone, Default)]
pub struct ProgressTracker {
    history: Vec<PracticeScore>,
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_score(&mut self, score: PracticeScore) {
        self.history.push(score);
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn average_score(&self) -> f32 {
        let totals: Vec<f32> = self.history.iter().map(|s| f32::from(s.total_score)).collect();
        mean(&totals)
    }

    pub fn highest_score(&self) -> u8 {
        self.history.iter().map(|s| s.total_score).max().unwrap_or(0)
    }

    /// 0 until there are sessions on both sides of the comparison.
    pub fn progress_trend(&self) -> f32 {
        let len = self.history.len();
        if len < 2 {
            return 0.0;
        }
        let split = len.saturating_sub(TREND_SESSIONS);
        let recent = &self.history[split..];
        let earlier = &self.history[split.saturating_sub(TREND_SESSIONS)..split];
        if earlier.is_empty() {
            return 0.0;
        }
        let average = |scores: &[PracticeScore]| {
            scores.iter().map(|s| f32::from(s.total_score)).sum::<f32>() / scores.len() as f32
        };
        average(recent) - average(earlier)
    }

    pub fn report(&self) -> ProgressReport {
        let skip = self.history.len().saturating_sub(RECENT_SCORES);
        ProgressReport {
            total_practices: self.history.len(),
            average_score: self.average_score(),
            highest_score: self.highest_score(),
            progress_trend: self.progress_trend(),
            recent_scores: self.history[skip..].iter().map(|s| s.total_score).collect(),
        }
    }
}
