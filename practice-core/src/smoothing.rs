//! Moving-average smoothing of detected frequencies.

use crate::config::SMOOTHING_WINDOW;
use std::collections::VecDeque;

/// Mean of the last `window` positive frequencies.
///
/// Zero and invalid observations are ignored rather than averaged in, so a
/// single undetected frame does not drag the reading toward 0 Hz. Call
/// [`reset`](Self::reset) on silence to keep separate notes from blending.
#[derive(Debug, Clone)]
pub struct FrequencySmoother {
    window: usize,
    frequencies: VecDeque<f32>,
}

impl Default for FrequencySmoother {
    fn default() -> Self {
        Self::new(SMOOTHING_WINDOW)
    }
}

impl FrequencySmoother {
    /// Creates a smoother averaging up to `window` values (at least one).
    pub fn new(window: usize) -> Self {
        let window = window.max(1);
        Self {
            window,
            frequencies: VecDeque::with_capacity(window),
        }
    }

    /// Records `frequency` if it is a valid positive value and returns the
    /// current average, or 0 when nothing has been recorded.
    pub fn add_frequency(&mut self, frequency: f32) -> f32 {
        if frequency.is_finite() && frequency > 0.0 {
            if self.frequencies.len() == self.window {
                self.frequencies.pop_front();
            }
            self.frequencies.push_back(frequency);
        }
        self.current()
    }

    /// Average of the buffered frequencies, or 0 if empty.
    pub fn current(&self) -> f32 {
        if self.frequencies.is_empty() {
            return 0.0;
        }
        self.frequencies.iter().sum::<f32>() / self.frequencies.len() as f32
    }

    pub fn reset(&mut self) {
        self.frequencies.clear();
    }

    pub fn len(&self) -> usize {
        self.frequencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frequencies.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn averages_recent_values() {
        let mut smoother = FrequencySmoother::default();
        smoother.add_frequency(440.0);
        smoother.add_frequency(442.0);
        assert_abs_diff_eq!(smoother.add_frequency(438.0), 440.0, epsilon = 1e-4);
    }

    #[test]
    fn reset_forgets_history() {
        let mut smoother = FrequencySmoother::default();
        for f in [440.0, 442.0, 438.0] {
            smoother.add_frequency(f);
        }
        smoother.reset();
        assert_eq!(smoother.add_frequency(450.0), 450.0);
    }

    #[test]
    fn ignores_non_positive_values() {
        let mut smoother = FrequencySmoother::new(3);
        assert_eq!(smoother.add_frequency(0.0), 0.0);
        smoother.add_frequency(300.0);
        assert_eq!(smoother.add_frequency(-5.0), 300.0);
        assert_eq!(smoother.add_frequency(f32::NAN), 300.0);
        assert_eq!(smoother.len(), 1);
    }

    #[test]
    fn evicts_oldest_beyond_window() {
        let mut smoother = FrequencySmoother::new(2);
        smoother.add_frequency(100.0);
        smoother.add_frequency(200.0);
        assert_eq!(smoother.add_frequency(400.0), 300.0);
    }
}
