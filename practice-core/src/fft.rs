//! # Fast Fourier Transform (FFT) Module
//!
//! FFT-backed autocorrelation for the frequency estimator.
//!
//! A direct autocorrelation over every candidate lag costs `O(N·L)`; for a
//! 4096-sample frame and lags up to ~680 that is millions of multiply-adds
//! per frame. Going through the power spectrum (Wiener–Khinchin) brings it
//! down to two transforms of the zero-padded frame.
//!
//! ## Features
//! - Linear (not circular) autocorrelation via zero padding
//! - Direct reference implementation for short lag ranges and testing
//! - DC offset removal for pre-conditioning captured frames

use rustfft::{FftPlanner, num_complex::Complex};

/// Removes the DC offset from a signal by making its average value zero.
///
/// # Arguments
/// * `signal` - Audio signal to process (modified in-place)
pub fn remove_dc_offset(signal: &mut [f32]) {
    if signal.is_empty() {
        return;
    }
    let mean = signal.iter().sum::<f32>() / signal.len() as f32;
    if mean.abs() > 1e-6 {
        signal.iter_mut().for_each(|sample| *sample -= mean);
    }
}

/// Computes the raw linear autocorrelation `r[lag] = Σ x[i]·x[i+lag]` for
/// `lag` in `0..=max_lag` using a forward and inverse FFT.
///
/// `max_lag` is clamped to `signal.len() - 1`. The result is not
/// normalized; divide by `r[0]` for the normalized form.
///
/// # Arguments
/// * `signal` - Input frame
/// * `max_lag` - Largest lag to return
///
/// # Returns
/// * `Vec<f32>` - `max_lag + 1` autocorrelation values (empty for an empty signal)
pub fn autocorrelation(signal: &[f32], max_lag: usize) -> Vec<f32> {
    let len = signal.len();
    if len == 0 {
        return Vec::new();
    }
    let max_lag = max_lag.min(len - 1);

    // Padding to at least 2N keeps the circular correlation from wrapping.
    let fft_len = (2 * len).next_power_of_two();
    let mut planner = FftPlanner::<f32>::new();
    let forward = planner.plan_fft_forward(fft_len);
    let inverse = planner.plan_fft_inverse(fft_len);

    let mut buffer: Vec<Complex<f32>> = signal
        .iter()
        .map(|&sample| Complex::new(sample, 0.0))
        .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
        .take(fft_len)
        .collect();

    forward.process(&mut buffer);
    for bin in buffer.iter_mut() {
        *bin = Complex::new(bin.norm_sqr(), 0.0);
    }
    inverse.process(&mut buffer);

    // rustfft leaves the inverse transform unscaled.
    let scale = 1.0 / fft_len as f32;
    buffer
        .iter()
        .take(max_lag + 1)
        .map(|bin| bin.re * scale)
        .collect()
}

/// Direct `O(N·L)` autocorrelation with the same contract as
/// [`autocorrelation`]. Reference for the FFT path in tests.
#[cfg(test)]
pub(crate) fn autocorrelation_direct(signal: &[f32], max_lag: usize) -> Vec<f32> {
    let len = signal.len();
    if len == 0 {
        return Vec::new();
    }
    let max_lag = max_lag.min(len - 1);
    (0..=max_lag)
        .map(|lag| {
            signal[..len - lag]
                .iter()
                .zip(&signal[lag..])
                .map(|(a, b)| a * b)
                .sum()
        })
        .collect()
}
