//! # Audio Capture Module
//!
//! The capture side of the practice engine: a push-based [`AudioInput`]
//! contract, a CPAL (Cross-Platform Audio Library) microphone implementation,
//! a replay implementation for tests and demos, and small signal helpers.
//!
//! ## Features
//! - Interface-callback capture contract (one callback per `start` call)
//! - Automatic device and format selection with multi-channel downmix
//! - Capture runs on a dedicated thread that owns the stream
//! - The realtime callback only queues frames; the capture thread analyses
//!   them, dropping the oldest when it falls behind
//! - Stream failures are pushed to the callback as terminal capture errors

use crate::config::CaptureConfig;
use crate::error::{PracticeError, Result};
use anyhow::anyhow;
use cpal::SupportedStreamConfigRange;
use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError, bounded, select};
use log::{debug, error, info, warn};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Level reported by [`rms_to_db`] for a zero signal.
pub const SILENCE_DB: f32 = -100.0;
/// Default RMS below which [`is_silence`] treats a frame as silent.
pub const SILENCE_RMS: f32 = 0.01;
/// Frames queued between the stream callback and the capture thread.
const FRAME_QUEUE_DEPTH: usize = 4;

// --- Signal helpers ---

/// Mean of the squared samples (0 for an empty frame).
pub fn mean_square(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s) * f64::from(s)).sum();
    (sum / samples.len() as f64) as f32
}

/// Root-mean-square level of a frame.
pub fn calculate_rms(samples: &[f32]) -> f32 {
    mean_square(samples).sqrt()
}

/// True when the frame's RMS is below `threshold`.
pub fn is_silence(samples: &[f32], threshold: f32) -> bool {
    calculate_rms(samples) < threshold
}

/// Converts an RMS level to decibels full scale.
pub fn rms_to_db(rms: f32) -> f32 {
    if rms <= 0.0 {
        SILENCE_DB
    } else {
        20.0 * rms.log10()
    }
}

/// Normalizes signed 16-bit PCM to `[-1, 1)`.
pub fn pcm16_to_f32(samples: &[i16]) -> Vec<f32> {
    samples.iter().map(|&s| f32::from(s) / 32768.0).collect()
}

// --- Capture contract ---

/// Receiver of captured audio, invoked from the capture thread.
pub trait AudioCallback: Send + Sync {
    /// A frame of normalized mono samples.
    fn on_audio_data(&self, samples: &[f32], sample_rate: u32);

    /// The input failed and will deliver no further frames.
    fn on_capture_error(&self, message: String);
}

/// A source of audio frames that pushes into an [`AudioCallback`].
pub trait AudioInput: Send {
    /// Starts delivering frames to `callback`. Setup failures (no device,
    /// permission denied) are returned here rather than through the callback.
    fn start(&mut self, callback: Arc<dyn AudioCallback>) -> Result<()>;

    /// Stops delivery. Idempotent.
    fn stop(&mut self);

    /// Whether frames are currently being delivered.
    fn is_running(&self) -> bool;
}

/// Handle on a running capture thread.
struct CaptureWorker {
    shutdown_tx: Sender<()>,
    thread_handle: JoinHandle<()>,
}

impl CaptureWorker {
    fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        if self.thread_handle.join().is_err() {
            error!("[CAPTURE] Capture thread panicked during shutdown");
        }
    }
}

// --- Microphone input ---

/// Microphone input through the default CPAL host.
///
/// CPAL streams are not `Send` on every platform, so the stream is built,
/// played and dropped on a thread of its own.
pub struct CpalInput {
    config: CaptureConfig,
    worker: Option<CaptureWorker>,
    sample_rate: Option<u32>,
}

impl CpalInput {
    pub fn new(config: CaptureConfig) -> Self {
        Self {
            config,
            worker: None,
            sample_rate: None,
        }
    }

    /// Sample rate negotiated with the device by the last successful start.
    pub fn sample_rate(&self) -> Option<u32> {
        self.sample_rate
    }
}

impl AudioInput for CpalInput {
    fn start(&mut self, callback: Arc<dyn AudioCallback>) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }

        let (ready_tx, ready_rx) = bounded::<std::result::Result<u32, String>>(1);
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let config = self.config.clone();

        let thread_handle = thread::Builder::new()
            .name("audio-capture".into())
            .spawn(move || {
                let (frame_tx, frame_rx) = bounded::<Vec<f32>>(FRAME_QUEUE_DEPTH);
                let opened = open_input_stream(
                    &config,
                    frame_tx,
                    frame_rx.clone(),
                    Arc::clone(&callback),
                );
                let (stream, sample_rate) = match opened {
                    Ok(opened) => opened,
                    Err(e) => {
                        let _ = ready_tx.send(Err(format!("{e:#}")));
                        return;
                    }
                };
                let _ = ready_tx.send(Ok(sample_rate));

                // The stream lives as long as this frame.
                deliver_frames(&frame_rx, &shutdown_rx, &*callback, sample_rate);
                if let Err(e) = stream.pause() {
                    warn!("[CAPTURE] Failed to pause stream: {}", e);
                }
                info!("[CAPTURE] Capture thread finished");
            })?;

        match ready_rx.recv() {
            Ok(Ok(sample_rate)) => {
                info!("[CAPTURE] Capturing at {} Hz", sample_rate);
                self.sample_rate = Some(sample_rate);
                self.worker = Some(CaptureWorker {
                    shutdown_tx,
                    thread_handle,
                });
                Ok(())
            }
            Ok(Err(message)) => {
                let _ = thread_handle.join();
                error!("[CAPTURE] {}", message);
                Err(PracticeError::Capture(message))
            }
            Err(_) => {
                let _ = thread_handle.join();
                Err(PracticeError::Capture("capture thread exited during startup".into()))
            }
        }
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for CpalInput {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Queues `frame`, discarding the oldest queued frame when the queue is full.
///
/// Never blocks, so it is safe on the realtime audio thread.
fn push_newest(frame_tx: &Sender<Vec<f32>>, drain_rx: &Receiver<Vec<f32>>, frame: Vec<f32>) {
    let mut frame = frame;
    loop {
        match frame_tx.try_send(frame) {
            Ok(()) | Err(TrySendError::Disconnected(_)) => return,
            Err(TrySendError::Full(rejected)) => {
                let _ = drain_rx.try_recv();
                frame = rejected;
            }
        }
    }
}

/// Hands queued frames to `callback` until shutdown or until the stream
/// side disconnects. A panicking callback loses that frame only.
fn deliver_frames(
    frame_rx: &Receiver<Vec<f32>>,
    shutdown_rx: &Receiver<()>,
    callback: &dyn AudioCallback,
    sample_rate: u32,
) {
    loop {
        select! {
            recv(frame_rx) -> frame => match frame {
                Ok(frame) => {
                    let delivered = catch_unwind(AssertUnwindSafe(|| {
                        callback.on_audio_data(&frame, sample_rate)
                    }));
                    if delivered.is_err() {
                        warn!("[CAPTURE] Frame handler panicked; frame dropped");
                    }
                }
                Err(_) => break,
            },
            recv(shutdown_rx) -> _ => break,
        }
    }
}

/// Opens and starts the default input device. Full frames are queued on
/// `frame_tx`; `drain_rx` is the same queue, used to drop stale frames.
///
/// # Returns
/// * `Ok((stream, sample_rate))` - Playing stream and the negotiated rate
/// * `Err(e)` - No device, no usable f32 format, or the stream failed to start
fn open_input_stream(
    config: &CaptureConfig,
    frame_tx: Sender<Vec<f32>>,
    drain_rx: Receiver<Vec<f32>>,
    callback: Arc<dyn AudioCallback>,
) -> anyhow::Result<(cpal::Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| anyhow!("No input device available"))?;

    info!(
        "[CAPTURE] Using audio input device: {}",
        device.name().unwrap_or_else(|_| "<unnamed>".into())
    );

    let configs = device.supported_input_configs()?.collect::<Vec<_>>();
    let supported = find_supported_config(configs, config.sample_rate)
        .ok_or_else(|| anyhow!("No suitable f32 input format found"))?;

    let rate = config
        .sample_rate
        .clamp(supported.min_sample_rate().0, supported.max_sample_rate().0);
    let stream_config: cpal::StreamConfig =
        supported.with_sample_rate(cpal::SampleRate(rate)).into();
    let channels = usize::from(stream_config.channels.max(1));
    debug!("[CAPTURE] Stream format: {} Hz, {} channel(s)", rate, channels);

    let frame_len = config.buffer_size;
    let mut frame = Vec::with_capacity(frame_len * 2);

    let stream = device.build_input_stream(
        &stream_config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            if channels == 1 {
                frame.extend_from_slice(data);
            } else {
                frame.extend(
                    data.chunks(channels)
                        .map(|c| c.iter().sum::<f32>() / c.len() as f32),
                );
            }
            while frame.len() >= frame_len {
                push_newest(&frame_tx, &drain_rx, frame[..frame_len].to_vec());
                frame.drain(..frame_len);
            }
        },
        move |err| callback.on_capture_error(err.to_string()),
        None,
    )?;

    stream.play()?;
    Ok((stream, rate))
}

/// Picks the f32 input format with the fewest channels whose rate range is
/// closest to `target_rate`.
fn find_supported_config(
    configs: Vec<SupportedStreamConfigRange>,
    target_rate: u32,
) -> Option<SupportedStreamConfigRange> {
    configs
        .into_iter()
        .filter(|c| c.sample_format() == cpal::SampleFormat::F32)
        .min_by_key(|c| {
            let min = c.min_sample_rate().0;
            let max = c.max_sample_rate().0;
            let distance = if (min..=max).contains(&target_rate) {
                0
            } else {
                min.abs_diff(target_rate).min(max.abs_diff(target_rate))
            };
            (distance, c.channels())
        })
}

// --- Replayed input ---

/// Replays pre-recorded frames at a fixed cadence, as if captured live.
///
/// Frames are delivered once each; when they run out the input goes quiet
/// but stays "running" until stopped.
pub struct ReplayInput {
    frames: Arc<Vec<Vec<f32>>>,
    sample_rate: u32,
    frame_interval: Duration,
    worker: Option<CaptureWorker>,
}

impl ReplayInput {
    pub fn new(frames: Vec<Vec<f32>>, sample_rate: u32, frame_interval: Duration) -> Self {
        Self {
            frames: Arc::new(frames),
            sample_rate,
            frame_interval,
            worker: None,
        }
    }
}

impl AudioInput for ReplayInput {
    fn start(&mut self, callback: Arc<dyn AudioCallback>) -> Result<()> {
        if self.worker.is_some() {
            return Ok(());
        }
        let (shutdown_tx, shutdown_rx) = bounded::<()>(1);
        let frames = Arc::clone(&self.frames);
        let sample_rate = self.sample_rate;
        let interval = self.frame_interval;

        let thread_handle = thread::Builder::new()
            .name("audio-replay".into())
            .spawn(move || {
                replay_frames(&frames, sample_rate, interval, &*callback, &shutdown_rx)
            })?;

        self.worker = Some(CaptureWorker {
            shutdown_tx,
            thread_handle,
        });
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            worker.shutdown();
        }
    }

    fn is_running(&self) -> bool {
        self.worker.is_some()
    }
}

impl Drop for ReplayInput {
    fn drop(&mut self) {
        self.stop();
    }
}

fn replay_frames(
    frames: &[Vec<f32>],
    sample_rate: u32,
    interval: Duration,
    callback: &dyn AudioCallback,
    shutdown_rx: &Receiver<()>,
) {
    for frame in frames {
        callback.on_audio_data(frame, sample_rate);
        match shutdown_rx.recv_timeout(interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            _ => return,
        }
    }
    let _ = shutdown_rx.recv();
}
