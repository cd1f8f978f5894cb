//! Speaker output via `cpal`.
//!
//! [`CpalOutputEngine`] opens an `f32` output stream and mixes scheduled
//! segments into it from the audio callback.  Its clock is the number of
//! frames the callback has rendered divided by the device rate, so `now()`
//! advances exactly with what the hardware has consumed.
//!
//! ```text
//! submit(samples @ 22.05 kHz, start_at)
//!        │ resample → device rate
//!        ▼
//!   Mixer { segments } ──► cpal callback ──► speakers
//!        │                       │
//!        └── done (oneshot) ◄────┘ last frame rendered
//! ```

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use tokio::sync::oneshot;

use super::output::{Completion, OutputEngine, OutputError};
use super::resample::resample;

// ---------------------------------------------------------------------------
// Mixer
// ---------------------------------------------------------------------------

struct Segment {
    start_frame: u64,
    samples: Vec<f32>,
    done: Option<oneshot::Sender<()>>,
}

impl Segment {
    fn end_frame(&self) -> u64 {
        self.start_frame + self.samples.len() as u64
    }
}

/// Segments waiting for or currently in playback, keyed by device frame.
#[derive(Default)]
struct Mixer {
    segments: Vec<Segment>,
}

impl Mixer {
    fn push(&mut self, start_frame: u64, samples: Vec<f32>, done: oneshot::Sender<()>) {
        self.segments.push(Segment {
            start_frame,
            samples,
            done: Some(done),
        });
    }

    /// Render interleaved output for `channels` channels starting at device
    /// frame `first_frame`, then retire segments whose last frame was played.
    fn render(&mut self, out: &mut [f32], channels: usize, first_frame: u64) {
        let channels = channels.max(1);
        for (i, frame) in out.chunks_mut(channels).enumerate() {
            let pos = first_frame + i as u64;
            let mut value = 0.0_f32;
            for segment in &self.segments {
                if pos < segment.start_frame {
                    continue;
                }
                if let Some(sample) = segment.samples.get((pos - segment.start_frame) as usize) {
                    value += sample;
                }
            }
            frame.fill(value.clamp(-1.0, 1.0));
        }

        let rendered_to = first_frame + (out.len() / channels) as u64;
        self.segments.retain_mut(|segment| {
            if segment.end_frame() > rendered_to {
                return true;
            }
            if let Some(done) = segment.done.take() {
                let _ = done.send(());
            }
            false
        });
    }

    /// Drop every segment and resolve its completion.  Returns how many were
    /// pending.
    fn abort(&mut self) -> usize {
        let pending = self.segments.len();
        for mut segment in self.segments.drain(..) {
            if let Some(done) = segment.done.take() {
                let _ = done.send(());
            }
        }
        pending
    }
}

// ---------------------------------------------------------------------------
// CpalOutputEngine
// ---------------------------------------------------------------------------

/// Output engine backed by a live cpal stream.
///
/// Dropping the engine stops the stream; outstanding completions then resolve
/// with a receive error.
pub struct CpalOutputEngine {
    _stream: cpal::Stream,
    mixer: Arc<Mutex<Mixer>>,
    frames_rendered: Arc<AtomicU64>,
    failed: Arc<AtomicBool>,
    device_rate: u32,
    channels: u16,
}

impl CpalOutputEngine {
    /// Open `device_name`, or the host default output device when `None`.
    ///
    /// # Errors
    ///
    /// [`OutputError::NoDevice`] / [`OutputError::DeviceNotFound`] when the
    /// device is missing; the cpal variants when the platform rejects the
    /// stream.
    pub fn open(device_name: Option<&str>) -> Result<Self, OutputError> {
        let host = cpal::default_host();
        let device = match device_name {
            Some(name) => host
                .output_devices()?
                .find(|d| d.name().map(|n| n == name).unwrap_or(false))
                .ok_or_else(|| OutputError::DeviceNotFound(name.to_string()))?,
            None => host
                .default_output_device()
                .ok_or(OutputError::NoDevice)?,
        };

        let supported = device.default_output_config()?;
        let channels = supported.channels();
        let device_rate = supported.sample_rate().0;
        let config: cpal::StreamConfig = supported.into();

        let mixer = Arc::new(Mutex::new(Mixer::default()));
        let frames_rendered = Arc::new(AtomicU64::new(0));
        let failed = Arc::new(AtomicBool::new(false));

        let cb_mixer = Arc::clone(&mixer);
        let err_mixer = Arc::clone(&mixer);
        let cb_frames = Arc::clone(&frames_rendered);
        let cb_failed = Arc::clone(&failed);
        let cb_channels = channels as usize;

        let stream = device.build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                let first_frame = cb_frames.load(Ordering::Acquire);
                cb_mixer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .render(data, cb_channels, first_frame);
                cb_frames.fetch_add((data.len() / cb_channels.max(1)) as u64, Ordering::Release);
            },
            move |err: cpal::StreamError| {
                log::error!("cpal output stream error: {err}");
                cb_failed.store(true, Ordering::Release);
                // The callback may never run again; release anything queued.
                let aborted = err_mixer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .abort();
                if aborted > 0 {
                    log::warn!("audio: released {aborted} pending buffer(s) after stream error");
                }
            },
            None,
        )?;

        stream.play()?;
        log::info!(
            "audio: output opened ({} Hz, {} channel(s))",
            device_rate,
            channels
        );

        Ok(Self {
            _stream: stream,
            mixer,
            frames_rendered,
            failed,
            device_rate,
            channels,
        })
    }

    /// Native sample rate of the output stream in Hz.
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }
}

impl OutputEngine for CpalOutputEngine {
    fn now(&self) -> f64 {
        self.frames_rendered.load(Ordering::Acquire) as f64 / self.device_rate as f64
    }

    fn is_ready(&self) -> bool {
        !self.failed.load(Ordering::Acquire)
    }

    fn submit(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
        start_at: f64,
    ) -> Result<Completion, OutputError> {
        if !self.is_ready() {
            return Err(OutputError::Unavailable);
        }
        let samples = resample(&samples, sample_rate, self.device_rate);
        let requested = (start_at.max(0.0) * self.device_rate as f64).round() as u64;
        let start_frame = requested.max(self.frames_rendered.load(Ordering::Acquire));

        let mut mixer = self.mixer.lock().unwrap_or_else(PoisonError::into_inner);
        // `failed` is set before the error callback takes this lock.
        if !self.is_ready() {
            return Err(OutputError::Unavailable);
        }
        let (tx, rx) = oneshot::channel();
        mixer.push(start_frame, samples, tx);
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
