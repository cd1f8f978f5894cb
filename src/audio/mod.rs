//! Audio output: PCM decoding → scheduling → device playback, plus the
//! elapsed-time tracker that drives highlighting.
//!
//! # Pipeline
//!
//! ```text
//! chunk PCM16LE ─► PlaybackScheduler ─► OutputEngine (cpal) ─► speakers
//!                       │   lookahead window, gapless start times
//!                       └─► BufferDone / Drained events
//!
//! PositionTracker ─► elapsed ms every tick ─► highlight resolution
//! ```

pub mod device;
pub mod output;
pub mod pcm;
pub mod resample;
pub mod scheduler;
pub mod tracker;

pub use device::CpalOutputEngine;
pub use output::{Completion, OutputEngine, OutputError};
pub use pcm::{duration_ms, duration_secs, pcm16le_to_f32, SOURCE_SAMPLE_RATE};
pub use resample::resample;
pub use scheduler::{PlaybackScheduler, ScheduledBuffer, SchedulerEvent};
pub use tracker::PositionTracker;

#[cfg(test)]
pub use output::MockOutputEngine;
