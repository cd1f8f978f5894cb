//! tts-sync: streamed speech playback with synchronized text highlighting.
//!
//! The crate ingests chunked TTS output (PCM audio plus per-character timing),
//! schedules the audio gaplessly onto an output device, and maps the moving
//! playback position back onto a character (or word) index for highlighting.
//!
//! ```text
//! protocol::decode ──▶ UtteranceController ──▶ AlignmentAccumulator
//!                              │                     │ finalize
//!                              │                     ▼
//!                              ├──▶ PlaybackScheduler ──▶ OutputEngine (cpal)
//!                              │
//!                              └──▶ PositionTracker ──▶ AlignmentIndex ──▶ EngineEvent
//! ```

pub mod alignment;
pub mod audio;
pub mod config;
pub mod pipeline;
pub mod protocol;
