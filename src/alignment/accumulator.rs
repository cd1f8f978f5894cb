//! Per-utterance alignment accumulation.
//!
//! [`AlignmentAccumulator`] concatenates the [`AlignmentFrame`]s delivered with
//! each chunk, in arrival order, and promotes them to an immutable
//! [`AlignmentSnapshot`] when the utterance completes.
//!
//! # Example
//!
//! ```rust
//! use tts_sync::alignment::{AlignmentAccumulator, AlignmentFrame, TimeBase};
//!
//! let mut acc = AlignmentAccumulator::new(TimeBase::Absolute);
//! acc.append_frame(AlignmentFrame::new(
//!     vec!["h".into(), "i".into()],
//!     vec![0, 80],
//!     vec![80, 90],
//! ))
//! .unwrap();
//!
//! let snapshot = acc.finalize("hi");
//! assert_eq!(snapshot.len(), 2);
//! assert_eq!(snapshot.total_duration_ms(), 170);
//! assert!(acc.is_empty());
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::index::Timeline;

// ---------------------------------------------------------------------------
// AlignmentError
// ---------------------------------------------------------------------------

/// Structural problems with an inbound alignment frame.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AlignmentError {
    /// The three parallel arrays do not have the same length.
    #[error(
        "alignment arrays differ in length: {chars} chars, {starts} start times, {durations} durations"
    )]
    LengthMismatch {
        chars: usize,
        starts: usize,
        durations: usize,
    },
}

// ---------------------------------------------------------------------------
// TimeBase
// ---------------------------------------------------------------------------

/// How a frame's `start_ms` values relate to the utterance timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeBase {
    /// Start times are already measured from the utterance start.
    Absolute,
    /// Start times restart at zero for every chunk; the accumulator offsets
    /// them by the audio duration of the chunks that came before.
    ChunkRelative,
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::Absolute
    }
}

// ---------------------------------------------------------------------------
// AlignmentFrame
// ---------------------------------------------------------------------------

/// Character timing delivered with one chunk.
///
/// `chars[i]` is spoken from `start_ms[i]` for `duration_ms[i]` milliseconds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentFrame {
    pub chars: Vec<String>,
    pub start_ms: Vec<i64>,
    pub duration_ms: Vec<i64>,
}

impl AlignmentFrame {
    pub fn new(chars: Vec<String>, start_ms: Vec<i64>, duration_ms: Vec<i64>) -> Self {
        Self {
            chars,
            start_ms,
            duration_ms,
        }
    }

    /// Check that all three arrays have the same length.
    pub fn validate(&self) -> Result<(), AlignmentError> {
        let (chars, starts, durations) =
            (self.chars.len(), self.start_ms.len(), self.duration_ms.len());
        if chars == starts && starts == durations {
            Ok(())
        } else {
            Err(AlignmentError::LengthMismatch {
                chars,
                starts,
                durations,
            })
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }
}

// ---------------------------------------------------------------------------
// AlignmentSnapshot
// ---------------------------------------------------------------------------

/// Immutable, finalized alignment of one utterance.
///
/// The three arrays always have equal length and `start_ms` is non-decreasing
/// as long as the producer delivered frames in order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlignmentSnapshot {
    text: String,
    chars: Vec<String>,
    start_ms: Vec<i64>,
    duration_ms: Vec<i64>,
}

impl AlignmentSnapshot {
    /// Build a snapshot from parts, validating the array lengths.
    pub fn new(
        text: impl Into<String>,
        chars: Vec<String>,
        start_ms: Vec<i64>,
        duration_ms: Vec<i64>,
    ) -> Result<Self, AlignmentError> {
        let frame = AlignmentFrame::new(chars, start_ms, duration_ms);
        frame.validate()?;
        Ok(Self {
            text: text.into(),
            chars: frame.chars,
            start_ms: frame.start_ms,
            duration_ms: frame.duration_ms,
        })
    }

    /// Full source text of the utterance.
    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn chars(&self) -> &[String] {
        &self.chars
    }

    pub fn start_ms(&self) -> &[i64] {
        &self.start_ms
    }

    pub fn duration_ms(&self) -> &[i64] {
        &self.duration_ms
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Borrowed view used by the lookup functions in [`super::index`].
    pub fn timeline(&self) -> Timeline<'_> {
        Timeline::new(&self.chars, &self.start_ms, &self.duration_ms)
    }

    /// `0` when empty, otherwise the end of the last character.
    pub fn total_duration_ms(&self) -> i64 {
        self.timeline().total_duration_ms()
    }

    /// See [`Timeline::char_index_at`].
    pub fn char_index_at(&self, ms: i64) -> Option<usize> {
        self.timeline().char_index_at(ms)
    }

    /// See [`Timeline::word_boundaries`].
    pub fn word_boundaries(&self) -> Vec<std::ops::Range<usize>> {
        self.timeline().word_boundaries()
    }

    /// See [`Timeline::time_range_for_char`].
    pub fn time_range_for_char(&self, index: usize) -> Option<(i64, i64)> {
        self.timeline().time_range_for_char(index)
    }
}

// ---------------------------------------------------------------------------
// AlignmentAccumulator
// ---------------------------------------------------------------------------

/// Running alignment for the utterance currently being streamed.
///
/// Frames are appended exactly as they arrive; nothing is re-sorted or
/// de-duplicated.  Owned by the utterance controller and cleared on every
/// utterance start and interrupt.
#[derive(Debug, Clone, Default)]
pub struct AlignmentAccumulator {
    time_base: TimeBase,
    /// Audio already received for this utterance, used for
    /// [`TimeBase::ChunkRelative`] frames.
    offset_ms: i64,
    chars: Vec<String>,
    start_ms: Vec<i64>,
    duration_ms: Vec<i64>,
}

impl AlignmentAccumulator {
    pub fn new(time_base: TimeBase) -> Self {
        Self {
            time_base,
            ..Default::default()
        }
    }

    /// Append one frame.
    ///
    /// Only structural validation is performed: a frame whose arrays differ
    /// in length is rejected and leaves the accumulation untouched.
    pub fn append_frame(&mut self, frame: AlignmentFrame) -> Result<(), AlignmentError> {
        frame.validate()?;

        let offset = match self.time_base {
            TimeBase::Absolute => 0,
            TimeBase::ChunkRelative => self.offset_ms,
        };

        self.chars.extend(frame.chars);
        self.start_ms
            .extend(frame.start_ms.into_iter().map(|t| t + offset));
        self.duration_ms.extend(frame.duration_ms);
        Ok(())
    }

    /// Record `duration_ms` of audio received with the frame just appended.
    ///
    /// Only affects accumulators using [`TimeBase::ChunkRelative`].
    pub fn advance_audio(&mut self, duration_ms: i64) {
        if self.time_base == TimeBase::ChunkRelative {
            self.offset_ms += duration_ms;
        }
    }

    /// Copy the accumulation into an immutable snapshot bound to `full_text`
    /// and clear the accumulator for reuse.
    ///
    /// Safe with zero frames accumulated: the result is an empty snapshot.
    pub fn finalize(&mut self, full_text: impl Into<String>) -> AlignmentSnapshot {
        let snapshot = AlignmentSnapshot {
            text: full_text.into(),
            chars: std::mem::take(&mut self.chars),
            start_ms: std::mem::take(&mut self.start_ms),
            duration_ms: std::mem::take(&mut self.duration_ms),
        };
        self.offset_ms = 0;
        snapshot
    }

    /// Discard the accumulation without producing a snapshot.
    pub fn reset(&mut self) {
        self.chars.clear();
        self.start_ms.clear();
        self.duration_ms.clear();
        self.offset_ms = 0;
    }

    pub fn time_base(&self) -> TimeBase {
        self.time_base
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Live view over the frames accumulated so far.
    pub fn timeline(&self) -> Timeline<'_> {
        Timeline::new(&self.chars, &self.start_ms, &self.duration_ms)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
