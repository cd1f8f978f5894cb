//! Pure lookups over an alignment timeline.
//!
//! [`Timeline`] is a borrowed view over the three parallel alignment arrays.
//! Both a finalized [`AlignmentSnapshot`](super::AlignmentSnapshot) and the
//! live [`AlignmentAccumulator`](super::AlignmentAccumulator) hand one out, so
//! highlighting works while an utterance is still streaming.
//!
//! # Example
//!
//! ```rust
//! use tts_sync::alignment::AlignmentSnapshot;
//!
//! let snap = AlignmentSnapshot::new(
//!     "hello",
//!     "hello".chars().map(String::from).collect(),
//!     vec![0, 100, 200, 300, 400],
//!     vec![90; 5],
//! )
//! .unwrap();
//!
//! assert_eq!(snap.char_index_at(350), Some(3));
//! assert_eq!(snap.char_index_at(-5), None);
//! assert_eq!(snap.time_range_for_char(1), Some((100, 190)));
//! ```

use std::ops::Range;

/// Duration assumed for a character whose duration entry is missing.
pub const FALLBACK_CHAR_DURATION_MS: i64 = 100;

/// Borrowed view over `chars`, `start_ms` and `duration_ms`.
#[derive(Debug, Clone, Copy)]
pub struct Timeline<'a> {
    chars: &'a [String],
    start_ms: &'a [i64],
    duration_ms: &'a [i64],
}

impl<'a> Timeline<'a> {
    pub fn new(chars: &'a [String], start_ms: &'a [i64], duration_ms: &'a [i64]) -> Self {
        Self {
            chars,
            start_ms,
            duration_ms,
        }
    }

    pub fn chars(&self) -> &'a [String] {
        self.chars
    }

    pub fn start_ms(&self) -> &'a [i64] {
        self.start_ms
    }

    pub fn duration_ms(&self) -> &'a [i64] {
        self.duration_ms
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    /// Index of the character being spoken at `ms`.
    ///
    /// Scans `start_ms` from the end and returns the last index whose start
    /// is `<= ms`.  Returns `None` when `ms` precedes the first character or
    /// the timeline is empty.  There is no upper clamp: past the final
    /// character the last index is returned indefinitely.
    pub fn char_index_at(&self, ms: i64) -> Option<usize> {
        self.start_ms.iter().rposition(|&start| start <= ms)
    }

    /// Partition `chars` into maximal runs of non-space entries.
    ///
    /// Only U+0020 separates words; tabs, newlines and empty entries belong to
    /// the surrounding run.  Ranges are half-open.  A run ending at the end of the text is included
    /// without a trailing delimiter; consecutive spaces produce no empty runs.
    pub fn word_boundaries(&self) -> Vec<Range<usize>> {
        let mut words = Vec::new();
        let mut start: Option<usize> = None;

        for (i, ch) in self.chars.iter().enumerate() {
            if is_space(ch) {
                if let Some(s) = start.take() {
                    words.push(s..i);
                }
            } else if start.is_none() {
                start = Some(i);
            }
        }
        if let Some(s) = start {
            words.push(s..self.chars.len());
        }

        words
    }

    /// The word span containing `index`, if any.
    pub fn word_containing(&self, index: usize) -> Option<Range<usize>> {
        self.word_boundaries()
            .into_iter()
            .find(|word| word.contains(&index))
    }

    /// `(start, end)` in ms for the character at `index`, using
    /// [`FALLBACK_CHAR_DURATION_MS`] when its duration is missing.
    pub fn time_range_for_char(&self, index: usize) -> Option<(i64, i64)> {
        self.time_range_for_char_with(index, FALLBACK_CHAR_DURATION_MS)
    }

    /// Like [`time_range_for_char`](Self::time_range_for_char) with an
    /// explicit fallback duration.
    pub fn time_range_for_char_with(&self, index: usize, fallback_ms: i64) -> Option<(i64, i64)> {
        let start = *self.start_ms.get(index)?;
        let duration = self.duration_ms.get(index).copied().unwrap_or(fallback_ms);
        Some((start, start + duration))
    }

    /// `0` when empty, otherwise `start_ms[last] + duration_ms[last]`.
    pub fn total_duration_ms(&self) -> i64 {
        match self.start_ms.len() {
            0 => 0,
            n => self
                .time_range_for_char(n - 1)
                .map_or(0, |(_, end)| end),
        }
    }
}

fn is_space(ch: &str) -> bool {
    !ch.is_empty() && ch.chars().all(|c| c == ' ')
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
