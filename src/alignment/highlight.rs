//! Highlight resolution: playback position → highlighted text prefix.

use serde::{Deserialize, Serialize};

use super::index::Timeline;

/// Granularity of the highlighted prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HighlightMode {
    /// Highlight up to and including the character being spoken.
    Character,
    /// Highlight up to the end of the word being spoken.
    Word,
}

impl Default for HighlightMode {
    fn default() -> Self {
        Self::Word
    }
}

/// Which character should be emphasised, and how.
///
/// `index == None` means nothing is highlighted yet (playback has not reached
/// the first character).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightState {
    pub index: Option<usize>,
    pub mode: HighlightMode,
}

impl HighlightState {
    pub fn none(mode: HighlightMode) -> Self {
        Self { index: None, mode }
    }

    /// Resolve the highlight for playback position `ms`.
    pub fn at(timeline: &Timeline<'_>, ms: i64, mode: HighlightMode) -> Self {
        Self {
            index: timeline.char_index_at(ms),
            mode,
        }
    }

    /// Exclusive end of the highlighted prefix, in timeline characters.
    ///
    /// Character mode ends after `index`.  Word mode extends to the end of the
    /// word containing `index`, falling back to character behaviour when
    /// `index` is not inside a word.
    pub fn prefix_len(&self, timeline: &Timeline<'_>) -> usize {
        let Some(index) = self.index else {
            return 0;
        };
        match self.mode {
            HighlightMode::Character => index + 1,
            HighlightMode::Word => timeline
                .word_containing(index)
                .map_or(index + 1, |word| word.end),
        }
    }

    /// The highlighted prefix of `text`.
    ///
    /// The prefix length is clamped to the character count of `text`.
    ///
    /// ```rust
    /// use tts_sync::alignment::{AlignmentSnapshot, HighlightMode, HighlightState};
    ///
    /// let snap = AlignmentSnapshot::new(
    ///     "hi you",
    ///     "hi you".chars().map(String::from).collect(),
    ///     vec![0, 50, 100, 150, 200, 250],
    ///     vec![50; 6],
    /// )
    /// .unwrap();
    /// let timeline = snap.timeline();
    ///
    /// let word = HighlightState::at(&timeline, 160, HighlightMode::Word);
    /// assert_eq!(word.prefix(&timeline, snap.text()), "hi you");
    ///
    /// let chr = HighlightState::at(&timeline, 160, HighlightMode::Character);
    /// assert_eq!(chr.prefix(&timeline, snap.text()), "hi y");
    /// ```
    pub fn prefix<'t>(&self, timeline: &Timeline<'_>, text: &'t str) -> &'t str {
        char_prefix(text, self.prefix_len(timeline))
    }
}

/// First `n` characters of `text`, or all of it when shorter.
fn char_prefix(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((byte, _)) => &text[..byte],
        None => text,
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn arrays(text: &str, step: i64) -> (Vec<String>, Vec<i64>, Vec<i64>) {
        let chars: Vec<String> = text.chars().map(String::from).collect();
        let starts = (0..chars.len() as i64).map(|i| i * step).collect();
        let durations = vec![step; chars.len()];
        (chars, starts, durations)
    }

    #[test]
    fn nothing_highlighted_before_first_char() {
        let (c, s, d) = arrays("abc", 100);
        let t = Timeline::new(&c, &s, &d);
        let state = HighlightState::at(&t, -1, HighlightMode::Word);
        assert_eq!(state.index, None);
        assert_eq!(state.prefix(&t, "abc"), "");
    }

    #[test]
    fn character_mode_prefix() {
        let (c, s, d) = arrays("hello world", 100);
        let t = Timeline::new(&c, &s, &d);
        let state = HighlightState::at(&t, 250, HighlightMode::Character);
        assert_eq!(state.index, Some(2));
        assert_eq!(state.prefix(&t, "hello world"), "hel");
    }

    #[test]
    fn word_mode_extends_to_word_end() {
        let (c, s, d) = arrays("hello world", 100);
        let t = Timeline::new(&c, &s, &d);
        let state = HighlightState::at(&t, 650, HighlightMode::Word);
        assert_eq!(state.index, Some(6));
        assert_eq!(state.prefix(&t, "hello world"), "hello world");
    }

    #[test]
    fn word_mode_on_space_falls_back_to_character() {
        let (c, s, d) = arrays("hi you", 100);
        let t = Timeline::new(&c, &s, &d);
        let state = HighlightState::at(&t, 200, HighlightMode::Word);
        assert_eq!(state.index, Some(2));
        assert_eq!(state.prefix_len(&t), 3);
    }

    #[test]
    fn prefix_clamped_to_text_length() {
        let (c, s, d) = arrays("abcdef", 10);
        let t = Timeline::new(&c, &s, &d);
        let state = HighlightState::at(&t, 1_000, HighlightMode::Character);
        assert_eq!(state.prefix(&t, "abc"), "abc");
    }

    #[test]
    fn prefix_respects_multibyte_text() {
        let text = "مرحبا بالعالم";
        let (c, s, d) = arrays(text, 100);
        let t = Timeline::new(&c, &s, &d);
        let state = HighlightState::at(&t, 150, HighlightMode::Character);
        assert_eq!(state.prefix(&t, text), "مر");
    }
}
