//! Coalescing of streamed text into `append_tts` chunks.
//!
//! LLM output arrives a few characters at a time.  Sending every token as its
//! own `append_tts` floods the speech service, so [`TextBuffer`] holds text
//! until it reaches a natural break:
//!
//! | Rule | Flush when |
//! |------|------------|
//! | Hard cap | length ≥ 2 × `threshold` |
//! | Sentence end | length ≥ `min_sentence_len` and the trimmed text ends in `. ! ? ؟ ؞` |
//! | Soft break | length ≥ `threshold` and the last 20 chars contain `,` / `،`, or the text ends in a space |
//!
//! Flushed chunks always end with a space; whitespace-only text is dropped.
//!
//! ```rust
//! use tts_sync::protocol::TextBuffer;
//!
//! let mut buf = TextBuffer::new(50, 10);
//! assert_eq!(buf.push("Hello there"), None);
//! assert_eq!(buf.push(", friend."), Some("Hello there, friend. ".to_string()));
//! assert_eq!(buf.push("Bye"), None);
//! assert_eq!(buf.finish(), Some("Bye ".to_string()));
//! ```

use crate::config::BufferingConfig;

const SENTENCE_ENDINGS: [char; 5] = ['.', '!', '?', '\u{061F}', '\u{061E}'];
const CLAUSE_BREAKS: [char; 2] = [',', '\u{060C}'];
const RECENT_WINDOW: usize = 20;

#[derive(Debug, Clone)]
pub struct TextBuffer {
    buffer: String,
    threshold: usize,
    min_sentence_len: usize,
}

impl TextBuffer {
    pub fn new(threshold: usize, min_sentence_len: usize) -> Self {
        Self {
            buffer: String::new(),
            threshold,
            min_sentence_len,
        }
    }

    pub fn from_config(config: &BufferingConfig) -> Self {
        Self::new(config.threshold, config.min_sentence_len)
    }

    /// Append `text`, returning a chunk to send if a flush rule fired.
    pub fn push(&mut self, text: &str) -> Option<String> {
        self.buffer.push_str(text);
        if self.should_flush() {
            self.flush()
        } else {
            None
        }
    }

    /// Flush whatever remains and reset for the next response.
    pub fn finish(&mut self) -> Option<String> {
        let out = self.flush();
        self.buffer.clear();
        out
    }

    /// Drop buffered text without sending it.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    fn should_flush(&self) -> bool {
        if self.buffer.is_empty() {
            return false;
        }
        let len = self.buffer.chars().count();

        if len >= self.threshold * 2 {
            return true;
        }

        if len >= self.min_sentence_len
            && self.buffer.trim_end().ends_with(SENTENCE_ENDINGS)
        {
            return true;
        }

        if len >= self.threshold {
            let recent: String = self
                .buffer
                .chars()
                .skip(len.saturating_sub(RECENT_WINDOW))
                .collect();
            if recent.contains(CLAUSE_BREAKS) || self.buffer.ends_with(' ') {
                return true;
            }
        }

        false
    }

    fn flush(&mut self) -> Option<String> {
        if self.buffer.trim().is_empty() {
            return None;
        }
        let mut out = std::mem::take(&mut self.buffer);
        if !out.ends_with(' ') {
            out.push(' ');
        }
        Some(out)
    }
}

impl Default for TextBuffer {
    fn default() -> Self {
        Self::from_config(&BufferingConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn stream(buf: &mut TextBuffer, tokens: &[&str]) -> Vec<String> {
        let mut sent: Vec<String> = tokens.iter().filter_map(|t| buf.push(t)).collect();
        sent.extend(buf.finish());
        sent
    }

    #[test]
    fn short_text_waits_for_finish() {
        let mut buf = TextBuffer::new(50, 10);
        assert_eq!(buf.push("hi"), None);
        assert_eq!(buf.finish(), Some("hi ".into()));
        assert!(buf.is_empty());
    }

    #[test]
    fn sentence_end_flushes_after_minimum_length() {
        let mut buf = TextBuffer::new(50, 10);
        assert_eq!(buf.push("Ok."), None);
        assert_eq!(buf.push(" Sounds good."), Some("Ok. Sounds good. ".into()));
    }

    #[test]
    fn arabic_question_mark_ends_sentence() {
        let mut buf = TextBuffer::new(50, 10);
        let sent = stream(
            &mut buf,
            &["مرحبا", " ", "بالعالم", "،", " ", "كيف", " ", "حالك", "؟"],
        );
        assert_eq!(sent, vec!["مرحبا بالعالم، كيف حالك؟ ".to_string()]);
    }

    #[test]
    fn comma_flushes_only_past_threshold() {
        let mut buf = TextBuffer::new(20, 10);
        assert_eq!(buf.push("one, two"), None);
        let out = buf.push(" three four five,");
        assert_eq!(out, Some("one, two three four five, ".into()));
    }

    #[test]
    fn hard_cap_flushes_without_break() {
        let mut buf = TextBuffer::new(5, 10);
        assert_eq!(buf.push("abcdefghi"), None);
        assert_eq!(buf.push("j"), Some("abcdefghij ".into()));
    }

    #[test]
    fn counting_stream_is_coalesced() {
        let mut buf = TextBuffer::new(50, 10);
        let mut tokens = Vec::new();
        for i in 1..=15 {
            tokens.push(i.to_string());
            tokens.push(if i == 15 { ".".into() } else { ",".into() });
            tokens.push(" ".into());
        }
        let refs: Vec<&str> = tokens.iter().map(String::as_str).collect();
        let sent = stream(&mut buf, &refs);

        assert!(sent.len() < tokens.len() / 4, "sent {} chunks", sent.len());
        assert!(sent.iter().all(|s| s.ends_with(' ')));
        assert_eq!(sent.concat().replace(' ', ""), tokens.concat().replace(' ', ""));
    }

    #[test]
    fn whitespace_is_never_sent() {
        let mut buf = TextBuffer::new(1, 1);
        assert_eq!(buf.push("   "), None);
        assert_eq!(buf.finish(), None);
    }
}
