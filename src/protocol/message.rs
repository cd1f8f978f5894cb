//! Inbound message decoding.
//!
//! The transport delivers JSON objects tagged by `type`.  Each one is decoded
//! into a closed set of fixed-shape [`InboundMessage`] variants before it
//! reaches the engine; unknown kinds collapse to [`InboundMessage::Ignored`].
//!
//! ```text
//! {"type":"chunk", "audio": b64, "char_times": [..], "char_durations": [..],
//!  "chars": [..], "chunk_index": n}                  → InboundMessage::Chunk
//! {"type":"complete", "total_chars": n, "total_duration_ms": n, "text"?: s}
//!                                                     → InboundMessage::Complete
//! {"type":"error", "message": s}                      → InboundMessage::Error
//! {"type":"pong"} / {"type":"stopped"}                → InboundMessage::Control
//! anything else                                       → InboundMessage::Ignored
//! ```

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use serde::Deserialize;
use thiserror::Error;

use crate::alignment::{AlignmentError, AlignmentFrame};

// ---------------------------------------------------------------------------
// ProtocolError
// ---------------------------------------------------------------------------

/// Reasons an inbound message could not be decoded.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("invalid JSON message: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid base64 audio payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("invalid alignment data: {0}")]
    Alignment(#[from] AlignmentError),
}

// ---------------------------------------------------------------------------
// Decoded message types
// ---------------------------------------------------------------------------

/// One chunk of an utterance: raw PCM16LE audio plus its character timing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioChunk {
    pub chunk_index: u64,
    /// Mono 16-bit little-endian PCM at 22 050 Hz.  May be empty for
    /// control-only frames.
    pub pcm: Vec<u8>,
    pub alignment: AlignmentFrame,
}

/// Terminal summary sent after the last chunk of an utterance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSummary {
    pub total_chars: usize,
    pub total_duration_ms: i64,
    /// Full utterance text, when the producer includes it.
    pub text: Option<String>,
}

/// Heartbeat / acknowledgement messages that carry no engine data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    Pong,
    Stopped,
}

/// A validated inbound message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    Chunk(AudioChunk),
    Complete(CompletionSummary),
    /// Producer-side failure, surfaced to consumers as a recoverable error.
    Error(String),
    Control(ControlKind),
    /// Unknown kind; a no-op for the engine.
    Ignored,
}

// ---------------------------------------------------------------------------
// Wire representation
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireMessage {
    Chunk {
        #[serde(default)]
        audio: Option<String>,
        #[serde(default)]
        char_times: Option<Vec<i64>>,
        #[serde(default)]
        char_durations: Option<Vec<i64>>,
        #[serde(default)]
        chars: Option<Vec<String>>,
        chunk_index: u64,
    },
    Complete {
        total_chars: usize,
        total_duration_ms: i64,
        #[serde(default)]
        text: Option<String>,
    },
    Error {
        message: String,
    },
    Pong,
    Stopped,
    #[serde(other)]
    Unknown,
}

// ---------------------------------------------------------------------------
// Decoding
// ---------------------------------------------------------------------------

/// Decode one JSON message.
///
/// ```rust
/// use tts_sync::protocol::{decode, InboundMessage};
///
/// let msg = decode(r#"{"type":"chunk","audio":"","chars":[],"char_times":[],
///                      "char_durations":[],"chunk_index":0}"#).unwrap();
/// match msg {
///     InboundMessage::Chunk(chunk) => assert!(chunk.pcm.is_empty()),
///     other => panic!("unexpected {other:?}"),
/// }
/// ```
pub fn decode(text: &str) -> Result<InboundMessage, ProtocolError> {
    let wire: WireMessage = serde_json::from_str(text)?;

    let msg = match wire {
        WireMessage::Chunk {
            audio,
            char_times,
            char_durations,
            chars,
            chunk_index,
        } => {
            let pcm = match audio.as_deref() {
                None | Some("") => Vec::new(),
                Some(b64) => BASE64.decode(b64)?,
            };
            let alignment = AlignmentFrame::new(
                chars.unwrap_or_default(),
                char_times.unwrap_or_default(),
                char_durations.unwrap_or_default(),
            );
            alignment.validate()?;

            InboundMessage::Chunk(AudioChunk {
                chunk_index,
                pcm,
                alignment,
            })
        }
        WireMessage::Complete {
            total_chars,
            total_duration_ms,
            text,
        } => InboundMessage::Complete(CompletionSummary {
            total_chars,
            total_duration_ms,
            text,
        }),
        WireMessage::Error { message } => InboundMessage::Error(message),
        WireMessage::Pong => InboundMessage::Control(ControlKind::Pong),
        WireMessage::Stopped => InboundMessage::Control(ControlKind::Stopped),
        WireMessage::Unknown => InboundMessage::Ignored,
    };

    Ok(msg)
}

/// Decode one JSON message, logging and collapsing failures to
/// [`InboundMessage::Ignored`].
pub fn decode_lossy(text: &str) -> InboundMessage {
    match decode(text) {
        Ok(msg) => msg,
        Err(e) => {
            let preview: String = text.chars().take(100).collect();
            log::warn!("protocol: dropping malformed message ({e}): {preview}");
            InboundMessage::Ignored
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
