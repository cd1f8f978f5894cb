//! Wire contract with the speech service.
//!
//! * [`message`]: inbound JSON (`chunk`, `complete`, `error`, `pong`,
//!   `stopped`) decoded into [`InboundMessage`].
//! * [`control`]: outbound [`ControlAction`]s and the [`ControlSink`] trait the
//!   transport implements.
//! * [`text_buffer`]: coalesces streamed text into `append_tts` chunks.
//!
//! The transport itself (WebSocket connection, reconnects) lives outside this
//! crate; it feeds decoded messages in and drains control actions out.

pub mod control;
pub mod message;
pub mod text_buffer;

pub use control::{ChannelSink, ControlAction, ControlSink, TransportError};
pub use message::{
    decode, decode_lossy, AudioChunk, CompletionSummary, ControlKind, InboundMessage,
    ProtocolError,
};
pub use text_buffer::TextBuffer;
