//! Outbound control actions and the sink that carries them to the transport.
//!
//! Actions serialize as `{"action": "<name>", ...}`:
//!
//! ```rust
//! use tts_sync::protocol::ControlAction;
//!
//! let json = ControlAction::AppendTts { text: "hello ".into() }.to_json().unwrap();
//! assert_eq!(json, r#"{"action":"append_tts","text":"hello "}"#);
//! assert_eq!(ControlAction::Stop.to_json().unwrap(), r#"{"action":"stop"}"#);
//! ```

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// ControlAction
// ---------------------------------------------------------------------------

/// Requests sent to the speech service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlAction {
    /// Synthesize a complete text in one shot.
    StartTts { text: String },
    /// Append streamed text to the current utterance.
    AppendTts { text: String },
    /// No more text will be appended to the current utterance.
    FinishTts,
    /// Abandon the current utterance.
    Stop,
    Ping,
}

impl ControlAction {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

// ---------------------------------------------------------------------------
// TransportError / ControlSink
// ---------------------------------------------------------------------------

/// Failures delivering a control action.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport is not connected")]
    Disconnected,

    #[error("failed to encode control action: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Outbound half of the transport, as seen by the engine.
///
/// Implementations must be `Send + Sync` so they can be held behind an
/// `Arc<dyn ControlSink>`.
#[async_trait]
pub trait ControlSink: Send + Sync {
    /// Whether actions can currently be delivered.
    fn is_connected(&self) -> bool;

    /// Deliver one action.
    async fn send(&self, action: ControlAction) -> Result<(), TransportError>;
}

// Compile-time assertion: Box<dyn ControlSink> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn ControlSink>) {}
};

// ---------------------------------------------------------------------------
// ChannelSink
// ---------------------------------------------------------------------------

/// A [`ControlSink`] that forwards actions over a `tokio::sync::mpsc` channel
/// to whatever task owns the real connection.
pub struct ChannelSink {
    tx: mpsc::Sender<ControlAction>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<ControlAction>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl ControlSink for ChannelSink {
    fn is_connected(&self) -> bool {
        !self.tx.is_closed()
    }

    async fn send(&self, action: ControlAction) -> Result<(), TransportError> {
        log::debug!("transport: sending {action:?}");
        self.tx
            .send(action)
            .await
            .map_err(|_| TransportError::Disconnected)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_names_match_service_contract() {
        let cases = [
            (
                ControlAction::StartTts { text: "hi".into() },
                r#"{"action":"start_tts","text":"hi"}"#,
            ),
            (
                ControlAction::AppendTts { text: "hi ".into() },
                r#"{"action":"append_tts","text":"hi "}"#,
            ),
            (ControlAction::FinishTts, r#"{"action":"finish_tts"}"#),
            (ControlAction::Stop, r#"{"action":"stop"}"#),
            (ControlAction::Ping, r#"{"action":"ping"}"#),
        ];
        for (action, expected) in cases {
            assert_eq!(action.to_json().unwrap(), expected);
        }
    }

    #[tokio::test]
    async fn channel_sink_forwards_actions() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);

        assert!(sink.is_connected());
        sink.send(ControlAction::Ping).await.unwrap();
        assert_eq!(rx.recv().await, Some(ControlAction::Ping));
    }

    #[tokio::test]
    async fn channel_sink_reports_disconnect() {
        let (tx, rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);
        drop(rx);

        assert!(!sink.is_connected());
        assert!(matches!(
            sink.send(ControlAction::Stop).await,
            Err(TransportError::Disconnected)
        ));
    }
}
