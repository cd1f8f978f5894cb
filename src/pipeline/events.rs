//! Engine events and their broadcast fan-out.
//!
//! Every subscriber gets its own receiver.  Subscribers only see events
//! published after they subscribe; a subscriber that falls more than the
//! configured capacity behind receives `RecvError::Lagged` and skips ahead.

use std::sync::Arc;

use tokio::sync::broadcast;

use crate::alignment::{AlignmentSnapshot, HighlightState};

use super::state::UtteranceState;

#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The utterance state machine moved.
    StateChanged(UtteranceState),

    /// An audio chunk was accepted and scheduled.
    ChunkReceived { chunk_index: u64, chars: usize },

    /// The utterance alignment was finalized.
    Snapshot(Arc<AlignmentSnapshot>),

    /// A tracker tick (or seek) resolved to this highlight.
    Position {
        elapsed_ms: i64,
        highlight: HighlightState,
        /// `(start, end)` in ms of the highlighted character.
        active_range: Option<(i64, i64)>,
    },

    /// The last buffer of a finalized utterance finished playing.
    PlaybackComplete,

    /// The speech service reported an error.
    Error(String),

    /// A [`Command`](super::Command) sent to the run loop failed.  `reason`
    /// is the `ControllerError` message.
    CommandRejected { command: &'static str, reason: String },
}

/// Cloneable publisher for [`EngineEvent`]s.
#[derive(Debug, Clone)]
pub struct EventHub {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventHub {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers.  Having none is not an error.
    pub fn publish(&self, event: EngineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::{RecvError, TryRecvError};

    #[test]
    fn publish_without_subscribers_is_fine() {
        let hub = EventHub::new(4);
        hub.publish(EngineEvent::PlaybackComplete);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn every_subscriber_gets_every_event() {
        let hub = EventHub::new(8);
        let mut a = hub.subscribe();
        let mut b = hub.subscribe();

        hub.publish(EngineEvent::StateChanged(UtteranceState::Streaming));
        hub.publish(EngineEvent::PlaybackComplete);

        for rx in [&mut a, &mut b] {
            assert_eq!(
                rx.recv().await.unwrap(),
                EngineEvent::StateChanged(UtteranceState::Streaming)
            );
            assert_eq!(rx.recv().await.unwrap(), EngineEvent::PlaybackComplete);
        }
    }

    #[test]
    fn late_subscriber_sees_only_new_events() {
        let hub = EventHub::new(8);
        let _keepalive = hub.subscribe();
        hub.publish(EngineEvent::Error("early".into()));

        let mut late = hub.subscribe();
        assert_eq!(late.try_recv(), Err(TryRecvError::Empty));
        hub.publish(EngineEvent::PlaybackComplete);
        assert_eq!(late.try_recv(), Ok(EngineEvent::PlaybackComplete));
    }

    #[tokio::test]
    async fn slow_subscriber_lags() {
        let hub = EventHub::new(2);
        let mut rx = hub.subscribe();
        for i in 0..4 {
            hub.publish(EngineEvent::ChunkReceived { chunk_index: i, chars: 1 });
        }
        assert!(matches!(rx.recv().await, Err(RecvError::Lagged(2))));
        assert_eq!(
            rx.recv().await.unwrap(),
            EngineEvent::ChunkReceived { chunk_index: 2, chars: 1 }
        );
    }
}
