//! Utterance state machine and shared engine state.
//!
//! [`UtteranceState`] drives the controller.  Observers that poll rather than
//! subscribe to events read the latest snapshot through [`SharedState`].

use std::sync::{Arc, Mutex};

use crate::alignment::{AlignmentSnapshot, HighlightMode, HighlightState};

// ---------------------------------------------------------------------------
// UtteranceState
// ---------------------------------------------------------------------------

/// Lifecycle of a single utterance.
///
/// ```text
/// Idle ──start──▶ Streaming ──complete──▶ Finalizing ──drained──▶ Idle
///  ▲                  │                        │
///  └──── interrupt ───┴────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UtteranceState {
    /// Nothing playing; ready for a new utterance.
    #[default]
    Idle,

    /// Chunks are arriving and being scheduled.
    Streaming,

    /// The service has sent `complete`; waiting for playback to drain.
    Finalizing,
}

impl UtteranceState {
    /// `true` while an utterance owns the output.
    ///
    /// ```
    /// use tts_sync::pipeline::UtteranceState;
    ///
    /// assert!(!UtteranceState::Idle.is_busy());
    /// assert!(UtteranceState::Streaming.is_busy());
    /// assert!(UtteranceState::Finalizing.is_busy());
    /// ```
    pub fn is_busy(&self) -> bool {
        !matches!(self, UtteranceState::Idle)
    }

    pub fn label(&self) -> &'static str {
        match self {
            UtteranceState::Idle => "Idle",
            UtteranceState::Streaming => "Streaming",
            UtteranceState::Finalizing => "Finalizing",
        }
    }
}

impl std::fmt::Display for UtteranceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// ---------------------------------------------------------------------------
// EngineState
// ---------------------------------------------------------------------------

/// Latest view of the engine, for polling observers.
#[derive(Debug, Clone)]
pub struct EngineState {
    pub utterance: UtteranceState,

    /// Most recent highlight resolution.
    pub highlight: HighlightState,

    /// Last tracker reading; `None` while stopped.
    pub elapsed_ms: Option<i64>,

    /// Finalized alignment of the current (or last completed) utterance.
    pub snapshot: Option<Arc<AlignmentSnapshot>>,

    /// Last service-reported error, cleared when a new utterance starts.
    pub last_error: Option<String>,
}

impl EngineState {
    pub fn new(mode: HighlightMode) -> Self {
        Self {
            utterance: UtteranceState::Idle,
            highlight: HighlightState::none(mode),
            elapsed_ms: None,
            snapshot: None,
            last_error: None,
        }
    }
}

impl Default for EngineState {
    fn default() -> Self {
        Self::new(HighlightMode::default())
    }
}

// ---------------------------------------------------------------------------
// SharedState
// ---------------------------------------------------------------------------

/// Thread-safe handle to [`EngineState`].
///
/// Do **not** hold the lock across `.await` points.
pub type SharedState = Arc<Mutex<EngineState>>;

pub fn new_shared_state(mode: HighlightMode) -> SharedState {
    Arc::new(Mutex::new(EngineState::new(mode)))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels() {
        assert_eq!(UtteranceState::Idle.label(), "Idle");
        assert_eq!(UtteranceState::Streaming.to_string(), "Streaming");
        assert_eq!(UtteranceState::Finalizing.label(), "Finalizing");
    }

    #[test]
    fn default_state_is_idle_with_no_highlight() {
        let state = EngineState::default();
        assert_eq!(state.utterance, UtteranceState::Idle);
        assert_eq!(state.highlight.index, None);
        assert!(state.snapshot.is_none());
        assert!(state.elapsed_ms.is_none());
    }

    #[test]
    fn shared_state_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<SharedState>();
    }

    #[test]
    fn shared_state_can_be_cloned_and_mutated() {
        let state = new_shared_state(HighlightMode::Character);
        let state2 = Arc::clone(&state);

        state.lock().unwrap().utterance = UtteranceState::Streaming;
        assert_eq!(state2.lock().unwrap().utterance, UtteranceState::Streaming);
        assert_eq!(state2.lock().unwrap().highlight.mode, HighlightMode::Character);
    }
}
