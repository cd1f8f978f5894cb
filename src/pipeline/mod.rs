//! Utterance pipeline: the controller state machine, its events, and the
//! shared state that polling observers read.
//!
//! # Architecture
//!
//! ```text
//! transport ──InboundMessage──▶ UtteranceController::run()  ← single task
//!                                   │
//!                                   ├─ chunk     → AlignmentAccumulator + PlaybackScheduler
//!                                   ├─ complete  → AlignmentSnapshot      → Finalizing
//!                                   ├─ drained   → PlaybackComplete       → Idle
//!                                   └─ tick      → HighlightState         → Position
//!
//! EventHub (broadcast) ──▶ any number of subscribers
//! SharedState (Arc<Mutex<EngineState>>) ←── polled by a UI
//! ```
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tokio::sync::mpsc;
//! use tts_sync::audio::CpalOutputEngine;
//! use tts_sync::config::AppConfig;
//! use tts_sync::pipeline::{new_shared_state, Command, EventHub, UtteranceController};
//! use tts_sync::protocol::ChannelSink;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = AppConfig::load()?;
//! let shared = new_shared_state(config.highlight.mode);
//! let events = EventHub::new(config.events.capacity);
//! let engine = CpalOutputEngine::open(config.audio.output_device.as_deref())?;
//!
//! let (action_tx, _action_rx) = mpsc::channel(32); // drained by the transport
//! let (_inbound_tx, inbound_rx) = mpsc::channel(64); // fed by the transport
//! let (command_tx, command_rx) = mpsc::channel(16);
//!
//! let controller = UtteranceController::new(
//!     &config,
//!     shared,
//!     events.clone(),
//!     Box::new(engine),
//!     Arc::new(ChannelSink::new(action_tx)),
//! );
//! command_tx.send(Command::Speak("Hello!".into())).await?;
//! controller.run(inbound_rx, command_rx).await;
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod events;
pub mod state;

// ---------------------------------------------------------------------------
// Public re-exports
// ---------------------------------------------------------------------------

pub use controller::{Command, ControllerError, UtteranceController};
pub use events::{EngineEvent, EventHub};
pub use state::{new_shared_state, EngineState, SharedState, UtteranceState};
