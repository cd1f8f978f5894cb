//! Application entry point: tts-sync demo player.
//!
//! Reads speech-service messages as newline-delimited JSON on stdin, plays the
//! audio on the default (or configured) output device and logs highlight
//! progress.  Outbound control actions are printed to stdout as JSON, one per
//! line, so a transport can be attached on either side of the pipe.
//!
//! ```text
//! $ tts-sync "Hello there"          # prints {"action":"start_tts","text":"Hello there"}
//! $ service-bridge | tts-sync       # plays chunks as they arrive
//! ```
//!
//! # Startup sequence
//!
//! 1. Initialise logging.
//! 2. Load [`AppConfig`] from disk (returns default on first run).
//! 3. Create a current-thread [`tokio`] runtime (the output stream is `!Send`).
//! 4. Open the cpal output device.
//! 5. Spawn the stdin reader thread and the action printer.
//! 6. Run the controller until playback is complete or input ends.

use std::io::BufRead;
use std::sync::Arc;

use anyhow::Context;
use tokio::sync::{broadcast, mpsc, oneshot};
use tts_sync::{
    audio::CpalOutputEngine,
    config::AppConfig,
    pipeline::{new_shared_state, Command, EngineEvent, EventHub, SharedState, UtteranceController},
    protocol::{decode_lossy, ChannelSink, ControlAction, InboundMessage},
};

fn main() -> anyhow::Result<()> {
    // 1. Logging
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    log::info!("tts-sync starting up");

    // 2. Config
    let config = AppConfig::load().unwrap_or_else(|e| {
        log::warn!("Failed to load config ({e}); using defaults");
        AppConfig::default()
    });

    let text = std::env::args().skip(1).collect::<Vec<_>>().join(" ");
    let text = (!text.trim().is_empty()).then_some(text);

    // 3. Runtime
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to create tokio runtime")?;

    rt.block_on(run(config, text))
}

async fn run(config: AppConfig, text: Option<String>) -> anyhow::Result<()> {
    // 4. Output device
    let engine = CpalOutputEngine::open(config.audio.output_device.as_deref())
        .context("failed to open audio output")?;

    let shared = new_shared_state(config.highlight.mode);
    let events = EventHub::new(config.events.capacity);

    let (action_tx, action_rx) = mpsc::channel::<ControlAction>(32);
    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let (command_tx, command_rx) = mpsc::channel::<Command>(16);
    let (eof_tx, eof_rx) = oneshot::channel::<()>();

    // 5. Input / output plumbing
    spawn_stdin_reader(inbound_tx, eof_tx)?;
    tokio::spawn(print_actions(action_rx));

    let controller = UtteranceController::new(
        &config,
        Arc::clone(&shared),
        events.clone(),
        Box::new(engine),
        Arc::new(ChannelSink::new(action_tx)),
    );

    // 6. Run
    let supervisor = supervise(events.subscribe(), shared, command_tx, text, eof_rx);
    tokio::join!(controller.run(inbound_rx, command_rx), supervisor);

    log::info!("tts-sync shutting down");
    Ok(())
}

/// Decode stdin lines on a dedicated thread; stdin reads block.
fn spawn_stdin_reader(
    inbound_tx: mpsc::Sender<InboundMessage>,
    eof_tx: oneshot::Sender<()>,
) -> anyhow::Result<()> {
    std::thread::Builder::new()
        .name("stdin-reader".into())
        .spawn(move || {
            for line in std::io::stdin().lock().lines() {
                let line = match line {
                    Ok(line) => line,
                    Err(e) => {
                        log::warn!("stdin read failed: {e}");
                        break;
                    }
                };
                if line.trim().is_empty() {
                    continue;
                }
                if inbound_tx.blocking_send(decode_lossy(&line)).is_err() {
                    break;
                }
            }
            let _ = eof_tx.send(());
        })
        .context("failed to spawn stdin reader thread")?;
    Ok(())
}

async fn print_actions(mut action_rx: mpsc::Receiver<ControlAction>) {
    while let Some(action) = action_rx.recv().await {
        match action.to_json() {
            Ok(json) => println!("{json}"),
            Err(e) => log::warn!("failed to encode {action:?}: {e}"),
        }
    }
}

/// Log engine events and decide when to stop.
///
/// With a command-line text the player exits after that utterance; otherwise
/// it exits once stdin is exhausted and playback has gone idle.  Dropping
/// `command_tx` ends the controller loop.
async fn supervise(
    mut events: broadcast::Receiver<EngineEvent>,
    shared: SharedState,
    command_tx: mpsc::Sender<Command>,
    text: Option<String>,
    mut eof_rx: oneshot::Receiver<()>,
) {
    let single_shot = text.is_some();
    if let Some(text) = text {
        if command_tx.send(Command::Speak(text)).await.is_err() {
            return;
        }
    }

    let mut input_done = false;
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(EngineEvent::PlaybackComplete) => {
                    log::info!("playback complete");
                    if single_shot || input_done {
                        break;
                    }
                }
                Ok(EngineEvent::Position { elapsed_ms, highlight, .. }) => {
                    log::debug!("position {elapsed_ms} ms → char {:?}", highlight.index);
                }
                Ok(EngineEvent::Snapshot(snapshot)) => {
                    log::info!(
                        "alignment: {} chars over {} ms",
                        snapshot.len(),
                        snapshot.total_duration_ms()
                    );
                }
                Ok(EngineEvent::Error(message)) => log::error!("speech service: {message}"),
                Ok(EngineEvent::CommandRejected { command, reason }) => {
                    log::error!("{command} rejected: {reason}");
                    if single_shot {
                        break;
                    }
                }
                Ok(other) => log::debug!("{other:?}"),
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    log::warn!("event log lagged, skipped {n} events");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = &mut eof_rx, if !input_done => {
                input_done = true;
                let busy = shared
                    .lock()
                    .map(|st| st.utterance.is_busy())
                    .unwrap_or(false);
                if !busy && !single_shot {
                    break;
                }
            }
        }
    }

    drop(command_tx);
}
