//! Utterance controller: the single event path that owns the accumulator,
//! the playback scheduler and the position tracker.
//!
//! [`UtteranceController::run`] multiplexes four sources in one `select!`
//! loop, so every event is fully handled before the next one is looked at:
//!
//! ```text
//! Command (mpsc)          ──┐
//! InboundMessage (mpsc)   ──┤
//! SchedulerEvent          ──┼─▶ UtteranceController ──▶ EventHub (broadcast)
//! PositionTracker::tick   ──┘          │                 SharedState
//!                                      └─▶ ControlSink (start/append/finish/stop)
//! ```
//!
//! # Utterance flow
//!
//! ```text
//! start(text)     Idle → Streaming        reset accumulator + scheduler, start tracker
//! chunk           Streaming               append alignment, enqueue PCM
//! complete        Streaming → Finalizing  finalize snapshot, publish it
//! drained         Finalizing → Idle       stop tracker, publish PlaybackComplete
//! interrupt()     any → Idle              drop queued audio and pending snapshot
//! ```

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::mpsc;

use crate::alignment::{AlignmentAccumulator, AlignmentSnapshot, HighlightMode, HighlightState};
use crate::audio::{duration_ms, OutputEngine, PlaybackScheduler, PositionTracker};
use crate::audio::{ScheduledBuffer, SchedulerEvent};
use crate::config::AppConfig;
use crate::protocol::{
    AudioChunk, CompletionSummary, ControlAction, ControlSink, InboundMessage, TextBuffer,
    TransportError,
};

use super::events::{EngineEvent, EventHub};
use super::state::{SharedState, UtteranceState};

// ---------------------------------------------------------------------------
// ControllerError
// ---------------------------------------------------------------------------

/// Precondition and delivery failures reported to the caller.
#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("an utterance is already {state}; interrupt it first")]
    Busy { state: UtteranceState },

    #[error("speech service is not connected")]
    NotConnected,

    #[error(transparent)]
    Transport(#[from] TransportError),
}

// ---------------------------------------------------------------------------
// Command
// ---------------------------------------------------------------------------

/// Requests accepted by [`UtteranceController::run`].
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Start an utterance and ask the service to synthesize `text`.
    Speak(String),
    /// Start an utterance whose audio is produced elsewhere.
    Start(String),
    /// Stream LLM text; starts an utterance when idle.
    AppendText(String),
    /// No more streamed text for the current utterance.
    FinishText,
    Interrupt,
    /// Interrupt and tell the service to stop.
    Cancel,
    Reset,
    Seek(i64),
    SetHighlightMode(HighlightMode),
    Ping,
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Speak(_) => "speak",
            Self::Start(_) => "start",
            Self::AppendText(_) => "append_text",
            Self::FinishText => "finish_text",
            Self::Interrupt => "interrupt",
            Self::Cancel => "cancel",
            Self::Reset => "reset",
            Self::Seek(_) => "seek",
            Self::SetHighlightMode(_) => "set_highlight_mode",
            Self::Ping => "ping",
        }
    }
}

// ---------------------------------------------------------------------------
// UtteranceController
// ---------------------------------------------------------------------------

pub struct UtteranceController {
    state: UtteranceState,
    mode: HighlightMode,
    text: String,
    snapshot: Option<Arc<AlignmentSnapshot>>,

    accumulator: AlignmentAccumulator,
    scheduler: PlaybackScheduler,
    tracker: PositionTracker,
    text_buffer: TextBuffer,

    sink: Arc<dyn ControlSink>,
    events: EventHub,
    shared: SharedState,

    sample_rate: u32,
    fallback_duration_ms: i64,
    /// Drift tolerance in ms; `None` disables device resync.
    resync_tolerance_ms: Option<i64>,
}

impl UtteranceController {
    pub fn new(
        config: &AppConfig,
        shared: SharedState,
        events: EventHub,
        engine: Box<dyn OutputEngine>,
        sink: Arc<dyn ControlSink>,
    ) -> Self {
        Self {
            state: UtteranceState::Idle,
            mode: config.highlight.mode,
            text: String::new(),
            snapshot: None,
            accumulator: AlignmentAccumulator::new(config.alignment.time_base),
            scheduler: PlaybackScheduler::new(engine, &config.audio),
            tracker: PositionTracker::from_config(&config.tracker),
            text_buffer: TextBuffer::from_config(&config.buffering),
            sink,
            events,
            shared,
            sample_rate: config.audio.sample_rate,
            fallback_duration_ms: config.alignment.fallback_duration_ms,
            resync_tolerance_ms: config
                .tracker
                .resync_enabled
                .then_some(config.tracker.resync_tolerance_ms as i64),
        }
    }

    // -----------------------------------------------------------------------
    // Main async loop
    // -----------------------------------------------------------------------

    /// Run until `commands` is closed.
    ///
    /// Closing `inbound` only stops message intake; playback already queued
    /// keeps going.  On exit the controller is reset.
    pub async fn run(
        mut self,
        mut inbound: mpsc::Receiver<InboundMessage>,
        mut commands: mpsc::Receiver<Command>,
    ) {
        let mut inbound_open = true;
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                message = inbound.recv(), if inbound_open => match message {
                    Some(message) => self.handle_message(message),
                    None => {
                        log::info!("controller: inbound channel closed");
                        inbound_open = false;
                    }
                },
                event = self.scheduler.next_event() => self.on_scheduler_event(event),
                elapsed = self.tracker.tick() => self.on_tick(elapsed),
            }
        }

        self.reset();
        log::info!("controller: command channel closed, shutting down");
    }

    /// Failures are published as [`EngineEvent::CommandRejected`].
    async fn handle_command(&mut self, command: Command) {
        let name = command.name();
        let result = match command {
            Command::Speak(text) => self.speak(text).await,
            Command::Start(text) => self.start(text),
            Command::AppendText(text) => self.append_text(&text).await,
            Command::FinishText => self.finish_text().await,
            Command::Interrupt => {
                self.interrupt();
                Ok(())
            }
            Command::Cancel => {
                self.cancel().await;
                Ok(())
            }
            Command::Reset => {
                self.reset();
                Ok(())
            }
            Command::Seek(ms) => {
                self.seek(ms);
                Ok(())
            }
            Command::SetHighlightMode(mode) => {
                self.set_highlight_mode(mode);
                Ok(())
            }
            Command::Ping => self.ping().await,
        };
        if let Err(e) = result {
            log::warn!("controller: {name} rejected: {e}");
            self.events.publish(EngineEvent::CommandRejected {
                command: name,
                reason: e.to_string(),
            });
        }
    }

    // -----------------------------------------------------------------------
    // Utterance lifecycle
    // -----------------------------------------------------------------------

    /// `Idle → Streaming` for an utterance whose final text is `text`.
    ///
    /// # Errors
    ///
    /// [`ControllerError::Busy`] unless idle.
    pub fn start(&mut self, text: impl Into<String>) -> Result<(), ControllerError> {
        if self.state != UtteranceState::Idle {
            return Err(ControllerError::Busy { state: self.state });
        }

        self.accumulator.reset();
        self.scheduler.reset();
        self.snapshot = None;
        self.text = text.into();
        self.tracker.start();

        if let Ok(mut st) = self.shared.lock() {
            st.snapshot = None;
            st.last_error = None;
            st.highlight = HighlightState::none(self.mode);
            st.elapsed_ms = Some(0);
        }

        log::info!("controller: utterance started ({} chars)", self.text.chars().count());
        self.transition(UtteranceState::Streaming);
        Ok(())
    }

    /// Start an utterance and send `start_tts` for it.
    ///
    /// # Errors
    ///
    /// [`ControllerError::NotConnected`] when the sink is down,
    /// [`ControllerError::Busy`] unless idle.  A failed send rolls the
    /// utterance back to `Idle`.
    pub async fn speak(&mut self, text: impl Into<String>) -> Result<(), ControllerError> {
        if !self.sink.is_connected() {
            return Err(ControllerError::NotConnected);
        }
        let text = text.into();
        self.start(text.clone())?;

        if let Err(e) = self.sink.send(ControlAction::StartTts { text }).await {
            self.interrupt();
            return Err(e.into());
        }
        Ok(())
    }

    /// Feed streamed text through the [`TextBuffer`], sending `append_tts`
    /// whenever it flushes.  Starts an utterance when idle.
    pub async fn append_text(&mut self, text: &str) -> Result<(), ControllerError> {
        if !self.sink.is_connected() {
            return Err(ControllerError::NotConnected);
        }
        match self.state {
            UtteranceState::Idle => self.start(String::new())?,
            UtteranceState::Streaming => {}
            UtteranceState::Finalizing => {
                return Err(ControllerError::Busy { state: self.state });
            }
        }

        self.text.push_str(text);
        if let Some(chunk) = self.text_buffer.push(text) {
            self.sink.send(ControlAction::AppendTts { text: chunk }).await?;
        }
        Ok(())
    }

    /// Flush buffered text and send `finish_tts`.
    pub async fn finish_text(&mut self) -> Result<(), ControllerError> {
        if !self.sink.is_connected() {
            return Err(ControllerError::NotConnected);
        }
        if let Some(chunk) = self.text_buffer.finish() {
            self.sink.send(ControlAction::AppendTts { text: chunk }).await?;
        }
        self.sink.send(ControlAction::FinishTts).await?;
        Ok(())
    }

    /// Any state → `Idle`, discarding queued audio, accumulated alignment and
    /// a pending snapshot.  Buffers already inside the output engine finish
    /// sounding.
    pub fn interrupt(&mut self) {
        if self.state.is_busy() {
            log::info!("controller: interrupting while {}", self.state);
        }
        self.tracker.stop();
        self.scheduler.reset();
        self.accumulator.reset();
        self.text_buffer.clear();
        self.text.clear();
        self.snapshot = None;

        if let Ok(mut st) = self.shared.lock() {
            st.snapshot = None;
            st.elapsed_ms = None;
            st.highlight = HighlightState::none(self.mode);
        }
        self.transition(UtteranceState::Idle);
    }

    /// [`interrupt`](Self::interrupt) and rewind the scheduler's free slot.
    pub fn reset(&mut self) {
        self.interrupt();
        self.scheduler.stop();
    }

    /// [`interrupt`](Self::interrupt) and, best effort, tell the service to
    /// stop synthesizing.
    pub async fn cancel(&mut self) {
        self.interrupt();
        if !self.sink.is_connected() {
            return;
        }
        if let Err(e) = self.sink.send(ControlAction::Stop).await {
            log::warn!("controller: failed to send stop: {e}");
        }
    }

    pub async fn ping(&self) -> Result<(), ControllerError> {
        if !self.sink.is_connected() {
            return Err(ControllerError::NotConnected);
        }
        self.sink.send(ControlAction::Ping).await?;
        Ok(())
    }

    /// Jump the tracker to `ms` and publish the position right away.
    pub fn seek(&mut self, ms: i64) {
        match self.tracker.seek(ms) {
            Some(elapsed) => self.on_tick(elapsed),
            None => log::debug!("controller: seek ignored, tracker stopped"),
        }
    }

    pub fn set_highlight_mode(&mut self, mode: HighlightMode) {
        self.mode = mode;
    }

    // -----------------------------------------------------------------------
    // Inbound messages
    // -----------------------------------------------------------------------

    pub fn handle_message(&mut self, message: InboundMessage) {
        match message {
            InboundMessage::Chunk(chunk) => self.on_chunk(chunk),
            InboundMessage::Complete(summary) => self.on_complete(summary),
            InboundMessage::Error(message) => {
                log::warn!("controller: service error: {message}");
                if let Ok(mut st) = self.shared.lock() {
                    st.last_error = Some(message.clone());
                }
                self.events.publish(EngineEvent::Error(message));
            }
            InboundMessage::Control(kind) => log::debug!("controller: {kind:?}"),
            InboundMessage::Ignored => {}
        }
    }

    fn on_chunk(&mut self, chunk: AudioChunk) {
        let AudioChunk {
            chunk_index,
            pcm,
            alignment,
        } = chunk;

        if self.state != UtteranceState::Streaming {
            log::debug!("controller: dropping chunk #{chunk_index} while {}", self.state);
            return;
        }

        let chars = alignment.len();
        if let Err(e) = self.accumulator.append_frame(alignment) {
            log::warn!("controller: chunk #{chunk_index} alignment rejected: {e}");
        }

        let audio_ms = duration_ms(pcm.len(), self.sample_rate);
        if pcm.is_empty() {
            log::warn!("controller: chunk #{chunk_index} carries no audio");
        } else {
            let scheduled = self.scheduler.enqueue(pcm);
            self.on_scheduled(&scheduled);
        }
        self.accumulator.advance_audio(audio_ms);

        log::debug!("controller: chunk #{chunk_index} ({chars} chars, {audio_ms} ms)");
        self.events
            .publish(EngineEvent::ChunkReceived { chunk_index, chars });
    }

    fn on_complete(&mut self, summary: CompletionSummary) {
        if self.state != UtteranceState::Streaming {
            log::debug!("controller: ignoring complete while {}", self.state);
            return;
        }

        let text = summary
            .text
            .unwrap_or_else(|| std::mem::take(&mut self.text));
        let snapshot = Arc::new(self.accumulator.finalize(text));
        if snapshot.len() != summary.total_chars {
            log::warn!(
                "controller: service reported {} chars, received {}",
                summary.total_chars,
                snapshot.len()
            );
        }
        log::info!(
            "controller: utterance complete ({} chars, {} ms)",
            snapshot.len(),
            snapshot.total_duration_ms()
        );

        self.snapshot = Some(Arc::clone(&snapshot));
        if let Ok(mut st) = self.shared.lock() {
            st.snapshot = Some(Arc::clone(&snapshot));
        }
        self.events.publish(EngineEvent::Snapshot(snapshot));
        self.transition(UtteranceState::Finalizing);
        self.scheduler.arm_if_drained();
    }

    // -----------------------------------------------------------------------
    // Scheduler and tracker events
    // -----------------------------------------------------------------------

    fn on_scheduler_event(&mut self, event: SchedulerEvent) {
        match event {
            SchedulerEvent::BufferDone(buffer) => {
                let scheduled = self.scheduler.on_buffer_done(&buffer);
                self.on_scheduled(&scheduled);
                if let Some(tolerance) = self.resync_tolerance_ms {
                    let expected = (buffer.end_secs() * 1_000.0).round() as i64;
                    if let Some(drift) = self.tracker.correct_drift(expected, tolerance) {
                        log::debug!(
                            "controller: buffer #{} resynced tracker by {drift} ms",
                            buffer.seq
                        );
                    }
                }
            }
            SchedulerEvent::Drained => {
                if self.state == UtteranceState::Finalizing && self.scheduler.confirm_drained() {
                    self.finish_playback();
                }
            }
        }
    }

    /// Anchor the tracker so elapsed time reads 0 when the first buffer of the
    /// utterance starts on the device.
    fn on_scheduled(&mut self, buffers: &[ScheduledBuffer]) {
        if self.resync_tolerance_ms.is_none() {
            return;
        }
        if let Some(first) = buffers.iter().find(|b| b.seq == 0) {
            let lead_ms = ((first.start_at - self.scheduler.clock_now()) * 1_000.0).round() as i64;
            self.tracker.resync(-lead_ms);
            log::debug!("controller: tracker anchored {lead_ms} ms ahead of first buffer");
        }
    }

    fn on_tick(&self, elapsed_ms: i64) {
        let timeline = match &self.snapshot {
            Some(snapshot) => snapshot.timeline(),
            None => self.accumulator.timeline(),
        };
        let highlight = HighlightState::at(&timeline, elapsed_ms, self.mode);
        let active_range = highlight
            .index
            .and_then(|i| timeline.time_range_for_char_with(i, self.fallback_duration_ms));

        if let Ok(mut st) = self.shared.lock() {
            st.highlight = highlight;
            st.elapsed_ms = Some(elapsed_ms);
        }
        self.events.publish(EngineEvent::Position {
            elapsed_ms,
            highlight,
            active_range,
        });
    }

    fn finish_playback(&mut self) {
        self.tracker.stop();
        if let Ok(mut st) = self.shared.lock() {
            st.elapsed_ms = None;
        }
        log::info!("controller: playback complete");
        self.transition(UtteranceState::Idle);
        self.events.publish(EngineEvent::PlaybackComplete);
    }

    fn transition(&mut self, next: UtteranceState) {
        if self.state == next {
            return;
        }
        log::debug!("controller: {} → {}", self.state, next);
        self.state = next;
        if let Ok(mut st) = self.shared.lock() {
            st.utterance = next;
        }
        self.events.publish(EngineEvent::StateChanged(next));
    }

    // -----------------------------------------------------------------------
    // Accessors
    // -----------------------------------------------------------------------

    pub fn state(&self) -> UtteranceState {
        self.state
    }

    pub fn highlight_mode(&self) -> HighlightMode {
        self.mode
    }

    /// Finalized alignment of the current utterance, once `complete` arrived.
    pub fn snapshot(&self) -> Option<&Arc<AlignmentSnapshot>> {
        self.snapshot.as_ref()
    }

    /// Characters accumulated for the utterance still streaming.
    pub fn pending_chars(&self) -> usize {
        self.accumulator.len()
    }

    pub fn scheduler(&self) -> &PlaybackScheduler {
        &self.scheduler
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alignment::{AlignmentFrame, TimeBase};
    use crate::audio::MockOutputEngine;
    use crate::pipeline::new_shared_state;
    use crate::protocol::ChannelSink;
    use std::time::Duration;
    use tokio::sync::broadcast;

    struct Harness {
        controller: UtteranceController,
        mock: MockOutputEngine,
        events: broadcast::Receiver<EngineEvent>,
        sent: mpsc::Receiver<ControlAction>,
        shared: SharedState,
    }

    fn harness_with(config: AppConfig, mock: MockOutputEngine) -> Harness {
        let shared = new_shared_state(config.highlight.mode);
        let hub = EventHub::new(64);
        let events = hub.subscribe();
        let (tx, sent) = mpsc::channel(16);
        let controller = UtteranceController::new(
            &config,
            Arc::clone(&shared),
            hub,
            mock.boxed(),
            Arc::new(ChannelSink::new(tx)),
        );
        Harness {
            controller,
            mock,
            events,
            sent,
            shared,
        }
    }

    fn harness() -> Harness {
        harness_with(AppConfig::default(), MockOutputEngine::new())
    }

    /// `ms` milliseconds of silence at 22.05 kHz.
    fn pcm_ms(ms: u32) -> Vec<u8> {
        vec![0u8; (ms as usize * 22_050 / 1_000) * 2]
    }

    fn chunk(index: u64, text: &str, starts: &[i64], audio_ms: u32) -> InboundMessage {
        let chars: Vec<String> = text.chars().map(String::from).collect();
        let durations = vec![90; chars.len()];
        InboundMessage::Chunk(AudioChunk {
            chunk_index: index,
            pcm: pcm_ms(audio_ms),
            alignment: AlignmentFrame::new(chars, starts.to_vec(), durations),
        })
    }

    fn complete(total_chars: usize, text: Option<&str>) -> InboundMessage {
        InboundMessage::Complete(CompletionSummary {
            total_chars,
            total_duration_ms: 0,
            text: text.map(String::from),
        })
    }

    fn drain_events(rx: &mut broadcast::Receiver<EngineEvent>) -> Vec<EngineEvent> {
        let mut out = Vec::new();
        while let Ok(event) = rx.try_recv() {
            out.push(event);
        }
        out
    }

    // ---- start / busy ---

    #[tokio::test(start_paused = true)]
    async fn start_moves_to_streaming_and_rejects_second_start() {
        let mut h = harness();

        h.controller.start("hello").unwrap();
        assert_eq!(h.controller.state(), UtteranceState::Streaming);
        assert_eq!(h.shared.lock().unwrap().utterance, UtteranceState::Streaming);
        assert_eq!(
            drain_events(&mut h.events),
            vec![EngineEvent::StateChanged(UtteranceState::Streaming)]
        );

        assert!(matches!(
            h.controller.start("again"),
            Err(ControllerError::Busy {
                state: UtteranceState::Streaming
            })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_outside_streaming_are_dropped() {
        let mut h = harness();
        h.controller.handle_message(chunk(0, "a", &[0], 100));

        assert_eq!(h.controller.pending_chars(), 0);
        assert_eq!(h.controller.scheduler().total_bytes_queued(), 0);
        assert!(h.mock.submissions().is_empty());
    }

    // ---- chunk handling ---

    #[tokio::test(start_paused = true)]
    async fn empty_audio_keeps_timing_but_enqueues_nothing() {
        let mut h = harness();
        h.controller.start("a").unwrap();
        h.controller.handle_message(chunk(0, "a", &[0], 0));

        assert_eq!(h.controller.pending_chars(), 1);
        assert_eq!(h.controller.scheduler().total_bytes_queued(), 0);
        assert!(h.mock.submissions().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn chunk_relative_timing_is_offset_by_audio() {
        let mut config = AppConfig::default();
        config.alignment.time_base = TimeBase::ChunkRelative;
        let mut h = harness_with(config, MockOutputEngine::new());

        h.controller.start("abcd").unwrap();
        h.controller.handle_message(chunk(0, "ab", &[0, 100], 200));
        h.controller.handle_message(chunk(1, "cd", &[0, 100], 200));
        h.controller.handle_message(complete(4, None));

        let snapshot = h.controller.snapshot().unwrap();
        assert_eq!(snapshot.start_ms(), &[0, 100, 200, 300]);
        assert_eq!(snapshot.text(), "abcd");
    }

    // ---- completion ---

    #[tokio::test(start_paused = true)]
    async fn complete_finalizes_and_publishes_snapshot() {
        let mut h = harness();
        h.controller.start("hi").unwrap();
        h.controller.handle_message(chunk(0, "hi", &[0, 100], 200));
        h.controller.handle_message(complete(2, Some("hi!")));

        assert_eq!(h.controller.state(), UtteranceState::Finalizing);
        let snapshot = Arc::clone(h.controller.snapshot().unwrap());
        assert_eq!(snapshot.text(), "hi!");
        assert_eq!(snapshot.len(), 2);
        assert_eq!(h.controller.pending_chars(), 0);

        let events = drain_events(&mut h.events);
        assert!(events.contains(&EngineEvent::Snapshot(snapshot)));
        assert_eq!(
            events.last(),
            Some(&EngineEvent::StateChanged(UtteranceState::Finalizing))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn error_message_does_not_change_state() {
        let mut h = harness();
        h.controller.start("x").unwrap();
        drain_events(&mut h.events);

        h.controller
            .handle_message(InboundMessage::Error("voice unavailable".into()));

        assert_eq!(h.controller.state(), UtteranceState::Streaming);
        assert_eq!(
            drain_events(&mut h.events),
            vec![EngineEvent::Error("voice unavailable".into())]
        );
        assert_eq!(
            h.shared.lock().unwrap().last_error.as_deref(),
            Some("voice unavailable")
        );
    }

    // ---- interrupt ---

    #[tokio::test(start_paused = true)]
    async fn interrupt_discards_queued_audio() {
        let mut h = harness();
        h.controller.start("hello").unwrap();
        for i in 0..5 {
            h.controller.handle_message(chunk(i, "h", &[i as i64 * 200], 200));
        }
        let submitted = h.mock.submissions().len();
        assert!(h.controller.scheduler().queued_len() > 0);

        h.controller.interrupt();
        h.mock.complete_all();
        h.controller.handle_message(chunk(5, "x", &[1_000], 200));

        assert_eq!(h.controller.state(), UtteranceState::Idle);
        assert_eq!(h.controller.scheduler().queued_len(), 0);
        assert_eq!(h.mock.submissions().len(), submitted);

        h.controller.start("next").unwrap();
        assert_eq!(h.controller.scheduler().total_bytes_queued(), 0);
        assert_eq!(h.controller.pending_chars(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn interrupt_while_finalizing_drops_snapshot() {
        let mut h = harness();
        h.controller.start("a").unwrap();
        h.controller.handle_message(chunk(0, "a", &[0], 100));
        h.controller.handle_message(complete(1, None));
        assert!(h.controller.snapshot().is_some());

        h.controller.interrupt();
        assert_eq!(h.controller.state(), UtteranceState::Idle);
        assert!(h.controller.snapshot().is_none());
        assert!(h.shared.lock().unwrap().snapshot.is_none());
    }

    // ---- highlight ---

    #[tokio::test(start_paused = true)]
    async fn seek_publishes_highlight_for_position() {
        let mut config = AppConfig::default();
        config.highlight.mode = HighlightMode::Character;
        let mut h = harness_with(config, MockOutputEngine::new());

        h.controller.start("hello").unwrap();
        h.controller
            .handle_message(chunk(0, "hello", &[0, 100, 200, 300, 400], 500));
        drain_events(&mut h.events);

        h.controller.seek(350);
        let events = drain_events(&mut h.events);
        assert_eq!(
            events,
            vec![EngineEvent::Position {
                elapsed_ms: 350,
                highlight: HighlightState {
                    index: Some(3),
                    mode: HighlightMode::Character
                },
                active_range: Some((300, 390)),
            }]
        );
        assert_eq!(h.shared.lock().unwrap().highlight.index, Some(3));
    }

    #[tokio::test(start_paused = true)]
    async fn seek_when_idle_is_ignored() {
        let mut h = harness();
        h.controller.seek(100);
        assert!(drain_events(&mut h.events).is_empty());
    }

    // ---- control sink ---

    #[tokio::test(start_paused = true)]
    async fn speak_requires_connection() {
        let mut h = harness();
        h.sent.close();

        assert!(matches!(
            h.controller.speak("hello").await,
            Err(ControllerError::NotConnected)
        ));
        assert_eq!(h.controller.state(), UtteranceState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn speak_starts_and_sends_start_tts() {
        let mut h = harness();
        h.controller.speak("hello").await.unwrap();

        assert_eq!(h.controller.state(), UtteranceState::Streaming);
        assert_eq!(
            h.sent.recv().await,
            Some(ControlAction::StartTts {
                text: "hello".into()
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn streamed_text_is_buffered_then_finished() {
        let mut h = harness();
        h.controller.append_text("Hello there").await.unwrap();
        assert_eq!(h.controller.state(), UtteranceState::Streaming);
        h.controller.append_text(", friend.").await.unwrap();
        h.controller.append_text(" Bye").await.unwrap();
        h.controller.finish_text().await.unwrap();

        let mut sent = Vec::new();
        while let Ok(action) = h.sent.try_recv() {
            sent.push(action);
        }
        assert_eq!(
            sent,
            vec![
                ControlAction::AppendTts {
                    text: "Hello there, friend. ".into()
                },
                ControlAction::AppendTts { text: " Bye ".into() },
                ControlAction::FinishTts,
            ]
        );

        h.controller.handle_message(complete(0, None));
        assert_eq!(
            h.controller.snapshot().unwrap().text(),
            "Hello there, friend. Bye"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_interrupts_and_sends_stop() {
        let mut h = harness();
        h.controller.speak("hello").await.unwrap();
        h.controller.cancel().await;

        assert_eq!(h.controller.state(), UtteranceState::Idle);
        assert_eq!(h.sent.recv().await, Some(ControlAction::StartTts { text: "hello".into() }));
        assert_eq!(h.sent.recv().await, Some(ControlAction::Stop));
    }

    // ---- tracker sync ---

    #[tokio::test(start_paused = true)]
    async fn tracker_is_anchored_to_first_buffer_start() {
        let mock = MockOutputEngine::new();
        mock.set_clock(1.0);
        let mut h = harness_with(AppConfig::default(), mock);

        h.controller.start("hi").unwrap();
        // The device clock reads behind the free slot, so the first buffer
        // is scheduled 200 ms out.
        h.mock.set_clock(0.8);
        h.controller.handle_message(chunk(0, "hi", &[0, 100], 200));
        assert_eq!(h.mock.submissions()[0].start_at, 1.0);

        let elapsed = h.controller.tracker.tick().await;
        assert_eq!(elapsed, -200);
        h.controller.on_tick(elapsed);
        assert_eq!(h.shared.lock().unwrap().elapsed_ms, Some(-200));
        assert_eq!(h.shared.lock().unwrap().highlight.index, None);

        tokio::time::advance(Duration::from_millis(250)).await;
        let elapsed = h.controller.tracker.tick().await;
        assert_eq!(elapsed, 50);
        h.controller.on_tick(elapsed);
        assert_eq!(h.shared.lock().unwrap().elapsed_ms, Some(50));
        assert_eq!(h.shared.lock().unwrap().highlight.index, Some(0));
    }

    /// Play one 200 ms buffer, let `wall_ms` pass, then deliver its
    /// completion.  Returns the tracker reading afterwards.
    async fn elapsed_after_first_buffer(config: AppConfig, wall_ms: u64) -> Option<i64> {
        let mut h = harness_with(config, MockOutputEngine::new());
        h.controller.start("hi").unwrap();
        h.controller.handle_message(chunk(0, "hi", &[0, 100], 200));

        tokio::time::advance(Duration::from_millis(wall_ms)).await;
        h.mock.complete_next();
        let event = h.controller.scheduler.next_event().await;
        assert!(matches!(event, SchedulerEvent::BufferDone(b) if b.seq == 0));
        h.controller.on_scheduler_event(event);
        h.controller.tracker.elapsed_ms()
    }

    #[tokio::test(start_paused = true)]
    async fn buffer_completion_corrects_tracker_drift() {
        assert_eq!(
            elapsed_after_first_buffer(AppConfig::default(), 300).await,
            Some(200)
        );
        // Within the 40 ms tolerance the tracker keeps its own reading.
        assert_eq!(
            elapsed_after_first_buffer(AppConfig::default(), 220).await,
            Some(220)
        );

        let mut config = AppConfig::default();
        config.tracker.resync_enabled = false;
        assert_eq!(elapsed_after_first_buffer(config, 300).await, Some(300));
    }

    #[tokio::test(start_paused = true)]
    async fn drain_while_streaming_waits_for_complete() {
        let mut h = harness_with(AppConfig::default(), MockOutputEngine::auto_completing());
        h.controller.start("a").unwrap();
        h.controller.handle_message(chunk(0, "a", &[0], 100));

        let done = h.controller.scheduler.next_event().await;
        assert!(matches!(done, SchedulerEvent::BufferDone(_)));
        h.controller.on_scheduler_event(done);

        // Audio ran dry before the service said it was finished.
        let drained = h.controller.scheduler.next_event().await;
        assert_eq!(drained, SchedulerEvent::Drained);
        h.controller.on_scheduler_event(drained);
        assert_eq!(h.controller.state(), UtteranceState::Streaming);
        drain_events(&mut h.events);

        h.controller.handle_message(complete(1, None));
        assert_eq!(h.controller.state(), UtteranceState::Finalizing);

        let before = tokio::time::Instant::now();
        let drained = h.controller.scheduler.next_event().await;
        assert_eq!(drained, SchedulerEvent::Drained);
        assert!(tokio::time::Instant::now() - before >= Duration::from_millis(150));
        h.controller.on_scheduler_event(drained);

        assert_eq!(h.controller.state(), UtteranceState::Idle);
        let events = drain_events(&mut h.events);
        assert_eq!(
            &events[events.len() - 2..],
            &[
                EngineEvent::StateChanged(UtteranceState::Idle),
                EngineEvent::PlaybackComplete
            ]
        );
    }

    // ---- full loop ---

    #[tokio::test(start_paused = true)]
    async fn run_publishes_rejected_commands() {
        let Harness {
            controller,
            mut events,
            sent: _sent,
            ..
        } = harness();

        let (_in_tx, in_rx) = mpsc::channel(16);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let driver = async move {
            cmd_tx.send(Command::Start("a".into())).await.unwrap();
            cmd_tx.send(Command::Speak("b".into())).await.unwrap();

            let rejected = loop {
                match events.recv().await.unwrap() {
                    event @ EngineEvent::CommandRejected { .. } => break event,
                    _ => {}
                }
            };
            drop(cmd_tx);
            rejected
        };

        let ((), rejected) = tokio::join!(controller.run(in_rx, cmd_rx), driver);

        assert_eq!(
            rejected,
            EngineEvent::CommandRejected {
                command: "speak",
                reason: ControllerError::Busy {
                    state: UtteranceState::Streaming
                }
                .to_string(),
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn run_plays_utterance_to_completion() {
        let Harness {
            controller,
            mut events,
            shared,
            ..
        } = harness_with(AppConfig::default(), MockOutputEngine::auto_completing());

        let (in_tx, in_rx) = mpsc::channel(16);
        let (cmd_tx, cmd_rx) = mpsc::channel(16);

        let driver = async move {
            cmd_tx.send(Command::Start("hello".into())).await.unwrap();
            in_tx
                .send(chunk(0, "hello", &[0, 100, 200, 300, 400], 500))
                .await
                .unwrap();
            in_tx.send(complete(5, None)).await.unwrap();

            let mut seen = Vec::new();
            loop {
                match events.recv().await.unwrap() {
                    EngineEvent::PlaybackComplete => break,
                    EngineEvent::Position { .. } => {}
                    other => seen.push(other),
                }
            }
            drop(cmd_tx);
            seen
        };

        let ((), seen) = tokio::join!(controller.run(in_rx, cmd_rx), driver);

        assert_eq!(seen.len(), 5, "{seen:?}");
        assert_eq!(seen[0], EngineEvent::StateChanged(UtteranceState::Streaming));
        assert_eq!(
            seen[1],
            EngineEvent::ChunkReceived {
                chunk_index: 0,
                chars: 5
            }
        );
        assert!(matches!(&seen[2], EngineEvent::Snapshot(s) if s.text() == "hello"));
        assert_eq!(seen[3], EngineEvent::StateChanged(UtteranceState::Finalizing));
        assert_eq!(seen[4], EngineEvent::StateChanged(UtteranceState::Idle));
        assert_eq!(shared.lock().unwrap().utterance, UtteranceState::Idle);
    }
}
