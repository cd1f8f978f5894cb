//! Gapless playback scheduling of streamed PCM buffers.
//!
//! [`PlaybackScheduler`] owns the FIFO of not-yet-submitted PCM16 buffers and
//! places each one on the output clock directly after the previous one:
//!
//! ```text
//!   start_at(n) = max(now, next_free_slot)
//!   next_free_slot = start_at(n) + duration(n)
//! ```
//!
//! The buffer after the one currently playing is always handed to the engine
//! straight away, so a long buffer never delays its successor.  Beyond that,
//! only buffers that start within `lookahead` of the clock are submitted.  The
//! rest wait in the queue, so an interrupt (`reset`) discards them before any
//! sound is produced.
//!
//! Completions and the end-of-playback grace period are surfaced through the
//! async [`PlaybackScheduler::next_event`], which the owner polls from its
//! `select!` loop.

use std::collections::VecDeque;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use tokio::time::{sleep_until, Instant};

use super::output::OutputEngine;
use super::pcm::pcm16le_to_f32;
use crate::config::AudioConfig;

// ---------------------------------------------------------------------------
// ScheduledBuffer / SchedulerEvent
// ---------------------------------------------------------------------------

/// A buffer that has been handed to the output engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduledBuffer {
    /// Submission order within the current utterance, starting at 0.
    pub seq: u64,
    /// Start time on the output clock, in seconds.
    pub start_at: f64,
    pub duration_secs: f64,
    /// Audio content preceding this buffer in the utterance, in seconds.
    pub offset_secs: f64,
    pub byte_len: usize,
}

impl ScheduledBuffer {
    pub fn end_secs(&self) -> f64 {
        self.offset_secs + self.duration_secs
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SchedulerEvent {
    /// The engine finished rendering a buffer.
    BufferDone(ScheduledBuffer),
    /// Nothing has been queued or in flight for the whole grace period.
    Drained,
}

// ---------------------------------------------------------------------------
// PlaybackScheduler
// ---------------------------------------------------------------------------

pub struct PlaybackScheduler {
    engine: Box<dyn OutputEngine>,
    sample_rate: u32,
    lookahead_secs: f64,
    grace: Duration,

    queue: VecDeque<Vec<u8>>,
    in_flight: FuturesUnordered<BoxFuture<'static, ScheduledBuffer>>,

    total_bytes_queued: usize,
    total_bytes_played: usize,
    next_free_slot: f64,
    next_seq: u64,
    content_secs: f64,

    drained_deadline: Option<Instant>,
}

impl PlaybackScheduler {
    pub fn new(engine: Box<dyn OutputEngine>, config: &AudioConfig) -> Self {
        Self {
            engine,
            sample_rate: config.sample_rate,
            lookahead_secs: config.lookahead().as_secs_f64(),
            grace: config.completion_grace(),
            queue: VecDeque::new(),
            in_flight: FuturesUnordered::new(),
            total_bytes_queued: 0,
            total_bytes_played: 0,
            next_free_slot: 0.0,
            next_seq: 0,
            content_secs: 0.0,
            drained_deadline: None,
        }
    }

    /// Queue one PCM16LE buffer and submit whatever fits in the lookahead.
    ///
    /// Returns the buffers submitted by this call (possibly including older
    /// queued ones).  Empty input is ignored.
    pub fn enqueue(&mut self, bytes: Vec<u8>) -> Vec<ScheduledBuffer> {
        if bytes.is_empty() {
            log::debug!("scheduler: ignoring empty buffer");
            return Vec::new();
        }
        self.total_bytes_queued += bytes.len();
        self.queue.push_back(bytes);
        self.drained_deadline = None;

        let scheduled = self.drain();
        self.arm_if_drained();
        scheduled
    }

    /// Submit queued buffers until the queue is empty or the next start time
    /// lies `lookahead` or more beyond the clock.
    ///
    /// Up to two buffers are always in flight regardless of the lookahead:
    /// the next one must already be in the engine when the current one ends,
    /// since only a completion wakes the scheduler.
    pub fn drain(&mut self) -> Vec<ScheduledBuffer> {
        let mut scheduled = Vec::new();
        while !self.queue.is_empty() {
            let now = self.engine.now();
            if self.in_flight.len() >= 2 && self.next_free_slot - now >= self.lookahead_secs {
                break;
            }
            let Some(bytes) = self.queue.pop_front() else {
                break;
            };
            if let Some(buffer) = self.submit(bytes, now) {
                scheduled.push(buffer);
            }
        }
        scheduled
    }

    fn submit(&mut self, bytes: Vec<u8>, now: f64) -> Option<ScheduledBuffer> {
        let byte_len = bytes.len();
        let samples = pcm16le_to_f32(&bytes);
        let duration_secs = samples.len() as f64 / self.sample_rate as f64;
        let start_at = now.max(self.next_free_slot);

        match self.engine.submit(samples, self.sample_rate, start_at) {
            Ok(done) => {
                let buffer = ScheduledBuffer {
                    seq: self.next_seq,
                    start_at,
                    duration_secs,
                    offset_secs: self.content_secs,
                    byte_len,
                };
                self.next_seq += 1;
                self.next_free_slot = start_at + duration_secs;
                self.content_secs += duration_secs;
                self.in_flight.push(
                    async move {
                        // A dropped sender means the stream went away; either
                        // way the buffer will not play any further.
                        let _ = done.await;
                        buffer
                    }
                    .boxed(),
                );
                log::debug!(
                    "scheduler: buffer #{} ({} bytes) at {:.3}s, next slot {:.3}s",
                    buffer.seq,
                    byte_len,
                    start_at,
                    self.next_free_slot
                );
                Some(buffer)
            }
            Err(e) => {
                log::warn!("scheduler: dropping {byte_len}-byte buffer: {e}");
                self.total_bytes_played += byte_len;
                None
            }
        }
    }

    /// Wait for the next completion or for the drain grace period to lapse.
    ///
    /// Pending forever when there is nothing in flight and no grace period
    /// armed, so it can sit in a `select!` arm unconditionally.
    pub async fn next_event(&mut self) -> SchedulerEvent {
        let deadline = self.drained_deadline;
        let has_in_flight = !self.in_flight.is_empty();
        tokio::select! {
            Some(buffer) = self.in_flight.next(), if has_in_flight => {
                SchedulerEvent::BufferDone(buffer)
            }
            _ = sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                self.drained_deadline = None;
                SchedulerEvent::Drained
            }
            else => std::future::pending::<SchedulerEvent>().await,
        }
    }

    /// Account for a finished buffer and top the engine back up.
    pub fn on_buffer_done(&mut self, buffer: &ScheduledBuffer) -> Vec<ScheduledBuffer> {
        self.total_bytes_played += buffer.byte_len;
        let scheduled = self.drain();
        self.arm_if_drained();
        scheduled
    }

    /// Start the grace timer if playback has drained and no timer is running.
    pub fn arm_if_drained(&mut self) {
        if self.is_drained() && self.drained_deadline.is_none() {
            self.drained_deadline = Some(Instant::now() + self.grace);
        }
    }

    /// Re-check after the grace period.  `false` means new audio arrived.
    pub fn confirm_drained(&mut self) -> bool {
        self.drained_deadline = None;
        self.is_drained()
    }

    pub fn is_drained(&self) -> bool {
        self.queue.is_empty()
            && self.in_flight.is_empty()
            && self.total_bytes_played >= self.total_bytes_queued
    }

    /// Discard all queued and in-flight work for a new utterance.
    ///
    /// The next buffer starts no earlier than the current clock.  Buffers
    /// already inside the engine finish sounding; their completions are
    /// ignored.
    pub fn reset(&mut self) {
        self.clear();
        self.next_free_slot = self.engine.now();
    }

    /// Like [`reset`](Self::reset) but rewinds the free slot to zero.
    pub fn stop(&mut self) {
        self.clear();
        self.next_free_slot = 0.0;
    }

    fn clear(&mut self) {
        self.queue.clear();
        self.in_flight = FuturesUnordered::new();
        self.total_bytes_queued = 0;
        self.total_bytes_played = 0;
        self.next_seq = 0;
        self.content_secs = 0.0;
        self.drained_deadline = None;
    }

    // -- accessors ----------------------------------------------------------

    pub fn clock_now(&self) -> f64 {
        self.engine.now()
    }

    pub fn is_output_ready(&self) -> bool {
        self.engine.is_ready()
    }

    pub fn next_free_slot(&self) -> f64 {
        self.next_free_slot
    }

    pub fn total_bytes_queued(&self) -> usize {
        self.total_bytes_queued
    }

    pub fn total_bytes_played(&self) -> usize {
        self.total_bytes_played
    }

    /// Buffers waiting to be submitted.
    pub fn queued_len(&self) -> usize {
        self.queue.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::output::MockOutputEngine;

    /// `ms` milliseconds of silence at 22.05 kHz, as PCM16LE bytes.
    fn pcm_ms(ms: u32) -> Vec<u8> {
        vec![0u8; (ms as usize * 22_050 / 1_000) * 2]
    }

    fn scheduler(mock: &MockOutputEngine) -> PlaybackScheduler {
        PlaybackScheduler::new(mock.boxed(), &AudioConfig::default())
    }

    #[test]
    fn consecutive_buffers_are_gapless() {
        let mock = MockOutputEngine::new();
        mock.set_clock(1.0);
        let mut s = scheduler(&mock);

        let first = s.enqueue(pcm_ms(200));
        let second = s.enqueue(pcm_ms(150));

        assert_eq!(first.len(), 1);
        assert_eq!(second.len(), 1);
        assert_eq!(first[0].start_at, 1.0);
        assert_eq!(second[0].start_at, first[0].start_at + first[0].duration_secs);
        assert!((second[0].start_at - 1.2).abs() < 1e-12);
        assert!((second[0].offset_secs - 0.2).abs() < 1e-12);
        assert_eq!(second[0].seq, 1);
    }

    #[test]
    fn empty_buffer_is_a_noop() {
        let mock = MockOutputEngine::new();
        let mut s = scheduler(&mock);

        assert!(s.enqueue(Vec::new()).is_empty());
        assert_eq!(s.total_bytes_queued(), 0);
        assert!(mock.submissions().is_empty());
    }

    #[test]
    fn never_schedules_in_the_past() {
        let mock = MockOutputEngine::auto_completing();
        let mut s = scheduler(&mock);

        s.enqueue(pcm_ms(100));
        mock.set_clock(5.0);
        let late = s.enqueue(pcm_ms(100));
        assert_eq!(late[0].start_at, 5.0);
    }

    #[test]
    fn lookahead_holds_back_later_buffers() {
        let mock = MockOutputEngine::new();
        let mut s = scheduler(&mock);

        for _ in 0..5 {
            s.enqueue(pcm_ms(200));
        }
        // 400 ms lookahead from t=0: buffers at 0.0 and 0.2 go out.
        assert_eq!(mock.submissions().len(), 2);
        assert_eq!(s.queued_len(), 3);

        mock.advance(0.2);
        let first = ScheduledBuffer {
            seq: 0,
            start_at: 0.0,
            duration_secs: 0.2,
            offset_secs: 0.0,
            byte_len: pcm_ms(200).len(),
        };
        let topped_up = s.on_buffer_done(&first);
        assert_eq!(topped_up.len(), 1);
        assert!((topped_up[0].start_at - 0.4).abs() < 1e-12);
        assert_eq!(s.queued_len(), 2);
    }

    #[test]
    fn long_buffer_does_not_delay_the_next() {
        let mock = MockOutputEngine::new();
        let mut s = scheduler(&mock);

        let first = s.enqueue(pcm_ms(1000));
        let second = s.enqueue(pcm_ms(150));
        assert_eq!(second.len(), 1, "second buffer must be in the engine early");
        assert_eq!(second[0].start_at, first[0].start_at + first[0].duration_secs);

        // The first buffer finishing late does not move the second.
        mock.set_clock(1.010);
        mock.complete_next();
        let third = s.on_buffer_done(&first[0]);
        assert!(third.is_empty());
        assert_eq!(
            mock.submissions()[1].start_at,
            first[0].start_at + first[0].duration_secs
        );
    }

    #[test]
    fn long_buffers_keep_one_successor_in_flight() {
        let mock = MockOutputEngine::new();
        let mut s = scheduler(&mock);

        for _ in 0..3 {
            s.enqueue(pcm_ms(1000));
        }
        assert_eq!(mock.submissions().len(), 2);
        assert_eq!(s.queued_len(), 1);
    }

    #[test]
    fn reset_discards_unsubmitted_audio() {
        let mock = MockOutputEngine::new();
        mock.set_clock(3.0);
        let mut s = scheduler(&mock);
        for _ in 0..5 {
            s.enqueue(pcm_ms(200));
        }
        let submitted = mock.submissions().len();

        s.reset();
        mock.complete_all();

        assert_eq!(s.total_bytes_queued(), 0);
        assert_eq!(s.queued_len(), 0);
        assert_eq!(s.in_flight_len(), 0);
        assert_eq!(s.next_free_slot(), 3.0);
        assert!(s.drain().is_empty());
        assert_eq!(mock.submissions().len(), submitted);

        let fresh = s.enqueue(pcm_ms(100));
        assert_eq!(fresh[0].seq, 0);
        assert_eq!(fresh[0].start_at, 3.0);
    }

    #[test]
    fn stop_rewinds_free_slot() {
        let mock = MockOutputEngine::new();
        mock.set_clock(2.0);
        let mut s = scheduler(&mock);
        s.enqueue(pcm_ms(200));
        s.stop();
        assert_eq!(s.next_free_slot(), 0.0);
    }

    #[test]
    fn unavailable_engine_counts_audio_as_played() {
        let mock = MockOutputEngine::new();
        mock.set_available(false);
        let mut s = scheduler(&mock);

        assert!(s.enqueue(pcm_ms(100)).is_empty());
        assert_eq!(s.total_bytes_played(), s.total_bytes_queued());
        assert_eq!(s.next_free_slot(), 0.0);
        assert!(s.is_drained());
    }

    #[tokio::test(start_paused = true)]
    async fn reports_completion_then_drain() {
        let mock = MockOutputEngine::new();
        let mut s = scheduler(&mock);
        s.enqueue(pcm_ms(100));
        assert!(!s.is_drained());

        mock.complete_next();
        let buffer = match s.next_event().await {
            SchedulerEvent::BufferDone(b) => b,
            other => panic!("expected BufferDone, got {other:?}"),
        };
        assert_eq!(buffer.seq, 0);
        s.on_buffer_done(&buffer);

        let before = Instant::now();
        assert_eq!(s.next_event().await, SchedulerEvent::Drained);
        assert!(Instant::now() - before >= Duration::from_millis(150));
        assert!(s.confirm_drained());
    }

    #[tokio::test(start_paused = true)]
    async fn new_audio_cancels_grace_period() {
        let mock = MockOutputEngine::auto_completing();
        let mut s = scheduler(&mock);
        s.enqueue(pcm_ms(100));
        if let SchedulerEvent::BufferDone(b) = s.next_event().await {
            s.on_buffer_done(&b);
        }

        // Grace armed; new audio arrives before it lapses.
        s.enqueue(pcm_ms(100));
        match s.next_event().await {
            SchedulerEvent::BufferDone(b) => assert_eq!(b.seq, 1),
            other => panic!("expected BufferDone, got {other:?}"),
        }
        assert_eq!(s.total_bytes_played(), pcm_ms(100).len());
    }
}
