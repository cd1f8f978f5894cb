//! Elapsed-playback clock for highlight sync.
//!
//! [`PositionTracker`] keeps an anchor instant and reports
//! `now - anchor` in milliseconds on a fixed tick.  It is re-anchored rather
//! than paused: `seek` and `resync` just move the anchor so the next reading
//! equals the requested position.
//!
//! The anchor may lie in the future (negative elapsed time) while the first
//! buffer of an utterance is still waiting for its scheduled start.

use std::time::Duration;

use tokio::time::{interval, Instant, Interval, MissedTickBehavior};

use crate::config::TrackerConfig;

pub struct PositionTracker {
    period: Duration,
    anchor: Option<Instant>,
    ticker: Option<Interval>,
}

impl PositionTracker {
    pub fn new(period: Duration) -> Self {
        Self {
            period: period.max(Duration::from_millis(1)),
            anchor: None,
            ticker: None,
        }
    }

    pub fn from_config(config: &TrackerConfig) -> Self {
        Self::new(config.tick_interval())
    }

    /// Anchor at the current instant and begin ticking.  Restarts if already
    /// running.
    pub fn start(&mut self) {
        self.anchor = Some(Instant::now());
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.ticker = Some(ticker);
    }

    /// Stop ticking.  Readings return `None` until the next `start`.
    pub fn stop(&mut self) {
        self.anchor = None;
        self.ticker = None;
    }

    pub fn is_running(&self) -> bool {
        self.anchor.is_some()
    }

    /// Milliseconds since the anchor, negative while the anchor is ahead.
    pub fn elapsed_ms(&self) -> Option<i64> {
        let anchor = self.anchor?;
        let now = Instant::now();
        Some(if now >= anchor {
            (now - anchor).as_millis() as i64
        } else {
            -((anchor - now).as_millis() as i64)
        })
    }

    /// Jump to `ms` and return the reading to publish right away.
    ///
    /// The periodic tick restarts from here.  No-op (`None`) when stopped.
    pub fn seek(&mut self, ms: i64) -> Option<i64> {
        if !self.is_running() {
            return None;
        }
        self.rebind(ms);
        if let Some(ticker) = self.ticker.as_mut() {
            ticker.reset();
        }
        Some(ms)
    }

    /// Silently re-anchor so the current reading equals `ms`.
    pub fn resync(&mut self, ms: i64) {
        if self.is_running() {
            self.rebind(ms);
        }
    }

    /// Re-anchor to `expected_ms` if the reading is off by more than
    /// `tolerance_ms`.  Returns the drift that was corrected.
    pub fn correct_drift(&mut self, expected_ms: i64, tolerance_ms: i64) -> Option<i64> {
        let drift = self.elapsed_ms()? - expected_ms;
        if drift.abs() <= tolerance_ms {
            return None;
        }
        log::debug!("tracker: correcting {drift} ms drift (expected {expected_ms} ms)");
        self.rebind(expected_ms);
        Some(drift)
    }

    /// Wait for the next tick and return the reading.
    ///
    /// Pending forever while stopped.
    pub async fn tick(&mut self) -> i64 {
        match self.ticker.as_mut() {
            Some(ticker) => {
                ticker.tick().await;
                self.elapsed_ms().unwrap_or(0)
            }
            None => std::future::pending().await,
        }
    }

    fn rebind(&mut self, ms: i64) {
        let now = Instant::now();
        let offset = Duration::from_millis(ms.unsigned_abs());
        self.anchor = Some(if ms >= 0 {
            now.checked_sub(offset).unwrap_or(now)
        } else {
            now + offset
        });
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
