//! Output engine abstraction.
//!
//! The scheduler never touches the sound card directly.  It talks to an
//! [`OutputEngine`]: something with a monotonic clock in seconds that accepts
//! mono `f32` buffers stamped with an absolute start time and reports when
//! each one has finished playing.
//!
//! * [`crate::audio::CpalOutputEngine`] is the real implementation.
//! * `MockOutputEngine` (tests only) has a hand-driven clock and hand-driven
//!   completions.

use thiserror::Error;
use tokio::sync::oneshot;

// ---------------------------------------------------------------------------
// OutputError
// ---------------------------------------------------------------------------

/// Errors raised while opening or feeding an output device.
#[derive(Debug, Error)]
pub enum OutputError {
    #[error("no output device found on the default audio host")]
    NoDevice,

    #[error("output device {0:?} not found")]
    DeviceNotFound(String),

    #[error("failed to enumerate output devices: {0}")]
    Devices(#[from] cpal::DevicesError),

    #[error("failed to query default output config: {0}")]
    DefaultConfig(#[from] cpal::DefaultStreamConfigError),

    #[error("failed to build output stream: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("failed to start output stream: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("output engine is not available")]
    Unavailable,
}

// ---------------------------------------------------------------------------
// OutputEngine
// ---------------------------------------------------------------------------

/// Signalled once when a submitted buffer has been fully rendered.
///
/// If the engine drops the sender (stream torn down), the receiver resolves
/// with an error; callers treat that the same as completion.
pub type Completion = oneshot::Receiver<()>;

/// Clocked audio sink used by [`crate::audio::PlaybackScheduler`].
///
/// Not `Send`: `cpal::Stream` is `!Send` on several platforms, so the engine
/// lives on the task that created it.
pub trait OutputEngine {
    /// Current position of the output clock in seconds.  Monotonic.
    fn now(&self) -> f64;

    /// Whether the engine can accept buffers.
    fn is_ready(&self) -> bool;

    /// Schedule mono `samples` at `sample_rate` Hz to start at `start_at`
    /// seconds on the output clock.
    ///
    /// A `start_at` already in the past plays immediately.
    fn submit(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
        start_at: f64,
    ) -> Result<Completion, OutputError>;
}

// Compile-time assertion: Box<dyn OutputEngine> must be constructible.
const _: fn() = || {
    fn _assert_object_safe(_: Box<dyn OutputEngine>) {}
};

// ---------------------------------------------------------------------------
// MockOutputEngine (test helper)
// ---------------------------------------------------------------------------

/// One buffer handed to [`MockOutputEngine::submit`].
#[cfg(test)]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Submission {
    pub start_at: f64,
    pub duration_secs: f64,
    pub samples: usize,
}

#[cfg(test)]
#[derive(Default)]
struct MockState {
    clock: f64,
    unavailable: bool,
    auto_complete: bool,
    submissions: Vec<Submission>,
    pending: std::collections::VecDeque<oneshot::Sender<()>>,
}

/// Test double for [`OutputEngine`].
///
/// Clones share state, so a test keeps one handle and gives a boxed clone to
/// the scheduler.
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockOutputEngine {
    state: std::sync::Arc<std::sync::Mutex<MockState>>,
}

#[cfg(test)]
impl MockOutputEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock whose buffers complete as soon as they are submitted.
    pub fn auto_completing() -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().auto_complete = true;
        mock
    }

    pub fn boxed(&self) -> Box<dyn OutputEngine> {
        Box::new(self.clone())
    }

    pub fn set_clock(&self, secs: f64) {
        self.state.lock().unwrap().clock = secs;
    }

    pub fn advance(&self, secs: f64) {
        self.state.lock().unwrap().clock += secs;
    }

    pub fn set_available(&self, available: bool) {
        self.state.lock().unwrap().unavailable = !available;
    }

    pub fn submissions(&self) -> Vec<Submission> {
        self.state.lock().unwrap().submissions.clone()
    }

    pub fn pending(&self) -> usize {
        self.state.lock().unwrap().pending.len()
    }

    /// Complete the oldest outstanding buffer.  Returns `false` if none.
    pub fn complete_next(&self) -> bool {
        match self.state.lock().unwrap().pending.pop_front() {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }

    pub fn complete_all(&self) {
        while self.complete_next() {}
    }
}

#[cfg(test)]
impl OutputEngine for MockOutputEngine {
    fn now(&self) -> f64 {
        self.state.lock().unwrap().clock
    }

    fn is_ready(&self) -> bool {
        !self.state.lock().unwrap().unavailable
    }

    fn submit(
        &mut self,
        samples: Vec<f32>,
        sample_rate: u32,
        start_at: f64,
    ) -> Result<Completion, OutputError> {
        let mut state = self.state.lock().unwrap();
        if state.unavailable {
            return Err(OutputError::Unavailable);
        }
        state.submissions.push(Submission {
            start_at,
            duration_secs: samples.len() as f64 / sample_rate as f64,
            samples: samples.len(),
        });
        let (tx, rx) = oneshot::channel();
        if state.auto_complete {
            let _ = tx.send(());
        } else {
            state.pending.push_back(tx);
        }
        Ok(rx)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
