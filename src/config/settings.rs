//! Engine settings structs, defaults and TOML persistence.
//!
//! All structs implement `Serialize`, `Deserialize`, `Default` and `Clone`
//! so they can be round-tripped through TOML files and shared across threads.

use std::time::Duration;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::AppPaths;
use crate::alignment::{HighlightMode, TimeBase};

// ---------------------------------------------------------------------------
// AudioConfig
// ---------------------------------------------------------------------------

/// Settings for PCM decoding and buffer scheduling.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Sample rate of the inbound PCM stream in Hz.  The wire contract fixes
    /// this at 22 050 for the whole session.
    pub sample_rate: u32,
    /// Output device name; `None` means the system default.
    pub output_device: Option<String>,
    /// How far ahead of the device clock (ms) the scheduler may commit audio.
    ///
    /// Anything committed to the device cannot be retracted on interrupt, so
    /// this bounds how much of a superseded utterance can bleed through.
    pub lookahead_ms: u64,
    /// Delay (ms) between the last buffer completing and playback-complete
    /// being raised, absorbing device-driver jitter.
    pub completion_grace_ms: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 22_050,
            output_device: None,
            lookahead_ms: 400,
            completion_grace_ms: 150,
        }
    }
}

impl AudioConfig {
    pub fn lookahead(&self) -> Duration {
        Duration::from_millis(self.lookahead_ms)
    }

    pub fn completion_grace(&self) -> Duration {
        Duration::from_millis(self.completion_grace_ms)
    }
}

// ---------------------------------------------------------------------------
// TrackerConfig
// ---------------------------------------------------------------------------

/// Settings for the wall-clock position tracker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Interval between position ticks in milliseconds.
    pub tick_interval_ms: u64,
    /// Re-anchor the tracker against buffer completions reported by the
    /// output device.
    pub resync_enabled: bool,
    /// Drift (ms) tolerated between the tracker and the device before the
    /// tracker is re-anchored.
    pub resync_tolerance_ms: u64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 50,
            resync_enabled: true,
            resync_tolerance_ms: 40,
        }
    }
}

impl TrackerConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

// ---------------------------------------------------------------------------
// AlignmentConfig
// ---------------------------------------------------------------------------

/// Settings for alignment accumulation and lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentConfig {
    /// Whether inbound `char_times` are absolute or relative to their chunk.
    pub time_base: TimeBase,
    /// Duration (ms) assumed for a character whose duration is missing.
    pub fallback_duration_ms: i64,
}

impl Default for AlignmentConfig {
    fn default() -> Self {
        Self {
            time_base: TimeBase::default(),
            fallback_duration_ms: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// HighlightConfig
// ---------------------------------------------------------------------------

/// Highlight resolution settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HighlightConfig {
    /// Mode used when an utterance starts.
    pub mode: HighlightMode,
}

impl Default for HighlightConfig {
    fn default() -> Self {
        Self {
            mode: HighlightMode::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// BufferingConfig
// ---------------------------------------------------------------------------

/// Outbound text coalescing thresholds (see [`crate::protocol::TextBuffer`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferingConfig {
    /// Soft length (chars) after which a comma or trailing space flushes.
    pub threshold: usize,
    /// Minimum length (chars) before sentence punctuation flushes.
    pub min_sentence_len: usize,
}

impl Default for BufferingConfig {
    fn default() -> Self {
        Self {
            threshold: 50,
            min_sentence_len: 10,
        }
    }
}

// ---------------------------------------------------------------------------
// EventsConfig
// ---------------------------------------------------------------------------

/// Broadcast fan-out settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EventsConfig {
    /// Per-subscriber backlog before a slow subscriber starts lagging.
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self { capacity: 256 }
    }
}

// ---------------------------------------------------------------------------
// AppConfig  (top-level)
// ---------------------------------------------------------------------------

/// Top-level configuration, serialised as `settings.toml`.
///
/// # Persistence
///
/// ```rust,no_run
/// use tts_sync::config::AppConfig;
///
/// // Load (returns Default when file is missing)
/// let config = AppConfig::load().unwrap();
///
/// // Modify and save
/// // config.save().unwrap();
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// PCM decoding and scheduling.
    #[serde(default)]
    pub audio: AudioConfig,
    /// Position tracker.
    #[serde(default)]
    pub tracker: TrackerConfig,
    /// Alignment accumulation.
    #[serde(default)]
    pub alignment: AlignmentConfig,
    /// Highlight resolution.
    #[serde(default)]
    pub highlight: HighlightConfig,
    /// Outbound text coalescing.
    #[serde(default)]
    pub buffering: BufferingConfig,
    /// Event fan-out.
    #[serde(default)]
    pub events: EventsConfig,
}

impl AppConfig {
    /// Load configuration from the platform-appropriate `settings.toml`.
    ///
    /// Returns `Ok(AppConfig::default())` when the file does not exist yet so
    /// callers never need to special-case a missing file.
    pub fn load() -> Result<Self> {
        Self::load_from(&AppPaths::new().settings_file)
    }

    /// Load from an explicit path (useful for tests).
    pub fn load_from(path: &std::path::Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to the platform-appropriate `settings.toml`,
    /// creating parent directories as needed.
    pub fn save(&self) -> Result<()> {
        self.save_to(&AppPaths::new().settings_file)
    }

    /// Save to an explicit path (useful for tests).
    pub fn save_to(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
