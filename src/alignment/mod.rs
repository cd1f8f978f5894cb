//! Character alignment: accumulation, lookup and highlight resolution.
//!
//! ```text
//! AlignmentFrame ──append──▶ AlignmentAccumulator ──finalize──▶ AlignmentSnapshot
//!                                   │ timeline()                    │ timeline()
//!                                   └──────────────┬────────────────┘
//!                                                  ▼
//!                         Timeline::char_index_at / word_boundaries
//!                                                  ▼
//!                                           HighlightState
//! ```

pub mod accumulator;
pub mod highlight;
pub mod index;

pub use accumulator::{
    AlignmentAccumulator, AlignmentError, AlignmentFrame, AlignmentSnapshot, TimeBase,
};
pub use highlight::{HighlightMode, HighlightState};
pub use index::{Timeline, FALLBACK_CHAR_DURATION_MS};
