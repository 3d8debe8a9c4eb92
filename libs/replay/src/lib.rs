//! # skaibin Replay
//!
//! Plays a recording back to live listeners with its original timing.
//!
//! ```text
//! skaibin file ──> parse ──> group by port ──> sort ──> waits from global t0
//!                                                            │
//!                       ┌───────────── one task per port ────┘
//!                       v
//!                 sleep until deadline ──> FrameSender (TCP or UDP)
//! ```
//!
//! Every port's first wait is measured from the earliest timestamp in the
//! whole recording, so channels that started late in the capture start late
//! in the replay too.

pub mod engine;
pub mod error;
pub mod schedule;

pub use engine::{Analysis, PortOutcome, ReplayEngine, ReplayOptions, ReplayReport};
pub use error::{ReplayError, Result};
pub use schedule::{
    camera_group_of, PortRemap, PortSchedule, ReplaySchedule, ScheduledMessage,
    DEFAULT_SUFFIX_DIGITS,
};
