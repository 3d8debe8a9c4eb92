//! # Skai Transport Types
//!
//! Pure data structures shared by every layer of the transport stack.
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → libs/codec → libs/network → libs/replay
//!     ↑            ↓             ↓              ↓
//! Pure Data   Framing/MD5    Sockets       Timed playback
//! ```
//!
//! ## What This Crate Contains
//! - [`WireMessage`]: a type id plus an opaque body
//! - [`RecordedEntry`]: one verified inbound payload as stored in a skaibin file
//! - [`TransportKind`]: TCP or UDP selection shared by CLIs and config
//! - Epoch timestamp helpers
//!
//! ## What This Crate Does NOT Contain
//! - Checksums, framing or fragmentation (belongs in `codec`)
//! - Socket management (belongs in `network`)

pub mod message;
pub mod recorded;
pub mod time;
pub mod transport;

pub use message::{peek_type_id, WireMessage};
pub use recorded::RecordedEntry;
pub use time::{duration_from_secs, epoch_seconds};
pub use transport::{ParseTransportKindError, TransportKind};

/// Size of the big-endian type identifier that starts every payload
pub const TYPE_ID_SIZE: usize = 2;
