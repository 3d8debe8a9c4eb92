//! Wire-level constants shared by senders, listeners and the recorder.
//!
//! These values define the on-the-wire format and must stay stable for
//! compatibility with existing producers and recordings.

pub use types::TYPE_ID_SIZE;

/// Big-endian `u32` frame length prefix on TCP
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// MD5 digest appended to every payload
pub const CHECKSUM_SIZE: usize = 16;

/// Big-endian `u32` fragment count datagram on UDP
pub const FRAGMENT_COUNT_SIZE: usize = 4;

/// Maximum bytes per UDP fragment datagram
pub const UDP_FRAGMENT_SIZE: usize = 4096;

/// Chunk size used when draining a declared TCP frame from the socket
pub const READ_CHUNK_SIZE: usize = 4096;

/// Smallest valid sealed blob: a type id plus its checksum
pub const MIN_SEALED_SIZE: usize = TYPE_ID_SIZE + CHECKSUM_SIZE;

/// Default upper bound on a single frame accepted from the network (64 MiB)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;
