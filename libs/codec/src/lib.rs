//! # Skai Transport Codec
//!
//! ## Purpose
//!
//! The "rules" layer of the transport stack: how a payload becomes bytes on a
//! TCP stream or a run of UDP datagrams, how integrity is verified on the way
//! back, and how a numeric type id maps to the codec that understands the body.
//!
//! ## Wire Formats
//!
//! ```text
//! TCP frame:   | length: u32 BE | type_id: u16 BE | body ... | md5(payload): 16 bytes |
//!                                 \_______ payload ________/
//!              length = len(payload) + 16
//!
//! UDP message: datagram 0     = fragment count: u32 BE
//!              datagrams 1..N = consecutive <= 4096 byte slices of payload + md5
//! ```
//!
//! ## Architecture Role
//!
//! ```text
//! libs/types → [codec] → network/ → replay/
//!     ↑           ↓          ↓
//! Pure Data   Framing     Sockets
//!             Checksums
//!             Registry
//! ```
//!
//! ## What This Crate Does NOT Contain
//! - Socket management or connection handling (belongs in `network`)
//! - Concrete message schemas; those plug in through [`registry::Codec`]
//!
//! Every function here is pure and safe to call from any thread. The only
//! stateful piece is [`fragment::Reassembler`], owned by one UDP socket.

pub mod checksum;
pub mod constants;
pub mod error;
pub mod fragment;
pub mod frame;
pub mod registry;

pub use checksum::{ChecksumMode, Digest};
pub use constants::*;
pub use error::{ProtocolError, ProtocolResult};
pub use fragment::{fragment, Fragments, Reassembler};
pub use frame::{
    decode_frame, encode_frame, encode_message, encode_payload, frame_length, open_sealed, seal,
};
pub use registry::{
    global as global_registry, install_global, pack, ChannelInfo, ChannelPorts, ChannelRegistry,
    Codec, DecodeOutcome, DecodedMessage, RawCodec,
};
pub use types::WireMessage;
