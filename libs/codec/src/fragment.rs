//! UDP fragmentation and reassembly
//!
//! A sealed blob is announced with a 4-byte big-endian fragment count and then
//! sent as that many datagrams of at most [`UDP_FRAGMENT_SIZE`] bytes. There are
//! no sequence numbers: the receiver trusts that datagrams arrive complete and
//! in order, and keeps at most one partial message per socket.

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::checksum::ChecksumMode;
use crate::constants::{DEFAULT_MAX_FRAME_SIZE, FRAGMENT_COUNT_SIZE, UDP_FRAGMENT_SIZE};
use crate::error::{ProtocolError, ProtocolResult};
use crate::frame::seal;

/// Datagrams for one message: the count header followed by the fragments
#[derive(Debug, Clone, PartialEq)]
pub struct Fragments {
    count: u32,
    chunks: Vec<Bytes>,
}

impl Fragments {
    pub fn count(&self) -> u32 {
        self.count
    }

    /// The count datagram that precedes the fragments
    pub fn header(&self) -> [u8; FRAGMENT_COUNT_SIZE] {
        self.count.to_be_bytes()
    }

    pub fn chunks(&self) -> &[Bytes] {
        &self.chunks
    }

    /// Header followed by every fragment, in send order
    pub fn datagrams(&self) -> impl Iterator<Item = Bytes> + '_ {
        std::iter::once(Bytes::copy_from_slice(&self.header())).chain(self.chunks.iter().cloned())
    }
}

/// Seal `payload` and split it into datagrams of at most `fragment_size` bytes.
///
/// A `fragment_size` of zero falls back to [`UDP_FRAGMENT_SIZE`].
pub fn fragment(payload: &[u8], mode: ChecksumMode, fragment_size: usize) -> Fragments {
    let size = if fragment_size == 0 {
        UDP_FRAGMENT_SIZE
    } else {
        fragment_size
    };
    let sealed = seal(payload, mode);
    let chunks: Vec<Bytes> = (0..sealed.len())
        .step_by(size)
        .map(|start| sealed.slice(start..(start + size).min(sealed.len())))
        .collect();

    Fragments {
        count: chunks.len() as u32,
        chunks,
    }
}

/// Per-socket reassembly state machine
///
/// Idle until a count datagram arrives, then collects exactly that many
/// datagrams and yields the concatenated sealed blob.
#[derive(Debug)]
pub struct Reassembler {
    expecting_count: bool,
    fragments_seen: u32,
    total_fragments: u32,
    buffer: BytesMut,
    max_size: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_SIZE)
    }
}

impl Reassembler {
    /// `max_size` bounds the bytes buffered for one message
    pub fn new(max_size: usize) -> Self {
        Self {
            expecting_count: true,
            fragments_seen: 0,
            total_fragments: 0,
            buffer: BytesMut::new(),
            max_size,
        }
    }

    /// True when the next datagram is read as a fragment count
    pub fn is_expecting_count(&self) -> bool {
        self.expecting_count
    }

    /// `(seen, total)` for the message in flight
    pub fn progress(&self) -> (u32, u32) {
        (self.fragments_seen, self.total_fragments)
    }

    /// Drop any partial message
    pub fn reset(&mut self) {
        self.expecting_count = true;
        self.fragments_seen = 0;
        self.total_fragments = 0;
        self.buffer.clear();
    }

    /// Feed one datagram.
    ///
    /// Returns `Ok(Some(sealed))` when the final fragment of a message arrives.
    /// A malformed count datagram is rejected and the state stays idle.
    pub fn push(&mut self, datagram: &[u8]) -> ProtocolResult<Option<Bytes>> {
        if self.expecting_count {
            let count = parse_count(datagram)?;
            self.expecting_count = false;
            self.total_fragments = count;
            self.fragments_seen = 0;
            self.buffer.clear();
            trace!(fragments = count, "Expecting UDP fragments");
            return Ok(None);
        }

        if self.buffer.len() + datagram.len() > self.max_size {
            let size = self.buffer.len() + datagram.len();
            self.reset();
            return Err(ProtocolError::FrameTooLarge {
                size,
                max: self.max_size,
            });
        }

        self.buffer.extend_from_slice(datagram);
        self.fragments_seen += 1;
        if self.fragments_seen < self.total_fragments {
            return Ok(None);
        }

        let sealed = self.buffer.split().freeze();
        self.reset();
        Ok(Some(sealed))
    }
}

fn parse_count(datagram: &[u8]) -> ProtocolResult<u32> {
    let bytes: [u8; FRAGMENT_COUNT_SIZE] = datagram.try_into().map_err(|_| {
        ProtocolError::invalid_fragment_count(datagram.len(), "expected exactly 4 bytes")
    })?;
    match u32::from_be_bytes(bytes) {
        0 => Err(ProtocolError::invalid_fragment_count(
            FRAGMENT_COUNT_SIZE,
            "count must be non-zero",
        )),
        count => Ok(count),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::CHECKSUM_SIZE;
    use crate::frame::open_sealed;

    #[test]
    fn test_fragment_sizes() {
        let payload = vec![0xAB; 10_000];
        let frags = fragment(&payload, ChecksumMode::Valid, UDP_FRAGMENT_SIZE);
        // 10_016 sealed bytes -> 4096 + 4096 + 1824
        assert_eq!(frags.count(), 3);
        assert_eq!(frags.chunks()[0].len(), 4096);
        assert_eq!(frags.chunks()[2].len(), 10_000 + CHECKSUM_SIZE - 8192);
        assert_eq!(frags.header(), 3u32.to_be_bytes());
        assert_eq!(frags.datagrams().count(), 4);
    }

    #[test]
    fn test_exact_multiple() {
        let payload = vec![1u8; 4096 - CHECKSUM_SIZE];
        assert_eq!(fragment(&payload, ChecksumMode::Valid, 4096).count(), 1);
    }

    #[test]
    fn test_reassembly() {
        let payload: Vec<u8> = (0..9000u32).map(|i| i as u8).collect();
        let frags = fragment(&payload, ChecksumMode::Valid, UDP_FRAGMENT_SIZE);

        let mut r = Reassembler::default();
        let mut done = None;
        for dg in frags.datagrams() {
            assert!(done.is_none());
            done = r.push(&dg).unwrap();
        }
        let sealed = done.expect("message completes on last fragment");
        assert_eq!(open_sealed(&sealed).unwrap(), &payload[..]);
        assert!(r.is_expecting_count());
    }

    #[test]
    fn test_back_to_back_messages() {
        let mut r = Reassembler::default();
        for body in [&b"\x00\x01first"[..], &b"\x00\x02second"[..]] {
            let frags = fragment(body, ChecksumMode::Valid, 4);
            let mut out = None;
            for dg in frags.datagrams() {
                out = r.push(&dg).unwrap();
            }
            assert_eq!(open_sealed(&out.unwrap()).unwrap(), body);
        }
    }

    #[test]
    fn test_bad_count_stays_idle() {
        let mut r = Reassembler::default();
        assert!(matches!(
            r.push(b"hello"),
            Err(ProtocolError::InvalidFragmentCount { size: 5, .. })
        ));
        assert!(r.is_expecting_count());

        assert!(r.push(&0u32.to_be_bytes()).is_err());
        assert!(r.is_expecting_count());

        assert!(r.push(&2u32.to_be_bytes()).unwrap().is_none());
        assert!(!r.is_expecting_count());
        assert_eq!(r.progress(), (0, 2));
    }

    #[test]
    fn test_oversized_message_resets() {
        let mut r = Reassembler::new(8);
        r.push(&2u32.to_be_bytes()).unwrap();
        r.push(&[0; 6]).unwrap();
        assert!(matches!(
            r.push(&[0; 6]),
            Err(ProtocolError::FrameTooLarge { size: 12, max: 8 })
        ));
        assert!(r.is_expecting_count());
    }
}
