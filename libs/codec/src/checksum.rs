//! MD5 Checksum Sealing
//!
//! Every payload travels with the MD5 digest of its bytes appended. The
//! digest is an integrity check only, not a security boundary.

use md5::{Digest as _, Md5};

use crate::constants::CHECKSUM_SIZE;

/// Raw 16-byte MD5 digest
pub type Digest = [u8; CHECKSUM_SIZE];

/// How a sender seals its payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumMode {
    /// Append the true digest
    #[default]
    Valid,
    /// Append the digest with every byte incremented (mod 256), so receivers
    /// exercise their rejection path
    Corrupt,
}

/// MD5 digest of `data`
pub fn digest(data: &[u8]) -> Digest {
    let mut out = [0u8; CHECKSUM_SIZE];
    out.copy_from_slice(&Md5::digest(data));
    out
}

/// Digest with each byte shifted by one
pub fn corrupt(digest: &Digest) -> Digest {
    let mut out = *digest;
    for b in out.iter_mut() {
        *b = b.wrapping_add(1);
    }
    out
}

/// Digest to append for the given mode
pub fn digest_for(data: &[u8], mode: ChecksumMode) -> Digest {
    match mode {
        ChecksumMode::Valid => digest(data),
        ChecksumMode::Corrupt => corrupt(&digest(data)),
    }
}

/// True when `expected` is exactly the digest of `data`
pub fn verify(data: &[u8], expected: &[u8]) -> bool {
    expected.len() == CHECKSUM_SIZE && digest(data)[..] == *expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        // RFC 1321 test vector
        assert_eq!(
            hex::encode(digest(b"abc")),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn test_corrupt_wraps() {
        let mut d = [0u8; CHECKSUM_SIZE];
        d[0] = 0xFF;
        let c = corrupt(&d);
        assert_eq!(c[0], 0x00);
        assert_eq!(c[1], 0x01);
    }

    #[test]
    fn test_verify() {
        let d = digest(b"hello");
        assert!(verify(b"hello", &d));
        assert!(!verify(b"hellO", &d));
        assert!(!verify(b"hello", &d[..15]));
        assert!(!verify(b"hello", &digest_for(b"hello", ChecksumMode::Corrupt)));
    }
}
