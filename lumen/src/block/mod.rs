//! Tagged-block primitives: the on-disk framing unit and its typed variants.
//!
//! Every block is a 4-byte magic key, an 8-byte payload size and the payload
//! itself, zero-padded to the next word boundary:
//!
//! ```text
//! ┌───────────┬────────────┬────────────────┬──────────────────────────┐
//! │ Key (4 B) │ Size (8 B) │ Payload (size) │ NUL padding (to 4 B)     │
//! └───────────┴────────────┴────────────────┴──────────────────────────┘
//! ```
//!
//! Sizes are stored unpadded; the padding bytes carry no information and are
//! skipped on read. All integers are host byte order, the format is only
//! meant to be read on the platform that wrote it.
//!
//! The only exception to the framing above is the version block, which is a
//! key followed by a single word and carries no size field.

mod reader;
mod scalar;
mod writer;

use std::fmt;

use bytes::Bytes;

pub use self::{reader::BlockReader, scalar::Scalar, writer::BlockWriter};

/// The alignment quantum. Block footprints are rounded up to a multiple of
/// this many bytes.
pub const WORD_SIZE: u64 = 4;

/// Size of a [`MagicKey`] in bytes.
pub(crate) const KEY_SIZE: usize = 4;

/// On-disk size of a [`BlockInfo`]: key plus payload size.
pub(crate) const INFO_SIZE: u64 = KEY_SIZE as u64 + 8;

/// Round `size` up to the next word boundary.
pub const fn aligned_size(size: u64) -> u64 {
    size + padding_size(size)
}

/// Number of NUL bytes that follow a payload of `size` bytes.
pub const fn padding_size(size: u64) -> u64 {
    (WORD_SIZE - size % WORD_SIZE) % WORD_SIZE
}

/// A four-byte block tag.
///
/// Keys are opaque to the framing layer; their meaning is assigned by the
/// schema built on top. Tags shorter than four bytes are right-padded with
/// NUL, and the padding is not significant when a key is rendered as text.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct MagicKey([u8; KEY_SIZE]);

impl MagicKey {
    /// The all-NUL sentinel key.
    pub const NULL: MagicKey = MagicKey([0; KEY_SIZE]);

    /// Construct a key from a tag of at most four bytes.
    ///
    /// Usable in `const` position; a longer tag fails the build.
    pub const fn new(tag: &str) -> Self {
        let bytes = tag.as_bytes();
        assert!(bytes.len() <= KEY_SIZE, "magic keys hold at most four bytes");
        let mut key = [0u8; KEY_SIZE];
        let mut i = 0;
        while i < bytes.len() {
            key[i] = bytes[i];
            i += 1;
        }
        Self(key)
    }

    /// Construct a key from exactly four bytes.
    pub const fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// The raw key bytes, padding included.
    pub const fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    /// The key bytes up to the last non-NUL byte.
    pub fn trimmed(&self) -> &[u8] {
        let end = self
            .0
            .iter()
            .rposition(|byte| *byte != 0)
            .map_or(0, |last| last + 1);
        &self.0[..end]
    }
}

impl From<[u8; KEY_SIZE]> for MagicKey {
    fn from(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }
}

impl fmt::Display for MagicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.trimmed()))
    }
}

impl fmt::Debug for MagicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MagicKey(`{self}`)")
    }
}

/// The two-word block header: key and unpadded payload size in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
    /// Tag identifying the block's kind within a schema.
    pub key: MagicKey,
    /// Payload size in bytes, excluding the padding.
    pub size: u64,
}

impl BlockInfo {
    /// Construct a new [`BlockInfo`].
    pub fn new(key: MagicKey, size: u64) -> Self {
        Self { key, size }
    }

    /// The on-disk payload footprint, padding included.
    pub const fn aligned_size(&self) -> u64 {
        aligned_size(self.size)
    }

    /// Number of NUL bytes after this block's payload.
    pub const fn padding_size(&self) -> u64 {
        padding_size(self.size)
    }
}

/// An opaque payload block.
///
/// The blob owns its bytes; typed access goes through [`Blob::scalars`],
/// which decodes a borrowed view instead of handing out owning pointers.
#[derive(Debug, Clone, PartialEq)]
pub struct Blob {
    key: MagicKey,
    data: Bytes,
}

impl Blob {
    /// Construct a blob from a key and its payload bytes.
    pub fn new(key: MagicKey, data: Bytes) -> Self {
        Self { key, data }
    }

    /// The block tag.
    pub fn key(&self) -> MagicKey {
        self.key
    }

    /// The raw payload bytes.
    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decode the payload as a sequence of scalars.
    ///
    /// Trailing bytes that do not fill a whole scalar are not yielded.
    pub fn scalars<'a, T: Scalar + 'a>(&'a self) -> impl Iterator<Item = T> + 'a {
        self.data.chunks_exact(T::STORED_SIZE).map(T::read_from)
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;

    use super::{aligned_size, padding_size, Blob, BlockInfo, MagicKey};

    #[test]
    fn alignment() {
        assert_eq!(aligned_size(0), 0);
        assert_eq!(aligned_size(1), 4);
        assert_eq!(aligned_size(4), 4);
        assert_eq!(aligned_size(5), 8);
        assert_eq!(aligned_size(13), 16);

        assert_eq!(padding_size(0), 0);
        assert_eq!(padding_size(1), 3);
        assert_eq!(padding_size(2), 2);
        assert_eq!(padding_size(3), 1);
        assert_eq!(padding_size(4), 0);
    }

    #[test]
    fn key_padding_and_rendering() {
        let key = MagicKey::new("AB");
        assert_eq!(key.as_bytes(), b"AB\0\0");
        assert_eq!(key.trimmed(), b"AB");
        assert_eq!(key.to_string(), "AB");

        assert_eq!(MagicKey::NULL.trimmed(), b"");
        assert_eq!(MagicKey::NULL.to_string(), "");

        // Equality is byte-wise over the full four bytes.
        assert_eq!(MagicKey::new("AB"), MagicKey::from(*b"AB\0\0"));
        assert_ne!(MagicKey::new("AB"), MagicKey::new("ABC"));
    }

    #[test]
    fn info_footprint() {
        let info = BlockInfo::new(MagicKey::new("STR1"), 13);
        assert_eq!(info.aligned_size(), 16);
        assert_eq!(info.padding_size(), 3);
    }

    #[test]
    fn blob_scalar_view() {
        let mut raw = vec![];
        for value in [1.0f64, 2.0, 3.0] {
            raw.extend_from_slice(&value.to_ne_bytes());
        }
        let blob = Blob::new(MagicKey::new("DATA"), Bytes::from(raw));
        assert_eq!(blob.len(), 24);
        assert_eq!(blob.scalars::<f64>().collect::<Vec<_>>(), [1.0, 2.0, 3.0]);
    }
}
