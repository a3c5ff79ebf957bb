//! The hash algorithms an archive can use for its per-entry and manifest hashes.
//!
//! The same [`HashType`] is used by the builder (to produce hashes)
//! and the reader (to check them).
//!
//! CRC32 only detects accidental corruption; anyone who can edit the archive
//! can also fix up a CRC. SHA-1 and SHA-256 make deliberate edits detectable
//! as long as the reader has some trusted way to know the manifest hash.

use std::fmt;
use std::str::FromStr;

use sha1::{Digest, Sha1};
use sha2::Sha256;

use crate::result::*;

/// The hash algorithm recorded in the archive header
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum HashType {
    /// No hashes; the hash fields are omitted from the index entirely.
    #[default]
    None = 0,
    /// CRC-32 (IEEE), stored as a little-endian u32.
    Crc32 = 1,
    Sha1 = 2,
    Sha256 = 3,
}

impl HashType {
    pub(crate) fn from_u8(u: u8) -> OrbResult<Self> {
        match u {
            0 => Ok(HashType::None),
            1 => Ok(HashType::Crc32),
            2 => Ok(HashType::Sha1),
            3 => Ok(HashType::Sha256),
            v => Err(OrbError::Unsupported(format!("unknown hash type {v}"))),
        }
    }

    /// The length of this algorithm's output in bytes
    pub fn len(self) -> usize {
        match self {
            HashType::None => 0,
            HashType::Crc32 => 4,
            HashType::Sha1 => 20,
            HashType::Sha256 => 32,
        }
    }

    /// Returns true for [`HashType::None`], which produces empty digests.
    pub fn is_empty(self) -> bool {
        self.len() == 0
    }

    /// Hashes a whole buffer at once.
    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashType::None => Vec::new(),
            HashType::Crc32 => crc32fast::hash(data).to_le_bytes().to_vec(),
            HashType::Sha1 => Sha1::digest(data).to_vec(),
            HashType::Sha256 => Sha256::digest(data).to_vec(),
        }
    }

    /// Returns a hasher to feed data incrementally.
    pub fn hasher(self) -> Hasher {
        match self {
            HashType::None => Hasher::None,
            HashType::Crc32 => Hasher::Crc32(crc32fast::Hasher::new()),
            HashType::Sha1 => Hasher::Sha1(Sha1::new()),
            HashType::Sha256 => Hasher::Sha256(Sha256::new()),
        }
    }
}

impl fmt::Display for HashType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HashType::None => "none",
            HashType::Crc32 => "crc32",
            HashType::Sha1 => "sha1",
            HashType::Sha256 => "sha256",
        })
    }
}

impl FromStr for HashType {
    type Err = OrbError;

    fn from_str(s: &str) -> OrbResult<Self> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(HashType::None),
            "crc32" => Ok(HashType::Crc32),
            "sha1" => Ok(HashType::Sha1),
            "sha256" => Ok(HashType::Sha256),
            _ => Err(OrbError::InvalidArgument(format!(
                "unknown hash type {s:?} (expected none, crc32, sha1 or sha256)"
            ))),
        }
    }
}

/// An in-progress hash, from [`HashType::hasher()`]
#[derive(Clone)]
pub enum Hasher {
    None,
    Crc32(crc32fast::Hasher),
    Sha1(Sha1),
    Sha256(Sha256),
}

impl Hasher {
    pub fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::None => {}
            Hasher::Crc32(h) => h.update(data),
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
        }
    }

    /// Consumes the hasher, returning the digest in its on-disk byte order.
    pub fn finalize(self) -> Vec<u8> {
        match self {
            Hasher::None => Vec::new(),
            Hasher::Crc32(h) => h.finalize().to_le_bytes().to_vec(),
            Hasher::Sha1(h) => h.finalize().to_vec(),
            Hasher::Sha256(h) => h.finalize().to_vec(),
        }
    }
}
