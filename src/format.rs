//! Code specific to the ORBPAK binary layout.
//!
//! We try to keep the nitty gritty here,
//! and higher-level stuff in the [`read`] and [`write`] modules.
//! Both of them take their constants from this module,
//! since byte-for-byte compatibility with other implementations depends on them.
//!
//! ```text
//! Header (24 bytes, all integers little-endian):
//!   [0:4)   magic = "ORBP"
//!   [4:6)   spec_version (u16)
//!   [6:8)   file_count (u16)
//!   [8:12)  index_offset (u32)
//!   [12:16) options_flags (u32)
//!   [16]    hash_type (u8)
//!   [17:20) reserved (3 x u8, zero)
//!   [20:24) global_hash_offset (u32)
//!
//! Index entry (76 + hash_len bytes), repeated file_count times:
//!   [0:64)  filename, UTF-8, zero-padded/terminated
//!   [64:68) offset (u32)
//!   [68:72) length (u32)
//!   [72:76) stored_length (u32)
//!   [76:)   hash (omitted if hash_type == None)
//!
//! Payload: each entry's stored bytes, in index order.
//!
//! Manifest hash (optional): hash_len bytes at global_hash_offset,
//! covering [index_offset, global_hash_offset).
//! ```
//!
//! [`read`]: ../read/index.html
//! [`write`]: ../write/index.html

use std::borrow::Cow;
use std::ops::{BitOr, BitOrAssign};

use log::*;

use crate::hash::HashType;
use crate::read::EntryMetadata;
use crate::result::*;

/// Magic bytes at the start of every archive
pub const MAGIC: [u8; 4] = *b"ORBP";

/// The format revision this library writes
pub const VERSION: u16 = 3;

/// The oldest format revision this library reads
pub const MIN_SUPPORTED_VERSION: u16 = 3;

/// Size of the fixed header in bytes
pub const HEADER_SIZE: usize = 24;

/// Width of the zero-terminated filename field in each index entry.
/// Names can use at most `FILENAME_BYTES - 1` bytes of UTF-8.
pub const FILENAME_BYTES: usize = 64;

/// Size of an index entry, not counting its (variable-size) hash
pub const INDEX_ENTRY_FIXED_SIZE: usize = FILENAME_BYTES + 3 * std::mem::size_of::<u32>();

/// Size of a whole index entry for the given hash type
pub fn index_entry_size(hash_type: HashType) -> usize {
    INDEX_ENTRY_FIXED_SIZE + hash_type.len()
}

/// Archive-wide option flags, stored in the header as a u32 bitset.
///
/// Only [`Options::COMPRESSED`] and [`Options::MANIFEST_HASH`] change how
/// archives are written and read. The reserved flags are stored verbatim
/// and otherwise ignored.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Default)]
pub struct Options(u32);

impl Options {
    pub const NONE: Options = Options(0);
    /// Every entry is DEFLATE-compressed.
    pub const COMPRESSED: Options = Options(1 << 0);
    /// Reserved
    pub const ENCRYPTED: Options = Options(1 << 1);
    /// Reserved
    pub const DEV_METADATA: Options = Options(1 << 2);
    /// A manifest hash follows the payload region.
    pub const MANIFEST_HASH: Options = Options(1 << 3);
    /// Reserved for loader policy
    pub const MOD_OVERRIDE: Options = Options(1 << 4);

    pub const fn from_bits(bits: u32) -> Self {
        Options(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Returns true if every flag set in `other` is also set in `self`.
    pub const fn contains(self, other: Options) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for Options {
    type Output = Options;

    fn bitor(self, rhs: Options) -> Options {
        Options(self.0 | rhs.0)
    }
}

impl BitOrAssign for Options {
    fn bitor_assign(&mut self, rhs: Options) {
        self.0 |= rhs.0;
    }
}

// Straight from the Rust docs:

/// Reads a little-endian u32 from the front of the provided slice, shrinking it.
fn read_u32(input: &mut &[u8]) -> u32 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u32>());
    *input = rest;
    u32::from_le_bytes(int_bytes.try_into().expect("less than four bytes for u32"))
}

/// Reads a little-endian u16 from the front of the provided slice, shrinking it.
fn read_u16(input: &mut &[u8]) -> u16 {
    let (int_bytes, rest) = input.split_at(std::mem::size_of::<u16>());
    *input = rest;
    u16::from_le_bytes(int_bytes.try_into().expect("less than two bytes for u16"))
}

/// The fixed-size header at the front of every archive
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub spec_version: u16,
    pub file_count: u16,
    pub index_offset: u32,
    pub options: Options,
    pub hash_type: HashType,
    /// Zero unless the archive carries a manifest hash
    pub global_hash_offset: u32,
}

impl Header {
    pub fn parse(mut header: &[u8]) -> OrbResult<Self> {
        if header.len() < HEADER_SIZE {
            return Err(OrbError::MalformedHeader("truncated header"));
        }
        if header[..4] != MAGIC {
            return Err(OrbError::MalformedHeader("invalid ORBPAK magic"));
        }
        header = &header[4..];
        let spec_version = read_u16(&mut header);
        // Later revisions may reinterpret any of the fields below,
        // so only accept the ones we know.
        if !(MIN_SUPPORTED_VERSION..=VERSION).contains(&spec_version) {
            return Err(OrbError::UnsupportedVersion(spec_version));
        }
        let file_count = read_u16(&mut header);
        let index_offset = read_u32(&mut header);
        let options = Options::from_bits(read_u32(&mut header));
        let hash_type = HashType::from_u8(header[0])?;
        let reserved = &header[1..4];
        if reserved != [0, 0, 0] {
            warn!("Non-zero reserved header bytes {:?}", reserved);
        }
        header = &header[4..];
        let global_hash_offset = read_u32(&mut header);

        if (index_offset as usize) < HEADER_SIZE {
            return Err(OrbError::MalformedHeader("index overlaps the header"));
        }

        Ok(Self {
            spec_version,
            file_count,
            index_offset,
            options,
            hash_type,
            global_hash_offset,
        })
    }

    pub fn write(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        buf[0..4].copy_from_slice(&MAGIC);
        buf[4..6].copy_from_slice(&self.spec_version.to_le_bytes());
        buf[6..8].copy_from_slice(&self.file_count.to_le_bytes());
        buf[8..12].copy_from_slice(&self.index_offset.to_le_bytes());
        buf[12..16].copy_from_slice(&self.options.bits().to_le_bytes());
        buf[16] = self.hash_type as u8;
        // [17..20) stays zeroed.
        buf[20..24].copy_from_slice(&self.global_hash_offset.to_le_bytes());
        buf
    }
}

impl EntryMetadata {
    /// Parses an index entry from the front of `entry`, shrinking it.
    ///
    /// The caller makes sure `entry` holds at least
    /// [`index_entry_size(hash_type)`](index_entry_size) bytes.
    pub(crate) fn parse_and_consume(entry: &mut &[u8], hash_type: HashType) -> Self {
        let (name_field, remaining) = entry.split_at(FILENAME_BYTES);
        *entry = remaining;
        let name_len = memchr::memchr(0, name_field).unwrap_or(FILENAME_BYTES);
        let path = match String::from_utf8_lossy(&name_field[..name_len]) {
            Cow::Borrowed(s) => s.to_owned(),
            Cow::Owned(s) => {
                warn!("Entry name {s:?} isn't valid UTF-8");
                s
            }
        };

        let offset = read_u32(entry);
        let length = read_u32(entry);
        let stored_length = read_u32(entry);
        let (hash, remaining) = entry.split_at(hash_type.len());
        *entry = remaining;

        Self {
            path,
            offset,
            length,
            stored_length,
            hash: hash.to_vec(),
        }
    }

    /// Appends the on-disk form of the entry to `out`.
    pub(crate) fn write(&self, out: &mut Vec<u8>, hash_type: HashType) -> OrbResult<()> {
        let name = self.path.as_bytes();
        if name.len() >= FILENAME_BYTES {
            return Err(OrbError::InvalidArgument(format!(
                "entry name {} is longer than {} bytes",
                self.path,
                FILENAME_BYTES - 1
            )));
        }
        if self.hash.len() != hash_type.len() {
            return Err(OrbError::InvalidArgument(format!(
                "hash length mismatch for {} (expected {}, got {})",
                self.path,
                hash_type.len(),
                self.hash.len()
            )));
        }

        let mut name_field = [0u8; FILENAME_BYTES];
        name_field[..name.len()].copy_from_slice(name);
        out.extend_from_slice(&name_field);
        out.extend_from_slice(&self.offset.to_le_bytes());
        out.extend_from_slice(&self.length.to_le_bytes());
        out.extend_from_slice(&self.stored_length.to_le_bytes());
        out.extend_from_slice(&self.hash);
        Ok(())
    }
}
