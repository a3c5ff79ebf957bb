//! orbpak reads and writes ORBPAK archives: single files that bundle
//! a set of named blobs (configuration, JSON, binary assets)
//! for an application to load at startup.
//!
//! ```no_run
//! # use orbpak::*;
//! // Pack a couple of files...
//! let options = Options::COMPRESSED | Options::MANIFEST_HASH;
//! let mut builder = OrbBuilder::new(options, HashType::Sha256);
//! builder.add_entry("resources.json", &std::fs::read("resources.json")?)?;
//! builder.add_entry("settings.json", &std::fs::read("settings.json")?)?;
//! builder.save_to_path("data.orbpak")?;
//!
//! // ...and read them back.
//! let mut archive = OrbArchive::open_path("data.orbpak")?;
//! archive.verify_manifest()?;
//! for path in archive.files() {
//!     println!("{path}");
//! }
//! let settings = archive.read_to_string("settings.json")?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! An archive is a fixed header, an index of fixed-size entries,
//! each entry's bytes, and optionally a manifest hash:
//!
//! - Each entry can be DEFLATE-compressed, independently of the others
//!   (there's no shared dictionary).
//!
//! - Each entry can carry a CRC32, SHA-1, or SHA-256 hash of its stored bytes,
//!   checked every time the entry is read.
//!
//! - The manifest hash covers the index and every entry's bytes, so it also
//!   catches edits to the index that leave each entry's own hash intact.
//!   It's only checked on request, with [`OrbArchive::verify_manifest()`].
//!
//! Archives are written once with [`OrbBuilder`] and never modified afterwards.
//! The format has no directories, timestamps, permissions, or encryption.
//!
//! [`OrbArchive::verify_manifest()`]: read/struct.OrbArchive.html#method.verify_manifest
//! [`OrbBuilder`]: write/struct.OrbBuilder.html

pub mod hash;
pub mod read;
pub mod result;
pub mod write;

pub use format::{
    index_entry_size, Options, FILENAME_BYTES, HEADER_SIZE, INDEX_ENTRY_FIXED_SIZE, MAGIC,
    MIN_SUPPORTED_VERSION, VERSION,
};
pub use hash::HashType;
pub use read::{EntryMetadata, OrbArchive};
pub use result::{OrbError, OrbResult, Tamper};
pub use write::OrbBuilder;

mod format;
mod hash_reader;
