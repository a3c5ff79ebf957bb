//! Tools for writing an ORBPAK archive.
//!
//! Entries are collected in memory by an [`OrbBuilder`],
//! then laid out and written in one go by [`OrbBuilder::save()`].
//! Archives are immutable once saved; there's no appending.
//!
//! ```
//! # use orbpak::*;
//! let options = Options::COMPRESSED | Options::MANIFEST_HASH;
//! let mut builder = OrbBuilder::new(options, HashType::Sha256);
//! builder.add_entry("cfg/settings.json", br#"{"volume":3}"#)?;
//! builder.add_entry(r"bin\blob.bin", &[1, 2, 3])?;
//! let bytes = builder.to_bytes()?;
//!
//! let mut archive = OrbArchive::from_bytes(&bytes)?;
//! assert_eq!(archive.read("bin/blob.bin")?, [1, 2, 3]);
//! archive.verify_manifest()?;
//! # Ok::<(), OrbError>(())
//! ```
//!
//! [`OrbBuilder`]: struct.OrbBuilder.html
//! [`OrbBuilder::save()`]: struct.OrbBuilder.html#method.save

use std::fs::File;
use std::io::{self, prelude::*, Cursor};
use std::path::Path;

use flate2::write::DeflateEncoder;
use flate2::Compression;
use log::*;

use crate::format::{self, Header, Options, FILENAME_BYTES, HEADER_SIZE, VERSION};
use crate::hash::HashType;
use crate::read::EntryMetadata;
use crate::result::*;

/// An entry waiting to be written
struct PendingEntry {
    path: String,
    length: u32,
    stored: Vec<u8>,
    hash: Vec<u8>,
}

/// Accumulates entries for a new archive.
pub struct OrbBuilder {
    options: Options,
    hash_type: HashType,
    level: Compression,
    entries: Vec<PendingEntry>,
}

impl OrbBuilder {
    /// Creates a builder for an archive with the given options and hash type.
    ///
    /// With [`Options::COMPRESSED`], each entry is DEFLATEd on its own at the
    /// best compression level. With [`Options::MANIFEST_HASH`] (and a hash type
    /// other than `None`), the archive ends with a hash over its index and payloads.
    pub fn new(options: Options, hash_type: HashType) -> Self {
        Self {
            options,
            hash_type,
            level: Compression::best(),
            entries: Vec::new(),
        }
    }

    /// Sets the DEFLATE level for entries added from here on.
    pub fn with_compression_level(mut self, level: Compression) -> Self {
        self.level = level;
        self
    }

    pub fn options(&self) -> Options {
        self.options
    }

    pub fn hash_type(&self) -> HashType {
        self.hash_type
    }

    /// The number of entries added so far
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Adds an entry with the given path and contents.
    ///
    /// Backslashes in `path` become forward slashes.
    /// The normalized path must fit in the index's filename field
    /// (at most 63 bytes of UTF-8).
    ///
    /// Compression and hashing happen here, so `save()` is pure layout and I/O.
    pub fn add_entry(&mut self, path: &str, data: &[u8]) -> OrbResult<()> {
        let path = normalize_path(path)?;

        if self.entries.len() >= u16::MAX as usize {
            return Err(OrbError::TooLarge("more than 65535 entries"));
        }
        let length = u32::try_from(data.len())
            .map_err(|_| OrbError::TooLarge("entry larger than 4 GiB"))?;

        let stored = if self.options.contains(Options::COMPRESSED) {
            deflate(data, self.level)?
        } else {
            data.to_vec()
        };
        if u32::try_from(stored.len()).is_err() {
            return Err(OrbError::TooLarge("compressed entry larger than 4 GiB"));
        }
        // Hashes cover what's on disk, so they can be checked before decompression.
        let hash = self.hash_type.digest(&stored);
        debug!(
            "Adding {} ({} bytes, {} stored)",
            path,
            length,
            stored.len()
        );

        if self.entries.iter().any(|e| e.path == path) {
            warn!("Duplicate entry {path}; readers will only see the first one");
        }
        self.entries.push(PendingEntry {
            path,
            length,
            stored,
            hash,
        });
        Ok(())
    }

    /// Reads `input` to its end and adds the result as an entry.
    pub fn add_entry_from_reader<R: Read>(&mut self, path: &str, mut input: R) -> OrbResult<()> {
        let mut data = Vec::new();
        input.read_to_end(&mut data)?;
        self.add_entry(path, &data)
    }

    /// Returns true if the saved archive will end with a manifest hash.
    fn wants_manifest(&self) -> bool {
        self.options.contains(Options::MANIFEST_HASH) && !self.hash_type.is_empty()
    }

    /// Lays out the archive, returning its header and index entries.
    fn layout(&self) -> OrbResult<(Header, Vec<EntryMetadata>)> {
        let too_large = || OrbError::TooLarge("archive larger than 4 GiB");

        let index_len =
            self.entries.len() as u64 * format::index_entry_size(self.hash_type) as u64;
        let mut data_offset = HEADER_SIZE as u64 + index_len;

        let mut index = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            index.push(EntryMetadata {
                path: entry.path.clone(),
                offset: u32::try_from(data_offset).map_err(|_| too_large())?,
                length: entry.length,
                stored_length: entry.stored.len() as u32,
                hash: entry.hash.clone(),
            });
            data_offset += entry.stored.len() as u64;
        }

        let global_hash_offset = if self.wants_manifest() {
            let offset = u32::try_from(data_offset).map_err(|_| too_large())?;
            data_offset += self.hash_type.len() as u64;
            offset
        } else {
            0
        };
        if data_offset > u32::MAX as u64 {
            return Err(too_large());
        }

        let header = Header {
            spec_version: VERSION,
            file_count: self.entries.len() as u16,
            index_offset: HEADER_SIZE as u32,
            options: self.options,
            hash_type: self.hash_type,
            global_hash_offset,
        };
        trace!("{:?}", header);
        Ok((header, index))
    }

    /// Writes the archive to `output`.
    ///
    /// The archive starts at the output's current position,
    /// and the output is left at its end.
    /// If a manifest hash was requested, `output` must be able to seek;
    /// if it can't, this fails with [`OrbError::InvalidOperation`]
    /// before anything is written.
    /// The manifest hash is computed from the bytes being written,
    /// so `output` never needs to be readable.
    ///
    /// An interrupted save leaves a truncated archive behind.
    /// Write to a temporary file and rename it if that matters.
    pub fn save<W: Write + Seek>(&self, mut output: W) -> OrbResult<()> {
        let (header, index) = self.layout()?;

        let mut manifest = if header.global_hash_offset != 0 {
            output.stream_position().map_err(|_| {
                OrbError::InvalidOperation("output must be seekable to write the manifest hash")
            })?;
            Some(self.hash_type.hasher())
        } else {
            None
        };

        output.write_all(&header.write())?;

        let mut index_bytes =
            Vec::with_capacity(index.len() * format::index_entry_size(self.hash_type));
        for entry in &index {
            trace!("{:?}", entry);
            entry.write(&mut index_bytes, self.hash_type)?;
        }
        output.write_all(&index_bytes)?;
        if let Some(manifest) = manifest.as_mut() {
            manifest.update(&index_bytes);
        }

        for entry in &self.entries {
            output.write_all(&entry.stored)?;
            if let Some(manifest) = manifest.as_mut() {
                manifest.update(&entry.stored);
            }
        }

        // The index directly follows the header and the digest directly
        // follows the last payload, so the digest lands at global_hash_offset.
        if let Some(manifest) = manifest {
            let digest = manifest.finalize();
            debug!(
                "Manifest hash over {} bytes at {}",
                header.global_hash_offset - header.index_offset,
                header.global_hash_offset
            );
            output.write_all(&digest)?;
        }

        output.flush()?;
        Ok(())
    }

    /// Creates (or truncates) the file at `path` and saves the archive to it.
    pub fn save_to_path<P: AsRef<Path>>(&self, path: P) -> OrbResult<()> {
        self.save(File::create(path)?)
    }

    /// Saves the archive to a new buffer.
    pub fn to_bytes(&self) -> OrbResult<Vec<u8>> {
        let mut cursor = Cursor::new(Vec::new());
        self.save(&mut cursor)?;
        Ok(cursor.into_inner())
    }
}

/// Checks a caller-provided entry path and turns backslashes into forward slashes.
pub(crate) fn normalize_path(path: &str) -> OrbResult<String> {
    if path.trim().is_empty() {
        return Err(OrbError::InvalidArgument(
            "entry path is empty".to_owned(),
        ));
    }
    let normalized = path.replace('\\', "/");
    if normalized.contains('\0') {
        return Err(OrbError::InvalidArgument(format!(
            "entry path {normalized:?} contains a NUL byte"
        )));
    }
    if normalized.len() >= FILENAME_BYTES {
        return Err(OrbError::InvalidArgument(format!(
            "entry path {} is {} bytes; at most {} fit in the index",
            normalized,
            normalized.len(),
            FILENAME_BYTES - 1
        )));
    }
    Ok(normalized)
}

fn deflate(data: &[u8], level: Compression) -> io::Result<Vec<u8>> {
    let mut encoder = DeflateEncoder::new(Vec::new(), level);
    encoder.write_all(data)?;
    encoder.finish()
}
