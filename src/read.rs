//! Tools for reading an ORBPAK archive.
//!
//! To start reading an archive, create an [`OrbArchive`] from anything
//! that can `Read` and `Seek`: a file, or bytes already in memory.
//!
//! Every read moves the archive's position in its source,
//! so reading takes `&mut self`. To read from several threads at once,
//! open one `OrbArchive` per thread. Archives are never modified after
//! they're written, so independent handles over the same file or buffer
//! don't interfere with each other.
//!
//! [`OrbArchive`]: struct.OrbArchive.html

use std::fs::File;
use std::io::{self, prelude::*, BufReader, Cursor, SeekFrom};
use std::path::Path;

use flate2::read::DeflateDecoder;
use log::*;

use crate::format::{self, Header, Options, HEADER_SIZE};
use crate::hash::HashType;
use crate::hash_reader::hash_range;
use crate::result::*;

/// Metadata for an entry in the archive, retrieved from its index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryMetadata {
    /// The entry's path, with forward slashes
    pub path: String,

    /// Absolute offset of the stored bytes in the archive
    pub offset: u32,

    /// Size of the entry in bytes, once decompressed
    pub length: u32,

    /// Size of the entry's bytes as stored in the archive
    /// (the same as `length` unless the archive is compressed)
    pub stored_length: u32,

    /// Hash of the stored bytes; empty if the archive doesn't use hashes
    pub hash: Vec<u8>,
}

/// An ORBPAK archive to be read
pub struct OrbArchive<R> {
    source: R,
    /// Where the archive starts in `source`
    base: u64,
    /// The length of the archive, from `base` to the end of `source`
    len: u64,
    header: Header,
    /// The archive's index, in on-disk order
    entries: Vec<EntryMetadata>,
}

impl OrbArchive<BufReader<File>> {
    /// Opens the archive at the given path.
    pub fn open_path<P: AsRef<Path>>(path: P) -> OrbResult<Self> {
        let file = File::open(path)?;
        Self::new(BufReader::new(file))
    }
}

impl<'a> OrbArchive<Cursor<&'a [u8]>> {
    /// Reads an archive from a byte slice.
    /// Smaller files can be read into a buffer; larger ones can be memory-mapped.
    ///
    /// ```no_run
    /// # use std::fs;
    /// # use orbpak::*;
    /// let bytes = fs::read("data.orbpak")?;
    /// let mut archive = OrbArchive::from_bytes(&bytes)?;
    /// let settings = archive.read_to_string("settings.json")?;
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn from_bytes(bytes: &'a [u8]) -> OrbResult<Self> {
        Self::new(Cursor::new(bytes))
    }
}

impl<R: Read + Seek> OrbArchive<R> {
    /// Reads the header and index of the archive starting at
    /// the current position of `source`.
    ///
    /// Fails if the header is malformed or from an unsupported version,
    /// so an unusable archive never gets this far.
    /// Entry contents aren't touched until they're read.
    pub fn new(mut source: R) -> OrbResult<Self> {
        let base = source.stream_position()?;

        let mut header_bytes = [0u8; HEADER_SIZE];
        match source.read_exact(&mut header_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(OrbError::MalformedHeader("truncated header"));
            }
            Err(e) => return Err(e.into()),
        }
        let header = Header::parse(&header_bytes)?;
        trace!("{:?}", header);

        let len = source.seek(SeekFrom::End(0))? - base;

        let entry_size = format::index_entry_size(header.hash_type) as u64;
        let index_len = header.file_count as u64 * entry_size;
        if header.index_offset as u64 + index_len > len {
            return Err(OrbError::InvalidData(format!(
                "index of {} entries runs past the end of the archive",
                header.file_count
            )));
        }

        source.seek(SeekFrom::Start(base + header.index_offset as u64))?;
        let mut index_bytes = vec![0u8; index_len as usize];
        source.read_exact(&mut index_bytes)?;

        let mut index = &index_bytes[..];
        let mut entries = Vec::with_capacity(header.file_count as usize);
        for _ in 0..header.file_count {
            let entry = EntryMetadata::parse_and_consume(&mut index, header.hash_type);
            trace!("{:?}", entry);
            entries.push(entry);
        }
        debug!(
            "{} entries, {:?}, {} hashes",
            entries.len(),
            header.options,
            header.hash_type
        );

        Ok(Self {
            source,
            base,
            len,
            header,
            entries,
        })
    }

    /// The format revision the archive was written with
    pub fn spec_version(&self) -> u16 {
        self.header.spec_version
    }

    pub fn options(&self) -> Options {
        self.header.options
    }

    pub fn hash_type(&self) -> HashType {
        self.header.hash_type
    }

    /// Returns the entries found in the archive's index, in order.
    pub fn entries(&self) -> &[EntryMetadata] {
        &self.entries
    }

    /// Returns the paths of the archive's entries, in order.
    pub fn files(&self) -> impl ExactSizeIterator<Item = &str> + '_ {
        self.entries.iter().map(|e| e.path.as_str())
    }

    /// Looks up an entry by path.
    ///
    /// Backslashes in `path` are treated as forward slashes,
    /// same as when the archive was built. Matching is exact and case-sensitive.
    pub fn lookup(&self, path: &str) -> OrbResult<&EntryMetadata> {
        let normalized = path.replace('\\', "/");
        self.entries
            .iter()
            .find(|e| e.path == normalized)
            .ok_or_else(|| OrbError::NotFound(path.to_owned()))
    }

    /// Returns the bytes of the given entry exactly as stored:
    /// still compressed, with no hash check.
    pub fn read_stored(&mut self, path: &str) -> OrbResult<Vec<u8>> {
        let entry = self.lookup(path)?.clone();
        self.read_entry_stored(&entry)
    }

    fn read_entry_stored(&mut self, entry: &EntryMetadata) -> OrbResult<Vec<u8>> {
        if entry.offset as u64 + entry.stored_length as u64 > self.len {
            return Err(OrbError::InvalidData(format!(
                "{} runs past the end of the archive",
                entry.path
            )));
        }
        debug!("Reading {:?}", entry);
        self.source
            .seek(SeekFrom::Start(self.base + entry.offset as u64))?;
        let mut stored = vec![0u8; entry.stored_length as usize];
        self.source.read_exact(&mut stored)?;
        Ok(stored)
    }

    /// Reads the given entry, checking its hash and decompressing it if needed.
    ///
    /// The hash is checked before decompression,
    /// so a tampered entry never reaches the decompressor.
    pub fn read(&mut self, path: &str) -> OrbResult<Vec<u8>> {
        let entry = self.lookup(path)?.clone();
        let stored = self.read_entry_stored(&entry)?;

        let hash_type = self.header.hash_type;
        if !hash_type.is_empty() && hash_type.digest(&stored) != entry.hash {
            return Err(OrbError::TamperedData(Tamper::Entry(entry.path)));
        }

        if !self.header.options.contains(Options::COMPRESSED) {
            if stored.len() != entry.length as usize {
                return Err(OrbError::InvalidData(format!(
                    "length mismatch for {} (index says {}, stored {})",
                    entry.path,
                    entry.length,
                    stored.len()
                )));
            }
            return Ok(stored);
        }

        // The index's lengths aren't covered by the entry hash,
        // so don't allocate up front on their say-so.
        // One byte past the expected length is enough to know it's wrong.
        let mut decompressed = Vec::new();
        DeflateDecoder::new(&stored[..])
            .take(entry.length as u64 + 1)
            .read_to_end(&mut decompressed)
            .map_err(|e| {
                OrbError::InvalidData(format!("couldn't decompress {}: {}", entry.path, e))
            })?;
        if decompressed.len() != entry.length as usize {
            return Err(OrbError::InvalidData(format!(
                "length mismatch after decompression for {} (index says {}, got {}{})",
                entry.path,
                entry.length,
                decompressed.len(),
                if decompressed.len() > entry.length as usize {
                    " or more"
                } else {
                    ""
                }
            )));
        }
        Ok(decompressed)
    }

    /// Reads the given entry (see [`read()`](#method.read)) as UTF-8 text.
    pub fn read_to_string(&mut self, path: &str) -> OrbResult<String> {
        let bytes = self.read(path)?;
        String::from_utf8(bytes).map_err(|e| OrbError::Encoding(e.utf8_error()))
    }

    /// Checks the manifest hash against the archive's index and payloads.
    ///
    /// Fails with [`OrbError::InvalidOperation`] if the archive wasn't built
    /// with a manifest hash, doesn't use hashes at all,
    /// or its source turns out not to support seeking.
    /// Fails with [`OrbError::TamperedData`] if the hash doesn't match.
    ///
    /// This is independent from the per-entry hashes checked by `read()`:
    /// an edit to the index can leave every entry's own hash intact
    /// but still breaks the manifest.
    pub fn verify_manifest(&mut self) -> OrbResult<()> {
        if !self.header.options.contains(Options::MANIFEST_HASH) {
            return Err(OrbError::InvalidOperation("archive has no manifest hash"));
        }
        let hash_type = self.header.hash_type;
        if hash_type.is_empty() {
            return Err(OrbError::InvalidOperation(
                "archive does not use a hash type",
            ));
        }
        self.source.stream_position().map_err(|_| {
            OrbError::InvalidOperation("source must support seeking to verify the manifest")
        })?;

        let start = self.header.index_offset as u64;
        let end = self.header.global_hash_offset as u64;
        if end < start || end + hash_type.len() as u64 > self.len {
            return Err(OrbError::InvalidData(format!(
                "manifest hash offset {} is outside the archive",
                end
            )));
        }

        let computed = hash_range(&mut self.source, self.base + start, end - start, hash_type)?;
        self.source.seek(SeekFrom::Start(self.base + end))?;
        let mut stored = vec![0u8; hash_type.len()];
        self.source.read_exact(&mut stored)?;

        if stored != computed {
            return Err(OrbError::TamperedData(Tamper::Manifest));
        }
        debug!("Manifest hash verified over {} bytes", end - start);
        Ok(())
    }

    /// Unwraps the archive, returning its source.
    pub fn into_inner(self) -> R {
        self.source
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::write::OrbBuilder;

    fn two_entries(options: Options, hash_type: HashType) -> Vec<u8> {
        let mut builder = OrbBuilder::new(options, hash_type);
        builder.add_entry("a.txt", b"AAAA").unwrap();
        builder.add_entry("b.txt", b"BBBB").unwrap();
        builder.to_bytes().unwrap()
    }

    #[test]
    fn plain_archive() {
        let bytes = two_entries(Options::NONE, HashType::None);
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        assert_eq!(archive.spec_version(), format::VERSION);
        assert_eq!(archive.files().collect::<Vec<_>>(), ["a.txt", "b.txt"]);
        assert_eq!(archive.read("a.txt").unwrap(), b"AAAA");
        assert_eq!(archive.read_to_string("b.txt").unwrap(), "BBBB");
        assert!(archive.entries().iter().all(|e| e.hash.is_empty()));
    }

    #[test]
    fn lookup_normalizes() {
        let mut builder = OrbBuilder::new(Options::NONE, HashType::Crc32);
        builder.add_entry(r"bin\blob.bin", &[1, 2, 3]).unwrap();
        let bytes = builder.to_bytes().unwrap();

        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        assert_eq!(archive.files().collect::<Vec<_>>(), ["bin/blob.bin"]);
        assert_eq!(archive.read("bin/blob.bin").unwrap(), [1, 2, 3]);
        assert_eq!(archive.read(r"bin\blob.bin").unwrap(), [1, 2, 3]);
    }

    #[test]
    fn lookup_is_exact() {
        let bytes = two_entries(Options::NONE, HashType::None);
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        for missing in ["A.txt", "a.tx", "/a.txt", "c.txt"] {
            match archive.read(missing) {
                Err(OrbError::NotFound(p)) => assert_eq!(p, missing),
                other => panic!("Expected {} to be missing, got {:?}", missing, other),
            }
        }
        assert!(matches!(
            archive.read_stored("c.txt"),
            Err(OrbError::NotFound(_))
        ));
    }

    #[test]
    fn read_stored_skips_decompression() {
        let data = vec![7u8; 2048];
        let mut builder = OrbBuilder::new(Options::COMPRESSED, HashType::Sha1);
        builder.add_entry("sevens", &data).unwrap();
        let bytes = builder.to_bytes().unwrap();

        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        let stored = archive.read_stored("sevens").unwrap();
        let entry = archive.lookup("sevens").unwrap();
        assert_eq!(stored.len(), entry.stored_length as usize);
        assert_eq!(entry.length, 2048);
        assert_eq!(HashType::Sha1.digest(&stored), entry.hash);
        assert_eq!(archive.read("sevens").unwrap(), data);
    }

    #[test]
    fn empty_archive() {
        let bytes = OrbBuilder::new(Options::MANIFEST_HASH, HashType::Sha256)
            .to_bytes()
            .unwrap();
        assert_eq!(bytes.len(), HEADER_SIZE + 32);
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        assert_eq!(archive.files().len(), 0);
        archive.verify_manifest().unwrap();
    }

    #[test]
    fn empty_entry() {
        let mut builder = OrbBuilder::new(Options::COMPRESSED, HashType::Crc32);
        builder.add_entry("empty", b"").unwrap();
        let bytes = builder.to_bytes().unwrap();
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        assert!(archive.read("empty").unwrap().is_empty());
    }

    #[test]
    fn truncated_header() {
        let bytes = two_entries(Options::NONE, HashType::None);
        for len in [0, 4, HEADER_SIZE - 1] {
            assert!(matches!(
                OrbArchive::from_bytes(&bytes[..len]),
                Err(OrbError::MalformedHeader(_))
            ));
        }
    }

    #[test]
    fn truncated_index() {
        let bytes = two_entries(Options::NONE, HashType::Sha256);
        assert!(matches!(
            OrbArchive::from_bytes(&bytes[..HEADER_SIZE + 10]),
            Err(OrbError::InvalidData(_))
        ));
    }

    #[test]
    fn truncated_payload() {
        let bytes = two_entries(Options::NONE, HashType::None);
        let mut archive = OrbArchive::from_bytes(&bytes[..bytes.len() - 2]).unwrap();
        assert_eq!(archive.read("a.txt").unwrap(), b"AAAA");
        assert!(matches!(
            archive.read("b.txt"),
            Err(OrbError::InvalidData(_))
        ));
    }

    #[test]
    fn length_mismatch() {
        let mut bytes = two_entries(Options::NONE, HashType::None);
        // Bump the first entry's declared length.
        let length_at = HEADER_SIZE + format::FILENAME_BYTES + 4;
        bytes[length_at] += 1;
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        assert!(matches!(
            archive.read("a.txt"),
            Err(OrbError::InvalidData(_))
        ));
        // The raw bytes are still there for diagnostics.
        assert_eq!(archive.read_stored("a.txt").unwrap(), b"AAAA");
    }

    #[test]
    fn decompressed_length_mismatch() {
        let mut bytes = two_entries(Options::COMPRESSED, HashType::Sha256);
        let length_at = HEADER_SIZE + format::FILENAME_BYTES + 4;
        bytes[length_at] -= 1;
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        assert!(matches!(
            archive.read("a.txt"),
            Err(OrbError::InvalidData(_))
        ));
        assert_eq!(archive.read("b.txt").unwrap(), b"BBBB");
    }

    #[test]
    fn huge_declared_length() {
        let mut bytes = two_entries(Options::COMPRESSED, HashType::Sha256);
        let length_at = HEADER_SIZE + format::FILENAME_BYTES + 4;
        bytes[length_at..length_at + 4].copy_from_slice(&u32::MAX.to_le_bytes());
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        assert_eq!(archive.lookup("a.txt").unwrap().length, u32::MAX);
        match archive.read("a.txt") {
            Err(OrbError::InvalidData(msg)) => assert!(msg.contains("length mismatch"), "{msg}"),
            other => panic!("Expected a length mismatch, got {:?}", other),
        }
        assert_eq!(archive.read("b.txt").unwrap(), b"BBBB");
    }

    #[test]
    fn corrupt_stream_without_hashes() {
        let mut builder = OrbBuilder::new(Options::COMPRESSED, HashType::None);
        builder.add_entry("x", &[0x42; 100]).unwrap();
        let mut bytes = builder.to_bytes().unwrap();
        // Nothing checks a hash first, so the decompressor sees the damage.
        // Invalid block type 3 in the first DEFLATE header:
        let payload_at = HEADER_SIZE + format::INDEX_ENTRY_FIXED_SIZE;
        bytes[payload_at] |= 0b110;
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        assert!(matches!(archive.read("x"), Err(OrbError::InvalidData(_))));
    }

    #[test]
    fn read_to_string_rejects_binary() {
        let mut builder = OrbBuilder::new(Options::NONE, HashType::None);
        builder.add_entry("bin", &[0xC3, 0x28]).unwrap();
        let bytes = builder.to_bytes().unwrap();
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        assert!(matches!(
            archive.read_to_string("bin"),
            Err(OrbError::Encoding(_))
        ));
    }

    #[test]
    fn manifest_preconditions() {
        let bytes = two_entries(Options::COMPRESSED, HashType::Sha256);
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        match archive.verify_manifest() {
            Err(OrbError::InvalidOperation(msg)) => assert!(msg.contains("no manifest")),
            other => panic!("Expected an invalid operation, got {:?}", other),
        }

        let bytes = two_entries(Options::MANIFEST_HASH, HashType::None);
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        assert!(matches!(
            archive.verify_manifest(),
            Err(OrbError::InvalidOperation(_))
        ));
    }

    #[test]
    fn manifest_offset_out_of_range() {
        let mut bytes = two_entries(Options::MANIFEST_HASH, HashType::Crc32);
        bytes[20..24].copy_from_slice(&u32::MAX.to_le_bytes());
        let mut archive = OrbArchive::from_bytes(&bytes).unwrap();
        assert!(matches!(
            archive.verify_manifest(),
            Err(OrbError::InvalidData(_))
        ));
    }

    #[test]
    fn archive_after_prefix() {
        let archive_bytes = two_entries(Options::MANIFEST_HASH, HashType::Sha1);
        let mut bytes = b"some other data".to_vec();
        let prefix_len = bytes.len() as u64;
        bytes.extend_from_slice(&archive_bytes);

        let mut cursor = Cursor::new(&bytes[..]);
        cursor.set_position(prefix_len);
        let mut archive = OrbArchive::new(cursor).unwrap();
        assert_eq!(archive.read("b.txt").unwrap(), b"BBBB");
        archive.verify_manifest().unwrap();
    }
}
