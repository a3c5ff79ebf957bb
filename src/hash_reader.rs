//! Helper module to hash bytes as they're read

use std::io;
use std::io::prelude::*;
use std::io::SeekFrom;

use crate::hash::{HashType, Hasher};

/// Reader that hashes everything passing through it.
pub struct HashReader<R> {
    inner: R,
    hasher: Hasher,
    count: u64,
}

impl<R> HashReader<R> {
    pub fn new(inner: R, hash_type: HashType) -> HashReader<R> {
        HashReader {
            inner,
            hasher: hash_type.hasher(),
            count: 0,
        }
    }

    /// Number of bytes hashed so far
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Returns the digest of everything read so far.
    pub fn finalize(self) -> Vec<u8> {
        self.hasher.finalize()
    }
}

impl<R: Read> Read for HashReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let count = self.inner.read(buf)?;
        self.hasher.update(&buf[0..count]);
        self.count += count as u64;
        Ok(count)
    }
}

/// Hashes exactly `len` bytes of `source`, starting at `start`.
///
/// This is how the manifest hash is computed over the index and payloads.
/// Fails with `UnexpectedEof` if the source ends early.
/// The source is left positioned after the range.
pub fn hash_range<S: Read + Seek>(
    source: &mut S,
    start: u64,
    len: u64,
    hash_type: HashType,
) -> io::Result<Vec<u8>> {
    source.seek(SeekFrom::Start(start))?;
    let mut reader = HashReader::new(source.take(len), hash_type);
    io::copy(&mut reader, &mut io::sink())?;
    if reader.count() != len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("range ended {} bytes early", len - reader.count()),
        ));
    }
    Ok(reader.finalize())
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::{Cursor, Read};

    #[test]
    fn test_empty_reader() {
        let data: &[u8] = b"";
        let mut buf = [0; 1];

        let mut reader = HashReader::new(data, HashType::Sha256);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.finalize(), HashType::Sha256.digest(b""));
    }

    #[test]
    fn test_byte_by_byte() {
        let data: &[u8] = b"1234";
        let mut buf = [0; 1];

        let mut reader = HashReader::new(data, HashType::Crc32);
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        // Can keep reading 0 bytes after the end
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
        assert_eq!(reader.count(), 4);
        assert_eq!(reader.finalize(), 0x9be3e0a3u32.to_le_bytes());
    }

    #[test]
    fn test_zero_read() {
        let data: &[u8] = b"1234";
        let mut buf = [0; 5];

        let mut reader = HashReader::new(data, HashType::Sha1);
        assert_eq!(reader.read(&mut buf[..0]).unwrap(), 0);
        assert_eq!(reader.read(&mut buf).unwrap(), 4);
        assert_eq!(reader.finalize(), HashType::Sha1.digest(b"1234"));
    }

    #[test]
    fn test_range() {
        let mut source = Cursor::new(b"headerBODYtrailer".to_vec());
        let digest = hash_range(&mut source, 6, 4, HashType::Sha256).unwrap();
        assert_eq!(digest, HashType::Sha256.digest(b"BODY"));
        assert_eq!(source.position(), 10);
    }

    #[test]
    fn test_short_range() {
        let mut source = Cursor::new(b"tiny".to_vec());
        let err = hash_range(&mut source, 2, 10, HashType::Crc32).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
    }
}
