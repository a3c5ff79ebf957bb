//! Error types and the related `Result<T>`

use std::fmt;

use thiserror::Error;

pub type OrbResult<T> = Result<T, OrbError>;

#[derive(Debug, Error)]
pub enum OrbError {
    /// An error from underlying I/O
    #[error("I/O Error")]
    Io(#[from] std::io::Error),

    /// The first bytes of the source aren't an ORBPAK header:
    /// too short, or the magic doesn't match.
    #[error("Malformed ORBPAK header: {0}")]
    MalformedHeader(&'static str),

    /// The archive was written by a format revision this library can't read.
    #[error("Unsupported ORBPAK version {0}")]
    UnsupportedVersion(u16),

    /// An entry wasn't found at the provided path
    #[error("No entry in the archive with the path {0}")]
    NotFound(String),

    /// A stored hash didn't match the bytes it covers.
    #[error("ORBPAK {0} (archive tampered or corrupted)")]
    TamperedData(Tamper),

    /// Lengths or offsets in the archive disagree with its contents.
    #[error("Invalid ORBPAK data: {0}")]
    InvalidData(String),

    /// The operation can't be performed on this archive or stream.
    #[error("Invalid operation: {0}")]
    InvalidOperation(&'static str),

    /// A caller-provided value (not one from an archive) was invalid.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The archive uses a feature this library doesn't know about
    #[error("Unsupported ORBPAK archive: {0}")]
    Unsupported(String),

    /// Decoding UTF-8 entry contents failed
    #[error("Invalid UTF-8")]
    Encoding(#[from] std::str::Utf8Error),

    /// The archive would overflow one of the format's fixed-width fields
    /// (u16 entry count, u32 offsets and lengths).
    #[error("Archive too large: {0}")]
    TooLarge(&'static str),
}

/// What a [`OrbError::TamperedData`] caught.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Tamper {
    /// The stored bytes of the named entry don't match its index hash.
    Entry(String),
    /// The index and payload region don't match the manifest hash.
    Manifest,
}

impl fmt::Display for Tamper {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Tamper::Entry(path) => write!(f, "entry hash mismatch for {path}"),
            Tamper::Manifest => f.write_str("manifest hash mismatch"),
        }
    }
}
