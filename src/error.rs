//! Error types for psshscan.

use thiserror::Error;

use crate::header::FourCC;

/// Main error type for box scanning and PSSH decoding.
///
/// Every variant raised while reading a stream carries the absolute byte
/// offset at which the problem was detected.
#[derive(Debug, Error)]
pub enum Error {
    /// The underlying reader failed.
    #[error("IO error at offset {offset}: {source}")]
    Io {
        offset: u64,
        #[source]
        source: std::io::Error,
    },

    /// Fewer bytes are left in the stream than a field requires.
    #[error("Truncated input at offset {offset}: needed {needed} bytes, {available} available")]
    TruncatedInput {
        offset: u64,
        needed: u64,
        available: u64,
    },

    /// A box header declares a size too small to hold the header itself.
    #[error("Invalid size {size} for box {box_type} at offset {offset} (header is {header_length} bytes)")]
    InvalidBoxSize {
        offset: u64,
        box_type: FourCC,
        size: u64,
        header_length: u8,
    },

    /// The PSSH fields do not add up to the enclosing box's payload length.
    #[error("Inconsistent PSSH length at offset {offset}: box payload is {expected} bytes, fields need {actual}")]
    InconsistentPsshLength {
        offset: u64,
        expected: u64,
        actual: u64,
    },

    /// A standalone box was expected to be a PSSH box but is not.
    #[error("Not a PSSH box: {box_type}")]
    NotPssh { box_type: FourCC },

    /// A PSSH box could not be constructed from the given fields.
    #[error("Invalid PSSH box: {0}")]
    InvalidPssh(String),

    /// Base64 decode error.
    #[error("Base64 decode error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),
}

impl Error {
    /// Byte offset in the scanned stream where the error occurred, if any.
    pub fn offset(&self) -> Option<u64> {
        match self {
            Error::Io { offset, .. }
            | Error::TruncatedInput { offset, .. }
            | Error::InvalidBoxSize { offset, .. }
            | Error::InconsistentPsshLength { offset, .. } => Some(*offset),
            Error::NotPssh { .. } | Error::InvalidPssh(_) | Error::Base64DecodeError(_) => None,
        }
    }
}

/// Result type alias for psshscan operations.
pub type Result<T> = std::result::Result<T, Error>;
