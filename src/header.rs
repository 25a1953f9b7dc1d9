//! ISOBMFF box headers.
use std::fmt;
use std::io::{Read, Seek};
use std::str::FromStr;

use byteorder::{BigEndian, ByteOrder};

use crate::error::{Error, Result};
use crate::source::BoxSource;

/// Four-character box type tag.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct FourCC(pub [u8; 4]);

impl FourCC {
    pub const PSSH: FourCC = FourCC(*b"pssh");
    pub const FTYP: FourCC = FourCC(*b"ftyp");
    pub const MOOV: FourCC = FourCC(*b"moov");
    pub const MOOF: FourCC = FourCC(*b"moof");
    pub const MDAT: FourCC = FourCC(*b"mdat");
    pub const FREE: FourCC = FourCC(*b"free");

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl From<[u8; 4]> for FourCC {
    fn from(bytes: [u8; 4]) -> Self {
        FourCC(bytes)
    }
}

impl FromStr for FourCC {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| Error::InvalidPssh(format!("Box type must be 4 bytes: {:?}", s)))?;
        Ok(FourCC(bytes))
    }
}

// Printable tags render as "moov", anything else as hex.
impl fmt::Display for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.0.iter().all(|c| (32..=126).contains(c)) {
            let s: String = self.0.iter().map(|&c| c as char).collect();
            write!(f, "\"{}\"", s)
        } else {
            write!(f, "0x{:08x}", u32::from_be_bytes(self.0))
        }
    }
}

impl fmt::Debug for FourCC {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

/// Size and type of one box.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoxHeader {
    /// Offset of the first header byte in the stream.
    pub offset: u64,
    /// Total box size in bytes, header included. `None` only for a box
    /// that runs to the end of a stream whose length is unknown.
    pub size: Option<u64>,
    pub box_type: FourCC,
    /// 8, or 16 when a 64-bit size follows the type tag.
    pub header_length: u8,
    /// The header declared size 0: the box runs to end of stream.
    pub extends_to_end: bool,
}

impl BoxHeader {
    /// Number of bytes following the header, if known.
    pub fn payload_len(&self) -> Option<u64> {
        self.size.map(|size| size - u64::from(self.header_length))
    }
}

/// Read one box header from the current position.
///
/// Returns `Ok(None)` when the source is exactly at end of stream. A header
/// cut off partway is [`Error::TruncatedInput`]. On success the source has
/// advanced by `header_length` bytes. A size of 0 is resolved against the
/// stream length when the source knows it.
pub fn read_header<R: Read + Seek>(source: &mut BoxSource<R>) -> Result<Option<BoxHeader>> {
    let offset = source.offset();
    let Some(prefix) = source.read_array_or_eof::<8>()? else {
        return Ok(None);
    };
    let size32 = BigEndian::read_u32(&prefix[..4]);
    let box_type = FourCC([prefix[4], prefix[5], prefix[6], prefix[7]]);

    let (size, header_length, extends_to_end) = match size32 {
        0 => (source.left()?.map(|left| 8 + left), 8u8, true),
        1 => (Some(source.read_u64()?), 16u8, false),
        n => (Some(u64::from(n)), 8u8, false),
    };

    if let Some(size) = size.filter(|&size| size < u64::from(header_length)) {
        return Err(Error::InvalidBoxSize {
            offset,
            box_type,
            size,
            header_length,
        });
    }

    Ok(Some(BoxHeader {
        offset,
        size,
        box_type,
        header_length,
        extends_to_end,
    }))
}
