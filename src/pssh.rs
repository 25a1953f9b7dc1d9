//! PSSH box decoding and serialization.
//!
//! Box layout (ISO/IEC 23001-7):
//!
//! ```text
//! version u8 | flags u24 | system_id [u8; 16]
//! [ kid_count u32 | kid_count * [u8; 16] ]   (version > 0)
//! data_size u32 | data [u8; data_size]
//! ```
use std::io::{Cursor, Read, Seek};
use std::str::FromStr;

use base64::Engine;
use log::warn;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::header::{read_header, FourCC};
use crate::source::BoxSource;

/// Known DRM system IDs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SystemId {
    Widevine,
    PlayReady,
    FairPlay,
    /// W3C Common PSSH box format, used by ClearKey.
    Common,
}

impl SystemId {
    pub fn to_uuid(self) -> Uuid {
        match self {
            SystemId::Widevine => Uuid::from_u128(0xedef8ba979d64acea3c827dcd51d21ed),
            SystemId::PlayReady => Uuid::from_u128(0x9a04f07998404286ab92e65be0885f95),
            SystemId::FairPlay => Uuid::from_u128(0x94ce86fb07ff4f43adb893d2fa968ca2),
            SystemId::Common => Uuid::from_u128(0x1077efecc0b24d02ace33c1e52e2fb4b),
        }
    }

    pub fn from_uuid(uuid: &Uuid) -> Option<Self> {
        [
            SystemId::Widevine,
            SystemId::PlayReady,
            SystemId::FairPlay,
            SystemId::Common,
        ]
        .into_iter()
        .find(|id| id.to_uuid() == *uuid)
    }

    pub fn name(self) -> &'static str {
        match self {
            SystemId::Widevine => "Widevine",
            SystemId::PlayReady => "PlayReady",
            SystemId::FairPlay => "FairPlay",
            SystemId::Common => "Common (ClearKey)",
        }
    }
}

/// Decoded PSSH box.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PsshBox {
    pub version: u8,
    /// 24-bit flags field. Reserved; kept as found.
    pub flags: u32,
    pub system_id: Uuid,
    /// Key IDs, in file order. Empty for version 0.
    pub key_ids: Vec<Uuid>,
    /// Scheme-specific init data, uninterpreted.
    pub data: Vec<u8>,
}

impl PsshBox {
    /// Create a new PSSH box.
    ///
    /// Version 0 boxes cannot carry key IDs.
    pub fn new(system_id: Uuid, key_ids: Vec<Uuid>, data: Vec<u8>, version: u8) -> Result<Self> {
        if version != 0 && version != 1 {
            return Err(Error::InvalidPssh(format!("Invalid version: {}", version)));
        }

        if version == 0 && !key_ids.is_empty() {
            return Err(Error::InvalidPssh(
                "Version 0 PSSH boxes cannot list key IDs".to_string(),
            ));
        }

        Ok(Self {
            version,
            flags: 0,
            system_id,
            key_ids,
            data,
        })
    }

    /// The DRM scheme this box targets, if it is a well-known one.
    pub fn known_system(&self) -> Option<SystemId> {
        SystemId::from_uuid(&self.system_id)
    }

    /// Parse one complete PSSH box, header included.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.is_empty() {
            return Err(Error::InvalidPssh("Data must not be empty".to_string()));
        }

        let mut source = BoxSource::new(Cursor::new(data));
        let header = read_header(&mut source)?
            .ok_or_else(|| Error::InvalidPssh("Data must not be empty".to_string()))?;
        if header.box_type != FourCC::PSSH {
            return Err(Error::NotPssh {
                box_type: header.box_type,
            });
        }

        let pssh = match header.payload_len() {
            Some(payload_len) => decode_pssh(&mut source, payload_len)?,
            None => decode_pssh_to_end(&mut source)?,
        };

        if source.left()?.unwrap_or(0) != 0 {
            return Err(Error::InconsistentPsshLength {
                offset: 0,
                expected: header.size.unwrap_or(0),
                actual: data.len() as u64,
            });
        }
        Ok(pssh)
    }

    /// Parse one complete base64-encoded PSSH box.
    pub fn from_base64(data_b64: &str) -> Result<Self> {
        let data = base64::engine::general_purpose::STANDARD.decode(data_b64.trim())?;
        Self::from_bytes(&data)
    }

    /// Serialize as a full PSSH box.
    ///
    /// Boxes larger than 4 GiB get a 64-bit size header. Fails if a field
    /// cannot be represented: flags wider than 24 bits, more than
    /// `u32::MAX` key IDs or init data, or key IDs on a version 0 box.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        if self.flags > 0x00ff_ffff {
            return Err(Error::InvalidPssh(format!(
                "Flags do not fit in 24 bits: {:#x}",
                self.flags
            )));
        }
        if self.version == 0 && !self.key_ids.is_empty() {
            return Err(Error::InvalidPssh(
                "Version 0 PSSH boxes cannot list key IDs".to_string(),
            ));
        }
        let data_size = u32::try_from(self.data.len())
            .map_err(|_| Error::InvalidPssh(format!("Init data too large: {} bytes", self.data.len())))?;

        let mut body = Vec::new();
        body.push(self.version);
        body.extend_from_slice(&self.flags.to_be_bytes()[1..]);
        body.extend_from_slice(self.system_id.as_bytes());

        if self.version > 0 {
            let kid_count = u32::try_from(self.key_ids.len())
                .map_err(|_| Error::InvalidPssh(format!("Too many key IDs: {}", self.key_ids.len())))?;
            body.extend_from_slice(&kid_count.to_be_bytes());
            for kid in self.key_ids.iter() {
                body.extend_from_slice(kid.as_bytes());
            }
        }

        body.extend_from_slice(&data_size.to_be_bytes());
        body.extend_from_slice(&self.data);

        let mut out = box_header(FourCC::PSSH, body.len() as u64);
        out.extend_from_slice(&body);
        Ok(out)
    }

    /// Serialize as a base64 PSSH box, the form used in DASH manifests and
    /// license requests.
    pub fn to_base64(&self) -> Result<String> {
        Ok(base64::engine::general_purpose::STANDARD.encode(self.to_bytes()?))
    }
}

// 32-bit size when the box fits, otherwise size32 = 1 and a 64-bit size.
fn box_header(box_type: FourCC, payload_len: u64) -> Vec<u8> {
    let mut out = Vec::with_capacity(16);
    match u32::try_from(payload_len + 8) {
        Ok(size) => {
            out.extend_from_slice(&size.to_be_bytes());
            out.extend_from_slice(box_type.as_bytes());
        }
        Err(_) => {
            out.extend_from_slice(&1u32.to_be_bytes());
            out.extend_from_slice(box_type.as_bytes());
            out.extend_from_slice(&(payload_len + 16).to_be_bytes());
        }
    }
    out
}

impl FromStr for PsshBox {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        PsshBox::from_base64(s)
    }
}

// Fail if the fields read so far would not fit in the box payload.
fn fits(offset: u64, payload_length: u64, consumed: u64) -> Result<()> {
    if consumed > payload_length {
        return Err(Error::InconsistentPsshLength {
            offset,
            expected: payload_length,
            actual: consumed,
        });
    }
    Ok(())
}

/// Decode a PSSH payload of `payload_length` bytes.
///
/// The source must be positioned just after a `pssh` box header. On success
/// exactly `payload_length` bytes have been consumed. Length errors carry the
/// offset of the payload start.
pub fn decode_pssh<R: Read + Seek>(
    source: &mut BoxSource<R>,
    payload_length: u64,
) -> Result<PsshBox> {
    let offset = source.offset();
    let mut consumed = 4u64;

    fits(offset, payload_length, consumed)?;
    let version = source.read_u8()?;
    let [f0, f1, f2] = source.read_array::<3>()?;
    let flags = u32::from_be_bytes([0, f0, f1, f2]);
    if flags != 0 {
        warn!("PSSH box at offset {} has non-zero flags {:#08x}", offset, flags);
    }

    consumed += 16;
    fits(offset, payload_length, consumed)?;
    let system_id = Uuid::from_bytes(source.read_array::<16>()?);

    let mut key_ids = Vec::new();
    if version > 0 {
        if version > 1 {
            warn!(
                "PSSH box at offset {} has unknown version {}, decoding as version 1",
                offset, version
            );
        }
        consumed += 4;
        fits(offset, payload_length, consumed)?;
        let kid_count = u64::from(source.read_u32()?);

        consumed += kid_count * 16;
        fits(offset, payload_length, consumed)?;
        for _ in 0..kid_count {
            key_ids.push(Uuid::from_bytes(source.read_array::<16>()?));
        }
    }

    consumed += 4;
    fits(offset, payload_length, consumed)?;
    let data_size = u64::from(source.read_u32()?);

    consumed += data_size;
    fits(offset, payload_length, consumed)?;
    let data = source.read_vec(data_size)?;

    if consumed != payload_length {
        return Err(Error::InconsistentPsshLength {
            offset,
            expected: payload_length,
            actual: consumed,
        });
    }

    Ok(PsshBox {
        version,
        flags,
        system_id,
        key_ids,
        data,
    })
}

/// Decode a PSSH payload that runs to the end of the stream.
///
/// Used for a size-0 `pssh` box on a source whose length is unknown; the
/// rest of the stream is read and decoded as the payload.
pub fn decode_pssh_to_end<R: Read + Seek>(source: &mut BoxSource<R>) -> Result<PsshBox> {
    let offset = source.offset();
    let payload = source.read_to_end()?;
    let payload_length = payload.len() as u64;
    decode_pssh(
        &mut BoxSource::with_offset(Cursor::new(payload), offset),
        payload_length,
    )
}
