//! Bounds-checked big-endian cursor over a byte stream.
//!
//! All box parsing goes through [`BoxSource`]. When the stream length can be
//! learned, a field that runs past the end is reported as
//! [`Error::TruncatedInput`] before anything is read, and payloads are
//! skipped with relative seeks. Sources that cannot seek to their end
//! (pipes, forward-only wrappers) are read until EOF instead: short reads
//! become `TruncatedInput` and skips consume the bytes they pass over.
use std::io::{self, Read, Seek, SeekFrom};

use byteorder::{BigEndian, ByteOrder};
use log::debug;

use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Unprobed,
    /// Absolute offset of the end of stream.
    Known(u64),
    Unknown,
}

/// Forward-only reader over a `Read + Seek` value.
#[derive(Debug)]
pub struct BoxSource<R> {
    inner: R,
    pos: u64,
    end: StreamEnd,
}

impl<R: Read + Seek> BoxSource<R> {
    /// Wrap a reader. Reading starts at its current position; readers that
    /// cannot report a position count offsets from 0.
    pub fn new(mut inner: R) -> Self {
        let pos = inner.stream_position().unwrap_or(0);
        Self::with_offset(inner, pos)
    }

    /// Wrap a reader whose current position corresponds to `offset` in the
    /// stream that error offsets should refer to.
    pub fn with_offset(inner: R, offset: u64) -> Self {
        Self {
            inner,
            pos: offset,
            end: StreamEnd::Unprobed,
        }
    }

    /// Release the underlying reader.
    pub fn into_inner(self) -> R {
        self.inner
    }

    /// Absolute offset of the cursor.
    pub fn offset(&self) -> u64 {
        self.pos
    }

    /// Bytes remaining until end of stream, or `None` when the source
    /// cannot tell without reading.
    pub fn left(&mut self) -> Result<Option<u64>> {
        Ok(self.stream_end()?.map(|end| end.saturating_sub(self.pos)))
    }

    // The length is probed once by seeking to the end and back. A source
    // that refuses either the position query or the seek to the end is
    // treated as unbounded.
    fn stream_end(&mut self) -> Result<Option<u64>> {
        match self.end {
            StreamEnd::Known(end) => return Ok(Some(end)),
            StreamEnd::Unknown => return Ok(None),
            StreamEnd::Unprobed => {}
        }
        let probed = self
            .inner
            .stream_position()
            .and_then(|start| Ok((start, self.inner.seek(SeekFrom::End(0))?)));
        let (start, inner_end) = match probed {
            Ok(v) => v,
            Err(e) => {
                debug!("stream length unavailable ({}), reading until EOF", e);
                self.end = StreamEnd::Unknown;
                return Ok(None);
            }
        };
        if inner_end != start {
            self.inner
                .seek(SeekFrom::Start(start))
                .map_err(|e| self.io(e))?;
        }
        let end = self.pos + inner_end.saturating_sub(start);
        self.end = StreamEnd::Known(end);
        Ok(Some(end))
    }

    fn io(&self, source: io::Error) -> Error {
        Error::Io {
            offset: self.pos,
            source,
        }
    }

    fn truncated(&self, needed: u64, available: u64) -> Error {
        Error::TruncatedInput {
            offset: self.pos,
            needed,
            available,
        }
    }

    /// Fail if the stream is known to hold fewer than `needed` more bytes.
    pub fn ensure(&mut self, needed: u64) -> Result<()> {
        if let Some(available) = self.left()? {
            if needed > available {
                return Err(self.truncated(needed, available));
            }
        }
        Ok(())
    }

    // Read until `buf` is full or EOF; returns the number of bytes read.
    fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            match self.inner.read(&mut buf[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(self.io(e)),
            }
        }
        Ok(filled)
    }

    /// Read a fixed-size field, or `None` if the stream ends exactly here.
    /// A field cut off partway is `TruncatedInput`.
    pub fn read_array_or_eof<const N: usize>(&mut self) -> Result<Option<[u8; N]>> {
        if self.left()? == Some(0) {
            return Ok(None);
        }
        self.ensure(N as u64)?;
        let mut buf = [0u8; N];
        match self.fill(&mut buf)? {
            0 => Ok(None),
            n if n < N => Err(self.truncated(N as u64, n as u64)),
            _ => {
                self.pos += N as u64;
                Ok(Some(buf))
            }
        }
    }

    /// Read a fixed-size field.
    pub fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        self.ensure(N as u64)?;
        let mut buf = [0u8; N];
        let n = self.fill(&mut buf)?;
        if n < N {
            return Err(self.truncated(N as u64, n as u64));
        }
        self.pos += N as u64;
        Ok(buf)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.read_array::<1>()?[0])
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(BigEndian::read_u32(&self.read_array::<4>()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(BigEndian::read_u64(&self.read_array::<8>()?))
    }

    /// Read `n` bytes into a new buffer.
    ///
    /// The buffer grows as data arrives, so a bogus length field cannot
    /// trigger a huge allocation up front.
    pub fn read_vec(&mut self, n: u64) -> Result<Vec<u8>> {
        self.ensure(n)?;
        let mut buf = Vec::new();
        if self.end != StreamEnd::Unknown {
            buf.reserve_exact(n as usize);
        }
        let read = (&mut self.inner).take(n).read_to_end(&mut buf);
        read.map_err(|e| self.io(e))?;
        if (buf.len() as u64) < n {
            return Err(self.truncated(n, buf.len() as u64));
        }
        self.pos += n;
        Ok(buf)
    }

    /// Read everything up to end of stream.
    pub fn read_to_end(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.inner
            .read_to_end(&mut buf)
            .map_err(|e| self.io(e))?;
        self.pos += buf.len() as u64;
        Ok(buf)
    }

    /// Skip exactly `n` bytes forward.
    ///
    /// With a known stream length this is a relative seek and the skipped
    /// bytes are never read. Otherwise they are read and discarded.
    pub fn skip(&mut self, n: u64) -> Result<()> {
        self.ensure(n)?;
        if n == 0 {
            return Ok(());
        }
        if self.end == StreamEnd::Unknown {
            let copied = io::copy(&mut (&mut self.inner).take(n), &mut io::sink());
            let skipped = copied.map_err(|e| self.io(e))?;
            if skipped < n {
                return Err(self.truncated(n, skipped));
            }
        } else {
            let delta = i64::try_from(n).map_err(|_| self.truncated(n, 0))?;
            self.inner
                .seek(SeekFrom::Current(delta))
                .map_err(|e| self.io(e))?;
        }
        self.pos += n;
        Ok(())
    }

    /// Skip to end of stream, returning the number of bytes passed over.
    pub fn skip_to_end(&mut self) -> Result<u64> {
        match self.left()? {
            Some(left) => {
                self.skip(left)?;
                Ok(left)
            }
            None => {
                let copied = io::copy(&mut self.inner, &mut io::sink());
                let skipped = copied.map_err(|e| self.io(e))?;
                self.pos += skipped;
                Ok(skipped)
            }
        }
    }
}
