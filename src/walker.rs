//! Top-level box scan.
//!
//! [`BoxWalker`] reads box headers left to right, decodes every `pssh` box
//! and seeks over everything else without reading its payload. Sources that
//! cannot report their length are read until EOF instead. It is a plain
//! iterator: dropping it early abandons the scan.
use std::io::{Read, Seek};
use std::iter::FusedIterator;

use log::{debug, trace};
use thiserror::Error;

use crate::error::{Error, Result};
use crate::header::{read_header, FourCC};
use crate::pssh::{decode_pssh, decode_pssh_to_end, PsshBox};
use crate::source::BoxSource;

/// Where a scan stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    Scanning,
    /// Reached end of stream cleanly.
    Done,
    /// Stopped on an error. The error was the last item yielded.
    Failed,
}

/// Lazy scan over the top-level boxes of a stream, yielding PSSH boxes in
/// file order.
///
/// Yields at most one `Err`, after which the scan is [`ScanState::Failed`]
/// and the iterator is exhausted.
#[derive(Debug)]
pub struct BoxWalker<R> {
    source: BoxSource<R>,
    state: ScanState,
    boxes_seen: u64,
}

impl<R: Read + Seek> BoxWalker<R> {
    /// Start a scan at the reader's current position.
    pub fn new(reader: R) -> Self {
        Self {
            source: BoxSource::new(reader),
            state: ScanState::Scanning,
            boxes_seen: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Current offset in the stream. After a failure this is where the
    /// failing read stopped.
    pub fn offset(&self) -> u64 {
        self.source.offset()
    }

    /// Number of top-level box headers read so far.
    pub fn boxes_seen(&self) -> u64 {
        self.boxes_seen
    }

    pub fn into_inner(self) -> R {
        self.source.into_inner()
    }

    fn step(&mut self) -> Result<Option<PsshBox>> {
        loop {
            let header = match read_header(&mut self.source)? {
                Some(header) => header,
                None => return Ok(None),
            };
            self.boxes_seen += 1;
            trace!(
                "box {} at offset {}, size {:?}",
                header.box_type,
                header.offset,
                header.size
            );

            if header.box_type == FourCC::PSSH {
                let pssh = match header.payload_len() {
                    Some(payload_len) => decode_pssh(&mut self.source, payload_len)?,
                    None => decode_pssh_to_end(&mut self.source)?,
                };
                debug!(
                    "found PSSH v{} for system {} at offset {}",
                    pssh.version, pssh.system_id, header.offset
                );
                return Ok(Some(pssh));
            }

            match header.payload_len() {
                Some(payload_len) => self.source.skip(payload_len)?,
                None => {
                    self.source.skip_to_end()?;
                }
            }
        }
    }
}

impl<R: Read + Seek> Iterator for BoxWalker<R> {
    type Item = Result<PsshBox>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state != ScanState::Scanning {
            return None;
        }
        match self.step() {
            Ok(Some(pssh)) => Some(Ok(pssh)),
            Ok(None) => {
                debug!(
                    "scan finished at offset {} after {} boxes",
                    self.source.offset(),
                    self.boxes_seen
                );
                self.state = ScanState::Done;
                None
            }
            Err(e) => {
                self.state = ScanState::Failed;
                Some(Err(e))
            }
        }
    }
}

impl<R: Read + Seek> FusedIterator for BoxWalker<R> {}

/// Scan `reader` for top-level PSSH boxes.
pub fn find_pssh_boxes<R: Read + Seek>(reader: R) -> BoxWalker<R> {
    BoxWalker::new(reader)
}

/// A scan that stopped on an error, with the boxes found before it.
#[derive(Debug, Error)]
#[error("{error} ({} PSSH boxes found before the error)", .found.len())]
pub struct ScanFailure {
    #[source]
    pub error: Error,
    pub found: Vec<PsshBox>,
}

/// Scan `reader` to the end and collect every PSSH box.
pub fn collect_pssh_boxes<R: Read + Seek>(
    reader: R,
) -> std::result::Result<Vec<PsshBox>, ScanFailure> {
    let mut found = Vec::new();
    for item in find_pssh_boxes(reader) {
        match item {
            Ok(pssh) => found.push(pssh),
            Err(error) => return Err(ScanFailure { error, found }),
        }
    }
    Ok(found)
}

#[cfg(test)]
mod tests {
    use std::io::{Cursor, Read, Seek, SeekFrom};

    use uuid::Uuid;

    use super::{collect_pssh_boxes, find_pssh_boxes, BoxWalker, ScanState};
    use crate::error::Error;
    use crate::pssh::{PsshBox, SystemId};
    use crate::source::tests::{FailingAt, ForwardOnly};

    const KID: Uuid = Uuid::from_u128(0x00112233445566778899aabbccddeeff);

    fn plain_box(fourcc: &[u8; 4], size: u32) -> Vec<u8> {
        let mut bytes = size.to_be_bytes().to_vec();
        bytes.extend_from_slice(fourcc);
        bytes.resize(size as usize, 0xee);
        bytes
    }

    fn widevine(data: &[u8]) -> PsshBox {
        PsshBox::new(SystemId::Widevine.to_uuid(), vec![], data.to_vec(), 0).expect("create pssh")
    }

    /// Reader that panics if anything at or past `fence` is read.
    struct Fenced {
        inner: Cursor<Vec<u8>>,
        fence: u64,
    }

    impl Read for Fenced {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            let pos = self.inner.position();
            assert!(
                pos + buf.len() as u64 <= self.fence,
                "read of {} bytes at {} crosses fence {}",
                buf.len(),
                pos,
                self.fence
            );
            self.inner.read(buf)
        }
    }

    impl Seek for Fenced {
        fn seek(&mut self, pos: SeekFrom) -> std::io::Result<u64> {
            self.inner.seek(pos)
        }
    }

    #[test]
    fn single_pssh_box_roundtrip() {
        let pssh = PsshBox::new(SystemId::Widevine.to_uuid(), vec![KID], b"payload".to_vec(), 1)
            .expect("create pssh");
        let mut file = plain_box(b"ftyp", 20);
        file.extend(pssh.to_bytes().expect("serialize"));

        let found = collect_pssh_boxes(Cursor::new(file)).expect("scan");
        assert_eq!(found, vec![pssh]);
    }

    #[test]
    fn skips_boxes_without_reading_mdat() {
        let pssh = widevine(&[]);
        let pssh_bytes = pssh.to_bytes().expect("serialize");
        assert_eq!(pssh_bytes.len(), 32);

        let mut file = plain_box(b"ftyp", 20);
        file.extend(plain_box(b"moov", 50));
        file.extend(pssh_bytes);
        let mdat_payload = file.len() as u64 + 8;
        file.extend(plain_box(b"mdat", 1000));

        let reader = Fenced {
            inner: Cursor::new(file),
            fence: mdat_payload,
        };
        let mut walker = find_pssh_boxes(reader);
        assert_eq!(walker.next().expect("one box").expect("pssh"), pssh);
        assert!(walker.next().is_none());
        assert_eq!(walker.state(), ScanState::Done);
        assert_eq!(walker.boxes_seen(), 4);
        assert_eq!(walker.offset(), 1102);
    }

    #[test]
    fn skips_extended_size_box() {
        let mut file = vec![0, 0, 0, 1];
        file.extend_from_slice(b"mdat");
        file.extend_from_slice(&1_000_000u64.to_be_bytes());
        file.resize(1_000_000, 0);
        let pssh = widevine(b"after");
        file.extend(pssh.to_bytes().expect("serialize"));

        let mut walker = find_pssh_boxes(Cursor::new(file));
        assert_eq!(walker.next().expect("one box").expect("pssh"), pssh);
        assert!(walker.next().is_none());
        assert_eq!(walker.state(), ScanState::Done);
    }

    #[test]
    fn size_zero_box_runs_to_end() {
        let pssh = widevine(b"first");
        let mut file = pssh.to_bytes().expect("serialize");
        file.extend_from_slice(&[0, 0, 0, 0]);
        file.extend_from_slice(b"mdat");
        file.extend_from_slice(&[0u8; 64]);

        let found = collect_pssh_boxes(Cursor::new(file)).expect("scan");
        assert_eq!(found, vec![pssh]);
    }

    #[test]
    fn size_zero_pssh_box() {
        let pssh = widevine(b"tail");
        let mut file = plain_box(b"free", 8);
        let mut bytes = pssh.to_bytes().expect("serialize");
        bytes[..4].copy_from_slice(&[0, 0, 0, 0]);
        file.extend(bytes);

        let found = collect_pssh_boxes(Cursor::new(file)).expect("scan");
        assert_eq!(found, vec![pssh]);
    }

    #[test]
    fn overlong_last_box_is_truncated_with_partial_results() {
        let pssh = widevine(b"kept");
        let mut file = pssh.to_bytes().expect("serialize");
        let moov_at = file.len() as u64;
        file.extend(plain_box(b"moov", 50));
        // Declare 500 bytes, provide 50.
        file[moov_at as usize..moov_at as usize + 4].copy_from_slice(&500u32.to_be_bytes());

        let failure = collect_pssh_boxes(Cursor::new(file)).expect_err("truncated");
        assert_eq!(failure.found, vec![pssh]);
        assert!(matches!(
            failure.error,
            Error::TruncatedInput {
                needed: 492,
                available: 42,
                ..
            }
        ));
        assert_eq!(failure.error.offset(), Some(moov_at + 8));
    }

    #[test]
    fn two_pssh_boxes_in_file_order() {
        let widevine = widevine(b"wv");
        let playready =
            PsshBox::new(SystemId::PlayReady.to_uuid(), vec![], b"pr".to_vec(), 0).expect("create pssh");

        let mut file = plain_box(b"ftyp", 24);
        file.extend(widevine.to_bytes().expect("serialize"));
        file.extend(plain_box(b"free", 16));
        file.extend(playready.to_bytes().expect("serialize"));

        let found = collect_pssh_boxes(Cursor::new(file)).expect("scan");
        assert_eq!(found, vec![widevine, playready]);
    }

    #[test]
    fn no_pssh_is_empty_success() {
        let mut file = plain_box(b"ftyp", 20);
        file.extend(plain_box(b"mdat", 100));
        let found = collect_pssh_boxes(Cursor::new(file)).expect("scan");
        assert!(found.is_empty());

        let found = collect_pssh_boxes(Cursor::new(Vec::new())).expect("empty stream");
        assert!(found.is_empty());
    }

    #[test]
    fn malformed_pssh_fails_scan() {
        let first = widevine(b"ok");
        let mut file = first.to_bytes().expect("serialize");
        let mut bad = widevine(b"xxxx").to_bytes().expect("serialize");
        // data_size of 9 in a box holding 4 bytes of data.
        let at = bad.len() - 8;
        bad[at..at + 4].copy_from_slice(&9u32.to_be_bytes());
        file.extend(bad);
        file.extend(widevine(b"never").to_bytes().expect("serialize"));

        let mut walker = find_pssh_boxes(Cursor::new(file));
        assert_eq!(walker.next().expect("first").expect("ok"), first);
        let err = walker.next().expect("second").expect_err("bad box");
        assert!(matches!(err, Error::InconsistentPsshLength { .. }));
        assert_eq!(walker.state(), ScanState::Failed);
        assert!(walker.next().is_none());
    }

    #[test]
    fn partial_trailing_header_is_truncated() {
        let mut file = plain_box(b"ftyp", 20);
        file.extend_from_slice(&[0, 0, 0]);

        let failure = collect_pssh_boxes(Cursor::new(file)).expect_err("partial header");
        assert!(failure.found.is_empty());
        assert!(matches!(
            failure.error,
            Error::TruncatedInput {
                offset: 20,
                needed: 8,
                available: 3
            }
        ));
    }

    #[test]
    fn invalid_box_size_fails_scan() {
        let mut file = plain_box(b"ftyp", 20);
        file.extend_from_slice(&[0, 0, 0, 4]);
        file.extend_from_slice(b"junk");

        let failure = collect_pssh_boxes(Cursor::new(file)).expect_err("size 4");
        assert!(matches!(
            failure.error,
            Error::InvalidBoxSize {
                offset: 20,
                size: 4,
                ..
            }
        ));
    }

    #[test]
    fn stopping_early_leaves_reader_after_first_box() {
        let first = widevine(b"one");
        let mut file = first.to_bytes().expect("serialize");
        let first_len = file.len() as u64;
        file.extend(widevine(b"two").to_bytes().expect("serialize"));

        let mut walker = find_pssh_boxes(Cursor::new(file));
        assert_eq!(walker.next().expect("first").expect("ok"), first);
        assert_eq!(walker.state(), ScanState::Scanning);
        let mut reader = walker.into_inner();
        assert_eq!(reader.stream_position().expect("position"), first_len);
    }

    #[test]
    fn scan_starts_at_reader_position() {
        let pssh = widevine(b"late");
        let mut file = vec![0xffu8; 5];
        file.extend(pssh.to_bytes().expect("serialize"));
        let mut cursor = Cursor::new(file);
        cursor.seek(SeekFrom::Start(5)).expect("seek");

        let found = collect_pssh_boxes(cursor).expect("scan");
        assert_eq!(found, vec![pssh]);
    }

    #[test]
    fn forward_only_source_is_scanned() {
        let pssh = widevine(b"streamed");
        let mut file = plain_box(b"free", 16);
        file.extend(pssh.to_bytes().expect("serialize"));

        let found = collect_pssh_boxes(ForwardOnly(Cursor::new(file))).expect("scan");
        assert_eq!(found, vec![pssh]);
    }

    #[test]
    fn forward_only_size_zero_boxes() {
        let first = widevine(b"first");
        let mut file = first.to_bytes().expect("serialize");
        file.extend_from_slice(&[0, 0, 0, 0]);
        file.extend_from_slice(b"mdat");
        file.extend_from_slice(&[0u8; 64]);

        let mut walker = find_pssh_boxes(ForwardOnly(Cursor::new(file)));
        assert_eq!(walker.next().expect("first").expect("ok"), first);
        assert!(walker.next().is_none());
        assert_eq!(walker.state(), ScanState::Done);
        assert_eq!(walker.boxes_seen(), 2);

        let last = widevine(b"last");
        let mut file = plain_box(b"ftyp", 20);
        let mut bytes = last.to_bytes().expect("serialize");
        bytes[..4].copy_from_slice(&[0, 0, 0, 0]);
        file.extend(bytes);

        let found = collect_pssh_boxes(ForwardOnly(Cursor::new(file))).expect("scan");
        assert_eq!(found, vec![last]);
    }

    #[test]
    fn forward_only_overlong_box_is_truncated() {
        let pssh = widevine(b"kept");
        let mut file = pssh.to_bytes().expect("serialize");
        let moov_at = file.len() as u64;
        file.extend(plain_box(b"moov", 50));
        file[moov_at as usize..moov_at as usize + 4].copy_from_slice(&500u32.to_be_bytes());

        let failure = collect_pssh_boxes(ForwardOnly(Cursor::new(file))).expect_err("truncated");
        assert_eq!(failure.found, vec![pssh]);
        assert!(matches!(
            failure.error,
            Error::TruncatedInput {
                needed: 492,
                available: 42,
                ..
            }
        ));
        assert_eq!(failure.error.offset(), Some(moov_at + 8));
    }

    #[test]
    fn read_error_keeps_earlier_boxes() {
        let first = widevine(b"ok");
        let mut file = first.to_bytes().expect("serialize");
        // Fail just after the second box's header.
        let fail_at = file.len() as u64 + 8;
        file.extend(widevine(b"lost").to_bytes().expect("serialize"));
        let reader = || FailingAt {
            inner: Cursor::new(file.clone()),
            fail_at,
        };

        let mut walker = find_pssh_boxes(reader());
        assert_eq!(walker.next().expect("first").expect("ok"), first);
        let err = walker.next().expect("second").expect_err("read fails");
        match &err {
            Error::Io { offset, source } => {
                assert_eq!(*offset, fail_at);
                assert_eq!(source.kind(), std::io::ErrorKind::ConnectionReset);
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(walker.state(), ScanState::Failed);
        assert!(walker.next().is_none());

        let failure = collect_pssh_boxes(reader()).expect_err("read fails");
        assert_eq!(failure.found, vec![first]);
        assert_eq!(failure.error.offset(), Some(fail_at));
    }

    #[test]
    fn offset_is_reader_position_before_scanning() {
        let mut cursor = Cursor::new(vec![0u8; 40]);
        cursor.seek(SeekFrom::Start(24)).expect("seek");
        let walker = BoxWalker::new(cursor);
        assert_eq!(walker.offset(), 24);
        assert_eq!(walker.state(), ScanState::Scanning);
    }
}
