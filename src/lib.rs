//! psshscan - locate PSSH boxes in ISOBMFF/MP4 files.
//!
//! This crate provides:
//! - Box header parsing, including 64-bit and to-end-of-file sizes.
//! - PSSH box decoding (version 0 and 1) and serialization.
//! - A lazy, single-pass scan over the top-level boxes of any
//!   `Read + Seek` source that seeks over payloads it does not need.
//!
//! Diagnostics go through the `log` crate. The `cli` feature builds the
//! `psshscan` binary.
//!
//! ```no_run
//! use std::fs::File;
//!
//! for pssh in psshscan::find_pssh_boxes(File::open("sample.mp4")?) {
//!     let pssh = pssh?;
//!     println!("{} {}", pssh.system_id, pssh.to_base64()?);
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

/// Common error types and Result alias.
pub mod error;
/// Box header and FourCC types.
pub mod header;
/// PSSH decoding and serialization.
pub mod pssh;
/// Bounds-checked stream cursor.
pub mod source;
/// Top-level box scan.
pub mod walker;

pub use error::{Error, Result};
pub use header::{read_header, BoxHeader, FourCC};
pub use pssh::{decode_pssh, decode_pssh_to_end, PsshBox, SystemId};
pub use source::BoxSource;
pub use walker::{collect_pssh_boxes, find_pssh_boxes, BoxWalker, ScanFailure, ScanState};
