//! Page directory file format.
//!
//! A page directory lists, in time order, the pages one signal was spilled
//! into. It is small enough to be held in memory and is consulted before any
//! page body is fetched.
//!
//! ## File Structure
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Header (32 bytes)                                           │
//! │  - Magic: "WPDX" (4 bytes)                                   │
//! │  - Version: u16 (2 bytes) = 1                                │
//! │  - Type kind: u8, Compression: u8                            │
//! │  - Width: u32 (4 bytes)                                      │
//! │  - Signal ID: u64 (8 bytes)                                  │
//! │  - Entry count: u32 (4 bytes)                                │
//! │  - Reserved: 8 bytes                                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Entries (entry_count × (36 + 2 × bytes_per_sample))         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Footer (16 bytes)                                           │
//! │  - Total samples: u64                                        │
//! │  - CRC32 of header + entries: u32                            │
//! │  - Reverse magic: "XDPW"                                     │
//! └─────────────────────────────────────────────────────────────┘
//! ```

use crate::error::{Result, WaveError};
use crate::page::codec::CompressionType;
use crate::page::store::{write_atomic, SyncMode};
use crate::page::{Page, PageLayout, PageRef, PAGE_SIZE};
use crate::signal::{SignalId, SignalType, Timestamp, TypeKind};
use std::fs;
use std::io::{Cursor, Read, Write};
use std::ops::Range;
use std::path::Path;
use tracing::debug;

/// Magic bytes for the directory header: "WPDX"
pub const DIRECTORY_MAGIC: [u8; 4] = *b"WPDX";

/// Reverse magic bytes for the directory footer: "XDPW"
pub const DIRECTORY_MAGIC_REVERSE: [u8; 4] = *b"XDPW";

/// Current directory format version.
pub const DIRECTORY_VERSION: u16 = 1;

/// Header size in bytes.
pub const HEADER_SIZE: usize = 32;

/// Footer size in bytes.
pub const FOOTER_SIZE: usize = 16;

/// Fixed part of an entry, before the two tail-value planes.
const ENTRY_FIXED_SIZE: usize = 36;

/// Directory file header (32 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryHeader {
    /// Magic bytes: "WPDX"
    pub magic: [u8; 4],
    /// File format version.
    pub version: u16,
    /// Value encoding of the signal.
    pub kind: TypeKind,
    /// Codec used for the page bodies.
    pub compression: CompressionType,
    /// Bit width of the signal.
    pub width: u32,
    /// Id of the spilled signal.
    pub signal_id: SignalId,
    /// Number of page entries.
    pub entry_count: u32,
}

impl DirectoryHeader {
    /// Writes the header using little-endian byte order.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.magic)?;
        writer.write_all(&self.version.to_le_bytes())?;
        writer.write_all(&[self.kind as u8, self.compression as u8])?;
        writer.write_all(&self.width.to_le_bytes())?;
        writer.write_all(&self.signal_id.0.to_le_bytes())?;
        writer.write_all(&self.entry_count.to_le_bytes())?;
        // Reserved (8 bytes)
        writer.write_all(&[0u8; 8])?;
        Ok(())
    }

    /// Reads a header using little-endian byte order.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidMagic` if the magic bytes don't match and
    /// `WaveError::UnsupportedVersion` for a newer or unknown format.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; HEADER_SIZE];
        reader.read_exact(&mut buf)?;

        let magic = [buf[0], buf[1], buf[2], buf[3]];
        if magic != DIRECTORY_MAGIC {
            return Err(WaveError::InvalidMagic(magic));
        }

        let version = u16::from_le_bytes([buf[4], buf[5]]);
        if version == 0 || version > DIRECTORY_VERSION {
            return Err(WaveError::UnsupportedVersion(version));
        }

        let kind = TypeKind::from_u8(buf[6])
            .ok_or_else(|| WaveError::invalid(format!("unknown type kind {}", buf[6])))?;
        let compression = CompressionType::from_u8(buf[7])
            .ok_or_else(|| WaveError::invalid(format!("unknown compression {}", buf[7])))?;
        let width = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let signal_id = SignalId(read_u64(&buf[12..20]));
        let entry_count = u32::from_le_bytes([buf[20], buf[21], buf[22], buf[23]]);

        Ok(Self {
            magic,
            version,
            kind,
            compression,
            width,
            signal_id,
            entry_count,
        })
    }
}

/// Directory file footer (16 bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryFooter {
    /// Sum of `len` over all entries.
    pub total_samples: u64,
    /// CRC32 of the header and entries.
    pub crc32: u32,
    /// Reverse magic bytes: "XDPW"
    pub magic_reverse: [u8; 4],
}

impl DirectoryFooter {
    /// Writes the footer using little-endian byte order.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.total_samples.to_le_bytes())?;
        writer.write_all(&self.crc32.to_le_bytes())?;
        writer.write_all(&self.magic_reverse)?;
        Ok(())
    }

    /// Reads a footer using little-endian byte order.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Self> {
        let mut buf = [0u8; FOOTER_SIZE];
        reader.read_exact(&mut buf)?;

        let total_samples = read_u64(&buf[0..8]);
        let crc32 = u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]);
        let magic_reverse = [buf[12], buf[13], buf[14], buf[15]];
        if magic_reverse != DIRECTORY_MAGIC_REVERSE {
            return Err(WaveError::InvalidMagic(magic_reverse));
        }

        Ok(Self {
            total_samples,
            crc32,
            magic_reverse,
        })
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(raw)
}

/// Directory entry describing one stored page.
///
/// Besides the time range and sample count, the entry keeps a copy of the
/// page's final value so the value held after the page ends is known without
/// reading the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageIndexEntry {
    /// Location of the page body in the store.
    pub page_ref: PageRef,
    /// Timestamp of the first sample (inclusive).
    pub start_time: Timestamp,
    /// Timestamp of the last sample (inclusive).
    pub end_time: Timestamp,
    /// Number of samples in the page.
    pub len: u32,
    /// xxh64 of the stored (compressed) page bytes.
    pub checksum: u64,
    /// `x0` plane of the last sample.
    pub last_x0: Vec<u8>,
    /// `x1` plane of the last sample.
    pub last_x1: Vec<u8>,
}

impl PageIndexEntry {
    /// Builds the entry for `page` stored under `page_ref` as bytes hashing
    /// to `checksum`.
    pub fn for_page(page_ref: PageRef, page: &Page, checksum: u64) -> Self {
        let bytes = page.signal_type().bytes();
        let last = page.len() - 1;
        Self {
            page_ref,
            start_time: page.start_time(),
            end_time: page.end_time(),
            len: page.len() as u32,
            checksum,
            last_x0: page.x0s()[last * bytes..].to_vec(),
            last_x1: page.x1s()[last * bytes..].to_vec(),
        }
    }

    /// Returns true if the page's time range meets `[start, end]`.
    pub fn intersects(&self, start: Timestamp, end: Timestamp) -> bool {
        self.start_time <= end && self.end_time >= start
    }

    /// Writes the entry.
    ///
    /// Format:
    /// - page_ref: u64
    /// - start_time: u64
    /// - end_time: u64
    /// - len: u32
    /// - checksum: u64
    /// - last_x0, last_x1: bytes_per_sample each
    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&self.page_ref.0.to_le_bytes())?;
        writer.write_all(&self.start_time.to_le_bytes())?;
        writer.write_all(&self.end_time.to_le_bytes())?;
        writer.write_all(&self.len.to_le_bytes())?;
        writer.write_all(&self.checksum.to_le_bytes())?;
        writer.write_all(&self.last_x0)?;
        writer.write_all(&self.last_x1)?;
        Ok(())
    }

    /// Reads an entry whose value planes are `bytes` long.
    pub fn read_from<R: Read>(reader: &mut R, bytes: usize) -> Result<Self> {
        let mut buf = [0u8; ENTRY_FIXED_SIZE];
        reader.read_exact(&mut buf)?;
        let page_ref = PageRef(read_u64(&buf[0..8]));
        let start_time = read_u64(&buf[8..16]);
        let end_time = read_u64(&buf[16..24]);
        let len = u32::from_le_bytes([buf[24], buf[25], buf[26], buf[27]]);
        let checksum = read_u64(&buf[28..36]);

        let mut last_x0 = vec![0u8; bytes];
        reader.read_exact(&mut last_x0)?;
        let mut last_x1 = vec![0u8; bytes];
        reader.read_exact(&mut last_x1)?;

        Ok(Self {
            page_ref,
            start_time,
            end_time,
            len,
            checksum,
            last_x0,
            last_x1,
        })
    }
}

/// Ordered, in-memory list of a spilled signal's pages.
///
/// Entries are sorted by `start_time` and their time ranges never overlap, so
/// both `start_time` and `end_time` are increasing and binary-searchable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageDirectory {
    signal_id: SignalId,
    ty: SignalType,
    compression: CompressionType,
    entries: Vec<PageIndexEntry>,
}

impl PageDirectory {
    /// Creates an empty directory.
    pub fn new(signal_id: SignalId, ty: SignalType, compression: CompressionType) -> Self {
        Self {
            signal_id,
            ty,
            compression,
            entries: Vec::new(),
        }
    }

    /// Returns the id of the signal the pages belong to.
    pub fn signal_id(&self) -> SignalId {
        self.signal_id
    }

    /// Returns the signal type.
    pub fn signal_type(&self) -> SignalType {
        self.ty
    }

    /// Returns the page codec.
    pub fn compression(&self) -> CompressionType {
        self.compression
    }

    /// Returns the entries in time order.
    pub fn entries(&self) -> &[PageIndexEntry] {
        &self.entries
    }

    /// Iterates over the entries in time order.
    pub fn iter(&self) -> std::slice::Iter<'_, PageIndexEntry> {
        self.entries.iter()
    }

    /// Returns the entry at `index`.
    pub fn get(&self, index: usize) -> Option<&PageIndexEntry> {
        self.entries.get(index)
    }

    /// Returns the number of pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the directory has no pages.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the total number of samples across all pages.
    pub fn total_samples(&self) -> u64 {
        self.entries.iter().map(|e| e.len as u64).sum()
    }

    /// Appends the entry of the next page in time order.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if the entry is malformed or does
    /// not start after the previous page ends.
    pub fn push(&mut self, entry: PageIndexEntry) -> Result<()> {
        self.check_entry(&entry)?;
        if let Some(prev) = self.entries.last() {
            if entry.start_time <= prev.end_time {
                return Err(WaveError::invalid(format!(
                    "page starting at {} overlaps previous page ending at {}",
                    entry.start_time, prev.end_time
                )));
            }
        }
        self.entries.push(entry);
        Ok(())
    }

    /// Replaces the entry at `index`, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if `index` is out of range or the
    /// new entry would overlap its neighbours.
    pub fn replace(&mut self, index: usize, entry: PageIndexEntry) -> Result<PageIndexEntry> {
        if index >= self.entries.len() {
            return Err(WaveError::invalid(format!(
                "page index {} out of range ({} pages)",
                index,
                self.entries.len()
            )));
        }
        self.check_entry(&entry)?;
        if index > 0 && entry.start_time <= self.entries[index - 1].end_time {
            return Err(WaveError::invalid("replacement overlaps previous page"));
        }
        if let Some(next) = self.entries.get(index + 1) {
            if entry.end_time >= next.start_time {
                return Err(WaveError::invalid("replacement overlaps next page"));
            }
        }
        Ok(std::mem::replace(&mut self.entries[index], entry))
    }

    fn check_entry(&self, entry: &PageIndexEntry) -> Result<()> {
        let bytes = self.ty.bytes();
        if entry.len == 0
            || entry.start_time > entry.end_time
            || entry.last_x0.len() != bytes
            || entry.last_x1.len() != bytes
        {
            return Err(WaveError::invalid(format!(
                "malformed page entry for page {}",
                entry.page_ref
            )));
        }
        let fit = PAGE_SIZE / PageLayout::sample_size(self.ty);
        if entry.len as usize > fit {
            return Err(WaveError::invalid(format!(
                "page {} claims {} samples, a page holds at most {}",
                entry.page_ref, entry.len, fit
            )));
        }
        Ok(())
    }

    /// Returns the index of the last page starting at or before `t`.
    ///
    /// This page contains the value held at `t`, unless `t` falls after the
    /// page's last sample, in which case its tail value is held.
    pub fn locate(&self, t: Timestamp) -> Option<usize> {
        self.entries
            .partition_point(|e| e.start_time <= t)
            .checked_sub(1)
    }

    /// Returns the range of pages whose time range meets `[start, end]`.
    pub fn overlapping(&self, start: Timestamp, end: Timestamp) -> Range<usize> {
        let first = self.entries.partition_point(|e| e.end_time < start);
        let last = self.entries.partition_point(|e| e.start_time <= end);
        first..last.max(first)
    }

    /// Serializes the directory.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let bytes = self.ty.bytes();
        let mut buf = Vec::with_capacity(
            HEADER_SIZE + self.entries.len() * (ENTRY_FIXED_SIZE + 2 * bytes) + FOOTER_SIZE,
        );
        let header = DirectoryHeader {
            magic: DIRECTORY_MAGIC,
            version: DIRECTORY_VERSION,
            kind: self.ty.kind(),
            compression: self.compression,
            width: self.ty.width(),
            signal_id: self.signal_id,
            entry_count: u32::try_from(self.entries.len())
                .map_err(|_| WaveError::invalid("too many pages in directory"))?,
        };
        header.write_to(&mut buf)?;
        for entry in &self.entries {
            entry.write_to(&mut buf)?;
        }

        let footer = DirectoryFooter {
            total_samples: self.total_samples(),
            crc32: crc32fast::hash(&buf),
            magic_reverse: DIRECTORY_MAGIC_REVERSE,
        };
        footer.write_to(&mut buf)?;
        Ok(buf)
    }

    /// Parses a serialized directory and verifies its checksum.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::ChecksumMismatch` if the contents were altered,
    /// `WaveError::InvalidMagic`/`UnsupportedVersion` for foreign files and
    /// `WaveError::InvalidArgument` if entries are inconsistent.
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        if data.len() < HEADER_SIZE + FOOTER_SIZE {
            return Err(WaveError::invalid(format!(
                "directory of {} bytes is truncated",
                data.len()
            )));
        }
        let (body, tail) = data.split_at(data.len() - FOOTER_SIZE);
        let footer = DirectoryFooter::read_from(&mut Cursor::new(tail))?;

        let actual = crc32fast::hash(body);
        if actual != footer.crc32 {
            return Err(WaveError::ChecksumMismatch {
                expected: footer.crc32,
                actual,
            });
        }

        let mut cursor = Cursor::new(body);
        let header = DirectoryHeader::read_from(&mut cursor)?;
        let ty = SignalType::quaternary(header.width)?;
        let mut directory = Self::new(header.signal_id, ty, header.compression);
        for _ in 0..header.entry_count {
            let entry = PageIndexEntry::read_from(&mut cursor, ty.bytes())?;
            directory.push(entry)?;
        }

        if cursor.position() as usize != body.len() {
            return Err(WaveError::invalid("trailing bytes after directory entries"));
        }
        if directory.total_samples() != footer.total_samples {
            return Err(WaveError::invalid(format!(
                "directory lists {} samples, footer says {}",
                directory.total_samples(),
                footer.total_samples
            )));
        }
        Ok(directory)
    }

    /// Writes the directory to `path` atomically.
    ///
    /// The contents go to `{path}.tmp` first, which is synced and renamed over
    /// `path`.
    pub fn save(&self, path: &Path, sync_mode: SyncMode) -> Result<()> {
        let data = self.to_bytes()?;
        write_atomic(path, &data, sync_mode)?;

        debug!(
            signal = %self.signal_id,
            pages = self.entries.len(),
            path = %path.display(),
            "saved page directory"
        );
        Ok(())
    }

    /// Loads and verifies a directory written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self> {
        let data = fs::read(path)?;
        Self::from_bytes(&data)
    }
}
