//! Persistent page tier.
//!
//! A signal that is spilled to storage is cut into fixed-capacity [`Page`]s.
//! Each page is compressed and written as one object in a [`PageStore`],
//! addressed by an opaque [`PageRef`]. A [`PageDirectory`] keeps one small
//! [`PageIndexEntry`] per page so that range queries can skip pages without
//! reading them.
//!
//! ## Page body layout
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ timestamps: len × u64 LE                      │
//! ├──────────────────────────────────────────────┤
//! │ x0 plane:   len × bytes                       │
//! ├──────────────────────────────────────────────┤
//! │ x1 plane:   len × bytes                       │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! The layout is fully determined by `(len, width)` and never exceeds
//! [`PAGE_SIZE`] bytes.

pub mod codec;
pub mod file;
pub mod reader;
pub mod store;

pub use codec::{CompressionType, Compressor, Lz4Codec, RawCodec};
pub use file::{PageDirectory, PageIndexEntry};
pub use reader::{PageWriter, PagedSignal};
pub use store::{FsPageStore, MemPageStore, PageStore, SyncMode};

use crate::error::{Result, WaveError};
use crate::signal::{OwnedSamples, Quaternary, Samples, SignalType, Timestamp};
use std::fmt;

/// Size of a page buffer in bytes (16 KiB).
pub const PAGE_SIZE: usize = 16 * 1024;

/// Alignment of a page buffer in memory.
pub const PAGE_ALIGN: usize = 64;

/// Default maximum number of samples per page.
pub const DEFAULT_MAX_ELEMENTS: usize = 1024;

const TIMESTAMP_SIZE: usize = std::mem::size_of::<Timestamp>();

/// Opaque identifier of a stored page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PageRef(pub u64);

impl fmt::Display for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// Configuration for writing pages.
#[derive(Debug, Clone)]
pub struct PageConfig {
    /// Upper bound on samples per page. The effective capacity may be lower
    /// for wide signals, see [`PageLayout::capacity`].
    pub max_elements: usize,
    /// Codec applied to page bodies before they are stored.
    pub compression: CompressionType,
    /// Durability of filesystem writes.
    pub sync_mode: SyncMode,
}

impl Default for PageConfig {
    fn default() -> Self {
        Self {
            max_elements: DEFAULT_MAX_ELEMENTS,
            compression: CompressionType::default(),
            sync_mode: SyncMode::default(),
        }
    }
}

impl PageConfig {
    /// Sets the maximum number of samples per page.
    pub fn with_max_elements(mut self, max_elements: usize) -> Self {
        self.max_elements = max_elements;
        self
    }

    /// Sets the page codec.
    pub fn with_compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Sets the sync mode.
    pub fn with_sync_mode(mut self, sync_mode: SyncMode) -> Self {
        self.sync_mode = sync_mode;
        self
    }
}

/// Byte layout of a page body for a given signal type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageLayout {
    bytes: usize,
    len: usize,
}

impl PageLayout {
    /// Creates the layout of a page holding `len` samples of type `ty`.
    pub fn new(ty: SignalType, len: usize) -> Self {
        Self {
            bytes: ty.bytes(),
            len,
        }
    }

    /// Size of one sample across all three columns.
    pub fn sample_size(ty: SignalType) -> usize {
        TIMESTAMP_SIZE + 2 * ty.bytes()
    }

    /// Number of samples one page holds for type `ty`.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if `max_elements` is zero or a
    /// single sample does not fit in a page.
    pub fn capacity(ty: SignalType, max_elements: usize) -> Result<usize> {
        if max_elements == 0 {
            return Err(WaveError::invalid("page capacity must be greater than zero"));
        }
        let fit = PAGE_SIZE / Self::sample_size(ty);
        if fit == 0 {
            return Err(WaveError::invalid(format!(
                "width {} is too wide for a {} byte page",
                ty.width(),
                PAGE_SIZE
            )));
        }
        Ok(fit.min(max_elements))
    }

    /// Total body length in bytes.
    pub fn body_len(&self) -> usize {
        self.len * (TIMESTAMP_SIZE + 2 * self.bytes)
    }

    /// Byte range of the timestamp column.
    pub fn timestamps(&self) -> std::ops::Range<usize> {
        0..self.len * TIMESTAMP_SIZE
    }

    /// Byte range of the `x0` plane.
    pub fn x0s(&self) -> std::ops::Range<usize> {
        let start = self.len * TIMESTAMP_SIZE;
        start..start + self.len * self.bytes
    }

    /// Byte range of the `x1` plane.
    pub fn x1s(&self) -> std::ops::Range<usize> {
        let start = self.len * (TIMESTAMP_SIZE + self.bytes);
        start..start + self.len * self.bytes
    }
}

#[repr(C, align(64))]
struct PageBuf([u8; PAGE_SIZE]);

/// Immutable in-memory page: up to 16 KiB of one signal's samples in a
/// 64-byte aligned buffer.
pub struct Page {
    ty: SignalType,
    len: usize,
    buf: Box<PageBuf>,
}

impl Page {
    /// Packs samples into a page.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if `samples` is empty or does not
    /// fit in one page.
    pub fn from_samples(samples: &Samples<'_>) -> Result<Self> {
        let ty = samples.signal_type();
        let layout = PageLayout::new(ty, samples.len());
        if samples.is_empty() || layout.body_len() > PAGE_SIZE {
            return Err(WaveError::invalid(format!(
                "{} samples of width {} do not form a page",
                samples.len(),
                ty.width()
            )));
        }

        let mut buf = Box::new(PageBuf([0u8; PAGE_SIZE]));
        let ts_bytes = &mut buf.0[layout.timestamps()];
        for (chunk, ts) in ts_bytes
            .chunks_exact_mut(TIMESTAMP_SIZE)
            .zip(samples.timestamps())
        {
            chunk.copy_from_slice(&ts.to_le_bytes());
        }
        buf.0[layout.x0s()].copy_from_slice(samples.x0s());
        buf.0[layout.x1s()].copy_from_slice(samples.x1s());

        Ok(Self {
            ty,
            len: samples.len(),
            buf,
        })
    }

    /// Rebuilds a page from an uncompressed body.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::CorruptPage` if `body` is not exactly the length the
    /// layout of `(len, ty)` requires, or its timestamps are not increasing.
    pub fn from_body(ty: SignalType, len: usize, body: &[u8]) -> Result<Self> {
        let layout = PageLayout::new(ty, len);
        if len == 0 || body.len() != layout.body_len() || body.len() > PAGE_SIZE {
            return Err(WaveError::CorruptPage(format!(
                "body of {} bytes does not match {} samples of width {}",
                body.len(),
                len,
                ty.width()
            )));
        }
        let mut buf = Box::new(PageBuf([0u8; PAGE_SIZE]));
        buf.0[..body.len()].copy_from_slice(body);
        let page = Self { ty, len, buf };

        let mut prev: Option<Timestamp> = None;
        for ts in page.timestamps() {
            if prev.is_some_and(|p| p >= ts) {
                return Err(WaveError::CorruptPage(format!(
                    "timestamp {} does not increase",
                    ts
                )));
            }
            prev = Some(ts);
        }
        Ok(page)
    }

    fn layout(&self) -> PageLayout {
        PageLayout::new(self.ty, self.len)
    }

    /// Returns the signal type.
    pub fn signal_type(&self) -> SignalType {
        self.ty
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the page holds no samples. Pages are never empty.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the uncompressed body bytes.
    pub fn body(&self) -> &[u8] {
        &self.buf.0[..self.layout().body_len()]
    }

    /// Returns the timestamp of sample `i`.
    pub fn timestamp(&self, i: usize) -> Option<Timestamp> {
        if i >= self.len {
            return None;
        }
        let offset = i * TIMESTAMP_SIZE;
        let mut raw = [0u8; TIMESTAMP_SIZE];
        raw.copy_from_slice(&self.buf.0[offset..offset + TIMESTAMP_SIZE]);
        Some(Timestamp::from_le_bytes(raw))
    }

    /// Iterates over the timestamp column.
    pub fn timestamps(&self) -> impl Iterator<Item = Timestamp> + '_ {
        self.buf.0[self.layout().timestamps()]
            .chunks_exact(TIMESTAMP_SIZE)
            .map(|c| {
                let mut raw = [0u8; TIMESTAMP_SIZE];
                raw.copy_from_slice(c);
                Timestamp::from_le_bytes(raw)
            })
    }

    /// Returns the `x0` plane.
    pub fn x0s(&self) -> &[u8] {
        &self.buf.0[self.layout().x0s()]
    }

    /// Returns the `x1` plane.
    pub fn x1s(&self) -> &[u8] {
        &self.buf.0[self.layout().x1s()]
    }

    /// Returns the value of sample `i`.
    pub fn value(&self, i: usize) -> Option<Quaternary<'_>> {
        if i >= self.len {
            return None;
        }
        let bytes = self.ty.bytes();
        let range = i * bytes..(i + 1) * bytes;
        Some(Quaternary::new(
            self.ty.width(),
            &self.x0s()[range.clone()],
            &self.x1s()[range],
        ))
    }

    /// Returns the first timestamp.
    pub fn start_time(&self) -> Timestamp {
        self.timestamp(0).unwrap_or_default()
    }

    /// Returns the last timestamp.
    pub fn end_time(&self) -> Timestamp {
        self.timestamp(self.len.saturating_sub(1)).unwrap_or_default()
    }

    /// Decodes the page into owned columns.
    pub fn to_owned_samples(&self) -> OwnedSamples {
        let mut out = OwnedSamples::new(self.ty);
        let bytes = self.ty.bytes();
        let (x0s, x1s) = (self.x0s(), self.x1s());
        for (i, ts) in self.timestamps().enumerate() {
            let range = i * bytes..(i + 1) * bytes;
            out.push(ts, &x0s[range.clone()], &x1s[range]);
        }
        out
    }
}

impl fmt::Debug for Page {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Page")
            .field("width", &self.ty.width())
            .field("len", &self.len)
            .field("start_time", &self.start_time())
            .field("end_time", &self.end_time())
            .finish()
    }
}
