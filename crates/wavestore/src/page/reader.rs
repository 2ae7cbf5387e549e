//! Writing signals into pages and querying them back.
//!
//! # Paged range queries
//!
//! A query over `[start, end]` needs the sample held at `start` plus every
//! change up to `end`. The directory answers most of that without I/O:
//!
//! ```text
//! pages:    [0 ....... 90]   [100 ..... 190]        [300 ..... 390]
//! query 200..=320:                        ^ held value (entry tail)  ^ read
//! ```
//!
//! Only pages whose time range meets the window are fetched. When `start`
//! falls in a gap after a page, the held value is taken from that page's
//! directory entry instead of from the page itself.

use crate::db::query_range;
use crate::error::{Result, WaveError};
use crate::page::codec::{CompressionType, Compressor};
use crate::page::file::{PageDirectory, PageIndexEntry};
use crate::page::store::PageStore;
use crate::page::{Page, PageConfig, PageLayout, PageRef};
use crate::signal::{OwnedSamples, Signal, Timestamp};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};
use xxhash_rust::xxh64::xxh64;

const CHECKSUM_SEED: u64 = 0;

fn missing_codec() -> WaveError {
    WaveError::invalid("custom compression requires a codec supplied with `with_codec`")
}

/// Cuts signals into pages and writes them to a [`PageStore`].
///
/// Pages are compressed with the codec of `config.compression` unless one is
/// injected with [`with_codec`](Self::with_codec). The directory is tagged
/// with the codec's own [`CompressionType`], so the tag always names the
/// codec that wrote the pages.
#[derive(Clone)]
pub struct PageWriter {
    config: PageConfig,
    codec: Option<Arc<dyn Compressor>>,
}

impl Default for PageWriter {
    fn default() -> Self {
        Self::new(PageConfig::default())
    }
}

impl fmt::Debug for PageWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageWriter")
            .field("config", &self.config)
            .field("codec", &self.compression())
            .finish()
    }
}

impl PageWriter {
    /// Creates a writer with the given configuration.
    pub fn new(config: PageConfig) -> Self {
        let codec = config.compression.codec();
        Self { config, codec }
    }

    /// Replaces the page codec.
    pub fn with_codec(mut self, codec: Arc<dyn Compressor>) -> Self {
        self.codec = Some(codec);
        self
    }

    /// Returns the configuration.
    pub fn config(&self) -> &PageConfig {
        &self.config
    }

    /// Returns the tag directories written by this writer carry.
    pub fn compression(&self) -> Option<CompressionType> {
        self.codec.as_ref().map(|c| c.compression_type())
    }

    fn codec(&self) -> Result<&dyn Compressor> {
        self.codec.as_deref().ok_or_else(missing_codec)
    }

    /// Writes every sample of `signal` and returns the directory of the pages.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if the signal is derived, empty,
    /// unordered, or too wide for a page, or if `Custom` compression is
    /// configured without a codec. Store errors are propagated; pages written
    /// before the failure are left in the store unreferenced.
    pub fn write_signal<S: PageStore>(
        &self,
        signal: &Signal,
        store: &mut S,
    ) -> Result<PageDirectory> {
        let samples = signal
            .samples()
            .ok_or_else(|| WaveError::invalid(format!("signal {} is derived", signal.id())))?;
        signal.validate()?;
        signal.check_ordering()?;

        let ty = samples.signal_type();
        let capacity = PageLayout::capacity(ty, self.config.max_elements)?;
        let codec = self.codec()?;
        let mut directory = PageDirectory::new(signal.id(), ty, codec.compression_type());

        for lo in (0..samples.len()).step_by(capacity) {
            let hi = (lo + capacity).min(samples.len());
            let page = Page::from_samples(&samples.slice(lo, hi))?;
            let entry = self.write_page(&page, store)?;
            directory.push(entry)?;
        }

        debug!(
            signal = %signal.id(),
            samples = samples.len(),
            pages = directory.len(),
            capacity,
            "spilled signal to pages"
        );
        Ok(directory)
    }

    /// Compresses `page` into a freshly allocated ref and returns its entry.
    ///
    /// The entry belongs in a directory tagged with
    /// [`compression`](Self::compression).
    pub fn write_page<S: PageStore>(&self, page: &Page, store: &mut S) -> Result<PageIndexEntry> {
        let encoded = EncodedPage::encode(page, self.codec()?)?;
        let entry = encoded.entry(store.allocate(), page);
        encoded.store(&entry, store)?;
        Ok(entry)
    }
}

/// Compressed page bytes and their hash, ready to be stored.
struct EncodedPage {
    data: Vec<u8>,
    checksum: u64,
}

impl EncodedPage {
    fn encode(page: &Page, codec: &dyn Compressor) -> Result<Self> {
        let data = codec.compress(page.body())?;
        let checksum = xxh64(&data, CHECKSUM_SEED);
        Ok(Self { data, checksum })
    }

    fn entry(&self, page_ref: PageRef, page: &Page) -> PageIndexEntry {
        PageIndexEntry::for_page(page_ref, page, self.checksum)
    }

    fn store<S: PageStore>(&self, entry: &PageIndexEntry, store: &mut S) -> Result<()> {
        store.put(entry.page_ref, &self.data)?;
        trace!(
            page = %entry.page_ref,
            samples = entry.len,
            stored = self.data.len(),
            "wrote page"
        );
        Ok(())
    }
}

/// A spilled signal: its page directory plus the store holding the pages.
pub struct PagedSignal<S> {
    directory: PageDirectory,
    store: S,
    codec: Option<Arc<dyn Compressor>>,
}

impl<S: fmt::Debug> fmt::Debug for PagedSignal<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PagedSignal")
            .field("directory", &self.directory)
            .field("store", &self.store)
            .field("has_codec", &self.codec.is_some())
            .finish()
    }
}

impl<S: PageStore> PagedSignal<S> {
    /// Pairs a directory with the store its pages were written to.
    ///
    /// Directories tagged with a built-in compression type get their codec
    /// here; `Custom` directories need [`with_codec`](Self::with_codec)
    /// before any page can be read.
    pub fn open(directory: PageDirectory, store: S) -> Self {
        let codec = directory.compression().codec();
        Self {
            directory,
            store,
            codec,
        }
    }

    /// Supplies the codec the pages were written with.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if the codec's compression type
    /// differs from the directory's tag.
    pub fn with_codec(mut self, codec: Arc<dyn Compressor>) -> Result<Self> {
        if codec.compression_type() != self.directory.compression() {
            return Err(WaveError::invalid(format!(
                "codec {:?} cannot read pages tagged {:?}",
                codec.compression_type(),
                self.directory.compression()
            )));
        }
        self.codec = Some(codec);
        Ok(self)
    }

    fn codec(&self) -> Result<&dyn Compressor> {
        self.codec.as_deref().ok_or_else(missing_codec)
    }

    /// Returns the page directory.
    pub fn directory(&self) -> &PageDirectory {
        &self.directory
    }

    /// Returns the page store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Splits into the directory and the store.
    pub fn into_parts(self) -> (PageDirectory, S) {
        (self.directory, self.store)
    }

    /// Fetches, decompresses and checks page `index`.
    ///
    /// # Errors
    ///
    /// - `WaveError::InvalidArgument` if `index` is out of range or no codec
    ///   is available for a `Custom` directory
    /// - `WaveError::PageNotFound` if the store lost the page
    /// - `WaveError::PageChecksumMismatch` if the stored bytes were altered
    /// - `WaveError::DecompressionError` or `WaveError::CorruptPage` if the
    ///   stored bytes do not decode to the page the entry describes
    pub fn read_page(&self, index: usize) -> Result<Page> {
        let entry = self.directory.get(index).ok_or_else(|| {
            WaveError::invalid(format!(
                "page index {} out of range ({} pages)",
                index,
                self.directory.len()
            ))
        })?;
        let ty = self.directory.signal_type();
        let len = entry.len as usize;

        let data = self.store.get(entry.page_ref)?;
        let actual = xxh64(&data, CHECKSUM_SEED);
        if actual != entry.checksum {
            return Err(WaveError::PageChecksumMismatch {
                page: entry.page_ref,
                expected: entry.checksum,
                actual,
            });
        }

        let body_len = PageLayout::new(ty, len).body_len();
        let body = self.codec()?.decompress(&data, body_len)?;
        let page = Page::from_body(ty, len, &body)?;

        if PageIndexEntry::for_page(entry.page_ref, &page, entry.checksum) != *entry {
            return Err(WaveError::CorruptPage(format!(
                "page {} does not match its directory entry",
                entry.page_ref
            )));
        }

        trace!(page = %entry.page_ref, samples = len, "read page");
        Ok(page)
    }

    /// Returns the samples needed to reconstruct the value over `[start, end]`.
    ///
    /// The result equals what an in-memory query over the whole signal
    /// returns. Pages that do not meet the window are never fetched.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if `start > end`, plus any error
    /// from [`read_page`](Self::read_page).
    pub fn query(&self, start: Timestamp, end: Timestamp) -> Result<OwnedSamples> {
        if start > end {
            return Err(WaveError::invalid(format!(
                "query start {} is after end {}",
                start, end
            )));
        }

        let mut out = OwnedSamples::new(self.directory.signal_type());
        let overlap = self.directory.overlapping(start, end);

        // Held value from a page that ended before the window opened.
        if let Some(k) = self.directory.locate(start) {
            if k < overlap.start {
                let entry = &self.directory.entries()[k];
                out.push(entry.end_time, &entry.last_x0, &entry.last_x1);
            }
        }

        let pages_read = overlap.len();
        for index in overlap {
            let page = self.read_page(index)?;
            let timestamps: Vec<Timestamp> = page.timestamps().collect();
            let range = query_range(&timestamps, start, end);
            let bytes = page.signal_type().bytes();
            let (x0s, x1s) = (page.x0s(), page.x1s());
            for i in range {
                let plane = i * bytes..(i + 1) * bytes;
                out.push(timestamps[i], &x0s[plane.clone()], &x1s[plane]);
            }
        }

        debug!(
            signal = %self.directory.signal_id(),
            start,
            end,
            pages_read,
            samples = out.len(),
            "paged query"
        );
        Ok(out)
    }

    /// Reads every page back into an in-memory signal.
    pub fn load(&self) -> Result<Signal> {
        let mut out = OwnedSamples::new(self.directory.signal_type());
        for index in 0..self.directory.len() {
            let page = self.read_page(index)?;
            out.extend_from(&page.to_owned_samples().as_samples());
        }
        out.into_signal(self.directory.signal_id())
    }

    /// Replaces page `index` with `page`, written under a fresh ref.
    ///
    /// The old page object stays in the store; only the directory stops
    /// referencing it. Returns the new entry.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if the page type differs from the
    /// signal's or its time range would overlap a neighbouring page. On error
    /// the directory is unchanged.
    pub fn rewrite_page(&mut self, index: usize, page: &Page) -> Result<PageIndexEntry> {
        if page.signal_type() != self.directory.signal_type() {
            return Err(WaveError::invalid(format!(
                "page of width {} does not belong to a signal of width {}",
                page.signal_type().width(),
                self.directory.signal_type().width()
            )));
        }

        let encoded = EncodedPage::encode(page, self.codec()?)?;
        let entry = encoded.entry(self.store.allocate(), page);
        let old = self.directory.replace(index, entry.clone())?;
        if let Err(e) = encoded.store(&entry, &mut self.store) {
            self.directory.replace(index, old)?;
            return Err(e);
        }

        debug!(
            signal = %self.directory.signal_id(),
            index,
            old = %old.page_ref,
            new = %entry.page_ref,
            "rewrote page"
        );
        Ok(entry)
    }
}
