//! Integration tests for the page tier.
//!
//! These tests verify:
//! - Paged queries return exactly what in-memory queries return
//! - Pages outside the query window are never fetched
//! - Directories and pages survive a round trip through the filesystem

use proptest::prelude::*;
use std::cell::RefCell;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use wavestore::page::file::{FOOTER_SIZE, HEADER_SIZE};
use wavestore::{
    CompressionType, Compressor, Database, FsPageStore, MemPageStore, Page, PageConfig,
    PageDirectory, PageRef, PageStore, PageWriter, PagedSignal, Result, Signal, SignalBuilder,
    SignalId, SignalType, SyncMode, WaveError,
};
use tempfile::TempDir;

/// Page store that records every ref it is asked for.
#[derive(Default)]
struct CountingStore {
    inner: MemPageStore,
    fetched: RefCell<Vec<PageRef>>,
}

impl CountingStore {
    fn take_fetched(&self) -> Vec<PageRef> {
        self.fetched.take()
    }
}

impl PageStore for CountingStore {
    fn allocate(&mut self) -> PageRef {
        self.inner.allocate()
    }

    fn put(&mut self, page_ref: PageRef, data: &[u8]) -> Result<()> {
        self.inner.put(page_ref, data)
    }

    fn get(&self, page_ref: PageRef) -> Result<Vec<u8>> {
        self.fetched.borrow_mut().push(page_ref);
        self.inner.get(page_ref)
    }

    fn contains(&self, page_ref: PageRef) -> bool {
        self.inner.contains(page_ref)
    }
}

/// Rotates every byte by its position and counts pages passing through.
#[derive(Default)]
struct RotatingCodec {
    pages: AtomicUsize,
}

impl Compressor for RotatingCodec {
    fn compress(&self, input: &[u8]) -> Result<Vec<u8>> {
        self.pages.fetch_add(1, Ordering::Relaxed);
        Ok(input
            .iter()
            .enumerate()
            .map(|(i, b)| b.rotate_left(i as u32 % 8))
            .collect())
    }

    fn decompress(&self, input: &[u8], expected_len: usize) -> Result<Vec<u8>> {
        if input.len() != expected_len {
            return Err(WaveError::DecompressionError(format!(
                "expected {} bytes, got {}",
                expected_len,
                input.len()
            )));
        }
        Ok(input
            .iter()
            .enumerate()
            .map(|(i, b)| b.rotate_right(i as u32 % 8))
            .collect())
    }
}

/// Builds a signal of bursts: 4 samples one tick apart every 100 ticks,
/// starting at 100.
fn bursty_signal(bursts: u64) -> Signal {
    let mut b = SignalBuilder::new(SignalId(3), SignalType::quaternary(8).unwrap());
    for burst in 1..=bursts {
        for i in 0..4 {
            b.append(burst * 100 + i, &[(burst * 4 + i) as u8], &[0]).unwrap();
        }
    }
    b.build().unwrap()
}

fn spill_counting(signal: &Signal, max_elements: usize) -> PagedSignal<CountingStore> {
    let mut store = CountingStore::default();
    let config = PageConfig::default().with_max_elements(max_elements);
    let directory = PageWriter::new(config).write_signal(signal, &mut store).unwrap();
    PagedSignal::open(directory, store)
}

fn memory_query(signal: &Signal, start: u64, end: u64) -> (Vec<u64>, Vec<u8>, Vec<u8>) {
    let mut db = Database::new();
    db.insert(signal.clone()).unwrap();
    let result = db.query(signal.id(), start, end).unwrap().unwrap();
    let samples = result.samples();
    (
        samples.timestamps().to_vec(),
        samples.x0s().to_vec(),
        samples.x1s().to_vec(),
    )
}

#[test]
fn test_gap_query_reads_no_pages() {
    let signal = bursty_signal(5);
    let paged = spill_counting(&signal, 4);
    assert_eq!(paged.directory().len(), 5);

    // Window inside the gap after the first burst.
    let result = paged.query(150, 180).unwrap();
    assert_eq!(result.as_samples().timestamps(), &[103]);
    assert_eq!(result.as_samples().x0s(), &[7]);

    let result = paged.query(250, 280).unwrap();
    assert_eq!(result.as_samples().timestamps(), &[203]);
    assert_eq!(result.as_samples().x0s(), &[11]);
    assert!(paged.store().take_fetched().is_empty());
}

#[test]
fn test_query_reads_only_intersecting_pages() {
    let signal = bursty_signal(5);
    let paged = spill_counting(&signal, 4);
    let dir = paged.directory().clone();

    let result = paged.query(250, 401).unwrap();
    assert_eq!(result.as_samples().timestamps(), &[203, 300, 301, 302, 303, 400, 401]);

    let fetched = paged.store().take_fetched();
    let expected: Vec<PageRef> = dir
        .iter()
        .filter(|e| e.intersects(250, 401))
        .map(|e| e.page_ref)
        .collect();
    assert_eq!(fetched, expected);
    assert_eq!(fetched, vec![dir.get(2).unwrap().page_ref, dir.get(3).unwrap().page_ref]);
}

#[test]
fn test_query_before_first_sample() {
    let signal = bursty_signal(3);
    let paged = spill_counting(&signal, 4);

    let result = paged.query(0, 50).unwrap();
    assert!(result.is_empty());
    assert!(paged.store().take_fetched().is_empty());

    let result = paged.query(0, 101).unwrap();
    assert_eq!(result.as_samples().timestamps(), &[100, 101]);
    assert_eq!(memory_query(&signal, 0, 101).0, vec![100, 101]);
}

#[test]
fn test_paged_query_rejects_inverted_range() {
    let paged = spill_counting(&bursty_signal(2), 4);
    assert!(matches!(paged.query(10, 9), Err(WaveError::InvalidArgument(_))));
}

#[test]
fn test_fs_store_directory_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let pages_dir = temp_dir.path().join("pages");
    let dir_path = temp_dir.path().join("signal-3.dir");
    let signal = bursty_signal(20);

    // Write
    {
        let mut store = FsPageStore::open(&pages_dir, SyncMode::Fsync).unwrap();
        let mut db = Database::new();
        db.insert(signal.clone()).unwrap();
        let config = PageConfig::default().with_max_elements(16);
        let directory = db.spill(SignalId(3), &mut store, &config).unwrap().unwrap();
        assert_eq!(directory.len(), 5);
        directory.save(&dir_path, SyncMode::Fsync).unwrap();
    }

    // Read back
    let store = FsPageStore::open(&pages_dir, SyncMode::Fsync).unwrap();
    let directory = PageDirectory::load(&dir_path).unwrap();
    assert_eq!(directory.signal_id(), SignalId(3));
    assert_eq!(directory.compression(), CompressionType::Lz4);
    assert_eq!(directory.total_samples(), 80);

    let paged = PagedSignal::open(directory, store);
    assert_eq!(paged.load().unwrap(), signal);

    let result = paged.query(555, 1203).unwrap();
    let (timestamps, x0s, x1s) = memory_query(&signal, 555, 1203);
    assert_eq!(result.as_samples().timestamps(), timestamps.as_slice());
    assert_eq!(result.as_samples().x0s(), x0s.as_slice());
    assert_eq!(result.as_samples().x1s(), x1s.as_slice());
}

#[test]
fn test_custom_codec_directory_roundtrip() {
    let temp_dir = TempDir::new().unwrap();
    let pages_dir = temp_dir.path().join("pages");
    let dir_path = temp_dir.path().join("signal-3.dir");
    let signal = bursty_signal(6);
    let codec = Arc::new(RotatingCodec::default());

    {
        let mut store = FsPageStore::open(&pages_dir, SyncMode::None).unwrap();
        let writer = PageWriter::new(PageConfig::default().with_max_elements(8))
            .with_codec(codec.clone());
        let directory = writer.write_signal(&signal, &mut store).unwrap();
        assert_eq!(directory.len(), 3);
        directory.save(&dir_path, SyncMode::None).unwrap();
    }
    assert_eq!(codec.pages.load(Ordering::Relaxed), 3);

    let directory = PageDirectory::load(&dir_path).unwrap();
    assert_eq!(directory.compression(), CompressionType::Custom);
    let store = FsPageStore::open(&pages_dir, SyncMode::None).unwrap();
    let paged = PagedSignal::open(directory, store).with_codec(codec).unwrap();
    assert_eq!(paged.load().unwrap(), signal);

    let result = paged.query(250, 401).unwrap();
    let (timestamps, x0s, _) = memory_query(&signal, 250, 401);
    assert_eq!(result.as_samples().timestamps(), timestamps.as_slice());
    assert_eq!(result.as_samples().x0s(), x0s.as_slice());
}

#[test]
fn test_spill_unknown_signal() {
    let db = Database::new();
    let mut store = MemPageStore::new();
    let result = db.spill(SignalId(1), &mut store, &PageConfig::default()).unwrap();
    assert!(result.is_none());
}

#[test]
fn test_corrupt_directory_file() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("corrupt.dir");
    let mut store = MemPageStore::new();
    let directory = PageWriter::default()
        .write_signal(&bursty_signal(4), &mut store)
        .unwrap();
    directory.save(&path, SyncMode::None).unwrap();

    let mut data = std::fs::read(&path).unwrap();
    assert!(data.len() > HEADER_SIZE + FOOTER_SIZE);
    data[HEADER_SIZE + 3] ^= 0x40;
    std::fs::write(&path, &data).unwrap();

    assert!(matches!(
        PageDirectory::load(&path),
        Err(WaveError::ChecksumMismatch { .. })
    ));
}

#[test]
fn test_altered_page_bytes_detected() {
    let temp_dir = TempDir::new().unwrap();
    let signal = bursty_signal(2);
    let mut store = FsPageStore::open(temp_dir.path(), SyncMode::None).unwrap();
    let config = PageConfig::default()
        .with_max_elements(4)
        .with_compression(CompressionType::Raw);
    let directory = PageWriter::new(config).write_signal(&signal, &mut store).unwrap();

    // Swap the first two timestamps of page 0.
    let path = store.page_path(directory.get(0).unwrap().page_ref);
    let mut data = std::fs::read(&path).unwrap();
    let (first, second) = data[..16].split_at_mut(8);
    first.swap_with_slice(second);
    std::fs::write(&path, &data).unwrap();

    let page_ref = directory.get(0).unwrap().page_ref;
    let paged = PagedSignal::open(directory, store);
    assert!(matches!(
        paged.read_page(0),
        Err(WaveError::PageChecksumMismatch { page, .. }) if page == page_ref
    ));
    assert!(paged.read_page(1).is_ok());
    assert!(paged.query(100, 100).is_err());
}

#[test]
fn test_missing_page() {
    let temp_dir = TempDir::new().unwrap();
    let mut store = FsPageStore::open(temp_dir.path(), SyncMode::None).unwrap();
    let directory = PageWriter::default()
        .write_signal(&bursty_signal(1), &mut store)
        .unwrap();
    let page_ref = directory.get(0).unwrap().page_ref;
    std::fs::remove_file(store.page_path(page_ref)).unwrap();

    let paged = PagedSignal::open(directory, store);
    assert!(matches!(paged.load(), Err(WaveError::PageNotFound(r)) if r == page_ref));
}

#[test]
fn test_pages_are_write_once() {
    let mut store = MemPageStore::new();
    let directory = PageWriter::default()
        .write_signal(&bursty_signal(1), &mut store)
        .unwrap();
    let page_ref = directory.get(0).unwrap().page_ref;
    assert!(matches!(
        store.put(page_ref, b"overwrite"),
        Err(WaveError::PageExists(r)) if r == page_ref
    ));
}

#[test]
fn test_rewrite_page_then_query() {
    let signal = bursty_signal(3);
    let mut paged = spill_counting(&signal, 4);

    let mut b = SignalBuilder::new(SignalId(3), SignalType::quaternary(8).unwrap());
    b.append(200, &[0xaa], &[0]).unwrap();
    b.append(250, &[0xbb], &[0]).unwrap();
    let patch = b.build().unwrap();
    let page = Page::from_samples(&patch.samples().unwrap()).unwrap();

    let entry = paged.rewrite_page(1, &page).unwrap();
    assert_eq!(entry.end_time, 250);
    assert_eq!(entry.last_x0, vec![0xbb]);

    let result = paged.query(260, 299).unwrap();
    assert_eq!(result.as_samples().timestamps(), &[250]);
    assert_eq!(result.as_samples().x0s(), &[0xbb]);
    assert!(paged.store().take_fetched().is_empty());
}

#[test]
fn test_wide_signal_capacity() {
    let ty = SignalType::quaternary(1024).unwrap();
    let mut b = SignalBuilder::new(SignalId(8), ty);
    for i in 0..200u64 {
        b.append(i, &[i as u8; 128], &[0; 128]).unwrap();
    }
    let signal = b.build().unwrap();

    let mut store = MemPageStore::new();
    let directory = PageWriter::default().write_signal(&signal, &mut store).unwrap();
    // 16 KiB / (8 + 2 * 128) bytes per sample
    assert_eq!(directory.get(0).unwrap().len, 62);
    assert_eq!(directory.len(), 4);

    let paged = PagedSignal::open(directory, store);
    assert_eq!(paged.load().unwrap(), signal);
}

/// Strategy for an ordered signal with irregular gaps.
fn gappy_signal_strategy() -> impl Strategy<Value = Signal> {
    prop::collection::vec((1u64..500, any::<u8>(), 0u8..4), 1..300).prop_map(|rows| {
        let mut b = SignalBuilder::new(SignalId(6), SignalType::quaternary(2).unwrap());
        let mut ts = 0;
        for (delta, x0, x1) in rows {
            ts += delta;
            b.append(ts, &[x0 & 0b11], &[x1]).unwrap();
        }
        b.build().unwrap()
    })
}

proptest! {
    /// Paged queries equal in-memory queries for any window and page size.
    #[test]
    fn test_paged_query_matches_memory(
        signal in gappy_signal_strategy(),
        max_elements in 1usize..40,
        a in 0u64..160_000,
        b in 0u64..160_000,
    ) {
        let (start, end) = (a.min(b), a.max(b));
        let paged = spill_counting(&signal, max_elements);

        let result = paged.query(start, end).unwrap();
        let (timestamps, x0s, x1s) = memory_query(&signal, start, end);
        prop_assert_eq!(result.as_samples().timestamps(), timestamps.as_slice());
        prop_assert_eq!(result.as_samples().x0s(), x0s.as_slice());
        prop_assert_eq!(result.as_samples().x1s(), x1s.as_slice());

        let dir = paged.directory();
        for page_ref in paged.store().take_fetched() {
            let entry = dir.iter().find(|e| e.page_ref == page_ref).unwrap();
            prop_assert!(entry.intersects(start, end));
        }
    }
}
