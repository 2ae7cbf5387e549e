//! Page stores.
//!
//! A [`PageStore`] holds compressed page bodies as opaque, write-once objects.
//! Refs are handed out by the store and never reused, so a directory entry
//! always names exactly the bytes that were written for it.

use crate::error::{Result, WaveError};
use crate::page::PageRef;
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

/// File extension of stored pages.
pub const PAGE_EXTENSION: &str = "page";

const TMP_SUFFIX: &str = ".tmp";

/// Suffix of an interrupted page write: `{ref:016x}.page.tmp`.
const PAGE_TMP_SUFFIX: &str = ".page.tmp";

/// Sync mode for filesystem durability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SyncMode {
    /// Fsync files and directories (default, highest durability).
    #[default]
    Fsync,
    /// Use fdatasync for files (skip metadata update, faster).
    Fdatasync,
    /// No sync (fastest, lowest durability - for testing only).
    None,
}

pub(crate) fn sync_file(file: &File, sync_mode: SyncMode) -> Result<()> {
    match sync_mode {
        SyncMode::Fsync => file.sync_all()?,
        SyncMode::Fdatasync => file.sync_data()?,
        SyncMode::None => {}
    }
    Ok(())
}

pub(crate) fn sync_dir(dir: &Path, sync_mode: SyncMode) -> Result<()> {
    if sync_mode != SyncMode::None {
        File::open(dir)?.sync_all()?;
    }
    Ok(())
}

/// Writes `data` to `path` through a temporary file.
///
/// 1. Write to `{path}.tmp`
/// 2. Sync the temp file
/// 3. Sync the directory (file entry persistence)
/// 4. Rename to `path`
/// 5. Sync the directory again (rename persistence)
pub(crate) fn write_atomic(path: &Path, data: &[u8], sync_mode: SyncMode) -> Result<()> {
    let mut tmp_path = path.as_os_str().to_owned();
    tmp_path.push(TMP_SUFFIX);
    let tmp_path = PathBuf::from(tmp_path);
    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());

    {
        let mut file = File::create(&tmp_path)?;
        file.write_all(data)?;
        file.flush()?;
        sync_file(&file, sync_mode)?;
    }
    if let Some(dir) = dir {
        sync_dir(dir, sync_mode)?;
    }
    fs::rename(&tmp_path, path)?;
    if let Some(dir) = dir {
        sync_dir(dir, sync_mode)?;
    }
    Ok(())
}

/// Write-once storage for compressed page bodies.
pub trait PageStore {
    /// Reserves a fresh ref. Refs are never handed out twice.
    fn allocate(&mut self) -> PageRef;

    /// Stores `data` under `page_ref`.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::PageExists` if something was already written there.
    fn put(&mut self, page_ref: PageRef, data: &[u8]) -> Result<()>;

    /// Fetches the bytes stored under `page_ref`.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::PageNotFound` if nothing was written there.
    fn get(&self, page_ref: PageRef) -> Result<Vec<u8>>;

    /// Returns true if a page is stored under `page_ref`.
    fn contains(&self, page_ref: PageRef) -> bool;
}

impl<S: PageStore + ?Sized> PageStore for &mut S {
    fn allocate(&mut self) -> PageRef {
        (**self).allocate()
    }

    fn put(&mut self, page_ref: PageRef, data: &[u8]) -> Result<()> {
        (**self).put(page_ref, data)
    }

    fn get(&self, page_ref: PageRef) -> Result<Vec<u8>> {
        (**self).get(page_ref)
    }

    fn contains(&self, page_ref: PageRef) -> bool {
        (**self).contains(page_ref)
    }
}

/// Page store kept in memory.
#[derive(Debug, Default)]
pub struct MemPageStore {
    pages: HashMap<PageRef, Vec<u8>>,
    next: u64,
}

impl MemPageStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored pages.
    pub fn len(&self) -> usize {
        self.pages.len()
    }

    /// Returns true if no pages are stored.
    pub fn is_empty(&self) -> bool {
        self.pages.is_empty()
    }

    /// Returns the total stored bytes.
    pub fn stored_bytes(&self) -> usize {
        self.pages.values().map(Vec::len).sum()
    }
}

impl PageStore for MemPageStore {
    fn allocate(&mut self) -> PageRef {
        let page_ref = PageRef(self.next);
        self.next += 1;
        page_ref
    }

    fn put(&mut self, page_ref: PageRef, data: &[u8]) -> Result<()> {
        if self.pages.contains_key(&page_ref) {
            return Err(WaveError::PageExists(page_ref));
        }
        self.pages.insert(page_ref, data.to_vec());
        self.next = self.next.max(page_ref.0 + 1);
        Ok(())
    }

    fn get(&self, page_ref: PageRef) -> Result<Vec<u8>> {
        self.pages
            .get(&page_ref)
            .cloned()
            .ok_or(WaveError::PageNotFound(page_ref))
    }

    fn contains(&self, page_ref: PageRef) -> bool {
        self.pages.contains_key(&page_ref)
    }
}

/// Page store writing one file per page into a directory.
///
/// Pages are named `{ref:016x}.page`. Writes go through a temp file and an
/// atomic rename, so a crash leaves either the whole page or nothing.
#[derive(Debug)]
pub struct FsPageStore {
    dir: PathBuf,
    sync_mode: SyncMode,
    next: u64,
}

impl FsPageStore {
    /// Opens (creating if needed) a page store rooted at `dir`.
    ///
    /// Leftover `*.page.tmp` files from interrupted page writes are removed,
    /// and ref allocation resumes after the highest existing page. Other temp
    /// files (such as a directory being saved alongside) are left alone.
    pub fn open(dir: impl AsRef<Path>, sync_mode: SyncMode) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let mut next = 0u64;
        let mut pages = 0usize;
        for entry in fs::read_dir(&dir)? {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.ends_with(PAGE_TMP_SUFFIX) {
                warn!(path = %path.display(), "removing incomplete page write");
                fs::remove_file(&path)?;
                continue;
            }
            if let Some(page_ref) = parse_page_name(name) {
                next = next.max(page_ref.0 + 1);
                pages += 1;
            }
        }

        debug!(dir = %dir.display(), pages, next, "opened page store");
        Ok(Self {
            dir,
            sync_mode,
            next,
        })
    }

    /// Returns the store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the file path of `page_ref`.
    pub fn page_path(&self, page_ref: PageRef) -> PathBuf {
        self.dir.join(format!("{}.{}", page_ref, PAGE_EXTENSION))
    }
}

fn parse_page_name(name: &str) -> Option<PageRef> {
    let stem = name.strip_suffix(PAGE_EXTENSION)?.strip_suffix('.')?;
    if stem.len() != 16 {
        return None;
    }
    u64::from_str_radix(stem, 16).ok().map(PageRef)
}

impl PageStore for FsPageStore {
    fn allocate(&mut self) -> PageRef {
        let page_ref = PageRef(self.next);
        self.next += 1;
        page_ref
    }

    fn put(&mut self, page_ref: PageRef, data: &[u8]) -> Result<()> {
        let path = self.page_path(page_ref);
        if path.exists() {
            return Err(WaveError::PageExists(page_ref));
        }
        write_atomic(&path, data, self.sync_mode)?;
        self.next = self.next.max(page_ref.0 + 1);
        trace!(page = %page_ref, bytes = data.len(), "stored page");
        Ok(())
    }

    fn get(&self, page_ref: PageRef) -> Result<Vec<u8>> {
        match fs::read(self.page_path(page_ref)) {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(WaveError::PageNotFound(page_ref))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn contains(&self, page_ref: PageRef) -> bool {
        self.page_path(page_ref).exists()
    }
}
