//! Error and Result types for wavestore operations.

use crate::page::PageRef;
use crate::signal::SignalId;
use std::collections::TryReserveError;
use std::io;
use thiserror::Error;

/// A convenience `Result` type for wavestore operations.
pub type Result<T> = std::result::Result<T, WaveError>;

/// The error type for signal storage and query operations.
#[derive(Debug, Error)]
pub enum WaveError {
    /// A caller-established invariant does not hold (bad width, column
    /// lengths that disagree, `start > end`, query on a derived signal, ...).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A signal with this id is already stored.
    #[error("Signal {0} already exists")]
    Conflict(SignalId),

    /// A page with this ref has already been written.
    #[error("Page {0} already exists")]
    PageExists(PageRef),

    /// A page referenced by the directory is missing from the store.
    #[error("Page not found: {0}")]
    PageNotFound(PageRef),

    /// Growing a column buffer failed.
    #[error("Allocation failed: {0}")]
    Allocation(#[from] TryReserveError),

    /// Invalid magic bytes in a directory file.
    #[error("Invalid magic bytes: expected WPDX, got {0:?}")]
    InvalidMagic([u8; 4]),

    /// Unsupported directory file format version.
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    /// Stored checksum does not match the recomputed one.
    #[error("Checksum mismatch: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// Checksum recorded on disk.
        expected: u32,
        /// Checksum computed from the bytes read.
        actual: u32,
    },

    /// Stored page bytes do not hash to the value in the directory entry.
    #[error("Page {page} checksum mismatch: expected {expected:016x}, got {actual:016x}")]
    PageChecksumMismatch {
        /// Page whose bytes were fetched.
        page: PageRef,
        /// Hash recorded in the directory.
        expected: u64,
        /// Hash of the fetched bytes.
        actual: u64,
    },

    /// Error during compression.
    #[error("Compression error: {0}")]
    CompressionError(String),

    /// Error during decompression.
    #[error("Decompression error: {0}")]
    DecompressionError(String),

    /// A decompressed page body does not match its directory entry.
    #[error("Corrupt page: {0}")]
    CorruptPage(String),

    /// Underlying I/O error.
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
}

impl WaveError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        WaveError::InvalidArgument(msg.into())
    }
}
