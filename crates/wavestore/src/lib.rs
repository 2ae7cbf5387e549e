//! Wavestore - Waveform Signal Storage Engine
//!
//! This crate stores digital waveforms as change samples and answers time
//! range queries over them. Every sample carries a 4-state value (0, 1, X, Z
//! per bit) encoded as two bit-planes.
//!
//! # Components
//!
//! - [`SignalBuilder`]: Capacity-disciplined accumulation of samples
//! - [`Database`]: Id mapping and range queries over sealed signals
//! - [`PageWriter`] / [`PagedSignal`]: Spilling signals to compressed pages
//!   and querying them without reading unrelated pages
//!
//! # Example
//!
//! ```rust
//! use wavestore::{Database, SignalBuilder, SignalId, SignalType};
//!
//! let mut builder = SignalBuilder::new(SignalId(1), SignalType::quaternary(8)?);
//! builder.append(0, &[0x00], &[0x00])?;
//! builder.append(10, &[0x8f], &[0x00])?;
//! builder.append(30, &[0x6d], &[0x00])?;
//!
//! let mut db = Database::new();
//! db.insert(builder.build()?)?;
//!
//! // The value held at 20 changed at 10.
//! let result = db.query(SignalId(1), 20, 25)?.expect("signal exists");
//! assert_eq!(result.samples().timestamps(), &[10]);
//! # Ok::<(), wavestore::WaveError>(())
//! ```

#![deny(missing_docs)]

pub mod db;
pub mod error;
pub mod page;
pub mod signal;

pub use db::{Database, DatabaseConfig, QueryResult, SignalRef};
pub use error::{Result, WaveError};
pub use page::{
    CompressionType, Compressor, FsPageStore, MemPageStore, Page, PageConfig, PageDirectory,
    PageIndexEntry, PageRef, PageStore, PageWriter, PagedSignal, SyncMode,
};
pub use signal::{
    Logic, OwnedSamples, Quaternary, Samples, Shape, Signal, SignalBuilder, SignalId, SignalType,
    Timestamp, TypeKind,
};
