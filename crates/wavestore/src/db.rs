//! Database - identity mapping and range queries over sealed signals.
//!
//! Signals live in an append-only arena addressed by a dense [`SignalRef`].
//! A hash map translates the caller's permanent [`SignalId`] into that ref.
//! Refs are only meaningful for the lifetime of one `Database` value.
//!
//! # Range queries
//!
//! A query over `[start, end]` returns the contiguous run of change samples
//! needed to reconstruct the step function over that window:
//!
//! ```text
//! timestamps:   0    10    30    50    70
//! query 20..=49:     [10    30]            lo = ub(20) - 1 = 1, hi = ub(49) = 3
//! query 80..=90:                    [70]   lo = 4, hi = 5
//! ```
//!
//! where `ub(t)` is the number of samples at or before `t`. The sample held at
//! `start` is always included, even when it changed before the window opened.

use crate::error::{Result, WaveError};
use crate::page::reader::PageWriter;
use crate::page::store::PageStore;
use crate::page::{PageConfig, PageDirectory};
use crate::signal::{Samples, Signal, SignalId, SignalType, Timestamp};
use std::collections::HashMap;
use std::fmt;
use std::ops::Range;
use tracing::{debug, warn};

/// Default number of signal slots reserved up front.
pub const DEFAULT_INITIAL_CAPACITY: usize = 0;

/// Returns the number of timestamps `<= t`, i.e. the index of the first
/// timestamp strictly greater than `t`.
///
/// `timestamps` must be sorted in increasing order.
pub fn upper_bound(timestamps: &[Timestamp], t: Timestamp) -> usize {
    timestamps.partition_point(|&ts| ts <= t)
}

/// Computes the sample range `[lo, hi)` answering a query over `[start, end]`.
///
/// `lo` is the last sample at or before `start`. If `start` precedes the first
/// sample, `lo` is clamped to 0.
///
/// If `end` also precedes the first sample the range is empty. No value is
/// held anywhere in such a window, so this is the one case where the result
/// does not contain at least one sample; every other window yields `hi > lo`.
pub fn query_range(timestamps: &[Timestamp], start: Timestamp, end: Timestamp) -> Range<usize> {
    debug_assert!(start <= end);
    let lo = upper_bound(timestamps, start).saturating_sub(1);
    let hi = upper_bound(timestamps, end);
    if hi == 0 {
        return 0..0;
    }
    debug_assert!(hi > lo && hi <= timestamps.len());
    lo..hi
}

/// Dense handle to a stored signal, valid for one `Database` instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalRef(u32);

impl SignalRef {
    /// Returns the position of the signal in the arena.
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for SignalRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Configuration for a [`Database`].
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Number of signals to reserve room for at creation.
    pub initial_capacity: usize,

    /// Reject signals whose timestamps are not strictly increasing.
    ///
    /// Ordering is the producer's responsibility; when this is `false`
    /// (the default) it is not re-checked on insert.
    pub verify_ordering: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            initial_capacity: DEFAULT_INITIAL_CAPACITY,
            verify_ordering: false,
        }
    }
}

impl DatabaseConfig {
    /// Sets the initial signal capacity.
    pub fn with_initial_capacity(mut self, capacity: usize) -> Self {
        self.initial_capacity = capacity;
        self
    }

    /// Enables or disables timestamp ordering checks on insert.
    pub fn with_verify_ordering(mut self, verify: bool) -> Self {
        self.verify_ordering = verify;
        self
    }
}

/// Result of a range query, borrowing the stored signal.
#[derive(Debug, Clone, Copy)]
pub struct QueryResult<'a> {
    id: SignalId,
    samples: Samples<'a>,
}

impl<'a> QueryResult<'a> {
    /// Returns the queried signal id.
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Returns the signal type.
    pub fn signal_type(&self) -> SignalType {
        self.samples.signal_type()
    }

    /// Returns the number of samples in the window.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// Returns true if the window holds no samples.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Returns the samples of the window.
    pub fn samples(&self) -> Samples<'a> {
        self.samples
    }
}

/// In-memory store of sealed signals.
#[derive(Debug, Default)]
pub struct Database {
    signals: Vec<Signal>,
    map: HashMap<SignalId, SignalRef>,
    config: DatabaseConfig,
}

impl Database {
    /// Creates an empty database with the default configuration.
    pub fn new() -> Self {
        Self::with_config(DatabaseConfig::default())
    }

    /// Creates an empty database with the given configuration.
    pub fn with_config(config: DatabaseConfig) -> Self {
        Self {
            signals: Vec::with_capacity(config.initial_capacity),
            map: HashMap::with_capacity(config.initial_capacity),
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// Takes ownership of `signal` and publishes it under its id.
    ///
    /// # Errors
    ///
    /// - `WaveError::InvalidArgument` if the payload violates the signal invariants
    ///   (or, with `verify_ordering`, if timestamps are not strictly increasing)
    /// - `WaveError::Conflict` if a signal with the same id is already stored
    /// - `WaveError::Allocation` if the store cannot grow
    ///
    /// On error the database is unchanged.
    pub fn insert(&mut self, signal: Signal) -> Result<SignalRef> {
        signal.validate()?;
        if self.config.verify_ordering {
            signal.check_ordering()?;
        }

        let id = signal.id();
        if self.map.contains_key(&id) {
            warn!(signal = %id, "rejected duplicate signal id");
            return Err(WaveError::Conflict(id));
        }

        let index = u32::try_from(self.signals.len())
            .map_err(|_| WaveError::invalid("signal store is full"))?;
        self.signals.try_reserve(1)?;
        self.map.try_reserve(1)?;

        let signal_ref = SignalRef(index);
        debug!(signal = %id, r = %signal_ref, samples = signal.len(), "inserted signal");
        self.signals.push(signal);
        self.map.insert(id, signal_ref);
        Ok(signal_ref)
    }

    /// Returns the signal stored under `id`.
    pub fn get(&self, id: SignalId) -> Option<&Signal> {
        self.resolve(id).and_then(|r| self.get_by_ref(r))
    }

    /// Translates a permanent id into the signal's dense ref.
    pub fn resolve(&self, id: SignalId) -> Option<SignalRef> {
        self.map.get(&id).copied()
    }

    /// Returns the signal at a dense ref.
    pub fn get_by_ref(&self, signal_ref: SignalRef) -> Option<&Signal> {
        self.signals.get(signal_ref.index())
    }

    /// Returns true if a signal with `id` is stored.
    pub fn contains(&self, id: SignalId) -> bool {
        self.map.contains_key(&id)
    }

    /// Returns the number of stored signals.
    pub fn len(&self) -> usize {
        self.signals.len()
    }

    /// Returns true if no signals are stored.
    pub fn is_empty(&self) -> bool {
        self.signals.is_empty()
    }

    /// Iterates over stored signals in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (SignalRef, &Signal)> {
        self.signals
            .iter()
            .enumerate()
            .map(|(i, s)| (SignalRef(i as u32), s))
    }

    /// Returns the samples of signal `id` needed to reconstruct its value over
    /// `[start, end]`.
    ///
    /// Returns `Ok(None)` if no signal has that id.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if `start > end` or the signal is derived.
    pub fn query(
        &self,
        id: SignalId,
        start: Timestamp,
        end: Timestamp,
    ) -> Result<Option<QueryResult<'_>>> {
        if start > end {
            return Err(WaveError::invalid(format!(
                "query start {} is after end {}",
                start, end
            )));
        }
        let Some(signal) = self.get(id) else {
            return Ok(None);
        };
        let samples = signal
            .samples()
            .ok_or_else(|| WaveError::invalid(format!("signal {} is derived", id)))?;

        let range = query_range(samples.timestamps(), start, end);
        Ok(Some(QueryResult {
            id,
            samples: samples.slice(range.start, range.end),
        }))
    }

    /// Writes signal `id` to `store` as a sequence of pages and returns the
    /// page directory describing them.
    ///
    /// Returns `Ok(None)` if no signal has that id.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` for derived signals or widths too
    /// large for a page, and any store or codec error.
    pub fn spill<S: PageStore>(
        &self,
        id: SignalId,
        store: &mut S,
        config: &PageConfig,
    ) -> Result<Option<PageDirectory>> {
        let Some(signal) = self.get(id) else {
            return Ok(None);
        };
        let writer = PageWriter::new(config.clone());
        writer.write_signal(signal, store).map(Some)
    }
}
