//! Signal data model.
//!
//! A [`Signal`] is the immutable change-series of one logical waveform signal.
//! Its payload is three parallel columns of the same length:
//!
//! ```text
//! timestamps: [u64; len]                 strictly increasing
//! x0s:        [u8;  len * bytes_per_sample]
//! x1s:        [u8;  len * bytes_per_sample]
//! ```
//!
//! Sample `i` owns bytes `i * bytes .. (i + 1) * bytes` of each bit-plane.
//! Signals are produced by a [`SignalBuilder`] and are never mutated after
//! construction.

pub mod builder;
pub mod quaternary;

pub use builder::SignalBuilder;
pub use quaternary::{Logic, Quaternary};

use crate::db::upper_bound;
use crate::error::{Result, WaveError};
use std::fmt;

/// Timestamp of a change sample. Opaque and monotonically increasing.
pub type Timestamp = u64;

/// Returns the number of bytes one bit-plane of a `width`-bit sample occupies.
///
/// This is `ceil(width / 8)`; every buffer length in the crate derives from it.
pub const fn bytes_for_width(width: u32) -> usize {
    (width as usize).div_ceil(8)
}

/// Caller-assigned permanent identifier of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SignalId(pub u64);

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for SignalId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

/// Value encoding of a signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(u8)]
pub enum TypeKind {
    /// 4-state logic (0/1/X/Z) stored as two bit-planes.
    #[default]
    Quaternary = 0,
}

impl TypeKind {
    /// Creates a TypeKind from a u8 value.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Quaternary),
            _ => None,
        }
    }
}

/// Bit-width and encoding of a signal's values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalType {
    kind: TypeKind,
    width: u32,
}

impl SignalType {
    /// Creates a quaternary type of the given bit width.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if `width` is zero.
    pub fn quaternary(width: u32) -> Result<Self> {
        if width == 0 {
            return Err(WaveError::invalid("signal width must be greater than zero"));
        }
        Ok(Self {
            kind: TypeKind::Quaternary,
            width,
        })
    }

    /// Returns the value encoding.
    pub fn kind(&self) -> TypeKind {
        self.kind
    }

    /// Returns the bit width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the size in bytes of one bit-plane of one sample.
    pub fn bytes(&self) -> usize {
        bytes_for_width(self.width)
    }
}

/// Whether a signal carries materialized samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shape {
    /// Samples are stored as timestamp and bit-plane columns.
    Array,
    /// Computed from other signals; carries no payload and cannot be queried.
    Derived,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Payload {
    Array {
        timestamps: Vec<Timestamp>,
        x0s: Vec<u8>,
        x1s: Vec<u8>,
    },
    Derived,
}

/// Immutable change-series of one signal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signal {
    id: SignalId,
    ty: SignalType,
    payload: Payload,
}

impl Signal {
    /// Creates an array signal taking ownership of the three columns.
    ///
    /// Only column lengths are checked here. Timestamp ordering is the
    /// producer's responsibility.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if the bit-plane lengths do not
    /// equal `timestamps.len() * ty.bytes()`.
    pub fn from_columns(
        id: SignalId,
        ty: SignalType,
        timestamps: Vec<Timestamp>,
        x0s: Vec<u8>,
        x1s: Vec<u8>,
    ) -> Result<Self> {
        check_columns(ty, timestamps.len(), x0s.len(), x1s.len())?;
        Ok(Self {
            id,
            ty,
            payload: Payload::Array {
                timestamps,
                x0s,
                x1s,
            },
        })
    }

    /// Creates a derived signal, which has no stored samples.
    pub fn derived(id: SignalId, ty: SignalType) -> Self {
        Self {
            id,
            ty,
            payload: Payload::Derived,
        }
    }

    /// Returns the signal id.
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Returns the signal type.
    pub fn signal_type(&self) -> SignalType {
        self.ty
    }

    /// Returns the signal shape.
    pub fn shape(&self) -> Shape {
        match self.payload {
            Payload::Array { .. } => Shape::Array,
            Payload::Derived => Shape::Derived,
        }
    }

    /// Returns the number of change samples (0 for derived signals).
    pub fn len(&self) -> usize {
        match &self.payload {
            Payload::Array { timestamps, .. } => timestamps.len(),
            Payload::Derived => 0,
        }
    }

    /// Returns true if the signal has no samples.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a columnar view over all samples, or `None` for derived signals.
    pub fn samples(&self) -> Option<Samples<'_>> {
        match &self.payload {
            Payload::Array {
                timestamps,
                x0s,
                x1s,
            } => Some(Samples {
                ty: self.ty,
                timestamps,
                x0s,
                x1s,
            }),
            Payload::Derived => None,
        }
    }

    /// Checks the storage invariants of an array signal: at least one sample
    /// and column lengths consistent with the type. Derived signals always pass.
    pub fn validate(&self) -> Result<()> {
        match &self.payload {
            Payload::Array {
                timestamps,
                x0s,
                x1s,
            } => {
                if timestamps.is_empty() {
                    return Err(WaveError::invalid(format!(
                        "signal {} has no samples",
                        self.id
                    )));
                }
                check_columns(self.ty, timestamps.len(), x0s.len(), x1s.len())
            }
            Payload::Derived => Ok(()),
        }
    }

    /// Checks that timestamps are strictly increasing.
    pub fn check_ordering(&self) -> Result<()> {
        if let Payload::Array { timestamps, .. } = &self.payload {
            if let Some(i) = timestamps.windows(2).position(|w| w[0] >= w[1]) {
                return Err(WaveError::invalid(format!(
                    "signal {}: timestamp {} at index {} does not increase past {}",
                    self.id,
                    timestamps[i + 1],
                    i + 1,
                    timestamps[i]
                )));
            }
        }
        Ok(())
    }

    /// Consumes the signal and returns its columns, or `None` for derived signals.
    pub fn into_columns(self) -> Option<(Vec<Timestamp>, Vec<u8>, Vec<u8>)> {
        match self.payload {
            Payload::Array {
                timestamps,
                x0s,
                x1s,
            } => Some((timestamps, x0s, x1s)),
            Payload::Derived => None,
        }
    }
}

fn check_columns(ty: SignalType, len: usize, x0_len: usize, x1_len: usize) -> Result<()> {
    let expected = len * ty.bytes();
    if x0_len != expected || x1_len != expected {
        return Err(WaveError::invalid(format!(
            "column lengths disagree: {} samples of width {} need {} bytes per plane, \
             got x0={} x1={}",
            len,
            ty.width(),
            expected,
            x0_len,
            x1_len
        )));
    }
    Ok(())
}

/// Borrowed columnar view over a contiguous run of samples.
///
/// Views never outlive the storage they alias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Samples<'a> {
    ty: SignalType,
    timestamps: &'a [Timestamp],
    x0s: &'a [u8],
    x1s: &'a [u8],
}

impl<'a> Samples<'a> {
    /// Returns the value type of the samples.
    pub fn signal_type(&self) -> SignalType {
        self.ty
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Returns the timestamp column.
    pub fn timestamps(&self) -> &'a [Timestamp] {
        self.timestamps
    }

    /// Returns the `x0` bit-plane column.
    pub fn x0s(&self) -> &'a [u8] {
        self.x0s
    }

    /// Returns the `x1` bit-plane column.
    pub fn x1s(&self) -> &'a [u8] {
        self.x1s
    }

    /// Returns the timestamp of sample `i`.
    pub fn timestamp(&self, i: usize) -> Option<Timestamp> {
        self.timestamps.get(i).copied()
    }

    /// Returns the value of sample `i`.
    pub fn value(&self, i: usize) -> Option<Quaternary<'a>> {
        if i >= self.len() {
            return None;
        }
        let bytes = self.ty.bytes();
        let range = i * bytes..(i + 1) * bytes;
        Some(Quaternary::new(
            self.ty.width(),
            &self.x0s[range.clone()],
            &self.x1s[range],
        ))
    }

    /// Returns the value held at time `t`: the last sample at or before `t`.
    ///
    /// Returns `None` if `t` precedes every sample.
    pub fn value_at(&self, t: Timestamp) -> Option<Quaternary<'a>> {
        let idx = upper_bound(self.timestamps, t);
        idx.checked_sub(1).and_then(|i| self.value(i))
    }

    /// Returns the sub-view over samples `lo..hi`.
    ///
    /// # Panics
    ///
    /// Panics if `lo > hi` or `hi > len`.
    pub fn slice(&self, lo: usize, hi: usize) -> Samples<'a> {
        let bytes = self.ty.bytes();
        Samples {
            ty: self.ty,
            timestamps: &self.timestamps[lo..hi],
            x0s: &self.x0s[lo * bytes..hi * bytes],
            x1s: &self.x1s[lo * bytes..hi * bytes],
        }
    }

    /// Iterates over `(timestamp, value)` pairs in time order.
    pub fn iter(&self) -> impl Iterator<Item = (Timestamp, Quaternary<'a>)> + 'a {
        let this = *self;
        (0..this.len()).filter_map(move |i| Some((this.timestamps[i], this.value(i)?)))
    }

    /// Copies the view into owned columns.
    pub fn to_owned_samples(&self) -> OwnedSamples {
        OwnedSamples {
            ty: self.ty,
            timestamps: self.timestamps.to_vec(),
            x0s: self.x0s.to_vec(),
            x1s: self.x1s.to_vec(),
        }
    }
}

/// Owned columns of samples, produced where a borrowed view is impossible
/// (pages decompressed from storage).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnedSamples {
    ty: SignalType,
    timestamps: Vec<Timestamp>,
    x0s: Vec<u8>,
    x1s: Vec<u8>,
}

impl OwnedSamples {
    /// Creates an empty set of samples of the given type.
    pub fn new(ty: SignalType) -> Self {
        Self {
            ty,
            timestamps: Vec::new(),
            x0s: Vec::new(),
            x1s: Vec::new(),
        }
    }

    /// Appends one sample. The planes must be `ty.bytes()` long.
    pub(crate) fn push(&mut self, timestamp: Timestamp, x0: &[u8], x1: &[u8]) {
        debug_assert_eq!(x0.len(), self.ty.bytes());
        debug_assert_eq!(x1.len(), self.ty.bytes());
        self.timestamps.push(timestamp);
        self.x0s.extend_from_slice(x0);
        self.x1s.extend_from_slice(x1);
    }

    /// Appends every sample of `samples`.
    pub(crate) fn extend_from(&mut self, samples: &Samples<'_>) {
        self.timestamps.extend_from_slice(samples.timestamps);
        self.x0s.extend_from_slice(samples.x0s);
        self.x1s.extend_from_slice(samples.x1s);
    }

    /// Returns the number of samples.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Returns true if there are no samples.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Returns a borrowed view over the samples.
    pub fn as_samples(&self) -> Samples<'_> {
        Samples {
            ty: self.ty,
            timestamps: &self.timestamps,
            x0s: &self.x0s,
            x1s: &self.x1s,
        }
    }

    /// Seals the samples into a signal with the given id.
    pub fn into_signal(self, id: SignalId) -> Result<Signal> {
        Signal::from_columns(id, self.ty, self.timestamps, self.x0s, self.x1s)
    }
}
