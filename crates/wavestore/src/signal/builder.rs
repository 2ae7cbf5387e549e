//! SignalBuilder - mutable staging buffer for one signal's change samples.
//!
//! Samples are appended into three growable columns which are moved, without
//! copying, into an immutable [`Signal`] by [`SignalBuilder::build`].
//!
//! There are two append paths:
//!
//! - [`SignalBuilder::append`] / [`SignalBuilder::append_slice`] validate
//!   their input and grow the columns as needed.
//! - [`SignalBuilder::append_assume_capacity`] /
//!   [`SignalBuilder::append_slice_assume_capacity`] skip growth and validation.
//!   The caller must first reserve room with
//!   [`SignalBuilder::ensure_unused_capacity`]; the precondition is checked by
//!   debug assertions only.
//!
//! Timestamp ordering is never checked by the builder.

use crate::error::{Result, WaveError};
use crate::signal::{Logic, Signal, SignalId, SignalType, Timestamp};
use tracing::trace;

/// Accumulates `(timestamp, x0, x1)` samples for one signal.
#[derive(Debug)]
pub struct SignalBuilder {
    id: SignalId,
    ty: SignalType,
    timestamps: Vec<Timestamp>,
    x0s: Vec<u8>,
    x1s: Vec<u8>,
}

impl SignalBuilder {
    /// Creates an empty builder.
    pub fn new(id: SignalId, ty: SignalType) -> Self {
        Self {
            id,
            ty,
            timestamps: Vec::new(),
            x0s: Vec::new(),
            x1s: Vec::new(),
        }
    }

    /// Creates an empty builder with room for `capacity` samples.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::Allocation` if the columns cannot be allocated.
    pub fn with_capacity(id: SignalId, ty: SignalType, capacity: usize) -> Result<Self> {
        let mut builder = Self::new(id, ty);
        builder.ensure_unused_capacity(capacity)?;
        Ok(builder)
    }

    /// Returns the id the built signal will carry.
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Returns the signal type.
    pub fn signal_type(&self) -> SignalType {
        self.ty
    }

    /// Returns the number of staged samples.
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    /// Returns true if no samples are staged.
    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    /// Returns how many samples can be appended without growing any column.
    pub fn unused_capacity(&self) -> usize {
        let bytes = self.ty.bytes();
        let ts_room = self.timestamps.capacity() - self.timestamps.len();
        let x0_room = (self.x0s.capacity() - self.x0s.len()) / bytes;
        let x1_room = (self.x1s.capacity() - self.x1s.len()) / bytes;
        ts_room.min(x0_room).min(x1_room)
    }

    /// Reserves room for at least `n` more samples in all three columns.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::Allocation` if a column cannot grow. Staged samples
    /// are unaffected.
    pub fn ensure_unused_capacity(&mut self, n: usize) -> Result<()> {
        let plane_bytes = n.saturating_mul(self.ty.bytes());
        self.timestamps.try_reserve(n)?;
        self.x0s.try_reserve(plane_bytes)?;
        self.x1s.try_reserve(plane_bytes)?;
        Ok(())
    }

    /// Appends one sample without growing the columns.
    ///
    /// The caller must have reserved room through
    /// [`ensure_unused_capacity`](Self::ensure_unused_capacity) and must pass
    /// planes of exactly `signal_type().bytes()` bytes.
    pub fn append_assume_capacity(&mut self, timestamp: Timestamp, x0: &[u8], x1: &[u8]) {
        debug_assert!(self.unused_capacity() >= 1, "append without reserved capacity");
        debug_assert_eq!(x0.len(), self.ty.bytes());
        debug_assert_eq!(x1.len(), self.ty.bytes());
        self.timestamps.push(timestamp);
        self.x0s.extend_from_slice(x0);
        self.x1s.extend_from_slice(x1);
    }

    /// Appends a batch of samples without growing the columns.
    ///
    /// Same preconditions as [`append_assume_capacity`](Self::append_assume_capacity),
    /// with `x0s` and `x1s` each `timestamps.len() * bytes` long.
    pub fn append_slice_assume_capacity(
        &mut self,
        timestamps: &[Timestamp],
        x0s: &[u8],
        x1s: &[u8],
    ) {
        debug_assert!(
            self.unused_capacity() >= timestamps.len(),
            "append without reserved capacity"
        );
        debug_assert_eq!(x0s.len(), timestamps.len() * self.ty.bytes());
        debug_assert_eq!(x1s.len(), timestamps.len() * self.ty.bytes());
        self.timestamps.extend_from_slice(timestamps);
        self.x0s.extend_from_slice(x0s);
        self.x1s.extend_from_slice(x1s);
    }

    /// Appends one sample, growing the columns if needed.
    ///
    /// Either the whole sample is appended or the builder is left unchanged.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if a plane has the wrong length,
    /// or `WaveError::Allocation` if the columns cannot grow.
    pub fn append(&mut self, timestamp: Timestamp, x0: &[u8], x1: &[u8]) -> Result<()> {
        let bytes = self.ty.bytes();
        if x0.len() != bytes || x1.len() != bytes {
            return Err(WaveError::invalid(format!(
                "sample planes must be {} bytes for width {}, got x0={} x1={}",
                bytes,
                self.ty.width(),
                x0.len(),
                x1.len()
            )));
        }
        self.ensure_unused_capacity(1)?;
        self.append_assume_capacity(timestamp, x0, x1);
        Ok(())
    }

    /// Appends a batch of samples, growing the columns if needed.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if the plane lengths are not
    /// `timestamps.len() * bytes`, or `WaveError::Allocation` if the columns
    /// cannot grow. On error nothing is appended.
    pub fn append_slice(&mut self, timestamps: &[Timestamp], x0s: &[u8], x1s: &[u8]) -> Result<()> {
        let expected = timestamps.len() * self.ty.bytes();
        if x0s.len() != expected || x1s.len() != expected {
            return Err(WaveError::invalid(format!(
                "{} samples of width {} need {} bytes per plane, got x0={} x1={}",
                timestamps.len(),
                self.ty.width(),
                expected,
                x0s.len(),
                x1s.len()
            )));
        }
        self.ensure_unused_capacity(timestamps.len())?;
        self.append_slice_assume_capacity(timestamps, x0s, x1s);
        Ok(())
    }

    /// Appends one sample given as logic bits, least significant first.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if `bits.len()` differs from the width.
    pub fn append_logic(&mut self, timestamp: Timestamp, bits: &[Logic]) -> Result<()> {
        if bits.len() != self.ty.width() as usize {
            return Err(WaveError::invalid(format!(
                "expected {} bits, got {}",
                self.ty.width(),
                bits.len()
            )));
        }
        let (x0, x1) = Logic::encode_bits(bits);
        self.append(timestamp, &x0, &x1)
    }

    /// Seals the staged samples into an immutable signal.
    ///
    /// The columns are moved into the signal and the builder is left empty
    /// and reusable.
    ///
    /// # Errors
    ///
    /// Returns `WaveError::InvalidArgument` if the columns have drifted out of
    /// step (only possible through a misused assume-capacity path). The
    /// builder is left unchanged in that case.
    pub fn build(&mut self) -> Result<Signal> {
        let expected = self.timestamps.len() * self.ty.bytes();
        if self.x0s.len() != expected || self.x1s.len() != expected {
            return Err(WaveError::invalid(format!(
                "builder for signal {} is inconsistent: {} timestamps, x0={} x1={} bytes",
                self.id,
                self.timestamps.len(),
                self.x0s.len(),
                self.x1s.len()
            )));
        }

        let timestamps = std::mem::take(&mut self.timestamps);
        let x0s = std::mem::take(&mut self.x0s);
        let x1s = std::mem::take(&mut self.x1s);
        trace!(signal = %self.id, samples = timestamps.len(), "sealed signal");
        Signal::from_columns(self.id, self.ty, timestamps, x0s, x1s)
    }

    /// Drops all staged samples and releases the column buffers.
    pub fn clear(&mut self) {
        self.timestamps = Vec::new();
        self.x0s = Vec::new();
        self.x1s = Vec::new();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn builder(width: u32) -> SignalBuilder {
        SignalBuilder::new(SignalId(1), SignalType::quaternary(width).unwrap())
    }

    #[test]
    fn test_build_roundtrip() {
        let mut b = builder(8);
        b.append(0, &[0xff], &[0xff]).unwrap();
        b.append(10, &[0x8f], &[0x00]).unwrap();
        b.append(30, &[0x6d], &[0x00]).unwrap();

        let signal = b.build().unwrap();
        let samples = signal.samples().unwrap();
        assert_eq!(samples.timestamps(), &[0, 10, 30]);
        assert_eq!(samples.x0s(), &[0xff, 0x8f, 0x6d]);
        assert_eq!(samples.x1s(), &[0xff, 0x00, 0x00]);
        assert!(b.is_empty());
    }

    #[test]
    fn test_builder_reusable_after_build() {
        let mut b = builder(4);
        b.append(1, &[1], &[0]).unwrap();
        let first = b.build().unwrap();
        b.append(2, &[2], &[0]).unwrap();
        let second = b.build().unwrap();

        assert_eq!(first.samples().unwrap().timestamps(), &[1]);
        assert_eq!(second.samples().unwrap().timestamps(), &[2]);
    }

    #[test]
    fn test_append_rejects_wrong_plane_length() {
        let mut b = builder(9);
        let result = b.append(0, &[0], &[0]);
        assert!(matches!(result, Err(WaveError::InvalidArgument(_))));
        assert!(b.is_empty());

        let result = b.append_slice(&[0, 1], &[0; 4], &[0; 3]);
        assert!(matches!(result, Err(WaveError::InvalidArgument(_))));
        assert!(b.is_empty());
    }

    #[test]
    fn test_assume_capacity_never_reallocates() {
        let mut b = builder(16);
        b.ensure_unused_capacity(100).unwrap();
        assert!(b.unused_capacity() >= 100);

        let ts_ptr = b.timestamps.as_ptr();
        let x0_ptr = b.x0s.as_ptr();
        let x1_ptr = b.x1s.as_ptr();

        for i in 0..100u64 {
            let v = (i as u16).to_le_bytes();
            b.append_assume_capacity(i, &v, &[0, 0]);
        }

        assert_eq!(b.timestamps.as_ptr(), ts_ptr);
        assert_eq!(b.x0s.as_ptr(), x0_ptr);
        assert_eq!(b.x1s.as_ptr(), x1_ptr);
        assert_eq!(b.timestamps.len(), 100);
        assert_eq!(b.x0s.len(), 200);
        assert_eq!(b.x1s.len(), 200);
    }

    #[test]
    fn test_allocation_failure_surfaces() {
        let mut b = builder(8);
        let result = b.ensure_unused_capacity(usize::MAX);
        assert!(matches!(result, Err(WaveError::Allocation(_))));
        assert!(b.is_empty());
    }

    #[test]
    fn test_build_detects_inconsistent_columns() {
        let mut b = builder(8);
        b.timestamps.push(5);
        let result = b.build();
        assert!(matches!(result, Err(WaveError::InvalidArgument(_))));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_append_logic() {
        let mut b = builder(3);
        b.append_logic(4, &[Logic::One, Logic::X, Logic::Z]).unwrap();
        let signal = b.build().unwrap();
        let value = signal.samples().unwrap().value(0).unwrap();
        assert_eq!(value.to_string(), "zx1");

        assert!(b.append_logic(5, &[Logic::One]).is_err());
    }

    #[test]
    fn test_clear_releases_buffers() {
        let ty = SignalType::quaternary(1).unwrap();
        let mut b = SignalBuilder::with_capacity(SignalId(2), ty, 64).unwrap();
        b.append(0, &[1], &[0]).unwrap();
        b.clear();
        assert!(b.is_empty());
        assert_eq!(b.unused_capacity(), 0);
    }
}
