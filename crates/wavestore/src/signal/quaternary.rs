//! 4-state logic values.
//!
//! Each logical bit of a sample is stored as one bit in each of two planes,
//! `x0` and `x1`. Bit `i` lives in byte `i / 8` at position `i % 8` (LSB first):
//!
//! | x0 | x1 | state |
//! |----|----|-------|
//! | 0  | 0  | `0`   |
//! | 1  | 0  | `1`   |
//! | 1  | 1  | `X`   |
//! | 0  | 1  | `Z`   |

use bitvec::prelude::*;
use std::fmt;

/// A single 4-state logic bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Logic {
    /// Driven low.
    Zero,
    /// Driven high.
    One,
    /// Unknown.
    X,
    /// High impedance.
    Z,
}

impl Logic {
    /// Decodes a bit pair.
    pub fn from_planes(x0: bool, x1: bool) -> Self {
        match (x0, x1) {
            (false, false) => Logic::Zero,
            (true, false) => Logic::One,
            (true, true) => Logic::X,
            (false, true) => Logic::Z,
        }
    }

    /// Encodes to an `(x0, x1)` bit pair.
    pub fn to_planes(self) -> (bool, bool) {
        match self {
            Logic::Zero => (false, false),
            Logic::One => (true, false),
            Logic::X => (true, true),
            Logic::Z => (false, true),
        }
    }

    /// Returns the lower-case character used in waveform dumps.
    pub fn as_char(self) -> char {
        match self {
            Logic::Zero => '0',
            Logic::One => '1',
            Logic::X => 'x',
            Logic::Z => 'z',
        }
    }

    /// Parses `0`, `1`, `x`/`X` or `z`/`Z`.
    pub fn from_char(c: char) -> Option<Self> {
        match c {
            '0' => Some(Logic::Zero),
            '1' => Some(Logic::One),
            'x' | 'X' => Some(Logic::X),
            'z' | 'Z' => Some(Logic::Z),
            _ => None,
        }
    }

    /// Encodes bits (index 0 = least significant) into `(x0, x1)` planes of
    /// `ceil(bits.len() / 8)` bytes each.
    pub fn encode_bits(bits: &[Logic]) -> (Vec<u8>, Vec<u8>) {
        let bytes = bits.len().div_ceil(8);
        let mut x0 = vec![0u8; bytes];
        let mut x1 = vec![0u8; bytes];
        {
            let x0_bits = x0.view_bits_mut::<Lsb0>();
            let x1_bits = x1.view_bits_mut::<Lsb0>();
            for (i, bit) in bits.iter().enumerate() {
                let (b0, b1) = bit.to_planes();
                x0_bits.set(i, b0);
                x1_bits.set(i, b1);
            }
        }
        (x0, x1)
    }
}

/// Read-only view of one sample's value.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Quaternary<'a> {
    width: u32,
    x0: &'a [u8],
    x1: &'a [u8],
}

impl<'a> Quaternary<'a> {
    pub(crate) fn new(width: u32, x0: &'a [u8], x1: &'a [u8]) -> Self {
        debug_assert_eq!(x0.len(), x1.len());
        Self { width, x0, x1 }
    }

    /// Returns the bit width.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Returns the raw `x0` plane.
    pub fn x0(&self) -> &'a [u8] {
        self.x0
    }

    /// Returns the raw `x1` plane.
    pub fn x1(&self) -> &'a [u8] {
        self.x1
    }

    /// Returns bit `i` (0 = least significant), or `None` past the width.
    pub fn bit(&self, i: u32) -> Option<Logic> {
        if i >= self.width {
            return None;
        }
        let i = i as usize;
        let x0 = self.x0.view_bits::<Lsb0>()[i];
        let x1 = self.x1.view_bits::<Lsb0>()[i];
        Some(Logic::from_planes(x0, x1))
    }

    /// Iterates bits from least to most significant.
    pub fn iter(&self) -> impl Iterator<Item = Logic> + 'a {
        let width = self.width as usize;
        let (x0, x1): (&'a [u8], &'a [u8]) = (self.x0, self.x1);
        let x0 = &x0.view_bits::<Lsb0>()[..width];
        let x1 = &x1.view_bits::<Lsb0>()[..width];
        x0.iter()
            .by_vals()
            .zip(x1.iter().by_vals())
            .map(|(b0, b1)| Logic::from_planes(b0, b1))
    }

    /// Returns true if no bit is X or Z.
    pub fn is_two_state(&self) -> bool {
        self.x1.view_bits::<Lsb0>()[..self.width as usize].not_any()
    }

    /// Returns the value as an integer when it is two-state and at most 64 bits wide.
    pub fn to_u64(&self) -> Option<u64> {
        if self.width > 64 || !self.is_two_state() {
            return None;
        }
        Some(self.x0.view_bits::<Lsb0>()[..self.width as usize].load_le::<u64>())
    }
}

impl fmt::Display for Quaternary<'_> {
    /// Formats most significant bit first, e.g. `01xz`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let bits: Vec<Logic> = self.iter().collect();
        for bit in bits.iter().rev() {
            write!(f, "{}", bit.as_char())?;
        }
        Ok(())
    }
}

impl fmt::Debug for Quaternary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Quaternary({}'{})", self.width, self)
    }
}
