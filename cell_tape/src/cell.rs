// Copyright 2026 the Cell Tape Authors
// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Cell types for the tape.
//!
//! A cell is an unsigned integer of 8, 16, 32 or 64 bits, chosen at runtime
//! by the front end. All cell arithmetic wraps at the chosen width, so the
//! trait below exposes only wrapping operations. Instruction operands are
//! stored width-independently and truncated through [`Cell::from_i32`] at
//! execution time.

use core::fmt;
use core::hash::Hash;

/// Cell width selector used by front ends to pick a [`Cell`] type.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum CellWidth {
    /// 8-bit cells.
    W8,
    /// 16-bit cells.
    W16,
    /// 32-bit cells.
    W32,
    /// 64-bit cells.
    W64,
}

impl CellWidth {
    /// Parses a width from its bit count. Returns `None` for anything other
    /// than 8, 16, 32 or 64.
    #[must_use]
    pub fn from_bits(bits: u32) -> Option<Self> {
        match bits {
            8 => Some(Self::W8),
            16 => Some(Self::W16),
            32 => Some(Self::W32),
            64 => Some(Self::W64),
            _ => None,
        }
    }

    /// Returns the width in bits.
    #[must_use]
    pub const fn bits(self) -> u32 {
        match self {
            Self::W8 => 8,
            Self::W16 => 16,
            Self::W32 => 32,
            Self::W64 => 64,
        }
    }
}

impl fmt::Display for CellWidth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.bits())
    }
}

/// One slot of the tape.
///
/// Implemented for `u8`, `u16`, `u32` and `u64`. All arithmetic is modular
/// at the cell width.
pub trait Cell:
    Copy + Eq + Ord + Hash + fmt::Debug + fmt::Display + Default + Send + Sync + 'static
{
    /// The width this type realizes.
    const WIDTH: CellWidth;
    /// Cell size in bytes.
    const BYTES: usize;
    /// The all-zero cell.
    const ZERO: Self;
    /// The cell-width maximum (EOF policy 2 writes this).
    const MAX_CELL: Self;

    /// Truncates a raw instruction operand to the cell width.
    ///
    /// Negative operands wrap: `from_i32(-3)` is `MAX_CELL - 2`.
    fn from_i32(v: i32) -> Self;

    /// Widens an input byte.
    fn from_byte(b: u8) -> Self;

    /// Truncates to the low 8 bits for output.
    fn to_byte(self) -> u8;

    /// Zero-extends to 64 bits.
    fn to_u64(self) -> u64;

    /// Adds a raw operand, wrapping at the cell width.
    fn wrapping_add_i32(self, d: i32) -> Self;

    /// Multiply-and-accumulate at the cell width: `self + src * factor`.
    ///
    /// The factor is signed; the product and sum are modular.
    fn mul_acc(self, src: Self, factor: i16) -> Self;

    /// Returns `true` for the zero cell.
    fn is_zero(self) -> bool;
}

macro_rules! impl_cell {
    ($t:ty, $width:expr) => {
        impl Cell for $t {
            const WIDTH: CellWidth = $width;
            const BYTES: usize = size_of::<$t>();
            const ZERO: Self = 0;
            const MAX_CELL: Self = <$t>::MAX;

            #[inline(always)]
            fn from_i32(v: i32) -> Self {
                v as $t
            }

            #[inline(always)]
            fn from_byte(b: u8) -> Self {
                b as $t
            }

            #[inline(always)]
            fn to_byte(self) -> u8 {
                self as u8
            }

            #[inline(always)]
            fn to_u64(self) -> u64 {
                self as u64
            }

            #[inline(always)]
            fn wrapping_add_i32(self, d: i32) -> Self {
                self.wrapping_add(d as $t)
            }

            #[inline(always)]
            fn mul_acc(self, src: Self, factor: i16) -> Self {
                self.wrapping_add(src.wrapping_mul(factor as $t))
            }

            #[inline(always)]
            fn is_zero(self) -> bool {
                self == 0
            }
        }
    };
}

impl_cell!(u8, CellWidth::W8);
impl_cell!(u16, CellWidth::W16);
impl_cell!(u32, CellWidth::W32);
impl_cell!(u64, CellWidth::W64);

#[cfg(test)]
mod tests {
    use super::{Cell, CellWidth};

    #[test]
    fn from_i32_wraps_negative_operands() {
        assert_eq!(<u8 as Cell>::from_i32(-1), 255);
        assert_eq!(<u16 as Cell>::from_i32(-3), 0xFFFD);
        assert_eq!(<u32 as Cell>::from_i32(-1), u32::MAX);
        assert_eq!(<u64 as Cell>::from_i32(-1), u64::MAX);
    }

    #[test]
    fn mul_acc_is_modular() {
        // 200 + 100 * 2 == 400 == 144 (mod 256)
        assert_eq!(200u8.mul_acc(100, 2), 144);
        // negative factors wrap through the cast
        assert_eq!(10u8.mul_acc(3, -1), 7);
        assert_eq!(10u16.mul_acc(3, -2), 4);
    }

    #[test]
    fn width_from_bits_rejects_odd_sizes() {
        assert_eq!(CellWidth::from_bits(8), Some(CellWidth::W8));
        assert_eq!(CellWidth::from_bits(64), Some(CellWidth::W64));
        assert_eq!(CellWidth::from_bits(12), None);
        assert_eq!(CellWidth::from_bits(0), None);
    }
}
