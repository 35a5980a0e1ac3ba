//! Q16.16 fixed-point arithmetic
//!
//! Master volume, channel volume/expression and envelope rates are carried
//! in Q16.16 end-to-end so that the control API and the real-time mixer
//! agree exactly on what "full scale" means, independent of the host's
//! floating-point rounding.

use std::ops::{Add, Mul, Sub};

/// A 32-bit fixed-point number with 16 integer bits and 16 fractional bits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
pub struct Q16_16(pub i32);

impl Q16_16 {
    pub const FRAC_BITS: u32 = 16;
    pub const ONE: Self = Self(1 << Self::FRAC_BITS);
    pub const ZERO: Self = Self(0);

    /// Build from a float, clamping to the representable range.
    #[inline]
    pub fn from_f64(value: f64) -> Self {
        let scaled = value * (1i64 << Self::FRAC_BITS) as f64;
        Self(scaled.clamp(i32::MIN as f64, i32::MAX as f64) as i32)
    }

    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / (1i64 << Self::FRAC_BITS) as f64
    }

    /// Build from the raw integer representation (already Q16.16).
    #[inline]
    pub const fn from_raw(raw: i32) -> Self {
        Self(raw)
    }

    #[inline]
    pub const fn raw(self) -> i32 {
        self.0
    }

    #[inline]
    pub fn clamp_unit(self) -> Self {
        Self(self.0.clamp(0, Self::ONE.0))
    }

    /// Multiply two Q16.16 values, widening through i64 to avoid overflow.
    #[inline]
    pub fn mul_q(self, rhs: Self) -> Self {
        let product = (self.0 as i64 * rhs.0 as i64) >> Self::FRAC_BITS;
        Self(product.clamp(i32::MIN as i64, i32::MAX as i64) as i32)
    }
}

impl Add for Q16_16 {
    type Output = Self;
    #[inline]
    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_add(rhs.0))
    }
}

impl Sub for Q16_16 {
    type Output = Self;
    #[inline]
    fn sub(self, rhs: Self) -> Self::Output {
        Self(self.0.saturating_sub(rhs.0))
    }
}

impl Mul for Q16_16 {
    type Output = Self;
    #[inline]
    fn mul(self, rhs: Self) -> Self::Output {
        self.mul_q(rhs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_float() {
        let q = Q16_16::from_f64(0.5);
        assert!((q.to_f64() - 0.5).abs() < 1e-4);
        assert_eq!(Q16_16::ONE.to_f64(), 1.0);
    }

    #[test]
    fn mul_half_by_half() {
        let half = Q16_16::from_f64(0.5);
        let quarter = half.mul_q(half);
        assert!((quarter.to_f64() - 0.25).abs() < 1e-4);
    }

    #[test]
    fn set_then_get_is_identity_at_representable_steps() {
        for i in 0..=20 {
            let x = i as f64 / 20.0;
            let q = Q16_16::from_f64(x);
            assert!((q.to_f64() - x).abs() < 1e-4, "x={x}");
        }
    }

    #[test]
    fn clamp_unit_bounds() {
        assert_eq!(Q16_16::from_f64(-0.5).clamp_unit(), Q16_16::ZERO);
        assert_eq!(Q16_16::from_f64(2.0).clamp_unit(), Q16_16::ONE);
    }
}
