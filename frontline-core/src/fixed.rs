//! Fixed-point arithmetic for deterministic combat math.
//!
//! Terrain multipliers and expected-hit figures are fractional, but battle
//! resolution must replay bit-exactly, so nothing in the engine touches floats.
//! Floats only appear at the parse boundary (scenario JSON) and for display.

use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Mul, Sub};

/// Fixed-point value with scale 10000.
///
/// 0.25 → 2500, 1.0 → 10000. Serialized as a plain decimal number so scenario
/// files can say `"multiply": 1.5`.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(from = "f64", into = "f64")]
pub struct Fixed(pub i64);

impl Fixed {
    /// Scale factor: 10000 = 1.0
    pub const SCALE: i64 = 10000;

    pub const ZERO: Fixed = Fixed(0);
    pub const ONE: Fixed = Fixed(10000);

    /// Create from integer (e.g., 5 → 50_000)
    #[inline]
    pub const fn from_int(v: i64) -> Self {
        Fixed(v * Self::SCALE)
    }

    /// Exact-as-possible `num / den`, truncated at the fourth decimal.
    ///
    /// A zero denominator yields [`Fixed::ZERO`].
    #[inline]
    pub fn from_ratio(num: i64, den: i64) -> Self {
        if den == 0 {
            return Fixed::ZERO;
        }
        Fixed((num as i128 * Self::SCALE as i128 / den as i128) as i64)
    }

    /// Convert from f64 (parse layer only).
    ///
    /// Rounds to the nearest representable value; NaN and infinities become zero.
    pub fn from_f64(v: f64) -> Self {
        if !v.is_finite() {
            return Fixed::ZERO;
        }
        let scaled = (v * Self::SCALE as f64).round();
        if scaled >= i64::MAX as f64 {
            return Fixed(i64::MAX);
        }
        if scaled <= i64::MIN as f64 {
            return Fixed(i64::MIN);
        }
        Fixed(scaled as i64)
    }

    /// Convert to f64 (display only)
    #[inline]
    pub fn to_f64(self) -> f64 {
        self.0 as f64 / Self::SCALE as f64
    }

    /// Truncate to integer (rounds toward zero)
    #[inline]
    pub const fn to_int(self) -> i64 {
        self.0 / Self::SCALE
    }

    /// Scale an integer strength and truncate back to an integer.
    ///
    /// `Fixed::from_f64(1.5).scale_int(3) == 4`
    #[inline]
    pub fn scale_int(self, v: i64) -> i64 {
        (Fixed::from_int(v) * self).to_int()
    }
}

impl From<f64> for Fixed {
    fn from(v: f64) -> Self {
        Fixed::from_f64(v)
    }
}

impl From<Fixed> for f64 {
    fn from(v: Fixed) -> Self {
        v.to_f64()
    }
}

impl Add for Fixed {
    type Output = Fixed;
    #[inline]
    fn add(self, other: Fixed) -> Fixed {
        Fixed(self.0 + other.0)
    }
}

impl AddAssign for Fixed {
    #[inline]
    fn add_assign(&mut self, other: Fixed) {
        self.0 += other.0;
    }
}

impl Sub for Fixed {
    type Output = Fixed;
    #[inline]
    fn sub(self, other: Fixed) -> Fixed {
        Fixed(self.0 - other.0)
    }
}

impl Mul for Fixed {
    type Output = Fixed;
    #[inline]
    fn mul(self, other: Fixed) -> Fixed {
        Fixed((self.0 as i128 * other.0 as i128 / Fixed::SCALE as i128) as i64)
    }
}

impl std::fmt::Debug for Fixed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Fixed({} = {})", self.0, self.to_f64())
    }
}

impl std::fmt::Display for Fixed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.to_f64())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_ratio() {
        assert_eq!(Fixed::from_ratio(1, 4), Fixed(2500));
        assert_eq!(Fixed::from_ratio(6, 6), Fixed::ONE);
        // 2/3 truncates
        assert_eq!(Fixed::from_ratio(2, 3), Fixed(6666));
        assert_eq!(Fixed::from_ratio(5, 0), Fixed::ZERO);
    }

    #[test]
    fn test_scale_int_truncates() {
        let one_and_half = Fixed::from_f64(1.5);
        assert_eq!(one_and_half.scale_int(3), 4);
        assert_eq!(one_and_half.scale_int(2), 3);
        assert_eq!(Fixed::from_ratio(1, 2).scale_int(3), 1);
    }

    #[test]
    fn test_from_f64_edge_cases() {
        assert_eq!(Fixed::from_f64(f64::NAN), Fixed::ZERO);
        assert_eq!(Fixed::from_f64(f64::INFINITY), Fixed::ZERO);
        assert_eq!(Fixed::from_f64(0.25), Fixed(2500));
        assert_eq!(Fixed::from_f64(1e30), Fixed(i64::MAX));
    }

    #[test]
    fn test_serde_as_decimal() {
        let v: Fixed = serde_json::from_str("1.5").unwrap();
        assert_eq!(v, Fixed(15000));
        assert_eq!(serde_json::to_string(&Fixed::from_ratio(1, 2)).unwrap(), "0.5");
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        fn strength() -> impl Strategy<Value = i64> {
            0..=1_000i64
        }

        proptest! {
            #[test]
            fn mul_is_commutative(a in strength(), b in strength()) {
                let x = Fixed::from_int(a);
                let y = Fixed::from_int(b);
                prop_assert_eq!(x * y, y * x);
            }

            #[test]
            fn scale_by_one_is_identity(a in strength()) {
                prop_assert_eq!(Fixed::ONE.scale_int(a), a);
            }

            #[test]
            fn ratio_times_denominator_never_exceeds_numerator(num in strength(), den in 1..=254i64) {
                let r = Fixed::from_ratio(num, den);
                prop_assert!((r * Fixed::from_int(den)).to_int() <= num);
            }
        }
    }
}
