//! Rational number type for precise time and rate representation.

use std::cmp::Ordering;
use std::fmt;

/// A rational number represented as a numerator and denominator.
///
/// Used for time bases, frame rates and sample aspect ratios.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Rational {
    /// Numerator
    pub num: i64,
    /// Denominator (must be positive)
    pub den: i64,
}

impl Rational {
    /// Create a new rational number.
    ///
    /// # Panics
    ///
    /// Panics if denominator is zero.
    pub fn new(num: i64, den: i64) -> Self {
        assert!(den != 0, "Denominator cannot be zero");
        let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
        Self { num, den }
    }

    /// Create a rational from an integer.
    pub const fn from_int(n: i64) -> Self {
        Self { num: n, den: 1 }
    }

    /// Create a zero rational.
    pub const fn zero() -> Self {
        Self { num: 0, den: 1 }
    }

    /// Create a rational representing one.
    pub const fn one() -> Self {
        Self { num: 1, den: 1 }
    }

    /// Check if this rational is zero.
    pub fn is_zero(&self) -> bool {
        self.num == 0
    }

    /// Reduce the rational to its simplest form.
    pub fn reduce(&self) -> Self {
        if self.num == 0 {
            return Self { num: 0, den: 1 };
        }
        let g = gcd(self.num.unsigned_abs(), self.den.unsigned_abs());
        Self {
            num: self.num / g as i64,
            den: self.den / g as i64,
        }
    }

    /// Convert to f64.
    pub fn to_f64(&self) -> f64 {
        self.num as f64 / self.den as f64
    }

    /// Rescale `value` expressed in units of `self` into units of `target`,
    /// rounding to the nearest integer with halves away from zero.
    ///
    /// Returns `None` when `target` is zero or the result does not fit in an `i64`.
    pub fn checked_rescale(&self, value: i64, target: Rational) -> Option<i64> {
        let num = value as i128 * self.num as i128 * target.den as i128;
        let den = self.den as i128 * target.num as i128;
        if den == 0 {
            return None;
        }
        i64::try_from(div_round_half_away(num, den)).ok()
    }

    /// Rescale with round-to-nearest. A result that cannot be represented
    /// saturates to the nearest representable bound above `i64::MIN`.
    pub fn rescale(&self, value: i64, target: Rational) -> i64 {
        match self.checked_rescale(value, target) {
            Some(v) => v.max(i64::MIN + 1),
            None if (value < 0) == (self.num < 0) => i64::MAX,
            None => i64::MIN + 1,
        }
    }
}

fn div_round_half_away(num: i128, den: i128) -> i128 {
    let (num, den) = if den < 0 { (-num, -den) } else { (num, den) };
    let half = den / 2;
    if num >= 0 {
        (num + half) / den
    } else {
        (num - half) / den
    }
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        let t = b;
        b = a % b;
        a = t;
    }
    a.max(1)
}

impl Default for Rational {
    fn default() -> Self {
        Self::zero()
    }
}

impl fmt::Debug for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Rational({}/{})", self.num, self.den)
    }
}

impl fmt::Display for Rational {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

impl PartialOrd for Rational {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Rational {
    fn cmp(&self, other: &Self) -> Ordering {
        let lhs = self.num as i128 * other.den as i128;
        let rhs = other.num as i128 * self.den as i128;
        lhs.cmp(&rhs)
    }
}

impl From<(i32, i32)> for Rational {
    fn from((num, den): (i32, i32)) -> Self {
        Self::new(num as i64, den as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reduce() {
        let r = Rational::new(30000, 1001 * 30);
        assert_eq!(r.reduce(), Rational::new(1000, 1001));
        assert_eq!(Rational::new(0, 7).reduce(), Rational::zero());
    }

    #[test]
    fn test_negative_denominator_normalized() {
        let r = Rational::new(1, -2);
        assert_eq!(r.num, -1);
        assert_eq!(r.den, 2);
    }

    #[test]
    fn test_rescale_exact() {
        let ms = Rational::new(1, 1000);
        let mpeg = Rational::new(1, 90000);
        assert_eq!(ms.rescale(1000, mpeg), 90000);
        assert_eq!(mpeg.rescale(90000, ms), 1000);
    }

    #[test]
    fn test_rescale_rounds_half_away_from_zero() {
        let src = Rational::new(1, 2);
        let dst = Rational::new(1, 1);
        assert_eq!(src.rescale(1, dst), 1);
        assert_eq!(src.rescale(-1, dst), -1);
        assert_eq!(src.rescale(3, dst), 2);
        // 1/3 of a unit rounds down, 2/3 rounds up
        let thirds = Rational::new(1, 3);
        assert_eq!(thirds.rescale(1, dst), 0);
        assert_eq!(thirds.rescale(2, dst), 1);
    }

    #[test]
    fn test_rescale_to_zero_target() {
        let ms = Rational::new(1, 1000);
        assert_eq!(ms.checked_rescale(5, Rational::zero()), None);
    }

    #[test]
    fn test_ordering() {
        assert!(Rational::new(1, 3) < Rational::new(1, 2));
        assert_eq!(Rational::new(2, 4).cmp(&Rational::new(1, 2)), Ordering::Equal);
    }

    #[test]
    fn test_display() {
        assert_eq!(Rational::new(1, 90000).to_string(), "1/90000");
        assert_eq!(Rational::from_int(25).to_string(), "25");
    }
}
