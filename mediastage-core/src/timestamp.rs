//! Timestamp and time base handling.
//!
//! A timestamp is a tick count in a time base. The value `i64::MIN` is the
//! "unknown" sentinel and survives every conversion unchanged.

use crate::rational::Rational;
use std::cmp::Ordering;
use std::fmt;
use std::ops::Add;

/// Tick value meaning "unknown".
pub const NOPTS_VALUE: i64 = i64::MIN;

/// A time base for converting between timestamp units.
///
/// Common time bases:
/// - 1/90000 for MPEG-TS
/// - 1/48000 for 48kHz audio
/// - 1/1000 for milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct TimeBase(pub Rational);

impl TimeBase {
    /// Create a new time base from numerator and denominator.
    pub fn new(num: i64, den: i64) -> Self {
        Self(Rational::new(num, den))
    }

    /// Standard MPEG time base (1/90000).
    pub const MPEG: Self = Self(Rational { num: 1, den: 90000 });

    /// Millisecond time base (1/1000).
    pub const MILLISECONDS: Self = Self(Rational { num: 1, den: 1000 });

    /// Microsecond time base (1/1000000).
    pub const MICROSECONDS: Self = Self(Rational {
        num: 1,
        den: 1_000_000,
    });

    /// Time base of one tick per audio sample.
    pub fn from_sample_rate(sample_rate: u32) -> Self {
        Self::new(1, sample_rate.max(1) as i64)
    }

    /// Convert a tick count from this time base to another, preserving the sentinel.
    pub fn convert(&self, value: i64, target: TimeBase) -> i64 {
        if value == NOPTS_VALUE {
            return NOPTS_VALUE;
        }
        self.0.rescale(value, target.0)
    }

    /// Convert to seconds as f64.
    pub fn to_seconds(&self, value: i64) -> f64 {
        value as f64 * self.0.to_f64()
    }

    /// Get the time base as a rational.
    pub fn as_rational(&self) -> Rational {
        self.0
    }
}

impl Default for TimeBase {
    fn default() -> Self {
        Self::MPEG
    }
}

impl From<Rational> for TimeBase {
    fn from(r: Rational) -> Self {
        Self(r)
    }
}

impl fmt::Display for TimeBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.0.num, self.0.den)
    }
}

/// A timestamp with an associated time base.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Timestamp {
    /// The raw timestamp value.
    pub value: i64,
    /// The time base for interpreting the value.
    pub time_base: TimeBase,
}

impl Timestamp {
    /// Value representing an undefined timestamp.
    pub const NONE: i64 = NOPTS_VALUE;

    /// Create a new timestamp.
    pub fn new(value: i64, time_base: TimeBase) -> Self {
        Self { value, time_base }
    }

    /// Create an undefined timestamp.
    pub fn none() -> Self {
        Self {
            value: Self::NONE,
            time_base: TimeBase::default(),
        }
    }

    /// Create an undefined timestamp that still carries a time base.
    pub fn none_in(time_base: TimeBase) -> Self {
        Self {
            value: Self::NONE,
            time_base,
        }
    }

    /// Check if this timestamp is defined.
    pub fn is_valid(&self) -> bool {
        self.value != Self::NONE
    }

    /// Defined value, if any.
    pub fn value(&self) -> Option<i64> {
        self.is_valid().then_some(self.value)
    }

    /// Convert to a different time base. An undefined timestamp stays undefined.
    pub fn rescale(&self, target: TimeBase) -> Self {
        Self {
            value: self.time_base.convert(self.value, target),
            time_base: target,
        }
    }

    /// Convert to seconds.
    pub fn to_seconds(&self) -> Option<f64> {
        self.value().map(|v| self.time_base.to_seconds(v))
    }

    /// Create from milliseconds.
    pub fn from_millis(millis: i64) -> Self {
        Self {
            value: millis,
            time_base: TimeBase::MILLISECONDS,
        }
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Self::none()
    }
}

impl PartialEq for Timestamp {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Timestamp {}

impl PartialOrd for Timestamp {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Timestamp {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self.is_valid(), other.is_valid()) {
            (false, false) => Ordering::Equal,
            (false, true) => Ordering::Less,
            (true, false) => Ordering::Greater,
            (true, true) => {
                let lhs = self.value as i128
                    * self.time_base.0.num as i128
                    * other.time_base.0.den as i128;
                let rhs = other.value as i128
                    * other.time_base.0.num as i128
                    * self.time_base.0.den as i128;
                lhs.cmp(&rhs)
            }
        }
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(secs) = self.to_seconds() {
            let hours = (secs / 3600.0) as u32;
            let mins = ((secs % 3600.0) / 60.0) as u32;
            let secs = secs % 60.0;
            write!(f, "{:02}:{:02}:{:06.3}", hours, mins, secs)
        } else {
            write!(f, "NONE")
        }
    }
}

/// A duration with an associated time base. Shares the "unknown" sentinel with [`Timestamp`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Duration {
    /// The raw duration value.
    pub value: i64,
    /// The time base for interpreting the value.
    pub time_base: TimeBase,
}

impl Duration {
    /// Create a new duration.
    pub fn new(value: i64, time_base: TimeBase) -> Self {
        Self { value, time_base }
    }

    /// Create a zero duration.
    pub fn zero() -> Self {
        Self {
            value: 0,
            time_base: TimeBase::default(),
        }
    }

    /// Create an unknown duration.
    pub fn none() -> Self {
        Self {
            value: NOPTS_VALUE,
            time_base: TimeBase::default(),
        }
    }

    /// Check if this duration is defined.
    pub fn is_valid(&self) -> bool {
        self.value != NOPTS_VALUE
    }

    /// Check if this duration is zero.
    pub fn is_zero(&self) -> bool {
        self.value == 0
    }

    /// Convert to a different time base. An unknown duration stays unknown.
    pub fn rescale(&self, target: TimeBase) -> Self {
        Self {
            value: self.time_base.convert(self.value, target),
            time_base: target,
        }
    }

    /// Convert to seconds.
    pub fn to_seconds(&self) -> Option<f64> {
        self.is_valid()
            .then(|| self.time_base.to_seconds(self.value))
    }
}

impl Default for Duration {
    fn default() -> Self {
        Self::zero()
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        if !self.is_valid() || !rhs.is_valid() {
            return self;
        }
        let rhs = rhs.rescale(self.time_base);
        Timestamp {
            value: self.value.saturating_add(rhs.value),
            time_base: self.time_base,
        }
    }
}
