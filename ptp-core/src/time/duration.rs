//! Implementation of the [Duration] type

use core::{
    fmt::Display,
    ops::{Add, AddAssign, Div, Mul, Neg, Sub, SubAssign},
};

use fixed::{
    traits::{LossyInto, ToFixed},
    types::I96F32,
};

use crate::TICKS_PER_SECOND;

/// A signed span of time with sub-nanosecond resolution.
///
/// Offsets, path delays and cable compensations are all expressed as a
/// duration, and the difference between two [`Timestamp`](super::Timestamp)s
/// is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash)]
pub struct Duration {
    /// Time in nanos
    inner: I96F32,
}

impl Duration {
    pub const ZERO: Duration = Duration {
        inner: I96F32::ZERO,
    };

    pub fn from_secs(secs: i64) -> Self {
        let inner = secs.to_fixed::<I96F32>() * 1_000_000_000.to_fixed::<I96F32>();
        Self { inner }
    }

    pub fn from_millis(millis: i64) -> Self {
        let inner = millis.to_fixed::<I96F32>() * 1_000_000.to_fixed::<I96F32>();
        Self { inner }
    }

    pub fn from_nanos(nanos: i64) -> Self {
        Self {
            inner: nanos.to_fixed::<I96F32>(),
        }
    }

    /// Create an instance from a fixed or floating point amount of
    /// nanoseconds, keeping the sub-nanosecond part
    pub fn from_fixed_nanos<F: ToFixed>(nanos: F) -> Self {
        Self {
            inner: nanos.to_fixed(),
        }
    }

    /// The span covered by `ticks` control loop ticks
    pub fn from_ticks(ticks: u32) -> Self {
        Self::from_secs(ticks as i64) / TICKS_PER_SECOND
    }

    /// Converts a PTP log interval (log2 of seconds) to a duration
    pub fn from_log_interval(log_interval: i8) -> Self {
        let seconds = 2.0f64.powi(log_interval as i32);
        Self::from_fixed_nanos(seconds * 1_000_000_000.0)
    }

    pub fn nanos(&self) -> I96F32 {
        self.inner
    }

    /// Total amount of nanoseconds, losing some precision
    pub fn nanos_lossy(&self) -> f64 {
        self.nanos().lossy_into()
    }

    /// Whole nanoseconds, rounded down and saturated to `i64`
    pub fn nanos_rounded(&self) -> i64 {
        self.inner.saturating_to_num()
    }

    pub fn secs(&self) -> i64 {
        (self.inner / 1_000_000_000.to_fixed::<I96F32>()).to_num()
    }

    pub fn abs(self) -> Duration {
        Duration::from_fixed_nanos(self.nanos().abs())
    }
}

impl Neg for Duration {
    type Output = Duration;

    fn neg(self) -> Self::Output {
        Self::from_fixed_nanos(-self.nanos())
    }
}

impl Add for Duration {
    type Output = Duration;

    fn add(self, rhs: Duration) -> Self::Output {
        Duration {
            inner: self.nanos() + rhs.nanos(),
        }
    }
}

impl AddAssign for Duration {
    fn add_assign(&mut self, rhs: Duration) {
        *self = *self + rhs;
    }
}

impl Sub for Duration {
    type Output = Duration;

    fn sub(self, rhs: Duration) -> Self::Output {
        self + -rhs
    }
}

impl SubAssign for Duration {
    fn sub_assign(&mut self, rhs: Duration) {
        *self = *self - rhs;
    }
}

impl<TF: ToFixed> Mul<TF> for Duration {
    type Output = Duration;

    fn mul(self, rhs: TF) -> Self::Output {
        Duration::from_fixed_nanos(self.nanos() * rhs.to_fixed::<I96F32>())
    }
}

impl<TF: ToFixed> Div<TF> for Duration {
    type Output = Duration;

    fn div(self, rhs: TF) -> Self::Output {
        Duration::from_fixed_nanos(self.nanos() / rhs.to_fixed::<I96F32>())
    }
}

impl Display for Duration {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}ns", self.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values() {
        assert_eq!(
            Duration::from_secs(-3).nanos(),
            (-3_000_000_000i64).to_fixed::<I96F32>()
        );
        assert_eq!(Duration::from_millis(250), Duration::from_nanos(250_000_000));
        assert_eq!(Duration::from_millis(1001).secs(), 1);
        assert_eq!(Duration::from_fixed_nanos(7.5f64).nanos_rounded(), 7);
        assert_eq!(Duration::from_nanos(-20).abs(), Duration::from_nanos(20));
    }

    #[test]
    fn ticks_and_log_intervals() {
        assert_eq!(Duration::from_ticks(TICKS_PER_SECOND), Duration::from_secs(1));
        assert_eq!(Duration::from_ticks(1280), Duration::from_secs(10));
        assert_eq!(Duration::from_log_interval(-3), Duration::from_millis(125));
        assert_eq!(Duration::from_log_interval(1), Duration::from_secs(2));
    }
}
