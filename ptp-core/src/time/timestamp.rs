use core::ops::{Add, Sub};

use serde::{Deserialize, Serialize};

use super::Duration;

const NANOS_PER_SEC: i128 = 1_000_000_000;

/// A point in PTP time as captured by the timestamping hardware.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize, Deserialize,
)]
pub struct Timestamp {
    /// 48 bit seconds field
    pub seconds: u64,
    /// Always below 10^9
    pub nanos: u32,
}

impl Timestamp {
    pub const fn new(seconds: u64, nanos: u32) -> Self {
        Self { seconds, nanos }
    }

    fn total_nanos(&self) -> i128 {
        self.seconds as i128 * NANOS_PER_SEC + self.nanos as i128
    }

    fn from_total_nanos(total: i128) -> Self {
        let total = total.max(0);
        Self {
            seconds: (total / NANOS_PER_SEC) as u64,
            nanos: (total % NANOS_PER_SEC) as u32,
        }
    }
}

impl Sub for Timestamp {
    type Output = Duration;

    fn sub(self, rhs: Self) -> Self::Output {
        let diff = self.total_nanos() - rhs.total_nanos();
        Duration::from_nanos(diff.clamp(i64::MIN as i128, i64::MAX as i128) as i64)
    }
}

/// Adding a negative duration that would cross the epoch saturates at zero.
impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Self::Output {
        Self::from_total_nanos(self.total_nanos() + rhs.nanos_rounded() as i128)
    }
}

impl Sub<Duration> for Timestamp {
    type Output = Timestamp;

    fn sub(self, rhs: Duration) -> Self::Output {
        self + -rhs
    }
}
