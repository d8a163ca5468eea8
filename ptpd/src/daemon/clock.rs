use clock_steering::{unix::UnixClock, Clock, TimeOffset};
use ptp_core::{
    clock::LocalClock,
    time::{Duration, Timestamp},
};

/// An OS clock steered by one clock instance: the system realtime clock or
/// a PTP hardware clock opened from `/dev/ptpN`
#[derive(Debug, Clone, Copy)]
pub struct PtpClockWrapper(UnixClock);

impl PtpClockWrapper {
    pub fn new(clock: UnixClock) -> Self {
        PtpClockWrapper(clock)
    }
}

impl Default for PtpClockWrapper {
    fn default() -> Self {
        PtpClockWrapper(UnixClock::CLOCK_REALTIME)
    }
}

#[allow(clippy::cast_sign_loss)]
fn convert_clock_timestamp(ts: clock_steering::Timestamp) -> Timestamp {
    Timestamp::new(ts.seconds.max(0) as u64, ts.nanos)
}

/// Split into whole seconds and a nanosecond part in `0..1e9`
fn split_offset(offset: Duration) -> (i64, u32) {
    let nanos = offset.nanos_rounded();
    (
        nanos.div_euclid(1_000_000_000),
        nanos.rem_euclid(1_000_000_000) as u32,
    )
}

impl LocalClock for PtpClockWrapper {
    type Error = <UnixClock as Clock>::Error;

    fn now(&self) -> Result<Timestamp, Self::Error> {
        self.0.now().map(convert_clock_timestamp)
    }

    fn set_frequency(&self, ppb: f64) -> Result<(), Self::Error> {
        // the kernel takes ppm
        self.0.set_frequency(ppb * 1e-3).map(|_| ())
    }

    fn step_clock(&self, offset: Duration) -> Result<(), Self::Error> {
        let (seconds, nanos) = split_offset(offset);

        #[allow(clippy::cast_lossless)]
        self.0
            .step_clock(TimeOffset {
                seconds: seconds as _,
                nanos,
            })
            .map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn negative_offsets_borrow_a_second() {
        assert_eq!(split_offset(Duration::from_nanos(1_500_000_000)), (1, 500_000_000));
        assert_eq!(split_offset(Duration::from_nanos(-1)), (-1, 999_999_999));
        assert_eq!(split_offset(Duration::ZERO), (0, 0));
    }
}
