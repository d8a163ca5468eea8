//! 1PPS delay calibration.
//!
//! A [CalibrationSession] lives only as long as one calibration run. After
//! a settle period it averages a fixed number of one second delay samples.
//! RS422 calibration loops the main output back through the sub board, so
//! the sample is a round trip and half of it is the one way delay. SMA
//! calibration loops our own output into the virtual port input, so the
//! sample already is the one way delay.

use arrayvec::ArrayVec;
use tracing::{debug, info};

use crate::time::Duration;

/// One second periods ignored after the output changed
pub const CALIBRATION_SETTLE_PERIODS: u32 = 4;

/// One second periods averaged into the result
pub const CALIBRATION_MEASURE_PERIODS: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationKind {
    RoundTrip,
    Loopback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibrationProgress {
    Settling { periods_left: u32 },
    Measuring { samples: usize },
    Done(Duration),
}

#[derive(Debug)]
pub struct CalibrationSession {
    kind: CalibrationKind,
    settle_left: u32,
    samples: ArrayVec<Duration, CALIBRATION_MEASURE_PERIODS>,
    result: Option<Duration>,
}

impl CalibrationSession {
    pub fn new(kind: CalibrationKind) -> Self {
        debug!(?kind, "calibration started");
        Self {
            kind,
            settle_left: CALIBRATION_SETTLE_PERIODS,
            samples: ArrayVec::new(),
            result: None,
        }
    }

    pub fn kind(&self) -> CalibrationKind {
        self.kind
    }

    /// Feed the delay measured during one 1PPS period
    pub fn add_sample(&mut self, measured: Duration) -> CalibrationProgress {
        if let Some(result) = self.result {
            return CalibrationProgress::Done(result);
        }

        if self.settle_left > 0 {
            self.settle_left -= 1;
            return CalibrationProgress::Settling {
                periods_left: self.settle_left,
            };
        }

        // capacity equals the measure period count, so this never fails
        let _ = self.samples.try_push(measured);
        if !self.samples.is_full() {
            return CalibrationProgress::Measuring {
                samples: self.samples.len(),
            };
        }

        let sum = self
            .samples
            .iter()
            .fold(Duration::ZERO, |acc, sample| acc + *sample);
        let mean = sum / CALIBRATION_MEASURE_PERIODS as u32;
        let result = match self.kind {
            CalibrationKind::RoundTrip => mean / 2,
            CalibrationKind::Loopback => mean,
        };
        info!(kind = ?self.kind, delay = %result, "calibration finished");
        self.result = Some(result);
        CalibrationProgress::Done(result)
    }

    pub fn result(&self) -> Option<Duration> {
        self.result
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_is_halved_after_settling() {
        let mut session = CalibrationSession::new(CalibrationKind::RoundTrip);

        for left in (0..CALIBRATION_SETTLE_PERIODS).rev() {
            // settle samples are garbage and must not count
            assert_eq!(
                session.add_sample(Duration::from_secs(1)),
                CalibrationProgress::Settling { periods_left: left }
            );
        }

        for i in 1..CALIBRATION_MEASURE_PERIODS {
            assert_eq!(
                session.add_sample(Duration::from_nanos(if i % 2 == 0 { 90 } else { 110 })),
                CalibrationProgress::Measuring { samples: i }
            );
        }
        assert!(session.result().is_none());

        // samples: five of 110 and five of 90, mean 100, one way 50
        assert_eq!(
            session.add_sample(Duration::from_nanos(90)),
            CalibrationProgress::Done(Duration::from_nanos(50))
        );
        assert_eq!(session.result(), Some(Duration::from_nanos(50)));
        assert_eq!(
            session.add_sample(Duration::from_secs(3)),
            CalibrationProgress::Done(Duration::from_nanos(50))
        );
    }

    #[test]
    fn loopback_is_not_halved() {
        let mut session = CalibrationSession::new(CalibrationKind::Loopback);
        let mut progress = CalibrationProgress::Measuring { samples: 0 };
        for _ in 0..(CALIBRATION_SETTLE_PERIODS as usize + CALIBRATION_MEASURE_PERIODS) {
            progress = session.add_sample(Duration::from_nanos(24));
        }
        assert_eq!(progress, CalibrationProgress::Done(Duration::from_nanos(24)));
    }
}
