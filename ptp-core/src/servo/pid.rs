//! The PID controller and the holdover frequency estimate.
//!
//! Adjustments are kept in units of 0.1 ppb, positive when the local clock
//! is ahead and has to slow down.

use tracing::trace;

use super::config::ServoConfig;
use crate::time::{Duration, Timestamp};

/// Largest adjustment, 100 ppm in units of 0.1 ppb
pub const ADJ_FREQ_MAX: f64 = 1_000_000.0;

/// Offsets from this size on saturate the output instead of running the loop
const ADJ_OFFSET_MAX: f64 = 1_000_000_000.0;

/// How far the slave has locked, selecting the active PID terms
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseLock {
    /// Only the proportional term
    Frequency,
    /// All terms, holdover estimate not updated
    Locking,
    /// All terms, holdover estimate updated
    Locked,
}

#[derive(Debug)]
pub struct PidServo {
    config: ServoConfig,
    integral: f64,
    prev_offset: Option<f64>,
    prev_time: Option<Timestamp>,
    adj: f64,
    adj_average: f64,
    adj_stable: bool,
    holdover_count: u32,
    holdover_ok: bool,
}

impl PidServo {
    pub fn new(config: ServoConfig) -> Self {
        Self {
            config,
            integral: 0.0,
            prev_offset: None,
            prev_time: None,
            adj: 0.0,
            adj_average: 0.0,
            adj_stable: false,
            holdover_count: 0,
            holdover_ok: false,
        }
    }

    pub fn config(&self) -> &ServoConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: ServoConfig) {
        self.config = config;
    }

    /// Forget the loop history after a step; the holdover estimate survives
    pub fn reset_filter(&mut self) {
        self.integral = 0.0;
        self.prev_offset = None;
        self.prev_time = None;
    }

    /// Forget everything
    pub fn clear(&mut self) {
        *self = Self::new(self.config);
    }

    /// Run the loop on one offset sample and return the new adjustment.
    ///
    /// With `hold_integral` the integral stays at its value, used when the
    /// frequency is locked to an electrical reference.
    pub fn adjust(
        &mut self,
        offset: Duration,
        at: Timestamp,
        lock: PhaseLock,
        hold_integral: bool,
    ) -> f64 {
        let o = offset.nanos_lossy();
        let c = &self.config;

        let adj = if o.abs() >= ADJ_OFFSET_MAX {
            ADJ_FREQ_MAX.copysign(o)
        } else {
            let dt = match self.prev_time {
                Some(prev) => (at - prev).nanos_lossy() / 1e9,
                None => 1.0,
            };
            let dt = if dt > 0.0 { dt } else { 1.0 };
            self.prev_time = Some(at);

            let prop = if c.p_reg { o / c.ap as f64 } else { 0.0 };

            let running = lock != PhaseLock::Frequency;
            if c.i_reg && running {
                if !hold_integral {
                    self.integral = (self.integral + o * dt / c.ai as f64)
                        .clamp(-ADJ_FREQ_MAX, ADJ_FREQ_MAX);
                }
            } else {
                self.integral = 0.0;
            }

            let diff = if c.d_reg && running {
                let diff = self
                    .prev_offset
                    .map_or(0.0, |prev| (o - prev) / (dt * c.ad as f64));
                self.prev_offset = Some(o);
                diff
            } else {
                self.prev_offset = None;
                0.0
            };

            trace!(prop, integral = self.integral, diff, dt, "pid terms");
            ((prop + self.integral + diff) * c.gain as f64).clamp(-ADJ_FREQ_MAX, ADJ_FREQ_MAX)
        };
        self.adj = adj;

        if lock == PhaseLock::Locked {
            let filt_div = (self.holdover_count + 1).min(self.config.ho_filter).max(1) as f64;
            self.adj_average = (self.adj_average * (filt_div - 1.0) + adj) / filt_div;
            self.adj_stable = (self.adj_average - adj).abs()
                <= self.config.stable_adj_threshold as f64 / 10.0;
            if self.adj_stable && !self.holdover_ok {
                self.holdover_ok = self.holdover_count >= self.config.ho_filter;
                self.holdover_count += 1;
            }
        }
        if !self.adj_stable || lock != PhaseLock::Locked {
            self.holdover_count = 0;
            self.holdover_ok = false;
        }

        adj
    }

    pub fn adjustment(&self) -> f64 {
        self.adj
    }

    pub fn adj_average(&self) -> f64 {
        self.adj_average
    }

    /// The averaged adjustment is trustworthy enough for holdover
    pub fn holdover_ok(&self) -> bool {
        self.holdover_ok
    }

    /// Clock frequency correction in ppb to use in holdover
    pub fn holdover_frequency(&self) -> f64 {
        let adj = if self.holdover_ok {
            self.adj_average
        } else {
            self.adj
        };
        to_ppb(adj)
    }
}

/// Clock frequency correction in ppb for an adjustment
pub fn to_ppb(adj: f64) -> f64 {
    -adj / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(secs: u64) -> Timestamp {
        Timestamp::new(secs, 0)
    }

    #[test]
    fn proportional_only_while_frequency_locking() {
        let mut pid = PidServo::new(ServoConfig::default());
        let adj = pid.adjust(Duration::from_nanos(300), at(1), PhaseLock::Frequency, false);
        assert!((adj - 100.0).abs() < 1e-9);
        assert!((to_ppb(adj) + 10.0).abs() < 1e-9);

        let adj = pid.adjust(Duration::from_nanos(300), at(2), PhaseLock::Frequency, false);
        assert!((adj - 100.0).abs() < 1e-9);
    }

    #[test]
    fn integral_accumulates_and_can_be_held() {
        let config = ServoConfig {
            p_reg: false,
            d_reg: false,
            ..Default::default()
        };
        let mut pid = PidServo::new(config);
        pid.adjust(Duration::from_nanos(80), at(1), PhaseLock::Locking, false);
        let adj = pid.adjust(Duration::from_nanos(80), at(2), PhaseLock::Locking, false);
        assert!((adj - 2.0).abs() < 1e-9);

        let adj = pid.adjust(Duration::from_nanos(80), at(3), PhaseLock::Locking, true);
        assert!((adj - 2.0).abs() < 1e-9);
    }

    #[test]
    fn huge_offsets_saturate() {
        let mut pid = PidServo::new(ServoConfig::default());
        let adj = pid.adjust(Duration::from_secs(-2), at(1), PhaseLock::Locked, false);
        assert_eq!(adj, -ADJ_FREQ_MAX);
    }

    #[test]
    fn holdover_needs_a_full_filter_of_stable_samples() {
        let config = ServoConfig {
            ho_filter: 5,
            ..Default::default()
        };
        let mut pid = PidServo::new(config);

        for i in 0..5 {
            pid.adjust(Duration::ZERO, at(i + 1), PhaseLock::Locked, false);
            assert!(!pid.holdover_ok());
        }
        pid.adjust(Duration::ZERO, at(6), PhaseLock::Locked, false);
        assert!(pid.holdover_ok());

        // losing lock throws the confidence away
        pid.adjust(Duration::ZERO, at(7), PhaseLock::Locking, false);
        assert!(!pid.holdover_ok());
    }
}
