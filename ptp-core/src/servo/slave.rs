//! Lock state of the slave clock, driving the PID terms and deciding when
//! an offset is too large to steer away and needs a step.

use serde::Serialize;
use tracing::{debug, info};

use super::{
    config::SlaveConfig,
    pid::{to_ppb, PhaseLock, PidServo},
    ServoAction,
};
use crate::time::{Duration, Timestamp};

/// Consecutive stable offsets before the offset counts as stable
const STABLE_COUNT: u32 = 4;
/// Consecutive unstable offsets before a stable offset is lost
const UNSTABLE_COUNT: u32 = 3;

/// Offsets above this (ns) are stepped away when not frequency locking
const STEP_THRESHOLD: i64 = 100_000;
/// Offsets above this (ns) are stepped away while frequency locking
const STEP_THRESHOLD_LOCKING: i64 = 1_000_000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum SlaveState {
    #[default]
    FreeRun,
    FreqLocking,
    PhaseLocking,
    PhaseLocked,
    Holdover,
}

#[derive(Debug)]
pub struct SlaveClock {
    config: SlaveConfig,
    state: SlaveState,
    pid: PidServo,
    last_offset: Duration,
    stable_cnt: u32,
    unstable_cnt: u32,
    stable: bool,
    offset_ok: bool,
}

impl SlaveClock {
    pub fn new(config: SlaveConfig, pid: PidServo) -> Self {
        Self {
            config,
            state: SlaveState::FreeRun,
            pid,
            last_offset: Duration::ZERO,
            stable_cnt: 0,
            unstable_cnt: 0,
            stable: false,
            offset_ok: false,
        }
    }

    pub fn state(&self) -> SlaveState {
        self.state
    }

    pub fn config(&self) -> &SlaveConfig {
        &self.config
    }

    pub fn set_config(&mut self, config: SlaveConfig) {
        self.config = config;
    }

    pub fn pid(&self) -> &PidServo {
        &self.pid
    }

    pub fn pid_mut(&mut self) -> &mut PidServo {
        &mut self.pid
    }

    pub fn last_offset(&self) -> Duration {
        self.last_offset
    }

    fn stable_clear(&mut self) {
        self.stable = false;
        self.stable_cnt = 0;
        self.unstable_cnt = 0;
    }

    fn stable_calc(&mut self, offset: Duration) -> bool {
        let threshold = Duration::from_nanos(self.config.stable_offset as i64);
        if (offset - self.last_offset).abs() <= threshold {
            self.stable_cnt += 1;
            if self.stable_cnt >= STABLE_COUNT {
                self.stable = true;
                self.unstable_cnt = 0;
                self.stable_cnt -= 1;
            }
        } else {
            self.unstable_cnt += 1;
            if self.unstable_cnt >= UNSTABLE_COUNT {
                self.stable = false;
                self.stable_cnt = 0;
                self.unstable_cnt -= 1;
            }
        }
        self.stable
    }

    /// Offset check with hysteresis between `offset_ok` and `offset_fail`
    fn offset_within_limits(&mut self, offset: Duration) -> bool {
        let limit = if self.offset_ok {
            self.config.offset_fail
        } else {
            self.config.offset_ok
        };
        self.offset_ok = offset.abs() <= Duration::from_nanos(limit as i64);
        self.offset_ok
    }

    fn step(&mut self, offset: Duration) -> ServoAction {
        info!(%offset, "stepping clock");
        self.pid.reset_filter();
        self.stable_clear();
        self.last_offset = Duration::ZERO;
        self.state = SlaveState::FreqLocking;
        ServoAction::Step(-offset)
    }

    fn set_state(&mut self, state: SlaveState) {
        if self.state != state {
            debug!(from = ?self.state, to = ?state, "slave clock state changed");
            self.state = state;
        }
    }

    /// Process one offset of the local clock relative to the reference
    pub fn sample(&mut self, offset: Duration, at: Timestamp, hold_integral: bool) -> ServoAction {
        if self.state == SlaveState::FreeRun || self.state == SlaveState::Holdover {
            if offset.abs() > Duration::from_nanos(STEP_THRESHOLD) {
                return self.step(offset);
            }
            self.set_state(SlaveState::FreqLocking);
        }

        let stable = self.stable_calc(offset);
        self.last_offset = offset;

        match self.state {
            SlaveState::FreqLocking => {
                if offset.abs() > Duration::from_nanos(STEP_THRESHOLD_LOCKING) {
                    return self.step(offset);
                }
                let adj = self.pid.adjust(offset, at, PhaseLock::Frequency, hold_integral);
                if stable {
                    self.set_state(SlaveState::PhaseLocking);
                    self.stable_clear();
                }
                ServoAction::Frequency(to_ppb(adj))
            }
            SlaveState::PhaseLocking => {
                if offset.abs() > Duration::from_nanos(STEP_THRESHOLD) {
                    return self.step(offset);
                }
                let adj = self.pid.adjust(offset, at, PhaseLock::Locking, hold_integral);
                if stable && self.offset_within_limits(offset) {
                    self.set_state(SlaveState::PhaseLocked);
                }
                ServoAction::Frequency(to_ppb(adj))
            }
            _ => {
                let adj = self.pid.adjust(offset, at, PhaseLock::Locked, hold_integral);
                if !stable || !self.offset_within_limits(offset) {
                    self.set_state(SlaveState::PhaseLocking);
                    self.stable_clear();
                }
                ServoAction::Frequency(to_ppb(adj))
            }
        }
    }

    pub fn enter_holdover(&mut self) {
        self.set_state(SlaveState::Holdover);
        self.stable_clear();
    }

    /// Start locking again, keeping what the PID learned
    pub fn restart(&mut self) {
        self.set_state(SlaveState::FreeRun);
        self.stable_clear();
        self.offset_ok = false;
        self.pid.reset_filter();
    }

    pub fn clear(&mut self) {
        self.pid.clear();
        self.restart();
        self.last_offset = Duration::ZERO;
    }
}
