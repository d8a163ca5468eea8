//! Variable transmit delay of wireless (radio modem) links.
//!
//! The modem reports its delay as `base + length * incr`. Before it changes
//! the delay it sends a pre notification; samples taken between the
//! notification and the new delay, and the first sample after it, straddle
//! the change and are withheld from the servo.

use tracing::debug;

use crate::time::Duration;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WirelessDelay {
    pub base_delay: Duration,
    /// Added per byte of the packet
    pub incr_delay: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
enum DelayChange {
    #[default]
    Steady,
    Announced,
    Applied,
}

#[derive(Debug, Default)]
pub struct WirelessCompensator {
    enabled: bool,
    delay: WirelessDelay,
    change: DelayChange,
}

impl WirelessCompensator {
    pub fn set_enabled(&mut self, enable: bool) {
        self.enabled = enable;
        if !enable {
            self.change = DelayChange::Steady;
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn pre_notif(&mut self) {
        debug!("wireless delay change announced");
        self.change = DelayChange::Announced;
    }

    pub fn delay_set(&mut self, delay: WirelessDelay) {
        debug!(base = %delay.base_delay, incr = %delay.incr_delay, "wireless delay changed");
        self.delay = delay;
        self.change = DelayChange::Applied;
    }

    pub fn delay_get(&self) -> WirelessDelay {
        self.delay
    }

    /// Delay of a packet of `length` bytes, zero while disabled
    pub fn correction(&self, length: u16) -> Duration {
        if !self.enabled {
            return Duration::ZERO;
        }
        self.delay.base_delay + self.delay.incr_delay * length as i32
    }

    /// Whether a sample taken now may reach the servo
    pub fn admit_sample(&mut self) -> bool {
        if !self.enabled {
            return true;
        }
        match self.change {
            DelayChange::Steady => true,
            DelayChange::Announced => false,
            DelayChange::Applied => {
                self.change = DelayChange::Steady;
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delay() -> WirelessDelay {
        WirelessDelay {
            base_delay: Duration::from_nanos(1000),
            incr_delay: Duration::from_nanos(2),
        }
    }

    #[test]
    fn correction_follows_packet_length() {
        let mut wl = WirelessCompensator::default();
        wl.delay_set(delay());
        assert_eq!(wl.correction(64), Duration::ZERO);

        wl.set_enabled(true);
        assert_eq!(wl.correction(64), Duration::from_nanos(1128));
        assert_eq!(wl.delay_get(), delay());
    }

    #[test]
    fn samples_around_a_change_are_withheld() {
        let mut wl = WirelessCompensator::default();
        wl.set_enabled(true);
        assert!(wl.admit_sample());

        wl.pre_notif();
        assert!(!wl.admit_sample());
        assert!(!wl.admit_sample());

        wl.delay_set(delay());
        assert!(!wl.admit_sample());
        assert!(wl.admit_sample());
    }

    #[test]
    fn disabling_keeps_delay() {
        let mut wl = WirelessCompensator::default();
        wl.set_enabled(true);
        wl.delay_set(delay());
        let before = wl.correction(100);

        wl.set_enabled(false);
        assert_eq!(wl.delay_get(), delay());
        assert!(wl.admit_sample());

        wl.set_enabled(true);
        assert_eq!(wl.correction(100), before);
    }
}
