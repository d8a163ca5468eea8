//! A non-Ethernet time reference exposed as a pseudo port.
//!
//! The virtual port takes part in the best master selection next to the
//! Ethernet ports. Its announce data is synthesized from the instance's own
//! data set, with every attribute independently overridable by the operator.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::{
    bmc::AnnounceInfo,
    datastructures::{
        ClockIdentity, ClockQuality, Overrides, PortIdentity, TimePropertiesDS,
    },
    error::{PtpError, Result},
    io_pin::{PinFunction, PinId},
    rs422::Rs422Protocol,
    time::{Duration, Timestamp},
    VIRTUAL_PORT_ALARM_TIME,
};

/// Cable delay of a 1PPS input when nothing is configured, about one meter
pub const VIRTUAL_PORT_DEFAULT_DELAY: u32 = 5;

/// Extra input delay of a sub board behind an RS422 link
pub const VIRTUAL_PORT_SUB_DELAY: u32 = 19;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VirtualPortMode {
    Disable,
    MainAuto,
    Sub,
    MainMan,
    #[default]
    PpsIn,
    PpsOut,
    FreqOut,
}

impl VirtualPortMode {
    /// Modes in which the port receives a reference
    pub fn is_input(&self) -> bool {
        matches!(self, VirtualPortMode::Sub | VirtualPortMode::PpsIn)
    }

    fn pin_function(&self) -> PinFunction {
        match self {
            VirtualPortMode::Disable => PinFunction::Disabled,
            VirtualPortMode::Sub | VirtualPortMode::PpsIn => PinFunction::Input,
            _ => PinFunction::Output,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VirtualPortState {
    Unbound,
    Disabled,
    Active,
    Alarmed,
}

/// Values the instance currently computes for itself, used where no
/// override is set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualPortDefaults {
    pub clock_identity: ClockIdentity,
    pub quality: ClockQuality,
    pub priority1: u8,
    pub priority2: u8,
    pub local_priority: u8,
}

/// Effective attributes after applying the overrides
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct VirtualPortAttributes {
    pub clock_identity: ClockIdentity,
    pub quality: ClockQuality,
    pub priority1: u8,
    pub priority2: u8,
    pub local_priority: u8,
    pub steps_removed: u16,
}

/// Configuration that is only changed while the port is not running
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct VirtualPortConfig {
    pub mode: VirtualPortMode,
    /// Configured input delay in nanoseconds
    pub delay: u32,
    pub proto: Rs422Protocol,
    /// Switch port carrying PIM time of day
    pub pim_port: u16,
    /// Raise the loss of signal alarm
    pub alarm: bool,
}

impl Default for VirtualPortConfig {
    fn default() -> Self {
        Self {
            mode: VirtualPortMode::PpsIn,
            delay: VIRTUAL_PORT_DEFAULT_DELAY,
            proto: Rs422Protocol::SerPolyt,
            pim_port: 0,
            alarm: true,
        }
    }
}

/// One edge on the input, optionally with the time of day it stood for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualPortSample {
    /// When the edge arrived, in local clock time
    pub local: Timestamp,
    /// Reference time of the edge, `None` for a bare 1PPS
    pub reference: Option<Timestamp>,
    /// Path delay measured by the interface delivering the edge, replacing
    /// the port's own
    pub delay: Option<Duration>,
}

/// Offset of the local clock relative to the virtual reference
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VirtualPortMeasurement {
    pub offset: Duration,
    pub delay: Duration,
    pub at: Timestamp,
    /// Only the phase within the second is known
    pub phase_only: bool,
}

#[derive(Debug)]
pub struct VirtualPort {
    config: VirtualPortConfig,
    state: VirtualPortState,
    pin: Option<PinId>,
    overrides: Overrides,
    time_properties: TimePropertiesDS,
    silent_ticks: u32,
    calibrated_delay: Option<Duration>,
    sequence_id: u16,
    samples: u64,
}

impl VirtualPort {
    pub fn new(config: VirtualPortConfig) -> Self {
        Self {
            config,
            state: VirtualPortState::Unbound,
            pin: None,
            overrides: Overrides::default(),
            time_properties: TimePropertiesDS::default(),
            silent_ticks: 0,
            calibrated_delay: None,
            sequence_id: 0,
            samples: 0,
        }
    }

    pub fn config(&self) -> &VirtualPortConfig {
        &self.config
    }

    /// Replace the configuration; only allowed while the port is not bound
    pub fn set_config(&mut self, config: VirtualPortConfig) -> Result<()> {
        if self.state != VirtualPortState::Unbound {
            return Err(PtpError::InvalidState("virtual port must be unbound"));
        }
        self.config = config;
        Ok(())
    }

    pub fn state(&self) -> VirtualPortState {
        self.state
    }

    pub fn pin(&self) -> Option<PinId> {
        self.pin
    }

    /// How the bound pin is driven in the configured mode
    pub fn pin_function(&self) -> PinFunction {
        self.config.mode.pin_function()
    }

    /// Takes part in the source selection
    pub fn is_candidate(&self) -> bool {
        self.state == VirtualPortState::Active && self.config.mode.is_input()
    }

    /// Record the pin binding; pin ownership is handled by the caller
    pub fn bind(&mut self, pin: PinId) {
        self.pin = Some(pin);
        if self.state == VirtualPortState::Unbound {
            self.state = VirtualPortState::Disabled;
        }
        debug!(pin = pin.index(), "virtual port bound");
    }

    /// Drop the binding, returning the pin that was held
    pub fn unbind(&mut self) -> Option<PinId> {
        self.state = VirtualPortState::Unbound;
        self.silent_ticks = 0;
        self.pin.take()
    }

    pub fn enable(&mut self, enable: bool) -> Result<()> {
        match (self.state, enable) {
            (VirtualPortState::Unbound, true) => {
                Err(PtpError::InvalidState("virtual port has no io pin"))
            }
            (VirtualPortState::Unbound, false) => Ok(()),
            (VirtualPortState::Disabled, true) => {
                self.state = VirtualPortState::Active;
                self.silent_ticks = 0;
                info!("virtual port enabled");
                Ok(())
            }
            (_, false) => {
                self.state = VirtualPortState::Disabled;
                info!("virtual port disabled");
                Ok(())
            }
            (VirtualPortState::Active | VirtualPortState::Alarmed, true) => Ok(()),
        }
    }

    pub fn overrides(&self) -> &Overrides {
        &self.overrides
    }

    pub fn overrides_mut(&mut self) -> &mut Overrides {
        &mut self.overrides
    }

    /// The identity used when none is configured, kept distinct from the
    /// instance so the two are never mistaken for the same grandmaster
    pub fn default_identity(instance_identity: ClockIdentity) -> ClockIdentity {
        let mut identity = instance_identity.0;
        identity[3] = 0xff;
        identity[4] = 0xfd;
        ClockIdentity(identity)
    }

    pub fn attributes(&self, defaults: &VirtualPortDefaults) -> VirtualPortAttributes {
        let o = &self.overrides;
        VirtualPortAttributes {
            clock_identity: o
                .clock_identity
                .unwrap_or_else(|| Self::default_identity(defaults.clock_identity)),
            quality: ClockQuality {
                clock_class: o.clock_class.unwrap_or(defaults.quality.clock_class),
                clock_accuracy: o.clock_accuracy.unwrap_or(defaults.quality.clock_accuracy),
                offset_scaled_log_variance: o
                    .clock_variance
                    .unwrap_or(defaults.quality.offset_scaled_log_variance),
            },
            priority1: o.priority1.unwrap_or(defaults.priority1),
            priority2: o.priority2.unwrap_or(defaults.priority2),
            local_priority: o.local_priority.unwrap_or(defaults.local_priority),
            steps_removed: o.steps_removed.unwrap_or(0),
        }
    }

    /// The announce this reference would send if it were a PTP master
    pub fn announce(&self, defaults: &VirtualPortDefaults) -> AnnounceInfo {
        let attributes = self.attributes(defaults);
        AnnounceInfo {
            source_port_identity: PortIdentity {
                clock_identity: attributes.clock_identity,
                port_number: 1,
            },
            sequence_id: self.sequence_id,
            grandmaster_priority_1: attributes.priority1,
            grandmaster_clock_quality: attributes.quality,
            grandmaster_priority_2: attributes.priority2,
            grandmaster_identity: attributes.clock_identity,
            steps_removed: attributes.steps_removed,
            time_properties: self.time_properties,
            path_trace: vec![attributes.clock_identity],
        }
    }

    pub fn time_properties(&self) -> &TimePropertiesDS {
        &self.time_properties
    }

    pub fn set_time_properties(&mut self, properties: TimePropertiesDS) -> Result<()> {
        if !properties.is_consistent() {
            return Err(PtpError::InvalidParameter("leap59 and leap61 both set"));
        }
        self.time_properties = properties;
        Ok(())
    }

    pub fn set_alarm(&mut self, enable: bool) {
        self.config.alarm = enable;
        if !enable && self.state == VirtualPortState::Alarmed {
            self.state = VirtualPortState::Active;
        }
        self.silent_ticks = 0;
    }

    /// Hardware reported loss of the input signal
    pub fn alarm_rx(&mut self) -> bool {
        if self.config.alarm && self.state == VirtualPortState::Active {
            warn!("virtual port input lost");
            self.state = VirtualPortState::Alarmed;
            return true;
        }
        false
    }

    /// Advance the loss of signal timer. Returns true when the alarm fires.
    pub fn tick(&mut self) -> bool {
        if self.state != VirtualPortState::Active || !self.config.alarm {
            return false;
        }

        self.silent_ticks = self.silent_ticks.saturating_add(1);
        if self.silent_ticks >= VIRTUAL_PORT_ALARM_TIME {
            warn!(ticks = self.silent_ticks, "no input on virtual port, alarm raised");
            self.state = VirtualPortState::Alarmed;
            return true;
        }
        false
    }

    pub fn calibrated_delay(&self) -> Option<Duration> {
        self.calibrated_delay
    }

    pub fn set_calibrated_delay(&mut self, delay: Duration) {
        self.calibrated_delay = Some(delay);
    }

    /// Delay applied to every sample of this port
    pub fn input_delay(&self) -> Duration {
        let base = self
            .calibrated_delay
            .unwrap_or_else(|| Duration::from_nanos(self.config.delay as i64));
        if self.config.mode == VirtualPortMode::Sub {
            base + Duration::from_nanos(VIRTUAL_PORT_SUB_DELAY as i64)
        } else {
            base
        }
    }

    /// Handle an input edge. Returns the measurement when the port is
    /// running, resuming it from the alarm state.
    pub fn timestamp_rx(&mut self, sample: VirtualPortSample) -> Option<VirtualPortMeasurement> {
        match self.state {
            VirtualPortState::Unbound | VirtualPortState::Disabled => return None,
            VirtualPortState::Alarmed => {
                info!("virtual port input restored");
                self.state = VirtualPortState::Active;
            }
            VirtualPortState::Active => {}
        }
        self.silent_ticks = 0;
        self.sequence_id = self.sequence_id.wrapping_add(1);
        self.samples += 1;

        let delay = sample.delay.unwrap_or_else(|| self.input_delay());
        let measurement = match sample.reference {
            Some(reference) => VirtualPortMeasurement {
                offset: sample.local - (reference + delay),
                delay,
                at: sample.local,
                phase_only: false,
            },
            None => {
                // the edge marks a whole second of the reference
                let phase = Duration::from_nanos(sample.local.nanos as i64) - delay;
                let half_second = Duration::from_millis(500);
                let offset = if phase >= half_second {
                    phase - Duration::from_secs(1)
                } else if phase < -half_second {
                    phase + Duration::from_secs(1)
                } else {
                    phase
                };
                VirtualPortMeasurement {
                    offset,
                    delay,
                    at: sample.local,
                    phase_only: true,
                }
            }
        };
        Some(measurement)
    }

    pub fn samples_received(&self) -> u64 {
        self.samples
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io_pin::tests::board;

    fn defaults() -> VirtualPortDefaults {
        VirtualPortDefaults {
            clock_identity: ClockIdentity([0, 1, 2, 0xff, 0xfe, 3, 4, 5]),
            quality: ClockQuality::default(),
            priority1: 128,
            priority2: 128,
            local_priority: 128,
        }
    }

    fn active_port() -> VirtualPort {
        let pins = board();
        let mut port = VirtualPort::new(VirtualPortConfig::default());
        port.bind(pins.pin_id(2).unwrap());
        port.enable(true).unwrap();
        port
    }

    #[test]
    fn state_machine() {
        let pins = board();
        let mut port = VirtualPort::new(VirtualPortConfig::default());
        assert_eq!(port.state(), VirtualPortState::Unbound);
        assert!(port.enable(true).is_err());

        port.bind(pins.pin_id(2).unwrap());
        assert_eq!(port.state(), VirtualPortState::Disabled);
        assert!(!port.is_candidate());

        port.enable(true).unwrap();
        assert_eq!(port.state(), VirtualPortState::Active);
        assert!(port.is_candidate());
        assert!(port.set_config(VirtualPortConfig::default()).is_err());

        port.enable(false).unwrap();
        assert_eq!(port.state(), VirtualPortState::Disabled);
        assert_eq!(port.unbind(), pins.pin_id(2).ok());
        assert_eq!(port.state(), VirtualPortState::Unbound);
    }

    #[test]
    fn alarm_after_silence_and_recovery() {
        let mut port = active_port();

        for _ in 0..VIRTUAL_PORT_ALARM_TIME - 1 {
            assert!(!port.tick());
        }
        assert_eq!(port.state(), VirtualPortState::Active);
        assert!(port.tick());
        assert_eq!(port.state(), VirtualPortState::Alarmed);
        assert!(!port.is_candidate());

        let sample = VirtualPortSample {
            local: Timestamp::new(100, 0),
            reference: None,
            delay: None,
        };
        assert!(port.timestamp_rx(sample).is_some());
        assert_eq!(port.state(), VirtualPortState::Active);
    }

    #[test]
    fn disarmed_alarm_never_fires() {
        let mut port = active_port();
        port.set_alarm(false);
        for _ in 0..2 * VIRTUAL_PORT_ALARM_TIME {
            assert!(!port.tick());
        }
        assert!(!port.alarm_rx());
        assert_eq!(port.state(), VirtualPortState::Active);

        port.set_alarm(true);
        assert!(port.alarm_rx());
        assert_eq!(port.state(), VirtualPortState::Alarmed);
    }

    #[test]
    fn clearing_overrides_follows_current_defaults() {
        let mut port = VirtualPort::new(VirtualPortConfig::default());
        let mut d = defaults();

        port.overrides_mut().clock_class = Some(6);
        port.overrides_mut().local_priority = Some(10);
        assert_eq!(port.attributes(&d).quality.clock_class, 6);
        assert_eq!(port.attributes(&d).local_priority, 10);

        // the instance changes while the override is in place
        d.quality.clock_class = 165;
        port.overrides_mut().clock_class = None;
        port.overrides_mut().local_priority = None;
        assert_eq!(port.attributes(&d).quality.clock_class, 165);
        assert_eq!(port.attributes(&d).local_priority, 128);

        assert_ne!(port.attributes(&d).clock_identity, d.clock_identity);
        let id = ClockIdentity([7; 8]);
        port.overrides_mut().clock_identity = Some(id);
        assert_eq!(port.announce(&d).grandmaster_identity, id);
    }

    #[test]
    fn measurements_apply_delay() {
        let mut port = active_port();

        let sample = VirtualPortSample {
            local: Timestamp::new(100, 1_000),
            reference: Some(Timestamp::new(100, 0)),
            delay: None,
        };
        let m = port.timestamp_rx(sample).unwrap();
        assert_eq!(m.offset, Duration::from_nanos(1_000 - VIRTUAL_PORT_DEFAULT_DELAY as i64));
        assert!(!m.phase_only);

        port.set_calibrated_delay(Duration::from_nanos(40));
        let sample = VirtualPortSample {
            local: Timestamp::new(101, 999_999_960),
            reference: None,
            delay: None,
        };
        let m = port.timestamp_rx(sample).unwrap();
        assert_eq!(m.offset, Duration::from_nanos(-80));
        assert!(m.phase_only);
    }
}
