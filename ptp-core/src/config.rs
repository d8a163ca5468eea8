//! Start-up configuration of the synchronization core.
//!
//! Everything here can also be changed at runtime through
//! [`PtpSystem`](crate::PtpSystem); these structures only describe the
//! initial state.

use serde::{Deserialize, Serialize};

use crate::{
    datastructures::{ClockAccuracy, ClockIdentity, ClockQuality, Profile},
    io_pin::PinDescriptor,
    phy_corr::PhyCorrectionType,
    rs422::Rs422Config,
    servo::{ServoConfig, SlaveConfig},
    virtual_port::VirtualPortConfig,
    DEFAULT_INTERNAL_MODE_SYNC_RATE, IO_PIN_UNUSED,
};

/// What the board offers to the core
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct BoardConfig {
    /// Timing pins, indexed by their position
    #[serde(default, rename = "pin")]
    pub pins: Vec<PinDescriptor>,
    /// Number of switch ports, numbered from 1
    #[serde(default = "default_port_count")]
    pub port_count: u16,
}

fn default_port_count() -> u16 {
    8
}

impl Default for BoardConfig {
    fn default() -> Self {
        Self {
            pins: Vec::new(),
            port_count: default_port_count(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DelayMechanism {
    #[default]
    E2E,
    P2P,
}

/// Message rates used when the instance runs between internal ports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct InternalModeConfig {
    /// log2 of the sync interval
    #[serde(default = "default_sync_rate")]
    pub sync_rate: i8,
    #[serde(default)]
    pub delay_mechanism: DelayMechanism,
}

fn default_sync_rate() -> i8 {
    DEFAULT_INTERNAL_MODE_SYNC_RATE
}

impl Default for InternalModeConfig {
    fn default() -> Self {
        Self {
            sync_rate: default_sync_rate(),
            delay_mechanism: DelayMechanism::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PortConfig {
    pub port: u16,
    #[serde(default)]
    pub phy_correction: PhyCorrectionType,
    #[serde(default)]
    pub wireless: bool,
    /// Priority this port gives the masters it hears
    #[serde(default = "default_priority")]
    pub local_priority: u8,
}

/// Virtual port of an instance and the pin it is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct VirtualPortSetup {
    #[serde(default = "default_io_pin")]
    pub io_pin: u8,
    #[serde(default)]
    pub enable: bool,
    #[serde(default)]
    pub config: VirtualPortConfig,
}

impl Default for VirtualPortSetup {
    fn default() -> Self {
        Self {
            io_pin: IO_PIN_UNUSED,
            enable: false,
            config: VirtualPortConfig::default(),
        }
    }
}

fn default_io_pin() -> u8 {
    IO_PIN_UNUSED
}

fn default_priority() -> u8 {
    128
}

/// Default data set and tuning of one clock instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct InstanceConfig {
    /// Index of the instance, `0..MAX_PTP_INSTANCES`
    pub index: usize,
    pub clock_identity: ClockIdentity,
    #[serde(default)]
    pub profile: Profile,
    /// Taken from the profile when absent
    #[serde(default)]
    pub domain_number: Option<u8>,
    /// Taken from the profile when absent
    #[serde(default)]
    pub priority1: Option<u8>,
    #[serde(default = "default_priority")]
    pub priority2: u8,
    #[serde(default = "default_priority")]
    pub local_priority: u8,
    #[serde(default = "default_clock_class")]
    pub clock_class: u8,
    #[serde(default)]
    pub clock_accuracy: ClockAccuracy,
    #[serde(default = "default_clock_variance")]
    pub clock_variance: u16,
    #[serde(default = "default_log_announce_interval")]
    pub log_announce_interval: i8,
    #[serde(default)]
    pub internal_mode: InternalModeConfig,
    /// Taken from the profile when absent
    #[serde(default)]
    pub servo: Option<ServoConfig>,
    #[serde(default)]
    pub slave: SlaveConfig,
    #[serde(default, rename = "port")]
    pub ports: Vec<PortConfig>,
    #[serde(default)]
    pub virtual_port: Option<VirtualPortSetup>,
}

fn default_clock_class() -> u8 {
    ClockQuality::default().clock_class
}

fn default_clock_variance() -> u16 {
    ClockQuality::default().offset_scaled_log_variance
}

fn default_log_announce_interval() -> i8 {
    1
}

impl InstanceConfig {
    pub fn new(index: usize, clock_identity: ClockIdentity, profile: Profile) -> Self {
        Self {
            index,
            clock_identity,
            profile,
            domain_number: None,
            priority1: None,
            priority2: default_priority(),
            local_priority: default_priority(),
            clock_class: default_clock_class(),
            clock_accuracy: ClockAccuracy::default(),
            clock_variance: default_clock_variance(),
            log_announce_interval: default_log_announce_interval(),
            internal_mode: InternalModeConfig::default(),
            servo: None,
            slave: SlaveConfig::default(),
            ports: Vec::new(),
            virtual_port: None,
        }
    }

    pub fn domain_number(&self) -> u8 {
        self.domain_number
            .unwrap_or_else(|| self.profile.default_domain())
    }

    pub fn priority1(&self) -> u8 {
        self.priority1
            .unwrap_or_else(|| self.profile.default_priority1())
    }

    pub fn clock_quality(&self) -> ClockQuality {
        ClockQuality {
            clock_class: self.clock_class,
            clock_accuracy: self.clock_accuracy,
            offset_scaled_log_variance: self.clock_variance,
        }
    }

    pub fn servo_config(&self) -> ServoConfig {
        self.servo
            .unwrap_or_else(|| ServoConfig::for_profile(self.profile))
    }
}

/// The RS422 interface and the pin it drives
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Rs422Setup {
    #[serde(default = "default_io_pin")]
    pub io_pin: u8,
    #[serde(default)]
    pub config: Rs422Config,
}

impl Default for Rs422Setup {
    fn default() -> Self {
        Self {
            io_pin: IO_PIN_UNUSED,
            config: Rs422Config::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SystemConfig {
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(default, rename = "instance")]
    pub instances: Vec<InstanceConfig>,
    #[serde(default)]
    pub rs422: Rs422Setup,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn instance_defaults_follow_profile() {
        let config = InstanceConfig::new(0, ClockIdentity([1; 8]), Profile::G8275_1);
        assert_eq!(config.domain_number(), 24);
        assert_eq!(config.priority1(), 128);
        assert_eq!(config.servo_config().ap, 12);
        assert_eq!(config.internal_mode.sync_rate, -3);
        assert_eq!(config.clock_quality(), ClockQuality::default());

        let config = InstanceConfig {
            priority1: Some(7),
            domain_number: Some(3),
            ..config
        };
        assert_eq!(config.domain_number(), 3);
        assert_eq!(config.priority1(), 7);
    }
}
