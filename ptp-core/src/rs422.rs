//! The RS422 external time interface.
//!
//! In the main roles this board drives a 1PPS output with a time of day
//! message following every edge. In the sub role it receives both and turns
//! every edge, once the message describing it arrived, into a virtual port
//! sample. Calibration wires the main output back into the sub input and
//! measures the round trip.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace, warn};

use crate::{
    calibration::{CalibrationKind, CalibrationProgress, CalibrationSession},
    error::{PtpError, Result},
    io_pin::{PinCapabilities, PinFunction, PinId},
    nmea::{GgaParser, PolytParser, RmcParser, SentenceParser, ZdaParser},
    statistics::OnePpsTodStatistics,
    time::{Duration, Timestamp},
    virtual_port::VirtualPortSample,
    MAX_PTP_INSTANCES, TICKS_PER_SECOND,
};

/// An edge is missed when none arrived for one and a half seconds
const MISSED_ONE_PPS_TICKS: u32 = TICKS_PER_SECOND + TICKS_PER_SECOND / 2;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rs422Mode {
    #[default]
    Disable,
    MainAuto,
    Sub,
    MainMan,
    Calib,
}

impl Rs422Mode {
    pub fn is_main(&self) -> bool {
        matches!(self, Rs422Mode::MainAuto | Rs422Mode::MainMan)
    }

    pub fn pin_function(&self) -> PinFunction {
        match self {
            Rs422Mode::Disable => PinFunction::Disabled,
            Rs422Mode::Sub => PinFunction::Input,
            Rs422Mode::MainAuto | Rs422Mode::MainMan | Rs422Mode::Calib => PinFunction::Output,
        }
    }

    /// Capabilities needed on top of those of the pin function
    pub fn extra_capabilities(&self) -> PinCapabilities {
        match self {
            // the looped back edge comes in on the same interface
            Rs422Mode::Calib => PinCapabilities::TIME_IF_IN,
            _ => PinCapabilities::NONE,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Rs422Protocol {
    #[default]
    SerPolyt,
    SerZda,
    SerGga,
    SerRmc,
    /// Time of day carried in frames on a switch port
    Pim,
}

impl Rs422Protocol {
    pub fn is_serial(&self) -> bool {
        !matches!(self, Rs422Protocol::Pim)
    }

    pub fn parser(&self) -> Option<Box<dyn SentenceParser>> {
        match self {
            Rs422Protocol::SerPolyt => Some(Box::new(PolytParser)),
            Rs422Protocol::SerZda => Some(Box::new(ZdaParser)),
            Rs422Protocol::SerGga => Some(Box::new(GgaParser)),
            Rs422Protocol::SerRmc => Some(Box::new(RmcParser)),
            Rs422Protocol::Pim => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Rs422Config {
    pub mode: Rs422Mode,
    /// One way delay of the link in nanoseconds
    pub delay: u32,
    pub proto: Rs422Protocol,
    pub instance: usize,
    /// Switch port used by PIM
    pub port: u16,
}

/// A received edge with the time it stood for, ready for the virtual port
/// of `instance`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Rs422Sample {
    pub instance: usize,
    pub sample: VirtualPortSample,
}

#[derive(Debug)]
pub struct Rs422Controller {
    pin: Option<PinId>,
    config: Rs422Config,
    parser: Option<Box<dyn SentenceParser>>,
    calibration: Option<CalibrationSession>,
    measured_delay: Option<u32>,
    next_time: Option<Timestamp>,
    pending_edge: Option<Timestamp>,
    ticks_since_edge: u32,
    stats: OnePpsTodStatistics,
}

impl Rs422Controller {
    /// `pin` is the timing pin wired to the RS422 connector, if the board
    /// has one
    pub fn new(pin: Option<PinId>) -> Self {
        Self {
            pin,
            config: Rs422Config::default(),
            parser: None,
            calibration: None,
            measured_delay: None,
            next_time: None,
            pending_edge: None,
            ticks_since_edge: 0,
            stats: OnePpsTodStatistics::default(),
        }
    }

    pub fn pin(&self) -> Option<PinId> {
        self.pin
    }

    pub fn default_conf_get() -> Rs422Config {
        Rs422Config::default()
    }

    pub fn conf_get(&self) -> Rs422Config {
        self.config
    }

    /// Checks that need no knowledge of the pin table or the ports
    pub fn validate(&self, config: &Rs422Config) -> Result<()> {
        if config.instance >= MAX_PTP_INSTANCES {
            return Err(PtpError::InvalidInstance(config.instance));
        }
        if config.mode != Rs422Mode::Disable && self.pin.is_none() {
            return Err(PtpError::Unsupported("board has no rs422 interface"));
        }
        if config.proto == Rs422Protocol::Pim && config.port == 0 {
            return Err(PtpError::InvalidPort(config.port));
        }
        Ok(())
    }

    /// Switch to a validated configuration
    pub fn apply(&mut self, mut config: Rs422Config) {
        let previous = self.config.mode;

        if config.mode == Rs422Mode::Calib {
            if previous != Rs422Mode::Calib {
                self.calibration = Some(CalibrationSession::new(CalibrationKind::RoundTrip));
            }
            config.delay = self.measured_delay.unwrap_or(0);
        } else {
            self.calibration = None;
        }

        if previous != config.mode {
            self.next_time = None;
            self.pending_edge = None;
            self.ticks_since_edge = 0;
        }

        self.parser = config.proto.parser();
        info!(mode = ?config.mode, proto = ?config.proto, delay = config.delay, "rs422 configured");
        self.config = config;
    }

    /// Delay measured by the last calibration; only readable while calibrating
    pub fn calibration_result(&self) -> Result<Option<u32>> {
        if self.config.mode != Rs422Mode::Calib {
            return Err(PtpError::InvalidState("rs422 is not in calibration mode"));
        }
        Ok(self
            .calibration
            .as_ref()
            .and_then(|session| session.result())
            .map(|delay| delay.nanos_rounded().clamp(0, u32::MAX as i64) as u32))
    }

    /// Load the time sent after the next output edge
    pub fn time_set(&mut self, time: Timestamp) -> Result<()> {
        if !self.config.mode.is_main() {
            return Err(PtpError::InvalidState("rs422 is not in a main mode"));
        }
        self.next_time = Some(time);
        Ok(())
    }

    /// Called on every output edge in the main roles, returns the time of day
    /// to send for it
    pub fn output_edge(&mut self, local: Timestamp) -> Option<Timestamp> {
        let time = match self.config.mode {
            Rs422Mode::MainMan => self.next_time.take(),
            Rs422Mode::MainAuto | Rs422Mode::Calib => self
                .next_time
                .take()
                .or(Some(Timestamp::new(local.seconds, 0))),
            Rs422Mode::Disable | Rs422Mode::Sub => return None,
        };

        self.stats.one_pps_cnt = self.stats.one_pps_cnt.saturating_add(1);
        if time.is_some() {
            self.stats.tod_cnt = self.stats.tod_cnt.saturating_add(1);
        }
        time
    }

    /// An edge arrived on the input
    pub fn input_edge(&mut self, local: Timestamp) {
        match self.config.mode {
            Rs422Mode::Sub => {
                self.stats.one_pps_cnt = self.stats.one_pps_cnt.saturating_add(1);
                if self.pending_edge.replace(local).is_some() {
                    debug!("no time of day for previous 1pps edge");
                    self.stats.missed_tod_rx_cnt = self.stats.missed_tod_rx_cnt.saturating_add(1);
                }
                self.ticks_since_edge = 0;
            }
            Rs422Mode::Calib => {
                // the output edge left on the whole second
                let round_trip = Duration::from_nanos(local.nanos as i64);
                if let Some(session) = self.calibration.as_mut() {
                    if let CalibrationProgress::Done(delay) = session.add_sample(round_trip) {
                        let delay = delay.nanos_rounded().clamp(0, u32::MAX as i64) as u32;
                        if self.measured_delay != Some(delay) {
                            info!(delay, "rs422 calibration done");
                        }
                        self.measured_delay = Some(delay);
                        self.config.delay = delay;
                    }
                }
            }
            _ => trace!("ignoring rs422 input edge"),
        }
    }

    /// A serial sentence arrived. `utc_offset` is used when the sentence
    /// does not carry one.
    pub fn sentence_rx(&mut self, sentence: &str, utc_offset: i16) -> Option<Rs422Sample> {
        if self.config.mode != Rs422Mode::Sub {
            return None;
        }
        let parser = self.parser.as_ref()?;
        let time = match parser.parse(sentence) {
            Ok(Some(time)) => time,
            Ok(None) => return None,
            Err(error) => {
                debug!(%error, parser = parser.name(), "dropping rs422 sentence");
                return None;
            }
        };
        if !time.valid {
            trace!("time of day reported invalid");
            return None;
        }

        let edge = self.pending_edge?;
        let reference = time.to_timestamp(utc_offset, edge)?;
        self.tod_rx(reference)
    }

    /// Time of day for the last edge, from a sentence or from PIM
    pub fn tod_rx(&mut self, reference: Timestamp) -> Option<Rs422Sample> {
        if self.config.mode != Rs422Mode::Sub {
            return None;
        }
        let local = self.pending_edge.take()?;
        self.stats.tod_cnt = self.stats.tod_cnt.saturating_add(1);

        Some(Rs422Sample {
            instance: self.config.instance,
            sample: VirtualPortSample {
                local,
                reference: Some(reference),
                delay: Some(Duration::from_nanos(self.config.delay as i64)),
            },
        })
    }

    /// Advance the missing edge detection
    pub fn tick(&mut self) {
        if self.config.mode != Rs422Mode::Sub {
            return;
        }
        self.ticks_since_edge += 1;
        if self.ticks_since_edge >= MISSED_ONE_PPS_TICKS {
            warn!("1pps edge missing on rs422 input");
            self.stats.missed_one_pps_cnt = self.stats.missed_one_pps_cnt.saturating_add(1);
            self.ticks_since_edge -= TICKS_PER_SECOND;
        }
    }

    pub fn statistics(&self) -> OnePpsTodStatistics {
        self.stats
    }

    pub fn clear_statistics(&mut self) {
        self.stats.clear();
    }
}
