//! One clock instance: an independent timing domain with its own data set,
//! ports, virtual port and servo.

mod port;

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{debug, error, info, warn};

pub use port::{
    As802PortStatus, PacketMeasurement, PacketTimestamps, Port, PortLinkState, PortState,
    PortStatus,
};

use crate::{
    bmc::{foreign_master::MAX_PATH_TRACE, Bmca, Candidate, ComparisonDataset, SourceId},
    calibration::{CalibrationKind, CalibrationProgress, CalibrationSession},
    clock::LocalClock,
    config::{InstanceConfig, InternalModeConfig, PortConfig},
    datastructures::{
        Attribute, AttributeValue, ClockIdentity, ClockQuality, Overrides, PortIdentity, Profile,
        TimePropertiesDS,
    },
    error::{PtpError, Result},
    servo::{ServoAction, ServoEngine, ServoStatus},
    statistics::{DebugLog, EgressLatency, SlaveCounter, SlaveStatistics},
    time::{Duration, Timestamp},
    virtual_port::{
        VirtualPort, VirtualPortAttributes, VirtualPortDefaults, VirtualPortSample,
        VirtualPortState,
    },
    MAX_PTP_INSTANCES,
};

/// The clock's own data set as it takes part in the best master selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceDataSet {
    pub clock_identity: ClockIdentity,
    pub clock_quality: ClockQuality,
    pub priority1: u8,
    pub priority2: u8,
    pub local_priority: u8,
    pub domain_number: u8,
}

/// 802.1AS view of the whole clock
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct As802ClockStatus {
    pub gm_present: bool,
    pub grandmaster_identity: ClockIdentity,
    pub gm_change_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct VirtualPortStatus {
    pub state: VirtualPortState,
    pub io_pin: Option<u8>,
    pub attributes: VirtualPortAttributes,
    pub samples: u64,
    /// Delay found by the last calibration, in ns
    pub calibrated_delay: Option<i64>,
    pub calibrating: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct InstanceStatus {
    pub index: usize,
    pub profile: Profile,
    pub data_set: InstanceDataSet,
    pub selected_source: Option<SourceId>,
    pub grandmaster_identity: Option<ClockIdentity>,
    pub steps_removed: u16,
    /// Mean path delay to the selected source, in ns
    pub mean_path_delay: i64,
    pub servo: ServoStatus,
    pub ports: Vec<PortStatus>,
    pub virtual_port: VirtualPortStatus,
}

/// The reference currently followed and what it told us
#[derive(Debug, Clone)]
struct Selection {
    candidate: Candidate,
    mean_delay: Duration,
}

pub struct ClockInstance<C> {
    index: usize,
    config: InstanceConfig,
    overrides: Overrides,
    ports: BTreeMap<u16, Port>,
    virtual_port: VirtualPort,
    calibration: Option<CalibrationSession>,
    servo: ServoEngine,
    selection: Option<Selection>,
    time_properties: TimePropertiesDS,
    gm_change_count: u32,
    slave_stats: SlaveStatistics,
    egress_latency: EgressLatency,
    debug_log: DebugLog,
    clock: C,
}

impl<C> std::fmt::Debug for ClockInstance<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClockInstance")
            .field("index", &self.index)
            .field("ports", &self.ports.keys().collect::<Vec<_>>())
            .field("virtual_port", &self.virtual_port.state())
            .field("servo", &self.servo.mode())
            .finish()
    }
}

fn is_data_set_attribute(attribute: Attribute) -> bool {
    !matches!(
        attribute,
        Attribute::ClockIdentity | Attribute::StepsRemoved
    )
}

impl<C: LocalClock> ClockInstance<C> {
    /// Ports listed in the configuration are not enabled here, that needs
    /// the system wide port bookkeeping
    pub fn new(config: InstanceConfig, clock: C) -> Result<Self> {
        if config.index >= MAX_PTP_INSTANCES {
            return Err(PtpError::InvalidInstance(config.index));
        }
        let servo_config = config.servo_config();
        servo_config.validate()?;
        config.slave.validate()?;

        let servo = ServoEngine::new(config.profile, servo_config, config.slave);
        let virtual_port = VirtualPort::new(
            config
                .virtual_port
                .map(|setup| setup.config)
                .unwrap_or_default(),
        );

        info!(
            instance = config.index,
            identity = %config.clock_identity,
            profile = ?config.profile,
            "clock instance created"
        );

        Ok(Self {
            index: config.index,
            config,
            overrides: Overrides::default(),
            ports: BTreeMap::new(),
            virtual_port,
            calibration: None,
            servo,
            selection: None,
            time_properties: TimePropertiesDS::default(),
            gm_change_count: 0,
            slave_stats: SlaveStatistics::default(),
            egress_latency: EgressLatency::default(),
            debug_log: DebugLog::default(),
            clock,
        })
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn config(&self) -> &InstanceConfig {
        &self.config
    }

    pub fn profile(&self) -> Profile {
        self.config.profile
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    pub fn internal_mode(&self) -> InternalModeConfig {
        self.config.internal_mode
    }

    pub fn set_internal_mode(&mut self, internal_mode: InternalModeConfig) {
        self.config.internal_mode = internal_mode;
    }

    /// The configured data set, before overrides
    pub fn default_ds(&self) -> InstanceDataSet {
        InstanceDataSet {
            clock_identity: self.config.clock_identity,
            clock_quality: self.config.clock_quality(),
            priority1: self.config.priority1(),
            priority2: self.config.priority2,
            local_priority: self.config.local_priority,
            domain_number: self.config.domain_number(),
        }
    }

    /// The data set in effect, overrides applied
    pub fn effective_ds(&self) -> InstanceDataSet {
        let ds = self.default_ds();
        let o = &self.overrides;
        InstanceDataSet {
            clock_quality: ClockQuality {
                clock_class: o.clock_class.unwrap_or(ds.clock_quality.clock_class),
                clock_accuracy: o.clock_accuracy.unwrap_or(ds.clock_quality.clock_accuracy),
                offset_scaled_log_variance: o
                    .clock_variance
                    .unwrap_or(ds.clock_quality.offset_scaled_log_variance),
            },
            priority1: o.priority1.unwrap_or(ds.priority1),
            priority2: o.priority2.unwrap_or(ds.priority2),
            local_priority: o.local_priority.unwrap_or(ds.local_priority),
            ..ds
        }
    }

    fn ds_value(ds: &InstanceDataSet, attribute: Attribute) -> Result<AttributeValue> {
        Ok(match attribute {
            Attribute::ClockClass => AttributeValue::ClockClass(ds.clock_quality.clock_class),
            Attribute::ClockAccuracy => {
                AttributeValue::ClockAccuracy(ds.clock_quality.clock_accuracy)
            }
            Attribute::ClockVariance => {
                AttributeValue::ClockVariance(ds.clock_quality.offset_scaled_log_variance)
            }
            Attribute::LocalPriority => AttributeValue::LocalPriority(ds.local_priority),
            Attribute::Priority1 => AttributeValue::Priority1(ds.priority1),
            Attribute::Priority2 => AttributeValue::Priority2(ds.priority2),
            Attribute::ClockIdentity | Attribute::StepsRemoved => {
                return Err(PtpError::InvalidParameter(
                    "attribute is not part of the default data set",
                ))
            }
        })
    }

    pub fn ds_default(&self, attribute: Attribute) -> Result<AttributeValue> {
        Self::ds_value(&self.default_ds(), attribute)
    }

    pub fn ds_get(&self, attribute: Attribute) -> Result<AttributeValue> {
        Self::ds_value(&self.effective_ds(), attribute)
    }

    pub fn ds_set(&mut self, value: AttributeValue) -> Result<()> {
        if !is_data_set_attribute(value.attribute()) {
            return Err(PtpError::InvalidParameter(
                "attribute is not part of the default data set",
            ));
        }
        debug!(instance = self.index, ?value, "data set override set");
        self.overrides.set(value);
        Ok(())
    }

    pub fn ds_clear(&mut self, attribute: Attribute) -> Result<()> {
        if !is_data_set_attribute(attribute) {
            return Err(PtpError::InvalidParameter(
                "attribute is not part of the default data set",
            ));
        }
        self.overrides.clear(attribute);
        Ok(())
    }

    fn own_dataset(&self) -> ComparisonDataset {
        let ds = self.effective_ds();
        ComparisonDataset::from_own_data(
            ds.clock_identity,
            ds.priority1,
            ds.clock_quality,
            ds.priority2,
            ds.local_priority,
        )
    }

    pub fn enable_port(&mut self, port: &PortConfig) -> Result<()> {
        if self.ports.contains_key(&port.port) {
            return Err(PtpError::PortAlreadyEnabled(port.port));
        }

        let identity = PortIdentity {
            clock_identity: self.config.clock_identity,
            port_number: port.port,
        };
        let mut new_port = Port::new(
            identity,
            self.config.log_announce_interval,
            port.local_priority,
        );
        new_port.phy_delay_corr_upd(port.phy_correction);
        new_port.wireless_mut().set_enabled(port.wireless);
        self.ports.insert(port.port, new_port);

        info!(instance = self.index, port = port.port, "port enabled");
        Ok(())
    }

    pub fn disable_port(&mut self, number: u16) -> Result<()> {
        self.ports
            .remove(&number)
            .ok_or(PtpError::PortNotEnabled(number))?;
        info!(instance = self.index, port = number, "port disabled");
        Ok(())
    }

    pub fn has_port(&self, number: u16) -> bool {
        self.ports.contains_key(&number)
    }

    pub fn port(&self, number: u16) -> Result<&Port> {
        self.ports
            .get(&number)
            .ok_or(PtpError::PortNotEnabled(number))
    }

    pub fn port_mut(&mut self, number: u16) -> Result<&mut Port> {
        self.ports
            .get_mut(&number)
            .ok_or(PtpError::PortNotEnabled(number))
    }

    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    pub fn virtual_port(&self) -> &VirtualPort {
        &self.virtual_port
    }

    pub fn virtual_port_mut(&mut self) -> &mut VirtualPort {
        &mut self.virtual_port
    }

    /// Values the virtual port falls back to for attributes that are not
    /// overridden
    pub fn virtual_port_defaults(&self) -> VirtualPortDefaults {
        let ds = self.effective_ds();
        VirtualPortDefaults {
            clock_identity: ds.clock_identity,
            quality: ds.clock_quality,
            priority1: ds.priority1,
            priority2: ds.priority2,
            local_priority: ds.local_priority,
        }
    }

    fn virtual_port_candidate(&self) -> Option<Candidate> {
        if !self.virtual_port.is_candidate() {
            return None;
        }
        let defaults = self.virtual_port_defaults();
        let attributes = self.virtual_port.attributes(&defaults);
        let receiver = PortIdentity {
            clock_identity: self.config.clock_identity,
            port_number: 0,
        };
        Some(Candidate::new(
            SourceId::VirtualPort,
            self.virtual_port.announce(&defaults),
            receiver,
            attributes.local_priority,
        ))
    }

    /// Elect the best source among the eligible ports and the virtual port
    /// and update every port's state. The servo follows the result.
    pub fn run_bmca(&mut self) -> Option<SourceId> {
        let own = self.own_dataset();
        let erbests: Vec<(u16, Option<Candidate>)> = self
            .ports
            .values()
            .map(|port| (port.number(), port.erbest()))
            .collect();

        let ebest = Bmca::find_best(
            erbests
                .iter()
                .filter_map(|(_, erbest)| erbest.clone())
                .chain(self.virtual_port_candidate()),
        );

        for (number, erbest) in &erbests {
            if let Some(port) = self.ports.get_mut(number) {
                let recommended = Bmca::calculate_recommended_state(
                    &own,
                    ebest.as_ref(),
                    erbest.as_ref(),
                    port.state() == PortState::Listening,
                );
                port.apply_recommended_state(recommended);
            }
        }

        let best = ebest.filter(|candidate| !own.compare(&candidate.dataset).is_better());
        self.select(best);

        let source = self.selected_source();
        let action = self.servo.set_active_ref(source);
        self.apply(action);
        source
    }

    fn select(&mut self, best: Option<Candidate>) {
        let previous = self.selection.as_ref().map(|s| s.candidate.source);
        let previous_gm = self
            .selection
            .as_ref()
            .map(|s| s.candidate.announce.grandmaster_identity);

        match best {
            Some(candidate) => {
                if previous != Some(candidate.source) {
                    info!(
                        instance = self.index,
                        source = ?candidate.source,
                        grandmaster = %candidate.announce.grandmaster_identity,
                        class = candidate.announce.grandmaster_clock_quality.clock_class,
                        "best source changed"
                    );
                }
                if previous_gm != Some(candidate.announce.grandmaster_identity) {
                    self.gm_change_count = self.gm_change_count.wrapping_add(1);
                }
                self.time_properties = candidate.announce.time_properties;
                let mean_delay = self
                    .selection
                    .as_ref()
                    .filter(|s| s.candidate.source == candidate.source)
                    .map(|s| s.mean_delay)
                    .unwrap_or(Duration::ZERO);
                self.selection = Some(Selection {
                    candidate,
                    mean_delay,
                });
            }
            None => {
                if previous.is_some() {
                    info!(instance = self.index, "no eligible source, acting as grandmaster");
                    self.gm_change_count = self.gm_change_count.wrapping_add(1);
                }
                self.selection = None;
                self.time_properties = TimePropertiesDS::default();
            }
        }
    }

    pub fn selected_source(&self) -> Option<SourceId> {
        self.selection.as_ref().map(|s| s.candidate.source)
    }

    pub fn time_properties(&self) -> &TimePropertiesDS {
        &self.time_properties
    }

    /// Clock identities from the grandmaster down to this clock
    pub fn path_trace(&self) -> Vec<ClockIdentity> {
        let mut trace = self
            .selection
            .as_ref()
            .map(|s| s.candidate.announce.path_trace.clone())
            .unwrap_or_default();
        if trace.len() < MAX_PATH_TRACE {
            trace.push(self.config.clock_identity);
        }
        trace
    }

    pub fn as_802_1as_status(&self) -> As802ClockStatus {
        As802ClockStatus {
            gm_present: self.selection.is_some(),
            grandmaster_identity: self
                .selection
                .as_ref()
                .map(|s| s.candidate.announce.grandmaster_identity)
                .unwrap_or(self.config.clock_identity),
            gm_change_count: self.gm_change_count,
        }
    }

    pub fn port_802_1as_status(&self, number: u16) -> Result<As802PortStatus> {
        Ok(self
            .port(number)?
            .as_802_1as_status(self.config.profile.is_802_1as()))
    }

    pub fn servo(&self) -> &ServoEngine {
        &self.servo
    }

    pub fn servo_mut(&mut self) -> &mut ServoEngine {
        &mut self.servo
    }

    /// Hand a servo result to the clock unless the debug log took control
    pub fn apply(&mut self, action: ServoAction) {
        if action == ServoAction::None {
            return;
        }
        if !self.debug_log.keeps_control() {
            debug!(instance = self.index, ?action, "clock adjustment suppressed by debug log");
            return;
        }

        let result = match action {
            ServoAction::None => Ok(()),
            ServoAction::Frequency(ppb) => self.clock.set_frequency(ppb),
            ServoAction::Step(offset) => self.clock.step_clock(offset),
        };
        if let Err(e) = result {
            error!(instance = self.index, error = %e, "could not adjust clock");
        }
    }

    fn record_sample(&mut self, offset: Duration, delay: Duration, action: ServoAction) {
        let adjustment = match action {
            ServoAction::Frequency(ppb) => ppb,
            _ => 0.0,
        };
        self.debug_log.record(offset, delay, adjustment);
    }

    /// Timestamps of one completed sync / delay request exchange on `number`
    pub fn port_timestamps(&mut self, number: u16, timestamps: PacketTimestamps) -> Result<()> {
        let measurement = self.port_mut(number)?.measure(timestamps);
        self.slave_stats.count(SlaveCounter::SyncRx);
        self.slave_stats.count(SlaveCounter::DelayRespRx);

        let Some(measurement) = measurement else {
            return Ok(());
        };
        self.slave_stats.master_to_slave(measurement.master_to_slave);
        self.slave_stats.slave_to_master(measurement.slave_to_master);

        if self.selected_source() != Some(SourceId::Port(number)) {
            return Ok(());
        }
        if let Some(selection) = self.selection.as_mut() {
            selection.mean_delay = measurement.mean_delay;
        }

        let action = self.servo.packet_sample(measurement.offset, measurement.at);
        self.record_sample(measurement.offset, measurement.mean_delay, action);
        self.apply(action);
        Ok(())
    }

    /// An edge on the virtual port input
    pub fn virtual_port_timestamp(&mut self, sample: VirtualPortSample) {
        let Some(measurement) = self.virtual_port.timestamp_rx(sample) else {
            debug!(instance = self.index, "virtual port sample ignored");
            return;
        };

        if let Some(session) = self.calibration.as_mut() {
            // our own 1PPS looped back, the phase of the edge is the delay
            let measured = Duration::from_nanos(sample.local.nanos as i64);
            if let CalibrationProgress::Done(delay) = session.add_sample(measured) {
                self.virtual_port.set_calibrated_delay(delay);
                self.calibration = None;
            }
            return;
        }

        if self.selected_source() != Some(SourceId::VirtualPort) {
            return;
        }
        if let Some(selection) = self.selection.as_mut() {
            selection.mean_delay = measurement.delay;
        }

        let action = self.servo.packet_sample(measurement.offset, measurement.at);
        self.record_sample(measurement.offset, measurement.delay, action);
        self.apply(action);
    }

    /// Loss of signal reported for the virtual port input
    pub fn virtual_port_alarm(&mut self) {
        if self.virtual_port.alarm_rx() && self.selected_source() == Some(SourceId::VirtualPort) {
            self.run_bmca();
        }
    }

    /// Start measuring the SMA loopback delay of the virtual port
    pub fn sma_calibrate(&mut self) -> Result<()> {
        if self.calibration.is_some() {
            return Err(PtpError::CalibrationInProgress);
        }
        if self.virtual_port.state() != VirtualPortState::Active {
            return Err(PtpError::InvalidState("virtual port is not running"));
        }
        self.calibration = Some(CalibrationSession::new(CalibrationKind::Loopback));
        info!(instance = self.index, "virtual port calibration started");
        Ok(())
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    pub fn calibrated_delay(&self) -> Option<Duration> {
        self.virtual_port.calibrated_delay()
    }

    /// One control loop tick
    pub fn tick(&mut self) {
        let step = Duration::from_ticks(1);
        for port in self.ports.values_mut() {
            port.step_age(step);
        }

        if self.virtual_port.tick() && self.selected_source() == Some(SourceId::VirtualPort) {
            warn!(instance = self.index, "selected virtual port lost its input");
            self.run_bmca();
        }

        let action = self.servo.tick();
        self.apply(action);
    }

    /// Once per second housekeeping
    pub fn second_elapsed(&mut self) {
        self.debug_log.second_elapsed();
        self.run_bmca();
    }

    pub fn slave_stats(&self) -> &SlaveStatistics {
        &self.slave_stats
    }

    pub fn slave_stats_mut(&mut self) -> &mut SlaveStatistics {
        &mut self.slave_stats
    }

    pub fn egress_latency(&self) -> EgressLatency {
        self.egress_latency
    }

    /// Latency between the scheduled and actual transmission of an event
    /// message
    pub fn observe_egress_latency(&mut self, latency: Duration) {
        self.egress_latency.observe(latency);
    }

    pub fn clear_egress_latency(&mut self) {
        self.egress_latency.clear();
    }

    pub fn debug_log(&self) -> &DebugLog {
        &self.debug_log
    }

    pub fn debug_log_mut(&mut self) -> &mut DebugLog {
        &mut self.debug_log
    }

    /// Offset of the local clock from the followed reference
    pub fn offset_from_master(&self) -> Duration {
        self.servo.last_offset()
    }

    pub fn now(&self) -> Option<Timestamp> {
        self.clock.now().ok()
    }

    pub fn status(&self) -> InstanceStatus {
        let defaults = self.virtual_port_defaults();
        InstanceStatus {
            index: self.index,
            profile: self.config.profile,
            data_set: self.effective_ds(),
            selected_source: self.selected_source(),
            grandmaster_identity: self
                .selection
                .as_ref()
                .map(|s| s.candidate.announce.grandmaster_identity),
            steps_removed: self
                .selection
                .as_ref()
                .map(|s| s.candidate.announce.steps_removed.saturating_add(1))
                .unwrap_or(0),
            mean_path_delay: self
                .selection
                .as_ref()
                .map(|s| s.mean_delay.nanos_rounded())
                .unwrap_or(0),
            servo: self.servo.status(),
            ports: self.ports.values().map(Port::status).collect(),
            virtual_port: VirtualPortStatus {
                state: self.virtual_port.state(),
                io_pin: self.virtual_port.pin().map(|pin| pin.index()),
                attributes: self.virtual_port.attributes(&defaults),
                samples: self.virtual_port.samples_received(),
                calibrated_delay: self
                    .virtual_port
                    .calibrated_delay()
                    .map(|d| d.nanos_rounded()),
                calibrating: self.calibration.is_some(),
            },
        }
    }
}
