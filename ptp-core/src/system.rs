//! The synchronous operation surface of the core.
//!
//! [PtpSystem] owns the clock instances, the timing pin table, the RS422
//! interface and the board wide source selection. Every setter validates
//! before it changes anything, so a returned error means nothing changed.
//! Interrupt style inputs are queued and handled by [PtpSystem::tick].

use std::collections::BTreeMap;

use arrayvec::ArrayString;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::{
    bmc::{AnnounceInfo, SourceId},
    clock::LocalClock,
    config::{
        BoardConfig, InstanceConfig, InternalModeConfig, PortConfig, SystemConfig,
        VirtualPortSetup,
    },
    datastructures::{Attribute, AttributeValue, ClockIdentity, TimePropertiesDS},
    error::{PtpError, Result},
    event::{EventQueue, PtpEvent, MAX_SENTENCE_LEN},
    instance::{
        As802ClockStatus, As802PortStatus, ClockInstance, InstanceStatus, PacketTimestamps,
        PortLinkState,
    },
    io_pin::{IoPin, IoPinManager, PinCapabilities, PinFunction, PinId, PinUsage},
    phy_corr::{CorrectionFields, PhyCorrectionType},
    rs422::{Rs422Config, Rs422Controller, Rs422Mode, Rs422Protocol, Rs422Sample},
    servo::{HybridTransient, ServoConfig, ServoMode, ServoStatus, SlaveConfig},
    source_select::{SourceSelector, SynceSourceKind, SynceSourceSelection},
    statistics::{DebugLogMode, EgressLatency, OnePpsTodStatistics, SlaveStatisticsSnapshot},
    time::{Duration, Timestamp},
    virtual_port::{VirtualPortConfig, VirtualPortMode, VirtualPortSample, VirtualPortState},
    wireless::WirelessDelay,
    IO_PIN_UNUSED, MAX_INSTANCES_PER_PORT, MAX_PTP_INSTANCES, TICKS_PER_SECOND,
};

/// Everything an observer may want to show
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SystemStatus {
    pub instances: Vec<InstanceStatus>,
    pub pins: Vec<IoPin>,
    pub rs422: Rs422Config,
    pub one_pps_tod: OnePpsTodStatistics,
    pub selected_source: SynceSourceSelection,
    pub dropped_events: u64,
}

#[derive(Debug)]
pub struct PtpSystem<C> {
    pins: IoPinManager,
    port_count: u16,
    instances: [Option<ClockInstance<C>>; MAX_PTP_INSTANCES],
    phy_correction: BTreeMap<u16, PhyCorrectionType>,
    rs422: Rs422Controller,
    selector: SourceSelector,
    events: EventQueue,
    ticks: u32,
}

impl<C: LocalClock> PtpSystem<C> {
    /// `rs422_pin` is the pin wired to the RS422 connector, or
    /// [`IO_PIN_UNUSED`] when the board has none
    pub fn new(board: &BoardConfig, rs422_pin: u8) -> Result<Self> {
        let pins = IoPinManager::new(&board.pins)?;
        let rs422_pin = match rs422_pin {
            IO_PIN_UNUSED => None,
            raw => Some(pins.pin_id(raw)?),
        };

        info!(
            pins = pins.pin_count(),
            ports = board.port_count,
            "ptp core started"
        );

        Ok(Self {
            pins,
            port_count: board.port_count,
            instances: std::array::from_fn(|_| None),
            phy_correction: BTreeMap::new(),
            rs422: Rs422Controller::new(rs422_pin),
            selector: SourceSelector::default(),
            events: EventQueue::default(),
            ticks: 0,
        })
    }

    /// Build a complete system from a configuration file, asking
    /// `make_clock` for the clock of every instance
    pub fn from_config(
        config: &SystemConfig,
        mut make_clock: impl FnMut(&InstanceConfig) -> C,
    ) -> Result<Self> {
        let mut system = Self::new(&config.board, config.rs422.io_pin)?;
        for instance in &config.instances {
            system.create_instance(instance.clone(), make_clock(instance))?;
        }
        system.rs422_conf_set(config.rs422.config)?;
        Ok(system)
    }

    fn check_index(index: usize) -> Result<()> {
        if index >= MAX_PTP_INSTANCES {
            return Err(PtpError::InvalidInstance(index));
        }
        Ok(())
    }

    pub fn instance(&self, index: usize) -> Result<&ClockInstance<C>> {
        Self::check_index(index)?;
        self.instances[index]
            .as_ref()
            .ok_or(PtpError::InstanceNotCreated(index))
    }

    pub fn instance_mut(&mut self, index: usize) -> Result<&mut ClockInstance<C>> {
        Self::check_index(index)?;
        self.instances[index]
            .as_mut()
            .ok_or(PtpError::InstanceNotCreated(index))
    }

    pub fn instances(&self) -> impl Iterator<Item = &ClockInstance<C>> {
        self.instances.iter().flatten()
    }

    /// Create an instance with the ports and virtual port its configuration
    /// lists. Fails as a whole when any of them cannot be set up.
    pub fn create_instance(&mut self, config: InstanceConfig, clock: C) -> Result<()> {
        let index = config.index;
        Self::check_index(index)?;
        if self.instances[index].is_some() {
            return Err(PtpError::InstanceExists(index));
        }

        let ports = config.ports.clone();
        let virtual_port = config.virtual_port;
        self.instances[index] = Some(ClockInstance::new(config, clock)?);

        if let Err(e) = self.setup_instance(index, &ports, virtual_port) {
            self.pins.release_instance(index);
            self.instances[index] = None;
            return Err(e);
        }
        info!(instance = index, "clock instance created");
        Ok(())
    }

    fn setup_instance(
        &mut self,
        index: usize,
        ports: &[PortConfig],
        virtual_port: Option<VirtualPortSetup>,
    ) -> Result<()> {
        for port in ports {
            self.port_enable(index, *port)?;
        }
        if let Some(setup) = virtual_port {
            self.set_virtual_port_config(index, setup.config)?;
            if setup.io_pin != IO_PIN_UNUSED {
                self.set_virtual_port_io_pin(index, setup.io_pin, setup.enable)?;
            }
        }
        Ok(())
    }

    pub fn delete_instance(&mut self, index: usize) -> Result<()> {
        self.instance(index)?;
        let rs422 = self.rs422.conf_get();
        if rs422.mode == Rs422Mode::Sub && rs422.instance == index {
            warn!(instance = index, "rs422 input loses its instance, disabling rs422");
            self.rs422_conf_set(Rs422Config {
                mode: Rs422Mode::Disable,
                ..rs422
            })?;
        }
        self.pins.release_instance(index);
        self.instances[index] = None;
        info!(instance = index, "clock instance deleted");
        Ok(())
    }

    fn check_port(&self, port: u16) -> Result<()> {
        if port == 0 || port > self.port_count {
            return Err(PtpError::InvalidPort(port));
        }
        Ok(())
    }

    fn instances_on_port(&self, port: u16) -> usize {
        self.instances().filter(|i| i.has_port(port)).count()
    }

    pub fn port_enable(&mut self, index: usize, mut port: PortConfig) -> Result<()> {
        self.check_port(port.port)?;
        if self.instance(index)?.has_port(port.port) {
            return Err(PtpError::PortAlreadyEnabled(port.port));
        }
        if self.instances_on_port(port.port) >= MAX_INSTANCES_PER_PORT {
            return Err(PtpError::TooManyInstancesOnPort(port.port));
        }
        if let Some(kind) = self.phy_correction.get(&port.port) {
            port.phy_correction = *kind;
        }
        self.instance_mut(index)?.enable_port(&port)
    }

    pub fn port_disable(&mut self, index: usize, port: u16) -> Result<()> {
        self.check_port(port)?;
        self.instance_mut(index)?.disable_port(port)
    }

    /// Link state is a property of the physical port and reaches every
    /// instance using it
    pub fn port_link_state_set(&mut self, port: u16, link: PortLinkState) -> Result<()> {
        self.check_port(port)?;
        for instance in self.instances.iter_mut().flatten() {
            if let Ok(p) = instance.port_mut(port) {
                p.set_link_state(link);
            }
        }
        Ok(())
    }

    pub fn port_link_state_get(&self, index: usize, port: u16) -> Result<PortLinkState> {
        self.check_port(port)?;
        Ok(self.instance(index)?.port(port)?.link_state())
    }

    /// Select the PHY family behind a physical port
    pub fn port_phy_delay_corr_upd(&mut self, port: u16, kind: PhyCorrectionType) -> Result<()> {
        self.check_port(port)?;
        self.phy_correction.insert(port, kind);
        for instance in self.instances.iter_mut().flatten() {
            if let Ok(p) = instance.port_mut(port) {
                p.phy_delay_corr_upd(kind);
            }
        }
        Ok(())
    }

    pub fn delay_req_correction(
        &self,
        index: usize,
        port: u16,
        tx_time: Timestamp,
    ) -> Result<CorrectionFields> {
        Ok(self
            .instance(index)?
            .port(port)?
            .delay_req_correction(tx_time))
    }

    pub fn announce_rx(&mut self, index: usize, port: u16, announce: AnnounceInfo) -> Result<bool> {
        Ok(self
            .instance_mut(index)?
            .port_mut(port)?
            .register_announce(announce))
    }

    pub fn port_timestamps(
        &mut self,
        index: usize,
        port: u16,
        timestamps: PacketTimestamps,
    ) -> Result<()> {
        self.instance_mut(index)?
            .port_timestamps(port, timestamps)
    }

    pub fn ds_get(&self, index: usize, attribute: Attribute) -> Result<AttributeValue> {
        self.instance(index)?.ds_get(attribute)
    }

    pub fn ds_default(&self, index: usize, attribute: Attribute) -> Result<AttributeValue> {
        self.instance(index)?.ds_default(attribute)
    }

    pub fn ds_set(&mut self, index: usize, value: AttributeValue) -> Result<()> {
        self.instance_mut(index)?.ds_set(value)
    }

    pub fn ds_clear(&mut self, index: usize, attribute: Attribute) -> Result<()> {
        self.instance_mut(index)?.ds_clear(attribute)
    }

    pub fn path_trace(&self, index: usize) -> Result<Vec<ClockIdentity>> {
        Ok(self.instance(index)?.path_trace())
    }

    pub fn as_802_1as_status(&self, index: usize) -> Result<As802ClockStatus> {
        Ok(self.instance(index)?.as_802_1as_status())
    }

    pub fn port_802_1as_status(&self, index: usize, port: u16) -> Result<As802PortStatus> {
        self.check_port(port)?;
        self.instance(index)?.port_802_1as_status(port)
    }

    pub fn internal_mode_get(&self, index: usize) -> Result<InternalModeConfig> {
        Ok(self.instance(index)?.internal_mode())
    }

    pub fn internal_mode_set(&mut self, index: usize, config: InternalModeConfig) -> Result<()> {
        self.instance_mut(index)?.set_internal_mode(config);
        Ok(())
    }

    pub fn set_virtual_port_attribute(&mut self, index: usize, value: AttributeValue) -> Result<()> {
        let instance = self.instance_mut(index)?;
        debug!(instance = index, ?value, "virtual port override set");
        instance.virtual_port_mut().overrides_mut().set(value);
        Ok(())
    }

    pub fn clear_virtual_port_attribute(&mut self, index: usize, attribute: Attribute) -> Result<()> {
        self.instance_mut(index)?
            .virtual_port_mut()
            .overrides_mut()
            .clear(attribute);
        Ok(())
    }

    /// Only possible while no pin is bound
    pub fn set_virtual_port_config(&mut self, index: usize, config: VirtualPortConfig) -> Result<()> {
        if config.delay > 1_000_000_000 {
            return Err(PtpError::InvalidParameter("virtual port delay above one second"));
        }
        self.instance_mut(index)?
            .virtual_port_mut()
            .set_config(config)
    }

    /// Bind the virtual port to `pin` and enable or disable it.
    /// [`IO_PIN_UNUSED`] unbinds the port and gives its pin back.
    pub fn set_virtual_port_io_pin(&mut self, index: usize, pin: u8, enable: bool) -> Result<()> {
        let function = self.instance(index)?.virtual_port().pin_function();
        let bound = self.instance(index)?.virtual_port().pin();
        if self.fed_by_rs422(bound)? {
            return Err(PtpError::InvalidState("virtual port is fed by rs422"));
        }

        if pin == IO_PIN_UNUSED {
            if let Some(old) = bound {
                self.pins.release(old, PinUsage::Main)?;
            }
            self.instance_mut(index)?.virtual_port_mut().unbind();
            info!(instance = index, "virtual port unbound");
            return Ok(());
        }

        let pin = self.pins.pin_id(pin)?;
        self.pins
            .check_assign(pin, PinUsage::Main, function, Some(index))?;

        if let Some(old) = bound.filter(|old| *old != pin) {
            self.pins.release(old, PinUsage::Main)?;
        }
        self.pins
            .assign(pin, PinUsage::Main, function, Some(index))?;

        let vp = self.instance_mut(index)?.virtual_port_mut();
        vp.bind(pin);
        vp.enable(enable)
    }

    pub fn set_virtual_port_time_property(
        &mut self,
        index: usize,
        properties: TimePropertiesDS,
    ) -> Result<()> {
        self.instance_mut(index)?
            .virtual_port_mut()
            .set_time_properties(properties)
    }

    pub fn get_virtual_port_time_property(&self, index: usize) -> Result<TimePropertiesDS> {
        Ok(*self.instance(index)?.virtual_port().time_properties())
    }

    pub fn virtual_port_alarm_set(&mut self, index: usize, enable: bool) -> Result<()> {
        self.instance_mut(index)?
            .virtual_port_mut()
            .set_alarm(enable);
        Ok(())
    }

    /// Interrupt entry: an edge on the virtual port input
    pub fn virtual_port_timestamp_rx(
        &mut self,
        index: usize,
        sample: VirtualPortSample,
    ) -> Result<()> {
        Self::check_index(index)?;
        self.events.push(PtpEvent::VirtualPortTimestamp {
            instance: index,
            sample,
        })
    }

    /// Interrupt entry: loss of signal on the virtual port input
    pub fn virtual_port_alarm_rx(&mut self, index: usize) -> Result<()> {
        Self::check_index(index)?;
        self.events
            .push(PtpEvent::VirtualPortAlarm { instance: index })
    }

    pub fn sma_calibrate_virtual_port(&mut self, index: usize) -> Result<()> {
        self.instance_mut(index)?.sma_calibrate()
    }

    pub fn calibrated_delay_get(&self, index: usize) -> Result<Option<Duration>> {
        Ok(self.instance(index)?.calibrated_delay())
    }

    pub fn io_pins(&self) -> impl Iterator<Item = &IoPin> {
        self.pins.pins()
    }

    pub fn io_pin_get(&self, pin: u8) -> Result<IoPin> {
        let pin = self.pins.pin_id(pin)?;
        self.pins.get(pin).copied()
    }

    /// Export a pin as a generic input or output
    pub fn io_pin_assign(&mut self, pin: u8, function: PinFunction) -> Result<()> {
        let pin = self.pins.pin_id(pin)?;
        self.pins.assign(pin, PinUsage::IoPin, function, None)
    }

    pub fn io_pin_release(&mut self, pin: u8) -> Result<()> {
        let pin = self.pins.pin_id(pin)?;
        self.pins.release(pin, PinUsage::IoPin)
    }

    pub fn rs422_default_conf_get(&self) -> Rs422Config {
        Rs422Controller::default_conf_get()
    }

    pub fn rs422_conf_get(&self) -> Rs422Config {
        self.rs422.conf_get()
    }

    /// Apply a new RS422 configuration, moving the pin to the RS422 feature
    /// or giving it back. In SUB mode the virtual port of the target instance
    /// is bound to the RS422 pin and enabled.
    pub fn rs422_conf_set(&mut self, config: Rs422Config) -> Result<()> {
        self.rs422.validate(&config)?;
        if config.proto == Rs422Protocol::Pim && config.mode != Rs422Mode::Disable {
            self.check_port(config.port)?;
        }
        let Some(pin) = self.rs422.pin() else {
            self.rs422.apply(config);
            return Ok(());
        };

        // the connector belongs to the board, not to the instance it feeds
        let function = config.mode.pin_function();
        if config.mode != Rs422Mode::Disable {
            self.pins
                .check_assign(pin, PinUsage::Rs422, function, None)?;
            let extra = config.mode.extra_capabilities();
            if extra != PinCapabilities::NONE
                && !self.pins.get(pin)?.capabilities.intersects(extra)
            {
                return Err(PtpError::PinCapability {
                    pin: pin.index(),
                    usage: PinUsage::Rs422,
                });
            }
        }
        if config.mode == Rs422Mode::Sub {
            let vp = self.instance(config.instance)?.virtual_port();
            if vp.pin().is_some_and(|bound| bound != pin) {
                return Err(PtpError::InvalidState("virtual port is bound to another io pin"));
            }
        }

        let previous = self.rs422.conf_get();
        if previous.mode == Rs422Mode::Sub
            && (config.mode != Rs422Mode::Sub || config.instance != previous.instance)
        {
            self.unfeed_virtual_port(previous.instance, pin);
        }

        if config.mode == Rs422Mode::Disable {
            if self.pins.get(pin)?.owner == PinUsage::Rs422 {
                self.pins.release(pin, PinUsage::Rs422)?;
            }
        } else {
            self.pins.assign(pin, PinUsage::Rs422, function, None)?;
        }
        if config.mode == Rs422Mode::Sub {
            self.feed_virtual_port(&config, pin)?;
        }

        self.rs422.apply(config);
        Ok(())
    }

    /// Whether a virtual port bound to `bound` takes its input from RS422
    fn fed_by_rs422(&self, bound: Option<PinId>) -> Result<bool> {
        match bound {
            Some(pin) if Some(pin) == self.rs422.pin() => {
                Ok(self.pins.get(pin)?.owner == PinUsage::Rs422)
            }
            _ => Ok(false),
        }
    }

    fn feed_virtual_port(&mut self, config: &Rs422Config, pin: PinId) -> Result<()> {
        let index = config.instance;
        let vp = self.instance_mut(index)?.virtual_port_mut();
        if vp.state() == VirtualPortState::Unbound {
            let current = *vp.config();
            vp.set_config(VirtualPortConfig {
                mode: VirtualPortMode::Sub,
                proto: config.proto,
                ..current
            })?;
        }
        vp.bind(pin);
        vp.enable(true)?;
        info!(instance = index, "virtual port fed by rs422");
        Ok(())
    }

    fn unfeed_virtual_port(&mut self, index: usize, pin: PinId) {
        if let Ok(instance) = self.instance_mut(index) {
            let vp = instance.virtual_port_mut();
            if vp.pin() == Some(pin) {
                vp.unbind();
                info!(instance = index, "virtual port no longer fed by rs422");
            }
        }
    }

    pub fn rs422_time_set(&mut self, time: Timestamp) -> Result<()> {
        self.rs422.time_set(time)
    }

    /// The delay measured in calibration mode
    pub fn rs422_calibrated_delay(&self) -> Result<Option<u32>> {
        self.rs422.calibration_result()
    }

    /// The RS422 output produced an edge; returns the time of day to send
    /// after it
    pub fn rs422_output_edge(&mut self, local: Timestamp) -> Option<Timestamp> {
        self.rs422.output_edge(local)
    }

    /// Interrupt entry: an edge on the RS422 input
    pub fn rs422_input_edge(&mut self, local: Timestamp) -> Result<()> {
        self.events.push(PtpEvent::Rs422InputEdge { local })
    }

    /// A serial sentence from the RS422 receiver
    pub fn rs422_sentence_rx(&mut self, sentence: &str) -> Result<()> {
        let sentence = ArrayString::<MAX_SENTENCE_LEN>::from(sentence.trim_end())
            .map_err(|_| PtpError::InvalidParameter("sentence too long"))?;
        self.events.push(PtpEvent::Rs422Sentence { sentence })
    }

    /// Time of day received over PIM
    pub fn pim_time_rx(&mut self, reference: Timestamp) -> Result<()> {
        self.events.push(PtpEvent::PimTimeOfDay { reference })
    }

    pub fn one_pps_tod_statistics(&self) -> OnePpsTodStatistics {
        self.rs422.statistics()
    }

    pub fn one_pps_tod_statistics_clear(&mut self) {
        self.rs422.clear_statistics();
    }

    pub fn wireless_mode_set(&mut self, index: usize, port: u16, enable: bool) -> Result<()> {
        self.check_port(port)?;
        self.instance_mut(index)?
            .port_mut(port)?
            .wireless_mut()
            .set_enabled(enable);
        Ok(())
    }

    pub fn wireless_mode_get(&self, index: usize, port: u16) -> Result<bool> {
        self.check_port(port)?;
        Ok(self.instance(index)?.port(port)?.wireless().is_enabled())
    }

    pub fn wireless_pre_notif(&mut self, index: usize, port: u16) -> Result<()> {
        self.check_port(port)?;
        self.instance_mut(index)?
            .port_mut(port)?
            .wireless_mut()
            .pre_notif();
        Ok(())
    }

    pub fn wireless_delay_set(&mut self, index: usize, port: u16, delay: WirelessDelay) -> Result<()> {
        self.check_port(port)?;
        if delay.base_delay < Duration::ZERO || delay.incr_delay < Duration::ZERO {
            return Err(PtpError::InvalidParameter("wireless delays cannot be negative"));
        }
        self.instance_mut(index)?
            .port_mut(port)?
            .wireless_mut()
            .delay_set(delay);
        Ok(())
    }

    pub fn wireless_delay_get(&self, index: usize, port: u16) -> Result<WirelessDelay> {
        self.check_port(port)?;
        Ok(self.instance(index)?.port(port)?.wireless().delay_get())
    }

    pub fn servo_config_get(&self, index: usize) -> Result<ServoConfig> {
        Ok(*self.instance(index)?.servo().servo_config())
    }

    pub fn servo_config_default(&self, index: usize) -> Result<ServoConfig> {
        Ok(ServoConfig::for_profile(self.instance(index)?.profile()))
    }

    pub fn servo_config_set(&mut self, index: usize, config: ServoConfig) -> Result<()> {
        self.instance_mut(index)?
            .servo_mut()
            .set_servo_config(config)
    }

    pub fn slave_config_get(&self, index: usize) -> Result<SlaveConfig> {
        Ok(*self.instance(index)?.servo().slave_config())
    }

    pub fn slave_config_set(&mut self, index: usize, config: SlaveConfig) -> Result<()> {
        self.instance_mut(index)?
            .servo_mut()
            .set_slave_config(config)
    }

    pub fn servo_mode(&self, index: usize) -> Result<ServoMode> {
        Ok(self.instance(index)?.servo().mode())
    }

    pub fn servo_status(&self, index: usize) -> Result<ServoStatus> {
        Ok(self.instance(index)?.servo().status())
    }

    pub fn servo_get_holdover_status(&self, index: usize) -> Result<bool> {
        Ok(self.instance(index)?.servo().holdover_status())
    }

    pub fn force_holdover_set(&mut self, index: usize, force: bool) -> Result<()> {
        let instance = self.instance_mut(index)?;
        let action = instance.servo_mut().force_holdover_set(force);
        instance.apply(action);
        Ok(())
    }

    pub fn force_holdover_get(&self, index: usize) -> Result<bool> {
        Ok(self.instance(index)?.servo().force_holdover_get())
    }

    pub fn switch_to_packet_mode(&mut self, index: usize) -> Result<()> {
        self.instance_mut(index)?.servo_mut().switch_to_packet_mode()
    }

    pub fn switch_to_hybrid_mode(&mut self, index: usize) -> Result<()> {
        self.instance_mut(index)?.servo_mut().switch_to_hybrid_mode()
    }

    /// Returns whether the transient was honoured
    pub fn set_hybrid_transient(&mut self, index: usize, transient: HybridTransient) -> Result<bool> {
        Ok(self
            .instance_mut(index)?
            .servo_mut()
            .set_hybrid_transient(transient))
    }

    /// Point the servo at a packet reference directly, the next source
    /// selection may move it again
    pub fn set_active_ref(&mut self, index: usize, source: Option<SourceId>) -> Result<()> {
        let instance = self.instance_mut(index)?;
        match source {
            Some(SourceId::Port(port)) if !instance.has_port(port) => {
                return Err(PtpError::PortNotEnabled(port))
            }
            _ => {}
        }
        let action = instance.servo_mut().set_active_ref(source);
        instance.apply(action);
        Ok(())
    }

    pub fn set_active_electrical_ref(&mut self, index: usize, input: Option<u32>) -> Result<()> {
        let instance = self.instance_mut(index)?;
        let action = instance.servo_mut().set_active_electrical_ref(input)?;
        instance.apply(action);
        Ok(())
    }

    /// Reset all servo state of an instance; its servo is left in mode NONE
    pub fn servo_clear(&mut self, index: usize) -> Result<()> {
        self.instance_mut(index)?.servo_mut().clear();
        Ok(())
    }

    /// Choose between the electrical and the packet reference; an
    /// electrical choice reaches the servo of every instance
    pub fn set_selected_src(&mut self, selection: SynceSourceSelection) -> Result<()> {
        Self::check_index(match selection.kind {
            SynceSourceKind::Packet => selection.reference as usize,
            _ => 0,
        })?;
        self.selector.set(selection)?;

        let electrical = selection.electrical();
        for instance in self.instances.iter_mut().flatten() {
            let action = instance.servo_mut().set_active_electrical_ref(electrical)?;
            instance.apply(action);
        }
        Ok(())
    }

    pub fn get_selected_src(&self) -> SynceSourceSelection {
        self.selector.get()
    }

    pub fn slave_statistics_enable(&mut self, index: usize, enable: bool) -> Result<()> {
        self.instance_mut(index)?.slave_stats_mut().enable(enable);
        Ok(())
    }

    pub fn slave_statistics_clear(&mut self, index: usize) -> Result<()> {
        self.instance_mut(index)?.slave_stats_mut().clear();
        Ok(())
    }

    pub fn slave_statistics_get(&self, index: usize) -> Result<SlaveStatisticsSnapshot> {
        Ok(self.instance(index)?.slave_stats().snapshot())
    }

    pub fn egress_latency_observe(&mut self, index: usize, latency: Duration) -> Result<()> {
        self.instance_mut(index)?.observe_egress_latency(latency);
        Ok(())
    }

    pub fn egress_latency_get(&self, index: usize) -> Result<EgressLatency> {
        Ok(self.instance(index)?.egress_latency())
    }

    pub fn egress_latency_clear(&mut self, index: usize) -> Result<()> {
        self.instance_mut(index)?.clear_egress_latency();
        Ok(())
    }

    pub fn debug_mode_set(&mut self, index: usize, mode: DebugLogMode) -> Result<()> {
        self.instance_mut(index)?.debug_log_mut().set_mode(mode)
    }

    pub fn debug_mode_get(&self, index: usize) -> Result<DebugLogMode> {
        Ok(self.instance(index)?.debug_log().mode())
    }

    pub fn log_delete(&mut self, index: usize) -> Result<()> {
        self.instance_mut(index)?.debug_log_mut().delete();
        Ok(())
    }

    fn handle_event(&mut self, event: PtpEvent) {
        match event {
            PtpEvent::VirtualPortTimestamp { instance, sample } => {
                match self.instance_mut(instance) {
                    Ok(instance) => instance.virtual_port_timestamp(sample),
                    Err(e) => debug!(instance, error = %e, "dropping virtual port sample"),
                }
            }
            PtpEvent::VirtualPortAlarm { instance } => match self.instance_mut(instance) {
                Ok(instance) => instance.virtual_port_alarm(),
                Err(e) => debug!(instance, error = %e, "dropping virtual port alarm"),
            },
            PtpEvent::Rs422InputEdge { local } => self.rs422.input_edge(local),
            PtpEvent::Rs422OutputEdge { local } => {
                self.rs422.output_edge(local);
            }
            PtpEvent::Rs422Sentence { sentence } => {
                let target = self.rs422.conf_get().instance;
                let utc_offset = self
                    .instance(target)
                    .map(|i| i.virtual_port().time_properties().current_utc_offset)
                    .unwrap_or_else(|_| TimePropertiesDS::default().current_utc_offset);
                if let Some(sample) = self.rs422.sentence_rx(&sentence, utc_offset) {
                    self.rs422_sample(sample);
                }
            }
            PtpEvent::PimTimeOfDay { reference } => {
                if let Some(sample) = self.rs422.tod_rx(reference) {
                    self.rs422_sample(sample);
                }
            }
        }
    }

    fn rs422_sample(&mut self, sample: Rs422Sample) {
        match self.instance_mut(sample.instance) {
            Ok(instance) => instance.virtual_port_timestamp(sample.sample),
            Err(_) => warn!(
                instance = sample.instance,
                "rs422 sample for an instance that does not exist"
            ),
        }
    }

    /// One control loop tick, [`TICKS_PER_SECOND`] times a second
    pub fn tick(&mut self) {
        let events: Vec<PtpEvent> = self.events.drain().collect();
        for event in events {
            self.handle_event(event);
        }

        self.rs422.tick();
        for instance in self.instances.iter_mut().flatten() {
            instance.tick();
        }

        self.ticks += 1;
        if self.ticks >= TICKS_PER_SECOND {
            self.ticks = 0;
            for instance in self.instances.iter_mut().flatten() {
                instance.second_elapsed();
            }
        }
    }

    /// Debug log lines waiting to be written, with a flag asking for the
    /// log file to be removed first
    pub fn take_debug_log(&mut self, index: usize) -> Result<(bool, Vec<String>)> {
        let log = self.instance_mut(index)?.debug_log_mut();
        Ok((log.take_delete_request(), log.take_lines()))
    }

    pub fn status(&self) -> SystemStatus {
        SystemStatus {
            instances: self.instances().map(ClockInstance::status).collect(),
            pins: self.pins.pins().copied().collect(),
            rs422: self.rs422.conf_get(),
            one_pps_tod: self.rs422.statistics(),
            selected_source: self.selector.get(),
            dropped_events: self.events.dropped(),
        }
    }

    pub fn rs422_pin(&self) -> Option<PinId> {
        self.rs422.pin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        clock::TestClock,
        datastructures::Profile,
        io_pin::{PinCapabilities, PinDescriptor},
        VIRTUAL_PORT_ALARM_TIME,
    };

    fn board() -> BoardConfig {
        let all = PinCapabilities::from_bits(0x1f);
        BoardConfig {
            pins: vec![
                PinDescriptor {
                    capabilities: PinCapabilities::PIN_OUT,
                    interrupt_source: 0,
                },
                PinDescriptor {
                    capabilities: PinCapabilities::TIME_IF_OUT,
                    interrupt_source: 1,
                },
                PinDescriptor {
                    capabilities: all,
                    interrupt_source: 2,
                },
                PinDescriptor {
                    capabilities: all,
                    interrupt_source: 3,
                },
            ],
            port_count: 4,
        }
    }

    fn system() -> PtpSystem<TestClock> {
        let mut system = PtpSystem::new(&board(), 3).unwrap();
        for index in 0..3 {
            let config = InstanceConfig::new(index, ClockIdentity([index as u8 + 1; 8]), Profile::Ieee1588);
            system
                .create_instance(config, TestClock::default())
                .unwrap();
        }
        system
    }

    fn port(port: u16) -> PortConfig {
        PortConfig {
            port,
            phy_correction: PhyCorrectionType::Gen2,
            wireless: false,
            local_priority: 128,
        }
    }

    #[test]
    fn instance_indices_are_checked() {
        let mut system = system();
        assert_eq!(system.instance(4).err(), Some(PtpError::InvalidInstance(4)));
        assert_eq!(system.instance(3).err(), Some(PtpError::InstanceNotCreated(3)));

        let config = InstanceConfig::new(0, ClockIdentity([9; 8]), Profile::Ieee1588);
        assert_eq!(
            system.create_instance(config, TestClock::default()),
            Err(PtpError::InstanceExists(0))
        );
    }

    #[test]
    fn at_most_two_instances_per_port() {
        let mut system = system();
        system.port_enable(0, port(1)).unwrap();
        system.port_enable(1, port(1)).unwrap();
        assert_eq!(
            system.port_enable(2, port(1)),
            Err(PtpError::TooManyInstancesOnPort(1))
        );
        assert!(!system.instance(2).unwrap().has_port(1));

        assert_eq!(system.port_enable(0, port(5)), Err(PtpError::InvalidPort(5)));
        assert_eq!(system.port_enable(0, port(0)), Err(PtpError::InvalidPort(0)));

        system.port_disable(1, 1).unwrap();
        system.port_enable(2, port(1)).unwrap();
    }

    #[test]
    fn failed_instance_setup_leaves_nothing_behind() {
        let mut system = system();
        system.port_enable(0, port(2)).unwrap();

        // the port is set up, then the virtual port pin is refused
        let mut config = InstanceConfig::new(3, ClockIdentity([4; 8]), Profile::Ieee1588);
        config.virtual_port = Some(crate::config::VirtualPortSetup {
            io_pin: 1,
            enable: true,
            config: VirtualPortConfig::default(),
        });
        config.ports = vec![port(2)];
        assert_eq!(
            system.create_instance(config, TestClock::default()),
            Err(PtpError::PinCapability {
                pin: 1,
                usage: PinUsage::Main
            })
        );
        assert_eq!(system.instance(3).err(), Some(PtpError::InstanceNotCreated(3)));
        assert_eq!(system.io_pin_get(1).unwrap().owner, PinUsage::None);

        // the failed instance no longer counts on port 2
        system.port_enable(1, port(2)).unwrap();
    }

    #[test]
    fn link_state_reaches_every_instance() {
        let mut system = system();
        system.port_enable(0, port(1)).unwrap();
        system.port_enable(1, port(1)).unwrap();

        let link = PortLinkState {
            link_up: true,
            in_sync: true,
            forwarding: true,
            phy_timestamper: true,
        };
        system.port_link_state_set(1, link).unwrap();
        assert_eq!(system.port_link_state_get(0, 1), Ok(link));
        assert_eq!(system.port_link_state_get(1, 1), Ok(link));
        assert_eq!(
            system.port_link_state_get(2, 1),
            Err(PtpError::PortNotEnabled(1))
        );
    }

    #[test]
    fn virtual_port_pin_capability_is_checked() {
        let mut system = system();
        // pin 1 can only drive an output
        assert_eq!(
            system.set_virtual_port_io_pin(0, 1, true),
            Err(PtpError::PinCapability {
                pin: 1,
                usage: PinUsage::Main
            })
        );
        assert_eq!(system.io_pin_get(1).unwrap().owner, PinUsage::None);
        assert_eq!(
            system.instance(0).unwrap().virtual_port().state(),
            VirtualPortState::Unbound
        );

        system.set_virtual_port_io_pin(0, 2, true).unwrap();
        assert_eq!(system.io_pin_get(2).unwrap().owner, PinUsage::Main);
        assert_eq!(
            system.set_virtual_port_io_pin(1, 2, true),
            Err(PtpError::PinOwned {
                pin: 2,
                owner: PinUsage::Main
            })
        );

        // moving to another pin gives the old one back
        system.set_virtual_port_io_pin(0, 3, true).unwrap();
        assert_eq!(system.io_pin_get(2).unwrap().owner, PinUsage::None);
        assert_eq!(system.io_pin_get(3).unwrap().instance, Some(0));

        system.set_virtual_port_io_pin(0, IO_PIN_UNUSED, false).unwrap();
        assert_eq!(system.io_pin_get(3).unwrap().owner, PinUsage::None);
        assert_eq!(
            system.instance(0).unwrap().virtual_port().state(),
            VirtualPortState::Unbound
        );
    }

    #[test]
    fn rs422_round_trip_and_no_partial_apply() {
        let mut system = system();
        let sub = Rs422Config {
            mode: Rs422Mode::Sub,
            delay: 500,
            proto: Rs422Protocol::SerZda,
            instance: 0,
            port: 0,
        };
        system.rs422_conf_set(sub).unwrap();
        assert_eq!(system.rs422_conf_get(), sub);
        assert_eq!(system.io_pin_get(3).unwrap().owner, PinUsage::Rs422);
        assert_eq!(
            system.instance(0).unwrap().virtual_port().state(),
            VirtualPortState::Active
        );

        // PIM on a port the board does not have
        let pim = Rs422Config {
            proto: Rs422Protocol::Pim,
            port: 9,
            ..sub
        };
        assert_eq!(system.rs422_conf_set(pim), Err(PtpError::InvalidPort(9)));
        assert_eq!(system.rs422_conf_get(), sub);

        assert!(matches!(
            system.rs422_time_set(Timestamp::new(1, 0)),
            Err(PtpError::InvalidState(_))
        ));

        system
            .rs422_conf_set(Rs422Config {
                mode: Rs422Mode::Disable,
                ..sub
            })
            .unwrap();
        assert_eq!(system.io_pin_get(3).unwrap().owner, PinUsage::None);
        assert_eq!(
            system.instance(0).unwrap().virtual_port().state(),
            VirtualPortState::Unbound
        );
    }

    #[test]
    fn rs422_sub_moves_between_instances() {
        let mut system = system();
        let sub = Rs422Config {
            mode: Rs422Mode::Sub,
            delay: 500,
            proto: Rs422Protocol::SerZda,
            instance: 0,
            port: 0,
        };
        system.rs422_conf_set(sub).unwrap();

        let moved = Rs422Config { instance: 1, ..sub };
        system.rs422_conf_set(moved).unwrap();
        assert_eq!(system.rs422_conf_get(), moved);
        let pin = system.io_pin_get(3).unwrap();
        assert_eq!(pin.owner, PinUsage::Rs422);
        assert_eq!(pin.instance, None);

        let vp = |system: &PtpSystem<TestClock>, index| {
            system.instance(index).unwrap().virtual_port().state()
        };
        assert_eq!(vp(&system, 0), VirtualPortState::Unbound);
        assert_eq!(vp(&system, 1), VirtualPortState::Active);
        assert_eq!(
            system.instance(1).unwrap().virtual_port().config().mode,
            VirtualPortMode::Sub
        );

        // a main mode keeps the pin without an instance attached
        system
            .rs422_conf_set(Rs422Config {
                mode: Rs422Mode::MainAuto,
                instance: 2,
                ..sub
            })
            .unwrap();
        assert_eq!(system.io_pin_get(3).unwrap().owner, PinUsage::Rs422);
        assert_eq!(vp(&system, 1), VirtualPortState::Unbound);
    }

    #[test]
    fn rs422_sub_needs_a_free_virtual_port() {
        let mut system = system();
        let sub = Rs422Config {
            mode: Rs422Mode::Sub,
            delay: 500,
            proto: Rs422Protocol::SerZda,
            instance: 0,
            port: 0,
        };

        // the target instance does not exist
        system.delete_instance(2).unwrap();
        assert_eq!(
            system.rs422_conf_set(Rs422Config { instance: 2, ..sub }),
            Err(PtpError::InstanceNotCreated(2))
        );
        assert_eq!(system.io_pin_get(3).unwrap().owner, PinUsage::None);

        // its virtual port already listens on another pin
        system.set_virtual_port_io_pin(0, 2, true).unwrap();
        assert!(matches!(
            system.rs422_conf_set(sub),
            Err(PtpError::InvalidState(_))
        ));
        assert_eq!(system.io_pin_get(3).unwrap().owner, PinUsage::None);
        assert_eq!(system.rs422_conf_get().mode, Rs422Mode::Disable);

        // while fed by rs422 the virtual port pin is not the operator's
        system.rs422_conf_set(Rs422Config { instance: 1, ..sub }).unwrap();
        assert!(matches!(
            system.set_virtual_port_io_pin(1, IO_PIN_UNUSED, false),
            Err(PtpError::InvalidState(_))
        ));
        assert_eq!(
            system.instance(1).unwrap().virtual_port().state(),
            VirtualPortState::Active
        );
    }

    #[test]
    fn deleting_an_instance_keeps_the_rs422_pin() {
        let mut system = system();
        let main = Rs422Config {
            mode: Rs422Mode::MainAuto,
            instance: 0,
            ..Default::default()
        };
        system.rs422_conf_set(main).unwrap();
        system.delete_instance(0).unwrap();
        assert_eq!(system.io_pin_get(3).unwrap().owner, PinUsage::Rs422);
        assert_eq!(
            system.io_pin_assign(3, PinFunction::Output),
            Err(PtpError::PinOwned {
                pin: 3,
                owner: PinUsage::Rs422
            })
        );
        assert_eq!(system.rs422_conf_get(), main);

        // losing the instance a sub input feeds turns rs422 off cleanly
        let sub = Rs422Config {
            mode: Rs422Mode::Sub,
            proto: Rs422Protocol::SerZda,
            instance: 1,
            ..main
        };
        system.rs422_conf_set(sub).unwrap();
        system.delete_instance(1).unwrap();
        assert_eq!(system.rs422_conf_get().mode, Rs422Mode::Disable);
        assert_eq!(system.io_pin_get(3).unwrap().owner, PinUsage::None);
        system.io_pin_assign(3, PinFunction::Output).unwrap();
    }

    #[test]
    fn rs422_calibration_reports_measured_delay() {
        let mut system = system();
        let calib = Rs422Config {
            mode: Rs422Mode::Calib,
            delay: 1234,
            ..Default::default()
        };
        system.rs422_conf_set(calib).unwrap();
        assert_eq!(system.rs422_conf_get().delay, 0);

        let periods = crate::calibration::CALIBRATION_SETTLE_PERIODS as u64
            + crate::calibration::CALIBRATION_MEASURE_PERIODS as u64;
        for second in 0..periods {
            system
                .rs422_input_edge(Timestamp::new(second + 1, 800))
                .unwrap();
            system.tick();
        }
        assert_eq!(system.rs422_conf_get().delay, 400);
        assert_eq!(system.rs422_calibrated_delay(), Ok(Some(400)));
    }

    #[test]
    fn force_holdover_is_immediate() {
        let mut system = system();
        for mode in [false, true] {
            system.servo_clear(0).unwrap();
            if mode {
                system
                    .set_active_ref(0, Some(SourceId::VirtualPort))
                    .unwrap();
                assert_eq!(system.servo_mode(0), Ok(ServoMode::Packet));
            }
            system.force_holdover_set(0, true).unwrap();
            assert_eq!(system.servo_mode(0), Ok(ServoMode::Holdover));
            assert_eq!(system.servo_get_holdover_status(0), Ok(false));
            assert_eq!(system.force_holdover_get(0), Ok(true));
        }

        system.servo_clear(0).unwrap();
        assert_eq!(system.servo_mode(0), Ok(ServoMode::None));
        assert_eq!(system.force_holdover_get(0), Ok(false));
    }

    #[test]
    fn statistics_clear_is_idempotent() {
        let mut system = system();
        system.slave_statistics_clear(0).unwrap();
        system.egress_latency_clear(0).unwrap();
        system.one_pps_tod_statistics_clear();

        system
            .egress_latency_observe(0, Duration::from_nanos(250))
            .unwrap();
        assert_eq!(system.egress_latency_get(0).unwrap().cnt, 1);
        system.egress_latency_clear(0).unwrap();
        assert_eq!(system.egress_latency_get(0), Ok(EgressLatency::default()));

        assert_eq!(
            system.slave_statistics_get(0).unwrap(),
            SlaveStatisticsSnapshot::default()
        );
    }

    #[test]
    fn virtual_port_alarm_after_silence() {
        let mut system = system();
        system.set_virtual_port_io_pin(0, 2, true).unwrap();
        let sample = VirtualPortSample {
            local: Timestamp::new(10, 0),
            reference: None,
            delay: None,
        };

        for _ in 0..VIRTUAL_PORT_ALARM_TIME - 1 {
            system.tick();
        }
        assert_eq!(
            system.instance(0).unwrap().virtual_port().state(),
            VirtualPortState::Active
        );
        system.tick();
        assert_eq!(
            system.instance(0).unwrap().virtual_port().state(),
            VirtualPortState::Alarmed
        );

        system.virtual_port_timestamp_rx(0, sample).unwrap();
        system.tick();
        assert_eq!(
            system.instance(0).unwrap().virtual_port().state(),
            VirtualPortState::Active
        );
    }

    #[test]
    fn wireless_needs_enabled_port() {
        let mut system = system();
        assert_eq!(
            system.wireless_mode_set(0, 1, true),
            Err(PtpError::PortNotEnabled(1))
        );
        system.port_enable(0, port(1)).unwrap();
        system.wireless_mode_set(0, 1, true).unwrap();
        assert_eq!(system.wireless_mode_get(0, 1), Ok(true));

        let delay = WirelessDelay {
            base_delay: Duration::from_nanos(1_000),
            incr_delay: Duration::from_nanos(8),
        };
        system.wireless_pre_notif(0, 1).unwrap();
        system.wireless_delay_set(0, 1, delay).unwrap();
        assert_eq!(system.wireless_delay_get(0, 1), Ok(delay));
    }

    #[test]
    fn phy_correction_follows_the_physical_port() {
        let mut system = system();
        system.port_enable(0, port(1)).unwrap();
        system
            .port_phy_delay_corr_upd(1, PhyCorrectionType::Gen3)
            .unwrap();
        system.port_enable(1, port(1)).unwrap();

        for index in 0..2 {
            assert_eq!(
                system.instance(index).unwrap().port(1).unwrap().phy_correction(),
                PhyCorrectionType::Gen3
            );
        }
    }
}
