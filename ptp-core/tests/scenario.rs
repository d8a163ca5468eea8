use std::{cell::Cell, convert::Infallible};

use ptp_core::{
    bmc::{AnnounceInfo, SourceId},
    clock::LocalClock,
    config::{BoardConfig, InstanceConfig, PortConfig},
    datastructures::{
        Attribute, AttributeValue, ClockIdentity, ClockQuality, PortIdentity, Profile,
        TimePropertiesDS,
    },
    instance::PortLinkState,
    io_pin::{PinCapabilities, PinDescriptor, PinUsage},
    nmea::checksum,
    phy_corr::PhyCorrectionType,
    rs422::{Rs422Config, Rs422Mode, Rs422Protocol},
    time::{Duration, Timestamp},
    PtpSystem, TICKS_PER_SECOND,
};

#[derive(Debug, Default)]
struct FrozenClock {
    steps: Cell<u32>,
    frequency_updates: Cell<u32>,
}

impl LocalClock for FrozenClock {
    type Error = Infallible;

    fn now(&self) -> Result<Timestamp, Self::Error> {
        Ok(Timestamp::new(1_000, 0))
    }

    fn set_frequency(&self, _ppb: f64) -> Result<(), Self::Error> {
        self.frequency_updates.set(self.frequency_updates.get() + 1);
        Ok(())
    }

    fn step_clock(&self, _offset: Duration) -> Result<(), Self::Error> {
        self.steps.set(self.steps.get() + 1);
        Ok(())
    }
}

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
        ],
        port_count: 4,
    }
}

fn master_announce(sequence_id: u16) -> AnnounceInfo {
    let master = ClockIdentity([0x52; 8]);
    AnnounceInfo {
        source_port_identity: PortIdentity {
            clock_identity: master,
            port_number: 1,
        },
        sequence_id,
        grandmaster_priority_1: 128,
        grandmaster_clock_quality: ClockQuality {
            clock_class: 52,
            ..Default::default()
        },
        grandmaster_priority_2: 128,
        grandmaster_identity: master,
        steps_removed: 0,
        time_properties: TimePropertiesDS::default(),
        path_trace: vec![master],
    }
}

fn run_one_second(system: &mut PtpSystem<FrozenClock>) {
    for _ in 0..TICKS_PER_SECOND {
        system.tick();
    }
}

#[test]
fn virtual_port_competes_with_ethernet_master() {
    let mut system = PtpSystem::new(&board(), ptp_core::IO_PIN_UNUSED).unwrap();
    let config = InstanceConfig::new(0, ClockIdentity([1, 2, 3, 4, 5, 6, 7, 8]), Profile::Ieee1588);
    system.create_instance(config, FrozenClock::default()).unwrap();

    system
        .port_enable(
            0,
            PortConfig {
                port: 1,
                phy_correction: PhyCorrectionType::Gen2,
                wireless: false,
                local_priority: 128,
            },
        )
        .unwrap();
    system
        .port_link_state_set(
            1,
            PortLinkState {
                link_up: true,
                in_sync: true,
                forwarding: true,
                phy_timestamper: false,
            },
        )
        .unwrap();
    for sequence_id in 0..2 {
        assert!(system.announce_rx(0, 1, master_announce(sequence_id)).unwrap());
    }

    run_one_second(&mut system);
    assert_eq!(
        system.instance(0).unwrap().selected_source(),
        Some(SourceId::Port(1))
    );

    // a class 6 reference on the virtual port beats the class 52 master
    system
        .set_virtual_port_attribute(0, AttributeValue::ClockClass(6))
        .unwrap();
    system.set_virtual_port_io_pin(0, 2, true).unwrap();
    assert_eq!(system.io_pin_get(2).unwrap().owner, PinUsage::Main);
    for sequence_id in 2..4 {
        system.announce_rx(0, 1, master_announce(sequence_id)).unwrap();
    }

    run_one_second(&mut system);
    let status = system.status();
    let instance = &status.instances[0];
    assert_eq!(instance.selected_source, Some(SourceId::VirtualPort));
    assert_eq!(
        system
            .instance(0)
            .unwrap()
            .time_properties()
            .current_utc_offset,
        TimePropertiesDS::default().current_utc_offset
    );

    // without the override the virtual port falls back to the instance class
    system
        .clear_virtual_port_attribute(0, Attribute::ClockClass)
        .unwrap();
    for sequence_id in 4..6 {
        system.announce_rx(0, 1, master_announce(sequence_id)).unwrap();
    }
    run_one_second(&mut system);
    assert_eq!(
        system.instance(0).unwrap().selected_source(),
        Some(SourceId::Port(1))
    );

    system
        .set_virtual_port_io_pin(0, ptp_core::IO_PIN_UNUSED, false)
        .unwrap();
    assert_eq!(system.io_pin_get(2).unwrap().owner, PinUsage::None);
    run_one_second(&mut system);
    assert_eq!(
        system.instance(0).unwrap().selected_source(),
        Some(SourceId::Port(1))
    );
}

#[test]
fn deleting_an_instance_frees_its_pins() {
    let mut system = PtpSystem::new(&board(), ptp_core::IO_PIN_UNUSED).unwrap();
    let config = InstanceConfig::new(2, ClockIdentity([2; 8]), Profile::G8275_1);
    system.create_instance(config, FrozenClock::default()).unwrap();
    system.set_virtual_port_io_pin(2, 2, true).unwrap();
    assert_eq!(system.io_pin_get(2).unwrap().instance, Some(2));

    system.delete_instance(2).unwrap();
    assert_eq!(system.io_pin_get(2).unwrap().owner, PinUsage::None);
    assert_eq!(
        system.instance(2).err(),
        Some(ptp_core::PtpError::InstanceNotCreated(2))
    );
}

#[test]
fn rs422_sub_input_steers_the_clock() {
    let mut system = PtpSystem::new(&board(), 2).unwrap();
    let config = InstanceConfig::new(0, ClockIdentity([3; 8]), Profile::Ieee1588);
    system.create_instance(config, FrozenClock::default()).unwrap();
    system
        .set_virtual_port_attribute(0, AttributeValue::ClockClass(6))
        .unwrap();

    system
        .rs422_conf_set(Rs422Config {
            mode: Rs422Mode::Sub,
            delay: 100,
            proto: Rs422Protocol::SerZda,
            instance: 0,
            port: 0,
        })
        .unwrap();
    run_one_second(&mut system);
    assert_eq!(
        system.instance(0).unwrap().selected_source(),
        Some(SourceId::VirtualPort)
    );
    let updates_before = system.instance(0).unwrap().clock().frequency_updates.get();

    // 1970-01-01 00:16:03 UTC is 1000 s PTP time, our clock reads the edge
    // 200 ns late and the link accounts for 100 ns of it
    let body = "GPZDA,001603.00,01,01,1970,00,00";
    let sentence = format!("${body}*{:02X}", checksum(body));
    for _ in 0..3 {
        system.rs422_input_edge(Timestamp::new(1_000, 200)).unwrap();
        system.rs422_sentence_rx(&sentence).unwrap();
        run_one_second(&mut system);
    }

    let clock = system.instance(0).unwrap().clock();
    assert_eq!(clock.steps.get(), 0);
    assert!(clock.frequency_updates.get() >= updates_before + 3);
    assert_eq!(
        system.instance(0).unwrap().servo().last_offset(),
        Duration::from_nanos(100)
    );
    assert_eq!(system.one_pps_tod_statistics().tod_cnt, 3);
    assert_eq!(
        system.instance(0).unwrap().selected_source(),
        Some(SourceId::VirtualPort)
    );
}
