use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    bmc::{AnnounceInfo, Bmca, Candidate, RecommendedState},
    datastructures::PortIdentity,
    phy_corr::{CorrectionFieldEncoder, CorrectionFields, PhyCorrectionType},
    time::{Duration, Timestamp},
    wireless::WirelessCompensator,
};

/// Link and timestamping state of a port as reported by the switch.
///
/// A port only delivers a usable reference while all of `link_up`,
/// `in_sync` and `forwarding` hold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PortLinkState {
    pub link_up: bool,
    /// Hardware timestamping has locked
    pub in_sync: bool,
    /// Not filtered or discarded by the spanning tree
    pub forwarding: bool,
    /// Timestamps are taken in the PHY rather than the switch
    pub phy_timestamper: bool,
}

impl PortLinkState {
    pub fn is_eligible(&self) -> bool {
        self.link_up && self.in_sync && self.forwarding
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PortState {
    /// Not able to take part in the protocol
    Faulty,
    #[default]
    Listening,
    Master,
    Passive,
    Slave,
}

impl From<RecommendedState> for PortState {
    fn from(state: RecommendedState) -> Self {
        match state {
            RecommendedState::M1 | RecommendedState::M2 | RecommendedState::M3 => PortState::Master,
            RecommendedState::P1 | RecommendedState::P2 => PortState::Passive,
            RecommendedState::S1 => PortState::Slave,
        }
    }
}

/// The four timestamps of one sync / delay request exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketTimestamps {
    /// Sync sent by the master
    pub t1: Timestamp,
    /// Sync received here
    pub t2: Timestamp,
    /// Delay request sent here
    pub t3: Timestamp,
    /// Delay request received by the master
    pub t4: Timestamp,
    pub sync_length: u16,
    pub delay_req_length: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketMeasurement {
    pub offset: Duration,
    pub mean_delay: Duration,
    pub master_to_slave: Duration,
    pub slave_to_master: Duration,
    pub at: Timestamp,
}

/// 802.1AS view of one port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct As802PortStatus {
    pub as_capable: bool,
    pub selected_state: PortState,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct PortStatus {
    pub port_number: u16,
    pub state: PortState,
    pub link: PortLinkState,
    pub foreign_masters: usize,
    pub wireless: bool,
    pub phy_correction: PhyCorrectionType,
}

/// One Ethernet port enabled on a clock instance
#[derive(Debug)]
pub struct Port {
    identity: PortIdentity,
    link: PortLinkState,
    state: PortState,
    bmca: Bmca,
    wireless: WirelessCompensator,
    phy_correction: PhyCorrectionType,
    encoder: Box<dyn CorrectionFieldEncoder>,
}

impl Port {
    pub fn new(identity: PortIdentity, log_announce_interval: i8, local_priority: u8) -> Self {
        let phy_correction = PhyCorrectionType::default();
        Self {
            identity,
            link: PortLinkState::default(),
            state: PortState::Listening,
            bmca: Bmca::new(log_announce_interval, identity, local_priority),
            wireless: WirelessCompensator::default(),
            phy_correction,
            encoder: phy_correction.encoder(),
        }
    }

    pub fn number(&self) -> u16 {
        self.identity.port_number
    }

    pub fn identity(&self) -> PortIdentity {
        self.identity
    }

    pub fn link_state(&self) -> PortLinkState {
        self.link
    }

    /// Losing eligibility drops every foreign master heard on the port
    pub fn set_link_state(&mut self, link: PortLinkState) {
        if self.link.is_eligible() && !link.is_eligible() {
            info!(port = self.number(), "port can no longer deliver a reference");
            self.bmca.clear();
            self.state = PortState::Faulty;
        } else if !self.link.is_eligible() && link.is_eligible() {
            info!(port = self.number(), "port can deliver a reference");
            self.state = PortState::Listening;
        }
        self.link = link;
    }

    pub fn is_eligible(&self) -> bool {
        self.link.is_eligible()
    }

    pub fn state(&self) -> PortState {
        self.state
    }

    /// Returns false when the port cannot accept announces right now
    pub fn register_announce(&mut self, announce: AnnounceInfo) -> bool {
        if !self.is_eligible() {
            return false;
        }
        self.bmca.register_announce(announce);
        true
    }

    pub fn step_age(&mut self, step: Duration) {
        self.bmca.step_age(step);
    }

    /// The best candidate heard on this port, `None` while not eligible
    pub fn erbest(&self) -> Option<Candidate> {
        if !self.is_eligible() {
            return None;
        }
        self.bmca.erbest()
    }

    pub fn apply_recommended_state(&mut self, recommended: Option<RecommendedState>) {
        if !self.is_eligible() {
            self.state = PortState::Faulty;
            return;
        }
        if let Some(recommended) = recommended {
            let state = PortState::from(recommended);
            if state != self.state {
                debug!(port = self.number(), ?recommended, ?state, "port state changed");
                self.state = state;
            }
        }
    }

    pub fn wireless(&self) -> &WirelessCompensator {
        &self.wireless
    }

    pub fn wireless_mut(&mut self) -> &mut WirelessCompensator {
        &mut self.wireless
    }

    pub fn phy_correction(&self) -> PhyCorrectionType {
        self.phy_correction
    }

    pub fn phy_delay_corr_upd(&mut self, kind: PhyCorrectionType) {
        debug!(port = self.number(), ?kind, "phy correction type updated");
        self.phy_correction = kind;
        self.encoder = kind.encoder();
    }

    /// Correction fields for a delay request leaving at `tx_time`
    pub fn delay_req_correction(&self, tx_time: Timestamp) -> CorrectionFields {
        self.encoder.encode(tx_time)
    }

    /// Offset and delay of one exchange, with the wireless link delay taken
    /// out of both directions. `None` while a wireless delay change is in
    /// flight.
    pub fn measure(&mut self, ts: PacketTimestamps) -> Option<PacketMeasurement> {
        if !self.wireless.admit_sample() {
            debug!(port = self.number(), "sample withheld during wireless delay change");
            return None;
        }

        let master_to_slave = (ts.t2 - ts.t1) - self.wireless.correction(ts.sync_length);
        let slave_to_master = (ts.t4 - ts.t3) - self.wireless.correction(ts.delay_req_length);

        Some(PacketMeasurement {
            offset: (master_to_slave - slave_to_master) / 2,
            mean_delay: (master_to_slave + slave_to_master) / 2,
            master_to_slave,
            slave_to_master,
            at: ts.t2,
        })
    }

    pub fn as_802_1as_status(&self, profile_is_802_1as: bool) -> As802PortStatus {
        As802PortStatus {
            as_capable: profile_is_802_1as && self.is_eligible(),
            selected_state: self.state,
        }
    }

    pub fn status(&self) -> PortStatus {
        PortStatus {
            port_number: self.number(),
            state: self.state,
            link: self.link,
            foreign_masters: self.bmca.foreign_master_count(),
            wireless: self.wireless.is_enabled(),
            phy_correction: self.phy_correction,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        bmc::foreign_master::tests::announce, datastructures::ClockIdentity,
        wireless::WirelessDelay,
    };

    const UP: PortLinkState = PortLinkState {
        link_up: true,
        in_sync: true,
        forwarding: true,
        phy_timestamper: false,
    };

    fn port() -> Port {
        let identity = PortIdentity {
            clock_identity: ClockIdentity([1; 8]),
            port_number: 3,
        };
        Port::new(identity, 1, 128)
    }

    #[test]
    fn announces_need_an_eligible_link() {
        let mut port = port();
        assert!(!port.register_announce(announce(9, 0, 6)));

        port.set_link_state(UP);
        for seq in 0..3 {
            assert!(port.register_announce(announce(9, seq, 6)));
        }
        assert_eq!(port.erbest().map(|c| c.source), Some(crate::bmc::SourceId::Port(3)));

        port.set_link_state(PortLinkState {
            forwarding: false,
            ..UP
        });
        assert!(port.erbest().is_none());
        assert_eq!(port.state(), PortState::Faulty);
        assert_eq!(port.status().foreign_masters, 0);
    }

    #[test]
    fn measurement_removes_wireless_delay() {
        let mut port = port();
        let ts = PacketTimestamps {
            t1: Timestamp::new(100, 0),
            t2: Timestamp::new(100, 1_600),
            t3: Timestamp::new(100, 5_000),
            t4: Timestamp::new(100, 5_400),
            sync_length: 44,
            delay_req_length: 44,
        };

        let m = port.measure(ts).unwrap();
        assert_eq!(m.offset, Duration::from_nanos(600));
        assert_eq!(m.mean_delay, Duration::from_nanos(1_000));

        port.wireless_mut().set_enabled(true);
        port.wireless_mut().pre_notif();
        assert!(port.measure(ts).is_none());
        port.wireless_mut().delay_set(WirelessDelay {
            base_delay: Duration::from_nanos(100),
            incr_delay: Duration::from_nanos(5),
        });
        assert!(port.measure(ts).is_none());

        // 100 + 44 * 5 = 320ns in each direction
        let m = port.measure(ts).unwrap();
        assert_eq!(m.master_to_slave, Duration::from_nanos(1_280));
        assert_eq!(m.slave_to_master, Duration::from_nanos(80));
        assert_eq!(m.offset, Duration::from_nanos(600));
        assert_eq!(m.mean_delay, Duration::from_nanos(680));
    }

    #[test]
    fn phy_encoder_follows_configuration() {
        let mut port = port();
        let tx = Timestamp::new(1, 0);
        assert_eq!(
            port.delay_req_correction(tx),
            PhyCorrectionType::Gen2.encoder().encode(tx)
        );

        port.phy_delay_corr_upd(PhyCorrectionType::Gen3);
        assert_eq!(port.phy_correction(), PhyCorrectionType::Gen3);
        assert_eq!(
            port.delay_req_correction(tx),
            PhyCorrectionType::Gen3.encoder().encode(tx)
        );
    }
}
