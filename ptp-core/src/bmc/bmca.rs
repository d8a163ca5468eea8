//! Implementation of the best master clock algorithm [Bmca]

use serde::{Deserialize, Serialize};

use super::{
    dataset_comparison::{ComparisonDataset, DatasetOrdering},
    foreign_master::{AnnounceInfo, ForeignMasterList},
};
use crate::{datastructures::PortIdentity, time::Duration};

/// Where a candidate reference enters the instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceId {
    Port(u16),
    VirtualPort,
}

/// A source competing in the selection, with the data set it is ranked by
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub source: SourceId,
    pub announce: AnnounceInfo,
    pub dataset: ComparisonDataset,
}

impl Candidate {
    pub fn new(
        source: SourceId,
        announce: AnnounceInfo,
        receiver: PortIdentity,
        local_priority: u8,
    ) -> Self {
        let dataset = ComparisonDataset::from_announce(&announce, receiver, local_priority);
        Self {
            source,
            announce,
            dataset,
        }
    }
}

/// Best master bookkeeping of a single Ethernet port.
///
/// Usage:
///
/// - Every enabled port of an instance owns one.
/// - Received announces are handed to [Bmca::register_announce].
/// - The control loop ages the records with [Bmca::step_age] every tick.
/// - At selection time the instance gathers [Bmca::erbest] of every eligible
///   port plus the virtual port candidate, elects the best with
///   [Bmca::find_best] and derives each port's state with
///   [Bmca::calculate_recommended_state].
#[derive(Debug)]
pub struct Bmca {
    foreign_master_list: ForeignMasterList,
    own_port_identity: PortIdentity,
    local_priority: u8,
}

impl Bmca {
    pub fn new(log_announce_interval: i8, own_port_identity: PortIdentity, local_priority: u8) -> Self {
        Self {
            foreign_master_list: ForeignMasterList::new(
                log_announce_interval,
                own_port_identity.clock_identity,
            ),
            own_port_identity,
            local_priority,
        }
    }

    pub fn register_announce(&mut self, announce: AnnounceInfo) {
        self.foreign_master_list.register_announce(announce);
    }

    pub fn step_age(&mut self, step: Duration) {
        self.foreign_master_list.step_age(step);
    }

    pub fn clear(&mut self) {
        self.foreign_master_list.clear();
    }

    pub fn foreign_master_count(&self) -> usize {
        self.foreign_master_list.len()
    }

    /// The best qualified announce received on this port
    pub fn erbest(&self) -> Option<Candidate> {
        let source = SourceId::Port(self.own_port_identity.port_number);
        Self::find_best(self.foreign_master_list.qualified_announces().map(|announce| {
            Candidate::new(
                source,
                announce.clone(),
                self.own_port_identity,
                self.local_priority,
            )
        }))
    }

    /// Finds the best candidate; on a tie the earlier one is kept.
    pub fn find_best(candidates: impl Iterator<Item = Candidate>) -> Option<Candidate> {
        candidates.reduce(|l, r| match l.dataset.compare(&r.dataset) {
            DatasetOrdering::Better
            | DatasetOrdering::BetterByTopology
            | DatasetOrdering::Error1
            | DatasetOrdering::Error2 => l,
            DatasetOrdering::WorseByTopology | DatasetOrdering::Worse => r,
        })
    }

    /// The state decision algorithm for one port.
    ///
    /// - `own_data`: `D0`, the local clock as grandmaster
    /// - `ebest`: the best candidate of the whole instance
    /// - `erbest`: the best candidate received on this port
    /// - `listening`: the port has not decided on a state yet
    ///
    /// `None` means the port keeps its current state.
    pub fn calculate_recommended_state(
        own_data: &ComparisonDataset,
        ebest: Option<&Candidate>,
        erbest: Option<&Candidate>,
        listening: bool,
    ) -> Option<RecommendedState> {
        if ebest.is_none() && listening {
            return None;
        }

        if (1..=127).contains(&own_data.gm_clock_quality.clock_class) {
            return match erbest {
                Some(erbest) if !own_data.compare(&erbest.dataset).is_better() => {
                    Some(RecommendedState::P1)
                }
                _ => Some(RecommendedState::M1),
            };
        }

        let ebest = match ebest {
            Some(ebest) if !own_data.compare(&ebest.dataset).is_better() => ebest,
            _ => return Some(RecommendedState::M2),
        };

        match erbest {
            None => Some(RecommendedState::M3),
            Some(erbest) => {
                if ebest.source == erbest.source {
                    Some(RecommendedState::S1)
                } else if matches!(
                    ebest.dataset.compare(&erbest.dataset),
                    DatasetOrdering::BetterByTopology
                ) {
                    Some(RecommendedState::P2)
                } else {
                    Some(RecommendedState::M3)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecommendedState {
    M1,
    M2,
    M3,
    P1,
    P2,
    S1,
}
