//! Data set comparison of IEEE 1588 section 9.3.4, with the telecom
//! `localPriority` attribute inserted as the last quality tie-breaker

use std::cmp::Ordering;

use super::foreign_master::AnnounceInfo;
use crate::datastructures::{ClockIdentity, ClockQuality, PortIdentity};

/// The attributes of one candidate source that take part in the comparison.
#[derive(Eq, PartialEq, Default, Debug, Clone, Copy)]
pub struct ComparisonDataset {
    pub(crate) gm_priority_1: u8,
    pub(crate) gm_identity: ClockIdentity,
    pub(crate) gm_clock_quality: ClockQuality,
    pub(crate) gm_priority_2: u8,
    pub(crate) local_priority: u8,
    pub(crate) steps_removed: u16,
    pub(crate) identity_of_senders: ClockIdentity,
    pub(crate) identity_of_receiver: PortIdentity,
}

impl ComparisonDataset {
    /// Build the data set for an announce received on `receiver`, ranked with
    /// the local priority configured for that port
    pub fn from_announce(
        announce: &AnnounceInfo,
        receiver: PortIdentity,
        local_priority: u8,
    ) -> Self {
        Self {
            gm_priority_1: announce.grandmaster_priority_1,
            gm_identity: announce.grandmaster_identity,
            gm_clock_quality: announce.grandmaster_clock_quality,
            gm_priority_2: announce.grandmaster_priority_2,
            local_priority,
            steps_removed: announce.steps_removed,
            identity_of_senders: announce.source_port_identity.clock_identity,
            identity_of_receiver: receiver,
        }
    }

    /// The data set `D0` describing the local clock as a grandmaster
    pub fn from_own_data(
        identity: ClockIdentity,
        priority_1: u8,
        quality: ClockQuality,
        priority_2: u8,
        local_priority: u8,
    ) -> Self {
        Self {
            gm_priority_1: priority_1,
            gm_identity: identity,
            gm_clock_quality: quality,
            gm_priority_2: priority_2,
            local_priority,
            steps_removed: 0,
            identity_of_senders: identity,
            identity_of_receiver: PortIdentity {
                clock_identity: identity,
                port_number: 0,
            },
        }
    }

    /// Returns the ordering of `self` in comparison to other.
    pub fn compare(&self, other: &Self) -> DatasetOrdering {
        if self.gm_identity != other.gm_identity {
            self.compare_quality(other)
        } else {
            self.compare_topology(other)
        }
    }

    // Figure 34, extended with the local priority
    fn compare_quality(&self, other: &Self) -> DatasetOrdering {
        let ordering = self
            .gm_priority_1
            .cmp(&other.gm_priority_1)
            .then(
                self.gm_clock_quality
                    .clock_class
                    .cmp(&other.gm_clock_quality.clock_class),
            )
            .then(
                self.gm_clock_quality
                    .clock_accuracy
                    .cmp_numeric(&other.gm_clock_quality.clock_accuracy),
            )
            .then(
                self.gm_clock_quality
                    .offset_scaled_log_variance
                    .cmp(&other.gm_clock_quality.offset_scaled_log_variance),
            )
            .then(self.gm_priority_2.cmp(&other.gm_priority_2))
            .then(self.local_priority.cmp(&other.local_priority))
            .then(self.gm_identity.cmp(&other.gm_identity));

        match ordering {
            Ordering::Less => DatasetOrdering::Better,
            // identities differ, so the chain never ends equal
            Ordering::Equal | Ordering::Greater => DatasetOrdering::Worse,
        }
    }

    // Figure 35
    fn compare_topology(&self, other: &Self) -> DatasetOrdering {
        let steps_removed_difference = self.steps_removed as i32 - other.steps_removed as i32;
        match steps_removed_difference {
            2..=i32::MAX => DatasetOrdering::Worse,
            i32::MIN..=-2 => DatasetOrdering::Better,
            1 => match self
                .identity_of_receiver
                .clock_identity
                .cmp(&self.identity_of_senders)
            {
                Ordering::Less => DatasetOrdering::Better,
                Ordering::Equal => DatasetOrdering::Error1,
                Ordering::Greater => DatasetOrdering::BetterByTopology,
            },
            -1 => match other
                .identity_of_receiver
                .clock_identity
                .cmp(&other.identity_of_senders)
            {
                Ordering::Less => DatasetOrdering::Worse,
                Ordering::Equal => DatasetOrdering::Error1,
                Ordering::Greater => DatasetOrdering::WorseByTopology,
            },
            0 => match self.identity_of_senders.cmp(&other.identity_of_senders) {
                Ordering::Less => DatasetOrdering::BetterByTopology,
                Ordering::Equal => match self
                    .identity_of_receiver
                    .port_number
                    .cmp(&other.identity_of_receiver.port_number)
                {
                    Ordering::Less => DatasetOrdering::BetterByTopology,
                    Ordering::Equal => DatasetOrdering::Error2,
                    Ordering::Greater => DatasetOrdering::WorseByTopology,
                },
                Ordering::Greater => DatasetOrdering::WorseByTopology,
            },
        }
    }
}

/// The ordering result of the dataset comparison algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatasetOrdering {
    Better,
    /// Equal quality, preferred because of the network topology
    BetterByTopology,
    /// Equal in quality and topology
    Error1,
    /// Probably based on the same set of data
    Error2,
    /// Equal quality, not preferred because of the network topology
    WorseByTopology,
    Worse,
}

impl DatasetOrdering {
    pub fn is_better(&self) -> bool {
        match self {
            DatasetOrdering::Better
            | DatasetOrdering::BetterByTopology
            // functionally the same source, either one will do
            | DatasetOrdering::Error1
            | DatasetOrdering::Error2 => true,
            DatasetOrdering::WorseByTopology | DatasetOrdering::Worse => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastructures::ClockAccuracy;

    const IDENTITY_A: ClockIdentity = ClockIdentity([1, 1, 1, 1, 1, 1, 1, 1]);
    const IDENTITY_B: ClockIdentity = ClockIdentity([2, 2, 2, 2, 2, 2, 2, 2]);
    const IDENTITY_C: ClockIdentity = ClockIdentity([3, 3, 3, 3, 3, 3, 3, 3]);

    fn pair() -> (ComparisonDataset, ComparisonDataset) {
        Default::default()
    }

    #[test]
    fn quality_bottom_up() {
        let (mut a, mut b) = pair();

        // Every step flips the winner, so a stale result can't pass
        a.gm_identity = IDENTITY_A;
        b.gm_identity = IDENTITY_B;
        assert_eq!(a.compare(&b), DatasetOrdering::Better);
        assert_eq!(b.compare(&a), DatasetOrdering::Worse);

        a.local_priority = 200;
        b.local_priority = 100;
        assert_eq!(a.compare(&b), DatasetOrdering::Worse);
        assert_eq!(b.compare(&a), DatasetOrdering::Better);

        a.gm_priority_2 = 0;
        b.gm_priority_2 = 1;
        assert_eq!(a.compare(&b), DatasetOrdering::Better);
        assert_eq!(b.compare(&a), DatasetOrdering::Worse);

        a.gm_clock_quality.offset_scaled_log_variance = 1;
        b.gm_clock_quality.offset_scaled_log_variance = 0;
        assert_eq!(a.compare(&b), DatasetOrdering::Worse);

        a.gm_clock_quality.clock_accuracy = ClockAccuracy::NS25;
        b.gm_clock_quality.clock_accuracy = ClockAccuracy::US1;
        assert_eq!(a.compare(&b), DatasetOrdering::Better);

        a.gm_clock_quality.clock_class = 7;
        b.gm_clock_quality.clock_class = 6;
        assert_eq!(a.compare(&b), DatasetOrdering::Worse);

        a.gm_priority_1 = 1;
        b.gm_priority_1 = 2;
        assert_eq!(a.compare(&b), DatasetOrdering::Better);
        assert_eq!(b.compare(&a), DatasetOrdering::Worse);
    }

    #[test]
    fn topology() {
        let (mut a, mut b) = pair();
        assert_eq!(a.compare(&b), DatasetOrdering::Error2);

        a.identity_of_receiver.port_number = 1;
        b.identity_of_receiver.port_number = 0;
        assert_eq!(a.compare(&b), DatasetOrdering::WorseByTopology);
        assert_eq!(b.compare(&a), DatasetOrdering::BetterByTopology);

        a.identity_of_senders = IDENTITY_A;
        b.identity_of_senders = IDENTITY_B;
        assert_eq!(a.compare(&b), DatasetOrdering::BetterByTopology);

        a.steps_removed = 0;
        a.identity_of_receiver.clock_identity = IDENTITY_A;
        b.steps_removed = 1;
        b.identity_of_receiver.clock_identity = IDENTITY_B;
        assert_eq!(a.compare(&b), DatasetOrdering::Error1);

        a.identity_of_receiver.clock_identity = IDENTITY_B;
        b.identity_of_receiver.clock_identity = IDENTITY_C;
        assert_eq!(a.compare(&b), DatasetOrdering::WorseByTopology);
        assert_eq!(b.compare(&a), DatasetOrdering::BetterByTopology);

        b.steps_removed = 2;
        assert_eq!(a.compare(&b), DatasetOrdering::Better);
        assert_eq!(b.compare(&a), DatasetOrdering::Worse);
    }
}
