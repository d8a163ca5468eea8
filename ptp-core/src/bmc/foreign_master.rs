//! Implementation of the [ForeignMasterList]

use arrayvec::ArrayVec;
use serde::{Deserialize, Serialize};

use crate::{
    datastructures::{ClockIdentity, ClockQuality, PortIdentity, TimePropertiesDS},
    time::Duration,
};

/// The time window in which announce messages are valid, in announce
/// intervals of the receiving port
const FOREIGN_MASTER_TIME_WINDOW: u16 = 4;

/// Announce messages a foreign master must have sent within the time window
/// before it is qualified
const FOREIGN_MASTER_THRESHOLD: usize = 2;

const MAX_ANNOUNCE_MESSAGES: usize = 8;

const MAX_FOREIGN_MASTERS: usize = 8;

/// Highest number of entries kept in a path trace
pub const MAX_PATH_TRACE: usize = 179;

/// The fields of a received announce message that take part in source
/// selection. Parsing the message itself happens before the core.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnnounceInfo {
    pub source_port_identity: PortIdentity,
    pub sequence_id: u16,
    pub grandmaster_priority_1: u8,
    pub grandmaster_clock_quality: ClockQuality,
    pub grandmaster_priority_2: u8,
    pub grandmaster_identity: ClockIdentity,
    pub steps_removed: u16,
    pub time_properties: TimePropertiesDS,
    pub path_trace: Vec<ClockIdentity>,
}

#[derive(Debug)]
struct ForeignAnnounceMessage {
    message: AnnounceInfo,
    age: Duration,
}

#[derive(Debug)]
struct ForeignMaster {
    port_identity: PortIdentity,
    // Must have a capacity of at least FOREIGN_MASTER_THRESHOLD
    announce_messages: ArrayVec<ForeignAnnounceMessage, MAX_ANNOUNCE_MESSAGES>,
}

impl ForeignMaster {
    fn new(message: AnnounceInfo) -> Self {
        let mut announce_messages = ArrayVec::new();
        let port_identity = message.source_port_identity;
        announce_messages.push(ForeignAnnounceMessage {
            message,
            age: Duration::ZERO,
        });

        Self {
            port_identity,
            announce_messages,
        }
    }

    /// Returns true when no message is left within `window`
    fn purge_old_messages(&mut self, window: Duration) -> bool {
        self.announce_messages.retain(|m| m.age < window);
        self.announce_messages.is_empty()
    }

    fn register(&mut self, message: AnnounceInfo, window: Duration) {
        self.purge_old_messages(window);

        let new_message = ForeignAnnounceMessage {
            message,
            age: Duration::ZERO,
        };

        if let Err(e) = self.announce_messages.try_push(new_message) {
            self.announce_messages.remove(0);
            self.announce_messages.push(e.element());
        }
    }

    fn is_qualified(&self) -> bool {
        self.announce_messages.len() >= FOREIGN_MASTER_THRESHOLD
    }

    fn latest(&self) -> Option<&AnnounceInfo> {
        self.announce_messages.last().map(|m| &m.message)
    }
}

/// The foreign masters heard on one port of one clock instance
#[derive(Debug)]
pub struct ForeignMasterList {
    foreign_masters: ArrayVec<ForeignMaster, MAX_FOREIGN_MASTERS>,
    window: Duration,
    own_identity: ClockIdentity,
}

impl ForeignMasterList {
    /// - `log_announce_interval`: announce interval of the receiving port
    /// - `own_identity`: identity of the instance, used to drop our own
    ///   messages looping back
    pub fn new(log_announce_interval: i8, own_identity: ClockIdentity) -> Self {
        Self {
            foreign_masters: ArrayVec::new(),
            window: Duration::from_log_interval(log_announce_interval)
                * FOREIGN_MASTER_TIME_WINDOW,
            own_identity,
        }
    }

    pub fn step_age(&mut self, step: Duration) {
        let window = self.window;
        for master in &mut self.foreign_masters {
            for message in &mut master.announce_messages {
                message.age += step;
            }
        }
        self.foreign_masters
            .retain(|master| !master.purge_old_messages(window));
    }

    /// The most recent announce of every qualified foreign master
    pub fn qualified_announces(&self) -> impl Iterator<Item = &AnnounceInfo> {
        self.foreign_masters
            .iter()
            .filter(|master| master.is_qualified())
            .filter_map(|master| master.latest())
    }

    pub fn register_announce(&mut self, message: AnnounceInfo) {
        if !self.is_announce_acceptable(&message) {
            return;
        }

        let window = self.window;
        let source = message.source_port_identity;
        if let Some(master) = self
            .foreign_masters
            .iter_mut()
            .find(|fm| fm.port_identity == source)
        {
            master.register(message, window);
        } else if !self.foreign_masters.is_full() {
            self.foreign_masters.push(ForeignMaster::new(message));
        }
    }

    pub fn clear(&mut self) {
        self.foreign_masters.clear();
    }

    pub fn len(&self) -> usize {
        self.foreign_masters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.foreign_masters.is_empty()
    }

    fn is_announce_acceptable(&self, message: &AnnounceInfo) -> bool {
        let source_identity = message.source_port_identity;

        // our own announce looped back to us
        if source_identity.clock_identity == self.own_identity {
            return false;
        }

        // a path trace containing ourselves means a timing loop
        if message.path_trace.contains(&self.own_identity) {
            return false;
        }

        // must be newer than the last one of this master, modulo rollover
        if let Some(last) = self
            .foreign_masters
            .iter()
            .find(|fm| fm.port_identity == source_identity)
            .and_then(|fm| fm.latest())
        {
            let newer = message.sequence_id.wrapping_sub(last.sequence_id);
            if newer == 0 || newer > u16::MAX / 2 {
                return false;
            }
        }

        message.steps_removed < 255
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn announce(source: u8, sequence_id: u16, class: u8) -> AnnounceInfo {
        AnnounceInfo {
            source_port_identity: PortIdentity {
                clock_identity: ClockIdentity([source; 8]),
                port_number: 1,
            },
            sequence_id,
            grandmaster_priority_1: 128,
            grandmaster_clock_quality: ClockQuality {
                clock_class: class,
                ..Default::default()
            },
            grandmaster_priority_2: 128,
            grandmaster_identity: ClockIdentity([source; 8]),
            steps_removed: 0,
            time_properties: TimePropertiesDS::default(),
            path_trace: vec![ClockIdentity([source; 8])],
        }
    }

    const OWN: ClockIdentity = ClockIdentity([9; 8]);

    #[test]
    fn qualifies_after_threshold() {
        let mut list = ForeignMasterList::new(0, OWN);

        list.register_announce(announce(1, 0, 6));
        assert_eq!(list.qualified_announces().count(), 0);

        list.register_announce(announce(1, 1, 6));
        let qualified: Vec<_> = list.qualified_announces().collect();
        assert_eq!(qualified.len(), 1);
        assert_eq!(qualified[0].sequence_id, 1);
    }

    #[test]
    fn messages_age_out() {
        let mut list = ForeignMasterList::new(0, OWN);
        list.register_announce(announce(1, 0, 6));
        list.step_age(Duration::from_secs(2));
        list.register_announce(announce(1, 1, 6));
        assert_eq!(list.qualified_announces().count(), 1);

        // first message leaves the 4 second window
        list.step_age(Duration::from_secs(2));
        assert_eq!(list.qualified_announces().count(), 0);
        assert_eq!(list.len(), 1);

        list.step_age(Duration::from_secs(2));
        assert!(list.is_empty());
    }

    #[test]
    fn rejects_own_stale_and_looped_messages() {
        let mut list = ForeignMasterList::new(0, OWN);

        list.register_announce(announce(9, 0, 6));
        assert!(list.is_empty());

        let mut looped = announce(1, 0, 6);
        looped.path_trace.push(OWN);
        list.register_announce(looped);
        assert!(list.is_empty());

        list.register_announce(announce(1, 5, 6));
        list.register_announce(announce(1, 4, 6));
        list.register_announce(announce(1, 5, 6));
        assert_eq!(list.qualified_announces().count(), 0);

        // rollover counts as newer
        let mut list = ForeignMasterList::new(0, OWN);
        list.register_announce(announce(1, u16::MAX, 6));
        list.register_announce(announce(1, 0, 6));
        assert_eq!(list.qualified_announces().count(), 1);
    }
}
