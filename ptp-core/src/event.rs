//! Hardware events waiting for the control loop.
//!
//! Timestamp and alarm interrupts only enqueue; the next
//! [`PtpSystem::tick`](crate::PtpSystem::tick) drains the queue in arrival
//! order. The queue is bounded and refuses events when full instead of
//! growing.

use std::collections::VecDeque;

use arrayvec::ArrayString;
use tracing::warn;

use crate::{
    error::{PtpError, Result},
    time::Timestamp,
    virtual_port::VirtualPortSample,
};

/// Events held before further ones are refused
pub const EVENT_QUEUE_CAPACITY: usize = 64;

/// Longest serial sentence accepted, NMEA allows 82 characters
pub const MAX_SENTENCE_LEN: usize = 96;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PtpEvent {
    /// An edge on the virtual port input of an instance
    VirtualPortTimestamp {
        instance: usize,
        sample: VirtualPortSample,
    },
    /// Loss of signal on the virtual port input of an instance
    VirtualPortAlarm { instance: usize },
    /// 1PPS edge on the RS422 input
    Rs422InputEdge { local: Timestamp },
    /// 1PPS edge leaving on the RS422 output
    Rs422OutputEdge { local: Timestamp },
    /// A serial time of day sentence from the RS422 interface
    Rs422Sentence {
        sentence: ArrayString<MAX_SENTENCE_LEN>,
    },
    /// Time of day received through PIM on the RS422 switch port
    PimTimeOfDay { reference: Timestamp },
}

#[derive(Debug)]
pub struct EventQueue {
    events: VecDeque<PtpEvent>,
    dropped: u64,
}

impl Default for EventQueue {
    fn default() -> Self {
        Self {
            events: VecDeque::with_capacity(EVENT_QUEUE_CAPACITY),
            dropped: 0,
        }
    }
}

impl EventQueue {
    pub fn push(&mut self, event: PtpEvent) -> Result<()> {
        if self.events.len() >= EVENT_QUEUE_CAPACITY {
            self.dropped += 1;
            warn!(dropped = self.dropped, "event queue full, dropping event");
            return Err(PtpError::EventQueueFull);
        }
        self.events.push_back(event);
        Ok(())
    }

    /// Take every queued event, oldest first
    pub fn drain(&mut self) -> impl Iterator<Item = PtpEvent> + '_ {
        self.events.drain(..)
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Events refused because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bounded_and_ordered() {
        let mut queue = EventQueue::default();
        for instance in 0..EVENT_QUEUE_CAPACITY {
            queue.push(PtpEvent::VirtualPortAlarm { instance }).unwrap();
        }
        assert_eq!(
            queue.push(PtpEvent::VirtualPortAlarm { instance: 0 }),
            Err(PtpError::EventQueueFull)
        );
        assert_eq!(queue.dropped(), 1);

        let drained: Vec<_> = queue.drain().collect();
        assert_eq!(drained.len(), EVENT_QUEUE_CAPACITY);
        assert_eq!(drained[1], PtpEvent::VirtualPortAlarm { instance: 1 });
        assert!(queue.is_empty());
    }
}
