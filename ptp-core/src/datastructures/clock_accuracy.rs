use core::cmp::Ordering;

use serde::{Deserialize, Serialize};

/// How accurate the clock is expected to be, as carried in `clockQuality`.
///
/// Converted to and from its one byte encoding so configuration files and
/// status output can use the numeric form operators know from the standard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum ClockAccuracy {
    Reserved,
    PS1,
    PS2_5,
    PS10,
    PS25,
    PS100,
    PS250,
    NS1,
    NS2_5,
    NS10,
    NS25,
    NS100,
    NS250,
    US1,
    US2_5,
    US10,
    US25,
    US100,
    US250,
    MS1,
    MS2_5,
    MS10,
    MS25,
    MS100,
    MS250,
    S1,
    S10,
    SGT10,
    ProfileSpecific(u8),
    #[default]
    Unknown,
}

const ENCODED: [(u8, ClockAccuracy); 27] = [
    (0x17, ClockAccuracy::PS1),
    (0x18, ClockAccuracy::PS2_5),
    (0x19, ClockAccuracy::PS10),
    (0x1a, ClockAccuracy::PS25),
    (0x1b, ClockAccuracy::PS100),
    (0x1c, ClockAccuracy::PS250),
    (0x1d, ClockAccuracy::NS1),
    (0x1e, ClockAccuracy::NS2_5),
    (0x1f, ClockAccuracy::NS10),
    (0x20, ClockAccuracy::NS25),
    (0x21, ClockAccuracy::NS100),
    (0x22, ClockAccuracy::NS250),
    (0x23, ClockAccuracy::US1),
    (0x24, ClockAccuracy::US2_5),
    (0x25, ClockAccuracy::US10),
    (0x26, ClockAccuracy::US25),
    (0x27, ClockAccuracy::US100),
    (0x28, ClockAccuracy::US250),
    (0x29, ClockAccuracy::MS1),
    (0x2a, ClockAccuracy::MS2_5),
    (0x2b, ClockAccuracy::MS10),
    (0x2c, ClockAccuracy::MS25),
    (0x2d, ClockAccuracy::MS100),
    (0x2e, ClockAccuracy::MS250),
    (0x2f, ClockAccuracy::S1),
    (0x30, ClockAccuracy::S10),
    (0x31, ClockAccuracy::SGT10),
];

impl ClockAccuracy {
    pub fn to_primitive(&self) -> u8 {
        match self {
            Self::Reserved => 0x00,
            Self::ProfileSpecific(value) => 0x80 + value,
            Self::Unknown => 0xfe,
            other => ENCODED
                .iter()
                .find(|(_, accuracy)| accuracy == other)
                .map(|(value, _)| *value)
                .unwrap_or(0xfe),
        }
    }

    pub fn from_primitive(value: u8) -> Self {
        match value {
            0x17..=0x31 => ENCODED[(value - 0x17) as usize].1,
            0x80..=0xfd => Self::ProfileSpecific(value - 0x80),
            0xfe => Self::Unknown,
            _ => Self::Reserved,
        }
    }

    /// Numeric ordering of the encoding; `Less` means more accurate
    pub fn cmp_numeric(&self, other: &Self) -> Ordering {
        self.to_primitive().cmp(&other.to_primitive())
    }
}

impl From<u8> for ClockAccuracy {
    fn from(value: u8) -> Self {
        Self::from_primitive(value)
    }
}

impl From<ClockAccuracy> for u8 {
    fn from(value: ClockAccuracy) -> Self {
        value.to_primitive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encoding_is_consistent() {
        for i in 0..=u8::MAX {
            let accuracy = ClockAccuracy::from_primitive(i);
            if !matches!(accuracy, ClockAccuracy::Reserved) {
                assert_eq!(accuracy.to_primitive(), i);
            }
        }

        assert_eq!(ClockAccuracy::from_primitive(0x21), ClockAccuracy::NS100);
        assert_eq!(ClockAccuracy::ProfileSpecific(5).to_primitive(), 0x85);
    }

    #[test]
    fn lower_encoding_is_more_accurate() {
        assert_eq!(
            ClockAccuracy::NS25.cmp_numeric(&ClockAccuracy::US1),
            Ordering::Less
        );
    }
}
