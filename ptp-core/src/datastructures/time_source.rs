use serde::{Deserialize, Serialize};

/// Root source of the time distributed by a grandmaster
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "u8", into = "u8")]
pub enum TimeSource {
    AtomicClock,
    Gnss,
    TerrestrialRadio,
    SerialTimeCode,
    Ptp,
    Ntp,
    HandSet,
    Other,
    #[default]
    InternalOscillator,
    ProfileSpecific(u8),
    Reserved,
    Unknown(u8),
}

impl TimeSource {
    pub fn to_primitive(&self) -> u8 {
        match self {
            Self::AtomicClock => 0x10,
            Self::Gnss => 0x20,
            Self::TerrestrialRadio => 0x30,
            Self::SerialTimeCode => 0x39,
            Self::Ptp => 0x40,
            Self::Ntp => 0x50,
            Self::HandSet => 0x60,
            Self::Other => 0x90,
            Self::InternalOscillator => 0xa0,
            Self::ProfileSpecific(p) => 0xf0 + *p,
            Self::Reserved => 0xff,
            Self::Unknown(v) => *v,
        }
    }

    pub fn from_primitive(value: u8) -> Self {
        match value {
            0x10 => Self::AtomicClock,
            0x20 => Self::Gnss,
            0x30 => Self::TerrestrialRadio,
            0x39 => Self::SerialTimeCode,
            0x40 => Self::Ptp,
            0x50 => Self::Ntp,
            0x60 => Self::HandSet,
            0x90 => Self::Other,
            0xa0 => Self::InternalOscillator,
            0xf0..=0xfe => Self::ProfileSpecific(value - 0xf0),
            0xff => Self::Reserved,
            v => Self::Unknown(v),
        }
    }
}

impl From<u8> for TimeSource {
    fn from(value: u8) -> Self {
        Self::from_primitive(value)
    }
}

impl From<TimeSource> for u8 {
    fn from(value: TimeSource) -> Self {
        value.to_primitive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_value_survives() {
        for i in 0..=u8::MAX {
            assert_eq!(TimeSource::from_primitive(i).to_primitive(), i);
        }
    }
}
