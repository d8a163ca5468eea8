use serde::{Deserialize, Serialize};

use super::TimeSource;

/// Kind of leap second announced through `pending_leap`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LeapType {
    #[default]
    Leap59,
    Leap61,
}

/// The time properties data set distributed alongside a reference.
///
/// Virtual ports carry their own copy, set by the operator or derived from the
/// received time of day, which is adopted by the instance when the virtual
/// port is its selected source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct TimePropertiesDS {
    pub current_utc_offset: i16,
    pub current_utc_offset_valid: bool,
    pub leap59: bool,
    pub leap61: bool,
    pub time_traceable: bool,
    pub frequency_traceable: bool,
    pub ptp_timescale: bool,
    pub time_source: TimeSource,
    pub pending_leap: bool,
    /// Days since the epoch on which the pending leap second occurs
    pub leap_date: u16,
    pub leap_type: LeapType,
}

impl Default for TimePropertiesDS {
    fn default() -> Self {
        Self {
            current_utc_offset: 37,
            current_utc_offset_valid: false,
            leap59: false,
            leap61: false,
            time_traceable: false,
            frequency_traceable: false,
            ptp_timescale: true,
            time_source: TimeSource::InternalOscillator,
            pending_leap: false,
            leap_date: 0,
            leap_type: LeapType::Leap59,
        }
    }
}

impl TimePropertiesDS {
    /// Rejects a data set announcing both leap directions at once
    pub fn is_consistent(&self) -> bool {
        !(self.leap59 && self.leap61)
    }
}
