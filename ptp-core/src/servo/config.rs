use serde::{Deserialize, Serialize};

use crate::{
    datastructures::Profile,
    error::{PtpError, Result},
};

/// How the servo output reaches the clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServoOption {
    /// Always steer the frequency
    #[default]
    Free,
    /// Frequency comes from SyncE; small offsets are removed by phase steps
    Synce,
}

/// Tuning of the PID servo of one instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct ServoConfig {
    pub display_stats: bool,
    pub p_reg: bool,
    pub i_reg: bool,
    pub d_reg: bool,
    pub ap: u32,
    pub ai: u32,
    pub ad: u32,
    pub gain: u32,
    pub srv_option: ServoOption,
    /// Offset in ns above which a SyncE locked servo still steers frequency
    pub synce_threshold: u32,
    pub synce_ap: u32,
    /// Number of adjustments averaged into the holdover frequency
    pub ho_filter: u32,
    /// Largest deviation from the holdover average, in 0.01 ppb, for an
    /// adjustment to count as stable
    pub stable_adj_threshold: u32,
}

impl ServoConfig {
    pub fn for_profile(profile: Profile) -> Self {
        let (ap, ai, ad) = if profile.is_g8275() {
            (12, 512, 7)
        } else {
            (3, 80, 40)
        };

        Self {
            display_stats: false,
            p_reg: true,
            i_reg: true,
            d_reg: true,
            ap,
            ai,
            ad,
            gain: 1,
            srv_option: ServoOption::Free,
            synce_threshold: 1000,
            synce_ap: 2,
            ho_filter: 60,
            stable_adj_threshold: 300,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.ap == 0 || self.ai == 0 || self.ad == 0 {
            return Err(PtpError::InvalidParameter("ap, ai and ad must be at least 1"));
        }
        if self.gain == 0 {
            return Err(PtpError::InvalidParameter("gain must be at least 1"));
        }
        if !(1..=1000).contains(&self.ho_filter) {
            return Err(PtpError::InvalidParameter("ho-filter must be in 1..=1000"));
        }
        Ok(())
    }
}

impl Default for ServoConfig {
    fn default() -> Self {
        Self::for_profile(Profile::default())
    }
}

/// Offset thresholds, in nanoseconds, of the slave clock states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct SlaveConfig {
    /// Largest change between consecutive offsets that counts as stable
    pub stable_offset: u32,
    /// Offset below which the clock becomes phase locked
    pub offset_ok: u32,
    /// Offset above which a phase locked clock loses lock
    pub offset_fail: u32,
}

impl Default for SlaveConfig {
    fn default() -> Self {
        Self {
            stable_offset: 1000,
            offset_ok: 100,
            offset_fail: 1000,
        }
    }
}

impl SlaveConfig {
    pub fn validate(&self) -> Result<()> {
        if self.offset_fail < self.offset_ok {
            return Err(PtpError::InvalidParameter("offset-fail below offset-ok"));
        }
        Ok(())
    }
}
