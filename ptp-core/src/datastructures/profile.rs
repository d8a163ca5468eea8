use serde::{Deserialize, Serialize};

/// PTP profile an instance runs, selecting default data sets and servo tuning
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Profile {
    NoProfile,
    #[default]
    Ieee1588,
    #[serde(rename = "g8265.1")]
    G8265_1,
    #[serde(rename = "g8275.1")]
    G8275_1,
    #[serde(rename = "g8275.2")]
    G8275_2,
    #[serde(rename = "802.1as")]
    Ieee802_1AS,
    #[serde(rename = "aed-802.1as")]
    Aed802_1AS,
}

impl Profile {
    pub fn is_g8275(&self) -> bool {
        matches!(self, Profile::G8275_1 | Profile::G8275_2)
    }

    pub fn is_802_1as(&self) -> bool {
        matches!(self, Profile::Ieee802_1AS | Profile::Aed802_1AS)
    }

    /// Telecom profiles use `localPriority` in the best master comparison
    pub fn uses_local_priority(&self) -> bool {
        self.is_g8275()
    }

    pub fn default_priority1(&self) -> u8 {
        match self {
            Profile::G8275_1 | Profile::G8275_2 => 128,
            Profile::Ieee802_1AS | Profile::Aed802_1AS => 246,
            _ => 128,
        }
    }

    pub fn default_domain(&self) -> u8 {
        match self {
            Profile::G8265_1 => 4,
            Profile::G8275_1 => 24,
            Profile::G8275_2 => 44,
            _ => 0,
        }
    }
}
