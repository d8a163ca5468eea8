use core::{fmt, str::FromStr};

use hex::FromHex;
use serde::{de::Error, Deserialize, Deserializer, Serialize, Serializer};

/// The EUI-64 identity of a PTP clock.
///
/// Displayed and parsed as eight colon separated hex octets
/// (`00:11:22:ff:fe:33:44:55`); parsing also accepts `-` separators and the
/// plain 16 digit form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, PartialOrd, Ord, Hash)]
pub struct ClockIdentity(pub [u8; 8]);

impl ClockIdentity {
    /// Identity derived from a 48 bit MAC address by inserting `ff:fe`
    pub fn from_mac_address(mac: [u8; 6]) -> Self {
        Self([mac[0], mac[1], mac[2], 0xff, 0xfe, mac[3], mac[4], mac[5]])
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParseClockIdentityError(hex::FromHexError);

impl fmt::Display for ParseClockIdentityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid clock identity: {}", self.0)
    }
}

impl std::error::Error for ParseClockIdentityError {}

impl FromStr for ClockIdentity {
    type Err = ParseClockIdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits: String = s.chars().filter(|c| !matches!(c, ':' | '-')).collect();
        <[u8; 8]>::from_hex(digits)
            .map(ClockIdentity)
            .map_err(ParseClockIdentityError)
    }
}

impl fmt::Display for ClockIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, octet) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(":")?;
            }
            write!(f, "{octet:02x}")?;
        }
        Ok(())
    }
}

impl Serialize for ClockIdentity {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ClockIdentity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw: String = Deserialize::deserialize(deserializer)?;
        raw.parse().map_err(D::Error::custom)
    }
}
