//! Correction field preparation for PHYs that timestamp one-step delay
//! requests themselves.
//!
//! When the PHY rather than the switch timestamps an outgoing delay request,
//! it adds its egress time to the correction field. The transmitter
//! pre-loads the field with the negated local transmit time in whatever
//! format the PHY generation expects, so that the sum becomes the residence
//! correction. Each generation gets its own [CorrectionFieldEncoder],
//! selected once per port.

use std::fmt::Debug;

use serde::{Deserialize, Serialize};

use crate::time::Timestamp;

/// Offset of the correction field in the PTP header
pub const CORRECTION_FIELD_OFFSET: usize = 8;

/// Offset of the reserved bytes that carry the ingress time in TC mode A
pub const RESERVED_FOR_TS_OFFSET: usize = 16;

const GEN_3_SECONDS_MASK: u64 = 0x3ffff;
const NANOS_PER_SEC: i64 = 1_000_000_000;

/// Fields to write into an outgoing delay request header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CorrectionFields {
    /// Correction in scaled nanoseconds (ns << 16), `None` leaves the
    /// field untouched
    pub correction: Option<i64>,
    /// Value of the 4 reserved header bytes, `None` leaves them untouched
    pub reserved: Option<u32>,
}

impl CorrectionFields {
    /// Write the fields into a PTP header; returns false when it is too short
    pub fn write_to(&self, header: &mut [u8]) -> bool {
        if header.len() < RESERVED_FOR_TS_OFFSET + 4 {
            return false;
        }
        if let Some(correction) = self.correction {
            header[CORRECTION_FIELD_OFFSET..CORRECTION_FIELD_OFFSET + 8]
                .copy_from_slice(&correction.to_be_bytes());
        }
        if let Some(reserved) = self.reserved {
            header[RESERVED_FOR_TS_OFFSET..RESERVED_FOR_TS_OFFSET + 4]
                .copy_from_slice(&reserved.to_be_bytes());
        }
        true
    }
}

pub trait CorrectionFieldEncoder: Debug + Send + Sync {
    fn encode(&self, tx_time: Timestamp) -> CorrectionFields;
}

/// Switch timestamping, the header is left as the switch prepared it
#[derive(Debug, Default)]
pub struct Gen2Encoder;

/// TC mode A: the transmit nanoseconds go to the reserved bytes
#[derive(Debug, Default)]
pub struct Gen2AEncoder;

/// TC mode C with the low 18 bits of the seconds above 30 bits of
/// nanoseconds
#[derive(Debug, Default)]
pub struct Gen3Encoder;

/// TC mode C with the full 48 bit nanosecond count
#[derive(Debug, Default)]
pub struct Gen3CEncoder;

impl CorrectionFieldEncoder for Gen2Encoder {
    fn encode(&self, _tx_time: Timestamp) -> CorrectionFields {
        CorrectionFields {
            correction: None,
            reserved: None,
        }
    }
}

impl CorrectionFieldEncoder for Gen2AEncoder {
    fn encode(&self, tx_time: Timestamp) -> CorrectionFields {
        CorrectionFields {
            correction: Some(0),
            reserved: Some(tx_time.nanos),
        }
    }
}

impl CorrectionFieldEncoder for Gen3Encoder {
    fn encode(&self, tx_time: Timestamp) -> CorrectionFields {
        let seconds = (tx_time.seconds & GEN_3_SECONDS_MASK) as i64;
        let nanos = seconds * NANOS_PER_SEC + tx_time.nanos as i64;
        CorrectionFields {
            correction: Some(nanos.wrapping_shl(16).wrapping_neg()),
            reserved: None,
        }
    }
}

impl CorrectionFieldEncoder for Gen3CEncoder {
    fn encode(&self, tx_time: Timestamp) -> CorrectionFields {
        let nanos = (tx_time.seconds as i64)
            .wrapping_mul(NANOS_PER_SEC)
            .wrapping_add(tx_time.nanos as i64);
        CorrectionFields {
            correction: Some(nanos.wrapping_shl(16).wrapping_neg()),
            reserved: None,
        }
    }
}

/// PHY generation behind a port, as reported by the board
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PhyCorrectionType {
    #[default]
    Gen2,
    Gen2A,
    Gen3,
    Gen3C,
}

impl PhyCorrectionType {
    pub fn encoder(self) -> Box<dyn CorrectionFieldEncoder> {
        match self {
            PhyCorrectionType::Gen2 => Box::new(Gen2Encoder),
            PhyCorrectionType::Gen2A => Box::new(Gen2AEncoder),
            PhyCorrectionType::Gen3 => Box::new(Gen3Encoder),
            PhyCorrectionType::Gen3C => Box::new(Gen3CEncoder),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TX: Timestamp = Timestamp::new(0x4_0001, 250);

    #[test]
    fn gen3_keeps_18_bits_of_seconds() {
        let fields = Gen3Encoder.encode(TX);
        assert_eq!(fields.correction, Some(-((NANOS_PER_SEC + 250) << 16)));
        assert_eq!(fields.reserved, None);
    }

    #[test]
    fn gen3c_uses_all_seconds() {
        let fields = Gen3CEncoder.encode(Timestamp::new(3, 250));
        assert_eq!(fields.correction, Some(-((3 * NANOS_PER_SEC + 250) << 16)));

        // wider than the gen 3 seconds field
        assert_ne!(Gen3CEncoder.encode(TX), Gen3Encoder.encode(TX));
    }

    #[test]
    fn gen2a_moves_nanos_to_reserved_bytes() {
        let fields = PhyCorrectionType::Gen2A.encoder().encode(TX);
        assert_eq!(fields.correction, Some(0));
        assert_eq!(fields.reserved, Some(250));

        let mut header = [0xaau8; 34];
        assert!(fields.write_to(&mut header));
        assert_eq!(&header[8..16], &[0; 8]);
        assert_eq!(&header[16..20], &250u32.to_be_bytes());
        assert!(!fields.write_to(&mut header[..10]));
    }

    #[test]
    fn gen2_leaves_the_header_alone() {
        let mut header = [0xaau8; 34];
        assert!(PhyCorrectionType::Gen2.encoder().encode(TX).write_to(&mut header));
        assert_eq!(header, [0xaa; 34]);
    }
}
