//! Data sets shared by the instances, the ports and the BMCA

mod clock_accuracy;
mod clock_identity;
mod clock_quality;
mod overrides;
mod port_identity;
mod profile;
mod time_properties;
mod time_source;

pub use clock_accuracy::ClockAccuracy;
pub use clock_identity::ClockIdentity;
pub use clock_quality::ClockQuality;
pub use overrides::{Attribute, AttributeValue, Overrides};
pub use port_identity::PortIdentity;
pub use profile::Profile;
pub use time_properties::{LeapType, TimePropertiesDS};
pub use time_source::TimeSource;
