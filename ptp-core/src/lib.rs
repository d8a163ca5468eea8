//! Synchronization core of a multi-instance PTP clock.
//!
//! The crate elects a time reference for every clock instance among its
//! Ethernet ports and a virtual port fed by a physical timing pin (1PPS,
//! RS422, SMA), steers the local clock towards it with a servo and keeps the
//! clock in holdover when no reference is left.
//!
//! The entry point is [`system::PtpSystem`], which owns all instances, the IO
//! pin table and the RS422 interface and is driven by a periodic
//! [`system::PtpSystem::tick`] at [`TICKS_PER_SECOND`].

pub mod bmc;
pub mod calibration;
pub mod clock;
pub mod config;
pub mod datastructures;
pub mod error;
pub mod event;
pub mod instance;
pub mod io_pin;
pub mod nmea;
pub mod phy_corr;
pub mod rs422;
pub mod servo;
pub mod source_select;
pub mod statistics;
pub mod system;
pub mod time;
pub mod virtual_port;
pub mod wireless;

pub use error::{PtpError, Result};
pub use system::PtpSystem;

/// Number of independent clock instances (timing domains)
pub const MAX_PTP_INSTANCES: usize = 4;

/// A physical port can take part in at most this many clock instances
pub const MAX_INSTANCES_PER_PORT: usize = 2;

/// Rate of the control loop tick
pub const TICKS_PER_SECOND: u32 = 128;

/// Silence on an active virtual port for this many ticks raises its alarm
pub const VIRTUAL_PORT_ALARM_TIME: u32 = 10 * TICKS_PER_SECOND;

/// log2 of the sync interval used in internal mode
pub const DEFAULT_INTERNAL_MODE_SYNC_RATE: i8 = -3;

/// Marker for "no IO pin" in pin configuration fields
pub const IO_PIN_UNUSED: u8 = 0x80;
