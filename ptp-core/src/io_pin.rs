//! Ownership table of the physical timing pins.
//!
//! The pins are shared by three features: the main application (virtual port
//! inputs, station clock outputs, PHY synchronization), the RS422 interface
//! and the generic pin export. Each pin has exactly one owner at any time and
//! a pin can only be handed to a usage its board wiring supports.

use core::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::{
    error::{PtpError, Result},
    MAX_PTP_INSTANCES,
};

/// Largest number of timing pins any board exposes
pub const MAX_TS_IO_PINS: usize = 8;

/// Feature currently using a pin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinUsage {
    #[default]
    None,
    Main,
    Rs422,
    IoPin,
}

/// What a pin is asked to do for its owner
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinFunction {
    #[default]
    Disabled,
    Input,
    Output,
    PhySync,
}

/// One board capability of a pin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PinCapability {
    TimeIfIn,
    TimeIfOut,
    PinIn,
    PinOut,
    PhySync,
}

impl PinCapability {
    const fn bit(self) -> u8 {
        match self {
            PinCapability::TimeIfIn => 0x01,
            PinCapability::TimeIfOut => 0x02,
            PinCapability::PinIn => 0x04,
            PinCapability::PinOut => 0x08,
            PinCapability::PhySync => 0x10,
        }
    }
}

/// Board declared capability mask of a pin
#[derive(Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<PinCapability>", into = "Vec<PinCapability>")]
pub struct PinCapabilities(u8);

impl PinCapabilities {
    pub const NONE: Self = Self(0);
    pub const TIME_IF_IN: Self = Self(PinCapability::TimeIfIn.bit());
    pub const TIME_IF_OUT: Self = Self(PinCapability::TimeIfOut.bit());
    pub const PIN_IN: Self = Self(PinCapability::PinIn.bit());
    pub const PIN_OUT: Self = Self(PinCapability::PinOut.bit());
    pub const PHY_SYNC: Self = Self(PinCapability::PhySync.bit());

    const ALL: [PinCapability; 5] = [
        PinCapability::TimeIfIn,
        PinCapability::TimeIfOut,
        PinCapability::PinIn,
        PinCapability::PinOut,
        PinCapability::PhySync,
    ];

    pub const fn from_bits(bits: u8) -> Self {
        Self(bits & 0x1f)
    }

    pub const fn bits(&self) -> u8 {
        self.0
    }

    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub const fn intersects(&self, other: Self) -> bool {
        self.0 & other.0 != 0
    }

    pub const fn is_time_if_in(&self) -> bool {
        self.intersects(Self::TIME_IF_IN)
    }

    pub const fn is_time_if_out(&self) -> bool {
        self.intersects(Self::TIME_IF_OUT)
    }

    pub const fn is_pin_in(&self) -> bool {
        self.intersects(Self::PIN_IN)
    }

    pub const fn is_pin_out(&self) -> bool {
        self.intersects(Self::PIN_OUT)
    }

    pub const fn is_phy_sync(&self) -> bool {
        self.intersects(Self::PHY_SYNC)
    }
}

impl From<Vec<PinCapability>> for PinCapabilities {
    fn from(value: Vec<PinCapability>) -> Self {
        Self(value.into_iter().fold(0, |acc, cap| acc | cap.bit()))
    }
}

impl From<PinCapabilities> for Vec<PinCapability> {
    fn from(value: PinCapabilities) -> Self {
        PinCapabilities::ALL
            .into_iter()
            .filter(|cap| value.0 & cap.bit() != 0)
            .collect()
    }
}

impl fmt::Debug for PinCapabilities {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(Vec::<PinCapability>::from(*self))
            .finish()
    }
}

/// Capabilities of which at least one must be present for `usage` to drive a
/// pin as `function`
fn required_capabilities(usage: PinUsage, function: PinFunction) -> PinCapabilities {
    use PinCapabilities as C;
    match (usage, function) {
        (PinUsage::None, _) | (_, PinFunction::Disabled) => C::NONE,
        (PinUsage::Main, PinFunction::Input) => C::TIME_IF_IN.union(C::PIN_IN),
        (PinUsage::Main, PinFunction::Output) => C::TIME_IF_OUT.union(C::PIN_OUT),
        (PinUsage::Rs422, PinFunction::Input) => C::TIME_IF_IN,
        (PinUsage::Rs422, PinFunction::Output) => C::TIME_IF_OUT,
        (PinUsage::IoPin, PinFunction::Input) => C::PIN_IN,
        (PinUsage::IoPin, PinFunction::Output) => C::PIN_OUT,
        (_, PinFunction::PhySync) => C::PHY_SYNC,
    }
}

/// A pin index checked against the board, see [`IoPinManager::pin_id`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PinId(u8);

impl PinId {
    pub fn index(&self) -> u8 {
        self.0
    }
}

/// What board discovery reports for one pin
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct PinDescriptor {
    pub capabilities: PinCapabilities,
    #[serde(default)]
    pub interrupt_source: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct IoPin {
    pub id: PinId,
    pub capabilities: PinCapabilities,
    pub interrupt_source: u32,
    pub function: PinFunction,
    pub owner: PinUsage,
    pub instance: Option<usize>,
}

/// Owns every timing pin of the board
#[derive(Debug, Clone)]
pub struct IoPinManager {
    pins: Vec<IoPin>,
}

impl IoPinManager {
    /// Build the table from board discovery, one descriptor per pin index
    pub fn new(board: &[PinDescriptor]) -> Result<Self> {
        if board.len() > MAX_TS_IO_PINS {
            return Err(PtpError::InvalidParameter("board reports too many timing pins"));
        }

        let pins = board
            .iter()
            .enumerate()
            .map(|(index, descriptor)| IoPin {
                id: PinId(index as u8),
                capabilities: descriptor.capabilities,
                interrupt_source: descriptor.interrupt_source,
                function: PinFunction::Disabled,
                owner: PinUsage::None,
                instance: None,
            })
            .collect();

        Ok(Self { pins })
    }

    pub fn pin_count(&self) -> usize {
        self.pins.len()
    }

    /// Validate a raw pin index
    pub fn pin_id(&self, raw: u8) -> Result<PinId> {
        if (raw as usize) < self.pins.len() {
            Ok(PinId(raw))
        } else {
            Err(PtpError::InvalidIoPin(raw))
        }
    }

    pub fn get(&self, pin: PinId) -> Result<&IoPin> {
        self.pins
            .get(pin.0 as usize)
            .ok_or(PtpError::InvalidIoPin(pin.0))
    }

    fn get_mut(&mut self, pin: PinId) -> Result<&mut IoPin> {
        self.pins
            .get_mut(pin.0 as usize)
            .ok_or(PtpError::InvalidIoPin(pin.0))
    }

    pub fn pins(&self) -> impl Iterator<Item = &IoPin> {
        self.pins.iter()
    }

    /// Check that `usage` may take `pin` as `function` for `instance`, without
    /// changing anything
    pub fn check_assign(
        &self,
        pin: PinId,
        usage: PinUsage,
        function: PinFunction,
        instance: Option<usize>,
    ) -> Result<()> {
        let entry = self.get(pin)?;

        if usage == PinUsage::None {
            return Err(PtpError::InvalidParameter("pin usage none cannot be assigned"));
        }
        if let Some(instance) = instance.filter(|i| *i >= MAX_PTP_INSTANCES) {
            return Err(PtpError::InvalidInstance(instance));
        }

        let required = required_capabilities(usage, function);
        if required != PinCapabilities::NONE && !entry.capabilities.intersects(required) {
            return Err(PtpError::PinCapability { pin: pin.0, usage });
        }

        let owned_by_other = match entry.owner {
            PinUsage::None => false,
            owner if owner != usage => true,
            _ => entry.instance != instance,
        };
        if owned_by_other {
            return Err(PtpError::PinOwned {
                pin: pin.0,
                owner: entry.owner,
            });
        }

        Ok(())
    }

    /// Hand `pin` to `usage`. Re-assigning a pin to its current owner only
    /// updates the function.
    pub fn assign(
        &mut self,
        pin: PinId,
        usage: PinUsage,
        function: PinFunction,
        instance: Option<usize>,
    ) -> Result<()> {
        self.check_assign(pin, usage, function, instance)?;

        let entry = self.get_mut(pin)?;
        entry.owner = usage;
        entry.function = function;
        entry.instance = instance;
        info!(pin = pin.0, ?usage, ?function, ?instance, "io pin assigned");
        Ok(())
    }

    /// Give `pin` back. Releasing a free pin is a no-op, releasing a pin owned
    /// by another feature fails.
    pub fn release(&mut self, pin: PinId, usage: PinUsage) -> Result<()> {
        let entry = self.get(pin)?;
        match entry.owner {
            PinUsage::None => return Ok(()),
            owner if owner != usage => {
                return Err(PtpError::PinOwned {
                    pin: pin.0,
                    owner,
                })
            }
            _ => {}
        }

        let entry = self.get_mut(pin)?;
        entry.owner = PinUsage::None;
        entry.function = PinFunction::Disabled;
        entry.instance = None;
        debug!(pin = pin.0, ?usage, "io pin released");
        Ok(())
    }

    /// Releases the main application pins of an instance, used when it is
    /// deleted. Pins of the board wide features stay with their owner.
    pub fn release_instance(&mut self, instance: usize) {
        for entry in self
            .pins
            .iter_mut()
            .filter(|p| p.owner == PinUsage::Main && p.instance == Some(instance))
        {
            debug!(pin = entry.id.0, instance, "io pin released with its instance");
            entry.owner = PinUsage::None;
            entry.function = PinFunction::Disabled;
            entry.instance = None;
        }
    }
}
