use serde::{Deserialize, Serialize};

use super::{ClockAccuracy, ClockIdentity};

/// An attribute of a data set that the operator can pin to a fixed value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Attribute {
    ClockClass,
    ClockAccuracy,
    ClockVariance,
    LocalPriority,
    Priority1,
    Priority2,
    ClockIdentity,
    StepsRemoved,
}

/// A value for one [Attribute]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AttributeValue {
    ClockClass(u8),
    ClockAccuracy(ClockAccuracy),
    ClockVariance(u16),
    LocalPriority(u8),
    Priority1(u8),
    Priority2(u8),
    ClockIdentity(ClockIdentity),
    StepsRemoved(u16),
}

impl AttributeValue {
    pub fn attribute(&self) -> Attribute {
        match self {
            AttributeValue::ClockClass(_) => Attribute::ClockClass,
            AttributeValue::ClockAccuracy(_) => Attribute::ClockAccuracy,
            AttributeValue::ClockVariance(_) => Attribute::ClockVariance,
            AttributeValue::LocalPriority(_) => Attribute::LocalPriority,
            AttributeValue::Priority1(_) => Attribute::Priority1,
            AttributeValue::Priority2(_) => Attribute::Priority2,
            AttributeValue::ClockIdentity(_) => Attribute::ClockIdentity,
            AttributeValue::StepsRemoved(_) => Attribute::StepsRemoved,
        }
    }
}

/// Operator overrides; an unset field follows the computed default, so
/// clearing never leaves a stale value behind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct Overrides {
    pub clock_class: Option<u8>,
    pub clock_accuracy: Option<ClockAccuracy>,
    pub clock_variance: Option<u16>,
    pub local_priority: Option<u8>,
    pub priority1: Option<u8>,
    pub priority2: Option<u8>,
    pub clock_identity: Option<ClockIdentity>,
    pub steps_removed: Option<u16>,
}

impl Overrides {
    pub fn set(&mut self, value: AttributeValue) {
        match value {
            AttributeValue::ClockClass(v) => self.clock_class = Some(v),
            AttributeValue::ClockAccuracy(v) => self.clock_accuracy = Some(v),
            AttributeValue::ClockVariance(v) => self.clock_variance = Some(v),
            AttributeValue::LocalPriority(v) => self.local_priority = Some(v),
            AttributeValue::Priority1(v) => self.priority1 = Some(v),
            AttributeValue::Priority2(v) => self.priority2 = Some(v),
            AttributeValue::ClockIdentity(v) => self.clock_identity = Some(v),
            AttributeValue::StepsRemoved(v) => self.steps_removed = Some(v),
        }
    }

    /// Clearing an attribute that is not overridden does nothing
    pub fn clear(&mut self, attribute: Attribute) {
        match attribute {
            Attribute::ClockClass => self.clock_class = None,
            Attribute::ClockAccuracy => self.clock_accuracy = None,
            Attribute::ClockVariance => self.clock_variance = None,
            Attribute::LocalPriority => self.local_priority = None,
            Attribute::Priority1 => self.priority1 = None,
            Attribute::Priority2 => self.priority2 = None,
            Attribute::ClockIdentity => self.clock_identity = None,
            Attribute::StepsRemoved => self.steps_removed = None,
        }
    }

    pub fn get(&self, attribute: Attribute) -> Option<AttributeValue> {
        match attribute {
            Attribute::ClockClass => self.clock_class.map(AttributeValue::ClockClass),
            Attribute::ClockAccuracy => self.clock_accuracy.map(AttributeValue::ClockAccuracy),
            Attribute::ClockVariance => self.clock_variance.map(AttributeValue::ClockVariance),
            Attribute::LocalPriority => self.local_priority.map(AttributeValue::LocalPriority),
            Attribute::Priority1 => self.priority1.map(AttributeValue::Priority1),
            Attribute::Priority2 => self.priority2.map(AttributeValue::Priority2),
            Attribute::ClockIdentity => self.clock_identity.map(AttributeValue::ClockIdentity),
            Attribute::StepsRemoved => self.steps_removed.map(AttributeValue::StepsRemoved),
        }
    }
}
