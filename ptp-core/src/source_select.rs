//! Board wide choice between the SyncE (electrical) and the packet
//! reference.
//!
//! Without the `synce` feature the selection is fixed to "none" and
//! electrical references are refused.

use serde::{Deserialize, Serialize};
#[cfg(feature = "synce")]
use tracing::info;

use crate::error::{PtpError, Result};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SynceSourceKind {
    #[default]
    None,
    Electrical,
    Packet,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SynceSourceSelection {
    #[serde(rename = "type")]
    pub kind: SynceSourceKind,
    /// Electrical input or packet instance index
    pub reference: u32,
}

impl SynceSourceSelection {
    /// The electrical input in use, if any
    pub fn electrical(&self) -> Option<u32> {
        (self.kind == SynceSourceKind::Electrical).then_some(self.reference)
    }
}

#[derive(Debug, Default)]
pub struct SourceSelector {
    #[cfg_attr(not(feature = "synce"), allow(dead_code))]
    selected: SynceSourceSelection,
}

impl SourceSelector {
    pub fn enabled() -> bool {
        cfg!(feature = "synce")
    }

    #[cfg(feature = "synce")]
    pub fn set(&mut self, selection: SynceSourceSelection) -> Result<()> {
        if selection.kind == SynceSourceKind::None && selection.reference != 0 {
            return Err(PtpError::InvalidParameter("no reference index without a source"));
        }
        if self.selected != selection {
            info!(kind = ?selection.kind, reference = selection.reference, "selected source changed");
        }
        self.selected = selection;
        Ok(())
    }

    #[cfg(not(feature = "synce"))]
    pub fn set(&mut self, _selection: SynceSourceSelection) -> Result<()> {
        Err(PtpError::Unsupported("synce"))
    }

    #[cfg(feature = "synce")]
    pub fn get(&self) -> SynceSourceSelection {
        self.selected
    }

    /// Fixed "disabled" status
    #[cfg(not(feature = "synce"))]
    pub fn get(&self) -> SynceSourceSelection {
        SynceSourceSelection::default()
    }
}
