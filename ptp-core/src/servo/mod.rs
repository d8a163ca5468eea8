//! Servo and synchronization mode of one clock instance.
//!
//! The [ServoEngine] turns offsets of the selected reference into clock
//! corrections and decides, from the references presented to it, whether the
//! clock runs on the electrical reference, on packets, on both (hybrid) or
//! in holdover.

mod config;
mod pid;
mod slave;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

pub use config::{ServoConfig, ServoOption, SlaveConfig};
pub use pid::{PhaseLock, PidServo, ADJ_FREQ_MAX};
pub use slave::{SlaveClock, SlaveState};

use crate::{
    bmc::SourceId,
    datastructures::Profile,
    error::{PtpError, Result},
    source_select::SourceSelector,
    time::{Duration, Timestamp},
    TICKS_PER_SECOND,
};

/// Length of the transient when switching between packet and hybrid mode
pub const HYBRID_TRANSIENT_TICKS: u32 = 2 * TICKS_PER_SECOND;

/// Time in holdover before the stored frequency is reported as usable
pub const HOLDOVER_SETTLE_TICKS: u32 = TICKS_PER_SECOND;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServoMode {
    #[default]
    None,
    Hybrid,
    Electrical,
    Packet,
    Holdover,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HybridTransient {
    #[default]
    NotActive,
    /// Run on packets alone until the transient ends
    Quick,
    Optional,
}

/// What the clock should do after an engine update
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ServoAction {
    None,
    /// Set the frequency correction, in ppb
    Frequency(f64),
    /// Add this to the clock time
    Step(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ModeTransition {
    target: ServoMode,
    ticks_left: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct ServoStatus {
    pub mode: ServoMode,
    pub slave_state: SlaveState,
    pub holdover_ok: bool,
    /// Averaged frequency correction in ppb
    pub holdover_adj: f64,
    pub force_holdover: bool,
    pub hybrid_transient: HybridTransient,
    pub transition_target: Option<ServoMode>,
    pub active_ref: Option<SourceId>,
    pub active_electrical_ref: Option<u32>,
    /// Last offset from the reference in ns
    pub offset_from_master: i64,
}

#[derive(Debug)]
pub struct ServoEngine {
    profile: Profile,
    mode: ServoMode,
    slave: SlaveClock,
    force_holdover: bool,
    active_ref: Option<SourceId>,
    active_electrical: Option<u32>,
    hybrid_transient: HybridTransient,
    transition: Option<ModeTransition>,
    /// explicit packet/hybrid choice used when both references exist
    preferred: Option<ServoMode>,
    holdover_settle: u32,
    holdover_acquired_ok: bool,
}

impl ServoEngine {
    pub fn new(profile: Profile, servo: ServoConfig, slave: SlaveConfig) -> Self {
        Self {
            profile,
            mode: ServoMode::None,
            slave: SlaveClock::new(slave, PidServo::new(servo)),
            force_holdover: false,
            active_ref: None,
            active_electrical: None,
            hybrid_transient: HybridTransient::NotActive,
            transition: None,
            preferred: None,
            holdover_settle: 0,
            holdover_acquired_ok: false,
        }
    }

    pub fn mode(&self) -> ServoMode {
        self.mode
    }

    pub fn servo_config(&self) -> &ServoConfig {
        self.slave.pid().config()
    }

    pub fn set_servo_config(&mut self, config: ServoConfig) -> Result<()> {
        config.validate()?;
        self.slave.pid_mut().set_config(config);
        Ok(())
    }

    pub fn slave_config(&self) -> &SlaveConfig {
        self.slave.config()
    }

    pub fn set_slave_config(&mut self, config: SlaveConfig) -> Result<()> {
        config.validate()?;
        self.slave.set_config(config);
        Ok(())
    }

    pub fn set_profile(&mut self, profile: Profile) {
        self.profile = profile;
        if !profile.is_g8275() {
            self.hybrid_transient = HybridTransient::NotActive;
        }
    }

    pub fn slave_state(&self) -> SlaveState {
        self.slave.state()
    }

    fn set_mode(&mut self, mode: ServoMode) -> ServoAction {
        if self.mode == mode {
            return ServoAction::None;
        }
        info!(from = ?self.mode, to = ?mode, "servo mode changed");
        let previous = self.mode;
        self.mode = mode;

        match mode {
            ServoMode::Holdover => {
                self.transition = None;
                self.holdover_acquired_ok = self.slave.pid().holdover_ok();
                self.holdover_settle = HOLDOVER_SETTLE_TICKS;
                self.slave.enter_holdover();
                ServoAction::Frequency(self.slave.pid().holdover_frequency())
            }
            ServoMode::None => ServoAction::None,
            _ => {
                if matches!(previous, ServoMode::None | ServoMode::Holdover) {
                    self.slave.restart();
                }
                ServoAction::None
            }
        }
    }

    /// The mode the presented references call for
    fn wanted_mode(&self) -> ServoMode {
        if self.force_holdover {
            return ServoMode::Holdover;
        }
        match (self.active_electrical.is_some(), self.active_ref.is_some()) {
            (true, true) => match self.preferred {
                Some(ServoMode::Packet) => ServoMode::Packet,
                _ => ServoMode::Hybrid,
            },
            (true, false) => ServoMode::Electrical,
            (false, true) => ServoMode::Packet,
            (false, false) if self.mode == ServoMode::None => ServoMode::None,
            (false, false) => ServoMode::Holdover,
        }
    }

    fn reevaluate(&mut self) -> ServoAction {
        let wanted = self.wanted_mode();
        if let Some(transition) = self.transition {
            if transition.target == wanted {
                return ServoAction::None;
            }
            self.transition = None;
        }
        self.set_mode(wanted)
    }

    /// Switch the packet stream feeding the servo; `None` when the best
    /// master selection has no eligible source
    pub fn set_active_ref(&mut self, source: Option<SourceId>) -> ServoAction {
        if self.active_ref != source {
            debug!(?source, "active packet reference changed");
            self.active_ref = source;
        }
        self.reevaluate()
    }

    pub fn active_ref(&self) -> Option<SourceId> {
        self.active_ref
    }

    pub fn set_active_electrical_ref(&mut self, input: Option<u32>) -> Result<ServoAction> {
        if input.is_some() && !SourceSelector::enabled() {
            return Err(PtpError::Unsupported("synce"));
        }
        if self.active_electrical != input {
            debug!(?input, "active electrical reference changed");
            self.active_electrical = input;
        }
        Ok(self.reevaluate())
    }

    pub fn active_electrical_ref(&self) -> Option<u32> {
        self.active_electrical
    }

    fn start_transition(&mut self, target: ServoMode) -> Result<()> {
        if self.force_holdover || self.mode == ServoMode::Holdover {
            return Err(PtpError::InvalidState("servo is in holdover"));
        }
        self.preferred = Some(target);
        if self.mode == target {
            self.transition = None;
            return Ok(());
        }
        info!(from = ?self.mode, to = ?target, "servo mode transition started");
        self.transition = Some(ModeTransition {
            target,
            ticks_left: HYBRID_TRANSIENT_TICKS,
        });
        Ok(())
    }

    pub fn switch_to_packet_mode(&mut self) -> Result<()> {
        if self.active_ref.is_none() {
            return Err(PtpError::InvalidState("no packet reference"));
        }
        self.start_transition(ServoMode::Packet)
    }

    pub fn switch_to_hybrid_mode(&mut self) -> Result<()> {
        if !SourceSelector::enabled() {
            return Err(PtpError::Unsupported("synce"));
        }
        if self.active_ref.is_none() || self.active_electrical.is_none() {
            return Err(PtpError::InvalidState("hybrid mode needs both references"));
        }
        self.start_transition(ServoMode::Hybrid)
    }

    /// Mode the engine is moving to, if a transition is running
    pub fn transition_target(&self) -> Option<ServoMode> {
        self.transition.map(|t| t.target)
    }

    /// Returns whether the request was honoured: only telecom profiles in
    /// hybrid mode use the transient
    pub fn set_hybrid_transient(&mut self, transient: HybridTransient) -> bool {
        if !self.profile.is_g8275() || self.mode != ServoMode::Hybrid {
            debug!(?transient, "hybrid transient ignored");
            return false;
        }
        if self.hybrid_transient != transient {
            info!(?transient, "hybrid transient changed");
        }
        self.hybrid_transient = transient;
        true
    }

    pub fn hybrid_transient(&self) -> HybridTransient {
        self.hybrid_transient
    }

    pub fn force_holdover_set(&mut self, force: bool) -> ServoAction {
        self.force_holdover = force;
        if force {
            self.set_mode(ServoMode::Holdover)
        } else {
            info!("forced holdover released");
            ServoAction::None
        }
    }

    pub fn force_holdover_get(&self) -> bool {
        self.force_holdover
    }

    /// Whether the stored holdover frequency can be trusted.
    ///
    /// Right after entering holdover this is false; once the settle time
    /// has passed it reports whether enough history was gathered before.
    pub fn holdover_status(&self) -> bool {
        if self.mode == ServoMode::Holdover {
            self.holdover_settle == 0 && self.holdover_acquired_ok
        } else {
            self.slave.pid().holdover_ok()
        }
    }

    /// One offset measurement of the active packet reference
    pub fn packet_sample(&mut self, offset: Duration, at: Timestamp) -> ServoAction {
        let packet_running = match self.mode {
            ServoMode::Packet | ServoMode::Hybrid => true,
            // the packet loop takes over during the transient
            ServoMode::Electrical => self.transition_target() == Some(ServoMode::Packet),
            ServoMode::None | ServoMode::Holdover => false,
        };
        if !packet_running {
            return ServoAction::None;
        }

        // in hybrid the frequency comes from the electrical reference
        let hold_integral = self.mode == ServoMode::Hybrid
            && !(self.profile.is_g8275() && self.hybrid_transient == HybridTransient::Quick)
            && self.transition_target() != Some(ServoMode::Packet);
        self.slave.sample(offset, at, hold_integral)
    }

    pub fn last_offset(&self) -> Duration {
        self.slave.last_offset()
    }

    /// Advance the transient and holdover timers
    pub fn tick(&mut self) -> ServoAction {
        if self.mode == ServoMode::Holdover && self.holdover_settle > 0 {
            self.holdover_settle -= 1;
            if self.holdover_settle == 0 {
                debug!(ok = self.holdover_acquired_ok, "holdover settled");
            }
        }

        let Some(transition) = self.transition.as_mut() else {
            return ServoAction::None;
        };
        transition.ticks_left = transition.ticks_left.saturating_sub(1);
        if transition.ticks_left > 0 {
            return ServoAction::None;
        }

        let target = transition.target;
        self.transition = None;
        if self.wanted_mode() != target {
            warn!(?target, "references changed during transition, mode kept");
            return self.reevaluate();
        }
        self.set_mode(target)
    }

    /// Drop all servo state; the engine is left in mode NONE
    pub fn clear(&mut self) {
        info!("servo cleared");
        self.slave.clear();
        self.mode = ServoMode::None;
        self.force_holdover = false;
        self.active_ref = None;
        self.active_electrical = None;
        self.hybrid_transient = HybridTransient::NotActive;
        self.transition = None;
        self.preferred = None;
        self.holdover_settle = 0;
        self.holdover_acquired_ok = false;
    }

    pub fn status(&self) -> ServoStatus {
        ServoStatus {
            mode: self.mode,
            slave_state: self.slave.state(),
            holdover_ok: self.holdover_status(),
            holdover_adj: pid::to_ppb(self.slave.pid().adj_average()),
            force_holdover: self.force_holdover,
            hybrid_transient: self.hybrid_transient,
            transition_target: self.transition_target(),
            active_ref: self.active_ref,
            active_electrical_ref: self.active_electrical,
            offset_from_master: self.slave.last_offset().nanos_rounded(),
        }
    }
}
