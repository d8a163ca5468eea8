//! Counters and sample logs kept for diagnostics only.
//!
//! Nothing here feeds back into the control loop. Every `clear` is
//! idempotent and succeeds whether or not collection was ever enabled.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::{PtpError, Result},
    time::Duration,
};

/// Lines buffered for the debug log before the oldest are dropped
const DEBUG_LOG_BUFFER: usize = 1024;

/// Running min/max/mean of egress latencies, in nanoseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct EgressLatency {
    pub max: i64,
    pub min: i64,
    pub mean: i64,
    pub cnt: u32,
    #[serde(skip)]
    sum: i128,
}

/// Mean of `count` samples adding up to `sum`, rounded to the nearest
/// nanosecond
fn rounded_mean(sum: i128, count: u32) -> i64 {
    if count == 0 {
        return 0;
    }
    let count = count as i128;
    let half = count / 2;
    let mean = if sum >= 0 {
        (sum + half) / count
    } else {
        (sum - half) / count
    };
    mean.clamp(i64::MIN as i128, i64::MAX as i128) as i64
}

impl EgressLatency {
    pub fn observe(&mut self, latency: Duration) {
        let ns = latency.nanos_rounded();
        if self.cnt == u32::MAX {
            return;
        }
        if self.cnt == 0 {
            self.max = ns;
            self.min = ns;
        } else {
            self.max = self.max.max(ns);
            self.min = self.min.min(ns);
        }
        self.cnt += 1;
        self.sum += ns as i128;
        self.mean = rounded_mean(self.sum, self.cnt);
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// One delay direction of the slave statistics, in nanoseconds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct DelayStatistics {
    pub max: i64,
    pub min: i64,
    pub mean: i64,
    pub count: u32,
    pub cur: i64,
    #[serde(skip)]
    sum: i128,
}

impl DelayStatistics {
    fn record(&mut self, value: i64) {
        self.cur = value;
        if self.count == u32::MAX {
            return;
        }
        if self.count == 0 {
            self.max = value;
            self.min = value;
        } else {
            self.max = self.max.max(value);
            self.min = self.min.min(value);
        }
        self.count += 1;
        self.sum += value as i128;
        self.mean = rounded_mean(self.sum, self.count);
    }
}

/// Events counted by the slave statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlaveCounter {
    SyncRx,
    SyncTimeout,
    DelayReqTx,
    DelayRespRx,
    SyncSequenceError,
    FollowUpLoss,
    DelayRespSequenceError,
    DelayReqNotSaved,
    DelayReqInterruptNotReceived,
}

/// Snapshot of the slave statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct SlaveStatisticsSnapshot {
    pub enabled: bool,
    pub master_to_slave: DelayStatistics,
    pub slave_to_master: DelayStatistics,
    pub sync_rx: u32,
    pub sync_timeout: u32,
    pub delay_req_tx: u32,
    pub delay_resp_rx: u32,
    pub sync_seq_err: u32,
    pub follow_up_loss: u32,
    pub delay_resp_seq_err: u32,
    pub delay_req_not_saved: u32,
    pub delay_req_intr_not_rcvd: u32,
}

#[derive(Debug, Default)]
pub struct SlaveStatistics {
    data: SlaveStatisticsSnapshot,
}

impl SlaveStatistics {
    pub fn enable(&mut self, enable: bool) {
        self.data.enabled = enable;
    }

    pub fn is_enabled(&self) -> bool {
        self.data.enabled
    }

    /// Reset every counter, keeping the enable flag
    pub fn clear(&mut self) {
        let enabled = self.data.enabled;
        self.data = SlaveStatisticsSnapshot {
            enabled,
            ..Default::default()
        };
    }

    pub fn snapshot(&self) -> SlaveStatisticsSnapshot {
        self.data
    }

    pub fn master_to_slave(&mut self, delay: Duration) {
        if self.data.enabled {
            self.data.master_to_slave.record(delay.nanos_rounded());
        }
    }

    pub fn slave_to_master(&mut self, delay: Duration) {
        if self.data.enabled {
            self.data.slave_to_master.record(delay.nanos_rounded());
        }
    }

    pub fn count(&mut self, counter: SlaveCounter) {
        if !self.data.enabled {
            return;
        }
        let d = &mut self.data;
        let field = match counter {
            SlaveCounter::SyncRx => &mut d.sync_rx,
            SlaveCounter::SyncTimeout => &mut d.sync_timeout,
            SlaveCounter::DelayReqTx => &mut d.delay_req_tx,
            SlaveCounter::DelayRespRx => &mut d.delay_resp_rx,
            SlaveCounter::SyncSequenceError => &mut d.sync_seq_err,
            SlaveCounter::FollowUpLoss => &mut d.follow_up_loss,
            SlaveCounter::DelayRespSequenceError => &mut d.delay_resp_seq_err,
            SlaveCounter::DelayReqNotSaved => &mut d.delay_req_not_saved,
            SlaveCounter::DelayReqInterruptNotReceived => &mut d.delay_req_intr_not_rcvd,
        };
        *field = field.saturating_add(1);
    }
}

/// 1PPS and time of day counters of the external time interface
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct OnePpsTodStatistics {
    pub tod_cnt: u32,
    pub one_pps_cnt: u32,
    pub missed_one_pps_cnt: u32,
    pub missed_tod_rx_cnt: u32,
}

impl OnePpsTodStatistics {
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}

/// Debug log settings of one instance
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields, default)]
pub struct DebugLogMode {
    /// 0 off, 1 offset, 2 delay, 3 offset and delay, 4 adds the frequency
    pub debug_mode: u8,
    /// Write samples to the log file instead of the trace output
    pub file_open: bool,
    /// Keep steering the clock while logging
    pub keep_control: bool,
    /// Session length in seconds, 0 for unlimited
    pub log_time: u32,
    /// Seconds left in the session, reported only
    pub time_left: u32,
}

/// One servo sample as written to the debug log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DebugSample {
    pub sequence: u64,
    pub offset: Duration,
    pub delay: Duration,
    pub adjustment_ppb: f64,
}

#[derive(Debug, Default)]
pub struct DebugLog {
    mode: DebugLogMode,
    lines: VecDeque<String>,
    sequence: u64,
    delete_requested: bool,
}

impl DebugLog {
    pub fn mode(&self) -> DebugLogMode {
        self.mode
    }

    pub fn set_mode(&mut self, mut mode: DebugLogMode) -> Result<()> {
        if mode.debug_mode > 4 {
            return Err(PtpError::InvalidParameter("debug mode must be 0..=4"));
        }
        mode.time_left = mode.log_time;
        if mode.debug_mode != 0 {
            info!(mode = mode.debug_mode, file = mode.file_open, "debug log started");
        }
        self.mode = mode;
        self.sequence = 0;
        Ok(())
    }

    pub fn is_active(&self) -> bool {
        self.mode.debug_mode != 0
    }

    /// Whether servo output may be applied to the clock
    pub fn keeps_control(&self) -> bool {
        !self.is_active() || self.mode.keep_control
    }

    /// Advance the session timer by one second
    pub fn second_elapsed(&mut self) {
        if !self.is_active() || self.mode.log_time == 0 {
            return;
        }
        self.mode.time_left = self.mode.time_left.saturating_sub(1);
        if self.mode.time_left == 0 {
            info!("debug log session ended");
            self.mode.debug_mode = 0;
        }
    }

    pub fn record(&mut self, offset: Duration, delay: Duration, adjustment_ppb: f64) {
        if !self.is_active() {
            return;
        }
        self.sequence += 1;
        let sample = DebugSample {
            sequence: self.sequence,
            offset,
            delay,
            adjustment_ppb,
        };
        let line = self.format(&sample);

        if !self.mode.file_open {
            info!(target: "ptp::debug_log", "{line}");
            return;
        }
        if self.lines.len() == DEBUG_LOG_BUFFER {
            warn!("debug log buffer full, dropping oldest sample");
            self.lines.pop_front();
        }
        self.lines.push_back(line);
    }

    fn format(&self, s: &DebugSample) -> String {
        let offset = s.offset.nanos_rounded();
        let delay = s.delay.nanos_rounded();
        match self.mode.debug_mode {
            1 => format!("{},{}", s.sequence, offset),
            2 => format!("{},{}", s.sequence, delay),
            3 => format!("{},{},{}", s.sequence, offset, delay),
            _ => format!("{},{},{},{:.3}", s.sequence, offset, delay, s.adjustment_ppb),
        }
    }

    /// Lines waiting to be written to the log file
    pub fn take_lines(&mut self) -> Vec<String> {
        self.lines.drain(..).collect()
    }

    /// Ask the writer to remove the log file
    pub fn delete(&mut self) {
        self.lines.clear();
        self.delete_requested = true;
    }

    pub fn take_delete_request(&mut self) -> bool {
        std::mem::take(&mut self.delete_requested)
    }
}
