use std::time::Duration;

use ptp_core::{clock::LocalClock, system::SystemStatus, PtpSystem, TICKS_PER_SECOND};
use tokio::{sync::watch, time::MissedTickBehavior};
use tracing::debug;

use super::{config::DebugLogConfig, debug_log};

const TICK_INTERVAL: Duration = Duration::from_nanos(1_000_000_000 / TICKS_PER_SECOND as u64);

/// Drive the control loop forever, publishing the system status once a
/// second
pub async fn run<C: LocalClock>(
    mut system: PtpSystem<C>,
    status_sender: watch::Sender<Option<SystemStatus>>,
    debug_log_config: DebugLogConfig,
) -> std::io::Result<()> {
    let mut interval = tokio::time::interval(TICK_INTERVAL);
    // late ticks are caught up so timers keep their meaning in seconds
    interval.set_missed_tick_behavior(MissedTickBehavior::Burst);

    status_sender.send_replace(Some(system.status()));
    debug!("control loop started");

    let mut ticks = 0;
    loop {
        interval.tick().await;
        system.tick();

        ticks += 1;
        if ticks == TICKS_PER_SECOND {
            ticks = 0;
            status_sender.send_replace(Some(system.status()));
            debug_log::write_all(&mut system, &debug_log_config).await;
        }
    }
}
