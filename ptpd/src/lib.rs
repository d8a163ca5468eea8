//! Daemon running the PTP synchronization core against the clocks of this
//! machine.

mod daemon;

pub use daemon::config::Config;
pub use daemon::main as daemon_main;
pub use daemon::observer::ObservableState;
