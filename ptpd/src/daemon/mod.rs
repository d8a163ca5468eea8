mod clock;
pub mod config;
mod debug_log;
pub mod observer;
mod sockets;
mod system;
pub mod tracing;

use std::{error::Error, path::PathBuf};

use ::tracing::{error, info};
pub use config::Config;
use ptp_core::PtpSystem;
use tokio::{runtime::Builder, sync::watch};
use tracing_subscriber::util::SubscriberInitExt;

use config::{long_help_message, PtpDaemonAction, PtpDaemonOptions};

use self::tracing::LogLevel;

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn main() -> Result<(), Box<dyn Error>> {
    let options = PtpDaemonOptions::try_parse_from(std::env::args())?;

    match options.action {
        PtpDaemonAction::Help => {
            println!("{}", long_help_message());
        }
        PtpDaemonAction::Version => {
            eprintln!("ptp-daemon {VERSION}");
        }
        PtpDaemonAction::Run => run(options)?,
    }

    Ok(())
}

// initializes the logger so that logs during config parsing are reported. Then it overrides the
// log level based on the config if required.
async fn initialize_logging_parse_config(
    initial_log_level: Option<LogLevel>,
    config_path: Option<PathBuf>,
) -> Config {
    let mut log_level = initial_log_level.unwrap_or_default();

    let config_tracing = self::tracing::tracing_init(log_level, true);
    let guard = ::tracing::subscriber::set_default(config_tracing);
    let config = match Config::from_args(config_path).await {
        Ok(c) => c,
        Err(e) => {
            // print to stderr because tracing is not yet setup
            eprintln!("There was an error loading the config: {e}");
            std::process::exit(exitcode::CONFIG);
        }
    };
    drop(guard);

    if let Some(config_log_level) = config.observability.log_level {
        if initial_log_level.is_none() {
            log_level = config_log_level;
        }
    }

    // set a default global subscriber from now on
    let tracing_inst = self::tracing::tracing_init(log_level, config.observability.ansi_colors);
    tracing_inst.init();

    config
}

fn run(options: PtpDaemonOptions) -> Result<(), Box<dyn Error>> {
    // one control loop steering all instances, no need for more threads
    let runtime = Builder::new_current_thread().enable_all().build()?;

    runtime.block_on(async {
        let config = initialize_logging_parse_config(options.log_level, options.config).await;

        // give the user a warning that we use the command line option
        if config.observability.log_level.is_some() && options.log_level.is_some() {
            info!("Log level override from command line arguments is active");
        }

        if !config.check() {
            error!("Configuration cannot work as written, exiting");
            std::process::exit(exitcode::CONFIG);
        }

        let system = match PtpSystem::from_config(&config.system_config(), |instance| {
            config.clock_for(instance.index)
        }) {
            Ok(system) => system,
            Err(e) => {
                error!("Could not set up the clock instances: {e}");
                std::process::exit(exitcode::CONFIG);
            }
        };

        let (status_sender, status_reader) = watch::channel(None);
        let _observer = observer::spawn(&config.observability, status_reader);

        ::tracing::debug!("Configuration loaded, starting control loop");
        Ok(system::run(system, status_sender, config.debug_log).await?)
    })
}

pub(crate) mod exitcode {
    /// Something was found in an unconfigured or misconfigured state.
    pub const CONFIG: i32 = 78;
}
