use std::{path::PathBuf, str::FromStr};

use crate::daemon::tracing::LogLevel;

const USAGE_MSG: &str = "\
usage: ptp-daemon [-c PATH] [-l LOG_LEVEL]
       ptp-daemon -h
       ptp-daemon -v";

const DESCRIPTOR: &str = "ptp-daemon - steer the clocks of this machine to the best PTP reference";

const HELP_MSG: &str = "Options:
  -c, --config=PATH             change the config .toml file
  -l, --log-level=LOG_LEVEL     change the log level
  -h, --help                    display this help text
  -v, --version                 display version information";

pub fn long_help_message() -> String {
    format!("{DESCRIPTOR}\n\n{USAGE_MSG}\n\n{HELP_MSG}")
}

#[derive(Debug, Default, PartialEq, Eq)]
pub enum PtpDaemonAction {
    #[default]
    Help,
    Version,
    Run,
}

#[derive(Debug, Default)]
pub(crate) struct PtpDaemonOptions {
    /// Path of the configuration file
    pub config: Option<PathBuf>,
    /// Level for messages to display in logs
    pub log_level: Option<LogLevel>,
    help: bool,
    version: bool,
    pub action: PtpDaemonAction,
}

impl PtpDaemonOptions {
    /// Parse the command line, the first item being the program name
    pub fn try_parse_from<I, T>(iter: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = T>,
        T: AsRef<str>,
    {
        let mut options = PtpDaemonOptions::default();
        let mut args = iter
            .into_iter()
            .skip(1)
            .map(|arg| arg.as_ref().to_string());

        while let Some(arg) = args.next() {
            let (option, inline) = match arg.split_once('=') {
                Some((option, value)) if arg.starts_with("--") => {
                    (option.to_string(), Some(value.to_string()))
                }
                _ => (arg.clone(), None),
            };

            match option.as_str() {
                "-h" | "--help" => options.help = true,
                "-v" | "--version" => options.version = true,
                "-c" | "--config" | "-l" | "--log-level" => {
                    let value = inline
                        .or_else(|| args.next())
                        .ok_or_else(|| format!("'{option}' expects an argument"))?;
                    if matches!(option.as_str(), "-c" | "--config") {
                        options.config = Some(PathBuf::from(value));
                    } else {
                        let level = LogLevel::from_str(&value)
                            .map_err(|_| "invalid log level".to_string())?;
                        options.log_level = Some(level);
                    }
                }
                // everything after the separator is ignored
                "--" => break,
                other => return Err(format!("invalid option provided: {other}")),
            }
        }

        options.resolve_action();
        Ok(options)
    }

    /// from the arguments resolve which action should be performed
    fn resolve_action(&mut self) {
        self.action = if self.help {
            PtpDaemonAction::Help
        } else if self.version {
            PtpDaemonAction::Version
        } else {
            PtpDaemonAction::Run
        };
    }
}
