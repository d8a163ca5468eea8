mod cli;

pub(crate) use cli::{long_help_message, PtpDaemonAction, PtpDaemonOptions};

use std::{
    collections::BTreeSet,
    fmt::Display,
    io::ErrorKind,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
};

use clock_steering::unix::UnixClock;
use ptp_core::{
    config::{BoardConfig, InstanceConfig, Rs422Setup, SystemConfig},
    IO_PIN_UNUSED, MAX_PTP_INSTANCES,
};
use serde::{Deserialize, Deserializer};
use tokio::{fs::read_to_string, io};
use tracing::{info, warn};

use super::{clock::PtpClockWrapper, tracing::LogLevel};

fn deserialize_ptp_clock<'de, D>(deserializer: D) -> Result<PtpClockWrapper, D::Error>
where
    D: Deserializer<'de>,
{
    let data: Option<PathBuf> = Deserialize::deserialize(deserializer)?;

    if let Some(path) = data {
        tracing::info!("using custom clock {path:?}");
        Ok(PtpClockWrapper::new(
            UnixClock::open(path).map_err(|e| serde::de::Error::custom(e.to_string()))?,
        ))
    } else {
        tracing::debug!("using REALTIME clock");
        Ok(PtpClockWrapper::new(UnixClock::CLOCK_REALTIME))
    }
}

/// Which OS clock an instance steers
#[derive(Deserialize, Debug, Copy, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ClockConfig {
    pub instance: usize,
    #[serde(deserialize_with = "deserialize_ptp_clock", default, rename = "path")]
    pub clock: PtpClockWrapper,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub log_level: Option<LogLevel>,
    #[serde(default = "default_ansi_colors")]
    pub ansi_colors: bool,
    #[serde(default)]
    pub observation_path: Option<PathBuf>,
    #[serde(default = "default_observation_permissions")]
    pub observation_permissions: u32,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: Default::default(),
            ansi_colors: default_ansi_colors(),
            observation_path: Default::default(),
            observation_permissions: default_observation_permissions(),
        }
    }
}

const fn default_ansi_colors() -> bool {
    true
}

const fn default_observation_permissions() -> u32 {
    0o666
}

/// Where the per instance servo debug logs are written
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DebugLogConfig {
    #[serde(default = "default_debug_log_directory")]
    pub directory: PathBuf,
}

impl Default for DebugLogConfig {
    fn default() -> Self {
        Self {
            directory: default_debug_log_directory(),
        }
    }
}

fn default_debug_log_directory() -> PathBuf {
    PathBuf::from("/tmp")
}

impl DebugLogConfig {
    pub fn path(&self, instance: usize) -> PathBuf {
        self.directory.join(format!("ptp_log_{instance}.tpk"))
    }
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub board: BoardConfig,
    #[serde(rename = "instance", default)]
    pub instances: Vec<InstanceConfig>,
    #[serde(default)]
    pub rs422: Rs422Setup,
    #[serde(rename = "clock", default)]
    pub clocks: Vec<ClockConfig>,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub debug_log: DebugLogConfig,
}

impl Config {
    async fn from_file(file: impl AsRef<Path>) -> Result<Config, ConfigError> {
        let meta = std::fs::metadata(&file)?;
        let perm = meta.permissions();

        if perm.mode() as libc::mode_t & libc::S_IWOTH != 0 {
            warn!("Unrestricted config file permissions: Others can write.");
        }

        let contents = read_to_string(file).await?;
        Ok(toml::de::from_str(&contents)?)
    }

    pub async fn from_args(file: Option<impl AsRef<Path>>) -> Result<Config, ConfigError> {
        // if an explicit file is given, always use that one
        if let Some(f) = file {
            let path: &Path = f.as_ref();
            info!(?path, "using config file");
            return Config::from_file(f).await;
        }

        // for the global file we also ignore it when there are permission errors
        let global_path = Path::new("/etc/ptpd/ptpd.toml");
        if global_path.exists() {
            info!("using config file at default location `{:?}`", global_path);
            match Config::from_file(global_path).await {
                Err(ConfigError::Io(e)) if e.kind() == ErrorKind::PermissionDenied => {
                    info!("permission denied on global config file! using default config ...");
                }
                other => return other,
            }
        }

        Ok(Config::default())
    }

    /// The part of the configuration handed to the synchronization core
    pub fn system_config(&self) -> SystemConfig {
        SystemConfig {
            board: self.board.clone(),
            instances: self.instances.clone(),
            rs422: self.rs422,
        }
    }

    /// The clock an instance steers, the realtime clock when none is given
    pub fn clock_for(&self, instance: usize) -> PtpClockWrapper {
        self.clocks
            .iter()
            .find(|c| c.instance == instance)
            .map(|c| c.clock)
            .unwrap_or_default()
    }

    /// Check that the config is reasonable, warning about everything that
    /// looks off. Returns false when something will certainly fail.
    pub fn check(&self) -> bool {
        let mut ok = true;

        if self.instances.is_empty() {
            info!("No clock instances configured. Daemon will not change any clock.");
        }

        let mut seen = BTreeSet::new();
        for instance in &self.instances {
            if instance.index >= MAX_PTP_INSTANCES {
                warn!(index = instance.index, "instance index out of range");
                ok = false;
            } else if !seen.insert(instance.index) {
                warn!(index = instance.index, "instance configured more than once");
                ok = false;
            }
        }

        for clock in &self.clocks {
            if !seen.contains(&clock.instance) {
                warn!(
                    instance = clock.instance,
                    "clock configured for an instance that does not exist"
                );
            }
        }

        if self.rs422.io_pin != IO_PIN_UNUSED
            && self.rs422.io_pin as usize >= self.board.pins.len()
        {
            warn!(pin = self.rs422.io_pin, "rs422 pin is not on the board");
            ok = false;
        }

        ok
    }
}

#[derive(Debug)]
pub enum ConfigError {
    Io(io::Error),
    Toml(toml::de::Error),
}

impl std::error::Error for ConfigError {}

impl Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error while reading config: {e}"),
            Self::Toml(e) => write!(f, "config toml parsing error: {e}"),
        }
    }
}

impl From<io::Error> for ConfigError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Toml(value)
    }
}

#[cfg(test)]
mod tests {
    use ptp_core::{
        datastructures::{ClockIdentity, Profile},
        rs422::Rs422Mode,
    };

    use super::*;

    #[test]
    fn test_config() {
        let config: Config = toml::from_str(
            r#"
            [[instance]]
            index = 0
            clock-identity = "00:11:22:ff:fe:33:44:55"
            profile = "g8275.1"

            [[instance.port]]
            port = 1
            "#,
        )
        .unwrap();
        assert_eq!(config.instances.len(), 1);
        let instance = &config.instances[0];
        assert_eq!(
            instance.clock_identity,
            ClockIdentity([0x00, 0x11, 0x22, 0xff, 0xfe, 0x33, 0x44, 0x55])
        );
        assert_eq!(instance.profile, Profile::G8275_1);
        assert_eq!(instance.domain_number(), 24);
        assert_eq!(instance.ports[0].port, 1);
        assert!(config.observability.log_level.is_none());
        assert_eq!(config.debug_log.path(2), PathBuf::from("/tmp/ptp_log_2.tpk"));
        assert!(config.check());

        let config: Config = toml::from_str(
            r#"
            [observability]
            log-level = "debug"
            ansi-colors = false

            [rs422]
            io-pin = 1
            [rs422.config]
            mode = "sub"
            delay = 500
            "#,
        )
        .unwrap();
        assert_eq!(config.observability.log_level, Some(LogLevel::Debug));
        assert!(!config.observability.ansi_colors);
        assert_eq!(config.rs422.config.mode, Rs422Mode::Sub);
        assert_eq!(config.rs422.config.delay, 500);
        // the board declares no pins
        assert!(!config.check());

        assert!(toml::from_str::<Config>("[[instance]]\nindex = 0\nclock-identity = \"00:00:00:00:00:00:00:01\"\nmagic = 1").is_err());
    }

    #[test]
    fn duplicate_instances_are_reported() {
        let config: Config = toml::from_str(
            r#"
            [[instance]]
            index = 1
            clock-identity = "01:01:01:01:01:01:01:01"

            [[instance]]
            index = 1
            clock-identity = "02:02:02:02:02:02:02:02"
            "#,
        )
        .unwrap();
        assert!(!config.check());
    }

    #[test]
    fn example_config_is_valid() {
        let config: Config =
            toml::from_str(include_str!("../../../docs/examples/conf/ptpd.toml")).unwrap();
        assert!(config.check());
        assert_eq!(config.board.pins.len(), 2);
        let vp = config.instances[0].virtual_port.unwrap();
        assert_eq!(vp.io_pin, 0);
        assert!(config.instances[0].ports[1].wireless);
    }

    #[tokio::test]
    async fn missing_config_file() {
        let path = std::env::temp_dir().join("ptpd-test-missing-config.toml");
        assert!(matches!(
            Config::from_args(Some(&path)).await,
            Err(ConfigError::Io(_))
        ));
    }

    #[tokio::test]
    async fn config_from_file() {
        let path = std::env::temp_dir().join("ptpd-test-config.toml");
        std::fs::write(
            &path,
            "[board]\nport-count = 4\n\n[[board.pin]]\ncapabilities = [\"time-if-in\", \"pin-in\"]\n",
        )
        .unwrap();

        let config = Config::from_args(Some(&path)).await.unwrap();
        assert_eq!(config.board.port_count, 4);
        assert_eq!(config.board.pins.len(), 1);
        assert!(config.board.pins[0].capabilities.is_time_if_in());
        assert!(config.instances.is_empty());

        std::fs::remove_file(path).unwrap();
    }
}
