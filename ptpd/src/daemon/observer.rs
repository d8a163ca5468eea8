use std::os::unix::fs::PermissionsExt;
use std::time::Instant;

use ptp_core::system::SystemStatus;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::warn;

use super::config::ObservabilityConfig;
use super::sockets::create_unix_socket_with_permissions;

/// What is written to every client of the observation socket
#[derive(Debug, Serialize)]
pub struct ObservableState {
    pub program: ProgramData,
    pub system: Option<SystemStatus>,
}

#[derive(Debug, Serialize)]
pub struct ProgramData {
    pub version: String,
    pub uptime_seconds: f64,
}

impl ProgramData {
    pub fn with_uptime(uptime_seconds: f64) -> ProgramData {
        ProgramData {
            version: env!("CARGO_PKG_VERSION").to_owned(),
            uptime_seconds,
        }
    }
}

pub fn spawn(
    config: &ObservabilityConfig,
    status_reader: tokio::sync::watch::Receiver<Option<SystemStatus>>,
) -> JoinHandle<std::io::Result<()>> {
    let config = config.clone();
    tokio::spawn(async move {
        let result = observer(config, status_reader).await;
        if let Err(ref e) = result {
            warn!("Abnormal termination of the state observer: {e}");
            warn!("The state observer will not be available");
        }
        result
    })
}

async fn observer(
    config: ObservabilityConfig,
    status_reader: tokio::sync::watch::Receiver<Option<SystemStatus>>,
) -> std::io::Result<()> {
    let start_time = Instant::now();

    let path = match config.observation_path {
        Some(path) => path,
        None => return Ok(()),
    };

    // the daemon runs as root to steer clocks, readers should not need to
    let permissions: std::fs::Permissions =
        PermissionsExt::from_mode(config.observation_permissions);

    let listener = create_unix_socket_with_permissions(&path, permissions)?;

    loop {
        let (mut stream, _addr) = listener.accept().await?;

        let observe = ObservableState {
            program: ProgramData::with_uptime(start_time.elapsed().as_secs_f64()),
            // cloned so the lock is not held while writing
            system: status_reader.borrow().clone(),
        };

        super::sockets::write_json(&mut stream, &observe).await?;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use ptp_core::{
        clock::TestClock,
        config::{BoardConfig, InstanceConfig},
        datastructures::{ClockIdentity, Profile},
        PtpSystem,
    };
    use tokio::net::UnixStream;

    use super::*;
    use crate::daemon::sockets::tests::read_json;

    fn status() -> SystemStatus {
        let mut system: PtpSystem<TestClock> =
            PtpSystem::new(&BoardConfig::default(), ptp_core::IO_PIN_UNUSED).unwrap();
        system
            .create_instance(
                InstanceConfig::new(1, ClockIdentity([1; 8]), Profile::G8275_1),
                TestClock::default(),
            )
            .unwrap();
        system.status()
    }

    #[tokio::test]
    async fn test_observation() {
        // tests run concurrently, so every test needs its own socket name
        let path = std::env::temp_dir().join("ptpd-test-stream-2");
        let config = ObservabilityConfig {
            observation_path: Some(path.clone()),
            observation_permissions: 0o700,
            ..Default::default()
        };

        let (_writer, status_reader) = tokio::sync::watch::channel(Some(status()));

        let handle = tokio::spawn(async move {
            observer(config, status_reader).await.unwrap();
        });

        tokio::time::sleep(Duration::from_millis(10)).await;

        let mut reader = UnixStream::connect(path).await.unwrap();
        let result: serde_json::Value = read_json(&mut reader).await.unwrap();

        assert_eq!(
            result["program"]["version"],
            serde_json::json!(env!("CARGO_PKG_VERSION"))
        );
        let instances = result["system"]["instances"].as_array().unwrap();
        assert_eq!(instances.len(), 1);
        assert_eq!(instances[0]["index"], serde_json::json!(1));

        handle.abort();
    }

    #[tokio::test]
    async fn no_path_no_observer() {
        let (_writer, status_reader) = tokio::sync::watch::channel(None);
        let config = ObservabilityConfig::default();
        observer(config, status_reader).await.unwrap();
    }
}
