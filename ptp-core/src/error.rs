use crate::io_pin::PinUsage;

pub type Result<T, E = PtpError> = core::result::Result<T, E>;

/// Every way an operation on the synchronization core can be refused.
///
/// All operations validate before mutating, so an error always means the
/// previous state is still in place. The `Display` text is meant for
/// operators (CLI output and logs).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum PtpError {
    #[error("invalid clock instance {0}")]
    InvalidInstance(usize),
    #[error("clock instance {0} is not created")]
    InstanceNotCreated(usize),
    #[error("clock instance {0} already exists")]
    InstanceExists(usize),
    #[error("invalid port number {0}")]
    InvalidPort(u16),
    #[error("port {0} is not enabled on this clock instance")]
    PortNotEnabled(u16),
    #[error("port {0} is already enabled on this clock instance")]
    PortAlreadyEnabled(u16),
    #[error("port {0} is already used by the maximum number of clock instances")]
    TooManyInstancesOnPort(u16),
    #[error("no virtual port is configured on this clock instance")]
    VirtualPortNotConfigured,
    #[error("invalid io pin {0}")]
    InvalidIoPin(u8),
    #[error("io pin {pin} cannot be used for {usage:?}")]
    PinCapability { pin: u8, usage: PinUsage },
    #[error("io pin {pin} is already in use by {owner:?}")]
    PinOwned { pin: u8, owner: PinUsage },
    #[error("operation not allowed in the current state: {0}")]
    InvalidState(&'static str),
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),
    #[error("a calibration is already running")]
    CalibrationInProgress,
    #[error("not supported by this build: {0}")]
    Unsupported(&'static str),
    #[error("event queue is full")]
    EventQueueFull,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn texts_are_distinct() {
        let errors = [
            PtpError::InvalidInstance(4),
            PtpError::InvalidPort(0),
            PtpError::TooManyInstancesOnPort(3),
            PtpError::PinCapability {
                pin: 1,
                usage: PinUsage::Rs422,
            },
            PtpError::PinOwned {
                pin: 1,
                owner: PinUsage::Main,
            },
        ];

        for (i, a) in errors.iter().enumerate() {
            for b in &errors[i + 1..] {
                assert_ne!(a.to_string(), b.to_string());
            }
        }

        assert_eq!(
            PtpError::InvalidInstance(4).to_string(),
            "invalid clock instance 4"
        );
    }
}
