//! Error types for device capability calls
//!
//! Every device call returns a typed result so the supervisor can tell
//! "unsafe" from "unknown" from "transient failure" instead of collapsing
//! them into one caught error.

use thiserror::Error;

/// Result type for device operations
pub type DeviceResult<T> = Result<T, DeviceError>;

/// Error raised by a device capability call
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DeviceError {
    #[error("device not connected")]
    NotConnected,

    #[error("operation not supported: {0}")]
    NotSupported(String),

    #[error("operation timed out: {0}")]
    Timeout(String),

    #[error("communication failure: {0}")]
    Comms(String),

    #[error("hardware fault: {0}")]
    Hardware(String),
}

impl DeviceError {
    /// Transient failures leave the device usable; the caller should retry
    /// next poll with a stale value rather than escalate.
    pub fn is_transient(&self) -> bool {
        matches!(self, DeviceError::Timeout(_) | DeviceError::Comms(_))
    }

    /// Loss of contact with the device. Used to decide whether a failed
    /// mount command warrants the power-down fallback.
    pub fn is_comms_loss(&self) -> bool {
        matches!(self, DeviceError::Comms(_) | DeviceError::NotConnected)
    }
}
