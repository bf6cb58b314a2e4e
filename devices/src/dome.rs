//! Dome (roll-off roof) capability
//!
//! The roof controller carries two vendor extensions beyond the standard
//! shutter interface: boolean sensor queries (rain, physical mount park
//! sensor) and blind control commands (forced moves, sensor enables, beeper).
//! Both are modeled as typed enums mapped to the controller's wire labels.

use crate::DeviceResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shutter state as reported by the roof controller.
///
/// Open and Closed are the terminal display states; Opening/Closing are
/// transient, Error means the controller reported a fault and Unknown means
/// no reading has been obtained yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ShutterState {
    Open,
    Closed,
    Opening,
    Closing,
    Error,
    #[default]
    Unknown,
}

impl std::fmt::Display for ShutterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ShutterState::Open => write!(f, "Open"),
            ShutterState::Closed => write!(f, "Closed"),
            ShutterState::Opening => write!(f, "Opening"),
            ShutterState::Closing => write!(f, "Closing"),
            ShutterState::Error => write!(f, "Error"),
            ShutterState::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Boolean sensor queries understood by the roof controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomeSensorQuery {
    /// Is it raining right now
    Rain,
    /// Physical mount park sensor reading
    Park,
    /// Is the park sensor enabled in the controller
    ParkSensor,
    /// Is the rain sensor enabled in the controller
    RainSensor,
    /// Is the movement beeper enabled
    BeepStatus,
}

impl DomeSensorQuery {
    pub fn label(&self) -> &'static str {
        match self {
            DomeSensorQuery::Rain => "RAIN",
            DomeSensorQuery::Park => "PARK",
            DomeSensorQuery::ParkSensor => "PARKSENSOR",
            DomeSensorQuery::RainSensor => "RAINSENSOR",
            DomeSensorQuery::BeepStatus => "BEEPSTATUS",
        }
    }
}

/// Blind control commands understood by the roof controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DomeControl {
    /// Open regardless of sensor state
    ForceOpen,
    /// Close regardless of sensor state
    ForceClose,
    /// Reset the controller, clearing a latched rain condition
    Init,
    RainSenseOn,
    RainSenseOff,
    ParkSenseOn,
    ParkSenseOff,
    BeepOn,
    BeepOff,
}

impl DomeControl {
    pub fn label(&self) -> &'static str {
        match self {
            DomeControl::ForceOpen => "FORCEOPEN",
            DomeControl::ForceClose => "FORCECLOSE",
            DomeControl::Init => "INIT",
            DomeControl::RainSenseOn => "RAINSENSE",
            DomeControl::RainSenseOff => "NORAINSENSE",
            DomeControl::ParkSenseOn => "PARKSENSE",
            DomeControl::ParkSenseOff => "NOPARKSENSE",
            DomeControl::BeepOn => "BEEPON",
            DomeControl::BeepOff => "BEEPOFF",
        }
    }
}

/// Roof controller capability consumed by the supervisor.
#[async_trait]
pub trait Dome: Send + Sync {
    async fn connect(&self) -> DeviceResult<()>;
    async fn disconnect(&self) -> DeviceResult<()>;

    /// Current shutter state.
    async fn shutter_status(&self) -> DeviceResult<ShutterState>;

    async fn open_shutter(&self) -> DeviceResult<()>;
    async fn close_shutter(&self) -> DeviceResult<()>;

    /// Stop any roof movement immediately.
    async fn abort_slew(&self) -> DeviceResult<()>;

    /// Vendor boolean query. Returns `NotSupported` if the controller does
    /// not implement the extension.
    async fn command_bool(&self, query: DomeSensorQuery) -> DeviceResult<bool>;

    /// Vendor blind command. Returns `NotSupported` if the controller does
    /// not implement the extension.
    async fn command_blind(&self, control: DomeControl) -> DeviceResult<()>;
}

/// Shared dome handle
pub type SharedDome = Arc<dyn Dome>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sensor_query_labels_match_controller_protocol() {
        assert_eq!(DomeSensorQuery::Rain.label(), "RAIN");
        assert_eq!(DomeSensorQuery::Park.label(), "PARK");
        assert_eq!(DomeSensorQuery::BeepStatus.label(), "BEEPSTATUS");
    }

    #[test]
    fn control_labels_match_controller_protocol() {
        assert_eq!(DomeControl::ForceOpen.label(), "FORCEOPEN");
        assert_eq!(DomeControl::RainSenseOff.label(), "NORAINSENSE");
        assert_eq!(DomeControl::ParkSenseOn.label(), "PARKSENSE");
    }

    #[test]
    fn shutter_state_displays_terminal_states() {
        assert_eq!(ShutterState::Open.to_string(), "Open");
        assert_eq!(ShutterState::Closed.to_string(), "Closed");
    }
}
