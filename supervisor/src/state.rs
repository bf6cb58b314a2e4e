//! Typed supervisor state
//!
//! The fused safety verdicts, operator intents and exclusivity flags that the
//! tick pipeline reads and writes. All of it is owned by the scheduler's
//! single thread of control; nothing here needs a lock.

use obsy_devices::ShutterState;
use serde::{Deserialize, Serialize};

/// Fused mount-safety verdict.
///
/// Derived each tick from two independent sources: the physical park sensor
/// reported through the roof controller, and the mount's own status flags.
/// A sensor-confirmed `Parked` always wins over the mount's self-report, so a
/// misconfigured park position cannot fool the roof into closing on the tube.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MountSafety {
    Parked,
    NotAtPark,
    Tracking,
    Homed,
    Slewing,
    #[default]
    Unknown,
}

impl std::fmt::Display for MountSafety {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MountSafety::Parked => write!(f, "Parked"),
            MountSafety::NotAtPark => write!(f, "Not at Park"),
            MountSafety::Tracking => write!(f, "Tracking"),
            MountSafety::Homed => write!(f, "Homed"),
            MountSafety::Slewing => write!(f, "Slewing"),
            MountSafety::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Composite weather-safety verdict built from three independent axes.
///
/// An axis whose sensor is absent or disconnected defaults to safe; the
/// system is deliberately permissive about missing instrumentation so it can
/// run with a partial sensor suite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CompositeSafety {
    /// Roof controller rain sensor says it is dry.
    pub no_rain: bool,
    /// Humidity below the fog/mist threshold.
    pub clear_air: bool,
    /// Independent safety monitor agrees conditions are safe.
    pub clear_sky: bool,
    /// Conjunction of the three axes.
    pub good_conditions: bool,
}

impl CompositeSafety {
    pub fn recompute(&mut self) {
        self.good_conditions = self.no_rain && self.clear_air && self.clear_sky;
    }
}

/// Latched operator requests to act automatically once conditions permit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AutoIntent {
    pub open: bool,
    pub close: bool,
}

/// Latest weather station readings. Each sensor may be unsupported.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WeatherReadings {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub sky_quality: Option<f64>,
    pub dew_point: Option<f64>,
}

/// Roof controller sensor/beeper enables, probed at attach time and after
/// each enable/disable command. `None` means the controller did not answer.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct DomeSensorFlags {
    pub park_sense: Option<bool>,
    pub rain_sense: Option<bool>,
    pub beeper: Option<bool>,
}

/// Exclusivity flags with accessor methods.
///
/// `busy` serializes every command sent down the roof controller's channel:
/// a step that cannot acquire it skips for the current tick instead of
/// blocking. `aborted` suppresses the slewing status override after an abort
/// until the mount next reports tracking or homed, so the display and the
/// interlocks do not flap on a stopping mount.
#[derive(Debug, Clone, Copy, Default)]
pub struct ControlFlags {
    busy: bool,
    aborted: bool,
}

impl ControlFlags {
    /// Try to take the roof command channel. Returns false if another
    /// command already holds it this cycle.
    pub fn try_acquire_dome(&mut self) -> bool {
        if self.busy {
            return false;
        }
        self.busy = true;
        true
    }

    pub fn release_dome(&mut self) {
        self.busy = false;
    }

    pub fn dome_busy(&self) -> bool {
        self.busy
    }

    pub fn latch_abort(&mut self) {
        self.aborted = true;
    }

    pub fn clear_abort(&mut self) {
        self.aborted = false;
    }

    pub fn aborted(&self) -> bool {
        self.aborted
    }
}

/// All per-tick mutable supervisor state.
#[derive(Debug, Default)]
pub struct SupervisorState {
    pub shutter: ShutterState,
    pub mount_safety: MountSafety,
    pub composite: CompositeSafety,
    pub intents: AutoIntent,
    pub flags: ControlFlags,
    pub weather: WeatherReadings,
    pub dome_sensors: DomeSensorFlags,
}

impl SupervisorState {
    pub fn new() -> Self {
        Self {
            shutter: ShutterState::Unknown,
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn good_conditions_is_conjunction_of_axes() {
        let mut c = CompositeSafety {
            no_rain: true,
            clear_air: true,
            clear_sky: true,
            good_conditions: false,
        };
        c.recompute();
        assert!(c.good_conditions);

        c.clear_air = false;
        c.recompute();
        assert!(!c.good_conditions);
    }

    #[test]
    fn dome_gate_is_exclusive_until_released() {
        let mut flags = ControlFlags::default();
        assert!(flags.try_acquire_dome());
        assert!(!flags.try_acquire_dome());
        flags.release_dome();
        assert!(flags.try_acquire_dome());
    }

    #[test]
    fn state_starts_unknown() {
        let st = SupervisorState::new();
        assert_eq!(st.shutter, ShutterState::Unknown);
        assert_eq!(st.mount_safety, MountSafety::Unknown);
        assert!(!st.composite.good_conditions);
        assert!(!st.intents.open && !st.intents.close);
    }
}
