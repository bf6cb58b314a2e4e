//! Sensor fusion
//!
//! The sense/fuse half of the tick: refresh the shutter, weather and safety
//! monitor readings, fold them into the composite verdict, then derive the
//! mount-safety verdict from the park sensor and the mount's status flags.
//!
//! Every read here is fail-open for absent hardware and fail-stale for
//! transient errors: a missing sensor defaults its axis to safe, a read that
//! errors keeps last tick's value and logs.

use crate::event::{EventSeverity, SupervisorEvent};
use crate::state::MountSafety;
use crate::supervisor::Supervisor;
use obsy_devices::{DeviceError, DomeSensorQuery};

impl Supervisor {
    /// Refresh the shutter state from the roof controller.
    pub(crate) async fn refresh_shutter(&mut self) {
        let Some(dome) = self.dome.clone() else {
            return;
        };
        if !self.state.flags.try_acquire_dome() {
            return;
        }
        let read = dome.shutter_status().await;
        self.state.flags.release_dome();
        match read {
            Ok(shutter) => {
                if shutter != self.state.shutter {
                    self.emit(SupervisorEvent::ShutterChanged {
                        from: self.state.shutter,
                        to: shutter,
                    });
                    self.state.shutter = shutter;
                }
            }
            Err(e) => self.diag(
                EventSeverity::Warning,
                format!("shutter status read failed: {e}"),
            ),
        }
    }

    /// Refresh the rain axis and the weather station readings.
    pub(crate) async fn refresh_weather(&mut self) {
        self.refresh_rain_axis().await;

        let Some(weather) = self.weather.clone() else {
            self.state.weather = Default::default();
            self.state.composite.clear_air = true;
            return;
        };

        // each sensor can fail on its own; absent readings are simply blank
        self.state.weather.temperature = weather.temperature().await.ok();
        self.state.weather.pressure = weather.pressure().await.ok();
        self.state.weather.sky_quality = weather.sky_quality().await.ok();
        self.state.weather.dew_point = weather.dew_point().await.ok();

        // humidity drives a safety axis: a station without the sensor is
        // fail-open, but a transient read failure keeps last tick's verdict
        match weather.humidity().await {
            Ok(humidity) => {
                self.state.weather.humidity = Some(humidity);
                self.state.composite.clear_air = humidity <= self.config.max_humidity;
            }
            Err(DeviceError::NotSupported(_)) => {
                self.state.weather.humidity = None;
                self.state.composite.clear_air = true;
            }
            Err(e) => self.diag(
                EventSeverity::Warning,
                format!("humidity read failed: {e}"),
            ),
        }
    }

    /// The rain verdict comes from the roof controller's own sensor, not the
    /// weather station. A controller without the extension defaults to dry.
    async fn refresh_rain_axis(&mut self) {
        let Some(dome) = self.dome.clone() else {
            self.state.composite.no_rain = true;
            return;
        };
        if !self.dome_caps.rain_query {
            self.state.composite.no_rain = true;
            return;
        }
        if !self.state.flags.try_acquire_dome() {
            return;
        }
        let read = dome.command_bool(DomeSensorQuery::Rain).await;
        self.state.flags.release_dome();
        match read {
            Ok(raining) => self.state.composite.no_rain = !raining,
            Err(DeviceError::NotSupported(_)) => {
                self.dome_caps.rain_query = false;
                self.state.composite.no_rain = true;
            }
            Err(e) => self.diag(
                EventSeverity::Warning,
                format!("rain sensor read failed: {e}"),
            ),
        }
    }

    /// Refresh the sky axis from the independent safety monitor.
    pub(crate) async fn refresh_safety_monitor(&mut self) {
        let Some(safety) = self.safety.clone() else {
            self.state.composite.clear_sky = true;
            return;
        };
        match safety.is_safe().await {
            Ok(safe) => self.state.composite.clear_sky = safe,
            Err(e) => self.diag(
                EventSeverity::Warning,
                format!("safety monitor read failed: {e}"),
            ),
        }
    }

    /// Fold the three axes into the composite verdict.
    pub(crate) fn compute_composite(&mut self) {
        let before = self.state.composite;
        self.state.composite.recompute();
        if self.state.composite != before {
            self.emit(SupervisorEvent::ConditionsChanged(self.state.composite));
        }
    }

    /// Derive the fused mount-safety verdict.
    ///
    /// The physical park sensor sets the base verdict; the mount's status
    /// flags can override it with Tracking, Homed or Slewing but never with
    /// Parked. A mount whose driver claims AtPark while the sensor disagrees
    /// stays `NotAtPark`.
    pub(crate) async fn refresh_mount(&mut self) {
        let mut verdict = self.park_sensor_verdict().await;

        // a sensor-confirmed park is never overridden by the driver's own
        // status flags
        if verdict != MountSafety::Parked {
            if let Some(mount) = self.mount.clone() {
                if mount.tracking().await.unwrap_or(false) {
                    verdict = MountSafety::Tracking;
                    self.state.flags.clear_abort();
                } else if mount.at_home().await.unwrap_or(false) {
                    verdict = MountSafety::Homed;
                    self.state.flags.clear_abort();
                } else if !self.state.flags.aborted() && mount.slewing().await.unwrap_or(false) {
                    verdict = MountSafety::Slewing;
                }
            }
        }

        if verdict != self.state.mount_safety {
            self.emit(SupervisorEvent::MountSafetyChanged {
                from: self.state.mount_safety,
                to: verdict,
            });
            self.state.mount_safety = verdict;
        }
    }

    async fn park_sensor_verdict(&mut self) -> MountSafety {
        let Some(dome) = self.dome.clone() else {
            return MountSafety::Unknown;
        };
        if !self.dome_caps.park_query {
            return MountSafety::Unknown;
        }
        if !self.state.flags.try_acquire_dome() {
            return self.state.mount_safety;
        }
        let read = dome.command_bool(DomeSensorQuery::Park).await;
        self.state.flags.release_dome();
        match read {
            Ok(true) => MountSafety::Parked,
            Ok(false) => MountSafety::NotAtPark,
            Err(DeviceError::NotSupported(_)) => {
                self.dome_caps.park_query = false;
                MountSafety::Unknown
            }
            Err(e) => {
                self.diag(
                    EventSeverity::Warning,
                    format!("park sensor read failed: {e}"),
                );
                self.state.mount_safety
            }
        }
    }
}
