//! Operator command surface
//!
//! Every command goes through the same safety gates as the automation: the
//! supervisor refuses or asks for confirmation rather than trusting the
//! caller. Each request returns a [`CommandOutcome`] describing what was
//! actually done.

use crate::automation::{HibernatePhase, Sequence, SequenceKind};
use crate::event::{EventSeverity, SupervisorEvent};
use crate::state::{AutoIntent, MountSafety};
use crate::supervisor::Supervisor;
use obsy_devices::{DomeControl, DomeSensorQuery, ShutterState, RELAY_CHANNELS};

/// What happened to an operator request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandOutcome {
    /// The command was sent to the hardware.
    Issued,
    /// Nothing to do (already in the requested state, channel busy).
    Skipped(String),
    /// A safety gate blocked the command outright.
    Refused(String),
    /// The command is allowed but wants an explicit operator confirmation.
    NeedsConfirmation(String),
}

impl CommandOutcome {
    fn confirm(supervisor: &Supervisor, command: &str, reason: &str) -> Self {
        supervisor.emit(SupervisorEvent::ConfirmationRequired {
            command: command.to_string(),
            reason: reason.to_string(),
        });
        CommandOutcome::NeedsConfirmation(reason.to_string())
    }
}

impl Supervisor {
    // ------------------------------------------------------------------
    // Roof
    // ------------------------------------------------------------------

    /// Open the roof. Requires a sensor-confirmed park; opening into bad
    /// weather additionally wants confirmation.
    pub async fn request_open(&mut self, confirmed: bool) -> CommandOutcome {
        let Some(dome) = self.dome.clone() else {
            return CommandOutcome::Refused("no roof controller attached".into());
        };
        if matches!(self.state.shutter, ShutterState::Open | ShutterState::Opening) {
            return CommandOutcome::Skipped("roof already open".into());
        }
        if self.state.mount_safety != MountSafety::Parked {
            // a mount under this supervisor's control gets parked through the
            // supervisor; only an unmanaged mount may be vouched for by hand
            if self.mount.is_some() {
                return CommandOutcome::Refused(format!(
                    "mount is {}, park it first",
                    self.state.mount_safety
                ));
            }
            if !confirmed {
                return CommandOutcome::confirm(
                    self,
                    "open",
                    "no mount attached to verify park",
                );
            }
        }
        if !self.state.composite.good_conditions && !confirmed {
            return CommandOutcome::confirm(self, "open", "conditions are not good");
        }
        if !self.state.flags.try_acquire_dome() {
            return CommandOutcome::Skipped("roof channel busy".into());
        }
        let result = dome.open_shutter().await;
        self.state.flags.release_dome();
        match result {
            Ok(()) => CommandOutcome::Issued,
            Err(e) => {
                self.diag(EventSeverity::Error, format!("roof open failed: {e}"));
                CommandOutcome::Refused(e.to_string())
            }
        }
    }

    /// Close the roof. Closing over a mount that is not confirmed parked
    /// wants confirmation.
    pub async fn request_close(&mut self, confirmed: bool) -> CommandOutcome {
        let Some(dome) = self.dome.clone() else {
            return CommandOutcome::Refused("no roof controller attached".into());
        };
        if matches!(self.state.shutter, ShutterState::Closed | ShutterState::Closing) {
            return CommandOutcome::Skipped("roof already closed".into());
        }
        if self.state.mount_safety != MountSafety::Parked {
            if self.mount.is_some() {
                return CommandOutcome::Refused(format!(
                    "mount is {}, park it first",
                    self.state.mount_safety
                ));
            }
            if !confirmed {
                return CommandOutcome::confirm(
                    self,
                    "close",
                    "no mount attached to verify park",
                );
            }
        }
        if !self.state.flags.try_acquire_dome() {
            return CommandOutcome::Skipped("roof channel busy".into());
        }
        let result = dome.close_shutter().await;
        self.state.flags.release_dome();
        match result {
            Ok(()) => {
                self.state.intents.open = false;
                CommandOutcome::Issued
            }
            Err(e) => {
                self.diag(EventSeverity::Error, format!("roof close failed: {e}"));
                CommandOutcome::Refused(e.to_string())
            }
        }
    }

    /// Force the roof open past the controller's own sensor lockouts.
    pub async fn force_open(&mut self, confirmed: bool) -> CommandOutcome {
        if !confirmed {
            return CommandOutcome::confirm(self, "force-open", "bypasses the rain lockout");
        }
        self.dome_blind(DomeControl::ForceOpen).await
    }

    /// Force the roof closed regardless of the park sensor.
    pub async fn force_close(&mut self, confirmed: bool) -> CommandOutcome {
        if !confirmed {
            return CommandOutcome::confirm(self, "force-close", "bypasses the park interlock");
        }
        self.dome_blind(DomeControl::ForceClose).await
    }

    /// Reset the roof controller, clearing a latched rain condition.
    pub async fn init_roof(&mut self, confirmed: bool) -> CommandOutcome {
        if !confirmed {
            return CommandOutcome::confirm(self, "init", "resets the roof controller");
        }
        self.dome_blind(DomeControl::Init).await
    }

    // ------------------------------------------------------------------
    // Mount
    // ------------------------------------------------------------------

    /// Park an unparked mount, or unpark a parked one. Unparking needs an
    /// open roof; parking is always allowed.
    pub async fn request_park_toggle(&mut self) -> CommandOutcome {
        let Some(mount) = self.mount.clone() else {
            return CommandOutcome::Refused("no mount attached".into());
        };
        if self.state.mount_safety == MountSafety::Slewing {
            return CommandOutcome::Refused("mount is slewing, abort first".into());
        }
        let parked = mount.at_park().await.unwrap_or(false);
        if parked {
            if self.state.shutter != ShutterState::Open {
                return CommandOutcome::Refused("roof must be open to unpark".into());
            }
            if !mount.can_unpark().await.unwrap_or(false) {
                return CommandOutcome::Refused("mount cannot unpark".into());
            }
            match mount.unpark().await {
                Ok(()) => CommandOutcome::Issued,
                Err(e) => {
                    self.mount_fault("unpark command", e.clone()).await;
                    CommandOutcome::Refused(e.to_string())
                }
            }
        } else {
            if !mount.can_park().await.unwrap_or(false) {
                return CommandOutcome::Refused("mount cannot park".into());
            }
            match mount.park().await {
                Ok(()) => {
                    self.state.intents.open = false;
                    CommandOutcome::Issued
                }
                Err(e) => {
                    self.mount_fault("park command", e.clone()).await;
                    CommandOutcome::Refused(e.to_string())
                }
            }
        }
    }

    /// Toggle sidereal tracking. Turning tracking on needs an open roof.
    pub async fn request_track_toggle(&mut self) -> CommandOutcome {
        let Some(mount) = self.mount.clone() else {
            return CommandOutcome::Refused("no mount attached".into());
        };
        if !mount.can_set_tracking().await.unwrap_or(false) {
            return CommandOutcome::Refused("mount cannot control tracking".into());
        }
        let tracking = mount.tracking().await.unwrap_or(false);
        if !tracking && self.state.shutter != ShutterState::Open {
            return CommandOutcome::Refused("roof must be open to start tracking".into());
        }
        match mount.set_tracking(!tracking).await {
            Ok(()) => CommandOutcome::Issued,
            Err(e) => {
                self.mount_fault("tracking toggle", e.clone()).await;
                CommandOutcome::Refused(e.to_string())
            }
        }
    }

    /// Home the mount. Needs an open roof unless forced.
    pub async fn request_home(&mut self, force: bool) -> CommandOutcome {
        let Some(mount) = self.mount.clone() else {
            return CommandOutcome::Refused("no mount attached".into());
        };
        if !force && self.state.shutter != ShutterState::Open {
            return CommandOutcome::Refused("roof must be open to home the mount".into());
        }
        if !mount.can_find_home().await.unwrap_or(false) {
            return CommandOutcome::Refused("mount cannot find home".into());
        }
        match mount.find_home().await {
            Ok(()) => CommandOutcome::Issued,
            Err(e) => {
                self.mount_fault("find home", e.clone()).await;
                CommandOutcome::Refused(e.to_string())
            }
        }
    }

    /// Park the mount with no gate checks.
    pub async fn force_park(&mut self) -> CommandOutcome {
        let Some(mount) = self.mount.clone() else {
            return CommandOutcome::Refused("no mount attached".into());
        };
        match mount.park().await {
            Ok(()) => CommandOutcome::Issued,
            Err(e) => {
                self.mount_fault("park command", e.clone()).await;
                CommandOutcome::Refused(e.to_string())
            }
        }
    }

    /// Stop everything that is moving: mount slew and roof travel.
    pub async fn request_abort(&mut self) -> CommandOutcome {
        let mut issued = false;
        if let Some(mount) = self.mount.clone() {
            match mount.abort_slew().await {
                Ok(()) => {
                    self.state.flags.latch_abort();
                    issued = true;
                }
                Err(e) => self.diag(EventSeverity::Error, format!("mount abort failed: {e}")),
            }
        }
        if let Some(dome) = self.dome.clone() {
            if self.state.flags.try_acquire_dome() {
                let result = dome.abort_slew().await;
                self.state.flags.release_dome();
                match result {
                    Ok(()) => issued = true,
                    Err(e) => self.diag(EventSeverity::Error, format!("roof abort failed: {e}")),
                }
            }
        }
        if issued {
            self.emit(SupervisorEvent::AbortIssued);
            CommandOutcome::Issued
        } else {
            CommandOutcome::Refused("nothing attached to abort".into())
        }
    }

    // ------------------------------------------------------------------
    // Sequences and intents
    // ------------------------------------------------------------------

    /// Put the observatory to bed: open if needed, home and park the mount,
    /// close the roof, cut mount power.
    pub async fn request_hibernate(&mut self) -> CommandOutcome {
        if self.sequence.is_active() {
            return CommandOutcome::Refused("a sequence is already running".into());
        }
        let Some(dome) = self.dome.clone() else {
            return CommandOutcome::Refused("no roof controller attached".into());
        };
        if self.mount.is_none() {
            return CommandOutcome::Refused("no mount attached".into());
        }
        self.state.intents = AutoIntent::default();

        match self.state.shutter {
            ShutterState::Open => {
                self.sequence =
                    Sequence::Hibernate(HibernatePhase::WaitingOpen { polls_left: 1 });
            }
            ShutterState::Closed => {
                if self.state.mount_safety != MountSafety::Parked {
                    return CommandOutcome::Refused(
                        "roof is closed and mount is not parked".into(),
                    );
                }
                if !self.state.flags.try_acquire_dome() {
                    return CommandOutcome::Skipped("roof channel busy".into());
                }
                let result = dome.open_shutter().await;
                self.state.flags.release_dome();
                if let Err(e) = result {
                    self.diag(EventSeverity::Error, format!("roof open failed: {e}"));
                    return CommandOutcome::Refused(e.to_string());
                }
                self.sequence = Sequence::Hibernate(HibernatePhase::WaitingOpen {
                    polls_left: self.config.roof_timeout,
                });
            }
            other => {
                return CommandOutcome::Refused(format!("roof is {other}, wait for it to settle"));
            }
        }
        self.emit(SupervisorEvent::SequenceStarted {
            kind: SequenceKind::Hibernate,
        });
        self.diag(EventSeverity::Info, "hibernate sequence started");
        CommandOutcome::Issued
    }

    /// Latch or clear the open-when-good intent.
    pub fn set_auto_open(&mut self, enable: bool) -> CommandOutcome {
        if self.dome.is_none() {
            self.state.intents = AutoIntent::default();
            return CommandOutcome::Refused("no roof controller attached".into());
        }
        self.state.intents.open = enable;
        CommandOutcome::Issued
    }

    /// Latch or clear the close-when-bad intent.
    pub fn set_auto_close(&mut self, enable: bool) -> CommandOutcome {
        if self.dome.is_none() {
            self.state.intents = AutoIntent::default();
            return CommandOutcome::Refused("no roof controller attached".into());
        }
        self.state.intents.close = enable;
        CommandOutcome::Issued
    }

    // ------------------------------------------------------------------
    // Relays, thresholds, roof controller settings
    // ------------------------------------------------------------------

    pub async fn toggle_relay(&mut self, channel: usize) -> CommandOutcome {
        if channel >= RELAY_CHANNELS {
            return CommandOutcome::Refused(format!("no relay channel {channel}"));
        }
        match self.relays.toggle(channel).await {
            Ok(on) => {
                self.emit(SupervisorEvent::RelayChanged { channel, on });
                CommandOutcome::Issued
            }
            Err(e) => CommandOutcome::Refused(e.to_string()),
        }
    }

    /// Change the humidity ceiling for the air axis, persisting it when a
    /// store is attached.
    pub fn set_humidity_threshold(&mut self, max_humidity: f64) -> CommandOutcome {
        if !(0.0..=100.0).contains(&max_humidity) {
            return CommandOutcome::Refused(format!(
                "humidity threshold {max_humidity} out of range"
            ));
        }
        self.config.max_humidity = max_humidity;
        if let Some(store) = &self.store {
            if let Err(e) = store.save(&self.config) {
                self.diag(EventSeverity::Warning, format!("config save failed: {e:#}"));
            }
        }
        CommandOutcome::Issued
    }

    pub async fn set_rain_sense(&mut self, enable: bool) -> CommandOutcome {
        let control = if enable {
            DomeControl::RainSenseOn
        } else {
            DomeControl::RainSenseOff
        };
        let outcome = self.dome_blind(control).await;
        self.reprobe_sensor_flags().await;
        outcome
    }

    pub async fn set_park_sense(&mut self, enable: bool) -> CommandOutcome {
        let control = if enable {
            DomeControl::ParkSenseOn
        } else {
            DomeControl::ParkSenseOff
        };
        let outcome = self.dome_blind(control).await;
        self.reprobe_sensor_flags().await;
        outcome
    }

    pub async fn set_beeper(&mut self, enable: bool) -> CommandOutcome {
        let control = if enable {
            DomeControl::BeepOn
        } else {
            DomeControl::BeepOff
        };
        let outcome = self.dome_blind(control).await;
        self.reprobe_sensor_flags().await;
        outcome
    }

    /// Detach everything and leave the site dark. The relay bank goes last
    /// so it is still reachable to drop the other circuits.
    pub async fn shutdown(&mut self) {
        self.diag(EventSeverity::Info, "supervisor shutting down");
        if let Some(mount) = self.mount.take() {
            let _ = mount.disconnect().await;
        }
        if let Some(dome) = self.dome.take() {
            let _ = dome.disconnect().await;
        }
        if let Some(weather) = self.weather.take() {
            let _ = weather.disconnect().await;
        }
        if let Some(safety) = self.safety.take() {
            let _ = safety.disconnect().await;
        }
        self.relays.deenergize_all().await;
        self.relays.detach();
        self.publish_snapshot();
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    async fn dome_blind(&mut self, control: DomeControl) -> CommandOutcome {
        let Some(dome) = self.dome.clone() else {
            return CommandOutcome::Refused("no roof controller attached".into());
        };
        if !self.state.flags.try_acquire_dome() {
            return CommandOutcome::Skipped("roof channel busy".into());
        }
        let result = dome.command_blind(control).await;
        self.state.flags.release_dome();
        match result {
            Ok(()) => CommandOutcome::Issued,
            Err(e) => {
                self.diag(
                    EventSeverity::Error,
                    format!("roof {} failed: {e}", control.label()),
                );
                CommandOutcome::Refused(e.to_string())
            }
        }
    }

    async fn reprobe_sensor_flags(&mut self) {
        let Some(dome) = self.dome.clone() else { return };
        self.state.dome_sensors.park_sense =
            dome.command_bool(DomeSensorQuery::ParkSensor).await.ok();
        self.state.dome_sensors.rain_sense =
            dome.command_bool(DomeSensorQuery::RainSensor).await.ok();
        self.state.dome_sensors.beeper = dome.command_bool(DomeSensorQuery::BeepStatus).await.ok();
    }
}
