//! Interlock engine
//!
//! Runs after fusion each tick and enforces the hard safety rules: a mount
//! may only move under an open roof, and a roof may only close over a parked
//! mount. Escalation is graded: stop commands first, then the mount's power
//! circuits when commands cannot get through.

use crate::event::{EventSeverity, SupervisorEvent};
use crate::state::MountSafety;
use crate::supervisor::Supervisor;
use obsy_devices::{SharedMount, ShutterState};

impl Supervisor {
    pub(crate) async fn run_mount_interlocks(&mut self) {
        // the park sensor arrives through the roof controller; without it
        // there is no trustworthy verdict to act on
        if self.dome.is_none() {
            return;
        }
        if self.state.shutter == ShutterState::Open {
            return;
        }

        match self.state.mount_safety {
            MountSafety::Parked | MountSafety::Unknown => {}
            _ => match self.mount.clone() {
                Some(mount) => self.halt_unsafe_mount_motion(mount).await,
                // sensor says the mount is off park and there is no driver
                // to command it; power is the only lever left
                None => {
                    self.power_down_mount("mount off park with no driver attached")
                        .await;
                }
            },
        }

        // a roof closing over anything but a confirmed park gets stopped
        if self.state.shutter == ShutterState::Closing
            && !matches!(
                self.state.mount_safety,
                MountSafety::Parked | MountSafety::Unknown
            )
        {
            self.halt_roof_motion().await;
        }
    }

    /// Stop a mount that is not confirmed parked under a roof that is not
    /// open: abort any slew, kill tracking, then take its power away so it
    /// cannot start moving again until an operator intervenes.
    async fn halt_unsafe_mount_motion(&mut self, mount: SharedMount) {
        self.diag(
            EventSeverity::Warning,
            format!(
                "mount {} under a roof that is not open, stopping it",
                self.state.mount_safety
            ),
        );
        self.state.intents.open = false;

        if self.state.mount_safety == MountSafety::Slewing {
            match mount.abort_slew().await {
                Ok(()) => {
                    self.state.flags.latch_abort();
                    self.emit(SupervisorEvent::AbortIssued);
                }
                Err(e) => self.diag(EventSeverity::Error, format!("abort slew failed: {e}")),
            }
        }

        if mount.can_set_tracking().await.unwrap_or(false) {
            if let Err(e) = mount.set_tracking(false).await {
                self.diag(EventSeverity::Error, format!("tracking off failed: {e}"));
            }
        }

        self.power_down_mount("mount not provably parked under a closed roof")
            .await;
    }

    /// Last-resort escalation: cut the mount's power circuits.
    pub(crate) async fn power_down_mount(&mut self, reason: &str) {
        if !self.relays.is_connected() {
            self.diag(
                EventSeverity::Critical,
                format!("{reason}, and no relay bank is attached to cut power"),
            );
            return;
        }
        let dropped = self.relays.deenergize_mount_channels().await;
        self.mount = None;
        self.state.flags.latch_abort();
        self.emit(SupervisorEvent::MountPowerDown);
        self.diag(
            EventSeverity::Critical,
            format!("{reason}: de-energized {dropped} mount circuit(s)"),
        );
    }

    async fn halt_roof_motion(&mut self) {
        let Some(dome) = self.dome.clone() else { return };
        if !self.state.flags.try_acquire_dome() {
            return;
        }
        let result = dome.abort_slew().await;
        self.state.flags.release_dome();
        match result {
            Ok(()) => self.diag(
                EventSeverity::Warning,
                format!(
                    "roof closing while mount is {}, movement stopped",
                    self.state.mount_safety
                ),
            ),
            Err(e) => self.diag(
                EventSeverity::Error,
                format!("could not stop closing roof: {e}"),
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::state::MountSafety;
    use crate::testutil::Rig;
    use obsy_devices::ShutterState;

    #[tokio::test]
    async fn tracking_under_closed_roof_is_stopped() {
        let mut rig = Rig::new().await;
        rig.dome.set(|st| {
            st.shutter = ShutterState::Closed;
            st.park_sensor = false;
        });
        rig.mount.set(|st| st.tracking = true);
        rig.bank.set_level(0, true);

        rig.sup.tick().await;

        assert_eq!(rig.mount.count_calls("tracking_off"), 1);
        assert!(rig.mount.calls().iter().all(|c| c != "abort_slew"));
        // the guard also takes the mount's power and its handle away
        assert!(!rig.bank.levels()[0]);
        assert!(rig.sup.mount.is_none());
    }

    #[tokio::test]
    async fn slew_under_closed_roof_is_aborted_and_latched() {
        let mut rig = Rig::new().await;
        rig.dome.set(|st| st.park_sensor = false);
        rig.mount.set(|st| st.slewing = true);

        rig.sup.tick().await;

        assert_eq!(rig.mount.count_calls("abort_slew"), 1);
        assert!(rig.sup.state.flags.aborted());
        // the guard detached the mount; the sensor verdict stands alone now
        rig.mount.set(|st| st.slewing = true);
        rig.sup.tick().await;
        assert_eq!(rig.sup.state.mount_safety, MountSafety::NotAtPark);
    }

    #[tokio::test]
    async fn tracking_under_open_roof_is_left_alone() {
        let mut rig = Rig::new().await;
        rig.dome.set(|st| {
            st.shutter = ShutterState::Open;
            st.park_sensor = false;
        });
        rig.mount.set(|st| st.tracking = true);

        rig.sup.tick().await;

        assert!(rig.mount.calls().is_empty());
    }

    #[tokio::test]
    async fn command_failure_escalates_to_power_down() {
        let mut rig = Rig::new().await;
        rig.dome.set(|st| st.park_sensor = false);
        rig.mount.set(|st| {
            st.tracking = true;
            st.fail_commands = true;
        });
        rig.bank.set_level(0, true);
        rig.sup.tick().await;

        assert!(!rig.bank.levels()[0]);
        assert!(rig.sup.mount.is_none());
    }

    #[tokio::test]
    async fn missing_driver_off_park_cuts_power() {
        let mut rig = Rig::new().await;
        rig.sup.detach_mount();
        rig.dome.set(|st| st.park_sensor = false);
        rig.bank.set_level(0, true);

        rig.sup.tick().await;

        assert!(!rig.bank.levels()[0]);
    }

    #[tokio::test]
    async fn closing_roof_over_unparked_mount_is_stopped() {
        let mut rig = Rig::new().await;
        rig.dome.set(|st| {
            st.shutter = ShutterState::Closing;
            st.park_sensor = false;
        });

        rig.sup.tick().await;

        assert_eq!(rig.dome.count_calls("abort_slew"), 1);
    }

    #[tokio::test]
    async fn closing_roof_over_parked_mount_continues() {
        let mut rig = Rig::new().await;
        rig.dome.set(|st| {
            st.shutter = ShutterState::Closing;
            st.park_sensor = true;
        });

        rig.sup.tick().await;

        assert_eq!(rig.dome.count_calls("abort_slew"), 0);
    }
}
