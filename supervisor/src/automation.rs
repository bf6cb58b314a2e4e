//! Automation sequencer
//!
//! Multi-tick sequences (weather-driven close, hibernate) expressed as small
//! state machines advanced once per tick. Waits are bounded by poll budgets
//! instead of blocking: a phase that runs out of polls either falls through
//! to the next check or fails the sequence, and the supervisor keeps ticking
//! throughout.

use crate::event::{EventSeverity, SupervisorEvent};
use crate::state::MountSafety;
use crate::supervisor::Supervisor;
use obsy_devices::{DeviceError, ShutterState};
use serde::{Deserialize, Serialize};

/// Ticks allowed for the fused park verdict to settle after the device-level
/// park wait ends.
const PARK_SETTLE_POLLS: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SequenceKind {
    AutoClose,
    Hibernate,
}

impl std::fmt::Display for SequenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SequenceKind::AutoClose => write!(f, "auto-close"),
            SequenceKind::Hibernate => write!(f, "hibernate"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AutoClosePhase {
    /// Waiting for the mount to report park after a park command.
    WaitingPark { polls_left: u32 },
    /// Waiting for the fused verdict to confirm park before closing.
    ConfirmClose { polls_left: u32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HibernatePhase {
    /// Waiting for the roof to finish opening so the mount can move.
    WaitingOpen { polls_left: u32 },
    /// Waiting for the mount to reach its home position.
    Homing { polls_left: u32 },
    WaitingPark { polls_left: u32 },
    ConfirmClose { polls_left: u32 },
}

/// Current automation sequence, advanced once per tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sequence {
    Idle,
    AutoClose(AutoClosePhase),
    Hibernate(HibernatePhase),
}

impl Sequence {
    pub fn is_active(&self) -> bool {
        !matches!(self, Sequence::Idle)
    }
}

/// Outcome of one bounded-wait poll.
enum WaitPoll {
    Reached,
    Waiting { polls_left: u32 },
    Expired,
}

fn poll_step(reached: bool, polls_left: u32) -> WaitPoll {
    if reached {
        WaitPoll::Reached
    } else if polls_left <= 1 {
        WaitPoll::Expired
    } else {
        WaitPoll::Waiting {
            polls_left: polls_left - 1,
        }
    }
}

impl Supervisor {
    pub(crate) async fn run_roof_automation(&mut self) {
        if self.dome.is_none() {
            return;
        }
        if self.sequence.is_active() {
            self.advance_sequence().await;
            return;
        }

        let good = self.state.composite.good_conditions;
        match self.state.shutter {
            ShutterState::Open if !good && self.state.intents.close => {
                self.start_auto_close().await;
            }
            ShutterState::Open if good && self.state.intents.open => {
                // the open already happened; finish waking the mount up
                self.run_open_followup().await;
            }
            ShutterState::Closed if good && self.state.intents.open => {
                self.try_auto_open().await;
            }
            _ => {}
        }
    }

    async fn advance_sequence(&mut self) {
        match self.sequence {
            Sequence::Idle => {}
            Sequence::AutoClose(phase) => self.advance_auto_close(phase).await,
            Sequence::Hibernate(phase) => self.advance_hibernate(phase).await,
        }
    }

    // ------------------------------------------------------------------
    // Weather-driven close
    // ------------------------------------------------------------------

    /// Conditions have gone bad under an open roof: park the mount, then
    /// close once park is confirmed.
    async fn start_auto_close(&mut self) {
        self.emit(SupervisorEvent::SequenceStarted {
            kind: SequenceKind::AutoClose,
        });
        self.diag(
            EventSeverity::Warning,
            "conditions no longer safe, closing the roof",
        );
        if let Some(mount) = self.mount.clone() {
            if mount.can_park().await.unwrap_or(false) {
                if let Err(e) = mount.park().await {
                    self.mount_fault("park command", e).await;
                }
            }
        }
        self.sequence = Sequence::AutoClose(AutoClosePhase::WaitingPark {
            polls_left: self.config.mount_timeout,
        });
    }

    async fn advance_auto_close(&mut self, phase: AutoClosePhase) {
        match phase {
            AutoClosePhase::WaitingPark { polls_left } => {
                match self.poll_device_park(polls_left).await {
                    // an expired device wait is not a failure on its own:
                    // the close gate re-checks the fused verdict, which can
                    // still confirm park through the physical sensor
                    WaitPoll::Reached | WaitPoll::Expired => {
                        self.sequence = Sequence::AutoClose(AutoClosePhase::ConfirmClose {
                            polls_left: PARK_SETTLE_POLLS,
                        });
                    }
                    WaitPoll::Waiting { polls_left } => {
                        self.sequence =
                            Sequence::AutoClose(AutoClosePhase::WaitingPark { polls_left });
                    }
                }
            }
            AutoClosePhase::ConfirmClose { polls_left } => {
                self.confirm_close(SequenceKind::AutoClose, polls_left).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Auto-open and its follow-up
    // ------------------------------------------------------------------

    /// Conditions have come good over a closed roof with an open intent
    /// latched: issue a single open. The intent stays latched; the follow-up
    /// clears it once the roof is actually open.
    async fn try_auto_open(&mut self) {
        if self.state.mount_safety != MountSafety::Parked {
            return;
        }
        let Some(dome) = self.dome.clone() else { return };
        if !self.state.flags.try_acquire_dome() {
            return;
        }
        let result = dome.open_shutter().await;
        self.state.flags.release_dome();
        match result {
            Ok(()) => self.diag(EventSeverity::Info, "conditions good, opening the roof"),
            Err(e) => self.diag(EventSeverity::Error, format!("roof open failed: {e}")),
        }
    }

    /// The roof is open with the open intent still latched: wake the mount
    /// and release the intent.
    async fn run_open_followup(&mut self) {
        if self.state.mount_safety != MountSafety::Parked {
            return;
        }
        if let Some(mount) = self.mount.clone() {
            if mount.can_unpark().await.unwrap_or(false) {
                if let Err(e) = mount.unpark().await {
                    self.mount_fault("unpark command", e).await;
                    return;
                }
            }
            if mount.can_set_tracking().await.unwrap_or(false) {
                if let Err(e) = mount.set_tracking(false).await {
                    self.mount_fault("tracking off", e).await;
                    return;
                }
            }
            if mount.can_find_home().await.unwrap_or(false) {
                if let Err(e) = mount.find_home().await {
                    self.mount_fault("find home", e).await;
                    return;
                }
            }
        }
        self.state.intents.open = false;
        self.diag(EventSeverity::Info, "roof open, mount released from park");
    }

    // ------------------------------------------------------------------
    // Hibernate
    // ------------------------------------------------------------------

    pub(crate) async fn advance_hibernate(&mut self, phase: HibernatePhase) {
        match phase {
            HibernatePhase::WaitingOpen { polls_left } => {
                match poll_step(self.state.shutter == ShutterState::Open, polls_left) {
                    WaitPoll::Reached => {
                        if let Some(mount) = self.mount.clone() {
                            // free the mount to move, then send it home
                            if mount.can_unpark().await.unwrap_or(false) {
                                if let Err(e) = mount.unpark().await {
                                    self.mount_fault("unpark command", e).await;
                                    self.sequence_failed(
                                        SequenceKind::Hibernate,
                                        "mount would not unpark",
                                    );
                                    return;
                                }
                            }
                            if mount.can_set_tracking().await.unwrap_or(false) {
                                if let Err(e) = mount.set_tracking(false).await {
                                    self.mount_fault("tracking off", e).await;
                                }
                            }
                            if mount.can_find_home().await.unwrap_or(false) {
                                if let Err(e) = mount.find_home().await {
                                    self.mount_fault("find home", e).await;
                                    self.sequence_failed(
                                        SequenceKind::Hibernate,
                                        "mount would not home",
                                    );
                                    return;
                                }
                            }
                        }
                        self.sequence = Sequence::Hibernate(HibernatePhase::Homing {
                            polls_left: self.config.mount_timeout,
                        });
                    }
                    WaitPoll::Waiting { polls_left } => {
                        self.sequence =
                            Sequence::Hibernate(HibernatePhase::WaitingOpen { polls_left });
                    }
                    WaitPoll::Expired => {
                        self.sequence_failed(SequenceKind::Hibernate, "roof did not open");
                    }
                }
            }
            HibernatePhase::Homing { polls_left } => {
                let homed = match self.mount.clone() {
                    Some(mount) => mount.at_home().await.unwrap_or(false),
                    None => true,
                };
                match poll_step(homed, polls_left) {
                    WaitPoll::Reached => {
                        if let Some(mount) = self.mount.clone() {
                            if mount.can_park().await.unwrap_or(false) {
                                if let Err(e) = mount.park().await {
                                    self.mount_fault("park command", e).await;
                                }
                            }
                        }
                        self.sequence = Sequence::Hibernate(HibernatePhase::WaitingPark {
                            polls_left: self.config.mount_timeout,
                        });
                    }
                    WaitPoll::Waiting { polls_left } => {
                        self.sequence = Sequence::Hibernate(HibernatePhase::Homing { polls_left });
                    }
                    WaitPoll::Expired => {
                        self.sequence_failed(SequenceKind::Hibernate, "mount did not reach home");
                    }
                }
            }
            HibernatePhase::WaitingPark { polls_left } => {
                match self.poll_device_park(polls_left).await {
                    WaitPoll::Reached | WaitPoll::Expired => {
                        self.sequence = Sequence::Hibernate(HibernatePhase::ConfirmClose {
                            polls_left: PARK_SETTLE_POLLS,
                        });
                    }
                    WaitPoll::Waiting { polls_left } => {
                        self.sequence =
                            Sequence::Hibernate(HibernatePhase::WaitingPark { polls_left });
                    }
                }
            }
            HibernatePhase::ConfirmClose { polls_left } => {
                self.confirm_close(SequenceKind::Hibernate, polls_left).await;
            }
        }
    }

    // ------------------------------------------------------------------
    // Shared steps
    // ------------------------------------------------------------------

    /// One poll of the mount's own park flag. With no driver attached the
    /// fused verdict stands in.
    async fn poll_device_park(&mut self, polls_left: u32) -> WaitPoll {
        let parked = match self.mount.clone() {
            Some(mount) => mount.at_park().await.unwrap_or(false),
            None => self.state.mount_safety == MountSafety::Parked,
        };
        poll_step(parked, polls_left)
    }

    /// Final gate before closing the roof: the fused verdict must confirm
    /// park. A mount the sensor cannot vouch for keeps the roof open.
    async fn confirm_close(&mut self, kind: SequenceKind, polls_left: u32) {
        if self.state.mount_safety == MountSafety::Parked {
            let Some(dome) = self.dome.clone() else {
                self.sequence_failed(kind, "roof controller went away");
                return;
            };
            if !self.state.flags.try_acquire_dome() {
                // another command holds the channel, try again next tick
                return;
            }
            let result = dome.close_shutter().await;
            self.state.flags.release_dome();
            match result {
                Ok(()) => {
                    self.state.intents.open = false;
                    match kind {
                        SequenceKind::AutoClose => {
                            // rain also takes the mount's power away until
                            // the operator intervenes
                            if !self.state.composite.no_rain && self.relays.is_connected() {
                                let dropped = self.relays.deenergize_mount_channels().await;
                                if dropped > 0 {
                                    self.emit(SupervisorEvent::MountPowerDown);
                                    self.diag(
                                        EventSeverity::Warning,
                                        "rain detected, mount circuits de-energized",
                                    );
                                }
                            }
                        }
                        SequenceKind::Hibernate => {
                            if self.relays.is_connected() {
                                self.relays.deenergize_mount_channels().await;
                                self.emit(SupervisorEvent::MountPowerDown);
                            }
                        }
                    }
                    self.sequence = Sequence::Idle;
                    self.emit(SupervisorEvent::SequenceCompleted { kind });
                    self.diag(EventSeverity::Info, format!("{kind} complete, roof closing"));
                }
                Err(e) => {
                    self.sequence_failed(kind, &format!("roof close failed: {e}"));
                }
            }
            return;
        }

        match poll_step(false, polls_left) {
            WaitPoll::Expired => {
                self.sequence_failed(kind, "mount never confirmed park, roof left open");
            }
            WaitPoll::Waiting { polls_left } => {
                self.sequence = match kind {
                    SequenceKind::AutoClose => {
                        Sequence::AutoClose(AutoClosePhase::ConfirmClose { polls_left })
                    }
                    SequenceKind::Hibernate => {
                        Sequence::Hibernate(HibernatePhase::ConfirmClose { polls_left })
                    }
                };
            }
            WaitPoll::Reached => unreachable!(),
        }
    }

    /// A mount command failed mid-sequence. A dead link gets escalated to a
    /// power cut; anything else is logged and the sequence carries on to its
    /// own checks.
    pub(crate) async fn mount_fault(&mut self, what: &str, err: DeviceError) {
        self.diag(EventSeverity::Error, format!("{what} failed: {err}"));
        if err.is_comms_loss() {
            self.power_down_mount("mount link lost mid-sequence").await;
        }
    }

    pub(crate) fn sequence_failed(&mut self, kind: SequenceKind, reason: &str) {
        self.sequence = Sequence::Idle;
        self.emit(SupervisorEvent::SequenceFailed {
            kind,
            reason: reason.to_string(),
        });
        self.diag(EventSeverity::Error, format!("{kind} failed: {reason}"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Rig;

    async fn ticks(rig: &mut Rig, n: usize) {
        for _ in 0..n {
            rig.sup.tick().await;
        }
    }

    #[tokio::test]
    async fn rain_parks_then_closes_and_cuts_mount_power() {
        let mut rig = Rig::new().await;
        rig.dome.set(|st| {
            st.shutter = ShutterState::Open;
            st.park_sensor = false;
            st.raining = true;
        });
        rig.mount.set(|st| st.tracking = true);
        rig.bank.set_level(0, true);
        rig.sup.state.intents.close = true;

        // tick 1: rain seen, park issued
        rig.sup.tick().await;
        assert_eq!(rig.mount.count_calls("park"), 1);
        assert!(matches!(
            rig.sup.sequence,
            Sequence::AutoClose(AutoClosePhase::WaitingPark { .. })
        ));

        // park completed; let the wait and the confirm gate run
        rig.dome.set(|st| st.park_sensor = true);
        ticks(&mut rig, 3).await;

        assert_eq!(rig.dome.count_calls("close_shutter"), 1);
        assert_eq!(rig.sup.sequence, Sequence::Idle);
        // rain close also drops the mount's power
        assert!(!rig.bank.levels()[0]);
    }

    #[tokio::test]
    async fn close_intent_not_latched_means_no_auto_close() {
        let mut rig = Rig::new().await;
        rig.dome.set(|st| {
            st.shutter = ShutterState::Open;
            st.raining = true;
        });

        ticks(&mut rig, 3).await;

        assert_eq!(rig.dome.count_calls("close_shutter"), 0);
        assert_eq!(rig.mount.count_calls("park"), 0);
    }

    #[tokio::test]
    async fn park_wait_expires_after_exact_poll_budget() {
        let mut rig = Rig::with_config(|cfg| cfg.mount_timeout = 3).await;
        rig.dome.set(|st| {
            st.shutter = ShutterState::Open;
            st.park_sensor = false;
            st.raining = true;
        });
        rig.mount.set(|st| st.park_completes = false);
        rig.sup.state.intents.close = true;

        rig.sup.tick().await; // park issued, no at_park poll yet
        assert_eq!(rig.mount.at_park_reads(), 0);

        ticks(&mut rig, 3).await;
        assert_eq!(rig.mount.at_park_reads(), 3);
        assert!(matches!(
            rig.sup.sequence,
            Sequence::AutoClose(AutoClosePhase::ConfirmClose { .. })
        ));

        // sensor still says not parked: the confirm gate refuses to close
        let mut events = rig.sup.subscribe();
        ticks(&mut rig, 2).await;
        assert_eq!(rig.sup.sequence, Sequence::Idle);
        assert_eq!(rig.dome.count_calls("close_shutter"), 0);
        let mut failed = false;
        while let Ok(ev) = events.try_recv() {
            if matches!(ev, SupervisorEvent::SequenceFailed { .. }) {
                failed = true;
            }
        }
        assert!(failed);
    }

    #[tokio::test]
    async fn expired_device_wait_still_closes_when_sensor_confirms_park() {
        let mut rig = Rig::with_config(|cfg| cfg.mount_timeout = 2).await;
        rig.dome.set(|st| {
            st.shutter = ShutterState::Open;
            st.park_sensor = true; // physical sensor knows better
            st.raining = true;
        });
        // a driver that never reports AtPark
        rig.mount.set(|st| st.park_completes = false);
        rig.sup.state.intents.close = true;

        ticks(&mut rig, 4).await;

        assert_eq!(rig.dome.count_calls("close_shutter"), 1);
        assert_eq!(rig.sup.sequence, Sequence::Idle);
    }

    #[tokio::test]
    async fn auto_open_issues_one_open_and_keeps_the_intent() {
        let mut rig = Rig::new().await;
        rig.sup.state.intents.open = true;

        rig.sup.tick().await;
        assert_eq!(rig.dome.count_calls("open_shutter"), 1);
        assert!(rig.sup.state.intents.open);

        // shutter is now Opening, the trigger must not re-fire
        rig.sup.tick().await;
        assert_eq!(rig.dome.count_calls("open_shutter"), 1);
    }

    #[tokio::test]
    async fn open_followup_wakes_mount_and_clears_intent() {
        let mut rig = Rig::new().await;
        rig.sup.state.intents.open = true;
        rig.mount.set(|st| st.at_park = true);
        rig.dome.set(|st| st.shutter = ShutterState::Open);

        rig.sup.tick().await;

        assert_eq!(rig.mount.count_calls("unpark"), 1);
        assert_eq!(rig.mount.count_calls("find_home"), 1);
        assert!(!rig.sup.state.intents.open);
    }

    #[tokio::test]
    async fn auto_open_refused_without_a_park_verdict() {
        let mut rig = Rig::new().await;
        // controller without the park extension: the verdict stays Unknown
        rig.dome.set(|st| st.extensions_supported = false);
        let dome = rig.dome.clone();
        rig.sup.attach_dome(dome).await;
        rig.sup.state.intents.open = true;

        ticks(&mut rig, 2).await;

        assert_eq!(rig.dome.count_calls("open_shutter"), 0);
        assert!(rig.sup.state.intents.open);
    }

    #[tokio::test]
    async fn hibernate_homes_parks_and_closes() {
        let mut rig = Rig::new().await;
        rig.dome.set(|st| st.shutter = ShutterState::Open);
        rig.sup.sequence = Sequence::Hibernate(HibernatePhase::WaitingOpen { polls_left: 1 });
        rig.bank.set_level(0, true);

        // open seen -> home issued -> homed -> park -> parked -> close
        ticks(&mut rig, 5).await;

        assert_eq!(rig.mount.count_calls("find_home"), 1);
        assert_eq!(rig.mount.count_calls("park"), 1);
        assert_eq!(rig.dome.count_calls("close_shutter"), 1);
        assert_eq!(rig.sup.sequence, Sequence::Idle);
        // hibernate ends with the mount powered off
        assert!(!rig.bank.levels()[0]);
    }

    #[tokio::test]
    async fn hibernate_fails_if_roof_never_opens() {
        let mut rig = Rig::new().await;
        rig.sup.sequence = Sequence::Hibernate(HibernatePhase::WaitingOpen { polls_left: 2 });
        let mut events = rig.sup.subscribe();

        ticks(&mut rig, 3).await;

        assert_eq!(rig.sup.sequence, Sequence::Idle);
        let mut failed = false;
        while let Ok(ev) = events.try_recv() {
            if let SupervisorEvent::SequenceFailed { kind, .. } = ev {
                assert_eq!(kind, SequenceKind::Hibernate);
                failed = true;
            }
        }
        assert!(failed);
    }
}
