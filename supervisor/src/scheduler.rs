//! Tick scheduler
//!
//! Drives the supervisor from a tokio interval and serializes operator
//! commands onto the same task, so device access never needs a lock. A
//! [`SupervisorHandle`] is the outward face: send commands, read the latest
//! snapshot, subscribe to events.

use crate::commands::CommandOutcome;
use crate::event::SupervisorEvent;
use crate::supervisor::{Snapshot, Supervisor};
use anyhow::{anyhow, Result};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info};

const COMMAND_QUEUE_DEPTH: usize = 32;

/// Operator commands accepted by the scheduler.
#[derive(Debug)]
pub enum SupervisorCommand {
    OpenRoof { confirmed: bool },
    CloseRoof { confirmed: bool },
    ForceOpen { confirmed: bool },
    ForceClose { confirmed: bool },
    InitRoof { confirmed: bool },

    ParkToggle,
    TrackToggle,
    Home { force: bool },
    ForcePark,
    Abort,

    Hibernate,
    SetAutoOpen(bool),
    SetAutoClose(bool),

    ToggleRelay(usize),
    SetHumidityThreshold(f64),
    SetRainSense(bool),
    SetParkSense(bool),
    SetBeeper(bool),

    Shutdown,
}

struct Envelope {
    command: SupervisorCommand,
    reply: oneshot::Sender<CommandOutcome>,
}

/// Cloneable handle onto a running scheduler.
#[derive(Clone)]
pub struct SupervisorHandle {
    command_tx: mpsc::Sender<Envelope>,
    snapshot: Arc<RwLock<Snapshot>>,
    event_tx: broadcast::Sender<SupervisorEvent>,
}

impl SupervisorHandle {
    /// Send a command and wait for its outcome.
    pub async fn send(&self, command: SupervisorCommand) -> Result<CommandOutcome> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Envelope {
                command,
                reply: reply_tx,
            })
            .await
            .map_err(|_| anyhow!("supervisor is no longer running"))?;
        reply_rx
            .await
            .map_err(|_| anyhow!("supervisor dropped the command"))
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> Result<Snapshot> {
        self.snapshot
            .read()
            .map(|guard| guard.clone())
            .map_err(|_| anyhow!("snapshot lock poisoned"))
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.event_tx.subscribe()
    }
}

/// Owns the supervisor and runs the tick loop.
pub struct TickScheduler {
    supervisor: Supervisor,
    commands: mpsc::Receiver<Envelope>,
}

impl TickScheduler {
    pub fn new(supervisor: Supervisor) -> (Self, SupervisorHandle) {
        let (command_tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let handle = SupervisorHandle {
            command_tx,
            snapshot: supervisor.snapshot_handle(),
            event_tx: supervisor.event_sender(),
        };
        (
            Self {
                supervisor,
                commands,
            },
            handle,
        )
    }

    /// Run until a `Shutdown` command arrives or every handle is dropped.
    pub async fn run(mut self) {
        let period = Duration::from_millis(self.supervisor.config().tick_interval_ms);
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        info!(period_ms = period.as_millis() as u64, "supervisor loop started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.supervisor.tick().await;
                }
                envelope = self.commands.recv() => {
                    let Some(Envelope { command, reply }) = envelope else {
                        info!("all handles dropped, supervisor loop ending");
                        break;
                    };
                    debug!(?command, "operator command");
                    let shutdown = matches!(command, SupervisorCommand::Shutdown);
                    let outcome = self.dispatch(command).await;
                    let _ = reply.send(outcome);
                    if shutdown {
                        break;
                    }
                    // commands change state the display should see promptly
                    self.supervisor.publish_snapshot();
                }
            }
        }
    }

    async fn dispatch(&mut self, command: SupervisorCommand) -> CommandOutcome {
        let sup = &mut self.supervisor;
        match command {
            SupervisorCommand::OpenRoof { confirmed } => sup.request_open(confirmed).await,
            SupervisorCommand::CloseRoof { confirmed } => sup.request_close(confirmed).await,
            SupervisorCommand::ForceOpen { confirmed } => sup.force_open(confirmed).await,
            SupervisorCommand::ForceClose { confirmed } => sup.force_close(confirmed).await,
            SupervisorCommand::InitRoof { confirmed } => sup.init_roof(confirmed).await,

            SupervisorCommand::ParkToggle => sup.request_park_toggle().await,
            SupervisorCommand::TrackToggle => sup.request_track_toggle().await,
            SupervisorCommand::Home { force } => sup.request_home(force).await,
            SupervisorCommand::ForcePark => sup.force_park().await,
            SupervisorCommand::Abort => sup.request_abort().await,

            SupervisorCommand::Hibernate => sup.request_hibernate().await,
            SupervisorCommand::SetAutoOpen(enable) => sup.set_auto_open(enable),
            SupervisorCommand::SetAutoClose(enable) => sup.set_auto_close(enable),

            SupervisorCommand::ToggleRelay(channel) => sup.toggle_relay(channel).await,
            SupervisorCommand::SetHumidityThreshold(v) => sup.set_humidity_threshold(v),
            SupervisorCommand::SetRainSense(enable) => sup.set_rain_sense(enable).await,
            SupervisorCommand::SetParkSense(enable) => sup.set_park_sense(enable).await,
            SupervisorCommand::SetBeeper(enable) => sup.set_beeper(enable).await,

            SupervisorCommand::Shutdown => {
                sup.shutdown().await;
                CommandOutcome::Issued
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ObsyConfig;
    use obsy_devices::sim::{SimDome, SimMount, SimRelayBank};
    use obsy_devices::ShutterState;

    async fn running_rig() -> (SupervisorHandle, Arc<SimDome>, Arc<SimMount>, Arc<SimRelayBank>) {
        let mut config = ObsyConfig::default();
        config.tick_interval_ms = 10;
        let mut sup = Supervisor::new(config);
        let dome = Arc::new(SimDome::new());
        let mount = Arc::new(SimMount::new());
        let bank = Arc::new(SimRelayBank::new());
        sup.attach_dome(dome.clone()).await;
        sup.attach_mount(mount.clone());
        sup.attach_relays(bank.clone()).await;
        let (scheduler, handle) = TickScheduler::new(sup);
        tokio::spawn(scheduler.run());
        (handle, dome, mount, bank)
    }

    #[tokio::test]
    async fn ticks_publish_fresh_snapshots() {
        let (handle, dome, _, _) = running_rig().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.snapshot().unwrap().shutter, ShutterState::Closed);

        dome.set(|st| st.shutter = ShutterState::Open);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(handle.snapshot().unwrap().shutter, ShutterState::Open);
    }

    #[tokio::test]
    async fn commands_round_trip_their_outcome() {
        let (handle, _, _, bank) = running_rig().await;
        let outcome = handle.send(SupervisorCommand::ToggleRelay(2)).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Issued);
        assert!(bank.levels()[2]);
    }

    #[tokio::test]
    async fn shutdown_stops_the_loop() {
        let (handle, _, mount, _) = running_rig().await;
        let outcome = handle.send(SupervisorCommand::Shutdown).await.unwrap();
        assert_eq!(outcome, CommandOutcome::Issued);
        assert_eq!(mount.count_calls("disconnect"), 1);

        // the loop is gone, further commands fail
        let err = handle.send(SupervisorCommand::Abort).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn events_flow_through_the_handle() {
        let (handle, dome, _, _) = running_rig().await;
        let mut events = handle.subscribe();
        dome.set(|st| st.shutter = ShutterState::Open);

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            tokio::select! {
                ev = events.recv() => {
                    if let Ok(SupervisorEvent::ShutterChanged { to, .. }) = ev {
                        assert_eq!(to, ShutterState::Open);
                        break;
                    }
                }
                _ = tokio::time::sleep_until(deadline) => panic!("no shutter event"),
            }
        }
    }
}
