//! Supervisor core
//!
//! Owns the device handles, fused state and the current automation sequence.
//! One `tick()` runs the whole supervisory cycle in a fixed order: sense,
//! fuse, interlock, automate, publish. The tick scheduler is the only caller;
//! everything in here is single-threaded by construction.

use crate::automation::Sequence;
use crate::config::{ConfigStore, ObsyConfig};
use crate::event::{EventSeverity, SupervisorEvent};
use crate::relays::RelaySupervisor;
use crate::state::{
    AutoIntent, CompositeSafety, DomeSensorFlags, MountSafety, SupervisorState, WeatherReadings,
};
use chrono::{DateTime, Utc};
use obsy_devices::{
    DeviceError, DomeSensorQuery, SharedDome, SharedMount, SharedSafetyMonitor, SharedWeather,
    ShutterState, RELAY_CHANNELS,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Which vendor extensions the attached roof controller answered at probe
/// time. An unsupported query is never retried; its safety axis falls back
/// to the permissive default.
#[derive(Debug, Clone, Copy, Default)]
pub struct DomeExtensionCaps {
    pub rain_query: bool,
    pub park_query: bool,
}

/// Which devices are currently attached.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Connectivity {
    pub dome: bool,
    pub mount: bool,
    pub weather: bool,
    pub safety: bool,
    pub relays: bool,
}

/// Point-in-time view of the whole system, published after every tick.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub timestamp: DateTime<Utc>,
    pub shutter: ShutterState,
    pub mount_safety: MountSafety,
    pub composite: CompositeSafety,
    pub intents: AutoIntent,
    pub weather: WeatherReadings,
    pub dome_sensors: DomeSensorFlags,
    pub relay_states: [bool; RELAY_CHANNELS],
    pub relay_names: [String; RELAY_CHANNELS],
    pub connectivity: Connectivity,
    pub sequence: Sequence,
    pub aborted: bool,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            shutter: ShutterState::Unknown,
            mount_safety: MountSafety::Unknown,
            composite: CompositeSafety::default(),
            intents: AutoIntent::default(),
            weather: WeatherReadings::default(),
            dome_sensors: DomeSensorFlags::default(),
            relay_states: [false; RELAY_CHANNELS],
            relay_names: Default::default(),
            connectivity: Connectivity::default(),
            sequence: Sequence::Idle,
            aborted: false,
        }
    }
}

pub struct Supervisor {
    pub(crate) config: ObsyConfig,
    pub(crate) store: Option<ConfigStore>,

    pub(crate) dome: Option<SharedDome>,
    pub(crate) mount: Option<SharedMount>,
    pub(crate) weather: Option<SharedWeather>,
    pub(crate) safety: Option<SharedSafetyMonitor>,
    pub(crate) relays: RelaySupervisor,

    pub(crate) state: SupervisorState,
    pub(crate) sequence: Sequence,
    pub(crate) dome_caps: DomeExtensionCaps,

    pub(crate) event_tx: broadcast::Sender<SupervisorEvent>,
    pub(crate) snapshot: Arc<RwLock<Snapshot>>,
}

impl Supervisor {
    pub fn new(config: ObsyConfig) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let relays = RelaySupervisor::new(config.relay_polarity);
        Self {
            config,
            store: None,
            dome: None,
            mount: None,
            weather: None,
            safety: None,
            relays,
            state: SupervisorState::new(),
            sequence: Sequence::Idle,
            dome_caps: DomeExtensionCaps::default(),
            event_tx,
            snapshot: Arc::new(RwLock::new(Snapshot::default())),
        }
    }

    /// Attach a backing store so threshold changes persist across restarts.
    pub fn with_store(mut self, store: ConfigStore) -> Self {
        self.store = Some(store);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SupervisorEvent> {
        self.event_tx.subscribe()
    }

    pub fn snapshot_handle(&self) -> Arc<RwLock<Snapshot>> {
        Arc::clone(&self.snapshot)
    }

    pub(crate) fn event_sender(&self) -> broadcast::Sender<SupervisorEvent> {
        self.event_tx.clone()
    }

    pub fn config(&self) -> &ObsyConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Device attachment
    // ------------------------------------------------------------------

    /// Attach a connected roof controller and probe its vendor extensions.
    pub async fn attach_dome(&mut self, dome: SharedDome) {
        self.dome_caps = DomeExtensionCaps {
            rain_query: !matches!(
                dome.command_bool(DomeSensorQuery::Rain).await,
                Err(DeviceError::NotSupported(_))
            ),
            park_query: !matches!(
                dome.command_bool(DomeSensorQuery::Park).await,
                Err(DeviceError::NotSupported(_))
            ),
        };
        self.state.dome_sensors = DomeSensorFlags {
            park_sense: dome.command_bool(DomeSensorQuery::ParkSensor).await.ok(),
            rain_sense: dome.command_bool(DomeSensorQuery::RainSensor).await.ok(),
            beeper: dome.command_bool(DomeSensorQuery::BeepStatus).await.ok(),
        };
        info!(
            rain_query = self.dome_caps.rain_query,
            park_query = self.dome_caps.park_query,
            "roof controller attached"
        );
        self.dome = Some(dome);
    }

    /// Detach the roof controller. Any latched automation intents are
    /// dropped with it; they cannot run without a roof.
    pub fn detach_dome(&mut self) {
        self.dome = None;
        self.state.intents = AutoIntent::default();
        self.state.shutter = ShutterState::Unknown;
        self.state.dome_sensors = DomeSensorFlags::default();
        self.sequence = Sequence::Idle;
    }

    pub fn attach_mount(&mut self, mount: SharedMount) {
        self.mount = Some(mount);
        self.state.flags.clear_abort();
        self.state.mount_safety = MountSafety::Unknown;
    }

    pub fn detach_mount(&mut self) {
        self.mount = None;
        self.state.mount_safety = MountSafety::Unknown;
    }

    pub fn attach_weather(&mut self, weather: SharedWeather) {
        self.weather = Some(weather);
    }

    pub fn detach_weather(&mut self) {
        self.weather = None;
        self.state.weather = WeatherReadings::default();
    }

    pub fn attach_safety(&mut self, safety: SharedSafetyMonitor) {
        self.safety = Some(safety);
    }

    pub fn detach_safety(&mut self) {
        self.safety = None;
    }

    pub async fn attach_relays(&mut self, bank: obsy_devices::SharedRelayBank) {
        self.relays.attach(bank).await;
    }

    pub fn detach_relays(&mut self) {
        self.relays.detach();
    }

    // ------------------------------------------------------------------
    // Tick pipeline
    // ------------------------------------------------------------------

    /// One supervisory cycle. Step order is significant: the interlocks and
    /// automation must act on readings taken this cycle, and the composite
    /// verdict must be fused before the mount verdict consumes the park
    /// sensor reading.
    pub async fn tick(&mut self) {
        if self.dome.is_none() {
            // no roof, nothing to automate; drop any latched intents
            self.state.intents = AutoIntent::default();
            self.sequence = Sequence::Idle;
        }

        self.refresh_shutter().await;
        self.refresh_weather().await;
        self.refresh_safety_monitor().await;
        self.compute_composite();
        self.refresh_mount().await;
        self.relays.refresh_all().await;
        self.run_mount_interlocks().await;
        self.run_roof_automation().await;
        self.publish_snapshot();
    }

    pub(crate) fn publish_snapshot(&self) {
        let snap = Snapshot {
            timestamp: Utc::now(),
            shutter: self.state.shutter,
            mount_safety: self.state.mount_safety,
            composite: self.state.composite,
            intents: self.state.intents,
            weather: self.state.weather,
            dome_sensors: self.state.dome_sensors,
            relay_states: self.relays.states(),
            relay_names: self.relays.channel_names().clone(),
            connectivity: Connectivity {
                dome: self.dome.is_some(),
                mount: self.mount.is_some(),
                weather: self.weather.is_some(),
                safety: self.safety.is_some(),
                relays: self.relays.is_connected(),
            },
            sequence: self.sequence.clone(),
            aborted: self.state.flags.aborted(),
        };
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = snap;
        }
    }

    // ------------------------------------------------------------------
    // Diagnostics
    // ------------------------------------------------------------------

    pub(crate) fn emit(&self, event: SupervisorEvent) {
        // no subscribers is fine
        let _ = self.event_tx.send(event);
    }

    pub(crate) fn diag(&self, severity: EventSeverity, message: impl Into<String>) {
        let message = message.into();
        match severity {
            EventSeverity::Info => info!("{message}"),
            EventSeverity::Warning => warn!("{message}"),
            EventSeverity::Error | EventSeverity::Critical => error!("{message}"),
        }
        self.emit(SupervisorEvent::Diagnostic { severity, message });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::Rig;
    use obsy_devices::sim::SimDome;
    use std::sync::Arc;

    #[tokio::test]
    async fn attach_probes_extension_caps_and_sensor_flags() {
        let mut sup = Supervisor::new(ObsyConfig::default());
        let dome = Arc::new(SimDome::new());
        dome.set(|st| st.beeper_enabled = true);
        sup.attach_dome(dome).await;

        assert!(sup.dome_caps.rain_query);
        assert!(sup.dome_caps.park_query);
        assert_eq!(sup.state.dome_sensors.beeper, Some(true));
        assert_eq!(sup.state.dome_sensors.rain_sense, Some(true));
    }

    #[tokio::test]
    async fn attach_marks_unsupported_extensions() {
        let mut sup = Supervisor::new(ObsyConfig::default());
        let dome = Arc::new(SimDome::new());
        dome.set(|st| st.extensions_supported = false);
        sup.attach_dome(dome).await;

        assert!(!sup.dome_caps.rain_query);
        assert!(!sup.dome_caps.park_query);
        assert_eq!(sup.state.dome_sensors.park_sense, None);
    }

    #[tokio::test]
    async fn detach_dome_drops_latched_intents() {
        let mut rig = Rig::new().await;
        rig.sup.state.intents.open = true;
        rig.sup.state.intents.close = true;
        rig.sup.detach_dome();
        assert!(!rig.sup.state.intents.open);
        assert!(!rig.sup.state.intents.close);
        assert_eq!(rig.sup.state.shutter, ShutterState::Unknown);
    }

    #[tokio::test]
    async fn tick_publishes_a_snapshot() {
        let mut rig = Rig::new().await;
        rig.sup.tick().await;
        let snap = rig.sup.snapshot.read().unwrap().clone();
        assert!(snap.connectivity.dome);
        assert!(snap.connectivity.mount);
        assert_eq!(snap.shutter, ShutterState::Closed);
        assert_eq!(snap.relay_names[0], "Mount Power");
    }
}
