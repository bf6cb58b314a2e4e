//! Observatory safety supervisor
//!
//! Fuses roof, mount, weather and safety-monitor state into typed verdicts,
//! enforces the motion interlocks between the roll-off roof and the mount,
//! and runs the weather-driven automation sequences. Everything is driven by
//! a fixed-period tick; see [`scheduler::TickScheduler`].

pub mod automation;
pub mod commands;
pub mod config;
pub mod event;
mod fusion;
mod interlock;
pub mod relays;
pub mod scheduler;
pub mod state;
mod supervisor;

pub use automation::{Sequence, SequenceKind};
pub use commands::CommandOutcome;
pub use config::{ConfigStore, ObsyConfig, RelayPolarity};
pub use event::{EventSeverity, SupervisorEvent};
pub use scheduler::{SupervisorCommand, SupervisorHandle, TickScheduler};
pub use state::{AutoIntent, CompositeSafety, MountSafety, WeatherReadings};
pub use supervisor::{Connectivity, Snapshot, Supervisor};

#[cfg(test)]
pub(crate) mod testutil {
    use crate::config::ObsyConfig;
    use crate::supervisor::Supervisor;
    use obsy_devices::sim::{SimDome, SimMount, SimRelayBank, SimSafetyMonitor, SimWeather};
    use std::sync::Arc;

    /// A supervisor wired to one of every simulated device, on a clear night
    /// with the mount on its park sensor and the roof closed.
    pub struct Rig {
        pub sup: Supervisor,
        pub dome: Arc<SimDome>,
        pub mount: Arc<SimMount>,
        pub weather: Arc<SimWeather>,
        pub safety: Arc<SimSafetyMonitor>,
        pub bank: Arc<SimRelayBank>,
    }

    impl Rig {
        pub async fn new() -> Self {
            Self::with_config(|_| {}).await
        }

        pub async fn with_config(adjust: impl FnOnce(&mut ObsyConfig)) -> Self {
            let mut config = ObsyConfig::default();
            adjust(&mut config);
            let mut sup = Supervisor::new(config);

            let dome = Arc::new(SimDome::new());
            let mount = Arc::new(SimMount::new());
            let weather = Arc::new(SimWeather::clear_night());
            let safety = Arc::new(SimSafetyMonitor::new(true));
            let bank = Arc::new(SimRelayBank::new());

            sup.attach_dome(dome.clone()).await;
            sup.attach_mount(mount.clone());
            sup.attach_weather(weather.clone());
            sup.attach_safety(safety.clone());
            sup.attach_relays(bank.clone()).await;

            Self {
                sup,
                dome,
                mount,
                weather,
                safety,
                bank,
            }
        }

        /// Roof controller only: no mount, no weather, no safety monitor.
        pub async fn bare_dome() -> Self {
            let mut rig = Self::new().await;
            rig.sup.detach_mount();
            rig.sup.detach_weather();
            rig.sup.detach_safety();
            rig.sup.detach_relays();
            rig
        }
    }
}
