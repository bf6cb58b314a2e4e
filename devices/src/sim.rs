//! Simulated devices for tests and bench runs
//!
//! Scripted implementations of every capability trait. State is set directly
//! by the test; commands are recorded so tests can assert exactly what the
//! supervisor issued. Status reads are counted separately from commands so
//! poll budgets can be checked without command noise.

use crate::{
    DeviceError, DeviceResult, Dome, DomeControl, DomeSensorQuery, Mount, RelayBank,
    SafetyMonitor, ShutterState, Weather, RELAY_CHANNELS,
};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

fn comms(what: &str) -> DeviceError {
    DeviceError::Comms(format!("{what}: no response"))
}

// ============================================================================
// Dome
// ============================================================================

#[derive(Debug, Clone)]
pub struct SimDomeState {
    pub shutter: ShutterState,
    pub raining: bool,
    pub park_sensor: bool,
    pub park_sense_enabled: bool,
    pub rain_sense_enabled: bool,
    pub beeper_enabled: bool,
    /// When false, vendor extension calls return `NotSupported`.
    pub extensions_supported: bool,
    /// When true, status reads fail with a comms error.
    pub fail_reads: bool,
}

impl Default for SimDomeState {
    fn default() -> Self {
        Self {
            shutter: ShutterState::Closed,
            raining: false,
            park_sensor: true,
            park_sense_enabled: true,
            rain_sense_enabled: true,
            beeper_enabled: false,
            extensions_supported: true,
            fail_reads: false,
        }
    }
}

#[derive(Default)]
pub struct SimDome {
    state: Mutex<SimDomeState>,
    calls: Mutex<Vec<String>>,
}

impl SimDome {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, f: impl FnOnce(&mut SimDomeState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().unwrap().clear();
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    fn record(&self, call: impl Into<String>) {
        self.calls.lock().unwrap().push(call.into());
    }
}

#[async_trait]
impl Dome for SimDome {
    async fn connect(&self) -> DeviceResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        Ok(())
    }

    async fn shutter_status(&self) -> DeviceResult<ShutterState> {
        let st = self.state.lock().unwrap();
        if st.fail_reads {
            return Err(comms("shutter_status"));
        }
        Ok(st.shutter)
    }

    async fn open_shutter(&self) -> DeviceResult<()> {
        self.record("open_shutter");
        self.state.lock().unwrap().shutter = ShutterState::Opening;
        Ok(())
    }

    async fn close_shutter(&self) -> DeviceResult<()> {
        self.record("close_shutter");
        self.state.lock().unwrap().shutter = ShutterState::Closing;
        Ok(())
    }

    async fn abort_slew(&self) -> DeviceResult<()> {
        self.record("abort_slew");
        Ok(())
    }

    async fn command_bool(&self, query: DomeSensorQuery) -> DeviceResult<bool> {
        let st = self.state.lock().unwrap();
        if !st.extensions_supported {
            return Err(DeviceError::NotSupported(query.label().to_string()));
        }
        if st.fail_reads {
            return Err(comms(query.label()));
        }
        Ok(match query {
            DomeSensorQuery::Rain => st.raining,
            DomeSensorQuery::Park => st.park_sensor,
            DomeSensorQuery::ParkSensor => st.park_sense_enabled,
            DomeSensorQuery::RainSensor => st.rain_sense_enabled,
            DomeSensorQuery::BeepStatus => st.beeper_enabled,
        })
    }

    async fn command_blind(&self, control: DomeControl) -> DeviceResult<()> {
        self.record(format!("command_blind:{}", control.label()));
        let mut st = self.state.lock().unwrap();
        if !st.extensions_supported {
            return Err(DeviceError::NotSupported(control.label().to_string()));
        }
        match control {
            DomeControl::ForceOpen => st.shutter = ShutterState::Opening,
            DomeControl::ForceClose => st.shutter = ShutterState::Closing,
            DomeControl::Init => {}
            DomeControl::RainSenseOn => st.rain_sense_enabled = true,
            DomeControl::RainSenseOff => st.rain_sense_enabled = false,
            DomeControl::ParkSenseOn => st.park_sense_enabled = true,
            DomeControl::ParkSenseOff => st.park_sense_enabled = false,
            DomeControl::BeepOn => st.beeper_enabled = true,
            DomeControl::BeepOff => st.beeper_enabled = false,
        }
        Ok(())
    }
}

// ============================================================================
// Mount
// ============================================================================

#[derive(Debug, Clone)]
pub struct SimMountState {
    pub at_park: bool,
    pub at_home: bool,
    pub tracking: bool,
    pub slewing: bool,
    pub can_park: bool,
    pub can_unpark: bool,
    pub can_find_home: bool,
    pub can_set_tracking: bool,
    /// When true, `park()` completes immediately (the next `at_park` read
    /// sees true). When false, the mount never reaches park.
    pub park_completes: bool,
    /// When true, `find_home()` completes immediately.
    pub home_completes: bool,
    /// When true, every command fails with a comms error.
    pub fail_commands: bool,
}

impl Default for SimMountState {
    fn default() -> Self {
        Self {
            at_park: false,
            at_home: false,
            tracking: false,
            slewing: false,
            can_park: true,
            can_unpark: true,
            can_find_home: true,
            can_set_tracking: true,
            park_completes: true,
            home_completes: true,
            fail_commands: false,
        }
    }
}

#[derive(Default)]
pub struct SimMount {
    state: Mutex<SimMountState>,
    calls: Mutex<Vec<String>>,
    at_park_reads: AtomicU32,
}

impl SimMount {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, f: impl FnOnce(&mut SimMountState)) {
        f(&mut self.state.lock().unwrap());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, name: &str) -> usize {
        self.calls.lock().unwrap().iter().filter(|c| *c == name).count()
    }

    /// Number of `at_park` status reads since the last reset.
    pub fn at_park_reads(&self) -> u32 {
        self.at_park_reads.load(Ordering::SeqCst)
    }

    pub fn reset_at_park_reads(&self) {
        self.at_park_reads.store(0, Ordering::SeqCst);
    }

    fn record(&self, call: &str) {
        self.calls.lock().unwrap().push(call.to_string());
    }

    fn check_comms(&self, what: &str) -> DeviceResult<()> {
        if self.state.lock().unwrap().fail_commands {
            Err(comms(what))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Mount for SimMount {
    async fn connect(&self) -> DeviceResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        self.record("disconnect");
        Ok(())
    }

    async fn at_park(&self) -> DeviceResult<bool> {
        self.at_park_reads.fetch_add(1, Ordering::SeqCst);
        Ok(self.state.lock().unwrap().at_park)
    }

    async fn at_home(&self) -> DeviceResult<bool> {
        Ok(self.state.lock().unwrap().at_home)
    }

    async fn tracking(&self) -> DeviceResult<bool> {
        Ok(self.state.lock().unwrap().tracking)
    }

    async fn set_tracking(&self, enabled: bool) -> DeviceResult<()> {
        self.record(if enabled { "tracking_on" } else { "tracking_off" });
        self.check_comms("set_tracking")?;
        self.state.lock().unwrap().tracking = enabled;
        Ok(())
    }

    async fn slewing(&self) -> DeviceResult<bool> {
        Ok(self.state.lock().unwrap().slewing)
    }

    async fn can_park(&self) -> DeviceResult<bool> {
        Ok(self.state.lock().unwrap().can_park)
    }

    async fn can_unpark(&self) -> DeviceResult<bool> {
        Ok(self.state.lock().unwrap().can_unpark)
    }

    async fn can_find_home(&self) -> DeviceResult<bool> {
        Ok(self.state.lock().unwrap().can_find_home)
    }

    async fn can_set_tracking(&self) -> DeviceResult<bool> {
        Ok(self.state.lock().unwrap().can_set_tracking)
    }

    async fn park(&self) -> DeviceResult<()> {
        self.record("park");
        self.check_comms("park")?;
        let mut st = self.state.lock().unwrap();
        if st.park_completes {
            st.at_park = true;
            st.at_home = false;
            st.tracking = false;
            st.slewing = false;
        }
        Ok(())
    }

    async fn unpark(&self) -> DeviceResult<()> {
        self.record("unpark");
        self.check_comms("unpark")?;
        self.state.lock().unwrap().at_park = false;
        Ok(())
    }

    async fn find_home(&self) -> DeviceResult<()> {
        self.record("find_home");
        self.check_comms("find_home")?;
        let mut st = self.state.lock().unwrap();
        if st.home_completes {
            st.at_home = true;
            st.slewing = false;
        }
        Ok(())
    }

    async fn abort_slew(&self) -> DeviceResult<()> {
        self.record("abort_slew");
        self.check_comms("abort_slew")?;
        self.state.lock().unwrap().slewing = false;
        Ok(())
    }
}

// ============================================================================
// Weather
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct SimWeatherState {
    pub temperature: Option<f64>,
    pub humidity: Option<f64>,
    pub pressure: Option<f64>,
    pub sky_quality: Option<f64>,
    pub dew_point: Option<f64>,
    /// When true, every reading fails with a comms error.
    pub fail_reads: bool,
}

#[derive(Default)]
pub struct SimWeather {
    state: Mutex<SimWeatherState>,
}

impl SimWeather {
    pub fn new() -> Self {
        Self::default()
    }

    /// Station reporting typical clear-night readings.
    pub fn clear_night() -> Self {
        let sim = Self::default();
        sim.set(|st| {
            st.temperature = Some(8.5);
            st.humidity = Some(62.0);
            st.pressure = Some(1018.0);
            st.sky_quality = Some(20.8);
            st.dew_point = Some(2.1);
        });
        sim
    }

    pub fn set(&self, f: impl FnOnce(&mut SimWeatherState)) {
        f(&mut self.state.lock().unwrap());
    }

    fn read(&self, f: impl FnOnce(&SimWeatherState) -> Option<f64>, name: &str) -> DeviceResult<f64> {
        let st = self.state.lock().unwrap();
        if st.fail_reads {
            return Err(comms(name));
        }
        f(&st).ok_or_else(|| DeviceError::NotSupported(name.to_string()))
    }
}

#[async_trait]
impl Weather for SimWeather {
    async fn connect(&self) -> DeviceResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        Ok(())
    }

    async fn temperature(&self) -> DeviceResult<f64> {
        self.read(|st| st.temperature, "temperature")
    }

    async fn humidity(&self) -> DeviceResult<f64> {
        self.read(|st| st.humidity, "humidity")
    }

    async fn pressure(&self) -> DeviceResult<f64> {
        self.read(|st| st.pressure, "pressure")
    }

    async fn sky_quality(&self) -> DeviceResult<f64> {
        self.read(|st| st.sky_quality, "sky_quality")
    }

    async fn dew_point(&self) -> DeviceResult<f64> {
        self.read(|st| st.dew_point, "dew_point")
    }
}

// ============================================================================
// Safety monitor
// ============================================================================

pub struct SimSafetyMonitor {
    safe: Mutex<bool>,
    fail_reads: Mutex<bool>,
}

impl SimSafetyMonitor {
    pub fn new(safe: bool) -> Self {
        Self {
            safe: Mutex::new(safe),
            fail_reads: Mutex::new(false),
        }
    }

    pub fn set_safe(&self, safe: bool) {
        *self.safe.lock().unwrap() = safe;
    }

    pub fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap() = fail;
    }
}

#[async_trait]
impl SafetyMonitor for SimSafetyMonitor {
    async fn connect(&self) -> DeviceResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        Ok(())
    }

    async fn is_safe(&self) -> DeviceResult<bool> {
        if *self.fail_reads.lock().unwrap() {
            return Err(comms("is_safe"));
        }
        Ok(*self.safe.lock().unwrap())
    }
}

// ============================================================================
// Relay bank
// ============================================================================

pub struct SimRelayBank {
    names: Mutex<[String; RELAY_CHANNELS]>,
    descriptions: Mutex<[String; RELAY_CHANNELS]>,
    levels: Mutex<[bool; RELAY_CHANNELS]>,
    fail_channels: Mutex<[bool; RELAY_CHANNELS]>,
    calls: Mutex<Vec<String>>,
}

impl SimRelayBank {
    /// Bank with the conventional circuit layout: mount power on channel 0.
    pub fn new() -> Self {
        Self::with_names(["Mount Power", "Camera", "Dew Heater", "Focuser"])
    }

    pub fn with_names(names: [&str; RELAY_CHANNELS]) -> Self {
        Self {
            names: Mutex::new(names.map(String::from)),
            descriptions: Mutex::new(names.map(|n| format!("{n} circuit"))),
            levels: Mutex::new([false; RELAY_CHANNELS]),
            fail_channels: Mutex::new([false; RELAY_CHANNELS]),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn set_description(&self, channel: usize, description: &str) {
        self.descriptions.lock().unwrap()[channel] = description.to_string();
    }

    pub fn set_level(&self, channel: usize, level: bool) {
        self.levels.lock().unwrap()[channel] = level;
    }

    pub fn levels(&self) -> [bool; RELAY_CHANNELS] {
        *self.levels.lock().unwrap()
    }

    pub fn set_fail(&self, channel: usize, fail: bool) {
        self.fail_channels.lock().unwrap()[channel] = fail;
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn check_channel(&self, channel: usize) -> DeviceResult<()> {
        if channel >= RELAY_CHANNELS {
            return Err(DeviceError::Hardware(format!("no such channel {channel}")));
        }
        if self.fail_channels.lock().unwrap()[channel] {
            return Err(comms("relay channel"));
        }
        Ok(())
    }
}

impl Default for SimRelayBank {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RelayBank for SimRelayBank {
    async fn connect(&self) -> DeviceResult<()> {
        Ok(())
    }

    async fn disconnect(&self) -> DeviceResult<()> {
        Ok(())
    }

    async fn get_switch(&self, channel: usize) -> DeviceResult<bool> {
        self.check_channel(channel)?;
        Ok(self.levels.lock().unwrap()[channel])
    }

    async fn set_switch(&self, channel: usize, level: bool) -> DeviceResult<()> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("set_switch:{channel}:{level}"));
        self.check_channel(channel)?;
        self.levels.lock().unwrap()[channel] = level;
        Ok(())
    }

    async fn get_switch_name(&self, channel: usize) -> DeviceResult<String> {
        self.check_channel(channel)?;
        Ok(self.names.lock().unwrap()[channel].clone())
    }

    async fn get_switch_description(&self, channel: usize) -> DeviceResult<String> {
        self.check_channel(channel)?;
        Ok(self.descriptions.lock().unwrap()[channel].clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dome_records_commands() {
        let dome = SimDome::new();
        dome.open_shutter().await.unwrap();
        dome.abort_slew().await.unwrap();
        assert_eq!(dome.calls(), vec!["open_shutter", "abort_slew"]);
        assert_eq!(dome.shutter_status().await.unwrap(), ShutterState::Opening);
    }

    #[tokio::test]
    async fn mount_counts_at_park_reads_separately() {
        let mount = SimMount::new();
        mount.at_park().await.unwrap();
        mount.at_park().await.unwrap();
        assert_eq!(mount.at_park_reads(), 2);
        assert!(mount.calls().is_empty());
    }

    #[tokio::test]
    async fn mount_comms_failure_hits_every_command() {
        let mount = SimMount::new();
        mount.set(|st| st.fail_commands = true);
        assert!(matches!(mount.park().await, Err(DeviceError::Comms(_))));
        assert!(matches!(mount.abort_slew().await, Err(DeviceError::Comms(_))));
    }

    #[tokio::test]
    async fn weather_missing_sensor_fails_independently() {
        let weather = SimWeather::new();
        weather.set(|st| st.humidity = Some(55.0));
        assert_eq!(weather.humidity().await.unwrap(), 55.0);
        assert!(matches!(
            weather.temperature().await,
            Err(DeviceError::NotSupported(_))
        ));
    }

    #[tokio::test]
    async fn relay_bank_reports_names_and_levels() {
        let bank = SimRelayBank::new();
        bank.set_switch(0, true).await.unwrap();
        assert!(bank.get_switch(0).await.unwrap());
        assert_eq!(bank.get_switch_name(0).await.unwrap(), "Mount Power");
        assert_eq!(bank.calls(), vec!["set_switch:0:true"]);
    }
}
