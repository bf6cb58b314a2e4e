//! Relay supervisor
//!
//! Mirrors the relay bank state, maps channels to named circuits, and
//! provides the last-resort power-down path used when software-level mount
//! commands fail.

use crate::config::RelayPolarity;
use obsy_devices::{DeviceResult, SharedRelayBank, RELAY_CHANNELS};
use tracing::warn;

/// Tracks the relay bank and which channels feed the mount.
///
/// The channel-to-circuit mapping is established once at attach time by a
/// case-insensitive substring match on each channel's vendor name and
/// description. Channel order is not trusted: external tooling can reorder
/// the bank, so "mount" is searched rather than assuming channel 0.
pub struct RelaySupervisor {
    bank: Option<SharedRelayBank>,
    polarity: RelayPolarity,
    /// Logical on/off mirror, polled every tick to resync after external
    /// (hub) mutation.
    states: [bool; RELAY_CHANNELS],
    /// Channels whose name or description matched the mount circuit.
    mount_channels: [bool; RELAY_CHANNELS],
    names: [String; RELAY_CHANNELS],
}

fn names_mount(name: &str, description: &str) -> bool {
    name.to_ascii_lowercase().contains("mount") || description.to_ascii_lowercase().contains("mount")
}

impl RelaySupervisor {
    pub fn new(polarity: RelayPolarity) -> Self {
        Self {
            bank: None,
            polarity,
            states: [false; RELAY_CHANNELS],
            mount_channels: [false; RELAY_CHANNELS],
            names: Default::default(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.bank.is_some()
    }

    pub fn states(&self) -> [bool; RELAY_CHANNELS] {
        self.states
    }

    pub fn mount_channels(&self) -> [bool; RELAY_CHANNELS] {
        self.mount_channels
    }

    pub fn channel_names(&self) -> &[String; RELAY_CHANNELS] {
        &self.names
    }

    /// Attach a connected bank, map its channels and take an initial mirror.
    pub async fn attach(&mut self, bank: SharedRelayBank) {
        self.mount_channels = [false; RELAY_CHANNELS];
        self.names = Default::default();
        for channel in 0..RELAY_CHANNELS {
            let name = bank.get_switch_name(channel).await.unwrap_or_default();
            let description = bank.get_switch_description(channel).await.unwrap_or_default();
            self.mount_channels[channel] = names_mount(&name, &description);
            self.names[channel] = name;
        }
        self.bank = Some(bank);
        self.refresh_all().await;
    }

    pub fn detach(&mut self) {
        self.bank = None;
        self.states = [false; RELAY_CHANNELS];
    }

    /// Re-read every channel. Individual read failures keep the stale mirror
    /// value; the bank may be answering a hub command.
    pub async fn refresh_all(&mut self) {
        let Some(bank) = self.bank.clone() else { return };
        for channel in 0..RELAY_CHANNELS {
            match bank.get_switch(channel).await {
                Ok(level) => self.states[channel] = level == self.polarity.on_level(),
                Err(e) => warn!(channel, error = %e, "relay status read failed"),
            }
        }
    }

    /// Toggle one channel and return its new logical state.
    pub async fn toggle(&mut self, channel: usize) -> DeviceResult<bool> {
        if channel >= RELAY_CHANNELS {
            return Err(obsy_devices::DeviceError::Hardware(format!(
                "no such channel {channel}"
            )));
        }
        let bank = self
            .bank
            .clone()
            .ok_or(obsy_devices::DeviceError::NotConnected)?;
        let target = !self.states[channel];
        let level = if target {
            self.polarity.on_level()
        } else {
            self.polarity.off_level()
        };
        bank.set_switch(channel, level).await?;
        self.states[channel] = target;
        Ok(target)
    }

    /// De-energize every channel that mapped to the mount circuit.
    ///
    /// Failures on individual channels are reported and skipped, never
    /// escalated: this is itself the escalation path.
    pub async fn deenergize_mount_channels(&mut self) -> usize {
        let Some(bank) = self.bank.clone() else { return 0 };
        let mut dropped = 0;
        for channel in 0..RELAY_CHANNELS {
            if !self.mount_channels[channel] {
                continue;
            }
            match bank.set_switch(channel, self.polarity.off_level()).await {
                Ok(()) => {
                    self.states[channel] = false;
                    dropped += 1;
                }
                Err(e) => warn!(channel, error = %e, "mount relay off failed"),
            }
        }
        dropped
    }

    /// De-energize the whole bank (shutdown path).
    pub async fn deenergize_all(&mut self) {
        let Some(bank) = self.bank.clone() else { return };
        for channel in 0..RELAY_CHANNELS {
            match bank.set_switch(channel, self.polarity.off_level()).await {
                Ok(()) => self.states[channel] = false,
                Err(e) => warn!(channel, error = %e, "relay off failed"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use obsy_devices::sim::SimRelayBank;
    use std::sync::Arc;

    #[tokio::test]
    async fn mount_channels_match_by_name_or_description() {
        let bank = Arc::new(SimRelayBank::with_names([
            "Mount Power",
            "Camera",
            "mount",
            "Focuser",
        ]));
        // descriptions default to "<name> circuit"; give the camera one that
        // must not match
        bank.set_description(1, "imaging train");

        let mut relays = RelaySupervisor::new(RelayPolarity::ActiveHigh);
        relays.attach(bank).await;

        assert_eq!(relays.mount_channels(), [true, false, true, false]);
    }

    #[tokio::test]
    async fn description_alone_is_enough_to_match() {
        let bank = Arc::new(SimRelayBank::with_names(["Relay 1", "Relay 2", "Relay 3", "Relay 4"]));
        bank.set_description(0, "north pier");
        bank.set_description(3, "Mount supply");

        let mut relays = RelaySupervisor::new(RelayPolarity::ActiveHigh);
        relays.attach(bank).await;

        assert_eq!(relays.mount_channels(), [false, false, false, true]);
    }

    #[tokio::test]
    async fn deenergize_only_touches_mount_channels() {
        let bank = Arc::new(SimRelayBank::new());
        for i in 0..RELAY_CHANNELS {
            bank.set_level(i, true);
        }
        let mut relays = RelaySupervisor::new(RelayPolarity::ActiveHigh);
        relays.attach(bank.clone()).await;

        let dropped = relays.deenergize_mount_channels().await;
        assert_eq!(dropped, 1);
        assert_eq!(bank.levels(), [false, true, true, true]);
        assert_eq!(relays.states(), [false, true, true, true]);
    }

    #[tokio::test]
    async fn deenergize_skips_failing_channel_and_continues() {
        let bank = Arc::new(SimRelayBank::with_names([
            "Mount Power",
            "Mount Dec Motor",
            "Camera",
            "Focuser",
        ]));
        bank.set_level(0, true);
        bank.set_level(1, true);
        let mut relays = RelaySupervisor::new(RelayPolarity::ActiveHigh);
        relays.attach(bank.clone()).await;

        bank.set_fail(0, true);
        let dropped = relays.deenergize_mount_channels().await;
        assert_eq!(dropped, 1);
        assert!(!bank.levels()[1]);
    }

    #[tokio::test]
    async fn active_low_polarity_inverts_levels() {
        let bank = Arc::new(SimRelayBank::new());
        // active-low: a low output means energized
        bank.set_level(2, false);
        let mut relays = RelaySupervisor::new(RelayPolarity::ActiveLow);
        relays.attach(bank.clone()).await;

        assert!(relays.states()[2]);

        relays.toggle(2).await.unwrap();
        assert!(!relays.states()[2]);
        assert!(bank.levels()[2]); // off for active-low is a high output
    }

    #[tokio::test]
    async fn toggle_rejects_an_out_of_range_channel() {
        let bank = Arc::new(SimRelayBank::new());
        let mut relays = RelaySupervisor::new(RelayPolarity::ActiveHigh);
        relays.attach(bank).await;

        let err = relays.toggle(RELAY_CHANNELS).await.unwrap_err();
        assert!(matches!(err, obsy_devices::DeviceError::Hardware(_)));
    }

    #[tokio::test]
    async fn refresh_resyncs_after_external_mutation() {
        let bank = Arc::new(SimRelayBank::new());
        let mut relays = RelaySupervisor::new(RelayPolarity::ActiveHigh);
        relays.attach(bank.clone()).await;
        assert!(!relays.states()[3]);

        // a hub flips the channel behind our back
        bank.set_level(3, true);
        relays.refresh_all().await;
        assert!(relays.states()[3]);
    }
}
