//! Power relay bank capability

use crate::DeviceResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Number of relay channels in the bank.
pub const RELAY_CHANNELS: usize = 4;

/// Multi-channel power relay bank consumed by the supervisor.
///
/// Channel purpose is not fixed by index; the supervisor maps channels to
/// circuits by the vendor-reported name and description at attach time, since
/// external tooling may reorder channels.
#[async_trait]
pub trait RelayBank: Send + Sync {
    async fn connect(&self) -> DeviceResult<()>;
    async fn disconnect(&self) -> DeviceResult<()>;

    async fn get_switch(&self, channel: usize) -> DeviceResult<bool>;
    async fn set_switch(&self, channel: usize, level: bool) -> DeviceResult<()>;

    async fn get_switch_name(&self, channel: usize) -> DeviceResult<String>;
    async fn get_switch_description(&self, channel: usize) -> DeviceResult<String>;
}

/// Shared relay bank handle
pub type SharedRelayBank = Arc<dyn RelayBank>;
