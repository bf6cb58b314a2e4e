//! Telescope mount capability

use crate::DeviceResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Telescope mount capability consumed by the supervisor.
///
/// Capability flags (`can_*`) are negotiated by the driver; the supervisor
/// silently skips an action the mount cannot perform.
#[async_trait]
pub trait Mount: Send + Sync {
    async fn connect(&self) -> DeviceResult<()>;
    async fn disconnect(&self) -> DeviceResult<()>;

    async fn at_park(&self) -> DeviceResult<bool>;
    async fn at_home(&self) -> DeviceResult<bool>;
    async fn tracking(&self) -> DeviceResult<bool>;
    async fn set_tracking(&self, enabled: bool) -> DeviceResult<()>;
    async fn slewing(&self) -> DeviceResult<bool>;

    async fn can_park(&self) -> DeviceResult<bool>;
    async fn can_unpark(&self) -> DeviceResult<bool>;
    async fn can_find_home(&self) -> DeviceResult<bool>;
    async fn can_set_tracking(&self) -> DeviceResult<bool>;

    async fn park(&self) -> DeviceResult<()>;
    async fn unpark(&self) -> DeviceResult<()>;
    async fn find_home(&self) -> DeviceResult<()>;
    async fn abort_slew(&self) -> DeviceResult<()>;
}

/// Shared mount handle
pub type SharedMount = Arc<dyn Mount>;
