//! Safety monitor capability

use crate::DeviceResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Independent safety monitor (cloud/sky sensor) consumed by the supervisor.
#[async_trait]
pub trait SafetyMonitor: Send + Sync {
    async fn connect(&self) -> DeviceResult<()>;
    async fn disconnect(&self) -> DeviceResult<()>;

    /// True when the monitored conditions are safe for observing.
    async fn is_safe(&self) -> DeviceResult<bool>;
}

/// Shared safety monitor handle
pub type SharedSafetyMonitor = Arc<dyn SafetyMonitor>;
