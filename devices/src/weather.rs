//! Weather sensor suite capability

use crate::DeviceResult;
use async_trait::async_trait;
use std::sync::Arc;

/// Weather sensor capability consumed by the supervisor.
///
/// Each reading may be unsupported by a given station and must fail
/// independently; a missing sensor never takes the others down with it.
#[async_trait]
pub trait Weather: Send + Sync {
    async fn connect(&self) -> DeviceResult<()>;
    async fn disconnect(&self) -> DeviceResult<()>;

    /// Ambient temperature in degrees C.
    async fn temperature(&self) -> DeviceResult<f64>;

    /// Relative humidity in percent.
    async fn humidity(&self) -> DeviceResult<f64>;

    /// Barometric pressure in hPa.
    async fn pressure(&self) -> DeviceResult<f64>;

    /// Sky quality in magnitudes per square arcsecond.
    async fn sky_quality(&self) -> DeviceResult<f64>;

    /// Dew point in degrees C.
    async fn dew_point(&self) -> DeviceResult<f64>;
}

/// Shared weather handle
pub type SharedWeather = Arc<dyn Weather>;
