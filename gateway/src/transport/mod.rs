//! The BLE radio as seen by the scanner and the actuator.
//!
//! Advertisement parsing, bonding and GATT encoding belong to the
//! implementation; the gateway only consumes decoded events and
//! characteristic reads/writes.

#[cfg(feature = "ble")]
pub mod btle;
#[cfg_attr(feature = "ble", allow(dead_code))]
pub mod sim;

use std::{pin::Pin, time::Duration};

use async_trait::async_trait;
use dimmer_common::{Advertisement, DeviceAddress, TimingConfig};
use futures::Stream;
use uuid::Uuid;

use crate::error::{ActuationError, TransportError};

pub type AdvertisementStream = Pin<Box<dyn Stream<Item = Advertisement> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanParams {
    pub interval: Duration,
    pub window: Duration,
    /// Request scan responses so advertised names are available.
    pub active: bool,
}

impl From<&TimingConfig> for ScanParams {
    fn from(timing: &TimingConfig) -> Self {
        Self {
            interval: Duration::from_micros(u64::from(timing.scan_interval_us)),
            window: Duration::from_micros(u64::from(timing.scan_window_us)),
            active: true,
        }
    }
}

#[async_trait]
pub trait BleTransport: Send + Sync + 'static {
    type Connection: BleConnection;

    /// Opens a scan session. Returning means the session is running; the
    /// stream ends when the radio stops it.
    async fn scan(&self, params: ScanParams) -> Result<AdvertisementStream, TransportError>;

    async fn connect(&self, address: DeviceAddress) -> Result<Self::Connection, TransportError>;
}

#[async_trait]
pub trait BleConnection: Send + 'static {
    async fn pair(&mut self, timeout: Duration) -> Result<(), ActuationError>;

    async fn discover_service(&mut self, service: Uuid) -> Result<(), ActuationError>;

    async fn read_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, ActuationError>;

    async fn write_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), ActuationError>;

    /// Tears the link down. Failures are only logged.
    async fn disconnect(&mut self);
}
