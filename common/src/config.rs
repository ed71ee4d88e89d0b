use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::address::DeviceAddress;

/// Company identifier carried in the dimmers' manufacturer record.
pub const DEFAULT_MANUFACTURER_ID: u16 = 0x02E1;
pub const DEFAULT_NAME_PREFIX: &str = "MICRO_DIMMER";

pub const CONTROL_SERVICE_UUID: Uuid = Uuid::from_u128(0x720a9080_9c7d_11e5_a7e3_0002a5d5c51b);
pub const STATE_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x720a9081_9c7d_11e5_a7e3_0002a5d5c51b);
pub const LEVEL_CHARACTERISTIC_UUID: Uuid =
    Uuid::from_u128(0x720a9082_9c7d_11e5_a7e3_0002a5d5c51b);

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub host: String,
    pub port: u16,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 9999,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct TimingConfig {
    pub scan_interval_us: u32,
    pub scan_window_us: u32,
    pub scan_retry_delay_ms: u64,
    pub attempt_settle_ms: u64,
    pub abandon_delay_ms: u64,
    pub connect_timeout_ms: u64,
    pub pair_timeout_ms: u64,
    pub command_expiry_ms: u64,
    pub reconnect_base_ms: u64,
    pub reconnect_max_multiplier: u32,
    pub sweep_interval_ms: u64,
    pub state_retention_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            scan_interval_us: 30_000,
            scan_window_us: 30_000,
            scan_retry_delay_ms: 100,
            attempt_settle_ms: 10,
            abandon_delay_ms: 100,
            connect_timeout_ms: 10_000,
            pair_timeout_ms: 10_000,
            command_expiry_ms: 5_000,
            reconnect_base_ms: 1_000,
            reconnect_max_multiplier: 8,
            sweep_interval_ms: 60_000,
            state_retention_ms: 3_600_000,
        }
    }
}

impl TimingConfig {
    pub fn sanitize(&mut self) {
        self.scan_interval_us = self.scan_interval_us.clamp(2_500, 10_240_000);
        self.scan_window_us = self.scan_window_us.clamp(2_500, self.scan_interval_us);
        self.connect_timeout_ms = self.connect_timeout_ms.clamp(1_000, 60_000);
        self.pair_timeout_ms = self.pair_timeout_ms.clamp(1_000, 60_000);
        self.reconnect_base_ms = self.reconnect_base_ms.max(10);
        self.reconnect_max_multiplier = self.reconnect_max_multiplier.clamp(1, 64);
        self.sweep_interval_ms = self.sweep_interval_ms.max(1_000);
        if self.state_retention_ms < self.sweep_interval_ms {
            self.state_retention_ms = self.sweep_interval_ms;
        }
    }
}

/// Identification and GATT layout of the dimmer family.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DimmerProfile {
    pub manufacturer_id: u16,
    pub name_prefix: Option<String>,
    pub service: Uuid,
    pub state_characteristic: Uuid,
    pub level_characteristic: Uuid,
}

impl Default for DimmerProfile {
    fn default() -> Self {
        Self {
            manufacturer_id: DEFAULT_MANUFACTURER_ID,
            name_prefix: Some(DEFAULT_NAME_PREFIX.to_string()),
            service: CONTROL_SERVICE_UUID,
            state_characteristic: STATE_CHARACTERISTIC_UUID,
            level_characteristic: LEVEL_CHARACTERISTIC_UUID,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct NamedDevice {
    pub name: String,
    pub address: DeviceAddress,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GatewayConfig {
    pub coordinator: CoordinatorConfig,
    pub timing: TimingConfig,
    pub profile: DimmerProfile,
    pub devices: Vec<NamedDevice>,
    pub button_address: Option<DeviceAddress>,
    pub http_port: u16,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            coordinator: CoordinatorConfig::default(),
            timing: TimingConfig::default(),
            profile: DimmerProfile::default(),
            devices: Vec::new(),
            button_address: Some(DeviceAddress::new([0x00, 0x0D, 0x6F, 0xC6, 0xAA, 0x79])),
            http_port: 8080,
        }
    }
}

impl GatewayConfig {
    pub fn sanitize(&mut self) {
        self.timing.sanitize();
        if self.coordinator.port == 0 {
            self.coordinator.port = CoordinatorConfig::default().port;
        }
        self.devices.sort_by_key(|device| device.address);
        self.devices.dedup_by_key(|device| device.address);
    }

    pub fn device_name(&self, address: &DeviceAddress) -> Option<&str> {
        self.devices
            .iter()
            .find(|device| device.address == *address)
            .map(|device| device.name.as_str())
    }

    /// With no configured devices every dimmer is accepted.
    pub fn is_known(&self, address: &DeviceAddress) -> bool {
        self.devices.is_empty() || self.device_name(address).is_some()
    }
}
