//! Virtual dimmer fleet for running the gateway without a radio.
//!
//! Each dimmer advertises its state on a fixed period and applies writes to
//! the state and level characteristics the way the hardware does. Faults
//! can be injected per address.

use std::{
    collections::{BTreeMap, HashMap, VecDeque},
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use dimmer_common::{
    advert::encode_payload, AddressType, Advertisement, DeviceAddress, DimmerProfile,
    GatewayConfig,
};
use tokio::{sync::Mutex, time::Interval};
use tracing::debug;
use uuid::Uuid;

use super::{AdvertisementStream, BleConnection, BleTransport, ScanParams};
use crate::{
    actuator::{LEVEL_NATIVE_MAX, STATE_OFF, STATE_ON, STATE_TOGGLE},
    error::{ActuationError, ProtocolError, TransportError},
};

const DEFAULT_FLEET: [[u8; 6]; 3] = [
    [0x00, 0x0D, 0x6F, 0xC6, 0xAA, 0x79],
    [0x00, 0x0D, 0x6F, 0xB3, 0xDF, 0x37],
    [0x00, 0x0D, 0x6F, 0xCD, 0x94, 0xE1],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Connect fails immediately.
    Unreachable,
    /// Connect never completes.
    Unresponsive,
    PairingRejected,
    MissingService,
    /// Writes land but reads fail.
    ReadFails,
}

#[derive(Debug, Clone)]
struct VirtualDimmer {
    is_on: bool,
    level: u16,
    revision: u8,
}

impl VirtualDimmer {
    fn percent(&self) -> u8 {
        let percent = u32::from(self.level) * 100 / u32::from(LEVEL_NATIVE_MAX);
        u8::try_from(percent).unwrap_or(100)
    }
}

#[derive(Debug, Default)]
struct World {
    dimmers: BTreeMap<DeviceAddress, VirtualDimmer>,
    faults: HashMap<DeviceAddress, Fault>,
    connect_latency: Duration,
}

#[derive(Clone)]
pub struct SimulatedTransport {
    world: Arc<Mutex<World>>,
    profile: DimmerProfile,
    advert_period: Duration,
    connect_attempts: Arc<AtomicUsize>,
}

impl SimulatedTransport {
    pub fn new(profile: DimmerProfile, advert_period: Duration) -> Self {
        Self {
            world: Arc::new(Mutex::new(World::default())),
            profile,
            advert_period,
            connect_attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// A fleet made of the configured devices, or a small default one.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let mut world = World::default();
        let addresses: Vec<DeviceAddress> = if config.devices.is_empty() {
            DEFAULT_FLEET.into_iter().map(DeviceAddress::new).collect()
        } else {
            config.devices.iter().map(|device| device.address).collect()
        };
        for address in addresses {
            world.dimmers.insert(
                address,
                VirtualDimmer {
                    is_on: false,
                    level: LEVEL_NATIVE_MAX / 2,
                    revision: 0,
                },
            );
        }

        let transport = Self::new(config.profile.clone(), Duration::from_millis(500));
        Self {
            world: Arc::new(Mutex::new(world)),
            ..transport
        }
    }

    pub async fn add_dimmer(&self, address: DeviceAddress, is_on: bool, percent: u8) {
        self.world.lock().await.dimmers.insert(
            address,
            VirtualDimmer {
                is_on,
                level: u16::from(percent.min(100)) * 100,
                revision: 0,
            },
        );
    }

    /// Delay before a connect succeeds.
    pub async fn set_connect_latency(&self, latency: Duration) {
        self.world.lock().await.connect_latency = latency;
    }

    pub async fn set_fault(&self, address: DeviceAddress, fault: Option<Fault>) {
        let mut world = self.world.lock().await;
        match fault {
            Some(fault) => world.faults.insert(address, fault),
            None => world.faults.remove(&address),
        };
    }

    /// `(is_on, percent)` of a virtual dimmer.
    pub async fn dimmer_state(&self, address: &DeviceAddress) -> Option<(bool, u8)> {
        let world = self.world.lock().await;
        world
            .dimmers
            .get(address)
            .map(|dimmer| (dimmer.is_on, dimmer.percent()))
    }

    pub fn connect_attempts(&self) -> usize {
        self.connect_attempts.load(Ordering::SeqCst)
    }

    async fn fault(&self, address: &DeviceAddress) -> Option<Fault> {
        self.world.lock().await.faults.get(address).copied()
    }
}

struct ScanState {
    world: Arc<Mutex<World>>,
    manufacturer_id: u16,
    ticker: Interval,
    ready: VecDeque<Advertisement>,
}

async fn snapshot(world: &Mutex<World>, manufacturer_id: u16) -> VecDeque<Advertisement> {
    let world = world.lock().await;
    world
        .dimmers
        .iter()
        .map(|(address, dimmer)| Advertisement {
            address: *address,
            address_type: AddressType::Public,
            local_name: Some(format!("MICRO_DIMMER_{:02X}", address.octets()[5])),
            manufacturer_data: vec![(
                manufacturer_id,
                encode_payload(dimmer.revision, dimmer.is_on, dimmer.percent()),
            )],
        })
        .collect()
}

#[async_trait]
impl BleTransport for SimulatedTransport {
    type Connection = SimulatedConnection;

    async fn scan(&self, params: ScanParams) -> Result<AdvertisementStream, TransportError> {
        debug!(
            "simulated scan: interval {:?}, window {:?}",
            params.interval, params.window
        );
        let state = ScanState {
            world: self.world.clone(),
            manufacturer_id: self.profile.manufacturer_id,
            ticker: tokio::time::interval(self.advert_period),
            ready: VecDeque::new(),
        };

        let adverts = futures::stream::unfold(state, |mut state| async move {
            loop {
                if let Some(advert) = state.ready.pop_front() {
                    return Some((advert, state));
                }
                state.ticker.tick().await;
                state.ready = snapshot(&state.world, state.manufacturer_id).await;
            }
        });
        Ok(Box::pin(adverts))
    }

    async fn connect(&self, address: DeviceAddress) -> Result<SimulatedConnection, TransportError> {
        self.connect_attempts.fetch_add(1, Ordering::SeqCst);

        match self.fault(&address).await {
            Some(Fault::Unreachable) => {
                return Err(TransportError::Unreachable(address.to_string()));
            }
            Some(Fault::Unresponsive) => futures::future::pending::<()>().await,
            _ => {}
        }

        let (known, latency) = {
            let world = self.world.lock().await;
            (world.dimmers.contains_key(&address), world.connect_latency)
        };
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if !known {
            return Err(TransportError::Unreachable(address.to_string()));
        }

        Ok(SimulatedConnection {
            address,
            transport: self.clone(),
            paired: false,
        })
    }
}

pub struct SimulatedConnection {
    address: DeviceAddress,
    transport: SimulatedTransport,
    paired: bool,
}

impl SimulatedConnection {
    fn check_characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<(), ActuationError> {
        let profile = &self.transport.profile;
        if service != profile.service {
            return Err(ProtocolError::ServiceNotFound(service).into());
        }
        if characteristic != profile.state_characteristic
            && characteristic != profile.level_characteristic
        {
            return Err(ProtocolError::CharacteristicNotFound(characteristic).into());
        }
        if !self.paired {
            return Err(TransportError::Gatt("insufficient authentication".to_string()).into());
        }
        Ok(())
    }
}

#[async_trait]
impl BleConnection for SimulatedConnection {
    async fn pair(&mut self, _timeout: Duration) -> Result<(), ActuationError> {
        if self.transport.fault(&self.address).await == Some(Fault::PairingRejected) {
            return Err(TransportError::Pairing("rejected by peer".to_string()).into());
        }
        self.paired = true;
        Ok(())
    }

    async fn discover_service(&mut self, service: Uuid) -> Result<(), ActuationError> {
        let missing = self.transport.fault(&self.address).await == Some(Fault::MissingService);
        if missing || service != self.transport.profile.service {
            return Err(ProtocolError::ServiceNotFound(service).into());
        }
        Ok(())
    }

    async fn read_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, ActuationError> {
        self.check_characteristic(service, characteristic)?;
        if self.transport.fault(&self.address).await == Some(Fault::ReadFails) {
            return Err(TransportError::Gatt("read not permitted".to_string()).into());
        }
        let world = self.transport.world.lock().await;
        let dimmer = world
            .dimmers
            .get(&self.address)
            .ok_or_else(|| TransportError::Disconnected(self.address.to_string()))?;

        if characteristic == self.transport.profile.state_characteristic {
            Ok(vec![u8::from(dimmer.is_on)])
        } else {
            Ok(dimmer.level.to_le_bytes().to_vec())
        }
    }

    async fn write_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), ActuationError> {
        self.check_characteristic(service, characteristic)?;
        let is_state = characteristic == self.transport.profile.state_characteristic;

        let mut world = self.transport.world.lock().await;
        let dimmer = world
            .dimmers
            .get_mut(&self.address)
            .ok_or_else(|| TransportError::Disconnected(self.address.to_string()))?;

        if is_state {
            match value {
                [STATE_OFF] => dimmer.is_on = false,
                [STATE_ON] => dimmer.is_on = true,
                [STATE_TOGGLE] => dimmer.is_on = !dimmer.is_on,
                _ => {
                    return Err(TransportError::Gatt(format!("bad state value {value:?}")).into());
                }
            }
        } else {
            let [low, high] = value else {
                return Err(TransportError::Gatt(format!("bad level value {value:?}")).into());
            };
            dimmer.level = u16::from_le_bytes([*low, *high]).min(LEVEL_NATIVE_MAX);
        }
        dimmer.revision = dimmer.revision.wrapping_add(1);
        Ok(())
    }

    async fn disconnect(&mut self) {
        debug!("simulated disconnect from {}", self.address);
    }
}
