//! Host bluetooth stack through btleplug.
//!
//! btleplug has no explicit pairing call. The OS bonds on the first
//! encrypted access, so `pair` resolves the GATT database instead and lets
//! the first write trigger bonding.

use std::time::Duration;

use async_trait::async_trait;
use btleplug::{
    api::{
        AddressType as BtleAddressType, BDAddr, Central, CentralEvent, Characteristic,
        Manager as _, Peripheral as _, ScanFilter, WriteType,
    },
    platform::{Adapter, Manager, Peripheral},
};
use dimmer_common::{AddressType, Advertisement, DeviceAddress};
use futures::StreamExt;
use tracing::debug;
use uuid::Uuid;

use super::{AdvertisementStream, BleConnection, BleTransport, ScanParams};
use crate::error::{ActuationError, ProtocolError, TransportError};

pub struct BtleTransport {
    // Dropping the manager tears down the session with the OS stack.
    _manager: Manager,
    adapter: Adapter,
}

impl BtleTransport {
    pub async fn new() -> Result<Self, TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|err| TransportError::Scan(format!("manager init failed: {err}")))?;
        let adapter = manager
            .adapters()
            .await
            .map_err(|err| TransportError::Scan(format!("failed to list adapters: {err}")))?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::Scan("no adapter found".to_string()))?;

        Ok(Self {
            _manager: manager,
            adapter,
        })
    }

    async fn find_peripheral(&self, address: DeviceAddress) -> Result<Peripheral, TransportError> {
        let wanted = BDAddr::from(address.octets());
        let peripherals = self
            .adapter
            .peripherals()
            .await
            .map_err(|err| TransportError::Unreachable(err.to_string()))?;
        peripherals
            .into_iter()
            .find(|peripheral| peripheral.address() == wanted)
            .ok_or_else(|| TransportError::Unreachable(format!("{address} not discovered")))
    }
}

async fn advertisement(adapter: &Adapter, event: CentralEvent) -> Option<Advertisement> {
    let CentralEvent::ManufacturerDataAdvertisement { id, .. } = event else {
        return None;
    };
    let peripheral = adapter.peripheral(&id).await.ok()?;
    let properties = peripheral.properties().await.ok()??;

    let address_type = match properties.address_type {
        Some(BtleAddressType::Random) => AddressType::Random,
        Some(BtleAddressType::Public) | None => AddressType::Public,
    };
    let mut manufacturer_data: Vec<(u16, Vec<u8>)> =
        properties.manufacturer_data.into_iter().collect();
    manufacturer_data.sort_by_key(|(tag, _)| *tag);

    Some(Advertisement {
        address: DeviceAddress::new(properties.address.into_inner()),
        address_type,
        local_name: properties.local_name,
        manufacturer_data,
    })
}

fn gatt_error(err: btleplug::Error) -> TransportError {
    match err {
        btleplug::Error::NotConnected => TransportError::Disconnected(err.to_string()),
        btleplug::Error::TimedOut(after) => TransportError::Timeout {
            operation: "gatt",
            after,
        },
        other => TransportError::Gatt(other.to_string()),
    }
}

#[async_trait]
impl BleTransport for BtleTransport {
    type Connection = BtleConnection;

    async fn scan(&self, params: ScanParams) -> Result<AdvertisementStream, TransportError> {
        // The OS picks scan timing; the requested values are advisory.
        debug!(
            "starting scan: interval {:?}, window {:?}",
            params.interval, params.window
        );
        let events = self
            .adapter
            .events()
            .await
            .map_err(|err| TransportError::Scan(err.to_string()))?;
        self.adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|err| TransportError::Scan(err.to_string()))?;

        let adapter = self.adapter.clone();
        let adverts = events.filter_map(move |event| {
            let adapter = adapter.clone();
            async move { advertisement(&adapter, event).await }
        });
        Ok(Box::pin(adverts))
    }

    async fn connect(&self, address: DeviceAddress) -> Result<BtleConnection, TransportError> {
        let peripheral = self.find_peripheral(address).await?;
        let connected = peripheral.is_connected().await.unwrap_or(false);
        if !connected {
            peripheral.connect().await.map_err(|err| match err {
                btleplug::Error::TimedOut(after) => TransportError::Timeout {
                    operation: "connect",
                    after,
                },
                other => TransportError::Unreachable(format!("{address}: {other}")),
            })?;
        }
        Ok(BtleConnection {
            address,
            peripheral,
        })
    }
}

pub struct BtleConnection {
    address: DeviceAddress,
    peripheral: Peripheral,
}

impl BtleConnection {
    fn characteristic(
        &self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Characteristic, ActuationError> {
        self.peripheral
            .characteristics()
            .into_iter()
            .find(|candidate| {
                candidate.service_uuid == service && candidate.uuid == characteristic
            })
            .ok_or_else(|| ProtocolError::CharacteristicNotFound(characteristic).into())
    }
}

#[async_trait]
impl BleConnection for BtleConnection {
    async fn pair(&mut self, timeout: Duration) -> Result<(), ActuationError> {
        debug!("resolving services on {} (bond within {timeout:?})", self.address);
        self.peripheral
            .discover_services()
            .await
            .map_err(|err| TransportError::Pairing(err.to_string()))?;
        Ok(())
    }

    async fn discover_service(&mut self, service: Uuid) -> Result<(), ActuationError> {
        if self
            .peripheral
            .services()
            .iter()
            .any(|candidate| candidate.uuid == service)
        {
            Ok(())
        } else {
            Err(ProtocolError::ServiceNotFound(service).into())
        }
    }

    async fn read_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>, ActuationError> {
        let characteristic = self.characteristic(service, characteristic)?;
        let value = self
            .peripheral
            .read(&characteristic)
            .await
            .map_err(gatt_error)?;
        Ok(value)
    }

    async fn write_characteristic(
        &mut self,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
    ) -> Result<(), ActuationError> {
        let characteristic = self.characteristic(service, characteristic)?;
        self.peripheral
            .write(&characteristic, value, WriteType::WithResponse)
            .await
            .map_err(gatt_error)?;
        Ok(())
    }

    async fn disconnect(&mut self) {
        if let Err(err) = self.peripheral.disconnect().await {
            debug!("disconnect from {} failed: {err}", self.address);
        }
    }
}
