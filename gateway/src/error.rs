use std::{io, time::Duration};

use thiserror::Error;
use uuid::Uuid;

/// Link-level failures reported by the BLE transport.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("device unreachable: {0}")]
    Unreachable(String),
    #[error("link lost: {0}")]
    Disconnected(String),
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },
    #[error("pairing failed: {0}")]
    Pairing(String),
    #[error("gatt operation failed: {0}")]
    Gatt(String),
    #[error("scan session could not start: {0}")]
    Scan(String),
}

/// The device answered but does not look like a dimmer.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("service {0} not found")]
    ServiceNotFound(Uuid),
    #[error("characteristic {0} not found")]
    CharacteristicNotFound(Uuid),
}

/// Any failure of one connect/pair/write session. All variants share the
/// same retry path.
#[derive(Debug, Error)]
pub enum ActuationError {
    #[error(transparent)]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("connect to {endpoint} failed: {source}")]
    Connect { endpoint: String, source: io::Error },
    #[error("coordinator read failed: {0}")]
    Read(#[source] io::Error),
    #[error("coordinator write failed: {0}")]
    Write(#[source] io::Error),
    #[error("coordinator closed the connection")]
    Closed,
}
