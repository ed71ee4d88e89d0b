//! Local HTTP API for inspecting the gateway and queueing commands.

use std::collections::{HashMap, HashSet};

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use dimmer_common::{DeviceAddress, PendingCommand};
use serde::Serialize;
use tracing::debug;

use crate::shared::SharedState;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusView {
    pub uptime_ms: u64,
    pub coordinator_connected: bool,
    pub pending_work: bool,
    pub queued_commands: usize,
    pub known_devices: usize,
    pub radio_holder: Option<&'static str>,
}

#[derive(Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DeviceView {
    pub address: DeviceAddress,
    pub name: Option<String>,
    pub is_on: bool,
    pub brightness: u8,
    pub generation: u64,
    pub last_seen_ms_ago: u64,
    pub command_pending: bool,
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/api/status", get(handle_get_status))
        .route("/api/devices", get(handle_get_devices))
        .route("/api/command", post(handle_post_command))
        .with_state(state)
}

pub async fn status_view(state: &SharedState) -> StatusView {
    let queued_commands = state.queue().lock().await.len();
    let known_devices = state.cache().lock().await.len();
    StatusView {
        uptime_ms: state.now_ms(),
        coordinator_connected: state.relay_connected(),
        pending_work: state.has_pending_work(),
        queued_commands,
        known_devices,
        radio_holder: state.radio().holder().map(|user| user.as_str()),
    }
}

pub async fn device_views(state: &SharedState) -> Vec<DeviceView> {
    let now_ms = state.now_ms();
    let pending: HashSet<DeviceAddress> =
        state.queue().lock().await.addresses().copied().collect();
    let cache = state.cache().lock().await;
    cache
        .iter()
        .map(|(address, observed)| DeviceView {
            address: *address,
            name: state.config().device_name(address).map(str::to_string),
            is_on: observed.is_on,
            brightness: observed.brightness,
            generation: observed.generation,
            last_seen_ms_ago: now_ms.saturating_sub(observed.observed_at_ms),
            command_pending: pending.contains(address),
        })
        .collect()
}

/// Query parameters: `address`, `action` (`on`, `off`, `toggle`) and
/// `brightness` (0..=100). At least one of `action` or `brightness`.
pub fn parse_command(
    params: &HashMap<String, String>,
) -> Result<(DeviceAddress, PendingCommand), &'static str> {
    let address = params
        .get("address")
        .ok_or("Missing 'address' parameter")?
        .parse::<DeviceAddress>()
        .map_err(|_| "Invalid device address")?;

    let brightness = match params.get("brightness") {
        Some(value) => match value.parse::<u8>() {
            Ok(level) if level <= 100 => Some(level),
            _ => return Err("Brightness must be between 0 and 100"),
        },
        None => None,
    };

    let command = match params.get("action").map(String::as_str) {
        Some("on") => PendingCommand::set(Some(true), brightness),
        Some("off") => PendingCommand::set(Some(false), brightness),
        Some("toggle") => PendingCommand {
            set_brightness: brightness,
            ..PendingCommand::toggle()
        },
        Some(_) => return Err("Invalid action. Use 'on', 'off' or 'toggle'"),
        None if brightness.is_some() => PendingCommand::set(None, brightness),
        None => return Err("Missing 'action' or 'brightness' parameter"),
    };
    Ok((address, command))
}

async fn handle_get_status(State(state): State<SharedState>) -> impl IntoResponse {
    Json(status_view(&state).await)
}

async fn handle_get_devices(State(state): State<SharedState>) -> impl IntoResponse {
    Json(device_views(&state).await)
}

async fn handle_post_command(
    State(state): State<SharedState>,
    Query(params): Query<HashMap<String, String>>,
) -> axum::response::Response {
    let (address, command) = match parse_command(&params) {
        Ok(parsed) => parsed,
        Err(message) => return error_response(StatusCode::BAD_REQUEST, message),
    };

    if !state.config().is_known(&address) {
        return error_response(StatusCode::NOT_FOUND, "Unknown device");
    }

    debug!("http command for {address}: {command:?}");
    state.enqueue(address, command).await;
    (StatusCode::ACCEPTED, Json(status_view(&state).await)).into_response()
}

fn error_response(status: StatusCode, message: &str) -> axum::response::Response {
    (
        status,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use dimmer_common::{GatewayConfig, NamedDevice, Reading};
    use pretty_assertions::assert_eq;

    const HALL: DeviceAddress = DeviceAddress::new([0x00, 0x0D, 0x6F, 0xC6, 0xAA, 0x79]);

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect()
    }

    #[test]
    fn parses_on_with_brightness() {
        let parsed = parse_command(&params(&[
            ("address", "00:0D:6F:C6:AA:79"),
            ("action", "on"),
            ("brightness", "75"),
        ]));
        assert_eq!(
            parsed,
            Ok((HALL, PendingCommand::set(Some(true), Some(75))))
        );
    }

    #[test]
    fn brightness_alone_keeps_power_state() {
        let (_, command) = parse_command(&params(&[
            ("address", "00-0d-6f-c6-aa-79"),
            ("brightness", "10"),
        ]))
        .unwrap();
        assert_eq!(command.set_on, None);
        assert!(!command.toggle);
        assert_eq!(command.set_brightness, Some(10));
    }

    #[test]
    fn rejects_bad_requests() {
        assert!(parse_command(&params(&[("action", "on")])).is_err());
        assert!(parse_command(&params(&[("address", "nope"), ("action", "on")])).is_err());
        assert!(parse_command(&params(&[("address", "00:0D:6F:C6:AA:79")])).is_err());
        assert!(parse_command(&params(&[
            ("address", "00:0D:6F:C6:AA:79"),
            ("action", "dim"),
        ]))
        .is_err());
        assert!(parse_command(&params(&[
            ("address", "00:0D:6F:C6:AA:79"),
            ("brightness", "101"),
        ]))
        .is_err());
    }

    #[tokio::test]
    async fn views_reflect_cache_and_queue() {
        let mut config = GatewayConfig::default();
        config.devices.push(NamedDevice {
            name: "Hall".to_string(),
            address: HALL,
        });
        config.sanitize();
        let state = SharedState::new(config);
        state
            .observe(
                HALL,
                Reading {
                    revision: 0,
                    is_on: true,
                    brightness: 60,
                },
            )
            .await;
        state.enqueue(HALL, PendingCommand::toggle()).await;

        let status = status_view(&state).await;
        assert_eq!(status.queued_commands, 1);
        assert_eq!(status.known_devices, 1);
        assert!(status.pending_work);
        assert!(!status.coordinator_connected);
        assert_eq!(status.radio_holder, None);

        let devices = device_views(&state).await;
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name.as_deref(), Some("Hall"));
        assert_eq!(devices[0].brightness, 60);
        assert!(devices[0].command_pending);
    }
}
