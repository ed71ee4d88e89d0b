use std::{io::ErrorKind, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{info, warn};

use dimmer_common::GatewayConfig;

#[cfg(feature = "ble")]
use crate::transport::btle::BtleTransport;
#[cfg(not(feature = "ble"))]
use crate::transport::sim::SimulatedTransport;
use crate::{
    actuator, api, input, relay, scanner, shared::SharedState, sweeper, transport::BleTransport,
};

#[derive(Clone)]
struct ConfigStore {
    path: Arc<PathBuf>,
}

impl ConfigStore {
    fn new() -> Self {
        let data_dir = std::env::var("DIMMER_DATA_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./.dimmer"));

        Self {
            path: Arc::new(data_dir.join("gateway.json")),
        }
    }

    /// Reads the stored config. A missing file yields the defaults, which
    /// are written back so they can be edited.
    async fn load_or_seed(&self) -> anyhow::Result<GatewayConfig> {
        match tokio::fs::read(self.path.as_ref()).await {
            Ok(raw) => serde_json::from_slice::<GatewayConfig>(&raw)
                .with_context(|| format!("invalid config at {}", self.path.display())),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                let config = GatewayConfig::default();
                if let Err(err) = self.save(&config).await {
                    warn!("failed to seed config at {}: {err:#}", self.path.display());
                }
                Ok(config)
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn save(&self, config: &GatewayConfig) -> anyhow::Result<()> {
        let path = self.path.as_ref().clone();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let payload = serde_json::to_vec_pretty(config)?;
        tokio::fs::write(path, payload).await?;
        Ok(())
    }
}

pub async fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut config = store.load_or_seed().await.unwrap_or_else(|err| {
        warn!("failed to load gateway config from store: {err:#}");
        GatewayConfig::default()
    });
    apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    config.sanitize();

    info!(
        "gateway config: coordinator {}:{}, {} named devices",
        config.coordinator.host,
        config.coordinator.port,
        config.devices.len()
    );

    #[cfg(feature = "ble")]
    let transport = Arc::new(
        BtleTransport::new()
            .await
            .context("failed to open bluetooth adapter")?,
    );
    #[cfg(not(feature = "ble"))]
    let transport = {
        info!("built without bluetooth support, driving a simulated fleet");
        Arc::new(SimulatedTransport::from_config(&config))
    };

    let http_port = config.http_port;
    let state = SharedState::new(config);
    start_tasks(&state, transport);

    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind gateway server at {addr}"))?;

    info!("gateway listening on http://{addr}");
    axum::serve(listener, api::router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    info!("gateway stopped");
    Ok(())
}

fn start_tasks<T: BleTransport>(state: &SharedState, transport: Arc<T>) {
    scanner::spawn(state.clone(), transport.clone());
    actuator::spawn(state.clone(), transport);
    relay::spawn(state.clone());
    sweeper::spawn(state.clone());
    input::spawn_stdin(state.clone());
}

fn apply_env_overrides(config: &mut GatewayConfig, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(host) = lookup("COORDINATOR_HOST") {
        config.coordinator.host = host;
    }
    if let Some(port) = lookup("COORDINATOR_PORT").and_then(|value| value.parse::<u16>().ok()) {
        config.coordinator.port = port;
    }
    if let Some(port) = lookup("GATEWAY_HTTP_PORT").and_then(|value| value.parse::<u16>().ok()) {
        config.http_port = port;
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn env_overrides_replace_stored_values() {
        let env: HashMap<&str, &str> = [
            ("COORDINATOR_HOST", "10.0.0.2"),
            ("COORDINATOR_PORT", "7000"),
            ("GATEWAY_HTTP_PORT", "not-a-port"),
        ]
        .into_iter()
        .collect();

        let mut config = GatewayConfig::default();
        apply_env_overrides(&mut config, |key| env.get(key).map(|value| value.to_string()));

        assert_eq!(config.coordinator.host, "10.0.0.2");
        assert_eq!(config.coordinator.port, 7000);
        assert_eq!(config.http_port, GatewayConfig::default().http_port);
    }

    #[tokio::test]
    async fn config_store_seeds_defaults_and_reads_them_back() {
        let dir = std::env::temp_dir().join(format!("dimmer-config-{}", std::process::id()));
        let store = ConfigStore {
            path: Arc::new(dir.join("gateway.json")),
        };

        let seeded = store.load_or_seed().await.unwrap();
        assert_eq!(seeded, GatewayConfig::default());
        assert!(tokio::fs::try_exists(store.path.as_ref()).await.unwrap());

        let mut edited = seeded;
        edited.http_port = 9090;
        store.save(&edited).await.unwrap();
        assert_eq!(store.load_or_seed().await.unwrap().http_port, 9090);

        tokio::fs::remove_dir_all(&dir).await.unwrap();
    }
}
