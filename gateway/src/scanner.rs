//! Turns advertisements into cached dimmer state.

use std::{sync::Arc, time::Duration};

use dimmer_common::{advert, Advertisement, Observation};
use futures::StreamExt;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::{
    arbiter::RadioUser,
    error::TransportError,
    shared::SharedState,
    transport::{AdvertisementStream, BleTransport, ScanParams},
};

pub fn spawn<T: BleTransport>(state: SharedState, transport: Arc<T>) -> JoinHandle<()> {
    tokio::spawn(run(state, transport))
}

/// Scans forever. A failed or ended session is retried after a short delay.
pub async fn run<T: BleTransport>(state: SharedState, transport: Arc<T>) {
    let retry_delay = Duration::from_millis(state.config().timing.scan_retry_delay_ms);
    let params = ScanParams::from(&state.config().timing);

    loop {
        match open_session(&state, transport.as_ref(), params).await {
            Ok(mut adverts) => {
                info!("scan session open");
                while let Some(advertisement) = adverts.next().await {
                    handle_advertisement(&state, &advertisement).await;
                }
                warn!("scan session ended");
            }
            Err(err) => warn!("failed to start scan: {err}"),
        }
        tokio::time::sleep(retry_delay).await;
    }
}

/// Holds the radio only while the session is being negotiated.
async fn open_session<T: BleTransport>(
    state: &SharedState,
    transport: &T,
    params: ScanParams,
) -> Result<AdvertisementStream, TransportError> {
    let _radio = state.radio().acquire(RadioUser::Scanner).await;
    transport.scan(params).await
}

pub async fn handle_advertisement(
    state: &SharedState,
    advertisement: &Advertisement,
) -> Option<Observation> {
    let address = advertisement.address;
    if !state.config().is_known(&address) {
        return None;
    }

    let reading = match advert::decode(advertisement, &state.config().profile) {
        Ok(reading) => reading,
        Err(skip) => {
            debug!("ignored advertisement from {address}: {skip:?}");
            return None;
        }
    };

    let observation = state.observe(address, reading).await;
    if let Observation::Changed { generation } = observation {
        info!(
            "{} is {} at {}% (generation {generation})",
            state.label(&address),
            if reading.is_on { "on" } else { "off" },
            reading.brightness
        );
    }
    Some(observation)
}
