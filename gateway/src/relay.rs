//! TCP link to the coordinator.
//!
//! Inbound frames become queued commands. Outbound, every cache entry whose
//! generation is newer than what this session last sent is written as a
//! state frame. The sent generations live with the session, so a reconnect
//! starts with a full resync.

use std::{collections::HashMap, time::Duration};

use dimmer_common::{
    frame::{decode_command, StateFrame},
    select::drain_fair,
    Backoff, DeviceAddress, FrameReassembler, RandomSelector, Selector,
};
use tokio::{
    io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt},
    net::TcpStream,
    task::JoinHandle,
};
use tracing::{debug, info, warn};

use crate::{error::NetworkError, shared::SharedState};

const READ_CHUNK: usize = 256;

pub struct Relay {
    state: SharedState,
    endpoint: String,
    backoff: Backoff,
    selector: Box<dyn Selector>,
}

pub fn spawn(state: SharedState) -> JoinHandle<()> {
    let relay = Relay::new(state, Box::new(RandomSelector::from_entropy()));
    tokio::spawn(relay.run())
}

impl Relay {
    pub fn new(state: SharedState, selector: Box<dyn Selector>) -> Self {
        let coordinator = &state.config().coordinator;
        let endpoint = format!("{}:{}", coordinator.host, coordinator.port);
        let backoff = Backoff::from(&state.config().timing);
        Self {
            state,
            endpoint,
            backoff,
            selector,
        }
    }

    /// Reconnects forever with capped exponential backoff.
    pub async fn run(mut self) {
        loop {
            match TcpStream::connect(&self.endpoint).await {
                Ok(stream) => {
                    info!("connected to coordinator at {}", self.endpoint);
                    self.backoff.reset();
                    self.state.set_relay_connected(true);
                    let err = session(&self.state, stream, self.selector.as_mut()).await;
                    self.state.set_relay_connected(false);
                    warn!("coordinator session ended: {err}");
                }
                Err(source) => {
                    let err = NetworkError::Connect {
                        endpoint: self.endpoint.clone(),
                        source,
                    };
                    warn!("{err}");
                }
            }

            self.backoff.record_failure();
            let delay = Duration::from_millis(self.backoff.delay_ms());
            debug!(
                "reconnecting in {delay:?} (failure {})",
                self.backoff.failures()
            );
            tokio::time::sleep(delay).await;
        }
    }
}

/// Runs both directions until either fails.
pub async fn session<S>(state: &SharedState, stream: S, selector: &mut dyn Selector) -> NetworkError
where
    S: AsyncRead + AsyncWrite + Send,
{
    let (reader, writer) = tokio::io::split(stream);
    tokio::select! {
        err = pump_inbound(state, reader) => err,
        err = pump_outbound(state, writer, selector) => err,
    }
}

async fn pump_inbound<R: AsyncRead + Unpin>(state: &SharedState, mut reader: R) -> NetworkError {
    let mut reassembler = FrameReassembler::new();
    let mut chunk = [0u8; READ_CHUNK];

    loop {
        let read = match reader.read(&mut chunk).await {
            Ok(0) => return NetworkError::Closed,
            Ok(read) => read,
            Err(err) => return NetworkError::Read(err),
        };
        reassembler.push(&chunk[..read]);

        while let Some(frame) = reassembler.next_frame() {
            match decode_command(&frame) {
                Ok((address, command)) => {
                    state.enqueue(address, command).await;
                }
                Err(err) => warn!("dropped inbound frame {frame:02X?}: {err}"),
            }
        }
    }
}

async fn pump_outbound<W: AsyncWrite + Unpin>(
    state: &SharedState,
    mut writer: W,
    selector: &mut dyn Selector,
) -> NetworkError {
    let mut changes = state.subscribe_state_changes();
    let mut sent: HashMap<DeviceAddress, u64> = HashMap::new();

    loop {
        changes.borrow_and_update();
        let unsent = state.cache().lock().await.unsent(&sent);

        if !unsent.is_empty() {
            for (address, observed) in drain_fair(unsent, selector) {
                let frame = StateFrame {
                    address,
                    is_on: observed.is_on,
                    brightness: observed.brightness,
                }
                .encode();
                if let Err(err) = writer.write_all(&frame).await {
                    return NetworkError::Write(err);
                }
                sent.insert(address, observed.generation);
            }
            if let Err(err) = writer.flush().await {
                return NetworkError::Write(err);
            }
        }

        if changes.changed().await.is_err() {
            return NetworkError::Closed;
        }
    }
}
