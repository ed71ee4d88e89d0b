//! Local push button.
//!
//! Each line read from the input counts as one press and queues a toggle
//! for the configured button address. On the host the input is stdin.

use dimmer_common::{DeviceAddress, PendingCommand};
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    task::JoinHandle,
};
use tracing::{info, warn};

use crate::shared::SharedState;

pub fn spawn_stdin(state: SharedState) -> Option<JoinHandle<()>> {
    let address = state.config().button_address?;
    info!("press enter to toggle {}", state.label(&address));
    Some(tokio::spawn(async move {
        let presses = run(&state, address, BufReader::new(tokio::io::stdin())).await;
        info!("button input closed after {presses} presses");
    }))
}

/// Returns the number of presses handled once the input ends.
pub async fn run<R>(state: &SharedState, address: DeviceAddress, input: R) -> usize
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = input.lines();
    let mut presses = 0;

    loop {
        match lines.next_line().await {
            Ok(Some(_)) => {
                presses += 1;
                state.enqueue(address, PendingCommand::toggle()).await;
            }
            Ok(None) => return presses,
            Err(err) => {
                warn!("button input failed: {err}");
                return presses;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dimmer_common::GatewayConfig;

    #[tokio::test]
    async fn each_line_queues_a_toggle() {
        let config = GatewayConfig::default();
        let address = config.button_address.unwrap();
        let state = SharedState::new(config);

        let presses = run(&state, address, "\n\n".as_bytes()).await;

        assert_eq!(presses, 2);
        let queue = state.queue().lock().await;
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.get(&address), Some(&PendingCommand::toggle()));
    }
}
