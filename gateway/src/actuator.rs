//! Applies pending commands to devices.
//!
//! One pass picks a command, connects, pairs and writes, then either
//! resolves the command, leaves it queued for another try, or abandons it
//! once its validity window has passed. The radio is held from the first
//! pass until the queue drains.

use std::{sync::Arc, time::Duration};

use dimmer_common::{
    DeviceAddress, DimmerProfile, ExpiryPolicy, PendingCommand, RandomSelector, RetryDecision,
    Selector, TimingConfig,
};
use tokio::{task::JoinHandle, time::timeout};
use tracing::{debug, info, warn};

use crate::{
    arbiter::{RadioGuard, RadioUser},
    error::{ActuationError, TransportError},
    shared::SharedState,
    transport::{BleConnection, BleTransport},
};

pub const STATE_OFF: u8 = 0x00;
pub const STATE_ON: u8 = 0x01;
pub const STATE_TOGGLE: u8 = 0x02;
/// Full scale of the level characteristic.
pub const LEVEL_NATIVE_MAX: u16 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Resolved,
    Retrying,
    Abandoned,
    /// The command was replaced while this pass was acting on it.
    Superseded,
}

pub struct Actuator<T: BleTransport> {
    state: SharedState,
    transport: Arc<T>,
    selector: Box<dyn Selector>,
    expiry: ExpiryPolicy,
    timing: TimingConfig,
    profile: DimmerProfile,
}

pub fn spawn<T: BleTransport>(state: SharedState, transport: Arc<T>) -> JoinHandle<()> {
    let actuator = Actuator::new(state, transport, Box::new(RandomSelector::from_entropy()));
    tokio::spawn(actuator.run())
}

/// Level characteristic value for a brightness percentage.
pub fn native_level(percent: u8) -> u16 {
    u16::from(percent.min(100)) * (LEVEL_NATIVE_MAX / 100)
}

impl<T: BleTransport> Actuator<T> {
    pub fn new(state: SharedState, transport: Arc<T>, selector: Box<dyn Selector>) -> Self {
        let timing = state.config().timing.clone();
        let profile = state.config().profile.clone();
        Self {
            expiry: ExpiryPolicy::from(&timing),
            state,
            transport,
            selector,
            timing,
            profile,
        }
    }

    pub async fn run(mut self) {
        let mut radio: Option<RadioGuard> = None;

        loop {
            let idle = {
                let queue = self.state.queue().lock().await;
                if queue.is_empty() {
                    self.state.set_pending_work(false);
                }
                queue.is_empty()
            };

            if idle {
                if radio.take().is_some() {
                    info!("queue drained, radio returned to scanning");
                }
                self.state.queue_activity().notified().await;
                continue;
            }

            if radio.is_none() {
                radio = Some(self.state.radio().acquire(RadioUser::Actuator).await);
            }

            if self.process_next().await == Some(Outcome::Abandoned) {
                // Let the radio settle before scanning resumes.
                tokio::time::sleep(Duration::from_millis(self.timing.abandon_delay_ms)).await;
            }
        }
    }

    /// Runs one selection and attempt. `None` when the queue is empty.
    pub async fn process_next(&mut self) -> Option<Outcome> {
        let selected = {
            let queue = self.state.queue().lock().await;
            queue.select_next(self.selector.as_mut())?
        };

        let label = self.state.label(&selected.address);
        info!("enacting command for {label}");
        let result = self.attempt(selected.address, &selected.command).await;
        tokio::time::sleep(Duration::from_millis(self.timing.attempt_settle_ms)).await;

        let outcome = match result {
            Ok(confirmed_on) => {
                let removed = self
                    .state
                    .queue()
                    .lock()
                    .await
                    .remove(&selected.address, selected.ticket);

                let mut written = selected.command;
                if let Some(is_on) = confirmed_on {
                    written.set_on = Some(is_on);
                    written.toggle = false;
                }
                self.state.apply_written(selected.address, &written).await;
                info!("enacted command for {label}");

                if removed {
                    Outcome::Resolved
                } else {
                    Outcome::Superseded
                }
            }
            Err(err) => {
                warn!("command for {label} failed: {err}");
                let now_ms = self.state.now_ms();
                let mut queue = self.state.queue().lock().await;
                let Some(first_attempted_at_ms) =
                    queue.record_failure(&selected.address, selected.ticket, now_ms)
                else {
                    return Some(Outcome::Superseded);
                };
                match self.expiry.after_failure(first_attempted_at_ms, now_ms) {
                    RetryDecision::Retry => Outcome::Retrying,
                    RetryDecision::Abandon => {
                        queue.remove(&selected.address, selected.ticket);
                        warn!(
                            "abandoned command for {label} after {} ms",
                            now_ms.saturating_sub(first_attempted_at_ms)
                        );
                        Outcome::Abandoned
                    }
                }
            }
        };
        Some(outcome)
    }

    async fn attempt(
        &self,
        address: DeviceAddress,
        command: &PendingCommand,
    ) -> Result<Option<bool>, ActuationError> {
        let connect_timeout = Duration::from_millis(self.timing.connect_timeout_ms);
        let mut connection = timeout(connect_timeout, self.transport.connect(address))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "connect",
                after: connect_timeout,
            })??;

        let result = self.session(&mut connection, command).await;
        connection.disconnect().await;
        result
    }

    async fn session(
        &self,
        connection: &mut T::Connection,
        command: &PendingCommand,
    ) -> Result<Option<bool>, ActuationError> {
        let pair_timeout = Duration::from_millis(self.timing.pair_timeout_ms);
        timeout(pair_timeout, connection.pair(pair_timeout))
            .await
            .map_err(|_| TransportError::Timeout {
                operation: "pair",
                after: pair_timeout,
            })??;

        write_command(connection, &self.profile, command).await
    }
}

/// Writes the command's on/off (or toggle) and brightness. Returns the
/// on/off state read back from the device when that was written and the
/// read succeeded. Only write failures are errors.
pub async fn write_command<C: BleConnection>(
    connection: &mut C,
    profile: &DimmerProfile,
    command: &PendingCommand,
) -> Result<Option<bool>, ActuationError> {
    connection.discover_service(profile.service).await?;

    let state_value = match (command.set_on, command.toggle) {
        (Some(true), _) => Some(STATE_ON),
        (Some(false), _) => Some(STATE_OFF),
        (None, true) => Some(STATE_TOGGLE),
        (None, false) => None,
    };
    if let Some(value) = state_value {
        connection
            .write_characteristic(profile.service, profile.state_characteristic, &[value])
            .await?;
    }

    if let Some(percent) = command.set_brightness {
        connection
            .write_characteristic(
                profile.service,
                profile.level_characteristic,
                &native_level(percent).to_le_bytes(),
            )
            .await?;
    }

    if state_value.is_none() {
        return Ok(None);
    }
    match connection
        .read_characteristic(profile.service, profile.state_characteristic)
        .await
    {
        Ok(raw) => Ok(raw.first().map(|value| *value == STATE_ON)),
        Err(err) => {
            debug!("state read-back failed after write: {err}");
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::sim::{Fault, SimulatedTransport};
    use dimmer_common::{GatewayConfig, RoundRobin};

    const HALL: DeviceAddress = DeviceAddress::new([0x00, 0x0D, 0x6F, 0xC6, 0xAA, 0x79]);
    const LOFT: DeviceAddress = DeviceAddress::new([0x00, 0x0D, 0x6F, 0xC6, 0xAA, 0x88]);

    fn config(connect_timeout_ms: u64) -> GatewayConfig {
        let mut config = GatewayConfig::default();
        config.timing.connect_timeout_ms = connect_timeout_ms;
        config.timing.command_expiry_ms = 5_000;
        config
    }

    async fn setup(
        config: GatewayConfig,
    ) -> (
        SharedState,
        Arc<SimulatedTransport>,
        Actuator<SimulatedTransport>,
    ) {
        let state = SharedState::new(config.clone());
        let transport = Arc::new(SimulatedTransport::new(
            config.profile.clone(),
            Duration::from_millis(100),
        ));
        transport.add_dimmer(HALL, false, 20).await;
        transport.add_dimmer(LOFT, true, 90).await;
        let actuator = Actuator::new(
            state.clone(),
            transport.clone(),
            Box::new(RoundRobin::default()),
        );
        (state, transport, actuator)
    }

    #[test]
    fn native_level_scaling() {
        assert_eq!(native_level(0), 0);
        assert_eq!(native_level(75), 7_500);
        assert_eq!(native_level(100), LEVEL_NATIVE_MAX);
        assert_eq!(native_level(200), LEVEL_NATIVE_MAX);
    }

    #[tokio::test(start_paused = true)]
    async fn successful_write_resolves_and_updates_cache() {
        let (state, transport, mut actuator) = setup(config(10_000)).await;
        state
            .enqueue(HALL, PendingCommand::set(Some(true), Some(75)))
            .await;

        assert_eq!(actuator.process_next().await, Some(Outcome::Resolved));
        assert!(state.queue().lock().await.is_empty());
        assert_eq!(transport.dimmer_state(&HALL).await, Some((true, 75)));

        let cache = state.cache().lock().await;
        let observed = cache.get(&HALL).unwrap();
        assert!(observed.is_on);
        assert_eq!(observed.brightness, 75);
    }

    #[tokio::test(start_paused = true)]
    async fn toggle_uses_device_side_toggle() {
        let (state, transport, mut actuator) = setup(config(10_000)).await;
        state.enqueue(LOFT, PendingCommand::toggle()).await;

        assert_eq!(actuator.process_next().await, Some(Outcome::Resolved));
        assert_eq!(transport.dimmer_state(&LOFT).await, Some((false, 90)));
    }

    async fn drain(actuator: &mut Actuator<SimulatedTransport>) -> Vec<Outcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = actuator.process_next().await {
            outcomes.push(outcome);
        }
        outcomes
    }

    #[tokio::test(start_paused = true)]
    async fn timeouts_with_default_timing_retry_once_then_abandon() {
        let mut config = GatewayConfig::default();
        config.sanitize();
        let (state, transport, mut actuator) = setup(config).await;
        transport.set_fault(HALL, Some(Fault::Unresponsive)).await;
        state.enqueue(HALL, PendingCommand::toggle()).await;

        // The window opens when the first 10 s connect times out, so the
        // second timeout lands past it.
        assert_eq!(
            drain(&mut actuator).await,
            vec![Outcome::Retrying, Outcome::Abandoned]
        );
        assert_eq!(transport.connect_attempts(), 2);
        assert!(state.queue().lock().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_timeouts_abandon_after_window() {
        let (state, transport, mut actuator) = setup(config(2_000)).await;
        transport.set_fault(HALL, Some(Fault::Unresponsive)).await;
        state.enqueue(HALL, PendingCommand::toggle()).await;

        // The first failure at ~2 s opens a window ending at ~7 s. Failures
        // at ~4 s and ~6 s are inside it; the one at ~8 s is not.
        assert_eq!(
            drain(&mut actuator).await,
            vec![
                Outcome::Retrying,
                Outcome::Retrying,
                Outcome::Retrying,
                Outcome::Abandoned,
            ]
        );
        assert_eq!(transport.connect_attempts(), 4);
        assert!(state.queue().lock().await.is_empty());
        assert!(state.now_ms() >= 8_000);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_read_back_does_not_repeat_toggle() {
        let (state, transport, mut actuator) = setup(config(10_000)).await;
        transport.set_fault(LOFT, Some(Fault::ReadFails)).await;
        state.enqueue(LOFT, PendingCommand::toggle()).await;

        assert_eq!(drain(&mut actuator).await, vec![Outcome::Resolved]);
        assert_eq!(transport.connect_attempts(), 1);
        assert_eq!(transport.dimmer_state(&LOFT).await, Some((false, 90)));
    }

    #[tokio::test(start_paused = true)]
    async fn protocol_errors_take_the_retry_path() {
        let (state, transport, mut actuator) = setup(config(10_000)).await;
        transport.set_fault(HALL, Some(Fault::MissingService)).await;
        state.enqueue(HALL, PendingCommand::toggle()).await;

        let before = state.queue().lock().await.get(&HALL).copied();
        assert_eq!(before.and_then(|command| command.first_attempted_at_ms), None);

        assert_eq!(actuator.process_next().await, Some(Outcome::Retrying));
        assert_eq!(state.queue().lock().await.len(), 1);
        let first = state
            .queue()
            .lock()
            .await
            .get(&HALL)
            .and_then(|command| command.first_attempted_at_ms);
        assert!(first.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn replacement_during_attempt_survives_success() {
        let (state, transport, mut actuator) = setup(config(10_000)).await;
        transport.set_connect_latency(Duration::from_millis(200)).await;
        state.enqueue(HALL, PendingCommand::toggle()).await;

        let attempt = tokio::spawn(async move { actuator.process_next().await });
        tokio::time::sleep(Duration::from_millis(50)).await;
        state
            .enqueue(HALL, PendingCommand::set(Some(false), Some(5)))
            .await;

        assert_eq!(attempt.await.unwrap(), Some(Outcome::Superseded));
        let queue = state.queue().lock().await;
        let survivor = queue.get(&HALL).unwrap();
        assert_eq!(survivor.set_on, Some(false));
        assert_eq!(survivor.first_attempted_at_ms, None);
    }

    #[tokio::test(start_paused = true)]
    async fn run_loop_drains_queue_and_returns_radio() {
        let (state, transport, actuator) = setup(config(10_000)).await;
        let task = tokio::spawn(actuator.run());

        state.enqueue(HALL, PendingCommand::set(Some(true), None)).await;
        state.enqueue(LOFT, PendingCommand::set(None, Some(10))).await;

        for _ in 0..100 {
            if state.queue().lock().await.is_empty() && state.radio().holder().is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(state.queue().lock().await.is_empty());
        assert_eq!(state.radio().holder(), None);
        assert!(!state.has_pending_work());
        assert_eq!(transport.dimmer_state(&HALL).await, Some((true, 20)));
        assert_eq!(transport.dimmer_state(&LOFT).await, Some((true, 10)));
        task.abort();
    }
}
