use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use dimmer_common::{
    CommandQueue, DeviceAddress, GatewayConfig, Insertion, Observation, PendingCommand, Reading,
    StateCache,
};
use tokio::{
    sync::{watch, Mutex, Notify},
    time::Instant,
};
use tracing::info;

use crate::arbiter::RadioArbiter;

/// Everything the gateway tasks share. Cheap to clone.
#[derive(Clone)]
pub struct SharedState {
    config: Arc<GatewayConfig>,
    radio: RadioArbiter,
    cache: Arc<Mutex<StateCache>>,
    queue: Arc<Mutex<CommandQueue>>,
    queue_activity: Arc<Notify>,
    state_changed: Arc<watch::Sender<u64>>,
    pending_work: Arc<watch::Sender<bool>>,
    relay_connected: Arc<AtomicBool>,
    started: Instant,
}

impl SharedState {
    pub fn new(config: GatewayConfig) -> Self {
        let (state_changed, _) = watch::channel(0);
        let (pending_work, _) = watch::channel(false);
        Self {
            config: Arc::new(config),
            radio: RadioArbiter::new(),
            cache: Arc::new(Mutex::new(StateCache::new())),
            queue: Arc::new(Mutex::new(CommandQueue::new())),
            queue_activity: Arc::new(Notify::new()),
            state_changed: Arc::new(state_changed),
            pending_work: Arc::new(pending_work),
            relay_connected: Arc::new(AtomicBool::new(false)),
            started: Instant::now(),
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn radio(&self) -> &RadioArbiter {
        &self.radio
    }

    pub fn cache(&self) -> &Mutex<StateCache> {
        &self.cache
    }

    pub fn queue(&self) -> &Mutex<CommandQueue> {
        &self.queue
    }

    /// Signalled when an insertion turns an empty queue non-empty. A signal
    /// sent while nobody waits is kept for the next waiter.
    pub fn queue_activity(&self) -> &Notify {
        &self.queue_activity
    }

    /// Monotonic milliseconds since startup.
    pub fn now_ms(&self) -> u64 {
        self.started
            .elapsed()
            .as_millis()
            .try_into()
            .unwrap_or(u64::MAX)
    }

    pub fn label(&self, address: &DeviceAddress) -> String {
        match self.config.device_name(address) {
            Some(name) => format!("{name} ({address})"),
            None => address.to_string(),
        }
    }

    pub async fn enqueue(&self, address: DeviceAddress, command: PendingCommand) -> Insertion {
        let insertion = {
            let mut queue = self.queue.lock().await;
            let insertion = queue.insert(address, command);
            self.set_pending_work(true);
            insertion
        };

        if insertion.was_empty {
            self.queue_activity.notify_one();
        }
        info!(
            "queued command for {}: on={:?} toggle={} brightness={:?}{}",
            self.label(&address),
            command.set_on,
            command.toggle,
            command.set_brightness,
            if insertion.replaced { " (replaced)" } else { "" }
        );
        insertion
    }

    pub async fn observe(&self, address: DeviceAddress, reading: Reading) -> Observation {
        let now_ms = self.now_ms();
        let observation = self.cache.lock().await.observe(address, reading, now_ms);
        if observation.is_changed() {
            self.notify_state_changed();
        }
        observation
    }

    /// Records the state a successful write is expected to have produced.
    pub async fn apply_written(&self, address: DeviceAddress, command: &PendingCommand) {
        let now_ms = self.now_ms();
        let observation = self
            .cache
            .lock()
            .await
            .apply_command(address, command, now_ms);
        if observation.is_some_and(Observation::is_changed) {
            self.notify_state_changed();
        }
    }

    pub fn subscribe_state_changes(&self) -> watch::Receiver<u64> {
        self.state_changed.subscribe()
    }

    fn notify_state_changed(&self) {
        self.state_changed
            .send_modify(|version| *version = version.wrapping_add(1));
    }

    /// Drives the "has pending work" indicator. Callers hold the queue lock
    /// so the indicator never disagrees with the queue for long.
    pub fn set_pending_work(&self, pending: bool) {
        let changed = self.pending_work.send_if_modified(|current| {
            if *current == pending {
                false
            } else {
                *current = pending;
                true
            }
        });
        if changed {
            info!(
                "pending work indicator {}",
                if pending { "on" } else { "off" }
            );
        }
    }

    pub fn has_pending_work(&self) -> bool {
        *self.pending_work.borrow()
    }

    pub fn set_relay_connected(&self, connected: bool) {
        self.relay_connected.store(connected, Ordering::Relaxed);
    }

    pub fn relay_connected(&self) -> bool {
        self.relay_connected.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const HALL: DeviceAddress = DeviceAddress::new([0x00, 0x0D, 0x6F, 0xC6, 0xAA, 0x79]);

    fn reading(is_on: bool, brightness: u8) -> Reading {
        Reading {
            revision: 0,
            is_on,
            brightness,
        }
    }

    #[tokio::test]
    async fn enqueue_wakes_a_later_waiter() {
        let state = SharedState::new(GatewayConfig::default());
        state.enqueue(HALL, PendingCommand::toggle()).await;
        assert!(state.has_pending_work());

        // The wake was sent before anyone waited; it must not be lost.
        tokio::time::timeout(Duration::from_secs(1), state.queue_activity().notified())
            .await
            .expect("queue wake lost");
    }

    #[tokio::test]
    async fn only_changed_observations_signal() {
        let state = SharedState::new(GatewayConfig::default());
        let mut changes = state.subscribe_state_changes();

        assert!(state.observe(HALL, reading(true, 50)).await.is_changed());
        assert!(changes.has_changed().unwrap());
        changes.borrow_and_update();

        assert!(!state.observe(HALL, reading(true, 50)).await.is_changed());
        assert!(!changes.has_changed().unwrap());
    }

    #[tokio::test]
    async fn labels_use_configured_names() {
        let mut config = GatewayConfig::default();
        config.devices.push(dimmer_common::NamedDevice {
            name: "Hall".to_string(),
            address: HALL,
        });
        config.sanitize();
        let state = SharedState::new(config);

        assert_eq!(state.label(&HALL), "Hall (00:0D:6F:C6:AA:79)");
        let other = DeviceAddress::new([1, 2, 3, 4, 5, 6]);
        assert_eq!(state.label(&other), "01:02:03:04:05:06");
    }
}
