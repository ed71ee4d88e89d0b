use std::collections::{BTreeMap, HashMap};

use crate::{address::DeviceAddress, advert::Reading, queue::PendingCommand};

/// Last known state of one dimmer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObservedState {
    pub is_on: bool,
    pub brightness: u8,
    pub observed_at_ms: u64,
    pub generation: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Observation {
    /// First reading for the address, or a different on/off or brightness.
    Changed { generation: u64 },
    /// Same state as before; only the timestamp was refreshed.
    Refreshed,
}

impl Observation {
    pub fn is_changed(self) -> bool {
        matches!(self, Self::Changed { .. })
    }
}

/// Address to last observed state.
///
/// Generations come from one counter shared by every address, so a device
/// that is evicted and later seen again never reuses an earlier generation.
#[derive(Debug, Default)]
pub struct StateCache {
    entries: BTreeMap<DeviceAddress, ObservedState>,
    last_generation: u64,
}

impl StateCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<&ObservedState> {
        self.entries.get(address)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeviceAddress, &ObservedState)> {
        self.entries.iter()
    }

    pub fn observe(
        &mut self,
        address: DeviceAddress,
        reading: Reading,
        now_ms: u64,
    ) -> Observation {
        self.store(address, reading.is_on, reading.brightness, now_ms)
    }

    /// Applies the expected outcome of a successfully written command.
    ///
    /// Without a prior observation only an explicit on/off with an explicit
    /// brightness is enough to know the resulting state.
    pub fn apply_command(
        &mut self,
        address: DeviceAddress,
        command: &PendingCommand,
        now_ms: u64,
    ) -> Option<Observation> {
        let (is_on, brightness) = match self.entries.get(&address) {
            Some(prev) => {
                let is_on = match (command.set_on, command.toggle) {
                    (Some(on), _) => on,
                    (None, true) => !prev.is_on,
                    (None, false) => prev.is_on,
                };
                (is_on, command.set_brightness.unwrap_or(prev.brightness))
            }
            None => (command.set_on?, command.set_brightness?),
        };

        let brightness = if is_on { brightness.max(1) } else { brightness };
        Some(self.store(address, is_on, brightness, now_ms))
    }

    /// Removes entries not observed since `threshold_ms`. Returns the count.
    pub fn evict_older_than(&mut self, threshold_ms: u64) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, state| state.observed_at_ms >= threshold_ms);
        before - self.entries.len()
    }

    /// Entries whose generation is newer than what `sent` records.
    pub fn unsent(
        &self,
        sent: &HashMap<DeviceAddress, u64>,
    ) -> Vec<(DeviceAddress, ObservedState)> {
        self.entries
            .iter()
            .filter(|(address, state)| {
                sent.get(*address)
                    .map_or(true, |generation| state.generation > *generation)
            })
            .map(|(address, state)| (*address, *state))
            .collect()
    }

    fn store(
        &mut self,
        address: DeviceAddress,
        is_on: bool,
        brightness: u8,
        now_ms: u64,
    ) -> Observation {
        if let Some(prev) = self.entries.get_mut(&address) {
            if prev.is_on == is_on && prev.brightness == brightness {
                prev.observed_at_ms = now_ms;
                return Observation::Refreshed;
            }
        }

        self.last_generation += 1;
        let generation = self.last_generation;
        self.entries.insert(
            address,
            ObservedState {
                is_on,
                brightness,
                observed_at_ms: now_ms,
                generation,
            },
        );
        Observation::Changed { generation }
    }
}
