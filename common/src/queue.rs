//! Pending commands, at most one per address.

use std::collections::BTreeMap;

use crate::{address::DeviceAddress, select::Selector};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingCommand {
    pub set_on: Option<bool>,
    pub toggle: bool,
    /// Percent, 0..=100.
    pub set_brightness: Option<u8>,
    /// Stamped when the first attempt fails, not on insertion.
    pub first_attempted_at_ms: Option<u64>,
}

impl PendingCommand {
    pub fn toggle() -> Self {
        Self {
            toggle: true,
            ..Self::default()
        }
    }

    pub fn set(on: Option<bool>, brightness: Option<u8>) -> Self {
        Self {
            set_on: on,
            set_brightness: brightness.map(|value| value.min(100)),
            ..Self::default()
        }
    }

    pub fn has_effect(&self) -> bool {
        self.set_on.is_some() || self.toggle || self.set_brightness.is_some()
    }
}

/// Identifies one inserted command instance. A replacement for the same
/// address gets a new ticket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Ticket(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Insertion {
    pub ticket: Ticket,
    /// The queue had no entries before this insertion.
    pub was_empty: bool,
    pub replaced: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Selected {
    pub address: DeviceAddress,
    pub ticket: Ticket,
    pub command: PendingCommand,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    ticket: Ticket,
    command: PendingCommand,
}

#[derive(Debug, Default)]
pub struct CommandQueue {
    entries: BTreeMap<DeviceAddress, Entry>,
    last_ticket: u64,
}

impl CommandQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, address: &DeviceAddress) -> Option<&PendingCommand> {
        self.entries.get(address).map(|entry| &entry.command)
    }

    pub fn addresses(&self) -> impl Iterator<Item = &DeviceAddress> {
        self.entries.keys()
    }

    /// Stores `command`, replacing whatever was pending for `address`.
    pub fn insert(&mut self, address: DeviceAddress, command: PendingCommand) -> Insertion {
        let was_empty = self.entries.is_empty();
        self.last_ticket += 1;
        let ticket = Ticket(self.last_ticket);
        let replaced = self
            .entries
            .insert(address, Entry { ticket, command })
            .is_some();
        Insertion {
            ticket,
            was_empty,
            replaced,
        }
    }

    /// Picks one entry among a snapshot of the current addresses.
    pub fn select_next(&self, selector: &mut dyn Selector) -> Option<Selected> {
        if self.entries.is_empty() {
            return None;
        }
        let index = selector.pick(self.entries.len());
        let (address, entry) = self.entries.iter().nth(index)?;
        Some(Selected {
            address: *address,
            ticket: entry.ticket,
            command: entry.command,
        })
    }

    /// Records a failed attempt, stamping the first attempt time if unset,
    /// and returns that time. `None` when the ticket no longer matches the
    /// stored command.
    pub fn record_failure(
        &mut self,
        address: &DeviceAddress,
        ticket: Ticket,
        now_ms: u64,
    ) -> Option<u64> {
        let entry = self
            .entries
            .get_mut(address)
            .filter(|entry| entry.ticket == ticket)?;
        Some(
            *entry
                .command
                .first_attempted_at_ms
                .get_or_insert(now_ms),
        )
    }

    /// Removes the entry only if it is still the instance `ticket` names.
    pub fn remove(&mut self, address: &DeviceAddress, ticket: Ticket) -> bool {
        match self.entries.get(address) {
            Some(entry) if entry.ticket == ticket => {
                self.entries.remove(address);
                true
            }
            _ => false,
        }
    }
}
