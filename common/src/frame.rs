//! Fixed 16-byte records exchanged with the coordinator.
//!
//! Inbound (coordinator to gateway):
//!
//! | bytes  | field                                   |
//! |--------|-----------------------------------------|
//! | 0..6   | device address                          |
//! | 6      | opcode: 0 off, 1 on, 2 toggle, 255 keep |
//! | 7      | brightness 0..=100, larger means keep   |
//! | 8..16  | reserved                                |
//!
//! Outbound (gateway to coordinator):
//!
//! | bytes  | field              |
//! |--------|--------------------|
//! | 0..6   | device address     |
//! | 6      | tag, always `0x55` |
//! | 7      | is_on (0 or 1)     |
//! | 8      | brightness 0..=100 |
//! | 9..16  | reserved           |

use thiserror::Error;

use crate::{
    address::{DeviceAddress, ADDRESS_LEN},
    queue::PendingCommand,
};

pub const FRAME_LEN: usize = 16;
pub const LIGHT_TAG: u8 = 0x55;
pub const KEEP: u8 = 0xFF;

pub type Frame = [u8; FRAME_LEN];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("unknown opcode {0:#04x}")]
    UnknownOpcode(u8),
    #[error("frame requests no change")]
    NoEffect,
    #[error("unexpected tag {0:#04x}")]
    Tag(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    Off,
    On,
    Toggle,
}

impl Opcode {
    fn from_byte(byte: u8) -> Result<Option<Self>, FrameError> {
        match byte {
            0 => Ok(Some(Self::Off)),
            1 => Ok(Some(Self::On)),
            2 => Ok(Some(Self::Toggle)),
            KEEP => Ok(None),
            other => Err(FrameError::UnknownOpcode(other)),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::On => 1,
            Self::Toggle => 2,
        }
    }
}

fn frame_address(frame: &Frame) -> DeviceAddress {
    let mut octets = [0u8; ADDRESS_LEN];
    octets.copy_from_slice(&frame[..ADDRESS_LEN]);
    DeviceAddress::new(octets)
}

pub fn decode_command(frame: &Frame) -> Result<(DeviceAddress, PendingCommand), FrameError> {
    let address = frame_address(frame);
    let mut command = PendingCommand::default();

    match Opcode::from_byte(frame[6])? {
        Some(Opcode::Off) => command.set_on = Some(false),
        Some(Opcode::On) => command.set_on = Some(true),
        Some(Opcode::Toggle) => command.toggle = true,
        None => {}
    }

    let brightness = frame[7];
    if brightness <= 100 {
        command.set_brightness = Some(brightness);
    }

    if !command.has_effect() {
        return Err(FrameError::NoEffect);
    }
    Ok((address, command))
}

pub fn encode_command(address: DeviceAddress, command: &PendingCommand) -> Frame {
    let opcode = match (command.set_on, command.toggle) {
        (Some(false), _) => Some(Opcode::Off),
        (Some(true), _) => Some(Opcode::On),
        (None, true) => Some(Opcode::Toggle),
        (None, false) => None,
    };

    let mut frame = [0u8; FRAME_LEN];
    frame[..ADDRESS_LEN].copy_from_slice(&address.octets());
    frame[6] = opcode.map_or(KEEP, Opcode::to_byte);
    frame[7] = command.set_brightness.map_or(KEEP, |value| value.min(100));
    frame
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateFrame {
    pub address: DeviceAddress,
    pub is_on: bool,
    pub brightness: u8,
}

impl StateFrame {
    pub fn encode(&self) -> Frame {
        let mut frame = [0u8; FRAME_LEN];
        frame[..ADDRESS_LEN].copy_from_slice(&self.address.octets());
        frame[6] = LIGHT_TAG;
        frame[7] = u8::from(self.is_on);
        frame[8] = self.brightness.min(100);
        frame
    }

    pub fn decode(frame: &Frame) -> Result<Self, FrameError> {
        if frame[6] != LIGHT_TAG {
            return Err(FrameError::Tag(frame[6]));
        }
        Ok(Self {
            address: frame_address(frame),
            is_on: frame[7] != 0,
            brightness: frame[8],
        })
    }
}

/// Splits a byte stream into whole frames, carrying partial data over.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    pending: Vec<u8>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
    }

    pub fn buffered(&self) -> usize {
        self.pending.len()
    }

    pub fn next_frame(&mut self) -> Option<Frame> {
        if self.pending.len() < FRAME_LEN {
            return None;
        }
        let mut frame = [0u8; FRAME_LEN];
        frame.copy_from_slice(&self.pending[..FRAME_LEN]);
        self.pending.drain(..FRAME_LEN);
        Some(frame)
    }
}
