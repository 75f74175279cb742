//! Binary wire format for a single MIDI datagram (spec.md §3, §4.3).
//!
//! ```text
//! magic(2) version(1) flags(1) source_node(16) dest_node(16) sequence(2)
//! timestamp_us(4) device_id(2) payload_len(2) payload(payload_len)
//! ```
//! All multi-byte integers are little-endian. Header is exactly 46 bytes.

use crate::ids::{DeviceId, NodeId};

pub const MAGIC: [u8; 2] = [0x4D, 0x49];
pub const VERSION: u8 = 0x01;
pub const HEADER_SIZE: usize = 46;
pub const MAX_PAYLOAD_LEN: usize = 1024;

const FLAG_RELIABLE: u8 = 1 << 0;
const FLAG_ACK: u8 = 1 << 1;
const FLAG_HEARTBEAT: u8 = 1 << 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PacketFlags {
    pub reliable: bool,
    pub ack: bool,
    pub heartbeat: bool,
}

impl PacketFlags {
    fn to_byte(self) -> u8 {
        let mut b = 0u8;
        if self.reliable {
            b |= FLAG_RELIABLE;
        }
        if self.ack {
            b |= FLAG_ACK;
        }
        if self.heartbeat {
            b |= FLAG_HEARTBEAT;
        }
        b
    }

    fn from_byte(b: u8) -> Self {
        Self {
            reliable: b & FLAG_RELIABLE != 0,
            ack: b & FLAG_ACK != 0,
            heartbeat: b & FLAG_HEARTBEAT != 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MidiPacket {
    pub flags: PacketFlags,
    pub source_node: NodeId,
    pub dest_node: NodeId,
    pub sequence: u16,
    pub timestamp_us: u32,
    pub device_id: DeviceId,
    pub payload: Vec<u8>,
}

#[derive(Debug, thiserror::Error, Clone, Copy, PartialEq, Eq)]
pub enum DecodeError {
    #[error("bad magic bytes")]
    BadMagic,
    #[error("unsupported protocol version")]
    UnsupportedVersion,
    #[error("packet truncated")]
    Truncated,
    #[error("payload exceeds maximum of {MAX_PAYLOAD_LEN} bytes")]
    PayloadTooLarge,
}

impl MidiPacket {
    pub fn heartbeat(source_node: NodeId, dest_node: NodeId, sequence: u16, timestamp_us: u32) -> Self {
        Self {
            flags: PacketFlags {
                heartbeat: true,
                ..Default::default()
            },
            source_node,
            dest_node,
            sequence,
            timestamp_us,
            device_id: DeviceId::NONE,
            payload: Vec::new(),
        }
    }

    pub fn ack(source_node: NodeId, dest_node: NodeId, acked_sequence: u16, timestamp_us: u32) -> Self {
        Self {
            flags: PacketFlags {
                ack: true,
                ..Default::default()
            },
            source_node,
            dest_node,
            sequence: 0,
            timestamp_us,
            device_id: DeviceId::NONE,
            payload: acked_sequence.to_le_bytes().to_vec(),
        }
    }

    /// Extracts the acknowledged sequence carried in an ack packet's payload.
    pub fn acked_sequence(&self) -> Option<u16> {
        if !self.flags.ack || self.payload.len() < 2 {
            return None;
        }
        Some(u16::from_le_bytes([self.payload[0], self.payload[1]]))
    }

    /// Writes exactly `HEADER_SIZE + payload.len()` bytes into `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.clear();
        out.reserve(HEADER_SIZE + self.payload.len());
        out.extend_from_slice(&MAGIC);
        out.push(VERSION);
        out.push(self.flags.to_byte());
        out.extend_from_slice(&self.source_node.to_bytes());
        out.extend_from_slice(&self.dest_node.to_bytes());
        out.extend_from_slice(&self.sequence.to_le_bytes());
        out.extend_from_slice(&self.timestamp_us.to_le_bytes());
        out.extend_from_slice(&self.device_id.0.to_le_bytes());
        out.extend_from_slice(&(self.payload.len() as u16).to_le_bytes());
        out.extend_from_slice(&self.payload);
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, DecodeError> {
        if bytes.len() < HEADER_SIZE {
            return Err(DecodeError::Truncated);
        }
        if bytes[0..2] != MAGIC {
            return Err(DecodeError::BadMagic);
        }
        if bytes[2] != VERSION {
            return Err(DecodeError::UnsupportedVersion);
        }

        let flags = PacketFlags::from_byte(bytes[3]);

        let mut source_bytes = [0u8; 16];
        source_bytes.copy_from_slice(&bytes[4..20]);
        let source_node = NodeId::from_bytes(source_bytes);

        let mut dest_bytes = [0u8; 16];
        dest_bytes.copy_from_slice(&bytes[20..36]);
        let dest_node = NodeId::from_bytes(dest_bytes);

        let sequence = u16::from_le_bytes([bytes[36], bytes[37]]);
        let timestamp_us = u32::from_le_bytes([bytes[38], bytes[39], bytes[40], bytes[41]]);
        let device_id = DeviceId(u16::from_le_bytes([bytes[42], bytes[43]]));
        let payload_len = u16::from_le_bytes([bytes[44], bytes[45]]) as usize;

        if payload_len > MAX_PAYLOAD_LEN {
            return Err(DecodeError::PayloadTooLarge);
        }
        if bytes.len() != HEADER_SIZE + payload_len {
            return Err(DecodeError::Truncated);
        }

        let payload = bytes[HEADER_SIZE..HEADER_SIZE + payload_len].to_vec();

        Ok(Self {
            flags,
            source_node,
            dest_node,
            sequence,
            timestamp_us,
            device_id,
            payload,
        })
    }
}
