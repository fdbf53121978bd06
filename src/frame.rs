//! Request framing and response classification for the register protocol.
//!
//! Requests are eight bytes:
//!
//! Start Byte | End Byte | Meaning
//! 0          | 0        | Device id (0-255)
//! 1          | 1        | Function code, 3 = READ, 6 = WRITE
//! 2          | 3        | Register address, big endian
//! 4          | 5        | Word count (read) or value (write), big endian
//! 6          | 7        | A MODBUS CRC over bytes 0-5, little endian

use crc16::{State, MODBUS};
use tracing::warn;

pub const FUNCTION_READ: u8 = 3;
pub const FUNCTION_WRITE: u8 = 6;

/// Shortest frame that still carries an operation byte.
pub const MIN_FRAME_LEN: usize = 2;

const OPERATION_OFFSET: usize = 1;

/// What a response frame is, judged by its operation byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    ReadResponse,
    WriteAck,
    Unknown(u8),
}

impl FrameKind {
    pub fn from_operation(operation: u8) -> Self {
        match operation {
            FUNCTION_READ => FrameKind::ReadResponse,
            FUNCTION_WRITE => FrameKind::WriteAck,
            other => FrameKind::Unknown(other),
        }
    }
}

pub fn encode_read(device_id: u8, register: u16, word_count: u16) -> Vec<u8> {
    encode(device_id, FUNCTION_READ, register, word_count)
}

pub fn encode_write(device_id: u8, register: u16, value: u16) -> Vec<u8> {
    encode(device_id, FUNCTION_WRITE, register, value)
}

fn encode(device_id: u8, function: u8, register: u16, argument: u16) -> Vec<u8> {
    let mut frame = Vec::with_capacity(8);
    frame.push(device_id);
    frame.push(function);
    frame.extend_from_slice(&register.to_be_bytes());
    frame.extend_from_slice(&argument.to_be_bytes());
    let crc = crc(&frame);
    frame.extend_from_slice(&crc);
    frame
}

/// Classify a response frame.
///
/// Frames too short to carry an operation byte are logged and dropped, so a
/// single malformed notification never reaches the caller as an error.
pub fn classify(frame: &[u8]) -> Option<FrameKind> {
    if frame.len() < MIN_FRAME_LEN {
        warn!(len = frame.len(), frame = %hex::encode(frame), "dropping malformed frame");
        return None;
    }
    Some(FrameKind::from_operation(frame[OPERATION_OFFSET]))
}

/// Whether the last two bytes are a valid MODBUS CRC over the rest of the frame.
pub fn checksum_ok(frame: &[u8]) -> bool {
    if frame.len() < MIN_FRAME_LEN + 2 {
        return false;
    }
    let (body, crc_actual) = frame.split_at(frame.len() - 2);
    crc_actual == crc(body)
}

/// The register and value echoed back by a write acknowledgement.
pub fn decode_write_ack(frame: &[u8]) -> Option<(u16, u16)> {
    if frame.len() < 6 {
        return None;
    }
    let register = u16::from_be_bytes([frame[2], frame[3]]);
    let value = u16::from_be_bytes([frame[4], frame[5]]);
    Some((register, value))
}

/// Compute the CRC check value for the given bytes
fn crc(data: &[u8]) -> [u8; 2] {
    State::<MODBUS>::calculate(data).to_le_bytes()
}
