//! Wire protocol for openDAQ boards: opcodes, commands and frame codec.
//!
//! Every request is a [`Command`] (opcode + payload). The [`Codec`] trait turns
//! a command into a wire frame and validates the fixed-length frame that comes
//! back. The dispatcher only ever talks to the trait, so the framing can be
//! swapped without touching retry or locking logic.
//!
//! ## Default framing
//!
//! [`ChecksumCodec`] implements the openDAQ binary framing:
//!
//! ```text
//! [checksum:u16 BE][opcode:u8][len:u8][payload: len bytes]
//! ```
//!
//! The checksum is the 16-bit wrapping sum of every byte after the checksum
//! field. Responses use the same layout. Multi-byte payload fields are
//! big-endian.

use std::fmt;
use std::io;

// ── Opcodes ──

/// Read one ADC sample under the current input configuration. Response: `raw:i16`.
pub const AIN: u8 = 1;

/// Configure the ADC input pair, gain and sample count.
/// Payload: `[pos, neg, gain_id, n_samples]`. Response: 6 bytes.
pub const AIN_CFG: u8 = 2;

/// Read or write a single PIO. Payload: `[n]` (read) or `[n, value]` (write).
pub const PIO: u8 = 3;

/// Set a single PIO direction. Payload: `[n, output]`.
pub const PIO_DIR: u8 = 5;

/// Read or write the whole PIO port. Payload: `[]` (read) or `[value]` (write).
pub const PORT: u8 = 7;

/// Set the whole-port direction mask. Payload: `[mask]`.
pub const PORT_DIR: u8 = 9;

/// Set a raw DAC code. Payload: `[raw:i16, n]`.
pub const SET_DAC: u8 = 13;

/// Write an LED color. Payload: `[color, n]`.
pub const LED_W: u8 = 18;

/// Read one calibration register. Payload: `[reg]`. Response: `[reg, gain:i16, offset:i16]`.
pub const GET_CALIB: u8 = 36;

/// Identity query (empty payload) or device-id write (`[id:u32]`).
/// Response: `[model, version, serial:u32]`.
pub const ID_CONFIG: u8 = 39;

// ── Response lengths (payload bytes, framing excluded) ──

pub const AIN_RESP_LEN: usize = 2;
pub const AIN_CFG_RESP_LEN: usize = 6;
pub const PIO_RESP_LEN: usize = 2;
pub const PIO_DIR_RESP_LEN: usize = 2;
pub const PORT_RESP_LEN: usize = 1;
pub const PORT_DIR_RESP_LEN: usize = 1;
pub const SET_DAC_RESP_LEN: usize = 3;
pub const LED_W_RESP_LEN: usize = 2;
pub const GET_CALIB_RESP_LEN: usize = 5;
pub const ID_CONFIG_RESP_LEN: usize = 6;

/// Size of the frame header: checksum (2) + opcode (1) + length (1).
pub const FRAME_HEADER_LEN: usize = 4;

/// Longest payload the one-byte length field can describe.
pub const MAX_PAYLOAD_LEN: usize = u8::MAX as usize;

// ── Command ──

/// A single device request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub opcode: u8,
    pub payload: Vec<u8>,
}

impl Command {
    pub fn new(opcode: u8, payload: Vec<u8>) -> Self {
        Command { opcode, payload }
    }

    /// A command without payload (queries such as `AIN` or `ID_CONFIG`).
    pub fn query(opcode: u8) -> Self {
        Command {
            opcode,
            payload: Vec::new(),
        }
    }
}

// ── Frame errors ──

/// Failure to obtain a well-formed response frame.
#[derive(Debug)]
pub enum FrameError {
    /// Underlying transport I/O failed.
    Io(io::Error),
    /// Fewer bytes than expected arrived before the read timeout.
    ShortRead { expected: usize, got: usize },
    /// The frame checksum does not match its contents.
    Checksum { expected: u16, got: u16 },
    /// The device answered a different opcode than the one sent.
    OpcodeMismatch { sent: u8, got: u8 },
    /// The declared payload length differs from the one expected for the opcode.
    LengthMismatch { expected: usize, got: usize },
}

impl fmt::Display for FrameError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameError::Io(e) => write!(f, "transport I/O: {e}"),
            FrameError::ShortRead { expected, got } => {
                write!(f, "short read: got {got} of {expected} bytes")
            }
            FrameError::Checksum { expected, got } => {
                write!(f, "checksum mismatch: expected 0x{expected:04X}, got 0x{got:04X}")
            }
            FrameError::OpcodeMismatch { sent, got } => {
                write!(f, "opcode mismatch: sent {sent}, got {got}")
            }
            FrameError::LengthMismatch { expected, got } => {
                write!(f, "payload length mismatch: expected {expected}, got {got}")
            }
        }
    }
}

impl std::error::Error for FrameError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FrameError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for FrameError {
    fn from(e: io::Error) -> Self {
        FrameError::Io(e)
    }
}

// ── Codec ──

/// Encodes commands into wire frames and validates response frames.
pub trait Codec {
    /// Build the wire frame for `command`.
    fn encode(&self, command: &Command) -> Vec<u8>;

    /// Number of wire bytes to read for a response carrying `payload_len` bytes.
    fn frame_len(&self, payload_len: usize) -> usize;

    /// Validate a response frame for `opcode` and return its payload.
    fn decode(&self, opcode: u8, frame: &[u8], payload_len: usize)
    -> Result<Vec<u8>, FrameError>;
}

/// 16-bit wrapping byte sum used by the default framing.
pub fn checksum(bytes: &[u8]) -> u16 {
    bytes
        .iter()
        .fold(0u16, |acc, &b| acc.wrapping_add(u16::from(b)))
}

/// openDAQ binary framing with an additive 16-bit checksum.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChecksumCodec;

impl Codec for ChecksumCodec {
    fn encode(&self, command: &Command) -> Vec<u8> {
        debug_assert!(
            command.payload.len() <= MAX_PAYLOAD_LEN,
            "payload of {} bytes does not fit the length field",
            command.payload.len()
        );
        let mut body = Vec::with_capacity(2 + command.payload.len());
        body.push(command.opcode);
        body.push(command.payload.len() as u8);
        body.extend_from_slice(&command.payload);

        let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + command.payload.len());
        frame.extend_from_slice(&checksum(&body).to_be_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    fn frame_len(&self, payload_len: usize) -> usize {
        FRAME_HEADER_LEN + payload_len
    }

    fn decode(
        &self,
        opcode: u8,
        frame: &[u8],
        payload_len: usize,
    ) -> Result<Vec<u8>, FrameError> {
        let expected_len = self.frame_len(payload_len);
        if frame.len() < expected_len {
            return Err(FrameError::ShortRead {
                expected: expected_len,
                got: frame.len(),
            });
        }
        let frame = &frame[..expected_len];

        let declared = u16::from_be_bytes([frame[0], frame[1]]);
        let computed = checksum(&frame[2..]);
        if declared != computed {
            return Err(FrameError::Checksum {
                expected: computed,
                got: declared,
            });
        }
        if frame[2] != opcode {
            return Err(FrameError::OpcodeMismatch {
                sent: opcode,
                got: frame[2],
            });
        }
        let len = frame[3] as usize;
        if len != payload_len {
            return Err(FrameError::LengthMismatch {
                expected: payload_len,
                got: len,
            });
        }
        Ok(frame[FRAME_HEADER_LEN..].to_vec())
    }
}

// ── Payload helpers ──

/// Big-endian `i16` at `offset`. Callers check the payload length first.
pub(crate) fn be_i16(payload: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([payload[offset], payload[offset + 1]])
}

/// Big-endian `u32` at `offset`. Callers check the payload length first.
pub(crate) fn be_u32(payload: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        payload[offset],
        payload[offset + 1],
        payload[offset + 2],
        payload[offset + 3],
    ])
}
