//! Unified error type for the opendaq-lib crate.
//!
//! [`DaqError`] covers three families:
//! - validation errors, raised before any I/O and never retried;
//! - transport errors, surfaced only after the dispatcher gave up retrying;
//! - construction errors, which abort opening a device entirely.

use std::fmt;

use crate::config::ValidationError;
use crate::protocol::FrameError;

/// Error type for opendaq-lib operations.
#[derive(Debug)]
pub enum DaqError {
    /// LED number outside `[1, n_leds]`.
    InvalidLed(u32),
    /// LED color code above 3.
    InvalidColor(u8),
    /// Analog input number (or input pair) not valid for the model.
    InvalidInput(u32),
    /// Analog output number outside the model's output range.
    InvalidOutput(u32),
    /// PIO number outside `[1, n_pios]`.
    InvalidPio(u32),
    /// Port value or direction mask wider than the PIO count.
    InvalidPioValue(u32),
    /// Gain id beyond the model's ADC gain list.
    InvalidGainId(u32),
    /// Device id outside `[0, 1000]`.
    InvalidId(u32),
    /// Output voltage that is NaN or infinite.
    InvalidVoltage(f32),
    /// Second-stage calibration requested where the model has none.
    UnsupportedStage,
    /// The board reported a model id with no registered variant.
    UnknownModel(u8),
    /// Two variants share a model id.
    DuplicateModel(u8),
    /// Configuration value rejected by validation.
    InvalidConfig(String),
    /// Failure to open the serial port.
    Open {
        port: String,
        source: serialport::Error,
    },
    /// All attempts of a command failed; carries the last underlying cause.
    Transport { attempts: u32, source: FrameError },
    /// A correctly framed response whose payload has the wrong shape.
    MalformedResponse {
        opcode: u8,
        expected: usize,
        got: usize,
    },
    /// A calibration register could not be read while opening the device.
    Calibration {
        register: usize,
        source: Box<DaqError>,
    },
}

impl fmt::Display for DaqError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DaqError::InvalidLed(n) => write!(f, "Invalid LED number: {n}"),
            DaqError::InvalidColor(c) => write!(f, "Invalid LED color: {c}"),
            DaqError::InvalidInput(n) => write!(f, "Invalid input number: {n}"),
            DaqError::InvalidOutput(n) => write!(f, "Invalid output number: {n}"),
            DaqError::InvalidPio(n) => write!(f, "Invalid PIO number: {n}"),
            DaqError::InvalidPioValue(v) => write!(f, "Invalid PIO value: {v}"),
            DaqError::InvalidGainId(g) => write!(f, "Invalid gain ID: {g}"),
            DaqError::InvalidId(id) => write!(f, "ID out of range: {id}"),
            DaqError::InvalidVoltage(v) => write!(f, "Invalid output voltage: {v}"),
            DaqError::UnsupportedStage => {
                write!(f, "Second-stage calibration not supported for this channel")
            }
            DaqError::UnknownModel(id) => write!(f, "Unknown device model number: {id}"),
            DaqError::DuplicateModel(id) => {
                write!(f, "Hardware model already registered: {id}")
            }
            DaqError::InvalidConfig(e) => write!(f, "Config error: {e}"),
            DaqError::Open { port, source } => {
                write!(f, "Failed to open device on {port}: {source}")
            }
            DaqError::Transport { attempts, source } => {
                write!(f, "I/O failure after {attempts} attempts: {source}")
            }
            DaqError::MalformedResponse {
                opcode,
                expected,
                got,
            } => write!(
                f,
                "Malformed response to command {opcode}: expected {expected} bytes, got {got}"
            ),
            DaqError::Calibration { register, source } => {
                write!(f, "Reading calibration register {register} failed: {source}")
            }
        }
    }
}

impl std::error::Error for DaqError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            DaqError::Open { source, .. } => Some(source),
            DaqError::Transport { source, .. } => Some(source),
            DaqError::Calibration { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<Vec<ValidationError>> for DaqError {
    fn from(errors: Vec<ValidationError>) -> Self {
        let msgs: Vec<String> = errors.iter().map(|e| e.to_string()).collect();
        DaqError::InvalidConfig(msgs.join(", "))
    }
}

impl DaqError {
    /// `true` for errors raised by argument checks before any I/O.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            DaqError::InvalidLed(_)
                | DaqError::InvalidColor(_)
                | DaqError::InvalidInput(_)
                | DaqError::InvalidOutput(_)
                | DaqError::InvalidPio(_)
                | DaqError::InvalidPioValue(_)
                | DaqError::InvalidGainId(_)
                | DaqError::InvalidId(_)
                | DaqError::InvalidVoltage(_)
                | DaqError::UnsupportedStage
        )
    }
}

/// Crate-level Result alias using [`DaqError`].
pub type Result<T> = std::result::Result<T, DaqError>;
