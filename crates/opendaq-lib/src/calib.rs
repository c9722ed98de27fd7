//! Calibration registers and raw-code ↔ volts conversion.
//!
//! A board stores one (gain, offset) pair per calibration register. Gains are
//! stored as a fractional deviation from 1.0; offsets are stored in device
//! units with a register-class dependent scale (see [`Calib::decode`]).

use crate::error::{DaqError, Result};
use crate::protocol::{GET_CALIB, GET_CALIB_RESP_LEN, be_i16};

/// Scale of the raw 16-bit gain field.
const GAIN_SCALE: f32 = (1u32 << 16) as f32;

/// Offset scale for registers addressing outputs and hidden outputs.
const OUTPUT_OFFSET_SCALE: f32 = (1u32 << 16) as f32;

/// Offset scale for registers addressing inputs.
const INPUT_OFFSET_SCALE: f32 = (1u32 << 5) as f32;

/// One calibration register.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calib {
    /// Multiplicative correction, centred at 1.0.
    pub gain: f32,
    /// Additive correction in device codes.
    pub offset: f32,
}

impl Default for Calib {
    fn default() -> Self {
        Calib::IDENTITY
    }
}

/// Which scale a register's offset field uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterClass {
    Output,
    Input,
}

impl Calib {
    /// No correction.
    pub const IDENTITY: Calib = Calib {
        gain: 1.0,
        offset: 0.0,
    };

    /// Decode raw register fields.
    pub fn decode(raw_gain: i16, raw_offset: i16, class: RegisterClass) -> Self {
        let offset_scale = match class {
            RegisterClass::Output => OUTPUT_OFFSET_SCALE,
            RegisterClass::Input => INPUT_OFFSET_SCALE,
        };
        Calib {
            gain: 1.0 + f32::from(raw_gain) / GAIN_SCALE,
            offset: f32::from(raw_offset) / offset_scale,
        }
    }

    /// Decode a `GET_CALIB` response payload: `[reg:u8][gain:i16 BE][offset:i16 BE]`.
    ///
    /// The echoed register number must match `register`.
    pub fn from_response(payload: &[u8], register: usize, class: RegisterClass) -> Result<Self> {
        if payload.len() != GET_CALIB_RESP_LEN {
            return Err(DaqError::MalformedResponse {
                opcode: GET_CALIB,
                expected: GET_CALIB_RESP_LEN,
                got: payload.len(),
            });
        }
        if usize::from(payload[0]) != register {
            log::warn!(
                "calibration register echo mismatch: asked {register}, got {}",
                payload[0]
            );
            return Err(DaqError::MalformedResponse {
                opcode: GET_CALIB,
                expected: register,
                got: usize::from(payload[0]),
            });
        }
        Ok(Calib::decode(
            be_i16(payload, 1),
            be_i16(payload, 3),
            class,
        ))
    }

    /// Apply this correction to a code.
    pub fn apply(&self, code: f32) -> f32 {
        code * self.gain + self.offset
    }
}

// ── Linear maps ──

/// Ideal mapping between codes and volts for a converter.
///
/// `lsb = (vmax - vmin) / 2^bits`. Signed codes are centred on the middle of
/// the range; unsigned codes start at `vmin`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearMap {
    pub bits: u32,
    pub signed: bool,
    pub vmin: f32,
    pub vmax: f32,
}

impl LinearMap {
    /// Volts per code.
    pub fn lsb(&self) -> f32 {
        (self.vmax - self.vmin) / (1u64 << self.bits) as f32
    }

    /// Voltage of code 0.
    pub fn zero(&self) -> f32 {
        if self.signed {
            (self.vmin + self.vmax) / 2.0
        } else {
            self.vmin
        }
    }

    /// Smallest and largest representable codes.
    pub fn code_range(&self) -> (i32, i32) {
        if self.signed {
            let half = 1i32 << (self.bits - 1);
            (-half, half - 1)
        } else {
            (0, (1i32 << self.bits) - 1)
        }
    }

    pub fn code_to_volts(&self, code: f32) -> f32 {
        self.zero() + code * self.lsb()
    }

    pub fn volts_to_code(&self, volts: f32) -> f32 {
        (volts - self.zero()) / self.lsb()
    }
}

/// ADC descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adc {
    pub map: LinearMap,
    /// Programmable-gain amplifier factors, indexed by gain id.
    pub gains: &'static [f32],
}

impl Adc {
    /// Convert a raw ADC code to volts.
    ///
    /// `first` and `second` are the two calibration stages selected for the
    /// current input configuration; models without a second stage pass
    /// [`Calib::IDENTITY`].
    pub fn to_volts(&self, raw: i32, gain_id: usize, first: Calib, second: Calib) -> Result<f32> {
        let pga = *self
            .gains
            .get(gain_id)
            .ok_or(DaqError::InvalidGainId(gain_id as u32))?;
        let code = second.apply(first.apply(raw as f32));
        Ok(self.map.code_to_volts(code) / pga)
    }
}

/// DAC descriptor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Dac {
    pub map: LinearMap,
}

impl Dac {
    /// Convert volts to a raw DAC code, clamped to the converter's range.
    ///
    /// NaN and infinite voltages are rejected.
    pub fn from_volts(&self, volts: f32, cal: Calib) -> Result<i32> {
        if !volts.is_finite() {
            return Err(DaqError::InvalidVoltage(volts));
        }
        let code = cal.apply(self.map.volts_to_code(volts)).round();
        let (lo, hi) = self.map.code_range();
        Ok((code as i64).clamp(i64::from(lo), i64::from(hi)) as i32)
    }
}
