//! Hardware models — channel counts, converters and calibration layout.
//!
//! Each supported board is one case of [`HwModel`]. A model is identified on
//! the wire by a numeric id (first byte of the `ID_CONFIG` response) and
//! resolved through an explicit [`ModelRegistry`] handed to the device
//! constructor.
//!
//! The calibration-register layout is selected by [`CalibLayout`] and computed
//! only in [`HwFeatures::calib_index`]. `D` is the number of DAC channels
//! (outputs plus hidden outputs); DAC registers always come first:
//!
//! | Layout          | DAC        | First stage                       | Second stage             |
//! |-----------------|------------|-----------------------------------|--------------------------|
//! | `SingleEndedDiff` (S, N) | `[0, D)` | SE `[D, D+I)`, diff `[D+I, D+2I)` | none               |
//! | `PerGain` (M)   | `[0, D)`   | per gain id `[D, D+G)`            | per input `[D+G, D+G+I)` |
//! | `TwoStage` (TP) | `[0, D)`   | per input `[D, D+I)`              | per input `[D+I, D+2I)`  |

use std::collections::BTreeMap;
use std::fmt;

use crate::calib::{Adc, Dac, LinearMap, RegisterClass};
use crate::error::{DaqError, Result};

/// Static description of a board.
#[derive(Debug, Clone, PartialEq)]
pub struct HwFeatures {
    pub name: &'static str,
    pub n_pios: u32,
    pub n_leds: u32,
    pub n_inputs: u32,
    pub n_outputs: u32,
    /// DAC channels addressable by `SET_DAC` but not exposed as analog outputs.
    pub n_hidden_outputs: u32,
    pub n_calib_regs: u32,
    pub layout: CalibLayout,
    pub adc: Adc,
    pub dac: Dac,
}

/// How a board arranges its input calibration registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibLayout {
    /// One register per input and mode, single-ended block then differential block.
    SingleEndedDiff,
    /// First stage per gain id, second stage per input.
    PerGain,
    /// First and second stage per input.
    TwoStage,
}

/// Which channel a calibration lookup is for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CalibChannel {
    /// Analog output, 1-based.
    Output(u32),
    /// Analog input, 1-based positive channel, with the ADC mode it is read in.
    Input {
        number: u32,
        differential: bool,
        gain_id: u32,
    },
}

/// Calibration stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    First,
    Second,
}

// ── Model descriptors ──

const ADC_GAINS_M: [f32; 5] = [1.0 / 3.0, 1.0, 2.0, 10.0, 100.0];
const ADC_GAINS_SN: [f32; 8] = [1.0, 2.0, 4.0, 5.0, 8.0, 10.0, 16.0, 20.0];
const ADC_GAINS_TP: [f32; 8] = [1.0, 2.0, 4.0, 8.0, 16.0, 32.0, 64.0, 128.0];

const fn map16(vmin: f32, vmax: f32) -> LinearMap {
    LinearMap {
        bits: 16,
        signed: true,
        vmin,
        vmax,
    }
}

static MODEL_M: HwFeatures = HwFeatures {
    name: "openDAQ M",
    n_pios: 6,
    n_leds: 1,
    n_inputs: 8,
    n_outputs: 1,
    n_hidden_outputs: 0,
    n_calib_regs: 1 + ADC_GAINS_M.len() as u32 + 8,
    layout: CalibLayout::PerGain,
    adc: Adc {
        map: map16(-4.096, 4.096),
        gains: &ADC_GAINS_M,
    },
    dac: Dac {
        map: map16(-4.096, 4.096),
    },
};

static MODEL_S: HwFeatures = HwFeatures {
    name: "openDAQ S",
    n_pios: 6,
    n_leds: 1,
    n_inputs: 8,
    n_outputs: 1,
    n_hidden_outputs: 0,
    n_calib_regs: 1 + 2 * 8,
    layout: CalibLayout::SingleEndedDiff,
    adc: Adc {
        map: map16(-12.0, 12.0),
        gains: &ADC_GAINS_SN,
    },
    // 12-bit DAC; the firmware rescales 16-bit codes
    dac: Dac {
        map: map16(0.0, 4.096),
    },
};

static MODEL_N: HwFeatures = HwFeatures {
    name: "openDAQ N",
    n_pios: 6,
    n_leds: 1,
    n_inputs: 8,
    n_outputs: 1,
    n_hidden_outputs: 0,
    n_calib_regs: 1 + 2 * 8,
    layout: CalibLayout::SingleEndedDiff,
    adc: Adc {
        map: map16(-12.0, 12.0),
        gains: &ADC_GAINS_SN,
    },
    dac: Dac {
        map: map16(-4.096, 4.096),
    },
};

static MODEL_TP04AR: HwFeatures = HwFeatures {
    name: "TP04AR",
    n_pios: 6,
    n_leds: 1,
    n_inputs: 4,
    n_outputs: 2,
    n_hidden_outputs: 0,
    n_calib_regs: 2 + 2 * 4,
    layout: CalibLayout::TwoStage,
    adc: Adc {
        map: map16(-24.0, 24.0),
        gains: &ADC_GAINS_SN,
    },
    dac: Dac {
        map: map16(-24.0, 24.0),
    },
};

static MODEL_TP04AB: HwFeatures = HwFeatures {
    name: "TP04AB",
    n_pios: 6,
    n_leds: 1,
    n_inputs: 4,
    n_outputs: 2,
    n_hidden_outputs: 0,
    n_calib_regs: 2 + 2 * 4,
    layout: CalibLayout::TwoStage,
    adc: Adc {
        map: map16(-24.0, 24.0),
        gains: &ADC_GAINS_TP,
    },
    dac: Dac {
        map: map16(-24.0, 24.0),
    },
};

static MODEL_TP08ABRR: HwFeatures = HwFeatures {
    name: "TP08ABRR",
    n_pios: 6,
    n_leds: 1,
    n_inputs: 8,
    n_outputs: 4,
    n_hidden_outputs: 0,
    n_calib_regs: 4 + 2 * 8,
    layout: CalibLayout::TwoStage,
    adc: Adc {
        map: map16(-24.0, 24.0),
        gains: &ADC_GAINS_TP,
    },
    dac: Dac {
        map: map16(-24.0, 24.0),
    },
};

impl HwFeatures {
    /// DAC channels addressable by `SET_DAC`: outputs followed by hidden outputs.
    pub fn n_dac_channels(&self) -> u32 {
        self.n_outputs + self.n_hidden_outputs
    }

    /// Check a 1-based DAC channel number.
    pub fn check_dac_channel(&self, n: u32) -> Result<()> {
        if n < 1 || n > self.n_dac_channels() {
            return Err(DaqError::InvalidOutput(n));
        }
        Ok(())
    }

    /// Offset scale class of calibration register `register`.
    pub fn register_class(&self, register: usize) -> RegisterClass {
        if register < self.n_dac_channels() as usize {
            RegisterClass::Output
        } else {
            RegisterClass::Input
        }
    }

    /// Number of registers the layout addresses.
    pub fn layout_len(&self) -> u32 {
        let inputs = match self.layout {
            CalibLayout::SingleEndedDiff | CalibLayout::TwoStage => 2 * self.n_inputs,
            CalibLayout::PerGain => self.adc.gains.len() as u32 + self.n_inputs,
        };
        self.n_dac_channels() + inputs
    }

    /// Index of the calibration register that applies to `channel` at `stage`.
    ///
    /// Out-of-range channels, unknown gain ids and unsupported stages are
    /// errors; the result is always below `n_calib_regs`.
    pub fn calib_index(&self, channel: CalibChannel, stage: Stage) -> Result<usize> {
        let n_dac = self.n_dac_channels() as usize;
        let n_in = self.n_inputs as usize;

        let (number, differential, gain_id) = match channel {
            CalibChannel::Output(n) => {
                if stage == Stage::Second {
                    return Err(DaqError::UnsupportedStage);
                }
                self.check_dac_channel(n)?;
                return Ok(n as usize - 1);
            }
            CalibChannel::Input {
                number,
                differential,
                gain_id,
            } => (number, differential, gain_id),
        };

        if number < 1 || number > self.n_inputs {
            return Err(DaqError::InvalidInput(number));
        }
        if gain_id as usize >= self.adc.gains.len() {
            return Err(DaqError::InvalidGainId(gain_id));
        }
        let input = number as usize - 1;

        match (self.layout, stage) {
            (CalibLayout::SingleEndedDiff, Stage::First) => {
                if differential {
                    Ok(n_dac + n_in + input)
                } else {
                    Ok(n_dac + input)
                }
            }
            (CalibLayout::SingleEndedDiff, Stage::Second) => Err(DaqError::UnsupportedStage),
            (CalibLayout::PerGain, Stage::First) => Ok(n_dac + gain_id as usize),
            (CalibLayout::PerGain, Stage::Second) => Ok(n_dac + self.adc.gains.len() + input),
            (CalibLayout::TwoStage, Stage::First) => Ok(n_dac + input),
            (CalibLayout::TwoStage, Stage::Second) => Ok(n_dac + n_in + input),
        }
    }
}

// ── HwModel ──

/// Supported boards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwModel {
    M,
    S,
    N,
    TP04AR,
    TP04AB,
    TP08ABRR,
}

impl HwModel {
    /// Every supported model, in registry order.
    pub const ALL: [HwModel; 6] = [
        HwModel::M,
        HwModel::S,
        HwModel::N,
        HwModel::TP04AR,
        HwModel::TP04AB,
        HwModel::TP08ABRR,
    ];

    /// Model number reported by the board in its identity response.
    pub const fn id(self) -> u8 {
        match self {
            HwModel::M => 1,
            HwModel::S => 2,
            HwModel::N => 3,
            HwModel::TP04AR => 10,
            HwModel::TP04AB => 11,
            HwModel::TP08ABRR => 12,
        }
    }

    pub fn features(self) -> &'static HwFeatures {
        match self {
            HwModel::M => &MODEL_M,
            HwModel::S => &MODEL_S,
            HwModel::N => &MODEL_N,
            HwModel::TP04AR => &MODEL_TP04AR,
            HwModel::TP04AB => &MODEL_TP04AB,
            HwModel::TP08ABRR => &MODEL_TP08ABRR,
        }
    }

    pub fn name(self) -> &'static str {
        self.features().name
    }

    /// Whether input readings use a second calibration register.
    pub fn has_second_stage(self) -> bool {
        self.features().layout != CalibLayout::SingleEndedDiff
    }

    /// Index of the calibration register that applies to `channel` at `stage`.
    pub fn calib_index(self, channel: CalibChannel, stage: Stage) -> Result<usize> {
        self.features().calib_index(channel, stage)
    }

    /// Check a positive/negative ADC input pair. `neg == 0` selects single-ended mode.
    pub fn check_valid_inputs(self, pos: u32, neg: u32) -> Result<()> {
        let f = self.features();
        if pos < 1 || pos > f.n_inputs {
            return Err(DaqError::InvalidInput(pos));
        }
        let neg_ok = match self {
            HwModel::S | HwModel::N => neg <= 8,
            HwModel::M => matches!(neg, 0 | 5 | 6 | 7 | 8 | 25),
            HwModel::TP04AR | HwModel::TP04AB | HwModel::TP08ABRR => neg == 0,
        };
        if !neg_ok {
            return Err(DaqError::InvalidInput(neg));
        }
        Ok(())
    }
}

impl fmt::Display for HwModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

const fn ids_unique(models: &[HwModel]) -> bool {
    let mut i = 0;
    while i < models.len() {
        let mut j = i + 1;
        while j < models.len() {
            if models[i].id() == models[j].id() {
                return false;
            }
            j += 1;
        }
        i += 1;
    }
    true
}

const _: () = assert!(ids_unique(&HwModel::ALL), "duplicate hardware model id");

// ── Registry ──

/// Immutable map from model id to [`HwModel`].
#[derive(Debug, Clone)]
pub struct ModelRegistry {
    models: BTreeMap<u8, HwModel>,
}

impl Default for ModelRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl ModelRegistry {
    /// Registry with every supported model.
    pub fn standard() -> Self {
        let models = HwModel::ALL.iter().map(|&m| (m.id(), m)).collect();
        ModelRegistry { models }
    }

    /// Registry restricted to `models`. Fails if two share an id.
    pub fn from_models(models: &[HwModel]) -> Result<Self> {
        let mut map = BTreeMap::new();
        for &model in models {
            if map.insert(model.id(), model).is_some() {
                return Err(DaqError::DuplicateModel(model.id()));
            }
        }
        Ok(ModelRegistry { models: map })
    }

    pub fn lookup(&self, id: u8) -> Option<HwModel> {
        self.models.get(&id).copied()
    }

    /// Registered model ids, ascending.
    pub fn ids(&self) -> impl Iterator<Item = u8> + '_ {
        self.models.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}
