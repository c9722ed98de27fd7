//! Device facade — channel operations in physical units.
//!
//! [`OpenDaq`] combines the [`Dispatcher`], the board's [`HwModel`] and the
//! calibration registers read at open time. Every public operation checks its
//! arguments against the model before any I/O.

use std::fmt;
use std::path::Path;

use serde::Serialize;

use crate::calib::{Calib, RegisterClass};
use crate::config::DaqConfig;
use crate::dispatch::{Dispatcher, InputConfig, Session};
use crate::error::{DaqError, Result};
use crate::models::{CalibChannel, HwFeatures, HwModel, ModelRegistry, Stage};
use crate::protocol::*;
use crate::transport::{SerialTransport, Transport};

/// Highest id accepted by [`OpenDaq::set_device_id`].
pub const MAX_DEVICE_ID: u32 = 1000;

// ── Device info ──

/// Identity reported by `ID_CONFIG`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub model_id: u8,
    pub firmware_version: u8,
    pub serial: u32,
}

impl DeviceInfo {
    /// Parse a 6-byte `ID_CONFIG` payload: `[model][version][serial:u32 BE]`.
    pub fn from_response(payload: &[u8]) -> Result<Self> {
        expect_len(ID_CONFIG, payload, ID_CONFIG_RESP_LEN)?;
        Ok(DeviceInfo {
            model_id: payload[0],
            firmware_version: payload[1],
            serial: be_u32(payload, 2),
        })
    }

    /// Serial number formatted the way it is printed on the board label.
    pub fn serial_string(&self) -> String {
        format!("{:04}", self.serial)
    }
}

// ── LED colors ──

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Color {
    Off = 0,
    Green = 1,
    Red = 2,
    Yellow = 3,
}

impl TryFrom<u8> for Color {
    type Error = DaqError;

    fn try_from(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Color::Off),
            1 => Ok(Color::Green),
            2 => Ok(Color::Red),
            3 => Ok(Color::Yellow),
            _ => Err(DaqError::InvalidColor(code)),
        }
    }
}

impl fmt::Display for Color {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Color::Off => "off",
            Color::Green => "green",
            Color::Red => "red",
            Color::Yellow => "yellow",
        };
        write!(f, "{name}")
    }
}

/// Reject a response payload whose length does not match what `opcode` returns.
fn expect_len(opcode: u8, payload: &[u8], expected: usize) -> Result<()> {
    if payload.len() != expected {
        return Err(DaqError::MalformedResponse {
            opcode,
            expected,
            got: payload.len(),
        });
    }
    Ok(())
}

// ── Device ──

/// An open openDAQ board.
///
/// Thread-safe: all transport access and the ADC input configuration share
/// one lock inside the dispatcher. Dropping the device closes the transport.
pub struct OpenDaq<T, C = ChecksumCodec> {
    dispatcher: Dispatcher<T, C>,
    model: HwModel,
    info: DeviceInfo,
    calib: Vec<Calib>,
}

impl OpenDaq<SerialTransport> {
    /// Open the board on serial port `port`.
    pub fn open(port: &str, config: &DaqConfig, registry: &ModelRegistry) -> Result<Self> {
        check_config(config)?;
        let transport = SerialTransport::open(port, config)?;
        Self::with_transport(transport, config, registry)
    }

    /// Open the board described by the config file at `path`.
    ///
    /// Unreadable or invalid settings fall back to defaults with a warning;
    /// the file must still name a port.
    pub fn open_from_file(path: &Path, registry: &ModelRegistry) -> Result<Self> {
        Self::open_configured(&DaqConfig::load_file(path), registry)
    }

    /// Open the board named in the platform config file.
    pub fn open_default(registry: &ModelRegistry) -> Result<Self> {
        Self::open_configured(&DaqConfig::load(), registry)
    }

    /// Open the board on the port named in `config`.
    pub fn open_configured(config: &DaqConfig, registry: &ModelRegistry) -> Result<Self> {
        if config.port.trim().is_empty() {
            return Err(DaqError::InvalidConfig("no serial port configured".into()));
        }
        Self::open(config.port.trim(), config, registry)
    }
}

impl<T: Transport> OpenDaq<T> {
    /// Initialise a board over an already-open transport using the default framing.
    pub fn with_transport(transport: T, config: &DaqConfig, registry: &ModelRegistry) -> Result<Self> {
        Self::with_codec(transport, ChecksumCodec, config, registry)
    }
}

fn check_config(config: &DaqConfig) -> Result<()> {
    config.validate()?;
    Ok(())
}

impl<T: Transport, C: Codec> OpenDaq<T, C> {
    /// Initialise a board: identify it, resolve its model and read every
    /// calibration register in index order.
    ///
    /// Any failure aborts construction; no partially calibrated device is returned.
    pub fn with_codec(
        transport: T,
        codec: C,
        config: &DaqConfig,
        registry: &ModelRegistry,
    ) -> Result<Self> {
        check_config(config)?;
        let dispatcher =
            Dispatcher::with_codec(transport, codec).with_max_attempts(config.max_attempts);

        let info = {
            let mut session = dispatcher.lock();
            query_info(&mut session, Vec::new())?
        };
        let model = registry
            .lookup(info.model_id)
            .ok_or(DaqError::UnknownModel(info.model_id))?;
        let features = model.features();

        let n_regs = features.n_calib_regs as usize;
        let mut calib = Vec::with_capacity(n_regs);
        {
            let mut session = dispatcher.lock();
            for register in 0..n_regs {
                let class = features.register_class(register);
                let entry = read_calib(&mut session, register, class).map_err(|e| {
                    DaqError::Calibration {
                        register,
                        source: Box::new(e),
                    }
                })?;
                calib.push(entry);
            }
        }

        log::info!(
            "opened {} (serial {}, firmware {}, {} calibration registers)",
            model,
            info.serial_string(),
            info.firmware_version,
            calib.len()
        );

        Ok(OpenDaq {
            dispatcher,
            model,
            info,
            calib,
        })
    }

    // ── Introspection ──

    /// Identity read at open time.
    pub fn info(&self) -> &DeviceInfo {
        &self.info
    }

    pub fn model(&self) -> HwModel {
        self.model
    }

    pub fn features(&self) -> &'static HwFeatures {
        self.model.features()
    }

    /// Calibration registers, in register order.
    pub fn calibration(&self) -> &[Calib] {
        &self.calib
    }

    /// Calibration for `channel` at `stage`.
    ///
    /// Returns [`Calib::IDENTITY`] when the model has no register for that
    /// stage; out-of-range channels are errors.
    pub fn get_calib(&self, channel: CalibChannel, stage: Stage) -> Result<Calib> {
        match self.model.calib_index(channel, stage) {
            Ok(idx) => Ok(self.calib[idx]),
            Err(DaqError::UnsupportedStage) => Ok(Calib::IDENTITY),
            Err(e) => Err(e),
        }
    }

    /// Current ADC input configuration.
    pub fn input_config(&self) -> InputConfig {
        self.dispatcher.lock().input()
    }

    /// Re-query the board identity.
    pub fn get_info(&self) -> Result<DeviceInfo> {
        query_info(&mut self.dispatcher.lock(), Vec::new())
    }

    // ── LEDs ──

    pub fn set_led(&self, n: u32, color: Color) -> Result<()> {
        if n < 1 || n > self.features().n_leds {
            return Err(DaqError::InvalidLed(n));
        }
        self.dispatcher
            .send(&Command::new(LED_W, vec![color as u8, n as u8]), LED_W_RESP_LEN)?;
        Ok(())
    }

    /// Like [`set_led`](Self::set_led) with a numeric color code (0–3).
    pub fn set_led_raw(&self, n: u32, code: u8) -> Result<()> {
        if n < 1 || n > self.features().n_leds {
            return Err(DaqError::InvalidLed(n));
        }
        self.set_led(n, Color::try_from(code)?)
    }

    // ── Analog inputs ──

    /// Select the ADC inputs and gain. `neg_input == 0` means single-ended.
    ///
    /// The configuration is recorded before the command is sent; the next
    /// reading is converted under it.
    pub fn configure_adc(
        &self,
        pos_input: u32,
        neg_input: u32,
        gain_id: u32,
        n_samples: u8,
    ) -> Result<()> {
        self.model.check_valid_inputs(pos_input, neg_input)?;
        if gain_id as usize >= self.features().adc.gains.len() {
            return Err(DaqError::InvalidGainId(gain_id));
        }

        let mut session = self.dispatcher.lock();
        session.set_input(InputConfig {
            pos_input,
            neg_input,
            differential: neg_input != 0,
            gain_id,
        });
        let payload = vec![pos_input as u8, neg_input as u8, gain_id as u8, n_samples];
        session.send(&Command::new(AIN_CFG, payload), AIN_CFG_RESP_LEN)?;
        Ok(())
    }

    /// Read one raw ADC code.
    pub fn read_adc(&self) -> Result<i16> {
        read_raw(&mut self.dispatcher.lock())
    }

    /// Read one ADC sample in volts, calibrated for the current input configuration.
    pub fn read_analog(&self) -> Result<f32> {
        let (raw, input) = {
            let mut session = self.dispatcher.lock();
            let raw = read_raw(&mut session)?;
            (raw, session.input())
        };
        self.adc_to_volts(i32::from(raw), input)
    }

    /// Convert a raw ADC code to volts under `input`.
    pub fn adc_to_volts(&self, raw: i32, input: InputConfig) -> Result<f32> {
        let channel = CalibChannel::Input {
            number: input.pos_input,
            differential: input.differential,
            gain_id: input.gain_id,
        };
        let first = self.get_calib(channel, Stage::First)?;
        let second = self.get_calib(channel, Stage::Second)?;
        self.features()
            .adc
            .to_volts(raw, input.gain_id as usize, first, second)
    }

    // ── Analog outputs ──

    /// Write a raw code to DAC channel `n` (outputs and hidden outputs).
    pub fn set_dac(&self, n: u32, raw: i16) -> Result<()> {
        self.features().check_dac_channel(n)?;
        let mut payload = raw.to_be_bytes().to_vec();
        payload.push(n as u8);
        self.dispatcher
            .send(&Command::new(SET_DAC, payload), SET_DAC_RESP_LEN)?;
        Ok(())
    }

    /// Set DAC channel `n` to `volts`, applying its calibration register.
    pub fn set_analog(&self, n: u32, volts: f32) -> Result<()> {
        self.set_dac(n, self.volts_to_dac(n, volts)?)
    }

    /// Raw DAC code for `volts` on output `n`.
    pub fn volts_to_dac(&self, n: u32, volts: f32) -> Result<i16> {
        let cal = self.get_calib(CalibChannel::Output(n), Stage::First)?;
        let code = self.features().dac.from_volts(volts, cal)?;
        Ok(code.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16)
    }

    // ── Digital I/O ──

    fn check_pio(&self, n: u32) -> Result<()> {
        if n < 1 || n > self.features().n_pios {
            return Err(DaqError::InvalidPio(n));
        }
        Ok(())
    }

    fn check_port_value(&self, value: u8) -> Result<()> {
        if u32::from(value) >= 1 << self.features().n_pios {
            return Err(DaqError::InvalidPioValue(u32::from(value)));
        }
        Ok(())
    }

    pub fn set_pio(&self, n: u32, value: bool) -> Result<()> {
        self.check_pio(n)?;
        self.dispatcher
            .send(&Command::new(PIO, vec![n as u8, u8::from(value)]), PIO_RESP_LEN)?;
        Ok(())
    }

    /// Set PIO `n` as output (`true`) or input (`false`).
    pub fn set_pio_dir(&self, n: u32, output: bool) -> Result<()> {
        self.check_pio(n)?;
        self.dispatcher.send(
            &Command::new(PIO_DIR, vec![n as u8, u8::from(output)]),
            PIO_DIR_RESP_LEN,
        )?;
        Ok(())
    }

    pub fn read_pio(&self, n: u32) -> Result<bool> {
        self.check_pio(n)?;
        let payload = self
            .dispatcher
            .send(&Command::new(PIO, vec![n as u8]), PIO_RESP_LEN)?;
        expect_len(PIO, &payload, PIO_RESP_LEN)?;
        Ok(payload[1] != 0)
    }

    /// Write all PIO values at once (bit `i` drives PIO `i + 1`).
    pub fn set_port(&self, value: u8) -> Result<()> {
        self.check_port_value(value)?;
        self.dispatcher
            .send(&Command::new(PORT, vec![value]), PORT_RESP_LEN)?;
        Ok(())
    }

    /// Set all PIO directions at once (bit set = output).
    pub fn set_port_dir(&self, mask: u8) -> Result<()> {
        self.check_port_value(mask)?;
        self.dispatcher
            .send(&Command::new(PORT_DIR, vec![mask]), PORT_DIR_RESP_LEN)?;
        Ok(())
    }

    pub fn read_port(&self) -> Result<u8> {
        let payload = self
            .dispatcher
            .send(&Command::query(PORT), PORT_RESP_LEN)?;
        expect_len(PORT, &payload, PORT_RESP_LEN)?;
        Ok(payload[0])
    }

    // ── Identity ──

    /// Store a new device id (serial number) and return the identity the board reports.
    pub fn set_device_id(&self, id: u32) -> Result<DeviceInfo> {
        if id > MAX_DEVICE_ID {
            return Err(DaqError::InvalidId(id));
        }
        query_info(&mut self.dispatcher.lock(), id.to_be_bytes().to_vec())
    }
}

// ── Session helpers ──

fn query_info<T: Transport, C: Codec>(
    session: &mut Session<'_, T, C>,
    payload: Vec<u8>,
) -> Result<DeviceInfo> {
    let resp = session.send(&Command::new(ID_CONFIG, payload), ID_CONFIG_RESP_LEN)?;
    DeviceInfo::from_response(&resp)
}

fn read_calib<T: Transport, C: Codec>(
    session: &mut Session<'_, T, C>,
    register: usize,
    class: RegisterClass,
) -> Result<Calib> {
    let resp = session.send(
        &Command::new(GET_CALIB, vec![register as u8]),
        GET_CALIB_RESP_LEN,
    )?;
    Calib::from_response(&resp, register, class)
}

fn read_raw<T: Transport, C: Codec>(session: &mut Session<'_, T, C>) -> Result<i16> {
    let resp = session.send(&Command::query(AIN), AIN_RESP_LEN)?;
    expect_len(AIN, &resp, AIN_RESP_LEN)?;
    Ok(be_i16(&resp, 0))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::mock::MockTransport;

    fn fast_config() -> DaqConfig {
        DaqConfig {
            settle_delay_ms: 0,
            ..DaqConfig::default()
        }
    }

    /// Mock board of `model` with all-zero calibration.
    fn mock_board(model: HwModel) -> MockTransport {
        let mock = MockTransport::with_identity(model.id(), 5, 1234);
        mock.set_handler(GET_CALIB, &[0, 0, 0, 0, 0]);
        mock
    }

    fn open(model: HwModel) -> (OpenDaq<MockTransport>, MockTransport) {
        let mock = mock_board(model);
        let daq = OpenDaq::with_transport(mock.clone(), &fast_config(), &ModelRegistry::standard())
            .unwrap();
        (daq, mock)
    }

    /// Frames written after opening.
    fn commands_after_open(mock: &MockTransport, daq: &OpenDaq<MockTransport>) -> Vec<Vec<u8>> {
        let skip = 1 + daq.features().n_calib_regs as usize;
        mock.written().into_iter().skip(skip).collect()
    }

    // ── DeviceInfo / Color ──

    #[test]
    fn device_info_parses_big_endian_serial() {
        let info = DeviceInfo::from_response(&[2, 7, 0, 0, 0x04, 0xD2]).unwrap();
        assert_eq!(info.model_id, 2);
        assert_eq!(info.firmware_version, 7);
        assert_eq!(info.serial, 1234);
        assert_eq!(info.serial_string(), "1234");
    }

    #[test]
    fn device_info_serial_is_zero_padded() {
        let info = DeviceInfo::from_response(&[2, 7, 0, 0, 0, 42]).unwrap();
        assert_eq!(info.serial_string(), "0042");
    }

    #[test]
    fn device_info_rejects_short_payload() {
        let err = DeviceInfo::from_response(&[2, 7, 0]).unwrap_err();
        assert!(matches!(
            err,
            DaqError::MalformedResponse {
                opcode: ID_CONFIG,
                expected: 6,
                got: 3
            }
        ));
    }

    #[test]
    fn device_info_serializes() {
        let info = DeviceInfo {
            model_id: 2,
            firmware_version: 1,
            serial: 99,
        };
        let json = serde_json::to_value(info).unwrap();
        assert_eq!(json["model_id"], 2);
        assert_eq!(json["serial"], 99);
    }

    #[test]
    fn color_codes() {
        assert_eq!(Color::try_from(0).unwrap(), Color::Off);
        assert_eq!(Color::try_from(3).unwrap(), Color::Yellow);
        assert!(matches!(Color::try_from(4), Err(DaqError::InvalidColor(4))));
        assert_eq!(Color::Green.to_string(), "green");
    }

    // ── open ──

    #[test]
    fn open_reads_identity_then_every_register_in_order() {
        let (daq, mock) = open(HwModel::S);
        assert_eq!(daq.model(), HwModel::S);
        assert_eq!(daq.info().serial, 1234);
        assert_eq!(daq.calibration().len(), 17);
        assert!(daq.calibration().iter().all(|c| *c == Calib::IDENTITY));

        let written = mock.written();
        assert_eq!(written.len(), 18);
        assert_eq!(written[0][2], ID_CONFIG);
        for (i, frame) in written[1..].iter().enumerate() {
            assert_eq!(frame[2], GET_CALIB);
            assert_eq!(frame[4] as usize, i);
        }
    }

    #[test]
    fn open_unknown_model_fails() {
        let mock = MockTransport::with_identity(77, 1, 1);
        let err = OpenDaq::with_transport(mock.clone(), &fast_config(), &ModelRegistry::standard())
            .err()
            .unwrap();
        assert!(matches!(err, DaqError::UnknownModel(77)));
        // No calibration reads after an unknown model
        assert_eq!(mock.written().len(), 1);
    }

    #[test]
    fn open_model_missing_from_registry_fails() {
        let mock = mock_board(HwModel::M);
        let registry = ModelRegistry::from_models(&[HwModel::S]).unwrap();
        let err = OpenDaq::with_transport(mock, &fast_config(), &registry)
            .err()
            .unwrap();
        assert!(matches!(err, DaqError::UnknownModel(1)));
    }

    #[test]
    fn open_fails_when_a_calibration_register_is_unreadable() {
        let mock = MockTransport::with_identity(HwModel::S.id(), 1, 1);
        let config = DaqConfig {
            max_attempts: 2,
            ..fast_config()
        };
        // Register 0 answers, register 1 never does
        mock.push_response(ID_CONFIG, &[2, 1, 0, 0, 0, 1]);
        mock.push_response(GET_CALIB, &[0, 0, 0, 0, 0]);
        let err = OpenDaq::with_transport(mock, &config, &ModelRegistry::standard())
            .err()
            .unwrap();
        match err {
            DaqError::Calibration { register, source } => {
                assert_eq!(register, 1);
                assert!(matches!(*source, DaqError::Transport { attempts: 2, .. }));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn open_rejects_invalid_config() {
        let config = DaqConfig {
            max_attempts: 0,
            ..fast_config()
        };
        let err = OpenDaq::with_transport(mock_board(HwModel::S), &config, &ModelRegistry::standard())
            .err()
            .unwrap();
        assert!(matches!(err, DaqError::InvalidConfig(_)));
    }

    #[test]
    fn open_from_file_without_port_fails_before_io() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "baud_rate = 57600\n").unwrap();
        let err = OpenDaq::open_from_file(&path, &ModelRegistry::standard())
            .err()
            .unwrap();
        assert!(matches!(err, DaqError::InvalidConfig(_)));
    }

    #[test]
    fn open_from_file_reports_port_failure_with_source() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no-such-tty");
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            format!("port = {:?}\nsettle_delay_ms = 0\n", missing.display().to_string()),
        )
        .unwrap();
        let err = OpenDaq::open_from_file(&path, &ModelRegistry::standard())
            .err()
            .unwrap();
        match &err {
            DaqError::Open { port, .. } => assert_eq!(port, &missing.display().to_string()),
            other => panic!("unexpected error: {other}"),
        }
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn open_configured_requires_port() {
        let err = OpenDaq::open_configured(&fast_config(), &ModelRegistry::standard())
            .err()
            .unwrap();
        assert!(matches!(err, DaqError::InvalidConfig(_)));
    }

    #[test]
    fn output_and_input_registers_use_different_offset_scales() {
        let mock = MockTransport::with_identity(HwModel::S.id(), 1, 1);
        mock.push_response(ID_CONFIG, &[2, 1, 0, 0, 0, 1]);
        // Register 0 (output) and register 1 (input) both carry raw offset 64
        mock.push_response(GET_CALIB, &[0, 0, 0, 0, 64]);
        mock.push_response(GET_CALIB, &[1, 0, 0, 0, 64]);
        mock.set_handler(GET_CALIB, &[0, 0, 0, 0, 0]);
        let daq = OpenDaq::with_transport(mock, &fast_config(), &ModelRegistry::standard()).unwrap();
        assert_eq!(daq.calibration()[0].offset, 64.0 / 65536.0);
        assert_eq!(daq.calibration()[1].offset, 2.0);
    }

    // ── validation before I/O ──

    #[test]
    fn set_led_bounds() {
        let (daq, mock) = open(HwModel::S);
        assert!(matches!(daq.set_led(0, Color::Green), Err(DaqError::InvalidLed(0))));
        assert!(matches!(daq.set_led(2, Color::Green), Err(DaqError::InvalidLed(2))));
        assert!(matches!(daq.set_led_raw(1, 4), Err(DaqError::InvalidColor(4))));
        assert!(commands_after_open(&mock, &daq).is_empty());
    }

    #[test]
    fn set_led_sends_color_then_number() {
        let (daq, mock) = open(HwModel::S);
        mock.push_response(LED_W, &[1, 1]);
        daq.set_led(1, Color::Green).unwrap();
        let cmds = commands_after_open(&mock, &daq);
        assert_eq!(cmds, vec![vec![0, 22, LED_W, 2, 1, 1]]);
    }

    #[test]
    fn configure_adc_rejects_bad_gain_before_io() {
        let (daq, mock) = open(HwModel::S);
        assert!(matches!(
            daq.configure_adc(1, 0, 8, 1),
            Err(DaqError::InvalidGainId(8))
        ));
        assert!(matches!(
            daq.configure_adc(9, 0, 0, 1),
            Err(DaqError::InvalidInput(9))
        ));
        assert!(commands_after_open(&mock, &daq).is_empty());
        assert_eq!(daq.input_config(), InputConfig::default());
    }

    #[test]
    fn configure_adc_records_state_even_if_command_fails() {
        let (daq, _mock) = open(HwModel::S);
        // No AIN_CFG handler: every attempt times out
        let err = daq.configure_adc(3, 4, 2, 10).unwrap_err();
        assert!(matches!(err, DaqError::Transport { attempts: 8, .. }));
        assert_eq!(
            daq.input_config(),
            InputConfig {
                pos_input: 3,
                neg_input: 4,
                differential: true,
                gain_id: 2
            }
        );
    }

    #[test]
    fn set_dac_bounds_and_encoding() {
        let (daq, mock) = open(HwModel::TP04AB);
        assert!(matches!(daq.set_dac(0, 0), Err(DaqError::InvalidOutput(0))));
        assert!(matches!(daq.set_dac(3, 0), Err(DaqError::InvalidOutput(3))));
        mock.push_response(SET_DAC, &[0xFF, 0xFE, 2]);
        daq.set_dac(2, -2).unwrap();
        let cmds = commands_after_open(&mock, &daq);
        assert_eq!(&cmds[0][2..], &[SET_DAC, 3, 0xFF, 0xFE, 2]);
    }

    #[test]
    fn set_analog_rejects_unknown_output() {
        let (daq, _mock) = open(HwModel::S);
        assert!(matches!(daq.set_analog(2, 1.0), Err(DaqError::InvalidOutput(2))));
    }

    #[test]
    fn set_analog_rejects_non_finite_voltage_before_io() {
        let (daq, mock) = open(HwModel::S);
        assert!(matches!(
            daq.set_analog(1, f32::NAN),
            Err(DaqError::InvalidVoltage(_))
        ));
        assert!(matches!(
            daq.set_analog(1, f32::INFINITY),
            Err(DaqError::InvalidVoltage(_))
        ));
        assert!(commands_after_open(&mock, &daq).is_empty());
    }

    #[test]
    fn volts_to_dac_uses_output_calibration() {
        let (daq, _mock) = open(HwModel::S);
        // S DAC spans 0..4.096 V, signed: mid-scale is code 0
        assert_eq!(daq.volts_to_dac(1, 2.048).unwrap(), 0);
        assert_eq!(daq.volts_to_dac(1, 4.096).unwrap(), i16::MAX);
    }

    #[test]
    fn pio_bounds() {
        let (daq, mock) = open(HwModel::S);
        assert!(matches!(daq.set_pio(0, true), Err(DaqError::InvalidPio(0))));
        assert!(matches!(daq.set_pio_dir(7, true), Err(DaqError::InvalidPio(7))));
        assert!(matches!(daq.read_pio(7), Err(DaqError::InvalidPio(7))));
        assert!(matches!(daq.set_port(64), Err(DaqError::InvalidPioValue(64))));
        assert!(matches!(daq.set_port_dir(0xFF), Err(DaqError::InvalidPioValue(255))));
        assert!(commands_after_open(&mock, &daq).is_empty());
    }

    #[test]
    fn pio_round_trip() {
        let (daq, mock) = open(HwModel::S);
        mock.push_response(PIO, &[3, 1]);
        assert!(daq.read_pio(3).unwrap());
        mock.push_response(PORT, &[0b10_1010]);
        assert_eq!(daq.read_port().unwrap(), 0b10_1010);
        mock.push_response(PORT, &[63]);
        daq.set_port(63).unwrap();
        let cmds = commands_after_open(&mock, &daq);
        assert_eq!(&cmds[0][2..], &[PIO, 1, 3]);
        assert_eq!(&cmds[1][2..], &[PORT, 0]);
        assert_eq!(&cmds[2][2..], &[PORT, 1, 63]);
    }

    #[test]
    fn set_device_id_bounds_and_payload() {
        let (daq, mock) = open(HwModel::S);
        assert!(matches!(daq.set_device_id(1001), Err(DaqError::InvalidId(1001))));
        mock.push_response(ID_CONFIG, &[2, 5, 0, 0, 0x03, 0xE8]);
        let info = daq.set_device_id(1000).unwrap();
        assert_eq!(info.serial, 1000);
        let cmds = commands_after_open(&mock, &daq);
        assert_eq!(&cmds[0][2..], &[ID_CONFIG, 4, 0, 0, 0x03, 0xE8]);
    }

    // ── analog reads ──

    #[test]
    fn read_analog_zero_code_is_zero_volts() {
        let (daq, mock) = open(HwModel::S);
        mock.push_response(AIN_CFG, &[1, 0, 0, 1, 0, 0]);
        daq.configure_adc(1, 0, 0, 1).unwrap();
        mock.push_response(AIN, &[0, 0]);
        assert_eq!(daq.read_analog().unwrap(), 0.0);
    }

    #[test]
    fn read_analog_uses_second_stage_on_two_stage_models() {
        let mock = MockTransport::with_identity(HwModel::TP04AB.id(), 1, 1);
        mock.push_response(ID_CONFIG, &[11, 1, 0, 0, 0, 1]);
        // Registers 0..10; register 7 is the second stage of input 2 (2 + 4 + 1)
        for reg in 0..10u8 {
            let offset: i16 = if reg == 7 { 32 * 100 } else { 0 };
            let mut payload = vec![reg, 0, 0];
            payload.extend_from_slice(&offset.to_be_bytes());
            mock.push_response(GET_CALIB, &payload);
        }
        let daq = OpenDaq::with_transport(mock.clone(), &fast_config(), &ModelRegistry::standard())
            .unwrap();

        mock.push_response(AIN_CFG, &[2, 0, 0, 1, 0, 0]);
        daq.configure_adc(2, 0, 0, 1).unwrap();
        mock.push_response(AIN, &[0, 0]);
        let volts = daq.read_analog().unwrap();
        // 100 codes of second-stage offset, 48 V span over 2^16 codes
        assert!((volts - 100.0 * 48.0 / 65536.0).abs() < 1e-6);
    }

    #[test]
    fn read_adc_returns_signed_raw_code() {
        let (daq, mock) = open(HwModel::S);
        mock.push_response(AIN, &[0xFF, 0x38]);
        assert_eq!(daq.read_adc().unwrap(), -200);
    }

    #[test]
    fn get_calib_identity_for_missing_stage() {
        let (daq, _mock) = open(HwModel::S);
        let ch = CalibChannel::Input {
            number: 1,
            differential: false,
            gain_id: 0,
        };
        assert_eq!(daq.get_calib(ch, Stage::Second).unwrap(), Calib::IDENTITY);
        assert!(matches!(
            daq.get_calib(CalibChannel::Output(5), Stage::First),
            Err(DaqError::InvalidOutput(5))
        ));
    }
}
