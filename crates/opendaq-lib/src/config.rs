//! Connection configuration — TOML-based, platform-aware paths.

use std::fmt;
use std::io;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Baud rate used by every openDAQ board.
pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Per-read timeout.
pub const DEFAULT_READ_TIMEOUT_MS: u64 = 100;

/// Delay after opening the port before the first command (the board resets on open).
pub const DEFAULT_SETTLE_DELAY_MS: u64 = 1500;

/// Total attempts per command (1 initial + 7 retries).
pub const DEFAULT_MAX_ATTEMPTS: u32 = 8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaqConfig {
    /// Serial port name, e.g. "/dev/ttyUSB0" or "COM3". Empty = none configured.
    #[serde(default)]
    pub port: String,

    #[serde(default = "default_baud_rate")]
    pub baud_rate: u32,

    #[serde(default = "default_read_timeout_ms")]
    pub read_timeout_ms: u64,

    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Attempts per command before the dispatcher gives up.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_baud_rate() -> u32 {
    DEFAULT_BAUD_RATE
}
fn default_read_timeout_ms() -> u64 {
    DEFAULT_READ_TIMEOUT_MS
}
fn default_settle_delay_ms() -> u64 {
    DEFAULT_SETTLE_DELAY_MS
}
fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl Default for DaqConfig {
    fn default() -> Self {
        DaqConfig {
            port: String::new(),
            baud_rate: DEFAULT_BAUD_RATE,
            read_timeout_ms: DEFAULT_READ_TIMEOUT_MS,
            settle_delay_ms: DEFAULT_SETTLE_DELAY_MS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// Validation errors that [`DaqConfig::validate`] can return.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    ZeroBaudRate,
    ZeroReadTimeout,
    /// `max_attempts` must allow at least the initial attempt.
    ZeroAttempts,
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::ZeroBaudRate => write!(f, "baud_rate must be greater than 0"),
            ValidationError::ZeroReadTimeout => {
                write!(f, "read_timeout_ms must be greater than 0")
            }
            ValidationError::ZeroAttempts => write!(f, "max_attempts must be at least 1"),
        }
    }
}

impl DaqConfig {
    /// Defaults with `port` set.
    pub fn for_port(port: impl Into<String>) -> Self {
        DaqConfig {
            port: port.into(),
            ..Self::default()
        }
    }

    /// Platform config file: `<config dir>/opendaq/config.toml`.
    pub fn path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("opendaq").join("config.toml"))
    }

    /// Load the platform config file, or defaults if there is none.
    pub fn load() -> Self {
        match Self::path() {
            Some(path) => Self::load_file(&path),
            None => Self::default(),
        }
    }

    /// Load `path`, logging every fallback as a warning.
    pub fn load_file(path: &Path) -> Self {
        let (config, warnings) = Self::load_from(path);
        for w in &warnings {
            log::warn!("{w}");
        }
        config
    }

    /// Load `path`, returning the settings and a warning per fallback.
    ///
    /// A missing file yields defaults silently. An unreadable or unparseable
    /// file yields defaults with one warning. Fields that parse but fail
    /// validation are reset to their defaults individually.
    pub fn load_from(path: &Path) -> (Self, Vec<String>) {
        let contents = match std::fs::read_to_string(path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return (Self::default(), vec![]),
            Err(e) => {
                let warning = format!("cannot read {}, using defaults: {e}", path.display());
                return (Self::default(), vec![warning]);
            }
        };
        let mut config: DaqConfig = match toml::from_str(&contents) {
            Ok(config) => config,
            Err(e) => {
                let warning = format!(
                    "config parse error ({}), using defaults: {e}",
                    path.display()
                );
                return (Self::default(), vec![warning]);
            }
        };
        let warnings = config.reset_invalid();
        (config, warnings)
    }

    /// Reset every field that fails validation to its default.
    fn reset_invalid(&mut self) -> Vec<String> {
        let Err(errors) = self.validate() else {
            return vec![];
        };
        let mut warnings = Vec::with_capacity(errors.len());
        for error in errors {
            match error {
                ValidationError::ZeroBaudRate => self.baud_rate = DEFAULT_BAUD_RATE,
                ValidationError::ZeroReadTimeout => self.read_timeout_ms = DEFAULT_READ_TIMEOUT_MS,
                ValidationError::ZeroAttempts => self.max_attempts = DEFAULT_MAX_ATTEMPTS,
            }
            warnings.push(format!("{error}, using the default"));
        }
        warnings
    }

    /// Validate the entire config, collecting all errors.
    pub fn validate(&self) -> std::result::Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();
        if self.baud_rate == 0 {
            errors.push(ValidationError::ZeroBaudRate);
        }
        if self.read_timeout_ms == 0 {
            errors.push(ValidationError::ZeroReadTimeout);
        }
        if self.max_attempts == 0 {
            errors.push(ValidationError::ZeroAttempts);
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
