//! Command dispatch — one lock, bounded retry.
//!
//! The [`Dispatcher`] owns the transport together with the device's input
//! configuration. Both live behind a single mutex: command dispatch and
//! configuration changes share one critical section, so a configuration
//! update and the analog read interpreted under it can never interleave with
//! another caller's commands.

use std::sync::{Mutex, MutexGuard, PoisonError};

use crate::config::DEFAULT_MAX_ATTEMPTS;
use crate::error::{DaqError, Result};
use crate::protocol::{ChecksumCodec, Codec, Command, FrameError};
use crate::transport::{Transport, read_frame};

/// Current ADC input selection, needed to interpret raw readings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputConfig {
    /// Positive input, 1-based.
    pub pos_input: u32,
    /// Negative input; 0 selects single-ended mode.
    pub neg_input: u32,
    pub differential: bool,
    pub gain_id: u32,
}

impl Default for InputConfig {
    fn default() -> Self {
        InputConfig {
            pos_input: 1,
            neg_input: 0,
            differential: false,
            gain_id: 0,
        }
    }
}

/// State guarded by the dispatcher lock.
struct Link<T> {
    transport: T,
    input: InputConfig,
}

/// Serialises access to one board and retries failed commands.
pub struct Dispatcher<T, C = ChecksumCodec> {
    link: Mutex<Link<T>>,
    codec: C,
    max_attempts: u32,
}

impl<T: Transport> Dispatcher<T, ChecksumCodec> {
    pub fn new(transport: T) -> Self {
        Self::with_codec(transport, ChecksumCodec)
    }
}

impl<T: Transport, C: Codec> Dispatcher<T, C> {
    pub fn with_codec(transport: T, codec: C) -> Self {
        Dispatcher {
            link: Mutex::new(Link {
                transport,
                input: InputConfig::default(),
            }),
            codec,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    /// Set the total number of attempts per command (clamped to at least 1).
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Acquire the lock for a sequence of commands.
    ///
    /// Holding the guard blocks every other caller until it is dropped.
    pub fn lock(&self) -> Session<'_, T, C> {
        // Link holds no invariant a panicking holder could leave half-updated
        let guard = self.link.lock().unwrap_or_else(PoisonError::into_inner);
        Session {
            link: guard,
            codec: &self.codec,
            max_attempts: self.max_attempts,
        }
    }

    /// Send one command and return its `response_len`-byte payload.
    pub fn send(&self, command: &Command, response_len: usize) -> Result<Vec<u8>> {
        self.lock().send(command, response_len)
    }
}

/// Exclusive access to the transport and input configuration.
pub struct Session<'a, T, C> {
    link: MutexGuard<'a, Link<T>>,
    codec: &'a C,
    max_attempts: u32,
}

impl<T: Transport, C: Codec> Session<'_, T, C> {
    /// Send `command`, retrying on any failure up to the attempt limit.
    ///
    /// The transport input is flushed after every failed attempt. Returns the
    /// first successful payload or the last error.
    pub fn send(&mut self, command: &Command, response_len: usize) -> Result<Vec<u8>> {
        let mut last_err = None;
        for attempt in 1..=self.max_attempts {
            match self.attempt(command, response_len) {
                Ok(payload) => {
                    if attempt > 1 {
                        log::debug!("command {} succeeded on attempt {attempt}", command.opcode);
                    }
                    return Ok(payload);
                }
                Err(e) => {
                    log::debug!(
                        "command {} attempt {attempt}/{} failed: {e}",
                        command.opcode,
                        self.max_attempts
                    );
                    if let Err(flush_err) = self.link.transport.flush_input() {
                        log::debug!("flush after failed attempt: {flush_err}");
                    }
                    last_err = Some(e);
                }
            }
        }
        let source = last_err.unwrap_or(FrameError::ShortRead {
            expected: self.codec.frame_len(response_len),
            got: 0,
        });
        log::warn!(
            "command {} failed after {} attempts: {source}",
            command.opcode,
            self.max_attempts
        );
        Err(DaqError::Transport {
            attempts: self.max_attempts,
            source,
        })
    }

    fn attempt(
        &mut self,
        command: &Command,
        response_len: usize,
    ) -> std::result::Result<Vec<u8>, FrameError> {
        let frame = self.codec.encode(command);
        self.link.transport.write_all(&frame)?;
        let raw = read_frame(&mut self.link.transport, self.codec.frame_len(response_len))?;
        self.codec.decode(command.opcode, &raw, response_len)
    }

    pub fn input(&self) -> InputConfig {
        self.link.input
    }

    pub fn set_input(&mut self, input: InputConfig) {
        self.link.input = input;
    }
}
