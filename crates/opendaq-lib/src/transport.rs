//! Byte-stream transport — trait + serial backend + in-memory mock.

use std::io::{self, Read, Write};
use std::time::Duration;

use serialport::{ClearBuffer, SerialPort};

use crate::config::DaqConfig;
use crate::error::{DaqError, Result};
use crate::protocol::FrameError;

// ── Trait ──

/// Blocking byte transport to a single board.
///
/// `read` follows `std::io::Read` semantics, with one addition: a read that
/// times out may return either `Ok(0)` or an `ErrorKind::TimedOut` error.
pub trait Transport: Send {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
    /// Discard any bytes waiting in the input buffer.
    fn flush_input(&mut self) -> io::Result<()>;
}

/// Read exactly `len` bytes, or fail with `ShortRead` on timeout.
pub fn read_frame<T: Transport + ?Sized>(
    transport: &mut T,
    len: usize,
) -> std::result::Result<Vec<u8>, FrameError> {
    let mut buf = vec![0u8; len];
    let mut got = 0;
    while got < len {
        match transport.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(n) => got += n,
            Err(e) if e.kind() == io::ErrorKind::TimedOut => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(FrameError::Io(e)),
        }
    }
    if got < len {
        return Err(FrameError::ShortRead { expected: len, got });
    }
    Ok(buf)
}

// ── Serial implementation ──

/// Serial-port transport.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
}

impl SerialTransport {
    /// Open `path` with the baud rate and read timeout from `config`, then
    /// wait the settle delay so the board finishes its reset.
    pub fn open(path: &str, config: &DaqConfig) -> Result<Self> {
        let port = serialport::new(path, config.baud_rate)
            .timeout(Duration::from_millis(config.read_timeout_ms))
            .open()
            .map_err(|source| DaqError::Open {
                port: path.to_string(),
                source,
            })?;
        log::debug!(
            "opened {path} at {} baud, waiting {} ms to settle",
            config.baud_rate,
            config.settle_delay_ms
        );
        std::thread::sleep(Duration::from_millis(config.settle_delay_ms));
        Ok(SerialTransport { port })
    }
}

impl Transport for SerialTransport {
    fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        Write::write_all(&mut self.port, buf)?;
        Write::flush(&mut self.port)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        Read::read(&mut self.port, buf)
    }

    fn flush_input(&mut self) -> io::Result<()> {
        self.port.clear(ClearBuffer::Input).map_err(io::Error::from)
    }
}

// ── Mock transport for testing ──

/// In-memory mock transport for unit and integration tests.
///
/// Always compiled (zero runtime cost), hidden from public docs.
#[doc(hidden)]
pub mod mock {
    use super::*;
    use std::collections::{HashMap, VecDeque};
    use std::sync::{Arc, Mutex};

    use crate::protocol::{ChecksumCodec, Codec, Command};

    /// One scripted reaction to a written frame.
    #[derive(Debug, Clone)]
    pub enum Reply {
        /// Answer with these raw wire bytes.
        Bytes(Vec<u8>),
        /// Stay silent; the next read times out.
        Timeout,
    }

    #[derive(Debug, Default)]
    pub struct MockState {
        /// Scripted replies consumed in order, one per written frame.
        pub script: VecDeque<Reply>,
        /// Fallback replies keyed by opcode (payload only, framed on demand).
        /// Used when `script` is empty.
        pub handlers: HashMap<u8, Vec<u8>>,
        /// Every frame written, in order.
        pub written: Vec<Vec<u8>>,
        /// Number of `flush_input` calls.
        pub flushes: usize,
        /// Bytes pending for the next reads.
        pending: VecDeque<u8>,
    }

    /// Scripted transport. Clones share state, so a test can keep a handle
    /// after moving the transport into a device.
    #[derive(Debug, Clone, Default)]
    pub struct MockTransport {
        state: Arc<Mutex<MockState>>,
    }

    impl MockTransport {
        pub fn new() -> Self {
            Self::default()
        }

        /// Run `f` against the shared mock state.
        pub fn with_state<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R {
            let mut guard = self
                .state
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            f(&mut guard)
        }

        /// Queue a raw wire reply for the next written frame.
        pub fn push_reply(&self, reply: Reply) {
            self.with_state(|s| s.script.push_back(reply));
        }

        /// Queue a well-framed response carrying `payload` for `opcode`.
        pub fn push_response(&self, opcode: u8, payload: &[u8]) {
            let frame = ChecksumCodec.encode(&Command::new(opcode, payload.to_vec()));
            self.push_reply(Reply::Bytes(frame));
        }

        /// Answer every request for `opcode` with `payload` once the script is empty.
        pub fn set_handler(&self, opcode: u8, payload: &[u8]) {
            self.with_state(|s| {
                s.handlers.insert(opcode, payload.to_vec());
            });
        }

        /// Frames written so far.
        pub fn written(&self) -> Vec<Vec<u8>> {
            self.with_state(|s| s.written.clone())
        }

        /// Opcodes of the frames written so far (byte 2 of the default framing).
        pub fn written_opcodes(&self) -> Vec<u8> {
            self.with_state(|s| s.written.iter().filter_map(|f| f.get(2).copied()).collect())
        }

        pub fn flushes(&self) -> usize {
            self.with_state(|s| s.flushes)
        }

        /// Build a mock that answers every identity query as `model`.
        pub fn with_identity(model: u8, version: u8, serial: u32) -> Self {
            let mock = Self::new();
            let mut info = vec![model, version];
            info.extend_from_slice(&serial.to_be_bytes());
            mock.set_handler(crate::protocol::ID_CONFIG, &info);
            mock
        }
    }

    impl Transport for MockTransport {
        fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
            self.with_state(|s| {
                s.written.push(buf.to_vec());
                let reply = match s.script.pop_front() {
                    Some(reply) => reply,
                    None => match buf.get(2).and_then(|op| s.handlers.get(op).map(|p| (*op, p))) {
                        Some((op, payload)) => {
                            let payload = if op == crate::protocol::GET_CALIB {
                                // Echo the requested register in the zero-filled answer
                                let mut p = payload.clone();
                                if let (Some(first), Some(&reg)) = (p.first_mut(), buf.get(4)) {
                                    *first = reg;
                                }
                                p
                            } else {
                                payload.clone()
                            };
                            Reply::Bytes(ChecksumCodec.encode(&Command::new(op, payload)))
                        }
                        None => Reply::Timeout,
                    },
                };
                if let Reply::Bytes(bytes) = reply {
                    s.pending.extend(bytes);
                }
            });
            Ok(())
        }

        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.with_state(|s| {
                if s.pending.is_empty() {
                    return Err(io::Error::new(io::ErrorKind::TimedOut, "mock: read timed out"));
                }
                let n = buf.len().min(s.pending.len());
                for (dst, src) in buf.iter_mut().zip(s.pending.drain(..n)) {
                    *dst = src;
                }
                Ok(n)
            })
        }

        fn flush_input(&mut self) -> io::Result<()> {
            self.with_state(|s| {
                s.flushes += 1;
                s.pending.clear();
            });
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::{MockTransport, Reply};
    use super::*;

    /// Transport that hands out at most `chunk` bytes per read.
    struct Trickle {
        data: Vec<u8>,
        chunk: usize,
    }

    impl Transport for Trickle {
        fn write_all(&mut self, _buf: &[u8]) -> io::Result<()> {
            Ok(())
        }
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            let n = self.chunk.min(buf.len()).min(self.data.len());
            buf[..n].copy_from_slice(&self.data[..n]);
            self.data.drain(..n);
            Ok(n)
        }
        fn flush_input(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn read_frame_assembles_partial_reads() {
        let mut t = Trickle {
            data: vec![1, 2, 3, 4, 5],
            chunk: 2,
        };
        assert_eq!(read_frame(&mut t, 5).unwrap(), vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn read_frame_short_on_eof() {
        let mut t = Trickle {
            data: vec![1, 2],
            chunk: 8,
        };
        let err = read_frame(&mut t, 4).unwrap_err();
        assert!(matches!(err, FrameError::ShortRead { expected: 4, got: 2 }));
    }

    #[test]
    fn read_frame_short_on_timeout() {
        let mut t = MockTransport::new();
        let err = read_frame(&mut t, 3).unwrap_err();
        assert!(matches!(err, FrameError::ShortRead { expected: 3, got: 0 }));
    }

    #[test]
    fn mock_records_writes_and_replays_script() {
        let mut t = MockTransport::new();
        t.push_reply(Reply::Bytes(vec![9, 8, 7]));
        t.write_all(&[0, 1, 2]).unwrap();
        assert_eq!(read_frame(&mut t, 3).unwrap(), vec![9, 8, 7]);
        assert_eq!(t.written(), vec![vec![0, 1, 2]]);
    }

    #[test]
    fn mock_flush_discards_pending_bytes() {
        let mut t = MockTransport::new();
        t.push_reply(Reply::Bytes(vec![1, 2, 3]));
        t.write_all(&[0, 0, 0]).unwrap();
        t.flush_input().unwrap();
        assert_eq!(t.flushes(), 1);
        assert!(read_frame(&mut t, 1).is_err());
    }

    #[test]
    fn mock_handler_echoes_calibration_register() {
        use crate::protocol::{ChecksumCodec, Codec, Command, GET_CALIB};
        let mut t = MockTransport::new();
        t.set_handler(GET_CALIB, &[0, 0, 0, 0, 0]);
        let frame = ChecksumCodec.encode(&Command::new(GET_CALIB, vec![7]));
        t.write_all(&frame).unwrap();
        let resp = read_frame(&mut t, ChecksumCodec.frame_len(5)).unwrap();
        let payload = ChecksumCodec.decode(GET_CALIB, &resp, 5).unwrap();
        assert_eq!(payload, vec![7, 0, 0, 0, 0]);
    }
}
