//! Serial line transport
//!
//! Provides the byte channel to the motor driver board and the line codec
//! on top of it:
//! - Open contract: fixed 8-N-1 framing, control lines raised, settle delay,
//!   stale input discarded, one throwaway wake terminator
//! - LF-terminated line encode/decode with unconditional CR stripping
//! - Soft-timeout read polling that never mistakes an expired read attempt
//!   for a dead link
//! - Narrow raw-byte operations for diagnostics
//!
//! USB-CDC serial stacks report an expired read differently per platform
//! (a timeout on some, a generic I/O abort on others); both are normalized
//! to the same "no data yet" outcome here so a flaky stack never surfaces a
//! spurious fatal error.

use jogkit_core::{Error, LinkError, Result, ShutdownToken};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io;
use std::time::{Duration, Instant};

/// Fixed symbol rate for the board link.
pub const BAUD_RATE: u32 = 115_200;

/// Per-attempt port read timeout. Expiry means "no data yet", not failure.
pub const READ_ATTEMPT_TIMEOUT: Duration = Duration::from_millis(15);

/// Settle delay between the physical open and the first traffic. Many boards
/// stay silent without it.
pub const OPEN_SETTLE_DELAY: Duration = Duration::from_millis(75);

/// Pause after each line write so the driver can push the bytes out before
/// the next operation starts.
const WRITE_FLUSH_DELAY: Duration = Duration::from_millis(2);

/// Sleep between read attempts while no data is pending.
const READ_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Maximum accepted line length. A noisy link that never produces a
/// terminator fails the affected read instead of growing memory without
/// bound.
pub const MAX_LINE_LEN: usize = 4096;

/// Connection parameters for a link
///
/// Framing beyond the port name and symbol rate is fixed: 8 data bits, no
/// parity, 1 stop bit, no flow control.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkParams {
    /// Device identifier (e.g., "/dev/ttyUSB0", "COM3")
    pub port: String,
    /// Symbol rate
    pub baud_rate: u32,
}

impl LinkParams {
    /// Parameters for a port at the fixed default symbol rate
    pub fn new(port: impl Into<String>) -> Self {
        Self {
            port: port.into(),
            baud_rate: BAUD_RATE,
        }
    }
}

impl Default for LinkParams {
    fn default() -> Self {
        Self {
            port: String::new(),
            baud_rate: BAUD_RATE,
        }
    }
}

/// Low-level byte port underneath the line transport
///
/// Implemented by the real serial port and by scripted fakes in tests.
pub trait LinkPort: Send {
    /// Read available bytes; a timed-out attempt returns a timeout error
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write all bytes
    fn write_all(&mut self, data: &[u8]) -> io::Result<()>;

    /// Flush pending output
    fn flush(&mut self) -> io::Result<()>;

    /// Drop any buffered, unread input
    fn discard_input(&mut self) -> io::Result<()>;
}

/// Real port backed by the serialport crate
struct NativePort {
    port: Box<dyn serialport::SerialPort>,
}

impl LinkPort for NativePort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.port.read(buf)
    }

    fn write_all(&mut self, data: &[u8]) -> io::Result<()> {
        self.port.write_all(data)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.port.flush()
    }

    fn discard_input(&mut self) -> io::Result<()> {
        self.port
            .clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::other(e.to_string()))
    }
}

/// True for error shapes that mean "the read attempt expired", which the
/// transport keeps polling through.
fn is_soft_read_error(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
    )
}

struct LinkInner {
    port: Option<Box<dyn LinkPort>>,
    /// Bytes received after the last terminator, CR already stripped.
    pending: Vec<u8>,
}

/// One open session on the byte link to the board
///
/// Owns the port handle and the partial-line accumulator. At most one
/// session is open per controller; a closed link is never reopened, a new
/// one is created instead.
pub struct SerialLink {
    inner: Mutex<LinkInner>,
    params: LinkParams,
}

impl SerialLink {
    /// Open the physical device and run the full open contract.
    ///
    /// Raises DTR and RTS (some boards stay silent otherwise), waits out the
    /// settle delay, discards stale input from a prior session, and writes
    /// one throwaway terminator to wake a firmware line reader that may
    /// ignore the very first write after open. Any failure after the
    /// physical open releases the handle before the error propagates.
    pub async fn open(params: &LinkParams) -> Result<Self> {
        let builder = serialport::new(&params.port, params.baud_rate)
            .timeout(READ_ATTEMPT_TIMEOUT)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None);

        let mut port = match builder.open() {
            Ok(port) => port,
            Err(e) => {
                tracing::warn!("Failed to open serial port {}: {}", params.port, e);
                return Err(LinkError::OpenFailed {
                    port: params.port.clone(),
                    reason: e.to_string(),
                }
                .into());
            }
        };

        if let Err(e) = Self::prime(port.as_mut()).await {
            // The half-open handle is dropped here, not retained.
            drop(port);
            tracing::warn!("Failed to prime serial port {}: {}", params.port, e);
            return Err(LinkError::OpenFailed {
                port: params.port.clone(),
                reason: e.to_string(),
            }
            .into());
        }

        tracing::info!(port = %params.port, baud = params.baud_rate, "link opened");
        Ok(Self {
            inner: Mutex::new(LinkInner {
                port: Some(Box::new(NativePort { port })),
                pending: Vec::new(),
            }),
            params: params.clone(),
        })
    }

    async fn prime(port: &mut dyn serialport::SerialPort) -> io::Result<()> {
        port.write_data_terminal_ready(true)
            .map_err(|e| io::Error::other(e.to_string()))?;
        port.write_request_to_send(true)
            .map_err(|e| io::Error::other(e.to_string()))?;

        tokio::time::sleep(OPEN_SETTLE_DELAY).await;

        port.clear(serialport::ClearBuffer::Input)
            .map_err(|e| io::Error::other(e.to_string()))?;

        // Throwaway terminator; the firmware discards the resulting empty
        // line but its reader is awake for the real traffic that follows.
        port.write_all(b"\n")?;
        port.flush()?;
        Ok(())
    }

    /// Wrap an already-open port.
    ///
    /// The open contract (settle delay, wake byte) is skipped; used by
    /// diagnostics and tests that script their own port.
    pub fn from_port(port: Box<dyn LinkPort>, params: LinkParams) -> Self {
        Self {
            inner: Mutex::new(LinkInner {
                port: Some(port),
                pending: Vec::new(),
            }),
            params,
        }
    }

    /// Connection parameters this link was opened with
    pub fn params(&self) -> &LinkParams {
        &self.params
    }

    /// Whether the link is open
    pub fn is_open(&self) -> bool {
        self.inner.lock().port.is_some()
    }

    /// Close the link. Idempotent; never fails on an already-closed link.
    pub fn close(&self) {
        let mut inner = self.inner.lock();
        if inner.port.take().is_some() {
            tracing::info!(port = %self.params.port, "link closed");
        }
        inner.pending.clear();
    }

    /// Write one command line.
    ///
    /// Encodes as ASCII and writes the payload and the LF terminator as two
    /// distinct operations; the wire makes no single-frame delivery promise
    /// either way. Silently a no-op when the link is closed; commands
    /// issued around shutdown are expected to be dropped.
    pub async fn write_line(&self, text: &str) -> Result<()> {
        if !text.is_ascii() {
            return Err(LinkError::NonAsciiData {
                command: text.to_string(),
            }
            .into());
        }

        {
            let mut inner = self.inner.lock();
            let Some(port) = inner.port.as_mut() else {
                tracing::debug!(command = text, "write skipped, link closed");
                return Ok(());
            };

            port.write_all(text.as_bytes())
                .and_then(|_| port.write_all(b"\n"))
                .and_then(|_| port.flush())
                .map_err(|e| LinkError::WriteFailed {
                    reason: e.to_string(),
                })?;
        }

        tokio::time::sleep(WRITE_FLUSH_DELAY).await;
        Ok(())
    }

    /// Read the next LF-terminated line.
    ///
    /// Accumulates bytes until LF; CR bytes are discarded unconditionally.
    /// Per-attempt port timeouts keep the poll going. Returns `Ok(None)`
    /// when `slice` elapses without a complete line; the caller decides
    /// whether to keep listening. Fails with [`LinkError::Cancelled`] on
    /// shutdown, [`LinkError::NotConnected`] on a closed link, and
    /// [`LinkError::FrameTooLong`] when no terminator shows up within
    /// [`MAX_LINE_LEN`] bytes (the oversized accumulation is dropped).
    pub async fn read_line(&self, slice: Duration, shutdown: &ShutdownToken) -> Result<Option<String>> {
        let deadline = Instant::now() + slice;

        loop {
            if shutdown.is_shutdown() {
                return Err(LinkError::Cancelled.into());
            }

            enum Attempt {
                Line(String),
                NoData,
                GotData,
            }

            let attempt = {
                let mut guard = self.inner.lock();
                let LinkInner { port, pending } = &mut *guard;
                let Some(port) = port.as_mut() else {
                    return Err(LinkError::NotConnected.into());
                };

                if let Some(pos) = pending.iter().position(|&b| b == b'\n') {
                    let line = String::from_utf8_lossy(&pending[..pos]).into_owned();
                    pending.drain(..=pos);
                    Attempt::Line(line)
                } else {
                    let mut buf = [0u8; 256];
                    match port.read(&mut buf) {
                        Ok(0) => Attempt::NoData,
                        Ok(n) => {
                            pending.extend(buf[..n].iter().copied().filter(|&b| b != b'\r'));
                            if !pending.contains(&b'\n') && pending.len() > MAX_LINE_LEN {
                                pending.clear();
                                return Err(LinkError::FrameTooLong { max_len: MAX_LINE_LEN }.into());
                            }
                            Attempt::GotData
                        }
                        Err(e) if is_soft_read_error(&e) => Attempt::NoData,
                        Err(e) => return Err(Error::Io(e)),
                    }
                }
            };

            match attempt {
                Attempt::Line(line) => return Ok(Some(line)),
                Attempt::GotData => continue,
                Attempt::NoData => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    tokio::time::sleep(READ_POLL_INTERVAL).await;
                }
            }
        }
    }

    /// Write raw bytes, bypassing the line codec.
    ///
    /// Diagnostic operation for probes that need alternate terminators;
    /// line-mode consumers have no business here.
    pub fn write_raw(&self, bytes: &[u8]) -> Result<()> {
        let mut inner = self.inner.lock();
        let Some(port) = inner.port.as_mut() else {
            return Err(LinkError::NotConnected.into());
        };
        port.write_all(bytes)
            .and_then(|_| port.flush())
            .map_err(|e| LinkError::WriteFailed {
                reason: e.to_string(),
            })?;
        Ok(())
    }

    /// Read whatever bytes are immediately available, bypassing the line
    /// codec. A timed-out attempt reads as zero bytes.
    pub fn read_available(&self, buf: &mut [u8]) -> Result<usize> {
        let mut inner = self.inner.lock();
        let Some(port) = inner.port.as_mut() else {
            return Err(LinkError::NotConnected.into());
        };
        match port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if is_soft_read_error(&e) => Ok(0),
            Err(e) => Err(Error::Io(e)),
        }
    }
}
