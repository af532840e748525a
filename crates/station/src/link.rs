//! Exclusive, blocking access to one serial channel.
//!
//! The modules do not frame or checksum their answers. Any byte left over in
//! the receive buffer shifts the next response and silently corrupts it.
//! Callers must therefore end every exchange with [`SerialLink::flush`].

use std::io::{self, Read, Write};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Longest line accepted while waiting for a delimiter
const MAX_LINE: usize = 128;

pub type SystemPort = Box<dyn serialport::SerialPort>;

/// What a [`SerialLink`] needs from the thing it talks through.
pub trait Port: Read + Write {
    /// Drop everything received that has not been read yet.
    fn discard_input(&mut self) -> io::Result<()>;
}

impl Port for SystemPort {
    fn discard_input(&mut self) -> io::Result<()> {
        self.clear(serialport::ClearBuffer::Input)
            .map_err(io::Error::from)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DataBits {
    Five,
    Six,
    Seven,
    Eight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Parity {
    None,
    Odd,
    Even,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StopBits {
    One,
    Two,
}

impl From<DataBits> for serialport::DataBits {
    fn from(bits: DataBits) -> Self {
        match bits {
            DataBits::Five => serialport::DataBits::Five,
            DataBits::Six => serialport::DataBits::Six,
            DataBits::Seven => serialport::DataBits::Seven,
            DataBits::Eight => serialport::DataBits::Eight,
        }
    }
}

impl From<Parity> for serialport::Parity {
    fn from(parity: Parity) -> Self {
        match parity {
            Parity::None => serialport::Parity::None,
            Parity::Odd => serialport::Parity::Odd,
            Parity::Even => serialport::Parity::Even,
        }
    }
}

impl From<StopBits> for serialport::StopBits {
    fn from(bits: StopBits) -> Self {
        match bits {
            StopBits::One => serialport::StopBits::One,
            StopBits::Two => serialport::StopBits::Two,
        }
    }
}

/// Settings shared by every channel of the station
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub parity: Parity,
    pub stop_bits: StopBits,
    /// Upper bound on a single read or read until delimiter
    pub timeout: Duration,
    pub open_attempts: u32,
    pub open_backoff: Duration,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            baud_rate: 9600,
            data_bits: DataBits::Eight,
            parity: Parity::None,
            stop_bits: StopBits::One,
            timeout: Duration::from_secs(1),
            open_attempts: 10,
            open_backoff: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Could not open {path} after {attempts} attempts")]
pub struct OpenError {
    pub path: String,
    pub attempts: u32,
    #[source]
    pub last: serialport::Error,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Timed out, expected {expected} bytes got {got}")]
    Timeout { expected: usize, got: usize },
    #[error("Timed out waiting for the end of the line, got {got} bytes")]
    NoDelimiter { got: usize },
    #[error("No end of line within {} bytes", MAX_LINE)]
    LineTooLong,
    #[error("Serial io failed: {0}")]
    Io(#[from] io::Error),
}

pub struct SerialLink<P> {
    port: P,
    path: String,
    timeout: Duration,
}

/// Opens the port at `path`, retrying with a fixed backoff. The error is
/// returned instead of raised, the owning channel is then unavailable
/// while the rest of the station keeps going.
pub fn open_with_retry(
    path: &str,
    config: &LinkConfig,
) -> Result<SerialLink<SystemPort>, OpenError> {
    retry_open(path, config, || {
        serialport::new(path, config.baud_rate)
            .data_bits(config.data_bits.into())
            .parity(config.parity.into())
            .stop_bits(config.stop_bits.into())
            .flow_control(serialport::FlowControl::None)
            .timeout(config.timeout)
            .open()
    })
}

pub fn retry_open<P: Port>(
    path: &str,
    config: &LinkConfig,
    mut open: impl FnMut() -> Result<P, serialport::Error>,
) -> Result<SerialLink<P>, OpenError> {
    let attempts = config.open_attempts.max(1);
    let mut attempt = 1;
    loop {
        match open() {
            Ok(port) => {
                debug!("opened {path} on attempt {attempt}");
                return Ok(SerialLink::new(port, path, config.timeout));
            }
            Err(e) if attempt < attempts => {
                warn!("Cannot open {path}, attempt {attempt}/{attempts}: {e}");
                thread::sleep(config.open_backoff);
                attempt += 1;
            }
            Err(last) => {
                return Err(OpenError {
                    path: path.to_owned(),
                    attempts,
                    last,
                })
            }
        }
    }
}

impl<P: Port> SerialLink<P> {
    pub fn new(port: P, path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            port,
            path: path.into(),
            timeout,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    #[cfg(test)]
    pub(crate) fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<(), Error> {
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    /// Reads exactly `n` bytes or fails once the timeout passes.
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + self.timeout;
        let mut buf = vec![0u8; n];
        let mut got = 0;

        while got < n {
            match self.read_chunk(&mut buf[got..])? {
                0 => return Err(Error::Timeout { expected: n, got }),
                read => got += read,
            }
            if got < n && Instant::now() > deadline {
                return Err(Error::Timeout { expected: n, got });
            }
        }
        Ok(buf)
    }

    /// Reads up to and including `delimiter`.
    pub fn read_until(&mut self, delimiter: &[u8]) -> Result<Vec<u8>, Error> {
        let deadline = Instant::now() + self.timeout;
        let mut line = Vec::new();
        let mut byte = [0u8];

        loop {
            if self.read_chunk(&mut byte)? == 0 {
                return Err(Error::NoDelimiter { got: line.len() });
            }
            line.push(byte[0]);
            if line.ends_with(delimiter) {
                return Ok(line);
            }
            if line.len() >= MAX_LINE {
                return Err(Error::LineTooLong);
            }
            if Instant::now() > deadline {
                return Err(Error::NoDelimiter { got: line.len() });
            }
        }
    }

    /// Runs one command and response over the link and flushes afterwards,
    /// also when the exchange failed halfway. The first error wins.
    pub fn exchange<T>(
        &mut self,
        exchange: impl FnOnce(&mut Self) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let result = exchange(self);
        let flushed = self.flush();
        let value = result?;
        flushed?;
        Ok(value)
    }

    /// Waits for pending output then throws away unread input.
    pub fn flush(&mut self) -> Result<(), Error> {
        self.port.flush()?;
        self.port.discard_input()?;
        Ok(())
    }

    /// Zero means the port timed out or has nothing more to give
    fn read_chunk(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        loop {
            match self.port.read(buf) {
                Ok(n) => return Ok(n),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock
                    ) =>
                {
                    return Ok(0)
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}
