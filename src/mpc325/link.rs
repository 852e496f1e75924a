// Serial link to the MPC-325 controller
//
// Owns the byte channel and its open/closed lifecycle. The channel itself sits
// behind `Transport` so the same link logic drives a real serial port or the
// simulated controller used by the tests.

use serialport::{self, ClearBuffer, DataBits, FlowControl, Parity, SerialPort, StopBits};
use std::io::{ErrorKind, Read, Write};
use std::thread::sleep;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::{Mpc325Error, Result};

/// Default serial configuration for the MPC-325
pub const DEFAULT_BAUDRATE: u32 = 128_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 5_000;

/// Settle time the controller needs between two commands
pub const INTER_COMMAND_DELAY: Duration = Duration::from_millis(2);

/// Raw byte channel underneath a `Link`
pub trait Transport: Send {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()>;

    /// Read whatever is available, waiting at most the channel's read timeout.
    /// A timeout surfaces as `ErrorKind::TimedOut`.
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;

    /// Number of received bytes waiting to be read
    fn bytes_to_read(&mut self) -> Result<u32>;

    /// Discard pending input and output
    fn clear(&mut self) -> Result<()>;
}

impl Transport for Box<dyn SerialPort> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        Write::write_all(self, bytes)?;
        Write::flush(self)?;
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        Read::read(self, buf)
    }

    fn bytes_to_read(&mut self) -> Result<u32> {
        Ok(SerialPort::bytes_to_read(&**self)?)
    }

    fn clear(&mut self) -> Result<()> {
        Ok(SerialPort::clear(&**self, ClearBuffer::All)?)
    }
}

/// Serial parameters used when opening a port
#[derive(Debug, Clone)]
pub struct LinkSettings {
    pub baud_rate: u32,
    pub data_bits: DataBits,
    pub stop_bits: StopBits,
    pub parity: Parity,
    pub timeout: Duration,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            baud_rate: DEFAULT_BAUDRATE,
            data_bits: DataBits::Eight,
            stop_bits: StopBits::One,
            parity: Parity::None,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Serial link - open/closed state plus the byte channel
pub struct Link {
    settings: LinkSettings,
    transport: Option<Box<dyn Transport>>,
    port_name: Option<String>,
    recovery_flushes: u64,
}

impl Link {
    pub fn new(settings: LinkSettings) -> Self {
        Self {
            settings,
            transport: None,
            port_name: None,
            recovery_flushes: 0,
        }
    }

    pub fn settings(&self) -> &LinkSettings {
        &self.settings
    }

    /// Open the serial port. Does nothing if the link is already open.
    pub fn open(&mut self, port_name: &str) -> Result<()> {
        if self.is_connected() {
            debug!("Link already open on {:?}", self.port_name);
            return Ok(());
        }

        let port = serialport::new(port_name, self.settings.baud_rate)
            .data_bits(self.settings.data_bits)
            .stop_bits(self.settings.stop_bits)
            .parity(self.settings.parity)
            .flow_control(FlowControl::None)
            .timeout(self.settings.timeout)
            .open()?;

        self.attach_named(Box::new(port), port_name)
    }

    /// Open the link over an already constructed transport
    pub fn attach(&mut self, transport: Box<dyn Transport>) -> Result<()> {
        self.attach_named(transport, "<attached>")
    }

    fn attach_named(&mut self, transport: Box<dyn Transport>, port_name: &str) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.transport = Some(transport);
        self.port_name = Some(port_name.to_string());
        info!("Port {} is open, flushing I/O to initialize micromanipulators", port_name);
        self.flush()
    }

    /// Close the link. Safe to call on a closed link.
    pub fn close(&mut self) {
        if self.transport.take().is_some() {
            info!("Port {} closed", self.port_name.as_deref().unwrap_or("?"));
        }
        self.port_name = None;
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    fn transport(&mut self) -> Result<&mut Box<dyn Transport>> {
        self.transport.as_mut().ok_or(Mpc325Error::NotConnected)
    }

    /// Discard buffered I/O and wait the inter-command settle time.
    ///
    /// Every command is preceded by a flush. Leftover input means the previous
    /// exchange desynced; it is logged and dropped.
    pub fn flush(&mut self) -> Result<()> {
        let transport = self.transport()?;
        let residual = transport.bytes_to_read()?;
        if residual > 0 {
            warn!("Discarding {} unread bytes from the controller", residual);
        }
        transport.clear()?;
        sleep(INTER_COMMAND_DELAY);
        Ok(())
    }

    /// Flush after a protocol fault
    pub fn recover(&mut self) -> Result<()> {
        self.recovery_flushes += 1;
        warn!("Protocol desync detected, flushing link buffers");
        self.flush()
    }

    /// Number of flushes performed to recover from protocol faults
    pub fn recovery_flushes(&self) -> u64 {
        self.recovery_flushes
    }

    pub fn write(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("TX {:02X?}", bytes);
        self.transport()?.write_all(bytes)
    }

    /// Bytes waiting in the input buffer
    pub fn bytes_available(&mut self) -> Result<u32> {
        self.transport()?.bytes_to_read()
    }

    /// Read exactly `n` bytes, failing once a read hits the port timeout
    pub fn read_exact(&mut self, n: usize) -> Result<Vec<u8>> {
        let transport = self.transport()?;
        let mut buf = vec![0u8; n];
        let mut received = 0;

        while received < n {
            match transport.read(&mut buf[received..]) {
                Ok(0) => return Err(Mpc325Error::Timeout { expected: n, received }),
                Ok(count) => received += count,
                Err(e) if e.kind() == ErrorKind::TimedOut => {
                    return Err(Mpc325Error::Timeout { expected: n, received });
                }
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => return Err(e.into()),
            }
        }

        debug!("RX {:02X?}", buf);
        Ok(buf)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}
