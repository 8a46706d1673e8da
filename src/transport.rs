//! Host side adapters for the byte transport and the transmit-enable line.

use embedded_hal::digital::v2::OutputPin;
use embedded_hal::serial;
use serialport::SerialPort;
use std::collections::VecDeque;
use std::convert::Infallible;
use std::io::{self, Read, Write};

const READ_CHUNK: usize = 256;

/// `serialport` handle exposed through the embedded-hal serial traits.
///
/// Reads report `WouldBlock` once every byte the driver holds has been
/// consumed, so one drain of [`serial::Read`] is one receive batch.
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    rx: VecDeque<u8>,
    tx: Vec<u8>,
}

impl SerialTransport {
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self {
            port,
            rx: VecDeque::with_capacity(READ_CHUNK),
            tx: Vec::with_capacity(64),
        }
    }

    /// Opens `path` at `baud`, 8N1, with reads that never wait.
    pub fn open(path: &str, baud: u32) -> anyhow::Result<Self> {
        let port = serialport::new(path, baud)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .timeout(std::time::Duration::from_millis(0))
            .open()?;
        Ok(Self::new(port))
    }

    pub fn port(&self) -> &dyn SerialPort {
        self.port.as_ref()
    }

    fn fill(&mut self) -> io::Result<()> {
        let available = self.port.bytes_to_read()? as usize;
        if available == 0 {
            return Ok(());
        }
        let mut chunk = [0u8; READ_CHUNK];
        let len = available.min(READ_CHUNK);
        match self.port.read(&mut chunk[..len]) {
            Ok(read) => {
                self.rx.extend(&chunk[..read]);
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::TimedOut => Ok(()),
            Err(e) => Err(e),
        }
    }
}

impl serial::Read<u8> for SerialTransport {
    type Error = io::Error;

    fn read(&mut self) -> nb::Result<u8, Self::Error> {
        if self.rx.is_empty() {
            self.fill().map_err(nb::Error::Other)?;
        }
        self.rx.pop_front().ok_or(nb::Error::WouldBlock)
    }
}

impl serial::Write<u8> for SerialTransport {
    type Error = io::Error;

    fn write(&mut self, word: u8) -> nb::Result<(), Self::Error> {
        self.tx.push(word);
        Ok(())
    }

    /// Returns once the last byte has left the transmitter.
    fn flush(&mut self) -> nb::Result<(), Self::Error> {
        if !self.tx.is_empty() {
            self.port.write_all(&self.tx).map_err(nb::Error::Other)?;
            self.tx.clear();
        }
        self.port.flush().map_err(nb::Error::Other)
    }
}

/// For transceivers that switch direction on their own.
#[derive(Debug, Default, Clone, Copy)]
pub struct AutoDirection;

impl OutputPin for AutoDirection {
    type Error = Infallible;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        Ok(())
    }
}

/// Drives the transmit-enable input of an RS485 driver from the RTS line.
pub struct RtsDirection {
    port: Box<dyn SerialPort>,
}

impl RtsDirection {
    /// `port` is usually a `try_clone` of the transport's handle.
    pub fn new(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl OutputPin for RtsDirection {
    type Error = serialport::Error;

    fn set_low(&mut self) -> Result<(), Self::Error> {
        self.port.write_request_to_send(false)
    }

    fn set_high(&mut self) -> Result<(), Self::Error> {
        self.port.write_request_to_send(true)
    }
}
