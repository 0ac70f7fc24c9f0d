// Sensor drivers for the navigation stack
//
// Provides:
// - Hedgehog positioning beacon datagram decoder
// - Rotating proximity scanner frame decoder
// - Magnetometer heading driver
// - Non-blocking byte sources (serial port or in-memory)

pub mod hedgehog;
pub mod lidar;
pub mod magnetometer;

use std::collections::VecDeque;
use std::io::Read;
use std::time::Duration;

use serialport::SerialPort;
use tracing::info;

pub use hedgehog::{Hedgehog, HedgehogDecoder, Position, TelemetryFrame};
pub use lidar::{Lidar, LidarDecoder, ScanFrame};
pub use magnetometer::{Compass, Lis2mdl, MagneticField, MagneticSensor, Offsets};

/// Error types for sensor communication
#[derive(Debug, thiserror::Error)]
pub enum SensorError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I2C error: {0}")]
    I2c(String),

    #[error("Sensor not responding (id register 0x{0:02X})")]
    NotResponding(u8),
}

pub type Result<T> = std::result::Result<T, SensorError>;

/// A byte stream that can be drained without blocking
pub trait ByteSource: Send {
    /// Copy up to `buf.len()` already-received bytes into `buf`.
    /// Returns 0 when nothing is pending.
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize>;
}

impl ByteSource for VecDeque<u8> {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = buf.len().min(self.len());
        for (slot, byte) in buf.iter_mut().zip(self.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

/// Serial port wrapper that only reads what the driver has already buffered
pub struct SerialSource {
    port: Box<dyn SerialPort>,
}

impl SerialSource {
    pub fn open(port_name: &str, baudrate: u32) -> Result<Self> {
        info!("Opening {} at {} baud", port_name, baudrate);
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(10))
            .open()?;
        Ok(Self { port })
    }
}

impl ByteSource for SerialSource {
    fn read_available(&mut self, buf: &mut [u8]) -> Result<usize> {
        let pending = self.port.bytes_to_read()? as usize;
        let n = pending.min(buf.len());
        if n == 0 {
            return Ok(0);
        }
        Ok(self.port.read(&mut buf[..n])?)
    }
}

/// Little-endian field readers used by the decoders
pub(crate) fn le_u16(buf: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn le_i16(buf: &[u8], at: usize) -> i16 {
    i16::from_le_bytes([buf[at], buf[at + 1]])
}

pub(crate) fn le_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn le_i32(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

pub(crate) fn le_u64(buf: &[u8], at: usize) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&buf[at..at + 8]);
    u64::from_le_bytes(bytes)
}
