// Serial link to the PWM bridge board that generates the four wheel signals
//
// Packet format: [0xFF, 0xFF, ID, Length, Instruction, Params..., Checksum]
// Length counts instruction + params + checksum; checksum = !sum(ID..params).
// Only Ping is answered, with [0xFF, 0xFF, ID, 0x02, Status, Checksum];
// status 0 is healthy. Duty writes are never acknowledged.

use serialport::{self, SerialPort};
use std::io::{Read, Write};
use std::time::Duration;
use tracing::debug;

use super::kinematics::WheelDuties;

pub const DEFAULT_BAUDRATE: u32 = 115_200;
pub const DEFAULT_TIMEOUT_MS: u64 = 100;

/// Bridge board address on the link
pub const BRIDGE_ID: u8 = 0x01;

const HEADER: [u8; 2] = [0xFF, 0xFF];
const STATUS_REPLY_LEN: usize = 6;

/// Instruction set
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
pub enum Instruction {
    Ping = 0x01,
    /// Params: [front_left, front_right, rear_left, rear_right]
    WriteDuties = 0x03,
}

/// Error types for bridge communication
#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("Serial port error: {0}")]
    Serial(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid response from bridge: {0}")]
    InvalidResponse(String),

    #[error("Checksum mismatch in bridge response")]
    ChecksumMismatch,

    #[error("Bridge returned error status: 0x{0:02X}")]
    Status(u8),

    #[error("Timeout waiting for bridge response")]
    Timeout,
}

pub type Result<T> = std::result::Result<T, BridgeError>;

/// PWM bridge connection
pub struct PwmBridge {
    port: Box<dyn SerialPort>,
}

impl PwmBridge {
    pub fn open(port_name: &str) -> Result<Self> {
        Self::open_with_baudrate(port_name, DEFAULT_BAUDRATE)
    }

    pub fn open_with_baudrate(port_name: &str, baudrate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baudrate)
            .timeout(Duration::from_millis(DEFAULT_TIMEOUT_MS))
            .open()?;

        Ok(Self { port })
    }

    /// Checksum over everything after the header
    fn checksum(data: &[u8]) -> u8 {
        !data.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    fn build_packet(instruction: Instruction, params: &[u8]) -> Vec<u8> {
        let length = params.len() as u8 + 2;
        let mut packet = HEADER.to_vec();
        packet.extend_from_slice(&[BRIDGE_ID, length, instruction as u8]);
        packet.extend_from_slice(params);
        packet.push(Self::checksum(&packet[2..]));
        packet
    }

    fn send(&mut self, instruction: Instruction, params: &[u8]) -> Result<()> {
        let packet = Self::build_packet(instruction, params);
        self.port.write_all(&packet)?;
        self.port.flush()?;
        Ok(())
    }

    /// Validate a status reply
    fn parse_status(reply: &[u8; STATUS_REPLY_LEN]) -> Result<()> {
        let [h0, h1, id, length, status, checksum] = *reply;
        if [h0, h1] != HEADER || id != BRIDGE_ID || length != 2 {
            return Err(BridgeError::InvalidResponse(format!("{:02X?}", reply)));
        }
        if Self::checksum(&reply[2..5]) != checksum {
            return Err(BridgeError::ChecksumMismatch);
        }
        match status {
            0 => Ok(()),
            code => Err(BridgeError::Status(code)),
        }
    }

    /// Check that the bridge answers
    pub fn ping(&mut self) -> Result<bool> {
        self.send(Instruction::Ping, &[])?;

        let mut reply = [0u8; STATUS_REPLY_LEN];
        match self.port.read_exact(&mut reply) {
            Ok(()) => Self::parse_status(&reply).map(|()| true),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Fire-and-forget duty update; the bridge doesn't acknowledge writes
    pub fn write_duties(&mut self, duties: WheelDuties) -> Result<()> {
        debug!("Write duties {:?}", duties.as_array());
        self.send(Instruction::WriteDuties, &duties.as_array())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum() {
        // ~(1 + 6 + 3 + 125 + 125 + 125 + 125) = ~510 = 0x01 (low byte of !0x01FE)
        let data = [1u8, 6, 0x03, 125, 125, 125, 125];
        assert_eq!(PwmBridge::checksum(&data), 0x01);
    }

    #[test]
    fn test_build_ping_packet() {
        let packet = PwmBridge::build_packet(Instruction::Ping, &[]);
        assert_eq!(packet, vec![0xFF, 0xFF, 0x01, 0x02, 0x01, 0xFB]);
    }

    #[test]
    fn test_build_duty_packet() {
        let duties = WheelDuties::new(255, 0, 190, 60);
        let packet = PwmBridge::build_packet(Instruction::WriteDuties, &duties.as_array());
        assert_eq!(packet.len(), 10);
        assert_eq!(&packet[..5], &[0xFF, 0xFF, BRIDGE_ID, 6, 0x03]);
        assert_eq!(&packet[5..9], &[255, 0, 190, 60]);
        assert_eq!(packet[9], PwmBridge::checksum(&packet[2..9]));
    }

    #[test]
    fn test_status_reply() {
        // ~(1 + 2 + 0) = 0xFC
        assert!(PwmBridge::parse_status(&[0xFF, 0xFF, 0x01, 0x02, 0x00, 0xFC]).is_ok());

        let fault = [0xFF, 0xFF, 0x01, 0x02, 0x20, !0x23];
        assert!(matches!(PwmBridge::parse_status(&fault), Err(BridgeError::Status(0x20))));

        let corrupt = [0xFF, 0xFF, 0x01, 0x02, 0x00, 0xFD];
        assert!(matches!(PwmBridge::parse_status(&corrupt), Err(BridgeError::ChecksumMismatch)));

        let stranger = [0xFF, 0xFF, 0x05, 0x02, 0x00, !0x07];
        assert!(matches!(PwmBridge::parse_status(&stranger), Err(BridgeError::InvalidResponse(_))));
    }
}
