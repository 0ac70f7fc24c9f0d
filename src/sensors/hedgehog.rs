// Hedgehog positioning beacon datagram decoder
//
// Frame format (little-endian fields):
// [0xFF, 0x47, ID_lo, ID_hi, Size, Payload..., CRC_lo, CRC_hi]
// CRC-16/Modbus over the whole frame; a frame that includes its own CRC
// leaves a zero remainder.

use serde::Serialize;
use tracing::debug;

use super::{ByteSource, Result, le_i16, le_i32, le_u32, le_u64};

/// Frame sync bytes
const SYNC_1: u8 = 0xFF;
const SYNC_2: u8 = 0x47;

/// Reassembly buffer size (largest frame is 43 bytes)
pub const BUF_SIZE: usize = 80;

/// Header (5 bytes) + CRC (2 bytes)
const FRAME_OVERHEAD: usize = 7;

/// Datagram types understood by the decoder
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DatagramId {
    Position = 0x0001,
    RawImu = 0x0003,
    PositionHighRes = 0x0011,
    NtPositionHighRes = 0x0081,
    NtRawImu = 0x0083,
}

impl DatagramId {
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0x0001 => Some(Self::Position),
            0x0003 => Some(Self::RawImu),
            0x0011 => Some(Self::PositionHighRes),
            0x0081 => Some(Self::NtPositionHighRes),
            0x0083 => Some(Self::NtRawImu),
            _ => None,
        }
    }

    /// Payload size the Size byte must carry for this datagram
    pub fn payload_size(self) -> u8 {
        match self {
            Self::Position => 0x10,
            Self::PositionHighRes | Self::NtPositionHighRes => 0x16,
            Self::RawImu => 0x20,
            Self::NtRawImu => 0x24,
        }
    }
}

/// Beacon position in millimeters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub timestamp: u64,
}

/// Raw accelerometer/gyro sample
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ImuSample {
    pub acc: [i16; 3],
    pub gyro: [i16; 3],
    pub timestamp: u64,
}

/// One decoded datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TelemetryFrame {
    PositionCm(Position),
    PositionMmHighRes(Position),
    RawImu(ImuSample),
}

/// CRC-16/Modbus (reflected polynomial 0xA001, init 0xFFFF)
pub fn crc16(data: &[u8]) -> u16 {
    let mut crc: u16 = 0xFFFF;
    for &byte in data {
        crc ^= byte as u16;
        for _ in 0..8 {
            if crc & 1 == 1 {
                crc = (crc >> 1) ^ 0xA001;
            } else {
                crc >>= 1;
            }
        }
    }
    crc
}

/// Byte-at-a-time frame reassembler
pub struct HedgehogDecoder {
    buf: [u8; BUF_SIZE],
    len: usize,
    id: Option<DatagramId>,
}

impl Default for HedgehogDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl HedgehogDecoder {
    pub fn new() -> Self {
        Self {
            buf: [0; BUF_SIZE],
            len: 0,
            id: None,
        }
    }

    fn reset(&mut self) {
        self.len = 0;
        self.id = None;
    }

    /// Feed one byte; returns a frame when a checksum-valid datagram completes
    pub fn feed(&mut self, byte: u8) -> Option<TelemetryFrame> {
        if self.len >= BUF_SIZE {
            self.reset();
        }

        if !self.accepts(byte) {
            self.reset();
            // The rejected byte may itself start the next frame
            if byte == SYNC_1 {
                self.buf[0] = byte;
                self.len = 1;
            }
            return None;
        }

        self.buf[self.len] = byte;
        self.len += 1;

        if self.len > 5 && self.len == FRAME_OVERHEAD + self.buf[4] as usize {
            let frame = self.decode();
            self.reset();
            return frame;
        }
        None
    }

    /// Position-specific validity check for the next byte
    fn accepts(&mut self, byte: u8) -> bool {
        match self.len {
            0 => byte == SYNC_1,
            1 => byte == SYNC_2,
            2 => true,
            3 => {
                self.id = DatagramId::from_u16(u16::from_le_bytes([self.buf[2], byte]));
                self.id.is_some()
            }
            4 => self.id.is_some_and(|id| id.payload_size() == byte),
            _ => true,
        }
    }

    fn decode(&self) -> Option<TelemetryFrame> {
        let frame = &self.buf[..self.len];
        if crc16(frame) != 0 {
            debug!("Hedgehog checksum mismatch, dropping {} bytes", frame.len());
            return None;
        }

        let decoded = match self.id? {
            DatagramId::Position => TelemetryFrame::PositionCm(Position {
                x: 10 * le_i16(frame, 9) as i32,
                y: 10 * le_i16(frame, 11) as i32,
                z: 10 * le_i16(frame, 13) as i32,
                timestamp: le_u32(frame, 5) as u64,
            }),
            DatagramId::PositionHighRes => TelemetryFrame::PositionMmHighRes(Position {
                x: le_i32(frame, 9),
                y: le_i32(frame, 13),
                z: le_i32(frame, 17),
                timestamp: le_u32(frame, 5) as u64,
            }),
            DatagramId::NtPositionHighRes => TelemetryFrame::PositionMmHighRes(Position {
                x: le_i32(frame, 13),
                y: le_i32(frame, 17),
                z: le_i32(frame, 21),
                timestamp: le_u64(frame, 5),
            }),
            id @ (DatagramId::RawImu | DatagramId::NtRawImu) => {
                let timestamp = if id == DatagramId::RawImu {
                    le_u32(frame, 29) as u64
                } else {
                    le_u64(frame, 29)
                };
                TelemetryFrame::RawImu(ImuSample {
                    acc: [le_i16(frame, 5), le_i16(frame, 7), le_i16(frame, 9)],
                    gyro: [le_i16(frame, 11), le_i16(frame, 13), le_i16(frame, 15)],
                    timestamp,
                })
            }
        };
        debug!("Hedgehog frame: {:?}", decoded);
        Some(decoded)
    }
}

/// Beacon receiver: byte source plus decoder, drained in bounded polls
pub struct Hedgehog {
    source: Box<dyn ByteSource>,
    decoder: HedgehogDecoder,
    budget: usize,
}

impl Hedgehog {
    pub fn new(source: Box<dyn ByteSource>, budget: usize) -> Self {
        Self {
            source,
            decoder: HedgehogDecoder::new(),
            budget,
        }
    }

    /// Read at most `budget` pending bytes and return every frame they complete.
    /// Bytes beyond the budget stay in the source for the next poll.
    pub fn poll(&mut self) -> Result<Vec<TelemetryFrame>> {
        let mut buf = vec![0u8; self.budget];
        let n = self.source.read_available(&mut buf)?;
        Ok(buf[..n]
            .iter()
            .filter_map(|&b| self.decoder.feed(b))
            .collect())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::collections::VecDeque;

    /// Build a valid frame around `payload`
    pub(crate) fn encode(id: u16, payload: &[u8]) -> Vec<u8> {
        let mut frame = vec![SYNC_1, SYNC_2];
        frame.extend_from_slice(&id.to_le_bytes());
        frame.push(payload.len() as u8);
        frame.extend_from_slice(payload);
        let crc = crc16(&frame);
        frame.extend_from_slice(&crc.to_le_bytes());
        frame
    }

    pub(crate) fn position_cm_frame(x_cm: i16, y_cm: i16, z_cm: i16, timestamp: u32) -> Vec<u8> {
        let mut payload = Vec::new();
        payload.extend_from_slice(&timestamp.to_le_bytes());
        payload.extend_from_slice(&x_cm.to_le_bytes());
        payload.extend_from_slice(&y_cm.to_le_bytes());
        payload.extend_from_slice(&z_cm.to_le_bytes());
        payload.resize(0x10, 0);
        encode(0x0001, &payload)
    }

    fn feed_all(decoder: &mut HedgehogDecoder, bytes: &[u8]) -> Vec<TelemetryFrame> {
        bytes.iter().filter_map(|&b| decoder.feed(b)).collect()
    }

    #[test]
    fn test_crc16_modbus_check_value() {
        // Standard CRC-16/MODBUS check value
        assert_eq!(crc16(b"123456789"), 0x4B37);
    }

    #[test]
    fn test_position_cm_scaled_to_mm() {
        let mut decoder = HedgehogDecoder::new();
        let frames = feed_all(&mut decoder, &position_cm_frame(-123, 45, 7, 1000));
        assert_eq!(
            frames,
            vec![TelemetryFrame::PositionCm(Position {
                x: -1230,
                y: 450,
                z: 70,
                timestamp: 1000
            })]
        );
    }

    #[test]
    fn test_position_highres() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&77u32.to_le_bytes());
        payload.extend_from_slice(&(-250_000i32).to_le_bytes());
        payload.extend_from_slice(&1234i32.to_le_bytes());
        payload.extend_from_slice(&(-5i32).to_le_bytes());
        payload.resize(0x16, 0);

        let mut decoder = HedgehogDecoder::new();
        let frames = feed_all(&mut decoder, &encode(0x0011, &payload));
        assert_eq!(
            frames,
            vec![TelemetryFrame::PositionMmHighRes(Position {
                x: -250_000,
                y: 1234,
                z: -5,
                timestamp: 77
            })]
        );
    }

    #[test]
    fn test_nt_position_highres_uses_wide_timestamp() {
        let mut payload = Vec::new();
        payload.extend_from_slice(&0x0102_0304_0506_0708u64.to_le_bytes());
        payload.extend_from_slice(&1500i32.to_le_bytes());
        payload.extend_from_slice(&(-800i32).to_le_bytes());
        payload.extend_from_slice(&20i32.to_le_bytes());
        payload.resize(0x16, 0);

        let mut decoder = HedgehogDecoder::new();
        let frames = feed_all(&mut decoder, &encode(0x0081, &payload));
        assert_eq!(
            frames,
            vec![TelemetryFrame::PositionMmHighRes(Position {
                x: 1500,
                y: -800,
                z: 20,
                timestamp: 0x0102_0304_0506_0708
            })]
        );
    }

    fn imu_payload(size: usize) -> Vec<u8> {
        let mut payload = Vec::new();
        for v in [100i16, -200, 300, -4, 5, -6] {
            payload.extend_from_slice(&v.to_le_bytes());
        }
        payload.resize(24, 0);
        payload.extend_from_slice(&0x0000_0001_2345_6789u64.to_le_bytes());
        payload.resize(size, 0);
        payload
    }

    #[test]
    fn test_raw_imu_32bit_timestamp() {
        let mut decoder = HedgehogDecoder::new();
        let frames = feed_all(&mut decoder, &encode(0x0003, &imu_payload(0x20)));
        assert_eq!(
            frames,
            vec![TelemetryFrame::RawImu(ImuSample {
                acc: [100, -200, 300],
                gyro: [-4, 5, -6],
                timestamp: 0x2345_6789,
            })]
        );
    }

    #[test]
    fn test_nt_raw_imu_64bit_timestamp() {
        let mut decoder = HedgehogDecoder::new();
        let frames = feed_all(&mut decoder, &encode(0x0083, &imu_payload(0x24)));
        assert_eq!(
            frames,
            vec![TelemetryFrame::RawImu(ImuSample {
                acc: [100, -200, 300],
                gyro: [-4, 5, -6],
                timestamp: 0x0000_0001_2345_6789,
            })]
        );
    }

    #[test]
    fn test_single_bit_flip_rejected() {
        let frame = position_cm_frame(150, -20, 3, 42);
        for byte in 0..frame.len() {
            for bit in 0..8 {
                let mut corrupted = frame.clone();
                corrupted[byte] ^= 1 << bit;
                let mut decoder = HedgehogDecoder::new();
                assert!(
                    feed_all(&mut decoder, &corrupted).is_empty(),
                    "flip of byte {} bit {} was accepted",
                    byte,
                    bit
                );
            }
        }
    }

    #[test]
    fn test_resync_after_garbage() {
        let mut stream = vec![0x00, 0x47, 0xFF, 0x12, 0xFF, 0xFF];
        stream.extend(position_cm_frame(1, 2, 3, 4));
        let mut decoder = HedgehogDecoder::new();
        assert_eq!(feed_all(&mut decoder, &stream).len(), 1);
    }

    #[test]
    fn test_size_mismatch_aborts_frame() {
        let mut bad = position_cm_frame(1, 2, 3, 4);
        bad[4] = 0x11;
        let mut stream = bad;
        stream.extend(position_cm_frame(5, 6, 7, 8));

        let mut decoder = HedgehogDecoder::new();
        let frames = feed_all(&mut decoder, &stream);
        assert_eq!(frames.len(), 1);
        match frames[0] {
            TelemetryFrame::PositionCm(p) => assert_eq!(p.x, 50),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    #[test]
    fn test_unknown_datagram_ignored() {
        let mut stream = encode(0x0002, &[0u8; 0x10]);
        stream.extend(position_cm_frame(9, 9, 9, 9));
        let mut decoder = HedgehogDecoder::new();
        assert_eq!(feed_all(&mut decoder, &stream).len(), 1);
    }

    #[test]
    fn test_poll_respects_byte_budget() {
        let mut bytes = VecDeque::new();
        bytes.extend(position_cm_frame(1, 0, 0, 1));
        bytes.extend(position_cm_frame(2, 0, 0, 2));

        // One frame is 23 bytes; a 30 byte budget completes only the first
        let mut hedgehog = Hedgehog::new(Box::new(bytes), 30);
        assert_eq!(hedgehog.poll().unwrap().len(), 1);
        assert_eq!(hedgehog.poll().unwrap().len(), 1);
        assert!(hedgehog.poll().unwrap().is_empty());
    }
}
