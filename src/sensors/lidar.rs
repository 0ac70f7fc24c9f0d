// Rotating proximity scanner (LD06-style) frame decoder
//
// Fixed 47-byte frame, little-endian fields:
// [0x54, 0x2C, speed(2), start_angle(2), 12 x (distance(2), intensity(1)),
//  end_angle(2), timestamp(2), crc8]
// Angles are in hundredths of a degree. CRC-8 covers every byte before it.

use tracing::debug;

use super::{ByteSource, Result, le_u16};
use crate::config::{OBSTACLE_MIN_VALID, OBSTACLE_THRESHOLD};

const HEADER: u8 = 0x54;
const VER_LEN: u8 = 0x2C;

pub const FRAME_LEN: usize = 47;
pub const POINTS_PER_FRAME: usize = 12;

/// CRC-8 lookup table, polynomial 0x4D, MSB first
const CRC_TABLE: [u8; 256] = build_crc_table();

const fn build_crc_table() -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = i as u8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x80 != 0 {
                (crc << 1) ^ 0x4D
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

pub fn crc8(data: &[u8]) -> u8 {
    data.iter()
        .fold(0u8, |crc, &b| CRC_TABLE[(crc ^ b) as usize])
}

/// One range sample; distance 0 means no return
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanPoint {
    pub distance: u16,
    pub intensity: u8,
}

/// Distance window that counts as an obstacle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProximityLimits {
    /// Returns closer than this are obstacles
    pub threshold: u16,
    /// Returns at or below this are near-field noise
    pub min_valid: u16,
}

impl Default for ProximityLimits {
    fn default() -> Self {
        Self {
            threshold: OBSTACLE_THRESHOLD,
            min_valid: OBSTACLE_MIN_VALID,
        }
    }
}

/// One decoded 12-point scan slice
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScanFrame {
    pub speed: u16,
    pub start_angle: u16,
    pub end_angle: u16,
    pub timestamp: u16,
    pub points: [ScanPoint; POINTS_PER_FRAME],
}

impl ScanFrame {
    pub fn start_angle_deg(&self) -> f32 {
        self.start_angle as f32 / 100.0
    }

    pub fn end_angle_deg(&self) -> f32 {
        self.end_angle as f32 / 100.0
    }

    /// True if any real return lies strictly between the noise floor and the threshold
    pub fn too_close(&self, limits: ProximityLimits) -> bool {
        self.points.iter().any(|p| {
            p.distance != 0 && p.distance > limits.min_valid && p.distance < limits.threshold
        })
    }

    fn parse(buf: &[u8; FRAME_LEN]) -> Self {
        let mut points = [ScanPoint::default(); POINTS_PER_FRAME];
        for (i, point) in points.iter_mut().enumerate() {
            let base = 6 + i * 3;
            *point = ScanPoint {
                distance: le_u16(buf, base),
                intensity: buf[base + 2],
            };
        }
        Self {
            speed: le_u16(buf, 2),
            start_angle: le_u16(buf, 4),
            end_angle: le_u16(buf, 42),
            timestamp: le_u16(buf, 44),
            points,
        }
    }
}

/// Byte-at-a-time scanner frame reassembler
pub struct LidarDecoder {
    buf: [u8; FRAME_LEN],
    len: usize,
}

impl Default for LidarDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl LidarDecoder {
    pub fn new() -> Self {
        Self {
            buf: [0; FRAME_LEN],
            len: 0,
        }
    }

    pub fn feed(&mut self, byte: u8) -> Option<ScanFrame> {
        let good = match self.len {
            0 => byte == HEADER,
            1 => byte == VER_LEN,
            _ => true,
        };
        if !good {
            self.len = 0;
            if byte == HEADER {
                self.buf[0] = byte;
                self.len = 1;
            }
            return None;
        }

        self.buf[self.len] = byte;
        self.len += 1;
        if self.len < FRAME_LEN {
            return None;
        }

        self.len = 0;
        let expected = crc8(&self.buf[..FRAME_LEN - 1]);
        if expected != self.buf[FRAME_LEN - 1] {
            debug!(
                "Scanner CRC mismatch: expected 0x{:02X}, got 0x{:02X}",
                expected,
                self.buf[FRAME_LEN - 1]
            );
            return None;
        }
        Some(ScanFrame::parse(&self.buf))
    }
}

/// Scanner: byte source plus decoder, drained in bounded polls
pub struct Lidar {
    source: Box<dyn ByteSource>,
    decoder: LidarDecoder,
    budget: usize,
}

impl Lidar {
    pub fn new(source: Box<dyn ByteSource>, budget: usize) -> Self {
        Self {
            source,
            decoder: LidarDecoder::new(),
            budget,
        }
    }

    pub fn poll(&mut self) -> Result<Vec<ScanFrame>> {
        let mut buf = vec![0u8; self.budget];
        let n = self.source.read_available(&mut buf)?;
        Ok(buf[..n]
            .iter()
            .filter_map(|&b| self.decoder.feed(b))
            .collect())
    }
}
