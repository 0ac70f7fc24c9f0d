// Message types crossing the runtime boundary
//
// Inbound: command frames from the operator console. Two mutually exclusive
// wire formats exist; the runtime is started with exactly one of them.
//   binary: [command ID][payload...], multi-byte fields big-endian
//   text:   "Speed 50", "Moving 180", "stop"
// Outbound: wheel duties and a status snapshot, both JSON.

use serde::Serialize;

use crate::config::CommandProfile;
use crate::sensors::Position;

/// Tunings travel as fixed-point ×1000
const TUNING_SCALE: f32 = 1000.0;

/// Move angle the console sends for rotate-in-place
pub const NO_TRANSLATION: i16 = 365;

/// Command IDs of the binary profile
pub mod id {
    pub const SET_HEADING: u8 = 2;
    pub const HEADING_PID: u8 = 3;
    pub const SET_SPEED: u8 = 4;
    pub const MOVE: u8 = 5;
    pub const STOP: u8 = 6;
    pub const EMERGENCY_STOP: u8 = 7;
    pub const ACTIVATE: u8 = 8;
    pub const CALIBRATE_MAGNETOMETER: u8 = 9;
    pub const TOGGLE_YAW_COMPENSATION: u8 = 10;
    pub const CALIBRATE_BEACON: u8 = 11;
    pub const GOTO: u8 = 12;
    pub const BEACON_PID: u8 = 13;
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum CommandError {
    #[error("Empty command")]
    Empty,

    #[error("Unknown command ID {0}")]
    UnknownId(u8),

    #[error("Command {id} needs {expected} payload bytes, got {actual}")]
    Truncated { id: u8, expected: usize, actual: usize },

    #[error("Unrecognized text command: {0:?}")]
    UnknownText(String),

    #[error("Text command is not valid UTF-8")]
    NotUtf8,
}

/// Operator command
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Command {
    /// Heading-hold target in degrees
    SetHeading(i16),
    HeadingTunings { kp: f32, ki: f32, kd: f32 },
    /// Normalized speed 0..=100
    SetSpeed(i16),
    /// Travel angle in degrees (outside 0..360 = no translation) and turn rate
    Move { angle: i16, turn: i8 },
    Stop,
    EmergencyStop,
    Activate,
    CalibrateMagnetometer,
    ToggleYawCompensation,
    CalibrateBeacon,
    /// Beacon-frame target in millimeters
    GoTo { x: i16, y: i16 },
    BeaconTunings { kp: f32, ki: f32, kd: f32 },
}

fn be_i16(bytes: &[u8], at: usize) -> i16 {
    i16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn tuning(bytes: &[u8], at: usize) -> f32 {
    be_i16(bytes, at) as f32 / TUNING_SCALE
}

fn encode_tuning(value: f32) -> [u8; 2] {
    ((value * TUNING_SCALE).round() as i16).to_be_bytes()
}

impl Command {
    /// Decode a frame in the selected wire format
    pub fn decode(profile: CommandProfile, bytes: &[u8]) -> Result<Self, CommandError> {
        match profile {
            CommandProfile::Binary => Self::from_bytes(bytes),
            CommandProfile::Text => {
                let text = std::str::from_utf8(bytes).map_err(|_| CommandError::NotUtf8)?;
                Self::parse_text(text)
            }
        }
    }

    /// Decode a binary command frame
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CommandError> {
        let (&cmd_id, payload) = bytes.split_first().ok_or(CommandError::Empty)?;

        let expected = match cmd_id {
            id::SET_HEADING | id::SET_SPEED => 2,
            id::HEADING_PID | id::BEACON_PID => 6,
            id::MOVE => 3,
            id::GOTO => 4,
            id::STOP
            | id::EMERGENCY_STOP
            | id::ACTIVATE
            | id::CALIBRATE_MAGNETOMETER
            | id::TOGGLE_YAW_COMPENSATION
            | id::CALIBRATE_BEACON => 0,
            other => return Err(CommandError::UnknownId(other)),
        };
        if payload.len() < expected {
            return Err(CommandError::Truncated {
                id: cmd_id,
                expected,
                actual: payload.len(),
            });
        }

        Ok(match cmd_id {
            id::SET_HEADING => Command::SetHeading(be_i16(payload, 0)),
            id::HEADING_PID => Command::HeadingTunings {
                kp: tuning(payload, 0),
                ki: tuning(payload, 2),
                kd: tuning(payload, 4),
            },
            id::SET_SPEED => Command::SetSpeed(be_i16(payload, 0)),
            id::MOVE => Command::Move {
                angle: be_i16(payload, 0),
                turn: payload[2] as i8,
            },
            id::STOP => Command::Stop,
            id::EMERGENCY_STOP => Command::EmergencyStop,
            id::ACTIVATE => Command::Activate,
            id::CALIBRATE_MAGNETOMETER => Command::CalibrateMagnetometer,
            id::TOGGLE_YAW_COMPENSATION => Command::ToggleYawCompensation,
            id::CALIBRATE_BEACON => Command::CalibrateBeacon,
            id::GOTO => Command::GoTo {
                x: be_i16(payload, 0),
                y: be_i16(payload, 2),
            },
            id::BEACON_PID => Command::BeaconTunings {
                kp: tuning(payload, 0),
                ki: tuning(payload, 2),
                kd: tuning(payload, 4),
            },
            _ => unreachable!("command ID validated above"),
        })
    }

    /// Parse a legacy text command
    pub fn parse_text(text: &str) -> Result<Self, CommandError> {
        let unknown = || CommandError::UnknownText(text.to_string());
        let mut words = text.split_whitespace();
        let verb = words.next().ok_or(CommandError::Empty)?;
        let arg = words.next().map(str::parse::<i16>);

        match (verb.to_ascii_lowercase().as_str(), arg) {
            ("stop", None) => Ok(Command::Stop),
            ("speed", Some(Ok(speed))) => Ok(Command::SetSpeed(speed)),
            ("moving", Some(Ok(angle))) => Ok(Command::Move { angle, turn: 0 }),
            _ => Err(unknown()),
        }
    }

    /// Encode as a binary command frame
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(7);
        match *self {
            Command::SetHeading(heading) => {
                out.push(id::SET_HEADING);
                out.extend_from_slice(&heading.to_be_bytes());
            }
            Command::HeadingTunings { kp, ki, kd } => {
                out.push(id::HEADING_PID);
                for gain in [kp, ki, kd] {
                    out.extend_from_slice(&encode_tuning(gain));
                }
            }
            Command::SetSpeed(speed) => {
                out.push(id::SET_SPEED);
                out.extend_from_slice(&speed.to_be_bytes());
            }
            Command::Move { angle, turn } => {
                out.push(id::MOVE);
                out.extend_from_slice(&angle.to_be_bytes());
                out.push(turn as u8);
            }
            Command::Stop => out.push(id::STOP),
            Command::EmergencyStop => out.push(id::EMERGENCY_STOP),
            Command::Activate => out.push(id::ACTIVATE),
            Command::CalibrateMagnetometer => out.push(id::CALIBRATE_MAGNETOMETER),
            Command::ToggleYawCompensation => out.push(id::TOGGLE_YAW_COMPENSATION),
            Command::CalibrateBeacon => out.push(id::CALIBRATE_BEACON),
            Command::GoTo { x, y } => {
                out.push(id::GOTO);
                out.extend_from_slice(&x.to_be_bytes());
                out.extend_from_slice(&y.to_be_bytes());
            }
            Command::BeaconTunings { kp, ki, kd } => {
                out.push(id::BEACON_PID);
                for gain in [kp, ki, kd] {
                    out.extend_from_slice(&encode_tuning(gain));
                }
            }
        }
        out
    }
}

/// Orchestrator state
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeState {
    Init,
    Idle,
    Driving,
    EmergencyStopped,
}

/// Snapshot published every tick
#[derive(Debug, Clone, Serialize)]
pub struct Status {
    pub state: RuntimeState,
    pub heading: Option<f32>,
    pub heading_target: f32,
    pub position: Option<Position>,
    pub too_close: bool,
    pub yaw_compensation: bool,
    pub calibrating: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_heading_big_endian() {
        // 270 = 0x010E, high byte first
        let cmd = Command::from_bytes(&[2, 0x01, 0x0E]).unwrap();
        assert_eq!(cmd, Command::SetHeading(270));
    }

    #[test]
    fn test_decode_move_with_negative_turn() {
        // angle 365 = rotate only, turn -1
        let cmd = Command::from_bytes(&[5, 0x01, 0x6D, 0xFF]).unwrap();
        assert_eq!(cmd, Command::Move { angle: 365, turn: -1 });
    }

    #[test]
    fn test_decode_tunings_fixed_point() {
        // kp = 1.5, ki = 0.025, kd = -0.2
        let cmd = Command::from_bytes(&[3, 0x05, 0xDC, 0x00, 0x19, 0xFF, 0x38]).unwrap();
        match cmd {
            Command::HeadingTunings { kp, ki, kd } => {
                assert!((kp - 1.5).abs() < 1e-6);
                assert!((ki - 0.025).abs() < 1e-6);
                assert!((kd + 0.2).abs() < 1e-6);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_decode_goto() {
        let cmd = Command::from_bytes(&[12, 0xFF, 0x38, 0x03, 0xE8]).unwrap();
        assert_eq!(cmd, Command::GoTo { x: -200, y: 1000 });
    }

    #[test]
    fn test_decode_single_byte_commands() {
        assert_eq!(Command::from_bytes(&[6]).unwrap(), Command::Stop);
        assert_eq!(Command::from_bytes(&[7]).unwrap(), Command::EmergencyStop);
        assert_eq!(Command::from_bytes(&[8]).unwrap(), Command::Activate);
        assert_eq!(Command::from_bytes(&[9]).unwrap(), Command::CalibrateMagnetometer);
        assert_eq!(Command::from_bytes(&[10]).unwrap(), Command::ToggleYawCompensation);
        assert_eq!(Command::from_bytes(&[11]).unwrap(), Command::CalibrateBeacon);
    }

    #[test]
    fn test_decode_errors() {
        assert_eq!(Command::from_bytes(&[]), Err(CommandError::Empty));
        assert_eq!(Command::from_bytes(&[42]), Err(CommandError::UnknownId(42)));
        assert_eq!(
            Command::from_bytes(&[4, 0x00]),
            Err(CommandError::Truncated {
                id: 4,
                expected: 2,
                actual: 1
            })
        );
    }

    #[test]
    fn test_encoder_matches_decoder() {
        let commands = [
            Command::SetSpeed(80),
            Command::Move { angle: 315, turn: 1 },
            Command::GoTo { x: 1500, y: -300 },
            Command::BeaconTunings {
                kp: 0.5,
                ki: 0.0,
                kd: 0.125,
            },
            Command::EmergencyStop,
        ];
        for cmd in commands {
            assert_eq!(Command::from_bytes(&cmd.to_bytes()).unwrap(), cmd);
        }
    }

    #[test]
    fn test_text_profile() {
        assert_eq!(Command::parse_text("Speed 50").unwrap(), Command::SetSpeed(50));
        assert_eq!(
            Command::parse_text("Moving 180").unwrap(),
            Command::Move { angle: 180, turn: 0 }
        );
        assert_eq!(Command::parse_text("stop").unwrap(), Command::Stop);
        assert!(Command::parse_text("Speed fast").is_err());
        assert!(Command::parse_text("jump").is_err());
    }

    #[test]
    fn test_profiles_are_exclusive() {
        // A binary stop frame is not a text command, and vice versa
        assert!(Command::decode(CommandProfile::Text, &[6]).is_err());
        assert!(Command::decode(CommandProfile::Binary, b"stop").is_err());
        assert_eq!(
            Command::decode(CommandProfile::Text, b"stop").unwrap(),
            Command::Stop
        );
    }
}
