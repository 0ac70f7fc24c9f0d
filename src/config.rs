// Loop cadence, topics, device defaults and tuning constants
use std::time::Duration;

use clap::{Parser, ValueEnum};

// Runtime loop frequency
pub const LOOP_HZ: u64 = 50;

// Zenoh topics
pub const TOPIC_CMD: &str = "skyrocket/cmd"; // raw command frames
pub const TOPIC_RT_WHEELS: &str = "skyrocket/rt/wheels"; // actuation
pub const TOPIC_STATUS: &str = "skyrocket/state/status"; // state + telemetry

// Serial ports
pub const HEDGEHOG_PORT: &str = "/dev/ttyACM0";
pub const HEDGEHOG_BAUDRATE: u32 = 115_200;
pub const LIDAR_PORT: &str = "/dev/ttyUSB0";
pub const LIDAR_BAUDRATE: u32 = 230_400;
pub const MOTOR_PORT: &str = "/dev/ttyUSB1";

// Magnetometer (LIS2MDL)
pub const I2C_BUS: &str = "/dev/i2c-1";
pub const MAG_I2C_ADDRESS: u8 = 0x1E;
pub const MAG_CALIBRATION_WINDOW: Duration = Duration::from_secs(5);
pub const MAG_CALIBRATION_INTERVAL: Duration = Duration::from_millis(50);

// Per-tick byte budgets so a chatty sensor can't starve the loop
pub const HEDGEHOG_BYTES_PER_POLL: usize = 100;
pub const LIDAR_BYTES_PER_POLL: usize = 512;

// Heading-hold PID
pub const HEADING_KP: f32 = 1.0;
pub const HEADING_KI: f32 = 0.0;
pub const HEADING_KD: f32 = 0.0;
pub const HEADING_TARGET: f32 = 100.0;
pub const HEADING_CORRECTION_LIMIT: f32 = 50.0;

// Distance-to-target PID
pub const BEACON_KP: f32 = 1.0;
pub const BEACON_KI: f32 = 0.0;
pub const BEACON_KD: f32 = 0.0;
pub const BEACON_OUTPUT_MIN: f32 = -125.0;
pub const BEACON_OUTPUT_MAX: f32 = 130.0;
pub const ARRIVAL_TOLERANCE_MM: f32 = 50.0;

// Anti-windup bound shared by both loops
pub const INTEGRAL_LIMIT: f32 = 125.0;

// Drive defaults
pub const DEFAULT_SPEED: u8 = 50;
pub const TURN_GAIN: i32 = 40; // duty units per unit of commanded turn rate

// Proximity scanner
pub const OBSTACLE_THRESHOLD: u16 = 200;
pub const OBSTACLE_MIN_VALID: u16 = 60;
pub const OBSTACLE_HOLD: Duration = Duration::from_millis(200);

/// Wire format accepted on the command topic
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CommandProfile {
    /// Command-ID framed binary messages
    Binary,
    /// Legacy ASCII commands ("Speed 50", "Moving 180", "stop")
    Text,
}

/// Command line overrides for the runtime
#[derive(Debug, Clone, Parser)]
#[command(name = "skyrocket-runtime", about = "Mecanum robot navigation runtime")]
pub struct Args {
    /// Serial port of the positioning beacon receiver
    #[arg(long, default_value = HEDGEHOG_PORT)]
    pub hedgehog_port: String,

    /// Serial port of the proximity scanner (omit to run without it)
    #[arg(long)]
    pub lidar_port: Option<String>,

    /// Serial port of the PWM bridge board
    #[arg(long, default_value = MOTOR_PORT)]
    pub motor_port: String,

    /// I2C bus with the magnetometer
    #[arg(long, default_value = I2C_BUS)]
    pub i2c_bus: String,

    /// Log wheel duties instead of driving the motors
    #[arg(long)]
    pub no_motors: bool,

    /// Command wire format
    #[arg(long, value_enum, default_value_t = CommandProfile::Binary)]
    pub protocol: CommandProfile,

    /// Run a blocking magnetometer calibration for this many seconds before starting
    #[arg(long)]
    pub calibrate_on_start: Option<u64>,
}
