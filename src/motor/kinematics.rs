// Mecanum inverse kinematics for the 4-wheel base
// Converts (travel angle, speed, turn bias) to per-wheel PWM duties.
//
// The motor drivers take a bidirectional duty: DUTY_STOP is no torque,
// above it one direction, below it the other. The right-hand wheels are
// mounted mirrored, so their terms are subtracted from the midpoint.

use std::f32::consts::FRAC_PI_4;

use serde::Serialize;

/// Duty that produces no net force
pub const DUTY_STOP: u8 = 125;
pub const DUTY_MAX: u8 = 255;

/// Normalized speed 0..=100 maps onto this many duty steps
pub const SPEED_DUTY_RANGE: i32 = 185;

/// Signed rotate input ±100 maps onto this duty offset range
const ROTATE_DUTY_MIN: i32 = -125;
const ROTATE_DUTY_MAX: i32 = 130;

/// PWM duties for the four wheels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WheelDuties {
    pub front_left: u8,
    pub front_right: u8,
    pub rear_left: u8,
    pub rear_right: u8,
}

impl Default for WheelDuties {
    fn default() -> Self {
        Self::stopped()
    }
}

impl WheelDuties {
    pub fn new(front_left: u8, front_right: u8, rear_left: u8, rear_right: u8) -> Self {
        Self {
            front_left,
            front_right,
            rear_left,
            rear_right,
        }
    }

    /// All four wheels at the midpoint
    pub fn stopped() -> Self {
        Self::new(DUTY_STOP, DUTY_STOP, DUTY_STOP, DUTY_STOP)
    }

    pub fn is_stopped(&self) -> bool {
        *self == Self::stopped()
    }

    /// Returns duties as array [front_left, front_right, rear_left, rear_right]
    pub fn as_array(&self) -> [u8; 4] {
        [
            self.front_left,
            self.front_right,
            self.rear_left,
            self.rear_right,
        ]
    }
}

/// Integer linear rescale (truncating), same contract as the Arduino `map`
fn map_range(x: i32, in_min: i32, in_max: i32, out_min: i32, out_max: i32) -> i32 {
    (x - in_min) * (out_max - out_min) / (in_max - in_min) + out_min
}

fn to_duty(value: i32) -> u8 {
    value.clamp(0, DUTY_MAX as i32) as u8
}

/// Convert a travel intent into wheel duties
///
/// # Arguments
/// * `angle` - Travel direction in degrees, 0 = forward, 90 = right
/// * `speed` - Normalized speed 0..=100
/// * `turn` - Rotation bias in duty units (positive = clockwise)
///
/// Turning eats into translational speed: |turn| is subtracted from the
/// rescaled speed so hard turns keep rotational authority.
pub fn drive(angle: f32, speed: i32, turn: i32) -> WheelDuties {
    let rad = angle.to_radians() + FRAC_PI_4;

    let speed = map_range(speed, 0, 100, 0, SPEED_DUTY_RANGE);
    let speed = (speed - turn.abs()).clamp(0, SPEED_DUTY_RANGE) as f32;
    let turn = turn as f32;

    let v1 = (speed * rad.sin() + turn) as i32;
    let v2 = (speed * rad.cos() - turn) as i32;
    let v3 = (speed * rad.cos() + turn) as i32;
    let v4 = (speed * rad.sin() - turn) as i32;

    let base = DUTY_STOP as i32;
    WheelDuties {
        front_left: to_duty(base + v1),
        front_right: to_duty(base - v2),
        rear_left: to_duty(base + v3),
        rear_right: to_duty(base - v4),
    }
}

/// Rotate in place: every wheel gets the same duty
///
/// `speed` is signed ±100 (positive = clockwise).
pub fn rotate(speed: i32) -> WheelDuties {
    let offset = map_range(
        speed.clamp(-100, 100),
        -100,
        100,
        ROTATE_DUTY_MIN,
        ROTATE_DUTY_MAX,
    );
    let duty = to_duty(DUTY_STOP as i32 + offset);
    WheelDuties::new(duty, duty, duty, duty)
}

/// No net force on any wheel
pub fn stop() -> WheelDuties {
    WheelDuties::stopped()
}
