// Motor control module for the mecanum base
//
// Provides:
// - Mecanum inverse kinematics (travel intent -> wheel duties)
// - PWM bridge serial protocol
// - High-level motor driver API

pub mod bridge;
mod driver;
pub mod kinematics;

pub use bridge::{BridgeError, PwmBridge};
pub use driver::MotorDriver;
pub use kinematics::{DUTY_STOP, WheelDuties, drive, rotate, stop};
