// High-level wheel driver for the mecanum base
//
// Combines kinematics and the PWM bridge link to provide a simple API
// for commanding the four wheels. Without a bridge it only logs.

use tracing::{debug, info, warn};

use super::bridge::{BridgeError, PwmBridge};
use super::kinematics::{self, WheelDuties};

pub struct MotorDriver {
    bridge: Option<PwmBridge>,
    last: WheelDuties,
}

impl MotorDriver {
    /// Connect to the PWM bridge on the given serial port
    pub fn new(port: &str) -> Result<Self, BridgeError> {
        info!("Opening PWM bridge on {}", port);
        let bridge = PwmBridge::open(port)?;
        Ok(Self {
            bridge: Some(bridge),
            last: WheelDuties::stopped(),
        })
    }

    /// Driver that logs duties instead of sending them
    pub fn simulated() -> Self {
        info!("Motor output disabled, running in simulation");
        Self {
            bridge: None,
            last: WheelDuties::stopped(),
        }
    }

    /// Check the bridge answers and park the wheels at the midpoint
    pub fn initialize(&mut self) -> Result<(), BridgeError> {
        if let Some(bridge) = self.bridge.as_mut() {
            if !bridge.ping()? {
                warn!("PWM bridge not responding to ping");
                return Err(BridgeError::Timeout);
            }
            info!("PWM bridge responding");
        }
        self.stop()
    }

    /// Send wheel duties
    pub fn set_duties(&mut self, duties: WheelDuties) -> Result<(), BridgeError> {
        if duties != self.last {
            debug!("Wheel duties {:?}", duties.as_array());
        }
        self.last = duties;
        match self.bridge.as_mut() {
            Some(bridge) => bridge.write_duties(duties),
            None => Ok(()),
        }
    }

    /// Drive along `angle` at `speed` with a turn bias
    pub fn drive(&mut self, angle: f32, speed: i32, turn: i32) -> Result<(), BridgeError> {
        self.set_duties(kinematics::drive(angle, speed, turn))
    }

    /// Force every wheel to the midpoint
    pub fn stop(&mut self) -> Result<(), BridgeError> {
        self.set_duties(kinematics::stop())
    }

    /// Last duties sent
    pub fn duties(&self) -> WheelDuties {
        self.last
    }
}

impl Drop for MotorDriver {
    fn drop(&mut self) {
        // Leave the wheels unpowered whatever happened to the loop
        if let Err(e) = self.stop() {
            warn!("Failed to stop motors on drop: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simulated_driver_tracks_duties() {
        let mut driver = MotorDriver::simulated();
        assert!(driver.duties().is_stopped());

        driver.drive(0.0, 100, 0).unwrap();
        assert_eq!(driver.duties().as_array(), [255, 0, 255, 0]);

        driver.stop().unwrap();
        assert!(driver.duties().is_stopped());
    }

    #[test]
    fn test_simulated_initialize_parks_wheels() {
        let mut driver = MotorDriver::simulated();
        driver.set_duties(WheelDuties::new(1, 2, 3, 4)).unwrap();
        driver.initialize().unwrap();
        assert!(driver.duties().is_stopped());
    }
}
