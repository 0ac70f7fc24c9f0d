// Magnetometer heading driver
//
// Hard-iron calibration: track min/max of the two in-plane axes while the
// robot is turned, offset = midpoint. Heading = atan2(y, x) of the
// offset-corrected field, in [0, 360), relative to the magnetic reference
// axis rather than geographic north.

use std::thread::sleep;
use std::time::{Duration, Instant};

use embedded_hal::i2c::{Error as _, I2c};
use tracing::{debug, info, warn};

use super::{Result, SensorError};
use crate::config::MAG_CALIBRATION_INTERVAL;

/// Magnetic field vector in microtesla
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MagneticField {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// Anything that can report a magnetic field vector
pub trait MagneticSensor: Send {
    /// Probe and configure the device
    fn initialize(&mut self) -> Result<()>;
    fn read_field(&mut self) -> Result<MagneticField>;
}

/// LIS2MDL register map (subset)
#[repr(u8)]
#[derive(Debug, Clone, Copy)]
enum Register {
    CfgRegA = 0x60,
    CfgRegC = 0x62,
    WhoAmI = 0x4F,
    OutXL = 0x68,
}

const LIS2MDL_ID: u8 = 0x40;
const LIS2MDL_UT_PER_LSB: f32 = 0.15;

/// ST LIS2MDL 3-axis magnetometer over I2C
pub struct Lis2mdl<I2C> {
    i2c: I2C,
    address: u8,
}

impl<I2C: I2c> Lis2mdl<I2C> {
    pub fn new(i2c: I2C, address: u8) -> Self {
        Self { i2c, address }
    }

    fn write_register(&mut self, register: Register, value: u8) -> Result<()> {
        self.i2c
            .write(self.address, &[register as u8, value])
            .map_err(|e| SensorError::I2c(format!("{:?}", e.kind())))
    }

    fn read_registers(&mut self, register: Register, buf: &mut [u8]) -> Result<()> {
        self.i2c
            .write_read(self.address, &[register as u8], buf)
            .map_err(|e| SensorError::I2c(format!("{:?}", e.kind())))
    }
}

impl<I2C: I2c + Send> MagneticSensor for Lis2mdl<I2C> {
    fn initialize(&mut self) -> Result<()> {
        let mut id = [0u8; 1];
        self.read_registers(Register::WhoAmI, &mut id)?;
        if id[0] != LIS2MDL_ID {
            return Err(SensorError::NotResponding(id[0]));
        }
        // Temperature compensation, continuous mode, 10 Hz
        self.write_register(Register::CfgRegA, 0x80)?;
        // Block data update
        self.write_register(Register::CfgRegC, 0x10)?;
        Ok(())
    }

    fn read_field(&mut self) -> Result<MagneticField> {
        let mut raw = [0u8; 6];
        self.read_registers(Register::OutXL, &mut raw)?;
        let axis = |i: usize| i16::from_le_bytes([raw[i], raw[i + 1]]) as f32 * LIS2MDL_UT_PER_LSB;
        Ok(MagneticField {
            x: axis(0),
            y: axis(2),
            z: axis(4),
        })
    }
}

/// Hard-iron offsets for the two in-plane axes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Offsets {
    pub x: f32,
    pub y: f32,
}

/// Running min/max of the in-plane axes
#[derive(Debug, Clone, Copy)]
struct Extents {
    min_x: f32,
    max_x: f32,
    min_y: f32,
    max_y: f32,
    samples: usize,
}

impl Extents {
    fn new() -> Self {
        Self {
            min_x: f32::INFINITY,
            max_x: f32::NEG_INFINITY,
            min_y: f32::INFINITY,
            max_y: f32::NEG_INFINITY,
            samples: 0,
        }
    }

    fn update(&mut self, field: MagneticField) {
        self.min_x = self.min_x.min(field.x);
        self.max_x = self.max_x.max(field.x);
        self.min_y = self.min_y.min(field.y);
        self.max_y = self.max_y.max(field.y);
        self.samples += 1;
    }

    fn offsets(&self) -> Option<Offsets> {
        (self.samples > 0).then(|| Offsets {
            x: (self.max_x + self.min_x) / 2.0,
            y: (self.max_y + self.min_y) / 2.0,
        })
    }
}

struct Calibration {
    deadline: Instant,
    extents: Extents,
}

/// Compass heading from a raw field and hard-iron offsets, in [0, 360)
pub fn heading_from(field: MagneticField, offsets: Offsets) -> f32 {
    let heading = (field.y - offsets.y).atan2(field.x - offsets.x).to_degrees();
    let heading = if heading < 0.0 { heading + 360.0 } else { heading };
    // -0.00001 + 360 rounds to 360 in f32
    if heading >= 360.0 { 0.0 } else { heading }
}

/// Heading sensor: magnetometer plus calibration state
pub struct Compass {
    sensor: Box<dyn MagneticSensor>,
    offsets: Offsets,
    initialized: bool,
    calibration: Option<Calibration>,
}

impl Compass {
    pub fn new(sensor: Box<dyn MagneticSensor>) -> Self {
        Self {
            sensor,
            offsets: Offsets::default(),
            initialized: false,
            calibration: None,
        }
    }

    /// Probe the sensor; false means no heading is available
    pub fn initialize(&mut self) -> bool {
        match self.sensor.initialize() {
            Ok(()) => {
                info!("Magnetometer initialized");
                self.initialized = true;
            }
            Err(e) => {
                warn!("Magnetometer initialization failed: {}", e);
                self.initialized = false;
            }
        }
        self.initialized
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn offsets(&self) -> Offsets {
        self.offsets
    }

    pub fn is_calibrating(&self) -> bool {
        self.calibration.is_some()
    }

    /// Blocking calibration: sample for `duration`, then apply the midpoint offsets.
    /// Keeps the previous offsets if no sample could be read.
    pub fn calibrate(&mut self, duration: Duration) -> Result<Offsets> {
        info!("Calibrating magnetometer for {:?}", duration);
        let start = Instant::now();
        let mut extents = Extents::new();
        while start.elapsed() < duration {
            extents.update(self.sensor.read_field()?);
            sleep(MAG_CALIBRATION_INTERVAL);
        }
        self.apply(extents);
        Ok(self.offsets)
    }

    /// Start a calibration window that `sample` advances each tick
    pub fn begin_calibration(&mut self, now: Instant, duration: Duration) {
        info!("Magnetometer calibration started ({:?} window)", duration);
        self.calibration = Some(Calibration {
            deadline: now + duration,
            extents: Extents::new(),
        });
    }

    /// Read one sample, feed any running calibration, and return the heading
    pub fn sample(&mut self, now: Instant) -> Result<f32> {
        let field = self.sensor.read_field()?;
        if let Some(calibration) = self.calibration.as_mut() {
            calibration.extents.update(field);
            if now >= calibration.deadline {
                let extents = calibration.extents;
                self.calibration = None;
                self.apply(extents);
            }
        }
        Ok(heading_from(field, self.offsets))
    }

    /// Calibrated heading in degrees, [0, 360)
    pub fn heading(&mut self) -> Result<f32> {
        let field = self.sensor.read_field()?;
        Ok(heading_from(field, self.offsets))
    }

    fn apply(&mut self, extents: Extents) {
        match extents.offsets() {
            Some(offsets) => {
                info!(
                    "Magnetometer offsets x={:.2} y={:.2} ({} samples)",
                    offsets.x, offsets.y, extents.samples
                );
                self.offsets = offsets;
            }
            None => warn!("Magnetometer calibration collected no samples"),
        }
        debug!("Calibration window closed");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Test double: returns a shared field, or cycles through a sweep if one is set
    pub(crate) struct FakeSensor {
        pub field: Arc<Mutex<MagneticField>>,
        pub sweep: Vec<MagneticField>,
        pub present: bool,
        next: usize,
    }

    impl FakeSensor {
        pub(crate) fn new(field: Arc<Mutex<MagneticField>>) -> Self {
            Self {
                field,
                sweep: Vec::new(),
                present: true,
                next: 0,
            }
        }
    }

    impl MagneticSensor for FakeSensor {
        fn initialize(&mut self) -> Result<()> {
            if self.present {
                Ok(())
            } else {
                Err(SensorError::NotResponding(0x00))
            }
        }

        fn read_field(&mut self) -> Result<MagneticField> {
            if self.sweep.is_empty() {
                return Ok(*self.field.lock().unwrap());
            }
            let field = self.sweep[self.next % self.sweep.len()];
            self.next += 1;
            Ok(field)
        }
    }

    /// Field pointing at `heading` degrees around the given center
    pub(crate) fn field_at(heading: f32, cx: f32, cy: f32) -> MagneticField {
        let rad = heading.to_radians();
        MagneticField {
            x: cx + 30.0 * rad.cos(),
            y: cy + 30.0 * rad.sin(),
            z: 0.0,
        }
    }

    fn sweep_around(cx: f32, cy: f32) -> Vec<MagneticField> {
        (0..4).map(|i| field_at(i as f32 * 90.0, cx, cy)).collect()
    }

    #[test]
    fn test_heading_quadrants() {
        let zero = Offsets::default();
        assert!((heading_from(field_at(0.0, 0.0, 0.0), zero) - 0.0).abs() < 1e-3);
        assert!((heading_from(field_at(90.0, 0.0, 0.0), zero) - 90.0).abs() < 1e-3);
        assert!((heading_from(field_at(180.0, 0.0, 0.0), zero) - 180.0).abs() < 1e-3);
        // atan2 gives -90 here; normalized into [0, 360)
        assert!((heading_from(field_at(270.0, 0.0, 0.0), zero) - 270.0).abs() < 1e-3);
    }

    #[test]
    fn test_heading_never_reaches_360() {
        let field = MagneticField {
            x: 1.0,
            y: -1e-9,
            z: 0.0,
        };
        let heading = heading_from(field, Offsets::default());
        assert!((0.0..360.0).contains(&heading));
    }

    #[test]
    fn test_blocking_calibration_finds_center() {
        let mut sensor = FakeSensor::new(Arc::new(Mutex::new(MagneticField::default())));
        sensor.sweep = sweep_around(12.0, -7.0);
        let mut compass = Compass::new(Box::new(sensor));

        let offsets = compass.calibrate(Duration::from_millis(400)).unwrap();
        assert!((offsets.x - 12.0).abs() < 1e-3);
        assert!((offsets.y + 7.0).abs() < 1e-3);
    }

    #[test]
    fn test_incremental_calibration() {
        let mut sensor = FakeSensor::new(Arc::new(Mutex::new(MagneticField::default())));
        sensor.sweep = sweep_around(-20.0, 5.0);
        let mut compass = Compass::new(Box::new(sensor));

        let start = Instant::now();
        compass.begin_calibration(start, Duration::from_secs(5));
        for i in 0..4 {
            compass.sample(start + Duration::from_secs(i)).unwrap();
        }
        assert!(compass.is_calibrating());
        assert_eq!(compass.offsets(), Offsets::default());

        compass.sample(start + Duration::from_secs(5)).unwrap();
        assert!(!compass.is_calibrating());
        assert!((compass.offsets().x + 20.0).abs() < 1e-3);
        assert!((compass.offsets().y - 5.0).abs() < 1e-3);

        // Calibrated heading ignores the hard-iron bias
        let heading = compass.sample(start + Duration::from_secs(6)).unwrap();
        assert!((heading - 90.0).abs() < 1e-3, "heading {}", heading);
    }

    #[test]
    fn test_initialize_reports_missing_sensor() {
        let mut sensor = FakeSensor::new(Arc::new(Mutex::new(MagneticField::default())));
        sensor.present = false;
        let mut compass = Compass::new(Box::new(sensor));
        assert!(!compass.initialize());
        assert!(!compass.is_initialized());
    }
}
