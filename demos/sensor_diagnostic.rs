// Sensor diagnostic: READ-ONLY check of the beacon, scanner and compass
//
// Nothing is written to the motors. Run this before the runtime to confirm
// every sensor is wired and talking.
//
// Usage: cargo run --example sensor_diagnostic -- [hedgehog_port] [lidar_port] [i2c_bus]
// Example: cargo run --example sensor_diagnostic -- /dev/ttyACM0 /dev/ttyUSB0 /dev/i2c-1

use linux_embedded_hal::I2cdev;
use std::thread::sleep;
use std::time::{Duration, Instant};

use skyrocket_runtime::config::*;
use skyrocket_runtime::sensors::{
    Compass, Hedgehog, Lidar, Lis2mdl, SerialSource, TelemetryFrame, lidar::ProximityLimits,
};

const LISTEN: Duration = Duration::from_secs(3);

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Setup logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse().unwrap()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let hedgehog_port = args.next().unwrap_or_else(|| HEDGEHOG_PORT.to_string());
    let lidar_port = args.next().unwrap_or_else(|| LIDAR_PORT.to_string());
    let i2c_bus = args.next().unwrap_or_else(|| I2C_BUS.to_string());

    println!("╔══════════════════════════════════════════════════════════════╗");
    println!("║           Skyrocket Sensor Diagnostic (READ-ONLY)            ║");
    println!("╚══════════════════════════════════════════════════════════════╝");
    println!();

    println!("Step 1: Positioning beacon on {}", hedgehog_port);
    match SerialSource::open(&hedgehog_port, HEDGEHOG_BAUDRATE) {
        Ok(source) => check_hedgehog(Hedgehog::new(Box::new(source), HEDGEHOG_BYTES_PER_POLL)),
        Err(e) => println!("  ✗ Failed to open: {}", e),
    }
    println!();

    println!("Step 2: Proximity scanner on {}", lidar_port);
    match SerialSource::open(&lidar_port, LIDAR_BAUDRATE) {
        Ok(source) => check_lidar(Lidar::new(Box::new(source), LIDAR_BYTES_PER_POLL)),
        Err(e) => println!("  ✗ Failed to open: {}", e),
    }
    println!();

    println!("Step 3: Magnetometer on {} @ 0x{:02X}", i2c_bus, MAG_I2C_ADDRESS);
    match I2cdev::new(&i2c_bus) {
        Ok(bus) => check_compass(Compass::new(Box::new(Lis2mdl::new(bus, MAG_I2C_ADDRESS)))),
        Err(e) => println!("  ✗ Failed to open bus: {}", e),
    }
    println!();

    println!("Diagnostic complete.");
    Ok(())
}

fn check_hedgehog(mut hedgehog: Hedgehog) {
    let start = Instant::now();
    let (mut positions, mut imu) = (0, 0);
    while start.elapsed() < LISTEN {
        match hedgehog.poll() {
            Ok(frames) => {
                for frame in frames {
                    match frame {
                        TelemetryFrame::PositionCm(p) | TelemetryFrame::PositionMmHighRes(p) => {
                            if positions == 0 {
                                println!("  First fix: x={} y={} z={} mm", p.x, p.y, p.z);
                            }
                            positions += 1;
                        }
                        TelemetryFrame::RawImu(_) => imu += 1,
                    }
                }
            }
            Err(e) => {
                println!("  ✗ Read error: {}", e);
                return;
            }
        }
        sleep(Duration::from_millis(1000 / LOOP_HZ));
    }

    if positions + imu == 0 {
        println!("  ✗ No valid datagrams in {:?}", LISTEN);
    } else {
        println!("  ✓ {} position and {} IMU datagrams", positions, imu);
    }
}

fn check_lidar(mut lidar: Lidar) {
    let start = Instant::now();
    let limits = ProximityLimits::default();
    let (mut frames_seen, mut close) = (0, 0);
    let mut nearest = u16::MAX;
    while start.elapsed() < LISTEN {
        match lidar.poll() {
            Ok(frames) => {
                for frame in frames {
                    frames_seen += 1;
                    close += frame.too_close(limits) as usize;
                    nearest = frame
                        .points
                        .iter()
                        .map(|p| p.distance)
                        .filter(|&d| d > 0)
                        .fold(nearest, u16::min);
                }
            }
            Err(e) => {
                println!("  ✗ Read error: {}", e);
                return;
            }
        }
        sleep(Duration::from_millis(1000 / LOOP_HZ));
    }

    if frames_seen == 0 {
        println!("  ✗ No valid frames in {:?}", LISTEN);
    } else {
        println!(
            "  ✓ {} frames, nearest return {} mm, {} frames inside the stop zone",
            frames_seen, nearest, close
        );
    }
}

fn check_compass(mut compass: Compass) {
    if !compass.initialize() {
        println!("  ✗ Not responding");
        return;
    }
    println!("  ✓ Responding");
    for _ in 0..5 {
        match compass.heading() {
            Ok(heading) => println!("    heading {:6.1}° (uncalibrated)", heading),
            Err(e) => {
                println!("  ✗ Read error: {}", e);
                return;
            }
        }
        sleep(Duration::from_millis(200));
    }
}
