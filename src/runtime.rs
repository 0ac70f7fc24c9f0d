// 50 Hz control loop
// Each tick: drain sensors, apply the latest operator command, plan motion
// (manual, heading-hold or go-to), brake for obstacles, actuate.
// Emergency stop bypasses the tick and forces the wheels to the midpoint.

use std::time::{Duration, Instant};

use linux_embedded_hal::I2cdev;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::config::*;
use crate::control::{Pid, normalize_degrees, shortest_arc};
use crate::messages::{Command, RuntimeState, Status};
use crate::motor::{MotorDriver, WheelDuties, kinematics};
use crate::sensors::hedgehog::ImuSample;
use crate::sensors::lidar::ProximityLimits;
use crate::sensors::{
    Compass, Hedgehog, Lidar, Lis2mdl, Position, SerialSource, TelemetryFrame,
};

/// Single-slot command handoff: a newer command replaces an unprocessed one
#[derive(Debug, Default)]
pub struct Mailbox {
    slot: Option<Command>,
}

impl Mailbox {
    pub fn post(&mut self, cmd: Command) {
        if let Some(stale) = self.slot.replace(cmd) {
            debug!("Dropping stale command {:?}", stale);
        }
    }

    pub fn take(&mut self) -> Option<Command> {
        self.slot.take()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

/// Travel intent handed to the kinematics
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriveIntent {
    /// Degrees, body frame, 0 = forward, 90 = right
    pub angle: f32,
    /// 0..=100
    pub speed: i32,
    /// Rotation bias in duty units
    pub turn: i32,
}

/// Operator motion request; `angle: None` means rotate in place only
#[derive(Debug, Clone, Copy)]
struct Motion {
    angle: Option<f32>,
    turn: i8,
}

#[derive(Debug, Clone, Copy)]
struct Goal {
    x: f32,
    y: f32,
}

enum Plan {
    Stop,
    /// Operator spin, signed ±100
    Rotate(i32),
    /// Heading-hold spin in duty units around the midpoint
    Hold(i32),
    Drive(DriveIntent),
}

pub struct Runtime {
    state: RuntimeState,

    hedgehog: Option<Hedgehog>,
    lidar: Option<Lidar>,
    compass: Option<Compass>,

    heading_pid: Pid,
    beacon_pid: Pid,

    speed: i32,
    motion: Option<Motion>,
    goal: Option<Goal>,
    heading_target: f32,
    yaw_compensation: bool,
    beacon_reference: f32,

    heading: Option<f32>,
    position: Option<Position>,
    imu: Option<ImuSample>,
    obstacle_seen_at: Option<Instant>,
    limits: ProximityLimits,
    obstacle: bool,
    braking: bool,

    duties: WheelDuties,
}

impl Runtime {
    pub fn new(hedgehog: Option<Hedgehog>, lidar: Option<Lidar>, compass: Option<Compass>) -> Self {
        Self {
            state: RuntimeState::Init,
            hedgehog,
            lidar,
            compass,
            heading_pid: Pid::new(HEADING_KP, HEADING_KI, HEADING_KD)
                .with_output_limits(-HEADING_CORRECTION_LIMIT, HEADING_CORRECTION_LIMIT),
            beacon_pid: Pid::new(BEACON_KP, BEACON_KI, BEACON_KD)
                .with_output_limits(BEACON_OUTPUT_MIN, BEACON_OUTPUT_MAX),
            speed: DEFAULT_SPEED as i32,
            motion: None,
            goal: None,
            heading_target: HEADING_TARGET,
            yaw_compensation: false,
            beacon_reference: 0.0,
            heading: None,
            position: None,
            imu: None,
            obstacle_seen_at: None,
            limits: ProximityLimits::default(),
            obstacle: false,
            braking: false,
            duties: WheelDuties::stopped(),
        }
    }

    /// Bring up the heading sensor and leave INIT
    pub fn start(&mut self) {
        if let Some(compass) = self.compass.as_mut()
            && !compass.initialize()
        {
            warn!("Running without heading correction");
        }
        info!(
            "Sensors: hedgehog={}, lidar={}, compass={}",
            self.hedgehog.is_some(),
            self.lidar.is_some(),
            self.compass_ready()
        );
        self.set_state(RuntimeState::Idle);
    }

    /// Blocking magnetometer calibration, for use before the loop starts
    pub fn calibrate_compass(&mut self, duration: Duration) {
        match self.compass.as_mut().filter(|c| c.is_initialized()) {
            Some(compass) => {
                if let Err(e) = compass.calibrate(duration) {
                    warn!("Magnetometer calibration failed: {}", e);
                }
            }
            None => warn!("No magnetometer to calibrate"),
        }
    }

    pub fn state(&self) -> RuntimeState {
        self.state
    }

    pub fn duties(&self) -> WheelDuties {
        self.duties
    }

    pub fn heading_pid(&self) -> &Pid {
        &self.heading_pid
    }

    pub fn imu(&self) -> Option<ImuSample> {
        self.imu
    }

    pub fn status(&self) -> Status {
        Status {
            state: self.state,
            heading: self.heading,
            heading_target: self.heading_target,
            position: self.position,
            too_close: self.obstacle,
            yaw_compensation: self.yaw_compensation,
            calibrating: self.compass.as_ref().is_some_and(|c| c.is_calibrating()),
        }
    }

    fn compass_ready(&self) -> bool {
        self.compass.as_ref().is_some_and(|c| c.is_initialized())
    }

    fn set_state(&mut self, state: RuntimeState) {
        if self.state != state {
            info!("State {:?} -> {:?}", self.state, state);
            self.state = state;
        }
    }

    fn accepts_motion(&self) -> bool {
        matches!(self.state, RuntimeState::Idle | RuntimeState::Driving)
    }

    /// Route an incoming command: stop and activate act now, and a real
    /// stop or release discards whatever was queued before it. The rest
    /// wait in the mailbox for the tick.
    pub fn receive(&mut self, mailbox: &mut Mailbox, cmd: Command) {
        match cmd {
            Command::EmergencyStop => {
                mailbox.clear();
                self.on_command(cmd, Instant::now());
            }
            Command::Activate => {
                info!("Received command: {:?}", cmd);
                if self.activate() {
                    mailbox.clear();
                }
            }
            _ => mailbox.post(cmd),
        }
    }

    /// Latch the emergency stop; PID state is left untouched
    pub fn emergency_stop(&mut self) {
        if self.state != RuntimeState::EmergencyStopped {
            warn!("Emergency stop");
        }
        self.set_state(RuntimeState::EmergencyStopped);
        self.duties = kinematics::stop();
    }

    /// Leave emergency stop with no motion intent.
    /// Returns false when there was no stop to leave.
    pub fn activate(&mut self) -> bool {
        if self.state != RuntimeState::EmergencyStopped {
            debug!("Activate ignored in {:?}", self.state);
            return false;
        }
        self.motion = None;
        self.goal = None;
        self.set_state(RuntimeState::Idle);
        true
    }

    fn on_command(&mut self, cmd: Command, now: Instant) {
        info!("Received command: {:?}", cmd);
        match cmd {
            Command::EmergencyStop => self.emergency_stop(),
            Command::Activate => {
                self.activate();
            }
            Command::SetHeading(heading) => {
                self.heading_target = normalize_degrees(heading as f32);
                // With heading-hold on, a bare heading command turns in place
                if self.yaw_compensation && self.accepts_motion() && self.motion.is_none() && self.goal.is_none() {
                    self.motion = Some(Motion {
                        angle: None,
                        turn: 0,
                    });
                    self.set_state(RuntimeState::Driving);
                }
            }
            Command::HeadingTunings { kp, ki, kd } => self.heading_pid.set_tunings(kp, ki, kd),
            Command::BeaconTunings { kp, ki, kd } => self.beacon_pid.set_tunings(kp, ki, kd),
            Command::SetSpeed(speed) => self.speed = (speed as i32).clamp(0, 100),
            Command::Move { angle, turn } => {
                if !self.accepts_motion() {
                    warn!("Ignoring motion command in {:?}", self.state);
                    return;
                }
                self.motion = Some(Motion {
                    angle: (0..360).contains(&angle).then_some(angle as f32),
                    turn,
                });
                self.goal = None;
                self.set_state(RuntimeState::Driving);
            }
            Command::GoTo { x, y } => {
                if !self.accepts_motion() {
                    warn!("Ignoring go-to in {:?}", self.state);
                    return;
                }
                self.goal = Some(Goal {
                    x: x as f32,
                    y: y as f32,
                });
                self.motion = None;
                self.beacon_pid.reset();
                self.set_state(RuntimeState::Driving);
            }
            Command::Stop => {
                self.motion = None;
                self.goal = None;
                if self.accepts_motion() {
                    self.set_state(RuntimeState::Idle);
                }
            }
            Command::CalibrateMagnetometer => match self.compass.as_mut().filter(|c| c.is_initialized()) {
                Some(compass) => compass.begin_calibration(now, MAG_CALIBRATION_WINDOW),
                None => warn!("No magnetometer to calibrate"),
            },
            Command::ToggleYawCompensation => {
                self.yaw_compensation = !self.yaw_compensation;
                self.heading_pid.reset();
                info!("Yaw compensation {}", if self.yaw_compensation { "on" } else { "off" });
            }
            Command::CalibrateBeacon => match self.heading {
                Some(heading) => {
                    self.beacon_reference = heading;
                    info!("Beacon x-axis aligned with heading {:.1}", heading);
                }
                None => {
                    self.beacon_reference = 0.0;
                    warn!("No heading available, assuming beacon axes match the robot");
                }
            },
        }
    }

    /// Run one control step and return the duties to apply
    pub fn tick(&mut self, command: Option<Command>, now: Instant) -> WheelDuties {
        self.poll_sensors(now);
        self.obstacle = self.obstacle_near(now);
        if let Some(cmd) = command {
            self.on_command(cmd, now);
        }

        self.duties = match self.state {
            RuntimeState::Init | RuntimeState::EmergencyStopped => kinematics::stop(),
            RuntimeState::Idle | RuntimeState::Driving => {
                let plan = self.plan(now);
                self.actuate(plan, now)
            }
        };
        self.duties
    }

    fn poll_sensors(&mut self, now: Instant) {
        if let Some(hedgehog) = self.hedgehog.as_mut() {
            match hedgehog.poll() {
                Ok(frames) => {
                    for frame in frames {
                        match frame {
                            TelemetryFrame::PositionCm(p) | TelemetryFrame::PositionMmHighRes(p) => {
                                self.position = Some(p)
                            }
                            TelemetryFrame::RawImu(sample) => self.imu = Some(sample),
                        }
                    }
                }
                Err(e) => warn!("Hedgehog read failed: {}", e),
            }
        }

        if let Some(lidar) = self.lidar.as_mut() {
            match lidar.poll() {
                Ok(frames) => {
                    if frames.iter().any(|f| f.too_close(self.limits)) {
                        self.obstacle_seen_at = Some(now);
                    }
                }
                Err(e) => warn!("Scanner read failed: {}", e),
            }
        }

        self.heading = match self.compass.as_mut().filter(|c| c.is_initialized()) {
            Some(compass) => match compass.sample(now) {
                Ok(heading) => Some(heading),
                Err(e) => {
                    warn!("Magnetometer read failed: {}", e);
                    None
                }
            },
            None => None,
        };
    }

    fn plan(&mut self, now: Instant) -> Plan {
        let heading_error = if self.yaw_compensation {
            self.heading.map(|h| shortest_arc(h, self.heading_target))
        } else {
            None
        };

        if let Some(goal) = self.goal {
            return self.plan_goal(goal, heading_error, now);
        }

        let Some(motion) = self.motion else {
            return Plan::Stop;
        };

        // Manual turn wins; otherwise heading-hold supplies it
        let manual = motion.turn != 0;
        let turn = match (motion.turn, heading_error) {
            (0, Some(error)) => self.heading_pid.compute(error, now).round() as i32,
            (turn, _) => {
                // Heading-hold restarts from scratch once the operator lets go
                if manual {
                    self.heading_pid.reset();
                }
                turn as i32 * TURN_GAIN
            }
        };

        match motion.angle {
            // Field-relative travel: rotate the request by the heading error
            Some(angle) => Plan::Drive(DriveIntent {
                angle: heading_error.map_or(angle, |e| normalize_degrees(angle + e)),
                speed: self.speed,
                turn,
            }),
            None if manual => Plan::Rotate(turn),
            None if turn != 0 => Plan::Hold(turn),
            None => Plan::Stop,
        }
    }

    fn plan_goal(&mut self, goal: Goal, heading_error: Option<f32>, now: Instant) -> Plan {
        let Some(position) = self.position else {
            debug!("Waiting for a position fix");
            return Plan::Stop;
        };

        let dx = goal.x - position.x as f32;
        let dy = goal.y - position.y as f32;
        let distance = dx.hypot(dy);
        if distance <= ARRIVAL_TOLERANCE_MM {
            info!("Arrived at ({}, {}), {:.0} mm off", goal.x, goal.y, distance);
            self.goal = None;
            self.set_state(RuntimeState::Idle);
            return Plan::Stop;
        }

        let speed = self.beacon_pid.compute(distance, now).clamp(0.0, 100.0).round() as i32;

        // Bearing is counter-clockwise from the beacon x-axis; body angles are clockwise
        let bearing = dy.atan2(dx).to_degrees();
        let drift = self
            .heading
            .map_or(0.0, |h| shortest_arc(self.beacon_reference, h));
        let turn = heading_error.map_or(0, |e| self.heading_pid.compute(e, now).round() as i32);

        Plan::Drive(DriveIntent {
            angle: normalize_degrees(-bearing - drift),
            speed,
            turn,
        })
    }

    fn obstacle_near(&self, now: Instant) -> bool {
        self.obstacle_seen_at
            .is_some_and(|seen| now.duration_since(seen) < OBSTACLE_HOLD)
    }

    fn actuate(&mut self, plan: Plan, now: Instant) -> WheelDuties {
        let braking = matches!(plan, Plan::Drive(_)) && self.obstacle_near(now);
        if braking != self.braking {
            if braking {
                warn!("Obstacle too close, braking");
            } else {
                info!("Path clear");
            }
            self.braking = braking;
        }

        match plan {
            Plan::Stop => kinematics::stop(),
            Plan::Rotate(speed) => kinematics::rotate(speed),
            // Zero-speed drive keeps the correction's sign: every wheel at midpoint + turn
            Plan::Hold(turn) => kinematics::drive(0.0, 0, turn),
            Plan::Drive(_) if braking => kinematics::stop(),
            Plan::Drive(intent) => kinematics::drive(intent.angle, intent.speed, intent.turn),
        }
    }
}

pub async fn run(args: Args) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let hedgehog = match SerialSource::open(&args.hedgehog_port, HEDGEHOG_BAUDRATE) {
        Ok(source) => Some(Hedgehog::new(Box::new(source), HEDGEHOG_BYTES_PER_POLL)),
        Err(e) => {
            warn!("Hedgehog unavailable: {}", e);
            None
        }
    };

    let lidar = match args.lidar_port.as_deref() {
        Some(port) => {
            let source = SerialSource::open(port, LIDAR_BAUDRATE)?;
            Some(Lidar::new(Box::new(source), LIDAR_BYTES_PER_POLL))
        }
        None => None,
    };

    let compass = match I2cdev::new(&args.i2c_bus) {
        Ok(bus) => Some(Compass::new(Box::new(Lis2mdl::new(bus, MAG_I2C_ADDRESS)))),
        Err(e) => {
            warn!("Cannot open {}: {}", args.i2c_bus, e);
            None
        }
    };

    let mut driver = if args.no_motors {
        MotorDriver::simulated()
    } else {
        MotorDriver::new(&args.motor_port)?
    };
    driver.initialize()?;

    let mut runtime = Runtime::new(hedgehog, lidar, compass);
    runtime.start();
    if let Some(secs) = args.calibrate_on_start {
        runtime.calibrate_compass(Duration::from_secs(secs));
    }

    info!("Opening Zenoh session...");
    let session = zenoh::open(zenoh::Config::default()).await?;
    let subscriber = session.declare_subscriber(TOPIC_CMD).await?;
    let pub_wheels = session.declare_publisher(TOPIC_RT_WHEELS).await?;
    let pub_status = session.declare_publisher(TOPIC_STATUS).await?;

    let mut mailbox = Mailbox::default();
    let mut tick = interval(Duration::from_millis(1000 / LOOP_HZ));

    info!("Runtime started: {}Hz loop, {:?} commands", LOOP_HZ, args.protocol);
    info!("Subscribed to: {}", TOPIC_CMD);
    info!("Publishing to: {}, {}", TOPIC_RT_WHEELS, TOPIC_STATUS);

    loop {
        tick.tick().await;

        // 1. Drain pending commands (non-blocking)
        while let Ok(Some(sample)) = subscriber.try_recv() {
            let payload = sample.payload().to_bytes();
            match Command::decode(args.protocol, &payload) {
                Ok(cmd) => {
                    runtime.receive(&mut mailbox, cmd);
                    if cmd == Command::EmergencyStop {
                        if let Err(e) = driver.stop() {
                            warn!("Failed to stop motors: {}", e);
                        }
                    }
                }
                Err(e) => warn!("Failed to parse command: {}", e),
            }
        }

        // 2. Control step
        let duties = runtime.tick(mailbox.take(), Instant::now());

        // 3. Actuate
        if let Err(e) = driver.set_duties(duties) {
            warn!("Failed to write wheel duties: {}", e);
        }

        // 4. Publish
        pub_wheels.put(serde_json::to_string(&duties)?).await?;
        pub_status.put(serde_json::to_string(&runtime.status())?).await?;
    }
}
