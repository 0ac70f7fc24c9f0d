// Error-to-correction PID loop, shared by heading-hold and target approach

use std::time::Instant;

use crate::config::INTEGRAL_LIMIT;

/// Signed angular error from `measured` to `target`, in (-180, 180]
pub fn shortest_arc(measured: f32, target: f32) -> f32 {
    let error = target - measured;
    if error > 180.0 {
        error - 360.0
    } else if error < -180.0 {
        error + 360.0
    } else {
        error
    }
}

/// Wrap any angle into [0, 360)
pub fn normalize_degrees(angle: f32) -> f32 {
    let wrapped = angle.rem_euclid(360.0);
    if wrapped >= 360.0 { 0.0 } else { wrapped }
}

#[derive(Debug, Clone)]
pub struct Pid {
    kp: f32,
    ki: f32,
    kd: f32,
    integral: f32,
    last_error: f32,
    last_time: Option<Instant>,
    integral_limit: f32,
    output_min: f32,
    output_max: f32,
}

impl Pid {
    pub fn new(kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            kp,
            ki,
            kd,
            integral: 0.0,
            last_error: 0.0,
            last_time: None,
            integral_limit: INTEGRAL_LIMIT,
            output_min: f32::NEG_INFINITY,
            output_max: f32::INFINITY,
        }
    }

    /// Clamp every output into [min, max]
    pub fn with_output_limits(mut self, min: f32, max: f32) -> Self {
        self.output_min = min;
        self.output_max = max;
        self
    }

    pub fn set_tunings(&mut self, kp: f32, ki: f32, kd: f32) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    pub fn tunings(&self) -> (f32, f32, f32) {
        (self.kp, self.ki, self.kd)
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    /// Forget accumulated state; the next compute is proportional-only
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_error = 0.0;
        self.last_time = None;
    }

    pub fn compute(&mut self, error: f32, now: Instant) -> f32 {
        let dt = match self.last_time {
            Some(last) if now > last => now.duration_since(last).as_secs_f32(),
            Some(_) => {
                // Same instant as the previous call: no usable dt
                self.last_error = error;
                return self.clamp(self.kp * error);
            }
            None => {
                self.last_time = Some(now);
                self.last_error = error;
                self.integral = 0.0;
                return self.clamp(self.kp * error);
            }
        };

        self.integral = (self.integral + error * dt).clamp(-self.integral_limit, self.integral_limit);
        let derivative = (error - self.last_error) / dt;

        self.last_error = error;
        self.last_time = Some(now);

        self.clamp(self.kp * error + self.ki * self.integral + self.kd * derivative)
    }

    fn clamp(&self, output: f32) -> f32 {
        output.clamp(self.output_min, self.output_max)
    }
}
