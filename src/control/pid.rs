//! Per-axis PID on tilt angle.
//!
//! Works in `no_std` and does not allocate memory.

/// Gains and limits for one axis.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PidGains {
    pub kp: f32,
    pub ki: f32,
    pub kd: f32,
    /// Accumulated error is kept within `[-integral_limit, integral_limit]`.
    pub integral_limit: f32,
}

/// PID controller for a single tilt axis.
///
/// The integral is the plain running sum of errors (one sample per tick,
/// no time scaling) and the derivative is the change in error since the
/// previous tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AxisPid {
    gains: PidGains,

    /// Error from the latest update
    error: f32,
    /// Clamped running sum of errors
    integral: f32,
    /// Error from the update before the latest one
    previous_error: f32,
}

impl AxisPid {
    pub fn new(gains: PidGains) -> Self {
        Self {
            gains,
            error: 0.0,
            integral: 0.0,
            previous_error: 0.0,
        }
    }

    /// Reset all error history.
    pub fn reset(&mut self) {
        self.error = 0.0;
        self.integral = 0.0;
        self.previous_error = 0.0;
    }

    pub fn error(&self) -> f32 {
        self.error
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }

    pub fn previous_error(&self) -> f32 {
        self.previous_error
    }

    /// Run one control tick and return the signed effort.
    ///
    /// The effort is unbounded; callers clamp it to whatever the actuator
    /// accepts.
    pub fn update(&mut self, target: f32, measured: f32) -> f32 {
        let limit = self.gains.integral_limit;

        self.error = target - measured;
        self.integral = (self.integral + self.error).clamp(-limit, limit);
        let derivative = self.error - self.previous_error;

        let effort =
            self.gains.kp * self.error + self.gains.ki * self.integral + self.gains.kd * derivative;

        self.previous_error = self.error;
        effort
    }
}
