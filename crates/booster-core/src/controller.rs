//! PID rate controller.
//!
//! Converts an occupancy feedback scalar into a call-admission rate clamped
//! to `[min, max]`. The controller does not read the clock; every `update`
//! receives the sampling interval explicitly.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Gains / OutputLimits
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Gains {
    pub kp: f64,
    pub ki: f64,
    pub kd: f64,
}

impl Gains {
    pub fn new(kp: f64, ki: f64, kd: f64) -> Self {
        Self { kp, ki, kd }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OutputLimits {
    pub min: f64,
    pub max: f64,
}

impl OutputLimits {
    /// Build limits, swapping the bounds if they were given in reverse.
    pub fn new(min: f64, max: f64) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    pub fn clamp(&self, value: f64) -> f64 {
        value.max(self.min).min(self.max)
    }
}

// ---------------------------------------------------------------------------
// ControllerSnapshot
// ---------------------------------------------------------------------------

/// Immutable view of the controller between two ticks.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ControllerSnapshot {
    pub gains: Gains,
    pub limits: OutputLimits,
    pub setpoint: f64,
    pub integral: f64,
    pub last_output: Option<f64>,
}

// ---------------------------------------------------------------------------
// RateController
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct RateController {
    gains: Gains,
    limits: OutputLimits,
    setpoint: f64,
    integral: f64,
    last_input: Option<f64>,
    last_output: Option<f64>,
}

impl RateController {
    pub fn new(gains: Gains, limits: OutputLimits, setpoint: f64) -> Self {
        Self {
            gains,
            limits,
            setpoint,
            integral: 0.0,
            last_input: None,
            last_output: None,
        }
    }

    /// Replace gains and output limits. Accumulated state is kept, but the
    /// integral is re-clamped to the new limits.
    pub fn configure(&mut self, gains: Gains, limits: OutputLimits) {
        self.gains = gains;
        self.limits = limits;
        self.integral = limits.clamp(self.integral);
    }

    /// Change the target without touching the integral term.
    pub fn set_setpoint(&mut self, setpoint: f64) {
        self.setpoint = setpoint;
    }

    pub fn setpoint(&self) -> f64 {
        self.setpoint
    }

    /// Zero the integral and derivative memory.
    pub fn reset(&mut self) {
        self.integral = 0.0;
        self.last_input = None;
        self.last_output = None;
    }

    /// Feed one occupancy sample taken `dt` after the previous one and
    /// return the clamped admission rate.
    pub fn update(&mut self, feedback: f64, dt: Duration) -> f64 {
        if !feedback.is_finite() {
            return self.limits.clamp(self.last_output.unwrap_or(self.limits.min));
        }

        let dt = dt.as_secs_f64();
        let error = self.setpoint - feedback;
        let d_input = feedback - self.last_input.unwrap_or(feedback);

        let proportional = self.gains.kp * error;
        let mut derivative = 0.0;
        if dt > 0.0 {
            self.integral = self.limits.clamp(self.integral + self.gains.ki * error * dt);
            derivative = -self.gains.kd * d_input / dt;
        }

        let output = self.limits.clamp(proportional + self.integral + derivative);
        self.last_input = Some(feedback);
        self.last_output = Some(output);
        output
    }

    pub fn snapshot(&self) -> ControllerSnapshot {
        ControllerSnapshot {
            gains: self.gains,
            limits: self.limits,
            setpoint: self.setpoint,
            integral: self.integral,
            last_output: self.last_output,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
