// PID controller with position (absolute) and delta (incremental) update laws

/// PID update law
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum PidLaw {
    /// output = kp*e + ki*Σe + kd*Δe
    Position,
    /// output += kp*Δe + ki*e + kd*Δ²e
    Delta,
}

/// PID controller
///
/// Integral and output clamps are only applied when both bounds are set.
/// An unset bound is stored as NaN, since zero is a valid bound.
#[derive(Debug, Clone)]
pub struct Pid {
    law: PidLaw,
    target: f32,
    kp: f32,
    ki: f32,
    kd: f32,
    integral_max: f32,
    integral_min: f32,
    output_max: f32,
    output_min: f32,
    /// e[n-1]
    prev_error: f32,
    /// e[n-2]
    prev_error2: f32,
    integral: f32,
    output: f32,
}

impl Pid {
    /// Create a PID controller without clamps
    ///
    /// # Arguments
    /// * `law` - Update law
    /// * `kp` - Proportional gain
    /// * `ki` - Integral gain
    /// * `kd` - Derivative gain
    pub const fn new(law: PidLaw, kp: f32, ki: f32, kd: f32) -> Self {
        Self {
            law,
            target: 0.0,
            kp,
            ki,
            kd,
            integral_max: f32::NAN,
            integral_min: f32::NAN,
            output_max: f32::NAN,
            output_min: f32::NAN,
            prev_error: 0.0,
            prev_error2: 0.0,
            integral: 0.0,
            output: 0.0,
        }
    }

    /// Builder: integral clamp (position law only)
    pub fn with_integral_limits(mut self, max: f32, min: f32) -> Self {
        self.set_integral_limits(max, min);
        self
    }

    /// Builder: output clamp
    pub fn with_output_limits(mut self, max: f32, min: f32) -> Self {
        self.set_output_limits(max, min);
        self
    }

    /// Set the setpoint
    #[inline]
    pub fn set_target(&mut self, target: f32) {
        self.target = target;
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// Advance the controller by one step
    ///
    /// # Arguments
    /// * `measurement` - Measured value
    ///
    /// # Returns
    /// Controller output (clamped when both output bounds are set)
    pub fn compute(&mut self, measurement: f32) -> f32 {
        let error = self.target - measurement;

        match self.law {
            PidLaw::Position => {
                self.integral = clamp(self.integral + error, self.integral_max, self.integral_min);
                self.output = self.kp * error
                    + self.ki * self.integral
                    + self.kd * (error - self.prev_error);
            }
            PidLaw::Delta => {
                self.output += self.kp * (error - self.prev_error)
                    + self.ki * error
                    + self.kd * (error - 2.0 * self.prev_error + self.prev_error2);
            }
        }
        self.prev_error2 = self.prev_error;
        self.prev_error = error;

        self.output = clamp(self.output, self.output_max, self.output_min);
        self.output
    }

    /// Clear the error history, integral and output. The setpoint is kept.
    pub fn reset(&mut self) {
        self.prev_error = 0.0;
        self.prev_error2 = 0.0;
        self.integral = 0.0;
        self.output = 0.0;
    }

    pub fn set_gains(&mut self, kp: f32, ki: f32, kd: f32) {
        self.kp = kp;
        self.ki = ki;
        self.kd = kd;
    }

    pub fn set_kp(&mut self, kp: f32) {
        self.kp = kp;
    }

    pub fn set_ki(&mut self, ki: f32) {
        self.ki = ki;
    }

    pub fn set_kd(&mut self, kd: f32) {
        self.kd = kd;
    }

    /// Set the integral clamp, NaN leaves the clamp disabled
    pub fn set_integral_limits(&mut self, max: f32, min: f32) {
        self.integral_max = max;
        self.integral_min = min;
    }

    /// Set the output clamp, NaN leaves the clamp disabled
    pub fn set_output_limits(&mut self, max: f32, min: f32) {
        self.output_max = max;
        self.output_min = min;
    }

    /// Clamp a value into the output range (no-op while unset)
    pub fn clamp_output(&self, x: f32) -> f32 {
        clamp(x, self.output_max, self.output_min)
    }

    /// Output clamp as (max, min)
    pub fn output_limits(&self) -> (f32, f32) {
        (self.output_max, self.output_min)
    }

    /// Integral clamp as (max, min)
    pub fn integral_limits(&self) -> (f32, f32) {
        (self.integral_max, self.integral_min)
    }

    pub fn law(&self) -> PidLaw {
        self.law
    }

    pub fn kp(&self) -> f32 {
        self.kp
    }

    pub fn ki(&self) -> f32 {
        self.ki
    }

    pub fn kd(&self) -> f32 {
        self.kd
    }

    pub fn output(&self) -> f32 {
        self.output
    }

    pub fn integral(&self) -> f32 {
        self.integral
    }
}

/// Clamp `x` into [min, max] when both bounds are set
#[inline]
fn clamp(x: f32, max: f32, min: f32) -> f32 {
    if max.is_nan() || min.is_nan() {
        x
    } else if x > max {
        max
    } else if x < min {
        min
    } else {
        x
    }
}
