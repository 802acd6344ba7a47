// Sample filters used by the current and speed measurement paths

use core::f32::consts::TAU;

use crate::hardware::Filter;

/// Identity filter (no smoothing)
#[derive(Debug, Clone, Copy, Default)]
pub struct Passthrough;

impl Filter for Passthrough {
    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        x
    }
}

/// First-order low-pass filter
///
/// y[n] = a * x[n] + (1 - a) * y[n-1]
#[derive(Debug, Clone, Copy)]
pub struct LowPass {
    alpha: f32,
    value: f32,
}

impl LowPass {
    /// Create a filter from its sampling period and cut-off frequency
    ///
    /// # Arguments
    /// * `ts` - Sampling period [s]
    /// * `fc` - Cut-off frequency [Hz]
    pub fn new(ts: f32, fc: f32) -> Self {
        let k = TAU * fc * ts;
        Self::from_alpha(k / (k + 1.0))
    }

    /// Create a filter from a raw smoothing coefficient
    ///
    /// `alpha` is the weight of the newest sample, 1.0 disables smoothing.
    pub const fn from_alpha(alpha: f32) -> Self {
        Self { alpha, value: 0.0 }
    }

    /// Overwrite the filter state
    pub fn reset(&mut self, value: f32) {
        self.value = value;
    }

    /// Last filtered value
    pub fn value(&self) -> f32 {
        self.value
    }

    pub fn alpha(&self) -> f32 {
        self.alpha
    }
}

impl Filter for LowPass {
    #[inline]
    fn sample(&mut self, x: f32) -> f32 {
        self.value = self.alpha * x + (1.0 - self.alpha) * self.value;
        self.value
    }
}
