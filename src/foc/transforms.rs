// Coordinate transformations for FOC (Field Oriented Control)
// Clarke/Park forward transforms for the current path and the inverse
// transforms used to synthesize normalized phase duties

use core::f32::consts::{PI, TAU};

use libm::floorf;

/// 1 / sqrt(3)
const INV_SQRT3: f32 = 0.577_350_26;
/// sqrt(3) / 2
const SQRT3_DIV_2: f32 = 0.866_025_4;
/// Voltage headroom so no phase duty reaches the rail
const VOLTAGE_HEADROOM: f32 = 0.99;

/// Cosine and sine of an angle
///
/// Uses idsp::cossin() (~40 cycles on Cortex-M). The angle is wrapped to
/// [-π, π) and scaled to idsp's full-scale i32 phase.
///
/// # Returns
/// Tuple of (cos, sin)
#[inline]
pub fn cossin(theta: f32) -> (f32, f32) {
    let mut wrapped = wrap_angle(theta);
    if wrapped >= PI {
        wrapped -= TAU;
    }

    // idsp phase: i32::MIN..i32::MAX covers -π..π
    const SCALE: f32 = 2_147_483_648.0 / PI;
    let phase = (wrapped * SCALE) as i32;

    let (cos_i32, sin_i32) = idsp::cossin(phase);

    const I32_TO_F32: f32 = 1.0 / 2_147_483_648.0;
    (cos_i32 as f32 * I32_TO_F32, sin_i32 as f32 * I32_TO_F32)
}

/// Clarke transformation (uv → αβ), assuming iu + iv + iw = 0
///
/// # Returns
/// Tuple of (i_alpha, i_beta)
#[inline]
pub fn clarke(iu: f32, iv: f32) -> (f32, f32) {
    (iu, (iu + 2.0 * iv) * INV_SQRT3)
}

/// Park transformation (αβ → dq)
///
/// # Arguments
/// * `i_alpha`, `i_beta` - Stationary frame components
/// * `cos_theta`, `sin_theta` - Cosine and sine of the electrical angle
///
/// # Returns
/// Tuple of (i_d, i_q)
#[inline]
pub fn park(i_alpha: f32, i_beta: f32, cos_theta: f32, sin_theta: f32) -> (f32, f32) {
    let i_d = i_beta * sin_theta + i_alpha * cos_theta;
    let i_q = i_beta * cos_theta - i_alpha * sin_theta;
    (i_d, i_q)
}

/// Inverse Park transformation (dq → αβ)
///
/// # Returns
/// Tuple of (v_alpha, v_beta)
#[inline]
pub fn inverse_park(vd: f32, vq: f32, cos_theta: f32, sin_theta: f32) -> (f32, f32) {
    let v_alpha = vd * cos_theta - vq * sin_theta;
    let v_beta = vd * sin_theta + vq * cos_theta;
    (v_alpha, v_beta)
}

/// Inverse Clarke transformation to normalized duties (αβ → uvw)
///
/// Inputs in [-0.5, 0.5] land every duty in [0, 1] around a 0.5 midpoint.
/// The third phase is derived from the other two.
#[inline]
pub fn inverse_clarke_duty(v_alpha: f32, v_beta: f32) -> (f32, f32, f32) {
    let u = v_alpha + 0.5;
    let v = -0.5 * v_alpha + SQRT3_DIV_2 * v_beta + 0.5;
    let w = 1.5 - u - v;
    (u, v, w)
}

/// Phase voltage synthesis
///
/// Normalized d/q voltages in [-1, 1] become phase duties in [0, 1].
///
/// # Returns
/// Tuple of ((ud, uq) after headroom scaling, (v_alpha, v_beta), (u, v, w))
pub fn synthesize(ud: f32, uq: f32, theta: f32) -> ((f32, f32), (f32, f32), (f32, f32, f32)) {
    let ud = ud * VOLTAGE_HEADROOM;
    let uq = uq * VOLTAGE_HEADROOM;
    let (cos_theta, sin_theta) = cossin(theta);
    let (v_alpha, v_beta) = inverse_park(ud, uq, cos_theta, sin_theta);
    // halve so the duties stay within [0, 1]
    let (v_alpha, v_beta) = (v_alpha * 0.5, v_beta * 0.5);
    ((ud, uq), (v_alpha, v_beta), inverse_clarke_duty(v_alpha, v_beta))
}

/// Normalize angle to range [0, 2π)
pub fn wrap_angle(angle: f32) -> f32 {
    let wrapped = angle - TAU * floorf(angle / TAU);
    if wrapped >= TAU || wrapped < 0.0 {
        0.0
    } else {
        wrapped
    }
}

/// Shortest signed rotation from `from` to `to`, in (-π, π]
pub fn shortest_delta(to: f32, from: f32) -> f32 {
    let delta = wrap_angle(to - from);
    if delta > PI {
        delta - TAU
    } else {
        delta
    }
}
