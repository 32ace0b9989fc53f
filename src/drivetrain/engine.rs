// ==============================================================================
// engine.rs — RPM ESTIMATION + TORQUE CURVE
// ------------------------------------------------------------------------------
// RPM is estimated from the powered wheels, not integrated from a flywheel:
// average |wheel rotation speed| -> through gear ratio and final drive ->
// instantaneous RPM -> exponential low-pass keyed to dt. The low-pass is what
// keeps the torque curve continuous when wheel-speed telemetry is noisy; do
// not shortcut it.
//
// The torque curve is a unimodal sine over normalized RPM (idle..max mapped
// to 0..1) peaking near 70% of the range, with a floor at 30% of peak.
// ==============================================================================

use crate::drivetrain::types::{DrivetrainConfig, DrivetrainState, WheelTelemetry};

/// Curve peak sits at this fraction of the normalized RPM range.
const CURVE_PEAK: f32 = 0.7;
/// Fraction of peak torque available at the curve's worst point.
const TORQUE_FLOOR: f32 = 0.3;

/// Per-tick exponential smoothing factor for a rate in 1/s.
#[inline]
pub fn smoothing_alpha(rate: f32, dt: f32) -> f32 {
    1.0 - (-rate * dt).exp()
}

/// Instantaneous RPM estimate from powered-wheel telemetry, or None when no
/// powered wheel reported data (missing proxies degrade to idle relaxation).
pub fn estimate_rpm(
    table_ratio: f32,
    final_drive: f32,
    powered: &[&WheelTelemetry],
) -> Option<f32> {
    if powered.is_empty() {
        return None;
    }
    let avg_rot: f32 =
        powered.iter().map(|t| t.rotation_speed.abs()).sum::<f32>() / powered.len() as f32;
    let wheel_rpm = avg_rot * 60.0 / std::f32::consts::TAU;
    Some(wheel_rpm * table_ratio * final_drive)
}

/// Low-pass the smoothed RPM toward the estimate (or relax toward idle in
/// neutral / with no telemetry). Clamped to [idle*0.8, max*1.1] as the
/// containment bound; `display_rpm` re-clamps for consumers.
pub fn update_rpm(
    config: &DrivetrainConfig,
    state: &mut DrivetrainState,
    estimate: Option<f32>,
    dt: f32,
) {
    let (target, rate) = match estimate {
        Some(rpm) if state.current_gear != 0 => (rpm.max(config.idle_rpm), config.rpm_response),
        _ => (config.idle_rpm, config.rpm_relax),
    };

    let alpha = smoothing_alpha(rate, dt);
    state.engine_rpm += (target - state.engine_rpm) * alpha;
    state.engine_rpm = state
        .engine_rpm
        .clamp(config.idle_rpm * 0.8, config.max_rpm * 1.1);
}

/// RPM fraction of the idle..max band, 0..1.
#[inline]
pub fn rpm_fraction(config: &DrivetrainConfig, rpm: f32) -> f32 {
    ((rpm - config.idle_rpm) / (config.max_rpm - config.idle_rpm).max(1.0)).clamp(0.0, 1.0)
}

/// Engine torque available at the given RPM, before traction and throttle
/// scaling. sin(pi * x / (2 * CURVE_PEAK)) peaks at x = CURVE_PEAK and stays
/// positive over the whole band.
pub fn torque_at(config: &DrivetrainConfig, rpm: f32) -> f32 {
    let x = rpm_fraction(config, rpm);
    let curve = (std::f32::consts::PI * x / (2.0 * CURVE_PEAK)).sin().max(0.0);
    config.peak_torque * (TORQUE_FLOOR + (1.0 - TORQUE_FLOOR) * curve)
}

/// Engine-braking torque while coasting, proportional to the RPM fraction.
pub fn engine_brake_at(config: &DrivetrainConfig, rpm: f32) -> f32 {
    config.engine_brake_torque * rpm_fraction(config, rpm)
}

/// RPM clamped to the displayable band for HUD/telemetry consumers.
pub fn display_rpm(config: &DrivetrainConfig, rpm: f32) -> f32 {
    rpm.clamp(config.idle_rpm, config.max_rpm)
}
