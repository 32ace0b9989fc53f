// ==============================================================================
// steering.rs — SPEED-SENSITIVE STEERING + ACKERMANN GEOMETRY (FRONT AXLE)
// ------------------------------------------------------------------------------
// Pipeline per tick:
// - target angle = steer axis * max angle * speed-dependent authority
//   (authority shrinks as speed approaches max_speed, floored so the wheel
//   never goes numb)
// - current angle is exponentially smoothed toward the target
// - Ackermann split: the inner wheel takes the smoothed angle raw, the outer
//   wheel takes the angle that keeps both front wheels on concentric arcs:
//
//     R_inner = wheelbase / tan(angle)
//     outer   = atan(wheelbase / (R_inner + track/2))
//
// Positive steer = right turn, so the right wheel is inner for positive
// angles and the left wheel for negative ones.
// ==============================================================================

use crate::drivetrain::engine::smoothing_alpha;
use crate::drivetrain::types::{DrivetrainConfig, DrivetrainState};

const EPS: f32 = 1e-4;

/// Target steer angle (radians) from the lateral axis, scaled down with speed.
pub fn steer_target(config: &DrivetrainConfig, steer_axis: f32, speed: f32) -> f32 {
    let authority =
        (1.0 - speed.abs() / config.max_speed.max(1.0)).clamp(config.min_steer_authority, 1.0);
    steer_axis.clamp(-1.0, 1.0) * config.max_steer_angle * authority
}

/// Smooth the current angle toward the target. Snaps to exact zero once the
/// residual is below resolution so a centered wheel is a true fixed point.
pub fn smooth_steer(config: &DrivetrainConfig, state: &mut DrivetrainState, target: f32, dt: f32) {
    let alpha = smoothing_alpha(config.steer_response, dt);
    state.current_steer_angle += (target - state.current_steer_angle) * alpha;
    if target == 0.0 && state.current_steer_angle.abs() < EPS {
        state.current_steer_angle = 0.0;
    }
}

/// Split a smoothed center angle into (front-left, front-right) wheel angles.
/// The inner wheel always turns at least as sharply as the outer one.
pub fn ackermann_split(wheelbase: f32, track_width: f32, angle: f32) -> (f32, f32) {
    if angle.abs() < EPS {
        return (0.0, 0.0);
    }

    let sign = angle.signum();
    let inner = angle.abs();

    // Turning radius of the inner front wheel's bicycle model.
    let r_inner = wheelbase / inner.tan().max(EPS);
    let outer = (wheelbase / (r_inner + track_width * 0.5)).atan();

    if sign > 0.0 {
        // Right turn: right wheel is inside.
        (outer * sign, inner * sign)
    } else {
        (inner * sign, outer * sign)
    }
}
