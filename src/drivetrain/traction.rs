// ==============================================================================
// traction.rs — SLIP-FEEDBACK TRACTION CONTROL
// ------------------------------------------------------------------------------
// Reads forward slip from the powered wheels' previous tick, averages it, and
// relaxes the traction coefficient toward 1 - |avg slip| with exponential
// smoothing. The coefficient directly scales generated torque, closing the
// loop that prevents uncontrolled wheelspin.
// ==============================================================================

use crate::drivetrain::engine::smoothing_alpha;
use crate::drivetrain::types::{DrivetrainConfig, DrivetrainState, WheelTelemetry};

/// Average forward slip over the powered wheels, None when no powered wheel
/// reported telemetry.
pub fn average_slip(powered: &[&WheelTelemetry]) -> Option<f32> {
    if powered.is_empty() {
        return None;
    }
    Some(powered.iter().map(|t| t.forward_slip).sum::<f32>() / powered.len() as f32)
}

pub fn update_traction(
    config: &DrivetrainConfig,
    state: &mut DrivetrainState,
    avg_slip: Option<f32>,
    dt: f32,
) {
    let target = match avg_slip {
        Some(slip) => (1.0 - slip.abs()).clamp(0.0, 1.0),
        None => 1.0, // no data: recover toward full grip
    };

    let alpha = smoothing_alpha(config.traction_response, dt);
    state.traction = (state.traction + (target - state.traction) * alpha).clamp(0.0, 1.0);
}
