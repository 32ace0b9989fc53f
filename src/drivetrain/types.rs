//! Core shared types for `drivetrain` (engine-agnostic).
use std::fmt;

// ============================================
// Wheel identification
// ============================================

#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum WheelCorner {
    FrontLeft,
    FrontRight,
    RearLeft,
    RearRight,
}

impl WheelCorner {
    pub const ALL: [WheelCorner; 4] = [
        WheelCorner::FrontLeft,
        WheelCorner::FrontRight,
        WheelCorner::RearLeft,
        WheelCorner::RearRight,
    ];

    pub fn index(&self) -> usize {
        match self {
            WheelCorner::FrontLeft => 0,
            WheelCorner::FrontRight => 1,
            WheelCorner::RearLeft => 2,
            WheelCorner::RearRight => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WheelCorner::FrontLeft => "FL",
            WheelCorner::FrontRight => "FR",
            WheelCorner::RearLeft => "RL",
            WheelCorner::RearRight => "RR",
        }
    }

    pub fn is_front(&self) -> bool {
        matches!(self, WheelCorner::FrontLeft | WheelCorner::FrontRight)
    }

    pub fn is_rear(&self) -> bool {
        matches!(self, WheelCorner::RearLeft | WheelCorner::RearRight)
    }

    pub fn is_left(&self) -> bool {
        matches!(self, WheelCorner::FrontLeft | WheelCorner::RearLeft)
    }
}

impl fmt::Display for WheelCorner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Static per-corner capabilities (fixed four-corner layout).
#[derive(Debug, Clone, Copy)]
pub struct CornerConfig {
    pub corner: WheelCorner,
    pub powered: bool,       // receives motor torque
    pub steerable: bool,     // follows the steering geometry
    pub brake_enabled: bool, // receives brake torque
}

impl CornerConfig {
    /// Rear-wheel-drive, front-steer layout.
    pub fn rwd() -> [CornerConfig; 4] {
        [
            CornerConfig { corner: WheelCorner::FrontLeft,  powered: false, steerable: true,  brake_enabled: true },
            CornerConfig { corner: WheelCorner::FrontRight, powered: false, steerable: true,  brake_enabled: true },
            CornerConfig { corner: WheelCorner::RearLeft,   powered: true,  steerable: false, brake_enabled: true },
            CornerConfig { corner: WheelCorner::RearRight,  powered: true,  steerable: false, brake_enabled: true },
        ]
    }
}

// ============================================
// ----- inputs / telemetry -------------------
// ============================================

/// Driver input for one tick. `drive_axis` is the single forward/back axis:
/// positive = throttle, negative = brake-or-reverse-intent depending on the
/// current gear. `brake` is the explicit brake channel and always wins.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveInput {
    pub drive_axis: f32, // -1..1
    pub steer_axis: f32, // -1..1
    pub brake: f32,      // 0..1
}

impl DriveInput {
    pub fn clamped(&self) -> Self {
        Self {
            drive_axis: self.drive_axis.clamp(-1.0, 1.0),
            steer_axis: self.steer_axis.clamp(-1.0, 1.0),
            brake: self.brake.clamp(0.0, 1.0),
        }
    }
}

/// Chassis motion sampled by the physics engine, projected onto the
/// vehicle's local axes.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChassisMotion {
    pub forward_speed: f32,  // m/s, signed (+ = forward)
    pub sideways_speed: f32, // m/s, signed (+ = toward local right)
}

/// What the physics engine reported for one wheel on the previous tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct WheelTelemetry {
    pub rotation_speed: f32, // rad/s, signed
    pub forward_slip: f32,   // ratio, 0 = rolling cleanly
}

// ============================================
// ----- commands -----------------------------
// ============================================

/// What the controller wants one wheel to do this tick.
#[derive(Debug, Clone, Copy, Default)]
pub struct WheelCommand {
    pub motor_torque: f32, // N*m, signed
    pub brake_torque: f32, // N*m, >= 0
    pub steer_angle: f32,  // radians
}

/// The per-wheel channel shared with the physics engine: the controller
/// writes `command`, the integration step writes `telemetry` back.
/// Vertical support force is NOT part of this channel (the suspension unit
/// owns it), so the two can never double-apply on the same wheel.
#[derive(Debug, Clone, Copy, Default)]
pub struct WheelProxy {
    pub command: WheelCommand,
    pub telemetry: WheelTelemetry,
}

/// Drift-assist output: a lateral force opposing the sideways velocity and
/// a yaw torque in the turn direction. Applied by the physics engine along
/// its world axes.
#[derive(Debug, Clone, Copy)]
pub struct DriftForces {
    pub lateral_force: f32, // N, along local right (signed)
    pub yaw_torque: f32,    // N*m about up (signed)
}

/// One controller tick's worth of output, indexed by `WheelCorner::index`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TickOutput {
    pub commands: [WheelCommand; 4],
    pub drift: Option<DriftForces>,
}

// ============================================
// ----- configs / state ----------------------
// ============================================

#[derive(Debug, Clone)]
pub struct DrivetrainConfig {
    pub mass: f32,         // kg
    pub wheelbase: f32,    // meters (front axle to rear axle)
    pub track_width: f32,  // meters (left to right)
    pub wheel_radius: f32, // meters
    pub max_speed: f32,    // m/s, steering authority reference

    // --- Transmission ---
    pub gear_ratios: Vec<f32>, // 1st..Nth, descending magnitude
    pub reverse_ratio: f32,
    pub final_drive: f32,

    // --- Engine ---
    pub idle_rpm: f32,
    pub max_rpm: f32,
    pub peak_torque: f32,    // N*m at the curve peak
    pub upshift_rpm: f32,
    pub downshift_rpm: f32,
    pub shift_dwell: f32,    // s, minimum time between shifts
    pub rpm_response: f32,   // 1/s, low-pass rate toward the wheel estimate
    pub rpm_relax: f32,      // 1/s, slower rate toward idle in neutral

    // --- Reverse ---
    pub reverse_torque_scale: f32, // 0..1
    pub reverse_speed_cap: f32,    // m/s

    // --- Brakes ---
    pub max_brake_torque: f32,       // N*m per wheel at full brake
    pub engine_brake_torque: f32,    // N*m at max RPM, scaled by RPM fraction
    pub stabilize_brake_torque: f32, // N*m on non-powered wheels while driving

    // --- Traction control ---
    pub traction_response: f32, // 1/s

    // --- Steering ---
    pub max_steer_angle: f32,     // radians
    pub steer_response: f32,      // 1/s, smoothing toward target
    pub min_steer_authority: f32, // floor of the speed-dependent factor

    // --- Drift assist ---
    pub drift_factor: f32,    // 1/s, lateral correction gain
    pub drift_yaw_gain: f32,  // m, yaw torque per sideways m/s per kg
    pub drift_min_speed: f32, // m/s

    // --- Thresholds ---
    pub near_stop_speed: f32, // m/s
    pub input_deadzone: f32,
}

impl DrivetrainConfig {
    /// GT86-ish road car baseline.
    pub fn gt86() -> Self {
        Self {
            mass: 1350.0,         // kg
            wheelbase: 2.5,       // meters
            track_width: 1.5,     // meters
            wheel_radius: 0.33,   // meters
            max_speed: 55.0,      // m/s

            gear_ratios: vec![3.6, 2.1, 1.4, 1.0, 0.8],
            reverse_ratio: 3.3,
            final_drive: 3.9,

            idle_rpm: 800.0,
            max_rpm: 7000.0,
            peak_torque: 320.0,   // N*m
            upshift_rpm: 5800.0,
            downshift_rpm: 2000.0,
            shift_dwell: 0.5,     // s
            rpm_response: 8.0,
            rpm_relax: 2.5,

            reverse_torque_scale: 0.6,
            reverse_speed_cap: 8.0, // m/s

            max_brake_torque: 1800.0,
            engine_brake_torque: 260.0,
            stabilize_brake_torque: 35.0,

            traction_response: 5.0,

            max_steer_angle: 0.6, // radians (~34 degrees)
            steer_response: 6.0,
            min_steer_authority: 0.35,

            drift_factor: 0.8,
            drift_yaw_gain: 0.25,
            drift_min_speed: 6.0,

            near_stop_speed: 0.5,
            input_deadzone: 0.05,
        }
    }
}

/// Mutable per-vehicle transmission state. One per vehicle, never shared.
#[derive(Debug, Clone)]
pub struct DrivetrainState {
    pub current_gear: i32, // -1 reverse, 0 neutral, 1..=N forward
    pub engine_rpm: f32,
    pub traction: f32,            // 0..1, 1 = full grip
    pub current_steer_angle: f32, // radians, smoothed
    pub was_braking: bool,        // latched while decelerating in gear
    pub time_since_shift: f32,    // s
}

impl DrivetrainState {
    pub fn new(idle_rpm: f32) -> Self {
        Self {
            current_gear: 0,
            engine_rpm: idle_rpm,
            traction: 1.0,
            current_steer_angle: 0.0,
            was_braking: false,
            time_since_shift: f32::MAX,
        }
    }
}
