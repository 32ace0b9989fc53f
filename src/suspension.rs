// ==============================================================================
// suspension.rs — RAYCAST SPRING-DAMPER SUSPENSION UNIT (ONE PER WHEEL)
// ------------------------------------------------------------------------------
// Physics-engine-independent per-wheel suspension for wheels that do not use
// an engine-native wheel proxy. The caller casts the ray (through whatever
// query pipeline it owns) and hands this unit the hit distance; the unit
// answers with an upward support force and drives the visual wheel offset.
//
// Per tick:
// - Miss  -> airborne; compression memory resets; the visual offset relaxes
//   linearly back to the fully-extended position (no popping).
// - Hit   -> compression = clamp01(1 - (hit_dist - radius) / travel)
//            spring  = compression * spring_strength
//            damper  = d(compression)/dt * damper_strength, coefficient
//                      DOUBLED while extending (suppresses bounce without
//                      over-damping the compression stroke)
//            force   = max(0, spring + damper - gravity compensation)
//   Force is applied upward at the contact point by the caller; it is never
//   negative, the suspension cannot pull the vehicle down.
//
// The visual wheel is displaced along whichever of its local axes is most
// aligned with world-down, so meshes with arbitrary axis conventions stay
// correct.
// ==============================================================================

use nalgebra::{UnitQuaternion, Vector3};

#[derive(Debug, Clone)]
pub struct SuspensionConfig {
    pub travel: f32,          // meters of usable suspension travel
    pub wheel_radius: f32,    // meters
    pub spring_strength: f32, // N at full compression
    pub damper_strength: f32, // N*s per unit compression rate
    pub gravity_comp: f32,    // N, static weight share this wheel carries
    pub relax_speed: f32,     // m/s, visual return rate while airborne
}

impl SuspensionConfig {
    /// Derive spring/damper strengths from a target static sag, the way a
    /// setup sheet would: k = F_static / sag, c = 2*zeta*sqrt(k*m).
    pub fn from_sag(
        vehicle_mass: f32,
        wheels: usize,
        sag_m: f32,
        zeta: f32,
        travel: f32,
        wheel_radius: f32,
        gravity_comp_fraction: f32,
    ) -> Self {
        let m = vehicle_mass / wheels.max(1) as f32;
        let g = 9.81_f32;
        let f_static = m * g;
        let k = f_static / sag_m.max(1e-3);
        let c = 2.0 * zeta * (k * m).sqrt();

        Self {
            travel,
            wheel_radius,
            // Strengths are per unit of normalized compression.
            spring_strength: k * travel,
            damper_strength: c * travel,
            gravity_comp: f_static * gravity_comp_fraction,
            relax_speed: 0.8,
        }
    }
}

/// Per-wheel mutable suspension state.
#[derive(Debug, Clone, Copy, Default)]
pub struct SuspensionState {
    pub last_compression: f32, // 0..1, previous tick
    pub grounded: bool,
}

/// Result of one suspension tick, consumed by the physics glue.
#[derive(Debug, Clone, Copy)]
pub struct SuspensionOutput {
    pub force: f32, // N, >= 0, applied upward at the contact point
    pub compression: f32,
    pub grounded: bool,
}

pub struct SuspensionUnit {
    pub config: SuspensionConfig,
    pub state: SuspensionState,
    /// Local orientation of the visual wheel mesh; None disables visual
    /// offset updates (force computation is unaffected).
    visual_frame: Option<UnitQuaternion<f32>>,
    visual_offset: Vector3<f32>, // local, relative to the neutral pose
}

impl SuspensionUnit {
    pub fn new(config: SuspensionConfig) -> Self {
        Self {
            config,
            state: SuspensionState::default(),
            visual_frame: Some(UnitQuaternion::identity()),
            visual_offset: Vector3::zeros(),
        }
    }

    pub fn with_visual_frame(mut self, frame: Option<UnitQuaternion<f32>>) -> Self {
        self.visual_frame = frame;
        self
    }

    /// Ray length the caller should use for the downward cast.
    pub fn ray_length(&self) -> f32 {
        self.config.travel + self.config.wheel_radius
    }

    /// Advance one fixed tick. `hit_distance` is the downward ray-cast result
    /// from the axle position (None = miss within `ray_length()`).
    pub fn step(&mut self, hit_distance: Option<f32>, dt: f32) -> SuspensionOutput {
        let dt = dt.max(1e-6);

        let Some(distance) = hit_distance else {
            self.state.grounded = false;
            self.state.last_compression = 0.0;
            self.relax_visual(dt);
            return SuspensionOutput { force: 0.0, compression: 0.0, grounded: false };
        };

        let cfg = &self.config;
        let compression =
            (1.0 - (distance - cfg.wheel_radius) / cfg.travel.max(1e-4)).clamp(0.0, 1.0);

        let rate = (compression - self.state.last_compression) / dt;
        // Rebound (extension) gets twice the damping of the compression stroke.
        let damper_coeff = if rate < 0.0 { cfg.damper_strength * 2.0 } else { cfg.damper_strength };

        let spring = compression * cfg.spring_strength;
        let damper = rate * damper_coeff;
        let force = (spring + damper - cfg.gravity_comp).max(0.0);

        self.state.last_compression = compression;
        self.state.grounded = true;
        self.update_visual(compression);

        SuspensionOutput { force, compression, grounded: true }
    }

    /// Current local-space offset of the visual wheel.
    pub fn visual_offset(&self) -> Vector3<f32> {
        self.visual_offset
    }

    fn update_visual(&mut self, compression: f32) {
        let Some(frame) = self.visual_frame else { return };

        // World-down in the wheel's local frame; the dominant component picks
        // which local axis the mesh treats as "down".
        let local_down = frame.inverse_transform_vector(&-Vector3::y());
        let dominant = local_down
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
            .map(|(i, v)| (i, v.signum()))
            .unwrap_or((1, -1.0));

        let mut offset = Vector3::zeros();
        offset[dominant.0] = -compression * self.config.travel * dominant.1;
        self.visual_offset = offset;
    }

    fn relax_visual(&mut self, dt: f32) {
        if self.visual_frame.is_none() {
            return;
        }
        let len = self.visual_offset.norm();
        if len <= 1e-5 {
            self.visual_offset = Vector3::zeros();
            return;
        }
        let step = self.config.relax_speed * dt;
        if step >= len {
            self.visual_offset = Vector3::zeros();
        } else {
            self.visual_offset -= self.visual_offset / len * step;
        }
    }
}
