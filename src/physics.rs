// src/physics.rs
//
// Rapier integration layer. Owns the world, the vehicles, and the fixed-tick
// pipeline that wires the drivetrain controller and the suspension units to
// actual rigid bodies:
//
//   1) raycast suspension  -> upward impulses + contact capture
//   2) telemetry write-back into the wheel proxies (previous commands feed
//      the slip estimate, so the controller always reads last tick's truth)
//   3) controller step     -> per-wheel commands + drift forces
//   4) drive / brake / drift impulses at the contact patches
//   5) rapier step
//   6) runaway-body failsafe
//
// Chassis local axes: +Z forward, +X right, +Y up.

use rapier3d::prelude::*;
use rapier3d::prelude::{Group, InteractionGroups};
use rapier3d::na::UnitQuaternion;
use std::collections::HashMap;
use tracing::{info, warn};

use crate::drivetrain::{
    ChassisMotion, CornerConfig, DriveInput, DrivetrainConfig, DrivetrainController, WheelCorner,
    WheelProxy, WheelTelemetry,
};
use crate::suspension::{SuspensionConfig, SuspensionUnit};

const GROUP_GROUND: Group = Group::from_bits_truncate(0b0001);
const GROUP_CHASSIS: Group = Group::from_bits_truncate(0b0010);

// Fraction of the normal impulse a tire can convert to longitudinal impulse.
const TIRE_GRIP: f32 = 0.8;
// Below this contact-patch speed the brakes hold instead of chatter.
const BRAKE_DEADZONE: f32 = 0.05; // m/s

#[derive(Clone, Copy)]
pub struct ChassisConfig {
    pub half_extents: [f32; 3],  // [hx, hy, hz] meters
    pub com_offset: [f32; 3],    // local offset from collider center
    pub linear_damping: f32,     // drag
    pub angular_damping: f32,    // rotational drag
    pub spawn_height: f32,       // meters above ground
    pub suspension_travel: f32,  // meters
    pub suspension_sag: f32,     // meters of static sag, sets spring rate
    pub suspension_zeta: f32,    // damping ratio
    pub gravity_comp_frac: f32,  // share of static load the spring ignores
    /// Collision groups the suspension rays test against. None falls back
    /// to the default ground group at spawn (logged).
    pub ground_groups: Option<InteractionGroups>,
}

pub const GT86_CHASSIS: ChassisConfig = ChassisConfig {
    half_extents: [1.0, 0.35, 2.1],
    com_offset: [0.0, -0.15, 0.0], // slightly below visual center
    linear_damping: 0.08,
    angular_damping: 0.6,
    spawn_height: 1.0,
    suspension_travel: 0.4,
    suspension_sag: 0.05,
    suspension_zeta: 0.9,
    gravity_comp_frac: 0.25,
    ground_groups: Some(InteractionGroups {
        memberships: GROUP_CHASSIS,
        filter: GROUP_GROUND,
    }),
};

pub struct Wheel {
    pub corner: WheelCorner,
    pub offset: Point<Real>, // axle position in chassis local space
    pub ground_groups: InteractionGroups,
    pub suspension: SuspensionUnit,
    pub proxy: WheelProxy,
}

pub struct Vehicle {
    pub body: RigidBodyHandle,
    pub chassis: ChassisConfig,
    pub controller: DrivetrainController,
    pub input: DriveInput,
    pub wheels: Vec<Wheel>,
}

// Captured during the suspension pass, consumed by the traction pass.
struct ContactPatch {
    apply_point: Point<Real>,
    forward: Vector<Real>, // steered, ground-projected, unit length
    v_long: f32,
    capacity: f32, // max longitudinal impulse this tick (N*s)
}

pub struct PhysicsWorld {
    pub gravity: Vector<Real>,
    pub pipeline: PhysicsPipeline,
    pub island_manager: IslandManager,
    pub broad_phase: DefaultBroadPhase,
    pub narrow_phase: NarrowPhase,
    pub bodies: RigidBodySet,
    pub colliders: ColliderSet,
    pub joints: ImpulseJointSet,
    pub multibody_joints: MultibodyJointSet,
    pub ccd: CCDSolver,
    pub query_pipeline: QueryPipeline,
    pub vehicles: HashMap<String, Vehicle>, // playerId -> vehicle
}

impl PhysicsWorld {
    pub fn new() -> Self {
        let gravity = vector![0.0, -9.81, 0.0];

        let mut bodies = RigidBodySet::new();
        let mut colliders = ColliderSet::new();

        // Big static ground slab, top surface at y = 0.
        let ground_rb = RigidBodyBuilder::fixed()
            .translation(vector![0.0, -1.0, 0.0])
            .build();
        let ground_handle = bodies.insert(ground_rb);

        let ground_collider = ColliderBuilder::cuboid(500.0, 1.0, 500.0)
            .collision_groups(InteractionGroups::new(GROUP_GROUND, GROUP_CHASSIS))
            .friction(1.2)
            .restitution(0.0)
            .build();
        colliders.insert_with_parent(ground_collider, ground_handle, &mut bodies);

        info!(bodies = bodies.len(), colliders = colliders.len(), "ground inserted");

        Self {
            gravity,
            pipeline: PhysicsPipeline::new(),
            island_manager: IslandManager::new(),
            broad_phase: DefaultBroadPhase::new(),
            narrow_phase: NarrowPhase::new(),
            bodies,
            colliders,
            joints: ImpulseJointSet::new(),
            multibody_joints: MultibodyJointSet::new(),
            ccd: CCDSolver::new(),
            query_pipeline: QueryPipeline::new(),
            vehicles: HashMap::new(),
        }
    }

    /// Store a player's input; forces are applied in `step`.
    pub fn apply_player_input(&mut self, player_id: &str, drive_axis: f32, steer_axis: f32, brake: f32) {
        if let Some(v) = self.vehicles.get_mut(player_id) {
            v.input = DriveInput { drive_axis, steer_axis, brake }.clamped();
        } else {
            warn!(player_id, "input for unknown vehicle");
        }
    }

    /// Spawn a rear-wheel-drive car for this player: a dynamic box chassis
    /// plus four raycast suspension wheels.
    pub fn spawn_vehicle_for_player(&mut self, id: String, position: [f32; 3]) {
        let chassis = GT86_CHASSIS;
        let drivetrain = DrivetrainConfig::gt86();

        let spawn = vector![position[0], chassis.spawn_height, position[2]];

        let rb = RigidBodyBuilder::dynamic()
            .translation(spawn)
            .linear_damping(chassis.linear_damping)
            .angular_damping(chassis.angular_damping)
            .ccd_enabled(true)
            .build();

        let [hx, hy, hz] = chassis.half_extents;
        let [cx, cy, cz] = chassis.com_offset;
        let volume = 8.0 * hx * hy * hz;

        let collider = ColliderBuilder::cuboid(hx, hy, hz)
            .translation(vector![cx, cy, cz])
            .collision_groups(InteractionGroups::new(GROUP_CHASSIS, GROUP_GROUND))
            .active_events(ActiveEvents::empty())
            .density(drivetrain.mass / volume)
            .friction(0.0) // tires do the gripping, not the hull
            .restitution(0.0)
            .build();

        let handle = self.bodies.insert(rb);
        self.colliders.insert_with_parent(collider, handle, &mut self.bodies);

        let wheels = build_wheels(&chassis, &drivetrain);
        let controller = DrivetrainController::new(drivetrain, CornerConfig::rwd());

        self.vehicles.insert(
            id.clone(),
            Vehicle { body: handle, chassis, controller, input: DriveInput::default(), wheels },
        );

        info!(player_id = %id, ?position, body = ?handle, "spawned vehicle");
    }

    /// Remove a player's vehicle and its rigid body.
    pub fn despawn_vehicle(&mut self, player_id: &str) {
        let Some(vehicle) = self.vehicles.remove(player_id) else { return };
        self.bodies.remove(
            vehicle.body,
            &mut self.island_manager,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            true,
        );
        info!(player_id, "despawned vehicle");
    }

    pub fn step(&mut self, dt: Real) {
        self.query_pipeline.update(&self.colliders);

        for vehicle in self.vehicles.values_mut() {
            let Some(body_ro) = self.bodies.get(vehicle.body) else { continue };

            let pos = *body_ro.position();
            let rot = pos.rotation;
            let linvel = *body_ro.linvel();
            let angvel = *body_ro.angvel();
            let com = pos * *body_ro.center_of_mass();
            let mass = body_ro.mass();

            let chassis_forward = rot * vector![0.0, 0.0, 1.0];
            let chassis_right = rot * vector![1.0, 0.0, 0.0];
            let ground_n: Vector<Real> = vector![0.0, 1.0, 0.0];

            let mut impulses: Vec<(Vector<Real>, Option<Point<Real>>)> = Vec::new();
            let mut contacts: [Option<ContactPatch>; 4] = [None, None, None, None];
            let powered = vehicle.controller.corners().map(|c| c.powered);

            // --------------------------------------------------------
            // 1) Suspension raycast pass + 2) telemetry write-back
            // --------------------------------------------------------
            for wheel in vehicle.wheels.iter_mut() {
                let origin = pos * wheel.offset;
                let dir: Vector<Real> = vector![0.0, -1.0, 0.0];
                let ray = Ray::new(origin, dir);
                let filter = QueryFilter::default()
                    .exclude_rigid_body(vehicle.body)
                    .groups(wheel.ground_groups);

                let hit = self
                    .query_pipeline
                    .cast_ray(&self.bodies, &self.colliders, &ray, wheel.suspension.ray_length(), true, filter)
                    .map(|(_, toi)| toi);

                let out = wheel.suspension.step(hit, dt);

                if !out.grounded {
                    // Airborne: freewheel decay, no slip to report.
                    wheel.proxy.telemetry.rotation_speed *= (-2.0 * dt).exp();
                    wheel.proxy.telemetry.forward_slip = 0.0;
                    continue;
                }

                let hit_point = origin + dir * hit.unwrap_or(0.0);
                impulses.push((ground_n * (out.force * dt), Some(hit_point)));

                // Contact-patch velocity: v = v_lin + w x r
                let r = hit_point.coords - com.coords;
                let point_vel = linvel + angvel.cross(&r);

                // Steered forward direction, projected onto the ground plane.
                let steer_rot =
                    UnitQuaternion::from_axis_angle(&Vector::y_axis(), wheel.proxy.command.steer_angle);
                let wheel_forward = {
                    let v = steer_rot * chassis_forward;
                    let flat = v - ground_n * v.dot(&ground_n);
                    if flat.magnitude() > 1e-6 { flat.normalize() } else { chassis_forward }
                };
                let v_long = point_vel.dot(&wheel_forward);

                // Slip estimate: how far last tick's drive demand overran the
                // impulse the contact patch could actually transmit.
                let radius = wheel.suspension.config.wheel_radius.max(1e-3);
                let capacity = (out.force * dt * TIRE_GRIP).max(1e-6);
                let demand = wheel.proxy.command.motor_torque.abs() / radius * dt;
                let slip = (demand / capacity - 1.0).clamp(0.0, 1.0);

                wheel.proxy.telemetry.forward_slip = slip;
                let mut rotation = v_long / radius;
                if powered[wheel.corner.index()] {
                    // A slipping driven wheel spins faster than it rolls.
                    rotation *= 1.0 + slip;
                }
                wheel.proxy.telemetry.rotation_speed = rotation;

                let apply_point = hit_point + ground_n * (radius * 0.25);
                contacts[wheel.corner.index()] =
                    Some(ContactPatch { apply_point, forward: wheel_forward, v_long, capacity });
            }

            // --------------------------------------------------------
            // 3) Controller step
            // --------------------------------------------------------
            let motion = ChassisMotion {
                forward_speed: linvel.dot(&chassis_forward),
                sideways_speed: linvel.dot(&chassis_right),
            };

            let mut telemetry: [Option<WheelTelemetry>; 4] = [None; 4];
            for wheel in &vehicle.wheels {
                telemetry[wheel.corner.index()] = Some(wheel.proxy.telemetry);
            }

            let output = vehicle.controller.step(vehicle.input, motion, &telemetry, dt as f32);

            for wheel in vehicle.wheels.iter_mut() {
                wheel.proxy.command = output.commands[wheel.corner.index()];
            }

            // --------------------------------------------------------
            // 4) Drive / brake impulses at the contact patches
            // --------------------------------------------------------
            for wheel in &vehicle.wheels {
                let Some(contact) = &contacts[wheel.corner.index()] else { continue };
                let cmd = &wheel.proxy.command;
                let radius = wheel.suspension.config.wheel_radius.max(1e-3);

                if cmd.motor_torque.abs() > 0.0 {
                    let j = (cmd.motor_torque / radius * dt).clamp(-contact.capacity, contact.capacity);
                    impulses.push((contact.forward * j, Some(contact.apply_point)));
                }

                if cmd.brake_torque > 0.0 && contact.v_long.abs() > BRAKE_DEADZONE {
                    let wanted = cmd.brake_torque / radius * dt;
                    // Never more than what stops this wheel's momentum share.
                    let stop = contact.v_long.abs() * mass / vehicle.wheels.len().max(1) as f32;
                    let j = wanted.min(stop).min(contact.capacity);
                    impulses.push((contact.forward * (-contact.v_long.signum() * j), Some(contact.apply_point)));
                }
            }

            // Drift assist acts on the chassis as a whole.
            if let Some(drift) = output.drift {
                impulses.push((chassis_right * (drift.lateral_force * dt), None));
                if let Some(body) = self.bodies.get_mut(vehicle.body) {
                    body.apply_torque_impulse(vector![0.0, drift.yaw_torque * dt, 0.0], true);
                }
            }

            if let Some(body) = self.bodies.get_mut(vehicle.body) {
                for (impulse, point) in impulses {
                    match point {
                        Some(p) => body.apply_impulse_at_point(impulse, p, true),
                        None => body.apply_impulse(impulse, true),
                    }
                }
            }
        }

        // --------------------------------------------------------
        // 5) Rapier step
        // --------------------------------------------------------
        let hooks = ();
        let mut events = ();
        self.pipeline.step(
            &self.gravity,
            &IntegrationParameters { dt, ..IntegrationParameters::default() },
            &mut self.island_manager,
            &mut self.broad_phase,
            &mut self.narrow_phase,
            &mut self.bodies,
            &mut self.colliders,
            &mut self.joints,
            &mut self.multibody_joints,
            &mut self.ccd,
            Some(&mut self.query_pipeline),
            &mut events,
            &hooks,
        );

        // --------------------------------------------------------
        // 6) Failsafe: reset bodies that escaped to insane coordinates
        // --------------------------------------------------------
        for (_, body) in self.bodies.iter_mut() {
            let pos = *body.translation();
            let bad = !pos.x.is_finite()
                || !pos.y.is_finite()
                || !pos.z.is_finite()
                || pos.x.abs() > 1_000.0
                || pos.y.abs() > 1_000.0
                || pos.z.abs() > 1_000.0;

            if bad {
                body.set_translation(vector![0.0, 1.0, 0.0], true);
                body.set_linvel(vector![0.0, 0.0, 0.0], true);
                body.set_angvel(vector![0.0, 0.0, 0.0], true);
                warn!(?pos, "reset runaway body");
            }
        }
    }
}

fn build_wheels(chassis: &ChassisConfig, drivetrain: &DrivetrainConfig) -> Vec<Wheel> {
    let half_track = drivetrain.track_width * 0.5;
    let half_base = drivetrain.wheelbase * 0.5;
    let axle_drop = -0.3; // axle height below chassis center

    let ground_groups = chassis.ground_groups.unwrap_or_else(|| {
        warn!("chassis has no ground collision groups, defaulting to the ground group");
        InteractionGroups::new(GROUP_CHASSIS, GROUP_GROUND)
    });

    let suspension = SuspensionConfig::from_sag(
        drivetrain.mass,
        4,
        chassis.suspension_sag,
        chassis.suspension_zeta,
        chassis.suspension_travel,
        drivetrain.wheel_radius,
        chassis.gravity_comp_frac,
    );

    WheelCorner::ALL
        .iter()
        .map(|&corner| {
            let x = if corner.is_left() { -half_track } else { half_track };
            let z = if corner.is_front() { half_base } else { -half_base };
            Wheel {
                corner,
                offset: point![x, axle_drop, z],
                ground_groups,
                suspension: SuspensionUnit::new(suspension.clone()),
                proxy: WheelProxy::default(),
            }
        })
        .collect()
}
