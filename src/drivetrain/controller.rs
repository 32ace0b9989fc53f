// ==============================================================================
// controller.rs — DRIVETRAIN CONTROLLER (PER-TICK MEALY STEP)
// ------------------------------------------------------------------------------
// The single source of truth for what a vehicle's transmission is doing.
// Every fixed tick:
//
// 1) traction update     <- previous tick's forward slip
// 2) RPM update          <- previous tick's wheel rotation speeds
// 3) gear state machine  <- smoothed RPM + input + speed
// 4) torque + braking    -> per-corner motor / brake torque
// 5) steering            -> per-corner steer angle (Ackermann split)
// 6) drift assist        -> lateral force + yaw torque for the chassis
//
// Steps 1-2 consume what the physics engine wrote back LAST tick, before any
// new command is produced, so the loop never reads its own output within a
// tick. Output depends on both state and input (Mealy), e.g. the same Gear 1
// produces drive torque or brake torque depending on the axis sign.
// ==============================================================================

use crate::drivetrain::engine;
use crate::drivetrain::gearbox::{self, GearTable};
use crate::drivetrain::steering;
use crate::drivetrain::traction;
use crate::drivetrain::types::{
    ChassisMotion, CornerConfig, DriftForces, DriveInput, DrivetrainConfig, DrivetrainState,
    TickOutput, WheelCommand, WheelCorner, WheelTelemetry,
};

pub struct DrivetrainController {
    config: DrivetrainConfig,
    corners: [CornerConfig; 4],
    table: GearTable,
    state: DrivetrainState,
}

impl DrivetrainController {
    pub fn new(config: DrivetrainConfig, corners: [CornerConfig; 4]) -> Self {
        let table = GearTable::new(&config);
        let state = DrivetrainState::new(config.idle_rpm);
        Self { config, corners, table, state }
    }

    /// One fixed simulation step. `wheels` holds the previous tick's
    /// telemetry per corner (None = missing proxy, that corner degrades to
    /// zero torque and contributes nothing to RPM/traction estimates).
    pub fn step(
        &mut self,
        input: DriveInput,
        motion: ChassisMotion,
        wheels: &[Option<WheelTelemetry>; 4],
        dt: f32,
    ) -> TickOutput {
        let input = input.clamped();
        let cfg = &self.config;
        let speed = motion.forward_speed;
        let dz = cfg.input_deadzone;

        // ------------------------------------------------------------
        // 1-2) Feedback from last tick: traction, then RPM
        // ------------------------------------------------------------
        let powered: Vec<&WheelTelemetry> = self
            .corners
            .iter()
            .filter(|c| c.powered)
            .filter_map(|c| wheels[c.corner.index()].as_ref())
            .collect();

        traction::update_traction(cfg, &mut self.state, traction::average_slip(&powered), dt);

        let estimate = self
            .table
            .ratio_for(self.state.current_gear)
            .and_then(|ratio| engine::estimate_rpm(ratio, self.table.final_drive(), &powered));
        engine::update_rpm(cfg, &mut self.state, estimate, dt);

        // ------------------------------------------------------------
        // 3) Gear state machine
        // ------------------------------------------------------------
        gearbox::update_gear(cfg, &self.table, &mut self.state, &input, speed, dt);
        let gear = self.state.current_gear;

        // ------------------------------------------------------------
        // 4) Resolve intent: throttle vs. brake for the current gear
        // ------------------------------------------------------------
        let mut throttle = 0.0_f32;
        let mut brake_level = input.brake;

        match gear {
            g if g >= 1 => {
                throttle = input.drive_axis.max(0.0);
                if input.drive_axis < -dz {
                    // Back axis in a forward gear is deceleration intent.
                    brake_level = brake_level.max(-input.drive_axis);
                }
            }
            -1 => {
                throttle = (-input.drive_axis).max(0.0);
                if input.drive_axis > dz && speed < -cfg.near_stop_speed {
                    brake_level = brake_level.max(input.drive_axis);
                }
                // Reverse speed cap: exceeding it brakes regardless of input.
                if speed < -cfg.reverse_speed_cap {
                    throttle = 0.0;
                    brake_level = 1.0;
                }
            }
            _ => {}
        }

        let explicit_brake = brake_level > dz;
        let driving = !explicit_brake && throttle > dz && gear != 0;
        let coasting = !explicit_brake && throttle <= dz && gear != 0;

        let n_powered = self.corners.iter().filter(|c| c.powered).count() as f32;
        let wheel_motor = if driving && n_powered > 0.0 {
            let ratio = self.table.ratio_for(gear).unwrap_or(0.0);
            let direction = if gear >= 1 { 1.0 } else { -1.0 };
            let scale = if gear == -1 { cfg.reverse_torque_scale } else { 1.0 };
            let engine_torque =
                engine::torque_at(cfg, self.state.engine_rpm) * self.state.traction * throttle;
            direction * engine_torque * scale * ratio * self.table.final_drive() / n_powered
        } else {
            0.0
        };

        let engine_brake = if coasting {
            engine::engine_brake_at(cfg, self.state.engine_rpm)
        } else {
            0.0
        };

        // ------------------------------------------------------------
        // 5) Steering
        // ------------------------------------------------------------
        let target = steering::steer_target(cfg, input.steer_axis, speed);
        steering::smooth_steer(cfg, &mut self.state, target, dt);
        let (fl_angle, fr_angle) = steering::ackermann_split(
            cfg.wheelbase,
            cfg.track_width,
            self.state.current_steer_angle,
        );

        // ------------------------------------------------------------
        // Per-corner commands
        // ------------------------------------------------------------
        let mut commands = [WheelCommand::default(); 4];
        for corner in &self.corners {
            let cmd = &mut commands[corner.corner.index()];

            if corner.powered {
                cmd.motor_torque = wheel_motor;
            }

            cmd.brake_torque = if explicit_brake && corner.brake_enabled {
                brake_level * cfg.max_brake_torque
            } else if coasting && corner.powered {
                engine_brake
            } else if driving && !corner.powered {
                // Small stabilizing drag on the free axle while driving.
                cfg.stabilize_brake_torque
            } else {
                0.0
            };

            if corner.steerable {
                cmd.steer_angle = match corner.corner {
                    WheelCorner::FrontLeft => fl_angle,
                    WheelCorner::FrontRight => fr_angle,
                    _ => self.state.current_steer_angle,
                };
            }
        }

        // ------------------------------------------------------------
        // 6) Drift assist
        // ------------------------------------------------------------
        let drift = if input.steer_axis.abs() > dz && speed.abs() > cfg.drift_min_speed {
            Some(DriftForces {
                lateral_force: -motion.sideways_speed * cfg.mass * cfg.drift_factor,
                yaw_torque: input.steer_axis.signum()
                    * motion.sideways_speed.abs()
                    * cfg.mass
                    * cfg.drift_yaw_gain,
            })
        } else {
            None
        };

        TickOutput { commands, drift }
    }

    // ------------------------------------------------------------
    // Read-only telemetry accessors (collaborators poll, never push)
    // ------------------------------------------------------------

    pub fn config(&self) -> &DrivetrainConfig {
        &self.config
    }

    pub fn corners(&self) -> &[CornerConfig; 4] {
        &self.corners
    }

    pub fn gear(&self) -> i32 {
        self.state.current_gear
    }

    pub fn gear_display(&self) -> String {
        gearbox::gear_display(self.state.current_gear)
    }

    /// Smoothed RPM clamped to the displayable idle..max band.
    pub fn rpm_display(&self) -> f32 {
        engine::display_rpm(&self.config, self.state.engine_rpm)
    }

    pub fn traction(&self) -> f32 {
        self.state.traction
    }

    pub fn steer_angle(&self) -> f32 {
        self.state.current_steer_angle
    }

    pub fn steer_angle_deg(&self) -> f32 {
        self.state.current_steer_angle.to_degrees()
    }

    #[cfg(test)]
    pub(crate) fn state_mut(&mut self) -> &mut DrivetrainState {
        &mut self.state
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller() -> DrivetrainController {
        DrivetrainController::new(DrivetrainConfig::gt86(), CornerConfig::rwd())
    }

    fn all_wheels(t: WheelTelemetry) -> [Option<WheelTelemetry>; 4] {
        [Some(t); 4]
    }

    const REAR: [usize; 2] = [2, 3];
    const FRONT: [usize; 2] = [0, 1];

    #[test]
    fn throttle_from_rest_engages_and_drives_first_tick() {
        let mut ctl = controller();
        let input = DriveInput { drive_axis: 1.0, ..Default::default() };
        let out = ctl.step(input, ChassisMotion::default(), &all_wheels(WheelTelemetry::default()), 0.02);

        assert_eq!(ctl.gear(), 1);
        for i in REAR {
            assert!(out.commands[i].motor_torque > 0.0, "rear wheels must be driven");
        }
        for i in FRONT {
            assert_eq!(out.commands[i].motor_torque, 0.0);
            assert!(out.commands[i].brake_torque > 0.0, "free axle gets stabilizing drag");
        }
    }

    #[test]
    fn rpm_rises_above_idle_within_a_few_ticks() {
        let mut ctl = controller();
        let idle = ctl.config().idle_rpm;
        let input = DriveInput { drive_axis: 1.0, ..Default::default() };

        let mut speed = 0.0;
        for tick in 0..10 {
            // Wheels spin up as the vehicle pulls away.
            let rot = 4.0 * tick as f32;
            let motion = ChassisMotion { forward_speed: speed, sideways_speed: 0.0 };
            ctl.step(input, motion, &all_wheels(WheelTelemetry { rotation_speed: rot, forward_slip: 0.0 }), 0.02);
            speed += 0.3;
        }
        assert!(ctl.rpm_display() > idle, "rpm must leave idle under throttle");
    }

    #[test]
    fn coasting_in_gear_applies_engine_braking_only() {
        let mut ctl = controller();
        ctl.state_mut().current_gear = 3;
        ctl.state_mut().engine_rpm = 2500.0;

        // 50 km/h, wheels rolling cleanly, no pedals.
        let speed = 50.0 / 3.6;
        let rot = speed / ctl.config().wheel_radius;
        let motion = ChassisMotion { forward_speed: speed, sideways_speed: 0.0 };
        let out = ctl.step(
            DriveInput::default(),
            motion,
            &all_wheels(WheelTelemetry { rotation_speed: rot, forward_slip: 0.0 }),
            0.02,
        );

        assert_eq!(ctl.gear(), 3);
        for i in REAR {
            let brake = out.commands[i].brake_torque;
            assert!(brake > 0.0, "coasting must engine-brake the powered wheels");
            assert!(brake < ctl.config().max_brake_torque * 0.5, "engine braking is not a full brake");
            assert_eq!(out.commands[i].motor_torque, 0.0);
        }
    }

    #[test]
    fn explicit_brake_wins_over_throttle() {
        let mut ctl = controller();
        ctl.state_mut().current_gear = 2;
        let motion = ChassisMotion { forward_speed: 12.0, sideways_speed: 0.0 };
        let input = DriveInput { drive_axis: 1.0, brake: 1.0, ..Default::default() };
        let out = ctl.step(input, motion, &all_wheels(WheelTelemetry::default()), 0.02);

        for cmd in &out.commands {
            assert_eq!(cmd.motor_torque, 0.0);
            assert!((cmd.brake_torque - ctl.config().max_brake_torque).abs() < 1e-3);
        }
    }

    #[test]
    fn exceeding_reverse_cap_forces_braking() {
        let mut ctl = controller();
        ctl.state_mut().current_gear = -1;
        let cap = ctl.config().reverse_speed_cap;
        let motion = ChassisMotion { forward_speed: -(cap + 2.0), sideways_speed: 0.0 };
        // Driver still asking for more reverse.
        let input = DriveInput { drive_axis: -1.0, ..Default::default() };
        let out = ctl.step(input, motion, &all_wheels(WheelTelemetry::default()), 0.02);

        for cmd in &out.commands {
            assert_eq!(cmd.motor_torque, 0.0);
            assert!(cmd.brake_torque > 0.0);
        }
    }

    #[test]
    fn missing_proxies_degrade_to_zero_torque() {
        let mut ctl = controller();
        let input = DriveInput { drive_axis: 1.0, ..Default::default() };
        // Rear proxies absent: gear still engages, but no RPM estimate and
        // the commands for those corners are produced normally (the physics
        // side simply has nowhere to write them).
        let wheels = [Some(WheelTelemetry::default()), Some(WheelTelemetry::default()), None, None];
        let out = ctl.step(input, ChassisMotion::default(), &wheels, 0.02);
        assert_eq!(ctl.gear(), 1);
        assert!(out.commands[2].motor_torque.is_finite());
    }

    #[test]
    fn rest_in_neutral_is_a_fixed_point() {
        let mut ctl = controller();
        let wheels = all_wheels(WheelTelemetry::default());

        for _ in 0..600 {
            ctl.step(DriveInput::default(), ChassisMotion::default(), &wheels, 0.02);
        }
        let gear = ctl.gear();
        let rpm = ctl.rpm_display();
        let steer = ctl.steer_angle();
        let traction = ctl.traction();

        for _ in 0..50 {
            let out = ctl.step(DriveInput::default(), ChassisMotion::default(), &wheels, 0.02);
            for cmd in &out.commands {
                assert_eq!(cmd.motor_torque, 0.0);
                assert_eq!(cmd.brake_torque, 0.0);
                assert_eq!(cmd.steer_angle, 0.0);
            }
        }

        assert_eq!(ctl.gear(), gear);
        assert_eq!(gear, 0);
        assert!((ctl.rpm_display() - rpm).abs() < 1e-2);
        assert!((rpm - ctl.config().idle_rpm).abs() < 1.0);
        assert_eq!(ctl.steer_angle(), steer);
        assert_eq!(steer, 0.0);
        assert!((ctl.traction() - traction).abs() < 1e-6);
    }

    #[test]
    fn drift_assist_opposes_sideways_velocity() {
        let mut ctl = controller();
        ctl.state_mut().current_gear = 3;
        let motion = ChassisMotion { forward_speed: 20.0, sideways_speed: 3.0 };
        let input = DriveInput { drive_axis: 0.5, steer_axis: 1.0, ..Default::default() };
        let out = ctl.step(input, motion, &all_wheels(WheelTelemetry::default()), 0.02);

        let drift = out.drift.expect("fast cornering must produce drift forces");
        assert!(drift.lateral_force < 0.0, "force opposes positive sideways velocity");
        assert!(drift.yaw_torque > 0.0, "yaw torque follows the turn direction");

        // Below the speed threshold: no drift assist.
        let slow = ChassisMotion { forward_speed: 2.0, sideways_speed: 3.0 };
        let out = ctl.step(input, slow, &all_wheels(WheelTelemetry::default()), 0.02);
        assert!(out.drift.is_none());
    }

    #[test]
    fn wheelspin_cuts_torque_through_traction() {
        let mut ctl = controller();
        ctl.state_mut().current_gear = 2;
        let motion = ChassisMotion { forward_speed: 10.0, sideways_speed: 0.0 };
        let input = DriveInput { drive_axis: 1.0, ..Default::default() };

        let clean = ctl.step(input, motion, &all_wheels(WheelTelemetry { rotation_speed: 30.0, forward_slip: 0.0 }), 0.02);
        let clean_torque = clean.commands[2].motor_torque;

        let mut slipping = controller();
        slipping.state_mut().current_gear = 2;
        for _ in 0..30 {
            slipping.step(input, motion, &all_wheels(WheelTelemetry { rotation_speed: 30.0, forward_slip: 0.9 }), 0.02);
        }
        let out = slipping.step(input, motion, &all_wheels(WheelTelemetry { rotation_speed: 30.0, forward_slip: 0.9 }), 0.02);
        assert!(out.commands[2].motor_torque < clean_torque * 0.5);
    }
}
