// ==============================================================================
// gearbox.rs — GEAR STATE MACHINE + RATIO TABLES
// ------------------------------------------------------------------------------
// States: Reverse(-1), Neutral(0), Gear 1..=N. This is a Mealy machine: the
// torque the controller produces depends on both the gear and the current
// input, not the gear alone.
//
// Transitions:
// - Neutral (or forward gear braked down to near-stop) + sustained intent:
//   forward intent engages Gear 1, backward intent engages Reverse. The
//   `was_braking` latch records that the vehicle was decelerating before the
//   intent reversed, so holding "back" while still rolling forward brakes
//   instead of slamming into Reverse.
// - Forward gears: upshift when smoothed RPM exceeds `upshift_rpm` and a
//   higher gear exists; downshift when it falls below `downshift_rpm`.
// - Neutral drop when speed and input are both near zero.
// - Every transition is gated by a minimum dwell since the last shift.
// ==============================================================================

use crate::drivetrain::types::{DriveInput, DrivetrainConfig, DrivetrainState};

/// Immutable ratio tables plus the derived max-theoretical-speed-per-gear
/// table. Built once at vehicle construction; rebuild it if the wheel radius
/// or final drive changes.
#[derive(Debug, Clone)]
pub struct GearTable {
    ratios: Vec<f32>,
    reverse_ratio: f32,
    final_drive: f32,
    max_speed: Vec<f32>, // m/s per forward gear, same indexing as `ratios`
}

impl GearTable {
    pub fn new(config: &DrivetrainConfig) -> Self {
        // Zero wheel radius would poison every derived speed; clamp once here
        // instead of guarding every lookup.
        let radius = if config.wheel_radius > 1e-3 {
            config.wheel_radius
        } else {
            tracing::warn!(
                radius = config.wheel_radius,
                "wheel radius not physical, clamping to 1mm"
            );
            1e-3
        };
        let circumference = std::f32::consts::TAU * radius;

        let max_speed = config
            .gear_ratios
            .iter()
            .map(|ratio| {
                let wheel_rpm = config.max_rpm / (ratio * config.final_drive).max(1e-3);
                wheel_rpm / 60.0 * circumference
            })
            .collect();

        Self {
            ratios: config.gear_ratios.clone(),
            reverse_ratio: config.reverse_ratio,
            final_drive: config.final_drive,
            max_speed,
        }
    }

    pub fn top_gear(&self) -> i32 {
        self.ratios.len() as i32
    }

    /// Gear ratio magnitude for a verified in-range gear. Neutral and
    /// out-of-range indices yield None; the state machine never selects an
    /// index outside the table, so None only means "no torque path".
    pub fn ratio_for(&self, gear: i32) -> Option<f32> {
        match gear {
            -1 => Some(self.reverse_ratio),
            g if g >= 1 && g <= self.top_gear() => Some(self.ratios[(g - 1) as usize]),
            _ => None,
        }
    }

    pub fn final_drive(&self) -> f32 {
        self.final_drive
    }

    /// Theoretical top speed of a forward gear at max RPM.
    pub fn max_speed_for(&self, gear: i32) -> Option<f32> {
        if gear >= 1 && gear <= self.top_gear() {
            Some(self.max_speed[(gear - 1) as usize])
        } else {
            None
        }
    }
}

/// HUD mapping for the current gear.
pub fn gear_display(gear: i32) -> String {
    match gear {
        -1 => "R".to_string(),
        0 => "N".to_string(),
        g => g.to_string(),
    }
}

/// Advance the gear state machine one tick. `speed` is the signed forward
/// speed; `input` is already clamped and deadzoned by the controller.
pub fn update_gear(
    config: &DrivetrainConfig,
    table: &GearTable,
    state: &mut DrivetrainState,
    input: &DriveInput,
    speed: f32,
    dt: f32,
) {
    state.time_since_shift += dt;

    let dz = config.input_deadzone;
    let near_stop = speed.abs() < config.near_stop_speed;
    let dwell_ok = state.time_since_shift >= config.shift_dwell;

    let mut shift_to = |state: &mut DrivetrainState, gear: i32| {
        state.current_gear = gear;
        state.time_since_shift = 0.0;
        state.was_braking = false;
    };

    match state.current_gear {
        0 => {
            // Neutral: engage on sustained intent once (nearly) stationary.
            if dwell_ok && near_stop {
                if input.drive_axis > dz {
                    shift_to(state, 1);
                } else if input.drive_axis < -dz {
                    shift_to(state, -1);
                }
            }
        }
        -1 => {
            if input.drive_axis > dz {
                if near_stop {
                    if dwell_ok && state.was_braking {
                        shift_to(state, 1);
                    }
                } else {
                    // Still rolling backward: forward intent means braking.
                    state.was_braking = true;
                }
            } else if input.drive_axis >= -dz {
                state.was_braking = false;
                if dwell_ok && near_stop && input.brake < dz {
                    shift_to(state, 0);
                }
            }
        }
        gear => {
            if input.drive_axis < -dz {
                if near_stop {
                    if dwell_ok && state.was_braking {
                        shift_to(state, -1);
                    }
                } else {
                    state.was_braking = true;
                }
            } else {
                state.was_braking = false;

                if dwell_ok && near_stop && input.drive_axis < dz && input.brake < dz {
                    shift_to(state, 0);
                } else if dwell_ok
                    && state.engine_rpm > config.upshift_rpm
                    && gear < table.top_gear()
                {
                    shift_to(state, gear + 1);
                } else if dwell_ok && state.engine_rpm < config.downshift_rpm && gear > 1 {
                    shift_to(state, gear - 1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> DrivetrainConfig {
        DrivetrainConfig::gt86()
    }

    fn state(config: &DrivetrainConfig) -> DrivetrainState {
        let mut s = DrivetrainState::new(config.idle_rpm);
        s.time_since_shift = config.shift_dwell;
        s
    }

    #[test]
    fn derived_speeds_descend_with_ratio() {
        let cfg = config();
        let table = GearTable::new(&cfg);
        for g in 1..table.top_gear() {
            assert!(
                table.max_speed_for(g).unwrap() < table.max_speed_for(g + 1).unwrap(),
                "higher gears must allow higher speed"
            );
        }
    }

    #[test]
    fn zero_radius_does_not_poison_table() {
        let mut cfg = config();
        cfg.wheel_radius = 0.0;
        let table = GearTable::new(&cfg);
        assert!(table.max_speed_for(1).unwrap().is_finite());
    }

    #[test]
    fn throttle_from_stop_engages_first_gear() {
        let cfg = config();
        let table = GearTable::new(&cfg);
        let mut st = state(&cfg);
        let input = DriveInput { drive_axis: 1.0, ..Default::default() };
        update_gear(&cfg, &table, &mut st, &input, 0.0, 0.02);
        assert_eq!(st.current_gear, 1);
    }

    #[test]
    fn reverse_intent_from_stop_engages_reverse() {
        let cfg = config();
        let table = GearTable::new(&cfg);
        let mut st = state(&cfg);
        let input = DriveInput { drive_axis: -1.0, ..Default::default() };
        update_gear(&cfg, &table, &mut st, &input, 0.0, 0.02);
        assert_eq!(st.current_gear, -1);
    }

    #[test]
    fn back_axis_while_moving_brakes_instead_of_reversing() {
        let cfg = config();
        let table = GearTable::new(&cfg);
        let mut st = state(&cfg);
        st.current_gear = 2;
        let input = DriveInput { drive_axis: -1.0, ..Default::default() };

        // Rolling forward at 10 m/s: must stay in gear and latch.
        update_gear(&cfg, &table, &mut st, &input, 10.0, 0.02);
        assert_eq!(st.current_gear, 2);
        assert!(st.was_braking);

        // Once braked down to near-stop the latch allows reverse.
        st.time_since_shift = cfg.shift_dwell;
        update_gear(&cfg, &table, &mut st, &input, 0.1, 0.02);
        assert_eq!(st.current_gear, -1);
    }

    #[test]
    fn shifts_respect_dwell_interval() {
        let cfg = config();
        let table = GearTable::new(&cfg);
        let mut st = state(&cfg);
        st.current_gear = 1;
        st.engine_rpm = cfg.upshift_rpm + 500.0;
        let input = DriveInput { drive_axis: 1.0, ..Default::default() };

        update_gear(&cfg, &table, &mut st, &input, 15.0, 0.02);
        assert_eq!(st.current_gear, 2);

        // RPM still above the threshold, but the dwell timer just reset.
        update_gear(&cfg, &table, &mut st, &input, 15.0, 0.02);
        assert_eq!(st.current_gear, 2, "second shift must wait out the dwell");

        let mut elapsed = 0.02;
        while elapsed < cfg.shift_dwell {
            update_gear(&cfg, &table, &mut st, &input, 15.0, 0.02);
            elapsed += 0.02;
        }
        assert_eq!(st.current_gear, 3);
    }

    #[test]
    fn downshift_below_threshold() {
        let cfg = config();
        let table = GearTable::new(&cfg);
        let mut st = state(&cfg);
        st.current_gear = 3;
        st.engine_rpm = cfg.downshift_rpm - 200.0;
        let input = DriveInput { drive_axis: 0.3, ..Default::default() };
        update_gear(&cfg, &table, &mut st, &input, 8.0, 0.02);
        assert_eq!(st.current_gear, 2);
    }

    #[test]
    fn upshift_never_exceeds_table() {
        let cfg = config();
        let table = GearTable::new(&cfg);
        let mut st = state(&cfg);
        st.current_gear = table.top_gear();
        st.engine_rpm = cfg.max_rpm;
        let input = DriveInput { drive_axis: 1.0, ..Default::default() };
        update_gear(&cfg, &table, &mut st, &input, 40.0, 0.02);
        assert_eq!(st.current_gear, table.top_gear());
    }

    #[test]
    fn neutral_drop_at_rest_with_no_input() {
        let cfg = config();
        let table = GearTable::new(&cfg);
        let mut st = state(&cfg);
        st.current_gear = 1;
        update_gear(&cfg, &table, &mut st, &DriveInput::default(), 0.05, 0.02);
        assert_eq!(st.current_gear, 0);
    }

    #[test]
    fn display_mapping() {
        assert_eq!(gear_display(-1), "R");
        assert_eq!(gear_display(0), "N");
        assert_eq!(gear_display(4), "4");
    }
}
