//! controller.rs
//! Per-cycle orchestration: phase sequencing, sensor read, safety check, inference,
//! post-processing and command write.
//!
//! Lifecycle: `configure` (files, fatal on error) -> `activate` (bind registers, capture the
//! current pose) -> `update` once per period -> `deactivate`. A cycle either writes a full
//! command set or returns a `CycleError` without touching the command bank.

use std::time::Duration;

use log::{debug, error, info};

use crate::actuation::{ActionPostProcessor, ActionVector, SafetyMonitor};
use crate::config::{
    ACTION_SIZE, ActionKind, ControllerParams, IDENTITY_TOLERANCE, PolicyParameters,
};
use crate::control::command_cell::CommandReader;
use crate::control::phase::{ControlPhase, PhaseTiming};
use crate::error::{ActivationError, ConfigError, CycleError};
use crate::hardware::registers::{RegisterBank, RegisterId};
use crate::hardware::{HardwareInterface, IMU_ANGULAR_VELOCITY, IMU_ORIENTATION, lookup, lookup_all};
use crate::observation::frame::{ObservationBuilder, SensorSnapshot};
use crate::observation::gravity::Orientation;
use crate::policy::model_file::ModelDescription;
use crate::policy::network::{LOCOMOTION_TOPOLOGY, PolicyModel};

#[derive(Debug, Clone, Copy)]
struct JointRegisters {
    position: RegisterId,
    velocity: RegisterId,
    /// Command register named by the joint's action kind.
    action: RegisterId,
    position_command: RegisterId,
    kp: RegisterId,
    kd: RegisterId,
}

#[derive(Debug, Clone, Copy)]
struct ResolvedRegisters {
    angular_velocity: [RegisterId; 3],
    orientation: [RegisterId; 4],
    joints: [JointRegisters; ACTION_SIZE],
}

impl ResolvedRegisters {
    fn resolve(hw: &HardwareInterface, params: &PolicyParameters) -> Result<Self, ActivationError> {
        let imu = params.imu_sensor_name.as_str();
        let angular_velocity = lookup_all(&hw.state, imu, IMU_ANGULAR_VELOCITY)?;
        let orientation = lookup_all(&hw.state, imu, IMU_ORIENTATION)?;

        let mut joints = Vec::with_capacity(ACTION_SIZE);
        for (name, kind) in params.joint_names.iter().zip(params.action_kinds) {
            joints.push(JointRegisters {
                position: lookup(&hw.state, name, "position")?,
                velocity: lookup(&hw.state, name, "velocity")?,
                action: lookup(&hw.command, name, kind.interface_name())?,
                position_command: lookup(&hw.command, name, "position")?,
                kp: lookup(&hw.command, name, "kp")?,
                kd: lookup(&hw.command, name, "kd")?,
            });
        }
        Ok(Self {
            angular_velocity,
            orientation,
            joints: std::array::from_fn(|i| joints[i]),
        })
    }
}

/// Everything that lives for exactly one activation.
#[derive(Debug, Clone, Copy)]
struct Activation {
    registers: ResolvedRegisters,
    initial_positions: [f64; ACTION_SIZE],
    activated_at: Duration,
    /// Largest elapsed time seen so far; phases never move backwards.
    latest_elapsed: f64,
    phase: ControlPhase,
    repeat_counter: usize,
    held: Option<ActionVector>,
}

/// What a successful cycle did.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CycleReport {
    pub phase: ControlPhase,
    pub fade: f64,
    pub inferred: bool,
}

pub struct NeuralController {
    params: PolicyParameters,
    timing: PhaseTiming,
    model: PolicyModel,
    observation: ObservationBuilder,
    post: ActionPostProcessor,
    safety: SafetyMonitor,
    commands: CommandReader,
    activation: Option<Activation>,
    last_error: Option<&'static str>,
}

impl NeuralController {
    /// Loads parameters and the model description, applies the model's metadata overrides,
    /// and checks the network against the compiled topology.
    pub fn configure(params: &ControllerParams, commands: CommandReader) -> Result<Self, ConfigError> {
        let mut policy = PolicyParameters::from_params(params)?;
        let description = ModelDescription::from_path(&params.model_path)?;
        policy.apply_metadata(&description.metadata)?;

        let in_width = description.input_width().unwrap_or(0);
        if in_width != policy.observation_size() {
            return Err(ConfigError::HistoryMismatch {
                history: policy.observation_history,
                frame_size: crate::config::SINGLE_FRAME_SIZE,
                in_width,
            });
        }
        let model = PolicyModel::from_description(
            &description,
            &LOCOMOTION_TOPOLOGY,
            policy.observation_size(),
        )?;
        info!(
            "Configured controller from {} (history {}, repeat {})",
            params.model_path.display(),
            policy.observation_history,
            policy.repeat_action
        );
        Self::from_parts(policy, model, commands)
    }

    /// Assembles a controller from already-loaded parts.
    pub fn from_parts(
        params: PolicyParameters,
        model: PolicyModel,
        commands: CommandReader,
    ) -> Result<Self, ConfigError> {
        if model.input_width() != params.observation_size() {
            return Err(ConfigError::HistoryMismatch {
                history: params.observation_history,
                frame_size: crate::config::SINGLE_FRAME_SIZE,
                in_width: model.input_width(),
            });
        }
        if model.output_width() != ACTION_SIZE {
            return Err(ConfigError::Topology {
                location: "output".to_string(),
                expected: ACTION_SIZE,
                found: model.output_width(),
            });
        }
        Ok(Self {
            timing: PhaseTiming {
                init_duration: params.init_duration,
                fade_in_duration: params.fade_in_duration,
            },
            observation: ObservationBuilder::new(params.observation_history, params.observation_limit),
            post: ActionPostProcessor::new(&params),
            safety: SafetyMonitor::new(),
            model,
            params,
            commands,
            activation: None,
            last_error: None,
        })
    }

    /// Binds registers and starts a fresh activation at `now`. Recurrent memory, the
    /// observation window, the safety latch and the velocity command all start from zero.
    pub fn activate(&mut self, hw: &HardwareInterface, now: Duration) -> Result<(), ActivationError> {
        let registers = ResolvedRegisters::resolve(hw, &self.params)?;

        let mut initial_positions = [0.0; ACTION_SIZE];
        for (joint, regs) in registers.joints.iter().enumerate() {
            initial_positions[joint] = hw.state.get(regs.position).ok_or_else(|| {
                ActivationError::InitialPositionUnavailable {
                    joint: self.params.joint_names[joint].clone(),
                }
            })?;
        }

        self.model.reset_state();
        self.observation.reset();
        self.safety.reset();
        self.commands.reset();
        self.last_error = None;
        self.activation = Some(Activation {
            registers,
            initial_positions,
            activated_at: now,
            latest_elapsed: 0.0,
            phase: ControlPhase::at(0.0, &self.timing),
            // First policy cycle wraps to 0 and infers.
            repeat_counter: self.params.repeat_action - 1,
            held: None,
        });
        info!("activate successful");
        Ok(())
    }

    /// Zeroes every command register and ends the activation.
    pub fn deactivate(&mut self, hw: &mut HardwareInterface) {
        hw.command.set_all(0.0);
        self.activation = None;
        self.commands.reset();
        info!("deactivate successful");
    }

    /// Runs one control cycle at `now`; `period` is the time since the previous cycle.
    pub fn update(
        &mut self,
        hw: &mut HardwareInterface,
        now: Duration,
        period: Duration,
    ) -> Result<CycleReport, CycleError> {
        let Some(mut activation) = self.activation else {
            return Err(CycleError::Inactive);
        };
        let elapsed = now
            .saturating_sub(activation.activated_at)
            .as_secs_f64()
            .max(activation.latest_elapsed);
        activation.latest_elapsed = elapsed;
        let previous = activation.phase;
        activation.phase = previous.advance(elapsed, &self.timing);
        if activation.phase.name() != previous.name() {
            info!(
                "Phase {} -> {} at t={:.3}s (period {:?})",
                previous, activation.phase, elapsed, period
            );
        }

        let result = self.run_phase(hw, &mut activation);
        self.activation = Some(activation);
        self.note(&result);
        result
    }

    fn run_phase(
        &mut self,
        hw: &mut HardwareInterface,
        activation: &mut Activation,
    ) -> Result<CycleReport, CycleError> {
        match activation.phase {
            ControlPhase::Startup { fraction } => {
                let action = self.post.startup(&activation.initial_positions, fraction);
                write_action(&mut hw.command, &activation.registers, &action);
                Ok(CycleReport {
                    phase: activation.phase,
                    fade: 0.0,
                    inferred: false,
                })
            }
            ControlPhase::EmergencyStop => {
                hw.command.set_all(0.0);
                Ok(CycleReport {
                    phase: activation.phase,
                    fade: 0.0,
                    inferred: false,
                })
            }
            ControlPhase::FadeIn { .. } | ControlPhase::Active => self.run_policy(hw, activation),
        }
    }

    fn run_policy(
        &mut self,
        hw: &mut HardwareInterface,
        activation: &mut Activation,
    ) -> Result<CycleReport, CycleError> {
        let fade = activation.phase.fade();
        activation.repeat_counter = (activation.repeat_counter + 1) % self.params.repeat_action;
        if activation.repeat_counter != 0 {
            if let Some(held) = &activation.held {
                write_action(&mut hw.command, &activation.registers, held);
            }
            return Ok(CycleReport {
                phase: activation.phase,
                fade,
                inferred: false,
            });
        }

        let command = self.commands.latest();
        let snapshot = read_sensors(&hw.state, &activation.registers, &self.params)?;
        if !self.params.use_imu && !snapshot.orientation.is_identity(IDENTITY_TOLERANCE) {
            return Err(CycleError::OrientationNotIdentity);
        }

        let gravity = snapshot.orientation.projected_gravity();
        if self.safety.evaluate(gravity.z, self.params.max_body_angle) {
            info!("Emergency stop triggered");
            activation.phase = activation.phase.trip();
            activation.held = None;
            hw.command.set_all(0.0);
            return Ok(CycleReport {
                phase: activation.phase,
                fade: 0.0,
                inferred: false,
            });
        }

        let input = self.observation.prepare(&snapshot, &gravity, command, &self.params)?;
        let mut raw = [0.0f32; ACTION_SIZE];
        raw.copy_from_slice(self.model.forward(input));
        self.observation.shift_history();

        let processed = self.post.process(&raw, fade as f32)?;
        self.observation.set_previous_action(&processed.previous);
        write_action(&mut hw.command, &activation.registers, &processed.action);
        activation.held = Some(processed.action);
        debug!("inferred action {:?}", processed.action.values());

        Ok(CycleReport {
            phase: activation.phase,
            fade,
            inferred: true,
        })
    }

    /// Logs each failure kind once, and the first success after a failure.
    fn note(&mut self, result: &Result<CycleReport, CycleError>) {
        match result {
            Err(err) if self.last_error != Some(err.kind()) => {
                error!("{}", err);
                self.last_error = Some(err.kind());
            }
            Err(_) => {}
            Ok(_) if self.last_error.take().is_some() => info!("control cycle recovered"),
            Ok(_) => {}
        }
    }

    pub fn phase(&self) -> Option<ControlPhase> {
        self.activation.map(|a| a.phase)
    }

    pub fn is_active(&self) -> bool {
        self.activation.is_some()
    }

    pub fn observation(&self) -> &ObservationBuilder {
        &self.observation
    }

    pub fn params(&self) -> &PolicyParameters {
        &self.params
    }

    pub fn model(&self) -> &PolicyModel {
        &self.model
    }
}

fn read(bank: &RegisterBank, id: RegisterId) -> Result<f64, CycleError> {
    bank.get(id).ok_or(CycleError::MissingReading(id))
}

fn read_sensors(
    state: &RegisterBank,
    registers: &ResolvedRegisters,
    params: &PolicyParameters,
) -> Result<SensorSnapshot, CycleError> {
    let mut angular_velocity = [0.0; 3];
    for (value, id) in angular_velocity.iter_mut().zip(registers.angular_velocity) {
        *value = read(state, id)?;
    }
    let mut wxyz = [0.0; 4];
    for (value, id) in wxyz.iter_mut().zip(registers.orientation) {
        *value = read(state, id)?;
    }

    let mut joint_positions = [0.0; ACTION_SIZE];
    let mut joint_velocities = [0.0; ACTION_SIZE];
    for (joint, regs) in registers.joints.iter().enumerate() {
        if params.action_kinds[joint] == ActionKind::Position {
            joint_positions[joint] = read(state, regs.position)?;
        }
        joint_velocities[joint] = read(state, regs.velocity)?;
    }

    Ok(SensorSnapshot {
        angular_velocity,
        orientation: Orientation::from_wxyz(wxyz),
        joint_positions,
        joint_velocities,
    })
}

fn write_action(command: &mut RegisterBank, registers: &ResolvedRegisters, action: &ActionVector) {
    for (regs, joint) in registers.joints.iter().zip(action.commands()) {
        let target = match joint.kind {
            ActionKind::Position => regs.position_command,
            ActionKind::Velocity | ActionKind::Effort => regs.action,
        };
        command.set(target, joint.value);
        command.set(regs.kp, joint.kp);
        command.set(regs.kd, joint.kd);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_params;
    use crate::control::command_cell::latest_value_channel;

    fn controller(init: f64, fade: f64) -> (NeuralController, HardwareInterface) {
        let mut params = PolicyParameters::from_params(&sample_params()).unwrap();
        params.init_duration = init;
        params.fade_in_duration = fade;
        let hw = HardwareInterface::standard_layout(&params);
        let model = PolicyModel::zeros(&LOCOMOTION_TOPOLOGY, params.observation_size());
        let (_publisher, reader) = latest_value_channel();
        (NeuralController::from_parts(params, model, reader).unwrap(), hw)
    }

    fn publish_upright(hw: &mut HardwareInterface, position: f64) {
        for axis in IMU_ANGULAR_VELOCITY {
            hw.state.set_by_name("imu_sensor", axis, 0.0);
        }
        for (axis, value) in IMU_ORIENTATION.iter().zip([1.0, 0.0, 0.0, 0.0]) {
            hw.state.set_by_name("imu_sensor", axis, value);
        }
        let names: Vec<String> = sample_params().joint_names;
        for name in &names {
            hw.state.set_by_name(name, "position", position);
            hw.state.set_by_name(name, "velocity", 0.0);
        }
    }

    #[test]
    fn update_before_activation_is_an_error() {
        let (mut ctl, mut hw) = controller(1.0, 1.0);
        assert_eq!(
            ctl.update(&mut hw, Duration::ZERO, Duration::from_millis(2)),
            Err(CycleError::Inactive)
        );
    }

    #[test]
    fn activation_needs_initial_positions() {
        let (mut ctl, hw) = controller(1.0, 1.0);
        assert!(matches!(
            ctl.activate(&hw, Duration::ZERO),
            Err(ActivationError::InitialPositionUnavailable { .. })
        ));
    }

    #[test]
    fn unknown_register_fails_activation() {
        let (mut ctl, _) = controller(1.0, 1.0);
        let hw = HardwareInterface::default();
        assert!(matches!(
            ctl.activate(&hw, Duration::ZERO),
            Err(ActivationError::UnknownRegister { .. })
        ));
    }

    #[test]
    fn missing_reading_is_distinct_from_unknown_register() {
        let (mut ctl, mut hw) = controller(0.0, 0.0);
        publish_upright(&mut hw, 0.0);
        ctl.activate(&hw, Duration::ZERO).unwrap();
        let id = hw.state.resolve("imu_sensor", "orientation.x").unwrap();
        hw.state.clear(id);
        assert_eq!(
            ctl.update(&mut hw, Duration::ZERO, Duration::ZERO),
            Err(CycleError::MissingReading(id))
        );
    }

    #[test]
    fn startup_writes_position_for_every_joint_with_init_gains() {
        let (mut ctl, mut hw) = controller(1.0, 1.0);
        publish_upright(&mut hw, 0.4);
        ctl.activate(&hw, Duration::ZERO).unwrap();
        let report = ctl
            .update(&mut hw, Duration::from_millis(500), Duration::from_millis(2))
            .unwrap();
        assert_eq!(report.phase, ControlPhase::Startup { fraction: 0.5 });
        // Effort joint 5 still goes through its position register during startup.
        assert_eq!(hw.command.value_of("leg_back_l_1", "position"), Some(0.2));
        assert_eq!(hw.command.value_of("leg_back_l_1", "effort"), None);
        assert_eq!(hw.command.value_of("leg_front_r_1", "kp"), Some(5.0));
    }

    #[test]
    fn earlier_timestamp_does_not_move_the_phase_back() {
        let (mut ctl, mut hw) = controller(1.0, 1.0);
        publish_upright(&mut hw, 0.4);
        ctl.activate(&hw, Duration::ZERO).unwrap();
        let period = Duration::from_millis(2);

        let report = ctl.update(&mut hw, Duration::from_secs(5), period).unwrap();
        assert_eq!(report.phase, ControlPhase::Active);
        let report = ctl.update(&mut hw, Duration::from_millis(500), period).unwrap();
        assert_eq!(report.phase, ControlPhase::Active);
        assert_eq!(report.fade, 1.0);
        // Still policy-driven: joint 0 commands the default pose, not the startup blend.
        assert_eq!(hw.command.value_of("leg_front_r_1", "position"), Some(0.0));
        assert_eq!(hw.command.value_of("leg_front_r_1", "kp"), Some(7.5));
    }

    #[test]
    fn deactivate_zeroes_every_command() {
        let (mut ctl, mut hw) = controller(0.0, 0.0);
        publish_upright(&mut hw, 0.0);
        ctl.activate(&hw, Duration::ZERO).unwrap();
        ctl.update(&mut hw, Duration::ZERO, Duration::ZERO).unwrap();
        ctl.deactivate(&mut hw);
        assert!(hw.command.iter().all(|(_, v)| v == Some(0.0)));
        assert!(!ctl.is_active());
    }
}
