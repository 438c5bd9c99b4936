#![allow(dead_code)]

use std::{path::Path, time::Duration};

use neural_locomotion::{
    ACTION_SIZE, ControllerParams, NeuralController, PolicyParameters,
    control::{CommandPublisher, latest_value_channel},
    hardware::{HardwareInterface, IMU_ANGULAR_VELOCITY, IMU_ORIENTATION},
    policy::{LOCOMOTION_TOPOLOGY, PolicyModel},
};

pub const PARAMS_TOML: &str = r#"
model_path = "policy.json"
use_imu = false
init_duration = 1.0
fade_in_duration = 1.0
max_body_angle = 1.0
repeat_action = 1
joint_names = ["leg_front_r_1", "leg_front_r_2", "leg_front_l_1", "leg_front_l_2", "leg_back_r_1", "leg_back_l_1"]
action_types = ["position", "position", "position", "position", "position", "effort"]
action_scales = [0.5, 0.5, 0.5, 0.5, 0.5, 2.0]
kps = [7.5, 7.5, 7.5, 7.5, 7.5, 0.0]
kds = [0.25, 0.25, 0.25, 0.25, 0.25, 0.0]
init_kps = [5.0, 5.0, 5.0, 5.0, 5.0, 0.0]
init_kds = [0.1, 0.1, 0.1, 0.1, 0.1, 0.0]
default_joint_pos = [0.0, 0.5, 0.0, -0.5, 0.3, 0.0]
joint_lower_limits = [-1.0, -1.0, -1.0, -1.0, -1.0, -10.0]
joint_upper_limits = [1.0, 1.0, 1.0, 1.0, 1.0, 10.0]
"#;

pub const PERIOD: Duration = Duration::from_millis(2);

pub fn controller_params() -> ControllerParams {
    ControllerParams::from_toml_str(PARAMS_TOML, Path::new("test.toml")).unwrap()
}

pub fn policy_params() -> PolicyParameters {
    PolicyParameters::from_params(&controller_params()).unwrap()
}

/// Network whose every output equals a slowly rising LSTM unit, so each inference yields
/// a new action and repeated cycles are easy to tell apart.
pub fn ramp_model(input_width: usize) -> PolicyModel {
    let mut model = PolicyModel::zeros(&LOCOMOTION_TOPOLOGY, input_width);
    let hidden = LOCOMOTION_TOPOLOGY.lstm;
    {
        let bias = model.lstm_mut().bias_mut();
        bias[0] = 20.0; // input gate
        bias[hidden] = 20.0; // forget gate
        bias[2 * hidden] = 0.1; // candidate
        bias[3 * hidden] = 20.0; // output gate
    }
    for layer in model.hidden_mut().iter_mut() {
        layer.set_weight(0, 0, 1.0);
    }
    for joint in 0..ACTION_SIZE {
        model.head_mut().set_weight(0, joint, 1.0);
    }
    model
}

pub struct Rig {
    pub controller: NeuralController,
    pub hw: HardwareInterface,
    pub publisher: CommandPublisher,
    pub now: Duration,
}

impl Rig {
    pub fn new(params: PolicyParameters, model: PolicyModel) -> Self {
        let hw = HardwareInterface::standard_layout(&params);
        let (publisher, reader) = latest_value_channel();
        let controller = NeuralController::from_parts(params, model, reader).unwrap();
        Self {
            controller,
            hw,
            publisher,
            now: Duration::ZERO,
        }
    }

    pub fn with(configure: impl FnOnce(&mut PolicyParameters)) -> Self {
        let mut params = policy_params();
        configure(&mut params);
        let model = ramp_model(params.observation_size());
        Self::new(params, model)
    }

    pub fn joint_names(&self) -> Vec<String> {
        self.controller.params().joint_names.to_vec()
    }

    pub fn publish_joints(&mut self, position: f64, velocity: f64) {
        for name in self.joint_names() {
            self.hw.state.set_by_name(&name, "position", position);
            self.hw.state.set_by_name(&name, "velocity", velocity);
        }
    }

    pub fn publish_imu(&mut self, wxyz: [f64; 4]) {
        for axis in IMU_ANGULAR_VELOCITY {
            self.hw.state.set_by_name("imu_sensor", axis, 0.0);
        }
        for (axis, value) in IMU_ORIENTATION.iter().zip(wxyz) {
            self.hw.state.set_by_name("imu_sensor", axis, value);
        }
    }

    /// Upright body at rest with every joint at `position`.
    pub fn publish_upright(&mut self, position: f64) {
        self.publish_imu([1.0, 0.0, 0.0, 0.0]);
        self.publish_joints(position, 0.0);
    }

    /// Body rolled by `angle` radians about x.
    pub fn publish_roll(&mut self, angle: f64) {
        let half = angle / 2.0;
        self.publish_imu([half.cos(), half.sin(), 0.0, 0.0]);
    }

    pub fn activate(&mut self) {
        self.now = Duration::ZERO;
        self.controller.activate(&self.hw, self.now).unwrap();
    }

    /// Runs one cycle at the current time, then advances the clock by one period.
    pub fn step(
        &mut self,
    ) -> Result<neural_locomotion::CycleReport, neural_locomotion::CycleError> {
        let result = self.controller.update(&mut self.hw, self.now, PERIOD);
        self.now += PERIOD;
        result
    }

    pub fn step_at(
        &mut self,
        seconds: f64,
    ) -> Result<neural_locomotion::CycleReport, neural_locomotion::CycleError> {
        self.now = Duration::from_secs_f64(seconds);
        self.step()
    }

    pub fn command(&self, joint: usize, interface: &str) -> Option<f64> {
        let name = &self.controller.params().joint_names[joint];
        self.hw.command.value_of(name, interface)
    }

    pub fn command_snapshot(&self) -> Vec<Option<f64>> {
        self.hw.command.iter().map(|(_, value)| value).collect()
    }

    pub fn all_commands_zero(&self) -> bool {
        self.hw.command.iter().all(|(_, value)| value == Some(0.0))
    }
}
