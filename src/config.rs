//! config.rs
//! Controller parameters: the TOML parameter file as written by the operator, and the
//! immutable per-joint `PolicyParameters` the control thread reads every cycle.
//!
//! Loading order mirrors setup: per-joint array sizes are checked first, then the model
//! description's metadata may override tuning values (see `apply_metadata`).

use std::{
    f64::consts::PI,
    fs,
    path::{Path, PathBuf},
};

use log::warn;
use serde::Deserialize;

use crate::error::ConfigError;
use crate::policy::model_file::ModelMetadata;

/// Number of independently actuated joints.
pub const ACTION_SIZE: usize = 6;

/// Scalars describing one instant: angular velocity, projected gravity, velocity command,
/// joint position deltas, joint velocities, previous action.
pub const SINGLE_FRAME_SIZE: usize = 3 + 3 + 3 + ACTION_SIZE * 3;

/// Per-orientation-component tolerance for the identity check when the IMU is unused.
pub const IDENTITY_TOLERANCE: f64 = 1e-3;

/// What a joint's policy output drives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Position,
    Velocity,
    Effort,
}

impl ActionKind {
    /// Name of the command register the action is written to.
    pub fn interface_name(&self) -> &'static str {
        match self {
            ActionKind::Position => "position",
            ActionKind::Velocity => "velocity",
            ActionKind::Effort => "effort",
        }
    }
}

/// Parameter file contents, one array entry per joint.
#[derive(Debug, Clone, Deserialize)]
pub struct ControllerParams {
    pub model_path: PathBuf,
    #[serde(default = "default_imu_sensor_name")]
    pub imu_sensor_name: String,
    #[serde(default = "default_true")]
    pub use_imu: bool,
    #[serde(default = "default_observation_history")]
    pub observation_history: usize,
    #[serde(default = "default_observation_limit")]
    pub observation_limit: f64,
    #[serde(default = "default_duration")]
    pub init_duration: f64,
    #[serde(default = "default_duration")]
    pub fade_in_duration: f64,
    #[serde(default = "default_max_body_angle")]
    pub max_body_angle: f64,
    #[serde(default = "default_repeat_action")]
    pub repeat_action: usize,

    pub joint_names: Vec<String>,
    pub action_types: Vec<ActionKind>,
    pub action_scales: Vec<f64>,
    pub kps: Vec<f64>,
    pub kds: Vec<f64>,
    pub init_kps: Vec<f64>,
    pub init_kds: Vec<f64>,
    pub default_joint_pos: Vec<f64>,
    pub joint_lower_limits: Vec<f64>,
    pub joint_upper_limits: Vec<f64>,
}

fn default_imu_sensor_name() -> String {
    "imu_sensor".to_string()
}

fn default_true() -> bool {
    true
}

fn default_observation_history() -> usize {
    1
}

fn default_observation_limit() -> f64 {
    100.0
}

fn default_duration() -> f64 {
    2.0
}

fn default_max_body_angle() -> f64 {
    1.0
}

fn default_repeat_action() -> usize {
    1
}

impl ControllerParams {
    pub fn from_toml_str(text: &str, origin: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::ParamsFormat {
            path: origin.to_path_buf(),
            source,
        })
    }

    pub fn from_toml_path(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text, path)
    }

    /// Every per-joint array must have exactly `ACTION_SIZE` entries.
    /// Reports the first offending array by name.
    pub fn check_param_vector_sizes(&self) -> Result<(), ConfigError> {
        let param_sizes = [
            ("action_scales", self.action_scales.len()),
            ("action_types", self.action_types.len()),
            ("kps", self.kps.len()),
            ("kds", self.kds.len()),
            ("init_kps", self.init_kps.len()),
            ("init_kds", self.init_kds.len()),
            ("default_joint_pos", self.default_joint_pos.len()),
            ("joint_lower_limits", self.joint_lower_limits.len()),
            ("joint_upper_limits", self.joint_upper_limits.len()),
            ("joint_names", self.joint_names.len()),
        ];
        for (name, size) in param_sizes {
            if size != ACTION_SIZE {
                return Err(ConfigError::size_mismatch(name, size, ACTION_SIZE));
            }
        }
        Ok(())
    }
}

/// Immutable tuning the control thread reads every cycle. Fixed-size arrays only.
#[derive(Debug, Clone, PartialEq)]
pub struct PolicyParameters {
    pub imu_sensor_name: String,
    pub joint_names: [String; ACTION_SIZE],
    pub action_kinds: [ActionKind; ACTION_SIZE],
    pub action_scales: [f32; ACTION_SIZE],
    pub kps: [f32; ACTION_SIZE],
    pub kds: [f32; ACTION_SIZE],
    pub init_kps: [f32; ACTION_SIZE],
    pub init_kds: [f32; ACTION_SIZE],
    pub default_joint_pos: [f32; ACTION_SIZE],
    pub joint_lower_limits: [f32; ACTION_SIZE],
    pub joint_upper_limits: [f32; ACTION_SIZE],
    pub use_imu: bool,
    pub observation_history: usize,
    pub observation_limit: f32,
    pub init_duration: f64,
    pub fade_in_duration: f64,
    pub max_body_angle: f64,
    pub repeat_action: usize,
}

impl PolicyParameters {
    pub fn from_params(params: &ControllerParams) -> Result<Self, ConfigError> {
        params.check_param_vector_sizes()?;

        let parameters = Self {
            imu_sensor_name: params.imu_sensor_name.clone(),
            joint_names: fixed("joint_names", params.joint_names.clone())?,
            action_kinds: fixed("action_types", params.action_types.clone())?,
            action_scales: fixed_f32("action_scales", &params.action_scales)?,
            kps: fixed_f32("kps", &params.kps)?,
            kds: fixed_f32("kds", &params.kds)?,
            init_kps: fixed_f32("init_kps", &params.init_kps)?,
            init_kds: fixed_f32("init_kds", &params.init_kds)?,
            default_joint_pos: fixed_f32("default_joint_pos", &params.default_joint_pos)?,
            joint_lower_limits: fixed_f32("joint_lower_limits", &params.joint_lower_limits)?,
            joint_upper_limits: fixed_f32("joint_upper_limits", &params.joint_upper_limits)?,
            use_imu: params.use_imu,
            observation_history: params.observation_history,
            observation_limit: params.observation_limit as f32,
            init_duration: params.init_duration,
            fade_in_duration: params.fade_in_duration,
            max_body_angle: params.max_body_angle,
            repeat_action: params.repeat_action,
        };
        parameters.validate()?;
        Ok(parameters)
    }

    /// Applies tuning carried by the model description. Scalars are broadcast to every
    /// joint; vectors must carry exactly `ACTION_SIZE` entries.
    pub fn apply_metadata(&mut self, metadata: &ModelMetadata) -> Result<(), ConfigError> {
        if let Some(scale) = metadata.action_scale {
            self.action_scales = [scale as f32; ACTION_SIZE];
        }
        if let Some(kp) = metadata.kp {
            self.kps = [kp as f32; ACTION_SIZE];
        }
        if let Some(kd) = metadata.kd {
            self.kds = [kd as f32; ACTION_SIZE];
        }
        if let Some(pose) = &metadata.default_pose {
            self.default_joint_pos = fixed_f32("default_pose", pose)?;
        }
        if let Some(lower) = &metadata.joint_lower_limits {
            self.joint_lower_limits = fixed_f32("joint_lower_limits", lower)?;
        }
        if let Some(upper) = &metadata.joint_upper_limits {
            self.joint_upper_limits = fixed_f32("joint_upper_limits", upper)?;
        }
        if let Some(use_imu) = metadata.use_imu {
            warn!(
                "Policy JSON specifies use_imu={}. Verify robot description has proper value of use_imu",
                use_imu
            );
            self.use_imu = use_imu;
        }
        if let Some(history) = metadata.observation_history {
            self.observation_history = history;
        }
        self.validate()
    }

    /// Length of the stacked observation fed to the policy.
    pub fn observation_size(&self) -> usize {
        self.observation_history * SINGLE_FRAME_SIZE
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.repeat_action < 1 {
            return Err(ConfigError::invalid("repeat_action", "must be at least 1"));
        }
        if self.observation_history < 1 {
            return Err(ConfigError::invalid("observation_history", "must be at least 1"));
        }
        if !(self.observation_limit > 0.0) {
            return Err(ConfigError::invalid(
                "observation_limit",
                format!("must be positive, got {}", self.observation_limit),
            ));
        }
        if !(self.init_duration >= 0.0) || !(self.fade_in_duration >= 0.0) {
            return Err(ConfigError::invalid(
                "init_duration/fade_in_duration",
                "durations must be non-negative",
            ));
        }
        if !(0.0..=PI).contains(&self.max_body_angle) {
            return Err(ConfigError::invalid(
                "max_body_angle",
                format!("must be within [0, pi] radians, got {}", self.max_body_angle),
            ));
        }
        let per_joint = [
            ("action_scales", &self.action_scales),
            ("kps", &self.kps),
            ("kds", &self.kds),
            ("init_kps", &self.init_kps),
            ("init_kds", &self.init_kds),
            ("default_joint_pos", &self.default_joint_pos),
            ("joint_lower_limits", &self.joint_lower_limits),
            ("joint_upper_limits", &self.joint_upper_limits),
        ];
        for (name, values) in per_joint {
            if let Some(i) = values.iter().position(|v| !v.is_finite()) {
                return Err(ConfigError::invalid(
                    name,
                    format!("joint {} value {} is not finite", i, values[i]),
                ));
            }
        }
        for (i, (lo, hi)) in self
            .joint_lower_limits
            .iter()
            .zip(self.joint_upper_limits.iter())
            .enumerate()
        {
            if lo > hi {
                return Err(ConfigError::invalid(
                    "joint_lower_limits",
                    format!("joint {} lower limit {} exceeds upper limit {}", i, lo, hi),
                ));
            }
        }
        Ok(())
    }
}

fn fixed<T>(name: &str, values: Vec<T>) -> Result<[T; ACTION_SIZE], ConfigError> {
    let actual = values.len();
    values
        .try_into()
        .map_err(|_| ConfigError::size_mismatch(name, actual, ACTION_SIZE))
}

fn fixed_f32(name: &str, values: &[f64]) -> Result<[f32; ACTION_SIZE], ConfigError> {
    if values.len() != ACTION_SIZE {
        return Err(ConfigError::size_mismatch(name, values.len(), ACTION_SIZE));
    }
    Ok(std::array::from_fn(|i| values[i] as f32))
}
