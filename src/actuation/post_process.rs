//! post_process.rs
//! Maps raw policy outputs to physical joint commands.
//!
//! - previous-action feedback: `fade * raw`, for every joint
//! - position joints: `clamp(fade * raw * scale + default, lower, upper)`
//! - velocity/effort joints: `fade * raw * scale`, unclamped
//!
//! Every command carries the gain pair to write alongside it.

use crate::config::{ACTION_SIZE, ActionKind, PolicyParameters};
use crate::error::CycleError;

/// One joint's command for this cycle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointCommand {
    pub value: f64,
    pub kind: ActionKind,
    pub kp: f64,
    pub kd: f64,
}

impl JointCommand {
    /// Disarmed command: zero value and zero gains.
    pub const fn zero(kind: ActionKind) -> Self {
        Self {
            value: 0.0,
            kind,
            kp: 0.0,
            kd: 0.0,
        }
    }
}

/// Finite per-joint commands, position entries within joint limits.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionVector(pub [JointCommand; ACTION_SIZE]);

impl ActionVector {
    pub fn commands(&self) -> &[JointCommand; ACTION_SIZE] {
        &self.0
    }

    pub fn values(&self) -> [f64; ACTION_SIZE] {
        std::array::from_fn(|i| self.0[i].value)
    }
}

/// Output of one post-processing step.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessedAction {
    pub action: ActionVector,
    /// Fade-scaled raw outputs, fed back into the next observation.
    pub previous: [f32; ACTION_SIZE],
}

#[derive(Debug, Clone)]
pub struct ActionPostProcessor {
    kinds: [ActionKind; ACTION_SIZE],
    scales: [f32; ACTION_SIZE],
    defaults: [f32; ACTION_SIZE],
    lower: [f32; ACTION_SIZE],
    upper: [f32; ACTION_SIZE],
    kps: [f32; ACTION_SIZE],
    kds: [f32; ACTION_SIZE],
    init_kps: [f32; ACTION_SIZE],
    init_kds: [f32; ACTION_SIZE],
}

impl ActionPostProcessor {
    pub fn new(params: &PolicyParameters) -> Self {
        Self {
            kinds: params.action_kinds,
            scales: params.action_scales,
            defaults: params.default_joint_pos,
            lower: params.joint_lower_limits,
            upper: params.joint_upper_limits,
            kps: params.kps,
            kds: params.kds,
            init_kps: params.init_kps,
            init_kds: params.init_kds,
        }
    }

    /// Converts raw outputs into commands with nominal gains. Fails on the first joint
    /// whose command is not finite; nothing should be written in that case.
    pub fn process(&self, raw: &[f32], fade: f32) -> Result<ProcessedAction, CycleError> {
        debug_assert_eq!(raw.len(), ACTION_SIZE);
        let mut previous = [0.0f32; ACTION_SIZE];
        let mut commands = [JointCommand::zero(ActionKind::Position); ACTION_SIZE];

        for joint in 0..ACTION_SIZE {
            let scaled = fade * raw[joint];
            previous[joint] = scaled;

            let kind = self.kinds[joint];
            let value = match kind {
                ActionKind::Position => (scaled * self.scales[joint] + self.defaults[joint])
                    .clamp(self.lower[joint], self.upper[joint]),
                ActionKind::Velocity | ActionKind::Effort => scaled * self.scales[joint],
            };
            if !value.is_finite() {
                return Err(CycleError::NonFiniteAction { joint });
            }
            commands[joint] = JointCommand {
                value: value as f64,
                kind,
                kp: self.kps[joint] as f64,
                kd: self.kds[joint] as f64,
            };
        }

        Ok(ProcessedAction {
            action: ActionVector(commands),
            previous,
        })
    }

    /// Startup pose: linear blend from `initial` to the default pose, with init gains.
    /// Every joint is driven through its position register during startup.
    pub fn startup(&self, initial: &[f64; ACTION_SIZE], fraction: f64) -> ActionVector {
        ActionVector(std::array::from_fn(|joint| JointCommand {
            value: initial[joint] * (1.0 - fraction) + self.defaults[joint] as f64 * fraction,
            kind: ActionKind::Position,
            kp: self.init_kps[joint] as f64,
            kd: self.init_kds[joint] as f64,
        }))
    }
}
