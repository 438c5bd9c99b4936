//! frame.rs
//! Stacked observation window fed to the policy.
//!
//! Layout: `observation_history` blocks of `SINGLE_FRAME_SIZE` scalars. Block 0 holds the
//! newest instant; after each inference the window shifts one block older, dropping the
//! oldest. Storage is allocated once at construction and never resized.

use nalgebra::Vector3;

use crate::config::{ACTION_SIZE, ActionKind, PolicyParameters, SINGLE_FRAME_SIZE};
use crate::control::command_cell::VelocityCommand;
use crate::error::CycleError;
use crate::observation::gravity::Orientation;

pub const ANGULAR_VELOCITY_IDX: usize = 0;
pub const GRAVITY_IDX: usize = 3;
pub const COMMAND_IDX: usize = 6;
pub const JOINT_POSITION_IDX: usize = 9;
pub const JOINT_VELOCITY_IDX: usize = JOINT_POSITION_IDX + ACTION_SIZE;
pub const LAST_ACTION_IDX: usize = JOINT_VELOCITY_IDX + ACTION_SIZE;

/// One cycle's worth of sensor readings, already resolved from the state registers.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SensorSnapshot {
    pub angular_velocity: [f64; 3],
    pub orientation: Orientation,
    pub joint_positions: [f64; ACTION_SIZE],
    pub joint_velocities: [f64; ACTION_SIZE],
}

pub struct ObservationBuilder {
    history: usize,
    limit: f32,
    values: Box<[f32]>,
}

impl ObservationBuilder {
    pub fn new(history: usize, limit: f32) -> Self {
        let mut builder = Self {
            history,
            limit,
            values: vec![0.0; history * SINGLE_FRAME_SIZE].into_boxed_slice(),
        };
        builder.reset();
        builder
    }

    /// Zeroes the window, with every block's gravity reading pointing straight down.
    pub fn reset(&mut self) {
        self.values.fill(0.0);
        for block in self.values.chunks_exact_mut(SINGLE_FRAME_SIZE) {
            block[GRAVITY_IDX + 2] = -1.0;
        }
    }

    /// Writes the newest block. Joint-position slots are only refreshed for position-kind
    /// joints; the previous-action slot is left as `set_previous_action` wrote it.
    pub fn write_frame(
        &mut self,
        snapshot: &SensorSnapshot,
        gravity: &Vector3<f64>,
        command: VelocityCommand,
        params: &PolicyParameters,
    ) {
        let frame = &mut self.values[..SINGLE_FRAME_SIZE];
        for axis in 0..3 {
            frame[ANGULAR_VELOCITY_IDX + axis] = snapshot.angular_velocity[axis] as f32;
            frame[GRAVITY_IDX + axis] = gravity[axis] as f32;
        }
        frame[COMMAND_IDX] = command.x as f32;
        frame[COMMAND_IDX + 1] = command.y as f32;
        frame[COMMAND_IDX + 2] = command.yaw as f32;

        for joint in 0..ACTION_SIZE {
            if params.action_kinds[joint] == ActionKind::Position {
                frame[JOINT_POSITION_IDX + joint] = (snapshot.joint_positions[joint]
                    - params.default_joint_pos[joint] as f64)
                    as f32;
            }
            frame[JOINT_VELOCITY_IDX + joint] = snapshot.joint_velocities[joint] as f32;
        }
    }

    /// Clamps every scalar to `[-limit, limit]`. NaN passes through unchanged.
    pub fn clamp(&mut self) {
        let limit = self.limit;
        for value in self.values.iter_mut() {
            *value = value.clamp(-limit, limit);
        }
    }

    pub fn validate(&self) -> Result<(), CycleError> {
        match self.values.iter().position(|v| v.is_nan()) {
            Some(index) => Err(CycleError::NanObservation { index }),
            None => Ok(()),
        }
    }

    /// Writes the newest block, clamps, and rejects NaN. Returns the window for inference.
    pub fn prepare(
        &mut self,
        snapshot: &SensorSnapshot,
        gravity: &Vector3<f64>,
        command: VelocityCommand,
        params: &PolicyParameters,
    ) -> Result<&[f32], CycleError> {
        self.write_frame(snapshot, gravity, command, params);
        self.clamp();
        self.validate()?;
        Ok(&self.values)
    }

    /// Moves every block one slot older; the oldest block is dropped and block 0 keeps
    /// its contents until the next `write_frame`.
    pub fn shift_history(&mut self) {
        let len = self.values.len();
        if self.history > 1 {
            self.values.copy_within(0..len - SINGLE_FRAME_SIZE, SINGLE_FRAME_SIZE);
        }
    }

    pub fn set_previous_action(&mut self, previous: &[f32; ACTION_SIZE]) {
        self.values[LAST_ACTION_IDX..LAST_ACTION_IDX + ACTION_SIZE].copy_from_slice(previous);
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Block `age` of the window; 0 is the newest.
    pub fn block(&self, age: usize) -> &[f32] {
        let start = age * SINGLE_FRAME_SIZE;
        &self.values[start..start + SINGLE_FRAME_SIZE]
    }

    pub fn history(&self) -> usize {
        self.history
    }
}
