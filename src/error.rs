//! error.rs
//! Error taxonomy for the controller.
//!
//! - `ConfigError`: fatal at setup, no control cycle ever runs.
//! - `ActivationError`: the hardware could not be bound for a fresh activation.
//! - `CycleError`: recoverable, one cycle produced no commands; the next period retries.
//!
//! `CycleError` is `Copy` so the control thread can report it without allocating.

use std::path::PathBuf;

use thiserror::Error;

use crate::hardware::registers::RegisterId;

/// Setup failures: malformed files, per-joint size mismatches, topology mismatches.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed model description {path}: {source}")]
    ModelFormat {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("malformed controller parameters {path}: {source}")]
    ParamsFormat {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// A per-joint array does not have exactly one entry per actuated joint.
    #[error("{name} size is {actual}, expected {expected}")]
    SizeMismatch {
        name: String,
        actual: usize,
        expected: usize,
    },

    #[error("model topology mismatch at {location}: expected {expected}, found {found}")]
    Topology {
        location: String,
        expected: usize,
        found: usize,
    },

    #[error("model layer {index} is malformed: {reason}")]
    Layer { index: usize, reason: String },

    #[error(
        "observation_history ({history}) * SINGLE_FRAME_SIZE ({frame_size}) != in_shape ({in_width})"
    )]
    HistoryMismatch {
        history: usize,
        frame_size: usize,
        in_width: usize,
    },

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl ConfigError {
    pub fn size_mismatch(name: impl Into<String>, actual: usize, expected: usize) -> Self {
        Self::SizeMismatch {
            name: name.into(),
            actual,
            expected,
        }
    }

    pub fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        Self::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Failures while binding named registers at activation.
#[derive(Debug, Error)]
pub enum ActivationError {
    /// The name is not exported by the hardware at all: misconfiguration.
    #[error("no '{interface}' register exported for '{prefix}'")]
    UnknownRegister { prefix: String, interface: String },

    #[error("initial position of joint '{joint}' is not available")]
    InitialPositionUnavailable { joint: String },
}

/// Per-cycle failures. Commands are left untouched and the cycle is retried next period.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum CycleError {
    #[error("controller is not active")]
    Inactive,

    /// The register exists but the hardware has not published a value for it yet.
    #[error("reading {0} is not available")]
    MissingReading(RegisterId),

    #[error("use_imu is false but IMU orientation is not identity")]
    OrientationNotIdentity,

    #[error("observation[{index}] contains NaN")]
    NanObservation { index: usize },

    #[error("action[{joint}] is NaN or infinite")]
    NonFiniteAction { joint: usize },
}

impl CycleError {
    /// Stable label used in telemetry rows and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            CycleError::Inactive => "inactive",
            CycleError::MissingReading(_) => "missing_reading",
            CycleError::OrientationNotIdentity => "orientation_not_identity",
            CycleError::NanObservation { .. } => "nan_observation",
            CycleError::NonFiniteAction { .. } => "non_finite_action",
        }
    }
}
