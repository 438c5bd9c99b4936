//! # neural_locomotion
//!
//! Real-time control core of a learned locomotion controller for a legged robot.
//!
//! Each control period the controller reads IMU and joint registers, builds a stacked
//! observation window, runs a recurrent policy (LSTM followed by ELU dense layers) and
//! writes per-joint commands with their PD gains.
//!
//! ## Modules
//! - `config`: parameter file and the immutable per-joint tuning.
//! - `hardware`: named state/command registers and a simulated robot behind them.
//! - `observation`: gravity projection and the sliding observation window.
//! - `policy`: model description file and the fixed-topology network.
//! - `actuation`: output post-processing and the tilt monitor.
//! - `control`: phase sequencing, the per-cycle controller and the velocity-command cell.
//! - `runtime`, `utils`: periodic thread, teleop publisher and telemetry.

pub mod actuation;
pub mod config;
pub mod control;
pub mod error;
pub mod hardware;
pub mod observation;
pub mod policy;
pub mod runtime;
pub mod utils;

pub use config::{ACTION_SIZE, ActionKind, ControllerParams, PolicyParameters, SINGLE_FRAME_SIZE};
pub use control::{CycleReport, NeuralController, VelocityCommand, latest_value_channel};
pub use error::{ActivationError, ConfigError, CycleError};
