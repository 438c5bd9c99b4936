pub mod command_cell;
pub mod controller;
pub mod phase;

pub use command_cell::{CommandPublisher, CommandReader, VelocityCommand, latest_value_channel};
pub use controller::{CycleReport, NeuralController};
pub use phase::{ControlPhase, PhaseTiming};
