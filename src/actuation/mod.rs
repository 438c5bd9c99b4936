pub mod post_process;
pub mod safety;

pub use post_process::{ActionPostProcessor, ActionVector, JointCommand, ProcessedAction};
pub use safety::SafetyMonitor;
