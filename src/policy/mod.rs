pub mod dense;
pub mod lstm;
pub mod model_file;
pub mod network;

pub use network::{LOCOMOTION_TOPOLOGY, NetworkTopology, PolicyModel};
