// Observation side: raw sensor snapshot -> projected gravity -> stacked, clamped window.
pub mod frame;
pub mod gravity;
