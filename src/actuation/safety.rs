//! safety.rs
//! Tilt monitor. Once tripped it stays tripped until `reset`, which only activation calls.

use log::warn;

#[derive(Debug, Clone, Default)]
pub struct SafetyMonitor {
    tripped: bool,
}

impl SafetyMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true when the body tilt exceeds `max_body_angle` now or did earlier in this
    /// activation. `gravity_z` is the body-frame z component of projected gravity; upright
    /// is `-1`.
    pub fn evaluate(&mut self, gravity_z: f64, max_body_angle: f64) -> bool {
        if !self.tripped && -gravity_z < max_body_angle.cos() {
            warn!(
                "Body tilt {:.3} rad exceeds limit {:.3} rad",
                (-gravity_z).clamp(-1.0, 1.0).acos(),
                max_body_angle
            );
            self.tripped = true;
        }
        self.tripped
    }

    pub fn is_tripped(&self) -> bool {
        self.tripped
    }

    pub fn reset(&mut self) {
        self.tripped = false;
    }
}
