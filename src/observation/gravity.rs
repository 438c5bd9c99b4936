//! gravity.rs
//! Orientation helpers: world gravity expressed in the body frame, and the identity check
//! used when the IMU is disabled.

use nalgebra::{Quaternion, UnitQuaternion, Vector3};

/// Orientation as read from the IMU registers, scalar first.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Orientation {
    pub w: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Orientation {
    pub const IDENTITY: Orientation = Orientation {
        w: 1.0,
        x: 0.0,
        y: 0.0,
        z: 0.0,
    };

    pub fn from_wxyz([w, x, y, z]: [f64; 4]) -> Self {
        Self { w, x, y, z }
    }

    /// True when every component is within `tolerance` of the identity rotation.
    pub fn is_identity(&self, tolerance: f64) -> bool {
        (self.w - 1.0).abs() <= tolerance
            && self.x.abs() <= tolerance
            && self.y.abs() <= tolerance
            && self.z.abs() <= tolerance
    }

    /// World down `(0, 0, -1)` rotated into the body frame by the inverse rotation.
    /// A zero quaternion yields NaN components, which the observation NaN check rejects.
    pub fn projected_gravity(&self) -> Vector3<f64> {
        let rotation = UnitQuaternion::new_normalize(Quaternion::new(self.w, self.x, self.y, self.z));
        rotation.inverse_transform_vector(&Vector3::new(0.0, 0.0, -1.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::{FRAC_PI_2, PI};

    fn close(a: Vector3<f64>, b: [f64; 3]) -> bool {
        (a - Vector3::from(b)).norm() < 1e-9
    }

    #[test]
    fn identity_projects_straight_down() {
        assert!(close(Orientation::IDENTITY.projected_gravity(), [0.0, 0.0, -1.0]));
    }

    #[test]
    fn half_turn_roll_projects_straight_up() {
        let q = Orientation::from_wxyz([0.0, 1.0, 0.0, 0.0]);
        assert!(close(q.projected_gravity(), [0.0, 0.0, 1.0]));

        let q = UnitQuaternion::from_euler_angles(PI, 0.0, 0.0);
        let q = Orientation::from_wxyz([q.w, q.i, q.j, q.k]);
        assert!(close(q.projected_gravity(), [0.0, 0.0, 1.0]));
    }

    #[test]
    fn quarter_pitch_moves_gravity_onto_body_x() {
        // Nose down by 90 degrees: world down lies along body +x.
        let q = UnitQuaternion::from_euler_angles(0.0, FRAC_PI_2, 0.0);
        let g = Orientation::from_wxyz([q.w, q.i, q.j, q.k]).projected_gravity();
        assert!(close(g, [1.0, 0.0, 0.0]));
    }

    #[test]
    fn identity_check_uses_per_component_tolerance() {
        assert!(Orientation::from_wxyz([0.9995, 0.0005, 0.0, -0.0009]).is_identity(1e-3));
        assert!(!Orientation::from_wxyz([1.0, 0.0, 0.002, 0.0]).is_identity(1e-3));
    }

    #[test]
    fn zero_quaternion_is_not_finite() {
        let g = Orientation::from_wxyz([0.0; 4]).projected_gravity();
        assert!(g.iter().any(|v| !v.is_finite()));
    }
}
