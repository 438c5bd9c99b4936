//! sim.rs
//! Software robot behind the register banks, so the control loop runs without hardware.
//! - Joints: unit-inertia PD servo tracking the position and velocity commands, plus
//!   feed-forward effort, all read from the command bank
//! - IMU: fixed body orientation, angular velocity with uniform noise
//! Register ids are resolved once here; `publish`/`step` never look up names.

use nalgebra::UnitQuaternion;
use rand::random_range;

use crate::config::{ACTION_SIZE, PolicyParameters};
use crate::error::ActivationError;
use crate::hardware::{HardwareInterface, IMU_ANGULAR_VELOCITY, IMU_ORIENTATION, lookup, lookup_all};
use crate::hardware::registers::{RegisterBank, RegisterId};

const JOINT_DAMPING: f64 = 0.05;
const MAX_JOINT_VELOCITY: f64 = 30.0;

#[derive(Debug, Clone, Copy)]
struct SimJoint {
    position_state: RegisterId,
    velocity_state: RegisterId,
    position_command: RegisterId,
    velocity_command: RegisterId,
    effort_command: RegisterId,
    kp: RegisterId,
    kd: RegisterId,
}

pub struct SimulatedRobot {
    angular_velocity: [RegisterId; 3],
    orientation_registers: [RegisterId; 4],
    joints: [SimJoint; ACTION_SIZE],
    positions: [f64; ACTION_SIZE],
    velocities: [f64; ACTION_SIZE],
    orientation: UnitQuaternion<f64>,
    gyro_noise: f64,
}

impl SimulatedRobot {
    pub fn new(
        params: &PolicyParameters,
        hw: &HardwareInterface,
        initial_positions: [f64; ACTION_SIZE],
    ) -> Result<Self, ActivationError> {
        let imu = params.imu_sensor_name.as_str();
        let angular_velocity = lookup_all(&hw.state, imu, IMU_ANGULAR_VELOCITY)?;
        let orientation_registers = lookup_all(&hw.state, imu, IMU_ORIENTATION)?;

        let mut joints = Vec::with_capacity(ACTION_SIZE);
        for name in params.joint_names.iter() {
            joints.push(SimJoint {
                position_state: lookup(&hw.state, name, "position")?,
                velocity_state: lookup(&hw.state, name, "velocity")?,
                position_command: lookup(&hw.command, name, "position")?,
                velocity_command: lookup(&hw.command, name, "velocity")?,
                effort_command: lookup(&hw.command, name, "effort")?,
                kp: lookup(&hw.command, name, "kp")?,
                kd: lookup(&hw.command, name, "kd")?,
            });
        }

        Ok(Self {
            angular_velocity,
            orientation_registers,
            joints: std::array::from_fn(|i| joints[i]),
            positions: initial_positions,
            velocities: [0.0; ACTION_SIZE],
            orientation: UnitQuaternion::identity(),
            gyro_noise: 0.0,
        })
    }

    /// Uniform gyro noise amplitude in rad/s.
    pub fn with_gyro_noise(mut self, amplitude: f64) -> Self {
        self.gyro_noise = amplitude.abs();
        self
    }

    /// Sets the body attitude reported by the IMU.
    pub fn set_attitude(&mut self, roll: f64, pitch: f64, yaw: f64) {
        self.orientation = UnitQuaternion::from_euler_angles(roll, pitch, yaw);
    }

    pub fn joint_positions(&self) -> [f64; ACTION_SIZE] {
        self.positions
    }

    /// Writes the current sensor values into the state bank.
    pub fn publish(&self, state: &mut RegisterBank) {
        for id in self.angular_velocity {
            let noise = if self.gyro_noise > 0.0 {
                random_range(-self.gyro_noise..self.gyro_noise)
            } else {
                0.0
            };
            state.set(id, noise);
        }
        let q = self.orientation.quaternion();
        let wxyz = [q.w, q.i, q.j, q.k];
        for (id, value) in self.orientation_registers.iter().zip(wxyz) {
            state.set(*id, value);
        }
        for (i, joint) in self.joints.iter().enumerate() {
            state.set(joint.position_state, self.positions[i]);
            state.set(joint.velocity_state, self.velocities[i]);
        }
    }

    /// Integrates joint dynamics over `dt` seconds using the commands currently written.
    pub fn step(&mut self, command: &RegisterBank, dt: f64) {
        for (i, joint) in self.joints.iter().enumerate() {
            let kp = command.get(joint.kp).unwrap_or(0.0);
            let kd = command.get(joint.kd).unwrap_or(0.0);
            let target = command.get(joint.position_command).unwrap_or(self.positions[i]);
            let target_velocity = command.get(joint.velocity_command).unwrap_or(0.0);
            let effort = command.get(joint.effort_command).unwrap_or(0.0);

            let torque = kp * (target - self.positions[i])
                + kd * (target_velocity - self.velocities[i])
                + effort
                - JOINT_DAMPING * self.velocities[i];
            self.velocities[i] =
                (self.velocities[i] + torque * dt).clamp(-MAX_JOINT_VELOCITY, MAX_JOINT_VELOCITY);
            self.positions[i] += self.velocities[i] * dt;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::sample_params;

    fn robot() -> (SimulatedRobot, HardwareInterface) {
        let params = PolicyParameters::from_params(&sample_params()).unwrap();
        let hw = HardwareInterface::standard_layout(&params);
        let robot = SimulatedRobot::new(&params, &hw, [0.2; ACTION_SIZE]).unwrap();
        (robot, hw)
    }

    #[test]
    fn publish_fills_every_state_register() {
        let (robot, mut hw) = robot();
        robot.publish(&mut hw.state);
        assert!(hw.state.iter().all(|(_, v)| v.is_some()));
        assert_eq!(hw.state.value_of("imu_sensor", "orientation.w"), Some(1.0));
        assert_eq!(hw.state.value_of("leg_front_r_1", "position"), Some(0.2));
    }

    #[test]
    fn pd_servo_moves_toward_target() {
        let (mut robot, mut hw) = robot();
        hw.command.set_by_name("leg_front_r_1", "position", 0.0);
        hw.command.set_by_name("leg_front_r_1", "kp", 20.0);
        hw.command.set_by_name("leg_front_r_1", "kd", 2.0);
        for _ in 0..2000 {
            robot.step(&hw.command, 0.002);
        }
        assert!(robot.joint_positions()[0].abs() < 0.02);
        // No gains written: joint 1 holds still.
        assert!((robot.joint_positions()[1] - 0.2).abs() < 1e-9);
    }

    #[test]
    fn velocity_command_drives_joint_speed() {
        let (mut robot, mut hw) = robot();
        hw.command.set_by_name("leg_front_l_1", "velocity", 1.0);
        hw.command.set_by_name("leg_front_l_1", "kd", 5.0);
        for _ in 0..2000 {
            robot.step(&hw.command, 0.002);
        }
        robot.publish(&mut hw.state);
        let speed = hw.state.value_of("leg_front_l_1", "velocity").unwrap();
        assert!((speed - 1.0).abs() < 0.02, "speed {speed}");
        assert!(robot.joint_positions()[2] > 3.0);
    }
}
