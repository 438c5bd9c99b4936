// Hardware abstraction seen by the controller: two register banks.
// The state bank is written by the hardware and read by the controller; the command bank
// the other way round. `sim` provides a software robot behind the same banks.

pub mod registers;
pub mod sim;

use crate::config::PolicyParameters;
use crate::error::ActivationError;
use registers::{RegisterBank, RegisterId};

pub const IMU_ANGULAR_VELOCITY: [&str; 3] = [
    "angular_velocity.x",
    "angular_velocity.y",
    "angular_velocity.z",
];
pub const IMU_ORIENTATION: [&str; 4] = [
    "orientation.w",
    "orientation.x",
    "orientation.y",
    "orientation.z",
];
pub const JOINT_STATE_INTERFACES: [&str; 2] = ["position", "velocity"];
pub const JOINT_COMMAND_INTERFACES: [&str; 5] = ["position", "velocity", "effort", "kp", "kd"];

#[derive(Debug, Clone, Default)]
pub struct HardwareInterface {
    pub state: RegisterBank,
    pub command: RegisterBank,
}

impl HardwareInterface {
    /// Declares the IMU and per-joint registers a motor driver of this robot exports.
    pub fn standard_layout(params: &PolicyParameters) -> Self {
        let mut hw = Self::default();
        for interface in IMU_ANGULAR_VELOCITY.iter().chain(IMU_ORIENTATION.iter()) {
            hw.state.declare(&params.imu_sensor_name, interface);
        }
        for joint in params.joint_names.iter() {
            for interface in JOINT_STATE_INTERFACES {
                hw.state.declare(joint, interface);
            }
            for interface in JOINT_COMMAND_INTERFACES {
                hw.command.declare(joint, interface);
            }
        }
        hw
    }
}

/// Resolves one register name, failing fast on names the hardware does not export.
pub fn lookup(
    bank: &RegisterBank,
    prefix: &str,
    interface: &str,
) -> Result<RegisterId, ActivationError> {
    bank.resolve(prefix, interface)
        .ok_or_else(|| ActivationError::UnknownRegister {
            prefix: prefix.to_string(),
            interface: interface.to_string(),
        })
}

pub fn lookup_all<const N: usize>(
    bank: &RegisterBank,
    prefix: &str,
    interfaces: [&str; N],
) -> Result<[RegisterId; N], ActivationError> {
    let mut ids = Vec::with_capacity(N);
    for interface in interfaces {
        ids.push(lookup(bank, prefix, interface)?);
    }
    Ok(std::array::from_fn(|i| ids[i]))
}
