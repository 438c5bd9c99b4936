//! registers.rs
//! Named state/command registers exported by the hardware layer.
//!
//! Names are `(prefix, interface)` pairs such as `("imu_sensor", "orientation.w")` or
//! `("leg_front_r_1", "kp")`. They are resolved to a `RegisterId` once at activation; the
//! control thread then reads and writes by index only.

use std::{collections::HashMap, fmt};

/// Index of a register inside its `RegisterBank`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RegisterId(usize);

impl RegisterId {
    pub fn index(&self) -> usize {
        self.0
    }
}

impl fmt::Display for RegisterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Arena of named f64 registers.
///
/// A state register holds `None` until the hardware first publishes a value for it.
#[derive(Debug, Clone, Default)]
pub struct RegisterBank {
    names: Vec<(String, String)>,
    values: Vec<Option<f64>>,
    index: HashMap<(String, String), RegisterId>,
}

impl RegisterBank {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a register, or returns the existing id if the name is already declared.
    pub fn declare(&mut self, prefix: &str, interface: &str) -> RegisterId {
        let key = (prefix.to_string(), interface.to_string());
        if let Some(id) = self.index.get(&key) {
            return *id;
        }
        let id = RegisterId(self.values.len());
        self.names.push(key.clone());
        self.values.push(None);
        self.index.insert(key, id);
        id
    }

    pub fn resolve(&self, prefix: &str, interface: &str) -> Option<RegisterId> {
        self.index
            .get(&(prefix.to_string(), interface.to_string()))
            .copied()
    }

    #[inline]
    pub fn get(&self, id: RegisterId) -> Option<f64> {
        self.values.get(id.0).copied().flatten()
    }

    #[inline]
    pub fn set(&mut self, id: RegisterId, value: f64) {
        if let Some(slot) = self.values.get_mut(id.0) {
            *slot = Some(value);
        }
    }

    /// Marks a register as not yet published.
    pub fn clear(&mut self, id: RegisterId) {
        if let Some(slot) = self.values.get_mut(id.0) {
            *slot = None;
        }
    }

    /// Writes `value` to every register in the bank.
    pub fn set_all(&mut self, value: f64) {
        for slot in self.values.iter_mut() {
            *slot = Some(value);
        }
    }

    pub fn name(&self, id: RegisterId) -> Option<(&str, &str)> {
        self.names
            .get(id.0)
            .map(|(prefix, interface)| (prefix.as_str(), interface.as_str()))
    }

    /// Lookup by name, for hosts and tests that do not hold ids.
    pub fn value_of(&self, prefix: &str, interface: &str) -> Option<f64> {
        self.resolve(prefix, interface).and_then(|id| self.get(id))
    }

    pub fn set_by_name(&mut self, prefix: &str, interface: &str, value: f64) -> bool {
        match self.resolve(prefix, interface) {
            Some(id) => {
                self.set(id, value);
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (RegisterId, Option<f64>)> + '_ {
        self.values
            .iter()
            .enumerate()
            .map(|(i, value)| (RegisterId(i), *value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn declare_is_idempotent() {
        let mut bank = RegisterBank::new();
        let a = bank.declare("imu_sensor", "orientation.w");
        let b = bank.declare("imu_sensor", "orientation.w");
        assert_eq!(a, b);
        assert_eq!(bank.len(), 1);
    }

    #[test]
    fn unpublished_register_reads_none() {
        let mut bank = RegisterBank::new();
        let id = bank.declare("leg_front_r_1", "position");
        assert_eq!(bank.get(id), None);
        bank.set(id, 0.25);
        assert_eq!(bank.get(id), Some(0.25));
        bank.clear(id);
        assert_eq!(bank.get(id), None);
    }

    #[test]
    fn set_all_touches_every_register() {
        let mut bank = RegisterBank::new();
        bank.declare("j", "position");
        bank.declare("j", "kp");
        bank.set_all(0.0);
        assert!(bank.iter().all(|(_, v)| v == Some(0.0)));
        assert_eq!(bank.name(RegisterId(1)), Some(("j", "kp")));
    }
}
