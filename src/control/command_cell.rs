//! command_cell.rs
//! Single-slot latest-value channel for velocity commands.
//!
//! The slot is a capacity-1 `ArrayQueue`. The publisher uses `force_push`, which replaces
//! any value the control thread has not yet taken; the reader `pop`s at most once per cycle
//! and caches the last value it saw, so a cycle without a new command reuses the old one.
//! Push and pop hand over a whole `VelocityCommand` with release/acquire ordering: the
//! reader sees either the previous command or the new one, never a mix.

use std::sync::Arc;

use crossbeam_queue::ArrayQueue;
use serde::{Deserialize, Serialize};

/// Commanded planar velocity: forward (m/s), lateral (m/s), yaw rate (rad/s).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct VelocityCommand {
    pub x: f64,
    pub y: f64,
    pub yaw: f64,
}

impl VelocityCommand {
    pub fn new(x: f64, y: f64, yaw: f64) -> Self {
        Self { x, y, yaw }
    }
}

pub fn latest_value_channel() -> (CommandPublisher, CommandReader) {
    let slot = Arc::new(ArrayQueue::new(1));
    (
        CommandPublisher { slot: Arc::clone(&slot) },
        CommandReader {
            slot,
            last: VelocityCommand::default(),
        },
    )
}

/// Producer side. Not `Clone`: the channel has a single producer.
pub struct CommandPublisher {
    slot: Arc<ArrayQueue<VelocityCommand>>,
}

impl CommandPublisher {
    /// Replaces whatever command is pending. Never blocks.
    pub fn publish(&self, command: VelocityCommand) {
        let _ = self.slot.force_push(command);
    }
}

/// Consumer side, owned by the control thread.
pub struct CommandReader {
    slot: Arc<ArrayQueue<VelocityCommand>>,
    last: VelocityCommand,
}

impl CommandReader {
    /// Newest published command, or the previous one if nothing new arrived.
    pub fn latest(&mut self) -> VelocityCommand {
        if let Some(command) = self.slot.pop() {
            self.last = command;
        }
        self.last
    }

    /// Drops any pending command and forgets the cached one.
    pub fn reset(&mut self) {
        while self.slot.pop().is_some() {}
        self.last = VelocityCommand::default();
    }

    pub fn has_pending(&self) -> bool {
        !self.slot.is_empty()
    }
}
