//! runtime.rs
//! Periodic control thread and teleop publisher for running the controller against the
//! simulated robot.
//!
//! The control thread owns the controller, the register banks and the robot; nothing else
//! touches them. Velocity commands reach it only through the latest-value cell.

use std::{
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use crossbeam::channel::tick;
use log::{info, warn};
use spin_sleep::{SpinSleeper, SpinStrategy};
use thread_priority::{ThreadBuilderExt, ThreadPriority};

use crate::config::ACTION_SIZE;
use crate::control::{CommandPublisher, ControlPhase, NeuralController, VelocityCommand};
use crate::error::ActivationError;
use crate::hardware::HardwareInterface;
use crate::hardware::sim::SimulatedRobot;
use crate::utils::metrics::{CycleEvent, CycleRecorder, SharedStats};

#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub period: Duration,
    /// Stop after this long; run until `running` is cleared otherwise.
    pub duration: Option<Duration>,
    pub core: Option<usize>,
    /// Tip the simulated body over after this long, to exercise the tilt stop.
    pub tilt_after: Option<Duration>,
}

/// Final state of a finished run.
#[derive(Debug, Clone, Copy)]
pub struct RunOutcome {
    pub cycles: u64,
    pub final_phase: Option<ControlPhase>,
    pub joint_positions: [f64; ACTION_SIZE],
}

pub struct ControlLoop {
    controller: NeuralController,
    hw: HardwareInterface,
    robot: SimulatedRobot,
    recorder: Option<CycleRecorder>,
    stats: SharedStats,
    running: Arc<AtomicBool>,
    config: LoopConfig,
}

impl ControlLoop {
    pub fn new(
        controller: NeuralController,
        hw: HardwareInterface,
        robot: SimulatedRobot,
        stats: SharedStats,
        running: Arc<AtomicBool>,
        config: LoopConfig,
    ) -> Self {
        Self {
            controller,
            hw,
            robot,
            recorder: None,
            stats,
            running,
            config,
        }
    }

    pub fn with_recorder(mut self, recorder: CycleRecorder) -> Self {
        self.recorder = Some(recorder);
        self
    }

    /// Runs the loop on a dedicated max-priority thread, pinned to `config.core` if set.
    pub fn spawn(self) -> std::io::Result<JoinHandle<Result<RunOutcome, ActivationError>>> {
        thread::Builder::new()
            .name("control".to_string())
            .spawn_with_priority(ThreadPriority::Max, move |priority| {
                if let Err(e) = priority {
                    warn!("control thread runs without elevated priority: {:?}", e);
                }
                if let Some(core) = self.config.core {
                    pin_to_core(core);
                }
                self.run()
            })
    }

    /// Activates the controller and runs periodic cycles until stopped, then deactivates.
    pub fn run(mut self) -> Result<RunOutcome, ActivationError> {
        let period = self.config.period;
        let sleeper = SpinSleeper::new(100_000).with_spin_strategy(SpinStrategy::YieldThread);

        let start = Instant::now();
        self.robot.publish(&mut self.hw.state);
        self.controller.activate(&self.hw, Duration::ZERO)?;

        let mut next_deadline = start + period;
        let mut last_tick = start;
        let mut seq: u64 = 0;
        let mut tilted = false;

        while self.running.load(Ordering::Acquire) {
            if self.config.duration.is_some_and(|d| start.elapsed() >= d) {
                break;
            }

            // ====================================================================
            // Periodic release
            // ====================================================================
            let now = Instant::now();
            if now < next_deadline {
                sleeper.sleep(next_deadline - now);
            } else {
                self.stats.lock().record_deadline_miss();
            }
            let tick_at = Instant::now();
            let since_start = tick_at - start;

            if !tilted && self.config.tilt_after.is_some_and(|t| since_start >= t) {
                info!("Tipping simulated body over at t={:.3}s", since_start.as_secs_f64());
                self.robot.set_attitude(1.4, 0.0, 0.0);
                tilted = true;
            }

            // ====================================================================
            // Cycle: sense -> control -> actuate
            // ====================================================================
            self.robot.publish(&mut self.hw.state);
            let before = self.controller.phase();
            let result = self.controller.update(&mut self.hw, since_start, tick_at - last_tick);
            let latency = tick_at.elapsed();
            self.robot.step(&self.hw.command, period.as_secs_f64());

            {
                let mut stats = self.stats.lock();
                stats.record(&result, latency);
                if before != Some(ControlPhase::EmergencyStop)
                    && self.controller.phase() == Some(ControlPhase::EmergencyStop)
                {
                    stats.record_emergency_stop();
                }
            }
            if let Some(recorder) = &self.recorder {
                recorder.record(CycleEvent::from_result(
                    seq,
                    since_start.as_secs_f64(),
                    &result,
                    latency,
                ));
            }

            last_tick = tick_at;
            next_deadline += period;
            seq += 1;
        }

        let outcome = RunOutcome {
            cycles: seq,
            final_phase: self.controller.phase(),
            joint_positions: self.robot.joint_positions(),
        };
        self.controller.deactivate(&mut self.hw);
        Ok(outcome)
    }
}

fn pin_to_core(core: usize) {
    let core_ids = core_affinity::get_core_ids().unwrap_or_default();
    match core_ids.into_iter().find(|c| c.id == core) {
        Some(core_id) if core_affinity::set_for_current(core_id) => {
            info!("control thread pinned to core {}", core)
        }
        _ => warn!("could not pin control thread to core {}", core),
    }
}

/// Publishes `command` at `rate_hz` until `running` is cleared.
pub fn spawn_teleop(
    publisher: CommandPublisher,
    command: VelocityCommand,
    rate_hz: f64,
    running: Arc<AtomicBool>,
) -> std::io::Result<JoinHandle<()>> {
    let period = Duration::from_secs_f64(1.0 / rate_hz.max(1.0));
    thread::Builder::new().name("teleop".to_string()).spawn(move || {
        let ticker = tick(period);
        while running.load(Ordering::Acquire) {
            if ticker.recv().is_err() {
                break;
            }
            publisher.publish(command);
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PolicyParameters;
    use crate::config::tests::sample_params;
    use crate::control::latest_value_channel;
    use crate::policy::{LOCOMOTION_TOPOLOGY, PolicyModel};
    use crate::utils::metrics::LoopStats;

    fn control_loop(config: LoopConfig) -> (ControlLoop, SharedStats) {
        let mut params = PolicyParameters::from_params(&sample_params()).unwrap();
        params.use_imu = true;
        params.init_duration = 0.02;
        params.fade_in_duration = 0.02;
        let hw = HardwareInterface::standard_layout(&params);
        let robot = SimulatedRobot::new(&params, &hw, [0.1; ACTION_SIZE]).unwrap();
        let model = PolicyModel::zeros(&LOCOMOTION_TOPOLOGY, params.observation_size());
        let (_publisher, reader) = latest_value_channel();
        let controller = NeuralController::from_parts(params, model, reader).unwrap();
        let stats = LoopStats::shared();
        let running = Arc::new(AtomicBool::new(true));
        (
            ControlLoop::new(controller, hw, robot, stats.clone(), running, config),
            stats,
        )
    }

    #[test]
    fn bounded_run_reaches_active_and_counts_cycles() {
        let (lp, stats) = control_loop(LoopConfig {
            period: Duration::from_millis(2),
            duration: Some(Duration::from_millis(200)),
            core: None,
            tilt_after: None,
        });
        let outcome = lp.run().unwrap();
        assert!(outcome.cycles > 10);
        assert_eq!(outcome.final_phase, Some(ControlPhase::Active));
        let stats = stats.lock();
        assert_eq!(stats.cycles, outcome.cycles);
        assert!(stats.inferences > 0);
        assert_eq!(stats.error_count(), 0);
    }

    #[test]
    fn tilting_the_body_latches_emergency_stop() {
        let (lp, stats) = control_loop(LoopConfig {
            period: Duration::from_millis(2),
            duration: Some(Duration::from_millis(200)),
            core: None,
            tilt_after: Some(Duration::from_millis(80)),
        });
        let outcome = lp.run().unwrap();
        assert_eq!(outcome.final_phase, Some(ControlPhase::EmergencyStop));
        assert_eq!(stats.lock().emergency_stops, 1);
    }

    #[test]
    fn teleop_publishes_until_stopped() {
        let (publisher, mut reader) = latest_value_channel();
        let running = Arc::new(AtomicBool::new(true));
        let cmd = VelocityCommand::new(0.3, 0.0, 0.2);
        let handle = spawn_teleop(publisher, cmd, 200.0, running.clone()).unwrap();
        thread::sleep(Duration::from_millis(50));
        running.store(false, Ordering::Release);
        handle.join().unwrap();
        assert_eq!(reader.latest(), cmd);
    }
}
