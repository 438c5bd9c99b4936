//! # Neural locomotion controller
//!
//! Runs the controller at a fixed rate against the simulated robot.
//!
//! ## Threads
//! - **control:** max priority, optionally pinned; owns controller, registers and robot.
//! - **teleop:** publishes a constant velocity command through the latest-value cell.
//! - **exporter:** drains per-cycle rows into CSV (only with `--events-csv`).
//!
//! ## Outputs
//! - `--events-csv <path>`: one row per cycle (phase, fade, inference, latency, error).
//! - `--summary-csv <path>`: counters and latency statistics at shutdown.

use std::{
    path::PathBuf,
    process::ExitCode,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use clap::Parser;
use log::{error, info};

use neural_locomotion::{
    ACTION_SIZE, ControllerParams, NeuralController, VelocityCommand, latest_value_channel,
    hardware::{HardwareInterface, sim::SimulatedRobot},
    runtime::{ControlLoop, LoopConfig, spawn_teleop},
    utils::{
        export::export_summary_csv,
        metrics::{CycleRecorder, LoopStats},
    },
};

const TELEOP_RATE_HZ: f64 = 50.0;

#[derive(Parser, Debug)]
#[command(name = "neural_controller")]
#[command(about = "Recurrent-policy locomotion controller on a simulated legged robot")]
struct Args {
    /// Controller parameter file (TOML)
    #[arg(long)]
    params: PathBuf,

    /// Model description (JSON); overrides `model_path` from the parameter file
    #[arg(long)]
    model: Option<PathBuf>,

    /// Control rate
    #[arg(long, default_value_t = 500.0)]
    rate_hz: f64,

    /// Stop after this many seconds; run until killed otherwise
    #[arg(long)]
    duration_secs: Option<f64>,

    /// Pin the control thread to this core
    #[arg(long)]
    core: Option<usize>,

    /// Per-cycle CSV output
    #[arg(long)]
    events_csv: Option<PathBuf>,

    /// Run summary CSV output
    #[arg(long, default_value = "data/summary.csv")]
    summary_csv: PathBuf,

    /// Commanded forward velocity (m/s)
    #[arg(long, default_value_t = 0.0)]
    vx: f64,

    /// Commanded lateral velocity (m/s)
    #[arg(long, default_value_t = 0.0)]
    vy: f64,

    /// Commanded yaw rate (rad/s)
    #[arg(long, default_value_t = 0.0)]
    yaw_rate: f64,

    /// Tip the simulated body over after this many seconds
    #[arg(long)]
    tilt_after_secs: Option<f64>,

    /// Gyro noise amplitude of the simulated IMU (rad/s)
    #[arg(long, default_value_t = 0.01)]
    gyro_noise: f64,
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    info!("=== NEURAL CONTROLLER START ===");

    match run(args) {
        Ok(()) => {
            info!("=== NEURAL CONTROLLER FINISHED ===");
            ExitCode::SUCCESS
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<(), Box<dyn std::error::Error>> {
    if !(args.rate_hz > 0.0) {
        return Err(format!("--rate-hz must be positive, got {}", args.rate_hz).into());
    }

    let mut params = ControllerParams::from_toml_path(&args.params)?;
    if let Some(model) = args.model {
        params.model_path = model;
    } else if params.model_path.is_relative() {
        if let Some(dir) = args.params.parent() {
            params.model_path = dir.join(&params.model_path);
        }
    }

    // ====================================================================
    // Setup: controller, hardware registers, simulated robot
    // ====================================================================
    let (publisher, reader) = latest_value_channel();
    let controller = NeuralController::configure(&params, reader)?;
    let hw = HardwareInterface::standard_layout(controller.params());
    let robot = SimulatedRobot::new(controller.params(), &hw, [0.0; ACTION_SIZE])?
        .with_gyro_noise(args.gyro_noise);

    let running = Arc::new(AtomicBool::new(true));
    let stats = LoopStats::shared();
    let config = LoopConfig {
        period: Duration::from_secs_f64(1.0 / args.rate_hz),
        duration: args.duration_secs.map(Duration::from_secs_f64),
        core: args.core,
        tilt_after: args.tilt_after_secs.map(Duration::from_secs_f64),
    };

    let mut control_loop = ControlLoop::new(
        controller,
        hw,
        robot,
        stats.clone(),
        running.clone(),
        config,
    );
    let recorder = args.events_csv.map(|path| {
        let recorder = CycleRecorder::default();
        let handle = recorder.start_exporter(path);
        (recorder, handle)
    });
    if let Some((recorder, _)) = &recorder {
        control_loop = control_loop.with_recorder(recorder.clone());
    }

    // ====================================================================
    // Run
    // ====================================================================
    let teleop = spawn_teleop(
        publisher,
        VelocityCommand::new(args.vx, args.vy, args.yaw_rate),
        TELEOP_RATE_HZ,
        running.clone(),
    )?;
    let control = control_loop.spawn()?;
    info!("Control loop running at {} Hz", args.rate_hz);

    let outcome = control.join().map_err(|_| "control thread panicked")?;
    running.store(false, Ordering::Release);
    if teleop.join().is_err() {
        error!("teleop thread panicked");
    }
    if let Some((recorder, handle)) = recorder {
        recorder.stop();
        match handle.join() {
            Ok(rows) => info!("Exported {} cycle rows ({} dropped)", rows, recorder.dropped()),
            Err(_) => error!("exporter thread panicked"),
        }
    }

    let outcome = outcome?;
    info!(
        "Ran {} cycles, final phase {:?}, joints {:?}",
        outcome.cycles, outcome.final_phase, outcome.joint_positions
    );
    let stats = stats.lock();
    info!(
        "inferences={} errors={} deadline_misses={} ({:.2}%)",
        stats.inferences,
        stats.error_count(),
        stats.deadline_misses,
        stats.deadline_miss_rate()
    );
    export_summary_csv(&stats, &args.summary_csv)?;
    Ok(())
}
