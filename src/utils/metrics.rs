//! metrics.rs
//! Control-loop telemetry.
//!
//! Two independent paths:
//! - **CycleRecorder:** lock-free bounded queue, one row per cycle, drained by a background
//!   thread into CSV. The control thread never blocks on it; rows are dropped when full.
//! - **LoopStats:** shared counters and latency estimates, summarised at shutdown.

use std::{
    collections::BTreeMap,
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU64, Ordering},
    },
    thread::{self, JoinHandle},
    time::Duration,
};

use average::{Estimate, Max, Mean};
use crossbeam_queue::ArrayQueue;
use csv::Writer;
use log::{debug, error};
use parking_lot::Mutex;
use serde::Serialize;

use crate::control::CycleReport;
use crate::error::CycleError;

const EVENT_QUEUE_CAPACITY: usize = 16_384;
const CONSUMER_POLL_MS: u64 = 5;
const FLUSH_BATCHES: usize = 8;

/// One CSV row per control cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleEvent {
    pub seq: u64,
    pub t_s: f64,
    pub phase: &'static str,
    pub fade: f64,
    pub inferred: bool,
    pub latency_us: u64,
    pub error: &'static str,
}

impl CycleEvent {
    pub fn from_result(
        seq: u64,
        t_s: f64,
        result: &Result<CycleReport, CycleError>,
        latency: Duration,
    ) -> Self {
        let latency_us = latency.as_micros() as u64;
        match result {
            Ok(report) => Self {
                seq,
                t_s,
                phase: report.phase.name(),
                fade: report.fade,
                inferred: report.inferred,
                latency_us,
                error: "",
            },
            Err(err) => Self {
                seq,
                t_s,
                phase: "",
                fade: 0.0,
                inferred: false,
                latency_us,
                error: err.kind(),
            },
        }
    }
}

/// Non-blocking per-cycle recorder with a background CSV exporter.
#[derive(Clone)]
pub struct CycleRecorder {
    queue: Arc<ArrayQueue<CycleEvent>>,
    dropped: Arc<AtomicU64>,
    running: Arc<AtomicBool>,
}

impl Default for CycleRecorder {
    fn default() -> Self {
        Self::new(EVENT_QUEUE_CAPACITY)
    }
}

impl CycleRecorder {
    pub fn new(capacity: usize) -> Self {
        Self {
            queue: Arc::new(ArrayQueue::new(capacity)),
            dropped: Arc::new(AtomicU64::new(0)),
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Appends a row; drops it and counts the drop when the queue is full.
    #[inline]
    pub fn record(&self, event: CycleEvent) {
        if self.queue.push(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Spawns the exporter. It runs until `stop`, then drains what is left. The handle
    /// yields the number of rows written.
    pub fn start_exporter(&self, output_csv: PathBuf) -> JoinHandle<u64> {
        let queue = Arc::clone(&self.queue);
        let running = Arc::clone(&self.running);
        running.store(true, Ordering::SeqCst);

        thread::spawn(move || {
            let file = match File::create(&output_csv) {
                Ok(f) => f,
                Err(e) => {
                    error!("failed to create {}: {}", output_csv.display(), e);
                    return 0;
                }
            };
            let mut wtr = Writer::from_writer(BufWriter::new(file));
            let mut written = 0u64;
            let mut flush_counter = 0usize;

            while running.load(Ordering::SeqCst) {
                let batch = drain(&queue, &mut wtr, 256);
                if batch > 0 {
                    written += batch;
                    flush_counter += 1;
                    if flush_counter >= FLUSH_BATCHES {
                        wtr.flush().ok();
                        flush_counter = 0;
                    }
                } else {
                    thread::sleep(Duration::from_millis(CONSUMER_POLL_MS));
                }
            }

            written += drain(&queue, &mut wtr, usize::MAX);
            if let Err(e) = wtr.flush() {
                error!("failed to flush {}: {}", output_csv.display(), e);
            }
            debug!("cycle exporter wrote {} rows to {}", written, output_csv.display());
            written
        })
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

fn drain<W: Write>(queue: &ArrayQueue<CycleEvent>, wtr: &mut Writer<W>, limit: usize) -> u64 {
    let mut written = 0;
    for _ in 0..limit {
        let Some(event) = queue.pop() else { break };
        match wtr.serialize(&event) {
            Ok(()) => written += 1,
            Err(e) => error!("failed to write cycle row {}: {}", event.seq, e),
        }
    }
    written
}

/// Aggregate counters for one run.
#[derive(Debug, Default)]
pub struct LoopStats {
    pub cycles: u64,
    pub inferences: u64,
    pub deadline_misses: u64,
    pub emergency_stops: u64,
    pub errors: BTreeMap<&'static str, u64>,
    latency_mean: Mean,
    latency_max: Max,
}

pub type SharedStats = Arc<Mutex<LoopStats>>;

impl LoopStats {
    pub fn shared() -> SharedStats {
        Arc::new(Mutex::new(LoopStats::default()))
    }

    pub fn record(&mut self, result: &Result<CycleReport, CycleError>, latency: Duration) {
        self.cycles += 1;
        let latency_us = latency.as_secs_f64() * 1e6;
        self.latency_mean.add(latency_us);
        self.latency_max.add(latency_us);
        match result {
            Ok(report) if report.inferred => self.inferences += 1,
            Ok(_) => {}
            Err(err) => *self.errors.entry(err.kind()).or_insert(0) += 1,
        }
    }

    pub fn record_deadline_miss(&mut self) {
        self.deadline_misses += 1;
    }

    pub fn record_emergency_stop(&mut self) {
        self.emergency_stops += 1;
    }

    pub fn error_count(&self) -> u64 {
        self.errors.values().sum()
    }

    pub fn mean_latency_us(&self) -> Option<f64> {
        (!self.latency_mean.is_empty()).then(|| self.latency_mean.mean())
    }

    pub fn max_latency_us(&self) -> Option<f64> {
        (!self.latency_mean.is_empty()).then(|| self.latency_max.max())
    }

    /// Share of cycles that released late, in percent.
    pub fn deadline_miss_rate(&self) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        self.deadline_misses as f64 / self.cycles as f64 * 100.0
    }
}
