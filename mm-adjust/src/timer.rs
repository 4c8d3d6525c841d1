//! Benchmark timers grouped per solve.

use std::time::{Duration, Instant};

/// A start/stop accumulator reporting both wall-clock seconds and raw
/// nanosecond ticks.
#[derive(Debug, Clone, Copy, Default)]
pub struct Stopwatch {
    total: Duration,
    running: Option<Instant>,
}

impl Stopwatch {
    pub fn start(&mut self) {
        if self.running.is_none() {
            self.running = Some(Instant::now());
        }
    }

    pub fn stop(&mut self) {
        if let Some(started) = self.running.take() {
            self.total += started.elapsed();
        }
    }

    pub fn seconds(&self) -> f64 {
        self.total.as_secs_f64()
    }

    pub fn ticks(&self) -> u64 {
        u64::try_from(self.total.as_nanos()).unwrap_or(u64::MAX)
    }
}

/// All the benchmark timers of one solve, grouped together.
#[derive(Debug, Clone, Copy, Default)]
pub struct SolverTimer {
    pub solve: Stopwatch,
    pub function: Stopwatch,
    pub jacobian: Stopwatch,
    pub parameter: Stopwatch,
    pub error: Stopwatch,
}
