//! Performance statistics collection for `--stats` output.

use std::time::{Duration, Instant};

/// Collects phase timings and the figures derived from them.
///
/// Created when `--stats` is passed and filled from the origin's report.
pub struct Stats {
    total_start: Instant,
    phases: Vec<(&'static str, Duration)>,
    pub algorithm: String,
    pub n: usize,
    pub processes: usize,
    pub grid: (usize, usize),
    /// Slowest process's loop time, seconds.
    pub elapsed: f64,
    pub max_abs_error: f64,
    pub first_mismatch: Option<(usize, usize)>,
}

impl Default for Stats {
    fn default() -> Self {
        Self::new()
    }
}

impl Stats {
    pub fn new() -> Self {
        Self {
            total_start: Instant::now(),
            phases: Vec::new(),
            algorithm: String::new(),
            n: 0,
            processes: 0,
            grid: (0, 0),
            elapsed: 0.0,
            max_abs_error: 0.0,
            first_mismatch: None,
        }
    }

    /// Record a completed phase with its duration.
    pub fn add_phase(&mut self, name: &'static str, duration: Duration) {
        self.phases.push((name, duration));
    }

    pub fn phases(&self) -> &[(&'static str, Duration)] {
        &self.phases
    }

    /// Millions of floating point operations per second for an N x N
    /// product (2N³ flops) over the loop time. Zero when nothing was timed.
    pub fn mflops(&self) -> f64 {
        if self.elapsed <= 0.0 {
            return 0.0;
        }
        let n = self.n as f64;
        2.0 * n * n * n / self.elapsed / 1e6
    }

    /// Print the stats table to stderr.
    pub fn display(&self) {
        let total = self.total_start.elapsed();
        eprintln!();
        eprintln!("=== gridmul Performance Stats ===");
        eprintln!(
            "  {} {}x{} on {} processes ({}x{} grid)",
            self.algorithm, self.n, self.n, self.processes, self.grid.0, self.grid.1
        );

        for (name, dur) in &self.phases {
            eprintln!("  {:<24} {:>8.3}s", name, dur.as_secs_f64());
        }

        eprintln!("  Loop time (max):        {:>8.6}s", self.elapsed);
        eprintln!("  Performance:            {:>8.2} MFLOPS", self.mflops());
        eprintln!("  Max abs error:          {:e}", self.max_abs_error);
        if let Some((row, col)) = self.first_mismatch {
            eprintln!("  First mismatch:         ({}, {})", row, col);
        }
        eprintln!("  ─────────────────────────────────");
        eprintln!("  Total:                  {:>8.3}s", total.as_secs_f64());
    }
}
