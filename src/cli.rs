//! Command-line front end shared by the `band`, `cannon` and `summa`
//! executables.

use std::io::{self, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use clap::{Parser, ValueEnum};

use crate::engine::comm_local::run_local;
use crate::engine::comm::SendMode;
use crate::engine::distribute::BandTransfer;
use crate::engine::{self, Algorithm, RunConfig, RunReport, DEFAULT_TOLERANCE, ORIGIN};
use crate::error::{GridError, Result};
use crate::output;
use crate::stats::Stats;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Worker threads inside this process.
    Local,
    /// One MPI rank per process (needs the `distributed` feature).
    Mpi,
}

impl Default for Backend {
    /// MPI when built with the `distributed` feature, so a plain `mpirun`
    /// launch runs one grid instead of one local world per rank.
    fn default() -> Self {
        if cfg!(feature = "distributed") {
            Backend::Mpi
        } else {
            Backend::Local
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Transfer {
    /// Scatter/gather collectives and a broadcast
    Collective,
    /// Standard-mode sends, one per band
    #[value(alias = "point-to-point")]
    Standard,
    /// Synchronous-mode sends
    Synchronous,
    /// Ready-mode sends
    Ready,
    /// Buffered-mode sends through an attached buffer
    Buffered,
}

impl From<Transfer> for BandTransfer {
    fn from(t: Transfer) -> Self {
        match t {
            Transfer::Collective => BandTransfer::Collective,
            Transfer::Standard => BandTransfer::PointToPoint(SendMode::Standard),
            Transfer::Synchronous => BandTransfer::PointToPoint(SendMode::Synchronous),
            Transfer::Ready => BandTransfer::PointToPoint(SendMode::Ready),
            Transfer::Buffered => BandTransfer::PointToPoint(SendMode::Buffered),
        }
    }
}

/// A failed run on one process. Under MPI every rank fails, but only the
/// origin prints the diagnostic.
struct Failure {
    error: GridError,
    report: bool,
}

impl Failure {
    fn on_rank(rank: usize, error: GridError) -> Self {
        Self {
            error,
            report: rank == ORIGIN,
        }
    }
}

impl From<GridError> for Failure {
    fn from(error: GridError) -> Self {
        Self {
            error,
            report: true,
        }
    }
}

impl From<std::io::Error> for Failure {
    fn from(e: std::io::Error) -> Self {
        GridError::from(e).into()
    }
}

/// Distributed dense matrix multiplication on a 2D process grid
#[derive(Debug, Parser)]
#[command(version)]
pub struct Cli {
    /// Matrix dimension N (operands are N x N)
    pub n: usize,

    /// Node count label echoed in the result line
    #[arg(default_value = "0")]
    pub nodes: String,

    /// Seed for operand generation (time-derived when absent)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Absolute tolerance for the element-wise check
    #[arg(long, default_value_t = DEFAULT_TOLERANCE)]
    pub tolerance: f64,

    /// Reject N that the grid dimensions do not divide
    #[arg(long)]
    pub strict: bool,

    /// Process count for the local backend
    #[arg(long, env = "GRIDMUL_PROCS", default_value_t = 4)]
    pub procs: usize,

    /// Communication backend
    #[arg(long, value_enum, default_value_t = Backend::default())]
    pub backend: Backend,

    /// How row bands are distributed (band only)
    #[arg(long, value_enum, default_value_t = Transfer::Collective)]
    pub transfer: Transfer,

    /// Print performance stats to stderr
    #[arg(long)]
    pub stats: bool,
}

impl Cli {
    pub fn run_config(&self, algorithm: Algorithm) -> RunConfig {
        let seed = self.seed.unwrap_or_else(time_seed);
        RunConfig {
            algorithm,
            n: self.n,
            nodes: self.nodes.clone(),
            seed,
            tolerance: self.tolerance,
            strict: self.strict,
            band_transfer: self.transfer.into(),
        }
    }
}

fn time_seed() -> u64 {
    let seed = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0);
    tracing::info!(seed, "no --seed given, using time-derived seed");
    seed
}

/// Entry point of every executable.
pub fn main(algorithm: Algorithm) {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    if let Err(failure) = execute(algorithm, &cli) {
        if failure.report {
            eprintln!("Error: {}", failure.error);
        }
        std::process::exit(1);
    }
}

fn execute(algorithm: Algorithm, cli: &Cli) -> std::result::Result<(), Failure> {
    let mut stats = if cli.stats { Some(Stats::new()) } else { None };
    let config = cli.run_config(algorithm);

    let report = match cli.backend {
        Backend::Local => run_local(cli.procs, |comm| engine::run(comm, &config))?
            .into_iter()
            .next()
            .flatten(),
        Backend::Mpi => {
            let (rank, result) = run_mpi(&config);
            result.map_err(|error| Failure::on_rank(rank, error))?
        }
    };

    // Only the origin holds a report.
    let Some(report) = report else {
        return Ok(());
    };
    let mut stdout = io::stdout();
    output::write_result_line(&report, &mut stdout)?;
    stdout.flush()?;

    if let Some(ref mut stats) = stats {
        fill_stats(stats, &report);
        stats.display();
    }
    Ok(())
}

fn fill_stats(stats: &mut Stats, report: &RunReport) {
    stats.algorithm = report.algorithm.to_string();
    stats.n = report.n;
    stats.processes = report.num_ranks;
    stats.grid = report.grid;
    stats.elapsed = report.elapsed;
    stats.max_abs_error = report.max_abs_error;
    stats.first_mismatch = report.first_mismatch;
    for &(name, duration) in &report.phases {
        stats.add_phase(name, duration);
    }
}

/// Run on the MPI world; returns this process's rank with the outcome.
#[cfg(feature = "distributed")]
fn run_mpi(config: &RunConfig) -> (usize, Result<Option<RunReport>>) {
    use crate::engine::comm::CommunicationBackend;
    use crate::engine::comm_mpi::MpiComm;
    use crate::engine::distribute::buffered_capacity;

    let Some(mut universe) = mpi::initialize() else {
        let error = GridError::Comm("MPI was already initialized".into());
        return (ORIGIN, Err(error));
    };
    let comm = MpiComm::new();
    let rank = comm.rank();
    if config.algorithm == Algorithm::Band
        && config.band_transfer == BandTransfer::PointToPoint(SendMode::Buffered)
    {
        match buffered_capacity(config.n, comm.num_ranks()) {
            Ok(bytes) => universe.set_buffer_size(bytes),
            Err(e) => return (rank, Err(e)),
        }
    }
    (rank, engine::run(&comm, config))
}

#[cfg(not(feature = "distributed"))]
fn run_mpi(_config: &RunConfig) -> (usize, Result<Option<RunReport>>) {
    let error = GridError::Config("the mpi backend needs a build with the `distributed` feature".into());
    (ORIGIN, Err(error))
}
