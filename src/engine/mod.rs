//! Distributed multiplication engine.
//!
//! [`run`] is executed by every process of a communicator. The origin
//! generates both operands, the selected algorithm moves blocks over the
//! [`CommunicationBackend`], and the origin verifies the gathered product
//! against a sequential reference.

pub mod band;
pub mod cannon;
pub mod comm;
pub mod comm_local;
#[cfg(feature = "distributed")]
pub mod comm_mpi;
pub mod distribute;
pub mod partition;
pub mod summa;
pub mod topology;

use std::fmt;
use std::time::{Duration, Instant};

use rand::rngs::StdRng;
use rand::SeedableRng;

use crate::error::{GridError, Result};
use crate::matrix::DenseMatrix;
use crate::verify;
use comm::CommunicationBackend;
use distribute::BandTransfer;
use topology::ProcessGrid;

/// Rank that owns the global matrices.
pub const ORIGIN: usize = 0;

/// Default absolute tolerance for the element-wise check.
pub const DEFAULT_TOLERANCE: f64 = 1e-12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Algorithm {
    /// Row bands of A, B broadcast whole.
    Band,
    /// Skewed block circulation on a periodic square grid.
    Cannon,
    /// Row/column panel broadcasts on a near-square grid.
    Summa,
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Algorithm::Band => "Band",
            Algorithm::Cannon => "Cannon",
            Algorithm::Summa => "SUMMA",
        })
    }
}

/// Global operands, present on the origin only.
#[derive(Debug, Clone)]
pub struct Operands {
    pub a: DenseMatrix,
    pub b: DenseMatrix,
}

/// What one process gets back from an algorithm.
#[derive(Debug)]
pub struct Multiplied {
    /// Full product, `Some` on the origin only.
    pub product: Option<DenseMatrix>,
    /// Local time spent in the circulation loop.
    pub loop_time: Duration,
    pub phases: Vec<(&'static str, Duration)>,
}

/// Everything a run needs, resolved from the command line.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub algorithm: Algorithm,
    pub n: usize,
    /// Free-form label echoed in the result line.
    pub nodes: String,
    pub seed: u64,
    pub tolerance: f64,
    /// Reject N that the grid dimensions do not divide.
    pub strict: bool,
    pub band_transfer: BandTransfer,
}

impl RunConfig {
    pub fn new(algorithm: Algorithm, n: usize, seed: u64) -> Self {
        Self {
            algorithm,
            n,
            nodes: "0".to_string(),
            seed,
            tolerance: DEFAULT_TOLERANCE,
            strict: false,
            band_transfer: BandTransfer::default(),
        }
    }
}

/// Outcome of a run, produced on the origin.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub algorithm: Algorithm,
    pub n: usize,
    pub num_ranks: usize,
    pub nodes: String,
    pub grid: (usize, usize),
    /// Slowest process's loop time in seconds.
    pub elapsed: f64,
    pub check_equal: bool,
    pub max_abs_error: f64,
    /// First element outside the tolerance, if any.
    pub first_mismatch: Option<(usize, usize)>,
    pub phases: Vec<(&'static str, Duration)>,
}

/// Build this process's view of the grid the algorithm runs on.
pub fn build_grid(algorithm: Algorithm, num_ranks: usize, rank: usize) -> Result<ProcessGrid> {
    match algorithm {
        Algorithm::Band => ProcessGrid::band(num_ranks, rank),
        Algorithm::Cannon => ProcessGrid::torus(num_ranks, rank),
        Algorithm::Summa => ProcessGrid::balanced(num_ranks, rank),
    }
}

fn check_size(n: usize, grid: &ProcessGrid, strict: bool) -> Result<()> {
    if n == 0 {
        return Err(GridError::InvalidSize("matrix size must be positive".into()));
    }
    let bytes = n
        .checked_mul(n)
        .and_then(|elements| elements.checked_mul(std::mem::size_of::<f64>()));
    if bytes.is_none() {
        return Err(GridError::InvalidSize(format!(
            "a {n}x{n} matrix does not fit in the address space"
        )));
    }
    if strict && (n % grid.rows != 0 || n % grid.cols != 0) {
        return Err(GridError::IndivisibleSize {
            n,
            rows: grid.rows,
            cols: grid.cols,
        });
    }
    Ok(())
}

/// Run one distributed multiplication. Every process of `comm` must call
/// this with the same `config`; the report is returned on the origin only.
pub fn run(comm: &dyn CommunicationBackend, config: &RunConfig) -> Result<Option<RunReport>> {
    let rank = comm.rank();
    let num_ranks = comm.num_ranks();
    let n = config.n;
    let _span = tracing::info_span!("run", algorithm = %config.algorithm, n, rank).entered();

    // Every process sees the same grid and size, so they all fail together
    // here without exchanging a message.
    let grid = build_grid(config.algorithm, num_ranks, rank)?;
    check_size(n, &grid, config.strict)?;

    let mut phases = Vec::new();
    let operands = if rank == ORIGIN {
        tracing::info!(
            "{}: {n}x{n}, {num_ranks} processes ({}x{} grid), seed {}",
            config.algorithm,
            grid.rows,
            grid.cols,
            config.seed
        );
        let start = Instant::now();
        let mut rng = StdRng::seed_from_u64(config.seed);
        let a = DenseMatrix::random(n, n, &mut rng)?;
        let b = DenseMatrix::random(n, n, &mut rng)?;
        phases.push(("generate", start.elapsed()));
        Some(Operands { a, b })
    } else {
        None
    };

    let multiplied = match config.algorithm {
        Algorithm::Band => band::multiply(comm, &grid, operands.as_ref(), n, config.band_transfer)?,
        Algorithm::Cannon => cannon::multiply(comm, &grid, operands.as_ref(), n)?,
        Algorithm::Summa => summa::multiply(comm, &grid, operands.as_ref(), n)?,
    };
    phases.extend(multiplied.phases.iter().copied());

    let elapsed = comm.all_reduce_max(multiplied.loop_time.as_secs_f64())?;
    tracing::debug!(local = multiplied.loop_time.as_secs_f64(), elapsed, "loop time");

    let (Some(operands), Some(product)) = (operands, multiplied.product) else {
        return Ok(None);
    };

    let start = Instant::now();
    let expected = verify::reference_product(&operands.a, &operands.b)?;
    let verification = verify::compare(&expected, &product, config.tolerance);
    phases.push(("verify", start.elapsed()));

    Ok(Some(RunReport {
        algorithm: config.algorithm,
        n,
        num_ranks,
        nodes: config.nodes.clone(),
        grid: (grid.rows, grid.cols),
        elapsed,
        check_equal: verification.equal,
        max_abs_error: verification.max_abs_diff,
        first_mismatch: verification.first_mismatch,
        phases,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use comm::SingleProcessComm;

    #[test]
    fn single_process_runs_every_algorithm() {
        for algorithm in [Algorithm::Band, Algorithm::Cannon, Algorithm::Summa] {
            let config = RunConfig::new(algorithm, 5, 42);
            let report = run(&SingleProcessComm, &config).unwrap().unwrap();
            assert!(report.check_equal, "{algorithm} failed");
            assert_eq!(report.max_abs_error, 0.0);
            assert_eq!(report.first_mismatch, None);
            assert_eq!(report.grid, (1, 1));
            let names: Vec<_> = report.phases.iter().map(|(name, _)| *name).collect();
            assert_eq!(names.first(), Some(&"generate"));
            assert_eq!(names.last(), Some(&"verify"));
        }
    }

    #[test]
    fn zero_size_is_rejected() {
        let config = RunConfig::new(Algorithm::Summa, 0, 1);
        assert!(matches!(
            run(&SingleProcessComm, &config),
            Err(GridError::InvalidSize(_))
        ));
    }

    #[test]
    fn overflowing_size_is_rejected() {
        let config = RunConfig::new(Algorithm::Summa, 1 << 33, 1);
        assert!(matches!(
            run(&SingleProcessComm, &config),
            Err(GridError::InvalidSize(_))
        ));
        let grid = ProcessGrid::band(1, 0).unwrap();
        assert!(check_size(usize::MAX, &grid, false).is_err());
    }

    #[test]
    fn unallocatable_size_is_reported() {
        // N^2 fits in usize but the operands cannot be allocated.
        let config = RunConfig::new(Algorithm::Band, 1 << 29, 1);
        assert!(matches!(
            run(&SingleProcessComm, &config),
            Err(GridError::Allocation { .. })
        ));
    }

    #[test]
    fn strict_rejects_indivisible_size() {
        let grid = ProcessGrid::balanced(6, 0).unwrap();
        assert!(check_size(7, &grid, false).is_ok());
        assert!(check_size(12, &grid, true).is_ok());
        assert!(matches!(
            check_size(8, &grid, true),
            Err(GridError::IndivisibleSize { n: 8, rows: 2, cols: 3 })
        ));
    }

    #[test]
    fn grid_shape_follows_algorithm() {
        assert_eq!(build_grid(Algorithm::Band, 4, 0).unwrap().cols, 4);
        assert_eq!(build_grid(Algorithm::Summa, 6, 0).unwrap().rows, 2);
        assert!(build_grid(Algorithm::Cannon, 6, 0).is_err());
    }
}
