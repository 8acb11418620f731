//! End-to-end runs of all three algorithms on the local thread backend.

use approx::assert_abs_diff_eq;
use gridmul::engine::comm::{CommunicationBackend, SendMode, SingleProcessComm};
use gridmul::engine::comm_local::run_local;
use gridmul::engine::distribute::BandTransfer;
use gridmul::engine::topology::ProcessGrid;
use gridmul::engine::{self, cannon, summa, Algorithm, Operands, RunConfig, RunReport, ORIGIN};
use gridmul::error::GridError;
use gridmul::matrix::DenseMatrix;
use gridmul::output;
use gridmul::verify::reference_product;
use rand::rngs::StdRng;
use rand::SeedableRng;

/// Helper: run a full engine pass on `procs` local workers, return the
/// origin's report.
fn run(procs: usize, config: &RunConfig) -> gridmul::error::Result<RunReport> {
    let reports = run_local(procs, |comm| engine::run(comm, config))?;
    assert!(reports[1..].iter().all(Option::is_none));
    Ok(reports.into_iter().next().flatten().expect("origin report"))
}

fn operands(n: usize, seed: u64) -> Operands {
    let mut rng = StdRng::seed_from_u64(seed);
    let a = DenseMatrix::random(n, n, &mut rng).unwrap();
    let b = DenseMatrix::random(n, n, &mut rng).unwrap();
    Operands { a, b }
}

/// Helper: gathered product of one algorithm on `procs` workers.
fn product(algorithm: Algorithm, procs: usize, ops: &Operands) -> DenseMatrix {
    let n = ops.a.nrows;
    let out = run_local(procs, |comm| {
        let grid = engine::build_grid(algorithm, comm.num_ranks(), comm.rank())?;
        let source = (comm.rank() == ORIGIN).then_some(ops);
        match algorithm {
            Algorithm::Cannon => cannon::multiply(comm, &grid, source, n),
            Algorithm::Summa => summa::multiply(comm, &grid, source, n),
            Algorithm::Band => {
                engine::band::multiply(comm, &grid, source, n, BandTransfer::Collective)
            }
        }
    })
    .unwrap();
    out.into_iter().next().unwrap().product.unwrap()
}

#[test]
fn cannon_small_grid_matches_reference() {
    let ops = operands(4, 17);
    let expected = reference_product(&ops.a, &ops.b).unwrap();
    let got = product(Algorithm::Cannon, 4, &ops);
    for (x, y) in got.values.iter().zip(&expected.values) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
    }
}

#[test]
fn cannon_256_on_four_processes() {
    let config = RunConfig::new(Algorithm::Cannon, 256, 2024);
    let report = run(4, &config).unwrap();
    assert!(report.check_equal, "max error {}", report.max_abs_error);
    assert!(report.elapsed > 0.0);
    assert_eq!(report.grid, (2, 2));
}

#[test]
fn cannon_uneven_blocks_on_nine_processes() {
    let config = RunConfig::new(Algorithm::Cannon, 11, 5);
    let report = run(9, &config).unwrap();
    assert!(report.check_equal);
}

#[test]
fn summa_100_on_three_processes() {
    let config = RunConfig::new(Algorithm::Summa, 100, 7);
    let report = run(3, &config).unwrap();
    assert_eq!(report.grid, (1, 3));
    assert!(report.check_equal);
}

#[test]
fn summa_rectangular_grid() {
    let config = RunConfig::new(Algorithm::Summa, 17, 8);
    let report = run(6, &config).unwrap();
    assert_eq!(report.grid, (2, 3));
    assert!(report.check_equal);
}

#[test]
fn summa_and_cannon_agree() {
    let ops = operands(24, 99);
    let c = product(Algorithm::Cannon, 9, &ops);
    let s = product(Algorithm::Summa, 9, &ops);
    for (x, y) in c.values.iter().zip(&s.values) {
        assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
    }
}

#[test]
fn band_every_transfer_mode() {
    for transfer in [
        BandTransfer::Collective,
        BandTransfer::PointToPoint(SendMode::Standard),
        BandTransfer::PointToPoint(SendMode::Synchronous),
        BandTransfer::PointToPoint(SendMode::Ready),
        BandTransfer::PointToPoint(SendMode::Buffered),
    ] {
        let mut config = RunConfig::new(Algorithm::Band, 50, 3);
        config.band_transfer = transfer;
        let report = run(4, &config).unwrap();
        assert_eq!(report.grid, (1, 4));
        assert!(report.check_equal, "{transfer:?}");
    }
}

#[test]
fn single_process_is_exact() {
    let ops = operands(9, 1);
    let expected = reference_product(&ops.a, &ops.b).unwrap();
    for algorithm in [Algorithm::Band, Algorithm::Cannon, Algorithm::Summa] {
        assert_eq!(product(algorithm, 1, &ops), expected, "{algorithm}");
        let report = engine::run(&SingleProcessComm, &RunConfig::new(algorithm, 9, 1))
            .unwrap()
            .unwrap();
        assert_eq!(report.max_abs_error, 0.0);
    }
}

#[test]
fn more_processes_than_rows() {
    for (algorithm, procs) in [
        (Algorithm::Band, 5),
        (Algorithm::Summa, 6),
        (Algorithm::Cannon, 9),
    ] {
        let report = run(procs, &RunConfig::new(algorithm, 2, 11)).unwrap();
        assert!(report.check_equal, "{algorithm}");
    }
}

#[test]
fn cannon_rejects_non_square_process_count() {
    let config = RunConfig::new(Algorithm::Cannon, 8, 1);
    match run(6, &config) {
        Err(GridError::InvalidTopology(msg)) => assert!(msg.contains("perfect square")),
        other => panic!("expected topology error, got {other:?}"),
    }
}

#[test]
fn oversized_matrix_fails_instead_of_passing() {
    // N^2 overflows usize
    let config = RunConfig::new(Algorithm::Summa, 1 << 33, 1);
    assert!(matches!(run(1, &config), Err(GridError::InvalidSize(_))));
    // N^2 fits but cannot be allocated
    let config = RunConfig::new(Algorithm::Band, 1 << 29, 1);
    assert!(matches!(run(2, &config), Err(GridError::Allocation { .. })));
}

#[test]
fn strict_mode_rejects_indivisible_size() {
    let mut config = RunConfig::new(Algorithm::Cannon, 10, 1);
    config.strict = true;
    assert!(matches!(
        run(9, &config),
        Err(GridError::IndivisibleSize { n: 10, rows: 3, cols: 3 })
    ));
    config.n = 9;
    assert!(run(9, &config).unwrap().check_equal);
}

#[test]
fn same_seed_same_result_line_fields() {
    let config = RunConfig {
        nodes: "2".into(),
        ..RunConfig::new(Algorithm::Summa, 12, 42)
    };
    let report = run(4, &config).unwrap();
    let mut out = Vec::new();
    output::write_result_line(&report, &mut out).unwrap();
    let line = String::from_utf8(out).unwrap();
    let fields: Vec<&str> = line.trim_end().split(',').collect();
    assert_eq!(&fields[..3], &["12", "4", "2"]);
    assert_eq!(fields[3].split('.').nth(1).map(str::len), Some(6));
    assert_eq!(fields[4], "check_equal=YES");
}
