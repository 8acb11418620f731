//! SUMMA on a non-periodic r x c grid.
//!
//! Both operands and the result use the same block layout: rows split across
//! the r process rows, columns split across the c process columns. The inner
//! dimension is walked panel by panel; a panel is the intersection of one
//! A column block (owned by a process column) and one B row block (owned by a
//! process row). On a square grid the two partitions coincide and there is
//! exactly one panel per grid step.
//!
//! For every panel the owning column broadcasts its slice of A along each
//! process row, the owning row broadcasts its slice of B along each process
//! column, and every process accumulates the panel product.

use std::time::Instant;

use super::comm::CommunicationBackend;
use super::distribute::{self, TAG_A, TAG_B};
use super::partition::{common_panels, PartitionPlan};
use super::topology::ProcessGrid;
use super::{Multiplied, Operands};
use crate::error::Result;
use crate::kernel::multiply_accumulate;
use crate::matrix::DenseMatrix;

pub fn multiply(
    comm: &dyn CommunicationBackend,
    grid: &ProcessGrid,
    operands: Option<&Operands>,
    n: usize,
) -> Result<Multiplied> {
    let _span = tracing::debug_span!("summa", rank = comm.rank(), row = grid.row, col = grid.col)
        .entered();
    let row_plan = PartitionPlan::new(n, grid.rows)?;
    let col_plan = PartitionPlan::new(n, grid.cols)?;
    let local_rows = row_plan.extent(grid.row);
    let local_cols = col_plan.extent(grid.col);

    let phase = Instant::now();
    let a_global = operands.map(|o| &o.a);
    let b_global = operands.map(|o| &o.b);
    let a = distribute::scatter_blocks(comm, grid, a_global, &row_plan, &col_plan, TAG_A)?;
    let b = distribute::scatter_blocks(comm, grid, b_global, &row_plan, &col_plan, TAG_B)?;
    let mut c = DenseMatrix::zeros(local_rows, local_cols)?;
    let distribute_time = phase.elapsed();

    // Rank in the row scope is the column index and vice versa.
    let row_comm = comm.split(grid.row, grid.col)?;
    let col_comm = comm.split(grid.col, grid.row)?;
    let panels = common_panels(&col_plan, &row_plan);

    let mut a_panel = DenseMatrix::zeros(0, 0)?;
    let mut b_panel = DenseMatrix::zeros(0, 0)?;

    comm.barrier()?;
    let start = Instant::now();
    for (step, panel) in panels.iter().enumerate() {
        tracing::debug!(
            step,
            offset = panel.offset,
            width = panel.width,
            owner_col = panel.first_owner,
            owner_row = panel.second_owner,
            "summa step"
        );

        a_panel.reshape(local_rows, panel.width)?;
        if grid.col == panel.first_owner {
            a.copy_columns_into(panel.offset - col_plan.offset(grid.col), &mut a_panel);
        }
        row_comm.broadcast(panel.first_owner, &mut a_panel.values)?;

        b_panel.reshape(panel.width, local_cols)?;
        if grid.row == panel.second_owner {
            b.copy_rows_into(panel.offset - row_plan.offset(grid.row), &mut b_panel);
        }
        col_comm.broadcast(panel.second_owner, &mut b_panel.values)?;

        multiply_accumulate(&a_panel, &b_panel, &mut c);
    }
    let loop_time = start.elapsed();

    let phase = Instant::now();
    let product = distribute::gather_blocks(comm, grid, &c, &row_plan, &col_plan)?;
    let gather_time = phase.elapsed();

    Ok(Multiplied {
        product,
        loop_time,
        phases: vec![
            ("distribute", distribute_time),
            ("circulate", loop_time),
            ("gather", gather_time),
        ],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::comm::SingleProcessComm;
    use crate::engine::comm_local::run_local;
    use crate::engine::ORIGIN;
    use approx::assert_abs_diff_eq;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn operands(n: usize, seed: u64) -> Operands {
        let mut rng = StdRng::seed_from_u64(seed);
        let a = DenseMatrix::random(n, n, &mut rng).unwrap();
        let b = DenseMatrix::random(n, n, &mut rng).unwrap();
        Operands { a, b }
    }

    fn serial(ops: &Operands) -> DenseMatrix {
        let mut c = DenseMatrix::zeros(ops.a.nrows, ops.b.ncols).unwrap();
        multiply_accumulate(&ops.a, &ops.b, &mut c);
        c
    }

    fn run_grid(num_ranks: usize, ops: &Operands) -> DenseMatrix {
        let n = ops.a.nrows;
        let got = run_local(num_ranks, |comm| {
            let grid = ProcessGrid::balanced(comm.num_ranks(), comm.rank())?;
            let source = (comm.rank() == ORIGIN).then_some(ops);
            multiply(comm, &grid, source, n)
        })
        .unwrap();
        assert!(got[1..].iter().all(|m| m.product.is_none()));
        got.into_iter().next().unwrap().product.unwrap()
    }

    #[test]
    fn single_process_matches_serial_exactly() {
        let ops = operands(6, 1);
        let grid = ProcessGrid::balanced(1, 0).unwrap();
        let out = multiply(&SingleProcessComm, &grid, Some(&ops), 6).unwrap();
        assert_eq!(out.product.unwrap(), serial(&ops));
        assert_eq!(out.phases.len(), 3);
    }

    #[test]
    fn square_grid_uneven_blocks() {
        let ops = operands(10, 2);
        let got = run_grid(4, &ops);
        for (x, y) in got.values.iter().zip(&serial(&ops).values) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    /// 2x3 grid: column blocks of A [4, 3, 3] and row blocks of B [5, 5]
    /// produce panels at 0, 4, 5 and 7.
    #[test]
    fn rectangular_grid_walks_common_panels() {
        let ops = operands(10, 3);
        let got = run_grid(6, &ops);
        for (x, y) in got.values.iter().zip(&serial(&ops).values) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }

    #[test]
    fn more_processes_than_rows() {
        let ops = operands(2, 4);
        let got = run_grid(6, &ops);
        for (x, y) in got.values.iter().zip(&serial(&ops).values) {
            assert_abs_diff_eq!(*x, *y, epsilon = 1e-12);
        }
    }
}
