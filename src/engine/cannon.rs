//! Cannon's algorithm on a periodic q x q torus.
//!
//! After the initial skew (A left by its row index, B up by its column
//! index) coordinate (i, j) holds A(i, k) and B(k, j) with k = (i + j) mod q.
//! Each step multiplies the pair and rotates A one position left and B one
//! position up, so step s works on k = (i + j + s) mod q.
//!
//! Block extents follow the partition of k, which changes as blocks rotate
//! when N is not a multiple of q; the receive buffer is reshaped to the
//! incoming block before every exchange.

use std::time::Instant;

use super::comm::{CommunicationBackend, Tag};
use super::distribute::{self, TAG_A, TAG_B};
use super::partition::PartitionPlan;
use super::topology::{Axis, ProcessGrid};
use super::{Multiplied, Operands};
use crate::error::{GridError, Result};
use crate::kernel::multiply_accumulate;
use crate::matrix::{DenseMatrix, LocalBlock};

/// Send `block` to `dest` while receiving a `rows x cols` block from
/// `source`, then swap so `block` holds the received data. `spare` is the
/// exchange buffer and keeps the outgoing data until the next call.
fn exchange(
    comm: &dyn CommunicationBackend,
    block: &mut LocalBlock,
    spare: &mut LocalBlock,
    (source, dest): (usize, usize),
    (rows, cols): (usize, usize),
    tag: Tag,
) -> Result<()> {
    spare.reshape(rows, cols)?;
    comm.send_receive(&block.values, dest, &mut spare.values, source, tag)?;
    std::mem::swap(block, spare);
    Ok(())
}

/// `(source, dest)` of a ring move; both ends exist only on a torus.
fn ring(ends: (Option<usize>, Option<usize>)) -> Result<(usize, usize)> {
    match ends {
        (Some(source), Some(dest)) => Ok((source, dest)),
        _ => Err(GridError::InvalidTopology(
            "Cannon's algorithm needs a periodic grid".into(),
        )),
    }
}

pub fn multiply(
    comm: &dyn CommunicationBackend,
    grid: &ProcessGrid,
    operands: Option<&Operands>,
    n: usize,
) -> Result<Multiplied> {
    let _span = tracing::debug_span!("cannon", rank = comm.rank(), row = grid.row, col = grid.col)
        .entered();
    if grid.rows != grid.cols {
        return Err(GridError::InvalidTopology(format!(
            "Cannon's algorithm needs a square grid, got {}x{}",
            grid.rows, grid.cols
        )));
    }
    let q = grid.rows;
    let plan = PartitionPlan::new(n, q)?;
    let (i, j) = (grid.row, grid.col);

    let phase = Instant::now();
    let a_global = operands.map(|o| &o.a);
    let b_global = operands.map(|o| &o.b);
    let mut a = distribute::scatter_blocks(comm, grid, a_global, &plan, &plan, TAG_A)?;
    let mut b = distribute::scatter_blocks(comm, grid, b_global, &plan, &plan, TAG_B)?;
    let mut c = DenseMatrix::zeros(plan.extent(i), plan.extent(j))?;
    let mut a_spare = DenseMatrix::zeros(0, 0)?;
    let mut b_spare = DenseMatrix::zeros(0, 0)?;
    let distribute_time = phase.elapsed();

    // A moves left, so it arrives from the right; B moves up, from below.
    let left_ring = ring((grid.right(), grid.left()))?;
    let up_ring = ring((grid.down(), grid.up()))?;

    comm.barrier()?;
    let start = Instant::now();

    let k0 = (i + j) % q;
    if i != 0 {
        let pair = ring(grid.shift(Axis::Col, -(i as isize)))?;
        let shape = (plan.extent(i), plan.extent(k0));
        exchange(comm, &mut a, &mut a_spare, pair, shape, TAG_A)?;
    }
    if j != 0 {
        let pair = ring(grid.shift(Axis::Row, -(j as isize)))?;
        let shape = (plan.extent(k0), plan.extent(j));
        exchange(comm, &mut b, &mut b_spare, pair, shape, TAG_B)?;
    }

    for step in 0..q {
        let k = (i + j + step) % q;
        tracing::debug!(step, k, "cannon step");
        multiply_accumulate(&a, &b, &mut c);

        if step + 1 < q {
            let next = (k + 1) % q;
            let a_shape = (plan.extent(i), plan.extent(next));
            exchange(comm, &mut a, &mut a_spare, left_ring, a_shape, TAG_A)?;
            let b_shape = (plan.extent(next), plan.extent(j));
            exchange(comm, &mut b, &mut b_spare, up_ring, b_shape, TAG_B)?;
        }
    }
    let loop_time = start.elapsed();

    let phase = Instant::now();
    let product = distribute::gather_blocks(comm, grid, &c, &plan, &plan)?;
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
    use crate::engine::comm_local::run_local;

    /// Track which global k-block each coordinate holds at every step by
    /// circulating block labels instead of data.
    #[test]
    fn skew_aligns_matching_inner_blocks() {
        let q = 3;
        let got = run_local(q * q, |comm| {
            let grid = ProcessGrid::torus(comm.num_ranks(), comm.rank())?;
            let (i, j) = (grid.row, grid.col);
            // Label A(i, j) by its column block and B(i, j) by its row block.
            let mut a = DenseMatrix::from_vec(1, 1, vec![j as f64])?;
            let mut b = DenseMatrix::from_vec(1, 1, vec![i as f64])?;
            let mut spare = DenseMatrix::zeros(1, 1)?;

            if i != 0 {
                let pair = ring(grid.shift(Axis::Col, -(i as isize)))?;
                exchange(comm, &mut a, &mut spare, pair, (1, 1), TAG_A)?;
            }
            if j != 0 {
                let pair = ring(grid.shift(Axis::Row, -(j as isize)))?;
                exchange(comm, &mut b, &mut spare, pair, (1, 1), TAG_B)?;
            }
            let left = ring((grid.right(), grid.left()))?;
            let up = ring((grid.down(), grid.up()))?;
            let mut seen = Vec::new();
            for step in 0..q {
                seen.push((a.values[0] as usize, b.values[0] as usize, (i + j + step) % q));
                exchange(comm, &mut a, &mut spare, left, (1, 1), TAG_A)?;
                exchange(comm, &mut b, &mut spare, up, (1, 1), TAG_B)?;
            }
            Ok(seen)
        })
        .unwrap();

        for seen in got {
            for (a_k, b_k, expected_k) in seen {
                assert_eq!(a_k, expected_k);
                assert_eq!(b_k, expected_k);
            }
        }
    }

    #[test]
    fn step_rings_match_unit_shifts() {
        for rank in 0..9 {
            let grid = ProcessGrid::torus(9, rank).unwrap();
            let left = ring((grid.right(), grid.left())).unwrap();
            let up = ring((grid.down(), grid.up())).unwrap();
            assert_eq!(Some(left), ring(grid.shift(Axis::Col, -1)).ok());
            assert_eq!(Some(up), ring(grid.shift(Axis::Row, -1)).ok());
        }
        let open = ProcessGrid::balanced(4, 0).unwrap();
        assert!(ring((open.right(), open.left())).is_err());
    }

    #[test]
    fn rejects_rectangular_grid() {
        let grid = ProcessGrid::balanced(2, 0).unwrap();
        let comm = crate::engine::comm::SingleProcessComm;
        assert!(matches!(
            multiply(&comm, &grid, None, 4),
            Err(GridError::InvalidTopology(_))
        ));
    }
}
