//! Row-banded multiply on a degenerate 1 x P grid.
//!
//! A is cut into row bands, B is copied whole to every process, each process multiplies
//! its band once at full depth and the bands are gathered back. There is no
//! circulation loop.

use std::time::Instant;

use super::comm::CommunicationBackend;
use super::distribute::{self, BandTransfer};
use super::partition::PartitionPlan;
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
    transfer: BandTransfer,
) -> Result<Multiplied> {
    let _span = tracing::debug_span!("band", rank = comm.rank()).entered();
    let rows = PartitionPlan::new(n, grid.cols)?;

    let phase = Instant::now();
    let a_band = distribute::scatter_rows(comm, operands.map(|o| &o.a), &rows, transfer)?;
    let b = distribute::broadcast_matrix(comm, operands.map(|o| &o.b), n, transfer)?;
    let mut c_band = DenseMatrix::zeros(a_band.nrows, n)?;
    let distribute_time = phase.elapsed();
    tracing::debug!(
        offset = rows.offset(grid.col),
        rows = a_band.nrows,
        "row band received"
    );

    comm.barrier()?;
    let start = Instant::now();
    multiply_accumulate(&a_band, &b, &mut c_band);
    let loop_time = start.elapsed();

    let phase = Instant::now();
    let product = distribute::gather_rows(comm, &c_band, &rows, transfer)?;
    let gather_time = phase.elapsed();

    Ok(Multiplied {
        product,
        loop_time,
        phases: vec![
            ("distribute", distribute_time),
            ("multiply", loop_time),
            ("gather", gather_time),
        ],
    })
}
