//! Moving operands from the origin to the grid and results back.
//!
//! Row bands of a row-major matrix are contiguous and travel with one
//! variable-count collective. 2D blocks are strided, so the origin packs
//! each block stripe by stripe into a contiguous buffer and sends it
//! point-to-point; gathering unpacks the same way.
//!
//! The row-banded method can instead move every band and B with individual
//! messages in any of the four send modes, to compare their cost.

use super::comm::{CommunicationBackend, SendMode, Tag};
use super::partition::PartitionPlan;
use super::topology::ProcessGrid;
use super::ORIGIN;
use crate::error::{GridError, Result};
use crate::matrix::{DenseMatrix, LocalBlock};

pub const TAG_A: Tag = 0;
pub const TAG_B: Tag = 1;
pub const TAG_C: Tag = 2;

/// Per-message allowance for the MPI buffered-send envelope.
const BSEND_OVERHEAD: usize = 512;

/// How the origin hands out row bands and B.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BandTransfer {
    /// Variable-count scatter / gather and a broadcast of B.
    #[default]
    Collective,
    /// One message per band and per copy of B, sent in the given mode.
    PointToPoint(SendMode),
}

/// Bytes one process may have in flight as buffered sends during a
/// point-to-point band run: the origin sends every band of A plus B to each
/// other rank, the others send their band of C.
pub fn buffered_capacity(n: usize, num_ranks: usize) -> Result<usize> {
    let messages = num_ranks.saturating_mul(2);
    n.checked_mul(n)
        .and_then(|matrix| matrix.checked_mul(num_ranks))
        .and_then(|values| values.checked_mul(std::mem::size_of::<f64>()))
        .and_then(|bytes| bytes.checked_add(messages.checked_mul(BSEND_OVERHEAD)?))
        .ok_or(GridError::Allocation {
            elements: usize::MAX,
        })
}

fn origin_matrix<'a>(
    comm: &dyn CommunicationBackend,
    matrix: Option<&'a DenseMatrix>,
) -> Result<Option<&'a DenseMatrix>> {
    match (comm.rank() == ORIGIN, matrix) {
        (true, None) => Err(GridError::Config(
            "origin process has no global matrix to distribute".into(),
        )),
        (true, Some(m)) => Ok(Some(m)),
        (false, _) => Ok(None),
    }
}

/// Scatter the row bands of an `n x n` matrix according to `rows`.
pub fn scatter_rows(
    comm: &dyn CommunicationBackend,
    matrix: Option<&DenseMatrix>,
    rows: &PartitionPlan,
    transfer: BandTransfer,
) -> Result<LocalBlock> {
    let n = rows.n;
    let rank = comm.rank();
    let mut local = DenseMatrix::zeros(rows.extent(rank), n)?;
    let matrix = origin_matrix(comm, matrix)?;

    match transfer {
        BandTransfer::Collective => {
            let counts: Vec<usize> = rows.extents.iter().map(|&e| e * n).collect();
            let send = matrix.map(|m| m.values.as_slice()).unwrap_or(&[]);
            comm.scatter_varcount(ORIGIN, send, &counts, &mut local.values)?;
        }
        BandTransfer::PointToPoint(mode) => match matrix {
            Some(m) => {
                for dest in 0..comm.num_ranks() {
                    let band = &m.values[rows.offset(dest) * n..rows.range(dest).end * n];
                    if dest == ORIGIN {
                        local.values.copy_from_slice(band);
                    } else {
                        comm.send_with_mode(dest, TAG_A, band, mode)?;
                    }
                }
            }
            None => comm.receive_with_mode(ORIGIN, TAG_A, &mut local.values, mode)?,
        },
    }
    Ok(local)
}

/// Gather row bands back into an `n x n` matrix on the origin.
pub fn gather_rows(
    comm: &dyn CommunicationBackend,
    local: &LocalBlock,
    rows: &PartitionPlan,
    transfer: BandTransfer,
) -> Result<Option<DenseMatrix>> {
    let n = rows.n;
    let mut result = if comm.rank() == ORIGIN {
        Some(DenseMatrix::zeros(n, n)?)
    } else {
        None
    };

    match transfer {
        BandTransfer::Collective => {
            let counts: Vec<usize> = rows.extents.iter().map(|&e| e * n).collect();
            let mut empty: [f64; 0] = [];
            let recv = match result.as_mut() {
                Some(m) => m.values.as_mut_slice(),
                None => &mut empty[..],
            };
            comm.gather_varcount(ORIGIN, &local.values, &counts, recv)?;
        }
        BandTransfer::PointToPoint(mode) => match result.as_mut() {
            Some(m) => {
                for source in 0..comm.num_ranks() {
                    let band = &mut m.values[rows.offset(source) * n..rows.range(source).end * n];
                    if source == ORIGIN {
                        band.copy_from_slice(&local.values);
                    } else {
                        comm.receive_with_mode(source, TAG_C, band, mode)?;
                    }
                }
            }
            None => comm.send_with_mode(ORIGIN, TAG_C, &local.values, mode)?,
        },
    }
    Ok(result)
}

/// Give every process a copy of a whole `n x n` matrix held by the origin.
pub fn broadcast_matrix(
    comm: &dyn CommunicationBackend,
    matrix: Option<&DenseMatrix>,
    n: usize,
    transfer: BandTransfer,
) -> Result<DenseMatrix> {
    let origin = origin_matrix(comm, matrix)?;
    let mut full = match origin {
        Some(m) => m.clone(),
        None => DenseMatrix::zeros(n, n)?,
    };
    match transfer {
        BandTransfer::Collective => comm.broadcast(ORIGIN, &mut full.values)?,
        BandTransfer::PointToPoint(mode) if origin.is_some() => {
            for dest in (0..comm.num_ranks()).filter(|&r| r != ORIGIN) {
                comm.send_with_mode(dest, TAG_B, &full.values, mode)?;
            }
        }
        BandTransfer::PointToPoint(mode) => {
            comm.receive_with_mode(ORIGIN, TAG_B, &mut full.values, mode)?
        }
    }
    Ok(full)
}

/// Send each grid coordinate its 2D block of `matrix`.
///
/// Block (i, j) covers rows `rows.range(i)` and columns `cols.range(j)`.
pub fn scatter_blocks(
    comm: &dyn CommunicationBackend,
    grid: &ProcessGrid,
    matrix: Option<&DenseMatrix>,
    rows: &PartitionPlan,
    cols: &PartitionPlan,
    tag: Tag,
) -> Result<LocalBlock> {
    match origin_matrix(comm, matrix)? {
        Some(m) => {
            for dest in (0..grid.size()).filter(|&r| r != ORIGIN) {
                let (i, j) = grid.coords_of(dest);
                let packed =
                    m.extract_block(rows.offset(i), rows.extent(i), cols.offset(j), cols.extent(j))?;
                comm.send(dest, tag, &packed.values)?;
            }
            let (i, j) = grid.coords_of(ORIGIN);
            m.extract_block(rows.offset(i), rows.extent(i), cols.offset(j), cols.extent(j))
        }
        None => {
            let mut block = DenseMatrix::zeros(rows.extent(grid.row), cols.extent(grid.col))?;
            comm.receive_into(ORIGIN, tag, &mut block.values)?;
            Ok(block)
        }
    }
}

/// Collect every coordinate's block into an `n x n` matrix on the origin.
pub fn gather_blocks(
    comm: &dyn CommunicationBackend,
    grid: &ProcessGrid,
    local: &LocalBlock,
    rows: &PartitionPlan,
    cols: &PartitionPlan,
) -> Result<Option<DenseMatrix>> {
    if comm.rank() != ORIGIN {
        comm.send(ORIGIN, TAG_C, &local.values)?;
        return Ok(None);
    }

    let mut result = DenseMatrix::zeros(rows.n, cols.n)?;
    for source in 0..grid.size() {
        let (i, j) = grid.coords_of(source);
        if source == ORIGIN {
            result.insert_block(rows.offset(i), cols.offset(j), local);
        } else {
            let mut block = DenseMatrix::zeros(rows.extent(i), cols.extent(j))?;
            comm.receive_into(source, TAG_C, &mut block.values)?;
            result.insert_block(rows.offset(i), cols.offset(j), &block);
        }
    }
    Ok(Some(result))
}
