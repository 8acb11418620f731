//! Virtual 2D process grid.
//!
//! Ranks are laid out row-major (rank = row * cols + col). The grid is built
//! once per run and handed to every stage that needs coordinates or
//! neighbors.

use crate::error::{GridError, Result};

/// Grid axis, numbered like a Cartesian communicator: 0 = rows, 1 = columns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    /// Moves along a column, between process rows (up/down).
    Row,
    /// Moves along a row, between process columns (left/right).
    Col,
}

/// Most square factorization `rows x cols = p` with `rows <= cols`.
pub fn balanced_dims(p: usize) -> Result<(usize, usize)> {
    if p == 0 {
        return Err(GridError::InvalidTopology("process count must be positive".into()));
    }
    let mut rows = floor_sqrt(p);
    while p % rows != 0 {
        rows -= 1;
    }
    Ok((rows, p / rows))
}

/// Square grid side for Cannon's algorithm.
pub fn square_dims(p: usize) -> Result<usize> {
    exact_sqrt(p).filter(|&q| q > 0).ok_or_else(|| {
        GridError::InvalidTopology(format!(
            "number of processes must be a perfect square (1, 4, 9, 16...), got {p}"
        ))
    })
}

fn floor_sqrt(p: usize) -> usize {
    let mut r = (p as f64).sqrt() as usize;
    while r * r > p {
        r -= 1;
    }
    while (r + 1) * (r + 1) <= p {
        r += 1;
    }
    r
}

fn exact_sqrt(p: usize) -> Option<usize> {
    let r = floor_sqrt(p);
    (r * r == p).then_some(r)
}

/// Immutable description of the grid as seen from one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessGrid {
    pub rows: usize,
    pub cols: usize,
    pub rank: usize,
    pub row: usize,
    pub col: usize,
    /// Wraparound on [row axis, column axis].
    pub periodic: [bool; 2],
}

impl ProcessGrid {
    pub fn new(rows: usize, cols: usize, rank: usize, periodic: [bool; 2]) -> Result<Self> {
        if rows == 0 || cols == 0 {
            return Err(GridError::InvalidTopology(format!(
                "grid {rows}x{cols} has no processes"
            )));
        }
        if rank >= rows * cols {
            return Err(GridError::InvalidTopology(format!(
                "rank {rank} does not fit a {rows}x{cols} grid"
            )));
        }
        Ok(Self {
            rows,
            cols,
            rank,
            row: rank / cols,
            col: rank % cols,
            periodic,
        })
    }

    /// Periodic q x q torus for Cannon's algorithm.
    pub fn torus(num_ranks: usize, rank: usize) -> Result<Self> {
        let q = square_dims(num_ranks)?;
        Self::new(q, q, rank, [true, true])
    }

    /// Non-periodic near-square grid for SUMMA.
    pub fn balanced(num_ranks: usize, rank: usize) -> Result<Self> {
        let (rows, cols) = balanced_dims(num_ranks)?;
        Self::new(rows, cols, rank, [false, false])
    }

    /// Degenerate 1 x P grid for the row-banded method.
    pub fn band(num_ranks: usize, rank: usize) -> Result<Self> {
        Self::new(1, num_ranks, rank, [false, false])
    }

    pub fn size(&self) -> usize {
        self.rows * self.cols
    }

    pub fn rank_of(&self, row: usize, col: usize) -> usize {
        assert!(row < self.rows && col < self.cols, "({row}, {col}) outside grid");
        row * self.cols + col
    }

    pub fn coords_of(&self, rank: usize) -> (usize, usize) {
        assert!(rank < self.size(), "rank {rank} outside grid");
        (rank / self.cols, rank % self.cols)
    }

    /// Rank reached by moving `disp` steps along `axis`, or `None` when the
    /// move leaves a non-periodic axis.
    fn displaced(&self, axis: Axis, disp: isize) -> Option<usize> {
        let (pos, dim, periodic) = match axis {
            Axis::Row => (self.row, self.rows, self.periodic[0]),
            Axis::Col => (self.col, self.cols, self.periodic[1]),
        };
        let target = pos as isize + disp;
        let target = if periodic {
            target.rem_euclid(dim as isize) as usize
        } else if (0..dim as isize).contains(&target) {
            target as usize
        } else {
            return None;
        };
        Some(match axis {
            Axis::Row => self.rank_of(target, self.col),
            Axis::Col => self.rank_of(self.row, target),
        })
    }

    /// `(source, destination)` for a shift by `disp` along `axis`: data is
    /// sent to `destination` (position + disp) and received from `source`
    /// (position - disp).
    pub fn shift(&self, axis: Axis, disp: isize) -> (Option<usize>, Option<usize>) {
        (self.displaced(axis, -disp), self.displaced(axis, disp))
    }

    pub fn left(&self) -> Option<usize> {
        self.displaced(Axis::Col, -1)
    }

    pub fn right(&self) -> Option<usize> {
        self.displaced(Axis::Col, 1)
    }

    pub fn up(&self) -> Option<usize> {
        self.displaced(Axis::Row, -1)
    }

    pub fn down(&self) -> Option<usize> {
        self.displaced(Axis::Row, 1)
    }
}
