//! Dense row-major matrix storage.
//!
//! Used both for the global N×N operands held by the origin process and for
//! the per-process local blocks. Blocks of a row-major matrix are strided in
//! memory, so extraction and insertion copy one row stripe at a time.

use crate::error::{GridError, Result};
use rand::Rng;

/// Element count of an `nrows x ncols` matrix, or an allocation error when
/// it does not fit in `usize`.
pub fn element_count(nrows: usize, ncols: usize) -> Result<usize> {
    nrows.checked_mul(ncols).ok_or(GridError::Allocation {
        elements: usize::MAX,
    })
}

/// Allocate a zero-filled buffer, reporting failure instead of aborting.
pub fn try_zeroed(len: usize) -> Result<Vec<f64>> {
    let mut values = Vec::new();
    values
        .try_reserve_exact(len)
        .map_err(|_| GridError::Allocation { elements: len })?;
    values.resize(len, 0.0);
    Ok(values)
}

/// Dense matrix in row-major order.
#[derive(Debug, Clone, PartialEq)]
pub struct DenseMatrix {
    pub nrows: usize,
    pub ncols: usize,
    /// `values[i * ncols + j]` is element (i, j).
    pub values: Vec<f64>,
}

/// A process's share of a global matrix: one contiguous rectangle.
pub type LocalBlock = DenseMatrix;

impl DenseMatrix {
    /// Create an all-zero matrix.
    pub fn zeros(nrows: usize, ncols: usize) -> Result<Self> {
        Ok(Self {
            nrows,
            ncols,
            values: try_zeroed(element_count(nrows, ncols)?)?,
        })
    }

    /// Wrap an existing row-major buffer.
    pub fn from_vec(nrows: usize, ncols: usize, values: Vec<f64>) -> Result<Self> {
        if Some(values.len()) != nrows.checked_mul(ncols) {
            return Err(GridError::InvalidSize(format!(
                "buffer of length {} cannot hold a {}x{} matrix",
                values.len(),
                nrows,
                ncols
            )));
        }
        Ok(Self {
            nrows,
            ncols,
            values,
        })
    }

    /// Fill a matrix with uniform samples from [0, 1).
    pub fn random<R: Rng + ?Sized>(nrows: usize, ncols: usize, rng: &mut R) -> Result<Self> {
        let mut m = Self::zeros(nrows, ncols)?;
        for v in m.values.iter_mut() {
            *v = rng.random::<f64>();
        }
        Ok(m)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn row(&self, row: usize) -> &[f64] {
        &self.values[row * self.ncols..(row + 1) * self.ncols]
    }

    /// Copy the sub-rectangle starting at (`row_offset`, `col_offset`) into a
    /// new contiguous block.
    pub fn extract_block(
        &self,
        row_offset: usize,
        rows: usize,
        col_offset: usize,
        cols: usize,
    ) -> Result<LocalBlock> {
        assert!(
            row_offset + rows <= self.nrows && col_offset + cols <= self.ncols,
            "block {}x{} at ({}, {}) exceeds {}x{} matrix",
            rows,
            cols,
            row_offset,
            col_offset,
            self.nrows,
            self.ncols
        );
        let mut block = Self::zeros(rows, cols)?;
        if cols == 0 {
            return Ok(block);
        }
        for (r, dst) in block.values.chunks_exact_mut(cols).enumerate() {
            let start = (row_offset + r) * self.ncols + col_offset;
            dst.copy_from_slice(&self.values[start..start + cols]);
        }
        Ok(block)
    }

    /// Write `block` into this matrix with its top-left corner at
    /// (`row_offset`, `col_offset`).
    pub fn insert_block(&mut self, row_offset: usize, col_offset: usize, block: &LocalBlock) {
        assert!(
            row_offset + block.nrows <= self.nrows && col_offset + block.ncols <= self.ncols,
            "block {}x{} at ({}, {}) exceeds {}x{} matrix",
            block.nrows,
            block.ncols,
            row_offset,
            col_offset,
            self.nrows,
            self.ncols
        );
        if block.ncols == 0 {
            return;
        }
        for (r, src) in block.values.chunks_exact(block.ncols).enumerate() {
            let start = (row_offset + r) * self.ncols + col_offset;
            self.values[start..start + block.ncols].copy_from_slice(src);
        }
    }

    /// Reshape in place to `nrows x ncols`, reusing the allocation when it is
    /// large enough. Contents are unspecified afterwards.
    pub fn reshape(&mut self, nrows: usize, ncols: usize) -> Result<()> {
        let len = element_count(nrows, ncols)?;
        if len > self.values.capacity() {
            self.values
                .try_reserve_exact(len - self.values.len())
                .map_err(|_| GridError::Allocation { elements: len })?;
        }
        self.values.resize(len, 0.0);
        self.nrows = nrows;
        self.ncols = ncols;
        Ok(())
    }

    /// Copy columns `col_offset..col_offset + dst.ncols` of every row into
    /// `dst`, which must have as many rows as `self`.
    pub fn copy_columns_into(&self, col_offset: usize, dst: &mut LocalBlock) {
        assert_eq!(self.nrows, dst.nrows, "column panel row count mismatch");
        assert!(col_offset + dst.ncols <= self.ncols, "column panel out of range");
        if dst.ncols == 0 {
            return;
        }
        for (r, out) in dst.values.chunks_exact_mut(dst.ncols).enumerate() {
            out.copy_from_slice(&self.row(r)[col_offset..col_offset + out.len()]);
        }
    }

    /// Copy rows `row_offset..row_offset + dst.nrows` into `dst`, which must
    /// have as many columns as `self`.
    pub fn copy_rows_into(&self, row_offset: usize, dst: &mut LocalBlock) {
        assert_eq!(self.ncols, dst.ncols, "row panel column count mismatch");
        let start = row_offset * self.ncols;
        let len = dst.values.len();
        dst.values.copy_from_slice(&self.values[start..start + len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn counting(nrows: usize, ncols: usize) -> DenseMatrix {
        let values = (0..nrows * ncols).map(|v| v as f64).collect();
        DenseMatrix::from_vec(nrows, ncols, values).unwrap()
    }

    #[test]
    fn zeros_has_requested_shape() {
        let m = DenseMatrix::zeros(3, 5).unwrap();
        assert_eq!(m.len(), 15);
        assert!(m.values.iter().all(|&v| v == 0.0));
    }

    #[test]
    fn from_vec_rejects_wrong_length() {
        assert!(matches!(
            DenseMatrix::from_vec(2, 2, vec![1.0; 3]),
            Err(GridError::InvalidSize(_))
        ));
    }

    #[test]
    fn random_is_reproducible_and_in_range() {
        let a = DenseMatrix::random(4, 4, &mut StdRng::seed_from_u64(7)).unwrap();
        let b = DenseMatrix::random(4, 4, &mut StdRng::seed_from_u64(7)).unwrap();
        assert_eq!(a, b);
        assert!(a.values.iter().all(|&v| (0.0..1.0).contains(&v)));
    }

    #[test]
    fn extract_block_copies_strided_rows() {
        // 4x4 counting matrix, take the 2x2 block at (1, 2):
        // rows 1..3, cols 2..4 -> [6, 7, 10, 11]
        let m = counting(4, 4);
        let block = m.extract_block(1, 2, 2, 2).unwrap();
        assert_eq!(block.values, vec![6.0, 7.0, 10.0, 11.0]);
    }

    #[test]
    fn insert_block_inverts_extract() {
        let m = counting(5, 5);
        let mut out = DenseMatrix::zeros(5, 5).unwrap();
        for (ro, rows) in [(0, 3), (3, 2)] {
            for (co, cols) in [(0, 2), (2, 3)] {
                let block = m.extract_block(ro, rows, co, cols).unwrap();
                out.insert_block(ro, co, &block);
            }
        }
        assert_eq!(out, m);
    }

    #[test]
    fn zero_extent_blocks_are_empty() {
        let m = counting(3, 3);
        let block = m.extract_block(3, 0, 1, 2).unwrap();
        assert!(block.is_empty());
        let block = m.extract_block(0, 3, 3, 0).unwrap();
        assert_eq!((block.nrows, block.ncols), (3, 0));
        let mut out = m.clone();
        out.insert_block(0, 3, &block);
        assert_eq!(out, m);
    }

    #[test]
    fn panels_select_columns_and_rows() {
        let m = counting(3, 4);
        let mut cols = DenseMatrix::zeros(3, 2).unwrap();
        m.copy_columns_into(1, &mut cols);
        assert_eq!(cols.values, vec![1.0, 2.0, 5.0, 6.0, 9.0, 10.0]);
        let mut rows = DenseMatrix::zeros(1, 4).unwrap();
        m.copy_rows_into(1, &mut rows);
        assert_eq!(rows.values, vec![4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn oversized_matrix_reports_allocation_failure() {
        // 2^62 elements fit in usize but not in memory.
        assert!(matches!(
            DenseMatrix::zeros(1 << 31, 1 << 31),
            Err(GridError::Allocation { .. })
        ));
        // 2^66 elements overflow the element count itself.
        assert!(matches!(
            DenseMatrix::zeros(1 << 33, 1 << 33),
            Err(GridError::Allocation { .. })
        ));
        let mut m = DenseMatrix::zeros(1, 1).unwrap();
        assert!(matches!(
            m.reshape(usize::MAX, 2),
            Err(GridError::Allocation { .. })
        ));
        assert_eq!((m.nrows, m.ncols), (1, 1));
    }

    #[test]
    fn from_vec_rejects_overflowing_shape() {
        assert!(DenseMatrix::from_vec(usize::MAX, 2, Vec::new()).is_err());
    }

    #[test]
    fn reshape_reuses_and_grows() {
        let mut m = DenseMatrix::zeros(2, 2).unwrap();
        m.reshape(1, 3).unwrap();
        assert_eq!((m.nrows, m.ncols, m.len()), (1, 3, 3));
        m.reshape(3, 3).unwrap();
        assert_eq!(m.len(), 9);
        m.reshape(0, 5).unwrap();
        assert!(m.is_empty());
    }
}
