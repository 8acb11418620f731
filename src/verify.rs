//! Sequential reference product and element-wise comparison.

use rayon::prelude::*;

use crate::error::Result;
use crate::matrix::DenseMatrix;

/// Outcome of comparing a distributed product against the reference.
#[derive(Debug, Clone, PartialEq)]
pub struct Verification {
    pub equal: bool,
    pub max_abs_diff: f64,
    /// First element (row, col) whose difference exceeds the tolerance.
    pub first_mismatch: Option<(usize, usize)>,
}

/// `a * b` computed on one process. Rows are independent and run in
/// parallel; each element sums its terms in ascending inner index.
pub fn reference_product(a: &DenseMatrix, b: &DenseMatrix) -> Result<DenseMatrix> {
    assert_eq!(a.ncols, b.nrows, "reference inner dimension mismatch");
    let mut c = DenseMatrix::zeros(a.nrows, b.ncols)?;
    let cols = b.ncols;
    if cols == 0 {
        return Ok(c);
    }

    c.values
        .par_chunks_mut(cols)
        .enumerate()
        .for_each(|(i, c_row)| {
            for (k, &a_ik) in a.row(i).iter().enumerate() {
                for (c_ij, &b_kj) in c_row.iter_mut().zip(b.row(k)) {
                    *c_ij += a_ik * b_kj;
                }
            }
        });
    Ok(c)
}

/// Compare element-wise with absolute tolerance `tolerance`.
pub fn compare(expected: &DenseMatrix, actual: &DenseMatrix, tolerance: f64) -> Verification {
    if (expected.nrows, expected.ncols) != (actual.nrows, actual.ncols) {
        tracing::warn!(
            expected_rows = expected.nrows,
            expected_cols = expected.ncols,
            actual_rows = actual.nrows,
            actual_cols = actual.ncols,
            "product has the wrong shape"
        );
        return Verification {
            equal: false,
            max_abs_diff: f64::INFINITY,
            first_mismatch: Some((0, 0)),
        };
    }

    let mut max_abs_diff = 0.0_f64;
    let mut first_mismatch = None;
    for (idx, (&e, &a)) in expected.values.iter().zip(&actual.values).enumerate() {
        let diff = (e - a).abs();
        // NaN never compares within tolerance.
        if !(diff <= tolerance) && first_mismatch.is_none() {
            let at = (idx / expected.ncols, idx % expected.ncols);
            tracing::warn!(
                row = at.0,
                col = at.1,
                expected = e,
                actual = a,
                tolerance,
                "first mismatching element"
            );
            first_mismatch = Some(at);
        }
        if diff.is_nan() {
            max_abs_diff = f64::NAN;
        } else if diff > max_abs_diff {
            max_abs_diff = diff;
        }
    }

    let equal = first_mismatch.is_none();
    if equal {
        tracing::info!(max_abs_diff, "product verified");
    }
    Verification {
        equal,
        max_abs_diff,
        first_mismatch,
    }
}
