//! Local multiply-accumulate kernel shared by every algorithm.

use crate::matrix::LocalBlock;

/// Accumulate `c += a * b`.
///
/// Loop order is i (rows of `a`), t (inner), j (columns of `b`) so the scalar
/// `a[i][t]` stays in a register across the unit-stride sweep of `b` and `c`.
/// Never clears `c`: callers rely on accumulation across circulation steps.
pub fn multiply_accumulate(a: &LocalBlock, b: &LocalBlock, c: &mut LocalBlock) {
    assert_eq!(a.ncols, b.nrows, "kernel inner dimension mismatch");
    assert_eq!(a.nrows, c.nrows, "kernel row dimension mismatch");
    assert_eq!(b.ncols, c.ncols, "kernel column dimension mismatch");

    let depth = a.ncols;
    let cols = b.ncols;
    if depth == 0 || cols == 0 {
        return;
    }

    for (a_row, c_row) in a
        .values
        .chunks_exact(depth)
        .zip(c.values.chunks_exact_mut(cols))
    {
        for (t, &a_it) in a_row.iter().enumerate() {
            let b_row = &b.values[t * cols..(t + 1) * cols];
            for (c_ij, &b_tj) in c_row.iter_mut().zip(b_row) {
                *c_ij += a_it * b_tj;
            }
        }
    }
}
