//! Block partitioning of one matrix axis across one grid axis.
//!
//! Remainder units (N mod gridDim) go to the lowest-indexed coordinates, so
//! extents never differ by more than one and the plan is identical on every
//! process without communication.

use crate::error::{GridError, Result};

/// (offset, extent) of coordinate `index` when `n` units are split across
/// `grid_dim` coordinates.
pub fn block_extent(n: usize, grid_dim: usize, index: usize) -> (usize, usize) {
    assert!(grid_dim > 0, "grid dimension must be positive");
    assert!(index < grid_dim, "coordinate {index} outside grid dimension {grid_dim}");
    let base = n / grid_dim;
    let rem = n % grid_dim;
    if index < rem {
        (index * (base + 1), base + 1)
    } else {
        (rem * (base + 1) + (index - rem) * base, base)
    }
}

/// Offsets and extents of every coordinate along one axis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PartitionPlan {
    /// Global length of the axis.
    pub n: usize,
    pub offsets: Vec<usize>,
    pub extents: Vec<usize>,
}

impl PartitionPlan {
    pub fn new(n: usize, grid_dim: usize) -> Result<Self> {
        if grid_dim == 0 {
            return Err(GridError::InvalidTopology(
                "cannot partition across a grid dimension of 0".into(),
            ));
        }
        let (offsets, extents) = (0..grid_dim).map(|i| block_extent(n, grid_dim, i)).unzip();
        Ok(Self {
            n,
            offsets,
            extents,
        })
    }

    pub fn grid_dim(&self) -> usize {
        self.extents.len()
    }

    pub fn offset(&self, index: usize) -> usize {
        self.offsets[index]
    }

    pub fn extent(&self, index: usize) -> usize {
        self.extents[index]
    }

    /// Half-open global range owned by `index`.
    pub fn range(&self, index: usize) -> std::ops::Range<usize> {
        self.offsets[index]..self.offsets[index] + self.extents[index]
    }

    /// Coordinate owning global unit `global`. Zero-extent coordinates never
    /// own anything.
    pub fn owner_of(&self, global: usize) -> usize {
        assert!(global < self.n, "unit {global} outside axis of length {}", self.n);
        (0..self.grid_dim())
            .find(|&i| self.range(i).contains(&global))
            .unwrap_or(self.grid_dim() - 1)
    }
}

/// One inner-dimension slice that lies inside a single block of two
/// different partitions of the same axis.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Panel {
    /// Global start of the panel.
    pub offset: usize,
    pub width: usize,
    /// Owning coordinate in the first partition.
    pub first_owner: usize,
    /// Owning coordinate in the second partition.
    pub second_owner: usize,
}

/// Split the axis at the union of both plans' block boundaries.
///
/// When both plans are identical the result is one panel per non-empty
/// block. Zero-width panels are dropped.
pub fn common_panels(first: &PartitionPlan, second: &PartitionPlan) -> Vec<Panel> {
    assert_eq!(first.n, second.n, "panels need partitions of the same axis");
    let mut cuts: Vec<usize> = first
        .offsets
        .iter()
        .chain(&second.offsets)
        .copied()
        .chain(std::iter::once(first.n))
        .collect();
    cuts.sort_unstable();
    cuts.dedup();

    cuts.windows(2)
        .filter(|w| w[1] > w[0])
        .map(|w| Panel {
            offset: w[0],
            width: w[1] - w[0],
            first_owner: first.owner_of(w[0]),
            second_owner: second.owner_of(w[0]),
        })
        .collect()
}
