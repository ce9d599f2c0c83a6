//! Launch geometry for ND-range kernel execution.
//!
//! An `NdRange` is the geometric half of a launch descriptor: the global
//! index space, the work-group tiling and the global offset, for up to
//! [`MAX_WORK_DIMS`] dimensions. Identity vectors are fixed-size arrays and
//! every operation only looks at the first `work_dim` elements.

use crate::error::{Error, Result};

/// Maximum number of work dimensions supported by the object model.
pub const MAX_WORK_DIMS: usize = 3;

/// Identity vector: one coordinate per work dimension.
pub type WorkDims = [usize; MAX_WORK_DIMS];

/// Geometry of one kernel launch. Immutable once submitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NdRange {
    pub work_dim: u32,
    pub global: WorkDims,
    pub local: WorkDims,
    pub offset: WorkDims,
}

impl NdRange {
    /// 1-D range. A `local` of zero asks the kernel for a default.
    pub fn dim1(global: usize, local: usize) -> Self {
        Self {
            work_dim: 1,
            global: [global, 1, 1],
            local: [local, 1, 1],
            offset: [0; MAX_WORK_DIMS],
        }
    }

    /// 2-D range.
    pub fn dim2(global: [usize; 2], local: [usize; 2]) -> Self {
        Self {
            work_dim: 2,
            global: [global[0], global[1], 1],
            local: [local[0], local[1], 1],
            offset: [0; MAX_WORK_DIMS],
        }
    }

    /// 3-D range.
    pub fn dim3(global: WorkDims, local: WorkDims) -> Self {
        Self {
            work_dim: 3,
            global,
            local,
            offset: [0; MAX_WORK_DIMS],
        }
    }

    pub fn with_offset(mut self, offset: WorkDims) -> Self {
        self.offset = offset;
        self
    }

    /// Checks the preconditions the executor relies on: a valid dimension
    /// count, non-zero local sizes and exact divisibility of the global
    /// size by the local size in every used dimension.
    pub fn validate(&self) -> Result<()> {
        if self.work_dim < 1 || self.work_dim > MAX_WORK_DIMS as u32 {
            return Err(Error::InvalidWorkDim(self.work_dim));
        }

        for d in 0..self.work_dim as usize {
            if self.local[d] == 0 {
                return Err(Error::ZeroLocalSize(d as u32));
            }

            if self.global[d] == 0 || !self.global[d].is_multiple_of(self.local[d]) {
                return Err(Error::InvalidWorkGroupSize {
                    global: self.global[d],
                    local: self.local[d],
                    dim: d as u32,
                });
            }
        }

        Ok(())
    }

    /// Work-group count per dimension. Unused dimensions report 1.
    pub fn num_groups(&self) -> WorkDims {
        let mut groups = [1; MAX_WORK_DIMS];
        for d in 0..self.work_dim as usize {
            groups[d] = self.global[d] / self.local[d];
        }
        groups
    }

    /// Total number of work-groups in the launch.
    pub fn group_count(&self) -> usize {
        self.num_groups().iter().product()
    }

    /// Number of work-items in one work-group.
    pub fn work_items_per_group(&self) -> usize {
        self.local[..self.work_dim as usize].iter().product()
    }

    /// Largest local id in each dimension.
    pub fn max_local_id(&self) -> WorkDims {
        let mut maxs = [0; MAX_WORK_DIMS];
        for d in 0..self.work_dim as usize {
            maxs[d] = self.local[d] - 1;
        }
        maxs
    }

    /// First global id covered by the work-group at `group_index`.
    pub fn global_id_start(&self, group_index: &WorkDims) -> WorkDims {
        let mut start = [0; MAX_WORK_DIMS];
        for d in 0..self.work_dim as usize {
            start[d] = self.offset[d] + group_index[d] * self.local[d];
        }
        start
    }
}

/// Increments `vec` lexicographically within `0..=maxs`, dimension 0
/// fastest. Returns `true` when the vector wraps back to all zeroes.
pub fn inc_vec(work_dim: u32, vec: &mut WorkDims, maxs: &WorkDims) -> bool {
    for d in 0..work_dim as usize {
        if vec[d] < maxs[d] {
            vec[d] += 1;
            return false;
        }
        vec[d] = 0;
    }
    true
}

/// Row-major decomposition of a linear work-group number into an index
/// vector, dimension 0 fastest. This is the order in which the scheduler
/// issues work-groups.
pub fn group_index(linear: usize, num_groups: &WorkDims, work_dim: u32) -> WorkDims {
    let mut index = [0; MAX_WORK_DIMS];
    let mut rest = linear;
    for d in 0..work_dim as usize {
        index[d] = rest % num_groups[d];
        rest /= num_groups[d];
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_accepts_exact_tiling() {
        assert!(NdRange::dim1(8, 4).validate().is_ok());
        assert!(NdRange::dim2([2, 3], [2, 3]).validate().is_ok());
        assert!(NdRange::dim3([4, 4, 2], [2, 2, 2]).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_bad_geometry() {
        assert!(matches!(
            NdRange::dim1(8, 3).validate(),
            Err(Error::InvalidWorkGroupSize { dim: 0, .. })
        ));
        assert!(matches!(
            NdRange::dim1(8, 0).validate(),
            Err(Error::ZeroLocalSize(0))
        ));

        let mut range = NdRange::dim1(8, 4);
        range.work_dim = 4;
        assert!(matches!(range.validate(), Err(Error::InvalidWorkDim(4))));
    }

    #[test]
    fn test_inc_vec_walks_lexicographically() {
        let maxs = [1, 2, 0];
        let mut vec = [0; MAX_WORK_DIMS];
        let mut seen = vec![vec];

        while !inc_vec(2, &mut vec, &maxs) {
            seen.push(vec);
        }

        assert_eq!(
            seen,
            vec![
                [0, 0, 0],
                [1, 0, 0],
                [0, 1, 0],
                [1, 1, 0],
                [0, 2, 0],
                [1, 2, 0]
            ]
        );
        assert_eq!(vec, [0, 0, 0]);
    }

    #[test]
    fn test_group_index_is_row_major() {
        let groups = [2, 3, 1];
        let indices: Vec<_> = (0..6).map(|i| group_index(i, &groups, 2)).collect();
        assert_eq!(
            indices,
            vec![
                [0, 0, 0],
                [1, 0, 0],
                [0, 1, 0],
                [1, 1, 0],
                [0, 2, 0],
                [1, 2, 0]
            ]
        );
    }

    #[test]
    fn test_derived_queries() {
        let range = NdRange::dim2([8, 6], [4, 3]).with_offset([10, 20, 0]);
        assert_eq!(range.num_groups(), [2, 2, 1]);
        assert_eq!(range.group_count(), 4);
        assert_eq!(range.work_items_per_group(), 12);
        assert_eq!(range.max_local_id(), [3, 2, 0]);
        assert_eq!(range.global_id_start(&[1, 1, 0]), [14, 23, 0]);
    }
}
