//! Block planning and lane partitioning.

use crate::error::{FilesError, FilesResult};
use std::collections::BTreeSet;

/// Offsets of blocks already on disk at the receiver.
pub type BlockSkipList = BTreeSet<u64>;

/// Fixed-size block layout of one file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockPlan {
    size: u64,
    block_size: u64,
}

impl BlockPlan {
    /// Plan `size` bytes in blocks of `block_size`.
    ///
    /// # Panics
    ///
    /// Panics if `block_size` is zero.
    #[must_use]
    pub fn new(size: u64, block_size: u32) -> Self {
        assert!(block_size > 0, "block size must be non-zero");
        Self {
            size,
            block_size: u64::from(block_size),
        }
    }

    /// File size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Block size.
    #[must_use]
    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Number of blocks.
    #[must_use]
    pub fn block_count(&self) -> u64 {
        self.size.div_ceil(self.block_size)
    }

    /// Length of the block starting at `offset`.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::BadOffset` if `offset` is not a block start.
    pub fn block_len(&self, offset: u64) -> FilesResult<usize> {
        self.check_offset(offset)?;
        // Bounded by block_size, which came from a u32.
        Ok((self.size - offset).min(self.block_size) as usize)
    }

    /// Whether `offset` starts a block of this file.
    ///
    /// # Errors
    ///
    /// Returns `FilesError::BadOffset` otherwise.
    pub fn check_offset(&self, offset: u64) -> FilesResult<()> {
        if offset >= self.size || offset % self.block_size != 0 {
            return Err(FilesError::BadOffset {
                offset,
                size: self.size,
            });
        }
        Ok(())
    }

    /// All block offsets in ascending order.
    pub fn offsets(&self) -> impl Iterator<Item = u64> + '_ {
        (0..self.block_count()).map(move |i| i * self.block_size)
    }

    /// Offsets not yet present at the receiver.
    #[must_use]
    pub fn pending(&self, skip: &BlockSkipList) -> Vec<u64> {
        self.offsets().filter(|o| !skip.contains(o)).collect()
    }

    /// Total bytes covered by the blocks in `skip`.
    #[must_use]
    pub fn skipped_bytes(&self, skip: &BlockSkipList) -> u64 {
        skip.iter()
            .filter_map(|&o| self.block_len(o).ok())
            .map(|l| l as u64)
            .sum()
    }
}

/// Split `pending` into `lanes` contiguous runs.
///
/// Every lane gets `pending.len() / lanes` blocks and the last lane also
/// takes the remainder. Lanes may be empty when there are fewer blocks
/// than lanes; they still run and just send the terminal sentinel.
#[must_use]
pub fn partition(pending: &[u64], lanes: usize) -> Vec<Vec<u64>> {
    let lanes = lanes.max(1);
    let per_lane = pending.len() / lanes;
    let mut out = Vec::with_capacity(lanes);
    for lane in 0..lanes {
        let start = lane * per_lane;
        let end = if lane + 1 == lanes {
            pending.len()
        } else {
            start + per_lane
        };
        out.push(pending[start..end].to_vec());
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_block_count() {
        assert_eq!(BlockPlan::new(0, 1024).block_count(), 0);
        assert_eq!(BlockPlan::new(1, 1024).block_count(), 1);
        assert_eq!(BlockPlan::new(1024, 1024).block_count(), 1);
        assert_eq!(BlockPlan::new(1025, 1024).block_count(), 2);
    }

    #[test]
    fn test_block_len_last_block_short() {
        let plan = BlockPlan::new(2500, 1000);
        assert_eq!(plan.block_len(0).unwrap(), 1000);
        assert_eq!(plan.block_len(2000).unwrap(), 500);
        assert!(plan.block_len(2500).is_err());
        assert!(plan.block_len(999).is_err());
    }

    #[test]
    fn test_pending_excludes_skip_list() {
        let plan = BlockPlan::new(5000, 1000);
        let skip: BlockSkipList = [1000, 3000].into_iter().collect();
        assert_eq!(plan.pending(&skip), vec![0, 2000, 4000]);
        assert_eq!(plan.skipped_bytes(&skip), 2000);
    }

    #[test]
    fn test_partition_remainder_to_last_lane() {
        let pending: Vec<u64> = (0..10).collect();
        let lanes = partition(&pending, 3);
        assert_eq!(lanes, vec![vec![0, 1, 2], vec![3, 4, 5], vec![6, 7, 8, 9]]);
    }

    #[test]
    fn test_partition_fewer_blocks_than_lanes() {
        let lanes = partition(&[0, 1], 4);
        assert_eq!(lanes.len(), 4);
        assert_eq!(lanes[3], vec![0, 1]);
        assert!(lanes[0].is_empty());
    }

    proptest! {
        #[test]
        fn prop_partition_covers_in_order(n in 0usize..500, lanes in 1usize..9) {
            let pending: Vec<u64> = (0..n as u64).map(|i| i * 7).collect();
            let parts = partition(&pending, lanes);
            prop_assert_eq!(parts.len(), lanes);
            let flat: Vec<u64> = parts.iter().flatten().copied().collect();
            prop_assert_eq!(flat, pending);
            for part in &parts {
                prop_assert!(part.windows(2).all(|w| w[0] < w[1]));
            }
        }
    }
}
