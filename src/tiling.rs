//! Block tiling of matrix dimensions over the fixed array size
//!
//! For C = A @ B where A is MxK and B is KxN:
//! - M is split into accumulator-buffer-high row blocks of A
//! - N is split into array-wide column blocks of B
//! - K is split into array-high blocks, accumulated in the accumulator memory

/// Split of one matrix dimension into fixed-size blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockTiling {
    /// Full extent of the dimension
    pub extent: usize,
    /// Nominal block size
    pub block: usize,
    /// Number of blocks, ceil(extent / block)
    pub blocks: usize,
    /// Size of the final (possibly partial) block
    pub last: usize,
}

impl BlockTiling {
    pub fn new(extent: usize, block: usize) -> Self {
        if extent == 0 || block == 0 {
            return Self {
                extent,
                block,
                blocks: 0,
                last: 0,
            };
        }
        let blocks = (extent + block - 1) / block;
        Self {
            extent,
            block,
            blocks,
            last: extent - (blocks - 1) * block,
        }
    }

    /// Unused positions in the final block
    pub fn idle(&self) -> usize {
        self.blocks * self.block - self.extent
    }

    pub fn is_last(&self, index: usize) -> bool {
        index + 1 == self.blocks
    }

    /// Size of block `index`
    pub fn size_of(&self, index: usize) -> usize {
        if self.is_last(index) {
            self.last
        } else {
            self.block
        }
    }

    /// First element of block `index`
    pub fn start_of(&self, index: usize) -> usize {
        index * self.block
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_exact_tiling() {
        let tiling = BlockTiling::new(16, 8);
        assert_eq!(tiling.blocks, 2);
        assert_eq!(tiling.last, 8);
        assert_eq!(tiling.idle(), 0);
    }

    #[test]
    fn test_partial_last_block() {
        // N=10 over an 8-wide array
        let tiling = BlockTiling::new(10, 8);
        assert_eq!(tiling.blocks, 2);
        assert_eq!(tiling.last, 2);
        assert_eq!(tiling.idle(), 6);
        assert_eq!(tiling.size_of(0), 8);
        assert_eq!(tiling.size_of(1), 2);
        assert_eq!(tiling.start_of(1), 8);
    }

    #[test]
    fn test_single_small_block() {
        let tiling = BlockTiling::new(3, 256);
        assert_eq!(tiling.blocks, 1);
        assert_eq!(tiling.last, 3);
        assert_eq!(tiling.idle(), 253);
        assert!(tiling.is_last(0));
    }
}
