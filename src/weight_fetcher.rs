//! Weight fetcher
//!
//! Stages one weight tile into the write registers of the PE grid, one
//! anti-diagonal per cycle, so the tile is complete exactly when the
//! update-weight pulse that swaps it in reaches each PE.

use crate::error::{MpuError, MpuResult};
use crate::hardware::bits_required;
use crate::numeric::NumericTypes;
use crate::systolic_array::SystolicArray;
use crate::tiling::BlockTiling;

/// Geometry of the weight matrix currently being fetched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct WeightSource {
    /// Row length of the source matrix (N)
    width: usize,
    /// N split into array-wide column blocks
    columns: BlockTiling,
    /// K split into array-high row blocks
    rows: BlockTiling,
}

/// One in-flight tile load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WeightUpdateRequest {
    pub block_x: usize,
    pub block_y: usize,
    /// Next diagonal to write
    pub diagonal: usize,
}

pub struct WeightFetcher {
    array_width: usize,
    array_height: usize,
    diagonals: usize,
    current: WeightSource,
    next: WeightSource,
    queue: Vec<WeightUpdateRequest>,
    clear: bool,
    busy: bool,
    column_loads: Vec<usize>,
    load_count: usize,
    concurrent_loads_max: usize,
    concurrent_loads_per_column_max: usize,
    width_max: usize,
    height_max: usize,
    blocks_x_max: usize,
    blocks_y_max: usize,
    active_columns_max: usize,
    idle_rows_max: usize,
    queue_len_max: usize,
}

impl WeightFetcher {
    pub fn new(array_width: usize, array_height: usize) -> Self {
        Self {
            array_width,
            array_height,
            diagonals: array_width + array_height - 1,
            current: WeightSource::default(),
            next: WeightSource::default(),
            queue: Vec::new(),
            clear: false,
            busy: false,
            column_loads: vec![0; array_width],
            load_count: 0,
            concurrent_loads_max: 0,
            concurrent_loads_per_column_max: 0,
            width_max: 0,
            height_max: 0,
            blocks_x_max: 0,
            blocks_y_max: 0,
            active_columns_max: 0,
            idle_rows_max: 0,
            queue_len_max: 0,
        }
    }

    /// Select a KxN weight matrix (`width` = N, `height` = K); takes effect on commit
    pub fn set_input(&mut self, width: usize, height: usize) {
        let columns = BlockTiling::new(width, self.array_width);
        let rows = BlockTiling::new(height, self.array_height);
        self.next = WeightSource {
            width,
            columns,
            rows,
        };

        self.width_max = self.width_max.max(width);
        self.height_max = self.height_max.max(height);
        self.blocks_x_max = self.blocks_x_max.max(columns.blocks);
        self.blocks_y_max = self.blocks_y_max.max(rows.blocks);
        self.active_columns_max = self.active_columns_max.max(columns.last);
        self.idle_rows_max = self.idle_rows_max.max(rows.idle());
    }

    /// Queue the load of tile (`block_x`, `block_y`)
    pub fn update_weights(&mut self, block_x: usize, block_y: usize) -> MpuResult<()> {
        if block_x >= self.current.columns.blocks || block_y >= self.current.rows.blocks {
            return Err(MpuError::malformed(format!(
                "weight tile ({}, {}) outside the {}x{} tile grid",
                block_x, block_y, self.current.columns.blocks, self.current.rows.blocks
            )));
        }
        log::trace!("weight fetcher: queue tile ({}, {})", block_x, block_y);
        self.queue.push(WeightUpdateRequest {
            block_x,
            block_y,
            diagonal: 0,
        });
        self.queue_len_max = self.queue_len_max.max(self.queue.len());
        Ok(())
    }

    /// Drop all queued requests on the next commit
    pub fn clear_queue(&mut self) {
        self.clear = true;
    }

    pub fn has_busy_signal(&self) -> bool {
        self.busy
    }

    pub fn queue(&self) -> &[WeightUpdateRequest] {
        &self.queue
    }

    pub fn run_iteration<T: NumericTypes>(
        &mut self,
        source: &[T::Weight],
        array: &mut SystolicArray<T>,
    ) {
        if self.queue.is_empty() {
            return;
        }

        let current = self.current;
        let array_width = self.array_width;
        let array_height = self.array_height;
        let column_loads = &mut self.column_loads;
        column_loads.iter_mut().for_each(|c| *c = 0);
        let mut loads = 0;

        for request in &mut self.queue {
            let active = if current.columns.is_last(request.block_x) {
                current.columns.last
            } else {
                array_width
            };
            let idle = if current.rows.is_last(request.block_y) {
                current.rows.idle()
            } else {
                0
            };

            array.store_weights_on_diagonal(request.diagonal, |x, y| {
                if x < active && y >= idle {
                    loads += 1;
                    column_loads[x] += 1;
                    let row = request.block_y * array_height + y - idle;
                    source[row * current.width + request.block_x * array_width + x]
                } else {
                    T::Weight::default()
                }
            });
            request.diagonal += 1;
        }

        let diagonals = self.diagonals;
        self.queue.retain(|request| {
            let done = request.diagonal == diagonals;
            if done {
                log::trace!(
                    "weight fetcher: tile ({}, {}) staged",
                    request.block_x,
                    request.block_y
                );
            }
            !done
        });

        self.load_count += loads;
        self.concurrent_loads_max = self.concurrent_loads_max.max(loads);
        let column_max = self.column_loads.iter().copied().max().unwrap_or(0);
        self.concurrent_loads_per_column_max = self.concurrent_loads_per_column_max.max(column_max);
    }

    pub fn update_state(&mut self) {
        self.current = self.next;
        if self.clear {
            self.queue.clear();
            self.clear = false;
        }
        self.busy = !self.queue.is_empty();
    }

    /// Weights read from the unified buffer (zero fill excluded)
    pub fn load_count(&self) -> usize {
        self.load_count
    }

    pub fn concurrent_loads_max(&self) -> usize {
        self.concurrent_loads_max
    }

    pub fn concurrent_loads_per_column_max(&self) -> usize {
        self.concurrent_loads_per_column_max
    }

    pub fn reset_load_counts(&mut self) {
        self.load_count = 0;
        self.concurrent_loads_max = 0;
        self.concurrent_loads_per_column_max = 0;
    }

    pub fn reset_max_register_values(&mut self) {
        self.width_max = 0;
        self.height_max = 0;
        self.blocks_x_max = 0;
        self.blocks_y_max = 0;
        self.active_columns_max = 0;
        self.idle_rows_max = 0;
        self.queue_len_max = 0;
    }

    /// Request queue entries plus the source matrix descriptor
    pub fn control_register_bits(&self, unified_buffer_bytes: usize) -> usize {
        let blocks_x = bits_required(self.blocks_x_max);
        let blocks_y = bits_required(self.blocks_y_max);
        self.queue_len_max * (blocks_x + blocks_y + bits_required(self.diagonals))
            + bits_required(unified_buffer_bytes)
            + bits_required(self.width_max)
            + bits_required(self.height_max)
            + blocks_x
            + blocks_y
            + bits_required(self.active_columns_max)
            + bits_required(self.idle_rows_max)
            + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Int8Types;
    use pretty_assertions::assert_eq;

    fn staged(array: &SystolicArray<Int8Types>) -> Vec<Vec<i8>> {
        (0..array.height())
            .map(|y| (0..array.width()).map(|x| array.pe(x, y).staged_weight()).collect())
            .collect()
    }

    fn fetch_tile(
        fetcher: &mut WeightFetcher,
        source: &[i8],
        array: &mut SystolicArray<Int8Types>,
        block_x: usize,
        block_y: usize,
    ) {
        fetcher.update_weights(block_x, block_y).unwrap();
        for _ in 0..array.diagonal_count() {
            fetcher.run_iteration(source, array);
            fetcher.update_state();
        }
        assert!(!fetcher.has_busy_signal());
    }

    #[test]
    fn test_partial_column_block_zero_fills() {
        // N=10 over an 8-wide array: the second column block has 2 live columns
        let mut array = SystolicArray::<Int8Types>::new(8, 2, 4);
        for y in 0..2 {
            for x in 0..8 {
                array.pe_mut(x, y).store_weight(99);
            }
        }
        let source: Vec<i8> = (1..=20).collect();
        let mut fetcher = WeightFetcher::new(8, 2);
        fetcher.set_input(10, 2);
        fetcher.update_state();

        fetch_tile(&mut fetcher, &source, &mut array, 1, 0);
        let weights = staged(&array);
        assert_eq!(weights[0], vec![9, 10, 0, 0, 0, 0, 0, 0]);
        assert_eq!(weights[1], vec![19, 20, 0, 0, 0, 0, 0, 0]);
        assert_eq!(fetcher.load_count(), 4);

        fetch_tile(&mut fetcher, &source, &mut array, 0, 0);
        let weights = staged(&array);
        assert_eq!(weights[0], (1..=8).collect::<Vec<i8>>());
        assert_eq!(weights[1], (11..=18).collect::<Vec<i8>>());
    }

    #[test]
    fn test_partial_row_block_leads_with_idle_rows() {
        // K=3 over a 4-high array: row 0 idles so the live rows meet the bottom
        let mut array = SystolicArray::<Int8Types>::new(2, 4, 4);
        let source: Vec<i8> = vec![1, 2, 3, 4, 5, 6];
        let mut fetcher = WeightFetcher::new(2, 4);
        fetcher.set_input(2, 3);
        fetcher.update_state();

        fetch_tile(&mut fetcher, &source, &mut array, 0, 0);
        assert_eq!(staged(&array), vec![vec![0, 0], vec![1, 2], vec![3, 4], vec![5, 6]]);
    }

    #[test]
    fn test_pipelined_requests() {
        let mut array = SystolicArray::<Int8Types>::new(2, 2, 4);
        let source = vec![1i8; 16];
        let mut fetcher = WeightFetcher::new(2, 2);
        fetcher.set_input(4, 4);
        fetcher.update_state();

        fetcher.update_weights(0, 0).unwrap();
        fetcher.run_iteration(&source, &mut array);
        fetcher.update_state();
        fetcher.update_weights(0, 1).unwrap();
        assert_eq!(fetcher.queue().len(), 2);

        fetcher.run_iteration(&source, &mut array);
        fetcher.update_state();
        // diagonal 1 of the first tile plus diagonal 0 of the second
        assert_eq!(fetcher.concurrent_loads_max(), 3);
        assert_eq!(fetcher.concurrent_loads_per_column_max(), 2);

        fetcher.run_iteration(&source, &mut array);
        fetcher.update_state();
        assert_eq!(fetcher.queue().len(), 1);
        assert!(fetcher.has_busy_signal());
        fetcher.run_iteration(&source, &mut array);
        fetcher.update_state();
        assert!(!fetcher.has_busy_signal());
        assert_eq!(fetcher.load_count(), 8);
    }

    #[test]
    fn test_rejects_tile_outside_grid() {
        let mut fetcher = WeightFetcher::new(8, 2);
        fetcher.set_input(10, 2);
        fetcher.update_state();
        assert!(fetcher.update_weights(1, 0).is_ok());
        assert!(matches!(
            fetcher.update_weights(2, 0),
            Err(MpuError::MalformedRequest { .. })
        ));
    }

    #[test]
    fn test_clear_drops_queue() {
        let mut fetcher = WeightFetcher::new(2, 2);
        fetcher.set_input(2, 2);
        fetcher.update_state();
        fetcher.update_weights(0, 0).unwrap();
        fetcher.clear_queue();
        fetcher.update_state();
        assert!(fetcher.queue().is_empty());
        assert!(!fetcher.has_busy_signal());
    }

    #[test]
    fn test_control_register_bits() {
        let mut fetcher = WeightFetcher::new(8, 256);
        fetcher.set_input(10, 300);
        fetcher.update_state();
        fetcher.update_weights(0, 0).unwrap();
        fetcher.update_weights(1, 1).unwrap();
        // blocks 2x2, active columns 2, idle rows 212, 263 diagonals
        let expected = 2 * (1 + 1 + 9) + 10 + 4 + 9 + 1 + 1 + 1 + 8 + 1;
        assert_eq!(fetcher.control_register_bits(1024), expected);
    }
}
