//! Double-buffered accumulator memory below the systolic array
//!
//! Every column owns a slice of two physical buffers. While one buffer sums
//! the partial products of the current output tile, the other holds the
//! previous tile and is drained diagonal by diagonal.

use std::ops::Range;

use crate::error::{MpuError, MpuResult};
use crate::hardware::bits_required;
use crate::numeric::{NumericTypes, Scalar};
use crate::pe::ProcessingElement;

/// When the first weight tile is swapped in relative to the first activations
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum AccumulatorMode {
    /// Weights are resident before computation starts; every update pulse
    /// ends an addition pass
    WeightsPreloaded,
    /// The first update pulse loads the initial tile and is ignored by
    /// columns that have not seen data yet
    #[default]
    WeightsNotPreloaded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ColumnRegisters {
    row_pointer: usize,
    addition_count: usize,
    buffer_select: bool,
    seen_data: bool,
}

pub struct AccumulatorArray<T: NumericTypes> {
    width: usize,
    height: usize,
    buffer_height: usize,
    data: Vec<T::Accumulator>,
    current: Vec<ColumnRegisters>,
    next: Vec<ColumnRegisters>,
    addition_count_max: usize,
    addition_count_max_next: usize,
    mode: AccumulatorMode,
    mode_next: AccumulatorMode,
    data_ready: bool,
    data_ready_next: bool,
    buffer_write_done: bool,
    buffer_write_done_next: bool,
    addition_count_max_seen: usize,
}

impl<T: NumericTypes> AccumulatorArray<T> {
    /// `height` rows of `width` columns, split into two buffers of `height / 2`
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            width,
            height,
            buffer_height: height / 2,
            data: vec![T::Accumulator::default(); width * height],
            current: vec![ColumnRegisters::default(); width],
            next: vec![ColumnRegisters::default(); width],
            addition_count_max: 0,
            addition_count_max_next: 0,
            mode: AccumulatorMode::default(),
            mode_next: AccumulatorMode::default(),
            data_ready: false,
            data_ready_next: false,
            buffer_write_done: false,
            buffer_write_done_next: false,
            addition_count_max_seen: 0,
        }
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn buffer_height(&self) -> usize {
        self.buffer_height
    }

    /// Number of addition passes (K tiles) per output tile
    pub fn set_addition_count_max(&mut self, max: usize) {
        self.addition_count_max_next = max;
        self.addition_count_max_seen = self.addition_count_max_seen.max(max);
    }

    pub fn set_mode(&mut self, mode: AccumulatorMode) {
        self.mode_next = mode;
    }

    /// Clear row pointers, addition counters, buffer selects and flags
    pub fn reset_counters(&mut self) {
        for registers in self.current.iter_mut().chain(self.next.iter_mut()) {
            *registers = ColumnRegisters::default();
        }
        self.data_ready = false;
        self.data_ready_next = false;
        self.buffer_write_done = false;
        self.buffer_write_done_next = false;
    }

    /// One-cycle pulse: the last addition pass of a tile has started landing
    pub fn has_data_ready_signal(&self) -> bool {
        self.data_ready
    }

    /// The last column finished its final addition pass
    pub fn has_buffer_write_done_signal(&self) -> bool {
        self.buffer_write_done
    }

    /// Buffer currently written by `column`
    pub fn buffer_select(&self, column: usize) -> bool {
        self.current[column].buffer_select
    }

    fn address(&self, select: bool, row: usize, column: usize) -> usize {
        let base = if select { self.width * self.buffer_height } else { 0 };
        base + row * self.width + column
    }

    /// Stored value at (`row`, `column`) of buffer `select`
    pub fn value(&self, select: bool, row: usize, column: usize) -> T::Accumulator {
        self.data[self.address(select, row, column)]
    }

    pub fn run_iteration(&mut self, bottom_row: &[ProcessingElement<T>]) {
        self.data_ready_next = false;
        let preloaded = self.mode == AccumulatorMode::WeightsPreloaded;
        let max = self.addition_count_max;

        for (column, pe) in bottom_row.iter().enumerate().take(self.width) {
            let current = self.current[column];
            let valid = pe.has_valid_signal();

            if valid {
                debug_assert!(
                    current.row_pointer < self.buffer_height,
                    "accumulator column {} overflows its buffer",
                    column
                );
                let address = self.address(current.buffer_select, current.row_pointer, column);
                self.data[address] = if current.addition_count != 0 {
                    T::accumulate(self.data[address], pe.sum())
                } else {
                    pe.sum()
                };
                self.next[column].row_pointer = current.row_pointer + 1;
                self.next[column].seen_data = true;
            }

            let next = &mut self.next[column];
            if pe.has_update_weight_signal() && (preloaded || current.seen_data || valid) {
                next.row_pointer = 0;
                next.addition_count = current.addition_count + 1;
            }

            if valid && column == 0 && current.addition_count + 1 == max && current.row_pointer == 0 {
                self.data_ready_next = true;
            }

            if next.addition_count == max {
                if column + 1 == self.width {
                    self.buffer_write_done_next = true;
                }
                next.addition_count = 0;
                next.buffer_select = !current.buffer_select;
            }
        }
    }

    pub fn update_state(&mut self) {
        self.current.copy_from_slice(&self.next);
        self.addition_count_max = self.addition_count_max_next;
        self.mode = self.mode_next;
        self.data_ready = self.data_ready_next;
        self.buffer_write_done = self.buffer_write_done_next;
    }

    /// Copy anti-diagonal `diagonal` of a `block_height`x`block_width` tile
    /// from buffer `select` into `dest` at `dest_offset` (row stride `dest_width`).
    ///
    /// Rows are visited top to bottom, columns right to left. Returns the
    /// range of accumulator columns read.
    #[allow(clippy::too_many_arguments)]
    pub fn read_diagonal(
        &self,
        dest: &mut [T::Accumulator],
        dest_width: usize,
        dest_offset: usize,
        select: bool,
        diagonal: usize,
        block_height: usize,
        block_width: usize,
    ) -> MpuResult<Range<usize>> {
        if block_width == 0 || block_width > self.width {
            return Err(MpuError::invalid_config(format!(
                "readout width {} exceeds the array width {}",
                block_width, self.width
            )));
        }
        if block_height == 0 || block_height > self.buffer_height {
            return Err(MpuError::invalid_config(format!(
                "readout height {} exceeds the accumulator buffer height {}",
                block_height, self.buffer_height
            )));
        }
        if diagonal + 1 >= block_height + block_width {
            return Err(MpuError::out_of_bounds(format!(
                "diagonal {} outside a {}x{} tile",
                diagonal, block_height, block_width
            )));
        }
        let last = dest_offset + (block_height - 1) * dest_width + block_width - 1;
        if last >= dest.len() {
            return Err(MpuError::out_of_bounds(format!(
                "tile readout ends at element {} of a {}-element result",
                last,
                dest.len()
            )));
        }

        let shorter = block_height.min(block_width);
        let longer = block_height.max(block_width);
        let count = if diagonal < longer {
            shorter.min(diagonal + 1)
        } else {
            block_height + block_width - 1 - diagonal
        };
        let row_start = diagonal.saturating_sub(block_width - 1);
        let column_start = diagonal.min(block_width - 1);

        for element in 0..count {
            let row = row_start + element;
            let column = column_start - element;
            dest[dest_offset + row * dest_width + column] = self.value(select, row, column);
        }
        Ok(column_start + 1 - count..column_start + 1)
    }

    /// Row pointer, addition counter, buffer select and first-update latch per column
    pub fn control_register_bits(&self) -> usize {
        let additions = bits_required(self.addition_count_max_seen);
        self.width * (bits_required(self.buffer_height) + additions + 2) + additions + 4
    }

    pub fn data_register_bits(&self) -> usize {
        self.width * self.height * T::Accumulator::bits()
    }

    pub fn reset_max_register_values(&mut self) {
        self.addition_count_max_seen = self.addition_count_max;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numeric::Int8Types;
    use crate::pe::PeSignals;
    use pretty_assertions::assert_eq;

    type Pe = ProcessingElement<Int8Types>;

    fn bottom(values: &[Option<i32>], updates: &[bool]) -> Vec<Pe> {
        values
            .iter()
            .zip(updates)
            .enumerate()
            .map(|(x, (value, &update_weight))| {
                let mut pe = Pe::new(x, 0);
                let mut next = PeSignals {
                    sum: value.unwrap_or(0),
                    valid: value.is_some(),
                    update_weight,
                    ..PeSignals::default()
                };
                pe.update_state(&mut next);
                pe
            })
            .collect()
    }

    fn step(acc: &mut AccumulatorArray<Int8Types>, values: &[Option<i32>], updates: &[bool]) {
        acc.run_iteration(&bottom(values, updates));
        acc.update_state();
    }

    fn configured(width: usize, height: usize, max: usize, mode: AccumulatorMode) -> AccumulatorArray<Int8Types> {
        let mut acc = AccumulatorArray::new(width, height);
        acc.reset_counters();
        acc.set_addition_count_max(max);
        acc.set_mode(mode);
        acc.update_state();
        acc
    }

    #[test]
    fn test_passes_accumulate_in_place() {
        let mut acc = configured(1, 4, 2, AccumulatorMode::WeightsPreloaded);
        step(&mut acc, &[Some(5)], &[false]);
        step(&mut acc, &[Some(6)], &[false]);
        step(&mut acc, &[None], &[true]);
        assert!(!acc.has_data_ready_signal());
        step(&mut acc, &[Some(1)], &[false]);
        assert!(acc.has_data_ready_signal());
        step(&mut acc, &[Some(2)], &[false]);
        assert!(!acc.has_data_ready_signal());
        step(&mut acc, &[None], &[true]);
        assert!(acc.has_buffer_write_done_signal());
        assert!(acc.buffer_select(0));
        assert_eq!(acc.value(false, 0, 0), 6);
        assert_eq!(acc.value(false, 1, 0), 8);
    }

    #[test]
    fn test_drained_buffer_not_overwritten() {
        let mut acc = configured(2, 4, 1, AccumulatorMode::WeightsPreloaded);
        step(&mut acc, &[Some(1), None], &[false, false]);
        step(&mut acc, &[Some(3), Some(2)], &[false, false]);
        step(&mut acc, &[None, Some(4)], &[true, false]);
        // column 0 flips first; column 1 flips one cycle later
        assert!(acc.buffer_select(0));
        assert!(!acc.buffer_select(1));
        step(&mut acc, &[Some(10), None], &[false, true]);
        assert!(acc.buffer_select(1));
        step(&mut acc, &[Some(30), Some(20)], &[false, false]);
        step(&mut acc, &[None, Some(40)], &[false, false]);

        let first: Vec<i32> = (0..2)
            .flat_map(|row| (0..2).map(move |column| (row, column)))
            .map(|(row, column)| acc.value(false, row, column))
            .collect();
        assert_eq!(first, vec![1, 2, 3, 4]);
        assert_eq!(acc.value(true, 0, 0), 10);
        assert_eq!(acc.value(true, 1, 0), 30);
        assert_eq!(acc.value(true, 0, 1), 20);
        assert_eq!(acc.value(true, 1, 1), 40);
    }

    #[test]
    fn test_first_update_latch() {
        let mut acc = configured(1, 4, 2, AccumulatorMode::WeightsNotPreloaded);
        // initial tile load, before any data reached the column
        step(&mut acc, &[None], &[true]);
        step(&mut acc, &[Some(7)], &[false]);
        step(&mut acc, &[None], &[true]);
        step(&mut acc, &[Some(1)], &[false]);
        assert!(acc.has_data_ready_signal());
        assert_eq!(acc.value(false, 0, 0), 8);

        let mut preloaded = configured(1, 4, 2, AccumulatorMode::WeightsPreloaded);
        step(&mut preloaded, &[None], &[true]);
        step(&mut preloaded, &[Some(7)], &[false]);
        // the early pulse counted as a pass, so 7 was added to stale zeros
        assert!(preloaded.has_data_ready_signal());
    }

    #[test]
    fn test_read_diagonal_covers_tile_once() {
        let mut acc = AccumulatorArray::<Int8Types>::new(4, 12);
        for (i, value) in acc.data.iter_mut().enumerate() {
            *value = i as i32;
        }

        for block_height in 1..=6 {
            for block_width in 1..=4 {
                let dest_width = 7;
                let mut dest = vec![-1i32; 9 * dest_width];
                let mut copied = 0;
                for diagonal in 0..block_height + block_width - 1 {
                    let columns = acc
                        .read_diagonal(&mut dest, dest_width, dest_width + 2, true, diagonal, block_height, block_width)
                        .unwrap();
                    assert!(columns.end <= block_width);
                    copied += columns.len();
                }
                assert_eq!(copied, block_height * block_width);
                for row in 0..9 {
                    for column in 0..dest_width {
                        let inside = (1..1 + block_height).contains(&row) && (2..2 + block_width).contains(&column);
                        let expected = if inside {
                            acc.value(true, row - 1, column - 2)
                        } else {
                            -1
                        };
                        assert_eq!(dest[row * dest_width + column], expected);
                    }
                }
            }
        }
    }

    #[test]
    fn test_read_diagonal_element_order() {
        let acc = AccumulatorArray::<Int8Types>::new(3, 8);
        let mut dest = vec![0; 6];
        let columns = acc.read_diagonal(&mut dest, 3, 0, false, 2, 2, 3).unwrap();
        // (0, 2) and (1, 1)
        assert_eq!(columns, 1..3);
        let columns = acc.read_diagonal(&mut dest, 3, 0, false, 3, 2, 3).unwrap();
        assert_eq!(columns, 2..3);
    }

    #[test]
    fn test_read_diagonal_rejects_wide_tiles() {
        let acc = AccumulatorArray::<Int8Types>::new(2, 8);
        let mut dest = vec![0; 16];
        assert!(matches!(
            acc.read_diagonal(&mut dest, 4, 0, false, 0, 2, 3),
            Err(MpuError::InvalidConfiguration { .. })
        ));
        assert!(matches!(
            acc.read_diagonal(&mut dest, 4, 14, false, 0, 2, 2),
            Err(MpuError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_register_bits() {
        let mut acc = AccumulatorArray::<Int8Types>::new(8, 1024);
        acc.set_addition_count_max(4);
        assert_eq!(acc.control_register_bits(), 8 * (9 + 2 + 2) + 2 + 4);
        assert_eq!(acc.data_register_bits(), 8 * 1024 * 32);
    }
}
