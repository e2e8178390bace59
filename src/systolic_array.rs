//! Grid of processing elements with one activation FIFO per row
//!
//! The grid is a flat row-major arena; neighbours are found by index. Each
//! cycle is split into [`SystolicArray::run_iteration`], which writes only the
//! next-state plane, and [`SystolicArray::update_state`], which latches it.

use rayon::prelude::*;

use crate::fifo::ActivationFifo;
use crate::hardware::bits_required;
use crate::numeric::{NumericTypes, Scalar};
use crate::pe::{PeMetrics, PeSignals, ProcessingElement};

pub struct SystolicArray<T: NumericTypes> {
    width: usize,
    height: usize,
    fifo_depth: usize,
    grid: Vec<ProcessingElement<T>>,
    next: Vec<PeSignals<T>>,
    fifos: Vec<ActivationFifo<T::Activation>>,
    /// PE positions (x, y) grouped by x + y
    diagonals: Vec<Vec<(usize, usize)>>,
    iteration_count: usize,
    metrics: PeMetrics,
}

impl<T: NumericTypes> SystolicArray<T> {
    pub fn new(width: usize, height: usize, fifo_depth: usize) -> Self {
        let mut grid = Vec::with_capacity(width * height);
        let mut diagonals = vec![Vec::new(); width + height - 1];
        for y in 0..height {
            for x in 0..width {
                grid.push(ProcessingElement::new(x, y));
                diagonals[x + y].push((x, y));
            }
        }

        Self {
            width,
            height,
            fifo_depth,
            grid,
            next: vec![PeSignals::default(); width * height],
            fifos: (0..height).map(|_| ActivationFifo::new(fifo_depth)).collect(),
            diagonals,
            iteration_count: 0,
            metrics: PeMetrics::default(),
        }
    }

    fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    pub fn width(&self) -> usize {
        self.width
    }

    pub fn height(&self) -> usize {
        self.height
    }

    pub fn fifo_depth(&self) -> usize {
        self.fifo_depth
    }

    pub fn diagonal_count(&self) -> usize {
        self.diagonals.len()
    }

    /// PEs on anti-diagonal `d`, ordered by row
    pub fn diagonal(&self, d: usize) -> &[(usize, usize)] {
        &self.diagonals[d]
    }

    /// Stage `weight_at(x, y)` into the write register of every PE on diagonal `d`
    pub fn store_weights_on_diagonal(
        &mut self,
        d: usize,
        mut weight_at: impl FnMut(usize, usize) -> T::Weight,
    ) {
        let width = self.width;
        for &(x, y) in &self.diagonals[d] {
            self.grid[y * width + x].store_weight(weight_at(x, y));
        }
    }

    pub fn pe(&self, x: usize, y: usize) -> &ProcessingElement<T> {
        &self.grid[self.index(x, y)]
    }

    pub fn pe_mut(&mut self, x: usize, y: usize) -> &mut ProcessingElement<T> {
        let index = self.index(x, y);
        &mut self.grid[index]
    }

    /// PEs feeding the accumulator array
    pub fn bottom_row(&self) -> &[ProcessingElement<T>] {
        &self.grid[(self.height - 1) * self.width..]
    }

    pub fn fifos(&self) -> &[ActivationFifo<T::Activation>] {
        &self.fifos
    }

    pub fn fifos_mut(&mut self) -> &mut [ActivationFifo<T::Activation>] {
        &mut self.fifos
    }

    pub fn iteration_count(&self) -> usize {
        self.iteration_count
    }

    pub fn reset_iteration_count(&mut self) {
        self.iteration_count = 0;
    }

    /// Drive the update-weight input of the top-left PE
    pub fn set_update_weights_signal(&mut self, value: bool) {
        self.next[0].update_weight = value;
    }

    /// Clear all signals and FIFOs; weight registers are left untouched
    pub fn reset(&mut self) {
        for (pe, next) in self.grid.iter_mut().zip(self.next.iter_mut()) {
            *next = PeSignals::default();
            pe.update_state(next);
        }
        for fifo in &mut self.fifos {
            fifo.clear();
        }
        self.iteration_count = 0;
    }

    /// Propagate update-weight pulses one anti-diagonal outwards
    pub fn read_update_weight_signals(&mut self) {
        for y in 0..self.height {
            for x in 0..self.width {
                let index = self.index(x, y);
                let left = (x > 0).then(|| &self.grid[index - 1]);
                let upper = (y > 0).then(|| &self.grid[index - self.width]);
                if let Some(signal) = self.grid[index].read_update_weight_signal(left, upper) {
                    self.next[index].update_weight = signal;
                }
            }
        }
    }

    /// Evaluate one cycle across the grid, rows in parallel
    pub fn run_iteration(&mut self) {
        if self.iteration_count < self.height {
            let index = self.index(0, self.iteration_count);
            self.next[index].fifo_input_enabled = true;
        }

        // The left-border PE pops only from a non-empty FIFO, so the enable flag stays raised
        for (row, fifo) in self.fifos.iter().enumerate() {
            if fifo.is_empty_next_iteration() && self.grid[row * self.width].signals().fifo_input_enabled {
                log::trace!("activation FIFO {} drains next iteration", row);
            }
        }

        self.read_update_weight_signals();

        let width = self.width;
        let grid = &self.grid;
        let row_metrics: Vec<PeMetrics> = self
            .next
            .par_chunks_mut(width)
            .zip(self.fifos.par_iter_mut())
            .enumerate()
            .map(|(y, (row_next, fifo))| {
                let mut metrics = PeMetrics::default();
                for (x, next) in row_next.iter_mut().enumerate() {
                    let index = y * width + x;
                    let left = (x > 0).then(|| &grid[index - 1]);
                    let upper = (y > 0).then(|| &grid[index - width]);
                    grid[index].compute_sum(left, upper, fifo, next, &mut metrics);
                }
                metrics
            })
            .collect();

        for metrics in &row_metrics {
            self.metrics.merge(metrics);
        }
    }

    /// Clock edge for every PE
    pub fn update_state(&mut self) {
        for (pe, next) in self.grid.iter_mut().zip(self.next.iter_mut()) {
            pe.update_state(next);
        }
        self.iteration_count += 1;
    }

    pub fn intra_pe_data_movements(&self) -> usize {
        self.metrics.intra_pe_data_movements
    }

    pub fn inter_pe_data_movements(&self) -> usize {
        self.metrics.inter_pe_data_movements
    }

    pub fn multiplications_with_weight_zero(&self) -> usize {
        self.metrics.multiplications_with_weight_zero
    }

    pub fn reset_execution_metrics(&mut self) {
        self.metrics = PeMetrics::default();
    }

    /// Two weight registers, activation and partial sum per PE
    pub fn data_register_bits_systolic_array(&self) -> usize {
        self.width
            * self.height
            * (2 * T::Weight::bits() + T::Activation::bits() + T::Accumulator::bits())
    }

    /// Valid, update-weight and FIFO-enable bits per PE plus the iteration counter
    pub fn control_register_bits_systolic_array(&self) -> usize {
        self.height * (3 * self.width + 1) + u64::BITS as usize + 1
    }

    pub fn data_register_bits_activation_fifos(&self) -> usize {
        self.height * self.fifo_depth * T::Activation::bits()
    }

    /// Read and write pointer per FIFO
    pub fn control_register_bits_activation_fifos(&self) -> usize {
        bits_required(self.fifo_depth) * 2 * self.height
    }
}
