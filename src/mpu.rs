//! Matrix processing unit
//!
//! Tiles C = A @ B (A is MxK activations, B is KxN weights) over the systolic
//! array and drives all sub-units with a shared clock: every cycle all units
//! evaluate, then all units commit.
//!
//! Tiling:
//! - A is split into row blocks of one accumulator buffer height, each
//!   replayed once per column block of B
//! - B is split into array-sized tiles, K blocks innermost, so the
//!   accumulator sums all K blocks of an output tile before it flips buffers
//! - finished output tiles are read out diagonal by diagonal while the next
//!   tile accumulates in the other buffer

use rayon::prelude::*;

use crate::accumulator::{AccumulatorArray, AccumulatorMode};
use crate::data_setup::SystolicDataSetupUnit;
use crate::error::{MpuError, MpuResult};
use crate::hardware::{bits_required, MpuConfig};
use crate::memory::{MemoryManagementUnit, Region};
use crate::numeric::{
    encode_slice, Int16Types, Int32Types, Int8Types, NumericConfig, NumericTypes,
    Scalar, UInt8Types,
};
use crate::statistics::StatisticsEntry;
use crate::systolic_array::SystolicArray;
use crate::tiling::BlockTiling;
use crate::weight_fetcher::WeightFetcher;

/// Cycles spent priming the units before the steady-state loop
pub const STARTUP_ITERATIONS: u64 = 4;

/// Weight matrix name reserved by [`MatrixProcessingUnit::multiply`]
pub const SCRATCH_WEIGHTS: &str = "<multiply>";

pub type StatisticsCallback = Box<dyn FnMut(StatisticsEntry) + Send>;

/// Readout of one finished output tile
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ReadOperation {
    row: usize,
    column: usize,
    select: bool,
    height: usize,
    width: usize,
    diagonal: usize,
}

impl ReadOperation {
    fn is_done(&self) -> bool {
        self.diagonal == self.height + self.width - 1
    }
}

/// Advance a (x, y) tile coordinate, x innermost
fn advance(x: &mut usize, y: &mut usize, x_blocks: usize) {
    if *x + 1 < x_blocks {
        *x += 1;
    } else {
        *x = 0;
        *y += 1;
    }
}

pub struct MatrixProcessingUnit<T: NumericTypes> {
    config: MpuConfig,
    mmu: MemoryManagementUnit,
    array: SystolicArray<T>,
    data_setup: SystolicDataSetupUnit,
    weight_fetcher: WeightFetcher,
    accumulator: AccumulatorArray<T>,
    statistics_callback: Option<StatisticsCallback>,

    iteration_count: u64,
    stalled_iteration_count: u64,
    read_operation_count: usize,

    accumulator_load_count: usize,
    accumulator_concurrent_loads_max: usize,
    accumulator_concurrent_loads_per_column_max: usize,

    read_queue_len_max: usize,
    activation_blocks_max: usize,
    activation_last_rows_max: usize,
    weight_blocks_x_max: usize,
    weight_blocks_y_max: usize,
    weight_last_columns_max: usize,
    input_count_max: usize,
}

impl<T: NumericTypes> MatrixProcessingUnit<T> {
    pub fn new(config: MpuConfig) -> MpuResult<Self> {
        config.validate()?;
        let width = config.array_width;
        let height = config.array_height;

        log::debug!(
            "MPU {}x{} ({}), FIFO depth {}, accumulator height {}",
            width,
            height,
            T::NAME,
            config.activation_fifo_depth,
            config.accumulator_height
        );

        Ok(Self {
            mmu: MemoryManagementUnit::new(config.max_buffer_bytes, config.dynamic_resize),
            array: SystolicArray::new(width, height, config.activation_fifo_depth),
            data_setup: SystolicDataSetupUnit::new(height),
            weight_fetcher: WeightFetcher::new(width, height),
            accumulator: AccumulatorArray::new(width, config.accumulator_height),
            statistics_callback: None,
            iteration_count: 0,
            stalled_iteration_count: 0,
            read_operation_count: 0,
            accumulator_load_count: 0,
            accumulator_concurrent_loads_max: 0,
            accumulator_concurrent_loads_per_column_max: 0,
            read_queue_len_max: 0,
            activation_blocks_max: 0,
            activation_last_rows_max: 0,
            weight_blocks_x_max: 0,
            weight_blocks_y_max: 0,
            weight_last_columns_max: 0,
            input_count_max: 0,
            config,
        })
    }

    pub fn config(&self) -> &MpuConfig {
        &self.config
    }

    pub fn mmu(&self) -> &MemoryManagementUnit {
        &self.mmu
    }

    pub fn mmu_mut(&mut self) -> &mut MemoryManagementUnit {
        &mut self.mmu
    }

    pub fn array(&self) -> &SystolicArray<T> {
        &self.array
    }

    pub fn store_weight_matrix(
        &mut self,
        name: &str,
        values: &[T::Weight],
        rows: usize,
        columns: usize,
    ) -> MpuResult<()> {
        self.mmu.store_weight_matrix(name, values, rows, columns)
    }

    pub fn store_activation_matrix(
        &mut self,
        values: &[T::Activation],
        rows: usize,
        columns: usize,
    ) -> MpuResult<()> {
        self.mmu.store_activation_matrix(values, rows, columns)
    }

    pub fn load_result_matrix(&self) -> MpuResult<Vec<T::Accumulator>> {
        self.mmu.load_result_matrix()
    }

    pub fn register_statistics_callback(&mut self, callback: StatisticsCallback) {
        self.statistics_callback = Some(callback);
    }

    /// Multiply the stored activation matrix with the named weight matrix.
    ///
    /// The result lands in the result space of the unified buffer and a
    /// statistics entry is handed to the registered callback.
    pub fn run_multiplication_named(&mut self, name: &str) -> MpuResult<()> {
        let weights = self.mmu.weight_matrix_region(name)?;
        let activation = self.mmu.activation_matrix_region();
        if activation.rows == 0 {
            return Err(MpuError::malformed("no activation matrix stored"));
        }
        if activation.columns != weights.rows {
            return Err(MpuError::malformed(format!(
                "stored activation matrix has {} columns, weight matrix '{}' has {} rows",
                activation.columns, name, weights.rows
            )));
        }

        let (m, n, k) = (activation.rows, weights.columns, activation.columns);
        self.mmu.set_result_matrix_size::<T::Accumulator>(m, n)?;
        let result = self.mmu.result_matrix_region();
        self.run_multiplication(m, n, k, activation.region, weights.region, result.region)?;

        let entry = self.statistics_entry(name, m, n, k);
        if let Some(callback) = self.statistics_callback.as_mut() {
            callback(entry);
        }
        Ok(())
    }

    /// Multiply operands already placed in the unified buffer.
    ///
    /// `a`, `b` and `c` are byte regions holding the row-major MxK, KxN and
    /// MxN matrices; they are validated before any cycle runs.
    pub fn run_multiplication(
        &mut self,
        m: usize,
        n: usize,
        k: usize,
        a: Region,
        b: Region,
        c: Region,
    ) -> MpuResult<()> {
        if m == 0 || n == 0 || k == 0 {
            return Err(MpuError::malformed(format!(
                "cannot multiply matrices with a zero dimension (M={}, N={}, K={})",
                m, n, k
            )));
        }
        for (region, rows, columns, bytes, what) in [
            (a, m, k, T::Activation::BYTES, "activation"),
            (b, k, n, T::Weight::BYTES, "weight"),
            (c, m, n, T::Accumulator::BYTES, "result"),
        ] {
            let expected = rows
                .checked_mul(columns)
                .and_then(|elements| elements.checked_mul(bytes))
                .ok_or_else(|| {
                    MpuError::malformed(format!(
                        "{}x{} {} matrix does not fit the address space",
                        rows, columns, what
                    ))
                })?;
            self.mmu.check_region(region)?;
            if region.len != expected {
                return Err(MpuError::malformed(format!(
                    "{} region holds {} bytes, shape needs {}",
                    what, region.len, expected
                )));
            }
        }
        MemoryManagementUnit::check_disjoint(a, b)?;
        MemoryManagementUnit::check_disjoint(a, c)?;
        MemoryManagementUnit::check_disjoint(b, c)?;

        let activations: Vec<T::Activation> = self.mmu.read_matrix(a)?;
        let weights: Vec<T::Weight> = self.mmu.read_matrix(b)?;
        let result = self.execute(&activations, &weights, m, n, k)?;
        self.mmu.store_to_unified_buffer(c.offset, &encode_slice(&result))?;

        if self.config.verify {
            let expected = reference_matmul::<T>(&activations, &weights, m, n, k);
            check_result::<T>(&expected, &result, n)?;
            log::debug!("result verified against reference product");
        }
        Ok(())
    }

    /// Multiply `a` (MxK) with `b` (KxN) through the unified buffer
    pub fn multiply(
        &mut self,
        a: &[T::Activation],
        b: &[T::Weight],
        m: usize,
        n: usize,
        k: usize,
    ) -> MpuResult<Vec<T::Accumulator>> {
        if self.mmu.contains_weight_matrix(SCRATCH_WEIGHTS) {
            self.mmu.remove_weight_matrix(SCRATCH_WEIGHTS)?;
        }
        self.mmu.store_weight_matrix(SCRATCH_WEIGHTS, b, k, n)?;
        let outcome = self
            .mmu
            .store_activation_matrix(a, m, k)
            .and_then(|_| self.run_multiplication_named(SCRATCH_WEIGHTS));
        let result = outcome.and_then(|_| self.mmu.load_result_matrix());
        let cleanup = self.mmu.remove_weight_matrix(SCRATCH_WEIGHTS);
        let result = result?;
        cleanup?;
        Ok(result)
    }

    /// Cycle-accurate tiled multiplication of decoded operands
    fn execute(
        &mut self,
        a: &[T::Activation],
        b: &[T::Weight],
        m: usize,
        n: usize,
        k: usize,
    ) -> MpuResult<Vec<T::Accumulator>> {
        let width = self.config.array_width;
        let height = self.config.array_height;
        let buffer_height = self.accumulator.buffer_height();

        let weight_columns = BlockTiling::new(n, width);
        let weight_rows = BlockTiling::new(k, height);
        let activation_rows = BlockTiling::new(m, buffer_height);
        let (wbx, wby, aby) = (weight_columns.blocks, weight_rows.blocks, activation_rows.blocks);

        self.weight_blocks_x_max = self.weight_blocks_x_max.max(wbx);
        self.weight_blocks_y_max = self.weight_blocks_y_max.max(wby);
        self.weight_last_columns_max = self.weight_last_columns_max.max(weight_columns.last);
        self.activation_blocks_max = self.activation_blocks_max.max(aby);
        self.activation_last_rows_max = self.activation_last_rows_max.max(activation_rows.last);

        log::debug!(
            "multiplying {}x{} @ {}x{}: {}x{} weight tiles, {} activation blocks",
            m,
            k,
            k,
            n,
            wbx,
            wby,
            aby
        );

        let mut result = vec![T::Accumulator::default(); m * n];

        // startup
        self.array.reset();
        self.data_setup.reset();
        self.weight_fetcher.set_input(n, k);
        self.weight_fetcher.clear_queue();
        self.weight_fetcher.update_state();

        self.data_setup
            .add_input_matrix(0, k, activation_rows.size_of(0), wbx);
        let mut next_activation_block = 1;

        self.weight_fetcher.update_weights(0, 0)?;
        self.weight_fetcher.update_state();
        for _ in 0..2 {
            self.weight_fetcher.run_iteration(b, &mut self.array);
            self.weight_fetcher.update_state();
        }

        self.array.set_update_weights_signal(true);
        self.array.update_state();
        self.array.read_update_weight_signals();
        self.array.update_state();

        for _ in 0..STARTUP_ITERATIONS {
            self.data_setup.run_iteration(a, self.array.fifos_mut());
            self.data_setup.update_state();
        }

        self.accumulator.reset_counters();
        self.accumulator.set_mode(AccumulatorMode::WeightsNotPreloaded);
        self.accumulator.set_addition_count_max(wby);
        self.accumulator.update_state();
        self.array.reset_iteration_count();

        // steady state
        let watchdog = 2 * (STARTUP_ITERATIONS as usize + m * wbx * wby + height + width + 1) + 64;
        let mut total = STARTUP_ITERATIONS;
        let mut inputs = 0usize;
        let (mut weight_x, mut weight_y) = (0usize, 0usize);
        let mut weight_row_block = 0usize;
        let mut active_row_block = 0usize;
        let (mut read_x, mut read_y) = (0usize, 0usize);
        let (mut done_x, mut done_y) = (0usize, 0usize);
        let mut select = false;
        let mut reads: Vec<ReadOperation> = Vec::new();
        let mut column_loads = vec![0usize; width];

        loop {
            self.data_setup.run_iteration(a, self.array.fifos_mut());
            self.weight_fetcher.run_iteration(b, &mut self.array);
            self.array.run_iteration();
            self.accumulator.run_iteration(self.array.bottom_row());

            // all rows of the current block entered: swap in the next weight tile
            if active_row_block != aby && inputs == activation_rows.size_of(active_row_block) {
                active_row_block = weight_row_block;
                if active_row_block != aby {
                    self.array.set_update_weights_signal(true);
                    inputs = 0;
                }
            }

            if !self.data_setup.has_busy_signal() && next_activation_block != aby {
                self.data_setup.add_input_matrix(
                    activation_rows.start_of(next_activation_block) * k,
                    k,
                    activation_rows.size_of(next_activation_block),
                    wbx,
                );
                next_activation_block += 1;
            }

            // one cycle ahead of the swap: queue the tile after it
            if weight_row_block != aby && inputs + 1 == activation_rows.size_of(weight_row_block) {
                if weight_y + 1 != wby {
                    weight_y += 1;
                } else {
                    weight_y = 0;
                    advance(&mut weight_x, &mut weight_row_block, wbx);
                }
                if weight_row_block != aby {
                    log::trace!(
                        "weight tile ({}, {}) of activation block {}",
                        weight_x,
                        weight_y,
                        weight_row_block
                    );
                    self.weight_fetcher.update_weights(weight_x, weight_y)?;
                }
            }

            if self.accumulator.has_data_ready_signal() && read_y != aby {
                reads.push(ReadOperation {
                    row: activation_rows.start_of(read_y),
                    column: weight_columns.start_of(read_x),
                    select,
                    height: activation_rows.size_of(read_y),
                    width: weight_columns.size_of(read_x),
                    diagonal: 0,
                });
                self.read_operation_count += 1;
                self.read_queue_len_max = self.read_queue_len_max.max(reads.len());
                select = !select;
                advance(&mut read_x, &mut read_y, wbx);
            }

            let mut cycle_loads = 0;
            column_loads.iter_mut().for_each(|c| *c = 0);
            for op in reads.iter_mut() {
                let columns = self.accumulator.read_diagonal(
                    &mut result,
                    n,
                    op.row * n + op.column,
                    op.select,
                    op.diagonal,
                    op.height,
                    op.width,
                )?;
                cycle_loads += columns.len();
                for column in columns {
                    column_loads[column] += 1;
                }
                op.diagonal += 1;
            }
            reads.retain(|op| {
                if op.is_done() {
                    log::trace!("output tile at ({}, {}) read out", op.row, op.column);
                    advance(&mut done_x, &mut done_y, wbx);
                    false
                } else {
                    true
                }
            });
            self.accumulator_load_count += cycle_loads;
            self.accumulator_concurrent_loads_max = self.accumulator_concurrent_loads_max.max(cycle_loads);
            let column_max = column_loads.iter().copied().max().unwrap_or(0);
            self.accumulator_concurrent_loads_per_column_max =
                self.accumulator_concurrent_loads_per_column_max.max(column_max);

            self.data_setup.update_state();
            self.weight_fetcher.update_state();
            self.array.update_state();
            self.accumulator.update_state();

            inputs += 1;
            total += 1;
            self.input_count_max = self.input_count_max.max(inputs);

            if done_y == aby {
                break;
            }
            if total as usize > watchdog {
                return Err(MpuError::invalid_config(format!(
                    "pipeline did not drain within {} iterations",
                    watchdog
                )));
            }
        }

        self.iteration_count += total;
        self.stalled_iteration_count += STARTUP_ITERATIONS;
        log::debug!("multiplication finished after {} iterations", total);
        Ok(result)
    }

    /// Total iterations since the last reset, startup cycles included
    pub fn iteration_count(&self) -> u64 {
        self.iteration_count
    }

    pub fn stalled_iteration_count(&self) -> u64 {
        self.stalled_iteration_count
    }

    /// Accumulator readouts issued since the last metrics reset
    pub fn read_operation_count(&self) -> usize {
        self.read_operation_count
    }

    pub fn accumulator_load_count(&self) -> usize {
        self.accumulator_load_count
    }

    pub fn unified_buffer_len(&self) -> usize {
        self.mmu.buffer_len()
    }

    pub fn diagonals(&self) -> usize {
        self.config.diagonals()
    }

    pub fn activation_fifo_depth(&self) -> usize {
        self.config.activation_fifo_depth
    }

    pub fn accumulator_buffer_height(&self) -> usize {
        self.accumulator.buffer_height()
    }

    pub fn reset_iteration_counts(&mut self) {
        self.iteration_count = 0;
        self.stalled_iteration_count = 0;
    }

    pub fn reset_data_movement_and_footprint_metrics(&mut self) {
        self.read_operation_count = 0;
        self.accumulator_load_count = 0;
        self.accumulator_concurrent_loads_max = 0;
        self.accumulator_concurrent_loads_per_column_max = 0;
        self.read_queue_len_max = 0;
        self.activation_blocks_max = 0;
        self.activation_last_rows_max = 0;
        self.weight_blocks_x_max = 0;
        self.weight_blocks_y_max = 0;
        self.weight_last_columns_max = 0;
        self.input_count_max = 0;

        self.array.reset_execution_metrics();
        self.data_setup.reset_load_count();
        self.data_setup.reset_max_register_values();
        self.weight_fetcher.reset_load_counts();
        self.weight_fetcher.reset_max_register_values();
        self.accumulator.reset_max_register_values();
    }

    /// Tile coordinates, read queue entries and the input counter
    pub fn control_register_bits(&self) -> usize {
        let width = self.config.array_width;
        let buffer_height = self.accumulator.buffer_height();
        let read_operation_bits = bits_required(buffer_height * self.activation_blocks_max)
            + bits_required(width * self.weight_blocks_x_max)
            + bits_required(buffer_height)
            + bits_required(width)
            + bits_required(self.config.diagonals())
            + 1;

        self.read_queue_len_max * read_operation_bits
            + 5 * bits_required(self.activation_blocks_max)
            + bits_required(self.activation_last_rows_max)
            + 3 * bits_required(self.weight_blocks_x_max)
            + bits_required(self.weight_blocks_y_max)
            + bits_required(self.weight_last_columns_max)
            + bits_required(self.input_count_max)
            + 1
    }

    /// Snapshot of all counters since the last reset
    pub fn statistics_entry(&self, name: &str, m: usize, n: usize, k: usize) -> StatisticsEntry {
        let memory_bytes = self.mmu.memory_usage_max_bytes();
        StatisticsEntry {
            operation_name: name.to_string(),
            m,
            n,
            k,
            systolic_array_height: self.config.array_height,
            systolic_array_width: self.config.array_width,
            activation_fifo_depth: self.config.activation_fifo_depth,
            accumulator_array_height: self.config.accumulator_height,
            mpu_control_register_bits: self.control_register_bits(),
            sdsu_control_register_bits: self.data_setup.control_register_bits(memory_bytes),
            activation_fifo_control_register_bits: self.array.control_register_bits_activation_fifos(),
            weight_fetcher_control_register_bits: self.weight_fetcher.control_register_bits(memory_bytes),
            systolic_array_control_register_bits: self.array.control_register_bits_systolic_array(),
            accumulator_array_control_register_bits: self.accumulator.control_register_bits(),
            activation_fifo_data_register_bits: self.array.data_register_bits_activation_fifos(),
            systolic_array_data_register_bits: self.array.data_register_bits_systolic_array(),
            accumulator_array_data_register_bits: self.accumulator.data_register_bits(),
            unified_buffer_bits: self.mmu.memory_usage_max_bits(),
            intra_pe_data_movements: self.array.intra_pe_data_movements(),
            inter_pe_data_movements: self.array.inter_pe_data_movements(),
            sdsu_unified_buffer_loads: self.data_setup.load_count(),
            weight_fetcher_unified_buffer_loads: self.weight_fetcher.load_count(),
            weight_fetcher_concurrent_loads_max: self.weight_fetcher.concurrent_loads_max(),
            weight_fetcher_concurrent_loads_per_column_max: self
                .weight_fetcher
                .concurrent_loads_per_column_max(),
            accumulator_array_loads: self.accumulator_load_count,
            accumulator_array_concurrent_loads_max: self.accumulator_concurrent_loads_max,
            accumulator_array_concurrent_loads_per_column_max: self
                .accumulator_concurrent_loads_per_column_max,
            total_iterations: self.iteration_count,
            stalled_iterations: self.stalled_iteration_count,
            multiplications_with_weight_zero: self.array.multiplications_with_weight_zero(),
        }
    }
}

/// Dense C = A @ B with the same wraparound arithmetic as the PEs
pub fn reference_matmul<T: NumericTypes>(
    a: &[T::Activation],
    b: &[T::Weight],
    m: usize,
    n: usize,
    k: usize,
) -> Vec<T::Accumulator> {
    let mut c = vec![T::Accumulator::default(); m * n];
    c.par_chunks_mut(n).enumerate().for_each(|(i, row)| {
        for (j, value) in row.iter_mut().enumerate() {
            *value = (0..k).fold(T::Accumulator::default(), |acc, p| {
                T::mac(a[i * k + p], b[p * n + j], acc)
            });
        }
    });
    c
}

/// Compare a result against the reference product, reporting the first mismatch
pub fn check_result<T: NumericTypes>(
    expected: &[T::Accumulator],
    actual: &[T::Accumulator],
    n: usize,
) -> MpuResult<()> {
    let mismatches: Vec<usize> = expected
        .iter()
        .zip(actual)
        .enumerate()
        .filter(|(_, (e, a))| e != a)
        .map(|(index, _)| index)
        .collect();

    match mismatches.first() {
        None if expected.len() == actual.len() => Ok(()),
        None => Err(MpuError::ResultMismatch {
            row: actual.len().min(expected.len()) / n.max(1),
            column: 0,
            expected: format!("{} elements", expected.len()),
            actual: format!("{} elements", actual.len()),
            mismatches: expected.len().abs_diff(actual.len()),
        }),
        Some(&index) => {
            log::debug!("{} result elements differ from the reference", mismatches.len());
            Err(MpuError::ResultMismatch {
                row: index / n,
                column: index % n,
                expected: expected[index].to_string(),
                actual: actual[index].to_string(),
                mismatches: mismatches.len(),
            })
        }
    }
}

/// MPU instantiated for the numeric types selected in the configuration
pub enum AnyMpu {
    Int8(MatrixProcessingUnit<Int8Types>),
    Int16(MatrixProcessingUnit<Int16Types>),
    Int32(MatrixProcessingUnit<Int32Types>),
    UInt8(MatrixProcessingUnit<UInt8Types>),
}

macro_rules! dispatch {
    ($self:expr, $mpu:ident => $body:expr) => {
        match $self {
            AnyMpu::Int8($mpu) => $body,
            AnyMpu::Int16($mpu) => $body,
            AnyMpu::Int32($mpu) => $body,
            AnyMpu::UInt8($mpu) => $body,
        }
    };
}

fn convert<S: Scalar>(values: &[i64]) -> Vec<S> {
    values.iter().map(|&v| S::from_i64_wrapping(v)).collect()
}

fn widen<S: Scalar>(values: &[S]) -> Vec<i64> {
    values.iter().map(|v| v.to_i64()).collect()
}

impl AnyMpu {
    pub fn new(config: MpuConfig) -> MpuResult<Self> {
        Ok(match config.numeric {
            NumericConfig::Int8 => AnyMpu::Int8(MatrixProcessingUnit::new(config)?),
            NumericConfig::Int16 => AnyMpu::Int16(MatrixProcessingUnit::new(config)?),
            NumericConfig::Int32 => AnyMpu::Int32(MatrixProcessingUnit::new(config)?),
            NumericConfig::UInt8 => AnyMpu::UInt8(MatrixProcessingUnit::new(config)?),
        })
    }

    pub fn numeric(&self) -> NumericConfig {
        match self {
            AnyMpu::Int8(_) => NumericConfig::Int8,
            AnyMpu::Int16(_) => NumericConfig::Int16,
            AnyMpu::Int32(_) => NumericConfig::Int32,
            AnyMpu::UInt8(_) => NumericConfig::UInt8,
        }
    }

    /// Store a weight matrix, truncating values to the weight type
    pub fn store_weight_matrix(
        &mut self,
        name: &str,
        values: &[i64],
        rows: usize,
        columns: usize,
    ) -> MpuResult<()> {
        dispatch!(self, mpu => mpu.store_weight_matrix(name, &convert(values), rows, columns))
    }

    /// Store the activation matrix, truncating values to the activation type
    pub fn store_activation_matrix(&mut self, values: &[i64], rows: usize, columns: usize) -> MpuResult<()> {
        dispatch!(self, mpu => mpu.store_activation_matrix(&convert(values), rows, columns))
    }

    pub fn run_multiplication_named(&mut self, name: &str) -> MpuResult<()> {
        dispatch!(self, mpu => mpu.run_multiplication_named(name))
    }

    pub fn load_result_matrix(&self) -> MpuResult<Vec<i64>> {
        dispatch!(self, mpu => mpu.load_result_matrix().map(|values| widen(&values)))
    }

    pub fn multiply(&mut self, a: &[i64], b: &[i64], m: usize, n: usize, k: usize) -> MpuResult<Vec<i64>> {
        dispatch!(self, mpu => mpu
            .multiply(&convert(a), &convert(b), m, n, k)
            .map(|values| widen(&values)))
    }

    /// Dense reference product for the selected numeric types
    pub fn reference(&self, a: &[i64], b: &[i64], m: usize, n: usize, k: usize) -> Vec<i64> {
        fn typed<T: NumericTypes>(a: &[i64], b: &[i64], m: usize, n: usize, k: usize) -> Vec<i64> {
            widen(&reference_matmul::<T>(&convert(a), &convert(b), m, n, k))
        }
        match self {
            AnyMpu::Int8(_) => typed::<Int8Types>(a, b, m, n, k),
            AnyMpu::Int16(_) => typed::<Int16Types>(a, b, m, n, k),
            AnyMpu::Int32(_) => typed::<Int32Types>(a, b, m, n, k),
            AnyMpu::UInt8(_) => typed::<UInt8Types>(a, b, m, n, k),
        }
    }

    pub fn register_statistics_callback(&mut self, callback: StatisticsCallback) {
        dispatch!(self, mpu => mpu.register_statistics_callback(callback))
    }

    pub fn iteration_count(&self) -> u64 {
        dispatch!(self, mpu => mpu.iteration_count())
    }

    pub fn statistics_entry(&self, name: &str, m: usize, n: usize, k: usize) -> StatisticsEntry {
        dispatch!(self, mpu => mpu.statistics_entry(name, m, n, k))
    }

    pub fn memory_layout(&self) -> String {
        dispatch!(self, mpu => mpu.mmu().layout().to_string())
    }

    pub fn reset_metrics(&mut self) {
        dispatch!(self, mpu => {
            mpu.reset_iteration_counts();
            mpu.reset_data_movement_and_footprint_metrics();
        })
    }
}
