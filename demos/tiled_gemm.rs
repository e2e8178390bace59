//! Example: Tiled Matrix Multiplication
//!
//! Demonstrates how the MPU handles operands larger than the systolic
//! array: K is split into weight tile rows that accumulate in place, N into
//! output tiles and M into accumulator-sized row blocks.
//!
//! Run with: cargo run --example tiled_gemm

use mpu_sim::{reference_matmul, BlockTiling, Int16Types, MatrixProcessingUnit, MpuConfig, NumericConfig};

fn main() {
    println!("=== Tiled Matrix Multiplication ===\n");

    let config = MpuConfig::new(4, 4, 8, 8).with_numeric(NumericConfig::Int16);
    let (m, n, k) = (13, 10, 9);

    let columns = BlockTiling::new(n, config.array_width);
    let rows = BlockTiling::new(k, config.array_height);
    let blocks = BlockTiling::new(m, config.accumulator_buffer_height());

    println!("Array size: {}x{}", config.array_width, config.array_height);
    println!("Matrix sizes: A=({},{}), B=({},{})\n", m, k, k, n);
    println!("Tiling analysis:");
    println!("  - Weight tile columns: {} (last {} wide)", columns.blocks, columns.last);
    println!("  - Weight tile rows: {} (last {} high)", rows.blocks, rows.last);
    println!("  - Activation row blocks: {} (last {} rows)", blocks.blocks, blocks.last);
    println!("  - Output tiles: {}\n", columns.blocks * blocks.blocks);

    let a: Vec<i16> = (0..m * k).map(|i| (i as i16 * 37) % 201 - 100).collect();
    let b: Vec<i16> = (0..k * n).map(|i| (i as i16 * 53) % 151 - 75).collect();

    let mut mpu = MatrixProcessingUnit::<Int16Types>::new(config).unwrap();
    let c = mpu.multiply(&a, &b, m, n, k).unwrap();
    let expected = reference_matmul::<Int16Types>(&a, &b, m, n, k);

    println!("Iterations: {}", mpu.iteration_count());
    println!("Accumulator readouts: {}", mpu.read_operation_count());
    println!("Matches reference: {}\n", c == expected);

    println!("Result (first 3 rows):");
    for row in c.chunks(n).take(3) {
        println!("  {:?}", row);
    }
}
