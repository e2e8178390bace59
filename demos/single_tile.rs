//! Example: Single Tile Multiplication
//!
//! Multiplies matrices that fit within one weight tile, first on a 2x2
//! array and then on the default 8x256 array.
//!
//! Run with: cargo run --example single_tile

use mpu_sim::{Int8Types, MatrixProcessingUnit, MpuConfig};

fn main() {
    println!("=== Single Tile Multiplication Example ===\n");

    // Example 1: 2x2 array, FIFO depth 3, 4 accumulator rows
    println!("Example 1: [[1, 2], [3, 4]] @ [[5, 6], [7, 8]] on a 2x2 array\n");

    let mut mpu = MatrixProcessingUnit::<Int8Types>::new(MpuConfig::new(2, 2, 3, 4)).unwrap();
    let c = mpu.multiply(&[1, 2, 3, 4], &[5, 6, 7, 8], 2, 2, 2).unwrap();

    // | 1 2 |   | 5 6 |   | 19 22 |
    // | 3 4 | * | 7 8 | = | 43 50 |
    println!("Result:");
    for row in c.chunks(2) {
        println!("  {:?}", row);
    }
    println!("Iterations: {}\n", mpu.iteration_count());

    // Example 2: 8x8 operands on the 8x256 array. K=8 only fills the bottom
    // 8 PE rows, the remaining rows see zero weights.
    println!("Example 2: 8x8 @ 8x8 on the 8x256 array\n");

    let mut mpu = MatrixProcessingUnit::<Int8Types>::new(MpuConfig::default_8x256()).unwrap();
    let a: Vec<i8> = (0..64).map(|i| (i % 7) as i8 - 3).collect();
    let b: Vec<i8> = (0..64).map(|i| (i % 5) as i8 - 2).collect();
    let c = mpu.multiply(&a, &b, 8, 8, 8).unwrap();

    println!("First result row: {:?}", &c[..8]);
    println!("Iterations: {} ({} stalled)", mpu.iteration_count(), mpu.stalled_iteration_count());
    println!("Accumulator readouts: {}", mpu.read_operation_count());

    let stats = mpu.statistics_entry("8x8", 8, 8, 8);
    println!("\nStatistics:\n{}", stats);
}
