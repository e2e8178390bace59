//! Example: Named Weight Matrices
//!
//! Stores the weights of a small two-layer network in the unified buffer
//! once and runs both layers by name, collecting a statistics entry per
//! layer through the callback.
//!
//! Run with: cargo run --example named_layers

use std::sync::{Arc, Mutex};

use mpu_sim::{Int8Types, MatrixProcessingUnit, MpuConfig, StatisticsEntry};

fn main() {
    println!("=== Named Layers Example ===\n");

    let mut mpu = MatrixProcessingUnit::<Int8Types>::new(MpuConfig::new(4, 4, 8, 8)).unwrap();

    let entries: Arc<Mutex<Vec<StatisticsEntry>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&entries);
    mpu.register_statistics_callback(Box::new(move |entry| {
        sink.lock().unwrap().push(entry);
    }));

    // fc1: 6 -> 5, fc2: 5 -> 3
    let fc1: Vec<i8> = (0..30).map(|i| (i % 3) as i8 - 1).collect();
    let fc2: Vec<i8> = (0..15).map(|i| (i % 4) as i8 - 1).collect();
    mpu.store_weight_matrix("fc1", &fc1, 6, 5).unwrap();
    mpu.store_weight_matrix("fc2", &fc2, 5, 3).unwrap();

    let input: Vec<i8> = (0..12).map(|i| i as i8 - 6).collect();
    mpu.store_activation_matrix(&input, 2, 6).unwrap();
    println!("Unified buffer layout:\n{}\n", mpu.mmu().layout());

    mpu.run_multiplication_named("fc1").unwrap();
    let hidden: Vec<i8> = mpu
        .load_result_matrix()
        .unwrap()
        .into_iter()
        .map(|v| v.clamp(0, i8::MAX as i32) as i8)
        .collect();
    println!("fc1 output (ReLU, saturated): {:?}", hidden);

    mpu.reset_iteration_counts();
    mpu.reset_data_movement_and_footprint_metrics();
    mpu.store_activation_matrix(&hidden, 2, 5).unwrap();
    mpu.run_multiplication_named("fc2").unwrap();
    println!("fc2 output: {:?}\n", mpu.load_result_matrix().unwrap());

    println!("{}", StatisticsEntry::csv_header());
    for entry in entries.lock().unwrap().iter() {
        println!("{}", entry.to_csv_row());
    }
}
