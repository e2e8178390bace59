//! Systolic Array MPU Simulator
//!
//! This library provides a cycle-accurate model of a weight-stationary
//! systolic array matrix processing unit: activation FIFOs, a PE grid with
//! double-buffered weights, a data setup unit, a weight fetcher, a
//! double-buffered accumulator array and a unified buffer that holds all
//! operands.
//!
//! # Example
//!
//! ```rust
//! use mpu_sim::{Int8Types, MatrixProcessingUnit, MpuConfig};
//!
//! let config = MpuConfig::new(4, 4, 8, 8); // 4x4 array, FIFO depth 8, accumulator height 8
//! let mut mpu = MatrixProcessingUnit::<Int8Types>::new(config).unwrap();
//! let a = [1, 2, 3, 4, 5, 6];
//! let b = [1, 0, 0, 1, 1, 1];
//! let c = mpu.multiply(&a, &b, 2, 2, 3).unwrap();
//! assert_eq!(c, vec![4, 5, 10, 11]);
//! ```

pub mod accumulator;
pub mod data_setup;
pub mod error;
pub mod fifo;
pub mod hardware;
pub mod memory;
pub mod mpu;
pub mod numeric;
pub mod pe;
pub mod statistics;
pub mod systolic_array;
pub mod tiling;
pub mod weight_fetcher;

pub use accumulator::{AccumulatorArray, AccumulatorMode};
pub use data_setup::SystolicDataSetupUnit;
pub use error::{MpuError, MpuResult};
pub use fifo::ActivationFifo;
pub use hardware::{bits_required, MpuConfig};
pub use memory::{MatrixRegion, MemoryLayout, MemoryManagementUnit, Region};
pub use mpu::{check_result, reference_matmul, AnyMpu, MatrixProcessingUnit, StatisticsCallback};
pub use numeric::{
    Int16Types, Int32Types, Int8Types, NumericConfig, NumericTypes, Scalar, UInt8Types,
};
pub use pe::{PeKind, ProcessingElement};
pub use statistics::StatisticsEntry;
pub use systolic_array::SystolicArray;
pub use tiling::BlockTiling;
pub use weight_fetcher::{WeightFetcher, WeightUpdateRequest};
