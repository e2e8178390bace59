//! Per-multiplication statistics record
//!
//! One entry is produced for every completed named multiplication and handed
//! to the registered statistics callback.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatisticsEntry {
    pub operation_name: String,
    pub m: usize,
    pub n: usize,
    pub k: usize,

    pub systolic_array_height: usize,
    pub systolic_array_width: usize,
    pub activation_fifo_depth: usize,
    pub accumulator_array_height: usize,

    pub mpu_control_register_bits: usize,
    pub sdsu_control_register_bits: usize,
    pub activation_fifo_control_register_bits: usize,
    pub weight_fetcher_control_register_bits: usize,
    pub systolic_array_control_register_bits: usize,
    pub accumulator_array_control_register_bits: usize,

    pub activation_fifo_data_register_bits: usize,
    pub systolic_array_data_register_bits: usize,
    pub accumulator_array_data_register_bits: usize,
    pub unified_buffer_bits: usize,

    pub intra_pe_data_movements: usize,
    pub inter_pe_data_movements: usize,
    pub sdsu_unified_buffer_loads: usize,
    pub weight_fetcher_unified_buffer_loads: usize,
    pub weight_fetcher_concurrent_loads_max: usize,
    pub weight_fetcher_concurrent_loads_per_column_max: usize,
    pub accumulator_array_loads: usize,
    pub accumulator_array_concurrent_loads_max: usize,
    pub accumulator_array_concurrent_loads_per_column_max: usize,

    pub total_iterations: u64,
    pub stalled_iterations: u64,
    pub multiplications_with_weight_zero: usize,
}

/// Column order shared by [`StatisticsEntry::csv_header`] and [`StatisticsEntry::to_csv_row`]
const CSV_COLUMNS: &[&str] = &[
    "operation_name",
    "m",
    "n",
    "k",
    "systolic_array_height",
    "systolic_array_width",
    "activation_fifo_depth",
    "accumulator_array_height",
    "mpu_control_register_bits",
    "sdsu_control_register_bits",
    "activation_fifo_control_register_bits",
    "weight_fetcher_control_register_bits",
    "systolic_array_control_register_bits",
    "accumulator_array_control_register_bits",
    "activation_fifo_data_register_bits",
    "systolic_array_data_register_bits",
    "accumulator_array_data_register_bits",
    "unified_buffer_bits",
    "intra_pe_data_movements",
    "inter_pe_data_movements",
    "sdsu_unified_buffer_loads",
    "weight_fetcher_unified_buffer_loads",
    "weight_fetcher_concurrent_loads_max",
    "weight_fetcher_concurrent_loads_per_column_max",
    "accumulator_array_loads",
    "accumulator_array_concurrent_loads_max",
    "accumulator_array_concurrent_loads_per_column_max",
    "total_iterations",
    "stalled_iterations",
    "multiplications_with_weight_zero",
];

impl StatisticsEntry {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn csv_header() -> String {
        CSV_COLUMNS.join(",")
    }

    pub fn to_csv_row(&self) -> String {
        let numbers = [
            self.m,
            self.n,
            self.k,
            self.systolic_array_height,
            self.systolic_array_width,
            self.activation_fifo_depth,
            self.accumulator_array_height,
            self.mpu_control_register_bits,
            self.sdsu_control_register_bits,
            self.activation_fifo_control_register_bits,
            self.weight_fetcher_control_register_bits,
            self.systolic_array_control_register_bits,
            self.accumulator_array_control_register_bits,
            self.activation_fifo_data_register_bits,
            self.systolic_array_data_register_bits,
            self.accumulator_array_data_register_bits,
            self.unified_buffer_bits,
            self.intra_pe_data_movements,
            self.inter_pe_data_movements,
            self.sdsu_unified_buffer_loads,
            self.weight_fetcher_unified_buffer_loads,
            self.weight_fetcher_concurrent_loads_max,
            self.weight_fetcher_concurrent_loads_per_column_max,
            self.accumulator_array_loads,
            self.accumulator_array_concurrent_loads_max,
            self.accumulator_array_concurrent_loads_per_column_max,
        ];

        let mut fields = Vec::with_capacity(CSV_COLUMNS.len());
        fields.push(self.operation_name.replace(',', ";"));
        fields.extend(numbers.iter().map(|v| v.to_string()));
        fields.push(self.total_iterations.to_string());
        fields.push(self.stalled_iterations.to_string());
        fields.push(self.multiplications_with_weight_zero.to_string());
        fields.join(",")
    }

    pub fn control_register_bits(&self) -> usize {
        self.mpu_control_register_bits
            + self.sdsu_control_register_bits
            + self.activation_fifo_control_register_bits
            + self.weight_fetcher_control_register_bits
            + self.systolic_array_control_register_bits
            + self.accumulator_array_control_register_bits
    }

    pub fn data_register_bits(&self) -> usize {
        self.activation_fifo_data_register_bits
            + self.systolic_array_data_register_bits
            + self.accumulator_array_data_register_bits
    }
}

impl fmt::Display for StatisticsEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Operation: {}", self.operation_name)?;
        writeln!(f, "Shape: M={} N={} K={}", self.m, self.n, self.k)?;
        writeln!(
            f,
            "Array: {}x{} (FIFO depth {}, accumulator height {})",
            self.systolic_array_width,
            self.systolic_array_height,
            self.activation_fifo_depth,
            self.accumulator_array_height
        )?;
        writeln!(
            f,
            "Iterations: {} total, {} stalled",
            self.total_iterations, self.stalled_iterations
        )?;
        writeln!(
            f,
            "Data movements: {} intra-PE, {} inter-PE",
            self.intra_pe_data_movements, self.inter_pe_data_movements
        )?;
        writeln!(
            f,
            "Unified buffer loads: {} activations, {} weights",
            self.sdsu_unified_buffer_loads, self.weight_fetcher_unified_buffer_loads
        )?;
        writeln!(
            f,
            "Accumulator loads: {} (max {} concurrent, {} per column)",
            self.accumulator_array_loads,
            self.accumulator_array_concurrent_loads_max,
            self.accumulator_array_concurrent_loads_per_column_max
        )?;
        writeln!(
            f,
            "Register bits: {} control, {} data",
            self.control_register_bits(),
            self.data_register_bits()
        )?;
        write!(
            f,
            "Multiplications with zero weight: {}",
            self.multiplications_with_weight_zero
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> StatisticsEntry {
        StatisticsEntry {
            operation_name: "fc1".to_string(),
            m: 8,
            n: 8,
            k: 8,
            systolic_array_height: 256,
            systolic_array_width: 8,
            total_iterations: 277,
            stalled_iterations: 4,
            mpu_control_register_bits: 10,
            sdsu_control_register_bits: 5,
            ..StatisticsEntry::default()
        }
    }

    #[test]
    fn test_json_round_trip() {
        let entry = sample();
        let json = entry.to_json().unwrap();
        assert!(json.contains("\"total_iterations\": 277"));
        let parsed: StatisticsEntry = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, entry);
    }

    #[test]
    fn test_csv_row_matches_header() {
        let entry = sample();
        let header = StatisticsEntry::csv_header();
        let row = entry.to_csv_row();
        assert_eq!(header.split(',').count(), row.split(',').count());
        assert!(row.starts_with("fc1,8,8,8,256,8,"));
        assert!(row.ends_with(",277,4,0"));
    }

    #[test]
    fn test_display_summary() {
        let text = sample().to_string();
        assert!(text.contains("Iterations: 277 total, 4 stalled"));
        assert!(text.contains("Register bits: 15 control, 0 data"));
    }
}
