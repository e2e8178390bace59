//! Hardware configuration of the matrix processing unit
//!
//! All dimensions are fixed at construction. Register bit widths are derived
//! from the largest values observed since the last metrics reset.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{MpuError, MpuResult};
use crate::numeric::NumericConfig;

/// Configuration for the MPU hardware
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MpuConfig {
    /// Number of PE columns
    pub array_width: usize,
    /// Number of PE rows (and activation FIFOs)
    pub array_height: usize,
    /// Slots per activation FIFO; one slot is always kept free
    pub activation_fifo_depth: usize,
    /// Rows of the accumulator memory, split into two buffers
    pub accumulator_height: usize,
    /// Upper bound of the unified buffer in bytes
    pub max_buffer_bytes: usize,
    /// Weight/activation/accumulator type combination
    pub numeric: NumericConfig,
    /// Check every result against the dense reference product
    pub verify: bool,
    /// Grow the unified buffer on demand instead of preallocating it
    pub dynamic_resize: bool,
}

impl MpuConfig {
    pub fn new(
        array_width: usize,
        array_height: usize,
        activation_fifo_depth: usize,
        accumulator_height: usize,
    ) -> Self {
        Self {
            array_width,
            array_height,
            activation_fifo_depth,
            accumulator_height,
            ..Self::default()
        }
    }

    /// 8x256 array with 1024 accumulator rows
    pub fn default_8x256() -> Self {
        Self {
            array_width: 8,
            array_height: 256,
            activation_fifo_depth: 8,
            accumulator_height: 1024,
            max_buffer_bytes: 16 * 1024 * 1024,
            numeric: NumericConfig::Int8,
            verify: true,
            dynamic_resize: true,
        }
    }

    pub fn with_numeric(mut self, numeric: NumericConfig) -> Self {
        self.numeric = numeric;
        self
    }

    pub fn with_max_buffer_bytes(mut self, max_buffer_bytes: usize) -> Self {
        self.max_buffer_bytes = max_buffer_bytes;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    /// Height of one of the two accumulator buffers
    pub fn accumulator_buffer_height(&self) -> usize {
        self.accumulator_height / 2
    }

    /// Number of anti-diagonals of the PE grid
    pub fn diagonals(&self) -> usize {
        self.array_width + self.array_height - 1
    }

    /// Reject configurations the pipeline cannot schedule
    pub fn validate(&self) -> MpuResult<()> {
        if self.array_width == 0 || self.array_height == 0 {
            return Err(MpuError::invalid_config(format!(
                "systolic array dimensions must be non-zero, got {}x{}",
                self.array_width, self.array_height
            )));
        }
        if self.activation_fifo_depth < 3 {
            return Err(MpuError::invalid_config(format!(
                "activation FIFO depth must be at least 3, got {}",
                self.activation_fifo_depth
            )));
        }
        if self.accumulator_height == 0 || self.accumulator_height % 2 != 0 {
            return Err(MpuError::invalid_config(format!(
                "accumulator height must be even and non-zero, got {}",
                self.accumulator_height
            )));
        }
        if self.accumulator_buffer_height() < self.array_height {
            return Err(MpuError::invalid_config(format!(
                "accumulator buffer height {} is smaller than the array height {}",
                self.accumulator_buffer_height(),
                self.array_height
            )));
        }
        if self.max_buffer_bytes == 0 {
            return Err(MpuError::invalid_config("unified buffer size must be non-zero"));
        }
        Ok(())
    }

    /// Parse a TOML configuration; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> MpuResult<Self> {
        toml::from_str(content)
            .map_err(|e| MpuError::config(format!("failed to parse TOML configuration: {}", e)))
    }

    pub fn to_toml_string(&self) -> MpuResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| MpuError::config(format!("failed to serialize configuration: {}", e)))
    }

    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> MpuResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| {
            MpuError::config(format!("cannot read configuration file {:?}: {}", path, e))
        })?;
        Self::from_toml_str(&content)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: impl AsRef<Path>) -> MpuResult<()> {
        let path = path.as_ref();
        fs::write(path, self.to_toml_string()?).map_err(|e| {
            MpuError::config(format!("cannot write configuration file {:?}: {}", path, e))
        })
    }
}

impl Default for MpuConfig {
    fn default() -> Self {
        Self::default_8x256()
    }
}

/// Minimum register width able to hold `max` distinct states, i.e. ceil(log2(max))
pub fn bits_required(max: usize) -> usize {
    if max <= 1 {
        0
    } else {
        (usize::BITS - (max - 1).leading_zeros()) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_config() {
        let config = MpuConfig::default();
        assert_eq!(config.array_width, 8);
        assert_eq!(config.array_height, 256);
        assert_eq!(config.accumulator_buffer_height(), 512);
        assert_eq!(config.diagonals(), 263);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_bad_shapes() {
        assert!(MpuConfig::new(0, 4, 8, 8).validate().is_err());
        assert!(MpuConfig::new(4, 4, 2, 8).validate().is_err());
        assert!(MpuConfig::new(4, 4, 8, 9).validate().is_err());
        // buffer height 2 cannot cover a 4-row skew
        assert!(matches!(
            MpuConfig::new(4, 4, 8, 4).validate(),
            Err(MpuError::InvalidConfiguration { .. })
        ));
        assert!(MpuConfig::new(4, 4, 3, 8).validate().is_ok());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = MpuConfig::new(4, 16, 6, 64).with_numeric(NumericConfig::Int16);
        let text = config.to_toml_string().unwrap();
        assert_eq!(MpuConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_toml_partial_uses_defaults() {
        let config = MpuConfig::from_toml_str("array_width = 4\nnumeric = \"uint8\"\n").unwrap();
        assert_eq!(config.array_width, 4);
        assert_eq!(config.array_height, 256);
        assert_eq!(config.numeric, NumericConfig::UInt8);
        assert!(MpuConfig::from_toml_str("array_width = \"wide\"").is_err());
    }

    #[test]
    fn test_bits_required() {
        assert_eq!(bits_required(0), 0);
        assert_eq!(bits_required(1), 0);
        assert_eq!(bits_required(2), 1);
        assert_eq!(bits_required(8), 3);
        assert_eq!(bits_required(9), 4);
        assert_eq!(bits_required(1024), 10);
    }
}
