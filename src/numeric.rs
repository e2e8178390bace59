//! Numeric type combinations supported by the simulator
//!
//! Every unit is generic over a [`NumericTypes`] marker that fixes the weight,
//! activation and accumulator integer types. Only a closed set of markers is
//! instantiated; [`NumericConfig`] selects one of them at runtime.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Fixed-width integer stored in PE registers and in the unified buffer
pub trait Scalar:
    Copy + Default + PartialEq + Send + Sync + fmt::Debug + fmt::Display + 'static
{
    /// Width in bytes
    const BYTES: usize;

    fn is_zero(self) -> bool;

    /// Encode into exactly `Self::BYTES` little-endian bytes
    fn write_le(self, out: &mut [u8]);

    /// Decode from exactly `Self::BYTES` little-endian bytes
    fn read_le(bytes: &[u8]) -> Self;

    /// Truncating conversion, used for generated operands
    fn from_i64_wrapping(value: i64) -> Self;

    fn to_i64(self) -> i64;

    fn bits() -> usize {
        Self::BYTES * 8
    }
}

macro_rules! impl_scalar {
    ($($t:ty),*) => {
        $(
            impl Scalar for $t {
                const BYTES: usize = std::mem::size_of::<$t>();

                fn is_zero(self) -> bool {
                    self == 0
                }

                fn write_le(self, out: &mut [u8]) {
                    out.copy_from_slice(&self.to_le_bytes());
                }

                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$t>()];
                    raw.copy_from_slice(bytes);
                    <$t>::from_le_bytes(raw)
                }

                fn from_i64_wrapping(value: i64) -> Self {
                    value as $t
                }

                fn to_i64(self) -> i64 {
                    self as i64
                }
            }
        )*
    };
}

impl_scalar!(i8, i16, i32, i64, u8, u32);

/// Binds the register types of one MPU instantiation
pub trait NumericTypes:
    Copy + Default + fmt::Debug + PartialEq + Send + Sync + 'static
{
    type Weight: Scalar;
    type Activation: Scalar;
    type Accumulator: Scalar;

    const NAME: &'static str;

    /// Widening multiply with wraparound
    fn product(activation: Self::Activation, weight: Self::Weight) -> Self::Accumulator;

    /// Wrapping addition of two partial sums
    fn accumulate(lhs: Self::Accumulator, rhs: Self::Accumulator) -> Self::Accumulator;

    /// Multiply-accumulate as performed by a PE with an upper neighbour
    fn mac(
        activation: Self::Activation,
        weight: Self::Weight,
        upper: Self::Accumulator,
    ) -> Self::Accumulator {
        Self::accumulate(Self::product(activation, weight), upper)
    }
}

macro_rules! numeric_types {
    ($(#[$meta:meta])* $name:ident, $weight:ty, $activation:ty, $acc:ty, $label:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
        pub struct $name;

        impl NumericTypes for $name {
            type Weight = $weight;
            type Activation = $activation;
            type Accumulator = $acc;

            const NAME: &'static str = $label;

            fn product(activation: $activation, weight: $weight) -> $acc {
                (activation as $acc).wrapping_mul(weight as $acc)
            }

            fn accumulate(lhs: $acc, rhs: $acc) -> $acc {
                lhs.wrapping_add(rhs)
            }
        }
    };
}

numeric_types!(
    /// int8 weights and activations, int32 accumulation
    Int8Types, i8, i8, i32, "int8"
);
numeric_types!(
    /// int16 weights and activations, int32 accumulation
    Int16Types, i16, i16, i32, "int16"
);
numeric_types!(
    /// int32 weights and activations, int64 accumulation
    Int32Types, i32, i32, i64, "int32"
);
numeric_types!(
    /// uint8 weights and activations, uint32 accumulation
    UInt8Types, u8, u8, u32, "uint8"
);

/// Runtime selection of one instantiated type combination
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NumericConfig {
    #[default]
    Int8,
    Int16,
    Int32,
    UInt8,
}

impl NumericConfig {
    pub fn name(&self) -> &'static str {
        match self {
            NumericConfig::Int8 => Int8Types::NAME,
            NumericConfig::Int16 => Int16Types::NAME,
            NumericConfig::Int32 => Int32Types::NAME,
            NumericConfig::UInt8 => UInt8Types::NAME,
        }
    }
}

impl fmt::Display for NumericConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for NumericConfig {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "int8" | "i8" => Ok(NumericConfig::Int8),
            "int16" | "i16" => Ok(NumericConfig::Int16),
            "int32" | "i32" => Ok(NumericConfig::Int32),
            "uint8" | "u8" => Ok(NumericConfig::UInt8),
            other => Err(format!(
                "Unknown numeric type '{}', expected int8, int16, int32 or uint8",
                other
            )),
        }
    }
}

/// Decode a little-endian byte slice into scalars
pub fn decode_slice<S: Scalar>(bytes: &[u8]) -> Vec<S> {
    bytes.chunks_exact(S::BYTES).map(S::read_le).collect()
}

/// Encode scalars into their little-endian byte representation
pub fn encode_slice<S: Scalar>(values: &[S]) -> Vec<u8> {
    let mut bytes = vec![0u8; values.len() * S::BYTES];
    for (chunk, value) in bytes.chunks_exact_mut(S::BYTES).zip(values) {
        value.write_le(chunk);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_int8_products_widen() {
        assert_eq!(Int8Types::product(-128, -128), 16384);
        assert_eq!(Int8Types::mac(127, 127, 1), 16130);
    }

    #[test]
    fn test_accumulator_wraps() {
        assert_eq!(Int16Types::accumulate(i32::MAX, 1), i32::MIN);
        assert_eq!(UInt8Types::accumulate(u32::MAX, 2), 1);
    }

    #[test]
    fn test_le_encoding() {
        let values: Vec<i32> = vec![1, -2, 0x01020304];
        let bytes = encode_slice(&values);
        assert_eq!(&bytes[8..12], &[0x04, 0x03, 0x02, 0x01]);
        assert_eq!(decode_slice::<i32>(&bytes), values);
    }

    #[test]
    fn test_numeric_config_parsing() {
        assert_eq!("int8".parse::<NumericConfig>(), Ok(NumericConfig::Int8));
        assert_eq!("U8".parse::<NumericConfig>(), Ok(NumericConfig::UInt8));
        assert!("float".parse::<NumericConfig>().is_err());
        assert_eq!(NumericConfig::Int32.to_string(), "int32");
    }
}
