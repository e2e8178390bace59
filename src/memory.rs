//! Memory management unit for the unified buffer
//!
//! The unified buffer is a single byte vector laid out as
//! `[weights][activation][result]`. Named weight matrices are appended to the
//! weight space and stay resident; the activation and result spaces are
//! resized per multiplication and shift whenever a region below them grows.

use std::collections::HashMap;
use std::fmt;

use crate::error::{MpuError, MpuResult};
use crate::numeric::{decode_slice, encode_slice, Scalar};

/// Byte range inside the unified buffer
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Region {
    pub offset: usize,
    pub len: usize,
}

impl Region {
    pub fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    /// One past the last byte, saturating at `usize::MAX`
    pub fn end(&self) -> usize {
        self.offset.saturating_add(self.len)
    }

    pub fn checked_end(&self) -> Option<usize> {
        self.offset.checked_add(self.len)
    }

    pub fn overlaps(&self, other: &Region) -> bool {
        self.len > 0 && other.len > 0 && self.offset < other.end() && other.offset < self.end()
    }
}

/// Region holding a row-major matrix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatrixRegion {
    pub region: Region,
    pub rows: usize,
    pub columns: usize,
}

pub struct MemoryManagementUnit {
    buffer: Vec<u8>,
    max_bytes: usize,
    dynamic_resize: bool,
    weights: HashMap<String, MatrixRegion>,
    weight_end: usize,
    activation_end: usize,
    result_end: usize,
    activation_shape: (usize, usize),
    result_shape: (usize, usize),
    /// High-water mark of the activation and result spaces combined
    combined_max: usize,
}

impl MemoryManagementUnit {
    pub fn new(max_bytes: usize, dynamic_resize: bool) -> Self {
        let mut mmu = Self {
            buffer: Vec::new(),
            max_bytes,
            dynamic_resize,
            weights: HashMap::new(),
            weight_end: 0,
            activation_end: 0,
            result_end: 0,
            activation_shape: (0, 0),
            result_shape: (0, 0),
            combined_max: 0,
        };
        mmu.set_dynamic_resize(dynamic_resize);
        mmu
    }

    /// Grow on demand, or preallocate the maximum size
    pub fn set_dynamic_resize(&mut self, dynamic_resize: bool) {
        self.dynamic_resize = dynamic_resize;
        if dynamic_resize {
            self.buffer.resize(self.result_end, 0);
        } else {
            self.buffer.resize(self.max_bytes, 0);
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Current length of the backing byte vector
    pub fn buffer_len(&self) -> usize {
        self.buffer.len()
    }

    /// Bytes in use by all three spaces
    pub fn used_bytes(&self) -> usize {
        self.result_end
    }

    pub fn memory_usage_max_bytes(&self) -> usize {
        self.weight_end + self.combined_max
    }

    pub fn memory_usage_max_bits(&self) -> usize {
        self.memory_usage_max_bytes() * 8
    }

    fn ensure_fits(&self, growth: isize, what: &str) -> MpuResult<()> {
        let size = self.result_end as isize + growth;
        if size > self.max_bytes as isize {
            return Err(MpuError::out_of_bounds(format!(
                "cannot store {}: unified buffer would grow to {} bytes, maximum is {}",
                what, size, self.max_bytes
            )));
        }
        Ok(())
    }

    fn check_shape(rows: usize, columns: usize, len: usize, what: &str) -> MpuResult<()> {
        if rows == 0 || columns == 0 {
            return Err(MpuError::malformed(format!(
                "cannot store {} with a row or column count of zero",
                what
            )));
        }
        let elements = rows.checked_mul(columns).ok_or_else(|| {
            MpuError::malformed(format!("{} of shape {}x{} is too large", what, rows, columns))
        })?;
        if elements != len {
            return Err(MpuError::malformed(format!(
                "{} of shape {}x{} needs {} elements, got {}",
                what, rows, columns, elements, len
            )));
        }
        Ok(())
    }

    /// Resize the space ending at `end` by `growth` bytes, shifting everything above it
    fn resize_space(&mut self, end: usize, growth: isize) {
        if growth == 0 {
            return;
        }
        if self.dynamic_resize {
            if growth > 0 {
                let fill = std::iter::repeat(0u8).take(growth as usize);
                self.buffer.splice(end..end, fill);
            } else {
                self.buffer.drain(end - growth.unsigned_abs()..end);
            }
        } else {
            let target = (end as isize + growth) as usize;
            self.buffer.copy_within(end..self.result_end, target);
        }
    }

    /// Append a named weight matrix; a name that is already stored is left untouched
    pub fn store_weight_matrix<S: Scalar>(
        &mut self,
        name: &str,
        values: &[S],
        rows: usize,
        columns: usize,
    ) -> MpuResult<()> {
        if name.is_empty() {
            return Err(MpuError::malformed(
                "cannot use an empty string as weight matrix name",
            ));
        }
        Self::check_shape(rows, columns, values.len(), "weight matrix")?;

        if self.weights.contains_key(name) {
            log::debug!("weight matrix '{}' already present in unified buffer", name);
            return Ok(());
        }

        let bytes = encode_slice(values);
        let growth = bytes.len() as isize;
        self.ensure_fits(growth, "weight matrix")?;

        let offset = self.weight_end;
        self.resize_space(offset, growth);
        self.buffer[offset..offset + bytes.len()].copy_from_slice(&bytes);

        self.weights.insert(
            name.to_string(),
            MatrixRegion {
                region: Region::new(offset, bytes.len()),
                rows,
                columns,
            },
        );
        self.weight_end += bytes.len();
        self.activation_end += bytes.len();
        self.result_end += bytes.len();

        log::debug!(
            "stored weight matrix '{}' ({}x{}) at 0x{:x}, {} bytes",
            name,
            rows,
            columns,
            offset,
            bytes.len()
        );
        Ok(())
    }

    pub fn weight_matrix_region(&self, name: &str) -> MpuResult<MatrixRegion> {
        self.weights.get(name).copied().ok_or_else(|| {
            MpuError::malformed(format!(
                "weight matrix '{}' not present in unified buffer",
                name
            ))
        })
    }

    pub fn contains_weight_matrix(&self, name: &str) -> bool {
        self.weights.contains_key(name)
    }

    /// Evict a named weight matrix, compacting the spaces above it
    pub fn remove_weight_matrix(&mut self, name: &str) -> MpuResult<()> {
        let removed = self.weight_matrix_region(name)?.region;
        self.resize_space(removed.end(), -(removed.len as isize));
        self.weights.remove(name);
        for matrix in self.weights.values_mut() {
            if matrix.region.offset > removed.offset {
                matrix.region.offset -= removed.len;
            }
        }
        self.weight_end -= removed.len;
        self.activation_end -= removed.len;
        self.result_end -= removed.len;
        log::debug!("removed weight matrix '{}', {} bytes", name, removed.len);
        Ok(())
    }

    /// Replace the activation matrix
    pub fn store_activation_matrix<S: Scalar>(
        &mut self,
        values: &[S],
        rows: usize,
        columns: usize,
    ) -> MpuResult<()> {
        Self::check_shape(rows, columns, values.len(), "activation matrix")?;

        let bytes = encode_slice(values);
        let growth = bytes.len() as isize - (self.activation_end - self.weight_end) as isize;
        self.ensure_fits(growth, "activation matrix")?;

        self.resize_space(self.activation_end, growth);
        self.activation_end = (self.activation_end as isize + growth) as usize;
        self.result_end = (self.result_end as isize + growth) as usize;
        self.buffer[self.weight_end..self.activation_end].copy_from_slice(&bytes);
        self.activation_shape = (rows, columns);

        log::debug!(
            "stored activation matrix ({}x{}) at 0x{:x}, {} bytes",
            rows,
            columns,
            self.weight_end,
            bytes.len()
        );
        Ok(())
    }

    pub fn activation_matrix_region(&self) -> MatrixRegion {
        MatrixRegion {
            region: Region::new(self.weight_end, self.activation_end - self.weight_end),
            rows: self.activation_shape.0,
            columns: self.activation_shape.1,
        }
    }

    /// Size the result space for a `rows`x`columns` matrix of `S`
    pub fn set_result_matrix_size<S: Scalar>(&mut self, rows: usize, columns: usize) -> MpuResult<()> {
        let size = rows
            .checked_mul(columns)
            .and_then(|elements| elements.checked_mul(S::BYTES))
            .filter(|&size| size <= self.max_bytes)
            .ok_or_else(|| {
                MpuError::out_of_bounds(format!(
                    "{}x{} result matrix exceeds the unified buffer maximum of {} bytes",
                    rows, columns, self.max_bytes
                ))
            })?;
        let growth = size as isize - (self.result_end - self.activation_end) as isize;
        self.ensure_fits(growth, "result matrix")?;

        self.result_end = (self.result_end as isize + growth) as usize;
        if self.dynamic_resize {
            self.buffer.resize(self.result_end, 0);
        }
        self.result_shape = (rows, columns);

        let combined = self.result_end - self.weight_end;
        if combined > self.combined_max {
            self.combined_max = combined;
            log::debug!("activation and result spaces peak at {} bytes", combined);
        }
        Ok(())
    }

    pub fn result_matrix_region(&self) -> MatrixRegion {
        MatrixRegion {
            region: Region::new(self.activation_end, self.result_end - self.activation_end),
            rows: self.result_shape.0,
            columns: self.result_shape.1,
        }
    }

    /// Reject regions reaching past the end of the buffer
    pub fn check_region(&self, region: Region) -> MpuResult<()> {
        if region.checked_end().map_or(true, |end| end > self.buffer.len()) {
            return Err(MpuError::out_of_bounds(format!(
                "region 0x{:x}..0x{:x} outside unified buffer of {} bytes",
                region.offset,
                region.end(),
                self.buffer.len()
            )));
        }
        Ok(())
    }

    pub fn check_disjoint(a: Region, b: Region) -> MpuResult<()> {
        if a.overlaps(&b) {
            return Err(MpuError::out_of_bounds(format!(
                "regions 0x{:x}..0x{:x} and 0x{:x}..0x{:x} overlap",
                a.offset,
                a.end(),
                b.offset,
                b.end()
            )));
        }
        Ok(())
    }

    pub fn load_from_unified_buffer(&self, region: Region) -> MpuResult<&[u8]> {
        self.check_region(region)?;
        Ok(&self.buffer[region.offset..region.end()])
    }

    pub fn store_to_unified_buffer(&mut self, offset: usize, bytes: &[u8]) -> MpuResult<()> {
        self.check_region(Region::new(offset, bytes.len()))?;
        self.buffer[offset..offset + bytes.len()].copy_from_slice(bytes);
        Ok(())
    }

    /// Decode a region as scalars of type `S`
    pub fn read_matrix<S: Scalar>(&self, region: Region) -> MpuResult<Vec<S>> {
        Ok(decode_slice(self.load_from_unified_buffer(region)?))
    }

    pub fn load_result_matrix<S: Scalar>(&self) -> MpuResult<Vec<S>> {
        self.read_matrix(self.result_matrix_region().region)
    }

    /// Drop all matrices
    pub fn reset(&mut self) {
        self.weights.clear();
        self.weight_end = 0;
        self.activation_end = 0;
        self.result_end = 0;
        self.activation_shape = (0, 0);
        self.result_shape = (0, 0);
        self.combined_max = 0;
        self.buffer.clear();
        self.set_dynamic_resize(self.dynamic_resize);
    }

    pub fn layout(&self) -> MemoryLayout {
        let mut weights: Vec<(String, MatrixRegion)> = self
            .weights
            .iter()
            .map(|(name, region)| (name.clone(), *region))
            .collect();
        weights.sort_by_key(|(_, region)| region.region.offset);
        MemoryLayout {
            weights,
            activation: self.activation_matrix_region(),
            result: self.result_matrix_region(),
            buffer_len: self.buffer.len(),
        }
    }
}

/// Snapshot of the unified buffer layout
#[derive(Debug, Clone)]
pub struct MemoryLayout {
    pub weights: Vec<(String, MatrixRegion)>,
    pub activation: MatrixRegion,
    pub result: MatrixRegion,
    pub buffer_len: usize,
}

impl fmt::Display for MemoryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Unified buffer: {} bytes", self.buffer_len)?;
        for (name, matrix) in &self.weights {
            writeln!(
                f,
                "  weights '{}': 0x{:x}..0x{:x} ({}x{})",
                name,
                matrix.region.offset,
                matrix.region.end(),
                matrix.rows,
                matrix.columns
            )?;
        }
        writeln!(
            f,
            "  activation: 0x{:x}..0x{:x} ({}x{})",
            self.activation.region.offset,
            self.activation.region.end(),
            self.activation.rows,
            self.activation.columns
        )?;
        write!(
            f,
            "  result: 0x{:x}..0x{:x} ({}x{})",
            self.result.region.offset,
            self.result.region.end(),
            self.result.rows,
            self.result.columns
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_layout_shifts_on_weight_store() {
        let mut mmu = MemoryManagementUnit::new(1024, true);
        mmu.store_activation_matrix(&[1i8, 2, 3, 4], 2, 2).unwrap();
        mmu.set_result_matrix_size::<i32>(2, 2).unwrap();
        assert_eq!(mmu.activation_matrix_region().region, Region::new(0, 4));
        assert_eq!(mmu.result_matrix_region().region, Region::new(4, 16));

        mmu.store_weight_matrix("fc1", &[9i8; 6], 2, 3).unwrap();
        assert_eq!(mmu.weight_matrix_region("fc1").unwrap().region, Region::new(0, 6));
        assert_eq!(mmu.activation_matrix_region().region, Region::new(6, 4));
        assert_eq!(mmu.result_matrix_region().region, Region::new(10, 16));
        // activation bytes moved with their space
        assert_eq!(
            mmu.read_matrix::<i8>(mmu.activation_matrix_region().region).unwrap(),
            vec![1, 2, 3, 4]
        );
        assert_eq!(mmu.buffer_len(), 26);
    }

    #[test]
    fn test_duplicate_weight_name_is_ignored() {
        let mut mmu = MemoryManagementUnit::new(64, true);
        mmu.store_weight_matrix("w", &[1i16, 2], 1, 2).unwrap();
        mmu.store_weight_matrix("w", &[5i16, 6, 7, 8], 2, 2).unwrap();
        let region = mmu.weight_matrix_region("w").unwrap();
        assert_eq!((region.rows, region.columns), (1, 2));
        assert_eq!(mmu.read_matrix::<i16>(region.region).unwrap(), vec![1, 2]);
    }

    #[test]
    fn test_remove_weight_matrix_compacts() {
        for dynamic_resize in [true, false] {
            let mut mmu = MemoryManagementUnit::new(64, dynamic_resize);
            mmu.store_weight_matrix("a", &[1i8, 2], 1, 2).unwrap();
            mmu.store_weight_matrix("b", &[3i8, 4, 5], 1, 3).unwrap();
            mmu.store_activation_matrix(&[6i8], 1, 1).unwrap();

            mmu.remove_weight_matrix("a").unwrap();
            let b = mmu.weight_matrix_region("b").unwrap().region;
            assert_eq!(b, Region::new(0, 3));
            assert_eq!(mmu.read_matrix::<i8>(b).unwrap(), vec![3, 4, 5]);
            assert_eq!(mmu.activation_matrix_region().region, Region::new(3, 1));
            assert_eq!(
                mmu.read_matrix::<i8>(mmu.activation_matrix_region().region).unwrap(),
                vec![6]
            );
            assert!(mmu.remove_weight_matrix("a").is_err());
        }
    }

    #[test]
    fn test_activation_shrinks_and_grows() {
        for dynamic_resize in [true, false] {
            let mut mmu = MemoryManagementUnit::new(128, dynamic_resize);
            mmu.store_weight_matrix("w", &[7u8; 4], 2, 2).unwrap();
            mmu.store_activation_matrix(&[1u8; 8], 2, 4).unwrap();
            mmu.set_result_matrix_size::<u32>(1, 2).unwrap();
            let result = mmu.result_matrix_region().region;
            mmu.store_to_unified_buffer(result.offset, &encode_slice(&[11u32, 12])).unwrap();

            mmu.store_activation_matrix(&[2u8; 2], 1, 2).unwrap();
            assert_eq!(mmu.result_matrix_region().region, Region::new(6, 8));
            assert_eq!(mmu.load_result_matrix::<u32>().unwrap(), vec![11, 12]);

            mmu.store_activation_matrix(&[3u8; 12], 3, 4).unwrap();
            assert_eq!(mmu.result_matrix_region().region, Region::new(16, 8));
            assert_eq!(mmu.load_result_matrix::<u32>().unwrap(), vec![11, 12]);
            assert_eq!(
                mmu.read_matrix::<u8>(mmu.weight_matrix_region("w").unwrap().region).unwrap(),
                vec![7; 4]
            );
        }
    }

    #[test]
    fn test_maximum_size_enforced() {
        let mut mmu = MemoryManagementUnit::new(16, true);
        mmu.store_weight_matrix("w", &[0i32; 3], 1, 3).unwrap();
        assert!(matches!(
            mmu.store_activation_matrix(&[0i8; 5], 1, 5),
            Err(MpuError::OutOfBounds { .. })
        ));
        assert!(mmu.store_activation_matrix(&[0i8; 4], 1, 4).is_ok());
        assert!(mmu.set_result_matrix_size::<i32>(1, 1).is_err());
    }

    #[test]
    fn test_malformed_stores_rejected() {
        let mut mmu = MemoryManagementUnit::new(64, true);
        assert!(matches!(
            mmu.store_weight_matrix("", &[1i8], 1, 1),
            Err(MpuError::MalformedRequest { .. })
        ));
        assert!(mmu.store_weight_matrix("w", &[1i8, 2], 0, 2).is_err());
        assert!(mmu.store_activation_matrix(&[1i8, 2, 3], 2, 2).is_err());
        assert!(matches!(
            mmu.weight_matrix_region("missing"),
            Err(MpuError::MalformedRequest { .. })
        ));
    }

    #[test]
    fn test_bounds_and_overlap_checks() {
        let mut mmu = MemoryManagementUnit::new(64, true);
        mmu.store_activation_matrix(&[1i8; 8], 2, 4).unwrap();
        assert!(mmu.check_region(Region::new(0, 8)).is_ok());
        assert!(matches!(
            mmu.check_region(Region::new(4, 8)),
            Err(MpuError::OutOfBounds { .. })
        ));
        assert!(mmu.load_from_unified_buffer(Region::new(7, 2)).is_err());
        assert!(mmu.store_to_unified_buffer(6, &[0, 0, 0]).is_err());

        assert!(MemoryManagementUnit::check_disjoint(Region::new(0, 4), Region::new(4, 4)).is_ok());
        assert!(MemoryManagementUnit::check_disjoint(Region::new(0, 5), Region::new(4, 4)).is_err());
        assert!(MemoryManagementUnit::check_disjoint(Region::new(2, 0), Region::new(0, 4)).is_ok());
    }

    #[test]
    fn test_region_end_overflow() {
        let mut mmu = MemoryManagementUnit::new(64, true);
        mmu.store_activation_matrix(&[1i8; 4], 2, 2).unwrap();
        let huge = Region::new(usize::MAX - 1, 4);
        assert_eq!(huge.checked_end(), None);
        assert_eq!(huge.end(), usize::MAX);
        assert!(matches!(mmu.check_region(huge), Err(MpuError::OutOfBounds { .. })));
        assert!(matches!(
            mmu.load_from_unified_buffer(huge),
            Err(MpuError::OutOfBounds { .. })
        ));
        assert!(matches!(
            mmu.set_result_matrix_size::<i32>(usize::MAX, 2),
            Err(MpuError::OutOfBounds { .. })
        ));
        assert!(matches!(
            mmu.store_weight_matrix("w", &[1i8; 4], usize::MAX, 2),
            Err(MpuError::MalformedRequest { .. })
        ));
    }

    #[test]
    fn test_usage_high_water_mark_and_reset() {
        let mut mmu = MemoryManagementUnit::new(256, false);
        assert_eq!(mmu.buffer_len(), 256);
        mmu.store_weight_matrix("w", &[0i8; 10], 2, 5).unwrap();
        mmu.store_activation_matrix(&[0i8; 20], 4, 5).unwrap();
        mmu.set_result_matrix_size::<i32>(4, 2).unwrap();
        mmu.store_activation_matrix(&[0i8; 5], 1, 5).unwrap();
        mmu.set_result_matrix_size::<i32>(1, 2).unwrap();
        assert_eq!(mmu.used_bytes(), 10 + 5 + 8);
        assert_eq!(mmu.memory_usage_max_bytes(), 10 + 20 + 32);
        assert!(mmu.layout().to_string().contains("weights 'w': 0x0..0xa (2x5)"));

        mmu.reset();
        assert_eq!(mmu.used_bytes(), 0);
        assert_eq!(mmu.buffer_len(), 256);
        assert!(!mmu.contains_weight_matrix("w"));
    }
}
