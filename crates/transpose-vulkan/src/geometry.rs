//! Problem sizes, workgroup derivation and the constants fed to the kernels.

use crate::device::ComputeLimits;
use crate::error::{Result, VulkanError};
use ash::vk;
use bytemuck::{Pod, Zeroable};
use std::fmt;

/// Size in bytes of one matrix element (`f32`).
pub const ELEMENT_BYTES: u32 = 4;

/// Largest supported coalescing granularity. Gives a 32×32 workgroup.
pub const MAX_COALESCED_BYTES: u32 = 128;

/// Dimensions of the matrix being transposed, in elements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct ProblemSize {
    pub width: u32,
    pub height: u32,
    pub depth: u32,
}

impl ProblemSize {
    pub const fn new(width: u32, height: u32, depth: u32) -> Self {
        Self { width, height, depth }
    }

    /// An `n × n × 1` matrix.
    pub const fn square(n: u32) -> Self {
        Self::new(n, n, 1)
    }

    pub fn as_array(&self) -> [u32; 3] {
        [self.width, self.height, self.depth]
    }

    pub fn element_count(&self) -> u64 {
        self.width as u64 * self.height as u64 * self.depth as u64
    }

    /// Bytes needed to hold the matrix as `f32`.
    pub fn byte_len(&self) -> u64 {
        self.element_count() * ELEMENT_BYTES as u64
    }
}

impl fmt::Display for ProblemSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}×{}×{}", self.width, self.height, self.depth)
    }
}

/// Workgroup shape and strides derived from a problem size and the
/// coalescing granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KernelGeometry {
    problem: ProblemSize,
    coalesced_bytes: u32,
    workgroup: [u32; 3],
    input_stride: [u32; 3],
}

impl KernelGeometry {
    /// Derive the geometry for `problem` with `coalesced_bytes` granularity.
    ///
    /// The granularity must be a non-zero multiple of 4 no larger than
    /// [`MAX_COALESCED_BYTES`], and every problem dimension must be non-zero.
    pub fn new(problem: ProblemSize, coalesced_bytes: u32) -> Result<Self> {
        validate_coalescing(coalesced_bytes)?;
        if problem.as_array().contains(&0) {
            return Err(VulkanError::InvalidArgument(format!(
                "problem size {problem} has a zero dimension"
            )));
        }
        let plane = problem.width.checked_mul(problem.height).ok_or_else(|| {
            VulkanError::InvalidArgument(format!("problem size {problem} overflows 32-bit strides"))
        })?;
        let side = coalesced_bytes / ELEMENT_BYTES;
        Ok(Self {
            problem,
            coalesced_bytes,
            workgroup: [side, side, 1],
            input_stride: [1, problem.width, plane],
        })
    }

    pub fn problem(&self) -> ProblemSize {
        self.problem
    }

    pub fn coalesced_bytes(&self) -> u32 {
        self.coalesced_bytes
    }

    /// Local size per axis; never zero.
    pub fn workgroup(&self) -> [u32; 3] {
        self.workgroup
    }

    pub fn input_stride(&self) -> [u32; 3] {
        self.input_stride
    }

    /// Reject a workgroup the device cannot run.
    pub fn check_limits(&self, limits: &ComputeLimits) -> Result<()> {
        for (axis, (&size, &max)) in
            self.workgroup.iter().zip(limits.max_workgroup_size.iter()).enumerate()
        {
            if size > max {
                return Err(self.unsupported(format!(
                    "workgroup dimension {axis} of {size} exceeds device maximum {max}"
                )));
            }
        }
        let invocations = self.invocations();
        if invocations > limits.max_workgroup_invocations {
            return Err(self.unsupported(format!(
                "{invocations} invocations exceed device maximum {}",
                limits.max_workgroup_invocations
            )));
        }
        let shared = self.shared_memory_bytes();
        if shared > limits.max_shared_memory_bytes {
            return Err(self.unsupported(format!(
                "{shared} bytes of shared memory exceed device maximum {}",
                limits.max_shared_memory_bytes
            )));
        }
        Ok(())
    }

    /// Number of workgroups per axis, or `InvalidGridAlignment` when the
    /// problem does not tile evenly.
    pub fn dispatch_grid(&self) -> Result<[u32; 3]> {
        let size = self.problem.as_array();
        if size.iter().zip(&self.workgroup).any(|(s, w)| s % w != 0) {
            return Err(VulkanError::InvalidGridAlignment { size, workgroup: self.workgroup });
        }
        Ok([size[0] / self.workgroup[0], size[1] / self.workgroup[1], size[2] / self.workgroup[2]])
    }

    pub fn invocations(&self) -> u32 {
        self.workgroup.iter().product()
    }

    /// Shared memory used by the padded tile of the conflict-free kernel.
    pub fn shared_memory_bytes(&self) -> u32 {
        self.workgroup[0] * (self.workgroup[1] + 1) * ELEMENT_BYTES
    }

    pub fn specialization(&self) -> SpecializationConstants {
        SpecializationConstants { local_size: self.workgroup, input_stride: self.input_stride }
    }

    fn unsupported(&self, reason: String) -> VulkanError {
        VulkanError::InvalidCoalescing { bytes: self.coalesced_bytes, reason }
    }
}

fn validate_coalescing(bytes: u32) -> Result<()> {
    let reason = if bytes == 0 {
        "must be non-zero"
    } else if bytes % ELEMENT_BYTES != 0 {
        "must be a multiple of 4"
    } else if bytes > MAX_COALESCED_BYTES {
        "must be at most 128"
    } else {
        return Ok(());
    };
    Err(VulkanError::InvalidCoalescing { bytes, reason: reason.to_string() })
}

/// Specialization data, laid out to match constant IDs 1..=6.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct SpecializationConstants {
    pub local_size: [u32; 3],
    pub input_stride: [u32; 3],
}

impl SpecializationConstants {
    /// Map entries binding ID `i + 1` to the `i`-th 32-bit word.
    pub fn map_entries() -> [vk::SpecializationMapEntry; 6] {
        std::array::from_fn(|i| vk::SpecializationMapEntry {
            constant_id: i as u32 + 1,
            offset: (i * std::mem::size_of::<u32>()) as u32,
            size: std::mem::size_of::<u32>(),
        })
    }
}

/// Push-constant block shared by all three kernels.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Pod, Zeroable)]
pub struct PushConstants {
    pub push_id: u32,
}

impl PushConstants {
    pub const SIZE: u32 = std::mem::size_of::<Self>() as u32;
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn limits(size: u32, invocations: u32, shared: u32) -> ComputeLimits {
        ComputeLimits {
            max_workgroup_size: [size, size, 64],
            max_workgroup_invocations: invocations,
            max_shared_memory_bytes: shared,
        }
    }

    #[test]
    fn four_by_four_with_sixteen_bytes() {
        let g = KernelGeometry::new(ProblemSize::square(4), 16).unwrap();
        assert_eq!(g.problem(), ProblemSize::square(4));
        assert_eq!(g.coalesced_bytes(), 16);
        assert_eq!(g.workgroup(), [4, 4, 1]);
        assert_eq!(g.input_stride(), [1, 4, 16]);
        assert_eq!(g.dispatch_grid().unwrap(), [1, 1, 1]);
    }

    #[test]
    fn nvidia_default_on_1024() {
        let g = KernelGeometry::new(ProblemSize::square(1024), 32).unwrap();
        assert_eq!(g.workgroup(), [8, 8, 1]);
        assert_eq!(g.dispatch_grid().unwrap(), [128, 128, 1]);
        assert_eq!(g.input_stride(), [1, 1024, 1024 * 1024]);
    }

    #[test]
    fn misaligned_grid_is_rejected() {
        let g = KernelGeometry::new(ProblemSize::square(10), 16).unwrap();
        let err = g.dispatch_grid().unwrap_err();
        assert!(matches!(
            err,
            VulkanError::InvalidGridAlignment { size: [10, 10, 1], workgroup: [4, 4, 1] }
        ));
    }

    #[test]
    fn coalescing_validation() {
        for bad in [0, 3, 6, 130, 256] {
            let err = KernelGeometry::new(ProblemSize::square(64), bad).unwrap_err();
            assert!(matches!(err, VulkanError::InvalidCoalescing { bytes, .. } if bytes == bad));
        }
        assert!(KernelGeometry::new(ProblemSize::square(64), 4).is_ok());
        assert!(KernelGeometry::new(ProblemSize::square(64), 128).is_ok());
    }

    #[test]
    fn zero_dimension_rejected() {
        let err = KernelGeometry::new(ProblemSize::new(0, 4, 1), 16).unwrap_err();
        assert!(matches!(err, VulkanError::InvalidArgument(_)));
    }

    #[test]
    fn stride_overflow_rejected() {
        let err = KernelGeometry::new(ProblemSize::new(1 << 16, 1 << 16, 1), 16).unwrap_err();
        assert!(matches!(err, VulkanError::InvalidArgument(_)));
    }

    #[test]
    fn device_limits() {
        let g = KernelGeometry::new(ProblemSize::square(1024), 128).unwrap();
        assert_eq!(g.invocations(), 1024);
        assert_eq!(g.shared_memory_bytes(), 32 * 33 * 4);
        assert!(g.check_limits(&limits(1024, 1024, 49152)).is_ok());
        assert!(g.check_limits(&limits(16, 1024, 49152)).is_err());
        assert!(g.check_limits(&limits(1024, 256, 49152)).is_err());
        assert!(g.check_limits(&limits(1024, 1024, 4096)).is_err());
    }

    #[test]
    fn problem_size_bytes() {
        let p = ProblemSize::square(1024);
        assert_eq!(p.element_count(), 1 << 20);
        assert_eq!(p.byte_len(), 4 << 20);
        assert_eq!(p.to_string(), "1024×1024×1");
    }

    #[test]
    fn specialization_layout() {
        let entries = SpecializationConstants::map_entries();
        let ids: Vec<u32> = entries.iter().map(|e| e.constant_id).collect();
        let offsets: Vec<u32> = entries.iter().map(|e| e.offset).collect();
        assert_eq!(ids, [1, 2, 3, 4, 5, 6]);
        assert_eq!(offsets, [0, 4, 8, 12, 16, 20]);
        assert!(entries.iter().all(|e| e.size == 4));

        let g = KernelGeometry::new(ProblemSize::square(64), 32).unwrap();
        let spec = g.specialization();
        let words: &[u32] = bytemuck::cast_slice(std::slice::from_ref(&spec));
        assert_eq!(words, [8, 8, 1, 1, 64, 4096]);
        assert_eq!(std::mem::size_of::<SpecializationConstants>(), 24);
        assert_eq!(PushConstants::SIZE, 4);
    }

    proptest! {
        #[test]
        fn grid_times_workgroup_covers_problem(
            tiles in 1u32..64,
            rows in 1u32..64,
            quarter in 1u32..=32,
        ) {
            let side = quarter;
            let problem = ProblemSize::new(tiles * side, rows * side, 1);
            let g = KernelGeometry::new(problem, quarter * 4).unwrap();
            let grid = g.dispatch_grid().unwrap();
            prop_assert_eq!(grid[0] * g.workgroup[0], problem.width);
            prop_assert_eq!(grid[1] * g.workgroup[1], problem.height);
            prop_assert_eq!(grid[2], 1);
        }

        #[test]
        fn non_multiple_width_fails(extra in 1u32..8, tiles in 1u32..32) {
            let problem = ProblemSize::new(tiles * 8 + extra, 8, 1);
            let g = KernelGeometry::new(problem, 32).unwrap();
            let is_alignment_error =
                matches!(g.dispatch_grid(), Err(VulkanError::InvalidGridAlignment { .. }));
            prop_assert!(is_alignment_error);
        }
    }
}
