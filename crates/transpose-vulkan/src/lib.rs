//! Vulkan compute harness for the matrix transposition benchmark.
//!
//! A [`DeviceContext`] owns the instance, logical device, compute queue and a
//! single reusable fence. Buffers ([`GpuBuffer`]) and kernels
//! ([`ComputeKernel`]) borrow the context, so they are always torn down
//! before it. Every GPU submission goes through
//! [`DeviceContext::submit_one_shot`], which serializes use of the fence.
//!
//! ```no_run
//! use transpose_vulkan::{BenchSettings, ContextConfig, DeviceContext, SpirvDirectory};
//!
//! # fn main() -> transpose_vulkan::Result<()> {
//! let ctx = DeviceContext::new(&ContextConfig::default())?;
//! let loader = SpirvDirectory::new("shaders/spirv");
//! let report =
//!     transpose_vulkan::run_transposition_benchmark(&ctx, &BenchSettings::default(), &loader)?;
//! println!("{:.3} GiB/s", report.bandwidth_gib_s);
//! # Ok(())
//! # }
//! ```

pub mod bench;
pub mod context;
pub mod debug;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod geometry;
pub mod kernels;
pub mod memory;
pub mod pipeline;
pub mod transfer;

pub use bench::{BenchSettings, BenchmarkReport, run_transposition_benchmark};
pub use context::{ContextConfig, DeviceContext};
pub use debug::{DiagnosticSink, Severity, TracingSink};
pub use device::{DeviceCapabilities, DeviceInfo, Vendor};
pub use dispatch::{BatchTiming, run_batch, run_batch_tagged};
pub use error::{Result, VulkanError};
pub use geometry::{KernelGeometry, ProblemSize, PushConstants};
pub use kernels::{KernelLoader, KernelVariant, SpirvDirectory};
pub use memory::{BufferDescriptor, GpuBuffer, Residency, allocate_buffer};
pub use pipeline::ComputeKernel;
pub use transfer::{download_from_device, upload_to_device};
