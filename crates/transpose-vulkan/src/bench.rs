//! The transposition benchmark: three kernels over one input/output pair.

use crate::context::DeviceContext;
use crate::dispatch::{BatchTiming, run_batch};
use crate::error::{Result, VulkanError};
use crate::geometry::ProblemSize;
use crate::kernels::{KernelLoader, KernelVariant};
use crate::memory::{BufferDescriptor, GpuBuffer, allocate_buffer};
use crate::pipeline::ComputeKernel;
use crate::transfer::{download_vec, upload_slice};
use serde::Serialize;
use tracing::{debug, info};

/// Default edge length of the square matrix.
pub const DEFAULT_SIZE: u32 = 2048;

/// Default number of dispatches per timed batch.
pub const DEFAULT_BATCH: u32 = 1000;

const GIB: f64 = (1u64 << 30) as f64;

/// Parameters of one benchmark run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BenchSettings {
    /// Edge length of the square matrix, in elements.
    pub size: u32,
    /// Coalescing granularity in bytes; `None` uses the vendor default.
    pub coalesced_bytes: Option<u32>,
    /// Dispatches per timed batch.
    pub batch: u32,
    /// Download and check the output after every variant.
    pub verify: bool,
}

impl Default for BenchSettings {
    fn default() -> Self {
        Self { size: DEFAULT_SIZE, coalesced_bytes: None, batch: DEFAULT_BATCH, verify: false }
    }
}

/// Timing of one kernel variant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VariantResult {
    pub variant: KernelVariant,
    pub ms_per_dispatch: f64,
    pub batch: BatchTiming,
}

/// Results of [`run_transposition_benchmark`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BenchmarkReport {
    pub device: String,
    pub size: u32,
    pub coalesced_bytes: u32,
    pub buffer_kib: u64,
    pub repetitions: u32,
    pub no_bank_conflicts_ms: f64,
    pub bank_conflicts_ms: f64,
    pub transfer_ms: f64,
    pub bandwidth_gib_s: f64,
    pub transfer_ratio_percent: f64,
    pub verified: bool,
    pub variants: Vec<VariantResult>,
}

/// Effective bandwidth of a kernel that reads and writes `bytes` once in
/// `ms_per_dispatch` milliseconds, in GiB/s.
pub fn bandwidth_gib_s(bytes: u64, ms_per_dispatch: f64) -> f64 {
    if ms_per_dispatch <= 0.0 {
        return 0.0;
    }
    2.0 * bytes as f64 / GIB / (ms_per_dispatch / 1000.0)
}

/// Copy time as a percentage of the conflict-free transpose time.
pub fn transfer_ratio_percent(transfer_ms: f64, no_bank_conflicts_ms: f64) -> f64 {
    if no_bank_conflicts_ms <= 0.0 {
        return 0.0;
    }
    transfer_ms / no_bank_conflicts_ms * 100.0
}

/// Row-major `value[i] = i` fill.
pub fn fill_sequential(problem: ProblemSize) -> Vec<f32> {
    (0..problem.element_count()).map(|i| i as f32).collect()
}

/// CPU transpose of every `width × height` plane of `input`.
pub fn reference_transpose(input: &[f32], problem: ProblemSize) -> Vec<f32> {
    let (w, h) = (problem.width as usize, problem.height as usize);
    let plane = w * h;
    let mut out = vec![0.0; input.len()];
    for (src, dst) in input.chunks_exact(plane).zip(out.chunks_exact_mut(plane)) {
        for row in 0..h {
            for col in 0..w {
                dst[col * h + row] = src[row * w + col];
            }
        }
    }
    out
}

/// Allocate the buffers, build all three kernels and time each one.
///
/// The granularity defaults to the vendor's coalescing size. With
/// `settings.verify` the output is downloaded after each variant and checked
/// against a CPU reference.
pub fn run_transposition_benchmark(
    ctx: &DeviceContext,
    settings: &BenchSettings,
    loader: &dyn KernelLoader,
) -> Result<BenchmarkReport> {
    let caps = ctx.capabilities();
    let coalesced_bytes =
        settings.coalesced_bytes.unwrap_or_else(|| caps.vendor().default_coalesced_bytes());
    if settings.size < coalesced_bytes {
        return Err(VulkanError::InvalidArgument(format!(
            "array size {} must not be smaller than the coalesced memory size {coalesced_bytes}",
            settings.size
        )));
    }
    if settings.batch == 0 {
        return Err(VulkanError::InvalidArgument("batch must be at least 1".into()));
    }

    let problem = ProblemSize::square(settings.size);
    let bytes = problem.byte_len();
    info!(
        device = %caps.name,
        size = %problem,
        coalesced_bytes,
        buffer_kib = bytes / 1024,
        "starting transposition benchmark"
    );

    let input = allocate_buffer(ctx, &BufferDescriptor::storage(bytes, "input"))?;
    let output = allocate_buffer(ctx, &BufferDescriptor::storage(bytes, "output"))?;

    let kernels = KernelVariant::ALL
        .iter()
        .map(|&variant| {
            ComputeKernel::build(ctx, problem, coalesced_bytes, &input, &output, variant, loader)
        })
        .collect::<Result<Vec<_>>>()?;

    let data = fill_sequential(problem);
    upload_slice(ctx, &data, &input)?;

    let mut variants = Vec::with_capacity(kernels.len());
    for kernel in &kernels {
        let batch = run_batch(ctx, kernel, settings.batch)?;
        if settings.verify {
            verify_output(ctx, &output, &data, problem, kernel.variant())?;
        }
        variants.push(VariantResult {
            variant: kernel.variant(),
            ms_per_dispatch: batch.per_dispatch_ms(),
            batch,
        });
    }

    let ms = |v: KernelVariant| {
        variants.iter().find(|r| r.variant == v).map_or(0.0, |r| r.ms_per_dispatch)
    };
    let no_bank_conflicts_ms = ms(KernelVariant::NoBankConflict);
    let bank_conflicts_ms = ms(KernelVariant::BankConflict);
    let transfer_ms = ms(KernelVariant::PureTransfer);

    Ok(BenchmarkReport {
        device: caps.name.clone(),
        size: settings.size,
        coalesced_bytes,
        buffer_kib: bytes / 1024,
        repetitions: settings.batch,
        no_bank_conflicts_ms,
        bank_conflicts_ms,
        transfer_ms,
        bandwidth_gib_s: bandwidth_gib_s(bytes, transfer_ms),
        transfer_ratio_percent: transfer_ratio_percent(transfer_ms, no_bank_conflicts_ms),
        verified: settings.verify,
        variants,
    })
}

fn verify_output(
    ctx: &DeviceContext,
    output: &GpuBuffer<'_>,
    input: &[f32],
    problem: ProblemSize,
    variant: KernelVariant,
) -> Result<()> {
    let actual: Vec<f32> = download_vec(ctx, output, input.len())?;
    let expected =
        if variant.transposes() { reference_transpose(input, problem) } else { input.to_vec() };
    if let Some(index) = first_mismatch(&actual, &expected) {
        return Err(VulkanError::VerificationFailed {
            variant: variant.name(),
            detail: format!(
                "element {index}: expected {}, got {}",
                expected[index], actual[index]
            ),
        });
    }
    debug!(variant = %variant, "output verified");
    Ok(())
}

fn first_mismatch(actual: &[f32], expected: &[f32]) -> Option<usize> {
    if actual.len() != expected.len() {
        return Some(actual.len().min(expected.len()));
    }
    actual.iter().zip(expected).position(|(a, e)| a.to_bits() != e.to_bits())
}
