//! Batched kernel dispatch timed against the context's single fence.

use crate::context::DeviceContext;
use crate::error::{Result, VulkanError};
use crate::geometry::PushConstants;
use crate::pipeline::ComputeKernel;
use ash::vk;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, info};

/// Wall-clock time for a batch of identical dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BatchTiming {
    pub repetitions: u32,
    pub elapsed: Duration,
}

impl BatchTiming {
    /// Mean time per dispatch.
    pub fn per_dispatch(&self) -> Duration {
        self.elapsed / self.repetitions.max(1)
    }

    /// Mean time per dispatch in milliseconds.
    pub fn per_dispatch_ms(&self) -> f64 {
        self.elapsed.as_secs_f64() * 1000.0 / f64::from(self.repetitions.max(1))
    }
}

/// Append one repetition of `kernel` to `cmd`.
///
/// Records push constants, pipeline and descriptor-set binds, the dispatch
/// and a compute→compute barrier so the next repetition sees this one's
/// writes.
pub fn record_dispatch(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    kernel: &ComputeKernel<'_>,
    push: PushConstants,
) {
    let [x, y, z] = kernel.dispatch_grid();
    let barrier = [vk::MemoryBarrier::default()
        .src_access_mask(vk::AccessFlags::SHADER_WRITE)
        .dst_access_mask(vk::AccessFlags::SHADER_READ)];
    unsafe {
        device.cmd_push_constants(
            cmd,
            kernel.pipeline_layout(),
            vk::ShaderStageFlags::COMPUTE,
            0,
            bytemuck::bytes_of(&push),
        );
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, kernel.pipeline());
        device.cmd_bind_descriptor_sets(
            cmd,
            vk::PipelineBindPoint::COMPUTE,
            kernel.pipeline_layout(),
            0,
            &[kernel.descriptor_set()],
            &[],
        );
        device.cmd_dispatch(cmd, x, y, z);
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::PipelineStageFlags::COMPUTE_SHADER,
            vk::DependencyFlags::empty(),
            &barrier,
            &[],
            &[],
        );
    }
}

/// Run `kernel` `repetitions` times in one submission with push tag 0.
pub fn run_batch(
    ctx: &DeviceContext,
    kernel: &ComputeKernel<'_>,
    repetitions: u32,
) -> Result<BatchTiming> {
    run_batch_tagged(ctx, kernel, repetitions, PushConstants::default())
}

/// Run `kernel` `repetitions` times in one submission with an explicit push
/// tag, returning the elapsed wall-clock time.
pub fn run_batch_tagged(
    ctx: &DeviceContext,
    kernel: &ComputeKernel<'_>,
    repetitions: u32,
    push: PushConstants,
) -> Result<BatchTiming> {
    if repetitions == 0 {
        return Err(VulkanError::InvalidArgument("repetitions must be at least 1".into()));
    }
    if ctx.device().handle() != kernel.context().device().handle() {
        return Err(VulkanError::InvalidArgument(
            "kernel was built on a different device context".into(),
        ));
    }
    kernel.geometry().dispatch_grid()?;

    debug!(
        variant = %kernel.variant(),
        repetitions,
        grid = ?kernel.dispatch_grid(),
        push_id = push.push_id,
        "recording batch"
    );
    let elapsed = ctx.submit_one_shot("dispatch", |device, cmd| {
        for _ in 0..repetitions {
            record_dispatch(device, cmd, kernel, push);
        }
    })?;

    let timing = BatchTiming { repetitions, elapsed };
    info!(
        variant = %kernel.variant(),
        repetitions,
        ms_per_dispatch = timing.per_dispatch_ms(),
        "batch complete"
    );
    Ok(timing)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_dispatch_average() {
        let t = BatchTiming { repetitions: 1000, elapsed: Duration::from_millis(250) };
        assert_eq!(t.per_dispatch(), Duration::from_micros(250));
        assert!((t.per_dispatch_ms() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn single_repetition() {
        let t = BatchTiming { repetitions: 1, elapsed: Duration::from_micros(1500) };
        assert!((t.per_dispatch_ms() - 1.5).abs() < 1e-12);
    }
}
