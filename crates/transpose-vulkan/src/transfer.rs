//! Host↔device copies through scoped staging buffers.

use crate::context::DeviceContext;
use crate::error::{Result, VulkanError};
use crate::memory::{BufferDescriptor, GpuBuffer, allocate_buffer};
use ash::vk;
use bytemuck::Pod;
use tracing::debug;

fn check_size(op: &str, size: usize, buffer: &GpuBuffer<'_>) -> Result<()> {
    if size == 0 {
        return Err(VulkanError::InvalidArgument(format!("{op}: zero-sized transfer")));
    }
    if size as vk::DeviceSize > buffer.size() {
        return Err(VulkanError::InvalidArgument(format!(
            "{op}: {size} bytes exceeds buffer '{}' of {} bytes",
            buffer.label(),
            buffer.size()
        )));
    }
    Ok(())
}

/// Copy `host` into the start of the device-local buffer `dest`.
///
/// Blocks until the copy has completed on the GPU.
pub fn upload_to_device(ctx: &DeviceContext, host: &[u8], dest: &GpuBuffer<'_>) -> Result<()> {
    check_size("upload", host.len(), dest)?;
    let size = host.len() as vk::DeviceSize;

    let staging = allocate_buffer(ctx, &BufferDescriptor::upload_staging(size, "upload-staging"))?;
    staging.write_bytes(host)?;

    let region = [vk::BufferCopy::default().size(size)];
    ctx.submit_one_shot("upload", |device, cmd| unsafe {
        device.cmd_copy_buffer(cmd, staging.handle(), dest.handle(), &region);
    })?;
    debug!(bytes = size, dest = dest.label(), "uploaded to device");
    Ok(())
}

/// Read the first `size` bytes of `src` back to the host.
pub fn download_from_device(
    ctx: &DeviceContext,
    src: &GpuBuffer<'_>,
    size: usize,
) -> Result<Vec<u8>> {
    check_size("download", size, src)?;
    let device_size = size as vk::DeviceSize;

    let staging =
        allocate_buffer(ctx, &BufferDescriptor::readback_staging(device_size, "readback-staging"))?;

    let region = [vk::BufferCopy::default().size(device_size)];
    ctx.submit_one_shot("download", |device, cmd| unsafe {
        device.cmd_copy_buffer(cmd, src.handle(), staging.handle(), &region);
    })?;
    let bytes = staging.read_bytes(size)?;
    debug!(bytes = device_size, src = src.label(), "downloaded from device");
    Ok(bytes)
}

/// Typed wrapper around [`upload_to_device`].
pub fn upload_slice<T: Pod>(ctx: &DeviceContext, data: &[T], dest: &GpuBuffer<'_>) -> Result<()> {
    upload_to_device(ctx, bytemuck::cast_slice(data), dest)
}

/// Typed wrapper around [`download_from_device`]: reads `len` elements.
pub fn download_vec<T: Pod>(
    ctx: &DeviceContext,
    src: &GpuBuffer<'_>,
    len: usize,
) -> Result<Vec<T>> {
    let bytes = download_from_device(ctx, src, len * std::mem::size_of::<T>())?;
    let mut out = vec![T::zeroed(); len];
    bytemuck::cast_slice_mut::<T, u8>(&mut out).copy_from_slice(&bytes);
    Ok(out)
}
