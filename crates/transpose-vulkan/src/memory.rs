//! Buffer allocation with explicit memory residency.

use crate::context::{DeviceContext, Retired};
use crate::error::{Result, VulkanError};
use ash::vk;
use std::fmt;
use tracing::debug;

/// Where a buffer's backing memory lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Residency {
    /// GPU-only memory; reachable from the host through staging copies.
    DeviceLocal,
    /// Host-mappable memory.
    HostVisible,
}

impl Residency {
    fn of(flags: vk::MemoryPropertyFlags) -> Self {
        if flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE) {
            Self::HostVisible
        } else {
            Self::DeviceLocal
        }
    }
}

/// Describes a buffer allocation request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BufferDescriptor {
    /// Size in bytes.
    pub size: vk::DeviceSize,
    /// Vulkan usage flags for the buffer.
    pub usage: vk::BufferUsageFlags,
    /// Required memory property flags.
    pub memory: vk::MemoryPropertyFlags,
    /// Human-readable label for debugging.
    pub label: String,
}

impl BufferDescriptor {
    /// Device-local storage buffer that can also be a copy source or target.
    pub fn storage(size: vk::DeviceSize, label: impl Into<String>) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::STORAGE_BUFFER
                | vk::BufferUsageFlags::TRANSFER_SRC
                | vk::BufferUsageFlags::TRANSFER_DST,
            memory: vk::MemoryPropertyFlags::DEVICE_LOCAL,
            label: label.into(),
        }
    }

    /// Host-visible buffer used as the source of a host→device copy.
    pub fn upload_staging(size: vk::DeviceSize, label: impl Into<String>) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_SRC,
            memory: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            label: label.into(),
        }
    }

    /// Host-visible buffer used as the target of a device→host copy.
    pub fn readback_staging(size: vk::DeviceSize, label: impl Into<String>) -> Self {
        Self {
            size,
            usage: vk::BufferUsageFlags::TRANSFER_DST,
            memory: vk::MemoryPropertyFlags::HOST_VISIBLE
                | vk::MemoryPropertyFlags::HOST_COHERENT,
            label: label.into(),
        }
    }

    pub fn residency(&self) -> Residency {
        Residency::of(self.memory)
    }
}

/// A buffer together with its bound memory. Destroyed on drop.
pub struct GpuBuffer<'ctx> {
    ctx: &'ctx DeviceContext,
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    size: vk::DeviceSize,
    allocation_size: vk::DeviceSize,
    usage: vk::BufferUsageFlags,
    residency: Residency,
    label: String,
}

impl GpuBuffer<'_> {
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    /// Requested size in bytes.
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }

    /// Size of the backing allocation, which may be rounded up by the driver.
    pub fn allocation_size(&self) -> vk::DeviceSize {
        self.allocation_size
    }

    pub fn residency(&self) -> Residency {
        self.residency
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    /// Copy `data` into the start of a host-visible buffer.
    pub fn write_bytes(&self, data: &[u8]) -> Result<()> {
        self.check_host_access(data.len())?;
        let device = self.ctx.device();
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, data.len() as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::call("vkMapMemory"))?;
            std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast::<u8>(), data.len());
            device.unmap_memory(self.memory);
        }
        Ok(())
    }

    /// Copy the first `len` bytes of a host-visible buffer out.
    pub fn read_bytes(&self, len: usize) -> Result<Vec<u8>> {
        self.check_host_access(len)?;
        let device = self.ctx.device();
        let mut out = vec![0u8; len];
        unsafe {
            let ptr = device
                .map_memory(self.memory, 0, len as vk::DeviceSize, vk::MemoryMapFlags::empty())
                .map_err(VulkanError::call("vkMapMemory"))?;
            std::ptr::copy_nonoverlapping(ptr.cast::<u8>(), out.as_mut_ptr(), len);
            device.unmap_memory(self.memory);
        }
        Ok(out)
    }

    fn check_host_access(&self, len: usize) -> Result<()> {
        if self.residency != Residency::HostVisible {
            return Err(VulkanError::InvalidArgument(format!(
                "buffer '{}' is not host-visible",
                self.label
            )));
        }
        if len == 0 || len as vk::DeviceSize > self.size {
            return Err(VulkanError::InvalidArgument(format!(
                "host access of {len} bytes to buffer '{}' of {} bytes",
                self.label, self.size
            )));
        }
        Ok(())
    }
}

impl fmt::Debug for GpuBuffer<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuBuffer")
            .field("label", &self.label)
            .field("size", &self.size)
            .field("allocation_size", &self.allocation_size)
            .field("usage", &self.usage)
            .field("residency", &self.residency)
            .finish_non_exhaustive()
    }
}

impl Drop for GpuBuffer<'_> {
    fn drop(&mut self) {
        self.ctx.release(Retired::Buffer { buffer: self.buffer, memory: self.memory });
        debug!(label = %self.label, "released buffer");
    }
}

/// Find a memory type index matching the requested properties.
///
/// Scans in ascending order and returns the first type whose bit is set in
/// `type_filter` and whose flags include all of `required_flags`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    required_flags: vk::MemoryPropertyFlags,
) -> Result<u32> {
    let count = memory_properties.memory_type_count.min(vk::MAX_MEMORY_TYPES as u32);
    for i in 0..count {
        let type_ok = (type_filter & (1 << i)) != 0;
        let flags_ok = memory_properties.memory_types[i as usize]
            .property_flags
            .contains(required_flags);
        if type_ok && flags_ok {
            return Ok(i);
        }
    }
    Err(VulkanError::NoSuitableMemoryType(format!(
        "no memory type with filter={type_filter:#x} flags={required_flags:?}"
    )))
}

/// Create a buffer, allocate matching memory and bind it.
///
/// Zero-sized requests are rejected before the driver is called. A failure
/// after the buffer exists releases everything acquired so far.
pub fn allocate_buffer<'ctx>(
    ctx: &'ctx DeviceContext,
    desc: &BufferDescriptor,
) -> Result<GpuBuffer<'ctx>> {
    if desc.size == 0 {
        return Err(VulkanError::ResourceCreation {
            op: "vkCreateBuffer",
            result: vk::Result::ERROR_INITIALIZATION_FAILED,
        });
    }
    let device = ctx.device();

    let buffer_info = vk::BufferCreateInfo::default()
        .size(desc.size)
        .usage(desc.usage)
        .sharing_mode(vk::SharingMode::EXCLUSIVE);
    let buffer = unsafe { device.create_buffer(&buffer_info, None) }
        .map_err(VulkanError::creation("vkCreateBuffer"))?;

    let requirements = unsafe { device.get_buffer_memory_requirements(buffer) };
    let memory_type_index = match ctx.find_memory_type(requirements.memory_type_bits, desc.memory)
    {
        Ok(index) => index,
        Err(e) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(e);
        }
    };

    let alloc_info = vk::MemoryAllocateInfo::default()
        .allocation_size(requirements.size)
        .memory_type_index(memory_type_index);
    let memory = match unsafe { device.allocate_memory(&alloc_info, None) } {
        Ok(memory) => memory,
        Err(result) => {
            unsafe { device.destroy_buffer(buffer, None) };
            return Err(VulkanError::creation("vkAllocateMemory")(result));
        }
    };

    if let Err(result) = unsafe { device.bind_buffer_memory(buffer, memory, 0) } {
        unsafe {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
        }
        return Err(VulkanError::creation("vkBindBufferMemory")(result));
    }

    debug!(
        label = %desc.label,
        size = desc.size,
        allocation_size = requirements.size,
        memory_type_index,
        "allocated buffer"
    );

    Ok(GpuBuffer {
        ctx,
        buffer,
        memory,
        size: desc.size,
        allocation_size: requirements.size,
        usage: desc.usage,
        residency: desc.residency(),
        label: desc.label.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn props(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut props = vk::PhysicalDeviceMemoryProperties {
            memory_type_count: types.len() as u32,
            ..Default::default()
        };
        for (slot, flags) in props.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        props
    }

    const DL: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::DEVICE_LOCAL;
    const HV: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_VISIBLE;
    const HC: vk::MemoryPropertyFlags = vk::MemoryPropertyFlags::HOST_COHERENT;

    #[test]
    fn descriptor_constructors() {
        let storage = BufferDescriptor::storage(4096, "input");
        assert_eq!(storage.residency(), Residency::DeviceLocal);
        assert!(storage.usage.contains(vk::BufferUsageFlags::STORAGE_BUFFER));
        assert!(storage.usage.contains(vk::BufferUsageFlags::TRANSFER_SRC));
        assert!(storage.usage.contains(vk::BufferUsageFlags::TRANSFER_DST));

        let up = BufferDescriptor::upload_staging(16, "up");
        assert_eq!(up.residency(), Residency::HostVisible);
        assert_eq!(up.usage, vk::BufferUsageFlags::TRANSFER_SRC);
        assert_eq!(up.memory, HV | HC);

        let down = BufferDescriptor::readback_staging(16, "down");
        assert_eq!(down.usage, vk::BufferUsageFlags::TRANSFER_DST);
    }

    #[test]
    fn find_memory_type_no_match() {
        let props = vk::PhysicalDeviceMemoryProperties::default();
        let result = find_memory_type(&props, 0xFFFF_FFFF, DL);
        assert!(matches!(result, Err(VulkanError::NoSuitableMemoryType(_))));
    }

    #[test]
    fn zero_type_filter_never_matches() {
        let p = props(&[DL | HV, DL | HV, DL | HV]);
        let result = find_memory_type(&p, 0, vk::MemoryPropertyFlags::empty());
        assert!(matches!(result, Err(VulkanError::NoSuitableMemoryType(_))));
    }

    #[test]
    fn picks_host_visible_coherent() {
        let p = props(&[DL, HV, HV | HC]);
        assert_eq!(find_memory_type(&p, 0b111, HV | HC).unwrap(), 2);
        assert_eq!(find_memory_type(&p, 0b111, DL).unwrap(), 0);
    }

    #[test]
    fn respects_type_filter() {
        let p = props(&[DL, DL | HV]);
        assert_eq!(find_memory_type(&p, 0b10, DL).unwrap(), 1);
        assert!(find_memory_type(&p, 0b100, DL).is_err());
    }

    #[test]
    fn empty_flags_match_first_allowed() {
        let p = props(&[DL, HV]);
        assert_eq!(
            find_memory_type(&p, 0b10, vk::MemoryPropertyFlags::empty()).unwrap(),
            1
        );
    }

    proptest! {
        #[test]
        fn result_is_lowest_qualifying_index(
            raw in proptest::collection::vec(0u32..16, 1..=32),
            filter in any::<u32>(),
            wanted in 0u32..16,
        ) {
            let types: Vec<_> = raw.iter().map(|&b| vk::MemoryPropertyFlags::from_raw(b)).collect();
            let wanted = vk::MemoryPropertyFlags::from_raw(wanted);
            let p = props(&types);
            let expected = types
                .iter()
                .enumerate()
                .find(|(i, f)| filter & (1 << i) != 0 && f.contains(wanted))
                .map(|(i, _)| i as u32);
            match (find_memory_type(&p, filter, wanted), expected) {
                (Ok(got), Some(want)) => prop_assert_eq!(got, want),
                (Err(_), None) => {}
                (got, want) => prop_assert!(false, "got {:?}, expected {:?}", got.ok(), want),
            }
        }
    }
}
