//! Physical device enumeration, selection and capability snapshots.

use crate::error::{Result, VulkanError};
use ash::vk;
use serde::Serialize;
use std::fmt;

/// GPU vendor, derived from the PCI vendor id reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Vendor {
    Nvidia,
    Amd,
    Intel,
    Arm,
    Other(u32),
}

impl Vendor {
    pub const NVIDIA_ID: u32 = 0x10DE;
    pub const AMD_ID: u32 = 0x1002;
    pub const INTEL_ID: u32 = 0x8086;
    pub const ARM_ID: u32 = 0x13B5;

    pub fn from_id(vendor_id: u32) -> Self {
        match vendor_id {
            Self::NVIDIA_ID => Self::Nvidia,
            Self::AMD_ID => Self::Amd,
            Self::INTEL_ID => Self::Intel,
            Self::ARM_ID => Self::Arm,
            other => Self::Other(other),
        }
    }

    /// Bytes the memory subsystem coalesces into one transaction.
    ///
    /// NVIDIA parts since Pascal use 32-byte sectors; everything else is
    /// sized for 64.
    pub fn default_coalesced_bytes(self) -> u32 {
        match self {
            Self::Nvidia => 32,
            _ => 64,
        }
    }
}

impl fmt::Display for Vendor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nvidia => write!(f, "NVIDIA"),
            Self::Amd => write!(f, "AMD"),
            Self::Intel => write!(f, "Intel"),
            Self::Arm => write!(f, "ARM"),
            Self::Other(id) => write!(f, "vendor {id:#06x}"),
        }
    }
}

/// Compute-relevant device limits used to validate kernel geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ComputeLimits {
    pub max_workgroup_size: [u32; 3],
    pub max_workgroup_invocations: u32,
    pub max_shared_memory_bytes: u32,
}

impl ComputeLimits {
    pub fn from_vk(limits: &vk::PhysicalDeviceLimits) -> Self {
        Self {
            max_workgroup_size: limits.max_compute_work_group_size,
            max_workgroup_invocations: limits.max_compute_work_group_invocations,
            max_shared_memory_bytes: limits.max_compute_shared_memory_size,
        }
    }
}

/// One entry of the device list, as printed by `--devices`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub index: usize,
    pub name: String,
    pub vendor: Vendor,
    pub device_type: String,
    pub api_version: String,
}

impl DeviceInfo {
    pub(crate) fn from_properties(index: usize, props: &vk::PhysicalDeviceProperties) -> Self {
        Self {
            index,
            name: device_name(props),
            vendor: Vendor::from_id(props.vendor_id),
            device_type: device_type_name(props.device_type).to_string(),
            api_version: format_api_version(props.api_version),
        }
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Device id: {} name: {} API:{}", self.index, self.name, self.api_version)
    }
}

/// Snapshot of the selected physical device taken at context creation.
#[derive(Debug, Clone)]
pub struct DeviceCapabilities {
    pub name: String,
    pub vendor_id: u32,
    pub device_type: vk::PhysicalDeviceType,
    pub api_version: u32,
    pub memory: vk::PhysicalDeviceMemoryProperties,
    pub limits: ComputeLimits,
    pub shader_float64: bool,
}

impl DeviceCapabilities {
    pub fn vendor(&self) -> Vendor {
        Vendor::from_id(self.vendor_id)
    }
}

/// Validate `index` against the number of enumerated devices.
pub fn select_device(count: usize, index: usize) -> Result<usize> {
    if count == 0 {
        return Err(VulkanError::NoDeviceFound);
    }
    if index >= count {
        return Err(VulkanError::IndexOutOfRange { index, count });
    }
    Ok(index)
}

/// Index of the first queue family that has queues and advertises compute.
pub fn find_compute_queue_family(families: &[vk::QueueFamilyProperties]) -> Option<u32> {
    families
        .iter()
        .position(|f| f.queue_count > 0 && f.queue_flags.contains(vk::QueueFlags::COMPUTE))
        .map(|i| i as u32)
}

/// Render a packed Vulkan version as `major.minor.patch`.
pub fn format_api_version(version: u32) -> String {
    format!(
        "{}.{}.{}",
        vk::api_version_major(version),
        vk::api_version_minor(version),
        vk::api_version_patch(version)
    )
}

pub(crate) fn device_name(props: &vk::PhysicalDeviceProperties) -> String {
    props
        .device_name_as_c_str()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "<unnamed device>".to_string())
}

fn device_type_name(ty: vk::PhysicalDeviceType) -> &'static str {
    match ty {
        vk::PhysicalDeviceType::DISCRETE_GPU => "discrete",
        vk::PhysicalDeviceType::INTEGRATED_GPU => "integrated",
        vk::PhysicalDeviceType::VIRTUAL_GPU => "virtual",
        vk::PhysicalDeviceType::CPU => "cpu",
        _ => "other",
    }
}
