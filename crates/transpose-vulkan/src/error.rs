//! Vulkan harness error types.

use ash::vk;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors produced by the Vulkan transposition harness.
#[derive(Debug, Error)]
pub enum VulkanError {
    #[error("failed to load the Vulkan loader: {0}")]
    Loader(String),

    #[error("validation layer {0} is not available")]
    LayerNotPresent(String),

    #[error("physical device enumeration failed: {0}")]
    DeviceEnumeration(vk::Result),

    #[error("no Vulkan-capable device found")]
    NoDeviceFound,

    #[error("device index {index} is out of range ({count} device(s) available)")]
    IndexOutOfRange { index: usize, count: usize },

    #[error("device '{0}' exposes no compute-capable queue family")]
    NoComputeQueue(String),

    #[error("no suitable memory type: {0}")]
    NoSuitableMemoryType(String),

    #[error("{op} failed: {result}")]
    ResourceCreation { op: &'static str, result: vk::Result },

    #[error("shader binary not found: {}", path.display())]
    ShaderNotFound {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown kernel variant id {0}")]
    UnknownVariant(u32),

    #[error("{op} did not complete within {timeout:?}")]
    TimeoutExceeded { op: &'static str, timeout: Duration },

    #[error("problem size {size:?} is not divisible by workgroup {workgroup:?}")]
    InvalidGridAlignment { size: [u32; 3], workgroup: [u32; 3] },

    #[error("invalid coalesced memory size {bytes} bytes: {reason}")]
    InvalidCoalescing { bytes: u32, reason: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("{op} failed: {result}")]
    Vulkan { op: &'static str, result: vk::Result },

    #[error("output verification failed for {variant}: {detail}")]
    VerificationFailed { variant: &'static str, detail: String },
}

impl VulkanError {
    /// Wrap a failed resource-creating Vulkan call.
    pub(crate) fn creation(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::ResourceCreation { op, result }
    }

    /// Wrap any other failed Vulkan call.
    pub(crate) fn call(op: &'static str) -> impl FnOnce(vk::Result) -> Self {
        move |result| Self::Vulkan { op, result }
    }

    /// Numeric status reported to the shell when a run aborts.
    ///
    /// Errors wrapping a `VkResult` report its raw value; the rest report the
    /// status code the equivalent Vulkan failure carries.
    pub fn code(&self) -> i32 {
        let status = match self {
            Self::DeviceEnumeration(result)
            | Self::ResourceCreation { result, .. }
            | Self::Vulkan { result, .. } => *result,
            Self::Loader(_) => vk::Result::ERROR_INCOMPATIBLE_DRIVER,
            Self::LayerNotPresent(_) => vk::Result::ERROR_LAYER_NOT_PRESENT,
            Self::NoDeviceFound => vk::Result::ERROR_DEVICE_LOST,
            Self::TimeoutExceeded { .. } => vk::Result::TIMEOUT,
            Self::IndexOutOfRange { .. }
            | Self::NoComputeQueue(_)
            | Self::NoSuitableMemoryType(_)
            | Self::ShaderNotFound { .. }
            | Self::UnknownVariant(_)
            | Self::InvalidGridAlignment { .. }
            | Self::InvalidCoalescing { .. }
            | Self::InvalidArgument(_)
            | Self::VerificationFailed { .. } => vk::Result::ERROR_INITIALIZATION_FAILED,
        };
        status.as_raw()
    }
}

/// Convenience result alias.
pub type Result<T> = std::result::Result<T, VulkanError>;
