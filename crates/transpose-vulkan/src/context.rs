//! Device context: instance, logical device, compute queue and the single
//! completion fence every submission goes through.

use crate::debug::{self, DiagnosticSink, TracingSink};
use crate::device::{
    ComputeLimits, DeviceCapabilities, DeviceInfo, device_name, find_compute_queue_family,
    format_api_version, select_device,
};
use crate::error::{Result, VulkanError};
use crate::memory;
use ash::vk;
use std::ffi::{CStr, CString, c_char};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Name of the Khronos validation layer.
pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";

/// Default bound on a single fence wait.
pub const DEFAULT_FENCE_TIMEOUT: Duration = Duration::from_secs(100);

/// Options for [`DeviceContext::new`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextConfig {
    /// Index into the physical device list.
    pub device_index: usize,
    /// Enable `VK_LAYER_KHRONOS_validation` and the debug messenger.
    pub enable_validation: bool,
    /// Application name reported to the loader.
    pub application_name: String,
    /// Upper bound on every fence wait.
    pub fence_timeout: Duration,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            device_index: 0,
            enable_validation: false,
            application_name: "vk-transpose".to_string(),
            fence_timeout: DEFAULT_FENCE_TIMEOUT,
        }
    }
}

impl ContextConfig {
    pub(crate) fn fence_timeout_nanos(&self) -> u64 {
        u64::try_from(self.fence_timeout.as_nanos()).unwrap_or(u64::MAX)
    }
}

// ── Instance ────────────────────────────────────────────────────────────────

struct Messenger {
    loader: ash::ext::debug_utils::Instance,
    handle: vk::DebugUtilsMessengerEXT,
    // Boxed twice so the callback's user-data pointer stays valid when the
    // context moves.
    _sink: Box<Box<dyn DiagnosticSink>>,
}

/// Loader entry plus instance; destroys the messenger and instance on drop.
struct InstanceHandle {
    _entry: ash::Entry,
    instance: ash::Instance,
    messenger: Option<Messenger>,
}

impl InstanceHandle {
    fn create(
        application_name: &str,
        diagnostics: Option<Arc<dyn DiagnosticSink>>,
    ) -> Result<Self> {
        let entry =
            unsafe { ash::Entry::load() }.map_err(|e| VulkanError::Loader(e.to_string()))?;

        if diagnostics.is_some() {
            let layers = unsafe { entry.enumerate_instance_layer_properties() }
                .map_err(VulkanError::call("vkEnumerateInstanceLayerProperties"))?;
            let present = layers
                .iter()
                .any(|l| l.layer_name_as_c_str().is_ok_and(|name| name == VALIDATION_LAYER));
            if !present {
                return Err(VulkanError::LayerNotPresent(
                    VALIDATION_LAYER.to_string_lossy().into_owned(),
                ));
            }
        }

        let app_name = CString::new(application_name).map_err(|_| {
            VulkanError::InvalidArgument("application name contains a NUL byte".into())
        })?;
        let app_info = vk::ApplicationInfo::default()
            .application_name(&app_name)
            .application_version(1)
            .engine_name(c"transpose-vulkan")
            .engine_version(1)
            .api_version(vk::API_VERSION_1_1);

        let sink: Option<Box<Box<dyn DiagnosticSink>>> =
            diagnostics.map(|s| Box::new(Box::new(SharedSink(s)) as Box<dyn DiagnosticSink>));

        let layer_names: Vec<*const c_char> =
            if sink.is_some() { vec![VALIDATION_LAYER.as_ptr()] } else { Vec::new() };
        let extension_names: Vec<*const c_char> =
            if sink.is_some() { vec![ash::ext::debug_utils::NAME.as_ptr()] } else { Vec::new() };

        let mut instance_debug = sink.as_deref().map(debug::messenger_create_info);
        let mut create_info = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_layer_names(&layer_names)
            .enabled_extension_names(&extension_names);
        if let Some(debug_info) = instance_debug.as_mut() {
            create_info = create_info.push_next(debug_info);
        }

        let instance = unsafe { entry.create_instance(&create_info, None) }
            .map_err(VulkanError::creation("vkCreateInstance"))?;
        debug!(validation = sink.is_some(), "created Vulkan instance");

        let messenger = match sink {
            Some(sink) => {
                let loader = ash::ext::debug_utils::Instance::new(&entry, &instance);
                let info = debug::messenger_create_info(&sink);
                match unsafe { loader.create_debug_utils_messenger(&info, None) } {
                    Ok(handle) => Some(Messenger { loader, handle, _sink: sink }),
                    Err(result) => {
                        unsafe { instance.destroy_instance(None) };
                        return Err(VulkanError::creation("vkCreateDebugUtilsMessengerEXT")(
                            result,
                        ));
                    }
                }
            }
            None => None,
        };

        Ok(Self { _entry: entry, instance, messenger })
    }
}

impl Drop for InstanceHandle {
    fn drop(&mut self) {
        unsafe {
            if let Some(m) = self.messenger.take() {
                m.loader.destroy_debug_utils_messenger(m.handle, None);
            }
            self.instance.destroy_instance(None);
        }
        debug!("destroyed Vulkan instance");
    }
}

struct SharedSink(Arc<dyn DiagnosticSink>);

impl DiagnosticSink for SharedSink {
    fn message(&self, severity: debug::Severity, kind: &str, text: &str) {
        self.0.message(severity, kind, text);
    }
}

// ── Device context ──────────────────────────────────────────────────────────

/// Handles whose destruction is held back while a submission that may
/// reference them is still executing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Retired {
    Buffer {
        buffer: vk::Buffer,
        memory: vk::DeviceMemory,
    },
    Kernel {
        descriptor_pool: vk::DescriptorPool,
        set_layout: vk::DescriptorSetLayout,
        pipeline_layout: vk::PipelineLayout,
        pipeline: vk::Pipeline,
    },
}

impl Retired {
    /// # Safety
    /// No pending GPU work may reference the handles.
    unsafe fn destroy(self, device: &ash::Device) {
        unsafe {
            match self {
                Retired::Buffer { buffer, memory } => {
                    device.destroy_buffer(buffer, None);
                    device.free_memory(memory, None);
                }
                Retired::Kernel { descriptor_pool, set_layout, pipeline_layout, pipeline } => {
                    device.destroy_descriptor_pool(descriptor_pool, None);
                    device.destroy_descriptor_set_layout(set_layout, None);
                    device.destroy_pipeline_layout(pipeline_layout, None);
                    device.destroy_pipeline(pipeline, None);
                }
            }
        }
    }
}

/// State of the single completion fence.
#[derive(Debug, Default)]
struct FenceSlot {
    /// Command buffer whose submission timed out and may still be executing.
    pending: Option<vk::CommandBuffer>,
    /// Released while `pending` was set; destroyed once the fence signals.
    retired: Vec<Retired>,
}

impl FenceSlot {
    /// Queue `item` behind the pending submission, or hand it back when
    /// nothing is in flight.
    fn defer(&mut self, item: Retired) -> Option<Retired> {
        if self.pending.is_some() {
            self.retired.push(item);
            None
        } else {
            Some(item)
        }
    }
}

/// Owns the GPU connection and the resources shared by every submission.
///
/// Buffers and kernels borrow the context, so they are always destroyed
/// before it.
pub struct DeviceContext {
    config: ContextConfig,
    device: ash::Device,
    queue: vk::Queue,
    queue_family_index: u32,
    fence: vk::Fence,
    command_pool: vk::CommandPool,
    fence_slot: Mutex<FenceSlot>,
    capabilities: DeviceCapabilities,
    // Declared last: dropped after `Drop::drop` has torn down the device.
    instance: InstanceHandle,
}

impl DeviceContext {
    /// Create a context on `config.device_index`, routing validation output
    /// to `tracing` when validation is enabled.
    pub fn new(config: &ContextConfig) -> Result<Self> {
        Self::with_diagnostics(config, Arc::new(TracingSink))
    }

    /// Create a context with a caller-provided diagnostic sink. The sink is
    /// only attached when `config.enable_validation` is set.
    pub fn with_diagnostics(
        config: &ContextConfig,
        sink: Arc<dyn DiagnosticSink>,
    ) -> Result<Self> {
        let diagnostics = config.enable_validation.then_some(sink);
        let instance = InstanceHandle::create(&config.application_name, diagnostics)?;
        let vk_instance = &instance.instance;

        let physical_devices = unsafe { vk_instance.enumerate_physical_devices() }
            .map_err(VulkanError::DeviceEnumeration)?;
        let index = select_device(physical_devices.len(), config.device_index)?;
        let physical_device = physical_devices[index];

        let props = unsafe { vk_instance.get_physical_device_properties(physical_device) };
        let name = device_name(&props);
        let families =
            unsafe { vk_instance.get_physical_device_queue_family_properties(physical_device) };
        let queue_family_index = find_compute_queue_family(&families)
            .ok_or_else(|| VulkanError::NoComputeQueue(name.clone()))?;

        let supported = unsafe { vk_instance.get_physical_device_features(physical_device) };
        let shader_float64 = supported.shader_float64 == vk::TRUE;
        if !shader_float64 {
            warn!(device = %name, "shaderFloat64 not supported, creating device without it");
        }
        let features = vk::PhysicalDeviceFeatures::default().shader_float64(shader_float64);

        let priorities = [1.0_f32];
        let queue_info = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(queue_family_index)
            .queue_priorities(&priorities)];
        let device_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(&queue_info)
            .enabled_features(&features);
        let device = unsafe { vk_instance.create_device(physical_device, &device_info, None) }
            .map_err(VulkanError::creation("vkCreateDevice"))?;

        let queue = unsafe { device.get_device_queue(queue_family_index, 0) };

        let fence = match unsafe { device.create_fence(&vk::FenceCreateInfo::default(), None) } {
            Ok(fence) => fence,
            Err(result) => {
                unsafe { device.destroy_device(None) };
                return Err(VulkanError::creation("vkCreateFence")(result));
            }
        };

        let pool_info = vk::CommandPoolCreateInfo::default()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(queue_family_index);
        let command_pool = match unsafe { device.create_command_pool(&pool_info, None) } {
            Ok(pool) => pool,
            Err(result) => {
                unsafe {
                    device.destroy_fence(fence, None);
                    device.destroy_device(None);
                }
                return Err(VulkanError::creation("vkCreateCommandPool")(result));
            }
        };

        let memory = unsafe { vk_instance.get_physical_device_memory_properties(physical_device) };
        let capabilities = DeviceCapabilities {
            name,
            vendor_id: props.vendor_id,
            device_type: props.device_type,
            api_version: props.api_version,
            memory,
            limits: ComputeLimits::from_vk(&props.limits),
            shader_float64,
        };

        info!(
            index,
            device = %capabilities.name,
            vendor = %capabilities.vendor(),
            api = %format_api_version(capabilities.api_version),
            queue_family = queue_family_index,
            "selected Vulkan device"
        );

        Ok(Self {
            config: config.clone(),
            device,
            queue,
            queue_family_index,
            fence,
            command_pool,
            fence_slot: Mutex::new(FenceSlot::default()),
            capabilities,
            instance,
        })
    }

    /// Enumerate physical devices on a throwaway instance without layers.
    pub fn list_devices() -> Result<Vec<DeviceInfo>> {
        let handle = InstanceHandle::create("vk-transpose", None)?;
        let devices = unsafe { handle.instance.enumerate_physical_devices() }
            .map_err(VulkanError::DeviceEnumeration)?;
        Ok(devices
            .iter()
            .enumerate()
            .map(|(index, &pd)| {
                let props = unsafe { handle.instance.get_physical_device_properties(pd) };
                DeviceInfo::from_properties(index, &props)
            })
            .collect())
    }

    /// First memory type allowed by `type_bits` that has every flag in `flags`.
    pub fn find_memory_type(&self, type_bits: u32, flags: vk::MemoryPropertyFlags) -> Result<u32> {
        memory::find_memory_type(&self.capabilities.memory, type_bits, flags)
    }

    /// Record and submit a one-shot command buffer, then block until it
    /// completes.
    ///
    /// Returns the wall-clock time from just before submission to just after
    /// the fence signals. Submissions are serialized; the fence is reset
    /// before this returns so the next caller can reuse it.
    pub fn submit_one_shot<F>(&self, label: &'static str, record: F) -> Result<Duration>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let mut slot = self.lock_fence();
        self.reclaim_pending(&mut slot, label)?;

        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let cmd = unsafe { self.device.allocate_command_buffers(&alloc_info) }
            .map_err(VulkanError::creation("vkAllocateCommandBuffers"))?[0];
        let guard = CommandBufferGuard { device: &self.device, pool: self.command_pool, cmd };

        let begin = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe { self.device.begin_command_buffer(cmd, &begin) }
            .map_err(VulkanError::call("vkBeginCommandBuffer"))?;
        record(&self.device, cmd);
        unsafe { self.device.end_command_buffer(cmd) }
            .map_err(VulkanError::call("vkEndCommandBuffer"))?;

        let cmds = [cmd];
        let submit = [vk::SubmitInfo::default().command_buffers(&cmds)];
        let start = Instant::now();
        unsafe { self.device.queue_submit(self.queue, &submit, self.fence) }
            .map_err(VulkanError::call("vkQueueSubmit"))?;

        match unsafe {
            self.device.wait_for_fences(&[self.fence], true, self.config.fence_timeout_nanos())
        } {
            Ok(()) => {}
            Err(vk::Result::TIMEOUT) => {
                // Still executing: keep the command buffer alive until the
                // fence is observed signaled.
                slot.pending = Some(guard.disarm());
                warn!(label, timeout = ?self.config.fence_timeout, "fence wait timed out");
                return Err(VulkanError::TimeoutExceeded {
                    op: label,
                    timeout: self.config.fence_timeout,
                });
            }
            Err(result) => return Err(VulkanError::call("vkWaitForFences")(result)),
        }
        let elapsed = start.elapsed();

        unsafe { self.device.reset_fences(&[self.fence]) }
            .map_err(VulkanError::call("vkResetFences"))?;
        debug!(label, elapsed_us = elapsed.as_micros() as u64, "submission complete");
        Ok(elapsed)
    }

    fn lock_fence(&self) -> MutexGuard<'_, FenceSlot> {
        // A panic inside `record` poisons the lock but leaves the slot valid.
        self.fence_slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn reclaim_pending(&self, slot: &mut FenceSlot, label: &'static str) -> Result<()> {
        if self.try_reclaim(slot)? {
            Ok(())
        } else {
            Err(VulkanError::TimeoutExceeded { op: label, timeout: self.config.fence_timeout })
        }
    }

    /// Poll a timed-out submission once. Returns `true` when nothing is in
    /// flight any more; the late command buffer and every handle retired
    /// behind it are then released.
    fn try_reclaim(&self, slot: &mut FenceSlot) -> Result<bool> {
        let Some(cmd) = slot.pending else {
            return Ok(true);
        };
        let signaled = unsafe { self.device.get_fence_status(self.fence) }
            .map_err(VulkanError::call("vkGetFenceStatus"))?;
        if !signaled {
            return Ok(false);
        }
        slot.pending = None;
        unsafe {
            self.device.free_command_buffers(self.command_pool, &[cmd]);
            for item in slot.retired.drain(..) {
                item.destroy(&self.device);
            }
            self.device.reset_fences(&[self.fence])
        }
        .map_err(VulkanError::call("vkResetFences"))?;
        debug!("reclaimed late submission");
        Ok(true)
    }

    /// Destroy `item` now, or after the timed-out submission completes if
    /// one may still be using it.
    pub(crate) fn release(&self, item: Retired) {
        let mut slot = self.lock_fence();
        // A failed status query counts as still running.
        let idle = self.try_reclaim(&mut slot).unwrap_or(false);
        let ready = if idle { Some(item) } else { slot.defer(item) };
        if let Some(item) = ready {
            unsafe { item.destroy(&self.device) };
        } else {
            debug!(retired = slot.retired.len(), "deferred release behind pending submission");
        }
    }

    pub fn device(&self) -> &ash::Device {
        &self.device
    }

    pub fn capabilities(&self) -> &DeviceCapabilities {
        &self.capabilities
    }

    pub fn validation_enabled(&self) -> bool {
        self.instance.messenger.is_some()
    }
}

impl std::fmt::Debug for DeviceContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceContext")
            .field("device", &self.capabilities.name)
            .field("queue_family_index", &self.queue_family_index)
            .field("validation", &self.validation_enabled())
            .finish_non_exhaustive()
    }
}

impl Drop for DeviceContext {
    fn drop(&mut self) {
        unsafe {
            let idle = self.device.device_wait_idle();
            if let Err(e) = idle {
                warn!(error = %e, "vkDeviceWaitIdle failed during teardown");
            }
            let slot = self.fence_slot.get_mut().unwrap_or_else(|p| p.into_inner());
            if idle.is_ok() {
                for item in slot.retired.drain(..) {
                    item.destroy(&self.device);
                }
            } else if !slot.retired.is_empty() {
                warn!(count = slot.retired.len(), "leaking handles of an unfinished submission");
            }
            self.device.destroy_fence(self.fence, None);
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
        }
        debug!(device = %self.capabilities.name, "destroyed device context");
    }
}

/// Frees a one-shot command buffer on every exit path.
struct CommandBufferGuard<'a> {
    device: &'a ash::Device,
    pool: vk::CommandPool,
    cmd: vk::CommandBuffer,
}

impl CommandBufferGuard<'_> {
    fn disarm(self) -> vk::CommandBuffer {
        let cmd = self.cmd;
        std::mem::forget(self);
        cmd
    }
}

impl Drop for CommandBufferGuard<'_> {
    fn drop(&mut self) {
        unsafe { self.device.free_command_buffers(self.pool, &[self.cmd]) };
    }
}
