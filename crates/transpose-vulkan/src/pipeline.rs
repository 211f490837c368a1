//! Compute pipeline construction for one kernel variant bound to an
//! input/output buffer pair.

use crate::context::{DeviceContext, Retired};
use crate::error::{Result, VulkanError};
use crate::geometry::{KernelGeometry, ProblemSize, PushConstants, SpecializationConstants};
use crate::kernels::{KernelLoader, KernelVariant};
use crate::memory::GpuBuffer;
use ash::vk;
use std::marker::PhantomData;
use tracing::debug;

const INPUT_BINDING: u32 = 0;
const OUTPUT_BINDING: u32 = 1;

/// A ready-to-dispatch compute pipeline with its descriptor resources.
///
/// Borrows the context and both buffers; all Vulkan objects are destroyed on
/// drop.
pub struct ComputeKernel<'a> {
    ctx: &'a DeviceContext,
    variant: KernelVariant,
    geometry: KernelGeometry,
    grid: [u32; 3],
    descriptor_pool: vk::DescriptorPool,
    descriptor_set_layout: vk::DescriptorSetLayout,
    descriptor_set: vk::DescriptorSet,
    pipeline_layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
    _buffers: PhantomData<&'a GpuBuffer<'a>>,
}

impl<'a> ComputeKernel<'a> {
    /// Build a pipeline for `variant` that reads `input` and writes `output`.
    ///
    /// Geometry, device limits, grid alignment and buffer sizes are checked
    /// before any Vulkan object is created. Objects created before a failing
    /// step are released.
    pub fn build(
        ctx: &'a DeviceContext,
        problem: ProblemSize,
        coalesced_bytes: u32,
        input: &'a GpuBuffer<'a>,
        output: &'a GpuBuffer<'a>,
        variant: KernelVariant,
        loader: &dyn KernelLoader,
    ) -> Result<Self> {
        let geometry = KernelGeometry::new(problem, coalesced_bytes)?;
        geometry.check_limits(&ctx.capabilities().limits)?;
        let grid = geometry.dispatch_grid()?;
        for buffer in [input, output] {
            if buffer.size() < problem.byte_len() {
                return Err(VulkanError::InvalidArgument(format!(
                    "buffer '{}' holds {} bytes, problem {problem} needs {}",
                    buffer.label(),
                    buffer.size(),
                    problem.byte_len()
                )));
            }
        }
        let code = loader.load(variant)?;

        // Null handles are skipped by the Vulkan destroy calls, so an early
        // return drops a partially built kernel safely.
        let mut kernel = Self {
            ctx,
            variant,
            geometry,
            grid,
            descriptor_pool: vk::DescriptorPool::null(),
            descriptor_set_layout: vk::DescriptorSetLayout::null(),
            descriptor_set: vk::DescriptorSet::null(),
            pipeline_layout: vk::PipelineLayout::null(),
            pipeline: vk::Pipeline::null(),
            _buffers: PhantomData,
        };
        let device = ctx.device();

        // 1. descriptor pool sized for two storage buffers
        let pool_sizes = [vk::DescriptorPoolSize::default()
            .ty(vk::DescriptorType::STORAGE_BUFFER)
            .descriptor_count(2)];
        let pool_info =
            vk::DescriptorPoolCreateInfo::default().max_sets(1).pool_sizes(&pool_sizes);
        kernel.descriptor_pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
            .map_err(VulkanError::creation("vkCreateDescriptorPool"))?;

        // 2. set layout: binding 0 input, binding 1 output
        let bindings = [INPUT_BINDING, OUTPUT_BINDING].map(|binding| {
            vk::DescriptorSetLayoutBinding::default()
                .binding(binding)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .descriptor_count(1)
                .stage_flags(vk::ShaderStageFlags::COMPUTE)
        });
        let layout_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        kernel.descriptor_set_layout =
            unsafe { device.create_descriptor_set_layout(&layout_info, None) }
                .map_err(VulkanError::creation("vkCreateDescriptorSetLayout"))?;

        // 3. allocate the set and point it at the buffers
        let set_layouts = [kernel.descriptor_set_layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(kernel.descriptor_pool)
            .set_layouts(&set_layouts);
        kernel.descriptor_set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
            .map_err(VulkanError::creation("vkAllocateDescriptorSets"))?[0];

        let input_info = [vk::DescriptorBufferInfo::default()
            .buffer(input.handle())
            .offset(0)
            .range(vk::WHOLE_SIZE)];
        let output_info = [vk::DescriptorBufferInfo::default()
            .buffer(output.handle())
            .offset(0)
            .range(vk::WHOLE_SIZE)];
        let writes = [
            vk::WriteDescriptorSet::default()
                .dst_set(kernel.descriptor_set)
                .dst_binding(INPUT_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(&input_info),
            vk::WriteDescriptorSet::default()
                .dst_set(kernel.descriptor_set)
                .dst_binding(OUTPUT_BINDING)
                .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                .buffer_info(&output_info),
        ];
        unsafe { device.update_descriptor_sets(&writes, &[]) };

        // 4. pipeline layout with the push-constant range
        let push_ranges = [vk::PushConstantRange::default()
            .stage_flags(vk::ShaderStageFlags::COMPUTE)
            .offset(0)
            .size(PushConstants::SIZE)];
        let pipeline_layout_info = vk::PipelineLayoutCreateInfo::default()
            .set_layouts(&set_layouts)
            .push_constant_ranges(&push_ranges);
        kernel.pipeline_layout =
            unsafe { device.create_pipeline_layout(&pipeline_layout_info, None) }
                .map_err(VulkanError::creation("vkCreatePipelineLayout"))?;

        // 5. shader module + specialization, 6. compute pipeline
        let module_info = vk::ShaderModuleCreateInfo::default().code(&code);
        let module = unsafe { device.create_shader_module(&module_info, None) }
            .map_err(VulkanError::creation("vkCreateShaderModule"))?;

        let constants = geometry.specialization();
        let map_entries = SpecializationConstants::map_entries();
        let specialization = vk::SpecializationInfo::default()
            .map_entries(&map_entries)
            .data(bytemuck::bytes_of(&constants));
        let stage = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(c"main")
            .specialization_info(&specialization);
        let pipeline_info =
            [vk::ComputePipelineCreateInfo::default().stage(stage).layout(kernel.pipeline_layout)];
        let created = unsafe {
            device.create_compute_pipelines(vk::PipelineCache::null(), &pipeline_info, None)
        };
        unsafe { device.destroy_shader_module(module, None) };

        kernel.pipeline = match created {
            Ok(pipelines) => pipelines[0],
            Err((pipelines, result)) => {
                for p in pipelines {
                    unsafe { device.destroy_pipeline(p, None) };
                }
                return Err(VulkanError::creation("vkCreateComputePipelines")(result));
            }
        };

        debug!(
            variant = %variant,
            workgroup = ?geometry.workgroup(),
            grid = ?grid,
            stride = ?geometry.input_stride(),
            "built compute kernel"
        );
        Ok(kernel)
    }

    pub fn variant(&self) -> KernelVariant {
        self.variant
    }

    pub fn geometry(&self) -> &KernelGeometry {
        &self.geometry
    }

    /// Workgroup counts per axis, validated at build time.
    pub fn dispatch_grid(&self) -> [u32; 3] {
        self.grid
    }

    pub fn pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    pub fn pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    pub fn descriptor_set(&self) -> vk::DescriptorSet {
        self.descriptor_set
    }

    pub(crate) fn context(&self) -> &'a DeviceContext {
        self.ctx
    }
}

impl std::fmt::Debug for ComputeKernel<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComputeKernel")
            .field("variant", &self.variant)
            .field("geometry", &self.geometry)
            .field("grid", &self.grid)
            .finish_non_exhaustive()
    }
}

impl Drop for ComputeKernel<'_> {
    fn drop(&mut self) {
        self.ctx.release(Retired::Kernel {
            descriptor_pool: self.descriptor_pool,
            set_layout: self.descriptor_set_layout,
            pipeline_layout: self.pipeline_layout,
            pipeline: self.pipeline,
        });
        debug!(variant = %self.variant, "destroyed compute kernel");
    }
}
