//! The device seam between the frame protocol and raw Vulkan.
//!
//! Resource bundles, the descriptor pool and the frame orchestrator only talk
//! to the GPU through [`GpuDevice`]. [`crate::vulkan::VulkanContext`] is the
//! real implementation; tests drive the same code with a recording mock.
//!
//! Handles are plain `vulkanalia` handles. Every handle passed back to the
//! device must have been produced by that same device and not yet destroyed.

use anyhow::Result;
use vulkanalia::vk;

use crate::assets::ImageData;

/// A buffer and the memory bound to it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: u64,
}

/// A sampled image, its memory and a view covering every mip level.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct GpuImage {
    pub image: vk::Image,
    pub memory: vk::DeviceMemory,
    pub view: vk::ImageView,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    CombinedImageSampler,
}

impl DescriptorKind {
    pub fn vk_type(self) -> vk::DescriptorType {
        match self {
            Self::UniformBuffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::CombinedImageSampler => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LayoutBinding {
    pub binding: u32,
    pub kind: DescriptorKind,
    pub stages: vk::ShaderStageFlags,
}

impl LayoutBinding {
    pub fn new(binding: u32, kind: DescriptorKind, stages: vk::ShaderStageFlags) -> Self {
        Self {
            binding,
            kind,
            stages,
        }
    }
}

/// Descriptor counts of a pool, already scaled by the swapchain image count.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct PoolSizes {
    pub uniform_buffers: u32,
    pub combined_image_samplers: u32,
    pub max_sets: u32,
}

/// One binding update inside a batched descriptor write.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DescriptorWrite {
    Uniform {
        binding: u32,
        buffer: vk::Buffer,
        range: u64,
    },
    Sampler {
        binding: u32,
        view: vk::ImageView,
        sampler: vk::Sampler,
    },
}

impl DescriptorWrite {
    pub fn binding(&self) -> u32 {
        match self {
            Self::Uniform { binding, .. } | Self::Sampler { binding, .. } => *binding,
        }
    }
}

/// Everything needed to bake one immutable graphics pipeline.
#[derive(Clone, Debug)]
pub struct PipelineDesc<'a> {
    pub vertex_shader: &'a [u8],
    pub fragment_shader: &'a [u8],
    /// Set index `n` binds `set_layouts[n]`.
    pub set_layouts: &'a [vk::DescriptorSetLayout],
    pub depth_compare: vk::CompareOp,
    pub render_pass: vk::RenderPass,
    pub extent: vk::Extent2D,
}

/// The render pass instance a pre-recorded command buffer draws into.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ScenePass {
    pub render_pass: vk::RenderPass,
    pub framebuffer: vk::Framebuffer,
    pub extent: vk::Extent2D,
    pub clear_color: [f32; 4],
}

pub trait GpuDevice {
    fn create_semaphore(&self) -> Result<vk::Semaphore>;
    fn destroy_semaphore(&self, semaphore: vk::Semaphore);
    fn create_fence(&self, signaled: bool) -> Result<vk::Fence>;
    fn destroy_fence(&self, fence: vk::Fence);
    /// Blocks without timeout until `fence` is signaled.
    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()>;
    fn reset_fence(&self, fence: vk::Fence) -> Result<()>;
    fn wait_idle(&self) -> Result<()>;

    fn acquire_next_image(&self, swapchain: vk::SwapchainKHR, signal: vk::Semaphore) -> Result<u32>;
    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()>;
    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<()>;

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer>;
    /// Maps host-visible memory, copies `data` at `offset` and unmaps.
    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()>;
    /// Uploads `data` into a new device-local buffer through a staging copy.
    fn upload_buffer(&self, data: &[u8], usage: vk::BufferUsageFlags) -> Result<GpuBuffer>;
    fn destroy_buffer(&self, buffer: GpuBuffer);

    /// Uploads RGBA8 pixels and generates `mip_levels` levels.
    fn upload_texture(&self, image: &ImageData, mip_levels: u32) -> Result<GpuImage>;
    fn destroy_image(&self, image: GpuImage);
    fn create_sampler(&self, mip_levels: u32) -> Result<vk::Sampler>;
    fn destroy_sampler(&self, sampler: vk::Sampler);

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> Result<vk::DescriptorSetLayout>;
    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout);
    fn create_descriptor_pool(&self, sizes: &PoolSizes) -> Result<vk::DescriptorPool>;
    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool);
    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>>;
    fn update_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> Result<()>;

    fn create_pipeline(
        &self,
        desc: &PipelineDesc<'_>,
    ) -> Result<(vk::PipelineLayout, vk::Pipeline)>;
    fn destroy_pipeline(&self, layout: vk::PipelineLayout, pipeline: vk::Pipeline);

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>>;
    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]);
    /// Begins recording and opens the render pass.
    fn begin_scene(&self, command_buffer: vk::CommandBuffer, pass: &ScenePass) -> Result<()>;
    /// Closes the render pass and ends recording.
    fn end_scene(&self, command_buffer: vk::CommandBuffer) -> Result<()>;
    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline);
    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    );
    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_buffer: vk::Buffer,
        index_buffer: vk::Buffer,
        index_count: u32,
    );
}
