use std::rc::Rc;

use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::loader::{LibloadingLoader, LIBRARY};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{ExtDebugUtilsExtension, Handle, KhrSurfaceExtension, KhrSwapchainExtension};
use vulkanalia::window as vk_window;
use winit::window::Window;

use super::buffer::VulkanBuffer;
use super::command_buffer::VulkanCommandBuffer;
use super::constants;
use super::device::{QueueFamilyIndices, VulkanDevice};
use super::image::VulkanImage;
use super::instance::VulkanInstance;
use super::pipeline::VulkanPipeline;
use crate::assets::ImageData;
use crate::error::EngineError;
use crate::gpu::{
    DescriptorWrite, GpuBuffer, GpuDevice, GpuImage, LayoutBinding, PipelineDesc, PoolSizes,
    ScenePass,
};

/// The process-wide Vulkan objects every other GPU resource hangs off.
///
/// Shared through `Rc` so resources can keep it alive until they are gone.
pub struct VulkanContext {
    // Keeps the loader library mapped for as long as the instance exists.
    _entry: Entry,
    pub instance: Instance,
    pub messenger: vk::DebugUtilsMessengerEXT,
    pub surface: vk::SurfaceKHR,
    pub physical_device: vk::PhysicalDevice,
    pub memory_properties: vk::PhysicalDeviceMemoryProperties,
    pub queue_families: QueueFamilyIndices,
    pub device: Device,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,
    pub command_pool: vk::CommandPool,
}

struct DeviceParts {
    physical_device: vk::PhysicalDevice,
    queue_families: QueueFamilyIndices,
    device: Device,
    graphics_queue: vk::Queue,
    present_queue: vk::Queue,
    command_pool: vk::CommandPool,
}

impl VulkanContext {
    pub fn new(window: &Window, title: &str) -> Result<Rc<Self>> {
        unsafe {
            let loader = LibloadingLoader::new(LIBRARY)?;
            let entry = Entry::new(loader).map_err(|b| anyhow!("{}", b))?;
            let (instance, messenger) = VulkanInstance::create(window, &entry, title)?;

            let surface = match vk_window::create_surface(&instance, &window, &window) {
                Ok(surface) => surface,
                Err(e) => {
                    VulkanContext::destroy_instance(&instance, messenger);
                    return Err(e.into());
                }
            };

            let parts = match VulkanContext::create_device(&entry, &instance, surface) {
                Ok(parts) => parts,
                Err(e) => {
                    instance.destroy_surface_khr(surface, None);
                    VulkanContext::destroy_instance(&instance, messenger);
                    return Err(e);
                }
            };

            let memory_properties =
                instance.get_physical_device_memory_properties(parts.physical_device);
            for (i, memory_type) in memory_properties.memory_types
                [..memory_properties.memory_type_count as usize]
                .iter()
                .enumerate()
            {
                debug!(
                    "Memory type {}: heap {}, {:?}.",
                    i, memory_type.heap_index, memory_type.property_flags
                );
            }

            Ok(Rc::new(Self {
                _entry: entry,
                instance,
                messenger,
                surface,
                physical_device: parts.physical_device,
                memory_properties,
                queue_families: parts.queue_families,
                device: parts.device,
                graphics_queue: parts.graphics_queue,
                present_queue: parts.present_queue,
                command_pool: parts.command_pool,
            }))
        }
    }

    unsafe fn create_device(
        entry: &Entry,
        instance: &Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<DeviceParts> {
        let (physical_device, queue_families) =
            VulkanDevice::select_physical_device(instance, surface)?;
        let (device, graphics_queue, present_queue) =
            VulkanDevice::create_logical_device(entry, instance, physical_device, queue_families)?;

        let command_pool =
            match VulkanCommandBuffer::create_command_pool(&device, queue_families.graphics) {
                Ok(pool) => pool,
                Err(e) => {
                    device.destroy_device(None);
                    return Err(e);
                }
            };

        Ok(DeviceParts {
            physical_device,
            queue_families,
            device,
            graphics_queue,
            present_queue,
            command_pool,
        })
    }

    unsafe fn destroy_instance(instance: &Instance, messenger: vk::DebugUtilsMessengerEXT) {
        if constants::VALIDATION_ENABLED {
            instance.destroy_debug_utils_messenger_ext(messenger, None);
        }
        instance.destroy_instance(None);
    }

    unsafe fn create_staged_buffer(
        &self,
        data: &[u8],
        usage: vk::BufferUsageFlags,
    ) -> Result<GpuBuffer> {
        let size = data.len() as u64;
        let (staging, staging_memory) = VulkanBuffer::create(
            self,
            size,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?;

        let uploaded = (|| -> Result<GpuBuffer> {
            VulkanBuffer::write(self, staging_memory, 0, data)?;
            let (buffer, memory) = VulkanBuffer::create(
                self,
                size,
                usage | vk::BufferUsageFlags::TRANSFER_DST,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )?;
            if let Err(e) = VulkanBuffer::copy(self, staging, buffer, size) {
                VulkanBuffer::destroy(self, buffer, memory);
                return Err(e);
            }
            Ok(GpuBuffer {
                buffer,
                memory,
                size,
            })
        })();

        VulkanBuffer::destroy(self, staging, staging_memory);
        uploaded
    }
}

impl Drop for VulkanContext {
    fn drop(&mut self) {
        unsafe {
            self.device.destroy_command_pool(self.command_pool, None);
            self.device.destroy_device(None);
            if constants::VALIDATION_ENABLED {
                self.instance
                    .destroy_debug_utils_messenger_ext(self.messenger, None);
            }
            self.instance.destroy_surface_khr(self.surface, None);
            self.instance.destroy_instance(None);
        }
        debug!("Destroyed Vulkan context.");
    }
}

enum DescriptorInfo {
    Buffer([vk::DescriptorBufferInfo; 1]),
    Image([vk::DescriptorImageInfo; 1]),
}

impl GpuDevice for VulkanContext {
    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let info = vk::SemaphoreCreateInfo::builder();
        Ok(unsafe { self.device.create_semaphore(&info, None) }?)
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        unsafe { self.device.destroy_semaphore(semaphore, None) }
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };
        let info = vk::FenceCreateInfo::builder().flags(flags);
        Ok(unsafe { self.device.create_fence(&info, None) }?)
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        unsafe { self.device.destroy_fence(fence, None) }
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.wait_for_fences(&[fence], true, u64::MAX) }?;
        Ok(())
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        unsafe { self.device.reset_fences(&[fence]) }?;
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        unsafe { self.device.device_wait_idle() }?;
        Ok(())
    }

    fn acquire_next_image(
        &self,
        swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<u32> {
        let result = unsafe {
            self.device
                .acquire_next_image_khr(swapchain, u64::MAX, signal, vk::Fence::null())
        };

        match result {
            Ok((image_index, _)) => Ok(image_index),
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Err(EngineError::SwapchainOutOfDate.into()),
            Err(e) => Err(e.into()),
        }
    }

    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let wait_semaphores = &[wait];
        let wait_stages = &[vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = &[command_buffer];
        let signal_semaphores = &[signal];
        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(wait_semaphores)
            .wait_dst_stage_mask(wait_stages)
            .command_buffers(command_buffers)
            .signal_semaphores(signal_semaphores);

        unsafe {
            self.device
                .queue_submit(self.graphics_queue, &[submit_info], fence)
        }?;
        Ok(())
    }

    fn present(
        &self,
        swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<()> {
        let wait_semaphores = &[wait];
        let swapchains = &[swapchain];
        let image_indices = &[image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(swapchains)
            .image_indices(image_indices);

        match unsafe { self.device.queue_present_khr(self.present_queue, &present_info) } {
            Ok(_) => Ok(()),
            Err(vk::ErrorCode::OUT_OF_DATE_KHR) => Err(EngineError::SwapchainOutOfDate.into()),
            Err(e) => Err(e.into()),
        }
    }

    fn create_buffer(
        &self,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer> {
        let (buffer, memory) = unsafe { VulkanBuffer::create(self, size, usage, properties) }?;
        Ok(GpuBuffer {
            buffer,
            memory,
            size,
        })
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
        unsafe { VulkanBuffer::write(self, buffer.memory, offset, data) }
    }

    fn upload_buffer(&self, data: &[u8], usage: vk::BufferUsageFlags) -> Result<GpuBuffer> {
        unsafe { self.create_staged_buffer(data, usage) }
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) {
        unsafe { VulkanBuffer::destroy(self, buffer.buffer, buffer.memory) }
    }

    fn upload_texture(&self, image: &ImageData, mip_levels: u32) -> Result<GpuImage> {
        unsafe { VulkanImage::upload_texture(self, image, mip_levels) }
    }

    fn destroy_image(&self, image: GpuImage) {
        unsafe {
            self.device.destroy_image_view(image.view, None);
            self.device.destroy_image(image.image, None);
            self.device.free_memory(image.memory, None);
        }
    }

    fn create_sampler(&self, mip_levels: u32) -> Result<vk::Sampler> {
        unsafe { VulkanImage::create_sampler(&self.device, mip_levels) }
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        unsafe { self.device.destroy_sampler(sampler, None) }
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        let bindings = bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(b.binding)
                    .descriptor_type(b.kind.vk_type())
                    .descriptor_count(1)
                    .stage_flags(b.stages)
            })
            .collect::<Vec<_>>();

        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
        Ok(unsafe { self.device.create_descriptor_set_layout(&info, None) }?)
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        unsafe { self.device.destroy_descriptor_set_layout(layout, None) }
    }

    fn create_descriptor_pool(&self, sizes: &PoolSizes) -> Result<vk::DescriptorPool> {
        // Zero-count pool sizes are invalid, so empty kinds are left out.
        let pool_sizes = [
            (vk::DescriptorType::UNIFORM_BUFFER, sizes.uniform_buffers),
            (
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                sizes.combined_image_samplers,
            ),
        ]
        .into_iter()
        .filter(|(_, count)| *count > 0)
        .map(|(type_, count)| {
            vk::DescriptorPoolSize::builder()
                .type_(type_)
                .descriptor_count(count)
        })
        .collect::<Vec<_>>();

        let info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&pool_sizes)
            .max_sets(sizes.max_sets);

        Ok(unsafe { self.device.create_descriptor_pool(&info, None) }?)
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        unsafe { self.device.destroy_descriptor_pool(pool, None) }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let layouts = vec![layout; count as usize];
        let info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(pool)
            .set_layouts(&layouts);

        Ok(unsafe { self.device.allocate_descriptor_sets(&info) }?)
    }

    fn update_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> Result<()> {
        let infos = writes
            .iter()
            .map(|write| match *write {
                DescriptorWrite::Uniform { buffer, range, .. } => {
                    DescriptorInfo::Buffer([vk::DescriptorBufferInfo::builder()
                        .buffer(buffer)
                        .offset(0)
                        .range(range)
                        .build()])
                }
                DescriptorWrite::Sampler { view, sampler, .. } => {
                    DescriptorInfo::Image([vk::DescriptorImageInfo::builder()
                        .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                        .image_view(view)
                        .sampler(sampler)
                        .build()])
                }
            })
            .collect::<Vec<_>>();

        let vk_writes = writes
            .iter()
            .zip(&infos)
            .map(|(write, info)| {
                let builder = vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(write.binding())
                    .dst_array_element(0);
                match info {
                    DescriptorInfo::Buffer(info) => builder
                        .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER)
                        .buffer_info(info),
                    DescriptorInfo::Image(info) => builder
                        .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                        .image_info(info),
                }
            })
            .collect::<Vec<_>>();

        unsafe {
            self.device
                .update_descriptor_sets(&vk_writes, &[] as &[vk::CopyDescriptorSet])
        };
        Ok(())
    }

    fn create_pipeline(
        &self,
        desc: &PipelineDesc<'_>,
    ) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
        unsafe { VulkanPipeline::create(&self.device, desc) }
    }

    fn destroy_pipeline(&self, layout: vk::PipelineLayout, pipeline: vk::Pipeline) {
        unsafe { VulkanPipeline::destroy(&self.device, layout, pipeline) }
    }

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        unsafe { VulkanCommandBuffer::allocate(self, count) }
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        unsafe {
            self.device
                .free_command_buffers(self.command_pool, command_buffers)
        }
    }

    fn begin_scene(&self, command_buffer: vk::CommandBuffer, pass: &ScenePass) -> Result<()> {
        unsafe { VulkanCommandBuffer::begin_scene(self, command_buffer, pass) }
    }

    fn end_scene(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        unsafe { VulkanCommandBuffer::end_scene(self, command_buffer) }
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        unsafe {
            self.device
                .cmd_bind_pipeline(command_buffer, vk::PipelineBindPoint::GRAPHICS, pipeline)
        }
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        unsafe {
            self.device.cmd_bind_descriptor_sets(
                command_buffer,
                vk::PipelineBindPoint::GRAPHICS,
                layout,
                set_index,
                &[set],
                &[] as &[u32],
            )
        }
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_buffer: vk::Buffer,
        index_buffer: vk::Buffer,
        index_count: u32,
    ) {
        unsafe {
            self.device
                .cmd_bind_vertex_buffers(command_buffer, 0, &[vertex_buffer], &[0]);
            self.device
                .cmd_bind_index_buffer(command_buffer, index_buffer, 0, vk::IndexType::UINT32);
            self.device
                .cmd_draw_indexed(command_buffer, index_count, 1, 0, 0, 0);
        }
    }
}
