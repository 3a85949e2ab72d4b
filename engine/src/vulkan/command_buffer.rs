use anyhow::Result;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::Handle;

use super::context::VulkanContext;
use crate::gpu::ScenePass;

pub struct VulkanCommandBuffer;

impl VulkanCommandBuffer {
    pub unsafe fn create_command_pool(
        device: &Device,
        graphics_family: u32,
    ) -> Result<vk::CommandPool> {
        let info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::empty())
            .queue_family_index(graphics_family);

        Ok(device.create_command_pool(&info, None)?)
    }

    pub unsafe fn allocate(ctx: &VulkanContext, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(ctx.command_pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        Ok(ctx.device.allocate_command_buffers(&allocate_info)?)
    }

    /// Starts a throwaway command buffer for an upload or layout transition.
    pub unsafe fn begin_single_time(ctx: &VulkanContext) -> Result<vk::CommandBuffer> {
        let command_buffer = VulkanCommandBuffer::allocate(ctx, 1)?[0];

        let info = vk::CommandBufferBeginInfo::builder()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);

        if let Err(e) = ctx.device.begin_command_buffer(command_buffer, &info) {
            ctx.device
                .free_command_buffers(ctx.command_pool, &[command_buffer]);
            return Err(e.into());
        }

        Ok(command_buffer)
    }

    /// Submits, waits for the graphics queue to go idle and frees.
    pub unsafe fn end_single_time(
        ctx: &VulkanContext,
        command_buffer: vk::CommandBuffer,
    ) -> Result<()> {
        let result = (|| -> Result<()> {
            ctx.device.end_command_buffer(command_buffer)?;

            let command_buffers = &[command_buffer];
            let info = vk::SubmitInfo::builder().command_buffers(command_buffers);

            ctx.device
                .queue_submit(ctx.graphics_queue, &[info], vk::Fence::null())?;
            ctx.device.queue_wait_idle(ctx.graphics_queue)?;
            Ok(())
        })();

        ctx.device
            .free_command_buffers(ctx.command_pool, &[command_buffer]);
        result
    }

    pub unsafe fn begin_scene(
        ctx: &VulkanContext,
        command_buffer: vk::CommandBuffer,
        pass: &ScenePass,
    ) -> Result<()> {
        let info = vk::CommandBufferBeginInfo::builder();
        ctx.device.begin_command_buffer(command_buffer, &info)?;

        let render_area = vk::Rect2D::builder()
            .offset(vk::Offset2D::default())
            .extent(pass.extent);

        let color_clear_value = vk::ClearValue {
            color: vk::ClearColorValue {
                float32: pass.clear_color,
            },
        };
        let depth_clear_value = vk::ClearValue {
            depth_stencil: vk::ClearDepthStencilValue {
                depth: 1.0,
                stencil: 0,
            },
        };

        let clear_values = &[color_clear_value, depth_clear_value];
        let info = vk::RenderPassBeginInfo::builder()
            .render_pass(pass.render_pass)
            .framebuffer(pass.framebuffer)
            .render_area(render_area)
            .clear_values(clear_values);

        ctx.device
            .cmd_begin_render_pass(command_buffer, &info, vk::SubpassContents::INLINE);
        Ok(())
    }

    pub unsafe fn end_scene(ctx: &VulkanContext, command_buffer: vk::CommandBuffer) -> Result<()> {
        ctx.device.cmd_end_render_pass(command_buffer);
        ctx.device.end_command_buffer(command_buffer)?;
        Ok(())
    }
}
