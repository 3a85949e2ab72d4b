use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

pub struct VulkanFramebuffer;

impl VulkanFramebuffer {
    /// One framebuffer per color view, all sharing the depth view.
    pub unsafe fn create(
        device: &Device,
        render_pass: vk::RenderPass,
        color_views: &[vk::ImageView],
        depth_view: vk::ImageView,
        extent: vk::Extent2D,
    ) -> Result<Vec<vk::Framebuffer>> {
        let mut framebuffers = Vec::with_capacity(color_views.len());
        for view in color_views {
            let attachments = &[*view, depth_view];
            let create_info = vk::FramebufferCreateInfo::builder()
                .render_pass(render_pass)
                .attachments(attachments)
                .width(extent.width)
                .height(extent.height)
                .layers(1);

            match device.create_framebuffer(&create_info, None) {
                Ok(framebuffer) => framebuffers.push(framebuffer),
                Err(e) => {
                    framebuffers
                        .iter()
                        .for_each(|f| device.destroy_framebuffer(*f, None));
                    return Err(e.into());
                }
            }
        }

        Ok(framebuffers)
    }
}
