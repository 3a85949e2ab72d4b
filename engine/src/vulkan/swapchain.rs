use std::rc::Rc;

use anyhow::{anyhow, Result};
use log::*;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{Handle, KhrSurfaceExtension, KhrSwapchainExtension};
use winit::window::Window;

use super::context::VulkanContext;
use super::framebuffer::VulkanFramebuffer;
use super::image::VulkanImage;
use super::render_pass::VulkanRenderPass;
use crate::renderer::RenderTarget;

pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .copied()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first().copied())
}

pub fn choose_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|m| *m == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// The surface's own extent when it has one, otherwise the window size
/// clamped to what the surface allows.
pub fn choose_extent(
    capabilities: &vk::SurfaceCapabilitiesKHR,
    window_size: (u32, u32),
) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    let (min, max) = (capabilities.min_image_extent, capabilities.max_image_extent);
    vk::Extent2D {
        width: window_size.0.clamp(min.width, max.width),
        height: window_size.1.clamp(min.height, max.height),
    }
}

pub fn choose_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count != 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

/// Presentable images plus everything that draws into them: views, the
/// shared depth buffer, the render pass and one framebuffer per image.
pub struct VulkanSwapchain {
    ctx: Rc<VulkanContext>,
    swapchain: vk::SwapchainKHR,
    format: vk::Format,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    depth_image: vk::Image,
    depth_memory: vk::DeviceMemory,
    depth_view: vk::ImageView,
    render_pass: vk::RenderPass,
    framebuffers: Vec<vk::Framebuffer>,
}

impl VulkanSwapchain {
    pub unsafe fn create(ctx: &Rc<VulkanContext>, window: &Window) -> Result<Self> {
        let instance = &ctx.instance;
        let capabilities = instance
            .get_physical_device_surface_capabilities_khr(ctx.physical_device, ctx.surface)?;
        let formats =
            instance.get_physical_device_surface_formats_khr(ctx.physical_device, ctx.surface)?;
        let present_modes = instance
            .get_physical_device_surface_present_modes_khr(ctx.physical_device, ctx.surface)?;

        let surface_format = choose_surface_format(&formats)
            .ok_or_else(|| anyhow!("Surface offers no formats."))?;
        let present_mode = choose_present_mode(&present_modes);
        let size = window.inner_size();
        let extent = choose_extent(&capabilities, (size.width, size.height));
        let image_count = choose_image_count(&capabilities);

        // Every handle starts null so a failure part-way through is cleaned
        // up by `Drop`.
        let mut swapchain = Self {
            ctx: Rc::clone(ctx),
            swapchain: vk::SwapchainKHR::null(),
            format: surface_format.format,
            extent,
            images: Vec::new(),
            image_views: Vec::new(),
            depth_image: vk::Image::null(),
            depth_memory: vk::DeviceMemory::null(),
            depth_view: vk::ImageView::null(),
            render_pass: vk::RenderPass::null(),
            framebuffers: Vec::new(),
        };

        let families = &[ctx.queue_families.graphics, ctx.queue_families.present];
        let (sharing_mode, queue_family_indices): (_, &[u32]) =
            if ctx.queue_families.graphics != ctx.queue_families.present {
                (vk::SharingMode::CONCURRENT, families)
            } else {
                (vk::SharingMode::EXCLUSIVE, &[])
            };

        let info = vk::SwapchainCreateInfoKHR::builder()
            .surface(ctx.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing_mode)
            .queue_family_indices(queue_family_indices)
            .pre_transform(capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(vk::SwapchainKHR::null());

        swapchain.swapchain = ctx.device.create_swapchain_khr(&info, None)?;
        swapchain.images = ctx.device.get_swapchain_images_khr(swapchain.swapchain)?;

        for image in &swapchain.images {
            let view = VulkanImage::create_view(
                &ctx.device,
                *image,
                swapchain.format,
                vk::ImageAspectFlags::COLOR,
                1,
            )?;
            swapchain.image_views.push(view);
        }

        let depth_format = VulkanImage::depth_format(&ctx.instance, ctx.physical_device)?;
        let (depth_image, depth_memory) = VulkanImage::create(
            ctx,
            extent.width,
            extent.height,
            1,
            depth_format,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;
        swapchain.depth_image = depth_image;
        swapchain.depth_memory = depth_memory;
        swapchain.depth_view = VulkanImage::create_view(
            &ctx.device,
            depth_image,
            depth_format,
            vk::ImageAspectFlags::DEPTH,
            1,
        )?;

        swapchain.render_pass =
            VulkanRenderPass::create(&ctx.device, swapchain.format, depth_format)?;
        swapchain.framebuffers = VulkanFramebuffer::create(
            &ctx.device,
            swapchain.render_pass,
            &swapchain.image_views,
            swapchain.depth_view,
            extent,
        )?;

        info!(
            "Created swapchain: {} images, {}x{}, {:?}, {:?}.",
            swapchain.images.len(),
            extent.width,
            extent.height,
            surface_format.format,
            present_mode
        );

        Ok(swapchain)
    }

    pub fn target(&self) -> RenderTarget {
        RenderTarget {
            swapchain: self.swapchain,
            extent: self.extent,
            render_pass: self.render_pass,
            framebuffers: self.framebuffers.clone(),
        }
    }
}

impl Drop for VulkanSwapchain {
    fn drop(&mut self) {
        let device = &self.ctx.device;
        unsafe {
            self.framebuffers
                .iter()
                .for_each(|f| device.destroy_framebuffer(*f, None));
            device.destroy_image_view(self.depth_view, None);
            device.destroy_image(self.depth_image, None);
            device.free_memory(self.depth_memory, None);
            device.destroy_render_pass(self.render_pass, None);
            self.image_views
                .iter()
                .for_each(|v| device.destroy_image_view(*v, None));
            device.destroy_swapchain_khr(self.swapchain, None);
        }
        debug!("Destroyed swapchain.");
    }
}
