use anyhow::{anyhow, Result};
use vulkanalia::prelude::v1_0::*;

use super::buffer::VulkanBuffer;
use super::command_buffer::VulkanCommandBuffer;
use super::constants;
use super::context::VulkanContext;
use crate::assets::ImageData;
use crate::error::EngineError;
use crate::gpu::GpuImage;

type Barrier = (
    vk::AccessFlags,
    vk::AccessFlags,
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
);

/// Access masks and stages guarding a whole-image layout transition.
pub fn transition_masks(old: vk::ImageLayout, new: vk::ImageLayout) -> Result<Barrier> {
    match (old, new) {
        (vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL) => Ok((
            vk::AccessFlags::empty(),
            vk::AccessFlags::TRANSFER_WRITE,
            vk::PipelineStageFlags::TOP_OF_PIPE,
            vk::PipelineStageFlags::TRANSFER,
        )),
        (vk::ImageLayout::TRANSFER_DST_OPTIMAL, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL) => Ok((
            vk::AccessFlags::TRANSFER_WRITE,
            vk::AccessFlags::SHADER_READ,
            vk::PipelineStageFlags::TRANSFER,
            vk::PipelineStageFlags::FRAGMENT_SHADER,
        )),
        _ => Err(anyhow!("Unsupported image layout transition {:?} -> {:?}.", old, new)),
    }
}

/// Source and destination sizes of each blit in a mip chain.
pub fn mip_blits(width: u32, height: u32, mip_levels: u32) -> Vec<((i32, i32), (i32, i32))> {
    let mut size = (width as i32, height as i32);
    (1..mip_levels)
        .map(|_| {
            let next = ((size.0 / 2).max(1), (size.1 / 2).max(1));
            let blit = (size, next);
            size = next;
            blit
        })
        .collect()
}

/// First candidate usable as an optimal-tiling depth attachment.
pub fn pick_depth_format(
    candidates: &[vk::Format],
    features: impl Fn(vk::Format) -> vk::FormatFeatureFlags,
) -> Result<vk::Format, EngineError> {
    candidates
        .iter()
        .copied()
        .find(|f| features(*f).contains(vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT))
        .ok_or(EngineError::NoDepthFormat)
}

pub struct VulkanImage;

impl VulkanImage {
    #[allow(clippy::too_many_arguments)]
    pub unsafe fn create(
        ctx: &VulkanContext,
        width: u32,
        height: u32,
        mip_levels: u32,
        format: vk::Format,
        tiling: vk::ImageTiling,
        usage: vk::ImageUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Image, vk::DeviceMemory)> {
        let info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::_2D)
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(mip_levels)
            .array_layers(1)
            .format(format)
            .tiling(tiling)
            .initial_layout(vk::ImageLayout::UNDEFINED)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .samples(vk::SampleCountFlags::_1);

        let image = ctx.device.create_image(&info, None)?;

        let requirements = ctx.device.get_image_memory_requirements(image);
        let memory = match VulkanBuffer::allocate(ctx, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                ctx.device.destroy_image(image, None);
                return Err(e);
            }
        };

        if let Err(e) = ctx.device.bind_image_memory(image, memory, 0) {
            ctx.device.destroy_image(image, None);
            ctx.device.free_memory(memory, None);
            return Err(e.into());
        }

        Ok((image, memory))
    }

    pub unsafe fn create_view(
        device: &Device,
        image: vk::Image,
        format: vk::Format,
        aspects: vk::ImageAspectFlags,
        mip_levels: u32,
    ) -> Result<vk::ImageView> {
        let subresource_range = vk::ImageSubresourceRange::builder()
            .aspect_mask(aspects)
            .base_mip_level(0)
            .level_count(mip_levels)
            .base_array_layer(0)
            .layer_count(1);

        let info = vk::ImageViewCreateInfo::builder()
            .image(image)
            .view_type(vk::ImageViewType::_2D)
            .format(format)
            .subresource_range(subresource_range);

        Ok(device.create_image_view(&info, None)?)
    }

    pub unsafe fn depth_format(
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
    ) -> Result<vk::Format> {
        Ok(pick_depth_format(constants::DEPTH_FORMAT_CANDIDATES, |format| {
            instance
                .get_physical_device_format_properties(physical_device, format)
                .optimal_tiling_features
        })?)
    }

    /// Uploads RGBA8 pixels through a staging buffer, then fills the mip chain.
    pub unsafe fn upload_texture(
        ctx: &VulkanContext,
        data: &ImageData,
        mip_levels: u32,
    ) -> Result<GpuImage> {
        let format = constants::TEXTURE_FORMAT;
        let features = ctx
            .instance
            .get_physical_device_format_properties(ctx.physical_device, format)
            .optimal_tiling_features;
        if !features.contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR) {
            return Err(EngineError::UnsupportedBlitFormat(format).into());
        }

        let (staging, staging_memory) = VulkanBuffer::create(
            ctx,
            data.pixels.len() as u64,
            vk::BufferUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::HOST_COHERENT | vk::MemoryPropertyFlags::HOST_VISIBLE,
        )?;

        let uploaded =
            VulkanImage::fill_from_staging(ctx, data, mip_levels, staging, staging_memory);
        VulkanBuffer::destroy(ctx, staging, staging_memory);
        let (image, memory) = uploaded?;

        match VulkanImage::create_view(
            &ctx.device,
            image,
            format,
            vk::ImageAspectFlags::COLOR,
            mip_levels,
        ) {
            Ok(view) => Ok(GpuImage {
                image,
                memory,
                view,
            }),
            Err(e) => {
                ctx.device.destroy_image(image, None);
                ctx.device.free_memory(memory, None);
                Err(e)
            }
        }
    }

    unsafe fn fill_from_staging(
        ctx: &VulkanContext,
        data: &ImageData,
        mip_levels: u32,
        staging: vk::Buffer,
        staging_memory: vk::DeviceMemory,
    ) -> Result<(vk::Image, vk::DeviceMemory)> {
        VulkanBuffer::write(ctx, staging_memory, 0, &data.pixels)?;

        let (image, memory) = VulkanImage::create(
            ctx,
            data.width,
            data.height,
            mip_levels,
            constants::TEXTURE_FORMAT,
            vk::ImageTiling::OPTIMAL,
            vk::ImageUsageFlags::SAMPLED
                | vk::ImageUsageFlags::TRANSFER_DST
                | vk::ImageUsageFlags::TRANSFER_SRC,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        )?;

        let filled = VulkanImage::transition_layout(
            ctx,
            image,
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            mip_levels,
        )
        .and_then(|_| VulkanImage::copy_from_buffer(ctx, staging, image, data.width, data.height))
        .and_then(|_| {
            VulkanImage::generate_mipmaps(ctx, image, data.width, data.height, mip_levels)
        });

        match filled {
            Ok(()) => Ok((image, memory)),
            Err(e) => {
                ctx.device.destroy_image(image, None);
                ctx.device.free_memory(memory, None);
                Err(e)
            }
        }
    }

    pub unsafe fn transition_layout(
        ctx: &VulkanContext,
        image: vk::Image,
        old_layout: vk::ImageLayout,
        new_layout: vk::ImageLayout,
        mip_levels: u32,
    ) -> Result<()> {
        let (src_access_mask, dst_access_mask, src_stage_mask, dst_stage_mask) =
            transition_masks(old_layout, new_layout)?;

        let command_buffer = VulkanCommandBuffer::begin_single_time(ctx)?;

        let subresource = vk::ImageSubresourceRange::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_mip_level(0)
            .level_count(mip_levels)
            .base_array_layer(0)
            .layer_count(1);

        let barrier = vk::ImageMemoryBarrier::builder()
            .old_layout(old_layout)
            .new_layout(new_layout)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .image(image)
            .subresource_range(subresource)
            .src_access_mask(src_access_mask)
            .dst_access_mask(dst_access_mask);

        ctx.device.cmd_pipeline_barrier(
            command_buffer,
            src_stage_mask,
            dst_stage_mask,
            vk::DependencyFlags::empty(),
            &[] as &[vk::MemoryBarrier],
            &[] as &[vk::BufferMemoryBarrier],
            &[barrier],
        );

        VulkanCommandBuffer::end_single_time(ctx, command_buffer)
    }

    pub unsafe fn copy_from_buffer(
        ctx: &VulkanContext,
        buffer: vk::Buffer,
        image: vk::Image,
        width: u32,
        height: u32,
    ) -> Result<()> {
        let command_buffer = VulkanCommandBuffer::begin_single_time(ctx)?;

        let subresource = vk::ImageSubresourceLayers::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .mip_level(0)
            .base_array_layer(0)
            .layer_count(1);

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(subresource)
            .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
            .image_extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            });

        ctx.device.cmd_copy_buffer_to_image(
            command_buffer,
            buffer,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[region],
        );

        VulkanCommandBuffer::end_single_time(ctx, command_buffer)
    }

    /// Blits each level from the previous one and leaves every level
    /// shader-readable. Expects all levels in `TRANSFER_DST_OPTIMAL`.
    pub unsafe fn generate_mipmaps(
        ctx: &VulkanContext,
        image: vk::Image,
        width: u32,
        height: u32,
        mip_levels: u32,
    ) -> Result<()> {
        let command_buffer = VulkanCommandBuffer::begin_single_time(ctx)?;

        let subresource = vk::ImageSubresourceRange::builder()
            .aspect_mask(vk::ImageAspectFlags::COLOR)
            .base_array_layer(0)
            .layer_count(1)
            .level_count(1);

        let mut barrier = vk::ImageMemoryBarrier::builder()
            .image(image)
            .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
            .subresource_range(subresource);

        for (index, (src, dst)) in mip_blits(width, height, mip_levels).into_iter().enumerate() {
            let level = index as u32 + 1;

            barrier.subresource_range.base_mip_level = level - 1;
            barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
            barrier.new_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
            barrier.src_access_mask = vk::AccessFlags::TRANSFER_WRITE;
            barrier.dst_access_mask = vk::AccessFlags::TRANSFER_READ;

            ctx.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::TRANSFER,
                vk::DependencyFlags::empty(),
                &[] as &[vk::MemoryBarrier],
                &[] as &[vk::BufferMemoryBarrier],
                &[barrier],
            );

            let layers = |mip_level| {
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .mip_level(mip_level)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build()
            };

            let blit = vk::ImageBlit::builder()
                .src_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: src.0,
                        y: src.1,
                        z: 1,
                    },
                ])
                .src_subresource(layers(level - 1))
                .dst_offsets([
                    vk::Offset3D { x: 0, y: 0, z: 0 },
                    vk::Offset3D {
                        x: dst.0,
                        y: dst.1,
                        z: 1,
                    },
                ])
                .dst_subresource(layers(level));

            ctx.device.cmd_blit_image(
                command_buffer,
                image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[blit],
                vk::Filter::LINEAR,
            );

            barrier.old_layout = vk::ImageLayout::TRANSFER_SRC_OPTIMAL;
            barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
            barrier.src_access_mask = vk::AccessFlags::TRANSFER_READ;
            barrier.dst_access_mask = vk::AccessFlags::SHADER_READ;

            ctx.device.cmd_pipeline_barrier(
                command_buffer,
                vk::PipelineStageFlags::TRANSFER,
                vk::PipelineStageFlags::FRAGMENT_SHADER,
                vk::DependencyFlags::empty(),
                &[] as &[vk::MemoryBarrier],
                &[] as &[vk::BufferMemoryBarrier],
                &[barrier],
            );
        }

        // The last level was only ever written to.
        let (src_access, dst_access, src_stage, dst_stage) = transition_masks(
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        )?;
        barrier.subresource_range.base_mip_level = mip_levels - 1;
        barrier.old_layout = vk::ImageLayout::TRANSFER_DST_OPTIMAL;
        barrier.new_layout = vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL;
        barrier.src_access_mask = src_access;
        barrier.dst_access_mask = dst_access;

        ctx.device.cmd_pipeline_barrier(
            command_buffer,
            src_stage,
            dst_stage,
            vk::DependencyFlags::empty(),
            &[] as &[vk::MemoryBarrier],
            &[] as &[vk::BufferMemoryBarrier],
            &[barrier],
        );

        VulkanCommandBuffer::end_single_time(ctx, command_buffer)
    }

    pub unsafe fn create_sampler(device: &Device, mip_levels: u32) -> Result<vk::Sampler> {
        let info = vk::SamplerCreateInfo::builder()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR)
            .address_mode_u(vk::SamplerAddressMode::REPEAT)
            .address_mode_v(vk::SamplerAddressMode::REPEAT)
            .address_mode_w(vk::SamplerAddressMode::REPEAT)
            .anisotropy_enable(true)
            .max_anisotropy(constants::MAX_ANISOTROPY)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK)
            .unnormalized_coordinates(false)
            .compare_enable(false)
            .compare_op(vk::CompareOp::ALWAYS)
            .mipmap_mode(vk::SamplerMipmapMode::LINEAR)
            .min_lod(0.0)
            .max_lod(mip_levels as f32)
            .mip_lod_bias(0.0);

        Ok(device.create_sampler(&info, None)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mip_blits_halve_down_to_one() {
        assert_eq!(mip_blits(4, 2, 3), vec![((4, 2), (2, 1)), ((2, 1), (1, 1))]);
        assert_eq!(mip_blits(5, 5, 3), vec![((5, 5), (2, 2)), ((2, 2), (1, 1))]);
        assert!(mip_blits(8, 8, 1).is_empty());
    }

    #[test]
    fn depth_format_follows_preference() {
        let only_packed = |format: vk::Format| {
            if format == vk::Format::D24_UNORM_S8_UINT {
                vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT
            } else {
                vk::FormatFeatureFlags::empty()
            }
        };
        assert_eq!(
            pick_depth_format(constants::DEPTH_FORMAT_CANDIDATES, only_packed).unwrap(),
            vk::Format::D24_UNORM_S8_UINT
        );

        let all = |_: vk::Format| vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT;
        assert_eq!(
            pick_depth_format(constants::DEPTH_FORMAT_CANDIDATES, all).unwrap(),
            vk::Format::D32_SFLOAT
        );

        assert!(matches!(
            pick_depth_format(constants::DEPTH_FORMAT_CANDIDATES, |_| {
                vk::FormatFeatureFlags::empty()
            }),
            Err(EngineError::NoDepthFormat)
        ));
    }

    #[test]
    fn only_upload_transitions_are_supported() {
        let (_, dst, _, stage) = transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        )
        .unwrap();
        assert_eq!(dst, vk::AccessFlags::TRANSFER_WRITE);
        assert_eq!(stage, vk::PipelineStageFlags::TRANSFER);

        assert!(transition_masks(
            vk::ImageLayout::UNDEFINED,
            vk::ImageLayout::PRESENT_SRC_KHR
        )
        .is_err());
    }
}
