use std::path::Path;
use std::rc::Rc;

use anyhow::Result;
use log::*;
use vulkanalia::vk;

use crate::assets::{self, ImageData};
use crate::gpu::{GpuDevice, GpuImage};

/// Length of a full mip chain: `floor(log2(max(width, height))) + 1`.
pub fn mip_level_count(width: u32, height: u32) -> u32 {
    32 - width.max(height).max(1).leading_zeros()
}

/// A mipmapped, sampled RGBA texture with its own sampler.
pub struct Texture<G: GpuDevice> {
    gpu: Rc<G>,
    image: GpuImage,
    sampler: vk::Sampler,
    mip_levels: u32,
}

impl<G: GpuDevice> Texture<G> {
    pub fn new(gpu: &Rc<G>, data: &ImageData) -> Result<Self> {
        let mip_levels = mip_level_count(data.width, data.height);
        let image = gpu.upload_texture(data, mip_levels)?;
        let sampler = match gpu.create_sampler(mip_levels) {
            Ok(sampler) => sampler,
            Err(e) => {
                gpu.destroy_image(image);
                return Err(e);
            }
        };

        debug!(
            "Created {}x{} texture with {} mip levels.",
            data.width, data.height, mip_levels
        );

        Ok(Self {
            gpu: Rc::clone(gpu),
            image,
            sampler,
            mip_levels,
        })
    }

    pub fn from_file(gpu: &Rc<G>, path: impl AsRef<Path>) -> Result<Self> {
        let data = assets::load_image(path)?;
        Self::new(gpu, &data)
    }

    pub fn view(&self) -> vk::ImageView {
        self.image.view
    }

    pub fn sampler(&self) -> vk::Sampler {
        self.sampler
    }

    pub fn mip_levels(&self) -> u32 {
        self.mip_levels
    }
}

impl<G: GpuDevice> Drop for Texture<G> {
    fn drop(&mut self) {
        self.gpu.destroy_sampler(self.sampler);
        self.gpu.destroy_image(self.image);
    }
}
