//! Descriptor set layouts, the fixed-capacity pool and per-image descriptor sets.

use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

use anyhow::Result;
use bytemuck::Pod;
use log::*;
use vulkanalia::vk;

use crate::config::PoolBudget;
use crate::error::EngineError;
use crate::gpu::{DescriptorKind, DescriptorWrite, GpuBuffer, GpuDevice, LayoutBinding, PoolSizes};
use crate::resources::Texture;

pub struct DescriptorSetLayout<G: GpuDevice> {
    gpu: Rc<G>,
    layout: vk::DescriptorSetLayout,
    bindings: Vec<LayoutBinding>,
}

impl<G: GpuDevice> DescriptorSetLayout<G> {
    pub fn new(gpu: &Rc<G>, bindings: &[LayoutBinding]) -> Result<Rc<Self>> {
        let mut seen = HashSet::new();
        for binding in bindings {
            if !seen.insert(binding.binding) {
                return Err(EngineError::DuplicateBinding {
                    binding: binding.binding,
                }
                .into());
            }
        }

        let layout = gpu.create_descriptor_set_layout(bindings)?;

        Ok(Rc::new(Self {
            gpu: Rc::clone(gpu),
            layout,
            bindings: bindings.to_vec(),
        }))
    }

    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    pub fn bindings(&self) -> &[LayoutBinding] {
        &self.bindings
    }

    /// What one set of this layout takes from the pool for a single image.
    pub fn per_image_demand(&self) -> PoolBudget {
        let count = |kind| self.bindings.iter().filter(|b| b.kind == kind).count() as u32;
        PoolBudget::new(
            count(DescriptorKind::UniformBuffer),
            count(DescriptorKind::CombinedImageSampler),
            1,
        )
    }
}

impl<G: GpuDevice> Drop for DescriptorSetLayout<G> {
    fn drop(&mut self) {
        self.gpu.destroy_descriptor_set_layout(self.layout);
    }
}

/// One descriptor pool whose capacity is fixed at creation.
///
/// Consumption is tracked here rather than left to the driver, so running
/// out of room is always reported as [`EngineError::PoolExhausted`]. Sets are
/// never freed individually; their quota comes back only with the pool.
pub struct DescriptorPool<G: GpuDevice> {
    gpu: Rc<G>,
    pool: vk::DescriptorPool,
    capacity: PoolBudget,
    consumed: Cell<PoolBudget>,
    image_count: u32,
}

impl<G: GpuDevice> DescriptorPool<G> {
    pub fn new(gpu: &Rc<G>, budget: PoolBudget, image_count: u32) -> Result<Rc<Self>> {
        let capacity = budget.scaled(image_count)?;
        let pool = gpu.create_descriptor_pool(&PoolSizes {
            uniform_buffers: capacity.uniform_blocks,
            combined_image_samplers: capacity.textures,
            max_sets: capacity.sets,
        })?;

        info!(
            "Created descriptor pool for {} images: {:?}.",
            image_count, capacity
        );

        Ok(Rc::new(Self {
            gpu: Rc::clone(gpu),
            pool,
            capacity,
            consumed: Cell::new(PoolBudget::default()),
            image_count,
        }))
    }

    pub fn capacity(&self) -> PoolBudget {
        self.capacity
    }

    pub fn remaining(&self) -> PoolBudget {
        self.capacity.saturating_sub(self.consumed.get())
    }

    pub fn image_count(&self) -> u32 {
        self.image_count
    }

    /// Reserves quota for one set per image, then allocates them.
    fn allocate(&self, layout: &DescriptorSetLayout<G>) -> Result<Vec<vk::DescriptorSet>> {
        let requested = layout.per_image_demand().scaled(self.image_count)?;
        let remaining = self.remaining();
        if !remaining.covers(&requested) {
            return Err(EngineError::PoolExhausted {
                requested,
                remaining,
            }
            .into());
        }

        let consumed = self.consumed.get();
        self.consumed.set(consumed.saturating_add(requested));
        match self
            .gpu
            .allocate_descriptor_sets(self.pool, layout.handle(), self.image_count)
        {
            Ok(sets) => Ok(sets),
            Err(e) => {
                self.consumed.set(consumed);
                Err(e)
            }
        }
    }
}

impl<G: GpuDevice> Drop for DescriptorPool<G> {
    fn drop(&mut self) {
        debug!("Destroying descriptor pool.");
        self.gpu.destroy_descriptor_pool(self.pool);
    }
}

/// What a descriptor set binds at one layout binding.
pub enum SetElement<G: GpuDevice> {
    /// A uniform block of `size` bytes, replicated once per swapchain image.
    Uniform { binding: u32, size: u64 },
    Texture { binding: u32, texture: Rc<Texture<G>> },
}

impl<G: GpuDevice> SetElement<G> {
    pub fn binding(&self) -> u32 {
        match self {
            Self::Uniform { binding, .. } | Self::Texture { binding, .. } => *binding,
        }
    }

    fn kind(&self) -> DescriptorKind {
        match self {
            Self::Uniform { .. } => DescriptorKind::UniformBuffer,
            Self::Texture { .. } => DescriptorKind::CombinedImageSampler,
        }
    }
}

struct UniformBlock {
    binding: u32,
    size: u64,
    /// Indexed by swapchain image.
    buffers: Vec<GpuBuffer>,
}

/// One descriptor set per swapchain image, plus the uniform buffers behind them.
pub struct DescriptorSet<G: GpuDevice> {
    gpu: Rc<G>,
    sets: Vec<vk::DescriptorSet>,
    uniforms: Vec<UniformBlock>,
    _textures: Vec<Rc<Texture<G>>>,
    _layout: Rc<DescriptorSetLayout<G>>,
    _pool: Rc<DescriptorPool<G>>,
}

impl<G: GpuDevice> DescriptorSet<G> {
    pub fn new(
        gpu: &Rc<G>,
        pool: &Rc<DescriptorPool<G>>,
        layout: &Rc<DescriptorSetLayout<G>>,
        elements: Vec<SetElement<G>>,
    ) -> Result<Self> {
        check_elements(layout.bindings(), &elements)?;

        let sets = pool.allocate(layout)?;
        let image_count = sets.len();

        let mut uniforms = Vec::new();
        let mut textures = Vec::new();
        for element in &elements {
            match element {
                SetElement::Uniform { binding, size } => uniforms.push(UniformBlock {
                    binding: *binding,
                    size: *size,
                    buffers: Vec::with_capacity(image_count),
                }),
                SetElement::Texture { texture, .. } => textures.push(Rc::clone(texture)),
            }
        }

        // From here on a failure drops `set`, which releases whatever buffers
        // were already created.
        let mut set = Self {
            gpu: Rc::clone(gpu),
            sets,
            uniforms,
            _textures: textures,
            _layout: Rc::clone(layout),
            _pool: Rc::clone(pool),
        };

        for uniform in &mut set.uniforms {
            for _ in 0..image_count {
                let buffer = gpu.create_buffer(
                    uniform.size,
                    vk::BufferUsageFlags::UNIFORM_BUFFER,
                    vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                )?;
                uniform.buffers.push(buffer);
            }
        }

        for (image, handle) in set.sets.iter().enumerate() {
            let writes = elements
                .iter()
                .map(|element| match element {
                    SetElement::Uniform { binding, size } => {
                        let buffer = set
                            .uniforms
                            .iter()
                            .find(|u| u.binding == *binding)
                            .map(|u| u.buffers[image].buffer)
                            .unwrap_or_default();
                        DescriptorWrite::Uniform {
                            binding: *binding,
                            buffer,
                            range: *size,
                        }
                    }
                    SetElement::Texture { binding, texture } => DescriptorWrite::Sampler {
                        binding: *binding,
                        view: texture.view(),
                        sampler: texture.sampler(),
                    },
                })
                .collect::<Vec<_>>();
            gpu.update_descriptor_set(*handle, &writes)?;
        }

        Ok(set)
    }

    /// The descriptor set to bind while drawing swapchain image `image`.
    pub fn handle(&self, image: u32) -> Result<vk::DescriptorSet> {
        self.sets
            .get(image as usize)
            .copied()
            .ok_or_else(|| self.unknown_image(image))
    }

    pub fn image_count(&self) -> u32 {
        self.sets.len() as u32
    }

    /// Copies `value` into the uniform buffer of `binding` owned by `image`.
    pub fn write<T: Pod>(&self, image: u32, binding: u32, value: &T) -> Result<()> {
        self.write_bytes(image, binding, bytemuck::bytes_of(value))
    }

    pub fn write_bytes(&self, image: u32, binding: u32, bytes: &[u8]) -> Result<()> {
        let uniform = self
            .uniforms
            .iter()
            .find(|u| u.binding == binding)
            .ok_or(EngineError::UnknownBinding { binding })?;

        if bytes.len() as u64 > uniform.size {
            return Err(EngineError::UniformOverflow {
                binding,
                size: uniform.size,
                written: bytes.len() as u64,
            }
            .into());
        }

        let buffer = uniform
            .buffers
            .get(image as usize)
            .ok_or_else(|| self.unknown_image(image))?;

        if bytes.is_empty() {
            return Ok(());
        }

        self.gpu.write_buffer(buffer, 0, bytes)
    }

    fn unknown_image(&self, image: u32) -> anyhow::Error {
        EngineError::UnknownImage {
            image,
            image_count: self.image_count(),
        }
        .into()
    }

    #[cfg(test)]
    pub(crate) fn uniform_buffer(&self, image: u32, binding: u32) -> Option<GpuBuffer> {
        self.uniforms
            .iter()
            .find(|u| u.binding == binding)
            .and_then(|u| u.buffers.get(image as usize).copied())
    }
}

impl<G: GpuDevice> Drop for DescriptorSet<G> {
    fn drop(&mut self) {
        for uniform in &self.uniforms {
            for buffer in &uniform.buffers {
                self.gpu.destroy_buffer(*buffer);
            }
        }
    }
}

/// Elements must cover the layout one-to-one by binding and kind, and every
/// uniform must hold at least one byte.
fn check_elements<G: GpuDevice>(
    layout: &[LayoutBinding],
    elements: &[SetElement<G>],
) -> Result<()> {
    let mut seen = HashSet::new();
    for element in elements {
        let binding = element.binding();
        if let SetElement::Uniform { size: 0, .. } = element {
            return Err(EngineError::EmptyUniform { binding }.into());
        }
        let matches = layout
            .iter()
            .any(|b| b.binding == binding && b.kind == element.kind());
        if !matches || !seen.insert(binding) {
            return Err(EngineError::LayoutMismatch { binding }.into());
        }
    }

    if let Some(missing) = layout.iter().find(|b| !seen.contains(&b.binding)) {
        return Err(EngineError::LayoutMismatch {
            binding: missing.binding,
        }
        .into());
    }

    Ok(())
}
