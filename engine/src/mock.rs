//! Recording [`GpuDevice`] for unit tests.
//!
//! Every handle is a unique integer. The mock tracks which handles are alive,
//! models fence and semaphore states the way a real queue would, keeps buffer
//! memory as byte vectors and collects protocol violations instead of
//! panicking so tests can assert on them.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};

use anyhow::{anyhow, Result};
use vulkanalia::vk::{self, Handle};

use crate::assets::ImageData;
use crate::gpu::{
    DescriptorKind, DescriptorWrite, GpuBuffer, GpuDevice, GpuImage, LayoutBinding, PipelineDesc,
    PoolSizes, ScenePass,
};

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum FenceState {
    Signaled,
    Unsignaled,
    /// Submitted, completes on the next wait or idle.
    Pending,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum Call {
    WaitFence(vk::Fence),
    ResetFence(vk::Fence),
    WaitIdle,
    Acquire {
        signal: vk::Semaphore,
        image_index: u32,
    },
    Submit {
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    },
    Present {
        image_index: u32,
        wait: vk::Semaphore,
    },
    WriteBuffer {
        buffer: vk::Buffer,
        offset: u64,
        len: usize,
    },
    UpdateDescriptorSet {
        set: vk::DescriptorSet,
        writes: Vec<DescriptorWrite>,
    },
    BeginScene {
        command_buffer: vk::CommandBuffer,
        framebuffer: vk::Framebuffer,
    },
    EndScene(vk::CommandBuffer),
    BindPipeline(vk::CommandBuffer, vk::Pipeline),
    BindDescriptorSet {
        command_buffer: vk::CommandBuffer,
        set_index: u32,
        set: vk::DescriptorSet,
    },
    DrawIndexed {
        command_buffer: vk::CommandBuffer,
        index_count: u32,
    },
    Destroy {
        kind: &'static str,
        raw: u64,
    },
}

struct PoolUsage {
    capacity: PoolSizes,
    uniform_buffers: u32,
    combined_image_samplers: u32,
    sets: u32,
}

#[derive(Default)]
struct MockState {
    next_handle: u64,
    live: HashMap<u64, &'static str>,
    calls: Vec<Call>,
    violations: Vec<String>,
    fences: HashMap<u64, FenceState>,
    semaphores: HashMap<u64, bool>,
    memory: HashMap<u64, Vec<u8>>,
    host_visible: HashSet<u64>,
    layouts: HashMap<u64, Vec<LayoutBinding>>,
    pools: HashMap<u64, PoolUsage>,
    set_pool: HashMap<u64, u64>,
    set_layout: HashMap<u64, Vec<LayoutBinding>>,
    pipeline_layouts: HashMap<u64, Vec<vk::DescriptorSetLayout>>,
    in_flight: HashMap<u64, u64>,
    image_count: u32,
    next_image: u32,
    acquire_order: VecDeque<u32>,
    op_counts: HashMap<&'static str, usize>,
    failures: HashMap<&'static str, usize>,
}

impl MockState {
    fn create(&mut self, kind: &'static str) -> u64 {
        self.next_handle += 1;
        self.live.insert(self.next_handle, kind);
        self.next_handle
    }

    fn destroy(&mut self, kind: &'static str, raw: u64) {
        match self.live.remove(&raw) {
            Some(k) if k == kind => {}
            Some(k) => self.violation(format!("destroyed {} {} as a {}", k, raw, kind)),
            None => self.violation(format!("{} {} released twice or never created", kind, raw)),
        }
        self.calls.push(Call::Destroy { kind, raw });
    }

    fn require_live(&mut self, kind: &'static str, raw: u64) {
        if self.live.get(&raw) != Some(&kind) {
            self.violation(format!("{} {} used while not alive", kind, raw));
        }
    }

    fn violation(&mut self, message: String) {
        self.violations.push(message);
    }

    fn check(&mut self, op: &'static str) -> Result<()> {
        let count = self.op_counts.entry(op).or_default();
        let nth = *count;
        *count += 1;
        if self.failures.get(op) == Some(&nth) {
            return Err(anyhow!("Mock failure in `{}`.", op));
        }
        Ok(())
    }

    fn consume_semaphore(&mut self, semaphore: vk::Semaphore) {
        let raw = semaphore.as_raw();
        self.require_live("semaphore", raw);
        if self.semaphores.insert(raw, false) != Some(true) {
            self.violation(format!("waited on unsignaled semaphore {}", raw));
        }
    }

    fn signal_semaphore(&mut self, semaphore: vk::Semaphore) {
        let raw = semaphore.as_raw();
        self.require_live("semaphore", raw);
        if self.semaphores.insert(raw, true) == Some(true) {
            self.violation(format!("signaled semaphore {} twice", raw));
        }
    }
}

pub(crate) struct MockGpu {
    state: RefCell<MockState>,
}

impl MockGpu {
    pub fn new() -> Self {
        Self::with_image_count(3)
    }

    pub fn with_image_count(image_count: u32) -> Self {
        let state = MockState {
            image_count,
            ..Default::default()
        };
        Self {
            state: RefCell::new(state),
        }
    }

    /// Acquire returns these indices first, then falls back to round robin.
    pub fn script_acquires(&self, order: &[u32]) {
        self.state.borrow_mut().acquire_order.extend(order);
    }

    /// Makes the `nth` (0-based) call of `op` fail.
    pub fn fail_on(&self, op: &'static str, nth: usize) {
        self.state.borrow_mut().failures.insert(op, nth);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.borrow().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.borrow_mut().calls.clear();
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.borrow().violations.clone()
    }

    pub fn live_count(&self) -> usize {
        self.state.borrow().live.len()
    }

    pub fn live_of(&self, kind: &str) -> usize {
        self.state.borrow().live.values().filter(|k| **k == kind).count()
    }

    /// Kinds in the order they were destroyed.
    pub fn destroyed(&self) -> Vec<&'static str> {
        self.state
            .borrow()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Destroy { kind, .. } => Some(*kind),
                _ => None,
            })
            .collect()
    }

    pub fn fence_state(&self, fence: vk::Fence) -> Option<FenceState> {
        self.state.borrow().fences.get(&fence.as_raw()).copied()
    }

    pub fn memory_of(&self, buffer: &GpuBuffer) -> Vec<u8> {
        self.state
            .borrow()
            .memory
            .get(&buffer.memory.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    pub fn pipeline_set_layouts(&self, layout: vk::PipelineLayout) -> Vec<vk::DescriptorSetLayout> {
        self.state
            .borrow()
            .pipeline_layouts
            .get(&layout.as_raw())
            .cloned()
            .unwrap_or_default()
    }

    fn new_buffer(&self, state: &mut MockState, size: u64, host_visible: bool) -> GpuBuffer {
        if size == 0 {
            state.violation(String::from("created a zero-sized buffer"));
        }
        let buffer = state.create("buffer");
        let memory = state.create("memory");
        state.memory.insert(memory, vec![0; size as usize]);
        if host_visible {
            state.host_visible.insert(memory);
        }
        GpuBuffer {
            buffer: vk::Buffer::from_raw(buffer),
            memory: vk::DeviceMemory::from_raw(memory),
            size,
        }
    }
}

impl GpuDevice for MockGpu {
    fn create_semaphore(&self) -> Result<vk::Semaphore> {
        let mut state = self.state.borrow_mut();
        state.check("create_semaphore")?;
        let raw = state.create("semaphore");
        state.semaphores.insert(raw, false);
        Ok(vk::Semaphore::from_raw(raw))
    }

    fn destroy_semaphore(&self, semaphore: vk::Semaphore) {
        let mut state = self.state.borrow_mut();
        state.destroy("semaphore", semaphore.as_raw());
        state.semaphores.remove(&semaphore.as_raw());
    }

    fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let mut state = self.state.borrow_mut();
        state.check("create_fence")?;
        let raw = state.create("fence");
        let fence_state = if signaled {
            FenceState::Signaled
        } else {
            FenceState::Unsignaled
        };
        state.fences.insert(raw, fence_state);
        Ok(vk::Fence::from_raw(raw))
    }

    fn destroy_fence(&self, fence: vk::Fence) {
        let mut state = self.state.borrow_mut();
        let raw = fence.as_raw();
        if state.fences.get(&raw) == Some(&FenceState::Pending) {
            state.violation(format!("destroyed pending fence {}", raw));
        }
        state.destroy("fence", raw);
        state.fences.remove(&raw);
    }

    fn wait_for_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check("wait_for_fence")?;
        let raw = fence.as_raw();
        state.require_live("fence", raw);
        state.calls.push(Call::WaitFence(fence));
        match state.fences.get(&raw).copied() {
            Some(FenceState::Pending) | Some(FenceState::Signaled) => {
                state.fences.insert(raw, FenceState::Signaled);
                state.in_flight.remove(&raw);
                Ok(())
            }
            _ => {
                state.violation(format!("waited on fence {} that can never signal", raw));
                Err(anyhow!("Deadlock waiting on fence {}.", raw))
            }
        }
    }

    fn reset_fence(&self, fence: vk::Fence) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check("reset_fence")?;
        let raw = fence.as_raw();
        state.require_live("fence", raw);
        state.calls.push(Call::ResetFence(fence));
        if state.fences.get(&raw) == Some(&FenceState::Pending) {
            state.violation(format!("reset pending fence {}", raw));
        }
        state.fences.insert(raw, FenceState::Unsignaled);
        Ok(())
    }

    fn wait_idle(&self) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check("wait_idle")?;
        state.calls.push(Call::WaitIdle);
        for fence in state.fences.values_mut() {
            if *fence == FenceState::Pending {
                *fence = FenceState::Signaled;
            }
        }
        state.in_flight.clear();
        Ok(())
    }

    fn acquire_next_image(
        &self,
        _swapchain: vk::SwapchainKHR,
        signal: vk::Semaphore,
    ) -> Result<u32> {
        let mut state = self.state.borrow_mut();
        state.check("acquire_next_image")?;
        state.signal_semaphore(signal);
        let image_index = match state.acquire_order.pop_front() {
            Some(index) => index,
            None => {
                let index = state.next_image % state.image_count;
                state.next_image += 1;
                index
            }
        };
        state.calls.push(Call::Acquire {
            signal,
            image_index,
        });
        Ok(image_index)
    }

    fn submit(
        &self,
        command_buffer: vk::CommandBuffer,
        wait: vk::Semaphore,
        signal: vk::Semaphore,
        fence: vk::Fence,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check("submit")?;
        let cb = command_buffer.as_raw() as u64;
        state.require_live("command buffer", cb);
        state.require_live("fence", fence.as_raw());
        match state.fences.get(&fence.as_raw()).copied() {
            Some(FenceState::Unsignaled) => {}
            other => state.violation(format!(
                "submitted with fence {} in state {:?}",
                fence.as_raw(),
                other
            )),
        }
        state.fences.insert(fence.as_raw(), FenceState::Pending);
        state.in_flight.insert(fence.as_raw(), cb);
        state.consume_semaphore(wait);
        state.signal_semaphore(signal);
        state.calls.push(Call::Submit {
            command_buffer,
            wait,
            signal,
            fence,
        });
        Ok(())
    }

    fn present(
        &self,
        _swapchain: vk::SwapchainKHR,
        image_index: u32,
        wait: vk::Semaphore,
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check("present")?;
        state.consume_semaphore(wait);
        state.calls.push(Call::Present { image_index, wait });
        Ok(())
    }

    fn create_buffer(
        &self,
        size: u64,
        _usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<GpuBuffer> {
        let mut state = self.state.borrow_mut();
        state.check("create_buffer")?;
        let host_visible = properties.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);
        Ok(self.new_buffer(&mut state, size, host_visible))
    }

    fn write_buffer(&self, buffer: &GpuBuffer, offset: u64, data: &[u8]) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check("write_buffer")?;
        let memory = buffer.memory.as_raw();
        state.require_live("buffer", buffer.buffer.as_raw());
        state.require_live("memory", memory);
        if !state.host_visible.contains(&memory) {
            state.violation(format!("mapped device-local memory {}", memory));
        }

        let start = offset as usize;
        let end = start + data.len();
        let bytes = state.memory.get_mut(&memory).ok_or_else(|| anyhow!("Unknown memory."))?;
        if end > bytes.len() {
            return Err(anyhow!("Write past the end of memory {}.", memory));
        }
        bytes[start..end].copy_from_slice(data);

        state.calls.push(Call::WriteBuffer {
            buffer: buffer.buffer,
            offset,
            len: data.len(),
        });
        Ok(())
    }

    fn upload_buffer(&self, data: &[u8], _usage: vk::BufferUsageFlags) -> Result<GpuBuffer> {
        let mut state = self.state.borrow_mut();
        state.check("upload_buffer")?;
        let buffer = self.new_buffer(&mut state, data.len() as u64, false);
        state.memory.insert(buffer.memory.as_raw(), data.to_vec());
        Ok(buffer)
    }

    fn destroy_buffer(&self, buffer: GpuBuffer) {
        let mut state = self.state.borrow_mut();
        state.destroy("buffer", buffer.buffer.as_raw());
        state.destroy("memory", buffer.memory.as_raw());
        state.memory.remove(&buffer.memory.as_raw());
        state.host_visible.remove(&buffer.memory.as_raw());
    }

    fn upload_texture(&self, image: &ImageData, mip_levels: u32) -> Result<GpuImage> {
        let mut state = self.state.borrow_mut();
        state.check("upload_texture")?;
        if mip_levels == 0 || image.pixels.len() != (image.width * image.height * 4) as usize {
            state.violation(format!(
                "bad texture upload {}x{} with {} mips",
                image.width, image.height, mip_levels
            ));
        }
        Ok(GpuImage {
            image: vk::Image::from_raw(state.create("image")),
            memory: vk::DeviceMemory::from_raw(state.create("memory")),
            view: vk::ImageView::from_raw(state.create("image view")),
        })
    }

    fn destroy_image(&self, image: GpuImage) {
        let mut state = self.state.borrow_mut();
        state.destroy("image view", image.view.as_raw());
        state.destroy("image", image.image.as_raw());
        state.destroy("memory", image.memory.as_raw());
    }

    fn create_sampler(&self, _mip_levels: u32) -> Result<vk::Sampler> {
        let mut state = self.state.borrow_mut();
        state.check("create_sampler")?;
        Ok(vk::Sampler::from_raw(state.create("sampler")))
    }

    fn destroy_sampler(&self, sampler: vk::Sampler) {
        self.state.borrow_mut().destroy("sampler", sampler.as_raw());
    }

    fn create_descriptor_set_layout(
        &self,
        bindings: &[LayoutBinding],
    ) -> Result<vk::DescriptorSetLayout> {
        let mut state = self.state.borrow_mut();
        state.check("create_descriptor_set_layout")?;
        let raw = state.create("descriptor set layout");
        state.layouts.insert(raw, bindings.to_vec());
        Ok(vk::DescriptorSetLayout::from_raw(raw))
    }

    fn destroy_descriptor_set_layout(&self, layout: vk::DescriptorSetLayout) {
        self.state
            .borrow_mut()
            .destroy("descriptor set layout", layout.as_raw());
    }

    fn create_descriptor_pool(&self, sizes: &PoolSizes) -> Result<vk::DescriptorPool> {
        let mut state = self.state.borrow_mut();
        state.check("create_descriptor_pool")?;
        let raw = state.create("descriptor pool");
        state.pools.insert(
            raw,
            PoolUsage {
                capacity: *sizes,
                uniform_buffers: 0,
                combined_image_samplers: 0,
                sets: 0,
            },
        );
        Ok(vk::DescriptorPool::from_raw(raw))
    }

    fn destroy_descriptor_pool(&self, pool: vk::DescriptorPool) {
        let mut state = self.state.borrow_mut();
        let raw = pool.as_raw();
        state.destroy("descriptor pool", raw);
        state.pools.remove(&raw);

        // Destroying a pool frees every set allocated from it.
        let sets: Vec<u64> = state
            .set_pool
            .iter()
            .filter(|(_, p)| **p == raw)
            .map(|(s, _)| *s)
            .collect();
        for set in sets {
            state.set_pool.remove(&set);
            state.set_layout.remove(&set);
            state.live.remove(&set);
        }
    }

    fn allocate_descriptor_sets(
        &self,
        pool: vk::DescriptorPool,
        layout: vk::DescriptorSetLayout,
        count: u32,
    ) -> Result<Vec<vk::DescriptorSet>> {
        let mut state = self.state.borrow_mut();
        state.check("allocate_descriptor_sets")?;
        state.require_live("descriptor pool", pool.as_raw());
        state.require_live("descriptor set layout", layout.as_raw());

        let bindings = state.layouts.get(&layout.as_raw()).cloned().unwrap_or_default();
        let of_kind = |kind| bindings.iter().filter(|b| b.kind == kind).count() as u32;
        let uniforms = of_kind(DescriptorKind::UniformBuffer) * count;
        let samplers = of_kind(DescriptorKind::CombinedImageSampler) * count;

        let usage = state
            .pools
            .get_mut(&pool.as_raw())
            .ok_or_else(|| anyhow!("Unknown descriptor pool."))?;
        usage.uniform_buffers += uniforms;
        usage.combined_image_samplers += samplers;
        usage.sets += count;
        if usage.uniform_buffers > usage.capacity.uniform_buffers
            || usage.combined_image_samplers > usage.capacity.combined_image_samplers
            || usage.sets > usage.capacity.max_sets
        {
            state.violation(String::from("driver descriptor pool overflowed"));
            return Err(anyhow!("VK_ERROR_OUT_OF_POOL_MEMORY"));
        }

        let mut sets = Vec::with_capacity(count as usize);
        for _ in 0..count {
            let raw = state.create("descriptor set");
            state.set_pool.insert(raw, pool.as_raw());
            state.set_layout.insert(raw, bindings.clone());
            sets.push(vk::DescriptorSet::from_raw(raw));
        }
        Ok(sets)
    }

    fn update_descriptor_set(
        &self,
        set: vk::DescriptorSet,
        writes: &[DescriptorWrite],
    ) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check("update_descriptor_set")?;
        state.require_live("descriptor set", set.as_raw());
        let layout = state.set_layout.get(&set.as_raw()).cloned().unwrap_or_default();

        for write in writes {
            let kind = match write {
                DescriptorWrite::Uniform { buffer, .. } => {
                    state.require_live("buffer", buffer.as_raw());
                    DescriptorKind::UniformBuffer
                }
                DescriptorWrite::Sampler { view, sampler, .. } => {
                    state.require_live("image view", view.as_raw());
                    state.require_live("sampler", sampler.as_raw());
                    DescriptorKind::CombinedImageSampler
                }
            };
            if !layout
                .iter()
                .any(|b| b.binding == write.binding() && b.kind == kind)
            {
                state.violation(format!("write to binding {} not in layout", write.binding()));
            }
        }

        state.calls.push(Call::UpdateDescriptorSet {
            set,
            writes: writes.to_vec(),
        });
        Ok(())
    }

    fn create_pipeline(
        &self,
        desc: &PipelineDesc<'_>,
    ) -> Result<(vk::PipelineLayout, vk::Pipeline)> {
        let mut state = self.state.borrow_mut();
        state.check("create_pipeline")?;
        for layout in desc.set_layouts {
            state.require_live("descriptor set layout", layout.as_raw());
        }
        if desc.vertex_shader.is_empty() || desc.fragment_shader.is_empty() {
            state.violation(String::from("pipeline created from empty shader"));
        }

        let layout = state.create("pipeline layout");
        let pipeline = state.create("pipeline");
        state.pipeline_layouts.insert(layout, desc.set_layouts.to_vec());
        Ok((
            vk::PipelineLayout::from_raw(layout),
            vk::Pipeline::from_raw(pipeline),
        ))
    }

    fn destroy_pipeline(&self, layout: vk::PipelineLayout, pipeline: vk::Pipeline) {
        let mut state = self.state.borrow_mut();
        state.destroy("pipeline", pipeline.as_raw());
        state.destroy("pipeline layout", layout.as_raw());
    }

    fn allocate_command_buffers(&self, count: u32) -> Result<Vec<vk::CommandBuffer>> {
        let mut state = self.state.borrow_mut();
        state.check("allocate_command_buffers")?;
        Ok((0..count)
            .map(|_| vk::CommandBuffer::from_raw(state.create("command buffer") as usize))
            .collect())
    }

    fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        let mut state = self.state.borrow_mut();
        for command_buffer in command_buffers {
            let raw = command_buffer.as_raw() as u64;
            if state.in_flight.values().any(|cb| *cb == raw) {
                state.violation(format!("freed in-flight command buffer {}", raw));
            }
            state.destroy("command buffer", raw);
        }
    }

    fn begin_scene(&self, command_buffer: vk::CommandBuffer, pass: &ScenePass) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check("begin_scene")?;
        state.require_live("command buffer", command_buffer.as_raw() as u64);
        state.calls.push(Call::BeginScene {
            command_buffer,
            framebuffer: pass.framebuffer,
        });
        Ok(())
    }

    fn end_scene(&self, command_buffer: vk::CommandBuffer) -> Result<()> {
        let mut state = self.state.borrow_mut();
        state.check("end_scene")?;
        state.calls.push(Call::EndScene(command_buffer));
        Ok(())
    }

    fn cmd_bind_pipeline(&self, command_buffer: vk::CommandBuffer, pipeline: vk::Pipeline) {
        let mut state = self.state.borrow_mut();
        state.require_live("pipeline", pipeline.as_raw());
        state.calls.push(Call::BindPipeline(command_buffer, pipeline));
    }

    fn cmd_bind_descriptor_set(
        &self,
        command_buffer: vk::CommandBuffer,
        layout: vk::PipelineLayout,
        set_index: u32,
        set: vk::DescriptorSet,
    ) {
        let mut state = self.state.borrow_mut();
        state.require_live("pipeline layout", layout.as_raw());
        state.require_live("descriptor set", set.as_raw());
        state.calls.push(Call::BindDescriptorSet {
            command_buffer,
            set_index,
            set,
        });
    }

    fn cmd_draw_indexed(
        &self,
        command_buffer: vk::CommandBuffer,
        vertex_buffer: vk::Buffer,
        index_buffer: vk::Buffer,
        index_count: u32,
    ) {
        let mut state = self.state.borrow_mut();
        state.require_live("buffer", vertex_buffer.as_raw());
        state.require_live("buffer", index_buffer.as_raw());
        state.calls.push(Call::DrawIndexed {
            command_buffer,
            index_count,
        });
    }
}
