use std::rc::Rc;

use anyhow::Result;
use vulkanalia::vk;

use crate::clock::FrameClock;
use crate::config::AppConfig;
use crate::gpu::GpuDevice;
use crate::input::InputState;
use crate::renderer::RenderTarget;
use crate::resources::{DescriptorPool, DescriptorSet, Model, Pipeline};

/// What a game plugs into the engine.
///
/// The engine calls `configure` once before creating any GPU object,
/// `setup` once the device, swapchain and descriptor pool exist,
/// `record_frame` once per swapchain image, and `update_frame` every frame
/// with the image about to be submitted.
pub trait Application<G: GpuDevice> {
    fn configure(&self) -> AppConfig;

    fn setup(&mut self, ctx: &SetupContext<'_, G>) -> Result<()>;

    fn record_frame(&self, recorder: &mut FrameRecorder<'_, G>) -> Result<()>;

    fn update_frame(&mut self, frame: &FrameInfo<'_>) -> Result<()>;
}

pub struct SetupContext<'a, G: GpuDevice> {
    pub gpu: &'a Rc<G>,
    pub pool: &'a Rc<DescriptorPool<G>>,
    pub target: &'a RenderTarget,
}

pub struct FrameInfo<'a> {
    pub image_index: u32,
    pub clock: &'a FrameClock,
    pub input: &'a InputState,
    pub extent: vk::Extent2D,
}

/// Records draw commands into the command buffer of one swapchain image.
pub struct FrameRecorder<'a, G: GpuDevice> {
    gpu: &'a G,
    command_buffer: vk::CommandBuffer,
    image_index: u32,
}

impl<'a, G: GpuDevice> FrameRecorder<'a, G> {
    pub(crate) fn new(gpu: &'a G, command_buffer: vk::CommandBuffer, image_index: u32) -> Self {
        Self {
            gpu,
            command_buffer,
            image_index,
        }
    }

    pub fn image_index(&self) -> u32 {
        self.image_index
    }

    pub fn bind_pipeline(&mut self, pipeline: &Pipeline<G>) {
        self.gpu
            .cmd_bind_pipeline(self.command_buffer, pipeline.handle());
    }

    /// Binds this image's copy of `set` at `set_index` of the pipeline layout.
    pub fn bind_descriptor_set(
        &mut self,
        pipeline: &Pipeline<G>,
        set_index: u32,
        set: &DescriptorSet<G>,
    ) -> Result<()> {
        self.gpu.cmd_bind_descriptor_set(
            self.command_buffer,
            pipeline.layout(),
            set_index,
            set.handle(self.image_index)?,
        );
        Ok(())
    }

    pub fn draw_model(&mut self, model: &Model<G>) {
        self.gpu.cmd_draw_indexed(
            self.command_buffer,
            model.vertex_buffer(),
            model.index_buffer(),
            model.index_count(),
        );
    }
}
