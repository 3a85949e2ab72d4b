use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use log::*;
use vulkanalia::vk;

use crate::app::{Application, FrameInfo, FrameRecorder};
use crate::clock::FrameClock;
use crate::frame::{FrameReport, FrameSync};
use crate::gpu::{GpuDevice, ScenePass};
use crate::input::InputState;
use crate::vulkan::constants::MAX_FRAMES_IN_FLIGHT;

/// What the swapchain exposes to pipelines and command recording.
#[derive(Clone, Debug, PartialEq)]
pub struct RenderTarget {
    pub swapchain: vk::SwapchainKHR,
    pub extent: vk::Extent2D,
    pub render_pass: vk::RenderPass,
    /// One per swapchain image.
    pub framebuffers: Vec<vk::Framebuffer>,
}

impl RenderTarget {
    pub fn image_count(&self) -> u32 {
        self.framebuffers.len() as u32
    }
}

/// Owns the pre-recorded command buffers and drives the frame loop.
pub struct Renderer<G: GpuDevice> {
    gpu: Rc<G>,
    target: RenderTarget,
    command_buffers: Vec<vk::CommandBuffer>,
    frames: FrameSync<G>,
}

impl<G: GpuDevice> Renderer<G> {
    /// Records one command buffer per swapchain image through `app`.
    pub fn new<A: Application<G>>(
        gpu: &Rc<G>,
        target: RenderTarget,
        app: &A,
        clear_color: [f32; 4],
    ) -> Result<Self> {
        let image_count = target.image_count();
        let command_buffers = gpu.allocate_command_buffers(image_count)?;
        let frames = match FrameSync::new(gpu, image_count, MAX_FRAMES_IN_FLIGHT) {
            Ok(frames) => frames,
            Err(e) => {
                gpu.free_command_buffers(&command_buffers);
                return Err(e);
            }
        };

        let renderer = Self {
            gpu: Rc::clone(gpu),
            target,
            command_buffers,
            frames,
        };
        renderer
            .record(app, clear_color)
            .context("Failed to record command buffers.")?;

        info!("Recorded {} command buffers.", image_count);
        Ok(renderer)
    }

    fn record<A: Application<G>>(&self, app: &A, clear_color: [f32; 4]) -> Result<()> {
        for (i, command_buffer) in self.command_buffers.iter().enumerate() {
            let framebuffer = *self
                .target
                .framebuffers
                .get(i)
                .ok_or_else(|| anyhow!("Missing framebuffer for image {}.", i))?;

            self.gpu.begin_scene(
                *command_buffer,
                &ScenePass {
                    render_pass: self.target.render_pass,
                    framebuffer,
                    extent: self.target.extent,
                    clear_color,
                },
            )?;

            let mut recorder = FrameRecorder::new(&*self.gpu, *command_buffer, i as u32);
            app.record_frame(&mut recorder)?;

            self.gpu.end_scene(*command_buffer)?;
        }

        Ok(())
    }

    pub fn draw_frame<A: Application<G>>(
        &mut self,
        app: &mut A,
        clock: &FrameClock,
        input: &InputState,
    ) -> Result<FrameReport> {
        let extent = self.target.extent;
        self.frames
            .draw(self.target.swapchain, &self.command_buffers, |image_index| {
                app.update_frame(&FrameInfo {
                    image_index,
                    clock,
                    input,
                    extent,
                })
            })
    }

    pub fn target(&self) -> &RenderTarget {
        &self.target
    }
}

impl<G: GpuDevice> Drop for Renderer<G> {
    fn drop(&mut self) {
        if let Err(e) = self.gpu.wait_idle() {
            error!("Failed to wait for device idle: {:#}", e);
        }
        self.gpu.free_command_buffers(&self.command_buffers);
    }
}
