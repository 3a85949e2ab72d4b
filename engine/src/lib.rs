use std::rc::Rc;

use anyhow::Result;
use log::*;
use winit::dpi::LogicalSize;
use winit::event::{Event, WindowEvent};
use winit::event_loop::EventLoop;
use winit::window::{Window, WindowBuilder};

mod app;
mod assets;
mod clock;
mod config;
mod error;
mod frame;
mod gpu;
mod input;
#[cfg(test)]
mod mock;
mod renderer;
mod resources;
mod vulkan;

pub use app::{Application, FrameInfo, FrameRecorder, SetupContext};
pub use assets::{load_image, load_mesh, ImageData, MeshData};
pub use clock::FrameClock;
pub use config::{AppConfig, PoolBudget, WindowParams};
pub use error::EngineError;
pub use frame::{FrameReport, FrameStage, FrameSync};
pub use gpu::{
    DescriptorKind, DescriptorWrite, GpuBuffer, GpuDevice, GpuImage, LayoutBinding, PipelineDesc,
    PoolSizes, ScenePass,
};
pub use input::InputState;
pub use renderer::{RenderTarget, Renderer};
pub use resources::{
    mip_level_count, DescriptorPool, DescriptorSet, DescriptorSetLayout, Model, Pipeline,
    SetElement, Texture, Vertex,
};
pub use vulkan::{SuitabilityError, VulkanContext};

pub use vulkanalia::vk;
pub use winit::keyboard::KeyCode;

use vulkan::VulkanSwapchain;

/// Runs an [`Application`] on real Vulkan hardware inside a winit window.
pub struct Engine<A: Application<VulkanContext>> {
    app: A,
}

// Field order is teardown order.
struct Session<A: Application<VulkanContext>> {
    renderer: Renderer<VulkanContext>,
    _swapchain: VulkanSwapchain,
    app: A,
    _pool: Rc<DescriptorPool<VulkanContext>>,
    _ctx: Rc<VulkanContext>,
}

impl<A: Application<VulkanContext>> Engine<A> {
    pub fn new(app: A) -> Self {
        Self { app }
    }

    /// Blocks until the window is closed or a frame fails, then tears
    /// everything down and returns the first error.
    pub fn run(self) -> Result<()> {
        let config = self.app.configure();

        let event_loop = EventLoop::new()?;
        let window = WindowBuilder::new()
            .with_title(config.window.title.as_str())
            .with_inner_size(LogicalSize::new(config.window.width, config.window.height))
            .with_resizable(false)
            .build(&event_loop)?;

        let mut session = Session::start(self.app, &config, &window)?;
        let mut clock = FrameClock::new();
        let mut input = InputState::default();
        let mut failure = None;

        event_loop.run(|event, elwt| match event {
            Event::AboutToWait => window.request_redraw(),
            Event::WindowEvent { event, .. } => match event {
                WindowEvent::RedrawRequested if !elwt.exiting() => {
                    clock.tick();
                    if let Err(e) = session
                        .renderer
                        .draw_frame(&mut session.app, &clock, &input)
                    {
                        error!("{:#}", e);
                        failure = Some(e);
                        elwt.exit();
                    }
                }
                WindowEvent::KeyboardInput { event, .. } => input.handle(&event),
                WindowEvent::CloseRequested => {
                    info!("Close requested after {} frames.", clock.frame());
                    elwt.exit();
                }
                _ => {}
            },
            _ => {}
        })?;

        drop(session);
        info!("Shut down cleanly.");

        match failure {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<A: Application<VulkanContext>> Session<A> {
    fn start(mut app: A, config: &AppConfig, window: &Window) -> Result<Self> {
        let ctx = VulkanContext::new(window, &config.window.title)?;
        let swapchain = unsafe { VulkanSwapchain::create(&ctx, window) }?;
        let target = swapchain.target();

        let pool = DescriptorPool::new(&ctx, config.pool, target.image_count())?;
        app.setup(&SetupContext {
            gpu: &ctx,
            pool: &pool,
            target: &target,
        })?;

        let renderer = Renderer::new(&ctx, target, &app, config.clear_color)?;

        Ok(Self {
            renderer,
            _swapchain: swapchain,
            app,
            _pool: pool,
            _ctx: ctx,
        })
    }
}
