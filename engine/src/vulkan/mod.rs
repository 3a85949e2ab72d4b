//! Raw Vulkan plumbing behind [`crate::gpu::GpuDevice`].

mod buffer;
mod command_buffer;
pub mod constants;
mod context;
mod device;
mod framebuffer;
mod image;
mod instance;
mod pipeline;
mod render_pass;
mod swapchain;

pub use context::VulkanContext;
pub use device::SuitabilityError;
pub use swapchain::VulkanSwapchain;
