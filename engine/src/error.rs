use std::path::PathBuf;

use thiserror::Error;
use vulkanalia::vk;

use crate::config::PoolBudget;

/// Typed engine failures. Everything else travels as plain `anyhow` errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Descriptor pool exhausted (requested {requested:?}, remaining {remaining:?}).")]
    PoolExhausted {
        requested: PoolBudget,
        remaining: PoolBudget,
    },
    #[error("Descriptor pool budget {budget:?} overflows when scaled by {image_count} images.")]
    PoolBudgetOverflow { budget: PoolBudget, image_count: u32 },
    #[error("Texture image format {0:?} does not support linear blitting.")]
    UnsupportedBlitFormat(vk::Format),
    #[error("Failed to find suitable memory type.")]
    MissingMemoryType,
    #[error("Failed to find supported depth format.")]
    NoDepthFormat,
    #[error("Descriptor set element for binding {binding} does not match its layout.")]
    LayoutMismatch { binding: u32 },
    #[error("Descriptor set layout declares binding {binding} twice.")]
    DuplicateBinding { binding: u32 },
    #[error("Descriptor set has no uniform buffer at binding {binding}.")]
    UnknownBinding { binding: u32 },
    #[error("Uniform at binding {binding} holds {size} bytes, {written} written.")]
    UniformOverflow {
        binding: u32,
        size: u64,
        written: u64,
    },
    #[error("Uniform at binding {binding} has zero size.")]
    EmptyUniform { binding: u32 },
    #[error("Swapchain image {image} is out of range for {image_count} images.")]
    UnknownImage { image: u32, image_count: u32 },
    #[error("Invalid asset `{}`: {reason}", path.display())]
    InvalidAsset { path: PathBuf, reason: String },
    #[error("Swapchain is out of date; window resizing is not supported.")]
    SwapchainOutOfDate,
}
