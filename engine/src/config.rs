use anyhow::Result;

use crate::error::EngineError;

/// Size and title of the (non-resizable) window.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WindowParams {
    pub width: u32,
    pub height: u32,
    pub title: String,
}

impl Default for WindowParams {
    fn default() -> Self {
        Self {
            width: 1024,
            height: 768,
            title: String::from("Engine"),
        }
    }
}

/// Descriptor pool capacity declared by the application before startup.
///
/// Counts are per swapchain image; the pool scales them by the image count
/// because every descriptor set is replicated once per image.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PoolBudget {
    pub uniform_blocks: u32,
    pub textures: u32,
    pub sets: u32,
}

impl PoolBudget {
    pub const fn new(uniform_blocks: u32, textures: u32, sets: u32) -> Self {
        Self {
            uniform_blocks,
            textures,
            sets,
        }
    }

    pub fn scaled(self, image_count: u32) -> Result<Self> {
        let scale = |count: u32| {
            count
                .checked_mul(image_count)
                .ok_or(EngineError::PoolBudgetOverflow {
                    budget: self,
                    image_count,
                })
        };

        Ok(Self {
            uniform_blocks: scale(self.uniform_blocks)?,
            textures: scale(self.textures)?,
            sets: scale(self.sets)?,
        })
    }

    /// Returns true if every counter of `demand` fits in `self`.
    pub fn covers(&self, demand: &PoolBudget) -> bool {
        demand.uniform_blocks <= self.uniform_blocks
            && demand.textures <= self.textures
            && demand.sets <= self.sets
    }

    pub(crate) fn saturating_sub(self, other: PoolBudget) -> Self {
        Self {
            uniform_blocks: self.uniform_blocks.saturating_sub(other.uniform_blocks),
            textures: self.textures.saturating_sub(other.textures),
            sets: self.sets.saturating_sub(other.sets),
        }
    }

    pub(crate) fn saturating_add(self, other: PoolBudget) -> Self {
        Self {
            uniform_blocks: self.uniform_blocks.saturating_add(other.uniform_blocks),
            textures: self.textures.saturating_add(other.textures),
            sets: self.sets.saturating_add(other.sets),
        }
    }
}

/// Everything the engine needs to know before `setup` runs.
#[derive(Clone, Debug)]
pub struct AppConfig {
    pub window: WindowParams,
    pub pool: PoolBudget,
    pub clear_color: [f32; 4],
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            window: WindowParams::default(),
            pool: PoolBudget::default(),
            clear_color: [0.0, 0.0, 0.0, 1.0],
        }
    }
}
