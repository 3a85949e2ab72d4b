//! Per-frame CPU/GPU synchronization.
//!
//! Each frame slot owns an "image available" semaphore, a "render finished"
//! semaphore and an "in flight" fence. A slot is only reused after its fence
//! was observed signaled, and each swapchain image remembers which slot last
//! submitted work for it so that two slots never race on the same image.

use std::fmt;
use std::rc::Rc;

use anyhow::{anyhow, Context, Result};
use log::*;
use vulkanalia::vk;

use crate::gpu::GpuDevice;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameStage {
    WaitSlotFence,
    AcquireImage,
    WaitImageFence,
    UpdateFrameData,
    Submit,
    Present,
}

impl fmt::Display for FrameStage {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let stage = match self {
            Self::WaitSlotFence => "waiting for the frame slot fence",
            Self::AcquireImage => "acquiring a swapchain image",
            Self::WaitImageFence => "waiting for the image's previous frame",
            Self::UpdateFrameData => "updating frame data",
            Self::Submit => "submitting the command buffer",
            Self::Present => "presenting the image",
        };
        write!(f, "Frame failed while {}.", stage)
    }
}

#[derive(Copy, Clone, Debug)]
struct FrameSlot {
    image_available: vk::Semaphore,
    render_finished: vk::Semaphore,
    in_flight: vk::Fence,
}

/// Which slot and image a completed frame used.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct FrameReport {
    pub slot: usize,
    pub image_index: u32,
}

pub struct FrameSync<G: GpuDevice> {
    gpu: Rc<G>,
    slots: Vec<FrameSlot>,
    /// Slot that last submitted work for each swapchain image.
    images_in_flight: Vec<Option<usize>>,
    current: usize,
}

impl<G: GpuDevice> FrameSync<G> {
    pub fn new(gpu: &Rc<G>, image_count: u32, frames_in_flight: usize) -> Result<Self> {
        let mut sync = Self {
            gpu: Rc::clone(gpu),
            slots: Vec::with_capacity(frames_in_flight),
            images_in_flight: vec![None; image_count as usize],
            current: 0,
        };

        for _ in 0..frames_in_flight {
            let image_available = gpu.create_semaphore()?;
            let render_finished = match gpu.create_semaphore() {
                Ok(semaphore) => semaphore,
                Err(e) => {
                    gpu.destroy_semaphore(image_available);
                    return Err(e);
                }
            };
            let in_flight = match gpu.create_fence(true) {
                Ok(fence) => fence,
                Err(e) => {
                    gpu.destroy_semaphore(render_finished);
                    gpu.destroy_semaphore(image_available);
                    return Err(e);
                }
            };
            sync.slots.push(FrameSlot {
                image_available,
                render_finished,
                in_flight,
            });
        }

        debug!(
            "Created sync objects for {} frames in flight over {} images.",
            frames_in_flight, image_count
        );
        Ok(sync)
    }

    pub fn current_slot(&self) -> usize {
        self.current
    }

    /// Runs one frame: wait, acquire, update, submit, present.
    ///
    /// `update` receives the acquired image index and runs after the image is
    /// known to be free and before its command buffer is submitted.
    pub fn draw<F>(
        &mut self,
        swapchain: vk::SwapchainKHR,
        command_buffers: &[vk::CommandBuffer],
        update: F,
    ) -> Result<FrameReport>
    where
        F: FnOnce(u32) -> Result<()>,
    {
        let slot = self.slots[self.current];

        self.gpu
            .wait_for_fence(slot.in_flight)
            .context(FrameStage::WaitSlotFence)?;

        let image_index = self
            .gpu
            .acquire_next_image(swapchain, slot.image_available)
            .context(FrameStage::AcquireImage)?;
        let image = image_index as usize;
        let command_buffer = *command_buffers
            .get(image)
            .ok_or_else(|| anyhow!("No command buffer for image {}.", image_index))
            .context(FrameStage::AcquireImage)?;

        if let Some(owner) = self.images_in_flight[image] {
            if owner != self.current {
                trace!("Image {} still owned by slot {}.", image_index, owner);
                self.gpu
                    .wait_for_fence(self.slots[owner].in_flight)
                    .context(FrameStage::WaitImageFence)?;
            }
        }
        self.images_in_flight[image] = Some(self.current);

        update(image_index).context(FrameStage::UpdateFrameData)?;

        self.gpu
            .reset_fence(slot.in_flight)
            .context(FrameStage::Submit)?;
        self.gpu
            .submit(
                command_buffer,
                slot.image_available,
                slot.render_finished,
                slot.in_flight,
            )
            .context(FrameStage::Submit)?;

        self.gpu
            .present(swapchain, image_index, slot.render_finished)
            .context(FrameStage::Present)?;

        let report = FrameReport {
            slot: self.current,
            image_index,
        };
        self.current = (self.current + 1) % self.slots.len();
        Ok(report)
    }
}

impl<G: GpuDevice> Drop for FrameSync<G> {
    fn drop(&mut self) {
        for slot in &self.slots {
            self.gpu.destroy_fence(slot.in_flight);
            self.gpu.destroy_semaphore(slot.render_finished);
            self.gpu.destroy_semaphore(slot.image_available);
        }
    }
}
