use anyhow::{anyhow, Result};
use log::*;
use std::collections::HashSet;
use thiserror::Error;
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::KhrSurfaceExtension;

use super::constants;

#[derive(Debug, Error)]
#[error("Missing {0}.")]
pub struct SuitabilityError(pub &'static str);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: u32,
}

impl QueueFamilyIndices {
    /// `families[i]` holds the flags of queue family `i` and whether it can
    /// present to the surface. The graphics family is preferred for
    /// presentation when it can present.
    pub fn pick(families: &[(vk::QueueFlags, bool)]) -> Result<Self, SuitabilityError> {
        let graphics = families
            .iter()
            .position(|(flags, _)| flags.contains(vk::QueueFlags::GRAPHICS));

        let present = match graphics {
            Some(g) if families[g].1 => Some(g),
            _ => families.iter().position(|(_, present)| *present),
        };

        match (graphics, present) {
            (Some(graphics), Some(present)) => Ok(Self {
                graphics: graphics as u32,
                present: present as u32,
            }),
            _ => Err(SuitabilityError("required queue families")),
        }
    }

    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// Everything device selection looks at for one physical device.
#[derive(Clone, Debug, Default)]
pub struct DeviceSupport {
    pub families: Vec<(vk::QueueFlags, bool)>,
    pub extensions: HashSet<vk::ExtensionName>,
    pub format_count: usize,
    pub present_mode_count: usize,
    pub sampler_anisotropy: bool,
}

impl DeviceSupport {
    pub unsafe fn query(
        instance: &Instance,
        surface: vk::SurfaceKHR,
        physical_device: vk::PhysicalDevice,
    ) -> Result<Self> {
        let mut families = Vec::new();
        let properties = instance.get_physical_device_queue_family_properties(physical_device);
        for (index, family) in properties.iter().enumerate() {
            let present = instance.get_physical_device_surface_support_khr(
                physical_device,
                index as u32,
                surface,
            )?;
            families.push((family.queue_flags, present));
        }

        let extensions = instance
            .enumerate_device_extension_properties(physical_device, None)?
            .iter()
            .map(|e| e.extension_name)
            .collect();

        let features = instance.get_physical_device_features(physical_device);

        Ok(Self {
            families,
            extensions,
            format_count: instance
                .get_physical_device_surface_formats_khr(physical_device, surface)?
                .len(),
            present_mode_count: instance
                .get_physical_device_surface_present_modes_khr(physical_device, surface)?
                .len(),
            sampler_anisotropy: features.sampler_anisotropy == vk::TRUE,
        })
    }

    pub fn check(&self) -> Result<QueueFamilyIndices, SuitabilityError> {
        let indices = QueueFamilyIndices::pick(&self.families)?;

        if !constants::DEVICE_EXTENSIONS
            .iter()
            .all(|e| self.extensions.contains(e))
        {
            return Err(SuitabilityError("required device extensions"));
        }
        if self.format_count == 0 || self.present_mode_count == 0 {
            return Err(SuitabilityError("sufficient swapchain support"));
        }
        if !self.sampler_anisotropy {
            return Err(SuitabilityError("sampler anisotropy support"));
        }

        Ok(indices)
    }
}

pub struct VulkanDevice;

impl VulkanDevice {
    pub unsafe fn select_physical_device(
        instance: &Instance,
        surface: vk::SurfaceKHR,
    ) -> Result<(vk::PhysicalDevice, QueueFamilyIndices)> {
        for physical_device in instance.enumerate_physical_devices()? {
            let properties = instance.get_physical_device_properties(physical_device);

            match DeviceSupport::query(instance, surface, physical_device)?.check() {
                Err(error) => warn!(
                    "Skipping physical device (`{}`): {}",
                    properties.device_name, error
                ),
                Ok(indices) => {
                    let version = properties.api_version;
                    info!(
                        "Selected physical device (`{}`, {:?}, Vulkan {}.{}.{}).",
                        properties.device_name,
                        properties.device_type,
                        version >> 22,
                        (version >> 12) & 0x3ff,
                        version & 0xfff
                    );
                    debug!("Queue families: {:?}.", indices);
                    return Ok((physical_device, indices));
                }
            }
        }

        Err(anyhow!("Failed to find suitable physical device."))
    }

    /// Creates the logical device with one queue per unique family and
    /// returns it with the graphics and present queues.
    pub unsafe fn create_logical_device(
        entry: &Entry,
        instance: &Instance,
        physical_device: vk::PhysicalDevice,
        indices: QueueFamilyIndices,
    ) -> Result<(Device, vk::Queue, vk::Queue)> {
        let queue_priorities = &[1.0];
        let queue_infos = indices
            .unique()
            .iter()
            .map(|i| {
                vk::DeviceQueueCreateInfo::builder()
                    .queue_family_index(*i)
                    .queue_priorities(queue_priorities)
            })
            .collect::<Vec<_>>();

        let layers = if constants::VALIDATION_ENABLED {
            vec![constants::VALIDATION_LAYER.as_ptr()]
        } else {
            vec![]
        };

        let mut extensions = constants::DEVICE_EXTENSIONS
            .iter()
            .map(|n| n.as_ptr())
            .collect::<Vec<_>>();

        // Required by Vulkan SDK on macOS since 1.3.216.
        if cfg!(target_os = "macos") && entry.version()? >= constants::PORTABILITY_MACOS_VERSION {
            extensions.push(vk::KHR_PORTABILITY_SUBSET_EXTENSION.name.as_ptr());
        }

        let features = vk::PhysicalDeviceFeatures::builder().sampler_anisotropy(true);

        let info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .enabled_features(&features);

        let device = instance.create_device(physical_device, &info, None)?;

        let graphics_queue = device.get_device_queue(indices.graphics, 0);
        let present_queue = device.get_device_queue(indices.present, 0);

        Ok((device, graphics_queue, present_queue))
    }
}
