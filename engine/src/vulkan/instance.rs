use anyhow::{anyhow, Result};
use log::*;
use std::collections::HashSet;
use std::ffi::{CStr, CString};
use std::os::raw::{c_char, c_void};
use vulkanalia::prelude::v1_0::*;
use vulkanalia::vk::{ExtDebugUtilsExtension, Handle};
use vulkanalia::window as vk_window;
use winit::window::Window;

use super::constants;

pub struct VulkanInstance;

impl VulkanInstance {
    /// Creates the instance and, with validation enabled, the debug messenger.
    pub unsafe fn create(
        window: &Window,
        entry: &Entry,
        title: &str,
    ) -> Result<(Instance, vk::DebugUtilsMessengerEXT)> {
        let application_name = CString::new(title)?;
        let application_info = vk::ApplicationInfo::builder()
            .application_name(application_name.as_bytes_with_nul())
            .application_version(vk::make_version(1, 0, 0))
            .engine_name(b"Boat Runner Engine\0")
            .engine_version(vk::make_version(1, 0, 0))
            .api_version(vk::make_version(1, 0, 0));

        let layers = VulkanInstance::layers(entry)?;
        let (extensions, flags) = VulkanInstance::extensions(window, entry)?;

        let mut info = vk::InstanceCreateInfo::builder()
            .application_info(&application_info)
            .enabled_layer_names(&layers)
            .enabled_extension_names(&extensions)
            .flags(flags);

        // Chained into the create info so instance creation itself is validated.
        let mut debug_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(vk::DebugUtilsMessageSeverityFlagsEXT::all())
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .user_callback(Some(debug_callback));

        if constants::VALIDATION_ENABLED {
            info = info.push_next(&mut debug_info);
        }

        let instance = entry.create_instance(&info, None)?;

        if !constants::VALIDATION_ENABLED {
            info!("Created Vulkan instance for `{}`.", title);
            return Ok((instance, vk::DebugUtilsMessengerEXT::null()));
        }

        match instance.create_debug_utils_messenger_ext(&debug_info, None) {
            Ok(messenger) => {
                info!("Created Vulkan instance for `{}` with validation.", title);
                Ok((instance, messenger))
            }
            Err(e) => {
                instance.destroy_instance(None);
                Err(e.into())
            }
        }
    }

    unsafe fn layers(entry: &Entry) -> Result<Vec<*const c_char>> {
        if !constants::VALIDATION_ENABLED {
            return Ok(Vec::new());
        }

        let available = entry
            .enumerate_instance_layer_properties()?
            .iter()
            .map(|l| l.layer_name)
            .collect::<HashSet<_>>();

        if !available.contains(&constants::VALIDATION_LAYER) {
            return Err(anyhow!("Validation layer requested but not supported."));
        }

        Ok(vec![constants::VALIDATION_LAYER.as_ptr()])
    }

    unsafe fn extensions(
        window: &Window,
        entry: &Entry,
    ) -> Result<(Vec<*const c_char>, vk::InstanceCreateFlags)> {
        let mut extensions = vk_window::get_required_instance_extensions(window)
            .iter()
            .map(|e| e.as_ptr())
            .collect::<Vec<_>>();

        if constants::VALIDATION_ENABLED {
            extensions.push(vk::EXT_DEBUG_UTILS_EXTENSION.name.as_ptr());
        }

        // Required by Vulkan SDK on macOS since 1.3.216.
        if cfg!(target_os = "macos") && entry.version()? >= constants::PORTABILITY_MACOS_VERSION {
            info!("Enabling extensions for macOS portability.");
            extensions.push(vk::KHR_GET_PHYSICAL_DEVICE_PROPERTIES2_EXTENSION.name.as_ptr());
            extensions.push(vk::KHR_PORTABILITY_ENUMERATION_EXTENSION.name.as_ptr());
            return Ok((extensions, vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR));
        }

        Ok((extensions, vk::InstanceCreateFlags::empty()))
    }
}

/// Routes validation messages to `log` by severity.
extern "system" fn debug_callback(
    severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    type_: vk::DebugUtilsMessageTypeFlagsEXT,
    data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _: *mut c_void,
) -> vk::Bool32 {
    let data = unsafe { *data };
    let message = unsafe { CStr::from_ptr(data.message) }.to_string_lossy();

    let level = if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        Level::Error
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        Level::Warn
    } else if severity >= vk::DebugUtilsMessageSeverityFlagsEXT::INFO {
        Level::Debug
    } else {
        Level::Trace
    };
    log!(level, "({:?}) {}", type_, message);

    vk::FALSE
}
