use anyhow::Result;
use vulkanalia::prelude::v1_0::*;

use super::command_buffer::VulkanCommandBuffer;
use super::context::VulkanContext;
use crate::error::EngineError;

/// Index of the first memory type allowed by `type_bits` whose flags contain
/// `flags`.
pub fn find_memory_type(
    memory: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    flags: vk::MemoryPropertyFlags,
) -> Result<u32, EngineError> {
    (0..memory.memory_type_count)
        .find(|i| {
            let allowed = (type_bits & (1 << i)) != 0;
            allowed
                && memory.memory_types[*i as usize]
                    .property_flags
                    .contains(flags)
        })
        .ok_or(EngineError::MissingMemoryType)
}

pub struct VulkanBuffer;

impl VulkanBuffer {
    pub unsafe fn create(
        ctx: &VulkanContext,
        size: u64,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<(vk::Buffer, vk::DeviceMemory)> {
        let device = &ctx.device;
        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let buffer = device.create_buffer(&buffer_info, None)?;

        let requirements = device.get_buffer_memory_requirements(buffer);
        let memory = match VulkanBuffer::allocate(ctx, requirements, properties) {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_buffer(buffer, None);
                return Err(e);
            }
        };

        if let Err(e) = device.bind_buffer_memory(buffer, memory, 0) {
            device.destroy_buffer(buffer, None);
            device.free_memory(memory, None);
            return Err(e.into());
        }

        Ok((buffer, memory))
    }

    pub unsafe fn allocate(
        ctx: &VulkanContext,
        requirements: vk::MemoryRequirements,
        properties: vk::MemoryPropertyFlags,
    ) -> Result<vk::DeviceMemory> {
        let memory_type = find_memory_type(
            &ctx.memory_properties,
            requirements.memory_type_bits,
            properties,
        )?;

        let info = vk::MemoryAllocateInfo::builder()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type);

        Ok(ctx.device.allocate_memory(&info, None)?)
    }

    /// Maps `memory`, copies `data` to `offset` and unmaps.
    pub unsafe fn write(
        ctx: &VulkanContext,
        memory: vk::DeviceMemory,
        offset: u64,
        data: &[u8],
    ) -> Result<()> {
        let size = data.len() as u64;
        let ptr = ctx
            .device
            .map_memory(memory, offset, size, vk::MemoryMapFlags::empty())?;
        std::ptr::copy_nonoverlapping(data.as_ptr(), ptr.cast(), data.len());
        ctx.device.unmap_memory(memory);
        Ok(())
    }

    pub unsafe fn copy(
        ctx: &VulkanContext,
        source: vk::Buffer,
        destination: vk::Buffer,
        size: u64,
    ) -> Result<()> {
        let command_buffer = VulkanCommandBuffer::begin_single_time(ctx)?;

        let regions = vk::BufferCopy::builder().size(size);
        ctx.device
            .cmd_copy_buffer(command_buffer, source, destination, &[regions]);

        VulkanCommandBuffer::end_single_time(ctx, command_buffer)
    }

    pub unsafe fn destroy(ctx: &VulkanContext, buffer: vk::Buffer, memory: vk::DeviceMemory) {
        ctx.device.destroy_buffer(buffer, None);
        ctx.device.free_memory(memory, None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn memory(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut memory = vk::PhysicalDeviceMemoryProperties::default();
        memory.memory_type_count = types.len() as u32;
        for (i, flags) in types.iter().enumerate() {
            memory.memory_types[i].property_flags = *flags;
        }
        memory
    }

    #[test]
    fn picks_first_allowed_type_with_flags() {
        let memory = memory(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let host = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;

        assert_eq!(find_memory_type(&memory, 0b111, host).unwrap(), 2);
        assert_eq!(
            find_memory_type(&memory, 0b111, vk::MemoryPropertyFlags::HOST_VISIBLE).unwrap(),
            1
        );
        assert_eq!(
            find_memory_type(&memory, 0b001, vk::MemoryPropertyFlags::empty()).unwrap(),
            0
        );
    }

    #[test]
    fn respects_type_bits() {
        let memory = memory(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(
            find_memory_type(&memory, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            1
        );
        assert!(matches!(
            find_memory_type(&memory, 0b00, vk::MemoryPropertyFlags::DEVICE_LOCAL),
            Err(EngineError::MissingMemoryType)
        ));
    }
}
