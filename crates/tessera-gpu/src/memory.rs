//! GPU memory management.

use ash::vk;
use bytemuck::Pod;
use tracing::debug;

use crate::device::GpuDevice;
use crate::error::{GpuError, Result, VkResultExt};

/// Pick the first memory type allowed by `type_bits` that has all of `properties`.
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_bits: u32,
    properties: vk::MemoryPropertyFlags,
) -> Option<u32> {
    let count = (memory_properties.memory_type_count as usize).min(vk::MAX_MEMORY_TYPES);
    memory_properties.memory_types[..count]
        .iter()
        .enumerate()
        .find(|(i, memory_type)| {
            type_bits & (1 << i) != 0 && memory_type.property_flags.contains(properties)
        })
        .map(|(i, _)| i as u32)
}

/// Buffer allocator that binds every buffer to its own dedicated memory.
pub struct BufferAllocator<'a, D: GpuDevice + ?Sized> {
    device: &'a D,
    memory_properties: vk::PhysicalDeviceMemoryProperties,
}

impl<'a, D: GpuDevice + ?Sized> BufferAllocator<'a, D> {
    /// Create a new allocator over the device's memory-type table.
    pub fn new(device: &'a D) -> Self {
        Self {
            memory_properties: device.memory_properties(),
            device,
        }
    }

    /// Allocate a buffer with dedicated memory.
    ///
    /// The buffer is returned only once it is bound; on failure every object
    /// created along the way is destroyed again.
    pub fn create_buffer(
        &self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        properties: vk::MemoryPropertyFlags,
        name: &str,
    ) -> Result<GpuBuffer> {
        let device = self.device;
        let buffer = device.create_buffer(size, usage).check("vkCreateBuffer")?;

        let requirements = device.buffer_memory_requirements(buffer);
        let Some(memory_type_index) = find_memory_type(
            &self.memory_properties,
            requirements.memory_type_bits,
            properties,
        ) else {
            device.destroy_buffer(buffer);
            return Err(GpuError::NoCompatibleMemoryType {
                type_bits: requirements.memory_type_bits,
                properties,
            });
        };

        let memory = match device
            .allocate_memory(requirements.size, memory_type_index)
            .check("vkAllocateMemory")
        {
            Ok(memory) => memory,
            Err(e) => {
                device.destroy_buffer(buffer);
                return Err(e);
            }
        };

        if let Err(e) = device
            .bind_buffer_memory(buffer, memory, 0)
            .check("vkBindBufferMemory")
        {
            device.free_memory(memory);
            device.destroy_buffer(buffer);
            return Err(e);
        }

        debug!(
            buffer = name,
            size,
            allocation = requirements.size,
            memory_type_index,
            "Buffer created"
        );

        Ok(GpuBuffer {
            buffer,
            memory,
            size,
            properties,
        })
    }

    /// Allocate `count` independent host-visible, host-coherent uniform buffers
    /// sized for one `T` each.
    pub fn create_uniform_buffers<T: Pod>(&self, count: usize) -> Result<Vec<GpuBuffer>> {
        let size = std::mem::size_of::<T>() as vk::DeviceSize;
        let mut buffers = Vec::with_capacity(count);
        for i in 0..count {
            let buffer = self.create_buffer(
                size,
                vk::BufferUsageFlags::UNIFORM_BUFFER,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                &format!("uniform[{i}]"),
            );
            match buffer {
                Ok(buffer) => buffers.push(buffer),
                Err(e) => {
                    for buffer in buffers {
                        self.free_buffer(buffer);
                    }
                    return Err(e);
                }
            }
        }
        Ok(buffers)
    }

    /// Destroy a buffer together with its memory.
    pub fn free_buffer(&self, buffer: GpuBuffer) {
        buffer.destroy(self.device);
    }
}

/// A GPU buffer with its dedicated memory.
#[derive(Debug)]
pub struct GpuBuffer {
    pub buffer: vk::Buffer,
    pub memory: vk::DeviceMemory,
    pub size: vk::DeviceSize,
    pub properties: vk::MemoryPropertyFlags,
}

impl GpuBuffer {
    /// Whether the host can map this buffer's memory.
    pub fn is_host_visible(&self) -> bool {
        self.properties
            .contains(vk::MemoryPropertyFlags::HOST_VISIBLE)
    }

    /// Write raw bytes at the given offset (must be host-visible).
    pub fn write_bytes<D: GpuDevice + ?Sized>(
        &self,
        device: &D,
        offset: vk::DeviceSize,
        data: &[u8],
    ) -> Result<()> {
        self.check_host_range(offset, data.len())?;
        device
            .write_memory(self.memory, offset, data)
            .check("vkMapMemory")
    }

    /// Write a single plain-data value at offset 0.
    pub fn write_pod<D: GpuDevice + ?Sized, T: Pod>(&self, device: &D, value: &T) -> Result<()> {
        self.write_bytes(device, 0, bytemuck::bytes_of(value))
    }

    /// Read raw bytes from the given offset (must be host-visible).
    pub fn read_bytes<D: GpuDevice + ?Sized>(
        &self,
        device: &D,
        offset: vk::DeviceSize,
        out: &mut [u8],
    ) -> Result<()> {
        self.check_host_range(offset, out.len())?;
        device
            .read_memory(self.memory, offset, out)
            .check("vkMapMemory")
    }

    /// Destroy the buffer and free its memory.
    pub fn destroy<D: GpuDevice + ?Sized>(self, device: &D) {
        device.destroy_buffer(self.buffer);
        device.free_memory(self.memory);
    }

    fn check_host_range(&self, offset: vk::DeviceSize, len: usize) -> Result<()> {
        if !self.is_host_visible() {
            return Err(GpuError::InvalidState(
                "Buffer memory is not host-visible".to_string(),
            ));
        }
        let needed = offset
            .checked_add(len as vk::DeviceSize)
            .ok_or_else(|| GpuError::InvalidState("Offset overflow".to_string()))?;
        if needed > self.size {
            return Err(GpuError::BufferTooSmall {
                needed,
                size: self.size,
            });
        }
        Ok(())
    }
}
