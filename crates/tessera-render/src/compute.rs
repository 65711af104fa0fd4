//! Compute output target.

use ash::vk;
use tessera_gpu::{BufferAllocator, GpuBuffer, GpuDevice, Result};

use crate::config::ComputeConfig;

/// One RGBA pixel written by the compute shader.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Pixel {
    pub r: f32,
    pub g: f32,
    pub b: f32,
    pub a: f32,
}

/// Dimensions of the compute workload's pixel output.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ComputeTarget {
    pub width: u32,
    pub height: u32,
    pub workgroup_size: u32,
    pub host_readable: bool,
}

impl From<&ComputeConfig> for ComputeTarget {
    fn from(config: &ComputeConfig) -> Self {
        Self {
            width: config.width,
            height: config.height,
            workgroup_size: config.workgroup_size.max(1),
            host_readable: config.host_readable,
        }
    }
}

impl ComputeTarget {
    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Bytes needed for the full pixel output.
    pub fn buffer_size(&self) -> vk::DeviceSize {
        (self.pixel_count() * std::mem::size_of::<Pixel>()) as vk::DeviceSize
    }

    /// Workgroup counts covering every pixel.
    pub fn dispatch_size(&self) -> [u32; 3] {
        [
            self.width.div_ceil(self.workgroup_size),
            self.height.div_ceil(self.workgroup_size),
            1,
        ]
    }

    fn memory_properties(&self) -> vk::MemoryPropertyFlags {
        if self.host_readable {
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT
        } else {
            vk::MemoryPropertyFlags::DEVICE_LOCAL
        }
    }

    /// Allocate the storage buffer for this target.
    pub fn create_buffer<D: GpuDevice + ?Sized>(
        &self,
        allocator: &BufferAllocator<'_, D>,
    ) -> Result<GpuBuffer> {
        allocator.create_buffer(
            self.buffer_size(),
            vk::BufferUsageFlags::STORAGE_BUFFER,
            self.memory_properties(),
            "compute output",
        )
    }
}
